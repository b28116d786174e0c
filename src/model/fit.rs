//! Default fitting backend: ridge regression on standardized fixed effects
//! plus partially-pooled per-team intercepts.
//!
//! Team-level sample sizes are small, so raw per-team means overfit badly.
//! The team effects are therefore shrunken toward zero with strength
//! `n_j / (n_j + lambda)`, `lambda = sigma^2_resid / sigma^2_team` estimated
//! by method of moments from the fixed-effect residuals.

use std::collections::BTreeMap;

use anyhow::{bail, Result};
use chrono::Utc;
use tracing::info;

use crate::data::models::ResponseType;

use super::{FittedLineModel, FittingBackend, TrainingSet};

const MIN_TRAIN_ROWS: usize = 24;
const L2_REG: f64 = 0.02;
const LEARNING_RATE: f64 = 0.1;
const MAX_ITERS: usize = 6000;
const GRAD_EPS: f64 = 1e-9;
const POOLING_SWEEPS: usize = 4;
const MIN_LAMBDA: f64 = 1.0;
const MAX_LAMBDA: f64 = 500.0;

/// Ridge + partial-pooling backend. Stateless; safe to share.
#[derive(Debug, Clone, Copy, Default)]
pub struct PooledRidgeBackend;

impl FittingBackend for PooledRidgeBackend {
    fn fit(&self, training: &TrainingSet) -> Result<FittedLineModel> {
        let n = training.rows.len();
        if n < MIN_TRAIN_ROWS {
            bail!(
                "not enough training rows for {}: {} < {}",
                training.key,
                n,
                MIN_TRAIN_ROWS
            );
        }

        let p = training.feature_names.len();
        let mut raw = vec![vec![0.0f64; p]; n];
        let mut y = vec![0.0f64; n];
        for (i, row) in training.rows.iter().enumerate() {
            y[i] = row.response;
            for (j, name) in training.feature_names.iter().enumerate() {
                match row.features.get(name) {
                    Some(v) => raw[i][j] = v,
                    None => bail!(
                        "training row {} for {} is missing feature '{}'",
                        row.features.game_id,
                        training.key,
                        name
                    ),
                }
            }
        }

        // Standardize columns; constant columns stay at zero.
        let (means, stds) = column_moments(&raw);
        let x: Vec<Vec<f64>> = raw
            .iter()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .map(|(j, v)| {
                        if stds[j] > 0.0 {
                            (v - means[j]) / stds[j]
                        } else {
                            0.0
                        }
                    })
                    .collect()
            })
            .collect();

        let (intercept, coefficients) = ridge_gradient_descent(&x, &y);

        // Fixed-effect residuals feed the team-level pooling.
        let residuals: Vec<f64> = (0..n)
            .map(|i| y[i] - predict_fixed(intercept, &coefficients, &x[i]))
            .collect();

        let signs = match training.key.response {
            ResponseType::Spread => (1.0, -1.0),
            ResponseType::Over => (1.0, 1.0),
        };
        let terms: Vec<[(String, f64); 2]> = training
            .rows
            .iter()
            .map(|row| {
                [
                    (row.features.home_team.clone(), signs.0),
                    (row.features.away_team.clone(), signs.1),
                ]
            })
            .collect();

        let (team_effects, shrinkage_lambda) = pool_team_effects(&residuals, &terms);

        let pooled_residuals: Vec<f64> = residuals
            .iter()
            .zip(&terms)
            .map(|(r, pair)| {
                r - pair
                    .iter()
                    .map(|(team, s)| s * team_effects.get(team).copied().unwrap_or(0.0))
                    .sum::<f64>()
            })
            .collect();
        let residual_std = variance(&pooled_residuals).sqrt();

        info!(
            "Fitted {}: {} rows, {} teams, lambda={:.1}, residual_std={:.2}",
            training.key,
            n,
            team_effects.len(),
            shrinkage_lambda,
            residual_std
        );

        Ok(FittedLineModel {
            key: training.key,
            feature_names: training.feature_names.clone(),
            feature_means: means,
            feature_stds: stds,
            intercept,
            coefficients,
            team_effects,
            shrinkage_lambda,
            residual_std,
            training_rows: n,
            fitted_at: Utc::now(),
        })
    }
}

fn column_moments(raw: &[Vec<f64>]) -> (Vec<f64>, Vec<f64>) {
    let n = raw.len() as f64;
    let p = raw.first().map(Vec::len).unwrap_or(0);
    let mut means = vec![0.0; p];
    for row in raw {
        for (j, v) in row.iter().enumerate() {
            means[j] += v;
        }
    }
    for m in &mut means {
        *m /= n;
    }
    let mut stds = vec![0.0; p];
    for row in raw {
        for (j, v) in row.iter().enumerate() {
            stds[j] += (v - means[j]).powi(2);
        }
    }
    for s in &mut stds {
        *s = (*s / n).sqrt();
        if *s < 1e-9 {
            *s = 0.0;
        }
    }
    (means, stds)
}

fn predict_fixed(intercept: f64, coefficients: &[f64], x: &[f64]) -> f64 {
    intercept
        + coefficients
            .iter()
            .zip(x)
            .map(|(c, v)| c * v)
            .sum::<f64>()
}

/// Full-batch gradient descent on the ridge objective. Features must be
/// standardized; the intercept is unpenalized.
fn ridge_gradient_descent(x: &[Vec<f64>], y: &[f64]) -> (f64, Vec<f64>) {
    let n = x.len() as f64;
    let p = x.first().map(Vec::len).unwrap_or(0);
    let mut intercept = y.iter().sum::<f64>() / n;
    let mut coefficients = vec![0.0f64; p];

    for _ in 0..MAX_ITERS {
        let mut grad_b = 0.0;
        let mut grad = vec![0.0f64; p];
        for (row, &yi) in x.iter().zip(y) {
            let err = predict_fixed(intercept, &coefficients, row) - yi;
            grad_b += err;
            for (j, v) in row.iter().enumerate() {
                grad[j] += err * v;
            }
        }
        grad_b /= n;
        let mut max_grad = grad_b.abs();
        for (j, g) in grad.iter_mut().enumerate() {
            *g = *g / n + L2_REG * coefficients[j];
            max_grad = max_grad.max(g.abs());
        }

        intercept -= LEARNING_RATE * grad_b;
        for (j, g) in grad.iter().enumerate() {
            coefficients[j] -= LEARNING_RATE * g;
        }

        if max_grad < GRAD_EPS {
            break;
        }
    }

    (intercept, coefficients)
}

/// Estimate shrunken team effects from signed residual contributions.
fn pool_team_effects(
    residuals: &[f64],
    terms: &[[(String, f64); 2]],
) -> (BTreeMap<String, f64>, f64) {
    // Per-team signed residual sums and row memberships.
    let mut rows_by_team: BTreeMap<String, Vec<(usize, f64)>> = BTreeMap::new();
    for (i, pair) in terms.iter().enumerate() {
        for (team, sign) in pair {
            rows_by_team
                .entry(team.clone())
                .or_default()
                .push((i, *sign));
        }
    }

    let sigma2_e = variance(residuals);
    if sigma2_e < 1e-12 {
        // Fixed effects explain everything; nothing to pool.
        let effects = rows_by_team.keys().map(|t| (t.clone(), 0.0)).collect();
        return (effects, MAX_LAMBDA);
    }

    // Method of moments: raw per-team means, corrected for sampling noise.
    let raw_means: Vec<f64> = rows_by_team
        .values()
        .filter(|rows| rows.len() >= 2)
        .map(|rows| {
            rows.iter().map(|(i, s)| s * residuals[*i]).sum::<f64>() / rows.len() as f64
        })
        .collect();
    let mean_inv_n = rows_by_team
        .values()
        .map(|rows| 1.0 / rows.len() as f64)
        .sum::<f64>()
        / rows_by_team.len() as f64;
    let sigma2_team = (variance(&raw_means) - sigma2_e * mean_inv_n).max(sigma2_e / 100.0);
    let lambda = (sigma2_e / sigma2_team).clamp(MIN_LAMBDA, MAX_LAMBDA);

    // Gauss-Seidel sweeps over teams in sorted (deterministic) order.
    let mut effects: BTreeMap<String, f64> =
        rows_by_team.keys().map(|t| (t.clone(), 0.0)).collect();
    for _ in 0..POOLING_SWEEPS {
        for (team, rows) in &rows_by_team {
            let mut numer = 0.0;
            for (i, sign) in rows {
                let other: f64 = terms[*i]
                    .iter()
                    .filter(|(t, _)| t != team)
                    .map(|(t, s)| s * effects.get(t).copied().unwrap_or(0.0))
                    .sum();
                numer += sign * (residuals[*i] - other);
            }
            let alpha = numer / (rows.len() as f64 + lambda);
            effects.insert(team.clone(), alpha);
        }
    }

    (effects, lambda)
}

fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::models::{League, ModelKey};
    use crate::features::FeatureVector;
    use crate::model::TrainingRow;
    use chrono::NaiveDate;
    use std::collections::BTreeMap;

    fn training_row(home: &str, away: &str, x1: f64, x2: f64, y: f64) -> TrainingRow {
        let mut values = BTreeMap::new();
        values.insert("x1".to_string(), x1);
        values.insert("x2".to_string(), x2);
        TrainingRow {
            features: FeatureVector {
                game_id: format!("2022_01_{}_{}", away, home),
                gameday: NaiveDate::from_ymd_opt(2022, 9, 11).unwrap(),
                home_team: home.into(),
                away_team: away.into(),
                values,
            },
            response: y,
        }
    }

    const TEAMS: [&str; 8] = ["A", "B", "C", "D", "E", "F", "G", "H"];

    #[test]
    fn ridge_recovers_a_linear_relationship() {
        // Noiseless y = 3 + 2*x1 - 1.5*x2 across a rotating schedule.
        let mut rows = Vec::new();
        for i in 0..160 {
            let x1 = (i % 17) as f64 - 8.0;
            let x2 = ((i * 7) % 13) as f64 - 6.0;
            let y = 3.0 + 2.0 * x1 - 1.5 * x2;
            let home = TEAMS[i % 8];
            let away = TEAMS[(i + 3) % 8];
            rows.push(training_row(home, away, x1, x2, y));
        }
        let training = TrainingSet {
            key: ModelKey::new(League::Nfl, ResponseType::Spread),
            feature_names: vec!["x1".to_string(), "x2".to_string()],
            rows,
        };
        let model = PooledRidgeBackend.fit(&training).unwrap();

        let probe = training_row("A", "D", 4.0, -2.0, 0.0);
        let expected = 3.0 + 2.0 * 4.0 - 1.5 * -2.0;
        let got = model.predict(&probe.features).unwrap();
        assert!(
            (got - expected).abs() < 0.5,
            "expected ~{:.2}, got {:.2}",
            expected,
            got
        );
    }

    #[test]
    fn strong_team_gets_a_positive_shrunken_effect() {
        // Team A beats the baseline by ~6 points whether home or away;
        // everyone else is average.
        let mut rows = Vec::new();
        for i in 0..120 {
            let home = TEAMS[i % 8];
            let away = TEAMS[(i + 1 + (i / 8) % 6) % 8];
            if home == away {
                continue;
            }
            let mut y = 0.0;
            if home == "A" {
                y += 6.0;
            }
            if away == "A" {
                y -= 6.0;
            }
            // Mild deterministic wobble so residual variance is non-zero.
            y += ((i % 5) as f64 - 2.0) * 0.8;
            rows.push(training_row(home, away, 0.0, 0.0, y));
        }
        let training = TrainingSet {
            key: ModelKey::new(League::Nfl, ResponseType::Spread),
            feature_names: vec!["x1".to_string(), "x2".to_string()],
            rows,
        };
        let model = PooledRidgeBackend.fit(&training).unwrap();

        let alpha_a = model.team_effects["A"];
        assert!(alpha_a > 1.0, "Team A effect should be positive, got {:.3}", alpha_a);
        assert!(
            alpha_a < 6.0,
            "Team A effect should shrink below the raw +6, got {:.3}",
            alpha_a
        );
        for team in TEAMS.iter().filter(|t| **t != "A") {
            assert!(
                model.team_effects[*team].abs() < alpha_a,
                "{} should have a smaller effect than A",
                team
            );
        }
    }

    #[test]
    fn refuses_to_fit_on_too_few_rows() {
        let rows = vec![training_row("A", "B", 0.0, 0.0, 1.0); 5];
        let training = TrainingSet {
            key: ModelKey::new(League::Nfl, ResponseType::Spread),
            feature_names: vec!["x1".to_string(), "x2".to_string()],
            rows,
        };
        assert!(PooledRidgeBackend.fit(&training).is_err());
    }

    #[test]
    fn constant_response_fits_without_nan() {
        let mut rows = Vec::new();
        for i in 0..40 {
            rows.push(training_row(TEAMS[i % 8], TEAMS[(i + 3) % 8], 1.0, 1.0, 42.0));
        }
        let training = TrainingSet {
            key: ModelKey::new(League::Nfl, ResponseType::Over),
            feature_names: vec!["x1".to_string(), "x2".to_string()],
            rows,
        };
        let model = PooledRidgeBackend.fit(&training).unwrap();
        let y = model
            .predict(&training_row("A", "B", 1.0, 1.0, 0.0).features)
            .unwrap();
        assert!(y.is_finite());
        assert!((y - 42.0).abs() < 1e-6, "got {}", y);
        assert!(model.residual_std.is_finite());
    }
}
