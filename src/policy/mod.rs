//! Bet policies: named thresholding rules that convert a model-vs-market
//! deviation into a discrete bet decision.
//!
//! Cutoff values are calibrated offline from historical deviation
//! distributions and loaded from a calibration config at startup; the engine
//! itself is a pure lookup-and-compare.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::data::models::{League, ModelKey, ResponseType};
use crate::features::MoneylineImputation;

/// Net payout per dollar on a winning bet at standard -110 juice, used when
/// scanning for the max-return cutoff.
const STANDARD_PAYOUT: f64 = 100.0 / 110.0;
/// Minimum historical bets a max-return candidate threshold must produce.
const MIN_BETS_FOR_MAX_RETURN: usize = 10;

/// Named risk policies, from most aggressive to most conservative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Policy {
    /// Bet whenever any non-zero edge exists.
    AllIn,
    /// Bet only past the edge that historically maximized net return.
    MaxReturn,
    /// Bet only when |deviation| ranks in the historical top 10%.
    TopDecile,
    /// Top 25%.
    TopQuartile,
    /// Top 50%.
    TopHalf,
    /// Most conservative threshold (95th percentile).
    MinRisk,
}

impl Policy {
    pub fn all() -> [Policy; 6] {
        [
            Policy::AllIn,
            Policy::MaxReturn,
            Policy::TopDecile,
            Policy::TopQuartile,
            Policy::TopHalf,
            Policy::MinRisk,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Policy::AllIn => "all_in",
            Policy::MaxReturn => "max_return",
            Policy::TopDecile => "top_decile",
            Policy::TopQuartile => "top_quartile",
            Policy::TopHalf => "top_half",
            Policy::MinRisk => "min_risk",
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed decision set, response-type-scoped at render time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BetSide {
    Home,
    Away,
    NoBet,
}

impl BetSide {
    /// Human label for the given response type.
    pub fn label(&self, response: ResponseType) -> &'static str {
        match response {
            ResponseType::Spread => match self {
                BetSide::Home => "Home ATS",
                BetSide::Away => "Away ATS",
                BetSide::NoBet => "No Bet ATS",
            },
            ResponseType::Over => match self {
                BetSide::Home => "Over",
                BetSide::Away => "Under",
                BetSide::NoBet => "No Bet Over",
            },
        }
    }
}

/// Signed entry cutoffs: bet the home side above `home_min`, the away side
/// below `away_max`, otherwise no bet. Both comparisons are strict, so a
/// zero deviation never triggers a bet even under `all_in`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PolicyCutoffs {
    pub home_min: f64,
    pub away_max: f64,
}

/// One calibrated cutoff row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PolicyThreshold {
    pub league: League,
    pub response: ResponseType,
    pub policy: Policy,
    pub home_min: f64,
    pub away_max: f64,
}

/// Startup calibration: the moneyline imputation fit plus every policy
/// cutoff. Compiled-in defaults apply when no file is present, so
/// re-calibration never requires redeploying logic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationConfig {
    pub imputation: MoneylineImputation,
    pub thresholds: Vec<PolicyThreshold>,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        let mut thresholds = Vec::new();
        for key in ModelKey::all() {
            let (half, quartile, decile, min_risk, max_return) = match (key.league, key.response) {
                (League::Nfl, ResponseType::Spread) => (1.25, 2.5, 4.0, 5.5, 3.0),
                (League::Nfl, ResponseType::Over) => (1.5, 3.0, 4.75, 6.5, 3.5),
                (League::CollegeFootball, ResponseType::Spread) => (2.0, 3.75, 6.0, 8.0, 4.5),
                (League::CollegeFootball, ResponseType::Over) => (2.25, 4.25, 6.75, 9.0, 5.0),
            };
            let mut push = |policy: Policy, cut: f64| {
                thresholds.push(PolicyThreshold {
                    league: key.league,
                    response: key.response,
                    policy,
                    home_min: cut,
                    away_max: -cut,
                });
            };
            push(Policy::AllIn, 0.0);
            push(Policy::MaxReturn, max_return);
            push(Policy::TopDecile, decile);
            push(Policy::TopQuartile, quartile);
            push(Policy::TopHalf, half);
            push(Policy::MinRisk, min_risk);
        }
        CalibrationConfig {
            imputation: MoneylineImputation::default(),
            thresholds,
        }
    }
}

impl CalibrationConfig {
    /// Load from `path`, falling back to compiled-in defaults when the file
    /// does not exist. A malformed file is an error, never a silent default.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!(
                "No calibration config at {}; using compiled-in defaults",
                path.display()
            );
            return Ok(CalibrationConfig::default());
        }
        let bytes = fs::read(path)
            .with_context(|| format!("Failed to read calibration config {}", path.display()))?;
        serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse calibration config {}", path.display()))
    }

    /// Whole-file replacement write.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(self).context("Failed to serialize calibration")?;
        fs::write(&tmp, bytes)
            .with_context(|| format!("Failed to write calibration {}", tmp.display()))?;
        fs::rename(&tmp, path)
            .with_context(|| format!("Failed to replace calibration {}", path.display()))?;
        Ok(())
    }

    /// Replace every cutoff row for `key` with freshly calibrated values.
    pub fn replace_thresholds(&mut self, key: ModelKey, rows: Vec<PolicyThreshold>) {
        self.thresholds
            .retain(|t| !(t.league == key.league && t.response == key.response));
        self.thresholds.extend(rows);
    }
}

/// Pure deviation-to-decision mapping over calibrated cutoffs.
#[derive(Debug, Clone)]
pub struct PolicyEngine {
    cutoffs: HashMap<(League, ResponseType, Policy), PolicyCutoffs>,
}

impl PolicyEngine {
    pub fn new(calibration: &CalibrationConfig) -> Self {
        let cutoffs = calibration
            .thresholds
            .iter()
            .map(|t| {
                (
                    (t.league, t.response, t.policy),
                    PolicyCutoffs {
                        home_min: t.home_min,
                        away_max: t.away_max,
                    },
                )
            })
            .collect();
        PolicyEngine { cutoffs }
    }

    /// Deterministic given (deviation, policy, calibration); no state.
    pub fn apply(&self, key: ModelKey, policy: Policy, deviation: f64) -> BetSide {
        let Some(cut) = self.cutoffs.get(&(key.league, key.response, policy)) else {
            warn!("No calibrated cutoffs for {} {}; not betting", key, policy);
            return BetSide::NoBet;
        };
        if deviation > cut.home_min {
            BetSide::Home
        } else if deviation < cut.away_max {
            BetSide::Away
        } else {
            BetSide::NoBet
        }
    }
}

/// Hand-tuned league-specific label mapping for spread deviations. The
/// thresholds are behavioral configuration, preserved exactly.
pub fn label_bet_ats(league: League, p: f64) -> &'static str {
    match league {
        League::Nfl => {
            if p > 0.9 {
                "Home ATS"
            } else if p < -2.5 {
                "Away ATS"
            } else {
                "No Bet ATS"
            }
        }
        League::CollegeFootball => {
            if p > 0.0 {
                "Home ATS"
            } else if p > -1.0 && p < 0.0 {
                "Away ATS"
            } else {
                "No Bet ATS"
            }
        }
    }
}

/// One historical observation for offline cutoff calibration.
#[derive(Debug, Clone, Copy)]
pub struct DeviationSample {
    /// Model estimate minus market line.
    pub deviation: f64,
    /// Actual outcome minus market line (off_spread / off_total): positive
    /// means the home/over side beat the line.
    pub excess: f64,
}

/// Offline calibration of every policy cutoff for one (league, response)
/// pair from its historical deviation distribution.
pub fn calibrate_thresholds(key: ModelKey, samples: &[DeviationSample]) -> Vec<PolicyThreshold> {
    let mut magnitudes: Vec<f64> = samples.iter().map(|s| s.deviation.abs()).collect();
    magnitudes.sort_by(|a, b| a.partial_cmp(b).expect("finite deviations"));

    let q = |quantile: f64| percentile(&magnitudes, quantile);
    let max_return = max_return_cutoff(samples, &magnitudes).unwrap_or_else(|| q(0.75));

    let row = |policy: Policy, cut: f64| PolicyThreshold {
        league: key.league,
        response: key.response,
        policy,
        home_min: cut,
        away_max: -cut,
    };
    vec![
        row(Policy::AllIn, 0.0),
        row(Policy::MaxReturn, max_return),
        row(Policy::TopDecile, q(0.90)),
        row(Policy::TopQuartile, q(0.75)),
        row(Policy::TopHalf, q(0.50)),
        row(Policy::MinRisk, q(0.95)),
    ]
}

/// Nearest-rank percentile of an ascending-sorted slice.
fn percentile(sorted: &[f64], quantile: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (quantile * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

/// Scan candidate cutoffs (deciles of |deviation|) for the one maximizing
/// historical net return per bet at standard juice. Smallest cutoff wins
/// ties, so equally profitable thresholds prefer more bets.
fn max_return_cutoff(samples: &[DeviationSample], sorted_magnitudes: &[f64]) -> Option<f64> {
    let mut candidates = vec![0.0];
    for decile in 1..=9 {
        candidates.push(percentile(sorted_magnitudes, decile as f64 / 10.0));
    }
    candidates.dedup_by(|a, b| (*a - *b).abs() < 1e-12);

    let mut best: Option<(f64, f64)> = None;
    for &cut in &candidates {
        let mut bets = 0usize;
        let mut net = 0.0;
        for s in samples {
            let side_sign = if s.deviation > cut {
                1.0
            } else if s.deviation < -cut {
                -1.0
            } else {
                continue;
            };
            bets += 1;
            let resolved = side_sign * s.excess;
            if resolved > 0.0 {
                net += STANDARD_PAYOUT;
            } else if resolved < 0.0 {
                net -= 1.0;
            }
            // Pushes refund the stake.
        }
        if bets < MIN_BETS_FOR_MAX_RETURN {
            continue;
        }
        let per_bet = net / bets as f64;
        if best.map_or(true, |(_, b)| per_bet > b) {
            best = Some((cut, per_bet));
        }
    }
    best.map(|(cut, _)| cut)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn nfl_spread() -> ModelKey {
        ModelKey::new(League::Nfl, ResponseType::Spread)
    }

    // ── label_bet_ats (hand-tuned mapping, preserved exactly) ────────────────

    #[test]
    fn nfl_label_thresholds() {
        assert_eq!(label_bet_ats(League::Nfl, 1.0), "Home ATS");
        assert_eq!(label_bet_ats(League::Nfl, -3.0), "Away ATS");
        assert_eq!(label_bet_ats(League::Nfl, 0.0), "No Bet ATS");
        assert_eq!(label_bet_ats(League::Nfl, 0.9), "No Bet ATS");
        assert_eq!(label_bet_ats(League::Nfl, -2.5), "No Bet ATS");
    }

    #[test]
    fn college_label_thresholds() {
        assert_eq!(label_bet_ats(League::CollegeFootball, 0.5), "Home ATS");
        assert_eq!(label_bet_ats(League::CollegeFootball, -0.5), "Away ATS");
        // Boundary at exactly -1 is excluded from Away ATS.
        assert_eq!(label_bet_ats(League::CollegeFootball, -1.0), "No Bet ATS");
        assert_eq!(label_bet_ats(League::CollegeFootball, 0.0), "No Bet ATS");
    }

    // ── Engine ───────────────────────────────────────────────────────────────

    #[test]
    fn all_in_bets_any_nonzero_edge() {
        let engine = PolicyEngine::new(&CalibrationConfig::default());
        assert_eq!(
            engine.apply(nfl_spread(), Policy::AllIn, 0.1),
            BetSide::Home
        );
        assert_eq!(
            engine.apply(nfl_spread(), Policy::AllIn, -0.1),
            BetSide::Away
        );
        assert_eq!(
            engine.apply(nfl_spread(), Policy::AllIn, 0.0),
            BetSide::NoBet
        );
    }

    #[test]
    fn conservative_policies_need_bigger_edges() {
        let engine = PolicyEngine::new(&CalibrationConfig::default());
        let dev = 2.0;
        assert_eq!(engine.apply(nfl_spread(), Policy::AllIn, dev), BetSide::Home);
        assert_eq!(
            engine.apply(nfl_spread(), Policy::TopHalf, dev),
            BetSide::Home
        );
        assert_eq!(
            engine.apply(nfl_spread(), Policy::MinRisk, dev),
            BetSide::NoBet
        );
    }

    #[test]
    fn apply_is_deterministic() {
        let engine = PolicyEngine::new(&CalibrationConfig::default());
        for policy in Policy::all() {
            for dev in [-7.3, -0.4, 0.0, 0.4, 7.3] {
                assert_eq!(
                    engine.apply(nfl_spread(), policy, dev),
                    engine.apply(nfl_spread(), policy, dev)
                );
            }
        }
    }

    #[test]
    fn labels_are_response_scoped() {
        assert_eq!(BetSide::Home.label(ResponseType::Spread), "Home ATS");
        assert_eq!(BetSide::Away.label(ResponseType::Over), "Under");
        assert_eq!(BetSide::NoBet.label(ResponseType::Over), "No Bet Over");
    }

    #[test]
    fn default_config_covers_the_full_cross_product() {
        let config = CalibrationConfig::default();
        assert_eq!(config.thresholds.len(), 4 * 6);
        let engine = PolicyEngine::new(&config);
        for key in ModelKey::all() {
            for policy in Policy::all() {
                // Every combination resolves without the missing-cutoff path.
                let _ = engine.apply(key, policy, 100.0);
            }
        }
    }

    // ── Calibration ──────────────────────────────────────────────────────────

    #[test]
    fn quantile_cutoffs_come_from_the_magnitude_distribution() {
        let samples: Vec<DeviationSample> = (1..=100)
            .map(|i| DeviationSample {
                deviation: if i % 2 == 0 { i as f64 } else { -(i as f64) },
                excess: 1.0,
            })
            .collect();
        let rows = calibrate_thresholds(nfl_spread(), &samples);
        let find = |policy: Policy| {
            rows.iter()
                .find(|r| r.policy == policy)
                .expect("policy row")
        };
        assert_relative_eq!(find(Policy::TopHalf).home_min, 50.0, epsilon = 1e-12);
        assert_relative_eq!(find(Policy::TopQuartile).home_min, 75.0, epsilon = 1e-12);
        assert_relative_eq!(find(Policy::TopDecile).home_min, 90.0, epsilon = 1e-12);
        assert_relative_eq!(find(Policy::MinRisk).home_min, 95.0, epsilon = 1e-12);
        assert_relative_eq!(find(Policy::AllIn).home_min, 0.0, epsilon = 1e-12);
        assert_relative_eq!(
            find(Policy::TopHalf).away_max,
            -find(Policy::TopHalf).home_min,
            epsilon = 1e-12
        );
    }

    #[test]
    fn max_return_prefers_the_profitable_region() {
        // Small deviations lose at the juice; |deviation| >= 6 always wins.
        let mut samples = Vec::new();
        for i in 1..=120 {
            let magnitude = (i % 10 + 1) as f64;
            let sign = if i % 2 == 0 { 1.0 } else { -1.0 };
            let wins = magnitude >= 6.0 || i % 3 == 0;
            samples.push(DeviationSample {
                deviation: sign * magnitude,
                excess: if wins { sign * 3.0 } else { -sign * 3.0 },
            });
        }
        let rows = calibrate_thresholds(nfl_spread(), &samples);
        let max_return = rows
            .iter()
            .find(|r| r.policy == Policy::MaxReturn)
            .unwrap();
        assert!(
            max_return.home_min >= 4.0,
            "max_return cutoff should exclude the losing small-edge region, got {}",
            max_return.home_min
        );
    }

    #[test]
    fn calibration_round_trips_through_the_config_file() {
        let mut config = CalibrationConfig::default();
        let samples: Vec<DeviationSample> = (1..=60)
            .map(|i| DeviationSample {
                deviation: (i as f64) / 4.0 * if i % 2 == 0 { 1.0 } else { -1.0 },
                excess: 1.0,
            })
            .collect();
        config.replace_thresholds(nfl_spread(), calibrate_thresholds(nfl_spread(), &samples));

        let path = std::env::temp_dir().join("spreadline_calibration_roundtrip.json");
        config.save(&path).unwrap();
        let loaded = CalibrationConfig::load(&path).unwrap();
        assert_eq!(loaded.thresholds.len(), config.thresholds.len());
        let engine_a = PolicyEngine::new(&config);
        let engine_b = PolicyEngine::new(&loaded);
        assert_eq!(
            engine_a.apply(nfl_spread(), Policy::TopHalf, 8.0),
            engine_b.apply(nfl_spread(), Policy::TopHalf, 8.0)
        );
        std::fs::remove_file(&path).ok();
    }
}
