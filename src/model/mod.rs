//! Fitted spread/total models and their on-disk artifacts.
//!
//! One model per (league, response) pair. The fitting backend is a pluggable
//! strategy (`FittingBackend`), so the partial-pooling implementation in
//! [`fit`] can be swapped without touching the pipeline.

pub mod fit;
pub mod registry;

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::data::models::{ModelKey, ResponseType};
use crate::error::PipelineError;
use crate::features::{self, FeatureVector};

/// z-score for the 90% predictive interval.
const INTERVAL_Z: f64 = 1.645;

/// One observed (features, response) pair used for fitting.
#[derive(Debug, Clone)]
pub struct TrainingRow {
    pub features: FeatureVector,
    pub response: f64,
}

/// Everything a backend needs to fit one (league, response) model.
#[derive(Debug, Clone)]
pub struct TrainingSet {
    pub key: ModelKey,
    pub feature_names: Vec<String>,
    pub rows: Vec<TrainingRow>,
}

/// Swappable fitting strategy: fit(data) -> FittedLineModel.
pub trait FittingBackend {
    fn fit(&self, training: &TrainingSet) -> Result<FittedLineModel>;
}

/// Fixed-effect feature set per response type.
pub fn default_feature_names(response: ResponseType) -> Vec<String> {
    let names: &[&str] = match response {
        ResponseType::Spread => &[
            features::F_SPREAD_LINE,
            features::F_AWAY_IS_FAVORITE,
            features::F_MONEY_LINE,
            features::F_AWAY_WIN_PROB,
            features::F_HOME_POINTS_FOR_FORM,
            features::F_HOME_POINTS_AGAINST_FORM,
            features::F_AWAY_POINTS_FOR_FORM,
            features::F_AWAY_POINTS_AGAINST_FORM,
        ],
        ResponseType::Over => &[
            features::F_TOTAL_LINE,
            features::F_AWAY_WIN_PROB,
            features::F_HOME_POINTS_FOR_FORM,
            features::F_HOME_POINTS_AGAINST_FORM,
            features::F_AWAY_POINTS_FOR_FORM,
            features::F_AWAY_POINTS_AGAINST_FORM,
        ],
    };
    names.iter().map(|s| s.to_string()).collect()
}

/// A fitted regression with partially-pooled team effects.
///
/// Fixed effects operate on standardized features (means/stds stored with
/// the model); team effects are shrunken per-team intercepts keyed on team
/// identity. Teams unseen during fitting contribute a zero (fully pooled)
/// effect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FittedLineModel {
    pub key: ModelKey,
    pub feature_names: Vec<String>,
    pub feature_means: Vec<f64>,
    pub feature_stds: Vec<f64>,
    pub intercept: f64,
    pub coefficients: Vec<f64>,
    pub team_effects: BTreeMap<String, f64>,
    /// Shrinkage strength used for the team effects (sigma^2_e / sigma^2_team).
    pub shrinkage_lambda: f64,
    /// Residual std after removing fixed and team effects.
    pub residual_std: f64,
    pub training_rows: usize,
    pub fitted_at: DateTime<Utc>,
}

impl FittedLineModel {
    /// Point estimate for one game.
    pub fn predict(&self, fv: &FeatureVector) -> Result<f64, PipelineError> {
        let mut y = self.intercept;
        for (i, name) in self.feature_names.iter().enumerate() {
            let raw = fv.get(name).ok_or_else(|| PipelineError::FeatureMismatch {
                feature: name.clone(),
            })?;
            let std = self.feature_stds[i];
            let x = if std > 0.0 {
                (raw - self.feature_means[i]) / std
            } else {
                0.0
            };
            y += self.coefficients[i] * x;
        }

        let home = self.team_effect(&fv.home_team);
        let away = self.team_effect(&fv.away_team);
        y += match self.key.response {
            // Margin model: home strength raises, away strength lowers.
            ResponseType::Spread => home - away,
            // Total model: both teams contribute points.
            ResponseType::Over => home + away,
        };
        Ok(y)
    }

    /// 90% predictive interval around the point estimate. Used for
    /// calibration testing; the policy layer only consumes the point.
    pub fn predictive_interval(&self, fv: &FeatureVector) -> Result<(f64, f64), PipelineError> {
        let point = self.predict(fv)?;
        let half = INTERVAL_Z * self.residual_std;
        Ok((point - half, point + half))
    }

    fn team_effect(&self, team: &str) -> f64 {
        self.team_effects.get(team).copied().unwrap_or(0.0)
    }

    /// Persist the artifact under `dir` as a whole-file replacement.
    pub fn save(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create model dir {}", dir.display()))?;
        let path = dir.join(self.key.artifact_file_name());
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(self).context("Failed to serialize model")?;
        fs::write(&tmp, bytes)
            .with_context(|| format!("Failed to write model artifact {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to replace model artifact {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)
            .with_context(|| format!("Failed to read model artifact {}", path.display()))?;
        serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse model artifact {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::models::League;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    fn vector(home: &str, away: &str, spread: f64) -> FeatureVector {
        let mut values = BTreeMap::new();
        values.insert("spread_line".to_string(), spread);
        FeatureVector {
            game_id: format!("2023_07_{}_{}", away, home),
            gameday: NaiveDate::from_ymd_opt(2023, 10, 23).unwrap(),
            home_team: home.into(),
            away_team: away.into(),
            values,
        }
    }

    fn model() -> FittedLineModel {
        let mut team_effects = BTreeMap::new();
        team_effects.insert("MIN".to_string(), 1.5);
        team_effects.insert("SF".to_string(), 3.0);
        FittedLineModel {
            key: ModelKey::new(League::Nfl, ResponseType::Spread),
            feature_names: vec!["spread_line".to_string()],
            feature_means: vec![0.0],
            feature_stds: vec![1.0],
            intercept: 1.0,
            coefficients: vec![0.8],
            team_effects,
            shrinkage_lambda: 10.0,
            residual_std: 12.0,
            training_rows: 100,
            fitted_at: Utc::now(),
        }
    }

    #[test]
    fn predict_combines_fixed_and_team_effects() {
        let m = model();
        // 1.0 + 0.8 * (-3.0) + (MIN 1.5 - SF 3.0) = -2.9
        let y = m.predict(&vector("MIN", "SF", -3.0)).unwrap();
        assert_relative_eq!(y, -2.9, epsilon = 1e-12);
    }

    #[test]
    fn unseen_team_contributes_zero_effect() {
        let m = model();
        let y = m.predict(&vector("XXX", "YYY", 0.0)).unwrap();
        assert_relative_eq!(y, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn total_model_adds_both_team_effects() {
        let mut m = model();
        m.key = ModelKey::new(League::Nfl, ResponseType::Over);
        m.feature_names = vec![];
        m.feature_means = vec![];
        m.feature_stds = vec![];
        m.coefficients = vec![];
        let y = m.predict(&vector("MIN", "SF", 0.0)).unwrap();
        assert_relative_eq!(y, 1.0 + 1.5 + 3.0, epsilon = 1e-12);
    }

    #[test]
    fn missing_feature_is_a_hard_error() {
        let m = model();
        let mut fv = vector("MIN", "SF", -3.0);
        fv.values.clear();
        match m.predict(&fv) {
            Err(PipelineError::FeatureMismatch { feature }) => {
                assert_eq!(feature, "spread_line");
            }
            other => panic!("Expected FeatureMismatch, got {:?}", other),
        }
    }

    #[test]
    fn interval_brackets_the_point_estimate() {
        let m = model();
        let fv = vector("MIN", "SF", -3.0);
        let point = m.predict(&fv).unwrap();
        let (lo, hi) = m.predictive_interval(&fv).unwrap();
        assert!(lo < point && point < hi);
        assert_relative_eq!(hi - lo, 2.0 * INTERVAL_Z * 12.0, epsilon = 1e-9);
    }

    #[test]
    fn artifact_round_trip_preserves_predictions() {
        let m = model();
        let dir = std::env::temp_dir().join("spreadline_model_roundtrip_test");
        m.save(&dir).unwrap();
        let loaded = FittedLineModel::load(&dir.join(m.key.artifact_file_name())).unwrap();
        let fv = vector("MIN", "SF", -3.0);
        assert_relative_eq!(
            m.predict(&fv).unwrap(),
            loaded.predict(&fv).unwrap(),
            epsilon = 1e-12
        );
        std::fs::remove_dir_all(&dir).ok();
    }
}
