use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{info, warn};

use crate::data::models::ModelKey;
use crate::error::PipelineError;

use super::FittedLineModel;

/// Fitted models keyed on the (league, response) cross product.
///
/// Missing artifacts are tolerated at load time (a league may not be fitted
/// yet) but surface as `ModelNotFitted` the moment a prediction is requested.
#[derive(Debug, Default)]
pub struct ModelRegistry {
    models: HashMap<ModelKey, FittedLineModel>,
}

impl ModelRegistry {
    /// Load every artifact present under `models_dir`.
    pub fn load(models_dir: &Path) -> Result<Self> {
        let mut models = HashMap::new();
        for key in ModelKey::all() {
            let path: PathBuf = models_dir.join(key.artifact_file_name());
            if !path.exists() {
                warn!("No model artifact for {} at {}", key, path.display());
                continue;
            }
            let model = FittedLineModel::load(&path)?;
            info!(
                "Loaded model {} ({} training rows, fitted {})",
                key, model.training_rows, model.fitted_at
            );
            models.insert(key, model);
        }
        Ok(ModelRegistry { models })
    }

    pub fn insert(&mut self, model: FittedLineModel) {
        self.models.insert(model.key, model);
    }

    pub fn get(&self, key: ModelKey) -> Result<&FittedLineModel, PipelineError> {
        self.models.get(&key).ok_or(PipelineError::ModelNotFitted {
            league: key.league,
            response: key.response,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::models::{League, ResponseType};

    #[test]
    fn missing_model_is_a_not_fitted_error() {
        let registry = ModelRegistry::default();
        let key = ModelKey::new(League::Nfl, ResponseType::Spread);
        match registry.get(key) {
            Err(PipelineError::ModelNotFitted { league, response }) => {
                assert_eq!(league, League::Nfl);
                assert_eq!(response, ResponseType::Spread);
            }
            other => panic!("Expected ModelNotFitted, got {:?}", other),
        }
    }

    #[test]
    fn load_tolerates_an_empty_directory() {
        let dir = std::env::temp_dir().join("spreadline_registry_empty_test");
        std::fs::create_dir_all(&dir).unwrap();
        let registry = ModelRegistry::load(&dir).unwrap();
        assert!(registry.is_empty());
        std::fs::remove_dir_all(&dir).ok();
    }
}
