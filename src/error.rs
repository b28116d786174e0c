use thiserror::Error;

use crate::data::models::{League, ResponseType};

/// Failure taxonomy for a prediction run.
///
/// ETL failures degrade gracefully (cache fallback) where possible; modeling
/// failures abort the affected league's run rather than emit a row with a
/// fabricated prediction.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Network fetch failed and no usable cache exists. Fatal for the league.
    #[error("no data available for {league}: network failed and no cache present")]
    DataUnavailable { league: League },

    /// A feature the model was fitted on is absent from the engineered data.
    /// Fatal for the prediction batch; never silently imputed to zero.
    #[error("feature '{feature}' missing from engineered data")]
    FeatureMismatch { feature: String },

    /// `predict` was called for a (league, response) pair with no fitted
    /// model artifact loaded.
    #[error("no fitted model for {league}/{response}; run `spreadline fit` first")]
    ModelNotFitted {
        league: League,
        response: ResponseType,
    },

    /// Unsupported league string at the CLI boundary. Never defaulted.
    #[error("unknown league '{0}' (expected 'nfl' or 'college_football')")]
    UnknownLeague(String),
}
