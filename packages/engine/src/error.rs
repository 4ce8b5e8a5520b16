//! Engine error type.

use climate_risk_aggregator::ClimateDataFailure;
use climate_risk_config::ConfigError;
use climate_risk_models::SubscriptionTier;
use climate_risk_store::StoreError;

/// Whole-request failures. Per-address failures inside a bulk request are
/// reported as [`climate_risk_engine_models::BulkError`] records instead.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The requested property could not be resolved.
    #[error("Property not found: {detail}")]
    NotFound {
        /// Why the property could not be resolved.
        detail: String,
    },

    /// The climate data aggregator failed.
    #[error("Climate data error: {message}")]
    ClimateData {
        /// Aggregator's description of the failure.
        message: String,
        /// Whether retrying later may succeed.
        retryable: bool,
        /// Which upstream source failed, if known.
        error_source: Option<String>,
    },

    /// The request exceeds the caller's subscription tier.
    #[error("{tier} tier allows at most {max} addresses per bulk request, got {requested}")]
    Subscription {
        /// Caller's tier.
        tier: SubscriptionTier,
        /// Addresses submitted.
        requested: usize,
        /// Tier ceiling.
        max: usize,
    },

    /// The request parameters are out of range.
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// What was wrong with the request.
        message: String,
    },

    /// A store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The configuration has no entry for something the request needs.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl EngineError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }
}

impl From<ClimateDataFailure> for EngineError {
    fn from(failure: ClimateDataFailure) -> Self {
        Self::ClimateData {
            message: failure.to_string(),
            retryable: failure.retryable,
            error_source: failure.error_source,
        }
    }
}
