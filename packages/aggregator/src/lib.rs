#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Climate data aggregator interface.
//!
//! The aggregator is an external provider that fans out to hazard data
//! sources and returns a normalized payload: an overall risk score plus
//! one score per hazard type. The engine consumes it through the
//! [`ClimateDataAggregator`] trait and never transforms the numbers.
//!
//! Failures are classified by the aggregator itself: every
//! [`ClimateDataFailure`] carries a `retryable` flag and an optional
//! error-source tag that the engine passes through untouched.
//!
//! [`http::HttpAggregator`] is the production client.

pub mod http;
pub mod retry;

use async_trait::async_trait;
use climate_risk_models::{Coordinates, HazardScores, HazardType};
use serde::{Deserialize, Serialize};
use strum_macros::Display;

/// Normalized risk payload for one coordinate pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskData {
    /// Composite score across all hazards (higher is riskier).
    pub overall_score: f64,
    /// Per-hazard scores.
    pub hazard_scores: HazardScores,
    /// Upstream data sources consulted.
    pub sources: Vec<String>,
}

/// A successful single-point aggregation with its cost accounting.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateSuccess {
    /// The risk payload.
    pub risk_data: RiskData,
    /// Upstream API calls the aggregator made.
    pub external_api_calls: u32,
    /// Aggregator-side cache hits.
    pub cache_hits: u32,
    /// Aggregator-side cache misses.
    pub cache_misses: u32,
}

/// Broad classification of an aggregator failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "kebab-case")]
pub enum FailureKind {
    /// The aggregator or one of its sources could not be reached.
    Unavailable,
    /// The aggregator answered with an unusable payload.
    InvalidResponse,
    /// The aggregator refused the request (bad coordinates, no coverage).
    Rejected,
}

/// An aggregator failure, classified by the aggregator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} climate data failure: {message}")]
pub struct ClimateDataFailure {
    /// Broad classification.
    pub kind: FailureKind,
    /// Human-readable description.
    pub message: String,
    /// Whether retrying later may succeed.
    pub retryable: bool,
    /// Which upstream source failed, if the aggregator reported it.
    pub error_source: Option<String>,
}

/// One point in a batch aggregation request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatePoint {
    /// Latitude (WGS84).
    pub latitude: f64,
    /// Longitude (WGS84).
    pub longitude: f64,
    /// Correlation key echoed back in the results.
    pub address: String,
}

/// One row of a batch aggregation, correlated by address.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchAggregateItem {
    /// The correlation key from the matching [`AggregatePoint`].
    pub address: String,
    /// The outcome for this point.
    pub outcome: Result<RiskData, ClimateDataFailure>,
}

/// Result of a batch aggregation call that reached the aggregator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchAggregateOutcome {
    /// Per-point outcomes.
    pub results: Vec<BatchAggregateItem>,
    /// Upstream API calls the aggregator made.
    pub external_api_calls: u32,
    /// Aggregator-side cache hits.
    pub cache_hits: u32,
    /// Aggregator-side cache misses.
    pub cache_misses: u32,
}

/// Produces normalized risk payloads for coordinates.
#[async_trait]
pub trait ClimateDataAggregator: Send + Sync {
    /// Aggregates hazard data for one point. An empty `risk_types` slice
    /// requests every hazard the aggregator supports.
    ///
    /// # Errors
    ///
    /// Returns [`ClimateDataFailure`] if aggregation fails.
    async fn aggregate(
        &self,
        coordinates: Coordinates,
        risk_types: &[HazardType],
    ) -> Result<AggregateSuccess, ClimateDataFailure>;

    /// Aggregates hazard data for many points in one call.
    ///
    /// An `Err` means the call failed as a whole; per-point failures are
    /// reported inside [`BatchAggregateOutcome::results`].
    ///
    /// # Errors
    ///
    /// Returns [`ClimateDataFailure`] if the batch call itself fails.
    async fn batch_aggregate(
        &self,
        points: &[AggregatePoint],
        risk_types: &[HazardType],
    ) -> Result<BatchAggregateOutcome, ClimateDataFailure>;
}
