#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Request and result types for the risk engine's three entry points:
//! single-property assessment, geographic radius search, and bulk batch
//! assessment.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use climate_risk_models::{
    Coordinates, HazardType, Property, PropertyType, RiskAssessment, RiskBand, SubscriptionTier,
};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

// ---------------------------------------------------------------------------
// Single property
// ---------------------------------------------------------------------------

/// A single-property risk request. When both an address and coordinates
/// are given, the address wins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentRequest {
    /// Free-text address.
    pub address: Option<String>,
    /// Coordinate pair for the ephemeral path.
    pub coordinates: Option<Coordinates>,
    /// Hazards to request on a recompute. Empty means all.
    #[serde(default)]
    pub risk_types: Vec<HazardType>,
}

/// The answer to an [`AssessmentRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentReport {
    /// The resolved property; `None` on the coordinate-only path.
    pub property: Option<Property>,
    /// The current assessment.
    pub assessment: RiskAssessment,
    /// Band of the overall score.
    pub band: RiskBand,
    /// `true` if a stored current assessment was reused.
    pub cache_hit: bool,
}

// ---------------------------------------------------------------------------
// Radius search
// ---------------------------------------------------------------------------

/// A geographic radius search request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RadiusSearchRequest {
    /// Center of the search circle.
    pub center: Coordinates,
    /// Radius in meters.
    pub radius_meters: f64,
    /// Only include properties whose overall score is at least this.
    pub risk_threshold: Option<f64>,
    /// Only include properties of this type.
    pub property_type: Option<PropertyType>,
    /// 1-based page number. Defaults to 1.
    pub page: Option<usize>,
    /// Results per page. Defaults to the configured page size.
    pub page_size: Option<usize>,
}

impl RadiusSearchRequest {
    /// Creates an unfiltered first-page request.
    #[must_use]
    pub const fn new(center: Coordinates, radius_meters: f64) -> Self {
        Self {
            center,
            radius_meters,
            risk_threshold: None,
            property_type: None,
            page: None,
            page_size: None,
        }
    }

    /// Returns the parameters that identify a regional cache entry.
    #[must_use]
    pub const fn params(&self) -> RadiusSearchParams {
        RadiusSearchParams {
            center: self.center,
            radius_meters: self.radius_meters,
            risk_threshold: self.risk_threshold,
            property_type: self.property_type,
        }
    }
}

/// The filter parameters of a radius search, without pagination.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RadiusSearchParams {
    /// Center of the search circle.
    pub center: Coordinates,
    /// Radius in meters.
    pub radius_meters: f64,
    /// Minimum overall score.
    pub risk_threshold: Option<f64>,
    /// Property type filter.
    pub property_type: Option<PropertyType>,
}

/// Why a result carries no assessment.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Unavailable {
    /// No assessment has ever been computed for the property
    Missing,
    /// The latest assessment has expired
    Expired,
    /// The assessment store could not be read
    LookupFailed,
}

/// One property in a radius search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedProperty {
    /// The property.
    pub property: Property,
    /// Distance from the search center.
    pub distance_meters: f64,
    /// Current assessment, or `None` when unavailable.
    pub assessment: Option<RiskAssessment>,
    /// Band of the assessment's overall score.
    pub band: Option<RiskBand>,
    /// Set when `assessment` is `None`.
    pub unavailable: Option<Unavailable>,
}

/// Context a radius search could not supply.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MissingContext {
    /// The property store's spatial query failed; no properties returned
    SpatialQuery,
    /// No boundary region could be attributed to the search center
    Boundary,
}

/// The region containing a search center.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRegion {
    /// Region identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Region category.
    pub kind: Option<String>,
}

/// Number of assessments in each risk band.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BandCounts {
    /// Overall score below 40.
    pub low: usize,
    /// Overall score 40 to 59.
    pub moderate: usize,
    /// Overall score 60 to 79.
    pub high: usize,
    /// Overall score 80 and above.
    pub very_high: usize,
}

impl BandCounts {
    /// Counts one more assessment in `band`.
    pub const fn add(&mut self, band: RiskBand) {
        match band {
            RiskBand::Low => self.low += 1,
            RiskBand::Moderate => self.moderate += 1,
            RiskBand::High => self.high += 1,
            RiskBand::VeryHigh => self.very_high += 1,
        }
    }

    /// Total across all bands.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.low + self.moderate + self.high + self.very_high
    }
}

/// Minimum, maximum, and mean of a set of overall scores.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreStats {
    /// Mean score.
    pub average: f64,
    /// Lowest score.
    pub min: f64,
    /// Highest score.
    pub max: f64,
}

/// Analytics over the full (pre-pagination) radius result set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RadiusAnalytics {
    /// Properties in the result set.
    pub total_properties: usize,
    /// Properties with a current assessment.
    pub assessed_properties: usize,
    /// Score statistics over assessed properties.
    pub scores: Option<ScoreStats>,
    /// Band distribution over assessed properties.
    pub band_counts: BandCounts,
    /// Mean distance from the center over all properties.
    pub average_distance_meters: Option<f64>,
    /// Mean score of the inner half of the radius minus that of the outer
    /// half. Positive means risk rises toward the center.
    pub risk_gradient: Option<f64>,
    /// Property count per state.
    pub state_counts: BTreeMap<String, usize>,
}

/// Pagination metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    /// 1-based page number.
    pub page: usize,
    /// Results per page.
    pub page_size: usize,
    /// Results across all pages.
    pub total_results: usize,
    /// Number of pages.
    pub total_pages: usize,
    /// Whether a later page exists.
    pub has_more: bool,
}

/// What the regional cache stores for one radius search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionalCacheEntry {
    /// The exact parameters the entry was computed for.
    pub params: RadiusSearchParams,
    /// Every enriched result, before pagination.
    pub properties: Vec<EnrichedProperty>,
    /// Region containing the center, if known.
    pub region: Option<SearchRegion>,
    /// Context missing when the entry was computed.
    pub missing_context: Vec<MissingContext>,
    /// When the entry was computed.
    pub cached_at: DateTime<Utc>,
}

/// The answer to a [`RadiusSearchRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RadiusSearchResult {
    /// The requested filter parameters.
    pub params: RadiusSearchParams,
    /// The requested page of results.
    pub properties: Vec<EnrichedProperty>,
    /// Pagination metadata.
    pub page: PageInfo,
    /// Analytics over all results.
    pub analytics: RadiusAnalytics,
    /// Region containing the center, if known.
    pub region: Option<SearchRegion>,
    /// Context that could not be supplied.
    pub missing_context: Vec<MissingContext>,
    /// `true` if the regional cache answered.
    pub cache_hit: bool,
}

// ---------------------------------------------------------------------------
// Bulk
// ---------------------------------------------------------------------------

/// A bulk assessment request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkRequest {
    /// Addresses in submission order.
    pub addresses: Vec<String>,
    /// Hazards to request. Empty means all.
    #[serde(default)]
    pub risk_types: Vec<HazardType>,
    /// Caller's subscription tier.
    pub tier: SubscriptionTier,
}

/// One address that produced an assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkSuccess {
    /// The address as submitted.
    pub address: String,
    /// Position in the submitted list.
    pub input_index: usize,
    /// The resolved property.
    pub property: Property,
    /// The current assessment.
    pub assessment: RiskAssessment,
    /// Band of the overall score.
    pub band: RiskBand,
    /// `true` if a stored current assessment was reused.
    pub cached: bool,
}

/// One address that failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkError {
    /// The address as submitted.
    pub address: String,
    /// Position in the submitted list.
    pub input_index: usize,
    /// What went wrong.
    pub error: String,
    /// Index of the chunk the address was processed in.
    pub batch_index: usize,
}

/// Aggregate statistics over a bulk result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkSummary {
    /// Addresses submitted.
    pub total_addresses: usize,
    /// Addresses with an assessment.
    pub successful: usize,
    /// Addresses that failed.
    pub failed: usize,
    /// `successful / total_addresses`, or 0 for an empty request.
    pub success_rate: f64,
    /// Score statistics over successes.
    pub scores: Option<ScoreStats>,
    /// Band distribution over successes.
    pub band_counts: BandCounts,
    /// Success count per state.
    pub state_counts: BTreeMap<String, usize>,
}

/// What a bulk request was billed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkBilling {
    /// Tier the request ran under.
    pub tier: SubscriptionTier,
    /// Properties billed (successes only).
    pub billable_properties: usize,
    /// Total cost.
    pub cost: f64,
}

/// The answer to a [`BulkRequest`]. Every submitted address appears in
/// exactly one of `successes` and `errors`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkResult {
    /// Addresses with an assessment, in submission order.
    pub successes: Vec<BulkSuccess>,
    /// Addresses that failed, in submission order.
    pub errors: Vec<BulkError>,
    /// Aggregate statistics.
    pub summary: BulkSummary,
    /// Billing for the request.
    pub billing: BulkBilling,
    /// Number of chunks processed.
    pub chunks: usize,
    /// Upstream API calls spent by the aggregator.
    pub external_api_calls: u32,
}
