#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Storage collaborators for the climate risk engine.
//!
//! The engine depends only on the narrow traits defined here:
//!
//! - [`PropertyStore`]: properties keyed by normalized address, plus a
//!   radius query that reports distance and, when it can, the property's
//!   current assessment inline.
//! - [`RiskAssessmentStore`]: one current assessment per property.
//! - [`RegionalCache`]: TTL-bounded JSON blobs for radius-search results.
//! - [`UsageTracker`]: fire-and-forget usage events.
//!
//! [`memory`] provides in-process implementations backed by an R-tree;
//! [`cache`] and [`usage`] provide the regional cache and trackers.

pub mod cache;
pub mod geo;
pub mod memory;
pub mod usage;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use climate_risk_models::{
    Coordinates, NewProperty, Property, PropertyType, RiskAssessment, SubscriptionTier,
};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use uuid::Uuid;

/// Errors from a storage backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend could not be reached or failed internally.
    #[error("Store backend error: {message}")]
    Backend {
        /// Description of the failure.
        message: String,
    },

    /// A stored value could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An in-process lock was poisoned by a panicking writer.
    #[error("Store lock poisoned")]
    Poisoned,

    /// A write referenced a record that does not exist.
    #[error("Unknown property {id}")]
    UnknownProperty {
        /// The missing property id.
        id: Uuid,
    },
}

impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        Self::Poisoned
    }
}

/// Filters applied by [`PropertyStore::find_within_radius`].
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialFilter {
    /// Drop properties whose current overall score is below this value.
    /// Properties without a known current score are kept so the caller can
    /// decide.
    pub min_overall_score: Option<f64>,
    /// Only return properties of this type.
    pub property_type: Option<PropertyType>,
    /// Hard cap on returned matches (nearest first).
    pub max_results: usize,
    /// Instant used to decide whether an assessment is still current.
    pub as_of: DateTime<Utc>,
}

/// One property returned by a radius query.
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialMatch {
    /// The matched property.
    pub property: Property,
    /// Great-circle distance from the search center.
    pub distance_meters: f64,
    /// The property's current assessment, when the backend can join it in
    /// the same query. `None` means "not supplied", not "does not exist".
    pub embedded_assessment: Option<RiskAssessment>,
}

/// Durable keyed storage of resolved properties.
#[async_trait]
pub trait PropertyStore: Send + Sync {
    /// Looks up a property by its normalized address.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    async fn find_by_normalized_address(
        &self,
        normalized_address: &str,
    ) -> Result<Option<Property>, StoreError>;

    /// Inserts a property or updates the one with the same normalized
    /// address. The id and `created_at` of an existing row are preserved.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    async fn upsert_property(&self, property: NewProperty) -> Result<Property, StoreError>;

    /// Returns properties within `radius_meters` of `center`, nearest
    /// first, after applying `filter`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    async fn find_within_radius(
        &self,
        center: Coordinates,
        radius_meters: f64,
        filter: &SpatialFilter,
    ) -> Result<Vec<SpatialMatch>, StoreError>;
}

/// Storage of the latest risk assessment per property.
#[async_trait]
pub trait RiskAssessmentStore: Send + Sync {
    /// Returns the most recent assessment for a property. Callers decide
    /// whether it is still current.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    async fn get_current(&self, property_id: Uuid) -> Result<Option<RiskAssessment>, StoreError>;

    /// Stores an assessment, superseding the property's previous one.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails or the assessment has no
    /// owning property.
    async fn upsert(&self, assessment: &RiskAssessment) -> Result<(), StoreError>;
}

/// Key/value cache with per-entry TTL for radius-search results.
#[async_trait]
pub trait RegionalCache: Send + Sync {
    /// Returns the value for `key` if present and unexpired.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError>;

    /// Stores `value` under `key` for `ttl`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    async fn set(&self, key: &str, value: serde_json::Value, ttl: Duration)
    -> Result<(), StoreError>;
}

/// What kind of request a usage event bills for.
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
pub enum UsageKind {
    /// Single-property lookup
    SingleLookup,
    /// Geographic radius search
    RadiusSearch,
    /// Bulk batch assessment
    BulkAssessment,
}

/// One billable request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageEvent {
    /// Unique event id.
    pub id: Uuid,
    /// Request kind.
    pub kind: UsageKind,
    /// Caller's tier, when the request was tier-scoped.
    pub tier: Option<SubscriptionTier>,
    /// Number of properties the request produced results for.
    pub properties: usize,
    /// Cost charged for the request.
    pub cost: f64,
    /// When the request completed.
    pub occurred_at: DateTime<Utc>,
}

/// Sink for usage events.
#[async_trait]
pub trait UsageTracker: Send + Sync {
    /// Records one usage event.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the event could not be recorded. The
    /// engine logs and swallows these.
    async fn track(&self, event: UsageEvent) -> Result<(), StoreError>;
}
