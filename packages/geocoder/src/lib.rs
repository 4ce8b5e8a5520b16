#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Geocoding gateway for the climate risk engine.
//!
//! The engine treats geocoding as a black box behind the
//! [`GeocodingGateway`] trait: a free-text address goes in, coordinates
//! plus an accuracy tier and source tag come out. Every outcome is an
//! explicit [`Result`] so callers match on [`GeocodeFailure`] rather than
//! inspecting loosely-typed payloads.
//!
//! [`census::CensusGateway`] is the production implementation, backed by
//! the US Census Bureau's free one-line-address and batch endpoints.
//! [`address`] holds the normalization rules that decide when two address
//! strings refer to the same property.

pub mod address;
pub mod census;

use async_trait::async_trait;
use climate_risk_models::GeocodeAccuracy;
use serde::Serialize;
use thiserror::Error;

/// A successful geocode.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeocodeMatch {
    /// Latitude (WGS84).
    pub latitude: f64,
    /// Longitude (WGS84).
    pub longitude: f64,
    /// The canonical address the provider matched, if reported.
    pub matched_address: Option<String>,
    /// City parsed from the matched address.
    pub city: Option<String>,
    /// State abbreviation parsed from the matched address.
    pub state: Option<String>,
    /// ZIP code parsed from the matched address.
    pub zip: Option<String>,
    /// How precisely the address was located.
    pub accuracy: GeocodeAccuracy,
    /// Which provider resolved the address (e.g. `"census"`).
    pub source: String,
}

/// Why a geocode did not produce coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeocodeFailure {
    /// The provider answered but found no match.
    #[error("No geocoding match for '{address}'")]
    NoMatch {
        /// The address that was looked up.
        address: String,
    },

    /// The provider could not be reached or returned an unusable response.
    #[error("Geocoding provider error: {message}")]
    Upstream {
        /// Description of the failure.
        message: String,
        /// Whether the provider considers the condition transient.
        retryable: bool,
    },
}

/// One row of a batch geocode, correlated by the submitted address.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchGeocodeItem {
    /// The address exactly as submitted.
    pub address: String,
    /// The geocode outcome for this address.
    pub outcome: Result<GeocodeMatch, GeocodeFailure>,
}

/// Result of a batch geocode call that reached the provider.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchGeocodeOutcome {
    /// Number of upstream API calls spent.
    pub api_calls: u32,
    /// Per-address outcomes. Addresses the provider omitted are absent.
    pub results: Vec<BatchGeocodeItem>,
}

/// Translates free-text addresses into coordinates.
#[async_trait]
pub trait GeocodingGateway: Send + Sync {
    /// Geocodes a single address.
    ///
    /// # Errors
    ///
    /// Returns [`GeocodeFailure`] if the address cannot be located or the
    /// provider fails.
    async fn geocode(&self, address: &str) -> Result<GeocodeMatch, GeocodeFailure>;

    /// Geocodes many addresses in as few upstream calls as possible.
    ///
    /// An `Err` means the batch call failed as a whole; per-address misses
    /// are reported inside [`BatchGeocodeOutcome::results`].
    ///
    /// # Errors
    ///
    /// Returns [`GeocodeFailure::Upstream`] if the batch call itself fails.
    async fn batch_geocode(
        &self,
        addresses: &[String],
    ) -> Result<BatchGeocodeOutcome, GeocodeFailure>;
}

/// Errors from the HTTP layer of a concrete gateway.
#[derive(Debug, Error)]
pub enum GeocodeError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Response parsing failed.
    #[error("Parse error: {message}")]
    Parse {
        /// Description of the parsing failure.
        message: String,
    },

    /// Rate limit exceeded.
    #[error("Rate limit exceeded")]
    RateLimited,

    /// A batch CSV could not be written or read.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl From<GeocodeError> for GeocodeFailure {
    fn from(e: GeocodeError) -> Self {
        let retryable = match &e {
            GeocodeError::Http(http) => http.is_timeout() || http.is_connect(),
            GeocodeError::RateLimited => true,
            GeocodeError::Parse { .. } | GeocodeError::Csv(_) => false,
        };
        Self::Upstream {
            message: e.to_string(),
            retryable,
        }
    }
}
