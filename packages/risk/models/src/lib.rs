#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Property, hazard, and risk assessment types.
//!
//! This crate defines the canonical data model shared by every part of the
//! climate risk engine: resolved properties, per-hazard scores, risk bands,
//! and time-bounded risk assessments. Collaborator crates (geocoder,
//! aggregator, store) speak in these types so the engine never has to
//! interpret loosely-typed provider payloads.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use uuid::Uuid;

/// A WGS84 coordinate pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coordinates {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
}

impl Coordinates {
    /// Creates a coordinate pair.
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Returns `true` if both components are finite and within the WGS84
    /// ranges (`-90..=90`, `-180..=180`).
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// One category of climate hazard scored by the aggregation provider.
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
pub enum HazardType {
    /// Riverine, coastal, and pluvial flooding
    Flood,
    /// Hurricane and tropical-storm wind
    Hurricane,
    /// Wildfire exposure
    Wildfire,
    /// Seismic shaking
    Earthquake,
    /// Tornado and severe convective wind
    Tornado,
    /// Hail damage
    Hail,
    /// Extreme heat
    Heat,
    /// Drought
    Drought,
    /// Long-term sea level rise
    SeaLevelRise,
}

impl HazardType {
    /// Returns all variants of this enum.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Flood,
            Self::Hurricane,
            Self::Wildfire,
            Self::Earthquake,
            Self::Tornado,
            Self::Hail,
            Self::Heat,
            Self::Drought,
            Self::SeaLevelRise,
        ]
    }

    /// Returns the provider payload key carrying this hazard's score
    /// (e.g. `"flood_risk_score"`).
    #[must_use]
    pub fn score_key(self) -> String {
        format!("{self}_risk_score")
    }

    /// Parses a provider payload key such as `"wildfire_risk_score"` back
    /// into a hazard type. Returns `None` for `overall_risk_score` and
    /// unrecognized hazards.
    #[must_use]
    pub fn from_score_key(key: &str) -> Option<Self> {
        key.strip_suffix("_risk_score")?.parse().ok()
    }
}

/// Per-hazard scores exactly as returned by the aggregator.
pub type HazardScores = BTreeMap<HazardType, f64>;

/// Coarse banding of an overall risk score.
///
/// Bands are half-open on the upper bound: `Low` is `< 40`, `Moderate` is
/// `40..60`, `High` is `60..80`, and `VeryHigh` is `>= 80`.
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
pub enum RiskBand {
    /// Overall score below 40
    Low,
    /// Overall score from 40 up to (not including) 60
    Moderate,
    /// Overall score from 60 up to (not including) 80
    High,
    /// Overall score of 80 or more
    VeryHigh,
}

impl RiskBand {
    /// Classifies an overall risk score.
    #[must_use]
    pub fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            Self::VeryHigh
        } else if score >= 60.0 {
            Self::High
        } else if score >= 40.0 {
            Self::Moderate
        } else {
            Self::Low
        }
    }

    /// Returns all variants of this enum, lowest band first.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Low, Self::Moderate, Self::High, Self::VeryHigh]
    }
}

/// How precisely the geocoder located an address.
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
pub enum GeocodeAccuracy {
    /// Exact building or parcel match
    Rooftop,
    /// Interpolated along a street segment
    Interpolated,
    /// Centroid of a larger area (ZIP, place)
    Approximate,
}

/// Kind of property, used as a radius-search filter.
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
pub enum PropertyType {
    /// Detached single-family home
    SingleFamily,
    /// Apartment building or duplex
    MultiFamily,
    /// Condominium unit
    Condo,
    /// Office or retail
    Commercial,
    /// Warehouse, plant, or other industrial use
    Industrial,
    /// Undeveloped land
    Land,
}

/// Subscription tier of the caller, governing bulk limits and pricing.
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
pub enum SubscriptionTier {
    /// Standard plan
    Standard,
    /// Highest plan
    Enterprise,
}

impl SubscriptionTier {
    /// Returns all variants of this enum.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Standard, Self::Enterprise]
    }
}

/// A resolved property as persisted in the property store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Property {
    /// Identifier assigned on first persistence.
    pub id: Uuid,
    /// Lower-cased, trimmed, whitespace-collapsed address. Unique.
    pub normalized_address: String,
    /// The address string as originally supplied.
    pub address: String,
    /// Latitude (WGS84).
    pub latitude: f64,
    /// Longitude (WGS84).
    pub longitude: f64,
    /// City, if the geocoder reported one.
    pub city: Option<String>,
    /// Two-letter state abbreviation, if known.
    pub state: Option<String>,
    /// ZIP code, if known.
    pub zip: Option<String>,
    /// Property type, if known.
    pub property_type: Option<PropertyType>,
    /// Geocoding accuracy tier.
    pub geocode_accuracy: GeocodeAccuracy,
    /// Which geocoding provider resolved the address.
    pub geocode_source: String,
    /// When the property was first persisted.
    pub created_at: DateTime<Utc>,
    /// When the property was last upserted.
    pub updated_at: DateTime<Utc>,
}

impl Property {
    /// Returns the property's coordinates.
    #[must_use]
    pub const fn coordinates(&self) -> Coordinates {
        Coordinates::new(self.latitude, self.longitude)
    }
}

/// Attributes of a property about to be upserted. The store assigns the
/// id and timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProperty {
    /// Normalized address (the upsert key).
    pub normalized_address: String,
    /// Original address string.
    pub address: String,
    /// Latitude (WGS84).
    pub latitude: f64,
    /// Longitude (WGS84).
    pub longitude: f64,
    /// City.
    pub city: Option<String>,
    /// State abbreviation.
    pub state: Option<String>,
    /// ZIP code.
    pub zip: Option<String>,
    /// Property type.
    pub property_type: Option<PropertyType>,
    /// Geocoding accuracy tier.
    pub geocode_accuracy: GeocodeAccuracy,
    /// Geocoding provider.
    pub geocode_source: String,
}

/// A time-bounded multi-hazard risk record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskAssessment {
    /// Unique assessment ID.
    pub id: Uuid,
    /// Owning property, `None` for ephemeral coordinate-only assessments.
    pub property_id: Option<Uuid>,
    /// Latitude the assessment was computed for.
    pub latitude: f64,
    /// Longitude the assessment was computed for.
    pub longitude: f64,
    /// Composite score, higher is riskier.
    pub overall_score: f64,
    /// Per-hazard scores.
    pub hazard_scores: HazardScores,
    /// Upstream data sources the aggregator consulted.
    pub sources: Vec<String>,
    /// Assessment version tag.
    pub version: String,
    /// When this assessment was computed.
    pub created_at: DateTime<Utc>,
    /// When this assessment stops being current.
    pub expires_at: DateTime<Utc>,
}

impl RiskAssessment {
    /// Returns `true` while `now < expires_at`.
    #[must_use]
    pub fn is_current(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    /// Returns the band of the overall score.
    #[must_use]
    pub fn band(&self) -> RiskBand {
        RiskBand::from_score(self.overall_score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn band_boundaries() {
        assert_eq!(RiskBand::from_score(0.0), RiskBand::Low);
        assert_eq!(RiskBand::from_score(39.9), RiskBand::Low);
        assert_eq!(RiskBand::from_score(40.0), RiskBand::Moderate);
        assert_eq!(RiskBand::from_score(59.99), RiskBand::Moderate);
        assert_eq!(RiskBand::from_score(60.0), RiskBand::High);
        assert_eq!(RiskBand::from_score(79.5), RiskBand::High);
        assert_eq!(RiskBand::from_score(80.0), RiskBand::VeryHigh);
        assert_eq!(RiskBand::from_score(100.0), RiskBand::VeryHigh);
    }

    #[test]
    fn hazard_score_keys() {
        for hazard in HazardType::all() {
            let key = hazard.score_key();
            assert!(key.ends_with("_risk_score"), "{key}");
            assert_eq!(HazardType::from_score_key(&key), Some(*hazard));
        }
        assert_eq!(
            HazardType::SeaLevelRise.score_key(),
            "sea_level_rise_risk_score"
        );
        assert_eq!(HazardType::from_score_key("overall_risk_score"), None);
        assert_eq!(HazardType::from_score_key("flood"), None);
    }

    #[test]
    fn coordinate_validation() {
        assert!(Coordinates::new(25.0, -80.0).is_valid());
        assert!(Coordinates::new(-90.0, 180.0).is_valid());
        assert!(!Coordinates::new(90.1, 0.0).is_valid());
        assert!(!Coordinates::new(0.0, -180.5).is_valid());
        assert!(!Coordinates::new(f64::NAN, 0.0).is_valid());
    }

    #[test]
    fn hazard_scores_serialize_with_snake_case_keys() {
        let mut scores = HazardScores::new();
        scores.insert(HazardType::SeaLevelRise, 12.0);
        scores.insert(HazardType::Flood, 70.5);
        let json = serde_json::to_value(&scores).unwrap();
        assert_eq!(json["flood"], 70.5);
        assert_eq!(json["sea_level_rise"], 12.0);
    }

    #[test]
    fn tier_parses_from_snake_case() {
        assert_eq!(
            "enterprise".parse::<SubscriptionTier>().unwrap(),
            SubscriptionTier::Enterprise
        );
        assert!("gold".parse::<SubscriptionTier>().is_err());
    }
}
