#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Engine configuration.
//!
//! Every limit the engine enforces (tier address ceilings, chunk sizes,
//! inter-chunk delays, cache TTLs, billing constants) lives in
//! [`EngineConfig`]. The defaults are embedded at compile time from
//! `config/default.toml`; deployments can load a replacement file with
//! [`EngineConfig::load`].

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use climate_risk_models::SubscriptionTier;
use serde::Deserialize;

/// Embedded default configuration.
const DEFAULT_TOML: &str = include_str!("../config/default.toml");

/// Errors from loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The TOML could not be parsed into an [`EngineConfig`].
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range or a required entry is missing.
    #[error("Invalid configuration: {message}")]
    Invalid {
        /// Description of the problem.
        message: String,
    },
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Version tag stamped on every new risk assessment.
    pub assessment_version: String,
    /// Freshness settings.
    pub cache: CacheConfig,
    /// Radius search bounds.
    pub radius: RadiusConfig,
    /// Per-request costs for non-bulk operations.
    pub billing: BillingConfig,
    /// Bulk limits and pricing per subscription tier.
    pub tiers: BTreeMap<SubscriptionTier, TierLimits>,
}

/// Freshness settings for assessments and radius results.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Days an assessment stays current after creation.
    pub assessment_ttl_days: i64,
    /// Seconds a regional (radius search) cache entry lives.
    pub regional_ttl_seconds: u64,
    /// Decimal places of the search center kept in regional cache keys.
    pub coordinate_precision: usize,
}

/// Radius search bounds.
#[derive(Debug, Clone, Deserialize)]
pub struct RadiusConfig {
    /// Hard cap on spatial query results, regardless of tier.
    pub max_results: usize,
    /// Page size when the caller does not specify one.
    pub default_page_size: usize,
    /// Largest page size a caller may request.
    pub max_page_size: usize,
    /// Largest accepted search radius.
    pub max_radius_meters: f64,
}

/// Per-request costs for single lookups and radius searches.
#[derive(Debug, Clone, Deserialize)]
pub struct BillingConfig {
    /// Cost of one single-property lookup.
    pub single_lookup_cost: f64,
    /// Cost of one radius search.
    pub radius_search_cost: f64,
}

/// Bulk limits and pricing for one subscription tier.
#[derive(Debug, Clone, Deserialize)]
pub struct TierLimits {
    /// Largest bulk request accepted.
    pub max_addresses: usize,
    /// Addresses processed together per chunk.
    pub batch_size: usize,
    /// Pause between consecutive chunks.
    pub inter_chunk_delay_ms: u64,
    /// Flat cost of one bulk request.
    pub base_cost: f64,
    /// Additional cost per successfully assessed property.
    pub per_property_cost: f64,
}

impl TierLimits {
    /// Pause between consecutive chunks.
    #[must_use]
    pub const fn inter_chunk_delay(&self) -> Duration {
        Duration::from_millis(self.inter_chunk_delay_ms)
    }

    /// Cost of a bulk request that produced `successes` assessments.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn bulk_cost(&self, successes: usize) -> f64 {
        self.per_property_cost.mul_add(successes as f64, self.base_cost)
    }
}

impl Default for EngineConfig {
    /// Returns the embedded defaults.
    ///
    /// # Panics
    ///
    /// Panics if the embedded TOML is malformed.
    fn default() -> Self {
        Self::from_toml_str(DEFAULT_TOML)
            .unwrap_or_else(|e| panic!("Failed to parse embedded default config: {e}"))
    }
}

impl EngineConfig {
    /// Parses and validates a configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the TOML is malformed or fails validation.
    pub fn from_toml_str(toml_str: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read, parsed, or
    /// validated.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        log::info!("Loading engine configuration from {}", path.display());
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Returns the limits for `tier`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the tier has no entry.
    pub fn tier(&self, tier: SubscriptionTier) -> Result<&TierLimits, ConfigError> {
        self.tiers.get(&tier).ok_or_else(|| ConfigError::Invalid {
            message: format!("no limits configured for tier '{tier}'"),
        })
    }

    /// How long an assessment stays current.
    #[must_use]
    pub fn assessment_ttl(&self) -> chrono::Duration {
        chrono::Duration::days(self.cache.assessment_ttl_days)
    }

    /// How long a regional cache entry lives.
    #[must_use]
    pub const fn regional_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.regional_ttl_seconds)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let invalid =
            |message: String| -> Result<(), ConfigError> { Err(ConfigError::Invalid { message }) };

        if self.cache.assessment_ttl_days <= 0 {
            return invalid("cache.assessment_ttl_days must be positive".to_string());
        }
        if self.radius.max_results == 0 {
            return invalid("radius.max_results must be positive".to_string());
        }
        if self.radius.default_page_size == 0
            || self.radius.default_page_size > self.radius.max_page_size
        {
            return invalid(format!(
                "radius.default_page_size must be in 1..={}",
                self.radius.max_page_size
            ));
        }
        if self.radius.max_radius_meters <= 0.0 {
            return invalid("radius.max_radius_meters must be positive".to_string());
        }
        for tier in SubscriptionTier::all() {
            let Some(limits) = self.tiers.get(tier) else {
                return invalid(format!("missing [tiers.{tier}] section"));
            };
            if limits.batch_size == 0 || limits.max_addresses == 0 {
                return invalid(format!(
                    "tiers.{tier}: batch_size and max_addresses must be positive"
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_defaults_parse() {
        let config = EngineConfig::default();
        assert_eq!(config.assessment_version, "1.0");
        assert_eq!(config.cache.assessment_ttl_days, 30);
        assert_eq!(config.cache.regional_ttl_seconds, 3600);
        assert_eq!(config.radius.max_results, 1000);
        assert_eq!(config.assessment_ttl(), chrono::Duration::days(30));
        assert_eq!(config.regional_ttl(), Duration::from_secs(3600));
    }

    #[test]
    fn tier_limits_match_plans() {
        let config = EngineConfig::default();
        let standard = config.tier(SubscriptionTier::Standard).unwrap();
        assert_eq!(standard.max_addresses, 100);
        assert_eq!(standard.batch_size, 25);
        assert_eq!(standard.inter_chunk_delay(), Duration::from_secs(1));

        let enterprise = config.tier(SubscriptionTier::Enterprise).unwrap();
        assert_eq!(enterprise.max_addresses, 1000);
        assert_eq!(enterprise.batch_size, 50);
    }

    #[test]
    fn bulk_cost_is_base_plus_per_property() {
        let limits = TierLimits {
            max_addresses: 10,
            batch_size: 5,
            inter_chunk_delay_ms: 0,
            base_cost: 1.0,
            per_property_cost: 0.25,
        };
        assert!((limits.bulk_cost(0) - 1.0).abs() < f64::EPSILON);
        assert!((limits.bulk_cost(4) - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn rejects_missing_tier() {
        let toml_str = DEFAULT_TOML.replace("[tiers.enterprise]", "[tiers_disabled]");
        let err = EngineConfig::from_toml_str(&toml_str).unwrap_err();
        assert!(
            matches!(err, ConfigError::Invalid { .. } | ConfigError::Parse(_)),
            "{err}"
        );
    }

    #[test]
    fn rejects_zero_batch_size() {
        let toml_str = DEFAULT_TOML.replace("batch_size = 25", "batch_size = 0");
        let err = EngineConfig::from_toml_str(&toml_str).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }), "{err}");
    }

    #[test]
    fn rejects_unknown_tier_name() {
        let toml_str = format!("{DEFAULT_TOML}\n[tiers.platinum]\nmax_addresses = 1\n");
        assert!(EngineConfig::from_toml_str(&toml_str).is_err());
    }
}
