#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Climate risk assessment engine.
//!
//! [`RiskEngine`] answers three kinds of request:
//!
//! * single lookups, which resolve an address to a stored property and
//!   return its current assessment, recomputing only when none is current
//! * radius searches, which enrich nearby properties with their current
//!   assessments and cache the enriched list per region
//! * bulk requests, which push many addresses through the same pipeline in
//!   tier-limited chunks and bill for the successes
//!
//! All storage, geocoding, aggregation, and usage tracking goes through the
//! traits in `climate_risk_store`, `climate_risk_geocoder`, and
//! `climate_risk_aggregator`.

pub mod analytics;
pub mod assessment_cache;
pub mod billing;
pub mod bulk;
pub mod clock;
mod error;
pub mod radius;
pub mod resolver;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use climate_risk_aggregator::ClimateDataAggregator;
use climate_risk_config::EngineConfig;
use climate_risk_engine_models::{
    AssessmentReport, AssessmentRequest, BulkRequest, BulkResult, RadiusSearchRequest,
    RadiusSearchResult,
};
use climate_risk_geocoder::GeocodingGateway;
use climate_risk_spatial::BoundaryIndex;
use climate_risk_store::{
    PropertyStore, RegionalCache, RiskAssessmentStore, UsageKind, UsageTracker,
};

pub use error::EngineError;

use crate::assessment_cache::AssessmentCache;
use crate::billing::UsageRecorder;
use crate::bulk::BulkOrchestrator;
use crate::clock::Clock;
use crate::radius::RadiusSearch;
use crate::resolver::PropertyResolver;

/// External collaborators the engine is wired to.
#[derive(Clone)]
pub struct Collaborators {
    /// Address geocoding.
    pub geocoder: Arc<dyn GeocodingGateway>,
    /// Climate data scoring.
    pub aggregator: Arc<dyn ClimateDataAggregator>,
    /// Property persistence and spatial queries.
    pub properties: Arc<dyn PropertyStore>,
    /// Assessment persistence.
    pub assessments: Arc<dyn RiskAssessmentStore>,
    /// Radius search result cache.
    pub regional_cache: Arc<dyn RegionalCache>,
    /// Usage event sink.
    pub usage: Arc<dyn UsageTracker>,
    /// Administrative boundaries for radius search context.
    pub boundaries: Option<Arc<BoundaryIndex>>,
    /// Source of the current time.
    pub clock: Arc<dyn Clock>,
}

/// Entry point for all risk requests.
pub struct RiskEngine {
    config: Arc<EngineConfig>,
    resolver: PropertyResolver,
    assessments: Arc<AssessmentCache>,
    radius: RadiusSearch,
    bulk: BulkOrchestrator,
    usage: UsageRecorder,
}

impl RiskEngine {
    /// Wires an engine from its configuration and collaborators.
    #[must_use]
    pub fn new(config: EngineConfig, collaborators: Collaborators) -> Self {
        let config = Arc::new(config);
        let Collaborators {
            geocoder,
            aggregator,
            properties,
            assessments,
            regional_cache,
            usage,
            boundaries,
            clock,
        } = collaborators;

        let assessments = Arc::new(AssessmentCache::new(
            aggregator.clone(),
            assessments,
            clock.clone(),
            config.assessment_ttl(),
            config.assessment_version.clone(),
        ));

        Self {
            resolver: PropertyResolver::new(properties.clone(), geocoder.clone()),
            radius: RadiusSearch::new(
                properties.clone(),
                assessments.clone(),
                regional_cache,
                boundaries,
                config.clone(),
                clock.clone(),
            ),
            bulk: BulkOrchestrator::new(
                properties,
                geocoder,
                aggregator,
                assessments.clone(),
                config.clone(),
            ),
            usage: UsageRecorder::new(usage, clock),
            assessments,
            config,
        }
    }

    /// The configuration the engine runs with.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the current assessment for an address or a coordinate pair.
    ///
    /// An address takes precedence over coordinates. Address lookups are
    /// cached per property; coordinate-only lookups are computed fresh and
    /// never persisted.
    ///
    /// # Errors
    ///
    /// * [`EngineError::InvalidRequest`] if neither an address nor valid
    ///   coordinates are given
    /// * [`EngineError::NotFound`] if the address cannot be geocoded
    /// * [`EngineError::ClimateData`] if a recompute fails
    /// * [`EngineError::Store`] if a store fails
    pub async fn assess(
        &self,
        request: &AssessmentRequest,
    ) -> Result<AssessmentReport, EngineError> {
        let report = if let Some(address) = &request.address {
            let property = self.resolver.resolve(address).await?;
            let (assessment, cache_hit) = self
                .assessments
                .get_or_compute(&property, &request.risk_types)
                .await?;
            AssessmentReport {
                property: Some(property),
                band: assessment.band(),
                assessment,
                cache_hit,
            }
        } else if let Some(coordinates) = request.coordinates {
            if !coordinates.is_valid() {
                return Err(EngineError::invalid(format!(
                    "coordinates ({}, {}) are out of range",
                    coordinates.latitude, coordinates.longitude
                )));
            }
            let assessment = self
                .assessments
                .compute_ephemeral(coordinates, &request.risk_types)
                .await?;
            AssessmentReport {
                property: None,
                band: assessment.band(),
                assessment,
                cache_hit: false,
            }
        } else {
            return Err(EngineError::invalid(
                "an address or coordinates are required",
            ));
        };

        self.usage
            .record(
                UsageKind::SingleLookup,
                None,
                1,
                self.config.billing.single_lookup_cost,
            )
            .await;

        Ok(report)
    }

    /// Runs a radius search.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidRequest`] if the request parameters
    /// are out of range.
    pub async fn radius_search(
        &self,
        request: &RadiusSearchRequest,
    ) -> Result<RadiusSearchResult, EngineError> {
        let result = self.radius.search(request).await?;

        self.usage
            .record(
                UsageKind::RadiusSearch,
                None,
                result.page.total_results,
                self.config.billing.radius_search_cost,
            )
            .await;

        Ok(result)
    }

    /// Assesses a batch of addresses under the request's subscription tier.
    ///
    /// # Errors
    ///
    /// * [`EngineError::Subscription`] if the batch exceeds the tier
    /// * [`EngineError::Config`] if the tier is not configured
    pub async fn bulk_assess(&self, request: &BulkRequest) -> Result<BulkResult, EngineError> {
        let result = self.bulk.run(request).await?;

        self.usage
            .record(
                UsageKind::BulkAssessment,
                Some(request.tier),
                result.billing.billable_properties,
                result.billing.cost,
            )
            .await;

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use chrono::{Duration, Utc};
    use climate_risk_engine_models::Unavailable;
    use climate_risk_models::{Coordinates, HazardType, RiskBand, SubscriptionTier};
    use climate_risk_store::cache::MemoryRegionalCache;
    use climate_risk_store::memory::MemoryStore;
    use climate_risk_store::usage::RecordingUsageTracker;

    use super::*;
    use crate::clock::ManualClock;
    use crate::testing::{FakeAggregator, FakeGeocoder};

    struct Fixture {
        engine: RiskEngine,
        aggregator: Arc<FakeAggregator>,
        geocoder: Arc<FakeGeocoder>,
        store: Arc<MemoryStore>,
        usage: Arc<RecordingUsageTracker>,
        clock: Arc<ManualClock>,
    }

    fn fixture(geocoder: FakeGeocoder, aggregator: FakeAggregator) -> Fixture {
        let mut config = EngineConfig::default();
        for limits in config.tiers.values_mut() {
            limits.inter_chunk_delay_ms = 0;
        }

        let geocoder = Arc::new(geocoder);
        let aggregator = Arc::new(aggregator);
        let store = Arc::new(MemoryStore::new());
        let usage = Arc::new(RecordingUsageTracker::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));

        let engine = RiskEngine::new(
            config,
            Collaborators {
                geocoder: geocoder.clone(),
                aggregator: aggregator.clone(),
                properties: store.clone(),
                assessments: store.clone(),
                regional_cache: Arc::new(MemoryRegionalCache::new()),
                usage: usage.clone(),
                boundaries: None,
                clock: clock.clone(),
            },
        );

        Fixture {
            engine,
            aggregator,
            geocoder,
            store,
            usage,
            clock,
        }
    }

    fn ocean_ave() -> Fixture {
        fixture(
            FakeGeocoder::new().with("1 Ocean Ave", 25.0, -80.0, "FL"),
            FakeAggregator::new().with_score(25.0, -80.0, 72.0),
        )
    }

    fn by_address(address: &str) -> AssessmentRequest {
        AssessmentRequest {
            address: Some(address.to_string()),
            ..AssessmentRequest::default()
        }
    }

    #[tokio::test]
    async fn first_lookup_computes_and_second_is_a_cache_hit() {
        let f = ocean_ave();

        let first = f.engine.assess(&by_address("1 Ocean Ave")).await.unwrap();

        assert!(!first.cache_hit);
        assert!((first.assessment.overall_score - 72.0).abs() < f64::EPSILON);
        assert_eq!(first.band, RiskBand::High);
        assert_eq!(
            first.assessment.expires_at - first.assessment.created_at,
            Duration::days(30)
        );
        assert_eq!(f.store.property_count().unwrap(), 1);
        assert_eq!(f.store.assessment_count().unwrap(), 1);
        assert_eq!(f.aggregator.single_calls.load(Ordering::SeqCst), 1);

        let second = f.engine.assess(&by_address("  1 OCEAN ave")).await.unwrap();

        assert!(second.cache_hit);
        assert_eq!(second.assessment.id, first.assessment.id);
        assert_eq!(f.aggregator.single_calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.geocoder.single_calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.usage.events().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn expired_assessment_is_recomputed() {
        let f = ocean_ave();

        let first = f.engine.assess(&by_address("1 Ocean Ave")).await.unwrap();
        f.clock.advance(Duration::days(30));
        let second = f.engine.assess(&by_address("1 Ocean Ave")).await.unwrap();

        assert!(!second.cache_hit);
        assert_ne!(second.assessment.id, first.assessment.id);
        assert_eq!(f.aggregator.single_calls.load(Ordering::SeqCst), 2);
        assert_eq!(f.store.assessment_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn unknown_address_is_not_found_and_not_billed() {
        let f = ocean_ave();

        let err = f
            .engine
            .assess(&by_address("2 Nowhere Rd"))
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::NotFound { .. }));
        assert_eq!(f.aggregator.total_calls(), 0);
        assert!(f.usage.events().unwrap().is_empty());
    }

    #[tokio::test]
    async fn aggregator_failure_carries_retry_hint_and_source() {
        let f = ocean_ave();
        f.aggregator.fail_all("upstream timeout", true);

        let err = f.engine.assess(&by_address("1 Ocean Ave")).await.unwrap_err();

        match err {
            EngineError::ClimateData {
                message,
                retryable,
                error_source,
            } => {
                assert!(message.contains("upstream timeout"));
                assert!(retryable);
                assert_eq!(error_source.as_deref(), Some("fake"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(f.store.property_count().unwrap(), 1);
        assert_eq!(f.store.assessment_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn coordinates_are_assessed_without_persisting() {
        let f = ocean_ave();

        let report = f
            .engine
            .assess(&AssessmentRequest {
                coordinates: Some(Coordinates::new(25.0, -80.0)),
                risk_types: vec![HazardType::Flood],
                ..AssessmentRequest::default()
            })
            .await
            .unwrap();

        assert!(report.property.is_none());
        assert_eq!(report.assessment.property_id, None);
        assert!((report.assessment.overall_score - 72.0).abs() < f64::EPSILON);
        assert_eq!(f.store.assessment_count().unwrap(), 0);
        assert_eq!(f.geocoder.single_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn address_takes_precedence_over_coordinates() {
        let f = ocean_ave();

        let report = f
            .engine
            .assess(&AssessmentRequest {
                address: Some("1 Ocean Ave".to_string()),
                coordinates: Some(Coordinates::new(40.0, -70.0)),
                risk_types: vec![],
            })
            .await
            .unwrap();

        assert!(report.property.is_some());
        assert!((report.assessment.latitude - 25.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn empty_request_is_invalid() {
        let f = ocean_ave();

        let err = f
            .engine
            .assess(&AssessmentRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidRequest { .. }));

        let err = f
            .engine
            .assess(&AssessmentRequest {
                coordinates: Some(Coordinates::new(91.0, 0.0)),
                ..AssessmentRequest::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidRequest { .. }));
        assert_eq!(f.aggregator.total_calls(), 0);
    }

    #[tokio::test]
    async fn radius_search_sees_properties_assessed_by_lookups() {
        let f = ocean_ave();
        f.engine.assess(&by_address("1 Ocean Ave")).await.unwrap();

        let result = f
            .engine
            .radius_search(&RadiusSearchRequest::new(
                Coordinates::new(25.001, -80.0),
                1_000.0,
            ))
            .await
            .unwrap();

        assert_eq!(result.properties.len(), 1);
        let hit = &result.properties[0];
        assert!(hit.unavailable.is_none());
        assert_eq!(hit.band, Some(RiskBand::High));
        assert_eq!(result.analytics.assessed_properties, 1);

        let events = f.usage.events().unwrap();
        let last = events.last().unwrap();
        assert_eq!(last.kind, UsageKind::RadiusSearch);
        assert_eq!(last.properties, 1);
    }

    #[tokio::test]
    async fn radius_search_marks_unassessed_properties() {
        let f = ocean_ave();
        f.aggregator.fail_all("down", true);
        f.engine.assess(&by_address("1 Ocean Ave")).await.unwrap_err();

        let result = f
            .engine
            .radius_search(&RadiusSearchRequest::new(
                Coordinates::new(25.0, -80.0),
                500.0,
            ))
            .await
            .unwrap();

        assert_eq!(result.properties.len(), 1);
        assert_eq!(result.properties[0].unavailable, Some(Unavailable::Missing));
        assert_eq!(f.aggregator.total_calls(), 1);
    }

    #[tokio::test]
    async fn bulk_records_billed_usage() {
        let f = fixture(
            FakeGeocoder::new()
                .with("1 Ocean Ave", 25.0, -80.0, "FL")
                .with("3 Ocean Ave", 25.01, -80.0, "FL"),
            FakeAggregator::new(),
        );

        let result = f
            .engine
            .bulk_assess(&BulkRequest {
                addresses: vec![
                    "1 Ocean Ave".to_string(),
                    "2 Nowhere Rd".to_string(),
                    "3 Ocean Ave".to_string(),
                ],
                risk_types: vec![],
                tier: SubscriptionTier::Standard,
            })
            .await
            .unwrap();

        assert_eq!(result.successes.len(), 2);

        let events = f.usage.events().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, UsageKind::BulkAssessment);
        assert_eq!(events[0].tier, Some(SubscriptionTier::Standard));
        assert_eq!(events[0].properties, 2);
        assert!((events[0].cost - 0.60).abs() < 1e-9);
    }

    #[tokio::test]
    async fn bulk_over_tier_records_nothing() {
        let f = ocean_ave();

        let err = f
            .engine
            .bulk_assess(&BulkRequest {
                addresses: vec!["1 Ocean Ave".to_string(); 1_001],
                risk_types: vec![],
                tier: SubscriptionTier::Enterprise,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::Subscription { max: 1_000, .. }));
        assert!(f.usage.events().unwrap().is_empty());
        assert_eq!(f.geocoder.batch_calls.load(Ordering::SeqCst), 0);
    }
}
