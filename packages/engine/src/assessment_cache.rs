//! Freshness gate for risk assessments.
//!
//! A stored assessment is reused while `now < expires_at`; otherwise the
//! aggregator is called exactly once and the result replaces the stored
//! one. Scores are never transformed here.

use std::sync::Arc;

use chrono::Duration;
use climate_risk_aggregator::{ClimateDataAggregator, RiskData};
use climate_risk_models::{Coordinates, HazardType, Property, RiskAssessment};
use climate_risk_store::{RiskAssessmentStore, StoreError};
use uuid::Uuid;

use crate::EngineError;
use crate::clock::Clock;

/// Result of a lookup-only read.
#[derive(Debug, Clone, PartialEq)]
pub enum CachedAssessment {
    /// A current assessment.
    Current(RiskAssessment),
    /// The latest assessment has expired.
    Expired(RiskAssessment),
    /// No assessment has been stored.
    Missing,
}

/// Decides between reusing and recomputing a property's assessment.
pub struct AssessmentCache {
    aggregator: Arc<dyn ClimateDataAggregator>,
    assessments: Arc<dyn RiskAssessmentStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    version: String,
}

impl AssessmentCache {
    /// Creates a cache that stamps new assessments with `version` and
    /// keeps them current for `ttl`.
    #[must_use]
    pub fn new(
        aggregator: Arc<dyn ClimateDataAggregator>,
        assessments: Arc<dyn RiskAssessmentStore>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
        version: String,
    ) -> Self {
        Self {
            aggregator,
            assessments,
            clock,
            ttl,
            version,
        }
    }

    /// Returns the stored assessment's freshness without ever computing
    /// one.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the assessment store fails.
    pub async fn lookup(&self, property_id: Uuid) -> Result<CachedAssessment, StoreError> {
        let now = self.clock.now();
        Ok(match self.assessments.get_current(property_id).await? {
            Some(assessment) if assessment.is_current(now) => CachedAssessment::Current(assessment),
            Some(assessment) => CachedAssessment::Expired(assessment),
            None => CachedAssessment::Missing,
        })
    }

    /// Returns the property's current assessment, recomputing and
    /// persisting it if none is current. The flag is `true` on a hit.
    ///
    /// `risk_types` only applies to a recompute.
    ///
    /// # Errors
    ///
    /// * [`EngineError::ClimateData`] if the aggregator fails
    /// * [`EngineError::Store`] if the assessment store fails
    pub async fn get_or_compute(
        &self,
        property: &Property,
        risk_types: &[HazardType],
    ) -> Result<(RiskAssessment, bool), EngineError> {
        match self.lookup(property.id).await? {
            CachedAssessment::Current(assessment) => {
                log::debug!("Assessment cache hit for {}", property.normalized_address);
                return Ok((assessment, true));
            }
            CachedAssessment::Expired(old) => {
                log::info!(
                    "Assessment for {} expired at {}, recomputing",
                    property.normalized_address,
                    old.expires_at
                );
            }
            CachedAssessment::Missing => {
                log::info!(
                    "No assessment for {}, computing",
                    property.normalized_address
                );
            }
        }

        let success = self
            .aggregator
            .aggregate(property.coordinates(), risk_types)
            .await?;
        let assessment = self.build(
            Some(property.id),
            property.coordinates(),
            success.risk_data,
        );
        self.assessments.upsert(&assessment).await?;
        Ok((assessment, false))
    }

    /// Computes an assessment for bare coordinates without persisting it.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ClimateData`] if the aggregator fails.
    pub async fn compute_ephemeral(
        &self,
        coordinates: Coordinates,
        risk_types: &[HazardType],
    ) -> Result<RiskAssessment, EngineError> {
        let success = self.aggregator.aggregate(coordinates, risk_types).await?;
        Ok(self.build(None, coordinates, success.risk_data))
    }

    /// Persists an assessment built by [`Self::build`].
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the assessment store fails.
    pub async fn persist(&self, assessment: &RiskAssessment) -> Result<(), StoreError> {
        self.assessments.upsert(assessment).await
    }

    /// Wraps aggregator output in a new assessment created now.
    #[must_use]
    pub fn build(
        &self,
        property_id: Option<Uuid>,
        coordinates: Coordinates,
        data: RiskData,
    ) -> RiskAssessment {
        let created_at = self.clock.now();
        RiskAssessment {
            id: Uuid::new_v4(),
            property_id,
            latitude: coordinates.latitude,
            longitude: coordinates.longitude,
            overall_score: data.overall_score,
            hazard_scores: data.hazard_scores,
            sources: data.sources,
            version: self.version.clone(),
            created_at,
            expires_at: created_at + self.ttl,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use chrono::Utc;
    use climate_risk_models::{GeocodeAccuracy, NewProperty};
    use climate_risk_store::PropertyStore;
    use climate_risk_store::memory::MemoryStore;

    use super::*;
    use crate::clock::ManualClock;
    use crate::testing::FakeAggregator;

    struct Fixture {
        cache: AssessmentCache,
        aggregator: Arc<FakeAggregator>,
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let aggregator = Arc::new(FakeAggregator::new().with_score(25.0, -80.0, 72.0));
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cache = AssessmentCache::new(
            aggregator.clone(),
            store.clone(),
            clock.clone(),
            Duration::days(30),
            "1.0".to_string(),
        );
        Fixture {
            cache,
            aggregator,
            store,
            clock,
        }
    }

    async fn property(store: &MemoryStore) -> Property {
        store
            .upsert_property(NewProperty {
                normalized_address: "1 ocean ave".to_string(),
                address: "1 Ocean Ave".to_string(),
                latitude: 25.0,
                longitude: -80.0,
                city: None,
                state: Some("FL".to_string()),
                zip: None,
                property_type: None,
                geocode_accuracy: GeocodeAccuracy::Rooftop,
                geocode_source: "test".to_string(),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn miss_computes_with_thirty_day_expiry() {
        let f = fixture();
        let property = property(&f.store).await;

        let (assessment, hit) = f.cache.get_or_compute(&property, &[]).await.unwrap();

        assert!(!hit);
        assert!((assessment.overall_score - 72.0).abs() < f64::EPSILON);
        assert_eq!(assessment.expires_at, assessment.created_at + Duration::days(30));
        assert_eq!(assessment.created_at, f.clock.now());
        assert_eq!(assessment.version, "1.0");
        assert_eq!(assessment.property_id, Some(property.id));
        assert_eq!(f.store.assessment_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn hit_skips_aggregator_and_returns_identical_scores() {
        let f = fixture();
        let property = property(&f.store).await;

        let (first, _) = f.cache.get_or_compute(&property, &[]).await.unwrap();
        f.clock.advance(Duration::days(29));
        let (second, hit) = f.cache.get_or_compute(&property, &[]).await.unwrap();

        assert!(hit);
        assert_eq!(first, second);
        assert_eq!(f.aggregator.single_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expiry_boundary_triggers_recompute() {
        let f = fixture();
        let property = property(&f.store).await;

        let (first, _) = f.cache.get_or_compute(&property, &[]).await.unwrap();
        f.clock.set(first.expires_at);
        let (second, hit) = f.cache.get_or_compute(&property, &[]).await.unwrap();

        assert!(!hit);
        assert_ne!(first.id, second.id);
        assert_eq!(f.aggregator.single_calls.load(Ordering::SeqCst), 2);
        assert_eq!(f.store.assessment_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn aggregator_failure_surfaces_classification() {
        let f = fixture();
        let property = property(&f.store).await;
        f.aggregator.fail_all("noaa timeout", true);

        let err = f.cache.get_or_compute(&property, &[]).await.unwrap_err();
        match err {
            EngineError::ClimateData {
                retryable,
                error_source,
                ..
            } => {
                assert!(retryable);
                assert_eq!(error_source.as_deref(), Some("fake"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(f.store.assessment_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn ephemeral_path_never_persists() {
        let f = fixture();

        let assessment = f
            .cache
            .compute_ephemeral(Coordinates::new(25.0, -80.0), &[])
            .await
            .unwrap();

        assert_eq!(assessment.property_id, None);
        assert_eq!(f.store.assessment_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn lookup_never_computes() {
        let f = fixture();
        let property = property(&f.store).await;

        assert_eq!(
            f.cache.lookup(property.id).await.unwrap(),
            CachedAssessment::Missing
        );

        f.cache.get_or_compute(&property, &[]).await.unwrap();
        f.clock.advance(Duration::days(31));
        assert!(matches!(
            f.cache.lookup(property.id).await.unwrap(),
            CachedAssessment::Expired(_)
        ));
        assert_eq!(f.aggregator.single_calls.load(Ordering::SeqCst), 1);
    }
}
