//! Scripted collaborators for engine tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use climate_risk_aggregator::{
    AggregatePoint, AggregateSuccess, BatchAggregateItem, BatchAggregateOutcome,
    ClimateDataAggregator, ClimateDataFailure, FailureKind, RiskData,
};
use climate_risk_geocoder::address::normalize_address;
use climate_risk_geocoder::{
    BatchGeocodeItem, BatchGeocodeOutcome, GeocodeFailure, GeocodeMatch, GeocodingGateway,
};
use climate_risk_models::{
    Coordinates, GeocodeAccuracy, HazardScores, HazardType, NewProperty, Property,
    RiskAssessment,
};
use climate_risk_store::memory::MemoryStore;
use climate_risk_store::{
    PropertyStore, RiskAssessmentStore, SpatialFilter, SpatialMatch, StoreError, UsageEvent,
    UsageTracker,
};
use uuid::Uuid;

/// Geocoder that knows a fixed set of addresses.
#[derive(Default)]
pub struct FakeGeocoder {
    known: BTreeMap<String, (f64, f64, String)>,
    batch_fails: AtomicBool,
    pub single_calls: AtomicUsize,
    pub batch_calls: AtomicUsize,
}

impl FakeGeocoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, address: &str, lat: f64, lon: f64, state: &str) -> Self {
        let key = normalize_address(address).unwrap();
        self.known.insert(key, (lat, lon, state.to_string()));
        self
    }

    pub fn fail_batches(&self) {
        self.batch_fails.store(true, Ordering::SeqCst);
    }

    fn lookup(&self, address: &str) -> Result<GeocodeMatch, GeocodeFailure> {
        let key = normalize_address(address).unwrap_or_default();
        self.known
            .get(&key)
            .map(|(lat, lon, state)| GeocodeMatch {
                latitude: *lat,
                longitude: *lon,
                matched_address: Some(address.to_uppercase()),
                city: None,
                state: Some(state.clone()),
                zip: None,
                accuracy: GeocodeAccuracy::Rooftop,
                source: "fake".to_string(),
            })
            .ok_or_else(|| GeocodeFailure::NoMatch {
                address: address.to_string(),
            })
    }
}

#[async_trait]
impl GeocodingGateway for FakeGeocoder {
    async fn geocode(&self, address: &str) -> Result<GeocodeMatch, GeocodeFailure> {
        self.single_calls.fetch_add(1, Ordering::SeqCst);
        self.lookup(address)
    }

    async fn batch_geocode(
        &self,
        addresses: &[String],
    ) -> Result<BatchGeocodeOutcome, GeocodeFailure> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        if self.batch_fails.load(Ordering::SeqCst) {
            return Err(GeocodeFailure::Upstream {
                message: "batch endpoint down".to_string(),
                retryable: true,
            });
        }
        Ok(BatchGeocodeOutcome {
            api_calls: 1,
            results: addresses
                .iter()
                .map(|address| BatchGeocodeItem {
                    address: address.clone(),
                    outcome: self.lookup(address),
                })
                .collect(),
        })
    }
}

fn point_key(coordinates: Coordinates) -> String {
    format!("{:.4},{:.4}", coordinates.latitude, coordinates.longitude)
}

/// Aggregator returning scripted scores (50 unless set).
#[derive(Default)]
pub struct FakeAggregator {
    scores: BTreeMap<String, f64>,
    failing_points: Mutex<BTreeSet<String>>,
    fail_all: Mutex<Option<(String, bool)>>,
    pub single_calls: AtomicUsize,
    pub batch_calls: AtomicUsize,
    pub points_aggregated: AtomicUsize,
}

impl FakeAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_score(mut self, lat: f64, lon: f64, score: f64) -> Self {
        self.scores
            .insert(point_key(Coordinates::new(lat, lon)), score);
        self
    }

    pub fn fail_point(&self, lat: f64, lon: f64) {
        self.failing_points
            .lock()
            .unwrap()
            .insert(point_key(Coordinates::new(lat, lon)));
    }

    pub fn fail_all(&self, message: &str, retryable: bool) {
        *self.fail_all.lock().unwrap() = Some((message.to_string(), retryable));
    }

    pub fn total_calls(&self) -> usize {
        self.single_calls.load(Ordering::SeqCst) + self.batch_calls.load(Ordering::SeqCst)
    }

    fn whole_failure(&self) -> Option<ClimateDataFailure> {
        self.fail_all
            .lock()
            .unwrap()
            .clone()
            .map(|(message, retryable)| ClimateDataFailure {
                kind: FailureKind::Unavailable,
                message,
                retryable,
                error_source: Some("fake".to_string()),
            })
    }

    fn score(&self, coordinates: Coordinates) -> Result<RiskData, ClimateDataFailure> {
        let key = point_key(coordinates);
        if self.failing_points.lock().unwrap().contains(&key) {
            return Err(ClimateDataFailure {
                kind: FailureKind::Rejected,
                message: format!("no coverage at {key}"),
                retryable: false,
                error_source: Some("fake".to_string()),
            });
        }
        let overall_score = self.scores.get(&key).copied().unwrap_or(50.0);
        let mut hazard_scores = HazardScores::new();
        hazard_scores.insert(HazardType::Flood, overall_score);
        Ok(RiskData {
            overall_score,
            hazard_scores,
            sources: vec!["fake".to_string()],
        })
    }
}

#[async_trait]
impl ClimateDataAggregator for FakeAggregator {
    async fn aggregate(
        &self,
        coordinates: Coordinates,
        _risk_types: &[HazardType],
    ) -> Result<AggregateSuccess, ClimateDataFailure> {
        self.single_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(failure) = self.whole_failure() {
            return Err(failure);
        }
        Ok(AggregateSuccess {
            risk_data: self.score(coordinates)?,
            external_api_calls: 1,
            cache_hits: 0,
            cache_misses: 1,
        })
    }

    async fn batch_aggregate(
        &self,
        points: &[AggregatePoint],
        _risk_types: &[HazardType],
    ) -> Result<BatchAggregateOutcome, ClimateDataFailure> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        self.points_aggregated
            .fetch_add(points.len(), Ordering::SeqCst);
        if let Some(failure) = self.whole_failure() {
            return Err(failure);
        }
        let results = points
            .iter()
            .map(|point| BatchAggregateItem {
                address: point.address.clone(),
                outcome: self.score(Coordinates::new(point.latitude, point.longitude)),
            })
            .collect::<Vec<_>>();
        Ok(BatchAggregateOutcome {
            external_api_calls: u32::try_from(results.len()).unwrap(),
            cache_hits: 0,
            cache_misses: u32::try_from(results.len()).unwrap(),
            results,
        })
    }
}

fn backend_error(message: String) -> StoreError {
    StoreError::Backend { message }
}

/// Store that counts spatial queries and fails chosen operations.
pub struct CountingStore {
    pub inner: Arc<MemoryStore>,
    pub spatial_queries: AtomicUsize,
    fail_spatial: AtomicBool,
    failing_lookups: Mutex<BTreeSet<String>>,
    failing_upserts: Mutex<BTreeSet<String>>,
    failing_assessments: Mutex<BTreeSet<String>>,
}

impl CountingStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            spatial_queries: AtomicUsize::new(0),
            fail_spatial: AtomicBool::new(false),
            failing_lookups: Mutex::new(BTreeSet::new()),
            failing_upserts: Mutex::new(BTreeSet::new()),
            failing_assessments: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn fail_spatial(&self) {
        self.fail_spatial.store(true, Ordering::SeqCst);
    }

    /// Fails address lookups for this raw address once normalized.
    pub fn fail_lookup(&self, address: &str) {
        let key = normalize_address(address).unwrap();
        self.failing_lookups.lock().unwrap().insert(key);
    }

    /// Fails property upserts for this raw address once normalized.
    pub fn fail_upsert(&self, address: &str) {
        let key = normalize_address(address).unwrap();
        self.failing_upserts.lock().unwrap().insert(key);
    }

    /// Fails assessment writes at this point.
    pub fn fail_assessment_at(&self, lat: f64, lon: f64) {
        self.failing_assessments
            .lock()
            .unwrap()
            .insert(point_key(Coordinates::new(lat, lon)));
    }
}

#[async_trait]
impl PropertyStore for CountingStore {
    async fn find_by_normalized_address(
        &self,
        normalized_address: &str,
    ) -> Result<Option<Property>, StoreError> {
        if self.failing_lookups.lock().unwrap().contains(normalized_address) {
            return Err(backend_error(format!(
                "lookup of '{normalized_address}' timed out"
            )));
        }
        self.inner.find_by_normalized_address(normalized_address).await
    }

    async fn upsert_property(&self, property: NewProperty) -> Result<Property, StoreError> {
        if self
            .failing_upserts
            .lock()
            .unwrap()
            .contains(&property.normalized_address)
        {
            return Err(backend_error(format!(
                "write of '{}' rejected",
                property.normalized_address
            )));
        }
        self.inner.upsert_property(property).await
    }

    async fn find_within_radius(
        &self,
        center: Coordinates,
        radius_meters: f64,
        filter: &SpatialFilter,
    ) -> Result<Vec<SpatialMatch>, StoreError> {
        self.spatial_queries.fetch_add(1, Ordering::SeqCst);
        if self.fail_spatial.load(Ordering::SeqCst) {
            return Err(backend_error("spatial index offline".to_string()));
        }
        self.inner
            .find_within_radius(center, radius_meters, filter)
            .await
    }
}

#[async_trait]
impl RiskAssessmentStore for CountingStore {
    async fn get_current(&self, property_id: Uuid) -> Result<Option<RiskAssessment>, StoreError> {
        self.inner.get_current(property_id).await
    }

    async fn upsert(&self, assessment: &RiskAssessment) -> Result<(), StoreError> {
        let key = point_key(Coordinates::new(assessment.latitude, assessment.longitude));
        if self.failing_assessments.lock().unwrap().contains(&key) {
            return Err(backend_error(format!("assessment write at {key} rejected")));
        }
        self.inner.upsert(assessment).await
    }
}

/// Usage tracker that always fails.
pub struct FailingTracker;

#[async_trait]
impl UsageTracker for FailingTracker {
    async fn track(&self, _event: UsageEvent) -> Result<(), StoreError> {
        Err(StoreError::Backend {
            message: "billing service unavailable".to_string(),
        })
    }
}
