//! Bulk batch orchestration.
//!
//! Addresses are processed in tier-sized chunks, strictly one chunk at a
//! time with a fixed pause between chunks. Each chunk runs a pipeline of
//! stages keyed by normalized address:
//!
//! 1. lookup: find already-stored properties
//! 2. geocode: batch-geocode the gap, falling back to per-address calls
//!    only if the batch call fails outright
//! 3. persist: upsert newly geocoded properties
//! 4. freshness: reuse assessments that are still current
//! 5. aggregate: batch-aggregate the rest and persist each new assessment
//!
//! Every stage returns a [`Stage`] of resolved and failed keys. Failures
//! are carried forward and every input address ends up in exactly one of
//! the successes or errors.

use std::collections::BTreeMap;
use std::sync::Arc;

use climate_risk_aggregator::{AggregatePoint, ClimateDataAggregator, ClimateDataFailure};
use climate_risk_config::EngineConfig;
use climate_risk_engine_models::{BulkError, BulkRequest, BulkResult, BulkSuccess};
use climate_risk_geocoder::address::normalize_address;
use climate_risk_geocoder::{GeocodeMatch, GeocodingGateway};
use climate_risk_models::{HazardType, Property, RiskAssessment};
use climate_risk_store::PropertyStore;
use futures::future::join_all;
use futures::stream::{self, StreamExt as _};

use crate::EngineError;
use crate::analytics::bulk_summary;
use crate::assessment_cache::{AssessmentCache, CachedAssessment};
use crate::billing::bulk_billing;
use crate::resolver::{geocode_not_found, new_property};

/// Concurrent single-address geocodes when the batch endpoint fails.
const GEOCODE_FALLBACK_CONCURRENCY: usize = 8;

/// One submitted address and its position in the request.
#[derive(Debug, Clone, Copy)]
struct Input<'a> {
    index: usize,
    address: &'a str,
}

/// Output of one pipeline stage, keyed by normalized address.
#[derive(Debug)]
struct Stage<T> {
    resolved: BTreeMap<String, T>,
    failed: BTreeMap<String, String>,
}

impl<T> Default for Stage<T> {
    fn default() -> Self {
        Self {
            resolved: BTreeMap::new(),
            failed: BTreeMap::new(),
        }
    }
}

/// Successes and errors produced by one chunk.
#[derive(Debug, Default)]
struct ChunkOutcome {
    successes: Vec<BulkSuccess>,
    errors: Vec<BulkError>,
    external_api_calls: u32,
}

/// Runs bulk requests.
pub struct BulkOrchestrator {
    properties: Arc<dyn PropertyStore>,
    geocoder: Arc<dyn GeocodingGateway>,
    aggregator: Arc<dyn ClimateDataAggregator>,
    assessments: Arc<AssessmentCache>,
    config: Arc<EngineConfig>,
}

impl BulkOrchestrator {
    /// Creates an orchestrator over the given collaborators.
    #[must_use]
    pub fn new(
        properties: Arc<dyn PropertyStore>,
        geocoder: Arc<dyn GeocodingGateway>,
        aggregator: Arc<dyn ClimateDataAggregator>,
        assessments: Arc<AssessmentCache>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            properties,
            geocoder,
            aggregator,
            assessments,
            config,
        }
    }

    /// Assesses every address in `request`.
    ///
    /// Per-address failures are reported in [`BulkResult::errors`]; only the
    /// tier ceiling fails the whole request.
    ///
    /// # Errors
    ///
    /// * [`EngineError::Subscription`] if the request has more addresses
    ///   than the tier allows (checked before any geocoding)
    /// * [`EngineError::Config`] if the tier has no configured limits
    pub async fn run(&self, request: &BulkRequest) -> Result<BulkResult, EngineError> {
        let limits = self.config.tier(request.tier)?;
        let total = request.addresses.len();

        if total > limits.max_addresses {
            return Err(EngineError::Subscription {
                tier: request.tier,
                requested: total,
                max: limits.max_addresses,
            });
        }

        let inputs = request
            .addresses
            .iter()
            .enumerate()
            .map(|(index, address)| Input {
                index,
                address: address.as_str(),
            })
            .collect::<Vec<_>>();
        let chunk_count = total.div_ceil(limits.batch_size);

        log::info!(
            "Bulk request: {total} addresses in {chunk_count} chunks of up to {} ({} tier)",
            limits.batch_size,
            request.tier
        );

        let mut successes = Vec::with_capacity(total);
        let mut errors = Vec::new();
        let mut external_api_calls = 0_u32;

        for (batch_index, chunk) in inputs.chunks(limits.batch_size).enumerate() {
            if batch_index > 0 {
                tokio::time::sleep(limits.inter_chunk_delay()).await;
            }

            let outcome = self
                .process_chunk(batch_index, chunk, &request.risk_types)
                .await;

            log::info!(
                "Chunk {}/{chunk_count}: {} succeeded, {} failed",
                batch_index + 1,
                outcome.successes.len(),
                outcome.errors.len()
            );

            external_api_calls = external_api_calls.saturating_add(outcome.external_api_calls);
            successes.extend(outcome.successes);
            errors.extend(outcome.errors);
        }

        debug_assert_eq!(successes.len() + errors.len(), total);

        Ok(BulkResult {
            summary: bulk_summary(total, &successes, errors.len()),
            billing: bulk_billing(request.tier, limits, successes.len()),
            successes,
            errors,
            chunks: chunk_count,
            external_api_calls,
        })
    }

    async fn process_chunk(
        &self,
        batch_index: usize,
        chunk: &[Input<'_>],
        risk_types: &[HazardType],
    ) -> ChunkOutcome {
        let error = |input: &Input<'_>, message: String| BulkError {
            address: input.address.to_string(),
            input_index: input.index,
            error: message,
            batch_index,
        };

        let mut outcome = ChunkOutcome::default();
        let mut keyed = Vec::with_capacity(chunk.len());
        // normalized key -> first submitted spelling
        let mut addresses = BTreeMap::<String, String>::new();

        for input in chunk {
            match normalize_address(input.address) {
                Some(key) => {
                    addresses
                        .entry(key.clone())
                        .or_insert_with(|| input.address.trim().to_string());
                    keyed.push((*input, key));
                }
                None => outcome.errors.push(error(
                    input,
                    EngineError::NotFound {
                        detail: format!("'{}' is not a geocodable address", input.address),
                    }
                    .to_string(),
                )),
            }
        }

        let mut failed = BTreeMap::new();

        let existing = self.lookup_existing(&addresses).await;
        failed.extend(existing.failed);
        let mut resolved = existing.resolved;

        let missing = addresses
            .iter()
            .filter(|(key, _)| !resolved.contains_key(*key) && !failed.contains_key(*key))
            .map(|(key, address)| (key.clone(), address.clone()))
            .collect::<Vec<_>>();

        let geocoded = self.geocode_gap(&missing).await;
        failed.extend(geocoded.failed);

        let persisted = self.persist_properties(geocoded.resolved, &addresses).await;
        failed.extend(persisted.failed);
        resolved.extend(persisted.resolved);

        let (current, stale) = self.split_current(resolved).await;

        let fresh = match self.aggregate(&stale, risk_types).await {
            Ok((fresh, api_calls)) => {
                outcome.external_api_calls = api_calls;
                fresh
            }
            Err(failure) => {
                let message = EngineError::from(failure).to_string();
                log::warn!("Chunk {batch_index} aggregation failed as a whole: {message}");
                outcome.errors = chunk
                    .iter()
                    .map(|input| error(input, message.clone()))
                    .collect();
                return outcome;
            }
        };
        failed.extend(fresh.failed);

        for (input, key) in keyed {
            let success = |property: &Property, assessment: &RiskAssessment, cached: bool| {
                BulkSuccess {
                    address: input.address.to_string(),
                    input_index: input.index,
                    property: property.clone(),
                    assessment: assessment.clone(),
                    band: assessment.band(),
                    cached,
                }
            };

            if let Some((property, assessment)) = current.get(&key) {
                outcome.successes.push(success(property, assessment, true));
            } else if let (Some(property), Some(assessment)) =
                (stale.get(&key), fresh.resolved.get(&key))
            {
                outcome.successes.push(success(property, assessment, false));
            } else {
                let message = failed
                    .get(&key)
                    .cloned()
                    .unwrap_or_else(|| format!("'{key}' could not be resolved"));
                outcome.errors.push(error(&input, message));
            }
        }

        outcome.successes.sort_by_key(|s| s.input_index);
        outcome.errors.sort_by_key(|e| e.input_index);
        outcome
    }

    /// Stage 1: stored properties by normalized key. Keys with no stored
    /// property are absent from both maps.
    async fn lookup_existing(&self, addresses: &BTreeMap<String, String>) -> Stage<Property> {
        let lookups = join_all(addresses.keys().map(|key| async move {
            (
                key.clone(),
                self.properties.find_by_normalized_address(key).await,
            )
        }))
        .await;

        let mut stage = Stage::default();
        for (key, result) in lookups {
            match result {
                Ok(Some(property)) => {
                    stage.resolved.insert(key, property);
                }
                Ok(None) => {}
                Err(e) => {
                    stage
                        .failed
                        .insert(key, EngineError::Store(e).to_string());
                }
            }
        }
        stage
    }

    /// Stage 2: geocode `(key, address)` pairs in one batch call, or one
    /// call per address if the batch call fails.
    async fn geocode_gap(&self, missing: &[(String, String)]) -> Stage<GeocodeMatch> {
        let mut stage = Stage::default();
        if missing.is_empty() {
            return stage;
        }

        let submitted = missing
            .iter()
            .map(|(_, address)| address.clone())
            .collect::<Vec<_>>();

        log::info!("Batch geocoding {} unseen addresses...", submitted.len());

        match self.geocoder.batch_geocode(&submitted).await {
            Ok(outcome) => {
                let mut by_address = outcome
                    .results
                    .into_iter()
                    .map(|item| (item.address, item.outcome))
                    .collect::<BTreeMap<_, _>>();

                for (key, address) in missing {
                    match by_address.remove(address) {
                        Some(Ok(geocoded)) => {
                            stage.resolved.insert(key.clone(), geocoded);
                        }
                        Some(Err(failure)) => {
                            stage
                                .failed
                                .insert(key.clone(), geocode_not_found(failure).to_string());
                        }
                        None => {
                            stage.failed.insert(
                                key.clone(),
                                EngineError::NotFound {
                                    detail: format!("no geocoding result returned for '{address}'"),
                                }
                                .to_string(),
                            );
                        }
                    }
                }
            }
            Err(e) => {
                log::warn!(
                    "Batch geocoding failed ({e}), falling back to {} single lookups",
                    missing.len()
                );

                let results = stream::iter(missing.iter().map(|(key, address)| async move {
                    (key.clone(), self.geocoder.geocode(address).await)
                }))
                .buffer_unordered(GEOCODE_FALLBACK_CONCURRENCY)
                .collect::<Vec<_>>()
                .await;

                for (key, result) in results {
                    match result {
                        Ok(geocoded) => {
                            stage.resolved.insert(key, geocoded);
                        }
                        Err(failure) => {
                            stage
                                .failed
                                .insert(key, geocode_not_found(failure).to_string());
                        }
                    }
                }
            }
        }

        stage
    }

    /// Stage 3: upsert newly geocoded properties.
    async fn persist_properties(
        &self,
        geocoded: BTreeMap<String, GeocodeMatch>,
        addresses: &BTreeMap<String, String>,
    ) -> Stage<Property> {
        let upserts = join_all(geocoded.into_iter().map(|(key, geocoded)| {
            let address = addresses.get(&key).cloned().unwrap_or_else(|| key.clone());
            async move {
                let result = self
                    .properties
                    .upsert_property(new_property(&address, key.clone(), geocoded))
                    .await;
                (key, result)
            }
        }))
        .await;

        let mut stage = Stage::default();
        for (key, result) in upserts {
            match result {
                Ok(property) => {
                    stage.resolved.insert(key, property);
                }
                Err(e) => {
                    stage
                        .failed
                        .insert(key, EngineError::Store(e).to_string());
                }
            }
        }
        stage
    }

    /// Stage 4: partitions resolved properties into those with a current
    /// assessment and those needing one. A failed lookup counts as needing
    /// one.
    async fn split_current(
        &self,
        resolved: BTreeMap<String, Property>,
    ) -> (
        BTreeMap<String, (Property, RiskAssessment)>,
        BTreeMap<String, Property>,
    ) {
        let lookups = join_all(resolved.into_iter().map(|(key, property)| async move {
            let result = self.assessments.lookup(property.id).await;
            (key, property, result)
        }))
        .await;

        let mut current = BTreeMap::new();
        let mut stale = BTreeMap::new();
        for (key, property, result) in lookups {
            match result {
                Ok(CachedAssessment::Current(assessment)) => {
                    current.insert(key, (property, assessment));
                }
                Ok(CachedAssessment::Expired(_) | CachedAssessment::Missing) => {
                    stale.insert(key, property);
                }
                Err(e) => {
                    log::warn!("Assessment lookup failed for '{key}', recomputing: {e}");
                    stale.insert(key, property);
                }
            }
        }
        (current, stale)
    }

    /// Stage 5: one batch aggregation for every stale property, then one
    /// persisted assessment per success.
    ///
    /// An `Err` means the batch call itself failed.
    async fn aggregate(
        &self,
        stale: &BTreeMap<String, Property>,
        risk_types: &[HazardType],
    ) -> Result<(Stage<RiskAssessment>, u32), ClimateDataFailure> {
        let mut stage = Stage::default();
        if stale.is_empty() {
            return Ok((stage, 0));
        }

        let points = stale
            .iter()
            .map(|(key, property)| AggregatePoint {
                latitude: property.latitude,
                longitude: property.longitude,
                address: key.clone(),
            })
            .collect::<Vec<_>>();

        let outcome = self.aggregator.batch_aggregate(&points, risk_types).await?;
        let mut by_key = outcome
            .results
            .into_iter()
            .map(|item| (item.address, item.outcome))
            .collect::<BTreeMap<_, _>>();

        let mut built = Vec::with_capacity(stale.len());
        for (key, property) in stale {
            match by_key.remove(key) {
                Some(Ok(data)) => {
                    let assessment =
                        self.assessments
                            .build(Some(property.id), property.coordinates(), data);
                    built.push((key.clone(), assessment));
                }
                Some(Err(failure)) => {
                    stage
                        .failed
                        .insert(key.clone(), EngineError::from(failure).to_string());
                }
                None => {
                    stage.failed.insert(
                        key.clone(),
                        EngineError::ClimateData {
                            message: "aggregator returned no result for this address".to_string(),
                            retryable: true,
                            error_source: None,
                        }
                        .to_string(),
                    );
                }
            }
        }

        let persisted = join_all(built.into_iter().map(|(key, assessment)| async move {
            let result = self.assessments.persist(&assessment).await;
            (key, assessment, result)
        }))
        .await;

        for (key, assessment, result) in persisted {
            match result {
                Ok(()) => {
                    stage.resolved.insert(key, assessment);
                }
                Err(e) => {
                    stage
                        .failed
                        .insert(key, EngineError::Store(e).to_string());
                }
            }
        }

        Ok((stage, outcome.external_api_calls))
    }
}
