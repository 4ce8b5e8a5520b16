//! Geographic radius search with a regional result cache.
//!
//! A search is answered from the regional cache when an unexpired entry
//! exists for exactly the same parameters. Otherwise the property store
//! is queried, each match is enriched with its current assessment
//! (lookup only, never the aggregator), and the full enriched list is
//! written back to the regional cache. Pagination and analytics are
//! applied to the full list on every request.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use climate_risk_config::EngineConfig;
use climate_risk_engine_models::{
    EnrichedProperty, MissingContext, PageInfo, RadiusSearchParams, RadiusSearchRequest,
    RadiusSearchResult, RegionalCacheEntry, SearchRegion, Unavailable,
};
use climate_risk_models::RiskAssessment;
use climate_risk_spatial::BoundaryIndex;
use climate_risk_store::{PropertyStore, RegionalCache, SpatialFilter, SpatialMatch};
use futures::stream::{self, StreamExt as _};

use crate::EngineError;
use crate::analytics::radius_analytics;
use crate::assessment_cache::{AssessmentCache, CachedAssessment};
use crate::clock::Clock;

/// Concurrent assessment lookups during enrichment.
const ENRICH_CONCURRENCY: usize = 16;

/// Runs radius searches.
pub struct RadiusSearch {
    properties: Arc<dyn PropertyStore>,
    assessments: Arc<AssessmentCache>,
    regional_cache: Arc<dyn RegionalCache>,
    boundaries: Option<Arc<BoundaryIndex>>,
    config: Arc<EngineConfig>,
    clock: Arc<dyn Clock>,
}

impl RadiusSearch {
    /// Creates a radius search over the given collaborators.
    #[must_use]
    pub fn new(
        properties: Arc<dyn PropertyStore>,
        assessments: Arc<AssessmentCache>,
        regional_cache: Arc<dyn RegionalCache>,
        boundaries: Option<Arc<BoundaryIndex>>,
        config: Arc<EngineConfig>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            properties,
            assessments,
            regional_cache,
            boundaries,
            config,
            clock,
        }
    }

    /// Runs a radius search.
    ///
    /// Spatial-query and boundary failures never fail the search; they are
    /// reported in [`RadiusSearchResult::missing_context`].
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidRequest`] if the center, radius,
    /// threshold, or page is out of range.
    pub async fn search(
        &self,
        request: &RadiusSearchRequest,
    ) -> Result<RadiusSearchResult, EngineError> {
        self.validate(request)?;

        let params = request.params();
        let key = cache_key(&params, self.config.cache.coordinate_precision);
        let now = self.clock.now();

        let (entry, cache_hit) = match self.cached_entry(&key, now).await {
            Some(entry) => {
                log::debug!("Regional cache hit for {key}");
                (entry, true)
            }
            None => {
                log::debug!("Regional cache miss for {key}");
                (self.compute(&key, params, now).await, false)
            }
        };

        let page_size = request
            .page_size
            .unwrap_or(self.config.radius.default_page_size)
            .min(self.config.radius.max_page_size);
        let (page, properties) = paginate(&entry.properties, request.page.unwrap_or(1), page_size);

        Ok(RadiusSearchResult {
            params,
            analytics: radius_analytics(&entry.properties, params.radius_meters),
            properties,
            page,
            region: entry.region,
            missing_context: entry.missing_context,
            cache_hit,
        })
    }

    fn validate(&self, request: &RadiusSearchRequest) -> Result<(), EngineError> {
        if !request.center.is_valid() {
            return Err(EngineError::invalid(format!(
                "center ({}, {}) is not a valid coordinate",
                request.center.latitude, request.center.longitude
            )));
        }
        let max_radius = self.config.radius.max_radius_meters;
        if !request.radius_meters.is_finite()
            || request.radius_meters <= 0.0
            || request.radius_meters > max_radius
        {
            return Err(EngineError::invalid(format!(
                "radius must be in (0, {max_radius}] meters, got {}",
                request.radius_meters
            )));
        }
        if request.risk_threshold.is_some_and(|t| !t.is_finite()) {
            return Err(EngineError::invalid("risk threshold must be a finite number"));
        }
        if request.page == Some(0) {
            return Err(EngineError::invalid("page numbers start at 1"));
        }
        if request.page_size == Some(0) {
            return Err(EngineError::invalid("page size must be positive"));
        }
        Ok(())
    }

    /// Returns the cached entry for `key` if it is unexpired and its
    /// parameters round to the same key.
    async fn cached_entry(&self, key: &str, now: DateTime<Utc>) -> Option<RegionalCacheEntry> {
        let value = match self.regional_cache.get(key).await {
            Ok(value) => value?,
            Err(e) => {
                log::warn!("Regional cache read failed for {key}: {e}");
                return None;
            }
        };

        let entry = match serde_json::from_value::<RegionalCacheEntry>(value) {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("Discarding unreadable regional cache entry {key}: {e}");
                return None;
            }
        };

        let ttl = chrono::Duration::from_std(self.config.regional_ttl())
            .unwrap_or(chrono::Duration::MAX);
        if entry
            .cached_at
            .checked_add_signed(ttl)
            .is_some_and(|expires_at| now >= expires_at)
        {
            log::debug!("Regional cache entry {key} is stale");
            return None;
        }
        if cache_key(&entry.params, self.config.cache.coordinate_precision) != key {
            log::debug!("Regional cache entry {key} was computed for another region");
            return None;
        }

        Some(entry)
    }

    async fn compute(
        &self,
        key: &str,
        params: RadiusSearchParams,
        now: DateTime<Utc>,
    ) -> RegionalCacheEntry {
        let mut missing_context = Vec::new();

        let region = self.region_for(&params);
        if region.is_none() {
            missing_context.push(MissingContext::Boundary);
        }

        let filter = SpatialFilter {
            min_overall_score: params.risk_threshold,
            property_type: params.property_type,
            max_results: self.config.radius.max_results,
            as_of: now,
        };

        let matches = match self
            .properties
            .find_within_radius(params.center, params.radius_meters, &filter)
            .await
        {
            Ok(matches) => Some(matches),
            Err(e) => {
                log::warn!(
                    "Spatial query failed for ({}, {}) r={}m: {e}",
                    params.center.latitude,
                    params.center.longitude,
                    params.radius_meters
                );
                missing_context.push(MissingContext::SpatialQuery);
                None
            }
        };

        let spatial_ok = matches.is_some();
        let properties = match matches {
            Some(matches) => self.enrich(matches, params.risk_threshold, now).await,
            None => Vec::new(),
        };

        let entry = RegionalCacheEntry {
            params,
            properties,
            region,
            missing_context,
            cached_at: now,
        };

        if spatial_ok {
            self.write_through(key, &entry).await;
        }

        entry
    }

    fn region_for(&self, params: &RadiusSearchParams) -> Option<SearchRegion> {
        let Some(index) = &self.boundaries else {
            log::debug!("No boundary index configured");
            return None;
        };
        index.lookup(params.center).map(|region| SearchRegion {
            id: region.id.clone(),
            name: region.name.clone(),
            kind: region.kind.clone(),
        })
    }

    /// Attaches the current assessment to every match, preserving order.
    /// Re-applies the threshold once every score is known; properties
    /// without a current assessment survive only when no threshold is set.
    async fn enrich(
        &self,
        matches: Vec<SpatialMatch>,
        threshold: Option<f64>,
        now: DateTime<Utc>,
    ) -> Vec<EnrichedProperty> {
        let enriched = stream::iter(
            matches
                .into_iter()
                .map(|spatial_match| self.enrich_one(spatial_match, now)),
        )
        .buffered(ENRICH_CONCURRENCY)
        .collect::<Vec<_>>()
        .await;

        enriched
            .into_iter()
            .filter(|p| match (&p.assessment, threshold) {
                (_, None) => true,
                (Some(assessment), Some(min)) => assessment.overall_score >= min,
                (None, Some(_)) => false,
            })
            .collect()
    }

    async fn enrich_one(
        &self,
        spatial_match: SpatialMatch,
        now: DateTime<Utc>,
    ) -> EnrichedProperty {
        let SpatialMatch {
            property,
            distance_meters,
            embedded_assessment,
        } = spatial_match;

        let outcome: Result<RiskAssessment, Unavailable> =
            match embedded_assessment.filter(|a| a.is_current(now)) {
                Some(assessment) => Ok(assessment),
                None => match self.assessments.lookup(property.id).await {
                    Ok(CachedAssessment::Current(assessment)) => Ok(assessment),
                    Ok(CachedAssessment::Expired(_)) => Err(Unavailable::Expired),
                    Ok(CachedAssessment::Missing) => Err(Unavailable::Missing),
                    Err(e) => {
                        log::warn!(
                            "Assessment lookup failed for {}: {e}",
                            property.normalized_address
                        );
                        Err(Unavailable::LookupFailed)
                    }
                },
            };

        match outcome {
            Ok(assessment) => EnrichedProperty {
                property,
                distance_meters,
                band: Some(assessment.band()),
                assessment: Some(assessment),
                unavailable: None,
            },
            Err(reason) => EnrichedProperty {
                property,
                distance_meters,
                assessment: None,
                band: None,
                unavailable: Some(reason),
            },
        }
    }

    async fn write_through(&self, key: &str, entry: &RegionalCacheEntry) {
        let value = match serde_json::to_value(entry) {
            Ok(value) => value,
            Err(e) => {
                log::warn!("Failed to serialize regional cache entry {key}: {e}");
                return;
            }
        };
        if let Err(e) = self
            .regional_cache
            .set(key, value, self.config.regional_ttl())
            .await
        {
            log::warn!("Regional cache write failed for {key}: {e}");
        }
    }
}

/// Builds the deterministic regional cache key for a set of parameters.
///
/// The center is rounded to `precision` decimal places so nearby centers
/// share one entry.
#[must_use]
pub fn cache_key(params: &RadiusSearchParams, precision: usize) -> String {
    let threshold = params
        .risk_threshold
        .map_or_else(|| "none".to_string(), |t| t.to_string());
    let property_type = params
        .property_type
        .map_or_else(|| "all".to_string(), |t| t.to_string());

    format!(
        "radius_search:{lat:.precision$}:{lon:.precision$}:{radius}:{threshold}:{property_type}",
        lat = params.center.latitude,
        lon = params.center.longitude,
        radius = params.radius_meters,
    )
}

/// Slices one page out of `items`. Pages past the end are empty.
#[must_use]
pub fn paginate<T: Clone>(items: &[T], page: usize, page_size: usize) -> (PageInfo, Vec<T>) {
    let total_results = items.len();
    let total_pages = total_results.div_ceil(page_size);
    let start = page.saturating_sub(1).saturating_mul(page_size);
    let slice = items
        .iter()
        .skip(start)
        .take(page_size)
        .cloned()
        .collect::<Vec<_>>();

    (
        PageInfo {
            page,
            page_size,
            total_results,
            total_pages,
            has_more: page < total_pages,
        },
        slice,
    )
}
