//! In-process property and assessment store.
//!
//! Properties live in a map keyed by id with a secondary index on
//! normalized address. Coordinates are mirrored into an R-tree so radius
//! queries only test candidates inside the bounding box of the search
//! circle. The latest assessment per property is joined into radius
//! results when it is still current.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use climate_risk_models::{Coordinates, NewProperty, Property, RiskAssessment};
use rstar::{AABB, RTree, primitives::GeomWithData};
use uuid::Uuid;

use crate::geo::{haversine_meters, search_envelopes};
use crate::{
    PropertyStore, RiskAssessmentStore, SpatialFilter, SpatialMatch, StoreError,
};

/// `[lng, lat]` point tagged with its property id.
type IndexedPoint = GeomWithData<[f64; 2], Uuid>;

#[derive(Default)]
struct Inner {
    properties: BTreeMap<Uuid, Property>,
    by_address: BTreeMap<String, Uuid>,
    points: RTree<IndexedPoint>,
    assessments: BTreeMap<Uuid, RiskAssessment>,
}

/// Thread-safe in-memory implementation of [`PropertyStore`] and
/// [`RiskAssessmentStore`].
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (properties, assessments) = self
            .inner
            .read()
            .map_or((0, 0), |inner| (inner.properties.len(), inner.assessments.len()));
        f.debug_struct("MemoryStore")
            .field("properties", &properties)
            .field("assessments", &assessments)
            .finish()
    }
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored properties.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Poisoned`] if the lock was poisoned.
    pub fn property_count(&self) -> Result<usize, StoreError> {
        Ok(self.inner.read()?.properties.len())
    }

    /// Number of stored assessments.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Poisoned`] if the lock was poisoned.
    pub fn assessment_count(&self) -> Result<usize, StoreError> {
        Ok(self.inner.read()?.assessments.len())
    }
}

#[async_trait]
impl PropertyStore for MemoryStore {
    async fn find_by_normalized_address(
        &self,
        normalized_address: &str,
    ) -> Result<Option<Property>, StoreError> {
        let inner = self.inner.read()?;
        Ok(inner
            .by_address
            .get(normalized_address)
            .and_then(|id| inner.properties.get(id))
            .cloned())
    }

    async fn upsert_property(&self, new: NewProperty) -> Result<Property, StoreError> {
        let mut inner = self.inner.write()?;
        let now = Utc::now();

        let existing = inner
            .by_address
            .get(&new.normalized_address)
            .and_then(|id| inner.properties.get(id))
            .cloned();

        let property = match existing {
            Some(old) => {
                inner
                    .points
                    .remove(&IndexedPoint::new([old.longitude, old.latitude], old.id));
                Property {
                    id: old.id,
                    normalized_address: new.normalized_address,
                    address: new.address,
                    latitude: new.latitude,
                    longitude: new.longitude,
                    city: new.city.or(old.city),
                    state: new.state.or(old.state),
                    zip: new.zip.or(old.zip),
                    property_type: new.property_type.or(old.property_type),
                    geocode_accuracy: new.geocode_accuracy,
                    geocode_source: new.geocode_source,
                    created_at: old.created_at,
                    updated_at: now,
                }
            }
            None => Property {
                id: Uuid::new_v4(),
                normalized_address: new.normalized_address,
                address: new.address,
                latitude: new.latitude,
                longitude: new.longitude,
                city: new.city,
                state: new.state,
                zip: new.zip,
                property_type: new.property_type,
                geocode_accuracy: new.geocode_accuracy,
                geocode_source: new.geocode_source,
                created_at: now,
                updated_at: now,
            },
        };

        inner
            .points
            .insert(IndexedPoint::new([property.longitude, property.latitude], property.id));
        inner
            .by_address
            .insert(property.normalized_address.clone(), property.id);
        inner.properties.insert(property.id, property.clone());

        Ok(property)
    }

    async fn find_within_radius(
        &self,
        center: Coordinates,
        radius_meters: f64,
        filter: &SpatialFilter,
    ) -> Result<Vec<SpatialMatch>, StoreError> {
        let inner = self.inner.read()?;
        let envelopes = search_envelopes(center, radius_meters)
            .into_iter()
            .map(|(min_lng, min_lat, max_lng, max_lat)| {
                AABB::from_corners([min_lng, min_lat], [max_lng, max_lat])
            })
            .collect::<Vec<_>>();

        let mut matches = envelopes
            .iter()
            .flat_map(|envelope| inner.points.locate_in_envelope(envelope))
            .filter_map(|point| inner.properties.get(&point.data))
            .filter(|property| {
                filter
                    .property_type
                    .is_none_or(|wanted| property.property_type == Some(wanted))
            })
            .filter_map(|property| {
                let distance_meters = haversine_meters(center, property.coordinates());
                if distance_meters > radius_meters {
                    return None;
                }

                let embedded_assessment = inner
                    .assessments
                    .get(&property.id)
                    .filter(|a| a.is_current(filter.as_of))
                    .cloned();

                if let (Some(min), Some(assessment)) =
                    (filter.min_overall_score, &embedded_assessment)
                    && assessment.overall_score < min
                {
                    return None;
                }

                Some(SpatialMatch {
                    property: property.clone(),
                    distance_meters,
                    embedded_assessment,
                })
            })
            .collect::<Vec<_>>();

        matches.sort_by(|a, b| a.distance_meters.total_cmp(&b.distance_meters));
        matches.truncate(filter.max_results);

        log::debug!(
            "Radius query ({}, {}) r={radius_meters}m matched {} properties",
            center.latitude,
            center.longitude,
            matches.len()
        );

        Ok(matches)
    }
}

#[async_trait]
impl RiskAssessmentStore for MemoryStore {
    async fn get_current(&self, property_id: Uuid) -> Result<Option<RiskAssessment>, StoreError> {
        Ok(self.inner.read()?.assessments.get(&property_id).cloned())
    }

    async fn upsert(&self, assessment: &RiskAssessment) -> Result<(), StoreError> {
        let Some(property_id) = assessment.property_id else {
            return Err(StoreError::Backend {
                message: "cannot persist an assessment without a property".to_string(),
            });
        };

        let mut inner = self.inner.write()?;
        if !inner.properties.contains_key(&property_id) {
            return Err(StoreError::UnknownProperty { id: property_id });
        }
        inner.assessments.insert(property_id, assessment.clone());
        Ok(())
    }
}
