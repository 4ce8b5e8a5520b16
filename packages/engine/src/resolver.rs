//! Address to property resolution.

use std::sync::Arc;

use climate_risk_geocoder::address::normalize_address;
use climate_risk_geocoder::{GeocodeFailure, GeocodeMatch, GeocodingGateway};
use climate_risk_models::{NewProperty, Property};
use climate_risk_store::PropertyStore;

use crate::EngineError;

/// Resolves addresses to stored properties, geocoding only unseen ones.
pub struct PropertyResolver {
    properties: Arc<dyn PropertyStore>,
    geocoder: Arc<dyn GeocodingGateway>,
}

impl PropertyResolver {
    /// Creates a resolver over the given store and gateway.
    #[must_use]
    pub fn new(properties: Arc<dyn PropertyStore>, geocoder: Arc<dyn GeocodingGateway>) -> Self {
        Self {
            properties,
            geocoder,
        }
    }

    /// Returns the property for `address`, geocoding and persisting it on
    /// first sight. Makes at most one geocode call and never retries.
    ///
    /// # Errors
    ///
    /// * [`EngineError::NotFound`] if the address is empty, a placeholder,
    ///   or the geocoder cannot locate it
    /// * [`EngineError::Store`] if the property store fails
    pub async fn resolve(&self, address: &str) -> Result<Property, EngineError> {
        let Some(normalized) = normalize_address(address) else {
            return Err(EngineError::NotFound {
                detail: format!("'{address}' is not a geocodable address"),
            });
        };

        if let Some(existing) = self
            .properties
            .find_by_normalized_address(&normalized)
            .await?
        {
            log::debug!("Resolved '{normalized}' from the property store");
            return Ok(existing);
        }

        log::info!("Geocoding unseen address '{normalized}'");
        let geocoded = self
            .geocoder
            .geocode(address)
            .await
            .map_err(geocode_not_found)?;

        let property = self
            .properties
            .upsert_property(new_property(address, normalized, geocoded))
            .await?;
        Ok(property)
    }
}

/// Maps a geocode failure to the error reported for the address.
pub(crate) fn geocode_not_found(failure: GeocodeFailure) -> EngineError {
    EngineError::NotFound {
        detail: failure.to_string(),
    }
}

/// Builds the upsert payload for a freshly geocoded address.
pub(crate) fn new_property(
    address: &str,
    normalized: String,
    geocoded: GeocodeMatch,
) -> NewProperty {
    NewProperty {
        normalized_address: normalized,
        address: address.trim().to_string(),
        latitude: geocoded.latitude,
        longitude: geocoded.longitude,
        city: geocoded.city,
        state: geocoded.state,
        zip: geocoded.zip,
        property_type: None,
        geocode_accuracy: geocoded.accuracy,
        geocode_source: geocoded.source,
    }
}
