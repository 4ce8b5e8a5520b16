#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! In-memory boundary index for radius-search context.
//!
//! Loads region polygons (counties, flood zones, service areas) from a
//! `GeoJSON` `FeatureCollection`, builds an R-tree over their bounding boxes,
//! and answers "which region contains this point" with exact
//! point-in-polygon tests. Overlapping regions resolve to the smallest one.

use std::path::Path;

use climate_risk_models::Coordinates;
use geo::{Area, BoundingRect, Contains, MultiPolygon};
use geojson::{Feature, GeoJson, feature::Id};
use rstar::{AABB, RTree, RTreeObject};
use serde::{Deserialize, Serialize};

/// Errors from building a [`BoundaryIndex`].
#[derive(Debug, thiserror::Error)]
pub enum BoundaryError {
    /// Reading the boundary file failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The input was not valid `GeoJSON`.
    #[error("GeoJSON error: {0}")]
    GeoJson(#[from] geojson::Error),

    /// The input parsed but was not a `FeatureCollection` or `Feature`.
    #[error("Expected a GeoJSON FeatureCollection, got {kind}")]
    UnexpectedType {
        /// What the input actually was.
        kind: &'static str,
    },
}

/// A named region from the boundary file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundaryRegion {
    /// Stable identifier (a FIPS code, zone id, etc.).
    pub id: String,
    /// Display name. Falls back to the id.
    pub name: String,
    /// Optional category such as `"county"` or `"flood_zone"`.
    pub kind: Option<String>,
}

/// A region polygon stored in the R-tree with its metadata.
struct BoundaryEntry {
    region: BoundaryRegion,
    area: f64,
    envelope: AABB<[f64; 2]>,
    polygon: MultiPolygon<f64>,
}

impl RTreeObject for BoundaryEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// Pre-built spatial index over region polygons.
///
/// Constructed once and shared across radius searches.
pub struct BoundaryIndex {
    regions: RTree<BoundaryEntry>,
}

impl std::fmt::Debug for BoundaryIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundaryIndex")
            .field("regions", &self.regions.size())
            .finish()
    }
}

impl BoundaryIndex {
    /// Reads a `GeoJSON` file and builds the index.
    ///
    /// # Errors
    ///
    /// Returns [`BoundaryError`] if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, BoundaryError> {
        let contents = std::fs::read_to_string(path)?;
        let index = Self::from_geojson(&contents)?;
        log::info!(
            "Loaded {} boundary regions from {}",
            index.len(),
            path.display()
        );
        Ok(index)
    }

    /// Builds the index from a `GeoJSON` string.
    ///
    /// Features without an identifier or without a polygonal geometry are
    /// skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`BoundaryError`] if the string is not a `GeoJSON`
    /// `FeatureCollection` or `Feature`.
    pub fn from_geojson(geojson_str: &str) -> Result<Self, BoundaryError> {
        let features = match geojson_str.parse::<GeoJson>()? {
            GeoJson::FeatureCollection(fc) => fc.features,
            GeoJson::Feature(feature) => vec![feature],
            GeoJson::Geometry(_) => {
                return Err(BoundaryError::UnexpectedType { kind: "Geometry" });
            }
        };

        let entries = features
            .into_iter()
            .filter_map(|feature| {
                let entry = feature_to_entry(feature);
                if entry.is_none() {
                    log::warn!("Skipping boundary feature without id or polygon geometry");
                }
                entry
            })
            .collect::<Vec<_>>();

        Ok(Self {
            regions: RTree::bulk_load(entries),
        })
    }

    /// Number of indexed regions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.regions.size()
    }

    /// Returns `true` if no regions were indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.regions.size() == 0
    }

    /// Looks up the region containing a point.
    ///
    /// Regions can overlap; the smallest area wins.
    #[must_use]
    pub fn lookup(&self, coordinates: Coordinates) -> Option<&BoundaryRegion> {
        let point = geo::Point::new(coordinates.longitude, coordinates.latitude);
        let query_env = AABB::from_point([coordinates.longitude, coordinates.latitude]);

        self.regions
            .locate_in_envelope_intersecting(&query_env)
            .filter(|entry| entry.polygon.contains(&point))
            .min_by(|a, b| a.area.total_cmp(&b.area))
            .map(|entry| &entry.region)
    }
}

fn feature_to_entry(feature: Feature) -> Option<BoundaryEntry> {
    let id = feature
        .property("id")
        .and_then(|v| v.as_str().map(String::from))
        .or_else(|| match &feature.id {
            Some(Id::String(s)) => Some(s.clone()),
            Some(Id::Number(n)) => Some(n.to_string()),
            None => None,
        })?;

    let name = feature
        .property("name")
        .and_then(|v| v.as_str())
        .map_or_else(|| id.clone(), String::from);
    let kind = feature
        .property("kind")
        .and_then(|v| v.as_str())
        .map(String::from);

    let geo_geom: geo::Geometry<f64> = feature.geometry?.try_into().ok()?;
    let polygon = match geo_geom {
        geo::Geometry::MultiPolygon(mp) => mp,
        geo::Geometry::Polygon(p) => MultiPolygon(vec![p]),
        _ => return None,
    };

    let rect = polygon.bounding_rect()?;
    let envelope = AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]);

    Some(BoundaryEntry {
        region: BoundaryRegion { id, name, kind },
        area: polygon.unsigned_area(),
        envelope,
        polygon,
    })
}
