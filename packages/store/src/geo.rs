//! Great-circle distance helpers.

use climate_risk_models::Coordinates;

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Meters spanned by one degree of latitude on the haversine sphere.
const METERS_PER_DEGREE: f64 = EARTH_RADIUS_METERS * std::f64::consts::PI / 180.0;

/// Haversine distance between two points, in meters.
#[must_use]
pub fn haversine_meters(a: Coordinates, b: Coordinates) -> f64 {
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lng = (b.longitude - a.longitude).to_radians();
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_METERS * h.sqrt().asin()
}

/// Returns `(min_lng, min_lat, max_lng, max_lat)` of a box that contains
/// every point within `radius_meters` of `center`.
///
/// Near the poles the longitude span widens to the full range.
#[must_use]
pub fn bounding_box(center: Coordinates, radius_meters: f64) -> (f64, f64, f64, f64) {
    let lat_delta = radius_meters / METERS_PER_DEGREE;
    let cos_lat = center.latitude.to_radians().cos();
    let lng_delta = if cos_lat < 1e-6 {
        180.0
    } else {
        (radius_meters / (METERS_PER_DEGREE * cos_lat)).min(180.0)
    };

    (
        center.longitude - lng_delta,
        (center.latitude - lat_delta).max(-90.0),
        center.longitude + lng_delta,
        (center.latitude + lat_delta).min(90.0),
    )
}

/// Splits the [`bounding_box`] of a search circle into boxes that stay
/// within `[-180, 180]` longitude.
///
/// A circle crossing the antimeridian yields two disjoint boxes, one on
/// each side. A box spanning the full circle of longitude yields one box
/// covering every longitude.
#[must_use]
pub fn search_envelopes(center: Coordinates, radius_meters: f64) -> Vec<(f64, f64, f64, f64)> {
    let (min_lng, min_lat, max_lng, max_lat) = bounding_box(center, radius_meters);

    if max_lng - min_lng >= 360.0 {
        vec![(-180.0, min_lat, 180.0, max_lat)]
    } else if min_lng < -180.0 {
        vec![
            (min_lng + 360.0, min_lat, 180.0, max_lat),
            (-180.0, min_lat, max_lng, max_lat),
        ]
    } else if max_lng > 180.0 {
        vec![
            (min_lng, min_lat, 180.0, max_lat),
            (-180.0, min_lat, max_lng - 360.0, max_lat),
        ]
    } else {
        vec![(min_lng, min_lat, max_lng, max_lat)]
    }
}
