//! Great-circle distance and radius filtering.
//!
//! Everything here is pure. Address resolution lives in [`geocoder`] and is
//! done by callers before they reach these functions.

pub mod geocoder;

use crate::models::location::Coordinates;

pub use self::geocoder::{GeocodeError, Geocoder, NominatimGeocoder, resolve_location};

/// Mean Earth radius in miles.
pub const EARTH_RADIUS_MILES: f64 = 3958.8;

/// Haversine distance between two points, in miles.
pub fn distance_miles(a: Coordinates, b: Coordinates) -> f64 {
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lon = (b.lon - a.lon).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_MILES * h.sqrt().min(1.0).asin()
}

/// Distance with unknown endpoints treated as unreachable.
pub fn distance_or_infinite(a: Option<Coordinates>, b: Option<Coordinates>) -> f64 {
    match (a, b) {
        (Some(a), Some(b)) => distance_miles(a, b),
        _ => f64::INFINITY,
    }
}

pub fn within_radius(a: Option<Coordinates>, b: Option<Coordinates>, radius_miles: f64) -> bool {
    distance_or_infinite(a, b) <= radius_miles
}

/// Keep the items within `radius_miles` of `origin`, paired with their distance.
pub fn filter_by_radius<T>(
    origin: Coordinates,
    items: impl IntoIterator<Item = T>,
    radius_miles: f64,
    location_of: impl Fn(&T) -> Option<Coordinates>,
) -> Vec<(T, f64)> {
    items
        .into_iter()
        .filter_map(|item| {
            let distance = distance_or_infinite(Some(origin), location_of(&item));
            (distance <= radius_miles).then_some((item, distance))
        })
        .collect()
}
