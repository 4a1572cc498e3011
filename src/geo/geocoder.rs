use async_trait::async_trait;
use moka::future::Cache;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::ExchangeResult;
use crate::models::location::{Coordinates, LocationInput};

#[derive(Debug, Error)]
pub enum GeocodeError {
    #[error("Geocoder request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Geocoder returned HTTP {0}")]
    Status(reqwest::StatusCode),

    #[error("Geocoder returned malformed coordinates: {0}")]
    Malformed(String),
}

/// Turns a free-text address into coordinates.
#[async_trait]
pub trait Geocoder: Send + Sync {
    /// `Ok(None)` means the address is unknown to the geocoder.
    async fn geocode(&self, address: &str) -> Result<Option<Coordinates>, GeocodeError>;
}

#[derive(Debug, Deserialize)]
struct NominatimPlace {
    lat: String,
    lon: String,
}

/// Geocoder backed by a Nominatim-compatible search endpoint.
#[derive(Clone)]
pub struct NominatimGeocoder {
    cache: Arc<Cache<String, Coordinates>>,
    search_url: String,
    client: reqwest::Client,
}

impl NominatimGeocoder {
    pub fn new(search_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .user_agent("service-exchange")
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        let cache = Arc::new(
            Cache::builder()
                .time_to_live(Duration::from_secs(24 * 3600))
                .max_capacity(10_000)
                .build(),
        );

        Self {
            cache,
            search_url: search_url.to_string(),
            client,
        }
    }
}

#[async_trait]
impl Geocoder for NominatimGeocoder {
    async fn geocode(&self, address: &str) -> Result<Option<Coordinates>, GeocodeError> {
        let key = address.trim().to_lowercase();
        if let Some(cached) = self.cache.get(&key).await {
            return Ok(Some(cached));
        }

        debug!("Geocoding {address:?} via {}", self.search_url);

        let response = self
            .client
            .get(&self.search_url)
            .query(&[("q", address), ("format", "json"), ("limit", "1")])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(GeocodeError::Status(status));
        }

        let places: Vec<NominatimPlace> = response.json().await?;
        let Some(place) = places.into_iter().next() else {
            return Ok(None);
        };

        let lat = place
            .lat
            .parse::<f64>()
            .map_err(|e| GeocodeError::Malformed(format!("lat {:?}: {e}", place.lat)))?;
        let lon = place
            .lon
            .parse::<f64>()
            .map_err(|e| GeocodeError::Malformed(format!("lon {:?}: {e}", place.lon)))?;
        let coordinates = Coordinates::new(lat, lon)
            .map_err(|e| GeocodeError::Malformed(e.to_string()))?;

        self.cache.insert(key, coordinates).await;
        Ok(Some(coordinates))
    }
}

/// Coordinates for a request location, geocoding the address if needed.
///
/// Explicit coordinates win. An address the geocoder cannot resolve (or a
/// geocoder failure) yields `Ok(None)`; only malformed coordinates are errors.
pub async fn resolve_location(
    geocoder: &dyn Geocoder,
    location: &LocationInput,
) -> ExchangeResult<Option<Coordinates>> {
    if let Some(coordinates) = location.coordinates()? {
        return Ok(Some(coordinates));
    }
    let Some(address) = location.address() else {
        return Ok(None);
    };
    match geocoder.geocode(&address).await {
        Ok(found) => {
            if found.is_none() {
                debug!("Address {address:?} did not resolve");
            }
            Ok(found)
        }
        Err(e) => {
            warn!("Geocoding error for {address:?}: {e}");
            Ok(None)
        }
    }
}
