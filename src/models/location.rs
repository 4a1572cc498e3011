use serde::{Deserialize, Serialize};

use crate::error::{ExchangeError, ExchangeResult};

/// Where a service is performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationType {
    Remote,
    Physical,
    Hybrid,
}

impl LocationType {
    /// Physical and hybrid work needs both parties within reach of each other.
    pub fn is_location_bound(self) -> bool {
        !matches!(self, Self::Remote)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lon: f64) -> ExchangeResult<Self> {
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(ExchangeError::Validation(format!(
                "Latitude {lat} is out of range"
            )));
        }
        if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
            return Err(ExchangeError::Validation(format!(
                "Longitude {lon} is out of range"
            )));
        }
        Ok(Self { lat, lon })
    }
}

/// Location fields as they arrive on the wire: `lat`/`lon` and/or `address`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LocationInput {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub address: Option<String>,
}

impl LocationInput {
    pub fn coordinates(&self) -> ExchangeResult<Option<Coordinates>> {
        match (self.lat, self.lon) {
            (Some(lat), Some(lon)) => Coordinates::new(lat, lon).map(Some),
            (None, None) => Ok(None),
            _ => Err(ExchangeError::Validation(
                "lat and lon must be supplied together".to_string(),
            )),
        }
    }

    /// The address, if present and not blank.
    pub fn address(&self) -> Option<String> {
        self.address
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_string)
    }

    pub fn is_empty(&self) -> bool {
        self.lat.is_none() && self.lon.is_none() && self.address().is_none()
    }
}
