use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::location::{Coordinates, LocationInput, LocationType};

/// What the buyer wants done: either free text or a structured descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServiceDescription {
    Text(String),
    Structured(Map<String, Value>),
}

impl ServiceDescription {
    /// Stable string form handed to the capability classifier.
    ///
    /// Structured descriptors render as compact JSON with sorted keys.
    pub fn canonical(&self) -> String {
        match self {
            Self::Text(text) => text.trim().to_string(),
            Self::Structured(map) => {
                let sorted: std::collections::BTreeMap<_, _> = map.iter().collect();
                serde_json::to_string(&sorted).unwrap_or_default()
            }
        }
    }

    pub fn is_blank(&self) -> bool {
        match self {
            Self::Text(text) => text.trim().is_empty(),
            Self::Structured(map) => map.is_empty(),
        }
    }
}

/// Bid status stored as a lowercase string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BidStatus {
    Open,
    Claimed,
    Cancelled,
    Expired,
}

impl std::fmt::Display for BidStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Open => "open",
            Self::Claimed => "claimed",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// Recorded on the bid in the same write that claims it, so the job can be
/// rebuilt from the bid alone if materialization fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BidClaim {
    pub job_id: Uuid,
    pub provider_id: Uuid,
    pub seat_id: String,
    pub claimed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bid {
    pub id: Uuid,
    pub buyer_id: Uuid,
    pub service: ServiceDescription,
    pub category: Option<String>,
    pub price: f64,
    pub currency: String,
    pub payment_method: Option<String>,
    pub location_type: LocationType,
    pub coordinates: Option<Coordinates>,
    pub address: Option<String>,
    pub posted_at: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: BidStatus,
    pub claim: Option<BidClaim>,
}

impl Bid {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.end_time <= now
    }

    /// Open and not yet past its end time.
    pub fn is_available_at(&self, now: DateTime<Utc>) -> bool {
        self.status == BidStatus::Open && !self.is_expired_at(now)
    }
}

// ── DTOs ──

/// Request body for POST /api/submit_bid. `buyer_id` comes from the JWT.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateBid {
    pub service: ServiceDescription,
    pub price: f64,
    pub currency: Option<String>,
    pub payment_method: Option<String>,
    pub category: Option<String>,
    /// Defaults to physical when omitted.
    pub location_type: Option<LocationType>,
    #[serde(flatten)]
    pub location: LocationInput,
    /// Unix timestamp in seconds.
    pub end_time: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CancelBid {
    pub bid_id: Uuid,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BidFilter {
    pub category: Option<String>,
    pub location_type: Option<LocationType>,
    pub buyer_id: Option<Uuid>,
    pub limit: Option<usize>,
}

impl BidFilter {
    pub fn matches(&self, bid: &Bid) -> bool {
        if let Some(category) = &self.category {
            if bid.category.as_ref() != Some(category) {
                return false;
            }
        }
        if let Some(location_type) = self.location_type {
            if bid.location_type != location_type {
                return false;
            }
        }
        if let Some(buyer_id) = self.buyer_id {
            if bid.buyer_id != buyer_id {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NearbyQuery {
    #[serde(flatten)]
    pub location: LocationInput,
    /// Miles; defaults to the configured search radius.
    pub radius: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NearbyBid {
    #[serde(flatten)]
    pub bid: Bid,
    /// Miles, rounded to two decimals.
    pub distance: f64,
}
