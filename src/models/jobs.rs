use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::bids::{Bid, BidClaim, ServiceDescription};
use super::location::{Coordinates, LocationInput, LocationType};
use super::seats::SeatCredential;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Active,
    Completed,
}

/// Which side of a job a user is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Party {
    Buyer,
    Provider,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub bid_id: Uuid,
    pub buyer_id: Uuid,
    pub provider_id: Uuid,
    pub seat_id: String,
    pub service: ServiceDescription,
    pub price: f64,
    pub currency: String,
    pub payment_method: Option<String>,
    pub location_type: LocationType,
    pub coordinates: Option<Coordinates>,
    pub address: Option<String>,
    pub accepted_at: DateTime<Utc>,
    pub status: JobStatus,
    pub buyer_rating: Option<u8>,
    pub provider_rating: Option<u8>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Reputation changes committed with a rating but not yet applied.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending_reputation: Vec<ReputationCredit>,
}

/// A reputation change a job owes one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ReputationCredit {
    Rating { user_id: Uuid, stars: u8 },
    Completion { user_id: Uuid },
}

impl ReputationCredit {
    pub fn user_id(&self) -> Uuid {
        match self {
            Self::Rating { user_id, .. } | Self::Completion { user_id } => *user_id,
        }
    }

    /// Identifies this credit among everything applied to the user. A user is
    /// rated at most once per job and completes it once.
    pub fn marker(&self, job_id: Uuid) -> String {
        match self {
            Self::Rating { .. } => format!("{job_id}:rating"),
            Self::Completion { .. } => format!("{job_id}:completion"),
        }
    }
}

impl Job {
    /// Build the job a claimed bid stands for.
    pub fn from_claim(bid: &Bid, claim: &BidClaim) -> Self {
        Self {
            id: claim.job_id,
            bid_id: bid.id,
            buyer_id: bid.buyer_id,
            provider_id: claim.provider_id,
            seat_id: claim.seat_id.clone(),
            service: bid.service.clone(),
            price: bid.price,
            currency: bid.currency.clone(),
            payment_method: bid.payment_method.clone(),
            location_type: bid.location_type,
            coordinates: bid.coordinates,
            address: bid.address.clone(),
            accepted_at: claim.claimed_at,
            status: JobStatus::Active,
            buyer_rating: None,
            provider_rating: None,
            completed_at: None,
            pending_reputation: Vec::new(),
        }
    }

    pub fn party_of(&self, user_id: Uuid) -> Option<Party> {
        if user_id == self.buyer_id {
            Some(Party::Buyer)
        } else if user_id == self.provider_id {
            Some(Party::Provider)
        } else {
            None
        }
    }

    /// The rating a party has given, if any.
    pub fn rating_by(&self, party: Party) -> Option<u8> {
        match party {
            Party::Buyer => self.buyer_rating,
            Party::Provider => self.provider_rating,
        }
    }

    /// The user a given party's rating is about.
    pub fn counterparty_of(&self, party: Party) -> Uuid {
        match party {
            Party::Buyer => self.provider_id,
            Party::Provider => self.buyer_id,
        }
    }
}

// ── DTOs ──

/// Request body for POST /api/grab_job.
#[derive(Debug, Clone, Deserialize)]
pub struct GrabJobRequest {
    pub seat: SeatCredential,
    pub capabilities: String,
    /// Defaults to remote, i.e. no location constraint.
    pub location_type: Option<LocationType>,
    #[serde(flatten)]
    pub location: LocationInput,
    /// Miles; defaults to the configured search radius.
    pub max_distance: Option<f64>,
}

/// Request body for POST /api/sign_job.
#[derive(Debug, Clone, Deserialize)]
pub struct SignJob {
    pub job_id: Uuid,
    pub star_rating: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignJobResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&Job> for SignJobResponse {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            completed_at: job.completed_at,
        }
    }
}
