//! Grab flow: authenticate the seat, apply the cooldown, gather and rank open
//! bids, ask the classifier about each in turn and claim the first accepted one.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, timeout};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::seats::verify_seat;
use crate::classifier::CapabilityClassifier;
use crate::config::ExchangeConfig;
use crate::db::bids::{ClaimOutcome, claim_bid, get_open_bids};
use crate::db::jobs::materialize_job;
use crate::error::{ExchangeError, ExchangeResult};
use crate::geo;
use crate::models::bids::{Bid, BidClaim, BidFilter};
use crate::models::jobs::Job;
use crate::models::location::{Coordinates, LocationType};
use crate::models::seats::SeatCredential;
use crate::rate_limit::GrabRateLimiter;
use crate::store::{StoreData, Versioned};

const MATERIALIZE_ATTEMPTS: usize = 3;

/// A provider's grab attempt, with its location already resolved.
#[derive(Debug, Clone)]
pub struct GrabRequest {
    pub seat: SeatCredential,
    pub provider_id: Uuid,
    pub capabilities: String,
    pub location_type: LocationType,
    pub location: Option<Coordinates>,
    /// Miles; `None` uses the configured default.
    pub max_distance: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GrabOutcome {
    Matched(Job),
    NoMatch,
}

enum Verdict {
    Accepted,
    Rejected,
    Errored,
}

pub struct MatchingEngine {
    store: StoreData,
    classifier: Arc<dyn CapabilityClassifier>,
    rate_limiter: GrabRateLimiter,
    default_max_distance: f64,
    classifier_timeout: Duration,
    grab_deadline: Duration,
}

impl MatchingEngine {
    pub fn new(
        store: StoreData,
        classifier: Arc<dyn CapabilityClassifier>,
        config: &ExchangeConfig,
    ) -> Self {
        Self {
            store,
            classifier,
            rate_limiter: GrabRateLimiter::new(config.grab_cooldown),
            default_max_distance: config.default_max_distance_miles,
            classifier_timeout: config.classifier_timeout,
            grab_deadline: config.grab_deadline,
        }
    }

    pub fn default_max_distance(&self) -> f64 {
        self.default_max_distance
    }

    /// Match the provider to the best compatible open bid and claim it.
    ///
    /// The seat's cooldown is spent by any attempt that gets past validation,
    /// except one that fails before claiming because the classifier or the
    /// store was unavailable. Those hand the window back so the seat can retry.
    pub async fn grab_job(&self, request: GrabRequest) -> ExchangeResult<GrabOutcome> {
        let started = Instant::now();
        let store = self.store.as_ref();

        let seat = verify_seat(store, &request.seat).await?;
        let radius = self.validate(&request)?;

        let permit = self
            .rate_limiter
            .try_acquire(store, &seat.seat_id, Utc::now())
            .await?;

        match self.claim_best(&request, &seat.seat_id, radius, started).await {
            Ok(Some(bid)) => self.materialize(&bid).await.map(GrabOutcome::Matched),
            Ok(None) => {
                info!("No match for seat {}", seat.seat_id);
                Ok(GrabOutcome::NoMatch)
            }
            Err(e) => {
                let retryable = matches!(
                    e,
                    ExchangeError::MatchingUnavailable | ExchangeError::Storage(_)
                );
                if let (true, Some(permit)) = (retryable, &permit) {
                    if let Err(release_err) = self.rate_limiter.release(store, permit).await {
                        warn!("Could not release cooldown of seat {}: {release_err}", seat.seat_id);
                    }
                }
                Err(e)
            }
        }
    }

    /// Walk the ranked candidates and claim the first one the classifier
    /// accepts. `None` means nothing was claimed.
    async fn claim_best(
        &self,
        request: &GrabRequest,
        seat_id: &str,
        radius: f64,
        started: Instant,
    ) -> ExchangeResult<Option<Bid>> {
        let store = self.store.as_ref();
        let open = get_open_bids(store, &BidFilter::default(), Utc::now()).await?;
        let candidates = rank(eligible(open, request, radius));
        debug!(
            "Seat {seat_id} has {} candidate bids within {radius} miles",
            candidates.len()
        );

        let deadline = started + self.grab_deadline;
        let mut errored = 0usize;
        let mut judged = 0usize;

        for candidate in candidates {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!("Grab deadline exhausted for seat {seat_id}");
                return Err(ExchangeError::MatchingUnavailable);
            }

            judged += 1;
            match self
                .classify(&candidate.value, &request.capabilities, remaining)
                .await
            {
                Verdict::Accepted => {}
                Verdict::Rejected => continue,
                Verdict::Errored => {
                    errored += 1;
                    continue;
                }
            }

            let claim = BidClaim {
                job_id: Uuid::new_v4(),
                provider_id: request.provider_id,
                seat_id: seat_id.to_string(),
                claimed_at: Utc::now(),
            };
            match claim_bid(store, &candidate, claim, Utc::now()).await? {
                ClaimOutcome::Claimed(bid) => {
                    info!(
                        "Bid {} claimed by provider {} via seat {seat_id}",
                        bid.id, request.provider_id
                    );
                    return Ok(Some(bid));
                }
                ClaimOutcome::Lost => debug!("Bid {} taken by another grab", candidate.value.id),
                ClaimOutcome::Expired => debug!("Bid {} expired before claim", candidate.value.id),
            }
        }

        if judged > 0 && errored == judged {
            warn!("Classifier failed for every candidate of seat {seat_id}");
            return Err(ExchangeError::MatchingUnavailable);
        }
        Ok(None)
    }

    fn validate(&self, request: &GrabRequest) -> ExchangeResult<f64> {
        if request.capabilities.trim().is_empty() {
            return Err(ExchangeError::Validation("Capabilities are required".into()));
        }
        let radius = request.max_distance.unwrap_or(self.default_max_distance);
        if !radius.is_finite() || radius < 0.0 {
            return Err(ExchangeError::Validation(
                "max_distance must be a non-negative number".into(),
            ));
        }
        Ok(radius)
    }

    async fn classify(&self, bid: &Bid, capabilities: &str, remaining: Duration) -> Verdict {
        let service = bid.service.canonical();
        let limit = self.classifier_timeout.min(remaining);

        match timeout(limit, self.classifier.is_compatible(&service, capabilities)).await {
            Ok(Ok(true)) => Verdict::Accepted,
            Ok(Ok(false)) => {
                debug!("Bid {} rejected by classifier", bid.id);
                Verdict::Rejected
            }
            Ok(Err(e)) => {
                warn!("Classifier error on bid {}: {e}", bid.id);
                Verdict::Errored
            }
            Err(_) => {
                warn!("Classifier timed out on bid {} after {limit:?}", bid.id);
                Verdict::Errored
            }
        }
    }

    /// Create the job for a bid this grab claimed. Retries reuse the claim's
    /// job id; the bid is never claimed again.
    async fn materialize(&self, bid: &Bid) -> ExchangeResult<Job> {
        let mut last_error = None;
        for attempt in 1..=MATERIALIZE_ATTEMPTS {
            match materialize_job(self.store.as_ref(), bid).await {
                Ok(job) => return Ok(job),
                Err(e) => {
                    warn!("Materializing job for bid {} failed (attempt {attempt}): {e}", bid.id);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or(ExchangeError::MatchingUnavailable))
    }
}

/// Bids this provider may take. Remote bids always qualify. Location-bound
/// bids only go to on-site providers, and only within `radius` miles.
fn eligible(
    open: Vec<Versioned<Bid>>,
    request: &GrabRequest,
    radius: f64,
) -> Vec<Versioned<Bid>> {
    open.into_iter()
        .filter(|bid| {
            if !bid.value.location_type.is_location_bound() {
                return true;
            }
            request.location_type.is_location_bound()
                && geo::within_radius(request.location, bid.value.coordinates, radius)
        })
        .collect()
}

/// Highest price first; equal prices go to the earliest posted bid.
fn rank(mut bids: Vec<Versioned<Bid>>) -> Vec<Versioned<Bid>> {
    bids.sort_by(|a, b| {
        b.value
            .price
            .total_cmp(&a.value.price)
            .then_with(|| a.value.posted_at.cmp(&b.value.posted_at))
    });
    bids
}
