use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{ExchangeError, ExchangeResult, StoreError};
use crate::geo;
use crate::models::bids::{Bid, BidClaim, BidFilter, BidStatus, CreateBid, NearbyBid};
use crate::models::location::{Coordinates, LocationType};
use crate::store::{self, Store, Versioned, keys};

use super::MAX_CAS_RETRIES;

/// Result of trying to claim a bid.
#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    Claimed(Bid),
    /// Another writer changed the bid first.
    Lost,
    /// The bid reached its end time before it could be claimed.
    Expired,
}

fn validate(input: &CreateBid, now: DateTime<Utc>) -> ExchangeResult<()> {
    if input.service.is_blank() {
        return Err(ExchangeError::Validation("Service is required".into()));
    }
    if !input.price.is_finite() || input.price <= 0.0 {
        return Err(ExchangeError::Validation("Price must be positive".into()));
    }
    if input.end_time <= now.timestamp() {
        return Err(ExchangeError::Validation(
            "End time must be in the future".into(),
        ));
    }
    let location_type = input.location_type.unwrap_or(LocationType::Physical);
    if location_type.is_location_bound() {
        input.location.coordinates()?;
        if input.location.is_empty() {
            return Err(ExchangeError::Validation(
                "Location required for physical services".into(),
            ));
        }
    }
    Ok(())
}

/// Validate and store a new open bid.
///
/// Callers resolve addresses before this point; an address that could not be
/// geocoded is kept without coordinates.
pub async fn insert_bid(
    store: &dyn Store,
    buyer_id: Uuid,
    input: CreateBid,
    now: DateTime<Utc>,
) -> ExchangeResult<Bid> {
    validate(&input, now)?;

    let end_time = DateTime::<Utc>::from_timestamp(input.end_time, 0)
        .ok_or_else(|| ExchangeError::Validation("End time is out of range".into()))?;
    let location_type = input.location_type.unwrap_or(LocationType::Physical);
    let (coordinates, address) = if location_type.is_location_bound() {
        (input.location.coordinates()?, input.location.address())
    } else {
        (None, None)
    };

    let bid = Bid {
        id: Uuid::new_v4(),
        buyer_id,
        service: input.service,
        category: input.category,
        price: input.price,
        currency: input
            .currency
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| "USD".to_string()),
        payment_method: input.payment_method,
        location_type,
        coordinates,
        address,
        posted_at: now,
        end_time,
        status: BidStatus::Open,
        claim: None,
    };

    if !store::put_json_if_absent(store, &keys::bid(bid.id), &bid).await? {
        return Err(StoreError::Contention(keys::bid(bid.id)).into());
    }
    store.set_add(keys::OPEN_BIDS, &bid.id.to_string()).await?;
    store
        .set_add(&keys::user_bids(buyer_id), &bid.id.to_string())
        .await?;

    info!("Bid created: {} by {buyer_id}", bid.id);
    Ok(bid)
}

/// Write `expired` over an open bid whose end time has passed.
///
/// Returns the bid as it stands afterwards, which may differ from `current`
/// if another writer moved it first.
async fn expire(
    store: &dyn Store,
    mut current: Versioned<Bid>,
    now: DateTime<Utc>,
) -> ExchangeResult<Versioned<Bid>> {
    let key = keys::bid(current.value.id);
    for _ in 0..MAX_CAS_RETRIES {
        if current.value.status != BidStatus::Open || !current.value.is_expired_at(now) {
            return Ok(current);
        }

        let mut expired = current.value.clone();
        expired.status = BidStatus::Expired;

        if store::swap_json(store, &key, &current, &expired).await? {
            store
                .set_remove(keys::OPEN_BIDS, &expired.id.to_string())
                .await?;
            debug!("Bid {} expired", expired.id);
            let raw = serde_json::to_string(&expired).map_err(StoreError::from)?;
            return Ok(Versioned {
                value: expired,
                raw,
            });
        }

        current = match store::get_json::<Bid>(store, &key).await? {
            Some(latest) => latest,
            None => return Err(ExchangeError::NotFound(format!("Bid {}", current.value.id))),
        };
    }
    Err(StoreError::Contention(key).into())
}

/// Fetch a bid, applying lazy expiry.
pub async fn get_bid_by_id(
    store: &dyn Store,
    id: Uuid,
    now: DateTime<Utc>,
) -> ExchangeResult<Option<Versioned<Bid>>> {
    match store::get_json::<Bid>(store, &keys::bid(id)).await? {
        Some(current) => expire(store, current, now).await.map(Some),
        None => Ok(None),
    }
}

async fn get_many(
    store: &dyn Store,
    ids: Vec<String>,
    now: DateTime<Utc>,
) -> ExchangeResult<Vec<Versioned<Bid>>> {
    let ids: Vec<Uuid> = ids.iter().filter_map(|id| id.parse().ok()).collect();
    let fetched = join_all(ids.iter().map(|id| get_bid_by_id(store, *id, now))).await;

    let mut bids = Vec::with_capacity(fetched.len());
    for bid in fetched {
        if let Some(bid) = bid? {
            bids.push(bid);
        }
    }
    Ok(bids)
}

/// Open, unexpired bids matching `filter`, newest first.
pub async fn get_open_bids(
    store: &dyn Store,
    filter: &BidFilter,
    now: DateTime<Utc>,
) -> ExchangeResult<Vec<Versioned<Bid>>> {
    let ids = store.set_members(keys::OPEN_BIDS).await?;
    let mut bids = Vec::with_capacity(ids.len());

    for bid in get_many(store, ids, now).await? {
        if !bid.value.is_available_at(now) {
            // Index entry left behind by an interrupted transition.
            store
                .set_remove(keys::OPEN_BIDS, &bid.value.id.to_string())
                .await?;
            continue;
        }
        if filter.matches(&bid.value) {
            bids.push(bid);
        }
    }

    bids.sort_by(|a, b| b.value.posted_at.cmp(&a.value.posted_at));
    if let Some(limit) = filter.limit {
        bids.truncate(limit);
    }
    Ok(bids)
}

/// Every bid a buyer has posted, in any status, newest first.
pub async fn get_bids_by_buyer(
    store: &dyn Store,
    buyer_id: Uuid,
    now: DateTime<Utc>,
) -> ExchangeResult<Vec<Bid>> {
    let ids = store.set_members(&keys::user_bids(buyer_id)).await?;
    let mut bids: Vec<Bid> = get_many(store, ids, now)
        .await?
        .into_iter()
        .map(|v| v.value)
        .collect();
    bids.sort_by(|a, b| b.posted_at.cmp(&a.posted_at));
    Ok(bids)
}

/// Cancel an open bid on behalf of its buyer.
pub async fn cancel_bid(
    store: &dyn Store,
    bid_id: Uuid,
    requester: Uuid,
    now: DateTime<Utc>,
) -> ExchangeResult<Bid> {
    let key = keys::bid(bid_id);
    for _ in 0..MAX_CAS_RETRIES {
        let current = get_bid_by_id(store, bid_id, now)
            .await?
            .ok_or_else(|| ExchangeError::NotFound(format!("Bid {bid_id}")))?;

        if current.value.buyer_id != requester {
            return Err(ExchangeError::NotOwner(bid_id));
        }
        if current.value.status != BidStatus::Open {
            return Err(ExchangeError::InvalidState {
                id: bid_id,
                status: current.value.status.to_string(),
            });
        }

        let mut cancelled = current.value.clone();
        cancelled.status = BidStatus::Cancelled;

        if store::swap_json(store, &key, &current, &cancelled).await? {
            store.set_remove(keys::OPEN_BIDS, &bid_id.to_string()).await?;
            info!("Bid cancelled: {bid_id}");
            return Ok(cancelled);
        }
    }
    Err(StoreError::Contention(key).into())
}

/// Atomically move `current` from open to claimed.
///
/// The claim is recorded in the pending-materialization index before the
/// swap, so a crash between claim and job creation is recoverable.
pub async fn claim_bid(
    store: &dyn Store,
    current: &Versioned<Bid>,
    claim: BidClaim,
    now: DateTime<Utc>,
) -> ExchangeResult<ClaimOutcome> {
    let bid_id = current.value.id;

    if current.value.status != BidStatus::Open {
        return Ok(ClaimOutcome::Lost);
    }
    if current.value.is_expired_at(now) {
        expire(store, current.clone(), now).await?;
        return Ok(ClaimOutcome::Expired);
    }

    let mut claimed = current.value.clone();
    claimed.status = BidStatus::Claimed;
    claimed.claim = Some(claim);

    store
        .set_add(keys::PENDING_JOBS, &bid_id.to_string())
        .await?;

    if !store::swap_json(store, &keys::bid(bid_id), current, &claimed).await? {
        debug!("Lost claim race on bid {bid_id}");
        return Ok(ClaimOutcome::Lost);
    }

    // The claim is committed; readers prune a stale open-index entry anyway.
    if let Err(e) = store.set_remove(keys::OPEN_BIDS, &bid_id.to_string()).await {
        warn!("Open index not pruned for claimed bid {bid_id}: {e}");
    }
    Ok(ClaimOutcome::Claimed(claimed))
}

/// Open location-bound bids within `radius_miles` of `origin`, nearest first,
/// each with its distance rounded to two decimals.
pub async fn get_nearby_bids(
    store: &dyn Store,
    origin: Coordinates,
    radius_miles: f64,
    now: DateTime<Utc>,
) -> ExchangeResult<Vec<NearbyBid>> {
    let located = get_open_bids(store, &BidFilter::default(), now)
        .await?
        .into_iter()
        .map(|v| v.value)
        .filter(|bid| bid.location_type.is_location_bound());

    let mut nearby: Vec<NearbyBid> = geo::filter_by_radius(origin, located, radius_miles, |bid| {
        bid.coordinates
    })
    .into_iter()
    .map(|(bid, distance)| NearbyBid {
        bid,
        distance: (distance * 100.0).round() / 100.0,
    })
    .collect();

    nearby.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    Ok(nearby)
}
