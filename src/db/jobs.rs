use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{ExchangeError, ExchangeResult, StoreError};
use crate::models::bids::{Bid, BidStatus};
use crate::models::jobs::{Job, JobStatus, Party, ReputationCredit};
use crate::store::{self, Store, keys};

use super::{MAX_CAS_RETRIES, reputation};

/// Create the job for a claimed bid. Safe to repeat: the job id comes from
/// the claim, so a retry finds and returns the job the first call wrote.
pub async fn materialize_job(store: &dyn Store, bid: &Bid) -> ExchangeResult<Job> {
    let claim = match (&bid.status, &bid.claim) {
        (BidStatus::Claimed, Some(claim)) => claim,
        _ => {
            return Err(ExchangeError::InvalidState {
                id: bid.id,
                status: bid.status.to_string(),
            });
        }
    };

    let job = Job::from_claim(bid, claim);
    let key = keys::job(job.id);

    let job = if store::put_json_if_absent(store, &key, &job).await? {
        info!(
            "Job created: {} - Provider: {}, Buyer: {}",
            job.id, job.provider_id, job.buyer_id
        );
        job
    } else {
        store::get_json::<Job>(store, &key)
            .await?
            .map(|v| v.value)
            .ok_or_else(|| StoreError::Contention(key.clone()))?
    };

    store
        .set_add(&keys::user_jobs(job.buyer_id), &job.id.to_string())
        .await?;
    store
        .set_add(&keys::user_jobs(job.provider_id), &job.id.to_string())
        .await?;
    store
        .set_remove(keys::PENDING_JOBS, &bid.id.to_string())
        .await?;

    Ok(job)
}

pub async fn get_job_by_id(store: &dyn Store, id: Uuid) -> ExchangeResult<Option<Job>> {
    Ok(store::get_json::<Job>(store, &keys::job(id))
        .await?
        .map(|v| v.value))
}

/// Jobs where the user is buyer or provider, most recently accepted first.
pub async fn get_jobs_by_user(store: &dyn Store, user_id: Uuid) -> ExchangeResult<Vec<Job>> {
    let ids: Vec<Uuid> = store
        .set_members(&keys::user_jobs(user_id))
        .await?
        .iter()
        .filter_map(|id| id.parse().ok())
        .collect();

    let fetched = join_all(ids.iter().map(|id| get_job_by_id(store, *id))).await;
    let mut jobs = Vec::with_capacity(fetched.len());
    for job in fetched {
        if let Some(job) = job? {
            jobs.push(job);
        }
    }

    jobs.sort_by(|a, b| b.accepted_at.cmp(&a.accepted_at));
    Ok(jobs)
}

/// Record one party's star rating for a job.
///
/// The rating feeds the counterparty's reputation. Once both parties have
/// rated, the job is completed and both get a completed job counted. Those
/// reputation changes are committed on the job together with the rating and
/// applied afterwards; anything left unapplied is finished by a later call on
/// the same job or by the sweeper.
pub async fn complete_and_rate(
    store: &dyn Store,
    job_id: Uuid,
    rater_id: Uuid,
    rating: i64,
    now: DateTime<Utc>,
) -> ExchangeResult<Job> {
    let stars = u8::try_from(rating)
        .ok()
        .filter(|s| (1..=5).contains(s))
        .ok_or_else(|| ExchangeError::Validation("Star rating must be between 1 and 5".into()))?;

    let key = keys::job(job_id);
    for _ in 0..MAX_CAS_RETRIES {
        let current = store::get_json::<Job>(store, &key)
            .await?
            .ok_or_else(|| ExchangeError::NotFound(format!("Job {job_id}")))?;

        let party = current
            .value
            .party_of(rater_id)
            .ok_or(ExchangeError::NotParticipant(job_id))?;
        if current.value.rating_by(party).is_some() {
            if !current.value.pending_reputation.is_empty() {
                if let Err(e) = settle_reputation(store, job_id).await {
                    warn!("Reputation for job {job_id} still pending: {e}");
                }
            }
            return Err(ExchangeError::AlreadyRated(job_id));
        }

        let mut next = current.value.clone();
        match party {
            Party::Buyer => next.buyer_rating = Some(stars),
            Party::Provider => next.provider_rating = Some(stars),
        }
        next.pending_reputation.push(ReputationCredit::Rating {
            user_id: next.counterparty_of(party),
            stars,
        });
        if next.buyer_rating.is_some() && next.provider_rating.is_some() {
            next.status = JobStatus::Completed;
            next.completed_at = Some(now);
            next.pending_reputation.extend([
                ReputationCredit::Completion { user_id: next.buyer_id },
                ReputationCredit::Completion { user_id: next.provider_id },
            ]);
        }

        store
            .set_add(keys::PENDING_REPUTATION, &job_id.to_string())
            .await?;
        if !store::swap_json(store, &key, &current, &next).await? {
            continue;
        }

        info!("Job signed: {job_id} by {rater_id} with rating {stars}");
        if next.status == JobStatus::Completed {
            info!("Job completed: {job_id}");
        }

        // The rating is committed; its reputation credits are durable on the job.
        return match settle_reputation(store, job_id).await {
            Ok(Some(settled)) => Ok(settled),
            Ok(None) => Ok(next),
            Err(e) => {
                warn!("Reputation for job {job_id} left pending: {e}");
                Ok(next)
            }
        };
    }
    Err(StoreError::Contention(key).into())
}

/// Apply every reputation credit a job still owes, then clear them from the
/// job. Each credit counts once no matter how often this runs.
pub async fn settle_reputation(store: &dyn Store, job_id: Uuid) -> ExchangeResult<Option<Job>> {
    let key = keys::job(job_id);
    let Some(mut current) = store::get_json::<Job>(store, &key).await? else {
        store
            .set_remove(keys::PENDING_REPUTATION, &job_id.to_string())
            .await?;
        return Ok(None);
    };

    let applied = current.value.pending_reputation.clone();
    for credit in &applied {
        reputation::apply_credit(store, job_id, *credit).await?;
    }

    let mut cleared = None;
    for _ in 0..MAX_CAS_RETRIES {
        let mut next = current.value.clone();
        next.pending_reputation.retain(|c| !applied.contains(c));
        if store::swap_json(store, &key, &current, &next).await? {
            cleared = Some(next);
            break;
        }
        current = store::get_json::<Job>(store, &key)
            .await?
            .ok_or_else(|| StoreError::Contention(key.clone()))?;
    }
    let job = cleared.ok_or_else(|| StoreError::Contention(key.clone()))?;

    if job.pending_reputation.is_empty() {
        store
            .set_remove(keys::PENDING_REPUTATION, &job_id.to_string())
            .await?;
    }

    Ok(Some(job))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::bids::{BidClaim, ServiceDescription};
    use crate::models::location::LocationType;
    use crate::store::{MemoryStore, StoreResult};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Memory store whose next `failures` reputation writes fail.
    #[derive(Default)]
    struct FlakyReputationStore {
        inner: MemoryStore,
        failures: AtomicUsize,
    }

    impl FlakyReputationStore {
        fn failing(failures: usize) -> Self {
            Self {
                inner: MemoryStore::new(),
                failures: AtomicUsize::new(failures),
            }
        }

        fn check(&self, key: &str) -> StoreResult<()> {
            let tripped = key.starts_with("reputation:")
                && self
                    .failures
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok();
            if tripped {
                return Err(StoreError::Contention(key.to_string()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Store for FlakyReputationStore {
        async fn get(&self, key: &str) -> StoreResult<Option<String>> {
            self.inner.get(key).await
        }
        async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
            self.inner.set(key, value, ttl).await
        }
        async fn set_if_absent(
            &self,
            key: &str,
            value: &str,
            ttl: Option<Duration>,
        ) -> StoreResult<bool> {
            self.check(key)?;
            self.inner.set_if_absent(key, value, ttl).await
        }
        async fn compare_and_swap(&self, key: &str, expected: &str, new: &str) -> StoreResult<bool> {
            self.check(key)?;
            self.inner.compare_and_swap(key, expected, new).await
        }
        async fn compare_and_delete(&self, key: &str, expected: &str) -> StoreResult<bool> {
            self.inner.compare_and_delete(key, expected).await
        }
        async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
            self.inner.ttl(key).await
        }
        async fn set_add(&self, key: &str, member: &str) -> StoreResult<()> {
            self.inner.set_add(key, member).await
        }
        async fn set_remove(&self, key: &str, member: &str) -> StoreResult<()> {
            self.inner.set_remove(key, member).await
        }
        async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
            self.inner.set_members(key).await
        }
    }

    fn claimed_bid() -> Bid {
        let now = Utc::now();
        Bid {
            id: Uuid::new_v4(),
            buyer_id: Uuid::new_v4(),
            service: ServiceDescription::Text("Dog walking".into()),
            category: None,
            price: 25.0,
            currency: "USD".into(),
            payment_method: Some("cash".into()),
            location_type: LocationType::Remote,
            coordinates: None,
            address: None,
            posted_at: now,
            end_time: now + chrono::Duration::hours(1),
            status: BidStatus::Claimed,
            claim: Some(BidClaim {
                job_id: Uuid::new_v4(),
                provider_id: Uuid::new_v4(),
                seat_id: "RSX0000000".into(),
                claimed_at: now,
            }),
        }
    }

    #[tokio::test]
    async fn materialize_is_idempotent() {
        let store = MemoryStore::new();
        let bid = claimed_bid();

        let first = materialize_job(&store, &bid).await.unwrap();
        let second = materialize_job(&store, &bid).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.status, JobStatus::Active);
        assert_eq!(first.price, 25.0);

        let buyer_jobs = get_jobs_by_user(&store, bid.buyer_id).await.unwrap();
        assert_eq!(buyer_jobs.len(), 1);
    }

    #[tokio::test]
    async fn unclaimed_bid_cannot_materialize() {
        let store = MemoryStore::new();
        let mut bid = claimed_bid();
        bid.status = BidStatus::Open;
        bid.claim = None;
        let result = materialize_job(&store, &bid).await;
        assert!(matches!(result, Err(ExchangeError::InvalidState { .. })));
    }

    #[tokio::test]
    async fn both_ratings_complete_the_job() {
        let store = MemoryStore::new();
        let job = materialize_job(&store, &claimed_bid()).await.unwrap();

        let after_buyer = complete_and_rate(&store, job.id, job.buyer_id, 5, Utc::now())
            .await
            .unwrap();
        assert_eq!(after_buyer.status, JobStatus::Active);
        assert!(after_buyer.completed_at.is_none());

        let after_provider = complete_and_rate(&store, job.id, job.provider_id, 4, Utc::now())
            .await
            .unwrap();
        assert_eq!(after_provider.status, JobStatus::Completed);
        assert!(after_provider.completed_at.is_some());
        assert_eq!(after_provider.buyer_rating, Some(5));
        assert_eq!(after_provider.provider_rating, Some(4));

        let provider_rep = reputation::get_reputation(&store, job.provider_id).await.unwrap();
        assert_eq!(provider_rep.rating_count, 1);
        assert_eq!(provider_rep.stars_total, 5);
        assert_eq!(provider_rep.completed_jobs, 1);

        let buyer_rep = reputation::get_reputation(&store, job.buyer_id).await.unwrap();
        assert_eq!(buyer_rep.stars_total, 4);
        assert_eq!(buyer_rep.completed_jobs, 1);
    }

    #[tokio::test]
    async fn rating_rules_are_enforced() {
        let store = MemoryStore::new();
        let job = materialize_job(&store, &claimed_bid()).await.unwrap();

        let stranger = complete_and_rate(&store, job.id, Uuid::new_v4(), 3, Utc::now()).await;
        assert!(matches!(stranger, Err(ExchangeError::NotParticipant(_))));

        complete_and_rate(&store, job.id, job.buyer_id, 3, Utc::now())
            .await
            .unwrap();
        let twice = complete_and_rate(&store, job.id, job.buyer_id, 4, Utc::now()).await;
        assert!(matches!(twice, Err(ExchangeError::AlreadyRated(_))));

        let out_of_range = complete_and_rate(&store, job.id, job.provider_id, 6, Utc::now()).await;
        assert!(matches!(out_of_range, Err(ExchangeError::Validation(_))));

        let missing = complete_and_rate(&store, Uuid::new_v4(), job.buyer_id, 3, Utc::now()).await;
        assert!(matches!(missing, Err(ExchangeError::NotFound(_))));

        // Count never went up for the rejected attempts.
        let rep = reputation::get_reputation(&store, job.provider_id).await.unwrap();
        assert_eq!(rep.rating_count, 1);
    }

    #[tokio::test]
    async fn failed_reputation_write_is_finished_on_retry() {
        let store = FlakyReputationStore::failing(1);
        let job = materialize_job(&store, &claimed_bid()).await.unwrap();

        // The rating commits even though the reputation write fails.
        let rated = complete_and_rate(&store, job.id, job.buyer_id, 5, Utc::now())
            .await
            .unwrap();
        assert_eq!(rated.buyer_rating, Some(5));
        assert_eq!(rated.pending_reputation.len(), 1);
        assert_eq!(
            store.set_members(keys::PENDING_REPUTATION).await.unwrap(),
            vec![job.id.to_string()]
        );
        let before = reputation::get_reputation(&store, job.provider_id).await.unwrap();
        assert_eq!(before.rating_count, 0);

        // A retry is still rejected, but the owed rating lands exactly once.
        let retry = complete_and_rate(&store, job.id, job.buyer_id, 5, Utc::now()).await;
        assert!(matches!(retry, Err(ExchangeError::AlreadyRated(_))));
        let again = complete_and_rate(&store, job.id, job.buyer_id, 5, Utc::now()).await;
        assert!(matches!(again, Err(ExchangeError::AlreadyRated(_))));

        let after = reputation::get_reputation(&store, job.provider_id).await.unwrap();
        assert_eq!(after.rating_count, 1);
        assert_eq!(after.stars_total, 5);
        assert!(store.set_members(keys::PENDING_REPUTATION).await.unwrap().is_empty());

        let stored = get_job_by_id(&store, job.id).await.unwrap().unwrap();
        assert!(stored.pending_reputation.is_empty());
    }

    #[tokio::test]
    async fn settling_twice_counts_completion_once() {
        let store = MemoryStore::new();
        let job = materialize_job(&store, &claimed_bid()).await.unwrap();
        complete_and_rate(&store, job.id, job.buyer_id, 4, Utc::now())
            .await
            .unwrap();
        complete_and_rate(&store, job.id, job.provider_id, 4, Utc::now())
            .await
            .unwrap();

        settle_reputation(&store, job.id).await.unwrap();
        settle_reputation(&store, job.id).await.unwrap();

        let buyer = reputation::get_reputation(&store, job.buyer_id).await.unwrap();
        assert_eq!(buyer.completed_jobs, 1);
        assert_eq!(buyer.rating_count, 1);
    }
}
