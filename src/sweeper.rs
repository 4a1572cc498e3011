//! Background storage hygiene. Correctness never depends on it: expiry is
//! applied on every read and job creation is idempotent.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::bids::{get_bid_by_id, get_open_bids};
use crate::db::jobs::{materialize_job, settle_reputation};
use crate::error::ExchangeResult;
use crate::models::bids::{BidFilter, BidStatus};
use crate::store::{Store, StoreData, keys};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// Open bids still live after expiry and pruning.
    pub open_bids: usize,
    /// Claimed bids whose job had to be created by the sweep.
    pub jobs_repaired: usize,
    /// Pending-job index entries dropped without repair.
    pub pending_dropped: usize,
    /// Jobs whose owed reputation credits were applied.
    pub reputation_settled: usize,
    /// Entries that failed this pass and stay queued for the next one.
    pub failed: usize,
}

/// One pass: expire stale bids, prune the open index, finish any claim
/// whose job was never written and apply any reputation a rating still owes.
pub async fn sweep_once(store: &dyn Store, now: DateTime<Utc>) -> ExchangeResult<SweepReport> {
    let mut report = SweepReport {
        open_bids: get_open_bids(store, &BidFilter::default(), now).await?.len(),
        ..Default::default()
    };

    for entry in store.set_members(keys::PENDING_JOBS).await? {
        if let Err(e) = repair_claim(store, &entry, now, &mut report).await {
            warn!("Pending job for bid {entry} not repaired: {e}");
            report.failed += 1;
        }
    }

    for entry in store.set_members(keys::PENDING_REPUTATION).await? {
        let Ok(job_id) = entry.parse::<Uuid>() else {
            store.set_remove(keys::PENDING_REPUTATION, &entry).await?;
            continue;
        };
        match settle_reputation(store, job_id).await {
            Ok(Some(_)) => report.reputation_settled += 1,
            Ok(None) => {}
            Err(e) => {
                warn!("Reputation for job {job_id} not settled: {e}");
                report.failed += 1;
            }
        }
    }

    Ok(report)
}

async fn repair_claim(
    store: &dyn Store,
    entry: &str,
    now: DateTime<Utc>,
    report: &mut SweepReport,
) -> ExchangeResult<()> {
    let Ok(bid_id) = entry.parse::<Uuid>() else {
        store.set_remove(keys::PENDING_JOBS, entry).await?;
        report.pending_dropped += 1;
        return Ok(());
    };

    match get_bid_by_id(store, bid_id, now).await? {
        Some(bid) if bid.value.status == BidStatus::Claimed => {
            // Removes the index entry on success.
            materialize_job(store, &bid.value).await?;
            report.jobs_repaired += 1;
        }
        // A claim may still be in flight on an open bid; leave its entry.
        Some(bid) if bid.value.status == BidStatus::Open => {}
        Some(_) | None => {
            store.set_remove(keys::PENDING_JOBS, entry).await?;
            report.pending_dropped += 1;
        }
    }
    Ok(())
}

/// Run [`sweep_once`] every `interval` on the tokio runtime.
pub fn spawn(store: StoreData, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match sweep_once(store.as_ref(), Utc::now()).await {
                Ok(report)
                    if report.jobs_repaired > 0
                        || report.pending_dropped > 0
                        || report.reputation_settled > 0
                        || report.failed > 0 =>
                {
                    info!("Sweep finished: {report:?}");
                }
                Ok(report) => debug!("Sweep finished: {report:?}"),
                Err(e) => warn!("Sweep failed: {e}"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::bids::{ClaimOutcome, claim_bid, insert_bid};
    use crate::db::jobs::{get_job_by_id, get_jobs_by_user};
    use crate::db::reputation::get_reputation;
    use crate::models::jobs::ReputationCredit;
    use crate::store::put_json;
    use crate::models::bids::{BidClaim, CreateBid, ServiceDescription};
    use crate::models::location::{LocationInput, LocationType};
    use crate::store::MemoryStore;

    fn input(end_in_secs: i64) -> CreateBid {
        CreateBid {
            service: ServiceDescription::Text("Furniture assembly".into()),
            price: 80.0,
            currency: None,
            payment_method: None,
            category: None,
            location_type: Some(LocationType::Remote),
            location: LocationInput::default(),
            end_time: Utc::now().timestamp() + end_in_secs,
        }
    }

    #[tokio::test]
    async fn repairs_claim_without_job() {
        let store = MemoryStore::new();
        let bid = insert_bid(&store, Uuid::new_v4(), input(3600), Utc::now())
            .await
            .unwrap();
        let snapshot = get_bid_by_id(&store, bid.id, Utc::now()).await.unwrap().unwrap();
        let provider = Uuid::new_v4();
        let claim = BidClaim {
            job_id: Uuid::new_v4(),
            provider_id: provider,
            seat_id: "RSX0000000".into(),
            claimed_at: Utc::now(),
        };

        // Claimed, but the process stopped before the job was written.
        let outcome = claim_bid(&store, &snapshot, claim.clone(), Utc::now()).await.unwrap();
        assert!(matches!(outcome, ClaimOutcome::Claimed(_)));
        assert!(get_jobs_by_user(&store, provider).await.unwrap().is_empty());

        let report = sweep_once(&store, Utc::now()).await.unwrap();
        assert_eq!(report.jobs_repaired, 1);

        let jobs = get_jobs_by_user(&store, provider).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, claim.job_id);
        assert!(store.set_members(keys::PENDING_JOBS).await.unwrap().is_empty());

        // Nothing left to do on the next pass.
        let again = sweep_once(&store, Utc::now()).await.unwrap();
        assert_eq!(again.jobs_repaired, 0);
    }

    #[tokio::test]
    async fn expires_stale_bids_and_drops_dead_entries() {
        let store = MemoryStore::new();
        insert_bid(&store, Uuid::new_v4(), input(60), Utc::now())
            .await
            .unwrap();
        insert_bid(&store, Uuid::new_v4(), input(3600), Utc::now())
            .await
            .unwrap();
        store
            .set_add(keys::PENDING_JOBS, &Uuid::new_v4().to_string())
            .await
            .unwrap();

        let later = Utc::now() + chrono::Duration::seconds(120);
        let report = sweep_once(&store, later).await.unwrap();
        assert_eq!(report.open_bids, 1);
        assert_eq!(report.pending_dropped, 1);
        assert_eq!(store.set_members(keys::OPEN_BIDS).await.unwrap().len(), 1);
    }

    fn claim_for(provider: Uuid) -> BidClaim {
        BidClaim {
            job_id: Uuid::new_v4(),
            provider_id: provider,
            seat_id: "RSX0000000".into(),
            claimed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn one_broken_entry_does_not_stop_the_pass() {
        let store = MemoryStore::new();

        // A claimed record with no claim details cannot become a job.
        let broken = insert_bid(&store, Uuid::new_v4(), input(3600), Utc::now())
            .await
            .unwrap();
        let mut record = broken.clone();
        record.status = BidStatus::Claimed;
        record.claim = None;
        put_json(&store, &keys::bid(broken.id), &record).await.unwrap();
        store
            .set_add(keys::PENDING_JOBS, &broken.id.to_string())
            .await
            .unwrap();

        let good = insert_bid(&store, Uuid::new_v4(), input(3600), Utc::now())
            .await
            .unwrap();
        let snapshot = get_bid_by_id(&store, good.id, Utc::now()).await.unwrap().unwrap();
        let provider = Uuid::new_v4();
        claim_bid(&store, &snapshot, claim_for(provider), Utc::now())
            .await
            .unwrap();

        let report = sweep_once(&store, Utc::now()).await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.jobs_repaired, 1);
        assert_eq!(get_jobs_by_user(&store, provider).await.unwrap().len(), 1);
        assert_eq!(
            store.set_members(keys::PENDING_JOBS).await.unwrap(),
            vec![broken.id.to_string()]
        );
    }

    #[tokio::test]
    async fn applies_reputation_left_on_a_job() {
        let store = MemoryStore::new();
        let bid = insert_bid(&store, Uuid::new_v4(), input(3600), Utc::now())
            .await
            .unwrap();
        let snapshot = get_bid_by_id(&store, bid.id, Utc::now()).await.unwrap().unwrap();
        let provider = Uuid::new_v4();
        let claim = claim_for(provider);
        claim_bid(&store, &snapshot, claim.clone(), Utc::now())
            .await
            .unwrap();
        sweep_once(&store, Utc::now()).await.unwrap();

        // A rating committed on the job whose reputation write never happened.
        let mut job = get_job_by_id(&store, claim.job_id).await.unwrap().unwrap();
        job.buyer_rating = Some(4);
        job.pending_reputation.push(ReputationCredit::Rating {
            user_id: provider,
            stars: 4,
        });
        put_json(&store, &keys::job(job.id), &job).await.unwrap();
        store
            .set_add(keys::PENDING_REPUTATION, &job.id.to_string())
            .await
            .unwrap();

        let report = sweep_once(&store, Utc::now()).await.unwrap();
        assert_eq!(report.reputation_settled, 1);
        assert_eq!(get_reputation(&store, provider).await.unwrap().stars_total, 4);

        let job = get_job_by_id(&store, job.id).await.unwrap().unwrap();
        assert!(job.pending_reputation.is_empty());
        assert!(store.set_members(keys::PENDING_REPUTATION).await.unwrap().is_empty());

        // Replaying the pass changes nothing.
        let again = sweep_once(&store, Utc::now()).await.unwrap();
        assert_eq!(again.reputation_settled, 0);
        assert_eq!(get_reputation(&store, provider).await.unwrap().rating_count, 1);
    }
}
