use uuid::Uuid;

use crate::error::{ExchangeResult, StoreError};
use crate::models::jobs::ReputationCredit;
use crate::models::reputation::Reputation;
use crate::store::{self, Store, keys};

use super::MAX_CAS_RETRIES;

/// A user's reputation; users nobody has rated yet get an empty record.
pub async fn get_reputation(store: &dyn Store, user_id: Uuid) -> ExchangeResult<Reputation> {
    Ok(store::get_json::<Reputation>(store, &keys::reputation(user_id))
        .await?
        .map(|v| v.value)
        .unwrap_or_else(|| Reputation::new(user_id)))
}

/// Apply `change` to a user's reputation with optimistic concurrency.
async fn update(
    store: &dyn Store,
    user_id: Uuid,
    change: impl Fn(&mut Reputation),
) -> ExchangeResult<Reputation> {
    let key = keys::reputation(user_id);
    for _ in 0..MAX_CAS_RETRIES {
        match store::get_json::<Reputation>(store, &key).await? {
            Some(current) => {
                let mut next = current.value.clone();
                change(&mut next);
                if store::swap_json(store, &key, &current, &next).await? {
                    return Ok(next);
                }
            }
            None => {
                let mut first = Reputation::new(user_id);
                change(&mut first);
                if store::put_json_if_absent(store, &key, &first).await? {
                    return Ok(first);
                }
            }
        }
    }
    Err(StoreError::Contention(key).into())
}

/// Count a job's credit toward its user. Replaying a credit that is already
/// counted changes nothing.
pub async fn apply_credit(
    store: &dyn Store,
    job_id: Uuid,
    credit: ReputationCredit,
) -> ExchangeResult<Reputation> {
    let marker = credit.marker(job_id);
    update(store, credit.user_id(), |r| {
        if r.applied_credits.contains(&marker) {
            return;
        }
        match credit {
            ReputationCredit::Rating { stars, .. } => {
                r.stars_total += u64::from(stars);
                r.rating_count += 1;
            }
            ReputationCredit::Completion { .. } => r.completed_jobs += 1,
        }
        r.applied_credits.push(marker.clone());
    })
    .await
}
