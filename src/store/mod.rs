pub mod memory;
pub mod redis_store;

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use std::sync::Arc;
use std::time::Duration;

use crate::error::StoreError;

pub use self::memory::MemoryStore;
pub use self::redis_store::RedisStore;

pub type StoreResult<T> = Result<T, StoreError>;

/// Key-value persistence shared by every server instance.
///
/// Correctness of claims and cooldowns rests on two primitives only:
/// [`Store::compare_and_swap`] and [`Store::set_if_absent`]. Both must be
/// atomic with respect to every other caller of the same key.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Unconditional write, optionally expiring after `ttl`.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()>;

    /// Write only if the key does not exist. Returns whether the write happened.
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> StoreResult<bool>;

    /// Replace the value only if it still equals `expected`. A missing key never matches.
    async fn compare_and_swap(&self, key: &str, expected: &str, new: &str) -> StoreResult<bool>;

    /// Delete the key only if it still holds `expected`. Returns whether it was deleted.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> StoreResult<bool>;

    /// Remaining lifetime of an expiring key; `None` if missing or persistent.
    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>>;

    async fn set_add(&self, key: &str, member: &str) -> StoreResult<()>;

    async fn set_remove(&self, key: &str, member: &str) -> StoreResult<()>;

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>>;
}

/// Wrapper type for Actix-web app data
pub type StoreData = Arc<dyn Store>;

/// A decoded record together with the exact bytes it was read from, so a
/// later compare-and-swap can detect any intervening write.
#[derive(Debug, Clone)]
pub struct Versioned<T> {
    pub value: T,
    pub raw: String,
}

pub async fn get_json<T: DeserializeOwned>(
    store: &dyn Store,
    key: &str,
) -> StoreResult<Option<Versioned<T>>> {
    let Some(raw) = store.get(key).await? else {
        return Ok(None);
    };
    let value = serde_json::from_str(&raw).map_err(|e| StoreError::Corrupt {
        key: key.to_string(),
        reason: e.to_string(),
    })?;
    Ok(Some(Versioned { value, raw }))
}

pub async fn put_json<T: Serialize>(store: &dyn Store, key: &str, value: &T) -> StoreResult<()> {
    let serialized = serde_json::to_string(value)?;
    store.set(key, &serialized, None).await
}

pub async fn put_json_if_absent<T: Serialize>(
    store: &dyn Store,
    key: &str,
    value: &T,
) -> StoreResult<bool> {
    let serialized = serde_json::to_string(value)?;
    store.set_if_absent(key, &serialized, None).await
}

/// Swap `current` for `new`; `false` means another writer got there first.
pub async fn swap_json<T: Serialize>(
    store: &dyn Store,
    key: &str,
    current: &Versioned<T>,
    new: &T,
) -> StoreResult<bool> {
    let serialized = serde_json::to_string(new)?;
    store.compare_and_swap(key, &current.raw, &serialized).await
}

/// Store key generators
pub mod keys {
    use uuid::Uuid;

    pub const OPEN_BIDS: &str = "bids:open";
    /// Bids whose claim may not have produced a job yet.
    pub const PENDING_JOBS: &str = "bids:pending_jobs";
    /// Jobs that may still owe reputation credits.
    pub const PENDING_REPUTATION: &str = "jobs:pending_reputation";

    pub fn bid(id: Uuid) -> String {
        format!("bid:{id}")
    }

    pub fn job(id: Uuid) -> String {
        format!("job:{id}")
    }

    pub fn seat(seat_id: &str) -> String {
        format!("seat:{seat_id}")
    }

    /// Presence of this key means the seat is cooling down.
    pub fn seat_cooldown(seat_id: &str) -> String {
        format!("seat:{seat_id}:cooldown")
    }

    pub fn reputation(user_id: Uuid) -> String {
        format!("reputation:{user_id}")
    }

    pub fn user_bids(user_id: Uuid) -> String {
        format!("user:{user_id}:bids")
    }

    pub fn user_jobs(user_id: Uuid) -> String {
        format!("user:{user_id}:jobs")
    }
}
