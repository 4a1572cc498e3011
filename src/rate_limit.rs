//! Per-seat grab cooldown.
//!
//! A seat may start one grab per cooldown window. The window is a store key
//! written with set-if-absent and a TTL equal to the cooldown, so the check and
//! the update are one atomic operation and expiry needs no timer.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::debug;

use crate::error::{ExchangeError, ExchangeResult, StoreError};
use crate::models::seats::GrabStamp;
use crate::store::{self, Store, keys};

#[derive(Debug, Clone)]
pub struct GrabRateLimiter {
    cooldown: Duration,
}

/// The cooldown window one grab opened. Handing it back through
/// [`GrabRateLimiter::release`] removes that window and no other.
#[derive(Debug, Clone)]
pub struct CooldownPermit {
    key: String,
    stamp: String,
}

impl GrabRateLimiter {
    pub fn new(cooldown: Duration) -> Self {
        Self { cooldown }
    }

    /// Open a new cooldown window for the seat, or fail with `RateLimited`
    /// if one is still running. A rejected attempt writes nothing.
    ///
    /// Returns `None` when cooldowns are disabled.
    pub async fn try_acquire(
        &self,
        store: &dyn Store,
        seat_id: &str,
        now: DateTime<Utc>,
    ) -> ExchangeResult<Option<CooldownPermit>> {
        if self.cooldown.is_zero() {
            return Ok(None);
        }

        let key = keys::seat_cooldown(seat_id);
        let stamp = serde_json::to_string(&GrabStamp { last_grab_at: now })
            .map_err(StoreError::from)?;

        if store.set_if_absent(&key, &stamp, Some(self.cooldown)).await? {
            return Ok(Some(CooldownPermit { key, stamp }));
        }

        let retry_after = store.ttl(&key).await?.unwrap_or_default();
        debug!("Seat {seat_id} rate limited for {retry_after:?}");
        Err(ExchangeError::RateLimited { retry_after })
    }

    /// Close the window `permit` opened so the seat may grab again at once.
    /// A window that already expired or was replaced is left alone.
    pub async fn release(&self, store: &dyn Store, permit: &CooldownPermit) -> ExchangeResult<()> {
        if store.compare_and_delete(&permit.key, &permit.stamp).await? {
            debug!("Released cooldown {}", permit.key);
        }
        Ok(())
    }

    /// Start of the seat's current cooldown window, if one is running.
    pub async fn last_grab_at(
        &self,
        store: &dyn Store,
        seat_id: &str,
    ) -> ExchangeResult<Option<DateTime<Utc>>> {
        let stamp = store::get_json::<GrabStamp>(store, &keys::seat_cooldown(seat_id)).await?;
        Ok(stamp.map(|s| s.value.last_grab_at))
    }
}
