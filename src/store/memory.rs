use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

use super::{Store, StoreResult};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// In-process [`Store`] for tests and single-instance development.
///
/// Every operation takes the write lock, so each one is atomic on its own.
/// Expiry follows the tokio clock, which lets tests pause and advance time.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, Entry>>,
    sets: RwLock<HashMap<String, HashSet<String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let now = Instant::now();
        let values = self.values.read().await;
        Ok(values
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let entry = Entry {
            value: value.to_string(),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        self.values.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> StoreResult<bool> {
        let now = Instant::now();
        let mut values = self.values.write().await;
        if values.get(key).is_some_and(|e| e.is_live(now)) {
            return Ok(false);
        }
        values.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: ttl.map(|ttl| now + ttl),
            },
        );
        Ok(true)
    }

    async fn compare_and_swap(&self, key: &str, expected: &str, new: &str) -> StoreResult<bool> {
        let now = Instant::now();
        let mut values = self.values.write().await;
        match values.get_mut(key) {
            Some(entry) if entry.is_live(now) && entry.value == expected => {
                entry.value = new.to_string();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> StoreResult<bool> {
        let now = Instant::now();
        let mut values = self.values.write().await;
        if values
            .get(key)
            .is_some_and(|e| e.is_live(now) && e.value == expected)
        {
            values.remove(key);
            return Ok(true);
        }
        Ok(false)
    }

    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        let now = Instant::now();
        let values = self.values.read().await;
        Ok(values
            .get(key)
            .filter(|e| e.is_live(now))
            .and_then(|e| e.expires_at)
            .map(|at| at - now))
    }

    async fn set_add(&self, key: &str, member: &str) -> StoreResult<()> {
        self.sets
            .write()
            .await
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> StoreResult<()> {
        let mut sets = self.sets.write().await;
        if let Some(set) = sets.get_mut(key) {
            set.remove(member);
            if set.is_empty() {
                sets.remove(key);
            }
        }
        Ok(())
    }

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        let sets = self.sets.read().await;
        Ok(sets
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn set_if_absent_respects_ttl() {
        let store = MemoryStore::new();
        let ttl = Some(Duration::from_secs(60));

        assert!(store.set_if_absent("k", "a", ttl).await.unwrap());
        assert!(!store.set_if_absent("k", "b", ttl).await.unwrap());
        assert_eq!(store.ttl("k").await.unwrap(), Some(Duration::from_secs(60)));

        tokio::time::advance(Duration::from_secs(61)).await;

        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.set_if_absent("k", "b", ttl).await.unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn compare_and_swap_requires_exact_match() {
        let store = MemoryStore::new();
        assert!(!store.compare_and_swap("k", "a", "b").await.unwrap());

        store.set("k", "a", None).await.unwrap();
        assert!(!store.compare_and_swap("k", "x", "b").await.unwrap());
        assert!(store.compare_and_swap("k", "a", "b").await.unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn compare_and_delete_leaves_newer_value() {
        let store = MemoryStore::new();
        store.set("k", "a", None).await.unwrap();
        store.set("k", "b", None).await.unwrap();

        assert!(!store.compare_and_delete("k", "a").await.unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("b"));

        assert!(store.compare_and_delete("k", "b").await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn sets_track_membership() {
        let store = MemoryStore::new();
        store.set_add("s", "1").await.unwrap();
        store.set_add("s", "2").await.unwrap();
        store.set_add("s", "2").await.unwrap();

        let mut members = store.set_members("s").await.unwrap();
        members.sort();
        assert_eq!(members, vec!["1", "2"]);

        store.set_remove("s", "1").await.unwrap();
        store.set_remove("s", "2").await.unwrap();
        assert!(store.set_members("s").await.unwrap().is_empty());
    }
}
