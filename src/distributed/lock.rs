//! Lock store abstraction and the in-process implementation

use crate::distributed::CoordinationResult;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Shared key/value store with set-if-absent leases
#[async_trait]
pub trait LockStore: Send + Sync + 'static {
    /// Sets `key` to `owner` only if absent; the key expires after `lease`
    ///
    /// Returns true if this call took the lock.
    async fn try_acquire(&self, key: &str, owner: &str, lease: Duration) -> CoordinationResult<bool>;

    /// Unconditionally sets `key` (no expiry)
    async fn put(&self, key: &str, value: &str) -> CoordinationResult<()>;

    /// Deletes `key` if present
    async fn remove(&self, key: &str) -> CoordinationResult<()>;
}

#[derive(Debug)]
struct Slot {
    value: String,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// Table size below which expired slots are left in place
const MIN_SWEEP_LEN: usize = 64;

#[derive(Debug)]
struct Slots {
    entries: HashMap<String, Slot>,
    sweep_at: usize,
}

impl Default for Slots {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            sweep_at: MIN_SWEEP_LEN,
        }
    }
}

impl Slots {
    /// Drops expired leases once the table has grown past the sweep mark
    ///
    /// The mark doubles relative to what survives, so sweeping stays
    /// amortized constant per acquisition.
    fn sweep(&mut self, now: Instant) {
        if self.entries.len() < self.sweep_at {
            return;
        }
        self.entries.retain(|_, slot| slot.is_live(now));
        self.sweep_at = (self.entries.len() * 2).max(MIN_SWEEP_LEN);
    }
}

/// Lock store kept in process memory
///
/// Engines sharing one `Arc<MemoryLockStore>` coordinate exactly like
/// processes sharing a Redis instance. Used for tests and single-host runs.
/// Expired leases are dropped during acquisition, so memory follows the
/// number of live keys rather than every key ever claimed.
#[derive(Debug, Default)]
pub struct MemoryLockStore {
    slots: Mutex<Slots>,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a live key
    pub fn get(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        self.slots
            .lock()
            .entries
            .get(key)
            .filter(|slot| slot.is_live(now))
            .map(|slot| slot.value.clone())
    }

    /// Live keys starting with `prefix`
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .slots
            .lock()
            .entries
            .iter()
            .filter(|(key, slot)| key.starts_with(prefix) && slot.is_live(now))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn try_acquire(&self, key: &str, owner: &str, lease: Duration) -> CoordinationResult<bool> {
        let now = Instant::now();
        let mut slots = self.slots.lock();

        if slots.entries.get(key).is_some_and(|slot| slot.is_live(now)) {
            return Ok(false);
        }

        slots.sweep(now);
        slots.entries.insert(
            key.to_string(),
            Slot {
                value: owner.to_string(),
                expires_at: Some(now + lease),
            },
        );
        Ok(true)
    }

    async fn put(&self, key: &str, value: &str) -> CoordinationResult<()> {
        self.slots.lock().entries.insert(
            key.to_string(),
            Slot {
                value: value.to_string(),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn remove(&self, key: &str) -> CoordinationResult<()> {
        self.slots.lock().entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_only_first_acquire_wins() {
        let store = MemoryLockStore::new();
        let lease = Duration::from_secs(60);

        assert!(store.try_acquire("k", "a", lease).await.unwrap());
        assert!(!store.try_acquire("k", "b", lease).await.unwrap());
        assert_eq!(store.get("k").as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_lease_expires() {
        let store = MemoryLockStore::new();
        assert!(store
            .try_acquire("k", "a", Duration::from_millis(10))
            .await
            .unwrap());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(store.get("k").is_none());
        assert!(store
            .try_acquire("k", "b", Duration::from_secs(60))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_expired_leases_are_dropped() {
        let store = MemoryLockStore::new();
        for i in 0..100 {
            store
                .try_acquire(&format!("old:{}", i), "a", Duration::from_millis(10))
                .await
                .unwrap();
        }
        store.put("marker", "kept").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        for i in 0..100 {
            assert!(store
                .try_acquire(&format!("new:{}", i), "b", Duration::from_secs(60))
                .await
                .unwrap());
        }

        let slots = store.slots.lock();
        assert!(slots.entries.len() <= 128, "{} slots kept", slots.entries.len());
        assert!(!slots.entries.keys().any(|key| key.starts_with("old:")));
        assert!(slots.entries.contains_key("marker"));
        assert!(slots.entries.contains_key("new:99"));
    }

    #[tokio::test]
    async fn test_put_and_remove() {
        let store = MemoryLockStore::new();
        store.put("p:queued:1", "x").await.unwrap();
        store.put("p:queued:2", "y").await.unwrap();
        store.put("p:running:1", "z").await.unwrap();

        assert_eq!(store.keys_with_prefix("p:queued:").len(), 2);
        store.remove("p:queued:1").await.unwrap();
        assert_eq!(store.keys_with_prefix("p:queued:"), vec!["p:queued:2".to_string()]);

        // removing a missing key is fine
        store.remove("absent").await.unwrap();
    }
}
