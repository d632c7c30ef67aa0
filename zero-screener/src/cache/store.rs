//! Cache store combining the fast and durable tiers.

use anyhow::{bail, Result};
use chrono::Duration;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

use super::clock::{Clock, SystemClock};
use super::disk::DiskTier;
use super::{CacheEntry, CacheKey, CacheStats};

type MemoryTier = HashMap<CacheKey, CacheEntry>;

/// Two-tier TTL cache.
///
/// Reads check the fast tier, then the durable tier (promoting hits).
/// Writes land in the fast tier and are persisted before the call returns.
///
/// Lock order is fast tier, then durable index. Every mutation of the fast
/// tier re-checks the entry under the write lock, so a concurrent `set` is
/// never undone by a reader that saw an older state.
#[derive(Debug)]
pub struct CacheStore {
    memory: RwLock<MemoryTier>,
    disk: Option<DiskTier>,
    clock: Arc<dyn Clock>,
}

impl CacheStore {
    /// Open a durable store rooted at `dir`, creating it if needed.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_clock(dir, Arc::new(SystemClock))
    }

    pub fn open_with_clock(dir: impl AsRef<Path>, clock: Arc<dyn Clock>) -> Result<Self> {
        let disk = DiskTier::open(dir.as_ref())?;
        Ok(Self {
            memory: RwLock::new(HashMap::new()),
            disk: Some(disk),
            clock,
        })
    }

    /// Store without a durable tier.
    pub fn in_memory() -> Self {
        Self::in_memory_with_clock(Arc::new(SystemClock))
    }

    pub fn in_memory_with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            memory: RwLock::new(HashMap::new()),
            disk: None,
            clock,
        }
    }

    pub fn is_durable(&self) -> bool {
        self.disk.is_some()
    }

    fn read_memory(&self) -> RwLockReadGuard<'_, MemoryTier> {
        self.memory.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_memory(&self) -> RwLockWriteGuard<'_, MemoryTier> {
        self.memory.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get a fresh payload, or `None` if absent or expired.
    pub fn get(&self, key: &CacheKey) -> Option<Value> {
        let now = self.clock.now();

        let stale = match self.read_memory().get(key) {
            Some(entry) if entry.is_valid_at(now) => return Some(entry.payload.clone()),
            Some(_) => true,
            None => false,
        };

        if stale {
            let mut memory = self.write_memory();
            match memory.get(key) {
                // Replaced by a concurrent set since the read lock was dropped
                Some(entry) if entry.is_valid_at(now) => return Some(entry.payload.clone()),
                Some(_) => {
                    memory.remove(key);
                }
                None => {}
            }
        }

        let loaded = self.disk.as_ref()?.load(key, now)?;

        let mut memory = self.write_memory();
        if let Some(current) = memory.get(key) {
            if current.created_at >= loaded.created_at {
                return current.is_valid_at(now).then(|| current.payload.clone());
            }
        }
        let payload = loaded.payload.clone();
        memory.insert(key.clone(), loaded);
        Some(payload)
    }

    /// Get and decode a payload. A payload that no longer decodes reads as a miss.
    pub fn get_as<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let payload = self.get(key)?;
        match serde_json::from_value(payload) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(key = %key, error = %e, "Cached payload does not decode, treating as miss");
                None
            }
        }
    }

    /// Store a payload with the given TTL.
    ///
    /// The TTL is kept at millisecond precision, the resolution of the
    /// durable tier, so both tiers agree on when the entry expires.
    pub fn set(&self, key: &CacheKey, payload: Value, ttl: Duration) -> Result<()> {
        if !key.is_storable() {
            bail!("Invalid cache key: {key:?}");
        }

        let ttl = Duration::milliseconds(ttl.num_milliseconds());
        let entry = CacheEntry::new(payload, self.clock.now(), ttl);

        // Held across the durable write so concurrent writers land in the
        // same order in both tiers.
        let mut memory = self.write_memory();
        if let Some(disk) = &self.disk {
            disk.store(key, &entry)?;
        }
        memory.insert(key.clone(), entry);
        Ok(())
    }

    pub fn set_as<T: Serialize>(&self, key: &CacheKey, value: &T, ttl: Duration) -> Result<()> {
        let payload = serde_json::to_value(value)?;
        self.set(key, payload, ttl)
    }

    /// Remove an entry from both tiers. Returns whether it existed.
    pub fn invalidate(&self, key: &CacheKey) -> Result<bool> {
        let mut memory = self.write_memory();
        let in_memory = memory.remove(key).is_some();

        let on_disk = match &self.disk {
            Some(disk) => disk.remove(key)?,
            None => false,
        };

        Ok(in_memory || on_disk)
    }

    /// Drop expired entries from both tiers. Returns the number removed.
    pub fn purge_expired(&self) -> Result<usize> {
        let now = self.clock.now();

        let mut memory = self.write_memory();
        let before = memory.len();
        memory.retain(|_, entry| entry.is_valid_at(now));
        let from_memory = before - memory.len();

        // With a durable tier every entry is indexed there, so count from the index.
        let removed = match &self.disk {
            Some(disk) => disk.remove_expired(now)?,
            None => from_memory,
        };

        debug!(removed, "Purged expired cache entries");
        Ok(removed)
    }

    /// Snapshot of entry counts and sizes.
    pub fn stats(&self) -> CacheStats {
        let now = self.clock.now();
        let memory = self.read_memory();

        let mut stats = match &self.disk {
            Some(disk) => disk.stats(now),
            None => memory_stats(&memory, now),
        };
        stats.memory_entries = memory.len();
        stats
    }

    /// Drop the fast tier. Durable entries stay and are re-promoted on read.
    pub fn clear_memory(&self) {
        self.write_memory().clear();
    }
}

fn memory_stats(memory: &MemoryTier, now: chrono::DateTime<chrono::Utc>) -> CacheStats {
    memory.values().fold(CacheStats::default(), |mut stats, entry| {
        if entry.is_valid_at(now) {
            stats.valid_count += 1;
        } else {
            stats.expired_count += 1;
        }
        stats.total_size_bytes += serde_json::to_vec(&entry.payload)
            .map(|b| b.len() as u64)
            .unwrap_or(0);
        stats
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ManualClock;
    use chrono::Utc;
    use serde::Deserialize;
    use serde_json::json;
    use tempfile::TempDir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        price: f64,
    }

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(Utc::now()))
    }

    #[test]
    fn test_in_memory_set_get() {
        let store = CacheStore::in_memory();
        let key = CacheKey::new("quote", "sh600000");

        assert!(store.get(&key).is_none());
        store.set(&key, json!({"a": 1}), Duration::hours(1)).unwrap();
        assert_eq!(store.get(&key), Some(json!({"a": 1})));
        assert!(!store.is_durable());
    }

    #[test]
    fn test_typed_round_trip() {
        let store = CacheStore::in_memory();
        let key = CacheKey::new("quote", "sh600000");
        let sample = Sample {
            name: "浦发银行".into(),
            price: 10.5,
        };

        store.set_as(&key, &sample, Duration::hours(1)).unwrap();
        assert_eq!(store.get_as::<Sample>(&key), Some(sample));
    }

    #[test]
    fn test_undecodable_payload_is_miss() {
        let store = CacheStore::in_memory();
        let key = CacheKey::new("quote", "sh600000");
        store.set(&key, json!("not a sample"), Duration::hours(1)).unwrap();
        assert!(store.get_as::<Sample>(&key).is_none());
    }

    #[test]
    fn test_expiry_with_manual_clock() {
        let clock = clock();
        let store = CacheStore::in_memory_with_clock(clock.clone());
        let key = CacheKey::new("quote", "sh600000");

        store.set(&key, json!(1), Duration::seconds(60)).unwrap();
        clock.advance(Duration::seconds(60));
        assert!(store.get(&key).is_some());

        clock.advance(Duration::seconds(1));
        assert!(store.get(&key).is_none());
        assert_eq!(store.stats().memory_entries, 0);
    }

    #[test]
    fn test_invalid_key_rejected() {
        let store = CacheStore::in_memory();
        assert!(store
            .set(&CacheKey::new("quote", ""), json!(1), Duration::hours(1))
            .is_err());
        assert!(store
            .set(&CacheKey::new("quote", "a/b"), json!(1), Duration::hours(1))
            .is_err());
    }

    #[test]
    fn test_disk_promotion_after_clear_memory() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::open(dir.path()).unwrap();
        let key = CacheKey::new("report", "SH600000");

        store.set(&key, json!([1, 2, 3]), Duration::hours(1)).unwrap();
        store.clear_memory();
        assert_eq!(store.stats().memory_entries, 0);

        assert_eq!(store.get(&key), Some(json!([1, 2, 3])));
        assert_eq!(store.stats().memory_entries, 1);
    }

    #[test]
    fn test_invalidate_both_tiers() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::open(dir.path()).unwrap();
        let key = CacheKey::new("quote", "sz000001");

        store.set(&key, json!(1), Duration::hours(1)).unwrap();
        assert!(store.invalidate(&key).unwrap());
        assert!(store.get(&key).is_none());
        assert!(!store.invalidate(&key).unwrap());
    }

    #[test]
    fn test_purge_expired_counts() {
        let clock = clock();
        let dir = TempDir::new().unwrap();
        let store = CacheStore::open_with_clock(dir.path(), clock.clone()).unwrap();

        store
            .set(&CacheKey::new("quote", "a1"), json!(1), Duration::seconds(10))
            .unwrap();
        store
            .set(&CacheKey::new("quote", "b1"), json!(2), Duration::hours(1))
            .unwrap();

        clock.advance(Duration::seconds(30));
        assert_eq!(store.purge_expired().unwrap(), 1);

        let stats = store.stats();
        assert_eq!(stats.valid_count, 1);
        assert_eq!(stats.expired_count, 0);
    }

    #[test]
    fn test_in_memory_stats() {
        let clock = clock();
        let store = CacheStore::in_memory_with_clock(clock.clone());
        store
            .set(&CacheKey::new("quote", "a1"), json!(1), Duration::seconds(10))
            .unwrap();
        store
            .set(&CacheKey::new("quote", "b1"), json!(2), Duration::zero())
            .unwrap();

        let stats = store.stats();
        assert_eq!(stats.valid_count, 1);
        assert_eq!(stats.expired_count, 1);
        assert_eq!(stats.memory_entries, 2);
        assert_eq!(stats.total_size_bytes, 2);
    }
}
