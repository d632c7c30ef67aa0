//! Two-tier cache for upstream market data.
//!
//! A fast in-process tier sits in front of a durable on-disk tier. Every
//! entry carries its creation time and a caller-chosen TTL; an entry is
//! served only while `now - created_at <= ttl`, from either tier.
//!
//! # Layout
//!
//! ```text
//! <root>/
//! ├── cache_meta.jsonl            metadata index journal (key → created_at, ttl, size)
//! ├── quote/
//! │   ├── 000/sh600000.json       record: payload + created_at + ttl
//! │   └── 001/sz000001.json
//! └── report/
//!     └── 000/SH600000.json
//! ```
//!
//! Keys are namespaced by data category, so a quote and a report for the
//! same instrument never collide. Records are sharded by the last
//! [`SHARD_SUFFIX_LEN`] characters of the identifier.

mod clock;
mod disk;
mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use disk::{MetaRecord, META_FILE, SHARD_SUFFIX_LEN};
pub use store::CacheStore;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Cache Key
// ============================================================================

/// Namespaced cache key, rendered as `"<namespace>:<id>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    namespace: String,
    id: String,
}

impl CacheKey {
    pub fn new(namespace: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            id: id.into(),
        }
    }

    /// Parse a rendered key back into its parts.
    pub fn parse(raw: &str) -> Option<Self> {
        let (namespace, id) = raw.split_once(':')?;
        let key = Self::new(namespace, id);
        key.is_storable().then_some(key)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Shard directory name: the last few characters of the identifier.
    pub fn shard(&self) -> &str {
        let start = self
            .id
            .char_indices()
            .rev()
            .nth(SHARD_SUFFIX_LEN - 1)
            .map_or(0, |(idx, _)| idx);
        &self.id[start..]
    }

    /// Whether both parts are non-empty and safe to use as path components.
    pub fn is_storable(&self) -> bool {
        fn safe(part: &str) -> bool {
            !part.is_empty()
                && part != "."
                && part != ".."
                && !part.contains(['/', '\\', ':'])
                && !part.chars().any(char::is_control)
        }
        safe(&self.namespace) && safe(&self.id)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.id)
    }
}

// ============================================================================
// Cache Entry
// ============================================================================

/// A cached payload with its freshness window.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn new(payload: serde_json::Value, created_at: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            payload,
            created_at,
            ttl,
        }
    }

    /// Valid iff the TTL is positive and has not lapsed at `now`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        is_fresh(self.created_at, self.ttl, now)
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.created_at + self.ttl
    }
}

/// Freshness rule shared by both tiers. A zero TTL is expired on arrival.
pub(crate) fn is_fresh(created_at: DateTime<Utc>, ttl: Duration, now: DateTime<Utc>) -> bool {
    ttl > Duration::zero() && now - created_at <= ttl
}

// ============================================================================
// Cache Stats
// ============================================================================

/// Snapshot of cache contents, for observability only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Entries still within their TTL
    pub valid_count: usize,
    /// Entries whose TTL has lapsed but are not yet purged
    pub expired_count: usize,
    /// Total serialized size of all tracked entries
    pub total_size_bytes: u64,
    /// Entries currently held in the fast tier
    pub memory_entries: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cache_key_display_and_parse() {
        let key = CacheKey::new("quote", "sh600000");
        assert_eq!(key.to_string(), "quote:sh600000");
        assert_eq!(CacheKey::parse("quote:sh600000"), Some(key));
        assert_eq!(CacheKey::parse("no-separator"), None);
        assert_eq!(CacheKey::parse("quote:"), None);
    }

    #[test]
    fn test_cache_key_shard() {
        assert_eq!(CacheKey::new("quote", "sh600000").shard(), "000");
        assert_eq!(CacheKey::new("quote", "ab").shard(), "ab");
        assert_eq!(CacheKey::new("report", "半导体公司").shard(), "体公司");
    }

    #[test]
    fn test_shard_spreads_same_venue_codes() {
        let shards: std::collections::HashSet<_> = ["sh600000", "sh600036", "sh600519", "sh601318"]
            .iter()
            .map(|id| CacheKey::new("quote", *id).shard().to_string())
            .collect();
        assert_eq!(shards.len(), 4);
    }

    #[test]
    fn test_cache_key_storable() {
        assert!(CacheKey::new("quote", "sh600000").is_storable());
        assert!(!CacheKey::new("", "sh600000").is_storable());
        assert!(!CacheKey::new("quote", "").is_storable());
        assert!(!CacheKey::new("quote", "../etc").is_storable());
        assert!(!CacheKey::new("quote", "..").is_storable());
        assert!(!CacheKey::new("quo:te", "x").is_storable());
    }

    #[test]
    fn test_entry_validity_window() {
        let now = Utc::now();
        let entry = CacheEntry::new(json!(1), now, Duration::hours(1));
        assert!(entry.is_valid_at(now));
        assert!(entry.is_valid_at(now + Duration::hours(1)));
        assert!(!entry.is_valid_at(now + Duration::hours(1) + Duration::seconds(1)));
        assert_eq!(entry.expires_at(), now + Duration::hours(1));
    }

    #[test]
    fn test_zero_ttl_is_expired_immediately() {
        let now = Utc::now();
        let entry = CacheEntry::new(json!(1), now, Duration::zero());
        assert!(!entry.is_valid_at(now));
    }
}
