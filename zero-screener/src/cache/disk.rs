//! Durable cache tier.
//!
//! Each entry is a self-describing JSON record under
//! `<root>/<namespace>/<shard>/<id>.json`. A metadata index mapping keys to
//! `(created_at, ttl, size)` is kept in memory and persisted as an
//! append-only journal, so a write costs one record file plus one journal
//! line instead of a full index rewrite.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{debug, info, warn};

use super::{is_fresh, CacheEntry, CacheKey, CacheStats};

/// Journal file name under the cache root.
pub const META_FILE: &str = "cache_meta.jsonl";

/// Number of trailing identifier characters used as the shard directory.
pub const SHARD_SUFFIX_LEN: usize = 3;

/// Journal lines tolerated beyond twice the live key count before compaction.
const COMPACT_SLACK: usize = 64;

// ============================================================================
// On-disk formats
// ============================================================================

/// Record file contents.
#[derive(Debug, Serialize, Deserialize)]
struct DiskRecord {
    key: String,
    payload: Value,
    created_at: DateTime<Utc>,
    ttl_ms: i64,
}

/// Index entry for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaRecord {
    pub created_at: DateTime<Utc>,
    pub ttl_ms: i64,
    /// Serialized record size in bytes
    pub size: u64,
}

impl MetaRecord {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        is_fresh(self.created_at, Duration::milliseconds(self.ttl_ms), now)
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum JournalLine {
    Put {
        key: String,
        created_at: DateTime<Utc>,
        ttl_ms: i64,
        size: u64,
    },
    Remove {
        key: String,
    },
}

impl JournalLine {
    fn put(key: String, meta: &MetaRecord) -> Self {
        Self::Put {
            key,
            created_at: meta.created_at,
            ttl_ms: meta.ttl_ms,
            size: meta.size,
        }
    }
}

// ============================================================================
// Metadata index
// ============================================================================

#[derive(Debug)]
struct MetaIndex {
    entries: HashMap<String, MetaRecord>,
    journal: File,
    /// Lines currently in the journal file
    lines: usize,
}

impl MetaIndex {
    fn append(&mut self, line: &JournalLine) -> Result<()> {
        let mut buf = serde_json::to_vec(line)?;
        buf.push(b'\n');
        self.journal
            .write_all(&buf)
            .context("Failed to append to cache journal")?;
        self.journal.flush()?;
        self.lines += 1;
        Ok(())
    }
}

/// Replay a journal file. The last line for a key wins; malformed lines are skipped.
fn replay(path: &Path) -> Result<(HashMap<String, MetaRecord>, usize)> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((HashMap::new(), 0)),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read {}", path.display()));
        }
    };

    let mut entries = HashMap::new();
    let mut lines = 0;
    let mut skipped = 0;

    for raw in content.lines().filter(|l| !l.trim().is_empty()) {
        lines += 1;
        match serde_json::from_str::<JournalLine>(raw) {
            Ok(JournalLine::Put {
                key,
                created_at,
                ttl_ms,
                size,
            }) => {
                entries.insert(
                    key,
                    MetaRecord {
                        created_at,
                        ttl_ms,
                        size,
                    },
                );
            }
            Ok(JournalLine::Remove { key }) => {
                entries.remove(&key);
            }
            Err(_) => skipped += 1,
        }
    }

    if skipped > 0 {
        warn!(skipped, path = %path.display(), "Skipped malformed cache journal lines");
    }

    Ok((entries, lines))
}

/// Rewrite the journal with one line per live key.
fn compact(path: &Path, entries: &HashMap<String, MetaRecord>) -> Result<()> {
    let tmp = path.with_extension("jsonl.tmp");
    let mut out = Vec::with_capacity(entries.len() * 96);
    for (key, meta) in entries {
        serde_json::to_writer(&mut out, &JournalLine::put(key.clone(), meta))?;
        out.push(b'\n');
    }
    fs::write(&tmp, &out).with_context(|| format!("Failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

// ============================================================================
// Disk Tier
// ============================================================================

/// Durable tier: record files plus the metadata index.
///
/// Index mutations are serialized by the write lock, which also covers the
/// record write so the file and its index line always agree. Record reads
/// take no lock.
#[derive(Debug)]
pub(crate) struct DiskTier {
    root: PathBuf,
    index: RwLock<MetaIndex>,
}

impl DiskTier {
    pub fn open(root: &Path) -> Result<Self> {
        fs::create_dir_all(root)
            .with_context(|| format!("Failed to create cache directory {}", root.display()))?;

        let journal_path = root.join(META_FILE);
        let (entries, mut lines) = replay(&journal_path)?;

        if lines > entries.len() * 2 + COMPACT_SLACK {
            compact(&journal_path, &entries)?;
            info!(before = lines, after = entries.len(), "Compacted cache journal");
            lines = entries.len();
        }

        let journal = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&journal_path)
            .with_context(|| format!("Failed to open {}", journal_path.display()))?;

        debug!(root = %root.display(), entries = entries.len(), "Opened durable cache");

        Ok(Self {
            root: root.to_path_buf(),
            index: RwLock::new(MetaIndex {
                entries,
                journal,
                lines,
            }),
        })
    }

    /// `<root>/<namespace>/<shard>/<id>.json`
    pub fn record_path(&self, key: &CacheKey) -> PathBuf {
        self.root
            .join(key.namespace())
            .join(key.shard())
            .join(format!("{}.json", key.id()))
    }

    pub fn meta(&self, key: &CacheKey) -> Option<MetaRecord> {
        let index = self.index.read().ok()?;
        index.entries.get(&key.to_string()).copied()
    }

    /// Load a fresh entry. Expired, unindexed, missing or corrupt records read as absent.
    pub fn load(&self, key: &CacheKey, now: DateTime<Utc>) -> Option<CacheEntry> {
        let meta = self.meta(key)?;
        if !meta.is_valid_at(now) {
            return None;
        }

        let path = self.record_path(key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(key = %key, error = %e, "Indexed cache record unreadable");
                return None;
            }
        };

        let record: DiskRecord = match serde_json::from_slice(&bytes) {
            Ok(record) => record,
            Err(e) => {
                warn!(key = %key, error = %e, "Corrupt cache record, treating as miss");
                return None;
            }
        };

        if record.key != key.to_string() {
            warn!(key = %key, found = %record.key, "Cache record key mismatch");
            return None;
        }

        let entry = CacheEntry::new(
            record.payload,
            record.created_at,
            Duration::milliseconds(record.ttl_ms),
        );
        entry.is_valid_at(now).then_some(entry)
    }

    /// Persist an entry and record it in the index before returning.
    pub fn store(&self, key: &CacheKey, entry: &CacheEntry) -> Result<()> {
        let rendered = key.to_string();
        let record = DiskRecord {
            key: rendered.clone(),
            payload: entry.payload.clone(),
            created_at: entry.created_at,
            ttl_ms: entry.ttl.num_milliseconds(),
        };
        let bytes = serde_json::to_vec(&record)?;
        let path = self.record_path(key);

        let mut index = self
            .index
            .write()
            .map_err(|_| anyhow::anyhow!("Cache index lock poisoned"))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, &bytes).with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &path).with_context(|| format!("Failed to write {}", path.display()))?;

        let meta = MetaRecord {
            created_at: record.created_at,
            ttl_ms: record.ttl_ms,
            size: bytes.len() as u64,
        };
        index.append(&JournalLine::put(rendered.clone(), &meta))?;
        index.entries.insert(rendered, meta);
        Ok(())
    }

    /// Remove a record and its index entry. Missing records are not an error.
    pub fn remove(&self, key: &CacheKey) -> Result<bool> {
        let rendered = key.to_string();
        let mut index = self
            .index
            .write()
            .map_err(|_| anyhow::anyhow!("Cache index lock poisoned"))?;

        let path = self.record_path(key);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to remove {}", path.display()));
            }
        }

        let existed = index.entries.remove(&rendered).is_some();
        if existed {
            index.append(&JournalLine::Remove { key: rendered })?;
        }
        Ok(existed)
    }

    /// Remove every entry whose TTL has lapsed at `now`, under one index lock.
    /// Returns the number of entries removed.
    pub fn remove_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut index = self
            .index
            .write()
            .map_err(|_| anyhow::anyhow!("Cache index lock poisoned"))?;

        let expired: Vec<String> = index
            .entries
            .iter()
            .filter(|(_, meta)| !meta.is_valid_at(now))
            .map(|(key, _)| key.clone())
            .collect();

        let mut removed = 0;
        for rendered in expired {
            if let Some(key) = CacheKey::parse(&rendered) {
                let path = self.record_path(&key);
                match fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => {
                        warn!(key = %key, error = %e, "Failed to purge cache record");
                        continue;
                    }
                }
            }
            index.entries.remove(&rendered);
            index.append(&JournalLine::Remove { key: rendered })?;
            removed += 1;
        }
        Ok(removed)
    }

    /// Valid and expired counts plus total size, from the index alone.
    pub fn stats(&self, now: DateTime<Utc>) -> CacheStats {
        let Ok(index) = self.index.read() else {
            return CacheStats::default();
        };
        index
            .entries
            .values()
            .fold(CacheStats::default(), |mut stats, meta| {
                if meta.is_valid_at(now) {
                    stats.valid_count += 1;
                } else {
                    stats.expired_count += 1;
                }
                stats.total_size_bytes += meta.size;
                stats
            })
    }

    #[cfg(test)]
    fn journal_lines(&self) -> usize {
        self.index.read().map(|i| i.lines).unwrap_or(0)
    }
}
