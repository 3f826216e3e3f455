//! State store abstraction for workflow status records
//!
//! The orchestrator never owns a concrete backend. A [`StateStore`] is
//! injected at construction and [`StatusStore`] layers typed access to
//! [`WorkflowRecord`]s on top of it.

use super::record::{WorkflowId, WorkflowRecord};
use crate::{MedflowError, Result};
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Key prefix under which workflow records are written
pub const STATUS_KEY_PREFIX: &str = "workflow_status:";

/// Build the store key for a workflow record
pub fn status_key(id: &WorkflowId) -> String {
    format!("{}{}", STATUS_KEY_PREFIX, id)
}

/// Key/value store with per-entry time-to-live
///
/// Implementations must be safe to call from many workflows at once.
/// Entries past their TTL must read as absent.
pub trait StateStore: Send + Sync {
    /// Read a value, `None` if absent or expired
    fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Write a value, replacing any previous entry and resetting its TTL
    fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<()>;

    /// List live keys starting with `prefix`
    fn keys(&self, prefix: &str) -> Result<Vec<String>>;
}

#[derive(Debug, Clone)]
struct StoreEntry {
    value: Value,
    expires_at: Instant,
}

impl StoreEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Writes between sweeps of expired entries
const PURGE_INTERVAL: u64 = 64;

/// In-process [`StateStore`] backed by a concurrent map
///
/// Expiry is measured on the tokio clock, so paused-time tests can
/// advance past a TTL without sleeping. Expired entries are swept every
/// 64 writes and on every `keys` call, which bounds the map by the
/// records written within one TTL.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    entries: DashMap<String, StoreEntry>,
    writes: AtomicU64,
}

impl MemoryStateStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries held, including expired ones not yet purged
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            tracing::debug!(removed, "purged expired state entries");
        }
        removed
    }
}

impl StateStore for MemoryStateStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let now = Instant::now();
        match self.entries.get(key) {
            None => return Ok(None),
            Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
            Some(_) => {}
        }
        // The read guard is released above; removing while holding it would deadlock.
        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        Ok(None)
    }

    fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<()> {
        let expires_at = Instant::now() + ttl;
        self.entries
            .insert(key.to_string(), StoreEntry { value, expires_at });
        if self.writes.fetch_add(1, Ordering::Relaxed) % PURGE_INTERVAL == PURGE_INTERVAL - 1 {
            self.purge_expired();
        }
        Ok(())
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        self.purge_expired();
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.key().starts_with(prefix) && !entry.value().is_expired(now))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

/// Typed view of workflow records inside a [`StateStore`]
#[derive(Clone)]
pub struct StatusStore {
    store: Arc<dyn StateStore>,
    ttl: Duration,
}

impl std::fmt::Debug for StatusStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusStore").field("ttl", &self.ttl).finish()
    }
}

impl StatusStore {
    /// Wrap a store, writing every record with the given TTL
    pub fn new(store: Arc<dyn StateStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// TTL applied to every write
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Write the full record under its status key
    pub fn save(&self, record: &WorkflowRecord) -> Result<()> {
        let value = serde_json::to_value(record)?;
        self.store.set(&status_key(&record.id), value, self.ttl)
    }

    /// Read a record, `None` if absent or expired
    pub fn load(&self, id: &WorkflowId) -> Result<Option<WorkflowRecord>> {
        let Some(value) = self.store.get(&status_key(id))? else {
            return Ok(None);
        };
        serde_json::from_value(value).map(Some).map_err(|e| {
            MedflowError::Storage(format!("corrupt status record for workflow {}: {}", id, e))
        })
    }

    /// Every live record, oldest first
    ///
    /// Entries that expire or fail to decode between listing and reading
    /// are skipped.
    pub fn list(&self) -> Result<Vec<WorkflowRecord>> {
        let mut records = Vec::new();
        for key in self.store.keys(STATUS_KEY_PREFIX)? {
            let Some(value) = self.store.get(&key)? else {
                continue;
            };
            match serde_json::from_value::<WorkflowRecord>(value) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(key = %key, error = %e, "skipping undecodable status record"),
            }
        }
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }
}
