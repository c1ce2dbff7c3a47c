//! Append-only location persistence.
//!
//! Every position a tracker ever reports is kept as an immutable record so
//! that a client reconnecting mid-flight still sees correct history. The
//! contract is small: append, latest, history, list, clear. Records are
//! never mutated in place, and `created_at` is strictly increasing per
//! (tracker, session) key - the store bumps the clock value if the wall
//! clock repeats a millisecond across consecutive appends.
//!
//! Two implementations:
//! - [`MemoryLocationStore`]: process-local, used when no data directory is
//!   configured and throughout the test suite.
//! - [`SledLocationStore`]: embedded key-value database for durable history.

use crate::location::{LocationRecord, TrackerKey, GLOBAL_SESSION};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Default bound on history queries.
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Persistence failures. Fatal to the simulation task that hit them,
/// harmless to everything else.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

// ============================================================================
// STORE CONTRACT
// ============================================================================

/// Read/write contract for location persistence.
///
/// Guarantees expected from implementations:
/// - `append` is atomic: a failed append leaves no partial record.
/// - Single-process read-after-write consistency.
/// - No record is ever mutated in place.
#[async_trait]
pub trait LocationStore: Send + Sync {
    /// Stores a record, assigning its `created_at` timestamp.
    /// Returns the record as stored.
    async fn append(&self, record: LocationRecord) -> Result<LocationRecord, StoreError>;

    /// Most recent record for the key, or `None`.
    async fn latest(
        &self,
        tracker_id: &str,
        session_id: &str,
    ) -> Result<Option<LocationRecord>, StoreError>;

    /// Up to `limit` records for the key, most recent first.
    async fn history(
        &self,
        tracker_id: &str,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<LocationRecord>, StoreError>;

    /// Distinct tracker ids visible to the session: the union of the
    /// session's own trackers and those under the "global" session.
    /// Sorted, deduplicated.
    async fn list_tracker_ids(&self, session_id: &str) -> Result<Vec<String>, StoreError>;

    /// Deletes all records for the key; returns how many were removed.
    async fn clear(&self, tracker_id: &str, session_id: &str) -> Result<u64, StoreError>;
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ============================================================================
// IN-MEMORY STORE
// ============================================================================

/// Process-local store. Read-after-write consistent by construction.
#[derive(Default)]
pub struct MemoryLocationStore {
    records: Mutex<HashMap<TrackerKey, Vec<LocationRecord>>>,
}

impl MemoryLocationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LocationStore for MemoryLocationStore {
    async fn append(&self, mut record: LocationRecord) -> Result<LocationRecord, StoreError> {
        let key = TrackerKey::new(record.tracker_id.clone(), record.session_id.clone());
        let mut records = self.records.lock().unwrap();
        let stream = records.entry(key).or_default();

        let floor = stream.last().map(|r| r.created_at + 1).unwrap_or(0);
        record.created_at = unix_millis().max(floor);
        stream.push(record.clone());
        Ok(record)
    }

    async fn latest(
        &self,
        tracker_id: &str,
        session_id: &str,
    ) -> Result<Option<LocationRecord>, StoreError> {
        let key = TrackerKey::new(tracker_id, session_id);
        let records = self.records.lock().unwrap();
        Ok(records.get(&key).and_then(|stream| stream.last().cloned()))
    }

    async fn history(
        &self,
        tracker_id: &str,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<LocationRecord>, StoreError> {
        let key = TrackerKey::new(tracker_id, session_id);
        let records = self.records.lock().unwrap();
        Ok(records
            .get(&key)
            .map(|stream| stream.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn list_tracker_ids(&self, session_id: &str) -> Result<Vec<String>, StoreError> {
        let records = self.records.lock().unwrap();
        let ids: BTreeSet<String> = records
            .keys()
            .filter(|key| key.session_id == session_id || key.session_id == GLOBAL_SESSION)
            .map(|key| key.tracker_id.clone())
            .collect();
        Ok(ids.into_iter().collect())
    }

    async fn clear(&self, tracker_id: &str, session_id: &str) -> Result<u64, StoreError> {
        let key = TrackerKey::new(tracker_id, session_id);
        let mut records = self.records.lock().unwrap();
        Ok(records.remove(&key).map(|stream| stream.len() as u64).unwrap_or(0))
    }
}

// ============================================================================
// SLED-BACKED STORE
// ============================================================================

/// Durable store on an embedded sled database.
///
/// Key layout: `session \0 tracker \0 created_at_be64`. The timestamp
/// suffix is big-endian so `scan_prefix` yields a key's records in
/// chronological order; per-key monotonicity of `created_at` makes the
/// suffix unique without a separate sequence.
pub struct SledLocationStore {
    db: sled::Db,
}

impl SledLocationStore {
    /// Opens a persistent store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path)
            .map_err(|e| StoreError::Storage(format!("failed to open sled DB: {}", e)))?;
        Ok(Self { db })
    }

    /// Creates a temporary store (for testing).
    #[cfg(test)]
    pub fn open_temp() -> Result<Self, StoreError> {
        let config = sled::Config::new().temporary(true);
        let db = config
            .open()
            .map_err(|e| StoreError::Storage(format!("failed to open temp DB: {}", e)))?;
        Ok(Self { db })
    }

    fn key_prefix(tracker_id: &str, session_id: &str) -> Vec<u8> {
        let mut prefix = Vec::with_capacity(session_id.len() + tracker_id.len() + 2);
        prefix.extend_from_slice(session_id.as_bytes());
        prefix.push(0);
        prefix.extend_from_slice(tracker_id.as_bytes());
        prefix.push(0);
        prefix
    }

    fn last_created_at(&self, prefix: &[u8]) -> Result<Option<u64>, StoreError> {
        match self.db.scan_prefix(prefix).next_back() {
            Some(entry) => {
                let (key, _) =
                    entry.map_err(|e| StoreError::Storage(format!("scan failed: {}", e)))?;
                let suffix = &key[key.len() - 8..];
                let mut ts = [0u8; 8];
                ts.copy_from_slice(suffix);
                Ok(Some(u64::from_be_bytes(ts)))
            }
            None => Ok(None),
        }
    }

    fn decode(value: &[u8]) -> Result<LocationRecord, StoreError> {
        serde_json::from_slice(value)
            .map_err(|e| StoreError::Serialization(format!("record decode failed: {}", e)))
    }

    /// Distinct tracker ids recorded directly under one session.
    fn tracker_ids_for(&self, session_id: &str) -> Result<BTreeSet<String>, StoreError> {
        let mut session_prefix = Vec::with_capacity(session_id.len() + 1);
        session_prefix.extend_from_slice(session_id.as_bytes());
        session_prefix.push(0);

        let mut ids = BTreeSet::new();
        for entry in self.db.scan_prefix(&session_prefix) {
            let (key, _) = entry.map_err(|e| StoreError::Storage(format!("scan failed: {}", e)))?;
            let rest = &key[session_prefix.len()..];
            if let Some(end) = rest.iter().position(|b| *b == 0) {
                ids.insert(String::from_utf8_lossy(&rest[..end]).into_owned());
            }
        }
        Ok(ids)
    }
}

#[async_trait]
impl LocationStore for SledLocationStore {
    async fn append(&self, mut record: LocationRecord) -> Result<LocationRecord, StoreError> {
        let prefix = Self::key_prefix(&record.tracker_id, &record.session_id);

        let floor = self.last_created_at(&prefix)?.map(|ts| ts + 1).unwrap_or(0);
        record.created_at = unix_millis().max(floor);

        let mut key = prefix;
        key.extend_from_slice(&record.created_at.to_be_bytes());

        let value = serde_json::to_vec(&record)
            .map_err(|e| StoreError::Serialization(format!("record encode failed: {}", e)))?;

        self.db
            .insert(key, value)
            .map_err(|e| StoreError::Storage(format!("insert failed: {}", e)))?;
        self.db
            .flush()
            .map_err(|e| StoreError::Storage(format!("flush failed: {}", e)))?;
        Ok(record)
    }

    async fn latest(
        &self,
        tracker_id: &str,
        session_id: &str,
    ) -> Result<Option<LocationRecord>, StoreError> {
        let prefix = Self::key_prefix(tracker_id, session_id);
        match self.db.scan_prefix(&prefix).next_back() {
            Some(entry) => {
                let (_, value) =
                    entry.map_err(|e| StoreError::Storage(format!("scan failed: {}", e)))?;
                Ok(Some(Self::decode(&value)?))
            }
            None => Ok(None),
        }
    }

    async fn history(
        &self,
        tracker_id: &str,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<LocationRecord>, StoreError> {
        let prefix = Self::key_prefix(tracker_id, session_id);
        let mut records = Vec::new();
        for entry in self.db.scan_prefix(&prefix).rev().take(limit) {
            let (_, value) =
                entry.map_err(|e| StoreError::Storage(format!("scan failed: {}", e)))?;
            records.push(Self::decode(&value)?);
        }
        Ok(records)
    }

    async fn list_tracker_ids(&self, session_id: &str) -> Result<Vec<String>, StoreError> {
        let mut ids = self.tracker_ids_for(session_id)?;
        if session_id != GLOBAL_SESSION {
            ids.extend(self.tracker_ids_for(GLOBAL_SESSION)?);
        }
        Ok(ids.into_iter().collect())
    }

    async fn clear(&self, tracker_id: &str, session_id: &str) -> Result<u64, StoreError> {
        let prefix = Self::key_prefix(tracker_id, session_id);
        let mut batch = sled::Batch::default();
        let mut removed = 0u64;
        for entry in self.db.scan_prefix(&prefix) {
            let (key, _) = entry.map_err(|e| StoreError::Storage(format!("scan failed: {}", e)))?;
            batch.remove(key);
            removed += 1;
        }
        self.db
            .apply_batch(batch)
            .map_err(|e| StoreError::Storage(format!("batch remove failed: {}", e)))?;
        self.db
            .flush()
            .map_err(|e| StoreError::Storage(format!("flush failed: {}", e)))?;
        Ok(removed)
    }
}
