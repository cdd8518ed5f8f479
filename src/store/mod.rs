//! Transfer store
//!
//! The pending-transactions file is the only durable state. It is a single
//! JSON object keyed by transaction hash. Every job works on the whole
//! collection: lock, load, mutate, save. There is no partial-update API.
//!
//! The lock is held both in-process (a mutex) and across processes (an
//! advisory lock on `<store>.lock`), so a one-shot CLI command and a running
//! scheduler never interleave their load/save sequences.

pub mod models;

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fs2::FileExt;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::types::{Layer, Status, TxHash};

pub use models::{
    DepositLeg, DepositStatus, StateBatchInclusion, TransferLeg, TransferRecord, WithdrawalLeg,
    WithdrawalStatus,
};

/// In-memory view of the store, ordered by record creation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingTransfers {
    records: Vec<TransferRecord>,
}

impl PendingTransfers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TransferRecord> {
        self.records.iter()
    }

    /// Hashes of the current records, in order.
    ///
    /// Passes iterate over this snapshot so records appended during the pass
    /// are not visited until the next one.
    pub fn hashes(&self) -> Vec<TxHash> {
        self.records.iter().map(|r| r.tx_hash).collect()
    }

    pub fn contains(&self, tx_hash: &TxHash) -> bool {
        self.get(tx_hash).is_some()
    }

    pub fn get(&self, tx_hash: &TxHash) -> Option<&TransferRecord> {
        self.records.iter().find(|r| &r.tx_hash == tx_hash)
    }

    pub fn get_mut(&mut self, tx_hash: &TxHash) -> Option<&mut TransferRecord> {
        self.records.iter_mut().find(|r| &r.tx_hash == tx_hash)
    }

    /// Append a record, rejecting a hash that is already tracked
    pub fn insert(&mut self, record: TransferRecord) -> Result<(), StoreError> {
        if self.contains(&record.tx_hash) {
            return Err(StoreError::Duplicate(record.tx_hash));
        }
        self.records.push(record);
        Ok(())
    }

    pub fn remove(&mut self, tx_hash: &TxHash) -> Option<TransferRecord> {
        let pos = self.records.iter().position(|r| &r.tx_hash == tx_hash)?;
        Some(self.records.remove(pos))
    }

    /// Number of records per (layer, status), for the open-records gauge
    pub fn counts(&self) -> BTreeMap<(Layer, Status), usize> {
        let mut counts = BTreeMap::new();
        for record in &self.records {
            *counts.entry((record.layer(), record.status())).or_insert(0) += 1;
        }
        counts
    }
}

/// File-backed store
#[derive(Debug, Clone)]
pub struct TransferStore {
    path: PathBuf,
}

impl TransferStore {
    /// Open the store at `path`.
    ///
    /// A missing file is created empty when `create_if_missing` is set and is
    /// an error otherwise.
    pub fn open(path: impl Into<PathBuf>, create_if_missing: bool) -> Result<Self, StoreError> {
        let store = Self { path: path.into() };

        if !store.path.exists() {
            if !create_if_missing {
                return Err(StoreError::Missing(store.path.display().to_string()));
            }
            if let Some(parent) = store.path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            store.save(&PendingTransfers::new())?;
            info!(path = %store.path.display(), "Created empty transfer store");
        }

        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sibling file carrying the cross-process lock
    pub fn lock_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }

    /// Read every record from disk.
    ///
    /// Entries are decoded one by one. An entry that does not decode into a
    /// known record, or whose key disagrees with its `txHash`, is logged and
    /// dropped; it disappears with the next save.
    pub fn load(&self) -> Result<PendingTransfers, StoreError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::Missing(self.path.display().to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        let entries: serde_json::Map<String, serde_json::Value> = if raw.trim().is_empty() {
            serde_json::Map::new()
        } else {
            serde_json::from_str(&raw)?
        };

        let mut records = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            let record = match serde_json::from_value::<TransferRecord>(value) {
                Ok(record) => record,
                Err(e) => {
                    warn!(key = %key, error = %e, "Dropping undecodable store entry");
                    crate::metrics::record_dropped("undecodable");
                    continue;
                }
            };

            if key.parse::<TxHash>().ok() != Some(record.tx_hash) {
                warn!(
                    key = %key,
                    tx_hash = %record.tx_hash,
                    "Dropping store entry whose key does not match its txHash"
                );
                crate::metrics::record_dropped("undecodable");
                continue;
            }

            records.push(record);
        }

        // Keys come back in hash order; creation order is what passes rely on
        records.sort_by_key(|r| r.created_at);

        debug!(path = %self.path.display(), count = records.len(), "Loaded transfer store");
        Ok(PendingTransfers { records })
    }

    /// Atomically replace the store file with `transfers`.
    ///
    /// Writes a temp file in the same directory, syncs it and renames it over
    /// the store, so a crash leaves either the old or the new file.
    pub fn save(&self, transfers: &PendingTransfers) -> Result<(), StoreError> {
        let entries: BTreeMap<String, &TransferRecord> = transfers
            .iter()
            .map(|r| (r.tx_hash.to_string(), r))
            .collect();

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, &entries)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;

        debug!(path = %self.path.display(), count = entries.len(), "Saved transfer store");
        Ok(())
    }
}

/// Exclusive access to the store, released on drop
pub struct StoreGuard<'a> {
    store: MutexGuard<'a, TransferStore>,
    lock_file: File,
}

impl Deref for StoreGuard<'_> {
    type Target = TransferStore;

    fn deref(&self) -> &TransferStore {
        &self.store
    }
}

impl Drop for StoreGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.lock_file.unlock() {
            warn!(path = %self.store.lock_path().display(), error = %e, "Failed to release store lock");
        }
    }
}

/// Store handle shared by the scanner, worker, watcher and CLI.
///
/// The mutex serializes every load/mutate/save sequence in the process; the
/// lock file serializes them across processes sharing the same store path.
#[derive(Debug, Clone)]
pub struct SharedStore {
    inner: Arc<Mutex<TransferStore>>,
}

impl SharedStore {
    pub fn new(store: TransferStore) -> Self {
        Self {
            inner: Arc::new(Mutex::new(store)),
        }
    }

    /// Exclusive access for a full load/mutate/save sequence.
    ///
    /// Waits for the in-process mutex first, then for the lock file, which
    /// another process may be holding.
    pub async fn lock(&self) -> Result<StoreGuard<'_>, StoreError> {
        let store = self.inner.lock().await;
        let lock_path = store.lock_path();

        let lock_file = tokio::task::spawn_blocking(move || -> std::io::Result<File> {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&lock_path)?;
            file.lock_exclusive()?;
            Ok(file)
        })
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))??;

        Ok(StoreGuard { store, lock_file })
    }

    /// Track a freshly submitted transaction as `Sent`
    pub async fn record_transfer(&self, tx_hash: TxHash, layer: Layer) -> Result<(), StoreError> {
        let store = self.lock().await?;
        let mut transfers = store.load()?;
        transfers.insert(TransferRecord::new(tx_hash, layer))?;
        store.save(&transfers)?;

        info!(tx_hash = %tx_hash, layer = %layer, "Recorded transfer");
        Ok(())
    }

    /// Current contents of the store
    pub async fn snapshot(&self) -> Result<PendingTransfers, StoreError> {
        let store = self.lock().await?;
        store.load()
    }
}
