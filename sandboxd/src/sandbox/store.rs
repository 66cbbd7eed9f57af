/* -------------------------------------------------------------------------- *\
 *                |   █████╗ ██╗   ██╗██████╗  █████╗ ███████╗ |              *
 *                |  ██╔══██╗██║   ██║██╔══██╗██╔══██╗██╔════╝ |              *
 *                |  ███████║██║   ██║██████╔╝███████║█████╗   |              *
 *                |  ██╔══██║██║   ██║██╔══██╗██╔══██║██╔══╝   |              *
 *                |  ██║  ██║╚██████╔╝██║  ██║██║  ██║███████╗ |              *
 *                |  ╚═╝  ╚═╝ ╚═════╝ ╚═╝  ╚═╝╚═╝  ╚═╝╚══════╝ |              *
 *                +--------------------------------------------+              *
 *                                                                            *
 *                         Distributed Systems Runtime                        *
 * -------------------------------------------------------------------------- *
 * Copyright 2022 - 2024, the aurae contributors                              *
 * SPDX-License-Identifier: Apache-2.0                                        *
\* -------------------------------------------------------------------------- */

//! Durable storage of sandbox records.
//!
//! Every record is one JSON document under `{state_dir}/sandboxes/{id}.json`.
//! The per-identity attempt ledger lives in `{state_dir}/attempts.json`.
//! Writes go to a temporary sibling first and are renamed into place so a
//! crash never leaves a torn document behind.

use super::{SandboxFilter, SandboxId, SandboxKey, SandboxRecord};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::{trace, warn};

const SANDBOXES_DIR: &str = "sandboxes";
const ATTEMPTS_FILE: &str = "attempts.json";
const RECORD_EXTENSION: &str = "json";
const TMP_EXTENSION: &str = "tmp";

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to access '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode '{}': {source}", path.display())]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to decode '{}': {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[tonic::async_trait]
pub trait SandboxStore: Debug + Send + Sync {
    /// Insert or replace the record with the same id.
    async fn put(&self, record: &SandboxRecord) -> Result<()>;

    async fn get(&self, id: &SandboxId) -> Result<Option<SandboxRecord>>;

    /// Deleting an absent record is not an error.
    async fn delete(&self, id: &SandboxId) -> Result<()>;

    /// Records matching `filter`, oldest first.
    async fn list(&self, filter: &SandboxFilter) -> Result<Vec<SandboxRecord>>;

    /// Reserve the attempt number for the next creation of `key`.
    ///
    /// The first creation of a key gets `requested`. Later ones get
    /// `requested` or one past the previous attempt, whichever is larger.
    /// The ledger outlives the records themselves.
    async fn next_attempt(&self, key: &SandboxKey, requested: u32) -> Result<u32>;
}

/// A [SandboxStore] backed by one file per record.
///
/// Reads are served from an in-memory index loaded at open time, every
/// mutation is written through to disk before the index changes.
#[derive(Debug)]
pub struct FileSandboxStore {
    root: PathBuf,
    records: RwLock<HashMap<SandboxId, SandboxRecord>>,
    attempts: Mutex<BTreeMap<String, u32>>,
}

impl FileSandboxStore {
    pub async fn open(state_dir: impl Into<PathBuf>) -> Result<Self> {
        let root = state_dir.into();
        let sandboxes = root.join(SANDBOXES_DIR);

        tokio::fs::create_dir_all(&sandboxes)
            .await
            .map_err(|source| StoreError::Io { path: sandboxes.clone(), source })?;

        let records = load_records(&sandboxes).await?;
        let attempts = load_attempts(&root.join(ATTEMPTS_FILE)).await?;

        trace!(
            "opened sandbox store at {} with {} records",
            root.display(),
            records.len()
        );

        Ok(Self {
            root,
            records: RwLock::new(records),
            attempts: Mutex::new(attempts),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, id: &SandboxId) -> PathBuf {
        self.root
            .join(SANDBOXES_DIR)
            .join(id.as_str())
            .with_extension(RECORD_EXTENSION)
    }
}

#[tonic::async_trait]
impl SandboxStore for FileSandboxStore {
    async fn put(&self, record: &SandboxRecord) -> Result<()> {
        let path = self.record_path(&record.id);
        let contents = serde_json::to_vec_pretty(record)
            .map_err(|source| StoreError::Encode { path: path.clone(), source })?;

        let mut records = self.records.write().await;
        write_atomic(&path, &contents).await?;
        let _ = records.insert(record.id.clone(), record.clone());

        Ok(())
    }

    async fn get(&self, id: &SandboxId) -> Result<Option<SandboxRecord>> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn delete(&self, id: &SandboxId) -> Result<()> {
        let mut records = self.records.write().await;

        let path = self.record_path(id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(source) => return Err(StoreError::Io { path, source }),
        }
        let _ = records.remove(id);

        Ok(())
    }

    async fn list(&self, filter: &SandboxFilter) -> Result<Vec<SandboxRecord>> {
        let records = self.records.read().await;

        let mut res: Vec<SandboxRecord> =
            records.values().filter(|r| filter.matches(r)).cloned().collect();
        res.sort_by(|a, b| {
            a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id))
        });

        Ok(res)
    }

    async fn next_attempt(&self, key: &SandboxKey, requested: u32) -> Result<u32> {
        let mut attempts = self.attempts.lock().await;

        let ledger_key = key.to_string();
        let attempt = match attempts.get(&ledger_key) {
            Some(last) => requested.max(last.saturating_add(1)),
            None => requested,
        };

        let mut updated = attempts.clone();
        let _ = updated.insert(ledger_key, attempt);

        let path = self.root.join(ATTEMPTS_FILE);
        let contents = serde_json::to_vec_pretty(&updated)
            .map_err(|source| StoreError::Encode { path: path.clone(), source })?;
        write_atomic(&path, &contents).await?;

        *attempts = updated;
        Ok(attempt)
    }
}

async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp = path.with_extension(TMP_EXTENSION);
    let io_err = |source| StoreError::Io { path: tmp.clone(), source };

    let mut file = tokio::fs::File::create(&tmp).await.map_err(io_err)?;
    file.write_all(contents).await.map_err(io_err)?;
    file.sync_all().await.map_err(io_err)?;
    drop(file);

    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|source| StoreError::Io { path: path.to_path_buf(), source })
}

async fn load_records(dir: &Path) -> Result<HashMap<SandboxId, SandboxRecord>> {
    let io_err = |source| StoreError::Io { path: dir.to_path_buf(), source };

    let mut records = HashMap::new();
    let mut entries = tokio::fs::read_dir(dir).await.map_err(io_err)?;

    while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
        let path = entry.path();

        // leftovers of an interrupted write
        if path.extension().is_some_and(|ext| ext == TMP_EXTENSION) {
            warn!("removing incomplete sandbox record {}", path.display());
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!("failed to remove {}: {e}", path.display());
            }
            continue;
        }

        if !path.extension().is_some_and(|ext| ext == RECORD_EXTENSION) {
            continue;
        }

        let contents = tokio::fs::read(&path)
            .await
            .map_err(|source| StoreError::Io { path: path.clone(), source })?;
        let record: SandboxRecord = serde_json::from_slice(&contents)
            .map_err(|source| StoreError::Decode { path: path.clone(), source })?;

        let _ = records.insert(record.id.clone(), record);
    }

    Ok(records)
}

async fn load_attempts(path: &Path) -> Result<BTreeMap<String, u32>> {
    match tokio::fs::read(path).await {
        Ok(contents) => serde_json::from_slice(&contents).map_err(|source| {
            StoreError::Decode { path: path.to_path_buf(), source }
        }),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(BTreeMap::new()),
        Err(source) => Err(StoreError::Io { path: path.to_path_buf(), source }),
    }
}
