//! Restore pipeline: rebuild local collections from a remote manifest.
//!
//! Restore is destructive. Every collection named by the manifest is wiped
//! before import, and a failure after that point leaves local data
//! incomplete until a restore is retried.

use std::io::{BufRead, BufReader};

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::Workspace;
use crate::records::{Record, RecordStore};
use crate::remote::{RemoteBlob, RemoteError, RemoteStore};
use crate::snapshot::{
    parse_legacy_document, parse_manifest, Manifest, ManifestV2, SnapshotError, StoreEntry,
};
use crate::state::SyncStateStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RestorePhase {
    Downloading,
    Clearing,
    Importing,
    Finalizing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestoreProgress {
    pub phase: RestorePhase,
    /// 0..=100
    pub percent: u8,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum RestoreError {
    #[error("Restore was cancelled")]
    Aborted,
    #[error("Backup file {0} is missing from the remote store; restore stopped, please retry")]
    MissingBlob(String),
    #[error("Invalid backup manifest: {0}")]
    Manifest(#[from] SnapshotError),
    #[error("Failed to decompress {filename}: {message}")]
    Decode { filename: String, message: String },
    #[error("Remote store error during restore: {0}")]
    Remote(#[from] RemoteError),
    #[error("Local data may be incomplete, please retry the restore: {0}")]
    Local(#[from] crate::Error),
}

impl RestoreError {
    /// Cancellation is an expected outcome, not a failure.
    #[must_use]
    pub const fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}

/// Records imported into one collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportedCollection {
    pub collection: String,
    pub imported: usize,
    pub flushes: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestoreReport {
    pub manifest_id: String,
    pub manifest_name: String,
    pub schema_version: u32,
    pub collections: Vec<ImportedCollection>,
    /// NDJSON lines (or v1 entries) that could not be parsed into records.
    pub skipped_lines: usize,
    pub completed_at: DateTime<Utc>,
}

impl RestoreReport {
    #[must_use]
    pub fn total_records(&self) -> usize {
        self.collections.iter().map(|entry| entry.imported).sum()
    }
}

/// What the importing phase will work through.
enum ImportPlan {
    Streams(ManifestV2),
    Legacy(Map<String, Value>),
}

impl ImportPlan {
    fn collections(&self) -> Vec<String> {
        match self {
            Self::Streams(manifest) => manifest
                .stores
                .iter()
                .map(|entry| entry.store_key.clone())
                .collect(),
            Self::Legacy(data) => data.keys().cloned().collect(),
        }
    }
}

/// Accumulates parsed records and flushes them in fixed-size batches.
struct BatchWriter<'a> {
    records: &'a dyn RecordStore,
    collection: &'a str,
    batch_size: usize,
    batch: Vec<Record>,
    imported: usize,
    flushes: usize,
}

impl<'a> BatchWriter<'a> {
    fn new(records: &'a dyn RecordStore, collection: &'a str, batch_size: usize) -> Self {
        Self {
            records,
            collection,
            batch_size,
            batch: Vec::with_capacity(batch_size),
            imported: 0,
            flushes: 0,
        }
    }

    async fn push(&mut self, record: Record) -> Result<(), RestoreError> {
        self.batch.push(record);
        if self.batch.len() >= self.batch_size {
            self.flush().await?;
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), RestoreError> {
        if self.batch.is_empty() {
            return Ok(());
        }
        let batch = std::mem::replace(&mut self.batch, Vec::with_capacity(self.batch_size));
        let len = batch.len();
        self.records.save_all(self.collection, batch).await?;
        self.imported += len;
        self.flushes += 1;
        tokio::task::yield_now().await;
        Ok(())
    }

    fn finish(self) -> ImportedCollection {
        ImportedCollection {
            collection: self.collection.to_string(),
            imported: self.imported,
            flushes: self.flushes,
        }
    }
}

/// Runs one restore against borrowed collaborators.
pub struct RestorePipeline<'a> {
    workspace: &'a Workspace,
    remote: &'a dyn RemoteStore,
    records: &'a dyn RecordStore,
    state: &'a dyn SyncStateStore,
    batch_size: usize,
}

impl<'a> RestorePipeline<'a> {
    pub fn new(
        workspace: &'a Workspace,
        remote: &'a dyn RemoteStore,
        records: &'a dyn RecordStore,
        state: &'a dyn SyncStateStore,
        batch_size: usize,
    ) -> Self {
        Self {
            workspace,
            remote,
            records,
            state,
            batch_size: batch_size.max(1),
        }
    }

    /// Restore local collections from `manifest`, reporting progress as it goes.
    pub async fn run(
        &self,
        manifest: &RemoteBlob,
        cancel: &CancellationToken,
        progress: &(dyn Fn(RestoreProgress) + Send + Sync),
    ) -> Result<RestoreReport, RestoreError> {
        let emit = |phase, percent, message: String| {
            progress(RestoreProgress {
                phase,
                percent,
                message,
            });
        };

        emit(
            RestorePhase::Downloading,
            0,
            format!("Downloading {}", manifest.name),
        );
        let (schema_version, plan) = self.load_plan(manifest, cancel).await?;

        let collections = plan
            .collections()
            .into_iter()
            .filter(|collection| {
                let tracked = self.workspace.tracks(collection);
                if !tracked {
                    tracing::warn!(
                        "Skipping collection {} from {}: not tracked by workspace {}",
                        collection,
                        manifest.name,
                        self.workspace.id
                    );
                }
                tracked
            })
            .collect::<Vec<_>>();

        check_cancelled(cancel)?;
        emit(
            RestorePhase::Clearing,
            10,
            format!("Clearing {} local collections", collections.len()),
        );
        for collection in &collections {
            self.records.clear(collection).await?;
        }

        let mut imported = Vec::with_capacity(collections.len());
        let mut skipped_lines = 0;
        let total = collections.len().max(1);

        for (index, collection) in collections.iter().enumerate() {
            check_cancelled(cancel)?;
            emit(
                RestorePhase::Importing,
                import_percent(index, total),
                format!("Importing {collection}"),
            );

            let (entry, skipped) = match &plan {
                ImportPlan::Streams(manifest_v2) => {
                    let Some(store) = manifest_v2
                        .stores
                        .iter()
                        .find(|entry| &entry.store_key == collection)
                    else {
                        continue;
                    };
                    self.import_stream(store, manifest.modified_time, cancel)
                        .await?
                }
                ImportPlan::Legacy(data) => {
                    let items = data.get(collection).cloned().unwrap_or(Value::Null);
                    self.import_legacy(collection, items, cancel).await?
                }
            };
            skipped_lines += skipped;
            imported.push(entry);
        }

        check_cancelled(cancel)?;
        emit(
            RestorePhase::Finalizing,
            95,
            "Recording restore completion".to_string(),
        );
        let completed_at = Utc::now();
        let mut state = self.state.load(&self.workspace.id)?;
        state.restore_completed_at = Some(completed_at);
        self.state.save(&self.workspace.id, &state)?;

        let report = RestoreReport {
            manifest_id: manifest.id.clone(),
            manifest_name: manifest.name.clone(),
            schema_version,
            collections: imported,
            skipped_lines,
            completed_at,
        };
        emit(
            RestorePhase::Finalizing,
            100,
            format!("Restored {} records", report.total_records()),
        );
        tracing::info!(
            "Restored {} records from {} ({} skipped)",
            report.total_records(),
            manifest.name,
            skipped_lines
        );
        Ok(report)
    }

    async fn download(
        &self,
        blob: &RemoteBlob,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, RestoreError> {
        check_cancelled(cancel)?;
        tokio::select! {
            () = cancel.cancelled() => Err(RestoreError::Aborted),
            bytes = self.remote.download_blob(&blob.id) => Ok(bytes?),
        }
    }

    async fn load_plan(
        &self,
        manifest: &RemoteBlob,
        cancel: &CancellationToken,
    ) -> Result<(u32, ImportPlan), RestoreError> {
        let bytes = self.download(manifest, cancel).await?;
        match parse_manifest(&bytes)? {
            Manifest::V2(manifest) => Ok((2, ImportPlan::Streams(manifest))),
            Manifest::V1Inline(snapshot) => Ok((1, ImportPlan::Legacy(snapshot.data))),
            Manifest::V1Pointer {
                created_at,
                data_file,
            } => {
                let blob = self
                    .locate_blob(&data_file, manifest.modified_time)
                    .await?;
                tracing::debug!(
                    "Legacy manifest {} created {:?} points at {}",
                    manifest.name,
                    created_at,
                    data_file
                );
                let bytes = self.download(&blob, cancel).await?;
                Ok((1, ImportPlan::Legacy(parse_legacy_document(&bytes)?.data)))
            }
        }
    }

    /// Find the blob with exactly `filename`, preferring the newest one not
    /// newer than the manifest that references it.
    async fn locate_blob(
        &self,
        filename: &str,
        not_after: DateTime<Utc>,
    ) -> Result<RemoteBlob, RestoreError> {
        let candidates = self
            .remote
            .list_blobs_by_prefix(filename)
            .await?
            .into_iter()
            .filter(|blob| blob.name == filename)
            .collect::<Vec<_>>();

        select_generation(candidates, not_after)
            .ok_or_else(|| RestoreError::MissingBlob(filename.to_string()))
    }

    async fn import_stream(
        &self,
        entry: &StoreEntry,
        not_after: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<(ImportedCollection, usize), RestoreError> {
        let blob = self
            .locate_blob(&entry.filename, not_after)
            .await?;
        let bytes = self.download(&blob, cancel).await?;

        let mut reader = BufReader::new(GzDecoder::new(bytes.as_slice()));
        let mut writer = BatchWriter::new(self.records, &entry.store_key, self.batch_size);
        let mut line = String::new();
        let mut line_number = 0;
        let mut skipped = 0;

        loop {
            check_cancelled(cancel)?;
            line.clear();
            let read = reader
                .read_line(&mut line)
                .map_err(|error| RestoreError::Decode {
                    filename: entry.filename.clone(),
                    message: error.to_string(),
                })?;
            if read == 0 {
                break;
            }
            line_number += 1;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match Record::from_json(trimmed) {
                Ok(record) => writer.push(record).await?,
                Err(error) => {
                    skipped += 1;
                    tracing::warn!(
                        "Skipping line {} of {}: {}",
                        line_number,
                        entry.filename,
                        error
                    );
                }
            }
        }
        writer.flush().await?;

        let imported = writer.finish();
        if imported.imported as u64 != entry.count {
            tracing::warn!(
                "{} lists {} records but {} were imported",
                entry.filename,
                entry.count,
                imported.imported
            );
        }
        Ok((imported, skipped))
    }

    async fn import_legacy(
        &self,
        collection: &str,
        items: Value,
        cancel: &CancellationToken,
    ) -> Result<(ImportedCollection, usize), RestoreError> {
        let Value::Array(items) = items else {
            tracing::warn!("Legacy collection {} is not an array; importing nothing", collection);
            return Ok((BatchWriter::new(self.records, collection, 1).finish(), 0));
        };

        let mut writer = BatchWriter::new(self.records, collection, self.batch_size);
        let mut skipped = 0;
        for (index, item) in items.into_iter().enumerate() {
            check_cancelled(cancel)?;
            match Record::from_value(item) {
                Ok(record) => writer.push(record).await?,
                Err(error) => {
                    skipped += 1;
                    tracing::warn!("Skipping {} entry {}: {}", collection, index, error);
                }
            }
        }
        writer.flush().await?;
        Ok((writer.finish(), skipped))
    }
}

fn check_cancelled(cancel: &CancellationToken) -> Result<(), RestoreError> {
    if cancel.is_cancelled() {
        Err(RestoreError::Aborted)
    } else {
        Ok(())
    }
}

/// Percent for the start of collection `index` of `total`, spread over 15..=90.
fn import_percent(index: usize, total: usize) -> u8 {
    let span = 75 * index / total;
    u8::try_from(15 + span).unwrap_or(90)
}

fn select_generation(mut candidates: Vec<RemoteBlob>, not_after: DateTime<Utc>) -> Option<RemoteBlob> {
    candidates.sort_by(|left, right| right.modified_time.cmp(&left.modified_time));
    let fallback = candidates.first().cloned();
    candidates
        .into_iter()
        .find(|blob| blob.modified_time <= not_after)
        .or(fallback)
}
