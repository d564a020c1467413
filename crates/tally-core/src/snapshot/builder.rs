//! Streaming snapshot export.

use std::io::Write;

use chrono::{DateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;

use super::{
    manifest_name, store_blob_name, ManifestV2, SnapshotError, StoreEntry,
    CURRENT_SCHEMA_VERSION, MANIFEST_SOURCE, STORE_FORMAT,
};
use crate::config::Workspace;
use crate::records::{Record, RecordStore};

/// One compressed collection ready for upload.
#[derive(Debug, Clone)]
pub struct SnapshotBlob {
    pub name: String,
    pub collection: String,
    pub count: u64,
    pub bytes: Vec<u8>,
}

/// A complete generation: every collection blob plus the manifest naming them.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub manifest: ManifestV2,
    pub manifest_name: String,
    pub blobs: Vec<SnapshotBlob>,
}

impl Snapshot {
    pub fn manifest_bytes(&self) -> Result<Vec<u8>, SnapshotError> {
        Ok(serde_json::to_vec_pretty(&self.manifest)?)
    }

    #[must_use]
    pub fn total_records(&self) -> u64 {
        self.blobs.iter().map(|blob| blob.count).sum()
    }
}

/// Builds snapshots by streaming each collection through a gzip encoder.
pub struct SnapshotBuilder<'a> {
    workspace: &'a Workspace,
    records: &'a dyn RecordStore,
}

impl<'a> SnapshotBuilder<'a> {
    pub fn new(workspace: &'a Workspace, records: &'a dyn RecordStore) -> Self {
        Self { workspace, records }
    }

    pub async fn build(&self, created_at: DateTime<Utc>) -> Result<Snapshot, SnapshotError> {
        let prefix = &self.workspace.remote_prefix;
        let mut blobs = Vec::with_capacity(self.workspace.collections.len());

        for collection in &self.workspace.collections {
            let (bytes, count) = self.encode_collection(collection).await?;
            blobs.push(SnapshotBlob {
                name: store_blob_name(prefix, collection),
                collection: collection.clone(),
                count,
                bytes,
            });
        }

        let manifest = ManifestV2 {
            schema_version: CURRENT_SCHEMA_VERSION,
            created_at,
            source: MANIFEST_SOURCE.to_string(),
            stores: blobs
                .iter()
                .map(|blob| StoreEntry {
                    store_key: blob.collection.clone(),
                    count: blob.count,
                    filename: blob.name.clone(),
                    format: STORE_FORMAT.to_string(),
                })
                .collect(),
        };

        Ok(Snapshot {
            manifest,
            manifest_name: manifest_name(prefix, created_at),
            blobs,
        })
    }

    async fn encode_collection(&self, collection: &str) -> Result<(Vec<u8>, u64), SnapshotError> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        let count = self
            .records
            .iterate(collection, &mut |record: &Record| {
                serde_json::to_writer(&mut encoder, record)?;
                encoder.write_all(b"\n")?;
                Ok(())
            })
            .await?;
        let bytes = encoder.finish()?;
        tracing::debug!(
            "Encoded {} records from {} into {} bytes",
            count,
            collection,
            bytes.len()
        );
        Ok((bytes, count as u64))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use chrono::TimeZone;
    use flate2::read::GzDecoder;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::records::MemoryRecordStore;
    use crate::snapshot::{parse_manifest, Manifest};

    fn gunzip(bytes: &[u8]) -> String {
        let mut text = String::new();
        GzDecoder::new(bytes).read_to_string(&mut text).unwrap();
        text
    }

    #[tokio::test]
    async fn build_streams_each_collection_including_empty_ones() {
        let workspace = Workspace::new(
            "books",
            None,
            vec!["financial-entries".to_string(), "invoices".to_string()],
        )
        .unwrap();
        let store = MemoryRecordStore::new();
        let entries = (1..=3)
            .map(|id| Record::from_value(json!({ "id": id, "amount": id * 100 })).unwrap())
            .collect();
        store.save_all("financial-entries", entries).await.unwrap();

        let created_at = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let snapshot = SnapshotBuilder::new(&workspace, &store)
            .build(created_at)
            .await
            .unwrap();

        assert_eq!(snapshot.manifest_name, "books_manifest_20240501T100000000Z.json");
        assert_eq!(snapshot.total_records(), 3);
        assert_eq!(
            snapshot
                .manifest
                .stores
                .iter()
                .map(|entry| (entry.store_key.as_str(), entry.count))
                .collect::<Vec<_>>(),
            vec![("financial-entries", 3), ("invoices", 0)]
        );
        assert_eq!(
            snapshot.manifest.stores[1].filename,
            "books_store_invoices.ndjson.gz"
        );

        let lines = gunzip(&snapshot.blobs[0].bytes);
        let lines = lines.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 3);
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(lines[0]).unwrap(),
            json!({ "id": 1, "amount": 100 })
        );
        assert_eq!(gunzip(&snapshot.blobs[1].bytes), "");

        let manifest = parse_manifest(&snapshot.manifest_bytes().unwrap()).unwrap();
        assert_eq!(manifest, Manifest::V2(snapshot.manifest));
    }
}
