//! Snapshot manifests and the streaming export path.
//!
//! A save produces one gzip NDJSON blob per collection plus a JSON manifest
//! (schema v2) listing them. Schema v1 documents are only ever read.

mod builder;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub use builder::{Snapshot, SnapshotBlob, SnapshotBuilder};

pub const CURRENT_SCHEMA_VERSION: u32 = 2;
pub const MANIFEST_SOURCE: &str = "client";
pub const STORE_FORMAT: &str = "ndjson+gzip";
pub const MANIFEST_MIME_TYPE: &str = "application/json";
pub const BLOB_MIME_TYPE: &str = "application/gzip";

const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%3fZ";

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Failed to read local records: {0}")]
    Local(#[from] crate::Error),
    #[error("Failed to compress snapshot data: {0}")]
    Compression(#[from] std::io::Error),
    #[error("Invalid snapshot JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Malformed manifest: {0}")]
    Malformed(String),
    #[error("Unsupported snapshot schema version {0}")]
    UnsupportedVersion(u64),
}

/// One collection entry of a v2 manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreEntry {
    pub store_key: String,
    pub count: u64,
    pub filename: String,
    pub format: String,
}

/// Schema v2 manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestV2 {
    pub schema_version: u32,
    pub created_at: DateTime<Utc>,
    pub source: String,
    pub stores: Vec<StoreEntry>,
}

/// Schema v1 document: every collection inline.
#[derive(Debug, Clone, PartialEq)]
pub struct LegacySnapshot {
    pub data: Map<String, Value>,
}

/// A parsed manifest, whatever its schema version.
#[derive(Debug, Clone, PartialEq)]
pub enum Manifest {
    V2(ManifestV2),
    /// v1 manifest that points at a separate data document.
    V1Pointer {
        created_at: Option<DateTime<Utc>>,
        data_file: String,
    },
    /// v1 data document downloaded directly.
    V1Inline(LegacySnapshot),
}

impl Manifest {
    #[must_use]
    pub const fn schema_version(&self) -> u32 {
        match self {
            Self::V2(_) => 2,
            Self::V1Pointer { .. } | Self::V1Inline(_) => 1,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct V1PointerDocument {
    created_at: Option<DateTime<Utc>>,
    data_file: String,
}

/// Parse manifest bytes, detecting the schema version.
pub fn parse_manifest(bytes: &[u8]) -> Result<Manifest, SnapshotError> {
    let value: Value = serde_json::from_slice(bytes)?;
    let Value::Object(mut object) = value else {
        return Err(SnapshotError::Malformed(
            "manifest is not a JSON object".to_string(),
        ));
    };

    let version = object
        .get("schemaVersion")
        .and_then(Value::as_u64)
        .ok_or_else(|| SnapshotError::Malformed("missing schemaVersion".to_string()))?;

    match version {
        2 => {
            let manifest: ManifestV2 = serde_json::from_value(Value::Object(object))?;
            if let Some(entry) = manifest
                .stores
                .iter()
                .find(|entry| entry.format != STORE_FORMAT)
            {
                return Err(SnapshotError::Malformed(format!(
                    "store {} has unsupported format {}",
                    entry.store_key, entry.format
                )));
            }
            Ok(Manifest::V2(manifest))
        }
        1 => match object.remove("data") {
            Some(Value::Object(data)) => Ok(Manifest::V1Inline(LegacySnapshot { data })),
            Some(_) => Err(SnapshotError::Malformed(
                "v1 data field is not an object".to_string(),
            )),
            None => {
                let pointer: V1PointerDocument = serde_json::from_value(Value::Object(object))?;
                Ok(Manifest::V1Pointer {
                    created_at: pointer.created_at,
                    data_file: pointer.data_file,
                })
            }
        },
        other => Err(SnapshotError::UnsupportedVersion(other)),
    }
}

/// Parse a v1 data document referenced by a v1 manifest.
pub fn parse_legacy_document(bytes: &[u8]) -> Result<LegacySnapshot, SnapshotError> {
    match parse_manifest(bytes)? {
        Manifest::V1Inline(snapshot) => Ok(snapshot),
        other => Err(SnapshotError::Malformed(format!(
            "expected a v1 data document, found schema v{} manifest",
            other.schema_version()
        ))),
    }
}

/// `<prefix>_manifest_<timestamp>.json`
#[must_use]
pub fn manifest_name(prefix: &str, created_at: DateTime<Utc>) -> String {
    format!(
        "{prefix}_manifest_{}.json",
        created_at.format(TIMESTAMP_FORMAT)
    )
}

/// `<prefix>_store_<collection>.ndjson.gz`
#[must_use]
pub fn store_blob_name(prefix: &str, collection: &str) -> String {
    format!("{prefix}_store_{collection}.ndjson.gz")
}
