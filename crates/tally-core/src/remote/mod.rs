//! Remote blob storage abstractions.
//!
//! The sync engine only sees [`RemoteStore`]: upload a named blob, list blobs
//! by name prefix (newest first), download one by id, and fetch the account
//! identity. Every backend distinguishes "unauthorized" from other failures so
//! the engine can invalidate the local credential.

mod drive;
mod memory;
mod r2;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use drive::{DriveClient, DriveConfig};
pub use memory::MemoryRemoteStore;
pub use r2::{R2Config, R2RemoteStore};

/// Metadata of one object in the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteBlob {
    pub id: String,
    pub name: String,
    pub modified_time: DateTime<Utc>,
    pub size: u64,
}

/// Result of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedBlob {
    pub id: String,
    pub name: String,
    /// Server-side modification time, when the backend reports it.
    pub modified_time: Option<DateTime<Utc>>,
}

/// Who the remote store believes we are.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountIdentity {
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
}

impl AccountIdentity {
    /// Human-readable label for status lines.
    #[must_use]
    pub fn label(&self) -> String {
        match (self.display_name.as_deref(), self.email.as_deref()) {
            (Some(name), Some(email)) => format!("{name} <{email}>"),
            (Some(name), None) => name.to_string(),
            (None, Some(email)) => email.to_string(),
            (None, None) => "(unknown account)".to_string(),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Remote store rejected the credential: {0}")]
    Unauthorized(String),
    /// No credential exists yet; distinct from one the store rejected.
    #[error("No credential is configured for the remote store")]
    MissingCredential,
    #[error("Remote object not found: {0}")]
    NotFound(String),
    #[error("Remote store unreachable: {0}")]
    Transport(String),
    #[error("Remote store error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("Unexpected remote response: {0}")]
    InvalidResponse(String),
    #[error("Invalid remote request: {0}")]
    InvalidInput(String),
}

impl RemoteError {
    #[must_use]
    pub const fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Narrow interface to the remote snapshot store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Upload a new object. Uploading an existing name creates another object.
    async fn upload_blob(
        &self,
        name: &str,
        bytes: Vec<u8>,
        mime_type: &str,
    ) -> RemoteResult<UploadedBlob>;

    /// List objects whose name starts with `prefix`, newest first.
    async fn list_blobs_by_prefix(&self, prefix: &str) -> RemoteResult<Vec<RemoteBlob>>;

    /// Download the full contents of one object.
    async fn download_blob(&self, id: &str) -> RemoteResult<Vec<u8>>;

    /// Fetch the identity of the account the credential belongs to.
    async fn account_identity(&self) -> RemoteResult<AccountIdentity>;
}

/// Sort blobs newest first, breaking ties by name for a stable order.
pub(crate) fn sort_newest_first(blobs: &mut [RemoteBlob]) {
    blobs.sort_by(|left, right| {
        right
            .modified_time
            .cmp(&left.modified_time)
            .then_with(|| right.name.cmp(&left.name))
    });
}

pub(crate) fn normalize_blob_name(name: &str) -> RemoteResult<String> {
    let name = name.trim().trim_matches('/');
    if name.is_empty() {
        return Err(RemoteError::InvalidInput(
            "blob name cannot be empty".to_string(),
        ));
    }
    Ok(name.to_string())
}
