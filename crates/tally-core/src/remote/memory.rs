//! In-process remote store used by tests and offline demos.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, SubsecRound, Utc};

use super::{
    normalize_blob_name, sort_newest_first, AccountIdentity, RemoteBlob, RemoteError,
    RemoteResult, RemoteStore, UploadedBlob,
};

#[derive(Debug, Default)]
struct Inner {
    objects: Vec<(RemoteBlob, Vec<u8>)>,
    next_id: u64,
    last_modified: Option<DateTime<Utc>>,
    unauthorized: bool,
    credential_missing: bool,
    fail_uploads_after: Option<usize>,
    uploads: usize,
    downloads: Vec<String>,
    clock_offset_ms: i64,
    hide_upload_times: bool,
}

/// Remote store that keeps every object in memory.
///
/// Modification times have millisecond precision and are strictly
/// increasing, so generations never tie.
#[derive(Debug, Clone, Default)]
pub struct MemoryRemoteStore {
    inner: Arc<Mutex<Inner>>,
    identity: AccountIdentity,
}

impl MemoryRemoteStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_identity(identity: AccountIdentity) -> Self {
        Self {
            inner: Arc::default(),
            identity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Insert an object with an explicit modification time.
    pub fn insert_blob(
        &self,
        name: &str,
        bytes: Vec<u8>,
        modified_time: DateTime<Utc>,
    ) -> RemoteBlob {
        Self::insert_locked(&mut self.lock(), name, bytes, modified_time)
    }

    fn insert_locked(
        inner: &mut Inner,
        name: &str,
        bytes: Vec<u8>,
        modified_time: DateTime<Utc>,
    ) -> RemoteBlob {
        inner.next_id += 1;
        let blob = RemoteBlob {
            id: format!("mem-{}", inner.next_id),
            name: name.to_string(),
            modified_time,
            size: bytes.len() as u64,
        };
        if inner.last_modified.map_or(true, |last| modified_time > last) {
            inner.last_modified = Some(modified_time);
        }
        inner.objects.push((blob.clone(), bytes));
        blob
    }

    /// Make every subsequent call fail as unauthorized (or stop doing so).
    pub fn set_unauthorized(&self, unauthorized: bool) {
        self.lock().unauthorized = unauthorized;
    }

    /// Fail every subsequent call as if no credential were configured.
    pub fn set_credential_missing(&self, missing: bool) {
        self.lock().credential_missing = missing;
    }

    /// Let `count` more uploads succeed, then fail the rest with a transport error.
    pub fn fail_uploads_after(&self, count: usize) {
        let mut inner = self.lock();
        inner.fail_uploads_after = Some(inner.uploads + count);
    }

    /// Shift the store's clock relative to the local one.
    pub fn set_clock_offset(&self, offset: Duration) {
        self.lock().clock_offset_ms = offset.num_milliseconds();
    }

    /// Leave `modified_time` out of upload responses, as S3-style stores do.
    pub fn hide_upload_times(&self, hide: bool) {
        self.lock().hide_upload_times = hide;
    }

    pub fn clear_failures(&self) {
        let mut inner = self.lock();
        inner.fail_uploads_after = None;
        inner.unauthorized = false;
        inner.credential_missing = false;
    }

    /// All object names, oldest first.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.lock()
            .objects
            .iter()
            .map(|(blob, _)| blob.name.clone())
            .collect()
    }

    /// Ids passed to `download_blob`, in call order.
    #[must_use]
    pub fn downloads(&self) -> Vec<String> {
        self.lock().downloads.clone()
    }

    fn check_authorized(inner: &Inner) -> RemoteResult<()> {
        if inner.credential_missing {
            Err(RemoteError::MissingCredential)
        } else if inner.unauthorized {
            Err(RemoteError::Unauthorized("token revoked".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn upload_blob(
        &self,
        name: &str,
        bytes: Vec<u8>,
        _mime_type: &str,
    ) -> RemoteResult<UploadedBlob> {
        let name = normalize_blob_name(name)?;
        let mut inner = self.lock();
        Self::check_authorized(&inner)?;
        if inner
            .fail_uploads_after
            .is_some_and(|limit| inner.uploads >= limit)
        {
            return Err(RemoteError::Transport(format!(
                "simulated network failure uploading {name}"
            )));
        }
        inner.uploads += 1;

        let now = (Utc::now() + Duration::milliseconds(inner.clock_offset_ms)).trunc_subsecs(3);
        let modified_time = match inner.last_modified {
            Some(last) if now <= last => last + Duration::milliseconds(1),
            _ => now,
        };

        let blob = Self::insert_locked(&mut inner, &name, bytes, modified_time);
        Ok(UploadedBlob {
            id: blob.id,
            name: blob.name,
            modified_time: (!inner.hide_upload_times).then_some(blob.modified_time),
        })
    }

    async fn list_blobs_by_prefix(&self, prefix: &str) -> RemoteResult<Vec<RemoteBlob>> {
        let inner = self.lock();
        Self::check_authorized(&inner)?;
        let mut blobs = inner
            .objects
            .iter()
            .filter(|(blob, _)| blob.name.starts_with(prefix))
            .map(|(blob, _)| blob.clone())
            .collect::<Vec<_>>();
        drop(inner);
        sort_newest_first(&mut blobs);
        Ok(blobs)
    }

    async fn download_blob(&self, id: &str) -> RemoteResult<Vec<u8>> {
        let mut inner = self.lock();
        Self::check_authorized(&inner)?;
        inner.downloads.push(id.to_string());
        inner
            .objects
            .iter()
            .find(|(blob, _)| blob.id == id)
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))
    }

    async fn account_identity(&self) -> RemoteResult<AccountIdentity> {
        let inner = self.lock();
        Self::check_authorized(&inner)?;
        Ok(self.identity.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_name_uploads_create_distinct_objects() {
        let store = MemoryRemoteStore::new();
        let first = store
            .upload_blob("w_store_a.ndjson.gz", vec![1], "application/gzip")
            .await
            .unwrap();
        let second = store
            .upload_blob("w_store_a.ndjson.gz", vec![2], "application/gzip")
            .await
            .unwrap();

        assert_ne!(first.id, second.id);
        assert!(second.modified_time > first.modified_time);

        let listed = store.list_blobs_by_prefix("w_store_").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, second.id);
        assert_eq!(store.download_blob(&first.id).await.unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn unauthorized_mode_rejects_calls() {
        let store = MemoryRemoteStore::new();
        store.set_unauthorized(true);
        let error = store.list_blobs_by_prefix("x").await.unwrap_err();
        assert!(error.is_unauthorized());
    }

    #[tokio::test]
    async fn upload_failure_injection() {
        let store = MemoryRemoteStore::new();
        store.fail_uploads_after(1);
        assert!(store.upload_blob("a", vec![], "x").await.is_ok());
        assert!(matches!(
            store.upload_blob("b", vec![], "x").await,
            Err(RemoteError::Transport(_))
        ));
        store.clear_failures();
        assert!(store.upload_blob("b", vec![], "x").await.is_ok());
    }

    #[tokio::test]
    async fn skewed_clock_without_upload_times() {
        let store = MemoryRemoteStore::new();
        store.set_clock_offset(Duration::seconds(3));
        store.hide_upload_times(true);

        let before = Utc::now();
        let uploaded = store.upload_blob("w_manifest_a.json", vec![], "x").await.unwrap();
        assert_eq!(uploaded.modified_time, None);

        let listed = store.list_blobs_by_prefix("w_manifest_").await.unwrap();
        assert!(listed[0].modified_time >= before + Duration::milliseconds(2900));
    }
}
