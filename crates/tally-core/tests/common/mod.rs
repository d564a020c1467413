#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::Semaphore;

use tally_core::auth::{AccessToken, MemoryTokenStore, TokenManager, TokenStore};
use tally_core::conductor::{SyncCollaborators, SyncConductor};
use tally_core::config::{EngineConfig, Workspace};
use tally_core::records::{MemoryRecordStore, ObservedRecordStore, Record, RecordStore};
use tally_core::remote::{
    AccountIdentity, MemoryRemoteStore, RemoteBlob, RemoteResult, RemoteStore, UploadedBlob,
};
use tally_core::snapshot::SnapshotBuilder;
use tally_core::state::MemorySyncStateStore;

pub const ENTRIES: &str = "financial-entries";
pub const INVOICES: &str = "invoices";

pub fn workspace() -> Workspace {
    Workspace::new("books", None, vec![ENTRIES.to_string(), INVOICES.to_string()]).unwrap()
}

pub fn entry(id: u64, amount: i64) -> Record {
    Record::from_value(json!({ "id": id, "amount": amount, "memo": format!("entry {id}") }))
        .unwrap()
}

pub fn valid_token() -> AccessToken {
    AccessToken {
        access_token: "access".to_string(),
        refresh_token: None,
        expires_at: Utc::now().timestamp() + 3600,
    }
}

/// One client of the shared remote store.
pub struct Device {
    pub conductor: Arc<SyncConductor>,
    pub records: MemoryRecordStore,
    /// Application-facing store; edits through it mark the conductor dirty.
    pub app: ObservedRecordStore,
    pub state: MemorySyncStateStore,
    pub tokens: MemoryTokenStore,
}

impl Device {
    pub fn new(remote: Arc<dyn RemoteStore>) -> Self {
        Self::with_config(remote, EngineConfig::default(), Some(valid_token()))
    }

    pub fn with_config(
        remote: Arc<dyn RemoteStore>,
        config: EngineConfig,
        token: Option<AccessToken>,
    ) -> Self {
        let records = MemoryRecordStore::new();
        let state = MemorySyncStateStore::new();
        let tokens = token.map_or_else(MemoryTokenStore::default, MemoryTokenStore::with_token);
        let conductor = Arc::new(
            SyncConductor::new(
                workspace(),
                config,
                SyncCollaborators {
                    remote,
                    records: Arc::new(records.clone()),
                    state: Arc::new(state.clone()),
                    tokens: Arc::new(TokenManager::new(tokens.clone(), None)),
                },
            )
            .unwrap(),
        );

        let app = ObservedRecordStore::new(Arc::new(records.clone()));
        let observed = Arc::clone(&conductor);
        app.register(Arc::new(move |_collection: &str| {
            observed.mark_dirty().unwrap();
        }));

        Self {
            conductor,
            records,
            app,
            state,
            tokens,
        }
    }

    pub fn has_token(&self) -> bool {
        self.tokens.load_token().unwrap().is_some()
    }

    pub async fn entries(&self) -> Vec<Record> {
        self.records.get_all(ENTRIES).await.unwrap()
    }
}

/// Upload a complete generation with an explicit remote timestamp.
pub async fn publish_generation(
    remote: &MemoryRemoteStore,
    entries: Vec<Record>,
    at: DateTime<Utc>,
) -> RemoteBlob {
    let source = MemoryRecordStore::new();
    source.save_all(ENTRIES, entries).await.unwrap();
    let snapshot = SnapshotBuilder::new(&workspace(), &source)
        .build(at)
        .await
        .unwrap();
    for blob in &snapshot.blobs {
        remote.insert_blob(&blob.name, blob.bytes.clone(), at);
    }
    remote.insert_blob(
        &snapshot.manifest_name,
        snapshot.manifest_bytes().unwrap(),
        at,
    )
}

/// Remote store whose gated calls wait for a permit, to hold an operation mid-flight.
#[derive(Clone)]
pub struct GatedRemote {
    pub inner: MemoryRemoteStore,
    pub gate: Arc<Semaphore>,
    gate_uploads: bool,
}

impl GatedRemote {
    /// Downloads wait at the gate; a restore stalls before fetching data.
    pub fn new(inner: MemoryRemoteStore) -> Self {
        Self {
            inner,
            gate: Arc::new(Semaphore::new(0)),
            gate_uploads: false,
        }
    }

    /// Uploads wait at the gate; a save stalls before anything reaches the store.
    pub fn holding_uploads(inner: MemoryRemoteStore) -> Self {
        Self {
            gate_uploads: true,
            ..Self::new(inner)
        }
    }

    pub fn open(&self) {
        self.gate.add_permits(Semaphore::MAX_PERMITS / 2);
    }
}

#[async_trait]
impl RemoteStore for GatedRemote {
    async fn upload_blob(
        &self,
        name: &str,
        bytes: Vec<u8>,
        mime_type: &str,
    ) -> RemoteResult<UploadedBlob> {
        if self.gate_uploads {
            let _permit = self.gate.acquire().await.unwrap();
        }
        self.inner.upload_blob(name, bytes, mime_type).await
    }

    async fn list_blobs_by_prefix(&self, prefix: &str) -> RemoteResult<Vec<RemoteBlob>> {
        self.inner.list_blobs_by_prefix(prefix).await
    }

    async fn download_blob(&self, id: &str) -> RemoteResult<Vec<u8>> {
        if !self.gate_uploads {
            let _permit = self.gate.acquire().await.unwrap();
        }
        self.inner.download_blob(id).await
    }

    async fn account_identity(&self) -> RemoteResult<AccountIdentity> {
        self.inner.account_identity().await
    }
}
