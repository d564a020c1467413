//! The sync conductor: connection state machine, save, restore and
//! conflict detection for one workspace.
//!
//! Save, restore and auto-pull all need the operation lock and only ever
//! `try_lock` it, so at most one of them runs and the loser is skipped or
//! deferred instead of queued. Status is published on a `watch` channel.

mod coordinator;
mod status;

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::auth::{AuthError, TokenProvider};
use crate::autosave::{AutosaveGate, SaveReason, SkipReason};
use crate::config::{EngineConfig, Workspace};
use crate::records::RecordStore;
use crate::remote::{AccountIdentity, RemoteBlob, RemoteError, RemoteStore};
use crate::restore::{RestoreError, RestorePipeline, RestoreReport};
use crate::snapshot::{SnapshotBuilder, SnapshotError, BLOB_MIME_TYPE, MANIFEST_MIME_TYPE};
use crate::state::{SyncState, SyncStateStore};
use crate::util::is_newer_beyond;

pub use coordinator::{SyncCommand, SyncCoordinator, SyncHandle};
pub use status::{
    ConflictInfo, ConnectionState, RestoreState, SaveState, StatusMessage, SyncStatus, Urgency,
};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("No credential is configured for this workspace")]
    MissingConfig,
    #[error("Auth provider was not ready within {0:?}")]
    NotReady(Duration),
    #[error("Credential was rejected: {0}")]
    Unauthorized(String),
    #[error("Not connected to the remote store")]
    NotConnected,
    #[error("Another save or restore is already running")]
    Busy,
    #[error("There is no pending conflict to resolve")]
    NoConflict,
    #[error("Restore was confirmed for backup {confirmed}, not {requested}")]
    ConfirmationMismatch { confirmed: String, requested: String },
    #[error("Save did not run: {0:?}")]
    Skipped(SkipReason),
    #[error(transparent)]
    Auth(AuthError),
    #[error(transparent)]
    Remote(RemoteError),
    #[error("Failed to build snapshot: {0}")]
    Snapshot(#[from] SnapshotError),
    #[error(transparent)]
    Restore(RestoreError),
    #[error("Local state error: {0}")]
    Local(#[from] crate::Error),
    #[error("Sync coordinator has stopped")]
    CoordinatorStopped,
}

impl SyncError {
    /// The operation was cancelled by the user.
    #[must_use]
    pub const fn is_aborted(&self) -> bool {
        matches!(self, Self::Restore(error) if error.is_aborted())
    }

    #[must_use]
    pub const fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }
}

impl From<RemoteError> for SyncError {
    fn from(error: RemoteError) -> Self {
        match error {
            RemoteError::Unauthorized(message) => Self::Unauthorized(message),
            RemoteError::MissingCredential => Self::MissingConfig,
            other => Self::Remote(other),
        }
    }
}

impl From<AuthError> for SyncError {
    fn from(error: AuthError) -> Self {
        match error {
            AuthError::NotConfigured => Self::MissingConfig,
            AuthError::Unauthorized(message) => Self::Unauthorized(message),
            other => Self::Auth(other),
        }
    }
}

impl From<RestoreError> for SyncError {
    fn from(error: RestoreError) -> Self {
        match error {
            RestoreError::Remote(RemoteError::Unauthorized(message)) => {
                Self::Unauthorized(message)
            }
            RestoreError::Remote(RemoteError::MissingCredential) => Self::MissingConfig,
            other => Self::Restore(other),
        }
    }
}

/// Proof that the user accepted losing local data for one specific backup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreConfirmation {
    manifest_id: String,
}

impl RestoreConfirmation {
    /// Record the user's acknowledgement that restoring `manifest` replaces
    /// every local record.
    #[must_use]
    pub fn acknowledge_data_loss(manifest: &RemoteBlob) -> Self {
        Self {
            manifest_id: manifest.id.clone(),
        }
    }

    fn check(&self, manifest: &RemoteBlob) -> Result<(), SyncError> {
        if self.manifest_id == manifest.id {
            Ok(())
        } else {
            Err(SyncError::ConfirmationMismatch {
                confirmed: self.manifest_id.clone(),
                requested: manifest.id.clone(),
            })
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    /// Discard local edits and restore the remote generation.
    Pull,
    /// Overwrite the remote copy with local records.
    Push,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SaveReport {
    pub reason: SaveReason,
    pub manifest_id: String,
    pub manifest_name: String,
    pub synced_at: DateTime<Utc>,
    pub collections: Vec<(String, u64)>,
}

impl SaveReport {
    #[must_use]
    pub fn total_records(&self) -> u64 {
        self.collections.iter().map(|(_, count)| count).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved(SaveReport),
    Skipped(SkipReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictCheck {
    /// Remote is not newer than local state, or holds no generation at all.
    UpToDate,
    /// Remote was newer and local state clean: it was restored.
    Pulled(RestoreReport),
    /// Remote is newer but local edits are unsaved.
    Conflict(ConflictInfo),
    /// Another operation held the lock; the next check retries.
    Deferred,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Pulled(RestoreReport),
    Pushed(SaveReport),
}

#[derive(Debug)]
pub struct ConnectReport {
    pub account: AccountIdentity,
    /// Outcome of the conflict check that follows every successful connect.
    pub check: Result<ConflictCheck, SyncError>,
}

/// Collaborators the conductor drives.
#[derive(Clone)]
pub struct SyncCollaborators {
    pub remote: Arc<dyn RemoteStore>,
    /// Store written by restores. Pass the unobserved store so imports are
    /// not reported as local edits.
    pub records: Arc<dyn RecordStore>,
    pub state: Arc<dyn SyncStateStore>,
    pub tokens: Arc<dyn TokenProvider>,
}

pub struct SyncConductor {
    workspace: Workspace,
    config: EngineConfig,
    remote: Arc<dyn RemoteStore>,
    records: Arc<dyn RecordStore>,
    state_store: Arc<dyn SyncStateStore>,
    tokens: Arc<dyn TokenProvider>,
    operation: tokio::sync::Mutex<()>,
    state: Mutex<SyncState>,
    /// Bumped on every local edit so a save can tell whether edits raced it.
    edits: AtomicU64,
    online: AtomicBool,
    last_saved_at: Mutex<Option<DateTime<Utc>>>,
    missing_config_reported: AtomicBool,
    shutdown: CancellationToken,
    status: watch::Sender<SyncStatus>,
}

impl SyncConductor {
    /// Create a conductor, loading the persisted sync state of `workspace`.
    pub fn new(
        workspace: Workspace,
        config: EngineConfig,
        collaborators: SyncCollaborators,
    ) -> Result<Self, SyncError> {
        let state = collaborators.state.load(&workspace.id)?;
        let (status, _) = watch::channel(SyncStatus {
            online: true,
            dirty: state.dirty,
            last_synced_at: state.last_synced_at,
            ..SyncStatus::default()
        });

        Ok(Self {
            workspace,
            config,
            remote: collaborators.remote,
            records: collaborators.records,
            state_store: collaborators.state,
            tokens: collaborators.tokens,
            operation: tokio::sync::Mutex::new(()),
            state: Mutex::new(state),
            edits: AtomicU64::new(0),
            online: AtomicBool::new(true),
            last_saved_at: Mutex::new(None),
            missing_config_reported: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            status,
        })
    }

    pub const fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    pub fn sync_state(&self) -> SyncState {
        *self.lock_state()
    }

    pub fn is_connected(&self) -> bool {
        self.status.borrow().connection == ConnectionState::Connected
    }

    pub fn set_online(&self, online: bool) {
        let was_online = self.online.swap(online, Ordering::SeqCst);
        if was_online != online {
            tracing::info!(
                "Workspace {} is now {}",
                self.workspace.id,
                if online { "online" } else { "offline" }
            );
        }
        self.status.send_modify(|status| {
            status.online = online;
            if online {
                status.clear_low_message();
            } else {
                status.post(StatusMessage::low("Offline; changes are kept locally"));
            }
        });
    }

    /// Record that local records diverged from the last synced generation.
    pub fn mark_dirty(&self) -> Result<(), SyncError> {
        self.edits.fetch_add(1, Ordering::SeqCst);
        if self.lock_state().dirty {
            return Ok(());
        }
        self.update_state(|state| state.dirty = true)?;
        Ok(())
    }

    /// Cancel in-flight auto-pulls and conflict restores.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Obtain a credential, fetch the account identity and run a conflict check.
    pub async fn connect(&self) -> Result<ConnectReport, SyncError> {
        self.status.send_modify(|status| {
            status.connection = ConnectionState::Connecting;
        });

        let timeout = self.config.auth_ready_timeout();
        let token = match tokio::time::timeout(timeout, self.tokens.access_token()).await {
            Ok(result) => result.map_err(SyncError::from),
            Err(_) => Err(SyncError::NotReady(timeout)),
        };
        if let Err(error) = token {
            return Err(self.connect_failed(error));
        }

        let account = match self.remote.account_identity().await {
            Ok(account) => account,
            Err(error) => return Err(self.connect_failed(error.into())),
        };

        self.missing_config_reported.store(false, Ordering::SeqCst);
        tracing::info!(
            "Connected workspace {} as {}",
            self.workspace.id,
            account.label()
        );
        self.status.send_modify(|status| {
            status.connection = ConnectionState::Connected;
            status.account = Some(account.clone());
            status.clear_low_message();
        });

        let check = self.check_remote().await;
        Ok(ConnectReport { account, check })
    }

    pub fn disconnect(&self) {
        tracing::info!("Disconnected workspace {}", self.workspace.id);
        self.status.send_modify(|status| {
            status.connection = ConnectionState::Disconnected;
            status.account = None;
        });
    }

    /// Compare the newest remote manifest against local sync state.
    pub async fn check_remote(&self) -> Result<ConflictCheck, SyncError> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }

        let newest = match self.newest_manifest().await {
            Ok(newest) => newest,
            Err(error) => {
                return Err(self.operation_failed(error.into(), "Checking for remote changes"))
            }
        };
        let Some(newest) = newest else {
            return Ok(ConflictCheck::UpToDate);
        };

        let state = self.sync_state();
        if !is_newer_beyond(
            newest.modified_time,
            state.last_synced_at,
            self.config.clock_skew_tolerance_ms,
        ) {
            return Ok(ConflictCheck::UpToDate);
        }
        if state.dirty {
            return Ok(ConflictCheck::Conflict(self.raise_conflict(&newest, &state)));
        }

        let Ok(_guard) = self.operation.try_lock() else {
            tracing::debug!("Deferring auto-pull of {}: operation in progress", newest.name);
            return Ok(ConflictCheck::Deferred);
        };
        // An edit may have landed while the lock was contended.
        let state = self.sync_state();
        if state.dirty {
            return Ok(ConflictCheck::Conflict(self.raise_conflict(&newest, &state)));
        }

        tracing::info!("Auto-pulling newer remote generation {}", newest.name);
        let edits = self.edits.load(Ordering::SeqCst);
        let report = self
            .run_restore(&newest, &self.shutdown.child_token())
            .await?;
        self.commit_restore(&newest, edits)?;
        Ok(ConflictCheck::Pulled(report))
    }

    /// Upload a new generation of every tracked collection.
    pub async fn save_now(&self, reason: SaveReason) -> Result<SaveOutcome, SyncError> {
        if !self.online.load(Ordering::SeqCst) {
            return Ok(SaveOutcome::Skipped(SkipReason::Offline));
        }
        if !self.is_connected() {
            return Ok(SaveOutcome::Skipped(SkipReason::NotAuthenticated));
        }
        if reason != SaveReason::ConflictPush && self.has_conflict() {
            return Ok(SaveOutcome::Skipped(SkipReason::ConflictPending));
        }
        let Ok(_guard) = self.operation.try_lock() else {
            tracing::debug!("Skipping {:?} save: operation in progress", reason);
            return Ok(SaveOutcome::Skipped(SkipReason::Busy));
        };

        self.status
            .send_modify(|status| status.save = SaveState::Saving);
        let pending_conflict = self.status.borrow().conflict.clone();
        let edits = self.edits.load(Ordering::SeqCst);
        let result = self.upload_generation(reason).await;
        self.status.send_modify(|status| status.save = SaveState::Idle);

        let report = match result {
            Ok(report) => report,
            Err(error) => return Err(self.save_failed(error)),
        };

        // A conflict check may have run while the upload was in flight. Only the
        // conflict this save was asked to push over may be cleared.
        let current_conflict = self.status.borrow().conflict.clone();
        let conflict_raised = current_conflict.is_some() && current_conflict != pending_conflict;
        let unchanged = self.edits.load(Ordering::SeqCst) == edits;
        self.update_state(|state| {
            state.last_synced_at = Some(report.synced_at);
            if unchanged && !conflict_raised {
                state.dirty = false;
            }
        })?;
        *self
            .last_saved_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());
        self.status.send_modify(|status| {
            if conflict_raised {
                status.post(StatusMessage::high(
                    "A newer backup arrived from another device while saving; choose pull or push",
                ));
            } else {
                status.conflict = None;
                status.message = None;
            }
        });
        tracing::info!(
            "Saved {} records to {} ({:?})",
            report.total_records(),
            report.manifest_name,
            reason
        );
        Ok(SaveOutcome::Saved(report))
    }

    /// Remote manifests for this workspace, newest first.
    pub async fn list_backups(&self) -> Result<Vec<RemoteBlob>, SyncError> {
        self.remote
            .list_blobs_by_prefix(&self.workspace.manifest_prefix())
            .await
            .map(|blobs| blobs.into_iter().filter(is_manifest).collect())
            .map_err(|error| self.operation_failed(error.into(), "Listing backups"))
    }

    /// Replace local records with the generation described by `manifest`.
    pub async fn restore(
        &self,
        manifest: &RemoteBlob,
        confirmation: RestoreConfirmation,
        cancel: CancellationToken,
    ) -> Result<RestoreReport, SyncError> {
        confirmation.check(manifest)?;
        let Ok(_guard) = self.operation.try_lock() else {
            return Err(SyncError::Busy);
        };

        let edits = self.edits.load(Ordering::SeqCst);
        let report = self.run_restore(manifest, &cancel).await?;

        let newest = self.newest_manifest().await.ok().flatten();
        match newest {
            Some(newest)
                if newest.id != manifest.id && newest.modified_time > manifest.modified_time =>
            {
                // Local now differs from the newest generation; keep it from
                // being auto-pulled back and let the next save publish it.
                self.update_state(|state| {
                    state.dirty = true;
                    state.last_synced_at = Some(newest.modified_time);
                })?;
                self.status.send_modify(|status| {
                    status.conflict = None;
                    status.message = None;
                    status.post(StatusMessage::low(format!(
                        "Restored older backup {}; save to make it the latest",
                        manifest.name
                    )));
                });
            }
            _ => self.commit_restore(manifest, edits)?,
        }
        Ok(report)
    }

    /// Settle a pending conflict by pulling or pushing.
    pub async fn resolve_conflict(
        &self,
        resolution: ConflictResolution,
    ) -> Result<Resolution, SyncError> {
        let Some(conflict) = self.status.borrow().conflict.clone() else {
            return Err(SyncError::NoConflict);
        };
        tracing::info!(
            "Resolving conflict with {} by {:?}",
            conflict.remote_name,
            resolution
        );

        match resolution {
            ConflictResolution::Pull => {
                let manifest = conflict.manifest();
                let confirmation = RestoreConfirmation::acknowledge_data_loss(&manifest);
                let report = self
                    .restore(&manifest, confirmation, self.shutdown.child_token())
                    .await?;
                Ok(Resolution::Pulled(report))
            }
            ConflictResolution::Push => match self.save_now(SaveReason::ConflictPush).await? {
                SaveOutcome::Saved(report) => Ok(Resolution::Pushed(report)),
                SaveOutcome::Skipped(reason) => Err(SyncError::Skipped(reason)),
            },
        }
    }

    async fn newest_manifest(&self) -> Result<Option<RemoteBlob>, RemoteError> {
        let mut manifests = self
            .remote
            .list_blobs_by_prefix(&self.workspace.manifest_prefix())
            .await?;
        manifests.retain(is_manifest);
        Ok(manifests.into_iter().next())
    }

    async fn upload_generation(&self, reason: SaveReason) -> Result<SaveReport, SyncError> {
        let snapshot = SnapshotBuilder::new(&self.workspace, self.records.as_ref())
            .build(Utc::now())
            .await?;

        for blob in &snapshot.blobs {
            self.remote
                .upload_blob(&blob.name, blob.bytes.clone(), BLOB_MIME_TYPE)
                .await?;
        }
        let uploaded = self
            .remote
            .upload_blob(
                &snapshot.manifest_name,
                snapshot.manifest_bytes()?,
                MANIFEST_MIME_TYPE,
            )
            .await?;
        let synced_at = match uploaded.modified_time {
            Some(modified_time) => modified_time,
            None => self.remote_upload_time(&uploaded.id, &uploaded.name).await?,
        };

        Ok(SaveReport {
            reason,
            manifest_id: uploaded.id,
            manifest_name: uploaded.name,
            synced_at,
            collections: snapshot
                .blobs
                .iter()
                .map(|blob| (blob.collection.clone(), blob.count))
                .collect(),
        })
    }

    /// The store's own timestamp for an upload that did not report one.
    /// Local time is never substituted; the two clocks may disagree.
    async fn remote_upload_time(&self, id: &str, name: &str) -> Result<DateTime<Utc>, SyncError> {
        self.remote
            .list_blobs_by_prefix(name)
            .await?
            .into_iter()
            .find(|blob| blob.id == id)
            .map(|blob| blob.modified_time)
            .ok_or_else(|| {
                RemoteError::InvalidResponse(format!("uploaded {name} is missing from the listing"))
                    .into()
            })
    }

    async fn run_restore(
        &self,
        manifest: &RemoteBlob,
        cancel: &CancellationToken,
    ) -> Result<RestoreReport, SyncError> {
        self.status.send_modify(|status| {
            status.restore = RestoreState::Restoring;
            status.restore_progress = None;
        });

        let sender = &self.status;
        let pipeline = RestorePipeline::new(
            &self.workspace,
            self.remote.as_ref(),
            self.records.as_ref(),
            self.state_store.as_ref(),
            self.config.batch_size(),
        );
        let result = pipeline
            .run(manifest, cancel, &|progress| {
                sender.send_modify(|status| status.restore_progress = Some(progress));
            })
            .await;

        self.status.send_modify(|status| {
            status.restore = RestoreState::Idle;
            status.restore_progress = None;
        });

        match result {
            Ok(report) => {
                if let Err(error) = self.refresh_restore_marker() {
                    tracing::warn!("Failed to reload sync state after restore: {}", error);
                }
                Ok(report)
            }
            Err(error) if error.is_aborted() => {
                tracing::info!("Restore of {} was cancelled", manifest.name);
                self.status.send_modify(|status| {
                    status.post(StatusMessage::low(
                        "Restore cancelled; run it again to get a complete copy",
                    ));
                });
                Err(error.into())
            }
            Err(error) => Err(self.restore_failed(error.into())),
        }
    }

    fn commit_restore(&self, manifest: &RemoteBlob, edits: u64) -> Result<(), SyncError> {
        let unchanged = self.edits.load(Ordering::SeqCst) == edits;
        self.update_state(|state| {
            state.last_synced_at = Some(manifest.modified_time);
            state.dirty = !unchanged;
        })?;
        self.status.send_modify(|status| {
            status.conflict = None;
            status.message = None;
        });
        Ok(())
    }

    /// The pipeline writes the completion marker through the state store.
    fn refresh_restore_marker(&self) -> Result<(), SyncError> {
        let persisted = self.state_store.load(&self.workspace.id)?;
        self.lock_state().restore_completed_at = persisted.restore_completed_at;
        Ok(())
    }

    fn raise_conflict(&self, remote: &RemoteBlob, state: &SyncState) -> ConflictInfo {
        let conflict = ConflictInfo::new(remote, state.last_synced_at);
        tracing::warn!(
            "Remote generation {} is newer than local state with unsaved edits",
            remote.name
        );
        let published = conflict.clone();
        self.status.send_modify(|status| {
            status.conflict = Some(published);
        });
        conflict
    }

    fn connect_failed(&self, error: SyncError) -> SyncError {
        match &error {
            SyncError::MissingConfig => self.credential_missing(),
            SyncError::Unauthorized(_) => self.credential_rejected(&error),
            _ => {
                tracing::warn!("Failed to connect workspace {}: {}", self.workspace.id, error);
                self.status.send_modify(|status| {
                    status.connection = ConnectionState::Error;
                    status.post(StatusMessage::low(format!("Cannot reach sync: {error}")));
                });
            }
        }
        error
    }

    fn credential_missing(&self) {
        if !self.missing_config_reported.swap(true, Ordering::SeqCst) {
            tracing::warn!(
                "No credential configured for workspace {}",
                self.workspace.id
            );
        }
        self.status.send_modify(|status| {
            status.connection = ConnectionState::MissingConfig;
            status.account = None;
            status.post(StatusMessage::low("Sign in to enable sync"));
        });
    }

    /// Credential problems change the connection state; other errors only post a message.
    fn credential_failed(&self, error: &SyncError) -> bool {
        match error {
            SyncError::MissingConfig => self.credential_missing(),
            SyncError::Unauthorized(_) => self.credential_rejected(error),
            _ => return false,
        }
        true
    }

    fn credential_rejected(&self, error: &SyncError) {
        tracing::warn!("Credential rejected for workspace {}: {}", self.workspace.id, error);
        if let Err(clear_error) = self.tokens.invalidate() {
            tracing::error!("Failed to clear rejected credential: {}", clear_error);
        }
        self.status.send_modify(|status| {
            status.connection = ConnectionState::Disconnected;
            status.account = None;
            status.post(StatusMessage::low("Signed out; sign in again to sync"));
        });
    }

    fn operation_failed(&self, error: SyncError, context: &str) -> SyncError {
        if !self.credential_failed(&error) {
            tracing::warn!("{} failed: {}", context, error);
            self.status.send_modify(|status| {
                status.post(StatusMessage::low(format!("{context} failed: {error}")));
            });
        }
        error
    }

    fn save_failed(&self, error: SyncError) -> SyncError {
        self.credential_failed(&error);
        tracing::warn!("Save failed for workspace {}: {}", self.workspace.id, error);
        let message = if self.lock_state().dirty {
            StatusMessage::high(format!(
                "Saving failed: {error}. Your changes are only stored on this device"
            ))
        } else {
            StatusMessage::low(format!("Saving failed: {error}"))
        };
        self.status.send_modify(|status| status.post(message));
        error
    }

    fn restore_failed(&self, error: SyncError) -> SyncError {
        self.credential_failed(&error);
        tracing::error!("Restore failed for workspace {}: {}", self.workspace.id, error);
        self.status.send_modify(|status| {
            status.post(StatusMessage::high(format!(
                "Restore failed: {error}. Local data may be incomplete; retry the restore"
            )));
        });
        error
    }

    fn lock_state(&self) -> MutexGuard<'_, SyncState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `change`, persist it and publish the result.
    fn update_state(&self, change: impl FnOnce(&mut SyncState)) -> Result<SyncState, SyncError> {
        let updated = {
            let mut state = self.lock_state();
            change(&mut state);
            *state
        };
        self.status.send_modify(|status| {
            status.dirty = updated.dirty;
            status.last_synced_at = updated.last_synced_at;
        });
        self.state_store.save(&self.workspace.id, &updated)?;
        Ok(updated)
    }
}

fn is_manifest(blob: &RemoteBlob) -> bool {
    Path::new(&blob.name)
        .extension()
        .is_some_and(|extension| extension.eq_ignore_ascii_case("json"))
}

impl AutosaveGate for SyncConductor {
    fn is_dirty(&self) -> bool {
        self.lock_state().dirty
    }

    fn is_saving(&self) -> bool {
        let status = self.status.borrow();
        status.save == SaveState::Saving || status.restore == RestoreState::Restoring
    }

    fn is_authenticated(&self) -> bool {
        self.is_connected()
    }

    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn has_conflict(&self) -> bool {
        self.status.borrow().conflict.is_some()
    }

    fn last_saved_at(&self) -> Option<DateTime<Utc>> {
        *self
            .last_saved_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
