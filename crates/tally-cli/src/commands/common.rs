use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tally_core::auth::TokenProvider;
use tally_core::conductor::{SyncCollaborators, SyncConductor, SyncStatus};
use tally_core::config::Workspace;
use tally_core::db::{Database, SqliteRecordStore, SqliteSyncStateStore};
use tally_core::records::{ObservedRecordStore, RecordStore};
use tally_core::remote::{DriveClient, R2Config, R2RemoteStore, RemoteBlob, RemoteStore};
use tally_core::state::SyncState;

use crate::auth::{drive_token_manager, EnvCredentialProvider};
use crate::config_profiles::{BackendProfile, CliWorkspacesConfig, WorkspaceProfile};
use crate::error::CliError;

/// Global options shared by every command.
#[derive(Debug, Clone, Default)]
pub struct Context {
    pub workspace: Option<String>,
    pub db_path: Option<PathBuf>,
}

/// A fully wired workspace: local database, remote backend and sync conductor.
pub struct Engine {
    pub name: String,
    pub workspace: Workspace,
    pub db_path: PathBuf,
    pub conductor: Arc<SyncConductor>,
    /// Record store for user edits; every change marks the workspace dirty.
    pub records: ObservedRecordStore,
}

#[derive(Debug, Serialize)]
pub struct BackupItem {
    pub id: String,
    pub name: String,
    pub modified_time: DateTime<Utc>,
    pub size: u64,
}

#[derive(Debug, Serialize)]
pub struct StatusView<'a> {
    pub workspace: &'a str,
    pub db_path: &'a Path,
    pub state: SyncState,
    pub status: &'a SyncStatus,
}

pub fn load_profile(ctx: &Context) -> Result<(String, WorkspaceProfile), CliError> {
    let config = CliWorkspacesConfig::load()?;
    let name = config.resolve_workspace_name(ctx.workspace.as_deref());
    let profile = config
        .workspace(&name)
        .cloned()
        .ok_or_else(|| CliError::WorkspaceNotConfigured(name.clone()))?;
    Ok((name, profile))
}

pub fn open_engine(ctx: &Context) -> Result<Engine, CliError> {
    let (name, profile) = load_profile(ctx)?;
    let workspace = profile.to_workspace(&name)?;
    let db_path = resolve_db_path(ctx.db_path.clone(), &name)?;
    let db = Database::open(&db_path)?;

    let local: Arc<dyn RecordStore> = Arc::new(SqliteRecordStore::new(db.clone()));
    let (remote, tokens) = build_backend(&name, &profile)?;
    let conductor = Arc::new(SyncConductor::new(
        workspace.clone(),
        profile.engine_config(),
        SyncCollaborators {
            remote,
            records: Arc::clone(&local),
            state: Arc::new(SqliteSyncStateStore::new(db)),
            tokens,
        },
    )?);

    let records = ObservedRecordStore::new(local);
    let observer = Arc::clone(&conductor);
    records.register(Arc::new(move |collection: &str| {
        if let Err(error) = observer.mark_dirty() {
            tracing::error!("Failed to mark workspace dirty after {} changed: {}", collection, error);
        }
    }));

    tracing::debug!("Opened workspace '{}' at {}", name, db_path.display());
    Ok(Engine {
        name,
        workspace,
        db_path,
        conductor,
        records,
    })
}

fn build_backend(
    name: &str,
    profile: &WorkspaceProfile,
) -> Result<(Arc<dyn RemoteStore>, Arc<dyn TokenProvider>), CliError> {
    match &profile.backend {
        BackendProfile::Drive { .. } => {
            let tokens: Arc<dyn TokenProvider> = Arc::new(drive_token_manager(name, profile)?);
            let config = profile.drive_config().unwrap_or_default();
            let remote = DriveClient::new(config, Arc::clone(&tokens))?;
            Ok((Arc::new(remote), tokens))
        }
        BackendProfile::R2 => {
            let config = R2Config::from_env()?.ok_or_else(|| {
                CliError::Config(
                    "R2 backend needs R2_ACCOUNT_ID, R2_BUCKET, R2_ACCESS_KEY_ID and R2_SECRET_ACCESS_KEY"
                        .to_string(),
                )
            })?;
            let tokens: Arc<dyn TokenProvider> = Arc::new(EnvCredentialProvider::new(config.clone()));
            Ok((Arc::new(R2RemoteStore::new(config)), tokens))
        }
    }
}

pub fn ensure_tracked(workspace: &Workspace, collection: &str) -> Result<String, CliError> {
    let collection = collection.trim();
    if workspace.tracks(collection) {
        Ok(collection.to_string())
    } else {
        Err(CliError::UnknownCollection(collection.to_string()))
    }
}

/// Pick the backup with `id`, or the newest one.
pub fn select_backup(backups: &[RemoteBlob], id: Option<&str>) -> Result<RemoteBlob, CliError> {
    match id.map(str::trim) {
        Some(id) => backups
            .iter()
            .find(|backup| backup.id == id)
            .cloned()
            .ok_or_else(|| CliError::BackupNotFound(id.to_string())),
        None => backups.first().cloned().ok_or(CliError::NoBackups),
    }
}

pub fn backup_to_item(backup: &RemoteBlob) -> BackupItem {
    BackupItem {
        id: backup.id.clone(),
        name: backup.name.clone(),
        modified_time: backup.modified_time,
        size: backup.size,
    }
}

pub fn format_backup_lines(backups: &[RemoteBlob], now: DateTime<Utc>) -> Vec<String> {
    backups
        .iter()
        .map(|backup| {
            format!(
                "{}  {:<10}  {}  {}",
                format_timestamp(backup.modified_time),
                format_relative_time(backup.modified_time, now),
                backup.id,
                backup.name
            )
        })
        .collect()
}

pub fn format_status_lines(name: &str, state: &SyncState, status: &SyncStatus) -> Vec<String> {
    let now = Utc::now();
    let mut lines = vec![
        format!("Workspace:   {name}"),
        format!("Connection:  {}", connection_label(status)),
        format!(
            "Local data:  {}",
            if state.dirty { "unsaved changes" } else { "in sync" }
        ),
        format!(
            "Last synced: {}",
            state.last_synced_at.map_or_else(
                || "never".to_string(),
                |at| format!("{} ({})", format_timestamp(at), format_relative_time(at, now))
            )
        ),
    ];
    if let Some(account) = &status.account {
        lines.push(format!("Account:     {}", account.label()));
    }
    if let Some(conflict) = &status.conflict {
        lines.push(format!(
            "Conflict:    remote backup {} from {} is newer than local edits",
            conflict.remote_name,
            format_timestamp(conflict.remote_timestamp)
        ));
    }
    if let Some(message) = &status.message {
        lines.push(format!("Message:     {}", message.text));
    }
    lines
}

fn connection_label(status: &SyncStatus) -> String {
    let connection = serde_json::to_value(status.connection)
        .ok()
        .and_then(|value| value.as_str().map(ToString::to_string))
        .unwrap_or_default();
    if status.online {
        connection
    } else {
        format!("{connection} (offline)")
    }
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

pub fn format_relative_time(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let diff = (now - at).num_milliseconds().max(0);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>, workspace_name: &str) -> Result<PathBuf, CliError> {
    if let Some(path) = cli_db_path.or_else(|| env::var_os("TALLY_DB_PATH").map(PathBuf::from)) {
        return Ok(path);
    }
    default_db_path(workspace_name)
}

pub fn default_db_path(workspace_name: &str) -> Result<PathBuf, CliError> {
    dirs::data_dir()
        .map(|dir| dir.join("tally").join(format!("{workspace_name}.db")))
        .ok_or_else(|| CliError::Config("Failed to resolve CLI data directory".to_string()))
}
