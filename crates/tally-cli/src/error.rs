use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] tally_core::Error),
    #[error(transparent)]
    Sync(#[from] tally_core::conductor::SyncError),
    #[error(transparent)]
    Remote(#[from] tally_core::remote::RemoteError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Authentication error: {0}")]
    Auth(#[from] tally_core::auth::AuthError),
    #[error("Collection '{0}' is not tracked by this workspace")]
    UnknownCollection(String),
    #[error("Record not found: {0}")]
    RecordNotFound(String),
    #[error("No backup matches id {0}")]
    BackupNotFound(String),
    #[error("The remote store holds no backups for this workspace yet")]
    NoBackups,
    #[error("Restoring replaces every local record. Re-run with --yes to confirm")]
    RestoreNotConfirmed,
    #[error(
        "Local edits conflict with a newer remote backup. Re-run with `tally sync --resolve pull` or `--resolve push`"
    )]
    UnresolvedConflict,
    #[error(
        "Workspace '{0}' is not configured. Run `tally config init --workspace {0}` first"
    )]
    WorkspaceNotConfigured(String),
}
