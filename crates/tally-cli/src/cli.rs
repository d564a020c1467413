use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "tally")]
#[command(about = "Local-first bookkeeping records with snapshot backups")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to the local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Workspace profile to operate on
    #[arg(long, short = 'w', global = true, value_name = "NAME")]
    pub workspace: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Configure workspace profiles
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Manage the remote store credential
    Auth {
        #[command(subcommand)]
        command: AuthCommands,
    },
    /// Edit local records
    Records {
        #[command(subcommand)]
        command: RecordCommands,
    },
    /// Show sync state and remote account
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Upload a new backup generation now
    Save,
    /// List remote backups, newest first
    Backups {
        /// Number of backups to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Replace local records with a remote backup
    Restore {
        /// Backup id (newest when omitted)
        #[arg(long, value_name = "ID")]
        backup: Option<String>,
        /// Acknowledge that every local record is replaced
        #[arg(long)]
        yes: bool,
    },
    /// Check the remote store for a newer generation
    Sync {
        /// How to settle a conflict between local edits and a newer remote backup
        #[arg(long, value_enum)]
        resolve: Option<ResolveStrategy>,
    },
    /// Keep syncing in the foreground until Ctrl-C
    Watch,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum ResolveStrategy {
    /// Discard local edits and restore the remote backup
    Pull,
    /// Overwrite the remote backup with local records
    Push,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum BackendKind {
    Drive,
    R2,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Initialize or update a workspace profile
    Init {
        /// Remote backend holding the backups
        #[arg(long, value_enum)]
        backend: Option<BackendKind>,
        /// Prefix of every remote object name
        #[arg(long, value_name = "PREFIX")]
        remote_prefix: Option<String>,
        /// Collection to back up (repeatable)
        #[arg(long = "collection", value_name = "NAME")]
        collections: Vec<String>,
        /// Drive API base URL
        #[arg(long, value_name = "URL")]
        api_base_url: Option<String>,
        /// Drive upload base URL
        #[arg(long, value_name = "URL")]
        upload_base_url: Option<String>,
        /// OAuth token endpoint used to refresh the access token
        #[arg(long, value_name = "URL")]
        token_endpoint: Option<String>,
        /// OAuth client id used to refresh the access token
        #[arg(long, value_name = "ID")]
        client_id: Option<String>,
        /// Keep current active workspace instead of activating this one
        #[arg(long)]
        no_activate: bool,
    },
    /// Print the workspace profile
    Show,
}

#[derive(Subcommand)]
pub enum AuthCommands {
    /// Store an access token in the system keychain
    SetToken {
        /// OAuth access token
        #[arg(long, value_name = "TOKEN")]
        access_token: String,
        /// OAuth refresh token
        #[arg(long, value_name = "TOKEN")]
        refresh_token: Option<String>,
        /// Seconds until the access token expires
        #[arg(long, value_name = "SECONDS", default_value = "3600")]
        expires_in: i64,
    },
    /// Show whether a credential is stored and which account it belongs to
    Status,
    /// Forget the stored credential
    Logout,
}

#[derive(Subcommand)]
pub enum RecordCommands {
    /// Add a record from a JSON object
    Add {
        /// Collection name
        collection: String,
        /// JSON object with an `id` field
        json: String,
    },
    /// List records of a collection
    List {
        /// Collection name
        collection: String,
        /// Number of records to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a record by id
    Delete {
        /// Collection name
        collection: String,
        /// Record id
        id: String,
    },
}
