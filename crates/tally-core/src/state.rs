//! Persisted per-workspace sync state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Local view of how the workspace relates to the remote store.
///
/// `dirty == false` means local records equal the remote generation as of
/// `last_synced_at`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    pub dirty: bool,
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Set when a restore ran to completion.
    pub restore_completed_at: Option<DateTime<Utc>>,
}

/// Storage for [`SyncState`], keyed by workspace id.
pub trait SyncStateStore: Send + Sync {
    /// Load the state, or the default state when none was saved.
    fn load(&self, workspace_id: &str) -> Result<SyncState>;

    fn save(&self, workspace_id: &str, state: &SyncState) -> Result<()>;
}

/// Sync state kept in process memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySyncStateStore {
    states: Arc<Mutex<HashMap<String, SyncState>>>,
}

impl MemorySyncStateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SyncStateStore for MemorySyncStateStore {
    fn load(&self, workspace_id: &str) -> Result<SyncState> {
        let states = self
            .states
            .lock()
            .map_err(|error| Error::Database(format!("sync state lock poisoned: {error}")))?;
        Ok(states.get(workspace_id).copied().unwrap_or_default())
    }

    fn save(&self, workspace_id: &str, state: &SyncState) -> Result<()> {
        self.states
            .lock()
            .map_err(|error| Error::Database(format!("sync state lock poisoned: {error}")))?
            .insert(workspace_id.to_string(), *state);
        Ok(())
    }
}
