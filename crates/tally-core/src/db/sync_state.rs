//! `SQLite` sync-state store

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use super::Database;
use crate::error::Result;
use crate::state::{SyncState, SyncStateStore};

/// `SQLite` implementation of `SyncStateStore`
#[derive(Clone)]
pub struct SqliteSyncStateStore {
    db: Database,
}

impl SqliteSyncStateStore {
    /// Create a new store on the given database
    pub const fn new(db: Database) -> Self {
        Self { db }
    }
}

fn to_millis(value: Option<DateTime<Utc>>) -> Option<i64> {
    value.map(|value| value.timestamp_millis())
}

fn from_millis(value: Option<i64>) -> Option<DateTime<Utc>> {
    value.and_then(DateTime::from_timestamp_millis)
}

impl SyncStateStore for SqliteSyncStateStore {
    fn load(&self, workspace_id: &str) -> Result<SyncState> {
        let conn = self.db.connection()?;
        let state = conn
            .query_row(
                "SELECT dirty, last_synced_at, restore_completed_at
                 FROM sync_state WHERE workspace_id = ?",
                params![workspace_id],
                |row| {
                    Ok(SyncState {
                        dirty: row.get::<_, i32>(0)? != 0,
                        last_synced_at: from_millis(row.get(1)?),
                        restore_completed_at: from_millis(row.get(2)?),
                    })
                },
            )
            .optional()?;
        Ok(state.unwrap_or_default())
    }

    fn save(&self, workspace_id: &str, state: &SyncState) -> Result<()> {
        let conn = self.db.connection()?;
        conn.execute(
            "INSERT INTO sync_state (workspace_id, dirty, last_synced_at, restore_completed_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(workspace_id) DO UPDATE SET
                 dirty = excluded.dirty,
                 last_synced_at = excluded.last_synced_at,
                 restore_completed_at = excluded.restore_completed_at",
            params![
                workspace_id,
                i32::from(state.dirty),
                to_millis(state.last_synced_at),
                to_millis(state.restore_completed_at),
            ],
        )?;
        Ok(())
    }
}
