mod common;

use std::sync::Arc;

use pretty_assertions::assert_eq;
use tempfile::TempDir;

use common::{entry, valid_token, workspace, ENTRIES, INVOICES};
use tally_core::auth::{MemoryTokenStore, TokenManager};
use tally_core::autosave::SaveReason;
use tally_core::conductor::{ConflictCheck, SaveOutcome, SyncCollaborators, SyncConductor};
use tally_core::config::EngineConfig;
use tally_core::db::{Database, SqliteRecordStore, SqliteSyncStateStore};
use tally_core::records::RecordStore;
use tally_core::remote::MemoryRemoteStore;
use tally_core::state::SyncStateStore;

fn conductor(db: &Database, remote: &MemoryRemoteStore) -> SyncConductor {
    SyncConductor::new(
        workspace(),
        EngineConfig::default(),
        SyncCollaborators {
            remote: Arc::new(remote.clone()),
            records: Arc::new(SqliteRecordStore::new(db.clone())),
            state: Arc::new(SqliteSyncStateStore::new(db.clone())),
            tokens: Arc::new(TokenManager::new(
                MemoryTokenStore::with_token(valid_token()),
                None,
            )),
        },
    )
    .unwrap()
}

#[tokio::test]
async fn sqlite_workspaces_sync_through_shared_remote() {
    let dir = TempDir::new().unwrap();
    let remote = MemoryRemoteStore::new();

    let laptop_db = Database::open(dir.path().join("laptop.db")).unwrap();
    let laptop_records = SqliteRecordStore::new(laptop_db.clone());
    laptop_records
        .save_all(ENTRIES, (1..=1200).map(|id| entry(id, 5)).collect())
        .await
        .unwrap();
    let laptop = conductor(&laptop_db, &remote);
    laptop.mark_dirty().unwrap();
    laptop.connect().await.unwrap();
    let SaveOutcome::Saved(report) = laptop.save_now(SaveReason::Manual).await.unwrap() else {
        panic!("save skipped");
    };
    assert_eq!(report.total_records(), 1200);

    let phone_path = dir.path().join("phone.db");
    {
        let phone_db = Database::open(&phone_path).unwrap();
        let phone = conductor(&phone_db, &remote);
        let connected = phone.connect().await.unwrap();
        let ConflictCheck::Pulled(pulled) = connected.check.unwrap() else {
            panic!("clean device must pull");
        };
        assert_eq!(pulled.collections[0].imported, 1200);
        assert_eq!(pulled.collections[0].flushes, 3);
    }

    let reopened = Database::open(&phone_path).unwrap();
    let records = SqliteRecordStore::new(reopened.clone());
    let restored = records.get_all(ENTRIES).await.unwrap();
    assert_eq!(restored.len(), 1200);
    assert_eq!(restored[0], entry(1, 5));
    assert_eq!(restored[1199], entry(1200, 5));
    assert!(records.get_all(INVOICES).await.unwrap().is_empty());

    let state = SqliteSyncStateStore::new(reopened).load("books").unwrap();
    assert!(!state.dirty);
    assert_eq!(state.last_synced_at, Some(report.synced_at));
    assert!(state.restore_completed_at.is_some());
}
