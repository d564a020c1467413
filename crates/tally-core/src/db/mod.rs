//! Database layer for Tally

mod connection;
mod migrations;
mod records;
mod sync_state;

pub use connection::Database;
pub use records::SqliteRecordStore;
pub use sync_state::SqliteSyncStateStore;
