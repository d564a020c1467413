//! `SQLite` record store

use async_trait::async_trait;
use rusqlite::params;

use super::Database;
use crate::error::{Error, Result};
use crate::records::{validate_collection, Record, RecordStore, RecordVisitor};

const UPSERT_SQL: &str = "INSERT INTO records (collection, id, position, payload)
     VALUES (?1, ?2, (SELECT COALESCE(MAX(position), 0) + 1 FROM records WHERE collection = ?1), ?3)
     ON CONFLICT(collection, id) DO UPDATE SET payload = excluded.payload";

/// `SQLite` implementation of `RecordStore`
#[derive(Clone)]
pub struct SqliteRecordStore {
    db: Database,
}

impl SqliteRecordStore {
    /// Create a new store on the given database
    pub const fn new(db: Database) -> Self {
        Self { db }
    }

    /// Parse a record from its stored payload
    fn parse_payload(collection: &str, payload: &str) -> Result<Record> {
        Record::from_json(payload).map_err(|error| {
            Error::Database(format!("corrupt record in {collection}: {error}"))
        })
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn collections(&self) -> Result<Vec<String>> {
        let conn = self.db.connection()?;
        let mut stmt =
            conn.prepare("SELECT DISTINCT collection FROM records ORDER BY collection")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }

    async fn get_all(&self, collection: &str) -> Result<Vec<Record>> {
        let collection = validate_collection(collection)?;
        let conn = self.db.connection()?;
        let mut stmt =
            conn.prepare("SELECT payload FROM records WHERE collection = ? ORDER BY position")?;
        let payloads = stmt
            .query_map(params![collection], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        payloads
            .iter()
            .map(|payload| Self::parse_payload(collection, payload))
            .collect()
    }

    async fn save_all(&self, collection: &str, records: Vec<Record>) -> Result<()> {
        let collection = validate_collection(collection)?;
        let mut conn = self.db.connection()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(UPSERT_SQL)?;
            for record in &records {
                let payload = serde_json::to_string(record)?;
                stmt.execute(params![collection, record.id(), payload])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    async fn add(&self, collection: &str, record: Record) -> Result<()> {
        let collection = validate_collection(collection)?;
        let payload = serde_json::to_string(&record)?;
        let conn = self.db.connection()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO records (collection, id, position, payload)
             VALUES (?1, ?2, (SELECT COALESCE(MAX(position), 0) + 1 FROM records WHERE collection = ?1), ?3)",
            params![collection, record.id(), payload],
        )?;
        if inserted == 0 {
            return Err(Error::InvalidInput(format!(
                "record {} already exists in {collection}",
                record.id()
            )));
        }
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool> {
        let collection = validate_collection(collection)?;
        let conn = self.db.connection()?;
        let removed = conn.execute(
            "DELETE FROM records WHERE collection = ? AND id = ?",
            params![collection, id],
        )?;
        Ok(removed > 0)
    }

    async fn iterate(&self, collection: &str, visitor: &mut RecordVisitor<'_>) -> Result<usize> {
        let collection = validate_collection(collection)?;
        let conn = self.db.connection()?;
        let mut stmt =
            conn.prepare("SELECT payload FROM records WHERE collection = ? ORDER BY position")?;
        let mut rows = stmt.query(params![collection])?;

        let mut count = 0;
        while let Some(row) = rows.next()? {
            let payload: String = row.get(0)?;
            visitor(&Self::parse_payload(collection, &payload)?)?;
            count += 1;
        }
        Ok(count)
    }

    async fn clear(&self, collection: &str) -> Result<()> {
        let collection = validate_collection(collection)?;
        let conn = self.db.connection()?;
        conn.execute(
            "DELETE FROM records WHERE collection = ?",
            params![collection],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn setup() -> SqliteRecordStore {
        SqliteRecordStore::new(Database::open_in_memory().unwrap())
    }

    fn record(value: serde_json::Value) -> Record {
        Record::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_save_all_upserts_in_order() {
        let store = setup();
        store
            .save_all(
                "invoices",
                vec![
                    record(json!({ "id": "a", "total": 1 })),
                    record(json!({ "id": 2, "total": 2 })),
                ],
            )
            .await
            .unwrap();
        store
            .save_all("invoices", vec![record(json!({ "id": "a", "total": 5 }))])
            .await
            .unwrap();

        let all = store.get_all("invoices").await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].clone().into_value(), json!({ "id": "a", "total": 5 }));
        assert_eq!(all[1].id(), "2");
    }

    #[tokio::test]
    async fn test_add_delete_and_collections() {
        let store = setup();
        store
            .add("clients", record(json!({ "id": "c1" })))
            .await
            .unwrap();
        assert!(store
            .add("clients", record(json!({ "id": "c1" })))
            .await
            .is_err());
        store
            .add("invoices", record(json!({ "id": "i1" })))
            .await
            .unwrap();

        assert_eq!(
            store.collections().await.unwrap(),
            vec!["clients".to_string(), "invoices".to_string()]
        );
        assert!(store.delete("clients", "c1").await.unwrap());
        assert!(!store.delete("clients", "c1").await.unwrap());
        assert_eq!(store.collections().await.unwrap(), vec!["invoices".to_string()]);
    }

    #[tokio::test]
    async fn test_iterate_and_clear() {
        let store = setup();
        let batch = (0..5)
            .map(|index| record(json!({ "id": index, "amount": index * 10 })))
            .collect();
        store.save_all("financial-entries", batch).await.unwrap();

        let mut total = 0;
        let count = store
            .iterate("financial-entries", &mut |record: &Record| {
                total += record.get("amount").and_then(serde_json::Value::as_i64).unwrap_or(0);
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(count, 5);
        assert_eq!(total, 100);

        store.clear("financial-entries").await.unwrap();
        assert_eq!(
            store
                .iterate("financial-entries", &mut |_: &Record| Ok(()))
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_iterate_stops_on_visitor_error() {
        let store = setup();
        store
            .save_all(
                "invoices",
                vec![record(json!({ "id": 1 })), record(json!({ "id": 2 }))],
            )
            .await
            .unwrap();

        let result = store
            .iterate("invoices", &mut |_: &Record| {
                Err(Error::InvalidInput("stop".to_string()))
            })
            .await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }
}
