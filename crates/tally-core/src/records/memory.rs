//! In-memory record store.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use super::{validate_collection, Record, RecordStore, RecordVisitor};
use crate::error::{Error, Result};

#[derive(Debug, Default)]
struct Collection {
    rows: BTreeMap<u64, Record>,
    positions: HashMap<String, u64>,
    next_position: u64,
}

impl Collection {
    fn upsert(&mut self, record: Record) {
        if let Some(position) = self.positions.get(record.id()) {
            self.rows.insert(*position, record);
            return;
        }
        self.next_position += 1;
        self.positions
            .insert(record.id().to_string(), self.next_position);
        self.rows.insert(self.next_position, record);
    }
}

/// Record store backed by process memory, shared between clones.
#[derive(Debug, Clone, Default)]
pub struct MemoryRecordStore {
    collections: Arc<Mutex<HashMap<String, Collection>>>,
}

impl MemoryRecordStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Collection>>> {
        self.collections
            .lock()
            .map_err(|error| Error::Database(format!("record store lock poisoned: {error}")))
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn collections(&self) -> Result<Vec<String>> {
        let mut names = self
            .lock()?
            .iter()
            .filter(|(_, collection)| !collection.rows.is_empty())
            .map(|(name, _)| name.clone())
            .collect::<Vec<_>>();
        names.sort();
        Ok(names)
    }

    async fn get_all(&self, collection: &str) -> Result<Vec<Record>> {
        let collection = validate_collection(collection)?;
        Ok(self
            .lock()?
            .get(collection)
            .map(|collection| collection.rows.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn save_all(&self, collection: &str, records: Vec<Record>) -> Result<()> {
        let collection = validate_collection(collection)?;
        let mut guard = self.lock()?;
        let target = guard.entry(collection.to_string()).or_default();
        for record in records {
            target.upsert(record);
        }
        Ok(())
    }

    async fn add(&self, collection: &str, record: Record) -> Result<()> {
        let collection = validate_collection(collection)?;
        let mut guard = self.lock()?;
        let target = guard.entry(collection.to_string()).or_default();
        if target.positions.contains_key(record.id()) {
            return Err(Error::InvalidInput(format!(
                "record {} already exists in {collection}",
                record.id()
            )));
        }
        target.upsert(record);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool> {
        let collection = validate_collection(collection)?;
        let mut guard = self.lock()?;
        let Some(target) = guard.get_mut(collection) else {
            return Ok(false);
        };
        let Some(position) = target.positions.remove(id) else {
            return Ok(false);
        };
        target.rows.remove(&position);
        Ok(true)
    }

    async fn iterate(&self, collection: &str, visitor: &mut RecordVisitor<'_>) -> Result<usize> {
        let collection = validate_collection(collection)?;
        let guard = self.lock()?;
        let Some(target) = guard.get(collection) else {
            return Ok(0);
        };
        let mut count = 0;
        for record in target.rows.values() {
            visitor(record)?;
            count += 1;
        }
        Ok(count)
    }

    async fn clear(&self, collection: &str) -> Result<()> {
        let collection = validate_collection(collection)?;
        self.lock()?.remove(collection);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn record(id: &str, amount: i64) -> Record {
        Record::from_value(json!({ "id": id, "amount": amount })).unwrap()
    }

    fn ids(records: &[Record]) -> Vec<&str> {
        records.iter().map(Record::id).collect()
    }

    #[tokio::test]
    async fn save_all_upserts_and_keeps_order() {
        let store = MemoryRecordStore::new();
        store
            .save_all("invoices", vec![record("a", 1), record("b", 2)])
            .await
            .unwrap();
        store
            .save_all("invoices", vec![record("c", 3), record("a", 10)])
            .await
            .unwrap();

        let all = store.get_all("invoices").await.unwrap();
        assert_eq!(ids(&all), vec!["a", "b", "c"]);
        assert_eq!(all[0].get("amount"), Some(&json!(10)));
    }

    #[tokio::test]
    async fn add_rejects_duplicates_and_delete_reports_removal() {
        let store = MemoryRecordStore::new();
        store.add("clients", record("x", 1)).await.unwrap();
        assert!(store.add("clients", record("x", 2)).await.is_err());

        assert!(store.delete("clients", "x").await.unwrap());
        assert!(!store.delete("clients", "x").await.unwrap());
        assert!(!store.delete("missing", "x").await.unwrap());
    }

    #[tokio::test]
    async fn iterate_counts_and_clear_empties() {
        let store = MemoryRecordStore::new();
        store
            .save_all("financial-entries", vec![record("1", 1), record("2", 2)])
            .await
            .unwrap();

        let mut seen = Vec::new();
        let count = store
            .iterate("financial-entries", &mut |record: &Record| {
                seen.push(record.id().to_string());
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(seen, vec!["1", "2"]);
        assert_eq!(
            store.collections().await.unwrap(),
            vec!["financial-entries"]
        );

        store.clear("financial-entries").await.unwrap();
        assert!(store.get_all("financial-entries").await.unwrap().is_empty());
        assert!(store.collections().await.unwrap().is_empty());
    }
}
