//! Change notification for record stores.
//!
//! Application edits go through an [`ObservedRecordStore`]; every successful
//! mutation notifies the registered observers. The sync engine itself writes
//! through the unwrapped store so restores never count as local edits.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use super::{Record, RecordStore, RecordVisitor};
use crate::error::Result;

/// Receives a callback after a collection was modified.
pub trait ChangeObserver: Send + Sync {
    fn records_changed(&self, collection: &str);
}

impl<F> ChangeObserver for F
where
    F: Fn(&str) + Send + Sync,
{
    fn records_changed(&self, collection: &str) {
        self(collection);
    }
}

/// Wraps a record store and reports mutations to observers.
#[derive(Clone)]
pub struct ObservedRecordStore {
    inner: Arc<dyn RecordStore>,
    observers: Arc<RwLock<Vec<Arc<dyn ChangeObserver>>>>,
}

impl ObservedRecordStore {
    pub fn new(inner: Arc<dyn RecordStore>) -> Self {
        Self {
            inner,
            observers: Arc::default(),
        }
    }

    pub fn register(&self, observer: Arc<dyn ChangeObserver>) {
        match self.observers.write() {
            Ok(mut observers) => observers.push(observer),
            Err(error) => tracing::error!("Failed to register change observer: {}", error),
        }
    }

    /// The wrapped store, for writes that must not be reported.
    #[must_use]
    pub fn inner(&self) -> Arc<dyn RecordStore> {
        Arc::clone(&self.inner)
    }

    fn notify(&self, collection: &str) {
        let observers = match self.observers.read() {
            Ok(observers) => observers.clone(),
            Err(error) => {
                tracing::error!("Change observers unavailable: {}", error);
                return;
            }
        };
        for observer in observers {
            observer.records_changed(collection);
        }
    }
}

#[async_trait]
impl RecordStore for ObservedRecordStore {
    async fn collections(&self) -> Result<Vec<String>> {
        self.inner.collections().await
    }

    async fn get_all(&self, collection: &str) -> Result<Vec<Record>> {
        self.inner.get_all(collection).await
    }

    async fn save_all(&self, collection: &str, records: Vec<Record>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        self.inner.save_all(collection, records).await?;
        self.notify(collection);
        Ok(())
    }

    async fn add(&self, collection: &str, record: Record) -> Result<()> {
        self.inner.add(collection, record).await?;
        self.notify(collection);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool> {
        let removed = self.inner.delete(collection, id).await?;
        if removed {
            self.notify(collection);
        }
        Ok(removed)
    }

    async fn iterate(&self, collection: &str, visitor: &mut RecordVisitor<'_>) -> Result<usize> {
        self.inner.iterate(collection, visitor).await
    }

    async fn clear(&self, collection: &str) -> Result<()> {
        self.inner.clear(collection).await?;
        self.notify(collection);
        Ok(())
    }
}
