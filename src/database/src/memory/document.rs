use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::Faults;
use crate::drivers::{
    CollectionStats, DocumentDriver, DocumentFilter, DocumentServerStatus, DriverError,
    DriverResult,
};

const DEFAULT_DOCUMENT_BYTES: u64 = 512;

#[derive(Debug, Clone)]
struct Collection {
    marked: u64,
    unmarked: u64,
    index_count: u64,
    document_bytes: u64,
}

impl Default for Collection {
    fn default() -> Self {
        Self {
            marked: 0,
            unmarked: 0,
            index_count: 1,
            document_bytes: DEFAULT_DOCUMENT_BYTES,
        }
    }
}

impl Collection {
    fn matching(&self, filter: DocumentFilter) -> u64 {
        match filter {
            DocumentFilter::All => self.marked + self.unmarked,
            DocumentFilter::TestMarked => self.marked,
        }
    }
}

/// Document driver that tracks test-marked and unmarked document counts per collection
#[derive(Debug, Default)]
pub struct MemoryDocumentDriver {
    collections: Mutex<BTreeMap<String, Collection>>,
    faults: Faults,
    active_operations: AtomicU64,
}

impl MemoryDocumentDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_collection(&self, name: &str) {
        self.collections
            .lock()
            .entry(name.to_string())
            .or_default();
    }

    /// Insert documents, creating the collection if needed
    pub fn insert_documents(&self, collection: &str, count: u64, test_marked: bool) {
        let mut collections = self.collections.lock();
        let entry = collections.entry(collection.to_string()).or_default();
        if test_marked {
            entry.marked += count;
        } else {
            entry.unmarked += count;
        }
    }

    pub fn document_count(&self, collection: &str) -> Option<u64> {
        self.collections
            .lock()
            .get(collection)
            .map(|c| c.matching(DocumentFilter::All))
    }

    pub fn has_collection(&self, collection: &str) -> bool {
        self.collections.lock().contains_key(collection)
    }

    pub fn set_index_count(&self, collection: &str, index_count: u64) {
        if let Some(entry) = self.collections.lock().get_mut(collection) {
            entry.index_count = index_count;
        }
    }

    pub fn set_document_bytes(&self, collection: &str, bytes: u64) {
        if let Some(entry) = self.collections.lock().get_mut(collection) {
            entry.document_bytes = bytes;
        }
    }

    pub fn set_active_operations(&self, count: u64) {
        self.active_operations.store(count, Ordering::SeqCst);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.faults.set_unavailable(unavailable);
    }

    pub fn fail_on(&self, collection: &str) {
        self.faults.fail_on(collection);
    }

    pub fn clear_faults(&self) {
        self.faults.clear();
    }

    pub fn set_latency(&self, latency: Duration) {
        self.faults.set_latency(latency);
    }

    fn with_collection<T>(
        &self,
        name: &str,
        f: impl FnOnce(&mut Collection) -> T,
    ) -> DriverResult<T> {
        self.faults.check(name)?;
        let mut collections = self.collections.lock();
        let entry = collections
            .get_mut(name)
            .ok_or_else(|| DriverError::NotFound(format!("ns not found: {}", name)))?;
        Ok(f(entry))
    }
}

#[async_trait]
impl DocumentDriver for MemoryDocumentDriver {
    async fn ping(&self) -> DriverResult<()> {
        self.faults.enter().await
    }

    async fn list_collections(&self) -> DriverResult<Vec<String>> {
        self.faults.enter().await?;
        Ok(self.collections.lock().keys().cloned().collect())
    }

    async fn count_documents(&self, collection: &str, filter: DocumentFilter) -> DriverResult<u64> {
        self.faults.enter().await?;
        self.with_collection(collection, |c| c.matching(filter))
    }

    async fn delete_documents(
        &self,
        collection: &str,
        filter: DocumentFilter,
        limit: Option<u64>,
    ) -> DriverResult<u64> {
        self.faults.enter().await?;
        self.with_collection(collection, |c| {
            let mut budget = limit.unwrap_or(u64::MAX);

            let from_marked = c.marked.min(budget);
            c.marked -= from_marked;
            budget -= from_marked;

            let from_unmarked = match filter {
                DocumentFilter::All => c.unmarked.min(budget),
                DocumentFilter::TestMarked => 0,
            };
            c.unmarked -= from_unmarked;

            from_marked + from_unmarked
        })
    }

    async fn drop_collection(&self, collection: &str) -> DriverResult<()> {
        self.faults.enter().await?;
        self.faults.check(collection)?;
        self.collections.lock().remove(collection);
        Ok(())
    }

    async fn collection_stats(&self, collection: &str) -> DriverResult<CollectionStats> {
        self.faults.enter().await?;
        self.with_collection(collection, |c| {
            let documents = c.matching(DocumentFilter::All);
            CollectionStats {
                documents,
                size_bytes: documents * c.document_bytes,
                index_count: c.index_count,
            }
        })
    }

    async fn server_status(&self) -> DriverResult<DocumentServerStatus> {
        self.faults.enter().await?;
        Ok(DocumentServerStatus {
            active_operations: self.active_operations.load(Ordering::SeqCst),
            current_connections: 1,
        })
    }
}
