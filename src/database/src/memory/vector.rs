use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use super::Faults;
use crate::drivers::{
    DriverError, DriverResult, PointId, ScrollPage, VectorCollectionInfo, VectorDriver,
};

#[derive(Debug, Clone)]
struct Collection {
    points: BTreeSet<u64>,
    next_id: u64,
    vector_size: u64,
    status: String,
}

/// Vector driver with numerically keyed points
#[derive(Debug, Default)]
pub struct MemoryVectorDriver {
    collections: Mutex<BTreeMap<String, Collection>>,
    faults: Faults,
}

impl MemoryVectorDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_collection(&self, name: &str, vector_size: u64) {
        self.collections.lock().insert(
            name.to_string(),
            Collection {
                points: BTreeSet::new(),
                next_id: 1,
                vector_size,
                status: "green".to_string(),
            },
        );
    }

    /// Add `count` points with fresh ids; creates a 384-dimension collection if needed
    pub fn upsert_points(&self, collection: &str, count: u64) {
        let mut collections = self.collections.lock();
        let entry = collections
            .entry(collection.to_string())
            .or_insert_with(|| Collection {
                points: BTreeSet::new(),
                next_id: 1,
                vector_size: 384,
                status: "green".to_string(),
            });

        for _ in 0..count {
            entry.points.insert(entry.next_id);
            entry.next_id += 1;
        }
    }

    pub fn point_count(&self, collection: &str) -> Option<u64> {
        self.collections
            .lock()
            .get(collection)
            .map(|c| c.points.len() as u64)
    }

    pub fn has_collection(&self, collection: &str) -> bool {
        self.collections.lock().contains_key(collection)
    }

    pub fn set_status(&self, collection: &str, status: &str) {
        if let Some(entry) = self.collections.lock().get_mut(collection) {
            entry.status = status.to_string();
        }
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
}

fn not_found(collection: &str) -> DriverError {
    DriverError::NotFound(format!("Collection `{}` doesn't exist!", collection))
}

#[async_trait]
impl VectorDriver for MemoryVectorDriver {
    async fn ping(&self) -> DriverResult<()> {
        self.faults.enter().await
    }

    async fn list_collections(&self) -> DriverResult<Vec<String>> {
        self.faults.enter().await?;
        Ok(self.collections.lock().keys().cloned().collect())
    }

    async fn collection_info(&self, collection: &str) -> DriverResult<VectorCollectionInfo> {
        self.faults.enter().await?;
        self.faults.check(collection)?;

        let collections = self.collections.lock();
        let entry = collections
            .get(collection)
            .ok_or_else(|| not_found(collection))?;

        Ok(VectorCollectionInfo {
            points_count: entry.points.len() as u64,
            vector_size: entry.vector_size,
            status: entry.status.clone(),
        })
    }

    async fn scroll(
        &self,
        collection: &str,
        limit: u64,
        offset: Option<PointId>,
    ) -> DriverResult<ScrollPage> {
        self.faults.enter().await?;
        self.faults.check(collection)?;

        let start = match offset {
            None => 0,
            Some(PointId::Num(id)) => id,
            Some(PointId::Uuid(id)) => {
                return Err(DriverError::Query(format!(
                    "unsupported offset '{}' for numeric collection",
                    id
                )))
            }
        };

        let collections = self.collections.lock();
        let entry = collections
            .get(collection)
            .ok_or_else(|| not_found(collection))?;

        let limit = limit.max(1) as usize;
        let mut remaining = entry.points.range(start..);
        let ids: Vec<PointId> = remaining
            .by_ref()
            .take(limit)
            .map(|id| PointId::Num(*id))
            .collect();
        let next_offset = remaining.next().map(|id| PointId::Num(*id));

        Ok(ScrollPage { ids, next_offset })
    }

    async fn delete_points(&self, collection: &str, ids: &[PointId]) -> DriverResult<u64> {
        self.faults.enter().await?;
        self.faults.check(collection)?;

        let mut collections = self.collections.lock();
        let entry = collections
            .get_mut(collection)
            .ok_or_else(|| not_found(collection))?;

        let removed = ids
            .iter()
            .filter(|id| match id {
                PointId::Num(n) => entry.points.remove(n),
                PointId::Uuid(_) => false,
            })
            .count();
        Ok(removed as u64)
    }

    async fn delete_collection(&self, collection: &str) -> DriverResult<()> {
        self.faults.enter().await?;
        self.faults.check(collection)?;
        self.collections.lock().remove(collection);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scroll_pages_through_points() {
        let driver = MemoryVectorDriver::new();
        driver.upsert_points("test_vectors", 5);

        let first = driver.scroll("test_vectors", 2, None).await.unwrap();
        assert_eq!(first.ids, vec![PointId::Num(1), PointId::Num(2)]);
        assert_eq!(first.next_offset, Some(PointId::Num(3)));

        let last = driver
            .scroll("test_vectors", 10, first.next_offset)
            .await
            .unwrap();
        assert_eq!(last.ids.len(), 3);
        assert_eq!(last.next_offset, None);
    }

    #[tokio::test]
    async fn test_delete_points_counts_only_existing() {
        let driver = MemoryVectorDriver::new();
        driver.upsert_points("embeddings", 3);

        let removed = driver
            .delete_points("embeddings", &[PointId::Num(1), PointId::Num(9)])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(driver.point_count("embeddings"), Some(2));
    }

    #[tokio::test]
    async fn test_missing_collection_info_is_not_found() {
        let driver = MemoryVectorDriver::new();
        let error = driver.collection_info("ghost").await.unwrap_err();
        assert!(error.is_not_found());
    }
}
