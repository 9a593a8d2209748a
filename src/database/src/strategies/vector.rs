use async_trait::async_trait;
use cleanup_shared::{
    BackendKind, CleanupIssue, CleanupOptions, CleanupOutcome, CleanupPerformanceMetrics,
    CleanupResult, CleanupResultBuilder, CleanupVerificationResult, IssueType,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::metrics::{MetricsRecorder, MetricsSlot};
use super::{connection_error, verification_error, BackendHealth, CleanupStrategy, NamingConvention};
use crate::drivers::{DriverResult, VectorDriver};

const BACKEND: BackendKind = BackendKind::VectorIndex;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorStrategyConfig {
    pub test_collections: NamingConvention,
    /// Shared collections whose points are cleared between runs
    pub domain_collections: Vec<String>,
    pub max_total_points: u64,
}

impl Default for VectorStrategyConfig {
    fn default() -> Self {
        Self {
            test_collections: NamingConvention::test_objects(),
            domain_collections: [
                "documents",
                "embeddings",
                "knowledge_base",
                "content_embeddings",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            max_total_points: 1_000_000,
        }
    }
}

/// Clears points from (or deletes) test and domain vector collections
pub struct VectorCleanupStrategy {
    driver: Arc<dyn VectorDriver>,
    config: VectorStrategyConfig,
    metrics: MetricsSlot,
}

impl VectorCleanupStrategy {
    pub fn new(driver: Arc<dyn VectorDriver>) -> Self {
        Self {
            driver,
            config: VectorStrategyConfig::default(),
            metrics: MetricsSlot::default(),
        }
    }

    pub fn with_config(mut self, config: VectorStrategyConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &VectorStrategyConfig {
        &self.config
    }

    fn is_managed(&self, collection: &str) -> bool {
        self.config.test_collections.matches(collection)
            || self
                .config
                .domain_collections
                .iter()
                .any(|c| c == collection)
    }

    /// Scroll through the collection deleting one page at a time
    async fn clear_points(
        &self,
        collection: &str,
        options: &CleanupOptions,
        recorder: &mut MetricsRecorder,
    ) -> DriverResult<u64> {
        let mut removed = 0;
        let mut offset = None;

        loop {
            let page = recorder
                .query(self.driver.scroll(collection, options.batch_size, offset))
                .await?;
            if page.ids.is_empty() {
                break;
            }

            removed += recorder
                .query(self.driver.delete_points(collection, &page.ids))
                .await?;

            match page.next_offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }
        Ok(removed)
    }

    async fn clear_collection(
        &self,
        collection: &str,
        options: &CleanupOptions,
        recorder: &mut MetricsRecorder,
    ) -> DriverResult<u64> {
        if options.preserve_schema {
            return self.clear_points(collection, options, recorder).await;
        }

        let info = recorder
            .query(self.driver.collection_info(collection))
            .await?;
        recorder
            .query(self.driver.delete_collection(collection))
            .await?;
        Ok(info.points_count)
    }

    async fn clean_into(
        &self,
        collection: &str,
        options: &CleanupOptions,
        recorder: &mut MetricsRecorder,
        result: &mut CleanupResultBuilder,
    ) {
        match self.clear_collection(collection, options, recorder).await {
            Ok(0) => {}
            Ok(removed) => {
                result.add_removed(removed).affected(collection);
            }
            Err(e) => {
                warn!("Cleanup of vector collection {} failed: {}", collection, e);
                result.object_error(collection, e.to_string());
            }
        }
    }

    async fn run(
        &self,
        selected: Option<&[String]>,
        options: &CleanupOptions,
    ) -> CleanupOutcome<CleanupResult> {
        options.validate()?;
        let mut result = CleanupResult::builder(BACKEND);
        let mut recorder = MetricsRecorder::start();

        recorder
            .connect(self.driver.ping())
            .await
            .map_err(|e| connection_error(BACKEND, e))?;
        let existing = recorder
            .query(self.driver.list_collections())
            .await
            .map_err(|e| connection_error(BACKEND, e))?;

        let targets: Vec<&String> = match selected {
            Some(names) => names.iter().filter(|n| existing.contains(n)).collect(),
            None => existing.iter().filter(|n| self.is_managed(n)).collect(),
        };
        debug!("Cleaning {} vector collections", targets.len());

        for collection in targets {
            self.clean_into(collection, options, &mut recorder, &mut result)
                .await;
        }

        let metrics = recorder.finish(result.records_removed(), None);
        self.metrics.record(metrics.clone());
        result.metrics(metrics);
        Ok(result.finish())
    }

    /// Clear or delete exactly the named collections; missing ones are skipped
    pub async fn clear_vectors(
        &self,
        collections: &[String],
        options: &CleanupOptions,
    ) -> CleanupOutcome<CleanupResult> {
        self.run(Some(collections), options).await
    }
}

#[async_trait]
impl CleanupStrategy for VectorCleanupStrategy {
    fn backend(&self) -> BackendKind {
        BACKEND
    }

    async fn cleanup(&self, options: &CleanupOptions) -> CleanupOutcome<CleanupResult> {
        let result = self.run(None, options).await?;
        info!(
            "Vector cleanup removed {} points from {} collections in {}ms",
            result.records_removed,
            result.affected_locations().len(),
            result.duration_ms
        );
        Ok(result)
    }

    async fn verify(
        &self,
        _options: &CleanupOptions,
    ) -> CleanupOutcome<CleanupVerificationResult> {
        let started = Instant::now();

        self.driver
            .ping()
            .await
            .map_err(|e| connection_error(BACKEND, e))?;
        let collections = self
            .driver
            .list_collections()
            .await
            .map_err(|e| connection_error(BACKEND, e))?;

        let mut issues = Vec::new();
        let mut total_points = 0;
        let mut checked = 0;

        for collection in &collections {
            let info = match self.driver.collection_info(collection).await {
                Ok(info) => info,
                Err(e) => {
                    issues.push(CleanupIssue::warning(
                        IssueType::VerificationFailed,
                        collection.as_str(),
                        format!("Could not read collection info: {}", e),
                    ));
                    continue;
                }
            };
            total_points += info.points_count;

            if !info.is_ready() {
                issues.push(CleanupIssue::info(
                    IssueType::ConnectionIssue,
                    collection.as_str(),
                    format!("Collection status is {}", info.status),
                ));
            }

            if !self.is_managed(collection) {
                continue;
            }
            checked += 1;
            if info.points_count > 0 {
                issues.push(CleanupIssue::data_remaining(
                    collection.as_str(),
                    info.points_count,
                    "points",
                ));
            }
        }

        if total_points > self.config.max_total_points {
            issues.push(CleanupIssue::info(
                IssueType::PerformanceDegradation,
                BACKEND.as_str(),
                format!("{} points across all collections", total_points),
            ));
        }

        let mut checked_items = BTreeMap::new();
        checked_items.insert("collections".to_string(), checked);
        checked_items.insert("points".to_string(), total_points);

        Ok(CleanupVerificationResult::new(
            BACKEND,
            issues,
            checked_items,
            started.elapsed().as_millis() as u64,
        ))
    }

    fn performance_metrics(&self) -> Option<CleanupPerformanceMetrics> {
        self.metrics.latest()
    }

    async fn health_snapshot(&self) -> CleanupOutcome<BackendHealth> {
        let collections = self
            .driver
            .list_collections()
            .await
            .map_err(|e| connection_error(BACKEND, e))?;

        let mut infos = BTreeMap::new();
        for collection in collections {
            let info = self
                .driver
                .collection_info(&collection)
                .await
                .map_err(|e| verification_error(BACKEND, e))?;
            infos.insert(collection, info);
        }

        Ok(BackendHealth::VectorIndex { collections: infos })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryVectorDriver;
    use pretty_assertions::assert_eq;

    fn seeded() -> Arc<MemoryVectorDriver> {
        let driver = Arc::new(MemoryVectorDriver::new());
        driver.upsert_points("test_vectors", 30);
        driver.upsert_points("embeddings", 12);
        driver.upsert_points("products", 9);
        driver
    }

    #[tokio::test]
    async fn test_cleanup_pages_through_managed_collections() {
        let driver = seeded();
        let strategy = VectorCleanupStrategy::new(driver.clone());
        let options = CleanupOptions {
            batch_size: 8,
            ..Default::default()
        };

        let result = strategy.cleanup(&options).await.unwrap();

        assert!(result.success);
        assert_eq!(result.records_removed, 42);
        assert_eq!(driver.point_count("test_vectors"), Some(0));
        assert_eq!(driver.point_count("products"), Some(9));
        assert!(driver.has_collection("embeddings"));
    }

    #[tokio::test]
    async fn test_cleanup_without_schema_deletes_collections() {
        let driver = seeded();
        let strategy = VectorCleanupStrategy::new(driver.clone());
        let options = CleanupOptions {
            preserve_schema: false,
            ..Default::default()
        };

        let result = strategy.cleanup(&options).await.unwrap();
        assert_eq!(result.records_removed, 42);
        assert!(!driver.has_collection("test_vectors"));
        assert!(driver.has_collection("products"));
    }

    #[tokio::test]
    async fn test_clear_vectors_targets_named_collections() {
        let driver = seeded();
        let strategy = VectorCleanupStrategy::new(driver.clone());

        let result = strategy
            .clear_vectors(
                &["products".to_string(), "ghost".to_string()],
                &CleanupOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(result.records_removed, 9);
        assert_eq!(driver.point_count("test_vectors"), Some(30));
    }

    #[tokio::test]
    async fn test_verify_reports_points_and_status() {
        let driver = seeded();
        driver.set_status("products", "yellow");
        let strategy = VectorCleanupStrategy::new(driver.clone());

        strategy.cleanup(&CleanupOptions::default()).await.unwrap();
        let verification = strategy.verify(&CleanupOptions::default()).await.unwrap();

        assert!(verification.is_clean);
        assert_eq!(verification.issues.len(), 1);
        assert_eq!(verification.issues[0].issue_type, IssueType::ConnectionIssue);
        assert_eq!(verification.checked_items["points"], 9);
    }
}
