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
use crate::drivers::{DocumentDriver, DocumentFilter, DriverResult};

const BACKEND: BackendKind = BackendKind::Document;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentStrategyConfig {
    /// Collections created by tests; emptied or dropped entirely
    pub test_collections: NamingConvention,
    /// Shared collections from which only test-marked documents are removed
    pub domain_collections: Vec<String>,
    pub max_total_documents: u64,
    pub max_active_operations: u64,
}

impl Default for DocumentStrategyConfig {
    fn default() -> Self {
        Self {
            test_collections: NamingConvention::test_objects(),
            domain_collections: [
                "users",
                "sessions",
                "workflows",
                "clients",
                "providers",
                "content",
                "notifications",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            max_total_documents: 100_000,
            max_active_operations: 50,
        }
    }
}

/// How a collection is treated during cleanup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CollectionScope {
    /// Test-owned collection: every document goes
    Test,
    /// Shared collection: only test-marked documents go
    Domain,
}

impl CollectionScope {
    fn filter(self) -> DocumentFilter {
        match self {
            CollectionScope::Test => DocumentFilter::All,
            CollectionScope::Domain => DocumentFilter::TestMarked,
        }
    }
}

pub struct DocumentCleanupStrategy {
    driver: Arc<dyn DocumentDriver>,
    config: DocumentStrategyConfig,
    metrics: MetricsSlot,
}

impl DocumentCleanupStrategy {
    pub fn new(driver: Arc<dyn DocumentDriver>) -> Self {
        Self {
            driver,
            config: DocumentStrategyConfig::default(),
            metrics: MetricsSlot::default(),
        }
    }

    pub fn with_config(mut self, config: DocumentStrategyConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &DocumentStrategyConfig {
        &self.config
    }

    fn scope(&self, collection: &str) -> Option<CollectionScope> {
        if self.config.test_collections.matches(collection) {
            Some(CollectionScope::Test)
        } else if self
            .config
            .domain_collections
            .iter()
            .any(|c| c == collection)
        {
            Some(CollectionScope::Domain)
        } else {
            None
        }
    }

    /// Delete matching documents, in `batch_size` chunks when there are many
    async fn purge(
        &self,
        collection: &str,
        filter: DocumentFilter,
        options: &CleanupOptions,
        recorder: &mut MetricsRecorder,
    ) -> DriverResult<u64> {
        let matching = recorder
            .query(self.driver.count_documents(collection, filter))
            .await?;
        if matching == 0 {
            return Ok(0);
        }

        if matching < options.batch_size {
            return recorder
                .query(self.driver.delete_documents(collection, filter, None))
                .await;
        }

        let mut removed = 0;
        loop {
            let batch = recorder
                .query(
                    self.driver
                        .delete_documents(collection, filter, Some(options.batch_size)),
                )
                .await?;
            removed += batch;
            if batch < options.batch_size {
                break;
            }
        }
        Ok(removed)
    }

    /// Empty (schema preserved) or drop one test-owned collection
    async fn clear_collection(
        &self,
        collection: &str,
        options: &CleanupOptions,
        recorder: &mut MetricsRecorder,
    ) -> DriverResult<u64> {
        if options.preserve_schema {
            return self
                .purge(collection, DocumentFilter::All, options, recorder)
                .await;
        }

        let documents = recorder
            .query(self.driver.count_documents(collection, DocumentFilter::All))
            .await?;
        recorder.query(self.driver.drop_collection(collection)).await?;
        Ok(documents)
    }

    async fn clean_into(
        &self,
        collection: &str,
        scope: CollectionScope,
        options: &CleanupOptions,
        recorder: &mut MetricsRecorder,
        result: &mut CleanupResultBuilder,
    ) {
        let outcome = match scope {
            CollectionScope::Test => self.clear_collection(collection, options, recorder).await,
            CollectionScope::Domain => {
                self.purge(collection, scope.filter(), options, recorder)
                    .await
            }
        };

        match outcome {
            Ok(0) => {}
            Ok(removed) => {
                result.add_removed(removed).affected(collection);
            }
            Err(e) => {
                warn!("Cleanup of collection {} failed: {}", collection, e);
                result.object_error(collection, e.to_string());
            }
        }
    }

    fn finish(&self, mut result: CleanupResultBuilder, recorder: &MetricsRecorder) -> CleanupResult {
        let metrics = recorder.finish(result.records_removed(), None);
        self.metrics.record(metrics.clone());
        result.metrics(metrics);
        result.finish()
    }

    /// Empty or drop exactly the named collections; missing ones are skipped
    pub async fn delete_collections(
        &self,
        collections: &[String],
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

        for collection in collections {
            if !existing.contains(collection) {
                debug!("Collection {} does not exist, skipping", collection);
                continue;
            }
            self.clean_into(
                collection,
                CollectionScope::Test,
                options,
                &mut recorder,
                &mut result,
            )
            .await;
        }

        Ok(self.finish(result, &recorder))
    }
}

#[async_trait]
impl CleanupStrategy for DocumentCleanupStrategy {
    fn backend(&self) -> BackendKind {
        BACKEND
    }

    async fn cleanup(&self, options: &CleanupOptions) -> CleanupOutcome<CleanupResult> {
        options.validate()?;
        let mut result = CleanupResult::builder(BACKEND);
        let mut recorder = MetricsRecorder::start();

        recorder
            .connect(self.driver.ping())
            .await
            .map_err(|e| connection_error(BACKEND, e))?;
        let collections = recorder
            .query(self.driver.list_collections())
            .await
            .map_err(|e| connection_error(BACKEND, e))?;

        for collection in &collections {
            let Some(scope) = self.scope(collection) else {
                continue;
            };
            self.clean_into(collection, scope, options, &mut recorder, &mut result)
                .await;
        }

        let result = self.finish(result, &recorder);
        info!(
            "Document cleanup removed {} documents from {} collections in {}ms",
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
        let mut total_documents = 0;
        let mut checked = 0;

        for collection in &collections {
            let total = match self
                .driver
                .count_documents(collection, DocumentFilter::All)
                .await
            {
                Ok(total) => total,
                Err(e) => {
                    issues.push(CleanupIssue::warning(
                        IssueType::VerificationFailed,
                        collection.as_str(),
                        format!("Could not count documents: {}", e),
                    ));
                    continue;
                }
            };
            total_documents += total;

            let Some(scope) = self.scope(collection) else {
                continue;
            };
            checked += 1;

            let remaining = match scope {
                CollectionScope::Test => Ok(total),
                CollectionScope::Domain => {
                    self.driver
                        .count_documents(collection, scope.filter())
                        .await
                }
            };
            match remaining {
                Ok(0) => {}
                Ok(count) => issues.push(CleanupIssue::data_remaining(
                    collection.as_str(),
                    count,
                    "documents",
                )),
                Err(e) => issues.push(CleanupIssue::warning(
                    IssueType::VerificationFailed,
                    collection.as_str(),
                    format!("Could not count test documents: {}", e),
                )),
            }
        }

        if total_documents > self.config.max_total_documents {
            issues.push(CleanupIssue::info(
                IssueType::PerformanceDegradation,
                BACKEND.as_str(),
                format!("{} documents across all collections", total_documents),
            ));
        }

        match self.driver.server_status().await {
            Ok(status) if status.active_operations > self.config.max_active_operations => {
                issues.push(CleanupIssue::info(
                    IssueType::ConnectionIssue,
                    BACKEND.as_str(),
                    format!("{} operations in progress", status.active_operations),
                ));
            }
            Ok(_) => {}
            Err(e) => debug!("Could not read server status: {}", e),
        }

        let mut checked_items = BTreeMap::new();
        checked_items.insert("collections".to_string(), checked);
        checked_items.insert("documents".to_string(), total_documents);

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
        let status = self
            .driver
            .server_status()
            .await
            .map_err(|e| verification_error(BACKEND, e))?;

        let mut stats = BTreeMap::new();
        for collection in collections {
            let collection_stats = self
                .driver
                .collection_stats(&collection)
                .await
                .map_err(|e| verification_error(BACKEND, e))?;
            stats.insert(collection, collection_stats);
        }

        Ok(BackendHealth::Document {
            active_operations: status.active_operations,
            collections: stats,
        })
    }
}
