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
use super::{connection_error, verification_error, BackendHealth, CleanupStrategy};
use crate::drivers::{DriverResult, KeyValueDriver};

const BACKEND: BackendKind = BackendKind::KeyValue;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyValueStrategyConfig {
    /// Glob patterns of test-created keys
    pub patterns: Vec<String>,
    /// Also remove keys whose lifetime has run out
    pub sweep_expired: bool,
    /// Upper bound on keys inspected by the expiry sweep
    pub max_sweep_keys: u64,
    pub max_keys: u64,
    pub max_blocked_clients: u64,
}

impl Default for KeyValueStrategyConfig {
    fn default() -> Self {
        Self {
            patterns: [
                "test:*",
                "session:*",
                "cache:*",
                "temp:*",
                "user:*",
                "workflow:*",
                "client:*",
                "provider:*",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            sweep_expired: true,
            max_sweep_keys: 10_000,
            max_keys: 10_000,
            max_blocked_clients: 0,
        }
    }
}

/// Deletes keys matching the configured glob patterns, then sweeps lapsed keys
pub struct KeyValueCleanupStrategy {
    driver: Arc<dyn KeyValueDriver>,
    config: KeyValueStrategyConfig,
    metrics: MetricsSlot,
}

impl KeyValueCleanupStrategy {
    pub fn new(driver: Arc<dyn KeyValueDriver>) -> Self {
        Self {
            driver,
            config: KeyValueStrategyConfig::default(),
            metrics: MetricsSlot::default(),
        }
    }

    pub fn with_config(mut self, config: KeyValueStrategyConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &KeyValueStrategyConfig {
        &self.config
    }

    /// Delete every key matching `pattern`, chunked by `batch_size`
    async fn delete_matching(
        &self,
        pattern: &str,
        options: &CleanupOptions,
        recorder: &mut MetricsRecorder,
        result: &mut CleanupResultBuilder,
    ) -> DriverResult<u64> {
        let keys = recorder
            .query(self.driver.scan(pattern, options.batch_size))
            .await?;
        if keys.is_empty() {
            return Ok(0);
        }

        let mut removed = 0;
        for chunk in keys.chunks(options.batch_size as usize) {
            removed += recorder.query(self.driver.delete(chunk)).await?;
            for key in chunk {
                result.affected(key.as_str());
            }
        }
        debug!("Pattern {} matched {} keys", pattern, keys.len());
        Ok(removed)
    }

    /// Remove keys the engine still lists although their lifetime is over.
    /// Inspects at most `max_sweep_keys` keys and returns how many were lapsed.
    async fn sweep_lapsed(
        &self,
        options: &CleanupOptions,
        recorder: &mut MetricsRecorder,
    ) -> DriverResult<usize> {
        let keys = recorder
            .query(
                self.driver
                    .scan_at_most("*", options.batch_size, self.config.max_sweep_keys),
            )
            .await?;

        let mut lapsed = Vec::new();
        for key in keys {
            if recorder.query(self.driver.ttl(&key)).await?.is_lapsed() {
                lapsed.push(key);
            }
        }
        if lapsed.is_empty() {
            return Ok(0);
        }

        for chunk in lapsed.chunks(options.batch_size as usize) {
            recorder.query(self.driver.delete(chunk)).await?;
        }
        Ok(lapsed.len())
    }

    async fn run_patterns(
        &self,
        patterns: &[String],
        options: &CleanupOptions,
    ) -> CleanupOutcome<CleanupResult> {
        options.validate()?;
        let mut result = CleanupResult::builder(BACKEND);
        let mut recorder = MetricsRecorder::start();

        recorder
            .connect(self.driver.ping())
            .await
            .map_err(|e| connection_error(BACKEND, e))?;

        for pattern in patterns {
            match self
                .delete_matching(pattern, options, &mut recorder, &mut result)
                .await
            {
                Ok(removed) => {
                    result.add_removed(removed);
                }
                Err(e) => {
                    warn!("Cleanup of pattern {} failed: {}", pattern, e);
                    result.object_error(pattern.as_str(), e.to_string());
                }
            }
        }

        if self.config.sweep_expired {
            // lapsed keys are invisible to readers and not counted
            match self.sweep_lapsed(options, &mut recorder).await {
                Ok(0) => {}
                Ok(swept) => debug!("Swept {} lapsed keys", swept),
                Err(e) => {
                    result.warning(format!("Expired key sweep failed: {}", e));
                }
            }
        }

        let memory = match recorder.query(self.driver.info()).await {
            Ok(info) => Some((info.used_memory, info.peak_memory)),
            Err(e) => {
                debug!("Could not read memory figures: {}", e);
                None
            }
        };

        let metrics = recorder.finish(result.records_removed(), memory);
        self.metrics.record(metrics.clone());
        result.metrics(metrics);
        Ok(result.finish())
    }

    /// Delete keys for the given patterns only
    pub async fn delete_by_pattern(
        &self,
        patterns: &[String],
        options: &CleanupOptions,
    ) -> CleanupOutcome<CleanupResult> {
        self.run_patterns(patterns, options).await
    }
}

#[async_trait]
impl CleanupStrategy for KeyValueCleanupStrategy {
    fn backend(&self) -> BackendKind {
        BACKEND
    }

    async fn cleanup(&self, options: &CleanupOptions) -> CleanupOutcome<CleanupResult> {
        let result = self.run_patterns(&self.config.patterns, options).await?;
        info!(
            "Key-value cleanup removed {} keys in {}ms",
            result.records_removed, result.duration_ms
        );
        Ok(result)
    }

    async fn verify(
        &self,
        options: &CleanupOptions,
    ) -> CleanupOutcome<CleanupVerificationResult> {
        let started = Instant::now();

        self.driver
            .ping()
            .await
            .map_err(|e| connection_error(BACKEND, e))?;

        let mut issues = Vec::new();
        let mut remaining_keys = 0;
        for pattern in &self.config.patterns {
            match self.driver.scan(pattern, options.batch_size).await {
                Ok(keys) if keys.is_empty() => {}
                Ok(keys) => {
                    remaining_keys += keys.len() as u64;
                    issues.push(CleanupIssue::data_remaining(
                        pattern.as_str(),
                        keys.len() as u64,
                        "keys",
                    ));
                }
                Err(e) => issues.push(CleanupIssue::warning(
                    IssueType::VerificationFailed,
                    pattern.as_str(),
                    format!("Could not scan keys: {}", e),
                )),
            }
        }

        let db_size = self
            .driver
            .db_size()
            .await
            .map_err(|e| verification_error(BACKEND, e))?;
        if db_size > self.config.max_keys {
            issues.push(CleanupIssue::info(
                IssueType::PerformanceDegradation,
                BACKEND.as_str(),
                format!("{} keys in database", db_size),
            ));
        }

        match self.driver.info().await {
            Ok(info) if info.blocked_clients > self.config.max_blocked_clients => {
                issues.push(CleanupIssue::info(
                    IssueType::ConnectionIssue,
                    BACKEND.as_str(),
                    format!("{} clients blocked", info.blocked_clients),
                ));
            }
            Ok(_) => {}
            Err(e) => debug!("Could not read server info: {}", e),
        }

        let mut checked_items = BTreeMap::new();
        checked_items.insert("patterns".to_string(), self.config.patterns.len() as u64);
        checked_items.insert("keys".to_string(), db_size);
        checked_items.insert("matching_keys".to_string(), remaining_keys);

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
        let db_size = self
            .driver
            .db_size()
            .await
            .map_err(|e| connection_error(BACKEND, e))?;
        let info = self
            .driver
            .info()
            .await
            .map_err(|e| verification_error(BACKEND, e))?;

        Ok(BackendHealth::KeyValue { db_size, info })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryKeyValueDriver;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn seeded() -> Arc<MemoryKeyValueDriver> {
        let driver = Arc::new(MemoryKeyValueDriver::new());
        for i in 0..12 {
            driver.insert(&format!("test:user:{}", i));
        }
        driver.insert("temp:upload:1");
        driver.insert_with_ttl("ratelimit:live", Duration::from_secs(300));
        driver.insert("config:feature_flags");
        driver
    }

    #[tokio::test]
    async fn test_cleanup_removes_pattern_keys_only() {
        let driver = seeded();
        let strategy = KeyValueCleanupStrategy::new(driver.clone());

        let result = strategy.cleanup(&CleanupOptions::default()).await.unwrap();

        assert!(result.success);
        assert_eq!(result.records_removed, 13);
        assert!(!driver.contains("test:user:3"));
        assert!(driver.contains("ratelimit:live"));
        assert!(driver.contains("config:feature_flags"));
        assert_eq!(result.keys_affected.as_ref().map(Vec::len), Some(13));
    }

    #[tokio::test]
    async fn test_patterns_delete_in_chunks() {
        let driver = seeded();
        let strategy = KeyValueCleanupStrategy::new(driver.clone());
        let options = CleanupOptions {
            batch_size: 5,
            ..Default::default()
        };

        let result = strategy
            .delete_by_pattern(&["test:*".to_string()], &options)
            .await
            .unwrap();
        assert_eq!(result.records_removed, 12);
        assert!(driver.contains("temp:upload:1"));
    }

    #[tokio::test]
    async fn test_lapsed_keys_are_swept() {
        let driver = seeded();
        driver.insert_lapsed("metrics:stale");
        let strategy = KeyValueCleanupStrategy::new(driver.clone());

        let result = strategy.cleanup(&CleanupOptions::default()).await.unwrap();
        assert_eq!(driver.stored_keys(), 2);
        assert_eq!(result.records_removed, 13);
    }

    #[tokio::test]
    async fn test_sweep_inspects_at_most_max_sweep_keys() {
        let driver = Arc::new(MemoryKeyValueDriver::new());
        driver.insert("test:user:1");
        for i in 0..5 {
            driver.insert_lapsed(&format!("stale:{}", i));
        }
        let strategy = KeyValueCleanupStrategy::new(driver.clone()).with_config(
            KeyValueStrategyConfig {
                max_sweep_keys: 2,
                ..Default::default()
            },
        );

        let result = strategy.cleanup(&CleanupOptions::default()).await.unwrap();

        assert!(result.success);
        assert_eq!(result.records_removed, 1);
        assert_eq!(driver.stored_keys(), 3);

        strategy.cleanup(&CleanupOptions::default()).await.unwrap();
        assert_eq!(driver.stored_keys(), 1);
    }

    #[tokio::test]
    async fn test_failing_pattern_does_not_stop_others() {
        let driver = seeded();
        driver.fail_on("test:*");
        let strategy = KeyValueCleanupStrategy::new(driver.clone());

        let result = strategy.cleanup(&CleanupOptions::default()).await.unwrap();
        assert!(!result.success);
        assert!(!driver.contains("temp:upload:1"));
        assert_eq!(
            result.errors.as_ref().unwrap()[0].target.as_deref(),
            Some("test:*")
        );
    }

    #[tokio::test]
    async fn test_verify_and_idempotence() {
        let driver = seeded();
        let strategy = KeyValueCleanupStrategy::new(driver.clone());

        let dirty = strategy.verify(&CleanupOptions::default()).await.unwrap();
        assert!(!dirty.is_clean);

        strategy.cleanup(&CleanupOptions::default()).await.unwrap();
        let again = strategy.cleanup(&CleanupOptions::default()).await.unwrap();
        assert_eq!(again.records_removed, 0);

        let clean = strategy.verify(&CleanupOptions::default()).await.unwrap();
        assert!(clean.is_clean);
        assert_eq!(clean.checked_items["keys"], 2);
    }
}
