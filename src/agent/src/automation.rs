//! # Test Automation
//!
//! Tracks test runs against the cleanup orchestrator: per-run metrics, retried
//! cleanups, verification history and exported run reports.

use chrono::{DateTime, Utc};
use cleanup_shared::{
    BackendKind, CleanupOptionsOverride, CleanupOutcome, CleanupResult,
    CleanupVerificationResult,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

use crate::orchestrator::{CleanupOrchestrator, PerformanceReport};
use crate::reporting::{ReportFormat, ReportGenerator, ReportOptions};
use crate::verification::{CleanupVerifier, VerificationReport};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomationConfig {
    /// Clean before every test, not only around the suite
    pub isolate_each_test: bool,
    /// Clean after every test
    pub cleanup_after_each: bool,
    /// Verify after every test; issues are logged, never fatal
    pub verify_after_each: bool,
    pub report_directory: PathBuf,
    pub report_formats: Vec<ReportFormat>,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            isolate_each_test: false,
            cleanup_after_each: true,
            verify_after_each: false,
            report_directory: PathBuf::from("target/cleanup-reports"),
            report_formats: vec![ReportFormat::Json, ReportFormat::Junit],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestRunMetrics {
    pub total_tests: u64,
    pub passed_tests: u64,
    pub failed_tests: u64,
    pub cleanup_duration_ms: u64,
    pub verification_duration_ms: u64,
    pub retry_attempts: u64,
}

/// Mutable state of one test run, owned by the caller until completion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRunContext {
    pub run_id: Uuid,
    pub databases: Vec<BackendKind>,
    pub cleanup_results: Vec<CleanupResult>,
    pub verification_results: Vec<CleanupVerificationResult>,
    pub errors: Vec<String>,
    pub metrics: TestRunMetrics,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_verification: Option<VerificationReport>,
}

/// Finalized, read-only record of a completed run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRunSummary {
    pub run_id: Uuid,
    pub success: bool,
    pub databases: Vec<BackendKind>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub metrics: TestRunMetrics,
    pub cleanup_results: Vec<CleanupResult>,
    pub verification_results: Vec<CleanupVerificationResult>,
    pub errors: Vec<String>,
    pub performance: PerformanceReport,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationReport>,
}

/// Totals across every run completed by one manager
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateRunReport {
    pub total_runs: usize,
    pub successful_runs: usize,
    pub total_tests: u64,
    pub passed_tests: u64,
    pub failed_tests: u64,
    pub retry_attempts: u64,
    pub average_cleanup_duration_ms: f64,
    pub average_verification_duration_ms: f64,
    pub run_ids: Vec<Uuid>,
    pub generated_at: DateTime<Utc>,
}

pub struct TestAutomationManager {
    orchestrator: Arc<CleanupOrchestrator>,
    verifier: Arc<CleanupVerifier>,
    config: AutomationConfig,
    completed_runs: Mutex<Vec<TestRunSummary>>,
}

impl TestAutomationManager {
    pub fn new(verifier: Arc<CleanupVerifier>, config: AutomationConfig) -> Self {
        Self {
            orchestrator: verifier.orchestrator().clone(),
            verifier,
            config,
            completed_runs: Mutex::new(Vec::new()),
        }
    }

    pub fn orchestrator(&self) -> &Arc<CleanupOrchestrator> {
        &self.orchestrator
    }

    pub fn verifier(&self) -> &Arc<CleanupVerifier> {
        &self.verifier
    }

    pub fn config(&self) -> &AutomationConfig {
        &self.config
    }

    /// Start a run over `databases` (all registered backends when `None`)
    pub fn create_test_run_context(&self, databases: Option<&[BackendKind]>) -> TestRunContext {
        let context = TestRunContext {
            run_id: Uuid::new_v4(),
            databases: self.orchestrator.resolve_targets(databases),
            cleanup_results: Vec::new(),
            verification_results: Vec::new(),
            errors: Vec::new(),
            metrics: TestRunMetrics::default(),
            started_at: Utc::now(),
            completed_at: None,
            last_verification: None,
        };
        info!(run_id = %context.run_id, backends = context.databases.len(), "Test run started");
        context
    }

    /// Clean the run's backends, retrying only the ones that failed.
    ///
    /// Attempt `n` waits `n * retry_delay_ms` first. Returns the latest result
    /// per backend in the run's backend order.
    pub async fn execute_test_cleanup(
        &self,
        context: &mut TestRunContext,
        overrides: Option<&CleanupOptionsOverride>,
    ) -> CleanupOutcome<Vec<CleanupResult>> {
        let options = self.orchestrator.resolve_options(overrides)?;
        let started = Instant::now();

        let mut latest: Vec<CleanupResult> = Vec::with_capacity(context.databases.len());
        let mut pending = context.databases.clone();
        let mut attempt: u32 = 0;

        loop {
            if attempt > 0 {
                let delay = options.retry_delay_ms.saturating_mul(attempt as u64);
                warn!(
                    run_id = %context.run_id,
                    attempt,
                    backends = ?pending,
                    "Retrying cleanup in {}ms",
                    delay
                );
                tokio::time::sleep(Duration::from_millis(delay)).await;
                context.metrics.retry_attempts += 1;
            }

            let results = self
                .orchestrator
                .execute_cleanup(Some(pending.as_slice()), overrides)
                .await?;
            context.cleanup_results.extend(results.iter().cloned());

            pending.clear();
            for result in results {
                if !result.success {
                    pending.push(result.database);
                }
                match latest.iter_mut().find(|r| r.database == result.database) {
                    Some(slot) => *slot = result,
                    None => latest.push(result),
                }
            }

            if pending.is_empty() || attempt >= options.retry_attempts {
                break;
            }
            attempt += 1;
        }

        for result in latest.iter().filter(|r| !r.success) {
            let messages: Vec<&str> = result
                .errors
                .iter()
                .flatten()
                .map(|e| e.message.as_str())
                .collect();
            warn!(
                run_id = %context.run_id,
                backend = %result.database,
                "Cleanup still failing after {} retries",
                attempt
            );
            context.errors.push(format!(
                "{} cleanup failed: {}",
                result.database,
                messages.join("; ")
            ));
        }

        context.metrics.cleanup_duration_ms += started.elapsed().as_millis() as u64;
        latest.sort_by_key(|r| {
            context
                .databases
                .iter()
                .position(|kind| *kind == r.database)
                .unwrap_or(usize::MAX)
        });
        Ok(latest)
    }

    pub async fn execute_test_verification(
        &self,
        context: &mut TestRunContext,
        overrides: Option<&CleanupOptionsOverride>,
    ) -> CleanupOutcome<VerificationReport> {
        let started = Instant::now();
        let report = self
            .verifier
            .verify(Some(context.databases.as_slice()), overrides)
            .await?;

        context.metrics.verification_duration_ms += started.elapsed().as_millis() as u64;
        context
            .verification_results
            .extend(report.results.iter().cloned());
        context.last_verification = Some(report.clone());
        Ok(report)
    }

    pub fn record_test_outcome(&self, context: &mut TestRunContext, passed: bool) {
        context.metrics.total_tests += 1;
        if passed {
            context.metrics.passed_tests += 1;
        } else {
            context.metrics.failed_tests += 1;
        }
    }

    /// Finalize a run. The context is consumed; the summary is kept for
    /// [`aggregate_report`](Self::aggregate_report).
    pub fn complete_test_run(&self, context: TestRunContext) -> TestRunSummary {
        let completed_at = Utc::now();
        let duration_ms = (completed_at - context.started_at)
            .num_milliseconds()
            .max(0) as u64;

        let verification_clean = context
            .last_verification
            .as_ref()
            .map(VerificationReport::is_clean)
            .unwrap_or(true);
        let success =
            context.errors.is_empty() && context.metrics.failed_tests == 0 && verification_clean;

        let summary = TestRunSummary {
            run_id: context.run_id,
            success,
            databases: context.databases,
            started_at: context.started_at,
            completed_at,
            duration_ms,
            metrics: context.metrics,
            cleanup_results: context.cleanup_results,
            verification_results: context.verification_results,
            errors: context.errors,
            performance: self.orchestrator.performance_report(),
            verification: context.last_verification,
        };

        info!(
            run_id = %summary.run_id,
            success = summary.success,
            tests = summary.metrics.total_tests,
            retries = summary.metrics.retry_attempts,
            "Test run completed in {}ms",
            summary.duration_ms
        );
        self.completed_runs.lock().push(summary.clone());
        summary
    }

    /// Write the run summary as JSON plus the last verification report in the
    /// configured formats
    pub async fn export_run_report(
        &self,
        summary: &TestRunSummary,
        directory: Option<&Path>,
    ) -> CleanupOutcome<Vec<PathBuf>> {
        let directory = directory.unwrap_or(&self.config.report_directory);
        tokio::fs::create_dir_all(directory).await?;

        let run_path = directory.join(format!("cleanup-run-{}.json", summary.run_id));
        tokio::fs::write(&run_path, serde_json::to_string_pretty(summary)?).await?;
        let mut written = vec![run_path];

        if let Some(report) = &summary.verification {
            let generator = ReportGenerator::new(ReportOptions {
                colorize: false,
                ..Default::default()
            });
            written.extend(
                generator
                    .export(report, directory, &self.config.report_formats)
                    .await?,
            );
        }

        info!(run_id = %summary.run_id, files = written.len(), "Exported run report");
        Ok(written)
    }

    pub fn completed_runs(&self) -> Vec<TestRunSummary> {
        self.completed_runs.lock().clone()
    }

    pub fn aggregate_report(&self) -> AggregateRunReport {
        let runs = self.completed_runs.lock();
        let total_runs = runs.len();

        let mean = |values: Vec<u64>| {
            if values.is_empty() {
                0.0
            } else {
                values.iter().sum::<u64>() as f64 / values.len() as f64
            }
        };

        AggregateRunReport {
            total_runs,
            successful_runs: runs.iter().filter(|r| r.success).count(),
            total_tests: runs.iter().map(|r| r.metrics.total_tests).sum(),
            passed_tests: runs.iter().map(|r| r.metrics.passed_tests).sum(),
            failed_tests: runs.iter().map(|r| r.metrics.failed_tests).sum(),
            retry_attempts: runs.iter().map(|r| r.metrics.retry_attempts).sum(),
            average_cleanup_duration_ms: mean(
                runs.iter().map(|r| r.metrics.cleanup_duration_ms).collect(),
            ),
            average_verification_duration_ms: mean(
                runs.iter()
                    .map(|r| r.metrics.verification_duration_ms)
                    .collect(),
            ),
            run_ids: runs.iter().map(|r| r.run_id).collect(),
            generated_at: Utc::now(),
        }
    }
}

impl std::fmt::Debug for TestAutomationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestAutomationManager")
            .field("orchestrator", &self.orchestrator)
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cleanup_database::memory::MemoryKeyValueDriver;
    use cleanup_database::{BackendHealth, CleanupStrategy, KeyValueCleanupStrategy};
    use cleanup_shared::{
        CleanupConfigOverride, CleanupError, CleanupOptions, CleanupPerformanceMetrics,
    };
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` cleanups, then succeeds
    struct FlakyStrategy {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl CleanupStrategy for FlakyStrategy {
        fn backend(&self) -> BackendKind {
            BackendKind::Document
        }

        async fn cleanup(&self, _options: &CleanupOptions) -> CleanupOutcome<CleanupResult> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(CleanupError::connection(BackendKind::Document, "primary stepping down"));
            }
            let mut result = CleanupResult::builder(BackendKind::Document);
            result.add_removed(3).affected("test_sessions");
            Ok(result.finish())
        }

        async fn verify(
            &self,
            _options: &CleanupOptions,
        ) -> CleanupOutcome<CleanupVerificationResult> {
            Ok(CleanupVerificationResult::new(
                BackendKind::Document,
                Vec::new(),
                BTreeMap::new(),
                0,
            ))
        }

        fn performance_metrics(&self) -> Option<CleanupPerformanceMetrics> {
            None
        }

        async fn health_snapshot(&self) -> CleanupOutcome<BackendHealth> {
            Ok(BackendHealth::Document {
                active_operations: 0,
                collections: BTreeMap::new(),
            })
        }
    }

    fn manager(failures: u32) -> (TestAutomationManager, Arc<MemoryKeyValueDriver>) {
        let key_value = Arc::new(MemoryKeyValueDriver::new());
        key_value.insert("test:session:1");

        let orchestrator = CleanupOrchestrator::new(CleanupConfigOverride::with_options(
            CleanupOptionsOverride {
                retry_delay_ms: Some(10),
                ..Default::default()
            },
        ))
        .unwrap()
        .with_strategy(Arc::new(KeyValueCleanupStrategy::new(key_value.clone())))
        .with_strategy(Arc::new(FlakyStrategy {
            failures,
            calls: AtomicU32::new(0),
        }));

        let verifier = Arc::new(CleanupVerifier::new(Arc::new(orchestrator)));
        (
            TestAutomationManager::new(verifier, AutomationConfig::default()),
            key_value,
        )
    }

    #[tokio::test]
    async fn test_retry_only_failed_backends() {
        let (manager, _) = manager(1);
        let mut context = manager.create_test_run_context(None);

        let results = manager
            .execute_test_cleanup(&mut context, None)
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.success));
        assert_eq!(results[0].database, BackendKind::KeyValue);
        assert_eq!(context.metrics.retry_attempts, 1);
        // first attempt for both backends, retry for the document backend only
        assert_eq!(context.cleanup_results.len(), 3);
        assert!(context.errors.is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_retries_are_recorded() {
        let (manager, _) = manager(u32::MAX);
        let mut context = manager.create_test_run_context(Some(&[BackendKind::Document]));

        let results = manager
            .execute_test_cleanup(
                &mut context,
                Some(&CleanupOptionsOverride {
                    retry_attempts: Some(2),
                    ..Default::default()
                }),
            )
            .await
            .unwrap();

        assert!(!results[0].success);
        assert_eq!(context.metrics.retry_attempts, 2);
        assert_eq!(context.errors.len(), 1);
        assert!(context.errors[0].contains("primary stepping down"));
    }

    #[tokio::test]
    async fn test_complete_run_and_aggregate() {
        let (manager, key_value) = manager(0);
        let mut context = manager.create_test_run_context(None);

        manager
            .execute_test_cleanup(&mut context, None)
            .await
            .unwrap();
        assert!(!key_value.contains("test:session:1"));

        let report = manager
            .execute_test_verification(&mut context, None)
            .await
            .unwrap();
        assert!(report.is_clean());

        manager.record_test_outcome(&mut context, true);
        manager.record_test_outcome(&mut context, false);
        let summary = manager.complete_test_run(context);

        assert!(!summary.success);
        assert_eq!(summary.metrics.total_tests, 2);
        assert_eq!(summary.verification_results.len(), 2);
        assert_eq!(summary.performance.total_runs, 2);

        let aggregate = manager.aggregate_report();
        assert_eq!(aggregate.total_runs, 1);
        assert_eq!(aggregate.failed_tests, 1);
        assert_eq!(aggregate.run_ids, vec![summary.run_id]);
    }

    #[tokio::test]
    async fn test_export_run_report() {
        let (manager, _) = manager(0);
        let mut context = manager.create_test_run_context(None);
        manager
            .execute_test_verification(&mut context, None)
            .await
            .unwrap();
        let summary = manager.complete_test_run(context);

        let dir = tempfile::tempdir().unwrap();
        let written = manager
            .export_run_report(&summary, Some(dir.path()))
            .await
            .unwrap();

        // run summary + json + junit verification reports
        assert_eq!(written.len(), 3);
        let run_json = tokio::fs::read_to_string(&written[0]).await.unwrap();
        let parsed: TestRunSummary = serde_json::from_str(&run_json).unwrap();
        assert_eq!(parsed, summary);
    }
}
