//! # Test Lifecycle Hooks
//!
//! Binds the automation manager to a test runner's lifecycle. Only
//! `before_all` may fail the suite; per-test hooks log problems and move on.

use cleanup_shared::{BackendKind, CleanupError, CleanupOutcome};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::automation::{TestAutomationManager, TestRunContext, TestRunSummary};
use crate::verification::VerificationReport;

/// Suite-level cleanup lifecycle around a test run
pub struct CleanupLifecycle {
    automation: Arc<TestAutomationManager>,
    databases: Option<Vec<BackendKind>>,
    context: Mutex<Option<TestRunContext>>,
}

impl CleanupLifecycle {
    pub fn new(automation: Arc<TestAutomationManager>) -> Self {
        Self {
            automation,
            databases: None,
            context: Mutex::new(None),
        }
    }

    /// Restrict the lifecycle to the given backends
    pub fn for_databases(mut self, databases: &[BackendKind]) -> Self {
        self.databases = Some(databases.to_vec());
        self
    }

    pub fn automation(&self) -> &Arc<TestAutomationManager> {
        &self.automation
    }

    /// Clean every backend before the suite. With verification enabled a
    /// backend that stays dirty fails the suite, as does an unregistered one.
    pub async fn before_all(&self) -> CleanupOutcome<()> {
        let orchestrator = self.automation.orchestrator();
        let mut context = self
            .automation
            .create_test_run_context(self.databases.as_deref());

        if let Some(missing) = context
            .databases
            .iter()
            .find(|kind| !orchestrator.is_registered(**kind))
        {
            return Err(CleanupError::StrategyNotRegistered { backend: *missing });
        }

        self.automation
            .execute_test_cleanup(&mut context, None)
            .await?;

        if orchestrator.configuration().options.verify_cleanup {
            let report = self
                .automation
                .execute_test_verification(&mut context, None)
                .await?;
            if !report.is_clean() {
                return Err(dirty_baseline(&report));
            }
        }

        info!(run_id = %context.run_id, "Baseline is clean");
        *self.context.lock().await = Some(context);
        Ok(())
    }

    /// Isolation cleanup before one test; failures are logged only
    pub async fn before_each(&self) {
        if !self.automation.config().isolate_each_test {
            return;
        }

        let mut guard = self.context.lock().await;
        let Some(context) = guard.as_mut() else {
            warn!("before_each called before before_all");
            return;
        };

        let started = Instant::now();
        match self
            .automation
            .orchestrator()
            .execute_cleanup(Some(context.databases.as_slice()), None)
            .await
        {
            Ok(results) => {
                for result in results.iter().filter(|r| !r.success) {
                    warn!(
                        backend = %result.database,
                        errors = result.error_count(),
                        "Isolation cleanup failed"
                    );
                }
                context.cleanup_results.extend(results);
            }
            Err(e) => warn!("Isolation cleanup could not run: {}", e),
        }
        context.metrics.cleanup_duration_ms += started.elapsed().as_millis() as u64;
    }

    /// Record the test outcome, then clean up and verify when configured. Never fails.
    pub async fn after_each(&self, passed: bool) {
        let mut guard = self.context.lock().await;
        let Some(context) = guard.as_mut() else {
            warn!("after_each called before before_all");
            return;
        };
        self.automation.record_test_outcome(context, passed);

        if self.automation.config().cleanup_after_each {
            let orchestrator = self.automation.orchestrator();
            let slow_threshold = orchestrator.configuration().performance.warn_threshold_ms;

            let started = Instant::now();
            match orchestrator
                .execute_cleanup(Some(context.databases.as_slice()), None)
                .await
            {
                Ok(results) => {
                    for result in &results {
                        if !result.success {
                            warn!(backend = %result.database, "Cleanup after test failed");
                        } else if result.duration_ms > slow_threshold {
                            warn!(
                                backend = %result.database,
                                duration_ms = result.duration_ms,
                                "Slow cleanup after test (threshold {}ms)",
                                slow_threshold
                            );
                        }
                    }
                    context.cleanup_results.extend(results);
                }
                Err(e) => warn!("Cleanup after test could not run: {}", e),
            }
            context.metrics.cleanup_duration_ms += started.elapsed().as_millis() as u64;
        }

        if self.automation.config().verify_after_each {
            match self
                .automation
                .execute_test_verification(context, None)
                .await
            {
                Ok(report) if !report.is_clean() => {
                    warn!("Backends dirty after test: {}", report.summary)
                }
                Ok(_) => debug!("Backends clean after test"),
                Err(e) => warn!("Verification after test could not run: {}", e),
            }
        }
    }

    /// Final cleanup and run summary, including the performance report
    pub async fn after_all(&self) -> CleanupOutcome<TestRunSummary> {
        let mut context = self
            .context
            .lock()
            .await
            .take()
            .ok_or_else(|| CleanupError::configuration("after_all called before before_all"))?;

        if let Err(e) = self
            .automation
            .execute_test_cleanup(&mut context, None)
            .await
        {
            warn!("Final cleanup could not run: {}", e);
            context.errors.push(format!("final cleanup: {}", e));
        }

        Ok(self.automation.complete_test_run(context))
    }

    /// Run one test between `before_each` and `after_each`
    pub async fn run_test<F, Fut, T, E>(&self, test: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.before_each().await;
        let outcome = test().await;
        self.after_each(outcome.is_ok()).await;
        outcome
    }

    /// Assert every lifecycle backend is clean right now
    pub async fn assert_clean(&self) -> CleanupOutcome<VerificationReport> {
        let orchestrator = self.automation.orchestrator();
        let targets = orchestrator.resolve_targets(self.databases.as_deref());
        let report = self
            .automation
            .verifier()
            .verify(Some(targets.as_slice()), None)
            .await?;

        if report.is_clean() {
            Ok(report)
        } else {
            Err(dirty_baseline(&report))
        }
    }
}

impl std::fmt::Debug for CleanupLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupLifecycle")
            .field("databases", &self.databases)
            .finish()
    }
}

fn dirty_baseline(report: &VerificationReport) -> CleanupError {
    let dirty: Vec<String> = report
        .dirty_backends()
        .iter()
        .map(|kind| kind.to_string())
        .collect();

    CleanupError::DirtyBaseline {
        count: dirty.len(),
        summary: format!("{} [{}]", report.summary, dirty.join(", ")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::AutomationConfig;
    use crate::orchestrator::CleanupOrchestrator;
    use crate::verification::CleanupVerifier;
    use cleanup_database::memory::{MemoryKeyValueDriver, MemoryRelationalDriver};
    use cleanup_database::{KeyValueCleanupStrategy, RelationalCleanupStrategy};
    use cleanup_shared::{CleanupConfigOverride, CleanupOptionsOverride};

    fn lifecycle(
        relational: Arc<MemoryRelationalDriver>,
        key_value: Arc<MemoryKeyValueDriver>,
        config: AutomationConfig,
    ) -> CleanupLifecycle {
        let orchestrator = CleanupOrchestrator::new(CleanupConfigOverride::with_options(
            CleanupOptionsOverride::default().retry_delay_ms(5),
        ))
        .unwrap()
        .with_strategy(Arc::new(RelationalCleanupStrategy::new(relational)))
        .with_strategy(Arc::new(KeyValueCleanupStrategy::new(key_value)));
        let verifier = Arc::new(CleanupVerifier::new(Arc::new(orchestrator)));
        CleanupLifecycle::new(Arc::new(TestAutomationManager::new(verifier, config)))
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let relational = Arc::new(MemoryRelationalDriver::new());
        relational.insert_rows("users", 3);
        let key_value = Arc::new(MemoryKeyValueDriver::new());
        let lifecycle = lifecycle(
            relational.clone(),
            key_value.clone(),
            AutomationConfig {
                verify_after_each: true,
                ..Default::default()
            },
        );

        lifecycle.before_all().await.unwrap();
        assert_eq!(relational.total_rows(), 0);

        let outcome: Result<(), String> = lifecycle
            .run_test(|| async {
                key_value.insert("test:cart:9");
                relational.insert_rows("orders", 2);
                Ok(())
            })
            .await;
        assert!(outcome.is_ok());
        assert!(!key_value.contains("test:cart:9"));

        let failed: Result<(), String> = lifecycle
            .run_test(|| async { Err("assertion failed".to_string()) })
            .await;
        assert!(failed.is_err());

        lifecycle.assert_clean().await.unwrap();

        let summary = lifecycle.after_all().await.unwrap();
        assert_eq!(summary.metrics.total_tests, 2);
        assert_eq!(summary.metrics.passed_tests, 1);
        assert!(!summary.success);
        assert!(summary.performance.total_runs > 0);
    }

    #[tokio::test]
    async fn test_after_each_cleanup_can_be_disabled() {
        let relational = Arc::new(MemoryRelationalDriver::new());
        let key_value = Arc::new(MemoryKeyValueDriver::new());
        let lifecycle = lifecycle(
            relational.clone(),
            key_value.clone(),
            AutomationConfig {
                isolate_each_test: true,
                cleanup_after_each: false,
                ..Default::default()
            },
        );
        lifecycle.before_all().await.unwrap();

        let outcome: Result<(), String> = lifecycle
            .run_test(|| async {
                key_value.insert("test:draft:1");
                relational.insert_rows("orders", 4);
                Ok(())
            })
            .await;
        assert!(outcome.is_ok());
        assert!(key_value.contains("test:draft:1"));
        assert_eq!(relational.total_rows(), 4);

        // the next test still starts clean through isolation
        let outcome: Result<(), String> = lifecycle
            .run_test(|| async {
                assert!(!key_value.contains("test:draft:1"));
                assert_eq!(relational.total_rows(), 0);
                Ok(())
            })
            .await;
        assert!(outcome.is_ok());

        let summary = lifecycle.after_all().await.unwrap();
        assert_eq!(summary.metrics.passed_tests, 2);
        assert_eq!(relational.total_rows(), 0);
    }

    #[tokio::test]
    async fn test_unregistered_backend_fails_before_all() {
        let lifecycle = lifecycle(
            Arc::new(MemoryRelationalDriver::new()),
            Arc::new(MemoryKeyValueDriver::new()),
            AutomationConfig::default(),
        )
        .for_databases(&[BackendKind::Relational, BackendKind::VectorIndex]);

        let outcome = lifecycle.before_all().await;
        assert!(matches!(
            outcome,
            Err(CleanupError::StrategyNotRegistered {
                backend: BackendKind::VectorIndex
            })
        ));
    }

    #[tokio::test]
    async fn test_dirty_baseline_fails_before_all() {
        let key_value = Arc::new(MemoryKeyValueDriver::new());
        key_value.insert("test:locked");
        key_value.fail_on("test:*");

        let lifecycle = lifecycle(
            Arc::new(MemoryRelationalDriver::new()),
            key_value,
            AutomationConfig::default(),
        );

        let outcome = lifecycle.before_all().await;
        assert!(matches!(outcome, Err(CleanupError::DirtyBaseline { count: 1, .. })));
    }

    #[tokio::test]
    async fn test_hooks_without_before_all() {
        let lifecycle = lifecycle(
            Arc::new(MemoryRelationalDriver::new()),
            Arc::new(MemoryKeyValueDriver::new()),
            AutomationConfig::default(),
        );

        lifecycle.before_each().await;
        lifecycle.after_each(true).await;
        assert!(lifecycle.after_all().await.is_err());
    }
}
