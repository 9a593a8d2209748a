//! # Cleanup Orchestrator
//!
//! Coordinates cleanup, reset and verification across every registered backend
//! strategy. Each strategy call runs under the configured timeout with panics
//! contained, so one misbehaving backend only degrades its own result.

use cleanup_database::{BackendHealth, CleanupStrategy};
use cleanup_shared::{
    BackendKind, CleanupConfig, CleanupConfigOverride, CleanupError, CleanupOptions,
    CleanupOptionsOverride, CleanupOutcome, CleanupResult, CleanupVerificationResult,
};
use futures::future::{join_all, FutureExt};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::events::{
    CleanupEvent, CleanupEventListener, CleanupOperation, EventBus, ListenerId, LoggingListener,
};

/// A strategy together with the lock serializing calls into its backend
struct RegisteredStrategy {
    strategy: Arc<dyn CleanupStrategy>,
    lock: Arc<AsyncMutex<()>>,
}

/// Registry of backend strategies plus timeout, event and history handling
pub struct CleanupOrchestrator {
    strategies: Vec<RegisteredStrategy>,
    config: RwLock<Arc<CleanupConfig>>,
    events: EventBus,
    logging_listener: Option<Arc<LoggingListener>>,
    history: Mutex<Vec<CleanupResult>>,
}

impl CleanupOrchestrator {
    /// Create an orchestrator with `overrides` merged onto the default configuration
    pub fn new(overrides: CleanupConfigOverride) -> CleanupOutcome<Self> {
        Self::with_config(CleanupConfig::default().merged(&overrides))
    }

    pub fn with_config(config: CleanupConfig) -> CleanupOutcome<Self> {
        config.validate()?;

        let events = EventBus::new();
        let logging_listener = if config.logging.log_events {
            let listener = Arc::new(LoggingListener::new(config.options.log_level));
            events.subscribe(listener.clone());
            Some(listener)
        } else {
            None
        };

        Ok(Self {
            strategies: Vec::new(),
            config: RwLock::new(Arc::new(config)),
            events,
            logging_listener,
            history: Mutex::new(Vec::new()),
        })
    }

    /// Register a strategy; a second strategy for the same backend replaces the first
    pub fn register(&mut self, strategy: Arc<dyn CleanupStrategy>) {
        let kind = strategy.backend();
        let entry = RegisteredStrategy {
            strategy,
            lock: Arc::new(AsyncMutex::new(())),
        };

        match self
            .strategies
            .iter_mut()
            .find(|existing| existing.strategy.backend() == kind)
        {
            Some(existing) => {
                warn!(backend = %kind, "Replacing registered cleanup strategy");
                *existing = entry;
            }
            None => {
                debug!(backend = %kind, "Registered cleanup strategy");
                self.strategies.push(entry);
            }
        }
    }

    pub fn with_strategy(mut self, strategy: Arc<dyn CleanupStrategy>) -> Self {
        self.register(strategy);
        self
    }

    /// Registered backends in registration order
    pub fn registered_backends(&self) -> Vec<BackendKind> {
        self.strategies
            .iter()
            .map(|entry| entry.strategy.backend())
            .collect()
    }

    pub fn is_registered(&self, kind: BackendKind) -> bool {
        self.entry(kind).is_some()
    }

    /// Reach a backend's strategy, e.g. for its backend-specific helpers
    pub fn strategy(&self, kind: BackendKind) -> Option<Arc<dyn CleanupStrategy>> {
        self.entry(kind).map(|entry| entry.strategy.clone())
    }

    fn entry(&self, kind: BackendKind) -> Option<&RegisteredStrategy> {
        self.strategies
            .iter()
            .find(|entry| entry.strategy.backend() == kind)
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    pub fn configuration(&self) -> Arc<CleanupConfig> {
        self.config.read().clone()
    }

    /// Merge `layer` into the current configuration. The merged result is
    /// validated first; on error the previous configuration stays in place.
    pub fn update_configuration(&self, layer: &CleanupConfigOverride) -> CleanupOutcome<()> {
        let merged = self.configuration().merged(layer);
        merged.validate()?;

        if let Some(listener) = &self.logging_listener {
            listener.set_level(merged.options.log_level);
        }
        *self.config.write() = Arc::new(merged);
        info!("Cleanup configuration updated");
        Ok(())
    }

    /// Options for one call: configured options with the per-call layer on top
    pub fn resolve_options(
        &self,
        overrides: Option<&CleanupOptionsOverride>,
    ) -> CleanupOutcome<CleanupOptions> {
        let config = self.configuration();
        let options = match overrides {
            Some(layer) => config.options.merged(layer),
            None => config.options.clone(),
        };
        options.validate()?;
        Ok(options)
    }

    /// Requested backends with duplicates removed; all registered when `None`
    pub fn resolve_targets(&self, targets: Option<&[BackendKind]>) -> Vec<BackendKind> {
        match targets {
            Some(targets) => {
                let mut resolved = Vec::with_capacity(targets.len());
                for kind in targets {
                    if !resolved.contains(kind) {
                        resolved.push(*kind);
                    }
                }
                resolved
            }
            None => self.registered_backends(),
        }
    }

    // ========================================================================
    // Events
    // ========================================================================

    pub fn subscribe(&self, listener: Arc<dyn CleanupEventListener>) -> ListenerId {
        self.events.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.events.unsubscribe(id)
    }

    // ========================================================================
    // Cleanup and reset
    // ========================================================================

    /// Clean the requested backends, one result per backend in request order
    pub async fn execute_cleanup(
        &self,
        targets: Option<&[BackendKind]>,
        overrides: Option<&CleanupOptionsOverride>,
    ) -> CleanupOutcome<Vec<CleanupResult>> {
        self.execute(CleanupOperation::Cleanup, targets, overrides)
            .await
    }

    pub async fn execute_reset(
        &self,
        targets: Option<&[BackendKind]>,
        overrides: Option<&CleanupOptionsOverride>,
    ) -> CleanupOutcome<Vec<CleanupResult>> {
        self.execute(CleanupOperation::Reset, targets, overrides)
            .await
    }

    async fn execute(
        &self,
        operation: CleanupOperation,
        targets: Option<&[BackendKind]>,
        overrides: Option<&CleanupOptionsOverride>,
    ) -> CleanupOutcome<Vec<CleanupResult>> {
        let options = self.resolve_options(overrides)?;
        let targets = self.resolve_targets(targets);
        let execution_id = Uuid::new_v4();

        info!(
            %execution_id,
            backends = targets.len(),
            parallel = options.is_parallel(),
            "Starting {} batch",
            operation
        );

        let results = if options.is_parallel() {
            join_all(
                targets
                    .iter()
                    .map(|kind| self.run_cleanup(execution_id, operation, *kind, &options)),
            )
            .await
        } else {
            let mut results = Vec::with_capacity(targets.len());
            for kind in &targets {
                results.push(
                    self.run_cleanup(execution_id, operation, *kind, &options)
                        .await,
                );
            }
            results
        };

        for result in &results {
            self.record_performance(result);
        }

        Ok(results)
    }

    async fn run_cleanup(
        &self,
        execution_id: Uuid,
        operation: CleanupOperation,
        kind: BackendKind,
        options: &CleanupOptions,
    ) -> CleanupResult {
        let started = Instant::now();

        let Some(entry) = self.entry(kind) else {
            let failure = CleanupError::StrategyNotRegistered { backend: kind }.to_failure();
            self.events.emit(&CleanupEvent::CleanupError {
                execution_id,
                operation,
                backend: kind,
                failure: failure.clone(),
            });
            return CleanupResult::failed(kind, failure, 0);
        };

        self.events.emit(&CleanupEvent::CleanupStart {
            execution_id,
            operation,
            backend: kind,
        });

        let strategy = entry.strategy.clone();
        let lock = entry.lock.clone();
        let call = async move {
            let _guard = lock.lock().await;
            match operation {
                CleanupOperation::Cleanup => strategy.cleanup(options).await,
                CleanupOperation::Reset => strategy.reset(options).await,
            }
        };

        match guarded(kind, "strategy", options.timeout_ms, call).await {
            Ok(result) => {
                self.events.emit(&CleanupEvent::CleanupComplete {
                    execution_id,
                    operation,
                    result: result.clone(),
                });
                result
            }
            Err(error) => {
                let failure = error.to_failure();
                self.events.emit(&CleanupEvent::CleanupError {
                    execution_id,
                    operation,
                    backend: kind,
                    failure: failure.clone(),
                });
                CleanupResult::failed(kind, failure, started.elapsed().as_millis() as u64)
            }
        }
    }

    // ========================================================================
    // Verification
    // ========================================================================

    /// Run each requested strategy's own verification
    pub async fn verify_cleanup(
        &self,
        targets: Option<&[BackendKind]>,
        overrides: Option<&CleanupOptionsOverride>,
    ) -> CleanupOutcome<Vec<CleanupVerificationResult>> {
        let options = self.resolve_options(overrides)?;
        let targets = self.resolve_targets(targets);
        let execution_id = Uuid::new_v4();

        let results = if options.is_parallel() {
            join_all(
                targets
                    .iter()
                    .map(|kind| self.verify_backend(execution_id, *kind, &options)),
            )
            .await
        } else {
            let mut results = Vec::with_capacity(targets.len());
            for kind in &targets {
                results.push(self.verify_backend(execution_id, *kind, &options).await);
            }
            results
        };

        Ok(results)
    }

    /// Verify one backend; failures become a critical `verification_failed` issue
    pub async fn verify_backend(
        &self,
        execution_id: Uuid,
        kind: BackendKind,
        options: &CleanupOptions,
    ) -> CleanupVerificationResult {
        let started = Instant::now();
        self.events.emit(&CleanupEvent::VerificationStart {
            execution_id,
            backend: kind,
        });

        let result = match self.entry(kind) {
            None => CleanupVerificationResult::failed(
                kind,
                CleanupError::StrategyNotRegistered { backend: kind }.to_string(),
                0,
            ),
            Some(entry) => {
                let strategy = entry.strategy.clone();
                let lock = entry.lock.clone();
                let call = async move {
                    let _guard = lock.lock().await;
                    strategy.verify(options).await
                };

                match guarded(kind, "strategy", options.timeout_ms, call).await {
                    Ok(result) => result,
                    Err(error) => CleanupVerificationResult::failed(
                        kind,
                        error.to_string(),
                        started.elapsed().as_millis() as u64,
                    ),
                }
            }
        };

        self.events.emit(&CleanupEvent::VerificationComplete {
            execution_id,
            result: result.clone(),
        });
        result
    }

    /// Raw backend statistics for deep verification, under the same timeout
    pub async fn health_snapshot(
        &self,
        kind: BackendKind,
        options: &CleanupOptions,
    ) -> CleanupOutcome<BackendHealth> {
        let entry = self
            .entry(kind)
            .ok_or(CleanupError::StrategyNotRegistered { backend: kind })?;

        let strategy = entry.strategy.clone();
        let lock = entry.lock.clone();
        let call = async move {
            let _guard = lock.lock().await;
            strategy.health_snapshot().await
        };

        guarded(kind, "health snapshot", options.timeout_ms, call).await
    }

    // ========================================================================
    // Performance history
    // ========================================================================

    fn record_performance(&self, result: &CleanupResult) {
        let config = self.configuration();
        let thresholds = &config.performance;

        if config.logging.log_performance {
            if result.duration_ms > thresholds.error_threshold_ms {
                error!(
                    backend = %result.database,
                    duration_ms = result.duration_ms,
                    threshold_ms = thresholds.error_threshold_ms,
                    "Cleanup exceeded error threshold"
                );
            } else if result.duration_ms > thresholds.warn_threshold_ms {
                warn!(
                    backend = %result.database,
                    duration_ms = result.duration_ms,
                    threshold_ms = thresholds.warn_threshold_ms,
                    "Cleanup exceeded warning threshold"
                );
            }
        }

        self.history.lock().push(result.clone());
    }

    /// Every cleanup/reset result recorded so far, oldest first
    pub fn history(&self) -> Vec<CleanupResult> {
        self.history.lock().clone()
    }

    pub fn performance_report(&self) -> PerformanceReport {
        let config = self.configuration();
        PerformanceReport::from_history(&self.history.lock(), &config)
    }
}

impl std::fmt::Debug for CleanupOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupOrchestrator")
            .field("backends", &self.registered_backends())
            .field("events", &self.events)
            .finish()
    }
}

/// Run a backend call under a timeout. A panic becomes an `Operation` error
/// targeting `label`, expiry a `Timeout`.
pub(crate) async fn guarded<T, F>(
    kind: BackendKind,
    label: &str,
    timeout_ms: u64,
    call: F,
) -> CleanupOutcome<T>
where
    F: Future<Output = CleanupOutcome<T>>,
{
    match tokio::time::timeout(
        Duration::from_millis(timeout_ms),
        AssertUnwindSafe(call).catch_unwind(),
    )
    .await
    {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(panic)) => {
            let message = panic_message(panic.as_ref());
            error!(backend = %kind, target = label, "Backend call panicked: {}", message);
            Err(CleanupError::operation(
                kind,
                label,
                format!("panicked: {}", message),
            ))
        }
        Err(_) => Err(CleanupError::Timeout {
            backend: kind,
            timeout_ms,
        }),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ============================================================================
// Performance report
// ============================================================================

/// Aggregated figures for one backend
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendPerformance {
    pub runs: usize,
    pub successful_runs: usize,
    pub average_duration_ms: f64,
    pub records_removed: u64,
}

/// Summary over the orchestrator's performance history
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub total_runs: usize,
    pub successful_runs: usize,
    pub success_rate: f64,
    pub average_duration_ms: f64,
    pub fastest_duration_ms: Option<u64>,
    pub slowest_duration_ms: Option<u64>,
    pub backends: BTreeMap<BackendKind, BackendPerformance>,
    pub recommendations: Vec<String>,
}

impl PerformanceReport {
    pub fn from_history(history: &[CleanupResult], config: &CleanupConfig) -> Self {
        let total_runs = history.len();
        let successful: Vec<&CleanupResult> = history.iter().filter(|r| r.success).collect();
        let successful_runs = successful.len();

        let success_rate = if total_runs == 0 {
            0.0
        } else {
            successful_runs as f64 / total_runs as f64
        };
        let average_duration_ms = average(successful.iter().map(|r| r.duration_ms));
        let fastest_duration_ms = successful.iter().map(|r| r.duration_ms).min();
        let slowest_duration_ms = successful.iter().map(|r| r.duration_ms).max();

        let mut backends: BTreeMap<BackendKind, BackendPerformance> = BTreeMap::new();
        for kind in BackendKind::ALL {
            let runs: Vec<&CleanupResult> =
                history.iter().filter(|r| r.database == kind).collect();
            if runs.is_empty() {
                continue;
            }
            let ok: Vec<&&CleanupResult> = runs.iter().filter(|r| r.success).collect();
            backends.insert(
                kind,
                BackendPerformance {
                    runs: runs.len(),
                    successful_runs: ok.len(),
                    average_duration_ms: average(ok.iter().map(|r| r.duration_ms)),
                    records_removed: runs.iter().map(|r| r.records_removed).sum(),
                },
            );
        }

        let mut recommendations = Vec::new();
        if total_runs > 0 {
            let thresholds = &config.performance;
            if average_duration_ms > thresholds.warn_threshold_ms as f64 {
                recommendations.push(format!(
                    "Average cleanup takes {:.0}ms (warning threshold {}ms); consider a larger batch size or fewer managed objects",
                    average_duration_ms, thresholds.warn_threshold_ms
                ));
            }
            if success_rate < thresholds.minimum_success_rate {
                recommendations.push(format!(
                    "Cleanup success rate is {:.1}% (minimum {:.1}%); check backend connectivity and per-object errors",
                    success_rate * 100.0,
                    thresholds.minimum_success_rate * 100.0
                ));
            }
            if let Some(slowest) = slowest_duration_ms {
                if slowest > thresholds.error_threshold_ms {
                    recommendations.push(format!(
                        "Slowest cleanup took {}ms (error threshold {}ms); look for lock contention or oversized test data",
                        slowest, thresholds.error_threshold_ms
                    ));
                }
            }
        }

        Self {
            total_runs,
            successful_runs,
            success_rate,
            average_duration_ms,
            fastest_duration_ms,
            slowest_duration_ms,
            backends,
            recommendations,
        }
    }
}

fn average<I: Iterator<Item = u64>>(values: I) -> f64 {
    let (sum, count) = values.fold((0u64, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        0.0
    } else {
        sum as f64 / count as f64
    }
}
