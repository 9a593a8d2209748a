//! # Verification Engine
//!
//! Wraps each strategy's own verification with deep checks derived from the
//! backend's health statistics and with user supplied validators, then folds
//! every backend's issues into one [`VerificationReport`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cleanup_database::BackendHealth;
use cleanup_shared::{
    BackendKind, CleanupError, CleanupIssue, CleanupOptions, CleanupOptionsOverride,
    CleanupOutcome, CleanupVerificationResult, IssueSeverity, IssueType,
};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::orchestrator::{guarded, CleanupOrchestrator};

const MIB: u64 = 1024 * 1024;

/// Limits applied by the deep checks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeepCheckThresholds {
    pub max_waiting_locks: u64,
    pub max_active_operations: u64,
    pub max_collection_bytes: u64,
    pub max_index_count: u64,
    pub max_memory_ratio: f64,
    pub max_keys_with_expiry: u64,
    pub max_collection_points: u64,
    pub max_vector_dimension: u64,
}

impl Default for DeepCheckThresholds {
    fn default() -> Self {
        Self {
            max_waiting_locks: 0,
            max_active_operations: 50,
            max_collection_bytes: 100 * MIB,
            max_index_count: 10,
            max_memory_ratio: 0.8,
            max_keys_with_expiry: 1_000,
            max_collection_points: 100_000,
            max_vector_dimension: 2_048,
        }
    }
}

/// Extra check run after a backend's own verification
#[async_trait]
pub trait CustomValidator: Send + Sync {
    fn name(&self) -> &str;

    fn backend(&self) -> BackendKind;

    async fn validate(&self) -> anyhow::Result<Vec<CleanupIssue>>;
}

struct FnValidator<F> {
    name: String,
    backend: BackendKind,
    check: F,
}

#[async_trait]
impl<F, Fut> CustomValidator for FnValidator<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Vec<CleanupIssue>>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn backend(&self) -> BackendKind {
        self.backend
    }

    async fn validate(&self) -> anyhow::Result<Vec<CleanupIssue>> {
        (self.check)().await
    }
}

/// Build a validator from an async closure
pub fn validator_fn<S, F, Fut>(name: S, backend: BackendKind, check: F) -> Arc<dyn CustomValidator>
where
    S: Into<String>,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Vec<CleanupIssue>>> + Send + 'static,
{
    Arc::new(FnValidator {
        name: name.into(),
        backend,
        check,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Clean,
    IssuesFound,
    VerificationFailed,
}

impl OverallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverallStatus::Clean => "clean",
            OverallStatus::IssuesFound => "issues_found",
            OverallStatus::VerificationFailed => "verification_failed",
        }
    }
}

impl std::fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregated verification outcome across backends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub overall_status: OverallStatus,
    pub total_databases: usize,
    pub clean_databases: usize,
    pub databases_with_issues: usize,
    pub total_issues: usize,
    pub critical_issues: usize,
    pub warning_issues: usize,
    pub info_issues: usize,
    pub verification_time_ms: u64,
    pub results: Vec<CleanupVerificationResult>,
    pub recommendations: Vec<String>,
    pub summary: String,
    pub generated_at: DateTime<Utc>,
}

impl VerificationReport {
    pub fn from_results(results: Vec<CleanupVerificationResult>, verification_time_ms: u64) -> Self {
        let total_databases = results.len();
        let clean_databases = results.iter().filter(|r| r.is_clean).count();
        let databases_with_issues = total_databases - clean_databases;

        let count = |severity| {
            results
                .iter()
                .map(|r| r.count_by_severity(severity))
                .sum::<usize>()
        };
        let critical_issues = count(IssueSeverity::Critical);
        let warning_issues = count(IssueSeverity::Warning);
        let info_issues = count(IssueSeverity::Info);
        let total_issues = critical_issues + warning_issues + info_issues;

        let overall_status = if total_databases > 0
            && results.iter().all(CleanupVerificationResult::verification_failed)
        {
            OverallStatus::VerificationFailed
        } else if critical_issues + warning_issues > 0 {
            OverallStatus::IssuesFound
        } else {
            OverallStatus::Clean
        };

        let recommendations = recommendations(&results, critical_issues);
        let summary = format!(
            "{}/{} databases clean; {} issues ({} critical, {} warning, {} info)",
            clean_databases,
            total_databases,
            total_issues,
            critical_issues,
            warning_issues,
            info_issues
        );

        Self {
            overall_status,
            total_databases,
            clean_databases,
            databases_with_issues,
            total_issues,
            critical_issues,
            warning_issues,
            info_issues,
            verification_time_ms,
            results,
            recommendations,
            summary,
            generated_at: Utc::now(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.overall_status == OverallStatus::Clean
    }

    /// Clean state of one backend; false when it was not part of the report
    pub fn backend_is_clean(&self, kind: BackendKind) -> bool {
        self.result(kind).map(|r| r.is_clean).unwrap_or(false)
    }

    pub fn result(&self, kind: BackendKind) -> Option<&CleanupVerificationResult> {
        self.results.iter().find(|r| r.database == kind)
    }

    /// Backends that are not clean
    pub fn dirty_backends(&self) -> Vec<BackendKind> {
        self.results
            .iter()
            .filter(|r| !r.is_clean)
            .map(|r| r.database)
            .collect()
    }
}

fn recommendations(results: &[CleanupVerificationResult], critical_issues: usize) -> Vec<String> {
    let present: BTreeSet<IssueType> = results
        .iter()
        .flat_map(|r| r.issues.iter().map(|i| i.issue_type))
        .collect();

    let mut recommendations: Vec<String> = present
        .into_iter()
        .map(|issue_type| {
            match issue_type {
                IssueType::DataRemaining => {
                    "Residual test data found; rerun cleanup and review the naming conventions and key patterns"
                }
                IssueType::PerformanceDegradation => {
                    "Backends are large or slow; reduce test data volume or raise the batch size"
                }
                IssueType::ConnectionIssue => {
                    "Connection pressure detected; check pool sizes, blocked clients and long-running operations"
                }
                IssueType::SchemaModified => {
                    "Schema state drifted; reset sequences or rerun migrations before the next suite"
                }
                IssueType::VerificationFailed => {
                    "Some checks could not run; verify backend connectivity and strategy registration"
                }
            }
            .to_string()
        })
        .collect();

    if critical_issues > 0 {
        recommendations.push(format!(
            "{} critical issue(s) must be resolved before running tests",
            critical_issues
        ));
    }
    recommendations
}

/// Runs strategy verification plus deep and custom checks
pub struct CleanupVerifier {
    orchestrator: Arc<CleanupOrchestrator>,
    thresholds: DeepCheckThresholds,
    validators: Vec<Arc<dyn CustomValidator>>,
}

impl CleanupVerifier {
    pub fn new(orchestrator: Arc<CleanupOrchestrator>) -> Self {
        Self {
            orchestrator,
            thresholds: DeepCheckThresholds::default(),
            validators: Vec::new(),
        }
    }

    pub fn with_thresholds(mut self, thresholds: DeepCheckThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn add_validator(&mut self, validator: Arc<dyn CustomValidator>) {
        debug!(
            validator = validator.name(),
            backend = %validator.backend(),
            "Registered custom validator"
        );
        self.validators.push(validator);
    }

    pub fn with_validator(mut self, validator: Arc<dyn CustomValidator>) -> Self {
        self.add_validator(validator);
        self
    }

    pub fn orchestrator(&self) -> &Arc<CleanupOrchestrator> {
        &self.orchestrator
    }

    /// Verify the requested backends (all registered when `None`)
    pub async fn verify(
        &self,
        targets: Option<&[BackendKind]>,
        overrides: Option<&CleanupOptionsOverride>,
    ) -> CleanupOutcome<VerificationReport> {
        let started = Instant::now();
        let options = self.orchestrator.resolve_options(overrides)?;
        let targets = self.orchestrator.resolve_targets(targets);
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

        let report =
            VerificationReport::from_results(results, started.elapsed().as_millis() as u64);
        info!(
            %execution_id,
            status = %report.overall_status,
            "Verification finished: {}",
            report.summary
        );
        Ok(report)
    }

    /// Matcher-style check that one backend is currently clean
    pub async fn is_clean(&self, kind: BackendKind) -> CleanupOutcome<bool> {
        let report = self.verify(Some(&[kind]), None).await?;
        Ok(report.backend_is_clean(kind))
    }

    async fn verify_backend(
        &self,
        execution_id: Uuid,
        kind: BackendKind,
        options: &CleanupOptions,
    ) -> CleanupVerificationResult {
        let started = Instant::now();
        let mut result = self
            .orchestrator
            .verify_backend(execution_id, kind, options)
            .await;
        if result.verification_failed() {
            return result;
        }

        let mut extra = match self.orchestrator.health_snapshot(kind, options).await {
            Ok(health) => deep_checks(&health, &self.thresholds),
            Err(e) => {
                warn!(backend = %kind, "Health snapshot failed: {}", e);
                vec![CleanupIssue::warning(
                    IssueType::VerificationFailed,
                    kind.as_str(),
                    format!("Health snapshot failed: {}", e),
                )]
            }
        };

        for validator in self.validators.iter().filter(|v| v.backend() == kind) {
            let check = async {
                validator
                    .validate()
                    .await
                    .map_err(|e| CleanupError::verification(kind, e.to_string()))
            };
            match guarded(kind, validator.name(), options.timeout_ms, check).await {
                Ok(issues) => extra.extend(issues),
                Err(e) => {
                    warn!(backend = %kind, validator = validator.name(), "Custom validator failed: {}", e);
                    extra.push(CleanupIssue::warning(
                        IssueType::VerificationFailed,
                        validator.name(),
                        format!("Custom validator failed: {}", e),
                    ));
                }
            }
        }

        result.extend_issues(extra);
        result.verification_time_ms = started.elapsed().as_millis() as u64;
        result
    }
}

impl std::fmt::Debug for CleanupVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupVerifier")
            .field("thresholds", &self.thresholds)
            .field("validators", &self.validators.len())
            .finish()
    }
}

/// Issues derived from raw backend statistics
pub fn deep_checks(health: &BackendHealth, thresholds: &DeepCheckThresholds) -> Vec<CleanupIssue> {
    let mut issues = Vec::new();

    match health {
        BackendHealth::Relational {
            waiting_locks,
            sequences,
            ..
        } => {
            if *waiting_locks > thresholds.max_waiting_locks {
                issues.push(
                    CleanupIssue::warning(
                        IssueType::PerformanceDegradation,
                        "pg_locks",
                        format!("{} lock requests are waiting", waiting_locks),
                    )
                    .with_suggestion("Look for open transactions left behind by tests"),
                );
            }
            for sequence in sequences.iter().filter(|s| s.is_orphaned()) {
                issues.push(
                    CleanupIssue::info(
                        IssueType::SchemaModified,
                        sequence.sequence.as_str(),
                        format!(
                            "Sequence is at {} while table {} is empty",
                            sequence.last_value, sequence.table
                        ),
                    )
                    .with_suggestion("Enable reset_sequences to restart identities on cleanup"),
                );
            }
        }
        BackendHealth::Document {
            active_operations,
            collections,
        } => {
            if *active_operations > thresholds.max_active_operations {
                issues.push(CleanupIssue::warning(
                    IssueType::ConnectionIssue,
                    "currentOp",
                    format!("{} operations in progress", active_operations),
                ));
            }
            for (name, stats) in collections {
                if stats.size_bytes > thresholds.max_collection_bytes {
                    issues.push(CleanupIssue::info(
                        IssueType::PerformanceDegradation,
                        name.as_str(),
                        format!("Collection holds {} MiB", stats.size_bytes / MIB),
                    ));
                }
                if stats.index_count > thresholds.max_index_count {
                    issues.push(
                        CleanupIssue::info(
                            IssueType::PerformanceDegradation,
                            name.as_str(),
                            format!("Collection has {} indexes", stats.index_count),
                        )
                        .with_suggestion("Drop indexes created by tests"),
                    );
                }
            }
        }
        BackendHealth::KeyValue { info, .. } => {
            if let Some(ratio) = info.memory_ratio() {
                if ratio > thresholds.max_memory_ratio {
                    issues.push(
                        CleanupIssue::warning(
                            IssueType::PerformanceDegradation,
                            "memory",
                            format!("Memory usage at {:.0}% of maxmemory", ratio * 100.0),
                        )
                        .with_suggestion("Flush test keys or raise maxmemory"),
                    );
                }
            }
            if info.keys_with_expiry > thresholds.max_keys_with_expiry {
                issues.push(CleanupIssue::info(
                    IssueType::PerformanceDegradation,
                    "keyspace",
                    format!("{} keys waiting to expire", info.keys_with_expiry),
                ));
            }
        }
        BackendHealth::VectorIndex { collections } => {
            for (name, info) in collections {
                if info.points_count > thresholds.max_collection_points {
                    issues.push(CleanupIssue::info(
                        IssueType::PerformanceDegradation,
                        name.as_str(),
                        format!("Collection holds {} points", info.points_count),
                    ));
                }
                if info.vector_size > thresholds.max_vector_dimension {
                    issues.push(CleanupIssue::info(
                        IssueType::PerformanceDegradation,
                        name.as_str(),
                        format!("Vectors have {} dimensions", info.vector_size),
                    ));
                }
            }
        }
    }

    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use cleanup_database::memory::{
        MemoryDocumentDriver, MemoryKeyValueDriver, MemoryRelationalDriver, MemoryVectorDriver,
    };
    use cleanup_database::{
        CollectionStats, DocumentCleanupStrategy, KeyValueCleanupStrategy, KeyValueInfo,
        RelationalCleanupStrategy, SequenceSnapshot, VectorCleanupStrategy,
        VectorCollectionInfo,
    };
    use cleanup_shared::CleanupConfigOverride;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn orchestrator_with(
        relational: Arc<MemoryRelationalDriver>,
        key_value: Arc<MemoryKeyValueDriver>,
    ) -> Arc<CleanupOrchestrator> {
        Arc::new(
            CleanupOrchestrator::new(CleanupConfigOverride::default())
                .unwrap()
                .with_strategy(Arc::new(RelationalCleanupStrategy::new(relational)))
                .with_strategy(Arc::new(KeyValueCleanupStrategy::new(key_value))),
        )
    }

    fn result_with(kind: BackendKind, issues: Vec<CleanupIssue>) -> CleanupVerificationResult {
        CleanupVerificationResult::new(kind, issues, BTreeMap::new(), 1)
    }

    #[test]
    fn test_severity_aggregation() {
        let results = vec![
            result_with(
                BackendKind::Relational,
                vec![CleanupIssue::data_remaining("users", 3, "rows")],
            ),
            result_with(
                BackendKind::KeyValue,
                vec![CleanupIssue::info(
                    IssueType::PerformanceDegradation,
                    "keyspace",
                    "large",
                )],
            ),
            CleanupVerificationResult::failed(BackendKind::Document, "unreachable", 2),
        ];

        let report = VerificationReport::from_results(results, 10);

        assert_eq!(report.overall_status, OverallStatus::IssuesFound);
        assert_eq!(report.total_databases, 3);
        assert_eq!(report.clean_databases, 1);
        assert_eq!(report.databases_with_issues, 2);
        assert_eq!(
            (report.critical_issues, report.warning_issues, report.info_issues),
            (1, 1, 1)
        );
        assert_eq!(report.total_issues, 3);
        assert!(report
            .recommendations
            .iter()
            .any(|r| r.contains("critical issue")));
        assert_eq!(
            report.dirty_backends(),
            vec![BackendKind::Relational, BackendKind::Document]
        );
    }

    #[test]
    fn test_info_only_report_is_clean() {
        let report = VerificationReport::from_results(
            vec![result_with(
                BackendKind::VectorIndex,
                vec![CleanupIssue::info(
                    IssueType::ConnectionIssue,
                    "embeddings",
                    "status yellow",
                )],
            )],
            1,
        );
        assert_eq!(report.overall_status, OverallStatus::Clean);
        assert!(report.backend_is_clean(BackendKind::VectorIndex));
        assert!(!report.backend_is_clean(BackendKind::Relational));
    }

    #[test]
    fn test_one_critical_and_one_clean_is_issues_found() {
        let report = VerificationReport::from_results(
            vec![
                result_with(
                    BackendKind::Relational,
                    vec![CleanupIssue::critical(
                        IssueType::DataRemaining,
                        "payments",
                        "rows survived cleanup",
                    )],
                ),
                result_with(BackendKind::KeyValue, Vec::new()),
            ],
            4,
        );

        assert_eq!(report.overall_status, OverallStatus::IssuesFound);
        assert_eq!(report.critical_issues, 1);
        assert_eq!(report.warning_issues, 0);
        assert_eq!(report.clean_databases, 1);
        assert_eq!(report.databases_with_issues, 1);
        assert_eq!(report.dirty_backends(), vec![BackendKind::Relational]);
    }

    #[test]
    fn test_one_failed_backend_is_not_verification_failed() {
        let report = VerificationReport::from_results(
            vec![
                CleanupVerificationResult::failed(BackendKind::Document, "down", 1),
                result_with(BackendKind::KeyValue, Vec::new()),
            ],
            2,
        );
        assert_eq!(report.overall_status, OverallStatus::IssuesFound);
        assert_eq!(report.critical_issues, 1);
    }

    #[test]
    fn test_all_failed_is_verification_failed() {
        let report = VerificationReport::from_results(
            vec![
                CleanupVerificationResult::failed(BackendKind::Document, "down", 1),
                CleanupVerificationResult::failed(BackendKind::KeyValue, "down", 1),
            ],
            2,
        );
        assert_eq!(report.overall_status, OverallStatus::VerificationFailed);
        assert_eq!(report.critical_issues, 2);
        assert_eq!(report.clean_databases, 0);
        assert!(!report.is_clean());
    }

    #[test]
    fn test_deep_checks_relational() {
        let health = BackendHealth::Relational {
            table_count: 3,
            waiting_locks: 2,
            active_transactions: 1,
            sequences: vec![SequenceSnapshot {
                sequence: "users_id_seq".to_string(),
                table: "users".to_string(),
                last_value: 40,
                table_rows: 0,
            }],
        };

        let issues = deep_checks(&health, &DeepCheckThresholds::default());
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].severity, IssueSeverity::Warning);
        assert_eq!(issues[1].issue_type, IssueType::SchemaModified);
        assert_eq!(issues[1].severity, IssueSeverity::Info);
    }

    #[test]
    fn test_deep_checks_document_and_vector() {
        let mut collections = BTreeMap::new();
        collections.insert(
            "events".to_string(),
            CollectionStats {
                documents: 10,
                size_bytes: 200 * MIB,
                index_count: 12,
            },
        );
        let document = BackendHealth::Document {
            active_operations: 51,
            collections,
        };
        let issues = deep_checks(&document, &DeepCheckThresholds::default());
        assert_eq!(issues.len(), 3);
        assert_eq!(issues[0].severity, IssueSeverity::Warning);

        let mut vectors = BTreeMap::new();
        vectors.insert(
            "embeddings".to_string(),
            VectorCollectionInfo {
                points_count: 100_001,
                vector_size: 4_096,
                status: "green".to_string(),
            },
        );
        let vector = BackendHealth::VectorIndex {
            collections: vectors,
        };
        let issues = deep_checks(&vector, &DeepCheckThresholds::default());
        assert_eq!(issues.len(), 2);
        assert!(issues.iter().all(|i| i.severity == IssueSeverity::Info));
    }

    #[test]
    fn test_deep_checks_key_value_memory_pressure() {
        let health = BackendHealth::KeyValue {
            db_size: 10,
            info: KeyValueInfo {
                used_memory: 900,
                peak_memory: 900,
                max_memory: 1_000,
                keys_with_expiry: 1_001,
                connected_clients: 1,
                blocked_clients: 0,
            },
        };

        let issues = deep_checks(&health, &DeepCheckThresholds::default());
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].location, "memory");
        assert_eq!(issues[0].severity, IssueSeverity::Warning);
    }

    #[tokio::test]
    async fn test_verify_combines_base_deep_and_custom_issues() {
        let relational = Arc::new(MemoryRelationalDriver::new());
        relational.insert_rows("orders", 5);
        relational.set_waiting_locks(1);
        let key_value = Arc::new(MemoryKeyValueDriver::new());

        let verifier = CleanupVerifier::new(orchestrator_with(relational, key_value))
            .with_validator(validator_fn(
                "no-audit-rows",
                BackendKind::Relational,
                || async {
                    Ok(vec![CleanupIssue::info(
                        IssueType::DataRemaining,
                        "audit_log",
                        "audit rows kept on purpose",
                    )])
                },
            ))
            .with_validator(validator_fn("broken", BackendKind::KeyValue, || async {
                Err(anyhow::anyhow!("validator crashed"))
            }));

        let report = verifier.verify(None, None).await.unwrap();
        let relational = report.result(BackendKind::Relational).unwrap();
        assert!(!relational.is_clean);
        assert!(relational
            .issues
            .iter()
            .any(|i| i.location == "pg_locks"));
        assert!(relational
            .issues
            .iter()
            .any(|i| i.location == "audit_log"));

        let key_value = report.result(BackendKind::KeyValue).unwrap();
        assert!(!key_value.is_clean);
        assert_eq!(key_value.issues[0].issue_type, IssueType::VerificationFailed);
        assert_eq!(key_value.issues[0].location, "broken");
    }

    async fn exploding_check() -> anyhow::Result<Vec<CleanupIssue>> {
        panic!("validator bug")
    }

    async fn stalled_check() -> anyhow::Result<Vec<CleanupIssue>> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(Vec::new())
    }

    #[tokio::test]
    async fn test_misbehaving_validators_become_issues() {
        let verifier = CleanupVerifier::new(orchestrator_with(
            Arc::new(MemoryRelationalDriver::new()),
            Arc::new(MemoryKeyValueDriver::new()),
        ))
        .with_validator(validator_fn("exploding", BackendKind::KeyValue, exploding_check))
        .with_validator(validator_fn("stalled", BackendKind::Relational, stalled_check));

        let started = Instant::now();
        let report = verifier
            .verify(None, Some(&CleanupOptionsOverride::default().timeout_ms(200)))
            .await
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(report.total_databases, 2);
        assert_eq!(report.overall_status, OverallStatus::IssuesFound);

        let key_value = report.result(BackendKind::KeyValue).unwrap();
        let issue = key_value
            .issues
            .iter()
            .find(|i| i.location == "exploding")
            .unwrap();
        assert_eq!(issue.issue_type, IssueType::VerificationFailed);
        assert_eq!(issue.severity, IssueSeverity::Warning);
        assert!(issue.description.contains("validator bug"));

        let relational = report.result(BackendKind::Relational).unwrap();
        assert!(relational
            .issues
            .iter()
            .any(|i| i.location == "stalled" && i.description.contains("timed out")));
    }

    #[tokio::test]
    async fn test_unregistered_backend_is_critical() {
        let verifier = CleanupVerifier::new(orchestrator_with(
            Arc::new(MemoryRelationalDriver::new()),
            Arc::new(MemoryKeyValueDriver::new()),
        ));

        let report = verifier
            .verify(Some(&[BackendKind::Relational, BackendKind::Document]), None)
            .await
            .unwrap();

        assert_eq!(report.critical_issues, 1);
        assert!(report.backend_is_clean(BackendKind::Relational));
        assert!(report.result(BackendKind::Document).unwrap().verification_failed());
    }

    #[tokio::test]
    async fn test_is_clean_after_cleanup() {
        let document = Arc::new(MemoryDocumentDriver::new());
        document.insert_documents("test_sessions", 4, false);
        let vector = Arc::new(MemoryVectorDriver::new());
        vector.upsert_points("test_vectors", 3);

        let orchestrator = Arc::new(
            CleanupOrchestrator::new(CleanupConfigOverride::default())
                .unwrap()
                .with_strategy(Arc::new(DocumentCleanupStrategy::new(document)))
                .with_strategy(Arc::new(VectorCleanupStrategy::new(vector))),
        );
        let verifier = CleanupVerifier::new(orchestrator.clone());

        assert!(!verifier.is_clean(BackendKind::Document).await.unwrap());
        orchestrator.execute_cleanup(None, None).await.unwrap();
        assert!(verifier.is_clean(BackendKind::Document).await.unwrap());
        assert!(verifier.is_clean(BackendKind::VectorIndex).await.unwrap());
    }
}
