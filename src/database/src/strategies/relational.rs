use async_trait::async_trait;
use cleanup_shared::{
    BackendKind, CleanupError, CleanupFailure, CleanupIssue, CleanupOptions, CleanupOutcome,
    CleanupPerformanceMetrics, CleanupResult, CleanupVerificationResult, FailureKind, IssueType,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::metrics::{MetricsRecorder, MetricsSlot};
use super::{connection_error, verification_error, BackendHealth, CleanupStrategy, SequenceSnapshot};
use crate::drivers::{
    DriverResult, ForeignKey, IdentityMode, RelationalDriver, RelationalTransaction,
};

const BACKEND: BackendKind = BackendKind::Relational;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelationalStrategyConfig {
    /// Tables never touched by cleanup
    pub excluded_tables: Vec<String>,
    /// Total removed rows above which affected tables are vacuumed
    pub vacuum_threshold: u64,
    pub max_table_count: u64,
    pub max_active_transactions: u64,
}

impl Default for RelationalStrategyConfig {
    fn default() -> Self {
        Self {
            excluded_tables: vec![
                "_sqlx_migrations".to_string(),
                "schema_migrations".to_string(),
                "__diesel_schema_migrations".to_string(),
                "spatial_ref_sys".to_string(),
            ],
            vacuum_threshold: 10_000,
            max_table_count: 100,
            max_active_transactions: 10,
        }
    }
}

/// Empties every user table inside one transaction.
///
/// All tables are counted first. Tables below `batch_size` rows go in one
/// TRUNCATE together with every table referencing them; the rest are deleted
/// in batches, referencing tables first, each under its own savepoint so a
/// failure rolls back only that table. A table referenced from a table that is
/// excluded or could not be counted is left alone and reported.
pub struct RelationalCleanupStrategy {
    driver: Arc<dyn RelationalDriver>,
    config: RelationalStrategyConfig,
    metrics: MetricsSlot,
}

impl RelationalCleanupStrategy {
    pub fn new(driver: Arc<dyn RelationalDriver>) -> Self {
        Self {
            driver,
            config: RelationalStrategyConfig::default(),
            metrics: MetricsSlot::default(),
        }
    }

    pub fn with_config(mut self, config: RelationalStrategyConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &RelationalStrategyConfig {
        &self.config
    }

    async fn user_tables(&self) -> DriverResult<Vec<String>> {
        let tables = self.driver.list_tables().await?;
        Ok(tables
            .into_iter()
            .filter(|t| !self.config.excluded_tables.contains(t))
            .collect())
    }

    /// Truncate exactly `tables` in one statement; nothing is removed if any fails
    pub async fn truncate_tables(
        &self,
        tables: &[String],
        options: &CleanupOptions,
    ) -> CleanupOutcome<CleanupResult> {
        options.validate()?;
        let mut result = CleanupResult::builder(BACKEND);
        let mut recorder = MetricsRecorder::start();

        recorder
            .connect(self.driver.ping())
            .await
            .map_err(|e| connection_error(BACKEND, e))?;
        let mut tx = recorder
            .query(self.driver.begin())
            .await
            .map_err(|e| connection_error(BACKEND, e))?;

        let mut counts = Vec::with_capacity(tables.len());
        for table in tables {
            match recorder.query(tx.count_rows(table)).await {
                Ok(rows) => counts.push((table.clone(), rows)),
                Err(e) => {
                    rollback_quietly(tx).await;
                    result.object_error(table.as_str(), e.to_string());
                    return Ok(result.finish());
                }
            }
        }

        let identity = IdentityMode::from_reset_flag(options.reset_sequences);
        if let Err(e) = recorder.query(tx.truncate(tables, identity)).await {
            rollback_quietly(tx).await;
            result.object_error(tables.join(", "), e.to_string());
            return Ok(result.finish());
        }

        if let Err(e) = recorder.query(tx.commit()).await {
            result.error(CleanupFailure::for_target(
                FailureKind::Operation,
                "transaction",
                format!("commit failed: {}", e),
            ));
            return Ok(result.finish());
        }

        for (table, rows) in counts {
            result.add_removed(rows);
            if rows > 0 {
                result.affected(table);
            }
        }

        let metrics = recorder.finish(result.records_removed(), None);
        self.metrics.record(metrics.clone());
        result.metrics(metrics);
        Ok(result.finish())
    }

    /// Delete every row of one table under a savepoint, undoing partial work on failure
    async fn purge_table(
        &self,
        tx: &mut dyn RelationalTransaction,
        table: &str,
        savepoint: &str,
        options: &CleanupOptions,
        recorder: &mut MetricsRecorder,
    ) -> DriverResult<u64> {
        recorder.query(tx.savepoint(savepoint)).await?;

        match delete_in_batches(tx, table, options, recorder).await {
            Ok(removed) => {
                recorder.query(tx.release_savepoint(savepoint)).await?;
                Ok(removed)
            }
            Err(e) => {
                if let Err(rollback) = recorder.query(tx.rollback_to_savepoint(savepoint)).await {
                    warn!("Failed to roll back savepoint for {}: {}", table, rollback);
                }
                Err(e)
            }
        }
    }

    /// Truncate `tables` together under a savepoint
    async fn truncate_group(
        &self,
        tx: &mut dyn RelationalTransaction,
        tables: &[String],
        options: &CleanupOptions,
        recorder: &mut MetricsRecorder,
    ) -> DriverResult<()> {
        const SAVEPOINT: &str = "cleanup_truncate";
        recorder.query(tx.savepoint(SAVEPOINT)).await?;

        let identity = IdentityMode::from_reset_flag(options.reset_sequences);
        match recorder.query(tx.truncate(tables, identity)).await {
            Ok(()) => {
                recorder.query(tx.release_savepoint(SAVEPOINT)).await?;
                Ok(())
            }
            Err(e) => {
                if let Err(rollback) = recorder.query(tx.rollback_to_savepoint(SAVEPOINT)).await {
                    warn!("Failed to roll back truncate savepoint: {}", rollback);
                }
                Err(e)
            }
        }
    }
}

/// How the counted tables are emptied
#[derive(Debug, Default, PartialEq)]
struct PurgePlan {
    /// Emptied by a single TRUNCATE; closed under "is referenced by"
    truncate: Vec<String>,
    /// Emptied by batched DELETE, referencing tables before referenced ones
    delete: Vec<String>,
}

impl PurgePlan {
    fn build(counts: &BTreeMap<String, u64>, keys: &[ForeignKey], batch_size: u64) -> Self {
        let mut truncate: BTreeSet<&str> = counts
            .iter()
            .filter(|(_, rows)| **rows < batch_size)
            .map(|(table, _)| table.as_str())
            .collect();

        // a table may only be truncated together with every table referencing it
        loop {
            let excluded: Vec<&str> = truncate
                .iter()
                .copied()
                .filter(|table| {
                    keys.iter().any(|key| {
                        key.references == *table
                            && !key.is_self_reference()
                            && !truncate.contains(key.table.as_str())
                    })
                })
                .collect();
            if excluded.is_empty() {
                break;
            }
            for table in excluded {
                truncate.remove(table);
            }
        }

        let delete = counts
            .iter()
            .filter(|(table, rows)| **rows > 0 && !truncate.contains(table.as_str()))
            .map(|(table, _)| table.clone())
            .collect();

        let has_rows = truncate.iter().any(|t| counts.get(*t).copied().unwrap_or(0) > 0);
        Self {
            truncate: if has_rows {
                truncate.into_iter().map(str::to_string).collect()
            } else {
                Vec::new()
            },
            delete: referencing_first(delete, keys),
        }
    }
}

/// Remove from `counts` every table that a table outside `counts` references,
/// repeating until stable. Returns each pinned table with the table holding it
/// and its row count.
fn pin_referenced(
    counts: &mut BTreeMap<String, u64>,
    keys: &[ForeignKey],
) -> Vec<(String, String, u64)> {
    let mut pinned = Vec::new();
    loop {
        let held: Vec<(String, String)> = keys
            .iter()
            .filter(|key| {
                !key.is_self_reference()
                    && counts.contains_key(&key.references)
                    && !counts.contains_key(&key.table)
            })
            .map(|key| (key.references.clone(), key.table.clone()))
            .collect();
        if held.is_empty() {
            return pinned;
        }
        for (table, holder) in held {
            if let Some(rows) = counts.remove(&table) {
                pinned.push((table, holder, rows));
            }
        }
    }
}

/// Order `tables` so that a table comes before every table it references.
/// Cycles fall back to name order.
fn referencing_first(tables: Vec<String>, keys: &[ForeignKey]) -> Vec<String> {
    let mut pending: BTreeSet<String> = tables.into_iter().collect();
    let mut ordered = Vec::with_capacity(pending.len());

    while !pending.is_empty() {
        let ready = pending
            .iter()
            .find(|table| {
                !keys.iter().any(|key| {
                    key.references == **table
                        && !key.is_self_reference()
                        && pending.contains(&key.table)
                })
            })
            .or_else(|| pending.iter().next())
            .cloned();
        let Some(next) = ready else { break };
        pending.remove(&next);
        ordered.push(next);
    }
    ordered
}

async fn delete_in_batches(
    tx: &mut dyn RelationalTransaction,
    table: &str,
    options: &CleanupOptions,
    recorder: &mut MetricsRecorder,
) -> DriverResult<u64> {
    let mut removed = 0;
    loop {
        let batch = recorder
            .query(tx.delete_batch(table, options.batch_size))
            .await?;
        removed += batch;
        if batch < options.batch_size {
            break;
        }
    }

    if options.reset_sequences {
        recorder.query(tx.restart_sequences(table)).await?;
    }
    debug!("Deleted {} rows from {} in batches", removed, table);
    Ok(removed)
}

async fn rollback_quietly(tx: Box<dyn RelationalTransaction>) {
    if let Err(e) = tx.rollback().await {
        warn!("Transaction rollback failed: {}", e);
    }
}

#[async_trait]
impl CleanupStrategy for RelationalCleanupStrategy {
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
        let tables = recorder
            .query(self.user_tables())
            .await
            .map_err(|e| connection_error(BACKEND, e))?;
        debug!("Cleaning {} relational tables", tables.len());

        let keys = recorder
            .query(self.driver.foreign_keys())
            .await
            .map_err(|e| connection_error(BACKEND, e))?;

        let mut tx = recorder
            .query(self.driver.begin())
            .await
            .map_err(|e| connection_error(BACKEND, e))?;

        if let Err(e) = recorder.query(tx.defer_constraints()).await {
            rollback_quietly(tx).await;
            return Err(CleanupError::operation(BACKEND, "constraints", e.to_string()));
        }

        let mut counts = BTreeMap::new();
        for table in &tables {
            match recorder.query(tx.count_rows(table)).await {
                Ok(rows) => {
                    counts.insert(table.clone(), rows);
                }
                Err(e) => {
                    warn!("Could not count rows of {}: {}", table, e);
                    result.object_error(table.as_str(), e.to_string());
                }
            }
        }

        for (table, holder, rows) in pin_referenced(&mut counts, &keys) {
            if rows > 0 {
                warn!("Skipping {}: referenced by {}", table, holder);
                result.object_error(
                    table.as_str(),
                    format!("referenced by {}, which is not being cleaned", holder),
                );
            }
        }

        let mut plan = PurgePlan::build(&counts, &keys, options.batch_size);
        let mut purged = Vec::new();

        if !plan.truncate.is_empty() {
            match self
                .truncate_group(tx.as_mut(), &plan.truncate, options, &mut recorder)
                .await
            {
                Ok(()) => {
                    for table in &plan.truncate {
                        match counts.get(table) {
                            Some(&rows) if rows > 0 => purged.push((table.clone(), rows)),
                            _ => {}
                        }
                    }
                }
                Err(e) => {
                    warn!("Truncate failed, deleting in batches instead: {}", e);
                    result.warning(format!(
                        "TRUNCATE of {} failed, deleted in batches: {}",
                        plan.truncate.join(", "),
                        e
                    ));
                    let mut fallback: Vec<String> = plan
                        .truncate
                        .drain(..)
                        .filter(|table| counts.get(table).copied().unwrap_or(0) > 0)
                        .collect();
                    fallback.append(&mut plan.delete);
                    plan.delete = referencing_first(fallback, &keys);
                }
            }
        }

        for (index, table) in plan.delete.iter().enumerate() {
            let savepoint = format!("cleanup_table_{}", index);
            match self
                .purge_table(tx.as_mut(), table, &savepoint, options, &mut recorder)
                .await
            {
                Ok(0) => {}
                Ok(removed) => purged.push((table.clone(), removed)),
                Err(e) => {
                    warn!("Cleanup of table {} failed: {}", table, e);
                    result.object_error(table.as_str(), e.to_string());
                }
            }
        }

        if let Err(e) = recorder.query(tx.restore_constraints()).await {
            rollback_quietly(tx).await;
            result.error(CleanupFailure::for_target(
                FailureKind::Operation,
                "constraints",
                e.to_string(),
            ));
            return Ok(result.finish());
        }

        if let Err(e) = recorder.query(tx.commit()).await {
            result.error(CleanupFailure::for_target(
                FailureKind::Operation,
                "transaction",
                format!("commit failed: {}", e),
            ));
            return Ok(result.finish());
        }

        for (table, removed) in &purged {
            result.add_removed(*removed).affected(table.as_str());
        }

        if result.records_removed() >= self.config.vacuum_threshold {
            for (table, _) in &purged {
                if let Err(e) = recorder.query(self.driver.vacuum(table)).await {
                    result.warning(format!("VACUUM of {} failed: {}", table, e));
                }
            }
        }

        let metrics = recorder.finish(result.records_removed(), None);
        self.metrics.record(metrics.clone());
        result.metrics(metrics);

        let result = result.finish();
        info!(
            "Relational cleanup removed {} rows from {} tables in {}ms",
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
        let tables = self
            .user_tables()
            .await
            .map_err(|e| connection_error(BACKEND, e))?;

        let mut issues = Vec::new();
        let mut remaining_rows = 0;
        for table in &tables {
            match self.driver.count_rows(table).await {
                Ok(0) => {}
                Ok(rows) => {
                    remaining_rows += rows;
                    issues.push(CleanupIssue::data_remaining(table.as_str(), rows, "rows"));
                }
                Err(e) => issues.push(CleanupIssue::warning(
                    IssueType::VerificationFailed,
                    table.as_str(),
                    format!("Could not count rows: {}", e),
                )),
            }
        }

        if tables.len() as u64 > self.config.max_table_count {
            issues.push(
                CleanupIssue::info(
                    IssueType::PerformanceDegradation,
                    BACKEND.as_str(),
                    format!("{} tables in schema", tables.len()),
                )
                .with_suggestion("Drop tables left behind by old test runs"),
            );
        }

        match self.driver.active_transactions().await {
            Ok(active) if active > self.config.max_active_transactions => {
                issues.push(CleanupIssue::info(
                    IssueType::ConnectionIssue,
                    BACKEND.as_str(),
                    format!("{} other sessions inside a transaction", active),
                ));
            }
            Ok(_) => {}
            Err(e) => debug!("Could not read active transactions: {}", e),
        }

        let mut checked_items = BTreeMap::new();
        checked_items.insert("tables".to_string(), tables.len() as u64);
        checked_items.insert("rows".to_string(), remaining_rows);

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
        let tables = self
            .user_tables()
            .await
            .map_err(|e| connection_error(BACKEND, e))?;
        let waiting_locks = self
            .driver
            .waiting_locks()
            .await
            .map_err(|e| verification_error(BACKEND, e))?;
        let active_transactions = self
            .driver
            .active_transactions()
            .await
            .map_err(|e| verification_error(BACKEND, e))?;

        let mut sequences = Vec::new();
        for state in self
            .driver
            .sequences()
            .await
            .map_err(|e| verification_error(BACKEND, e))?
        {
            let (Some(table), Some(last_value)) = (state.owner_table, state.last_value) else {
                continue;
            };
            if !tables.contains(&table) {
                continue;
            }

            let table_rows = self
                .driver
                .count_rows(&table)
                .await
                .map_err(|e| verification_error(BACKEND, e))?;
            sequences.push(SequenceSnapshot {
                sequence: state.name,
                table,
                last_value,
                table_rows,
            });
        }

        Ok(BackendHealth::Relational {
            table_count: tables.len() as u64,
            waiting_locks,
            active_transactions,
            sequences,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::MockRelationalDriver;
    use crate::memory::MemoryRelationalDriver;
    use pretty_assertions::assert_eq;

    fn seeded() -> Arc<MemoryRelationalDriver> {
        let driver = Arc::new(MemoryRelationalDriver::new());
        driver.insert_rows("users", 10);
        driver.insert_rows("orders", 25);
        driver.insert_rows("audit_log", 3);
        driver.insert_rows("_sqlx_migrations", 4);
        driver
    }

    #[tokio::test]
    async fn test_cleanup_empties_every_user_table() {
        let driver = seeded();
        let strategy = RelationalCleanupStrategy::new(driver.clone());

        let result = strategy.cleanup(&CleanupOptions::default()).await.unwrap();

        assert!(result.success);
        assert_eq!(result.records_removed, 38);
        assert_eq!(
            result.tables_affected,
            Some(vec![
                "audit_log".to_string(),
                "orders".to_string(),
                "users".to_string()
            ])
        );
        assert_eq!(driver.row_count("orders"), Some(0));
        assert_eq!(driver.row_count("_sqlx_migrations"), Some(4));
        assert_eq!(driver.sequence_value("users"), None);
        assert!(strategy.performance_metrics().is_some());
    }

    #[tokio::test]
    async fn test_large_tables_are_deleted_in_batches() {
        let driver = seeded();
        let strategy = RelationalCleanupStrategy::new(driver.clone());
        let options = CleanupOptions {
            batch_size: 4,
            reset_sequences: false,
            ..Default::default()
        };

        let result = strategy.cleanup(&options).await.unwrap();

        assert_eq!(result.records_removed, 38);
        assert_eq!(driver.total_rows(), 4);
        assert_eq!(driver.sequence_value("orders"), Some(25));
    }

    #[tokio::test]
    async fn test_failing_table_is_isolated() {
        let driver = seeded();
        driver.fail_on("orders");
        let strategy = RelationalCleanupStrategy::new(driver.clone());

        let result = strategy.cleanup(&CleanupOptions::default()).await.unwrap();

        assert!(!result.success);
        assert_eq!(result.error_count(), 1);
        assert_eq!(
            result.errors.as_ref().unwrap()[0].target.as_deref(),
            Some("orders")
        );
        assert_eq!(result.records_removed, 13);
        assert_eq!(driver.row_count("users"), Some(0));

        driver.clear_faults();
        assert_eq!(driver.row_count("orders"), Some(25));
    }

    fn orders_with_items() -> Arc<MemoryRelationalDriver> {
        let driver = Arc::new(MemoryRelationalDriver::new());
        driver.insert_rows("orders", 100);
        driver.insert_rows("order_items", 300);
        driver.add_foreign_key("order_items", "orders");
        driver
    }

    #[tokio::test]
    async fn test_referencing_tables_are_counted_and_truncated_together() {
        let driver = orders_with_items();
        let strategy = RelationalCleanupStrategy::new(driver.clone());

        let result = strategy.cleanup(&CleanupOptions::default()).await.unwrap();

        assert!(result.success, "{:?}", result.errors);
        assert_eq!(result.records_removed, 400);
        assert_eq!(
            result.tables_affected,
            Some(vec!["order_items".to_string(), "orders".to_string()])
        );
        assert_eq!(driver.total_rows(), 0);
    }

    #[tokio::test]
    async fn test_batched_deletes_run_referencing_tables_first() {
        let driver = orders_with_items();
        driver.insert_rows("customers", 20);
        driver.add_foreign_key("orders", "customers");
        let strategy = RelationalCleanupStrategy::new(driver.clone());
        let options = CleanupOptions {
            batch_size: 50,
            ..Default::default()
        };

        let result = strategy.cleanup(&options).await.unwrap();

        assert!(result.success, "{:?}", result.errors);
        assert_eq!(result.records_removed, 420);
        assert_eq!(
            result.tables_affected,
            Some(vec![
                "order_items".to_string(),
                "orders".to_string(),
                "customers".to_string()
            ])
        );
        assert_eq!(driver.total_rows(), 0);
    }

    #[tokio::test]
    async fn test_excluded_referencing_table_pins_its_target() {
        let driver = orders_with_items();
        driver.insert_rows("users", 7);
        let strategy = RelationalCleanupStrategy::new(driver.clone()).with_config(
            RelationalStrategyConfig {
                excluded_tables: vec!["order_items".to_string()],
                ..Default::default()
            },
        );

        let result = strategy.cleanup(&CleanupOptions::default()).await.unwrap();

        assert!(!result.success);
        let errors = result.errors.as_ref().unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].target.as_deref(), Some("orders"));
        assert!(errors[0].message.contains("order_items"));
        assert_eq!(result.records_removed, 7);
        assert_eq!(driver.row_count("orders"), Some(100));
        assert_eq!(driver.row_count("order_items"), Some(300));
        assert_eq!(driver.row_count("users"), Some(0));
    }

    #[test]
    fn test_purge_plan_keeps_truncate_set_closed() {
        let counts: BTreeMap<String, u64> = [("orders", 3), ("order_items", 5_000), ("tags", 0)]
            .into_iter()
            .map(|(t, n)| (t.to_string(), n))
            .collect();
        let keys = vec![ForeignKey::new("order_items", "orders")];

        let plan = PurgePlan::build(&counts, &keys, 1_000);

        assert_eq!(plan.truncate, Vec::<String>::new());
        assert_eq!(
            plan.delete,
            vec!["order_items".to_string(), "orders".to_string()]
        );
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_an_error() {
        let driver = seeded();
        driver.set_unavailable(true);
        let strategy = RelationalCleanupStrategy::new(driver);

        let error = strategy
            .cleanup(&CleanupOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(error, CleanupError::Connection { .. }));
    }

    #[tokio::test]
    async fn test_truncate_tables_is_all_or_nothing() {
        let driver = seeded();
        let strategy = RelationalCleanupStrategy::new(driver.clone());

        let result = strategy
            .truncate_tables(
                &["users".to_string(), "missing".to_string()],
                &CleanupOptions::default(),
            )
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.records_removed, 0);
        assert_eq!(driver.row_count("users"), Some(10));

        let result = strategy
            .truncate_tables(
                &["users".to_string(), "orders".to_string()],
                &CleanupOptions::default(),
            )
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.records_removed, 35);
        assert_eq!(driver.row_count("audit_log"), Some(3));
    }

    #[tokio::test]
    async fn test_verify_reports_remaining_rows() {
        let driver = seeded();
        let strategy = RelationalCleanupStrategy::new(driver.clone());

        let dirty = strategy.verify(&CleanupOptions::default()).await.unwrap();
        assert!(!dirty.is_clean);
        assert_eq!(dirty.issues.len(), 3);
        assert_eq!(dirty.checked_items["rows"], 38);

        strategy.cleanup(&CleanupOptions::default()).await.unwrap();
        let clean = strategy.verify(&CleanupOptions::default()).await.unwrap();
        assert!(clean.is_clean);
    }

    #[tokio::test]
    async fn test_health_snapshot_flags_orphaned_sequences() {
        let driver = seeded();
        driver.set_waiting_locks(2);
        let strategy = RelationalCleanupStrategy::new(driver.clone());

        let options = CleanupOptions {
            reset_sequences: false,
            ..Default::default()
        };
        strategy.cleanup(&options).await.unwrap();

        let BackendHealth::Relational {
            waiting_locks,
            sequences,
            ..
        } = strategy.health_snapshot().await.unwrap()
        else {
            panic!("expected relational health");
        };
        assert_eq!(waiting_locks, 2);
        assert_eq!(sequences.len(), 3);
        assert!(sequences.iter().all(SequenceSnapshot::is_orphaned));
    }

    #[tokio::test]
    async fn test_failed_transaction_start_surfaces_as_connection_error() {
        let mut driver = MockRelationalDriver::new();
        driver.expect_ping().returning(|| Ok(()));
        driver
            .expect_list_tables()
            .returning(|| Ok(vec!["users".to_string()]));
        driver.expect_foreign_keys().returning(|| Ok(Vec::new()));
        driver.expect_begin().returning(|| {
            Err(crate::drivers::DriverError::Connection(
                "pool timed out".to_string(),
            ))
        });

        let strategy = RelationalCleanupStrategy::new(Arc::new(driver));
        let error = strategy
            .cleanup(&CleanupOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(error, CleanupError::Connection { .. }));
        assert!(error.to_string().contains("pool timed out"));
    }
}
