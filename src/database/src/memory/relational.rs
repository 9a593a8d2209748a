use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::Faults;
use crate::drivers::{
    DriverError, DriverResult, ForeignKey, IdentityMode, RelationalDriver,
    RelationalTransaction, SequenceState,
};

#[derive(Debug, Clone, Default)]
struct Table {
    rows: u64,
    /// Last issued id; `None` for a fresh or restarted sequence
    sequence: Option<Option<i64>>,
}

type Tables = BTreeMap<String, Table>;

/// Relational driver over an in-memory table map.
///
/// Transactions work on a private copy of the tables that replaces the shared
/// state on commit. Foreign keys are NOT DEFERRABLE and coarse: while the
/// referencing table has any rows, no row of the referenced table may go.
#[derive(Debug, Default)]
pub struct MemoryRelationalDriver {
    tables: Arc<Mutex<Tables>>,
    foreign_keys: Mutex<Vec<ForeignKey>>,
    faults: Arc<Faults>,
    active_transactions: AtomicU64,
    waiting_locks: AtomicU64,
}

impl MemoryRelationalDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty table, optionally owning an id sequence
    pub fn create_table(&self, name: &str, with_sequence: bool) {
        self.tables.lock().insert(
            name.to_string(),
            Table {
                rows: 0,
                sequence: with_sequence.then_some(None),
            },
        );
    }

    /// Insert rows, advancing the owned sequence. Creates the table if needed.
    pub fn insert_rows(&self, table: &str, rows: u64) {
        let mut tables = self.tables.lock();
        let entry = tables.entry(table.to_string()).or_insert_with(|| Table {
            rows: 0,
            sequence: Some(None),
        });
        entry.rows += rows;
        if let Some(last) = entry.sequence.as_mut() {
            *last = Some(last.unwrap_or(0) + rows as i64);
        }
    }

    /// Declare that rows of `table` reference rows of `references`
    pub fn add_foreign_key(&self, table: &str, references: &str) {
        self.foreign_keys
            .lock()
            .push(ForeignKey::new(table, references));
    }

    pub fn row_count(&self, table: &str) -> Option<u64> {
        self.tables.lock().get(table).map(|t| t.rows)
    }

    pub fn total_rows(&self) -> u64 {
        self.tables.lock().values().map(|t| t.rows).sum()
    }

    /// Last issued id of the sequence owned by `table`
    pub fn sequence_value(&self, table: &str) -> Option<i64> {
        self.tables
            .lock()
            .get(table)
            .and_then(|t| t.sequence)
            .flatten()
    }

    pub fn set_waiting_locks(&self, count: u64) {
        self.waiting_locks.store(count, Ordering::SeqCst);
    }

    pub fn set_active_transactions(&self, count: u64) {
        self.active_transactions.store(count, Ordering::SeqCst);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.faults.set_unavailable(unavailable);
    }

    /// Make every operation touching `table` fail
    pub fn fail_on(&self, table: &str) {
        self.faults.fail_on(table);
    }

    pub fn clear_faults(&self) {
        self.faults.clear();
    }

    pub fn set_latency(&self, latency: Duration) {
        self.faults.set_latency(latency);
    }
}

fn sequence_name(table: &str) -> String {
    format!("{}_id_seq", table)
}

fn missing(table: &str) -> DriverError {
    DriverError::NotFound(format!("relation \"{}\" does not exist", table))
}

#[async_trait]
impl RelationalDriver for MemoryRelationalDriver {
    async fn ping(&self) -> DriverResult<()> {
        self.faults.enter().await
    }

    async fn list_tables(&self) -> DriverResult<Vec<String>> {
        self.faults.enter().await?;
        Ok(self.tables.lock().keys().cloned().collect())
    }

    async fn count_rows(&self, table: &str) -> DriverResult<u64> {
        self.faults.enter().await?;
        self.faults.check(table)?;
        self.row_count(table).ok_or_else(|| missing(table))
    }

    async fn foreign_keys(&self) -> DriverResult<Vec<ForeignKey>> {
        self.faults.enter().await?;
        Ok(self.foreign_keys.lock().clone())
    }

    async fn begin(&self) -> DriverResult<Box<dyn RelationalTransaction>> {
        self.faults.enter().await?;
        let staged = self.tables.lock().clone();
        Ok(Box::new(MemoryRelationalTransaction {
            shared: Arc::clone(&self.tables),
            faults: Arc::clone(&self.faults),
            foreign_keys: self.foreign_keys.lock().clone(),
            staged,
            savepoints: Vec::new(),
            constraints_deferred: false,
        }))
    }

    async fn vacuum(&self, table: &str) -> DriverResult<()> {
        self.faults.enter().await?;
        self.faults.check(table)
    }

    async fn sequences(&self) -> DriverResult<Vec<SequenceState>> {
        self.faults.enter().await?;
        Ok(self
            .tables
            .lock()
            .iter()
            .filter_map(|(name, table)| {
                table.sequence.map(|last_value| SequenceState {
                    name: sequence_name(name),
                    owner_table: Some(name.clone()),
                    last_value,
                })
            })
            .collect())
    }

    async fn active_transactions(&self) -> DriverResult<u64> {
        self.faults.enter().await?;
        Ok(self.active_transactions.load(Ordering::SeqCst))
    }

    async fn waiting_locks(&self) -> DriverResult<u64> {
        self.faults.enter().await?;
        Ok(self.waiting_locks.load(Ordering::SeqCst))
    }
}

pub struct MemoryRelationalTransaction {
    shared: Arc<Mutex<Tables>>,
    faults: Arc<Faults>,
    foreign_keys: Vec<ForeignKey>,
    staged: Tables,
    savepoints: Vec<(String, Tables)>,
    constraints_deferred: bool,
}

impl MemoryRelationalTransaction {
    pub fn constraints_deferred(&self) -> bool {
        self.constraints_deferred
    }

    fn table_mut(&mut self, table: &str) -> DriverResult<&mut Table> {
        self.faults.check(table)?;
        self.staged.get_mut(table).ok_or_else(|| missing(table))
    }

    /// Tables other than `table` itself that reference it
    fn referencing<'a>(&'a self, table: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.foreign_keys
            .iter()
            .filter(move |key| key.references == table && !key.is_self_reference())
            .map(|key| key.table.as_str())
    }

    fn savepoint_index(&self, name: &str) -> DriverResult<usize> {
        self.savepoints
            .iter()
            .rposition(|(saved, _)| saved == name)
            .ok_or_else(|| DriverError::Query(format!("savepoint \"{}\" does not exist", name)))
    }
}

#[async_trait]
impl RelationalTransaction for MemoryRelationalTransaction {
    async fn defer_constraints(&mut self) -> DriverResult<()> {
        self.faults.enter().await?;
        self.constraints_deferred = true;
        Ok(())
    }

    async fn restore_constraints(&mut self) -> DriverResult<()> {
        self.faults.enter().await?;
        self.constraints_deferred = false;
        Ok(())
    }

    async fn savepoint(&mut self, name: &str) -> DriverResult<()> {
        self.faults.enter().await?;
        self.savepoints.push((name.to_string(), self.staged.clone()));
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self, name: &str) -> DriverResult<()> {
        self.faults.enter().await?;
        let index = self.savepoint_index(name)?;
        self.savepoints.truncate(index + 1);
        if let Some((_, snapshot)) = self.savepoints.last() {
            self.staged = snapshot.clone();
        }
        Ok(())
    }

    async fn release_savepoint(&mut self, name: &str) -> DriverResult<()> {
        self.faults.enter().await?;
        let index = self.savepoint_index(name)?;
        self.savepoints.truncate(index);
        Ok(())
    }

    async fn count_rows(&mut self, table: &str) -> DriverResult<u64> {
        self.faults.enter().await?;
        Ok(self.table_mut(table)?.rows)
    }

    async fn truncate(&mut self, tables: &[String], identity: IdentityMode) -> DriverResult<()> {
        self.faults.enter().await?;

        // validate everything first so a bad name leaves the staged state untouched
        for table in tables {
            self.table_mut(table)?;
            let outside = self
                .referencing(table)
                .find(|child| !tables.iter().any(|t| t.as_str() == *child));
            if let Some(child) = outside {
                return Err(DriverError::Query(format!(
                    "cannot truncate a table referenced in a foreign key constraint: \"{}\" references \"{}\"",
                    child, table
                )));
            }
        }
        for table in tables {
            let entry = self.table_mut(table)?;
            entry.rows = 0;
            if identity == IdentityMode::Restart {
                if let Some(last) = entry.sequence.as_mut() {
                    *last = None;
                }
            }
        }
        Ok(())
    }

    async fn delete_batch(&mut self, table: &str, limit: u64) -> DriverResult<u64> {
        self.faults.enter().await?;
        if self.table_mut(table)?.rows > 0 {
            let blocking = self
                .referencing(table)
                .find(|child| self.staged.get(*child).map(|t| t.rows > 0).unwrap_or(false))
                .map(str::to_string);
            if let Some(child) = blocking {
                return Err(DriverError::Query(format!(
                    "delete on table \"{}\" violates foreign key constraint from \"{}\"",
                    table, child
                )));
            }
        }
        let entry = self.table_mut(table)?;
        let removed = entry.rows.min(limit);
        entry.rows -= removed;
        Ok(removed)
    }

    async fn restart_sequences(&mut self, table: &str) -> DriverResult<()> {
        self.faults.enter().await?;
        if let Some(last) = self.table_mut(table)?.sequence.as_mut() {
            *last = None;
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> DriverResult<()> {
        self.faults.enter().await?;
        let this = *self;
        *this.shared.lock() = this.staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> DriverResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_uncommitted_changes_are_invisible() {
        let driver = MemoryRelationalDriver::new();
        driver.insert_rows("users", 10);

        let mut tx = driver.begin().await.unwrap();
        tx.truncate(&["users".to_string()], IdentityMode::Restart)
            .await
            .unwrap();
        assert_eq!(tx.count_rows("users").await.unwrap(), 0);
        assert_eq!(driver.row_count("users"), Some(10));

        tx.rollback().await.unwrap();
        assert_eq!(driver.row_count("users"), Some(10));
        assert_eq!(driver.sequence_value("users"), Some(10));
    }

    #[tokio::test]
    async fn test_savepoint_rollback_restores_table() {
        let driver = MemoryRelationalDriver::new();
        driver.insert_rows("orders", 5);
        driver.insert_rows("items", 7);

        let mut tx = driver.begin().await.unwrap();
        tx.savepoint("sp_0").await.unwrap();
        tx.delete_batch("orders", 3).await.unwrap();
        tx.rollback_to_savepoint("sp_0").await.unwrap();
        tx.release_savepoint("sp_0").await.unwrap();

        tx.delete_batch("items", 100).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(driver.row_count("orders"), Some(5));
        assert_eq!(driver.row_count("items"), Some(0));
    }

    #[tokio::test]
    async fn test_truncate_with_unknown_table_changes_nothing() {
        let driver = MemoryRelationalDriver::new();
        driver.insert_rows("users", 2);

        let mut tx = driver.begin().await.unwrap();
        let outcome = tx
            .truncate(
                &["users".to_string(), "ghost".to_string()],
                IdentityMode::Continue,
            )
            .await;
        assert!(outcome.is_err());
        assert_eq!(tx.count_rows("users").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_foreign_keys_block_parent_removal() {
        let driver = MemoryRelationalDriver::new();
        driver.insert_rows("orders", 4);
        driver.insert_rows("order_items", 9);
        driver.add_foreign_key("order_items", "orders");

        let mut tx = driver.begin().await.unwrap();
        assert!(tx
            .truncate(&["orders".to_string()], IdentityMode::Continue)
            .await
            .is_err());
        assert!(tx.delete_batch("orders", 10).await.is_err());
        assert_eq!(tx.count_rows("orders").await.unwrap(), 4);

        tx.delete_batch("order_items", 10).await.unwrap();
        assert_eq!(tx.delete_batch("orders", 10).await.unwrap(), 4);
        tx.rollback().await.unwrap();

        let mut tx = driver.begin().await.unwrap();
        tx.truncate(
            &["orders".to_string(), "order_items".to_string()],
            IdentityMode::Continue,
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();
        assert_eq!(driver.total_rows(), 0);
        assert_eq!(driver.foreign_keys().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sequences_report_owner() {
        let driver = MemoryRelationalDriver::new();
        driver.create_table("audit", false);
        driver.insert_rows("users", 3);

        let sequences = driver.sequences().await.unwrap();
        assert_eq!(sequences.len(), 1);
        assert_eq!(sequences[0].name, "users_id_seq");
        assert_eq!(sequences[0].last_value, Some(3));
    }
}
