//! PostgreSQL driver built on a `sqlx` connection pool

use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool, Postgres, Transaction};
use std::time::Duration;
use tracing::{debug, info};

use super::{
    DriverResult, ForeignKey, IdentityMode, RelationalDriver, RelationalTransaction,
    SequenceState,
};

const OWNED_SEQUENCES_SQL: &str = r#"
    SELECT seq.relname::text
    FROM pg_class seq
    JOIN pg_depend dep
      ON dep.objid = seq.oid
     AND dep.classid = 'pg_class'::regclass
     AND dep.deptype IN ('a', 'i')
    JOIN pg_class tbl ON tbl.oid = dep.refobjid
    JOIN pg_namespace ns ON ns.oid = tbl.relnamespace
    WHERE seq.relkind = 'S' AND ns.nspname = $1 AND tbl.relname = $2
"#;

const SEQUENCE_STATE_SQL: &str = r#"
    SELECT s.sequencename::text, tbl.relname::text, s.last_value
    FROM pg_sequences s
    JOIN pg_namespace ns ON ns.nspname = s.schemaname
    JOIN pg_class seq ON seq.relname = s.sequencename AND seq.relnamespace = ns.oid
    LEFT JOIN pg_depend dep
      ON dep.objid = seq.oid
     AND dep.classid = 'pg_class'::regclass
     AND dep.deptype IN ('a', 'i')
    LEFT JOIN pg_class tbl ON tbl.oid = dep.refobjid
    WHERE s.schemaname = $1
    ORDER BY s.sequencename
"#;

const FOREIGN_KEYS_SQL: &str = r#"
    SELECT DISTINCT child.relname::text, parent.relname::text
    FROM pg_constraint con
    JOIN pg_class child ON child.oid = con.conrelid
    JOIN pg_class parent ON parent.oid = con.confrelid
    JOIN pg_namespace ns ON ns.oid = parent.relnamespace
    WHERE con.contype = 'f' AND ns.nspname = $1
    ORDER BY 1, 2
"#;

/// Relational driver for one schema of a PostgreSQL database
#[derive(Clone)]
pub struct PostgresDriver {
    pool: PgPool,
    schema: String,
}

impl PostgresDriver {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            schema: "public".to_string(),
        }
    }

    pub fn with_schema<S: Into<String>>(mut self, schema: S) -> Self {
        self.schema = schema.into();
        self
    }

    /// Build a pool sized for a cleanup run and wrap it
    pub async fn connect(url: &str, max_connections: u32) -> DriverResult<Self> {
        info!("Connecting to PostgreSQL (pool size {})", max_connections);

        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(Duration::from_secs(10))
            .connect(url)
            .await?;

        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn qualified(&self, table: &str) -> String {
        qualified_name(&self.schema, table)
    }
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn qualified_name(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

/// Referencing tables outside `tables` make the statement fail; it never cascades
fn truncate_sql(schema: &str, tables: &[String], identity: IdentityMode) -> String {
    let targets = tables
        .iter()
        .map(|t| qualified_name(schema, t))
        .collect::<Vec<_>>()
        .join(", ");
    let identity = match identity {
        IdentityMode::Restart => "RESTART IDENTITY",
        IdentityMode::Continue => "CONTINUE IDENTITY",
    };
    format!("TRUNCATE TABLE {} {}", targets, identity)
}

fn non_negative(value: i64) -> u64 {
    value.max(0) as u64
}

#[async_trait]
impl RelationalDriver for PostgresDriver {
    async fn ping(&self) -> DriverResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn list_tables(&self) -> DriverResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT tablename::text FROM pg_catalog.pg_tables WHERE schemaname = $1 ORDER BY tablename",
        )
        .bind(&self.schema)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(table,)| table).collect())
    }

    async fn count_rows(&self, table: &str) -> DriverResult<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.qualified(table));
        let (count,): (i64,) = sqlx::query_as(&sql).fetch_one(&self.pool).await?;
        Ok(non_negative(count))
    }

    async fn foreign_keys(&self) -> DriverResult<Vec<ForeignKey>> {
        let rows: Vec<(String, String)> = sqlx::query_as(FOREIGN_KEYS_SQL)
            .bind(&self.schema)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(table, references)| ForeignKey { table, references })
            .collect())
    }

    async fn begin(&self) -> DriverResult<Box<dyn RelationalTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PostgresTransaction {
            tx,
            schema: self.schema.clone(),
        }))
    }

    async fn vacuum(&self, table: &str) -> DriverResult<()> {
        let sql = format!("VACUUM ANALYZE {}", self.qualified(table));
        sqlx::query(&sql).execute(&self.pool).await?;
        debug!("Vacuumed {}", table);
        Ok(())
    }

    async fn sequences(&self) -> DriverResult<Vec<SequenceState>> {
        let rows: Vec<(String, Option<String>, Option<i64>)> = sqlx::query_as(SEQUENCE_STATE_SQL)
            .bind(&self.schema)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(name, owner_table, last_value)| SequenceState {
                name,
                owner_table,
                last_value,
            })
            .collect())
    }

    async fn active_transactions(&self) -> DriverResult<u64> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM pg_stat_activity
            WHERE datname = current_database()
              AND pid <> pg_backend_pid()
              AND state IN ('active', 'idle in transaction')
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(non_negative(count))
    }

    async fn waiting_locks(&self) -> DriverResult<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM pg_locks WHERE NOT granted")
            .fetch_one(&self.pool)
            .await?;
        Ok(non_negative(count))
    }
}

pub struct PostgresTransaction {
    tx: Transaction<'static, Postgres>,
    schema: String,
}

impl PostgresTransaction {
    async fn execute(&mut self, sql: &str) -> DriverResult<u64> {
        let done = sqlx::query(sql).execute(&mut *self.tx).await?;
        Ok(done.rows_affected())
    }
}

#[async_trait]
impl RelationalTransaction for PostgresTransaction {
    async fn defer_constraints(&mut self) -> DriverResult<()> {
        self.execute("SET CONSTRAINTS ALL DEFERRED").await?;
        Ok(())
    }

    async fn restore_constraints(&mut self) -> DriverResult<()> {
        self.execute("SET CONSTRAINTS ALL IMMEDIATE").await?;
        Ok(())
    }

    async fn savepoint(&mut self, name: &str) -> DriverResult<()> {
        self.execute(&format!("SAVEPOINT {}", quote_ident(name))).await?;
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self, name: &str) -> DriverResult<()> {
        self.execute(&format!("ROLLBACK TO SAVEPOINT {}", quote_ident(name)))
            .await?;
        Ok(())
    }

    async fn release_savepoint(&mut self, name: &str) -> DriverResult<()> {
        self.execute(&format!("RELEASE SAVEPOINT {}", quote_ident(name)))
            .await?;
        Ok(())
    }

    async fn count_rows(&mut self, table: &str) -> DriverResult<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", qualified_name(&self.schema, table));
        let (count,): (i64,) = sqlx::query_as(&sql).fetch_one(&mut *self.tx).await?;
        Ok(non_negative(count))
    }

    async fn truncate(&mut self, tables: &[String], identity: IdentityMode) -> DriverResult<()> {
        if tables.is_empty() {
            return Ok(());
        }
        let sql = truncate_sql(&self.schema, tables, identity);
        self.execute(&sql).await?;
        Ok(())
    }

    async fn delete_batch(&mut self, table: &str, limit: u64) -> DriverResult<u64> {
        let target = qualified_name(&self.schema, table);
        let sql = format!(
            "DELETE FROM {0} WHERE ctid IN (SELECT ctid FROM {0} LIMIT $1)",
            target
        );
        let done = sqlx::query(&sql)
            .bind(limit.min(i64::MAX as u64) as i64)
            .execute(&mut *self.tx)
            .await?;
        Ok(done.rows_affected())
    }

    async fn restart_sequences(&mut self, table: &str) -> DriverResult<()> {
        let sequences: Vec<(String,)> = sqlx::query_as(OWNED_SEQUENCES_SQL)
            .bind(&self.schema)
            .bind(table)
            .fetch_all(&mut *self.tx)
            .await?;

        for (sequence,) in sequences {
            let sql = format!(
                "ALTER SEQUENCE {} RESTART",
                qualified_name(&self.schema, &sequence)
            );
            self.execute(&sql).await?;
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> DriverResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> DriverResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifiers_are_quoted() {
        assert_eq!(quote_ident("users"), "\"users\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(qualified_name("public", "orders"), "\"public\".\"orders\"");
    }

    #[test]
    fn test_truncate_lists_every_table_without_cascade() {
        let sql = truncate_sql(
            "public",
            &["order_items".to_string(), "orders".to_string()],
            IdentityMode::Restart,
        );
        assert_eq!(
            sql,
            "TRUNCATE TABLE \"public\".\"order_items\", \"public\".\"orders\" RESTART IDENTITY"
        );
        assert!(!sql.contains("CASCADE"));
    }

    #[test]
    fn test_negative_counts_clamp_to_zero() {
        assert_eq!(non_negative(-1), 0);
        assert_eq!(non_negative(42), 42);
    }
}
