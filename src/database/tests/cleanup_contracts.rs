//! Contract tests shared by every cleanup strategy
//!
//! All strategies run against the in-memory drivers. The live-database test at
//! the bottom only runs when `TEST_POSTGRES_URL` is set.

use cleanup_database::memory::{
    MemoryDocumentDriver, MemoryKeyValueDriver, MemoryRelationalDriver, MemoryVectorDriver,
};
use cleanup_database::{
    CleanupStrategy, DocumentCleanupStrategy, KeyValueCleanupStrategy, RelationalCleanupStrategy,
    VectorCleanupStrategy,
};
use cleanup_shared::{BackendKind, CleanupOptions};
use std::sync::Arc;

fn all_strategies() -> Vec<Arc<dyn CleanupStrategy>> {
    let relational = Arc::new(MemoryRelationalDriver::new());
    relational.insert_rows("accounts", 4);
    relational.insert_rows("ledger", 1_500);

    let document = Arc::new(MemoryDocumentDriver::new());
    document.insert_documents("test_runs", 12, false);
    document.insert_documents("sessions", 3, true);

    let key_value = Arc::new(MemoryKeyValueDriver::new());
    key_value.insert("test:cache:1");
    key_value.insert("temp:lock");

    let vector = Arc::new(MemoryVectorDriver::new());
    vector.upsert_points("knowledge_base", 20);

    vec![
        Arc::new(RelationalCleanupStrategy::new(relational)) as Arc<dyn CleanupStrategy>,
        Arc::new(DocumentCleanupStrategy::new(document)),
        Arc::new(KeyValueCleanupStrategy::new(key_value)),
        Arc::new(VectorCleanupStrategy::new(vector)),
    ]
}

#[tokio::test]
async fn test_relational_three_table_scenario() {
    let driver = Arc::new(MemoryRelationalDriver::new());
    driver.insert_rows("customers", 10);
    driver.insert_rows("orders", 20);
    driver.insert_rows("order_items", 30);
    let strategy = RelationalCleanupStrategy::new(driver.clone());

    let result = strategy.cleanup(&CleanupOptions::default()).await.unwrap();

    assert!(result.success);
    assert_eq!(result.records_removed, 60);
    assert_eq!(result.tables_affected.as_ref().map(Vec::len), Some(3));
    assert_eq!(driver.total_rows(), 0);
    println!("✅ Relational cleanup removed {} rows", result.records_removed);
}

#[tokio::test]
async fn test_cleanup_is_idempotent_for_every_backend() {
    let options = CleanupOptions::default();

    for strategy in all_strategies() {
        let first = strategy.cleanup(&options).await.unwrap();
        assert!(first.success, "{} first cleanup failed", strategy.backend());
        assert!(first.records_removed > 0);
        assert_eq!(first.database, strategy.backend());

        let second = strategy.cleanup(&options).await.unwrap();
        assert!(second.success);
        assert_eq!(
            second.records_removed,
            0,
            "{} removed data on the second pass",
            strategy.backend()
        );
    }
}

#[tokio::test]
async fn test_cleanup_then_verify_is_clean() {
    let options = CleanupOptions::default();

    for strategy in all_strategies() {
        let before = strategy.verify(&options).await.unwrap();
        assert!(!before.is_clean, "{} should start dirty", strategy.backend());

        strategy.cleanup(&options).await.unwrap();

        let after = strategy.verify(&options).await.unwrap();
        assert!(
            after.is_clean,
            "{} still dirty: {:?}",
            strategy.backend(),
            after.issues
        );
    }
}

#[tokio::test]
async fn test_reset_follows_cleanup_contract() {
    let options = CleanupOptions::default();

    for strategy in all_strategies() {
        let result = strategy.reset(&options).await.unwrap();
        assert!(result.success);
        assert!(strategy.performance_metrics().is_some());

        let health = strategy.health_snapshot().await.unwrap();
        assert_eq!(health.backend(), strategy.backend());
    }
}

#[tokio::test]
async fn test_results_route_affected_locations_by_backend() {
    let options = CleanupOptions::default();

    for strategy in all_strategies() {
        let result = strategy.cleanup(&options).await.unwrap();
        match strategy.backend() {
            BackendKind::Relational => assert!(result.tables_affected.is_some()),
            BackendKind::KeyValue => assert!(result.keys_affected.is_some()),
            BackendKind::Document | BackendKind::VectorIndex => {
                assert!(result.collections_affected.is_some())
            }
        }
    }
}

#[cfg(feature = "postgres")]
#[tokio::test]
async fn test_postgres_driver_against_live_database() {
    use cleanup_database::{PostgresDriver, RelationalDriver};

    let Ok(url) = std::env::var("TEST_POSTGRES_URL") else {
        println!("⏭️  TEST_POSTGRES_URL not set, skipping live PostgreSQL test");
        return;
    };

    match PostgresDriver::connect(&url, 2).await {
        Ok(driver) => {
            let tables = driver.list_tables().await.unwrap();
            println!("✅ Connected to PostgreSQL, {} tables visible", tables.len());

            let strategy = RelationalCleanupStrategy::new(Arc::new(driver));
            let verification = strategy.verify(&CleanupOptions::default()).await.unwrap();
            println!(
                "✅ Verification finished: clean={} issues={}",
                verification.is_clean,
                verification.issues.len()
            );
        }
        Err(e) => {
            println!("❌ Could not connect to PostgreSQL: {}", e);
        }
    }
}
