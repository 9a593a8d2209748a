//! MongoDB driver

use async_trait::async_trait;
use futures::stream::TryStreamExt;
use mongodb::{
    bson::{doc, Bson, Document},
    error::ErrorKind,
    options::{ClientOptions, FindOptions},
    Client, Collection, Database,
};
use std::time::Duration;
use tracing::{debug, info};

use super::{CollectionStats, DocumentDriver, DocumentFilter, DocumentServerStatus, DriverResult};

/// Server error code for a namespace that does not exist
const NAMESPACE_NOT_FOUND: i32 = 26;

/// Fields that mark a document as test data
pub const TEST_MARKER_FIELDS: [&str; 3] = ["_test", "is_test", "test_run_id"];

/// Document driver for one MongoDB database
#[derive(Clone)]
pub struct MongoDriver {
    client: Client,
    database: Database,
}

impl MongoDriver {
    pub fn new(client: Client, database: &str) -> Self {
        let database = client.database(database);
        Self { client, database }
    }

    pub async fn connect(url: &str, database: &str, max_pool_size: u32) -> DriverResult<Self> {
        info!("Connecting to MongoDB database '{}'", database);

        let mut options = ClientOptions::parse(url).await?;
        options.max_pool_size = Some(max_pool_size.max(1));
        options.connect_timeout = Some(Duration::from_secs(10));
        options.server_selection_timeout = Some(Duration::from_secs(10));

        let client = Client::with_options(options)?;
        Ok(Self::new(client, database))
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    fn collection(&self, name: &str) -> Collection<Document> {
        self.database.collection::<Document>(name)
    }
}

fn filter_document(filter: DocumentFilter) -> Document {
    match filter {
        DocumentFilter::All => doc! {},
        DocumentFilter::TestMarked => doc! {
            "$or": [
                { "_test": true },
                { "is_test": true },
                { "test_run_id": { "$exists": true } },
            ]
        },
    }
}

/// Read a numeric field regardless of the BSON width the server chose
fn bson_u64(document: &Document, key: &str) -> u64 {
    match document.get(key) {
        Some(Bson::Int32(v)) => (*v).max(0) as u64,
        Some(Bson::Int64(v)) => (*v).max(0) as u64,
        Some(Bson::Double(v)) if *v > 0.0 => *v as u64,
        _ => 0,
    }
}

#[async_trait]
impl DocumentDriver for MongoDriver {
    async fn ping(&self) -> DriverResult<()> {
        self.database.run_command(doc! { "ping": 1 }, None).await?;
        Ok(())
    }

    async fn list_collections(&self) -> DriverResult<Vec<String>> {
        let mut names: Vec<String> = self
            .database
            .list_collection_names(None)
            .await?
            .into_iter()
            .filter(|name| !name.starts_with("system."))
            .collect();
        names.sort();
        Ok(names)
    }

    async fn count_documents(&self, collection: &str, filter: DocumentFilter) -> DriverResult<u64> {
        let count = self
            .collection(collection)
            .count_documents(filter_document(filter), None)
            .await?;
        Ok(count)
    }

    async fn delete_documents(
        &self,
        collection: &str,
        filter: DocumentFilter,
        limit: Option<u64>,
    ) -> DriverResult<u64> {
        let target = self.collection(collection);

        let Some(limit) = limit else {
            let outcome = target.delete_many(filter_document(filter), None).await?;
            return Ok(outcome.deleted_count);
        };

        // delete_many has no limit; select one batch of ids first
        let options = FindOptions::builder()
            .limit(limit.min(i64::MAX as u64) as i64)
            .projection(doc! { "_id": 1 })
            .build();
        let batch: Vec<Document> = target
            .find(filter_document(filter), options)
            .await?
            .try_collect()
            .await?;

        let ids: Vec<Bson> = batch
            .iter()
            .filter_map(|document| document.get("_id").cloned())
            .collect();
        if ids.is_empty() {
            return Ok(0);
        }

        let outcome = target
            .delete_many(doc! { "_id": { "$in": ids } }, None)
            .await?;
        debug!(
            "Deleted batch of {} documents from {}",
            outcome.deleted_count, collection
        );
        Ok(outcome.deleted_count)
    }

    async fn drop_collection(&self, collection: &str) -> DriverResult<()> {
        match self.collection(collection).drop(None).await {
            Ok(()) => Ok(()),
            Err(e) => match e.kind.as_ref() {
                ErrorKind::Command(command) if command.code == NAMESPACE_NOT_FOUND => Ok(()),
                _ => Err(e.into()),
            },
        }
    }

    async fn collection_stats(&self, collection: &str) -> DriverResult<CollectionStats> {
        let stats = self
            .database
            .run_command(doc! { "collStats": collection }, None)
            .await?;

        Ok(CollectionStats {
            documents: bson_u64(&stats, "count"),
            size_bytes: bson_u64(&stats, "size"),
            index_count: bson_u64(&stats, "nindexes"),
        })
    }

    async fn server_status(&self) -> DriverResult<DocumentServerStatus> {
        let admin = self.client.database("admin");

        let current = admin
            .run_command(doc! { "currentOp": 1, "active": true }, None)
            .await?;
        let active_operations = current
            .get_array("inprog")
            .map(|ops| ops.len() as u64)
            .unwrap_or(0);

        let status = admin.run_command(doc! { "serverStatus": 1 }, None).await?;
        let current_connections = status
            .get_document("connections")
            .map(|connections| bson_u64(connections, "current"))
            .unwrap_or(0);

        Ok(DocumentServerStatus {
            active_operations,
            current_connections,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marked_filter_covers_all_marker_fields() {
        let filter = filter_document(DocumentFilter::TestMarked);
        let clauses = filter.get_array("$or").unwrap();
        assert_eq!(clauses.len(), TEST_MARKER_FIELDS.len());
        assert!(filter_document(DocumentFilter::All).is_empty());
    }

    #[test]
    fn test_bson_u64_handles_numeric_widths() {
        let stats = doc! { "count": 12_i32, "size": 4096_i64, "avg": 2.5_f64, "neg": -3_i32 };
        assert_eq!(bson_u64(&stats, "count"), 12);
        assert_eq!(bson_u64(&stats, "size"), 4096);
        assert_eq!(bson_u64(&stats, "avg"), 2);
        assert_eq!(bson_u64(&stats, "neg"), 0);
        assert_eq!(bson_u64(&stats, "missing"), 0);
    }
}
