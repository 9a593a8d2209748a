//! Qdrant driver over the REST API

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode, Url};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use super::{DriverError, DriverResult, PointId, ScrollPage, VectorCollectionInfo, VectorDriver};

/// Every Qdrant response wraps its payload in `result`
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    result: T,
}

#[derive(Debug, Deserialize)]
struct CollectionList {
    collections: Vec<CollectionName>,
}

#[derive(Debug, Deserialize)]
struct CollectionName {
    name: String,
}

#[derive(Debug, Deserialize)]
struct CollectionDescription {
    status: String,
    #[serde(default)]
    points_count: Option<u64>,
    #[serde(default)]
    config: Value,
}

#[derive(Debug, Deserialize)]
struct ScrollResult {
    points: Vec<ScrolledPoint>,
    #[serde(default)]
    next_page_offset: Option<PointId>,
}

#[derive(Debug, Deserialize)]
struct ScrolledPoint {
    id: PointId,
}

#[derive(Clone)]
pub struct QdrantDriver {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
}

impl QdrantDriver {
    pub fn new(base_url: &str) -> DriverResult<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Self::with_client(client, base_url)
    }

    pub fn with_client(client: Client, base_url: &str) -> DriverResult<Self> {
        let base_url = Url::parse(base_url).map_err(|e| {
            DriverError::Connection(format!("invalid Qdrant URL '{}': {}", base_url, e))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(DriverError::Connection(format!(
                "Qdrant URL '{}' cannot carry a path",
                base_url
            )));
        }

        Ok(Self {
            client,
            base_url,
            api_key: None,
        })
    }

    pub fn with_api_key<S: Into<String>>(mut self, api_key: S) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Base URL extended by `segments`, each percent-encoded as one path segment
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn request(&self, method: Method, segments: &[&str]) -> RequestBuilder {
        let request = self.client.request(method, self.endpoint(segments));
        match &self.api_key {
            Some(key) => request.header("api-key", key),
            None => request,
        }
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> DriverResult<T> {
        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            let body = response.text().await.unwrap_or_default();
            return Err(DriverError::NotFound(body));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DriverError::Query(format!("HTTP {}: {}", status, body)));
        }

        let envelope: Envelope<T> = response.json().await?;
        Ok(envelope.result)
    }
}

/// Vector dimension from a collection config; named vectors report the largest
fn vector_size(config: &Value) -> u64 {
    let vectors = &config["params"]["vectors"];
    if let Some(size) = vectors.get("size").and_then(Value::as_u64) {
        return size;
    }

    vectors
        .as_object()
        .map(|named| {
            named
                .values()
                .filter_map(|v| v.get("size").and_then(Value::as_u64))
                .max()
                .unwrap_or(0)
        })
        .unwrap_or(0)
}

#[async_trait]
impl VectorDriver for QdrantDriver {
    async fn ping(&self) -> DriverResult<()> {
        let response = self.request(Method::GET, &["healthz"]).send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(DriverError::Connection(format!(
                "Qdrant health check returned {}",
                response.status()
            )))
        }
    }

    async fn list_collections(&self) -> DriverResult<Vec<String>> {
        let list: CollectionList = self.send(self.request(Method::GET, &["collections"])).await?;
        let mut names: Vec<String> = list.collections.into_iter().map(|c| c.name).collect();
        names.sort();
        Ok(names)
    }

    async fn collection_info(&self, collection: &str) -> DriverResult<VectorCollectionInfo> {
        let description: CollectionDescription = self
            .send(self.request(Method::GET, &["collections", collection]))
            .await?;

        Ok(VectorCollectionInfo {
            points_count: description.points_count.unwrap_or(0),
            vector_size: vector_size(&description.config),
            status: description.status,
        })
    }

    async fn scroll(
        &self,
        collection: &str,
        limit: u64,
        offset: Option<PointId>,
    ) -> DriverResult<ScrollPage> {
        let mut body = json!({
            "limit": limit,
            "with_payload": false,
            "with_vector": false,
        });
        if let Some(offset) = offset {
            body["offset"] = json!(offset);
        }

        let page: ScrollResult = self
            .send(
                self.request(Method::POST, &["collections", collection, "points", "scroll"])
                    .json(&body),
            )
            .await?;

        Ok(ScrollPage {
            ids: page.points.into_iter().map(|p| p.id).collect(),
            next_offset: page.next_page_offset,
        })
    }

    async fn delete_points(&self, collection: &str, ids: &[PointId]) -> DriverResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let _: Value = self
            .send(
                self.request(Method::POST, &["collections", collection, "points", "delete"])
                    .query(&[("wait", "true")])
                    .json(&json!({ "points": ids })),
            )
            .await?;

        debug!("Deleted {} points from {}", ids.len(), collection);
        Ok(ids.len() as u64)
    }

    async fn delete_collection(&self, collection: &str) -> DriverResult<()> {
        let outcome: DriverResult<bool> = self
            .send(self.request(Method::DELETE, &["collections", collection]))
            .await;

        match outcome {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_size_single_and_named() {
        let single = json!({ "params": { "vectors": { "size": 1536, "distance": "Cosine" } } });
        assert_eq!(vector_size(&single), 1536);

        let named = json!({ "params": { "vectors": {
            "text": { "size": 768, "distance": "Cosine" },
            "image": { "size": 4096, "distance": "Dot" }
        } } });
        assert_eq!(vector_size(&named), 4096);

        assert_eq!(vector_size(&Value::Null), 0);
    }

    #[test]
    fn test_scroll_result_parses_mixed_ids() {
        let parsed: Envelope<ScrollResult> = serde_json::from_value(json!({
            "result": {
                "points": [{ "id": 1 }, { "id": "5c56c793-69f3-4fbf-87e6-c4bf54c28c26" }],
                "next_page_offset": 3
            },
            "status": "ok"
        }))
        .unwrap();

        assert_eq!(parsed.result.points.len(), 2);
        assert_eq!(parsed.result.next_page_offset, Some(PointId::Num(3)));
    }

    #[test]
    fn test_endpoint_encodes_collection_names() {
        let driver = QdrantDriver::with_client(Client::new(), "http://localhost:6333/").unwrap();
        assert_eq!(
            driver.endpoint(&["collections", "test_embeddings"]).as_str(),
            "http://localhost:6333/collections/test_embeddings"
        );
        assert_eq!(
            driver
                .endpoint(&["collections", "tmp/run 7?x#y", "points", "scroll"])
                .as_str(),
            "http://localhost:6333/collections/tmp%2Frun%207%3Fx%23y/points/scroll"
        );
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let driver = QdrantDriver::with_client(Client::new(), "https://proxy.local/qdrant/").unwrap();
        assert_eq!(
            driver.endpoint(&["healthz"]).as_str(),
            "https://proxy.local/qdrant/healthz"
        );
        assert!(QdrantDriver::with_client(Client::new(), "not a url").is_err());
    }
}
