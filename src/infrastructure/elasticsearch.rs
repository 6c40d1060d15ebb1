//! Elasticsearch client over its HTTP REST API.

use crate::domain::counter::CounterResult;
use crate::domain::errors::SinkError;
use crate::domain::ports::{SearchClient, SearchConnector};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use url::Url;

/// Connection settings shared by every client the connector builds.
#[derive(Debug, Clone)]
pub struct ElasticsearchSettings {
    pub endpoint: Url,
    pub index: String,
    pub timeout: Option<Duration>,
}

impl ElasticsearchSettings {
    pub fn new(endpoint: &str, index: &str, timeout: Option<Duration>) -> Result<Self, SinkError> {
        let mut endpoint = Url::parse(endpoint)
            .map_err(|e| SinkError::Transport(format!("invalid endpoint '{}': {}", endpoint, e)))?;
        // Relative joins replace the last path segment unless it ends in '/'
        if !endpoint.path().ends_with('/') {
            let path = format!("{}/", endpoint.path());
            endpoint.set_path(&path);
        }
        Ok(Self {
            endpoint,
            index: index.to_lowercase(),
            timeout,
        })
    }
}

pub struct ElasticsearchConnector {
    settings: ElasticsearchSettings,
}

impl ElasticsearchConnector {
    pub fn new(settings: ElasticsearchSettings) -> Self {
        Self { settings }
    }
}

impl SearchConnector for ElasticsearchConnector {
    fn connect(&self) -> Result<Box<dyn SearchClient>, SinkError> {
        let mut builder = Client::builder();
        if let Some(timeout) = self.settings.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|e| SinkError::Transport(format!("failed to build HTTP client: {}", e)))?;

        Ok(Box::new(ElasticsearchClient {
            http,
            settings: self.settings.clone(),
        }))
    }
}

pub struct ElasticsearchClient {
    http: Client,
    settings: ElasticsearchSettings,
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    errors: bool,
    #[serde(default)]
    items: Vec<serde_json::Value>,
}

impl ElasticsearchClient {
    fn url(&self, path: &str) -> Result<Url, SinkError> {
        self.settings
            .endpoint
            .join(path)
            .map_err(|e| SinkError::Transport(format!("invalid URL path '{}': {}", path, e)))
    }

    fn index_url(&self) -> Result<Url, SinkError> {
        self.url(&self.settings.index)
    }
}

fn transport(e: reqwest::Error) -> SinkError {
    SinkError::Transport(e.to_string())
}

/// Mapping with `timestamp` as the time field.
pub fn index_mapping() -> serde_json::Value {
    json!({
        "mappings": {
            "_meta": { "time_field": "timestamp" },
            "properties": {
                "timestamp": { "type": "date" },
                "host": { "type": "keyword" },
                "counter": { "type": "keyword" },
                "instance": { "type": "keyword" },
                "value": { "type": "long" }
            }
        }
    })
}

/// NDJSON body for `_bulk`: one action line and one document per result.
pub fn bulk_body(index: &str, results: &[CounterResult]) -> Result<String, SinkError> {
    let action = json!({ "index": { "_index": index } }).to_string();
    let mut body = String::new();
    for result in results {
        let doc = serde_json::to_string(result)
            .map_err(|e| SinkError::Transport(format!("failed to serialize result: {}", e)))?;
        body.push_str(&action);
        body.push('\n');
        body.push_str(&doc);
        body.push('\n');
    }
    Ok(body)
}

/// First error reason and failed item count from a bulk response.
fn bulk_failures(items: &[serde_json::Value]) -> (usize, String) {
    let failed: Vec<&serde_json::Value> = items
        .iter()
        .filter_map(|item| item.as_object()?.values().next())
        .filter(|op| op.get("error").is_some())
        .collect();
    let reason = failed
        .first()
        .and_then(|op| op.get("error"))
        .map(|err| {
            err.get("reason")
                .and_then(|r| r.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| err.to_string())
        })
        .unwrap_or_else(|| "unknown bulk error".to_string());
    (failed.len(), reason)
}

#[async_trait]
impl SearchClient for ElasticsearchClient {
    async fn collection_exists(&self) -> Result<bool, SinkError> {
        let resp = self
            .http
            .head(self.index_url()?)
            .send()
            .await
            .map_err(transport)?;

        match resp.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(SinkError::Transport(format!(
                "index check returned {}",
                status
            ))),
        }
    }

    async fn create_collection(&self) -> Result<(), SinkError> {
        let resp = self
            .http
            .put(self.index_url()?)
            .json(&index_mapping())
            .send()
            .await
            .map_err(transport)?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(SinkError::Transport(format!(
                "index creation returned {}: {}",
                status, text
            )));
        }
        Ok(())
    }

    async fn bulk_index(&self, results: &[CounterResult]) -> Result<(), SinkError> {
        let body = bulk_body(&self.settings.index, results)?;
        let resp = self
            .http
            .post(self.url("_bulk")?)
            .header("Content-Type", "application/x-ndjson")
            .body(body)
            .send()
            .await
            .map_err(transport)?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(SinkError::Transport(format!(
                "bulk request returned {}: {}",
                status, text
            )));
        }

        let bulk: BulkResponse = resp.json().await.map_err(transport)?;
        if bulk.errors {
            let (failed, reason) = bulk_failures(&bulk.items);
            return Err(SinkError::PartialWrite {
                failed,
                total: results.len(),
                reason,
            });
        }
        Ok(())
    }

    fn collection(&self) -> &str {
        &self.settings.index
    }
}
