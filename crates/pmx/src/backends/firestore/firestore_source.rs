use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use serde_json::{Value as Json, json};
use tracing::{debug, trace};

use crate::backends::SourceStore;
use crate::backends::common_config::{CommonHttpConfig, build_http_client};
use crate::common::{DocumentRef, SourceRecord};
use crate::error::StoreError;

use super::values::decode_document;

// -- 🔥 Where the records live today. Every field that matters is Option so the config
// -- loader can list every missing key in one go instead of one per run.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct FirestoreSourceConfig {
    /// 📡 REST root. Point it at the emulator for local runs.
    #[serde(default = "default_url")]
    pub url: String,
    pub project_id: Option<String>,
    /// 🔒 OAuth bearer token. Minting it is somebody else's job (gcloud, a sidecar, you).
    pub access_token: Option<String>,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(flatten, default)]
    pub http: CommonHttpConfig,
}

fn default_url() -> String {
    "https://firestore.googleapis.com/v1".to_string()
}

fn default_database() -> String {
    "(default)".to_string()
}

impl Default for FirestoreSourceConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            project_id: None,
            access_token: None,
            database: default_database(),
            http: CommonHttpConfig::default(),
        }
    }
}

impl FirestoreSourceConfig {
    pub(crate) fn missing_keys(&self, prefix: &str) -> Vec<String> {
        let mut missing = Vec::new();
        if self.project_id.as_deref().is_none_or(str::is_empty) {
            missing.push(format!("{prefix}.project_id"));
        }
        if self.access_token.as_deref().is_none_or(str::is_empty) {
            missing.push(format!("{prefix}.access_token"));
        }
        missing
    }
}

/// 🔥 The Firestore REST source.
///
/// Pages are `runQuery` calls ordered by `__name__` with a `startAt {before: false}`
/// cursor, which is Firestore's way of spelling "start after". Point reads are plain GETs
/// on the document path. Nothing here retries: callers wrap us in the retry executor.
#[derive(Debug)]
pub struct FirestoreSource {
    client: reqwest::Client,
    base: Url,
    config: FirestoreSourceConfig,
    project_id: String,
    access_token: String,
}

impl FirestoreSource {
    pub fn new(config: FirestoreSourceConfig) -> Result<Self> {
        let project_id = config
            .project_id
            .clone()
            .context("💀 Firestore source needs a `project_id`. There are a lot of projects out there and we refuse to guess.")?;
        let access_token = config
            .access_token
            .clone()
            .context("💀 Firestore source needs an `access_token`. Firestore does not take requests from strangers.")?;
        let base = Url::parse(&config.url).with_context(|| {
            format!("💀 Firestore `url` '{}' is not a URL we can talk to.", config.url)
        })?;
        if base.cannot_be_a_base() {
            anyhow::bail!("💀 Firestore `url` '{}' can't carry a path.", config.url);
        }
        let client = build_http_client(&config.http)?;
        Ok(Self {
            client,
            base,
            config,
            project_id,
            access_token,
        })
    }

    /// `projects/<p>/databases/<d>/documents`, the prefix of every resource name.
    fn documents_root(&self) -> String {
        format!(
            "projects/{}/databases/{}/documents",
            self.project_id, self.config.database
        )
    }

    /// 🧭 `<url>/projects/<p>/databases/<d>/<last>` followed by `rest`, every piece its
    /// own percent-encoded segment. Document ids may carry `#`, `?` or `%`.
    fn endpoint<'a>(&self, last: &str, rest: impl IntoIterator<Item = &'a str>) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend([
                    "projects",
                    self.project_id.as_str(),
                    "databases",
                    self.config.database.as_str(),
                    last,
                ])
                .extend(rest);
        }
        url
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Option<String>, StoreError> {
        let response = request
            .header("Authorization", format!("Bearer {}", self.access_token))
            .send()
            .await
            .map_err(|e| StoreError::from_reqwest(&e))?;
        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = response
            .text()
            .await
            .map_err(|e| StoreError::from_reqwest(&e))?;

        match status {
            200..=299 => Ok(Some(body)),
            404 => Ok(None),
            429 => Err(StoreError::Throttled {
                retry_after,
                message: body,
            }),
            _ => Err(StoreError::from_status(status, body)),
        }
    }
}

#[async_trait]
impl SourceStore for FirestoreSource {
    async fn fetch_page(
        &self,
        collection: &str,
        start_after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SourceRecord>, StoreError> {
        let mut query = json!({
            "from": [{"collectionId": collection}],
            "orderBy": [{"field": {"fieldPath": "__name__"}, "direction": "ASCENDING"}],
            "limit": limit,
        });
        if let Some(after) = start_after {
            query["startAt"] = json!({
                "values": [{"referenceValue": format!("{}/{collection}/{after}", self.documents_root())}],
                "before": false,
            });
        }
        let body = json!({ "structuredQuery": query }).to_string();
        trace!(collection, start_after, limit, "📡 runQuery");

        let request = self
            .client
            .post(self.endpoint("documents:runQuery", std::iter::empty()))
            .header("Content-Type", "application/json")
            .body(body);
        let Some(text) = self.send(request).await? else {
            // -- a 404 on runQuery means the database itself is gone, not the collection
            return Err(StoreError::Rejected {
                status: 404,
                message: format!("database '{}' not found", self.documents_root()),
            });
        };

        let rows: Vec<Json> = serde_json::from_str(&text)
            .map_err(|e| StoreError::Decode(format!("runQuery response: {e}")))?;
        // -- rows without a `document` are progress markers (`readTime` only), skip them
        let records = rows
            .iter()
            .filter_map(|row| row.get("document"))
            .map(decode_document)
            .collect::<Result<Vec<_>, _>>()?;
        debug!(collection, fetched = records.len(), "🔥 fetched a page");
        Ok(records)
    }

    async fn get(&self, reference: &DocumentRef) -> Result<Option<SourceRecord>, StoreError> {
        let request = self
            .client
            .get(self.endpoint("documents", reference.path.split('/')));
        match self.send(request).await? {
            Some(text) => {
                let document: Json = serde_json::from_str(&text)
                    .map_err(|e| StoreError::Decode(format!("document {reference}: {e}")))?;
                decode_document(&document).map(Some)
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Value;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ROOT: &str = "/projects/acme/databases/(default)/documents";

    fn source_for(server: &MockServer) -> FirestoreSource {
        FirestoreSource::new(FirestoreSourceConfig {
            url: server.uri(),
            project_id: Some("acme".into()),
            access_token: Some("t0ken".into()),
            ..FirestoreSourceConfig::default()
        })
        .expect("source builds")
    }

    #[tokio::test]
    async fn the_one_where_the_cursor_becomes_a_start_at_reference() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("{ROOT}:runQuery")))
            .and(header("Authorization", "Bearer t0ken"))
            .and(body_partial_json(json!({
                "structuredQuery": {
                    "limit": 2,
                    "startAt": {
                        "values": [{"referenceValue": "projects/acme/databases/(default)/documents/users/u1"}],
                        "before": false
                    }
                }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"document": {
                    "name": "projects/acme/databases/(default)/documents/users/u2",
                    "fields": {"email": {"stringValue": "sam@example.com"}}
                }, "readTime": "2024-01-01T00:00:00Z"},
                {"readTime": "2024-01-01T00:00:00Z"}
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let page = source_for(&server)
            .fetch_page("users", Some("u1"), 2)
            .await
            .expect("page");
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, "u2");
        assert_eq!(page[0].fields["email"], Value::from("sam@example.com"));
    }

    #[tokio::test]
    async fn the_one_where_a_missing_document_is_none_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("{ROOT}/agencies/a1")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "projects/acme/databases/(default)/documents/agencies/a1",
                "fields": {"name": {"stringValue": "Acme Lettings"}}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("{ROOT}/agencies/gone")))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let source = source_for(&server);
        let found = source.get(&DocumentRef::new("agencies/a1")).await.expect("read");
        assert_eq!(found.map(|r| r.id), Some("a1".to_string()));
        let missing = source.get(&DocumentRef::new("agencies/gone")).await.expect("read");
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn the_one_where_throttling_carries_the_retry_after_hint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "3"))
            .mount(&server)
            .await;

        let err = source_for(&server)
            .fetch_page("users", None, 10)
            .await
            .expect_err("throttled");
        assert!(err.is_retryable());
        assert!(matches!(
            err,
            StoreError::Throttled { retry_after: Some(d), .. } if d == Duration::from_secs(3)
        ));
    }

    #[tokio::test]
    async fn the_one_where_a_reference_id_with_a_hash_reads_the_right_document() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("{ROOT}/users/u%231")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "projects/acme/databases/(default)/documents/users/u#1",
                "fields": {}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let found = source_for(&server)
            .get(&DocumentRef::new("users/u#1"))
            .await
            .expect("read");
        assert_eq!(found.map(|r| r.id), Some("u#1".to_string()));
    }

    #[test]
    fn the_one_where_both_credentials_are_reported_missing() {
        let missing = FirestoreSourceConfig::default().missing_keys("source.Firestore");
        assert_eq!(
            missing,
            ["source.Firestore.project_id", "source.Firestore.access_token"]
        );
    }
}
