use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use reqwest::Url;
use serde_json::{Map, Value as Json};
use tracing::{debug, trace};

use crate::backends::common_config::{CommonHttpConfig, build_http_client};
use crate::backends::{BulkWriteOutcome, TargetStore, WriteResult};
use crate::error::StoreError;
use crate::transforms::TransformedRecord;

//
// ⚠️ `database` has no default on purpose. Writing a production migration into whatever
// database happened to be the default is how post-mortems get written.
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct GatewayTargetConfig {
    /// 📡 Base URL of the document gateway.
    pub url: Option<String>,
    /// 🔒 Sent as `Authorization: ApiKey <key>`, same velvet rope as everywhere else.
    pub api_key: Option<String>,
    pub database: Option<String>,
    #[serde(flatten, default)]
    pub http: CommonHttpConfig,
}

impl GatewayTargetConfig {
    pub(crate) fn missing_keys(&self, prefix: &str) -> Vec<String> {
        [
            ("url", &self.url),
            ("api_key", &self.api_key),
            ("database", &self.database),
        ]
        .into_iter()
        .filter(|(_, value)| value.as_deref().is_none_or(str::is_empty))
        .map(|(key, _)| format!("{prefix}.{key}"))
        .collect()
    }
}

/// 📦 One operation of a batch request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchOperation<'a> {
    operation_type: &'static str,
    id: &'a str,
    partition_key: &'a str,
    resource_body: &'a Map<String, Json>,
}

/// 📬 One slot of the batch response, aligned with the request by position.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OperationResult {
    status_code: u16,
    #[serde(default)]
    request_charge: Option<f64>,
    #[serde(default)]
    message: Option<String>,
}

/// 📡 The partitioned document store, reached through its HTTP gateway.
///
/// A bulk write is one POST carrying an array of `Upsert` operations; the gateway answers
/// with one status per operation, in order, plus the request charge (cost units) in the
/// `x-ms-request-charge` header. Upserts make every write idempotent, which is what lets
/// the importer re-run a collection and the calibrator write real records as samples.
///
/// 🔄 This type does not retry. Retries are the importer's job.
#[derive(Debug)]
pub struct GatewayTarget {
    client: reqwest::Client,
    base: Url,
    api_key: String,
    database: String,
}

impl GatewayTarget {
    pub fn new(config: GatewayTargetConfig) -> Result<Self> {
        let url = config
            .url
            .context("💀 Gateway target needs a `url`. The documents have to be sent somewhere.")?;
        let api_key = config
            .api_key
            .context("💀 Gateway target needs an `api_key`. The bouncer will not wave us through.")?;
        let database = config
            .database
            .context("💀 Gateway target needs a `database`. We will not pick one for you.")?;
        let base = Url::parse(&url)
            .with_context(|| format!("💀 Gateway `url` '{url}' is not a URL we can talk to."))?;
        if base.cannot_be_a_base() {
            anyhow::bail!("💀 Gateway `url` '{url}' can't carry a path. Try something like https://host/.");
        }
        Ok(Self {
            client: build_http_client(&config.http)?,
            base,
            api_key,
            database,
        })
    }

    /// 🧭 `<base>/dbs/<db>/colls/<collection>/docs[/<id>]`, one percent-encoded segment each.
    /// Ids are the store's, not ours: `u#1` is a legal id and must not become a fragment.
    fn docs_url(&self, collection: &str, id: Option<&str>) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["dbs", self.database.as_str(), "colls", collection, "docs"]);
            if let Some(id) = id {
                segments.push(id);
            }
        }
        url
    }
}

fn header_str<'a>(response: &'a reqwest::Response, name: &str) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

fn status_error(status: u16, retry_after: Option<Duration>, body: String) -> StoreError {
    match status {
        429 => StoreError::Throttled {
            retry_after,
            message: body,
        },
        _ => StoreError::from_status(status, body),
    }
}

fn parse_retry_after(response: &reqwest::Response) -> Option<Duration> {
    // -- the gateway speaks milliseconds; plain HTTP speaks seconds. Take either.
    if let Some(ms) = header_str(response, "x-ms-retry-after-ms").and_then(|v| v.parse::<u64>().ok()) {
        return Some(Duration::from_millis(ms));
    }
    header_str(response, "retry-after")
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[async_trait]
impl TargetStore for GatewayTarget {
    async fn bulk_upsert(
        &self,
        collection: &str,
        records: &[TransformedRecord],
    ) -> Result<BulkWriteOutcome, StoreError> {
        let operations: Vec<BatchOperation<'_>> = records
            .iter()
            .map(|record| BatchOperation {
                operation_type: "Upsert",
                id: &record.id,
                partition_key: &record.partition_key,
                resource_body: &record.document,
            })
            .collect();
        let body = serde_json::to_string(&operations)
            .map_err(|e| StoreError::Decode(format!("rendering batch: {e}")))?;
        trace!(collection, operations = records.len(), bytes = body.len(), "📡 batch request");

        let response = self
            .client
            .post(self.docs_url(collection, None))
            .header("Authorization", format!("ApiKey {}", self.api_key))
            .header("Content-Type", "application/json")
            .header("x-ms-cosmos-is-batch-request", "True")
            .body(body)
            .send()
            .await
            .map_err(|e| StoreError::from_reqwest(&e))?;

        let status = response.status().as_u16();
        let retry_after = parse_retry_after(&response);
        let header_charge = header_str(&response, "x-ms-request-charge").and_then(|v| v.parse::<f64>().ok());
        let text = response
            .text()
            .await
            .map_err(|e| StoreError::from_reqwest(&e))?;
        if !(200..300).contains(&status) {
            return Err(status_error(status, retry_after, text));
        }

        let slots: Vec<OperationResult> = serde_json::from_str(&text)
            .map_err(|e| StoreError::Decode(format!("batch response: {e}")))?;

        // -- slots beyond the request are ignored; records beyond the slots are left out
        // -- of `results`, and the importer fails whatever has no answer
        let results = records
            .iter()
            .zip(&slots)
            .map(|(record, slot)| match slot.status_code {
                200..=299 => WriteResult::ok(&record.id),
                code => WriteResult::failed(
                    &record.id,
                    format!(
                        "status {code}: {}",
                        slot.message.as_deref().unwrap_or("rejected by the store")
                    ),
                ),
            })
            .collect::<Vec<_>>();

        let summed: Option<f64> = slots
            .iter()
            .filter_map(|slot| slot.request_charge)
            .fold(None, |acc, charge| Some(acc.unwrap_or(0.0) + charge));
        let request_charge = header_charge.or(summed);
        debug!(
            collection,
            written = results.iter().filter(|r| r.error.is_none()).count(),
            rejected = results.iter().filter(|r| r.error.is_some()).count(),
            request_charge,
            "📦 batch answered"
        );

        Ok(BulkWriteOutcome {
            results,
            request_charge,
        })
    }

    async fn read(
        &self,
        collection: &str,
        id: &str,
        partition_key: &str,
    ) -> Result<Option<Json>, StoreError> {
        let partition_header = serde_json::to_string(&[partition_key])
            .map_err(|e| StoreError::Decode(e.to_string()))?;
        let response = self
            .client
            .get(self.docs_url(collection, Some(id)))
            .header("Authorization", format!("ApiKey {}", self.api_key))
            .header("x-ms-documentdb-partitionkey", partition_header)
            .send()
            .await
            .map_err(|e| StoreError::from_reqwest(&e))?;

        let status = response.status().as_u16();
        let retry_after = parse_retry_after(&response);
        let text = response
            .text()
            .await
            .map_err(|e| StoreError::from_reqwest(&e))?;
        match status {
            200..=299 => serde_json::from_str(&text)
                .map(Some)
                .map_err(|e| StoreError::Decode(format!("document {collection}/{id}: {e}"))),
            404 => Ok(None),
            _ => Err(status_error(status, retry_after, text)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn target_for(server: &MockServer) -> GatewayTarget {
        GatewayTarget::new(GatewayTargetConfig {
            url: Some(server.uri()),
            api_key: Some("k3y".into()),
            database: Some("lettings".into()),
            http: CommonHttpConfig::default(),
        })
        .expect("target builds")
    }

    fn record(id: &str) -> TransformedRecord {
        let mut document = Map::new();
        document.insert("id".into(), json!(id));
        TransformedRecord {
            id: id.to_string(),
            target_collection: "users".to_string(),
            partition_key: "a1".to_string(),
            document,
        }
    }

    #[tokio::test]
    async fn the_one_where_a_batch_goes_out_as_upserts_and_comes_back_per_record() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/dbs/lettings/colls/users/docs"))
            .and(header("Authorization", "ApiKey k3y"))
            .and(header("x-ms-cosmos-is-batch-request", "True"))
            .and(body_json(json!([
                {"operationType": "Upsert", "id": "u1", "partitionKey": "a1", "resourceBody": {"id": "u1"}},
                {"operationType": "Upsert", "id": "u2", "partitionKey": "a1", "resourceBody": {"id": "u2"}}
            ])))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"statusCode": 200, "requestCharge": 5.5},
                {"statusCode": 400, "requestCharge": 1.0, "message": "partition key mismatch"}
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = target_for(&server)
            .bulk_upsert("users", &[record("u1"), record("u2")])
            .await
            .expect("batch answered");
        assert_eq!(outcome.request_charge, Some(6.5));
        assert!(outcome.results[0].error.is_none());
        assert_eq!(
            outcome.results[1].error.as_deref(),
            Some("status 400: partition key mismatch")
        );
    }

    #[tokio::test]
    async fn the_one_where_the_charge_header_wins_over_the_sum() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-ms-request-charge", "42.5")
                    .set_body_json(json!([{"statusCode": 201, "requestCharge": 1.0}])),
            )
            .mount(&server)
            .await;

        let outcome = target_for(&server)
            .bulk_upsert("users", &[record("u1")])
            .await
            .expect("batch answered");
        assert_eq!(outcome.request_charge, Some(42.5));
    }

    #[tokio::test]
    async fn the_one_where_statuses_pick_their_error_kind() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/dbs/lettings/colls/throttled/docs"))
            .respond_with(ResponseTemplate::new(429).insert_header("x-ms-retry-after-ms", "250"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/dbs/lettings/colls/locked/docs"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let target = target_for(&server);
        let throttled = target
            .bulk_upsert("throttled", &[record("u1")])
            .await
            .expect_err("429");
        assert!(matches!(
            throttled,
            StoreError::Throttled { retry_after: Some(d), .. } if d == Duration::from_millis(250)
        ));
        let locked = target.bulk_upsert("locked", &[record("u1")]).await.expect_err("401");
        assert!(matches!(locked, StoreError::Auth { status: 401, .. }));
        assert!(!locked.is_retryable());
    }

    #[tokio::test]
    async fn the_one_where_a_read_names_its_partition() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/dbs/lettings/colls/users/docs/u1"))
            .and(header("x-ms-documentdb-partitionkey", r#"["a1"]"#))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"id": "u1", "_etag": "\"0001\""})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/dbs/lettings/colls/users/docs/u9"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let target = target_for(&server);
        let found = target.read("users", "u1", "a1").await.expect("read");
        assert_eq!(found.and_then(|d| d.get("id").cloned()), Some(json!("u1")));
        assert!(target.read("users", "u9", "a1").await.expect("read").is_none());
    }

    #[tokio::test]
    async fn the_one_where_an_id_with_a_hash_is_still_one_document() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/dbs/lettings/colls/users/docs/u%231"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "u#1"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/dbs/lettings/colls/users/docs/50%25%3Foff"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "50%?off"})))
            .expect(1)
            .mount(&server)
            .await;

        let target = target_for(&server);
        let hashed = target.read("users", "u#1", "a1").await.expect("read");
        assert_eq!(hashed.and_then(|d| d.get("id").cloned()), Some(json!("u#1")));
        let percent = target.read("users", "50%?off", "a1").await.expect("read");
        assert_eq!(percent.and_then(|d| d.get("id").cloned()), Some(json!("50%?off")));
    }

    #[test]
    fn the_one_where_a_base_path_and_trailing_slash_survive() {
        let target = GatewayTarget::new(GatewayTargetConfig {
            url: Some("https://docs.example.net/api/".into()),
            api_key: Some("k3y".into()),
            database: Some("lettings".into()),
            http: CommonHttpConfig::default(),
        })
        .expect("target builds");
        assert_eq!(
            target.docs_url("users", Some("u 1")).as_str(),
            "https://docs.example.net/api/dbs/lettings/colls/users/docs/u%201"
        );
    }

    #[test]
    fn the_one_where_every_missing_gateway_key_is_listed() {
        let config = GatewayTargetConfig {
            url: Some("https://docs.example.net".into()),
            ..GatewayTargetConfig::default()
        };
        assert_eq!(
            config.missing_keys("target.Gateway"),
            ["target.Gateway.api_key", "target.Gateway.database"]
        );
    }
}
