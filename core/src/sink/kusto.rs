//! Azure Data Explorer (Kusto) REST client.
//!
//! Management commands go to `/v1/rest/mgmt`, streaming ingestion to
//! `/v1/rest/ingest/{database}/{table}`. Both authenticate with a bearer
//! token from [`TokenProvider`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::{RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;
use uuid::Uuid;

use crate::config::ClusterConfig;
use crate::errors::{ConfigError, StoreError};
use crate::schema::TableSchema;
use crate::sink::auth::TokenProvider;
use crate::sink::{IngestApi, ManagementApi};

const CLIENT_REQUEST_ID: &str = "x-ms-client-request-id";
const APP_NAME: &str = "x-ms-app";

pub struct KustoClient {
    http: reqwest::Client,
    base_url: String,
    database: String,
    tokens: TokenProvider,
}

/// A v1 REST response: a list of result tables, the first one primary.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct V1Response {
    tables: Vec<V1Table>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct V1Table {
    columns: Vec<V1Column>,
    rows: Vec<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct V1Column {
    column_name: String,
}

impl V1Response {
    fn primary(&self) -> Result<&V1Table, StoreError> {
        self.tables.first().ok_or_else(|| StoreError::Decode {
            reason: "response has no result tables".to_string(),
        })
    }
}

/// Bracket-quotes an entity name so dots, dashes and keywords in it are
/// taken literally.
fn quoted(name: &str) -> String {
    format!("['{}']", name)
}

impl V1Table {
    fn cell(&self, row: usize, column: &str) -> Option<&Value> {
        let index = self.columns.iter().position(|c| c.column_name == column)?;
        self.rows.get(row)?.get(index)
    }
}

impl KustoClient {
    pub fn new(cluster: &ClusterConfig, request_timeout: Duration) -> Result<Self, ConfigError> {
        let auth = cluster.auth.as_ref().ok_or_else(|| ConfigError::MissingField {
            field: "cluster.auth".to_string(),
        })?;
        let tokens = TokenProvider::from_config(auth, &cluster.uri)?;
        Self::with_tokens(cluster, request_timeout, tokens)
    }

    pub fn with_tokens(
        cluster: &ClusterConfig,
        request_timeout: Duration,
        tokens: TokenProvider,
    ) -> Result<Self, ConfigError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ConfigError::Invalid {
                message: format!("cannot build HTTP client: {}", e),
            })?;

        Ok(Self {
            http,
            base_url: cluster.uri.trim_end_matches('/').to_string(),
            database: cluster.database.clone(),
            tokens,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder, StoreError> {
        let token = self.tokens.bearer(&self.http).await?;
        Ok(request
            .bearer_auth(token)
            .header(CLIENT_REQUEST_ID, format!("logship;{}", Uuid::new_v4()))
            .header(APP_NAME, "logship"))
    }

    async fn execute_mgmt(&self, command: &str) -> Result<V1Response, StoreError> {
        let url = format!("{}/v1/rest/mgmt", self.base_url);
        debug!("Executing management command: {}", command);

        let request = self
            .authorized(self.http.post(&url).json(&json!({
                "db": self.database,
                "csl": command,
            })))
            .await?;
        let response = request
            .send()
            .await
            .map_err(|source| StoreError::Transport {
                endpoint: url.clone(),
                source,
            })?;
        let response = check_status(response).await?;

        response.json().await.map_err(|e| StoreError::Decode {
            reason: e.to_string(),
        })
    }
}

/// Turns a non-2xx response into [`StoreError::Service`], preferring the
/// service's own error message.
async fn check_status(response: Response) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| {
            let error = v.get("error")?;
            error
                .get("message")
                .or_else(|| error.get("@message"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or(body);

    Err(StoreError::Service { status, message })
}

#[async_trait]
impl ManagementApi for KustoClient {
    async fn table_exists(&self, table: &str) -> Result<bool, StoreError> {
        let response = self
            .execute_mgmt(&format!(".show tables ({})", quoted(table)))
            .await?;
        Ok(!response.primary()?.rows.is_empty())
    }

    async fn table_schema(&self, table: &str) -> Result<Option<TableSchema>, StoreError> {
        let response = self
            .execute_mgmt(&format!(".show table {} cslschema", quoted(table)))
            .await?;
        let primary = response.primary()?;
        let Some(schema) = primary.cell(0, "Schema").and_then(Value::as_str) else {
            return Ok(None);
        };

        schema
            .parse()
            .map(Some)
            .map_err(|e| StoreError::Decode {
                reason: format!("unreadable schema for {}: {}", table, e),
            })
    }

    async fn create_or_alter_table(
        &self,
        table: &str,
        schema: &TableSchema,
    ) -> Result<(), StoreError> {
        self.execute_mgmt(&format!(
            ".create-merge table {} ({})",
            quoted(table),
            schema.to_csl()
        ))
        .await?;
        Ok(())
    }

    async fn create_or_alter_mapping(
        &self,
        table: &str,
        mapping_name: &str,
        mapping_document: &str,
    ) -> Result<(), StoreError> {
        self.execute_mgmt(&format!(
            ".create-or-alter table {} ingestion json mapping '{}' '{}'",
            quoted(table),
            mapping_name,
            mapping_document
        ))
        .await?;
        Ok(())
    }
}

#[async_trait]
impl IngestApi for KustoClient {
    async fn streaming_ingest(
        &self,
        table: &str,
        mapping_name: &str,
        format: &str,
        payload: &[u8],
    ) -> Result<(), StoreError> {
        let url = format!(
            "{}/v1/rest/ingest/{}/{}",
            self.base_url, self.database, table
        );

        let request = self
            .authorized(
                self.http
                    .post(&url)
                    .query(&[("streamFormat", format), ("mappingName", mapping_name)])
                    .header(CONTENT_ENCODING, "gzip")
                    .header(CONTENT_TYPE, "application/json")
                    .body(payload.to_vec()),
            )
            .await?;
        let response = request
            .send()
            .await
            .map_err(|source| StoreError::Transport {
                endpoint: url.clone(),
                source,
            })?;
        check_status(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthConfig;
    use reqwest::StatusCode;
    use wiremock::matchers::{body_bytes, body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> KustoClient {
        let cluster = ClusterConfig {
            uri: format!("{}/", server.uri()),
            database: "Logs".to_string(),
            auth: Some(AuthConfig::Token {
                token: "abc".to_string(),
            }),
        };
        KustoClient::new(&cluster, Duration::from_secs(5)).unwrap()
    }

    fn v1(columns: &[&str], rows: Vec<Vec<Value>>) -> Value {
        json!({
            "Tables": [{
                "TableName": "Table_0",
                "Columns": columns
                    .iter()
                    .map(|c| json!({"ColumnName": c, "DataType": "String"}))
                    .collect::<Vec<_>>(),
                "Rows": rows,
            }]
        })
    }

    #[tokio::test]
    async fn test_table_exists() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/rest/mgmt"))
            .and(header("authorization", "Bearer abc"))
            .and(body_partial_json(
                json!({"db": "Logs", "csl": ".show tables (['aliceEvents'])"}),
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(v1(
                &["TableName", "DatabaseName"],
                vec![vec![json!("aliceEvents"), json!("Logs")]],
            )))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/rest/mgmt"))
            .and(body_partial_json(json!({"csl": ".show tables (['bobEvents'])"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(v1(&["TableName", "DatabaseName"], vec![])),
            )
            .mount(&server)
            .await;

        let client = client(&server);
        assert!(client.table_exists("aliceEvents").await.unwrap());
        assert!(!client.table_exists("bobEvents").await.unwrap());
    }

    #[tokio::test]
    async fn test_table_schema() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/rest/mgmt"))
            .and(body_partial_json(
                json!({"csl": ".show table ['aliceEvents'] cslschema"}),
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(v1(
                &["TableName", "Schema", "DatabaseName"],
                vec![vec![
                    json!("aliceEvents"),
                    json!("TIMESTAMP:datetime,['stream']:string"),
                    json!("Logs"),
                ]],
            )))
            .mount(&server)
            .await;

        let schema = client(&server)
            .table_schema("aliceEvents")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(schema, "TIMESTAMP:datetime,stream:string".parse().unwrap());
    }

    #[tokio::test]
    async fn test_create_commands() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/rest/mgmt"))
            .and(body_partial_json(json!({
                "csl": ".create-merge table ['aliceEvents'] (['TIMESTAMP']:datetime, ['stream']:string)"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(v1(&["TableName"], vec![])))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/rest/mgmt"))
            .and(body_partial_json(json!({
                "csl": ".create-or-alter table ['aliceEvents'] ingestion json mapping 'jsonmapping1' '[{\"column\":\"stream\",\"path\":\"$.stream\"}]'"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(v1(&["Name"], vec![])))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server);
        let schema: TableSchema = "TIMESTAMP:datetime,['stream']:string".parse().unwrap();
        client
            .create_or_alter_table("aliceEvents", &schema)
            .await
            .unwrap();
        client
            .create_or_alter_mapping(
                "aliceEvents",
                "jsonmapping1",
                r#"[{"column":"stream","path":"$.stream"}]"#,
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_dotted_table_name_is_quoted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/rest/mgmt"))
            .and(body_partial_json(
                json!({"csl": ".show tables (['jane.doe-Events'])"}),
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(v1(&["TableName"], vec![])))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/rest/mgmt"))
            .and(body_partial_json(json!({
                "csl": ".create-merge table ['jane.doe-Events'] (['msg']:string)"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(v1(&["TableName"], vec![])))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/rest/mgmt"))
            .and(body_partial_json(json!({
                "csl": ".create-or-alter table ['jane.doe-Events'] ingestion json mapping 'jsonmapping1' '[]'"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(v1(&["Name"], vec![])))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server);
        assert!(!client.table_exists("jane.doe-Events").await.unwrap());
        client
            .create_or_alter_table("jane.doe-Events", &"msg:string".parse().unwrap())
            .await
            .unwrap();
        client
            .create_or_alter_mapping("jane.doe-Events", "jsonmapping1", "[]")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_management_error_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/rest/mgmt"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {"code": "General_BadRequest", "message": "Syntax error: unexpected token"}
            })))
            .mount(&server)
            .await;

        let err = client(&server).table_exists("x").await.unwrap_err();
        match err {
            StoreError::Service { status, message } => {
                assert_eq!(status, StatusCode::BAD_REQUEST);
                assert_eq!(message, "Syntax error: unexpected token");
            }
            other => panic!("Expected Service error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_streaming_ingest() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/rest/ingest/Logs/aliceEvents"))
            .and(query_param("streamFormat", "json"))
            .and(query_param("mappingName", "jsonmapping1"))
            .and(header("content-encoding", "gzip"))
            .and(header("authorization", "Bearer abc"))
            .and(body_bytes(vec![0x1f, 0x8b, 0x08]))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        client(&server)
            .streaming_ingest("aliceEvents", "jsonmapping1", "json", &[0x1f, 0x8b, 0x08])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_streaming_ingest_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let err = client(&server)
            .streaming_ingest("aliceEvents", "jsonmapping1", "json", b"")
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(err, StoreError::Service { ref message, .. } if message == "overloaded"));
    }
}
