use geosource::error::Result;
use geosource::SourceError;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};

/// Field definition reported by the table service.
#[derive(Clone, Debug, Deserialize)]
pub struct FieldMeta {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: Option<String>,
}

/// Table definition reported by the table service.
#[derive(Clone, Debug, Deserialize)]
pub struct TableMeta {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldMeta>,
}

#[derive(Deserialize)]
struct TableList {
    #[serde(default)]
    tables: Vec<TableMeta>,
}

/// A record as returned by the table service.
#[derive(Clone, Debug, Deserialize)]
pub struct ApiRecord {
    pub id: String,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

/// A page of records plus the continuation offset, if any.
#[derive(Debug, Deserialize)]
pub struct ApiRecordList {
    #[serde(default)]
    pub records: Vec<ApiRecord>,
    pub offset: Option<String>,
}

/// HTTP client for a table-API workspace.
///
/// Authenticates with the workspace API key as a Bearer token.
pub struct TableApiClient {
    api_key: String,
    http_client: Client,
    base_url: String,
    workspace_id: String,
}

impl TableApiClient {
    pub fn new(api_key: String, http_client: Client, base_url: String, workspace_id: String) -> Self {
        Self {
            api_key,
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            workspace_id,
        }
    }

    fn table_url(&self, table: &str) -> String {
        format!(
            "{}/v0/{}/{}",
            self.base_url,
            urlencoding::encode(&self.workspace_id),
            urlencoding::encode(table)
        )
    }

    fn record_url(&self, table: &str, id: &str) -> String {
        format!("{}/{}", self.table_url(table), urlencoding::encode(id))
    }

    /// Tables in the workspace with their field definitions.
    pub async fn list_tables(&self) -> Result<Vec<TableMeta>> {
        let url = format!(
            "{}/v0/meta/bases/{}/tables",
            self.base_url,
            urlencoding::encode(&self.workspace_id)
        );
        let response = self
            .http_client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(transport_error)?;

        let list: TableList = parse_json(check_response_status(response).await?).await?;
        Ok(list.tables)
    }

    pub async fn list_records(&self, table: &str, page_size: usize, offset: Option<&str>) -> Result<ApiRecordList> {
        let mut query = vec![("pageSize", page_size.to_string())];
        if let Some(offset) = offset {
            query.push(("offset", offset.to_string()));
        }

        let response = self
            .http_client
            .get(self.table_url(table))
            .bearer_auth(&self.api_key)
            .query(&query)
            .send()
            .await
            .map_err(transport_error)?;

        parse_json(check_response_status(response).await?).await
    }

    pub async fn get_record(&self, table: &str, id: &str) -> Result<ApiRecord> {
        let response = self
            .http_client
            .get(self.record_url(table, id))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(transport_error)?;

        parse_json(check_response_status(response).await?).await
    }

    pub async fn create_record(&self, table: &str, fields: &Map<String, Value>) -> Result<ApiRecord> {
        let response = self
            .http_client
            .post(self.table_url(table))
            .bearer_auth(&self.api_key)
            .json(&json!({ "fields": fields }))
            .send()
            .await
            .map_err(transport_error)?;

        parse_json(check_response_status(response).await?).await
    }

    /// Partial update: only the given fields change.
    pub async fn update_record(&self, table: &str, id: &str, fields: &Map<String, Value>) -> Result<ApiRecord> {
        let response = self
            .http_client
            .patch(self.record_url(table, id))
            .bearer_auth(&self.api_key)
            .json(&json!({ "fields": fields }))
            .send()
            .await
            .map_err(transport_error)?;

        parse_json(check_response_status(response).await?).await
    }

    pub async fn delete_record(&self, table: &str, id: &str) -> Result<()> {
        let response = self
            .http_client
            .delete(self.record_url(table, id))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(transport_error)?;

        check_response_status(response).await?;
        Ok(())
    }
}

async fn parse_json<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    response
        .json::<T>()
        .await
        .map_err(|_| SourceError::provider(None, "table service returned an unreadable response"))
}

fn transport_error(e: reqwest::Error) -> SourceError {
    if e.is_timeout() {
        SourceError::provider(Some(504), "table service timed out")
    } else {
        SourceError::provider(None, "could not reach table service")
    }
}

/// Check the response status and map known error codes to the taxonomy.
///
/// - 401/403 → API key rejected
/// - 404 → table or record missing
/// - 422 → the service rejected the field values
/// - Other non-2xx → generic provider error
async fn check_response_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            SourceError::provider(Some(status.as_u16()), "table service rejected the API key")
        }
        StatusCode::NOT_FOUND => SourceError::not_found("Table or record not found"),
        StatusCode::UNPROCESSABLE_ENTITY => {
            let body: Value = response.json().await.unwrap_or(Value::Null);
            let message = body["error"]["message"]
                .as_str()
                .unwrap_or("invalid field values")
                .to_string();
            SourceError::validation(message)
        }
        s => SourceError::provider(Some(s.as_u16()), format!("table service returned {}", s)),
    })
}
