use geosource::error::Result;
use geosource::SourceError;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::config::{first_row_of_range, row_range, SheetsEndpoints, SPREADSHEET_MIME_TYPE};

/// A spreadsheet file visible to the connected account.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SpreadsheetFile {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_time: Option<String>,
}

#[derive(Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<SpreadsheetFile>,
}

/// One tab of a spreadsheet.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SheetProperties {
    pub sheet_id: i64,
    pub title: String,
    #[serde(default)]
    pub index: i64,
}

#[derive(Deserialize)]
struct SpreadsheetMeta {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppendResponse {
    updates: Option<AppendUpdates>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppendUpdates {
    updated_range: Option<String>,
}

/// HTTP client for the spreadsheet values API and the Drive file listing.
///
/// Authenticates with the tenant's OAuth access token.
pub struct SheetsClient {
    access_token: String,
    http_client: Client,
    endpoints: SheetsEndpoints,
}

impl SheetsClient {
    pub fn new(access_token: String, http_client: Client, endpoints: SheetsEndpoints) -> Self {
        Self {
            access_token,
            http_client,
            endpoints,
        }
    }

    /// Spreadsheets the account can open, most recently modified first.
    pub async fn list_spreadsheets(&self) -> Result<Vec<SpreadsheetFile>> {
        let url = format!("{}/drive/v3/files", self.endpoints.drive_base_url);
        let query = format!("mimeType='{}' and trashed=false", SPREADSHEET_MIME_TYPE);
        let response = self
            .http_client
            .get(&url)
            .bearer_auth(&self.access_token)
            .query(&[
                ("q", query.as_str()),
                ("fields", "files(id,name,modifiedTime)"),
                ("orderBy", "modifiedTime desc"),
                ("pageSize", "100"),
            ])
            .send()
            .await
            .map_err(transport_error)?;

        let list: FileList = parse_json(check_response_status(response).await?).await?;
        Ok(list.files)
    }

    /// Tabs of a spreadsheet in display order.
    pub async fn list_sheets(&self, spreadsheet_id: &str) -> Result<Vec<SheetProperties>> {
        let url = format!(
            "{}/v4/spreadsheets/{}",
            self.endpoints.sheets_base_url,
            urlencoding::encode(spreadsheet_id)
        );
        let response = self
            .http_client
            .get(&url)
            .bearer_auth(&self.access_token)
            .query(&[("fields", "sheets.properties(sheetId,title,index)")])
            .send()
            .await
            .map_err(transport_error)?;

        let meta: SpreadsheetMeta = parse_json(check_response_status(response).await?).await?;
        let mut sheets: Vec<_> = meta.sheets.into_iter().map(|s| s.properties).collect();
        sheets.sort_by_key(|s| s.index);
        Ok(sheets)
    }

    /// Cell values of an A1 range as display strings. Trailing empty cells
    /// and rows are omitted by the provider, so rows may be ragged.
    pub async fn get_values(&self, spreadsheet_id: &str, range: &str) -> Result<Vec<Vec<String>>> {
        let url = format!(
            "{}/v4/spreadsheets/{}/values/{}",
            self.endpoints.sheets_base_url,
            urlencoding::encode(spreadsheet_id),
            urlencoding::encode(range)
        );
        let response = self
            .http_client
            .get(&url)
            .bearer_auth(&self.access_token)
            .query(&[("majorDimension", "ROWS")])
            .send()
            .await
            .map_err(transport_error)?;

        let values: ValueRange = parse_json(check_response_status(response).await?).await?;
        Ok(values
            .values
            .into_iter()
            .map(|row| row.into_iter().map(cell_to_string).collect())
            .collect())
    }

    /// Append a row after the last row of the sheet. Returns the sheet row
    /// number it landed on, when the provider reports it.
    pub async fn append_row(&self, spreadsheet_id: &str, sheet: &str, row: Vec<String>) -> Result<Option<usize>> {
        let range = format!("'{}'!A1", sheet.replace('\'', "''"));
        let url = format!(
            "{}/v4/spreadsheets/{}/values/{}:append",
            self.endpoints.sheets_base_url,
            urlencoding::encode(spreadsheet_id),
            urlencoding::encode(&range)
        );
        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.access_token)
            .query(&[("valueInputOption", "RAW"), ("insertDataOption", "INSERT_ROWS")])
            .json(&json!({ "values": [row] }))
            .send()
            .await
            .map_err(transport_error)?;

        let appended: AppendResponse = parse_json(check_response_status(response).await?).await?;
        Ok(appended
            .updates
            .and_then(|u| u.updated_range)
            .and_then(|r| first_row_of_range(&r)))
    }

    /// Overwrite one row in place.
    pub async fn update_row(
        &self,
        spreadsheet_id: &str,
        sheet: &str,
        row_number: usize,
        row: Vec<String>,
    ) -> Result<()> {
        let range = row_range(sheet, row_number);
        let url = format!(
            "{}/v4/spreadsheets/{}/values/{}",
            self.endpoints.sheets_base_url,
            urlencoding::encode(spreadsheet_id),
            urlencoding::encode(&range)
        );
        let response = self
            .http_client
            .put(&url)
            .bearer_auth(&self.access_token)
            .query(&[("valueInputOption", "RAW")])
            .json(&json!({ "range": range, "majorDimension": "ROWS", "values": [row] }))
            .send()
            .await
            .map_err(transport_error)?;

        check_response_status(response).await?;
        Ok(())
    }

    /// Remove one row, shifting the rows below it up.
    pub async fn delete_row(&self, spreadsheet_id: &str, sheet_id: i64, row_number: usize) -> Result<()> {
        let url = format!(
            "{}/v4/spreadsheets/{}:batchUpdate",
            self.endpoints.sheets_base_url,
            urlencoding::encode(spreadsheet_id)
        );
        let body = json!({
            "requests": [{
                "deleteDimension": {
                    "range": {
                        "sheetId": sheet_id,
                        "dimension": "ROWS",
                        "startIndex": row_number - 1,
                        "endIndex": row_number
                    }
                }
            }]
        });
        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        check_response_status(response).await?;
        Ok(())
    }
}

fn cell_to_string(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

async fn parse_json<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    response
        .json::<T>()
        .await
        .map_err(|_| SourceError::provider(None, "spreadsheet provider returned an unreadable response"))
}

fn transport_error(e: reqwest::Error) -> SourceError {
    if e.is_timeout() {
        SourceError::provider(Some(504), "spreadsheet provider timed out")
    } else {
        SourceError::provider(None, "could not reach spreadsheet provider")
    }
}

/// Map provider status codes to the error taxonomy.
///
/// - 401 → access token rejected (reconnect)
/// - 403 with a quota reason, or 429 → rate limited
/// - 404 → spreadsheet or sheet missing
/// - Other non-2xx → generic provider error
async fn check_response_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::UNAUTHORIZED => SourceError::provider(
            Some(401),
            "spreadsheet access was rejected; please reconnect your account",
        ),
        StatusCode::FORBIDDEN if body.contains("rateLimitExceeded") || body.contains("RATE_LIMIT") => {
            SourceError::provider(Some(429), "spreadsheet provider rate limit exceeded")
        }
        StatusCode::FORBIDDEN => {
            SourceError::provider(Some(403), "the connected account cannot access this spreadsheet")
        }
        StatusCode::TOO_MANY_REQUESTS => {
            SourceError::provider(Some(429), "spreadsheet provider rate limit exceeded")
        }
        StatusCode::NOT_FOUND => SourceError::not_found("Spreadsheet or sheet not found"),
        s => SourceError::provider(Some(s.as_u16()), format!("spreadsheet provider returned {}", s)),
    })
}
