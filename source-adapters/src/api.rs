//! Setup HTTP API for a tenant's data source.
//!
//! Routes, all under `/api/sources/:tenant_id`:
//! - `GET  /status`
//! - `GET  /spreadsheets`
//! - `GET  /spreadsheets/:spreadsheet_id/sheets`
//! - `GET  /spreadsheets/:spreadsheet_id/sheets/:sheet_name/preview`
//! - `GET  /spreadsheets/:spreadsheet_id/sheets/:sheet_name/fields`
//! - `PUT  /config`
//! - `POST /table-api`
//! - `GET  /tables`

use axum::{
    extract::{Path, State},
    response::Json,
    routing::{get, post, put},
    Router,
};
use geosource::error::Result;
use geosource::source_config::{ConfigStage, FieldMappings, SourceConfig, SourceKind};
use geosource::SourceError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, warn};

use crate::adapter::DataAdapter;
use crate::adapters::sheets::api::{SheetProperties, SpreadsheetFile};
use crate::detect::FieldProposal;
use crate::setup::{SetupService, SheetPreview, SourceStatus, TableApiSettings};

/// Shared state for the setup API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub setup: Arc<SetupService>,
}

/// Request body for `PUT /api/sources/:tenant_id/config`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveConfigRequest {
    pub spreadsheet_id: String,
    pub sheet_name: String,
    pub field_mappings: FieldMappings,
}

/// Response for the configuration endpoints.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigResponse {
    pub config_id: String,
    pub source_kind: SourceKind,
    pub stage: ConfigStage,
}

impl From<SourceConfig> for ConfigResponse {
    fn from(config: SourceConfig) -> Self {
        Self {
            stage: config.stage(),
            config_id: config.id,
            source_kind: config.source_kind,
        }
    }
}

#[derive(Serialize)]
pub struct TablesResponse {
    pub tables: Vec<String>,
}

// ---------------------------------------------------------------------------
// Business logic (called from HTTP handlers and unit tests)
// ---------------------------------------------------------------------------

/// Saves the sheet selection and field mapping.
pub async fn handle_save_config(state: &ApiState, tenant_id: &str, req: SaveConfigRequest) -> Result<ConfigResponse> {
    let config = state
        .setup
        .save_config(tenant_id, &req.spreadsheet_id, &req.sheet_name, req.field_mappings)
        .await?;
    Ok(config.into())
}

/// Activates a table-API source. The API key is encrypted before it is stored.
pub async fn handle_configure_table_api(
    state: &ApiState,
    tenant_id: &str,
    settings: TableApiSettings,
) -> Result<ConfigResponse> {
    let config = state.setup.configure_table_api(tenant_id, settings).await?;
    Ok(config.into())
}

/// Tables reachable through the tenant's active adapter.
pub async fn handle_list_tables(state: &ApiState, tenant_id: &str) -> Result<Vec<String>> {
    let adapter = state.setup.factory().get_adapter(tenant_id).await?;
    adapter.list_tables().await
}

// ---------------------------------------------------------------------------
// HTTP handlers
// ---------------------------------------------------------------------------

async fn get_status(State(state): State<Arc<ApiState>>, Path(tenant_id): Path<String>) -> Result<Json<SourceStatus>> {
    let status = state
        .setup
        .status(&tenant_id)
        .inspect_err(|e| log_failure("status", &tenant_id, e))?;
    Ok(Json(status))
}

async fn list_spreadsheets(
    State(state): State<Arc<ApiState>>,
    Path(tenant_id): Path<String>,
) -> Result<Json<Vec<SpreadsheetFile>>> {
    let files = state
        .setup
        .list_spreadsheets(&tenant_id)
        .await
        .inspect_err(|e| log_failure("list_spreadsheets", &tenant_id, e))?;
    Ok(Json(files))
}

async fn list_sheets(
    State(state): State<Arc<ApiState>>,
    Path((tenant_id, spreadsheet_id)): Path<(String, String)>,
) -> Result<Json<Vec<SheetProperties>>> {
    let sheets = state
        .setup
        .list_sheets(&tenant_id, &spreadsheet_id)
        .await
        .inspect_err(|e| log_failure("list_sheets", &tenant_id, e))?;
    Ok(Json(sheets))
}

async fn preview_rows(
    State(state): State<Arc<ApiState>>,
    Path((tenant_id, spreadsheet_id, sheet_name)): Path<(String, String, String)>,
) -> Result<Json<SheetPreview>> {
    let preview = state
        .setup
        .preview_rows(&tenant_id, &spreadsheet_id, &sheet_name)
        .await
        .inspect_err(|e| log_failure("preview_rows", &tenant_id, e))?;
    Ok(Json(preview))
}

async fn detect_fields(
    State(state): State<Arc<ApiState>>,
    Path((tenant_id, spreadsheet_id, sheet_name)): Path<(String, String, String)>,
) -> Result<Json<FieldProposal>> {
    let proposal = state
        .setup
        .detect_fields(&tenant_id, &spreadsheet_id, &sheet_name)
        .await
        .inspect_err(|e| log_failure("detect_fields", &tenant_id, e))?;
    Ok(Json(proposal))
}

async fn put_config(
    State(state): State<Arc<ApiState>>,
    Path(tenant_id): Path<String>,
    Json(req): Json<SaveConfigRequest>,
) -> Result<Json<ConfigResponse>> {
    let response = handle_save_config(&state, &tenant_id, req)
        .await
        .inspect_err(|e| log_failure("save_config", &tenant_id, e))?;
    Ok(Json(response))
}

async fn post_table_api(
    State(state): State<Arc<ApiState>>,
    Path(tenant_id): Path<String>,
    Json(settings): Json<TableApiSettings>,
) -> Result<Json<ConfigResponse>> {
    let response = handle_configure_table_api(&state, &tenant_id, settings)
        .await
        .inspect_err(|e| log_failure("configure_table_api", &tenant_id, e))?;
    Ok(Json(response))
}

async fn list_tables(State(state): State<Arc<ApiState>>, Path(tenant_id): Path<String>) -> Result<Json<TablesResponse>> {
    let tables = handle_list_tables(&state, &tenant_id)
        .await
        .inspect_err(|e| log_failure("list_tables", &tenant_id, e))?;
    Ok(Json(TablesResponse { tables }))
}

fn log_failure(operation: &str, tenant_id: &str, e: &SourceError) {
    if e.status_code().is_server_error() {
        error!(operation, tenant_id = %tenant_id, kind = e.kind(), error = %e, "Setup request failed");
    } else {
        warn!(operation, tenant_id = %tenant_id, kind = e.kind(), error = %e, "Setup request rejected");
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/api/sources/:tenant_id/status", get(get_status))
        .route("/api/sources/:tenant_id/spreadsheets", get(list_spreadsheets))
        .route(
            "/api/sources/:tenant_id/spreadsheets/:spreadsheet_id/sheets",
            get(list_sheets),
        )
        .route(
            "/api/sources/:tenant_id/spreadsheets/:spreadsheet_id/sheets/:sheet_name/preview",
            get(preview_rows),
        )
        .route(
            "/api/sources/:tenant_id/spreadsheets/:spreadsheet_id/sheets/:sheet_name/fields",
            get(detect_fields),
        )
        .route("/api/sources/:tenant_id/config", put(put_config))
        .route("/api/sources/:tenant_id/table-api", post(post_table_api))
        .route("/api/sources/:tenant_id/tables", get(list_tables))
        .with_state(Arc::new(state))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
