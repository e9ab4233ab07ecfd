//! Onboarding steps run after a source is connected.
//!
//! For spreadsheets: pick a spreadsheet, pick a tab, preview it, get a field
//! mapping proposal, then confirm it with [`SetupService::save_config`]. A
//! table-API source is configured in one step with
//! [`SetupService::configure_table_api`].

use chrono::{DateTime, Utc};
use geosource::error::Result;
use geosource::source_config::{
    ConfigStage, ConnectionParams, FieldMappings, NewSourceConfig, SourceConfig, SourceKind,
};
use geosource::SourceError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::adapters::sheets::api::{SheetProperties, SpreadsheetFile};
use crate::adapters::sheets::config::sheet_range;
use crate::detect::{detect_fields, FieldProposal, SAMPLE_ROWS};
use crate::factory::AdapterFactory;

/// Header row plus up to [`SAMPLE_ROWS`] data rows.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetPreview {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Values for a table-API source.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableApiSettings {
    pub base_url: String,
    pub workspace_id: String,
    pub api_key: String,
    #[serde(default)]
    pub field_mappings: Option<FieldMappings>,
}

/// Non-secret summary of a tenant's active source.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceStatus {
    pub source_kind: SourceKind,
    pub stage: ConfigStage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spreadsheet_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sheet_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_mappings: Option<FieldMappings>,
}

impl From<&SourceConfig> for SourceStatus {
    fn from(config: &SourceConfig) -> Self {
        Self {
            source_kind: config.source_kind,
            stage: config.stage(),
            account_email: config.connection.account_email.clone(),
            spreadsheet_id: config.connection.spreadsheet_id.clone(),
            sheet_name: config.connection.sheet_name.clone(),
            token_expires_at: config.token_expires_at,
            field_mappings: config.field_mappings.clone(),
        }
    }
}

pub struct SetupService {
    factory: Arc<AdapterFactory>,
}

impl SetupService {
    pub fn new(factory: Arc<AdapterFactory>) -> Self {
        Self { factory }
    }

    pub fn factory(&self) -> &Arc<AdapterFactory> {
        &self.factory
    }

    pub async fn list_spreadsheets(&self, tenant_id: &str) -> Result<Vec<SpreadsheetFile>> {
        let (_, client) = self.factory.spreadsheet_session(tenant_id).await?;
        self.factory.limiter().check(tenant_id)?;
        client.list_spreadsheets().await
    }

    pub async fn list_sheets(&self, tenant_id: &str, spreadsheet_id: &str) -> Result<Vec<SheetProperties>> {
        require("spreadsheetId", spreadsheet_id)?;
        let (_, client) = self.factory.spreadsheet_session(tenant_id).await?;
        self.factory.limiter().check(tenant_id)?;
        client.list_sheets(spreadsheet_id).await
    }

    /// First rows of a tab, always read live.
    pub async fn preview_rows(
        &self,
        tenant_id: &str,
        spreadsheet_id: &str,
        sheet_name: &str,
    ) -> Result<SheetPreview> {
        require("spreadsheetId", spreadsheet_id)?;
        require("sheetName", sheet_name)?;
        let (_, client) = self.factory.spreadsheet_session(tenant_id).await?;

        self.factory.limiter().check(tenant_id)?;
        let values = client
            .get_values(spreadsheet_id, &sheet_range(sheet_name, Some(SAMPLE_ROWS + 1)))
            .await?;

        let mut rows = values.into_iter();
        Ok(SheetPreview {
            headers: rows.next().unwrap_or_default(),
            rows: rows.take(SAMPLE_ROWS).collect(),
        })
    }

    pub async fn detect_fields(
        &self,
        tenant_id: &str,
        spreadsheet_id: &str,
        sheet_name: &str,
    ) -> Result<FieldProposal> {
        let preview = self.preview_rows(tenant_id, spreadsheet_id, sheet_name).await?;
        Ok(detect_fields(&preview.headers, &preview.rows))
    }

    /// Confirm the sheet selection and field mapping for the active
    /// spreadsheet source.
    ///
    /// Every mapped column must exist in the tab's header row.
    pub async fn save_config(
        &self,
        tenant_id: &str,
        spreadsheet_id: &str,
        sheet_name: &str,
        mappings: FieldMappings,
    ) -> Result<SourceConfig> {
        mappings.validate()?;
        let preview = self.preview_rows(tenant_id, spreadsheet_id, sheet_name).await?;
        if let Some(missing) = mappings
            .columns()
            .into_iter()
            .find(|col| !preview.headers.iter().any(|h| h == col))
        {
            return Err(SourceError::validation(format!(
                "Column '{}' does not exist in sheet '{}'",
                missing, sheet_name
            )));
        }

        let configs = self.factory.coordinator().configs();
        let active = configs
            .get_active(tenant_id)?
            .ok_or_else(|| SourceError::not_found("No active data source; connect an account first"))?;

        if !configs.save_selection(&active.id, spreadsheet_id, sheet_name, &mappings)? {
            return Err(SourceError::not_found(
                "Data source configuration was replaced; please retry",
            ));
        }
        self.factory.cache().invalidate_tenant(tenant_id);

        info!(
            tenant_id = %tenant_id,
            config_id = %active.id,
            "Spreadsheet source configured"
        );

        configs
            .get_active(tenant_id)?
            .ok_or_else(|| SourceError::not_found("No active data source"))
    }

    /// Activate a table-API source, replacing any previous source.
    pub async fn configure_table_api(&self, tenant_id: &str, settings: TableApiSettings) -> Result<SourceConfig> {
        require("tenantId", tenant_id)?;
        require("baseUrl", &settings.base_url)?;
        require("workspaceId", &settings.workspace_id)?;
        require("apiKey", &settings.api_key)?;
        if !settings.base_url.starts_with("http://") && !settings.base_url.starts_with("https://") {
            return Err(SourceError::validation("baseUrl must be an http(s) URL"));
        }
        if let Some(mappings) = &settings.field_mappings {
            mappings.validate()?;
        }

        let coordinator = self.factory.coordinator();
        let api_key_enc = coordinator.cipher()?.encrypt(&settings.api_key)?;

        let config = coordinator.configs().activate(&NewSourceConfig {
            tenant_id: tenant_id.to_string(),
            source_kind: SourceKind::TableApi,
            connection: ConnectionParams {
                base_url: Some(settings.base_url),
                workspace_id: Some(settings.workspace_id),
                ..Default::default()
            },
            access_token_enc: Some(api_key_enc),
            refresh_token_enc: None,
            token_expires_at: None,
            field_mappings: settings.field_mappings,
        })?;
        self.factory.cache().invalidate_tenant(tenant_id);

        info!(tenant_id = %tenant_id, config_id = %config.id, "Table-API source configured");
        Ok(config)
    }

    pub fn status(&self, tenant_id: &str) -> Result<SourceStatus> {
        require("tenantId", tenant_id)?;
        let config = self
            .factory
            .coordinator()
            .configs()
            .get_active(tenant_id)?
            .ok_or_else(|| SourceError::not_found("No active data source for this tenant"))?;
        Ok(SourceStatus::from(&config))
    }
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(SourceError::validation(format!("{} is required", field)));
    }
    Ok(())
}
