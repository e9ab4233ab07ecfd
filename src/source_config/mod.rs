//! Per-tenant data source configuration.
//!
//! Each tenant has at most one *active* [`SourceConfig`]. It records which
//! backend holds the tenant's records, the plaintext connection parameters,
//! the encrypted secret material and the confirmed column mapping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SourceError};

mod store;

pub use store::SourceConfigStore;

/// Which backend a tenant's records live in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    TableApi,
    Spreadsheet,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::TableApi => "table-api",
            SourceKind::Spreadsheet => "spreadsheet",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "table-api" => Some(SourceKind::TableApi),
            "spreadsheet" => Some(SourceKind::Spreadsheet),
            _ => None,
        }
    }
}

/// Confirmed correspondence between columns and semantic roles.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldMappings {
    pub id_field: String,
    pub name_field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry_field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat_field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lng_field: Option<String>,
}

impl FieldMappings {
    /// Checks required roles and that latitude/longitude come as a pair.
    pub fn validate(&self) -> Result<()> {
        if self.id_field.trim().is_empty() {
            return Err(SourceError::validation("fieldMappings.idField is required"));
        }
        if self.name_field.trim().is_empty() {
            return Err(SourceError::validation("fieldMappings.nameField is required"));
        }
        match (&self.lat_field, &self.lng_field) {
            (Some(_), None) | (None, Some(_)) => Err(SourceError::validation(
                "fieldMappings.latField and fieldMappings.lngField must be set together",
            )),
            _ => Ok(()),
        }
    }

    /// All mapped column names, in role order.
    pub fn columns(&self) -> Vec<&str> {
        let mut cols = vec![self.id_field.as_str(), self.name_field.as_str()];
        for col in [&self.geometry_field, &self.lat_field, &self.lng_field]
            .into_iter()
            .flatten()
        {
            cols.push(col.as_str());
        }
        cols
    }

    pub fn has_geometry(&self) -> bool {
        self.geometry_field.is_some() || (self.lat_field.is_some() && self.lng_field.is_some())
    }
}

/// Plaintext, non-secret connection parameters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionParams {
    /// Table-API service base URL
    pub base_url: Option<String>,
    /// Table-API workspace identifier
    pub workspace_id: Option<String>,
    pub spreadsheet_id: Option<String>,
    pub sheet_name: Option<String>,
    /// Email of the account that granted spreadsheet access (display only)
    pub account_email: Option<String>,
}

/// Setup progress of an active configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigStage {
    /// Account connected, no sheet or field mapping chosen yet
    Unconfigured,
    Configured,
}

/// A persisted source configuration row.
///
/// `access_token_enc` and `refresh_token_enc` are always ciphertext produced
/// by [`crate::credentials::CredentialCipher`].
#[derive(Clone, Debug, PartialEq)]
pub struct SourceConfig {
    pub id: String,
    pub tenant_id: String,
    pub source_kind: SourceKind,
    pub connection: ConnectionParams,
    pub access_token_enc: Option<String>,
    pub refresh_token_enc: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub field_mappings: Option<FieldMappings>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SourceConfig {
    pub fn stage(&self) -> ConfigStage {
        let selected = match self.source_kind {
            SourceKind::Spreadsheet => {
                self.connection.spreadsheet_id.is_some() && self.connection.sheet_name.is_some()
            }
            SourceKind::TableApi => true,
        };
        if selected && self.field_mappings.is_some() {
            ConfigStage::Configured
        } else {
            ConfigStage::Unconfigured
        }
    }

    /// True when the access token is expired or will be within `margin`.
    pub fn token_expired(&self, now: DateTime<Utc>, margin: chrono::Duration) -> bool {
        match self.token_expires_at {
            Some(expires_at) => now + margin >= expires_at,
            None => false,
        }
    }
}

/// Values for a configuration about to be activated.
#[derive(Clone, Debug)]
pub struct NewSourceConfig {
    pub tenant_id: String,
    pub source_kind: SourceKind,
    pub connection: ConnectionParams,
    pub access_token_enc: Option<String>,
    pub refresh_token_enc: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub field_mappings: Option<FieldMappings>,
}
