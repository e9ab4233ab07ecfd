use async_trait::async_trait;
use geosource::error::Result;
use geosource::source_config::SourceKind;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::adapters::sheets::SheetsAdapter;
use crate::adapters::table_api::TableApiAdapter;
use crate::geometry::Geometry;

/// Default page size when the caller does not specify one
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// A record normalized across backends.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SourceRecord {
    pub id: String,
    pub attributes: Map<String, Value>,
    /// GeoJSON geometry; absent when the source has no usable location
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Geometry>,
}

/// Values for a create or update.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct RecordFields {
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default)]
    pub geometry: Option<Geometry>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page_size: Option<usize>,
    /// Opaque cursor returned by the previous page
    pub cursor: Option<String>,
}

impl Pagination {
    pub fn page_size(&self) -> usize {
        self.page_size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, DEFAULT_PAGE_SIZE)
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordPage {
    pub records: Vec<SourceRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnSchema {
    pub name: String,
    /// Backend field type, when the backend reports one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_type: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnSchema>,
}

/// Uniform record access over one backend.
///
/// Implementations translate every call into the backend's API and return
/// records in the common [`SourceRecord`] shape. Each write is a single
/// provider call; failures surface as `ProviderError` and are never retried
/// here.
#[async_trait]
pub trait DataAdapter: Send + Sync {
    /// Which backend this adapter talks to.
    fn kind(&self) -> SourceKind;

    async fn list_tables(&self) -> Result<Vec<String>>;

    async fn get_schema(&self, table: &str) -> Result<TableSchema>;

    async fn list_records(&self, table: &str, pagination: &Pagination) -> Result<RecordPage>;

    async fn get_record(&self, table: &str, id: &str) -> Result<SourceRecord>;

    async fn create_record(&self, table: &str, fields: &RecordFields) -> Result<SourceRecord>;

    async fn update_record(&self, table: &str, id: &str, fields: &RecordFields) -> Result<SourceRecord>;

    async fn delete_record(&self, table: &str, id: &str) -> Result<()>;
}

/// The adapter for a tenant, selected by its source kind.
pub enum SourceAdapter {
    TableApi(TableApiAdapter),
    Spreadsheet(SheetsAdapter),
}

impl SourceAdapter {
    fn inner(&self) -> &dyn DataAdapter {
        match self {
            SourceAdapter::TableApi(a) => a,
            SourceAdapter::Spreadsheet(a) => a,
        }
    }
}

// Adapters hold decrypted credentials; only the kind is printed.
impl std::fmt::Debug for SourceAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SourceAdapter").field(&self.kind()).finish()
    }
}

#[async_trait]
impl DataAdapter for SourceAdapter {
    fn kind(&self) -> SourceKind {
        self.inner().kind()
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        self.inner().list_tables().await
    }

    async fn get_schema(&self, table: &str) -> Result<TableSchema> {
        self.inner().get_schema(table).await
    }

    async fn list_records(&self, table: &str, pagination: &Pagination) -> Result<RecordPage> {
        self.inner().list_records(table, pagination).await
    }

    async fn get_record(&self, table: &str, id: &str) -> Result<SourceRecord> {
        self.inner().get_record(table, id).await
    }

    async fn create_record(&self, table: &str, fields: &RecordFields) -> Result<SourceRecord> {
        self.inner().create_record(table, fields).await
    }

    async fn update_record(&self, table: &str, id: &str, fields: &RecordFields) -> Result<SourceRecord> {
        self.inner().update_record(table, id, fields).await
    }

    async fn delete_record(&self, table: &str, id: &str) -> Result<()> {
        self.inner().delete_record(table, id).await
    }
}
