pub mod api;

use async_trait::async_trait;
use geosource::error::Result;
use geosource::source_config::{FieldMappings, SourceKind};
use geosource::SourceError;
use serde_json::{Map, Value};

use crate::adapter::{ColumnSchema, DataAdapter, Pagination, RecordFields, RecordPage, SourceRecord, TableSchema};
use crate::geometry;

use self::api::{ApiRecord, TableApiClient};

/// Table-API adapter. Reads always hit the service: it has no tight rate
/// limit and callers expect live state, so nothing is cached.
pub struct TableApiAdapter {
    client: TableApiClient,
    mappings: Option<FieldMappings>,
}

impl TableApiAdapter {
    pub fn new(client: TableApiClient, mappings: Option<FieldMappings>) -> Self {
        Self { client, mappings }
    }

    fn normalize(&self, record: ApiRecord) -> SourceRecord {
        let geometry = self
            .mappings
            .as_ref()
            .and_then(|m| geometry::resolve(&record.fields, m));

        SourceRecord {
            id: record.id,
            attributes: record.fields,
            geometry,
        }
    }

    fn outgoing_fields(&self, fields: &RecordFields) -> Result<Map<String, Value>> {
        let mut out = fields.attributes.clone();
        if let Some(geometry) = &fields.geometry {
            let mappings = self
                .mappings
                .as_ref()
                .ok_or_else(|| SourceError::validation("Field mapping is not configured"))?;
            geometry::write_back(&mut out, geometry, mappings)?;
        }
        Ok(out)
    }
}

#[async_trait]
impl DataAdapter for TableApiAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::TableApi
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        let tables = self.client.list_tables().await?;
        Ok(tables.into_iter().map(|t| t.name).collect())
    }

    /// Looks the table up by name or id.
    async fn get_schema(&self, table: &str) -> Result<TableSchema> {
        let meta = self
            .client
            .list_tables()
            .await?
            .into_iter()
            .find(|t| t.name == table || t.id == table)
            .ok_or_else(|| SourceError::not_found(format!("Table '{}' not found", table)))?;

        Ok(TableSchema {
            name: meta.name,
            columns: meta
                .fields
                .into_iter()
                .map(|f| ColumnSchema {
                    name: f.name,
                    field_type: f.field_type,
                })
                .collect(),
        })
    }

    async fn list_records(&self, table: &str, pagination: &Pagination) -> Result<RecordPage> {
        let list = self
            .client
            .list_records(table, pagination.page_size(), pagination.cursor.as_deref())
            .await?;

        Ok(RecordPage {
            records: list.records.into_iter().map(|r| self.normalize(r)).collect(),
            next_cursor: list.offset,
        })
    }

    async fn get_record(&self, table: &str, id: &str) -> Result<SourceRecord> {
        let record = self.client.get_record(table, id).await?;
        Ok(self.normalize(record))
    }

    async fn create_record(&self, table: &str, fields: &RecordFields) -> Result<SourceRecord> {
        let out = self.outgoing_fields(fields)?;
        let record = self.client.create_record(table, &out).await?;
        Ok(self.normalize(record))
    }

    async fn update_record(&self, table: &str, id: &str, fields: &RecordFields) -> Result<SourceRecord> {
        let out = self.outgoing_fields(fields)?;
        let record = self.client.update_record(table, id, &out).await?;
        Ok(self.normalize(record))
    }

    async fn delete_record(&self, table: &str, id: &str) -> Result<()> {
        self.client.delete_record(table, id).await
    }
}
