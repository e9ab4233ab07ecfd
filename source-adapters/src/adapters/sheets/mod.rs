pub mod api;
pub mod config;

use async_trait::async_trait;
use geosource::error::Result;
use geosource::source_config::{FieldMappings, SourceKind};
use geosource::SourceError;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

use crate::adapter::{ColumnSchema, DataAdapter, Pagination, RecordFields, RecordPage, SourceRecord, TableSchema};
use crate::cache::RecordCache;
use crate::geometry;
use crate::rate_limit::ProviderRateLimiter;

use self::api::SheetsClient;
use self::config::sheet_range;

/// Header row followed by data rows, as display strings.
pub type SheetValues = Vec<Vec<String>>;

/// Spreadsheet adapter. Tables are the tabs of the tenant's configured
/// spreadsheet; the first row of a tab is its header.
///
/// Reads go through the shared [`RecordCache`]; every write invalidates the
/// table's entry. Every provider call is charged to the tenant's rate limit.
pub struct SheetsAdapter {
    tenant_id: String,
    client: SheetsClient,
    spreadsheet_id: Option<String>,
    mappings: Option<FieldMappings>,
    cache: Arc<RecordCache<SheetValues>>,
    limiter: Arc<ProviderRateLimiter>,
}

impl SheetsAdapter {
    pub fn new(
        tenant_id: String,
        client: SheetsClient,
        spreadsheet_id: Option<String>,
        mappings: Option<FieldMappings>,
        cache: Arc<RecordCache<SheetValues>>,
        limiter: Arc<ProviderRateLimiter>,
    ) -> Self {
        Self {
            tenant_id,
            client,
            spreadsheet_id,
            mappings,
            cache,
            limiter,
        }
    }

    fn spreadsheet_id(&self) -> Result<&str> {
        self.spreadsheet_id
            .as_deref()
            .ok_or_else(|| SourceError::not_found("No spreadsheet selected; complete setup first"))
    }

    /// Cache key: tabs of different spreadsheets never share an entry.
    fn cache_key(&self, table: &str) -> Result<String> {
        Ok(format!("{}/{}", self.spreadsheet_id()?, table))
    }

    async fn load(&self, table: &str) -> Result<Arc<SheetValues>> {
        let key = self.cache_key(table)?;
        if let Some(values) = self.cache.get(&self.tenant_id, &key) {
            debug!(tenant_id = %self.tenant_id, table = %table, "Record cache hit");
            return Ok(values);
        }

        self.limiter.check(&self.tenant_id)?;
        let values = self
            .client
            .get_values(self.spreadsheet_id()?, &sheet_range(table, None))
            .await?;
        Ok(self.cache.insert(&self.tenant_id, &key, values))
    }

    /// Read bypassing the cache, for writes that address rows by position.
    async fn load_fresh(&self, table: &str) -> Result<Arc<SheetValues>> {
        self.invalidate(table)?;
        self.load(table).await
    }

    fn invalidate(&self, table: &str) -> Result<()> {
        let key = self.cache_key(table)?;
        self.cache.invalidate(&self.tenant_id, &key);
        Ok(())
    }

    fn to_record(&self, header: &[String], row: &[String], row_number: usize) -> SourceRecord {
        let attributes: Map<String, Value> = header
            .iter()
            .enumerate()
            .map(|(i, col)| {
                let cell = row.get(i).cloned().unwrap_or_default();
                (col.clone(), Value::String(cell))
            })
            .collect();

        let id = self
            .mappings
            .as_ref()
            .and_then(|m| attributes.get(&m.id_field))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("row-{}", row_number));

        let geometry = self
            .mappings
            .as_ref()
            .and_then(|m| geometry::resolve(&attributes, m));

        SourceRecord {
            id,
            attributes,
            geometry,
        }
    }

    /// Records with their sheet row numbers. Blank rows are skipped.
    fn records(&self, values: &SheetValues) -> Vec<(usize, SourceRecord)> {
        let Some((header, rows)) = values.split_first() else {
            return Vec::new();
        };

        rows.iter()
            .enumerate()
            .filter(|(_, row)| row.iter().any(|c| !c.trim().is_empty()))
            .map(|(i, row)| {
                let row_number = i + 2;
                (row_number, self.to_record(header, row, row_number))
            })
            .collect()
    }

    fn find(&self, values: &SheetValues, table: &str, id: &str) -> Result<(usize, SourceRecord)> {
        self.records(values)
            .into_iter()
            .find(|(_, r)| r.id == id)
            .ok_or_else(|| SourceError::not_found(format!("Record '{}' not found in '{}'", id, table)))
    }

    /// Merge `fields` into `base` and lay the result out in header order.
    fn build_row(
        &self,
        header: &[String],
        mut base: Map<String, Value>,
        fields: &RecordFields,
    ) -> Result<Vec<String>> {
        if let Some(unknown) = fields.attributes.keys().find(|k| !header.contains(k)) {
            return Err(SourceError::validation(format!("Unknown column '{}'", unknown)));
        }
        base.extend(fields.attributes.clone());

        if let Some(geometry) = &fields.geometry {
            let mappings = self
                .mappings
                .as_ref()
                .ok_or_else(|| SourceError::validation("Field mapping is not configured"))?;
            geometry::write_back(&mut base, geometry, mappings)?;
        }

        Ok(header
            .iter()
            .map(|col| match base.get(col) {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            })
            .collect())
    }
}

#[async_trait]
impl DataAdapter for SheetsAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Spreadsheet
    }

    /// Tabs of the configured spreadsheet; empty until one is selected.
    async fn list_tables(&self) -> Result<Vec<String>> {
        let Some(spreadsheet_id) = self.spreadsheet_id.as_deref() else {
            return Ok(Vec::new());
        };

        self.limiter.check(&self.tenant_id)?;
        let sheets = self.client.list_sheets(spreadsheet_id).await?;
        Ok(sheets.into_iter().map(|s| s.title).collect())
    }

    async fn get_schema(&self, table: &str) -> Result<TableSchema> {
        let values = self.load(table).await?;
        let columns = values
            .first()
            .map(|header| {
                header
                    .iter()
                    .map(|name| ColumnSchema {
                        name: name.clone(),
                        field_type: None,
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(TableSchema {
            name: table.to_string(),
            columns,
        })
    }

    async fn list_records(&self, table: &str, pagination: &Pagination) -> Result<RecordPage> {
        let offset = match pagination.cursor.as_deref() {
            Some(c) => c
                .parse::<usize>()
                .map_err(|_| SourceError::validation("Invalid pagination cursor"))?,
            None => 0,
        };
        let page_size = pagination.page_size();

        let values = self.load(table).await?;
        let all = self.records(&values);
        let records: Vec<_> = all
            .iter()
            .skip(offset)
            .take(page_size)
            .map(|(_, r)| r.clone())
            .collect();
        let next = offset + records.len();

        Ok(RecordPage {
            records,
            next_cursor: (next < all.len()).then(|| next.to_string()),
        })
    }

    async fn get_record(&self, table: &str, id: &str) -> Result<SourceRecord> {
        let values = self.load(table).await?;
        self.find(&values, table, id).map(|(_, r)| r)
    }

    async fn create_record(&self, table: &str, fields: &RecordFields) -> Result<SourceRecord> {
        let spreadsheet_id = self.spreadsheet_id()?;
        let values = self.load(table).await?;
        let header = values
            .first()
            .ok_or_else(|| SourceError::validation(format!("Sheet '{}' has no header row", table)))?;

        let row = self.build_row(header, Map::new(), fields)?;

        self.limiter.check(&self.tenant_id)?;
        let appended = self.client.append_row(spreadsheet_id, table, row.clone()).await;
        self.invalidate(table)?;
        let row_number = appended?.unwrap_or(values.len() + 1);

        debug!(tenant_id = %self.tenant_id, table = %table, row = row_number, "Row appended");
        Ok(self.to_record(header, &row, row_number))
    }

    async fn update_record(&self, table: &str, id: &str, fields: &RecordFields) -> Result<SourceRecord> {
        let spreadsheet_id = self.spreadsheet_id()?;
        let values = self.load_fresh(table).await?;
        let (row_number, existing) = self.find(&values, table, id)?;
        let header = &values[0];

        let row = self.build_row(header, existing.attributes, fields)?;

        self.limiter.check(&self.tenant_id)?;
        let updated = self
            .client
            .update_row(spreadsheet_id, table, row_number, row.clone())
            .await;
        self.invalidate(table)?;
        updated?;

        Ok(self.to_record(header, &row, row_number))
    }

    async fn delete_record(&self, table: &str, id: &str) -> Result<()> {
        let spreadsheet_id = self.spreadsheet_id()?;
        let values = self.load_fresh(table).await?;
        let (row_number, _) = self.find(&values, table, id)?;

        self.limiter.check(&self.tenant_id)?;
        let sheet_id = self
            .client
            .list_sheets(spreadsheet_id)
            .await?
            .into_iter()
            .find(|s| s.title == table)
            .map(|s| s.sheet_id)
            .ok_or_else(|| SourceError::not_found(format!("Sheet '{}' not found", table)))?;

        self.limiter.check(&self.tenant_id)?;
        let deleted = self.client.delete_row(spreadsheet_id, sheet_id, row_number).await;
        self.invalidate(table)?;
        deleted?;

        debug!(tenant_id = %self.tenant_id, table = %table, row = row_number, "Row deleted");
        Ok(())
    }
}
