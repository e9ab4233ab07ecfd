//! SourceConfig persistence using SQLite.
//!
//! Enforces one active configuration per tenant: activation deactivates the
//! previous row and inserts the new one in a single transaction, and a
//! partial unique index rejects any second active row.

use super::{ConnectionParams, FieldMappings, NewSourceConfig, SourceConfig, SourceKind};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

const SELECT_COLUMNS: &str = r#"
    id, tenant_id, source_kind,
    base_url, workspace_id, spreadsheet_id, sheet_name, account_email,
    access_token_enc, refresh_token_enc, token_expires_at,
    field_mappings, is_active, created_at, updated_at
"#;

/// Source configuration storage backed by SQLite.
///
/// # Schema
/// ```sql
/// CREATE TABLE source_configs (
///     id TEXT PRIMARY KEY,              -- UUID v7
///     tenant_id TEXT NOT NULL,
///     source_kind TEXT NOT NULL,        -- 'table-api' | 'spreadsheet'
///     base_url TEXT,
///     workspace_id TEXT,
///     spreadsheet_id TEXT,
///     sheet_name TEXT,
///     account_email TEXT,
///     access_token_enc TEXT,            -- Encrypted blob
///     refresh_token_enc TEXT,           -- Encrypted blob
///     token_expires_at TEXT,            -- RFC 3339
///     field_mappings TEXT,              -- JSON
///     is_active INTEGER NOT NULL,
///     created_at TEXT NOT NULL,
///     updated_at TEXT NOT NULL
/// );
/// CREATE UNIQUE INDEX ... ON source_configs(tenant_id) WHERE is_active = 1;
/// ```
///
/// # Thread Safety
/// - Connection is wrapped in Mutex; every operation is one statement or
///   one transaction under the lock
pub struct SourceConfigStore {
    conn: Mutex<Connection>,
}

impl SourceConfigStore {
    /// Opens (or creates) the database and ensures the schema exists.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path).context("Failed to open source config database")?;
        conn.busy_timeout(Duration::from_secs(5))
            .context("Failed to set busy timeout")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS source_configs (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                source_kind TEXT NOT NULL,
                base_url TEXT,
                workspace_id TEXT,
                spreadsheet_id TEXT,
                sheet_name TEXT,
                account_email TEXT,
                access_token_enc TEXT,
                refresh_token_enc TEXT,
                token_expires_at TEXT,
                field_mappings TEXT,
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_source_configs_active_tenant
                ON source_configs(tenant_id) WHERE is_active = 1;
            CREATE INDEX IF NOT EXISTS idx_source_configs_tenant
                ON source_configs(tenant_id);
            "#,
        )
        .context("Failed to create source_configs table")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Makes `new` the tenant's only active configuration.
    ///
    /// Deactivates any existing active row and inserts the new one in one
    /// transaction. On any failure nothing is written.
    pub fn activate(&self, new: &NewSourceConfig) -> Result<SourceConfig> {
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        let mappings = new
            .field_mappings
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .context("Failed to serialize field mappings")?;

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().context("Failed to begin transaction")?;

        let deactivated = tx
            .execute(
                "UPDATE source_configs SET is_active = 0, updated_at = ?2
                 WHERE tenant_id = ?1 AND is_active = 1",
                params![new.tenant_id, now],
            )
            .context("Failed to deactivate previous source config")?;

        tx.execute(
            r#"
            INSERT INTO source_configs (
                id, tenant_id, source_kind,
                base_url, workspace_id, spreadsheet_id, sheet_name, account_email,
                access_token_enc, refresh_token_enc, token_expires_at,
                field_mappings, is_active, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, 1, ?13, ?13)
            "#,
            params![
                id,
                new.tenant_id,
                new.source_kind.as_str(),
                new.connection.base_url,
                new.connection.workspace_id,
                new.connection.spreadsheet_id,
                new.connection.sheet_name,
                new.connection.account_email,
                new.access_token_enc,
                new.refresh_token_enc,
                new.token_expires_at.map(|dt| dt.to_rfc3339()),
                mappings,
                now,
            ],
        )
        .context("Failed to insert source config")?;

        let config = tx
            .query_row(
                &format!("SELECT {} FROM source_configs WHERE id = ?1", SELECT_COLUMNS),
                params![id],
                row_to_config,
            )
            .context("Failed to read back source config")?;

        tx.commit().context("Failed to commit source config")?;

        tracing::debug!(
            tenant_id = %new.tenant_id,
            source_kind = new.source_kind.as_str(),
            deactivated,
            "Source config activated"
        );

        Ok(config)
    }

    /// Returns the tenant's active configuration, if any.
    pub fn get_active(&self, tenant_id: &str) -> Result<Option<SourceConfig>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!(
                "SELECT {} FROM source_configs WHERE tenant_id = ?1 AND is_active = 1",
                SELECT_COLUMNS
            ),
            params![tenant_id],
            row_to_config,
        )
        .optional()
        .context("Failed to load active source config")
    }

    /// Returns every configuration row for a tenant, newest first.
    pub fn list_for_tenant(&self, tenant_id: &str) -> Result<Vec<SourceConfig>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM source_configs WHERE tenant_id = ?1 ORDER BY id DESC",
                SELECT_COLUMNS
            ))
            .context("Failed to prepare query")?;

        let configs = stmt
            .query_map(params![tenant_id], row_to_config)
            .context("Failed to execute query")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read results")?;

        Ok(configs)
    }

    /// Stores a refreshed access token.
    ///
    /// Compare-and-set on `(id, is_active = 1)`: returns `Ok(false)` without
    /// writing when the row was superseded. The refresh token column is only
    /// touched when `refresh_token_enc` is `Some`.
    pub fn update_tokens(
        &self,
        id: &str,
        access_token_enc: &str,
        refresh_token_enc: Option<&str>,
        token_expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let rows = self
            .conn
            .lock()
            .unwrap()
            .execute(
                r#"
                UPDATE source_configs SET
                    access_token_enc = ?2,
                    refresh_token_enc = COALESCE(?3, refresh_token_enc),
                    token_expires_at = ?4,
                    updated_at = ?5
                WHERE id = ?1 AND is_active = 1
                "#,
                params![
                    id,
                    access_token_enc,
                    refresh_token_enc,
                    token_expires_at.to_rfc3339(),
                    now
                ],
            )
            .context("Failed to update tokens")?;

        Ok(rows == 1)
    }

    /// Records the chosen sheet and confirmed field mapping.
    ///
    /// Compare-and-set on `(id, is_active = 1)` like [`Self::update_tokens`].
    pub fn save_selection(
        &self,
        id: &str,
        spreadsheet_id: &str,
        sheet_name: &str,
        mappings: &FieldMappings,
    ) -> Result<bool> {
        let mappings = serde_json::to_string(mappings).context("Failed to serialize field mappings")?;
        let now = Utc::now().to_rfc3339();
        let rows = self
            .conn
            .lock()
            .unwrap()
            .execute(
                r#"
                UPDATE source_configs SET
                    spreadsheet_id = ?2,
                    sheet_name = ?3,
                    field_mappings = ?4,
                    updated_at = ?5
                WHERE id = ?1 AND is_active = 1
                "#,
                params![id, spreadsheet_id, sheet_name, mappings, now],
            )
            .context("Failed to save source selection")?;

        Ok(rows == 1)
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Invalid timestamp '{}'", s))
}

fn row_to_config(row: &Row<'_>) -> rusqlite::Result<SourceConfig> {
    let kind: String = row.get(2)?;
    let expires_at: Option<String> = row.get(10)?;
    let mappings: Option<String> = row.get(11)?;
    let created_at: String = row.get(13)?;
    let updated_at: String = row.get(14)?;

    let decode = |idx: usize, e: anyhow::Error| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
    };

    let source_kind = SourceKind::parse(&kind)
        .ok_or_else(|| decode(2, anyhow!("Unknown source kind '{}'", kind)))?;
    let token_expires_at = expires_at
        .as_deref()
        .map(parse_timestamp)
        .transpose()
        .map_err(|e| decode(10, e))?;
    let field_mappings = mappings
        .as_deref()
        .map(|s| serde_json::from_str::<FieldMappings>(s).map_err(anyhow::Error::from))
        .transpose()
        .map_err(|e| decode(11, e))?;

    Ok(SourceConfig {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        source_kind,
        connection: ConnectionParams {
            base_url: row.get(3)?,
            workspace_id: row.get(4)?,
            spreadsheet_id: row.get(5)?,
            sheet_name: row.get(6)?,
            account_email: row.get(7)?,
        },
        access_token_enc: row.get(8)?,
        refresh_token_enc: row.get(9)?,
        token_expires_at,
        field_mappings,
        is_active: row.get::<_, i64>(12)? != 0,
        created_at: parse_timestamp(&created_at).map_err(|e| decode(13, e))?,
        updated_at: parse_timestamp(&updated_at).map_err(|e| decode(14, e))?,
    })
}
