//! OAuth state storage for CSRF protection.
//!
//! State tokens are single-use and time-boxed. They are persisted in SQLite
//! so a callback landing on a different request handler than the one that
//! started the flow still validates.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rand::{rngs::OsRng, RngCore};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Default lifetime of a state token
pub const STATE_TTL_MINUTES: i64 = 15;

/// Bytes of randomness in a state token (rendered as 64 hex chars)
const TOKEN_BYTES: usize = 32;

/// A pending authorization request.
#[derive(Clone, Debug, PartialEq)]
pub struct OAuthState {
    pub token: String,
    pub tenant_id: String,
    pub admin_email: String,
    pub redirect_uri: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Result of presenting a state token.
#[derive(Debug, PartialEq)]
pub enum ConsumeOutcome {
    Valid(OAuthState),
    /// Unknown token, or already consumed.
    NotFound,
    /// Token existed but its TTL had elapsed. It has been deleted.
    Expired,
}

/// Persistent single-use state tokens.
pub struct OAuthStateStore {
    conn: Mutex<Connection>,
    ttl: Duration,
}

impl OAuthStateStore {
    /// Opens (or creates) the state table.
    ///
    /// # Arguments
    /// * `db_path` - Path to SQLite database file
    /// * `ttl_minutes` - How long states remain valid (default: 15 minutes)
    pub fn new<P: AsRef<Path>>(db_path: P, ttl_minutes: i64) -> Result<Self> {
        let conn = Connection::open(db_path).context("Failed to open OAuth state database")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .context("Failed to set busy timeout")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS oauth_states (
                token TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                admin_email TEXT NOT NULL,
                redirect_uri TEXT NOT NULL,
                created_at TEXT NOT NULL,
                expires_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_oauth_states_expires ON oauth_states(expires_at);
            "#,
        )
        .context("Failed to create oauth_states table")?;

        Ok(Self {
            conn: Mutex::new(conn),
            ttl: Duration::minutes(ttl_minutes),
        })
    }

    /// Generates a new state token bound to a tenant and stores it.
    pub fn create(&self, tenant_id: &str, admin_email: &str, redirect_uri: &str) -> Result<String> {
        self.create_at(tenant_id, admin_email, redirect_uri, Utc::now())
    }

    /// Same as [`Self::create`] with an explicit creation time.
    pub fn create_at(
        &self,
        tenant_id: &str,
        admin_email: &str,
        redirect_uri: &str,
        created_at: DateTime<Utc>,
    ) -> Result<String> {
        let token = generate_token();
        let expires_at = created_at + self.ttl;

        self.conn
            .lock()
            .unwrap()
            .execute(
                r#"
                INSERT INTO oauth_states (token, tenant_id, admin_email, redirect_uri, created_at, expires_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    token,
                    tenant_id,
                    admin_email,
                    redirect_uri,
                    format_timestamp(created_at),
                    format_timestamp(expires_at)
                ],
            )
            .context("Failed to store OAuth state")?;

        Ok(token)
    }

    /// Validates and consumes a state token.
    ///
    /// The row is removed by the same statement that reads it, so two
    /// callbacks presenting one token cannot both succeed.
    pub fn consume(&self, token: &str) -> Result<ConsumeOutcome> {
        self.consume_at(token, Utc::now())
    }

    pub fn consume_at(&self, token: &str, now: DateTime<Utc>) -> Result<ConsumeOutcome> {
        let row = self
            .conn
            .lock()
            .unwrap()
            .query_row(
                r#"
                DELETE FROM oauth_states WHERE token = ?1
                RETURNING tenant_id, admin_email, redirect_uri, created_at, expires_at
                "#,
                params![token],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()
            .context("Failed to consume OAuth state")?;

        let Some((tenant_id, admin_email, redirect_uri, created_at, expires_at)) = row else {
            return Ok(ConsumeOutcome::NotFound);
        };

        let created_at = parse_timestamp(&created_at)?;
        let expires_at = parse_timestamp(&expires_at)?;

        if now >= expires_at {
            return Ok(ConsumeOutcome::Expired);
        }

        Ok(ConsumeOutcome::Valid(OAuthState {
            token: token.to_string(),
            tenant_id,
            admin_email,
            redirect_uri,
            created_at,
            expires_at,
        }))
    }

    /// Deletes states whose TTL has elapsed. Returns the number removed.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        // Fixed-width UTC timestamps compare lexicographically in time order
        let removed = self
            .conn
            .lock()
            .unwrap()
            .execute(
                "DELETE FROM oauth_states WHERE expires_at <= ?1",
                params![format_timestamp(now)],
            )
            .context("Failed to purge expired OAuth states")?;
        Ok(removed)
    }

    /// Count of stored states (for debugging/monitoring)
    pub fn count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .lock()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM oauth_states", [], |row| row.get(0))
            .context("Failed to count OAuth states")?;
        Ok(count as usize)
    }
}

fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Invalid OAuth state timestamp '{}'", s))
}

/// Background task to periodically purge expired states
pub async fn run_state_cleanup(store: Arc<OAuthStateStore>, interval_seconds: u64) {
    let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(interval_seconds));

    loop {
        interval.tick().await;
        match store.purge_expired(Utc::now()) {
            Ok(removed) => tracing::debug!(removed, "OAuth state cleanup complete"),
            Err(e) => tracing::warn!(error = %e, "OAuth state cleanup failed"),
        }
    }
}
