//! Resolves a tenant to its data adapter.
//!
//! The factory is the only place adapters are built. For spreadsheet
//! sources it makes sure the access token is valid before handing out a
//! client, refreshing it through the OAuth coordinator when it is expired
//! or about to expire.

use chrono::Duration;
use geosource::error::Result;
use geosource::oauth::OAuthCoordinator;
use geosource::source_config::{SourceConfig, SourceKind};
use geosource::SourceError;
use std::sync::Arc;
use tracing::error;

use crate::adapter::SourceAdapter;
use crate::adapters::sheets::api::SheetsClient;
use crate::adapters::sheets::config::SheetsEndpoints;
use crate::adapters::sheets::{SheetValues, SheetsAdapter};
use crate::adapters::table_api::api::TableApiClient;
use crate::adapters::table_api::TableApiAdapter;
use crate::cache::RecordCache;
use crate::rate_limit::ProviderRateLimiter;

/// Tokens this close to expiry are refreshed before use
pub const REFRESH_MARGIN_SECS: i64 = 60;

pub struct AdapterFactory {
    coordinator: Arc<OAuthCoordinator>,
    endpoints: SheetsEndpoints,
    cache: Arc<RecordCache<SheetValues>>,
    limiter: Arc<ProviderRateLimiter>,
}

impl AdapterFactory {
    pub fn new(
        coordinator: Arc<OAuthCoordinator>,
        endpoints: SheetsEndpoints,
        cache: Arc<RecordCache<SheetValues>>,
        limiter: Arc<ProviderRateLimiter>,
    ) -> Self {
        Self {
            coordinator,
            endpoints,
            cache,
            limiter,
        }
    }

    pub fn coordinator(&self) -> &Arc<OAuthCoordinator> {
        &self.coordinator
    }

    pub fn cache(&self) -> &Arc<RecordCache<SheetValues>> {
        &self.cache
    }

    pub fn limiter(&self) -> &Arc<ProviderRateLimiter> {
        &self.limiter
    }

    /// Build the adapter for a tenant's active source.
    ///
    /// Fails with `NotFoundError` when the tenant has no active source and
    /// with `RefreshError` when an expired token cannot be renewed.
    pub async fn get_adapter(&self, tenant_id: &str) -> Result<SourceAdapter> {
        let config = self.active_config(tenant_id).await?;

        match config.source_kind {
            SourceKind::TableApi => {
                let base_url = config.connection.base_url.clone().ok_or_else(|| {
                    SourceError::validation("Table-API source has no base URL configured")
                })?;
                let workspace_id = config.connection.workspace_id.clone().ok_or_else(|| {
                    SourceError::validation("Table-API source has no workspace configured")
                })?;
                let api_key = self.decrypt_access_token(&config)?;

                let client = TableApiClient::new(
                    api_key,
                    self.coordinator.http().clone(),
                    base_url,
                    workspace_id,
                );
                Ok(SourceAdapter::TableApi(TableApiAdapter::new(
                    client,
                    config.field_mappings,
                )))
            }
            SourceKind::Spreadsheet => {
                let client = self.sheets_client(&config)?;
                Ok(SourceAdapter::Spreadsheet(SheetsAdapter::new(
                    config.tenant_id,
                    client,
                    config.connection.spreadsheet_id,
                    config.field_mappings,
                    self.cache.clone(),
                    self.limiter.clone(),
                )))
            }
        }
    }

    /// Active spreadsheet source and a client authenticated for it.
    ///
    /// Used by setup steps that run before a spreadsheet is selected.
    pub async fn spreadsheet_session(&self, tenant_id: &str) -> Result<(SourceConfig, SheetsClient)> {
        let config = self.active_config(tenant_id).await?;
        if config.source_kind != SourceKind::Spreadsheet {
            return Err(SourceError::validation(
                "The active data source for this tenant is not a spreadsheet",
            ));
        }
        let client = self.sheets_client(&config)?;
        Ok((config, client))
    }

    async fn active_config(&self, tenant_id: &str) -> Result<SourceConfig> {
        if tenant_id.trim().is_empty() {
            return Err(SourceError::validation("tenantId is required"));
        }
        self.coordinator
            .ensure_fresh_token(tenant_id, Duration::seconds(REFRESH_MARGIN_SECS))
            .await
    }

    fn sheets_client(&self, config: &SourceConfig) -> Result<SheetsClient> {
        let access_token = self.decrypt_access_token(config)?;
        Ok(SheetsClient::new(
            access_token,
            self.coordinator.http().clone(),
            self.endpoints.clone(),
        ))
    }

    fn decrypt_access_token(&self, config: &SourceConfig) -> Result<String> {
        let blob = config.access_token_enc.as_deref().ok_or_else(|| {
            SourceError::not_found("Data source has no stored credentials; please reconnect")
        })?;

        self.coordinator.cipher()?.decrypt(blob).map_err(|e| {
            error!(
                tenant_id = %config.tenant_id,
                config_id = %config.id,
                operation = "get_adapter",
                "Failed to decrypt access token"
            );
            SourceError::from(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::DataAdapter;
    use crate::cache::DEFAULT_TTL;
    use chrono::Utc;
    use geosource::config::OAuthSettings;
    use geosource::oauth::{OAuthStateStore, ProviderEndpoints, STATE_TTL_MINUTES};
    use geosource::source_config::{ConnectionParams, NewSourceConfig, SourceConfigStore};
    use mockito::{Matcher, Server, ServerGuard};

    fn factory(server: &ServerGuard) -> AdapterFactory {
        let coordinator = Arc::new(OAuthCoordinator::new(
            OAuthSettings {
                client_id: Some("client-id".to_string()),
                client_secret: Some("client-secret".to_string()),
                redirect_uri: Some(format!("{}/api/oauth/callback", server.url())),
                ..Default::default()
            },
            Some("test-master-key".to_string()),
            ProviderEndpoints {
                auth_url: format!("{}/auth", server.url()),
                token_url: format!("{}/token", server.url()),
                userinfo_url: format!("{}/userinfo", server.url()),
            },
            Arc::new(OAuthStateStore::new(":memory:", STATE_TTL_MINUTES).unwrap()),
            Arc::new(SourceConfigStore::new(":memory:").unwrap()),
            reqwest::Client::new(),
        ));
        AdapterFactory::new(
            coordinator,
            SheetsEndpoints {
                sheets_base_url: server.url(),
                drive_base_url: server.url(),
            },
            Arc::new(RecordCache::new(DEFAULT_TTL)),
            Arc::new(ProviderRateLimiter::new(100, std::time::Duration::from_secs(100))),
        )
    }

    fn seed_spreadsheet(factory: &AdapterFactory, expires_in: Duration) -> SourceConfig {
        let coordinator = factory.coordinator();
        let cipher = coordinator.cipher().unwrap();
        coordinator
            .configs()
            .activate(&NewSourceConfig {
                tenant_id: "t1".to_string(),
                source_kind: SourceKind::Spreadsheet,
                connection: ConnectionParams {
                    spreadsheet_id: Some("s1".to_string()),
                    sheet_name: Some("Parcels".to_string()),
                    ..Default::default()
                },
                access_token_enc: Some(cipher.encrypt("access-old").unwrap()),
                refresh_token_enc: Some(cipher.encrypt("refresh-1").unwrap()),
                token_expires_at: Some(Utc::now() + expires_in),
                field_mappings: None,
            })
            .unwrap()
    }

    async fn mock_sheet_list(server: &mut ServerGuard, token: &str) -> mockito::Mock {
        server
            .mock("GET", "/v4/spreadsheets/s1")
            .match_query(Matcher::Any)
            .match_header("authorization", format!("Bearer {}", token).as_str())
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"sheets":[{"properties":{"sheetId":0,"title":"Parcels","index":0}}]}"#)
            .create_async()
            .await
    }

    #[tokio::test]
    async fn test_unknown_tenant_is_not_found() {
        let server = Server::new_async().await;
        let err = factory(&server).get_adapter("nobody").await.unwrap_err();
        assert!(matches!(err, SourceError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_valid_token_is_used_without_refresh() {
        let mut server = Server::new_async().await;
        let token_mock = server.mock("POST", "/token").expect(0).create_async().await;
        let sheets = mock_sheet_list(&mut server, "access-old").await;
        let factory = factory(&server);
        seed_spreadsheet(&factory, Duration::hours(1));

        let adapter = factory.get_adapter("t1").await.unwrap();
        assert_eq!(adapter.kind(), SourceKind::Spreadsheet);
        assert_eq!(adapter.list_tables().await.unwrap(), vec!["Parcels"]);

        token_mock.assert_async().await;
        sheets.assert_async().await;
    }

    #[tokio::test]
    async fn test_expiring_token_is_refreshed_first() {
        let mut server = Server::new_async().await;
        let token_mock = server
            .mock("POST", "/token")
            .match_body(Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"access-new","expires_in":3600}"#)
            .expect(1)
            .create_async()
            .await;
        let sheets = mock_sheet_list(&mut server, "access-new").await;
        let factory = factory(&server);
        // Inside the refresh margin
        let seeded = seed_spreadsheet(&factory, Duration::seconds(30));

        let adapter = factory.get_adapter("t1").await.unwrap();
        adapter.list_tables().await.unwrap();

        let stored = factory.coordinator().configs().get_active("t1").unwrap().unwrap();
        assert!(stored.token_expires_at > seeded.token_expires_at);
        // Refresh token kept when the provider does not rotate it
        assert_eq!(stored.refresh_token_enc, seeded.refresh_token_enc);
        token_mock.assert_async().await;
        sheets.assert_async().await;
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_refresh() {
        let mut server = Server::new_async().await;
        let token_mock = server
            .mock("POST", "/token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"access-new","expires_in":3600}"#)
            .expect(1)
            .create_async()
            .await;
        let factory = Arc::new(factory(&server));
        seed_spreadsheet(&factory, -Duration::minutes(5));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let factory = factory.clone();
                tokio::spawn(async move { factory.get_adapter("t1").await.map(|_| ()) })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        token_mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_failed_refresh_leaves_config_unchanged() {
        let mut server = Server::new_async().await;
        let _token_mock = server
            .mock("POST", "/token")
            .with_status(400)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error":"invalid_grant","error_description":"Token has been revoked"}"#)
            .create_async()
            .await;
        let factory = factory(&server);
        let seeded = seed_spreadsheet(&factory, -Duration::minutes(5));

        let err = factory.get_adapter("t1").await.unwrap_err();
        assert!(matches!(err, SourceError::Refresh(_)));

        let stored = factory.coordinator().configs().get_active("t1").unwrap().unwrap();
        assert_eq!(stored.access_token_enc, seeded.access_token_enc);
        assert_eq!(stored.token_expires_at, seeded.token_expires_at);
    }

    #[tokio::test]
    async fn test_table_api_adapter_uses_decrypted_key() {
        let mut server = Server::new_async().await;
        let tables = server
            .mock("GET", "/v0/meta/bases/app1/tables")
            .match_header("authorization", "Bearer key-plain")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"tables":[{"id":"tbl1","name":"Wells"}]}"#)
            .create_async()
            .await;
        let factory = factory(&server);
        let coordinator = factory.coordinator();
        coordinator
            .configs()
            .activate(&NewSourceConfig {
                tenant_id: "t1".to_string(),
                source_kind: SourceKind::TableApi,
                connection: ConnectionParams {
                    base_url: Some(server.url()),
                    workspace_id: Some("app1".to_string()),
                    ..Default::default()
                },
                access_token_enc: Some(coordinator.cipher().unwrap().encrypt("key-plain").unwrap()),
                refresh_token_enc: None,
                token_expires_at: None,
                field_mappings: None,
            })
            .unwrap();

        let adapter = factory.get_adapter("t1").await.unwrap();
        assert_eq!(adapter.kind(), SourceKind::TableApi);
        assert!(!format!("{:?}", adapter).contains("key-plain"));
        assert_eq!(adapter.list_tables().await.unwrap(), vec!["Wells"]);
        tables.assert_async().await;
    }

    #[tokio::test]
    async fn test_corrupt_token_is_decryption_error() {
        let server = Server::new_async().await;
        let factory = factory(&server);
        factory
            .coordinator()
            .configs()
            .activate(&NewSourceConfig {
                tenant_id: "t1".to_string(),
                source_kind: SourceKind::Spreadsheet,
                connection: ConnectionParams::default(),
                access_token_enc: Some("bm90LWEtcmVhbC1ibG9i".to_string()),
                refresh_token_enc: None,
                token_expires_at: Some(Utc::now() + Duration::hours(1)),
                field_mappings: None,
            })
            .unwrap();

        let err = factory.get_adapter("t1").await.unwrap_err();
        assert!(matches!(err, SourceError::Decryption));
    }
}
