//! OAuth 2.0 authorization flow for connecting a tenant's spreadsheet account.
//!
//! Implements the authorization code flow:
//! 1. Admin clicks "Connect spreadsheet" in the setup UI
//! 2. GET /api/oauth/start → authorization URL with a fresh state token
//! 3. Admin authorizes on the provider's site
//! 4. Provider redirects to /api/oauth/callback
//! 5. Exchange code for tokens, encrypt them, activate a new source config
//! 6. Browser continues to the setup UI to pick a sheet and map fields
//!
//! Access tokens are renewed through [`OAuthCoordinator::refresh`], either
//! on demand (POST /api/oauth/refresh) or transparently before an adapter
//! is built ([`OAuthCoordinator::ensure_fresh_token`]).

pub mod exchange;
pub mod provider;
mod state_store;

pub use provider::ProviderEndpoints;
pub use state_store::{run_state_cleanup, ConsumeOutcome, OAuthState, OAuthStateStore, STATE_TTL_MINUTES};

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

use crate::config::{OAuthClient, OAuthSettings};
use crate::credentials::CredentialCipher;
use crate::error::{Result, SourceError, StateFailure};
use crate::source_config::{
    ConnectionParams, NewSourceConfig, SourceConfig, SourceConfigStore, SourceKind,
};
use exchange::ClientCredentials;

/// Query parameters delivered to the callback endpoint.
#[derive(Debug, Default, Clone, serde::Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

/// Result of a successful callback.
#[derive(Debug, Clone)]
pub struct CallbackOutcome {
    /// Where the browser is sent next
    pub redirect_url: String,
    pub tenant_id: String,
    pub email: String,
}

/// Drives the connect, callback and refresh operations.
pub struct OAuthCoordinator {
    settings: OAuthSettings,
    cipher: Option<CredentialCipher>,
    endpoints: ProviderEndpoints,
    states: Arc<OAuthStateStore>,
    configs: Arc<SourceConfigStore>,
    http: reqwest::Client,
    /// One refresh in flight per tenant
    refresh_locks: RefreshLocks,
}

type RefreshLocks = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

/// A held per-tenant refresh lock. The map entry goes away with its last holder.
struct RefreshGuard<'a> {
    locks: &'a RefreshLocks,
    tenant_id: String,
    guard: Option<tokio::sync::OwnedMutexGuard<()>>,
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap();
        self.guard.take();
        if locks.get(&self.tenant_id).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(&self.tenant_id);
        }
    }
}

impl OAuthCoordinator {
    /// Creates a coordinator.
    ///
    /// A missing or empty `master_key` is not an error here; operations that
    /// need it fail with `ConfigurationError` so the rest of the service can
    /// still start.
    pub fn new(
        settings: OAuthSettings,
        master_key: Option<String>,
        endpoints: ProviderEndpoints,
        states: Arc<OAuthStateStore>,
        configs: Arc<SourceConfigStore>,
        http: reqwest::Client,
    ) -> Self {
        let cipher = master_key.and_then(|k| CredentialCipher::new(k).ok());
        if cipher.is_none() {
            warn!("GEOSOURCE_ENCRYPTION_KEY not set; credential storage is disabled");
        }

        Self {
            settings,
            cipher,
            endpoints,
            states,
            configs,
            http,
            refresh_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn configs(&self) -> &Arc<SourceConfigStore> {
        &self.configs
    }

    pub fn states(&self) -> &Arc<OAuthStateStore> {
        &self.states
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// The credential cipher, or `ConfigurationError` when no master key is configured.
    pub fn cipher(&self) -> Result<&CredentialCipher> {
        self.cipher.as_ref().ok_or_else(|| {
            SourceError::Configuration("GEOSOURCE_ENCRYPTION_KEY is not set".to_string())
        })
    }

    fn client(&self) -> Result<OAuthClient> {
        self.settings.require()
    }

    /// Begins a connection for a tenant and returns the provider authorization URL.
    pub fn start(&self, tenant_id: &str, admin_email: &str) -> Result<String> {
        if tenant_id.trim().is_empty() {
            return Err(SourceError::validation("tenantId is required"));
        }
        if admin_email.trim().is_empty() {
            return Err(SourceError::validation("adminEmail is required"));
        }

        let client = self.client()?;
        // Fail before issuing a state if tokens could not be stored afterwards
        self.cipher()?;

        let token = self
            .states
            .create(tenant_id, admin_email, &client.redirect_uri)?;

        info!(tenant_id = %tenant_id, "OAuth connection started");
        Ok(self
            .endpoints
            .build_auth_url(&client.client_id, &client.redirect_uri, &token))
    }

    /// Completes a connection.
    ///
    /// The state token is consumed before anything else so it can never be
    /// replayed, even when the provider reported an error.
    pub async fn callback(&self, params: CallbackParams) -> Result<CallbackOutcome> {
        let token = params
            .state
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or(SourceError::State(StateFailure::NotFound))?;

        let state = match self.states.consume(token)? {
            ConsumeOutcome::Valid(state) => state,
            ConsumeOutcome::NotFound => {
                warn!("OAuth callback with unknown or reused state");
                return Err(SourceError::State(StateFailure::NotFound));
            }
            ConsumeOutcome::Expired => {
                warn!("OAuth callback with expired state");
                return Err(SourceError::State(StateFailure::Expired));
            }
        };
        let tenant_id = state.tenant_id.clone();

        if let Some(provider_error) = params.error {
            warn!(tenant_id = %tenant_id, error = %provider_error, "Provider denied authorization");
            return Err(SourceError::TokenExchange(provider_error));
        }

        let code = params
            .code
            .filter(|c| !c.is_empty())
            .ok_or_else(|| SourceError::validation("Missing 'code' parameter"))?;

        let client = self.client()?;
        let cipher = self.cipher()?;

        let grant = exchange::exchange_code(
            &self.http,
            &self.endpoints.token_url,
            &ClientCredentials {
                client_id: &client.client_id,
                client_secret: &client.client_secret,
            },
            &code,
            &state.redirect_uri,
        )
        .await
        .map_err(|e| {
            error!(tenant_id = %tenant_id, error = %e, "Token exchange failed");
            SourceError::TokenExchange(e)
        })?;

        let refresh_token = grant.refresh_token.as_deref().ok_or_else(|| {
            error!(tenant_id = %tenant_id, "Provider did not issue a refresh token");
            SourceError::TokenExchange("provider did not issue a refresh token".to_string())
        })?;

        let email = match exchange::fetch_user_email(
            &self.http,
            &self.endpoints.userinfo_url,
            &grant.access_token,
        )
        .await
        {
            Ok(email) => email,
            Err(e) => {
                warn!(tenant_id = %tenant_id, error = %e, "Userinfo lookup failed, using admin email");
                state.admin_email.clone()
            }
        };

        let new = NewSourceConfig {
            tenant_id: tenant_id.clone(),
            source_kind: SourceKind::Spreadsheet,
            connection: ConnectionParams {
                account_email: Some(email.clone()),
                ..Default::default()
            },
            access_token_enc: Some(cipher.encrypt(&grant.access_token)?),
            refresh_token_enc: Some(cipher.encrypt(refresh_token)?),
            token_expires_at: Some(grant.expires_at),
            field_mappings: None,
        };
        let config = self.configs.activate(&new)?;

        info!(
            tenant_id = %tenant_id,
            config_id = %config.id,
            "Spreadsheet account connected"
        );

        Ok(CallbackOutcome {
            redirect_url: continuation_url(&self.settings.continuation_url, &email, &tenant_id),
            tenant_id,
            email,
        })
    }

    /// Obtains a new access token for the tenant's active configuration.
    ///
    /// Returns the new expiry. On any failure the stored configuration is
    /// left unchanged.
    pub async fn refresh(&self, tenant_id: &str) -> Result<DateTime<Utc>> {
        if tenant_id.trim().is_empty() {
            return Err(SourceError::validation("tenantId is required"));
        }

        let _guard = self.lock_refresh(tenant_id).await;

        let config = self.active_config(tenant_id)?;
        self.refresh_locked(&config).await
    }

    /// Returns the active configuration with an access token valid for at
    /// least `margin`, refreshing first when needed.
    ///
    /// Concurrent callers for one tenant share a single refresh: the config
    /// is re-read after the lock is taken, so later callers see the token the
    /// first one stored.
    pub async fn ensure_fresh_token(&self, tenant_id: &str, margin: Duration) -> Result<SourceConfig> {
        let config = self.active_config(tenant_id)?;
        if config.source_kind != SourceKind::Spreadsheet || !config.token_expired(Utc::now(), margin) {
            return Ok(config);
        }

        let _guard = self.lock_refresh(tenant_id).await;

        let config = self.active_config(tenant_id)?;
        if !config.token_expired(Utc::now(), margin) {
            debug!(tenant_id = %tenant_id, "Token already refreshed by a concurrent request");
            return Ok(config);
        }

        self.refresh_locked(&config).await?;
        self.active_config(tenant_id)
    }

    fn active_config(&self, tenant_id: &str) -> Result<SourceConfig> {
        self.configs.get_active(tenant_id)?.ok_or_else(|| {
            SourceError::not_found(format!("No active data source for tenant '{}'", tenant_id))
        })
    }

    async fn lock_refresh(&self, tenant_id: &str) -> RefreshGuard<'_> {
        let lock = self
            .refresh_locks
            .lock()
            .unwrap()
            .entry(tenant_id.to_string())
            .or_default()
            .clone();
        let guard = lock.lock_owned().await;
        RefreshGuard {
            locks: &self.refresh_locks,
            tenant_id: tenant_id.to_string(),
            guard: Some(guard),
        }
    }

    async fn refresh_locked(&self, config: &SourceConfig) -> Result<DateTime<Utc>> {
        let tenant_id = &config.tenant_id;

        if config.source_kind != SourceKind::Spreadsheet {
            return Err(SourceError::validation(
                "Only spreadsheet sources use refreshable tokens",
            ));
        }

        let refresh_blob = config
            .refresh_token_enc
            .as_deref()
            .ok_or_else(|| SourceError::Refresh("no refresh token stored".to_string()))?;

        let client = self.client()?;
        let cipher = self.cipher()?;

        let refresh_token = cipher.decrypt(refresh_blob).map_err(|e| {
            error!(tenant_id = %tenant_id, config_id = %config.id, "Failed to decrypt refresh token");
            SourceError::from(e)
        })?;

        let grant = exchange::refresh_access_token(
            &self.http,
            &self.endpoints.token_url,
            &ClientCredentials {
                client_id: &client.client_id,
                client_secret: &client.client_secret,
            },
            &refresh_token,
        )
        .await
        .map_err(|e| {
            warn!(tenant_id = %tenant_id, error = %e, "Token refresh rejected");
            SourceError::Refresh(e)
        })?;

        let access_enc = cipher.encrypt(&grant.access_token)?;
        let refresh_enc = grant
            .refresh_token
            .as_deref()
            .map(|t| cipher.encrypt(t))
            .transpose()?;

        let updated = self.configs.update_tokens(
            &config.id,
            &access_enc,
            refresh_enc.as_deref(),
            grant.expires_at,
        )?;
        if !updated {
            warn!(tenant_id = %tenant_id, config_id = %config.id, "Configuration replaced during refresh");
            return Err(SourceError::not_found(
                "Data source configuration was replaced; please retry",
            ));
        }

        info!(
            tenant_id = %tenant_id,
            expires_at = %grant.expires_at,
            rotated = refresh_enc.is_some(),
            "Access token refreshed"
        );
        Ok(grant.expires_at)
    }
}

fn continuation_url(base: &str, email: &str, tenant_id: &str) -> String {
    let sep = if base.contains('?') { '&' } else { '?' };
    format!(
        "{}{}oauth=success&email={}&tenant={}",
        base,
        sep,
        urlencoding::encode(email),
        urlencoding::encode(tenant_id)
    )
}
