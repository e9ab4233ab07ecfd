//! HTTP endpoints for connecting a tenant's spreadsheet account.
//!
//! - GET  /api/oauth/start?tenantId=..&adminEmail=..  → `{ "authUrl": .. }`
//! - GET  /api/oauth/callback?code=..&state=..        → redirect to the setup UI
//! - POST /api/oauth/refresh `{ "tenantId": .. }`     → `{ "success": true, "expiresAt": .. }`
//!
//! The callback is hit by a browser, so its failures are plain text pages
//! rather than JSON.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Redirect, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::error::{Result, SourceError};
use crate::oauth::{CallbackParams, OAuthCoordinator};

/// Shared application state for OAuth API
#[derive(Clone)]
pub struct OAuthAppState {
    pub coordinator: Arc<OAuthCoordinator>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartQuery {
    tenant_id: Option<String>,
    admin_email: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
    auth_url: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    tenant_id: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    success: bool,
    expires_at: DateTime<Utc>,
}

/// Create OAuth API router
pub fn create_oauth_router(state: OAuthAppState) -> Router {
    Router::new()
        .route("/api/oauth/start", get(oauth_start))
        .route("/api/oauth/callback", get(oauth_callback))
        .route("/api/oauth/refresh", post(oauth_refresh))
        .with_state(Arc::new(state))
}

/// GET /api/oauth/start
async fn oauth_start(
    State(state): State<Arc<OAuthAppState>>,
    Query(query): Query<StartQuery>,
) -> Result<Json<StartResponse>> {
    let tenant_id = query.tenant_id.unwrap_or_default();
    let admin_email = query.admin_email.unwrap_or_default();
    debug!(tenant_id = %tenant_id, "OAuth start requested");

    let auth_url = state
        .coordinator
        .start(&tenant_id, &admin_email)
        .inspect_err(|e| log_failure("start", &tenant_id, e))?;

    Ok(Json(StartResponse { auth_url }))
}

/// GET /api/oauth/callback
///
/// # Security
/// - State token is consumed before the code is used
/// - Tokens are encrypted before they reach the database
async fn oauth_callback(
    State(state): State<Arc<OAuthAppState>>,
    Query(params): Query<CallbackParams>,
) -> Response {
    match state.coordinator.callback(params).await {
        Ok(outcome) => Redirect::to(&outcome.redirect_url).into_response(),
        Err(e) => {
            warn!(kind = e.kind(), error = %e, "OAuth callback failed");
            let status = match e {
                SourceError::State(_) | SourceError::TokenExchange(_) | SourceError::Validation(_) => {
                    StatusCode::BAD_REQUEST
                }
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (status, e.public_message()).into_response()
        }
    }
}

/// POST /api/oauth/refresh
async fn oauth_refresh(
    State(state): State<Arc<OAuthAppState>>,
    Json(request): Json<RefreshRequest>,
) -> Result<Json<RefreshResponse>> {
    let tenant_id = request.tenant_id.unwrap_or_default();

    let expires_at = state
        .coordinator
        .refresh(&tenant_id)
        .await
        .inspect_err(|e| log_failure("refresh", &tenant_id, e))?;

    Ok(Json(RefreshResponse {
        success: true,
        expires_at,
    }))
}

fn log_failure(operation: &str, tenant_id: &str, e: &SourceError) {
    if e.status_code().is_server_error() {
        error!(operation, tenant_id = %tenant_id, kind = e.kind(), error = %e, "OAuth request failed");
    } else {
        warn!(operation, tenant_id = %tenant_id, kind = e.kind(), error = %e, "OAuth request rejected");
    }
}
