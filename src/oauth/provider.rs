//! Spreadsheet provider OAuth endpoints.
//!
//! Defaults target Google; every URL is overridable so tests can point the
//! flow at a mock server.

use serde::{Deserialize, Serialize};

pub const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const GOOGLE_USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";

/// Read/write spreadsheets, read-only drive listing, user email.
pub const SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/spreadsheets",
    "https://www.googleapis.com/auth/drive.readonly",
    "https://www.googleapis.com/auth/userinfo.email",
];

/// OAuth provider endpoint URLs
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderEndpoints {
    /// OAuth authorization endpoint URL
    pub auth_url: String,

    /// OAuth token exchange endpoint URL
    pub token_url: String,

    /// Endpoint returning the authenticated user's email
    pub userinfo_url: String,
}

impl Default for ProviderEndpoints {
    fn default() -> Self {
        Self {
            auth_url: GOOGLE_AUTH_URL.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
            userinfo_url: GOOGLE_USERINFO_URL.to_string(),
        }
    }
}

impl ProviderEndpoints {
    /// Build authorization URL with state and redirect_uri.
    ///
    /// Requests offline access with a forced consent prompt so the provider
    /// issues a refresh token on every connection.
    pub fn build_auth_url(&self, client_id: &str, redirect_uri: &str, state: &str) -> String {
        let scopes = SCOPES.join(" ");
        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}&access_type=offline&prompt=consent&include_granted_scopes=true",
            self.auth_url,
            urlencoding::encode(client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(&scopes),
            urlencoding::encode(state)
        )
    }
}
