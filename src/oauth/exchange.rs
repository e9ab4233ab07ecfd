//! OAuth token endpoint calls.
//!
//! Handles the authorization-code grant, the refresh grant and the userinfo
//! lookup. Error strings returned here are safe to show a user: they carry
//! the provider's error code, never request bodies or tokens.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

/// Lifetime assumed when the provider omits `expires_in`
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;
/// Upper bound on a provider-reported lifetime
const MAX_EXPIRES_IN_SECS: i64 = 365 * 24 * 3600;

/// OAuth token response (standard OAuth 2.0, success or error shape)
#[derive(Deserialize, Debug, Default)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Deserialize, Debug)]
struct UserInfo {
    email: Option<String>,
}

/// Tokens issued by a successful grant.
#[derive(Clone)]
pub struct TokenGrant {
    pub access_token: String,
    /// Present on code exchange; on refresh only when the provider rotates it
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGrant")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Client credentials sent with every token request.
pub struct ClientCredentials<'a> {
    pub client_id: &'a str,
    pub client_secret: &'a str,
}

/// Exchange an authorization code for tokens.
///
/// # Arguments
/// * `http` - Shared HTTP client (carries the request timeout)
/// * `token_url` - OAuth token endpoint URL
/// * `code` - Authorization code from callback
/// * `redirect_uri` - Redirect URI used in the authorization request
///
/// # Returns
/// * `Ok(TokenGrant)` - The provider returned an access token
/// * `Err(String)` - Transport failure, provider error, or no access token
pub async fn exchange_code(
    http: &reqwest::Client,
    token_url: &str,
    client: &ClientCredentials<'_>,
    code: &str,
    redirect_uri: &str,
) -> Result<TokenGrant, String> {
    let form = [
        ("grant_type", "authorization_code"),
        ("code", code),
        ("redirect_uri", redirect_uri),
        ("client_id", client.client_id),
        ("client_secret", client.client_secret),
    ];

    tracing::debug!(token_url = %token_url, "Exchanging authorization code for token");
    let response = post_token_form(http, token_url, &form).await?;
    into_grant(response)
}

/// Obtain a new access token with a refresh token.
pub async fn refresh_access_token(
    http: &reqwest::Client,
    token_url: &str,
    client: &ClientCredentials<'_>,
    refresh_token: &str,
) -> Result<TokenGrant, String> {
    let form = [
        ("grant_type", "refresh_token"),
        ("refresh_token", refresh_token),
        ("client_id", client.client_id),
        ("client_secret", client.client_secret),
    ];

    tracing::debug!(token_url = %token_url, "Refreshing access token");
    let response = post_token_form(http, token_url, &form).await?;
    into_grant(response)
}

/// Fetch the email address of the account that granted access.
pub async fn fetch_user_email(
    http: &reqwest::Client,
    userinfo_url: &str,
    access_token: &str,
) -> Result<String, String> {
    let response = http
        .get(userinfo_url)
        .bearer_auth(access_token)
        .header("Accept", "application/json")
        .send()
        .await
        .map_err(describe_transport_error)?;

    if !response.status().is_success() {
        return Err(format!("userinfo request failed with status {}", response.status()));
    }

    let info: UserInfo = response
        .json()
        .await
        .map_err(|_| "userinfo response was not valid JSON".to_string())?;

    info.email
        .filter(|e| !e.is_empty())
        .ok_or_else(|| "userinfo response has no email".to_string())
}

async fn post_token_form(
    http: &reqwest::Client,
    token_url: &str,
    form: &[(&str, &str)],
) -> Result<TokenResponse, String> {
    let response = http
        .post(token_url)
        .header("Accept", "application/json")
        .form(form)
        .send()
        .await
        .map_err(describe_transport_error)?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|_| "failed to read token response".to_string())?;

    // Error responses still carry the standard `error` field
    let parsed: TokenResponse = serde_json::from_str(&body).unwrap_or_default();

    if !status.is_success() {
        let code = parsed.error.unwrap_or_else(|| format!("http_{}", status.as_u16()));
        return Err(match parsed.error_description {
            Some(desc) => format!("{}: {}", code, desc),
            None => code,
        });
    }

    Ok(parsed)
}

fn into_grant(response: TokenResponse) -> Result<TokenGrant, String> {
    if let Some(error) = response.error {
        return Err(error);
    }

    let access_token = response
        .access_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| "provider response has no access_token".to_string())?;

    let expires_in = response
        .expires_in
        .unwrap_or(DEFAULT_EXPIRES_IN_SECS)
        .clamp(0, MAX_EXPIRES_IN_SECS);

    Ok(TokenGrant {
        access_token,
        refresh_token: response.refresh_token.filter(|t| !t.is_empty()),
        expires_at: Utc::now() + Duration::seconds(expires_in),
    })
}

fn describe_transport_error(e: reqwest::Error) -> String {
    if e.is_timeout() {
        "provider request timed out".to_string()
    } else if e.is_connect() {
        "could not reach provider".to_string()
    } else {
        "provider request failed".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    const CLIENT: ClientCredentials<'static> = ClientCredentials {
        client_id: "client-id",
        client_secret: "client-secret",
    };

    #[test]
    fn test_token_response_deserialization() {
        let json = r#"{
            "access_token": "ya29.a0",
            "refresh_token": "1//0g",
            "expires_in": 3599,
            "token_type": "Bearer",
            "scope": "https://www.googleapis.com/auth/spreadsheets"
        }"#;

        let response: TokenResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.access_token.as_deref(), Some("ya29.a0"));
        assert_eq!(response.refresh_token.as_deref(), Some("1//0g"));
        assert_eq!(response.expires_in, Some(3599));
        assert!(response.error.is_none());
    }

    #[test]
    fn test_grant_requires_access_token() {
        let err = into_grant(TokenResponse {
            refresh_token: Some("r".to_string()),
            ..Default::default()
        })
        .unwrap_err();
        assert!(err.contains("access_token"));
    }

    #[test]
    fn test_grant_defaults_expiry() {
        let grant = into_grant(TokenResponse {
            access_token: Some("a".to_string()),
            ..Default::default()
        })
        .unwrap();
        let remaining = grant.expires_at - Utc::now();
        assert!(remaining > Duration::seconds(3500));
        assert!(grant.refresh_token.is_none());
    }

    #[test]
    fn test_grant_clamps_out_of_range_expiry() {
        let grant = into_grant(TokenResponse {
            access_token: Some("a".to_string()),
            expires_in: Some(i64::MAX),
            ..Default::default()
        })
        .unwrap();
        let remaining = grant.expires_at - Utc::now();
        assert!(remaining <= Duration::seconds(MAX_EXPIRES_IN_SECS));
        assert!(remaining > Duration::days(364));

        let grant = into_grant(TokenResponse {
            access_token: Some("a".to_string()),
            expires_in: Some(-60),
            ..Default::default()
        })
        .unwrap();
        assert!(grant.expires_at <= Utc::now());
    }

    #[tokio::test]
    async fn test_exchange_code_success() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
                Matcher::UrlEncoded("code".into(), "auth-code".into()),
                Matcher::UrlEncoded("redirect_uri".into(), "https://app/cb".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"at-1","refresh_token":"rt-1","expires_in":3600}"#)
            .create_async()
            .await;

        let http = reqwest::Client::new();
        let url = format!("{}/token", server.url());
        let grant = exchange_code(&http, &url, &CLIENT, "auth-code", "https://app/cb")
            .await
            .unwrap();

        assert_eq!(grant.access_token, "at-1");
        assert_eq!(grant.refresh_token.as_deref(), Some("rt-1"));
    }

    #[tokio::test]
    async fn test_refresh_invalid_grant() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/token")
            .match_body(Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()))
            .with_status(400)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error":"invalid_grant","error_description":"Token has been expired or revoked."}"#)
            .create_async()
            .await;

        let http = reqwest::Client::new();
        let url = format!("{}/token", server.url());
        let err = refresh_access_token(&http, &url, &CLIENT, "rt-1")
            .await
            .unwrap_err();

        assert!(err.starts_with("invalid_grant"));
        assert!(!err.contains("rt-1"));
    }

    #[tokio::test]
    async fn test_fetch_user_email() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/userinfo")
            .match_header("authorization", "Bearer at-1")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"1","email":"gis@example.com","verified_email":true}"#)
            .create_async()
            .await;

        let http = reqwest::Client::new();
        let email = fetch_user_email(&http, &format!("{}/userinfo", server.url()), "at-1")
            .await
            .unwrap();
        assert_eq!(email, "gis@example.com");
    }
}
