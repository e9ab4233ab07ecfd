// Connect, configure and read through the combined server router

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use geosource::api::{create_oauth_router, OAuthAppState};
use geosource::config::OAuthSettings;
use geosource::oauth::{OAuthCoordinator, OAuthStateStore, ProviderEndpoints, STATE_TTL_MINUTES};
use geosource::source_config::SourceConfigStore;
use mockito::{Matcher, Mock, Server, ServerGuard};
use serde_json::{json, Value};
use source_adapters::adapters::sheets::config::SheetsEndpoints;
use source_adapters::api::{create_router, ApiState};
use source_adapters::cache::{RecordCache, DEFAULT_TTL};
use source_adapters::rate_limit::ProviderRateLimiter;
use source_adapters::{AdapterFactory, SetupService};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

struct TestApp {
    router: Router,
    coordinator: Arc<OAuthCoordinator>,
}

fn create_test_app(server: &ServerGuard) -> TestApp {
    let coordinator = Arc::new(OAuthCoordinator::new(
        OAuthSettings {
            client_id: Some("client-id".to_string()),
            client_secret: Some("client-secret".to_string()),
            redirect_uri: Some("https://gis.example.com/api/oauth/callback".to_string()),
            continuation_url: "https://gis.example.com/admin/setup".to_string(),
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
    let factory = Arc::new(AdapterFactory::new(
        coordinator.clone(),
        SheetsEndpoints {
            sheets_base_url: server.url(),
            drive_base_url: server.url(),
        },
        Arc::new(RecordCache::new(DEFAULT_TTL)),
        Arc::new(ProviderRateLimiter::new(100, Duration::from_secs(100))),
    ));

    let router = create_oauth_router(OAuthAppState {
        coordinator: coordinator.clone(),
    })
    .merge(create_router(ApiState {
        setup: Arc::new(SetupService::new(factory)),
    }));

    TestApp { router, coordinator }
}

async fn send(app: &TestApp, method: Method, uri: &str, body: Option<Value>) -> axum::response::Response {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    app.router.clone().oneshot(request).await.unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

/// Provider mocks for a successful connection. `expires_in` controls how
/// long the first access token is valid.
async fn mock_connection(server: &mut ServerGuard, expires_in: i64) -> (Mock, Mock) {
    let token = server
        .mock("POST", "/token")
        .match_body(Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(format!(
            r#"{{"access_token":"access-1","refresh_token":"refresh-1","expires_in":{}}}"#,
            expires_in
        ))
        .create_async()
        .await;
    let userinfo = server
        .mock("GET", "/userinfo")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"email":"owner@example.com"}"#)
        .create_async()
        .await;
    (token, userinfo)
}

async fn connect(app: &TestApp, tenant: &str) {
    let response = send(
        app,
        Method::GET,
        &format!("/api/oauth/start?tenantId={}&adminEmail=admin%40example.com", tenant),
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let auth_url = body_json(response).await["authUrl"].as_str().unwrap().to_string();
    let state = auth_url
        .split('&')
        .find_map(|p| p.strip_prefix("state="))
        .unwrap()
        .to_string();

    let response = send(
        app,
        Method::GET,
        &format!("/api/oauth/callback?code=code-1&state={}", state),
        None,
    )
    .await;
    assert!(response.status().is_redirection());
}

async fn mock_parcels(server: &mut ServerGuard, token: &str) -> (Mock, Mock) {
    let values = server
        .mock("GET", Matcher::Regex(r"^/v4/spreadsheets/s1/values/".to_string()))
        .match_query(Matcher::Any)
        .match_header("authorization", format!("Bearer {}", token).as_str())
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"values":[
                ["OBJECTID","PARCEL_NAME","WKT"],
                ["101","North lot","POINT (-122.4 37.7)"],
                ["102","East lot","POINT (-122.3 37.8)"]
            ]}"#,
        )
        .create_async()
        .await;
    let sheets = server
        .mock("GET", "/v4/spreadsheets/s1")
        .match_query(Matcher::Any)
        .match_header("authorization", format!("Bearer {}", token).as_str())
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"sheets":[
                {"properties":{"sheetId":7,"title":"Owners","index":1}},
                {"properties":{"sheetId":0,"title":"Parcels","index":0}}
            ]}"#,
        )
        .create_async()
        .await;
    (values, sheets)
}

#[tokio::test]
async fn test_connect_detect_and_configure() {
    let mut server = Server::new_async().await;
    let _connection = mock_connection(&mut server, 3600).await;
    let refresh = server
        .mock("POST", "/token")
        .match_body(Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()))
        .expect(0)
        .create_async()
        .await;
    let _parcels = mock_parcels(&mut server, "access-1").await;
    let app = create_test_app(&server);

    connect(&app, "t1").await;

    let response = send(&app, Method::GET, "/api/sources/t1/status", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let status = body_json(response).await;
    assert_eq!(status["stage"], "unconfigured");
    assert_eq!(status["accountEmail"], "owner@example.com");

    let response = send(&app, Method::GET, "/api/sources/t1/spreadsheets/s1/sheets", None).await;
    let sheets = body_json(response).await;
    assert_eq!(sheets[0]["title"], "Parcels");
    assert_eq!(sheets[1]["title"], "Owners");

    let response = send(
        &app,
        Method::GET,
        "/api/sources/t1/spreadsheets/s1/sheets/Parcels/fields",
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let proposal = body_json(response).await;
    assert_eq!(proposal["identity"], "OBJECTID");
    assert_eq!(proposal["name"], "PARCEL_NAME");
    assert_eq!(proposal["geometry"], "WKT");

    let response = send(
        &app,
        Method::PUT,
        "/api/sources/t1/config",
        Some(json!({
            "spreadsheetId": "s1",
            "sheetName": "Parcels",
            "fieldMappings": {"idField": "OBJECTID", "nameField": "PARCEL_NAME", "geometryField": "WKT"}
        })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["stage"], "configured");

    let response = send(&app, Method::GET, "/api/sources/t1/tables", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["tables"], json!(["Parcels", "Owners"]));

    refresh.assert_async().await;
}

#[tokio::test]
async fn test_expiring_token_refreshed_before_use() {
    let mut server = Server::new_async().await;
    // Issued token is already inside the refresh margin
    let _connection = mock_connection(&mut server, 30).await;
    let refresh = server
        .mock("POST", "/token")
        .match_body(Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"access-2","expires_in":3600}"#)
        .expect(1)
        .create_async()
        .await;
    let _parcels = mock_parcels(&mut server, "access-2").await;
    let app = create_test_app(&server);

    connect(&app, "t1").await;
    let before = app.coordinator.configs().get_active("t1").unwrap().unwrap();

    let response = send(&app, Method::GET, "/api/sources/t1/spreadsheets/s1/sheets", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    // Second call uses the refreshed token
    let response = send(
        &app,
        Method::GET,
        "/api/sources/t1/spreadsheets/s1/sheets/Parcels/preview",
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["rows"].as_array().unwrap().len(), 2);

    let after = app.coordinator.configs().get_active("t1").unwrap().unwrap();
    assert_eq!(after.id, before.id);
    assert!(after.token_expires_at > before.token_expires_at);
    refresh.assert_async().await;
}

#[tokio::test]
async fn test_revoked_refresh_token_is_server_error() {
    let mut server = Server::new_async().await;
    let _connection = mock_connection(&mut server, 30).await;
    let _refresh = server
        .mock("POST", "/token")
        .match_body(Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()))
        .with_status(400)
        .with_header("content-type", "application/json")
        .with_body(r#"{"error":"invalid_grant"}"#)
        .create_async()
        .await;
    let app = create_test_app(&server);

    connect(&app, "t1").await;

    let response = send(&app, Method::GET, "/api/sources/t1/spreadsheets", None).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = body_json(response).await;
    assert!(!json["error"].as_str().unwrap().contains("refresh-1"));
}

#[tokio::test]
async fn test_table_api_source_replaces_spreadsheet() {
    let mut server = Server::new_async().await;
    let _connection = mock_connection(&mut server, 3600).await;
    let tables = server
        .mock("GET", "/v0/meta/bases/app1/tables")
        .match_header("authorization", "Bearer key-plain")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"tables":[{"id":"tbl1","name":"Wells"}]}"#)
        .create_async()
        .await;
    let app = create_test_app(&server);

    connect(&app, "t1").await;

    let response = send(
        &app,
        Method::POST,
        "/api/sources/t1/table-api",
        Some(json!({"baseUrl": server.url(), "workspaceId": "app1", "apiKey": "key-plain"})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["sourceKind"], "table-api");

    let response = send(&app, Method::GET, "/api/sources/t1/tables", None).await;
    assert_eq!(body_json(response).await["tables"], json!(["Wells"]));

    let configs = app.coordinator.configs().list_for_tenant("t1").unwrap();
    assert_eq!(configs.len(), 2);
    assert_eq!(configs.iter().filter(|c| c.is_active).count(), 1);
    tables.assert_async().await;
}

#[tokio::test]
async fn test_unknown_tenant_status() {
    let server = Server::new_async().await;
    let app = create_test_app(&server);

    let response = send(&app, Method::GET, "/api/sources/nobody/status", None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
