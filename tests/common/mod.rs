use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use mcp_tool_validation::{
    auth::{issue_user_token, make_user_claims},
    clock::SystemClock,
    config::{Config, StoreBackend},
    db::connect_and_bootstrap,
    handlers::router,
    manager::FlowStateManager,
    state::AppState,
    store::SqliteFlowStore,
};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

pub struct TestApp {
    pub app: Router,
    pub config: Config,
    pub flows: Arc<FlowStateManager>,
    _temp_dir: TempDir,
}

impl TestApp {
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self
            .app
            .clone()
            .oneshot(request)
            .await
            .expect("request should execute");
        let status = response.status();
        let body = to_bytes(response.into_body(), 1024 * 1024)
            .await
            .expect("response body should be readable");
        let parsed = serde_json::from_slice::<Value>(&body).unwrap_or(Value::Null);
        (status, parsed)
    }

    pub fn token_for(&self, user_id: &str) -> String {
        let claims = make_user_claims(
            &self.config.jwt_issuer,
            &self.config.jwt_audience,
            user_id,
            3600,
        );
        issue_user_token(&claims, &self.config.jwt_secret).expect("user token should be signed")
    }
}

pub async fn build_test_app() -> TestApp {
    let temp_dir = TempDir::new().expect("temp directory should be created");
    let db_path = temp_dir.path().join("test-flows.db");
    let db_url = format!("sqlite://{}", db_path.display());
    let unique = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock should be monotonic")
        .as_nanos();

    let config = Config {
        bind_addr: "127.0.0.1:0".to_string(),
        database_url: db_url,
        store_backend: StoreBackend::Sqlite,
        jwt_secret: format!("secret-{unique}"),
        jwt_issuer: "mcp-tool-validation".to_string(),
        jwt_audience: "mcp-tool-validation-api".to_string(),
        sweep_interval_secs: 30,
        await_max_timeout_ms: 200,
        completion_webhook_url: None,
        completion_webhook_secret: "unused".to_string(),
        webhook_max_retries: 1,
    };

    let db = connect_and_bootstrap(&config.database_url)
        .await
        .expect("db bootstrap should succeed");
    let flows = Arc::new(FlowStateManager::new(
        Arc::new(SqliteFlowStore::new(db)),
        Arc::new(SystemClock),
    ));

    let state = AppState {
        config: config.clone(),
        flows: flows.clone(),
    };
    let app = router(state);

    TestApp {
        app,
        config,
        flows,
        _temp_dir: temp_dir,
    }
}

pub fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request should build")
}

pub fn json_auth_request(method: &str, uri: &str, token: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::from(body.to_string()))
        .expect("request should build")
}

pub fn auth_request(method: &str, uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .expect("request should build")
}
