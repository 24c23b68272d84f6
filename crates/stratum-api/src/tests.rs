//! Router tests: real store, real runtime, requests driven through `oneshot`.

use std::sync::Arc;

use argon2::{Argon2, PasswordHasher, password_hash::SaltString};
use axum::{
  Router,
  body::Body,
  http::{HeaderMap, Request, StatusCode, header},
};
use rand_core::OsRng;
use serde_json::{Value, json};
use stratum_runtime::{Runtime, RuntimeConfig};
use stratum_store_sqlite::SqliteStore;
use stratum_vault::{KdfParams, Vault};
use tower::ServiceExt as _;

use crate::{
  AppState, api_router,
  auth::{ApiKeyConfig, AuthConfig},
  rate_limit::{RateLimitConfig, RateLimiter},
};

const ACME: &str = "Bearer acme.acme-key";
const GLOBEX: &str = "Bearer globex.globex-key";

fn hash(key: &str) -> String {
  let salt = SaltString::generate(&mut OsRng);
  Argon2::default().hash_password(key.as_bytes(), &salt).unwrap().to_string()
}

async fn make_app(limits: RateLimitConfig, runtime: RuntimeConfig) -> Router {
  let vault = Vault::new("api-tests", KdfParams::insecure_fast()).unwrap();
  let store = Arc::new(SqliteStore::open_in_memory(vault).await.unwrap());
  let auth  = AuthConfig::from_keys(&[
    ApiKeyConfig { project: "acme".into(), key_hash: hash("acme-key") },
    ApiKeyConfig { project: "globex".into(), key_hash: hash("globex-key") },
  ])
  .unwrap();

  api_router(AppState {
    runtime: Runtime::new(store.clone(), runtime).unwrap(),
    store,
    auth:    Arc::new(auth),
    limiter: RateLimiter::new(limits),
  })
}

async fn app() -> Router { make_app(RateLimitConfig::default(), RuntimeConfig::default()).await }

async fn send(
  app:    &Router,
  method: &str,
  uri:    &str,
  auth:   Option<&str>,
  body:   Option<Value>,
) -> (StatusCode, HeaderMap, Value) {
  let mut builder = Request::builder().method(method).uri(uri);
  if let Some(auth) = auth {
    builder = builder.header(header::AUTHORIZATION, auth);
  }
  let req = match body {
    Some(body) => builder
      .header(header::CONTENT_TYPE, "application/json")
      .body(Body::from(body.to_string()))
      .unwrap(),
    None => builder.body(Body::empty()).unwrap(),
  };

  let resp    = app.clone().oneshot(req).await.unwrap();
  let status  = resp.status();
  let headers = resp.headers().clone();
  let bytes   = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
  let json    = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
  (status, headers, json)
}

// ─── Health & auth ───────────────────────────────────────────────────────────

#[tokio::test]
async fn health_needs_no_auth() {
  let app = app().await;
  let (status, _, body) = send(&app, "GET", "/health", None, None).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body, json!({"status": "ok"}));
}

#[tokio::test]
async fn missing_or_wrong_credentials_are_401() {
  let app = app().await;

  let (status, headers, body) = send(&app, "GET", "/secrets", None, None).await;
  assert_eq!(status, StatusCode::UNAUTHORIZED);
  assert_eq!(headers[header::WWW_AUTHENTICATE], "Bearer");
  assert_eq!(body["error"], "unauthorized");

  for bad in ["Bearer acme.wrong", "Bearer globex.acme-key", "Bearer nobody.x", "Basic abc"] {
    let (status, _, _) = send(&app, "GET", "/secrets", Some(bad), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED, "{bad}");
  }
}

#[tokio::test]
async fn foreign_project_field_is_403() {
  let app = app().await;

  let (status, _, _) = send(&app, "GET", "/tables?project=globex", Some(ACME), None).await;
  assert_eq!(status, StatusCode::FORBIDDEN);

  let (status, _, _) = send(
    &app,
    "POST",
    "/secrets",
    Some(ACME),
    Some(json!({"project": "globex", "name": "TOKEN", "value": "x"})),
  )
  .await;
  assert_eq!(status, StatusCode::FORBIDDEN);

  let (status, _, _) = send(&app, "GET", "/tables?project=acme", Some(ACME), None).await;
  assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn rate_limit_returns_429_with_retry_after() {
  let limits = RateLimitConfig { limit: 2, window_secs: 30, ..Default::default() };
  let app    = make_app(limits, RuntimeConfig::default()).await;

  for _ in 0..2 {
    let (status, _, _) = send(&app, "GET", "/tables", Some(ACME), None).await;
    assert_eq!(status, StatusCode::OK);
  }
  let (status, headers, body) = send(&app, "GET", "/tables", Some(ACME), None).await;
  assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
  assert_eq!(body["error"], "rate limit exceeded");
  let retry: u64 = headers[header::RETRY_AFTER].to_str().unwrap().parse().unwrap();
  assert!((1..=30).contains(&retry));

  // A different project has its own budget.
  let (status, _, _) = send(&app, "GET", "/tables", Some(GLOBEX), None).await;
  assert_eq!(status, StatusCode::OK);
}

// ─── Secrets ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn secrets_lifecycle() {
  let app = app().await;

  let (status, _, body) = send(
    &app,
    "POST",
    "/secrets",
    Some(ACME),
    Some(json!({"name": "STRIPE_KEY", "value": "sk_live", "description": "payments"})),
  )
  .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body, json!({"success": true}));

  let (status, _, body) = send(&app, "GET", "/secrets", Some(ACME), None).await;
  assert_eq!(status, StatusCode::OK);
  let listed = body.as_array().unwrap();
  assert_eq!(listed.len(), 1);
  assert_eq!(listed[0]["name"], "STRIPE_KEY");
  assert_eq!(listed[0]["description"], "payments");
  assert_eq!(listed[0]["digest"].as_str().unwrap().len(), 64);
  assert!(listed[0].get("value").is_none());
  assert!(listed[0]["createdAt"].is_string());

  // Invisible to another project.
  let (_, _, body) = send(&app, "GET", "/secrets", Some(GLOBEX), None).await;
  assert_eq!(body, json!([]));

  let id = listed[0]["id"].clone();
  let (status, _, _) = send(&app, "DELETE", "/secrets", Some(GLOBEX), Some(json!({"id": id}))).await;
  assert_eq!(status, StatusCode::NOT_FOUND);

  let (status, _, _) = send(&app, "DELETE", "/secrets", Some(ACME), Some(json!({"id": id}))).await;
  assert_eq!(status, StatusCode::OK);

  let (status, _, _) = send(&app, "DELETE", "/secrets", Some(ACME), Some(json!({"id": id}))).await;
  assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn bad_secret_name_is_400() {
  let app = app().await;
  let (status, _, body) = send(
    &app,
    "POST",
    "/secrets",
    Some(ACME),
    Some(json!({"name": "lower-case", "value": "x"})),
  )
  .await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert!(body["error"].as_str().unwrap().contains("lower-case"));

  let (_, _, body) = send(&app, "GET", "/secrets", Some(ACME), None).await;
  assert_eq!(body, json!([]));
}

// ─── Tables ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn create_and_list_tables() {
  let app = app().await;

  let (status, _, body) = send(
    &app,
    "POST",
    "/tables",
    Some(ACME),
    Some(json!({
      "tableName": "orders",
      "columns": [
        {"name": "total", "type": "numeric"},
        {"name": "shape", "type": "geometry"},
        {"name": "project_id", "type": "text"},
      ],
    })),
  )
  .await;
  assert_eq!(status, StatusCode::CREATED);
  assert_eq!(body["success"], true);
  assert_eq!(body["tableName"], "orders");
  assert_eq!(body["coercedColumns"][0]["name"], "shape");
  assert_eq!(body["droppedColumns"], json!(["project_id"]));

  let (_, _, body) = send(&app, "GET", "/tables", Some(ACME), None).await;
  assert_eq!(body[0]["tableName"], "orders");
  assert_eq!(body[0]["rowCountEstimate"], 0);

  let (_, _, body) = send(&app, "GET", "/tables", Some(GLOBEX), None).await;
  assert_eq!(body, json!([]));
}

#[tokio::test]
async fn invalid_table_name_is_400() {
  let app = app().await;
  let (status, _, _) = send(
    &app,
    "POST",
    "/tables",
    Some(ACME),
    Some(json!({"tableName": "Orders; DROP TABLE x", "columns": []})),
  )
  .await;
  assert_eq!(status, StatusCode::BAD_REQUEST);

  // Would collide with the project index of a table named `x`.
  let (status, _, _) = send(
    &app,
    "POST",
    "/tables",
    Some(ACME),
    Some(json!({"tableName": "x_project_id_idx", "columns": []})),
  )
  .await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn recreating_a_table_with_other_columns_is_400() {
  let app = app().await;
  let create = |columns: Value| json!({"tableName": "t", "columns": columns});

  let (status, _, _) = send(
    &app,
    "POST",
    "/tables",
    Some(ACME),
    Some(create(json!([{"name": "a", "type": "text"}]))),
  )
  .await;
  assert_eq!(status, StatusCode::CREATED);

  let (status, _, body) = send(
    &app,
    "POST",
    "/tables",
    Some(ACME),
    Some(create(json!([{"name": "a", "type": "text"}, {"name": "b", "type": "text"}]))),
  )
  .await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert!(body["error"].as_str().unwrap().contains("different columns"));
}

// ─── Functions ───────────────────────────────────────────────────────────────

async fn deploy(app: &Router, auth: &str, name: &str, source: &str) -> Value {
  let (status, _, body) = send(
    app,
    "POST",
    "/functions",
    Some(auth),
    Some(json!({"name": name, "files": [{"path": "index.js", "content": source}]})),
  )
  .await;
  assert_eq!(status, StatusCode::CREATED, "{body}");
  body
}

#[tokio::test(flavor = "multi_thread")]
async fn deploy_list_and_invoke() {
  let app = app().await;
  let deployed = deploy(
    &app,
    ACME,
    "Echo Fn",
    "console.log('got' + event.body.x); return { n: event.body.x + 1 };",
  )
  .await;
  assert_eq!(deployed["slug"], "echo-fn");

  let (_, _, body) = send(&app, "GET", "/functions", Some(ACME), None).await;
  assert_eq!(body.as_array().unwrap().len(), 1);
  assert_eq!(body[0]["files"][0]["path"], "index.js");

  let (status, _, body) = send(
    &app,
    "POST",
    "/functions/echo-fn/invoke",
    Some(ACME),
    Some(json!({"payload": {"x": 41}})),
  )
  .await;
  assert_eq!(status, StatusCode::OK, "{body}");
  assert_eq!(body["result"], json!({"n": 42}));
  assert_eq!(body["logs"], json!(["got41"]));
  assert!(body["executionTimeMs"].is_u64());
}

#[tokio::test(flavor = "multi_thread")]
async fn invoke_failures_mirror_the_error_kind() {
  let app = make_app(
    RateLimitConfig::default(),
    RuntimeConfig { timeout_ms: 300, ..Default::default() },
  )
  .await;

  let (status, _, body) = send(
    &app,
    "POST",
    "/functions/missing/invoke",
    Some(ACME),
    Some(json!({"payload": null})),
  )
  .await;
  assert_eq!(status, StatusCode::NOT_FOUND);
  assert_eq!(body["details"], "not_found");
  assert_eq!(body["logs"], json!([]));

  deploy(&app, ACME, "boom", "console.log('about to throw'); throw new TypeError('bad');").await;
  let (status, _, body) = send(
    &app,
    "POST",
    "/functions/boom/invoke",
    Some(ACME),
    Some(json!({})),
  )
  .await;
  assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
  assert_eq!(body["details"], "execution_error");
  assert_eq!(body["error"], "TypeError: bad");
  assert_eq!(body["logs"], json!(["about to throw"]));

  deploy(&app, ACME, "spin", "console.log('spinning'); while (true) {}").await;
  let (status, _, body) = send(
    &app,
    "POST",
    "/functions/spin/invoke",
    Some(ACME),
    Some(json!({})),
  )
  .await;
  assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
  assert_eq!(body["details"], "timed_out");
  assert_eq!(body["logs"], json!(["spinning"]));
}

#[tokio::test(flavor = "multi_thread")]
async fn functions_are_scoped_to_the_caller() {
  let app = app().await;
  deploy(&app, ACME, "private", "return 'acme only';").await;

  let (status, _, _) = send(
    &app,
    "POST",
    "/functions/private/invoke",
    Some(GLOBEX),
    Some(json!({})),
  )
  .await;
  assert_eq!(status, StatusCode::NOT_FOUND);

  let (status, _, _) = send(&app, "DELETE", "/functions/private", Some(GLOBEX), None).await;
  assert_eq!(status, StatusCode::NOT_FOUND);

  let (status, _, _) = send(&app, "DELETE", "/functions/private", Some(ACME), None).await;
  assert_eq!(status, StatusCode::OK);

  let (_, _, body) = send(&app, "GET", "/functions", Some(ACME), None).await;
  assert_eq!(body, json!([]));
}
