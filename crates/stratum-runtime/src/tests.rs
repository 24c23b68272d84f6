//! End-to-end invocation tests: real isolates against an in-memory store.

use std::{
  sync::Arc,
  time::{Duration, Instant},
};

use serde_json::{Map, Value, json};
use stratum_core::{
  ProjectId,
  function::{DeployFunction, FunctionFile},
  invocation::{ErrorKind, Invocation, InvocationOutcome},
  secret::NewSecret,
  store::TenantStore,
  table::{ColumnSpec, CreateTable},
};
use stratum_store_sqlite::SqliteStore;
use stratum_vault::{KdfParams, Vault};

use crate::{Runtime, RuntimeConfig};

async fn setup(config: RuntimeConfig) -> (Arc<SqliteStore>, Runtime<SqliteStore>) {
  let vault = Vault::new("runtime-tests", KdfParams::insecure_fast()).unwrap();
  let store = Arc::new(SqliteStore::open_in_memory(vault).await.unwrap());
  let runtime = Runtime::new(store.clone(), config).unwrap();
  (store, runtime)
}

async fn default_setup() -> (Arc<SqliteStore>, Runtime<SqliteStore>) {
  setup(RuntimeConfig::default()).await
}

fn project(id: &str) -> ProjectId { ProjectId::new(id).unwrap() }

async fn deploy(store: &SqliteStore, p: &ProjectId, name: &str, files: &[(&str, &str)]) {
  let files = files
    .iter()
    .map(|(path, content)| FunctionFile::new(*path, *content))
    .collect();
  store
    .deploy_function(p, DeployFunction::new(name, files))
    .await
    .unwrap();
}

fn ok(outcome: &InvocationOutcome) -> &Value {
  match outcome {
    InvocationOutcome::Success { result, .. } => result,
    InvocationOutcome::Failure { error, logs, .. } => {
      panic!("invocation failed: {error:?}, logs: {logs:?}")
    }
  }
}

fn kind(outcome: &InvocationOutcome) -> ErrorKind {
  outcome.error().expect("expected a failure").kind
}

// ─── Basics ──────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn echo_round_trip() {
  let (store, rt) = default_setup().await;
  let p = project("alpha");
  deploy(&store, &p, "echo", &[(
    "index.js",
    "console.log('got' + event.body.x); return { n: event.body.x + 1 };",
  )])
  .await;

  let out = rt
    .invoke(&p, "echo", Invocation::with_payload(json!({"x": 41})))
    .await;
  assert_eq!(ok(&out)["n"], json!(42));
  assert!(out.logs().iter().any(|l| l.ends_with("41")));
}

#[tokio::test(flavor = "multi_thread")]
async fn event_carries_headers_and_method() {
  let (store, rt) = default_setup().await;
  let p = project("alpha");
  deploy(&store, &p, "meta", &[(
    "index.js",
    "return { method: event.method, trace: event.headers['x-trace'] };",
  )])
  .await;

  let mut invocation = Invocation::with_payload(Value::Null);
  invocation.headers.insert("x-trace".into(), "abc".into());
  invocation.method = Some("PUT".into());

  let out = rt.invoke(&p, "meta", invocation).await;
  assert_eq!(ok(&out), &json!({"method": "PUT", "trace": "abc"}));
}

#[tokio::test(flavor = "multi_thread")]
async fn single_file_with_other_name_is_the_entry() {
  let (store, rt) = default_setup().await;
  let p = project("alpha");
  deploy(&store, &p, "solo", &[("main.js", "return 'solo';")]).await;

  let out = rt.invoke(&p, "solo", Invocation::default()).await;
  assert_eq!(ok(&out), &json!("solo"));
}

#[tokio::test(flavor = "multi_thread")]
async fn module_exports_handler_is_called() {
  let (store, rt) = default_setup().await;
  let p = project("alpha");
  deploy(&store, &p, "cjs", &[(
    "index.js",
    "module.exports = async (event) => ({ doubled: event.body * 2 });",
  )])
  .await;

  let out = rt.invoke(&p, "cjs", Invocation::with_payload(json!(21))).await;
  assert_eq!(ok(&out), &json!({"doubled": 42}));
}

#[tokio::test(flavor = "multi_thread")]
async fn redeploy_runs_new_code() {
  let (store, rt) = default_setup().await;
  let p = project("alpha");
  deploy(&store, &p, "ver", &[("index.js", "return 1;")]).await;
  deploy(&store, &p, "ver", &[("index.js", "return 2;")]).await;

  let out = rt.invoke(&p, "ver", Invocation::default()).await;
  assert_eq!(ok(&out), &json!(2));
}

// ─── Failures ────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn unknown_function_is_not_found() {
  let (_, rt) = default_setup().await;
  let out = rt.invoke(&project("alpha"), "nope", Invocation::default()).await;
  assert_eq!(kind(&out), ErrorKind::NotFound);
}

#[tokio::test(flavor = "multi_thread")]
async fn ambiguous_entry_point_is_not_found() {
  let (store, rt) = default_setup().await;
  let p = project("alpha");
  deploy(&store, &p, "multi", &[("a.js", "return 1;"), ("b.js", "return 2;")]).await;

  let out = rt.invoke(&p, "multi", Invocation::default()).await;
  assert_eq!(kind(&out), ErrorKind::NotFound);
  assert!(out.error().unwrap().message.contains("entry point"));
}

#[tokio::test(flavor = "multi_thread")]
async fn other_projects_functions_are_not_found() {
  let (store, rt) = default_setup().await;
  deploy(&store, &project("alpha"), "mine", &[("index.js", "return 1;")]).await;

  let out = rt.invoke(&project("beta"), "mine", Invocation::default()).await;
  assert_eq!(kind(&out), ErrorKind::NotFound);
}

#[tokio::test(flavor = "multi_thread")]
async fn thrown_errors_keep_logs() {
  let (store, rt) = default_setup().await;
  let p = project("alpha");
  deploy(&store, &p, "boom", &[(
    "index.js",
    "console.warn('about to fail'); throw new TypeError('boom');",
  )])
  .await;

  let out = rt.invoke(&p, "boom", Invocation::default()).await;
  assert_eq!(kind(&out), ErrorKind::ExecutionError);
  assert_eq!(out.error().unwrap().message, "TypeError: boom");
  assert_eq!(out.logs(), ["[warn] about to fail".to_string()]);
}

#[tokio::test(flavor = "multi_thread")]
async fn syntax_errors_are_load_failures() {
  let (store, rt) = default_setup().await;
  let p = project("alpha");
  deploy(&store, &p, "broken", &[("index.js", "return {;")]).await;

  let out = rt.invoke(&p, "broken", Invocation::default()).await;
  assert_eq!(kind(&out), ErrorKind::LoadFailure);
}

#[tokio::test(flavor = "multi_thread")]
async fn infinite_loop_times_out_with_logs() {
  let config = RuntimeConfig { timeout_ms: 300, ..RuntimeConfig::default() };
  let (store, rt) = setup(config).await;
  let p = project("alpha");
  deploy(&store, &p, "spin", &[("index.js", "console.log('before'); while (true) {}")]).await;

  let started = Instant::now();
  let out = rt.invoke(&p, "spin", Invocation::default()).await;
  let elapsed = started.elapsed().as_millis();

  assert_eq!(kind(&out), ErrorKind::TimedOut);
  assert_eq!(out.logs(), ["before".to_string()]);
  assert!(elapsed < 1300, "took {elapsed}ms");
  assert!(out.execution_time_ms() >= 300);
}

#[tokio::test(flavor = "multi_thread")]
async fn runtime_survives_a_timed_out_isolate() {
  let config = RuntimeConfig { timeout_ms: 200, ..RuntimeConfig::default() };
  let (store, rt) = setup(config).await;
  let p = project("alpha");
  deploy(&store, &p, "spin", &[("index.js", "while (true) {}")]).await;
  deploy(&store, &p, "fine", &[("index.js", "return 'ok';")]).await;

  let _ = rt.invoke(&p, "spin", Invocation::default()).await;
  let out = rt.invoke(&p, "fine", Invocation::default()).await;
  assert_eq!(ok(&out), &json!("ok"));
}

// ─── Sandbox surface ─────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn deno_internals_are_hidden() {
  let (store, rt) = default_setup().await;
  let p = project("alpha");
  deploy(&store, &p, "peek", &[("index.js", "return typeof Deno;")]).await;

  let out = rt.invoke(&p, "peek", Invocation::default()).await;
  assert_eq!(ok(&out), &json!("undefined"));
}

#[tokio::test(flavor = "multi_thread")]
async fn require_resolves_within_the_function() {
  let (store, rt) = default_setup().await;
  let p = project("alpha");
  deploy(&store, &p, "mods", &[
    (
      "index.js",
      "const { add } = require('./lib/math'); \
       const cfg = require('./config.json'); \
       return add(cfg.base, require('./lib/math.js').add(1, 1));",
    ),
    ("lib/math.js", "exports.add = (a, b) => a + b;"),
    ("config.json", "{\"base\": 40}"),
  ])
  .await;

  let out = rt.invoke(&p, "mods", Invocation::default()).await;
  assert_eq!(ok(&out), &json!(42));
}

#[tokio::test(flavor = "multi_thread")]
async fn require_cannot_escape_or_load_packages() {
  let (store, rt) = default_setup().await;
  let p = project("alpha");
  deploy(&store, &p, "escape", &[(
    "index.js",
    "const tries = ['../secret', 'fs', './missing']; \
     return tries.map((t) => { try { require(t); return 'loaded'; } catch { return 'denied'; } });",
  )])
  .await;

  let out = rt.invoke(&p, "escape", Invocation::default()).await;
  assert_eq!(ok(&out), &json!(["denied", "denied", "denied"]));
}

#[tokio::test(flavor = "multi_thread")]
async fn secrets_are_injected_read_only() {
  let (store, rt) = default_setup().await;
  let p = project("alpha");
  store
    .put_secret(&p, NewSecret::new("API_KEY", "sk-123"))
    .await
    .unwrap();
  deploy(&store, &p, "sec", &[(
    "index.js",
    "try { secrets.API_KEY = 'changed'; } catch {} return secrets.API_KEY;",
  )])
  .await;

  let out = rt.invoke(&p, "sec", Invocation::default()).await;
  assert_eq!(ok(&out), &json!("sk-123"));
}

#[tokio::test(flavor = "multi_thread")]
async fn undecryptable_secrets_are_logged_and_omitted() {
  let (store, rt) = default_setup().await;
  let p = project("alpha");
  store.put_secret(&p, NewSecret::new("OLD", "x")).await.unwrap();
  store.rotate_salt(&p).await.unwrap();
  store.put_secret(&p, NewSecret::new("NEW", "y")).await.unwrap();
  deploy(&store, &p, "sec", &[("index.js", "return Object.keys(secrets);")]).await;

  let out = rt.invoke(&p, "sec", Invocation::default()).await;
  assert_eq!(ok(&out), &json!(["NEW"]));
  assert_eq!(out.logs(), ["secret OLD could not be decrypted".to_string()]);
}

#[tokio::test(flavor = "multi_thread")]
async fn timers_are_clamped() {
  let config = RuntimeConfig { max_timer_ms: 20, ..RuntimeConfig::default() };
  let (store, rt) = setup(config).await;
  let p = project("alpha");
  deploy(&store, &p, "nap", &[(
    "index.js",
    "await sleep(60000); \
     const fired = await new Promise((resolve) => setTimeout(() => resolve('fired'), 60000)); \
     return fired;",
  )])
  .await;

  let out = rt.invoke(&p, "nap", Invocation::default()).await;
  assert_eq!(ok(&out), &json!("fired"));
}

// ─── Data access ─────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn db_is_pinned_to_the_project() {
  let (store, rt) = default_setup().await;
  let a = project("alpha");
  let b = project("beta");
  store
    .create_table(&a, CreateTable {
      table_name: "notes".into(),
      columns:    vec![ColumnSpec::new("body", "text")],
      created_by: None,
    })
    .await
    .unwrap();
  store
    .create_table(&b, CreateTable {
      table_name: "private".into(),
      columns:    vec![],
      created_by: None,
    })
    .await
    .unwrap();

  deploy(&store, &a, "notes", &[(
    "index.js",
    "const { id } = await db.insert('notes', { body: event.body }); \
     const rows = await db.select('notes', { id }); \
     const counted = await db.query('SELECT COUNT(*) AS n FROM notes'); \
     let leaked = 'denied'; \
     try { await db.query('SELECT * FROM private'); leaked = 'read'; } catch {} \
     return { body: rows[0].body, owner: rows[0].project_id, n: counted[0].n, leaked };",
  )])
  .await;

  let out = rt
    .invoke(&a, "notes", Invocation::with_payload(json!("hello")))
    .await;
  assert_eq!(
    ok(&out),
    &json!({"body": "hello", "owner": "alpha", "n": 1, "leaked": "denied"})
  );
}

#[tokio::test(flavor = "multi_thread")]
async fn timed_out_query_does_not_hold_the_store() {
  let config = RuntimeConfig { timeout_ms: 300, ..RuntimeConfig::default() };
  let (store, rt) = setup(config).await;
  let p = project("alpha");
  store
    .create_table(&p, CreateTable {
      table_name: "t".into(),
      columns:    vec![ColumnSpec::new("n", "integer")],
      created_by: None,
    })
    .await
    .unwrap();
  for n in 0..50 {
    let mut row = Map::new();
    row.insert("n".into(), json!(n));
    store.tenant_insert(&p, "t".into(), row).await.unwrap();
  }
  deploy(&store, &p, "heavy", &[(
    "index.js",
    "return await db.query('SELECT count(*) FROM t a, t b, t c, t d, t e, t f, t g');",
  )])
  .await;

  let out = rt.invoke(&p, "heavy", Invocation::default()).await;
  assert_eq!(kind(&out), ErrorKind::TimedOut);

  let listed = tokio::time::timeout(Duration::from_secs(2), store.list_tables(&project("beta")))
    .await
    .expect("store still busy after the invocation ended")
    .unwrap();
  assert!(listed.is_empty());
}

// ─── Isolation ───────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_invocations_do_not_share_state() {
  let (store, rt) = default_setup().await;
  let p = project("alpha");
  deploy(&store, &p, "iso", &[(
    "index.js",
    "globalThis.seen = (globalThis.seen ?? 0) + 1; \
     console.log('payload ' + event.body); \
     await sleep(20); \
     return { body: event.body, seen: globalThis.seen };",
  )])
  .await;

  let calls: Vec<_> = (0..8)
    .map(|i| {
      let rt = rt.clone();
      let p = p.clone();
      tokio::spawn(async move { (i, rt.invoke(&p, "iso", Invocation::with_payload(json!(i))).await) })
    })
    .collect();

  for call in calls {
    let (i, out) = call.await.unwrap();
    assert_eq!(ok(&out), &json!({"body": i, "seen": 1}));
    assert_eq!(out.logs(), [format!("payload {i}")]);
  }
}
