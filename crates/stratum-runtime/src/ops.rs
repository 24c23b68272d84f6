//! The ops exposed to the sandbox prelude, and the per-isolate state they
//! read from [`OpState`].
//!
//! The prelude captures these ops and then removes `Deno` from the global
//! scope, so tenant code can only reach them through the wrappers it is
//! handed.

use std::{cell::RefCell, collections::BTreeMap, rc::Rc, time::Duration};

use deno_core::{
  OpState,
  error::{AnyError, generic_error},
  op2,
};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use stratum_core::invocation::ErrorKind;
use zeroize::Zeroizing;

use crate::{
  bridge::{DbBridge, DbCall},
  logs::LogBuffer,
};

// ─── State ───────────────────────────────────────────────────────────────────

/// Everything one isolate is allowed to know.
pub(crate) struct SandboxState {
  pub event:        Value,
  /// Taken by the first context read; plaintext does not linger here.
  pub secrets:      Option<BTreeMap<String, Zeroizing<String>>>,
  pub files:        BTreeMap<String, String>,
  pub entry:        String,
  pub logs:         LogBuffer,
  pub max_timer_ms: u64,
}

/// How the tenant's entry function settled, reported once by the prelude.
#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub(crate) enum Completion {
  Ok {
    #[serde(default)]
    value: Value,
  },
  Err {
    kind:    ErrorKind,
    message: String,
  },
}

#[derive(Debug, Deserialize)]
pub(crate) struct LogLine {
  level: String,
  line:  String,
}

// ─── Ops ─────────────────────────────────────────────────────────────────────

#[op2]
#[serde]
fn op_sandbox_context(state: &mut OpState) -> serde_json::Value {
  let sandbox = state.borrow_mut::<SandboxState>();
  let secrets: Map<String, Value> = sandbox
    .secrets
    .take()
    .unwrap_or_default()
    .iter()
    .map(|(name, value)| (name.clone(), Value::String(value.as_str().to_owned())))
    .collect();
  let source = sandbox.files.get(&sandbox.entry).cloned().unwrap_or_default();

  json!({
    "event": sandbox.event,
    "secrets": secrets,
    "entry": { "path": sandbox.entry, "source": source },
  })
}

#[op2]
#[string]
fn op_sandbox_file(state: &mut OpState, #[string] path: String) -> Option<String> {
  state.borrow::<SandboxState>().files.get(&path).cloned()
}

#[op2]
fn op_sandbox_log(state: &mut OpState, #[serde] entry: LogLine) {
  let logs = &state.borrow::<SandboxState>().logs;
  match entry.level.as_str() {
    "warn" => logs.push(format!("[warn] {}", entry.line)),
    "error" => logs.push(format!("[error] {}", entry.line)),
    _ => logs.push(entry.line),
  }
}

#[op2]
fn op_sandbox_finish(state: &mut OpState, #[serde] completion: Completion) {
  if !state.has::<Completion>() {
    state.put(completion);
  }
}

#[op2(async)]
async fn op_sandbox_sleep(state: Rc<RefCell<OpState>>, ms: f64) {
  let max = state.borrow().borrow::<SandboxState>().max_timer_ms;
  tokio::time::sleep(Duration::from_millis(clamp_delay(ms, max))).await;
}

#[op2(async)]
#[serde]
async fn op_sandbox_db(
  state: Rc<RefCell<OpState>>,
  #[serde] call: DbCall,
) -> Result<serde_json::Value, AnyError> {
  let bridge = state.borrow().borrow::<DbBridge>().clone();
  bridge.call(call).await.map_err(generic_error)
}

/// NaN and negative delays become zero; everything is capped at `max`.
fn clamp_delay(ms: f64, max: u64) -> u64 {
  if ms.is_nan() || ms <= 0.0 {
    0
  } else if ms >= max as f64 {
    max
  } else {
    ms as u64
  }
}

deno_core::extension!(
  stratum_sandbox,
  ops = [
    op_sandbox_context,
    op_sandbox_file,
    op_sandbox_log,
    op_sandbox_finish,
    op_sandbox_sleep,
    op_sandbox_db,
  ],
);
