//! Channel bridge from isolate ops to the host's [`TenantStore`].
//!
//! Ops run on the isolate's own current-thread runtime and cannot hold a
//! generic store. They send a [`DbCall`] down a channel instead; a task on the
//! host runtime, bound to one project, executes it and replies.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value, json};
use stratum_core::{ProjectId, store::TenantStore};
use tokio::{
  sync::{mpsc, oneshot},
  task::JoinHandle,
};

const QUEUE_DEPTH: usize = 64;

/// One `db.*` call from tenant code.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub(crate) enum DbCall {
  Query {
    sql:    String,
    #[serde(default)]
    params: Vec<Value>,
  },
  Insert {
    table: String,
    row:   Map<String, Value>,
  },
  Select {
    table:  String,
    #[serde(default)]
    filter: Map<String, Value>,
  },
}

struct DbRequest {
  call:  DbCall,
  reply: oneshot::Sender<Result<Value, String>>,
}

/// The isolate-side handle. Cloned into each op invocation.
#[derive(Clone)]
pub(crate) struct DbBridge {
  tx: mpsc::Sender<DbRequest>,
}

/// Aborts the serving task when dropped, so no tenant query outlives the
/// invocation that issued it.
pub(crate) struct BridgeTask(JoinHandle<()>);

impl Drop for BridgeTask {
  fn drop(&mut self) { self.0.abort(); }
}

impl DbBridge {
  /// Start serving calls for `project` on the current (host) runtime.
  pub fn serve<S>(store: Arc<S>, project: ProjectId) -> (Self, BridgeTask)
  where
    S: TenantStore + 'static,
  {
    let (tx, mut rx) = mpsc::channel::<DbRequest>(QUEUE_DEPTH);
    let task = tokio::spawn(async move {
      while let Some(DbRequest { call, reply }) = rx.recv().await {
        let result = execute(store.as_ref(), &project, call).await;
        let _ = reply.send(result);
      }
    });
    (Self { tx }, BridgeTask(task))
  }

  pub async fn call(&self, call: DbCall) -> Result<Value, String> {
    let (reply, rx) = oneshot::channel();
    self
      .tx
      .send(DbRequest { call, reply })
      .await
      .map_err(|_| "database is no longer available".to_owned())?;
    rx.await
      .map_err(|_| "database is no longer available".to_owned())?
  }
}

async fn execute<S: TenantStore>(
  store: &S,
  project: &ProjectId,
  call: DbCall,
) -> Result<Value, String> {
  let result = match call {
    DbCall::Query { sql, params } => store.tenant_query(project, sql, params).await,
    DbCall::Insert { table, row } => store
      .tenant_insert(project, table, row)
      .await
      .map(|id| json!({ "id": id })),
    DbCall::Select { table, filter } => store
      .tenant_select(project, table, filter)
      .await
      .map(Value::Array),
  };
  result.map_err(|e| e.to_string())
}
