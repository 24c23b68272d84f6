//! [`Runtime`] — resolves a function, prepares its sandbox, and races the
//! isolate against the deadline.

use std::{
  collections::BTreeMap,
  sync::Arc,
  time::{Duration, Instant},
};

use serde_json::{Value, json};
use stratum_core::{
  ProjectId,
  function::FunctionWithFiles,
  invocation::{ErrorKind, Invocation, InvocationError, InvocationOutcome},
  store::TenantStore,
};
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::{
  Result,
  bridge::DbBridge,
  config::RuntimeConfig,
  logs::LogBuffer,
  worker::{self, Job},
};

/// Executes tenant functions stored in `S`.
pub struct Runtime<S> {
  store:   Arc<S>,
  config:  RuntimeConfig,
  permits: Arc<Semaphore>,
}

impl<S> Clone for Runtime<S> {
  fn clone(&self) -> Self {
    Self {
      store:   self.store.clone(),
      config:  self.config.clone(),
      permits: self.permits.clone(),
    }
  }
}

impl<S: TenantStore + 'static> Runtime<S> {
  pub fn new(store: Arc<S>, config: RuntimeConfig) -> Result<Self> {
    config.validate()?;
    let permits = Arc::new(Semaphore::new(config.max_concurrent));
    Ok(Self { store, config, permits })
  }

  pub fn config(&self) -> &RuntimeConfig { &self.config }

  /// Run function `slug` of `project` once.
  ///
  /// Never returns a Rust error: every failure, including a missing function
  /// or an exhausted deadline, is an [`InvocationOutcome::Failure`] carrying
  /// whatever the function logged before it stopped.
  pub async fn invoke(
    &self,
    project: &ProjectId,
    slug: &str,
    invocation: Invocation,
  ) -> InvocationOutcome {
    let id = Uuid::new_v4();
    tracing::debug!(%id, project = %project, slug, state = "pending", "invocation");

    let function = match self.store.get_function(project, slug).await {
      Ok(Some(f)) => f,
      Ok(None) => {
        return finish(id, Instant::now(), Vec::new(), Err(not_found(slug)));
      }
      Err(e) => {
        tracing::error!(%id, error = %e, "function lookup failed");
        let err = InvocationError::new(ErrorKind::Internal, "function lookup failed");
        return finish(id, Instant::now(), Vec::new(), Err(err));
      }
    };
    let Some(entry) = function.entry_file().map(|f| f.path.clone()) else {
      let err = InvocationError::new(ErrorKind::NotFound, "no usable entry point");
      return finish(id, Instant::now(), Vec::new(), Err(err));
    };

    let Ok(_permit) = self.permits.acquire().await else {
      let err = InvocationError::new(ErrorKind::Internal, "runtime is shutting down");
      return finish(id, Instant::now(), Vec::new(), Err(err));
    };

    let started  = Instant::now();
    let budget   = Duration::from_millis(self.config.timeout_ms);
    let logs     = LogBuffer::new(self.config.max_log_lines);
    let prepared = self.run(id, project, function, entry, invocation, started + budget, &logs);

    let result = match tokio::time::timeout(budget, prepared).await {
      Ok(result) => result,
      Err(_) => Err(InvocationError::new(
        ErrorKind::TimedOut,
        format!("function exceeded {}ms", self.config.timeout_ms),
      )),
    };
    finish(id, started, logs.snapshot(), result)
  }

  #[allow(clippy::too_many_arguments)]
  async fn run(
    &self,
    id: Uuid,
    project: &ProjectId,
    function: FunctionWithFiles,
    entry: String,
    invocation: Invocation,
    deadline: Instant,
    logs: &LogBuffer,
  ) -> Result<Value, InvocationError> {
    tracing::debug!(%id, state = "loading", "invocation");

    let secrets = self.store.decrypt_secrets(project).await.map_err(|e| {
      tracing::error!(%id, error = %e, "secret decryption failed");
      InvocationError::new(ErrorKind::LoadFailure, "secrets could not be loaded")
    })?;
    for name in &secrets.failed {
      logs.push(format!("secret {name} could not be decrypted"));
    }

    let (db, _bridge) = DbBridge::serve(self.store.clone(), project.clone());
    let files: BTreeMap<String, String> = function
      .files
      .into_iter()
      .map(|f| (f.path, f.content))
      .collect();

    let job = Job {
      event: json!({
        "body": invocation.payload,
        "headers": invocation.headers,
        "method": invocation.method.unwrap_or_else(|| "POST".to_owned()),
      }),
      secrets: secrets.values,
      files,
      entry,
      logs: logs.clone(),
      db,
      deadline,
      max_timer_ms: self.config.max_timer_ms,
      heap_limit_mb: self.config.heap_limit_mb,
    };

    tracing::debug!(%id, state = "executing", "invocation");
    let done = worker::spawn(job)
      .map_err(|e| InvocationError::new(ErrorKind::Internal, format!("isolate thread: {e}")))?;
    done
      .await
      .map_err(|_| InvocationError::new(ErrorKind::Internal, "isolate thread exited"))?
  }
}

fn not_found(slug: &str) -> InvocationError {
  InvocationError::new(ErrorKind::NotFound, format!("function {slug:?} not found"))
}

fn finish(
  id: Uuid,
  started: Instant,
  logs: Vec<String>,
  result: Result<Value, InvocationError>,
) -> InvocationOutcome {
  let execution_time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
  match result {
    Ok(result) => {
      tracing::debug!(%id, state = "succeeded", execution_time_ms, "invocation");
      InvocationOutcome::Success { result, logs, execution_time_ms }
    }
    Err(error) => {
      let state = if error.kind == ErrorKind::TimedOut { "timed_out" } else { "failed" };
      tracing::debug!(%id, state, kind = %error.kind, execution_time_ms, "invocation");
      InvocationOutcome::Failure { error, logs, execution_time_ms }
    }
  }
}
