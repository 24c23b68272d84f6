//! The isolate thread.
//!
//! `JsRuntime` is `!Send`, so each invocation owns a dedicated OS thread with
//! a current-thread tokio runtime driving its event loop. A second, tiny
//! watchdog thread terminates V8 execution at the deadline; that is what
//! preempts code that never yields.

use std::{
  collections::BTreeMap,
  fmt,
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
    mpsc::{self, RecvTimeoutError},
  },
  thread,
  time::Instant,
};

use deno_core::{JsRuntime, ModuleCodeString, PollEventLoopOptions, RuntimeOptions, v8};
use serde_json::Value;
use stratum_core::invocation::{ErrorKind, InvocationError};
use tokio::sync::oneshot;
use zeroize::Zeroizing;

use crate::{
  bridge::DbBridge,
  logs::LogBuffer,
  ops::{Completion, SandboxState, stratum_sandbox},
};

const PRELUDE: &str = include_str!("../js/prelude.js");

pub(crate) type JobResult = Result<Value, InvocationError>;

/// Everything an isolate thread needs, all of it owned.
pub(crate) struct Job {
  pub event:         Value,
  pub secrets:       BTreeMap<String, Zeroizing<String>>,
  pub files:         BTreeMap<String, String>,
  pub entry:         String,
  pub logs:          LogBuffer,
  pub db:            DbBridge,
  pub deadline:      Instant,
  pub max_timer_ms:  u64,
  pub heap_limit_mb: usize,
}

/// Start `job` on a fresh thread. The receiver resolves when the isolate is
/// done, whether or not anyone is still waiting for it.
pub(crate) fn spawn(job: Job) -> std::io::Result<oneshot::Receiver<JobResult>> {
  let (tx, rx) = oneshot::channel();
  thread::Builder::new()
    .name("stratum-isolate".into())
    .spawn(move || {
      let _ = tx.send(run(job));
    })?;
  Ok(rx)
}

fn run(job: Job) -> JobResult {
  let rt = tokio::runtime::Builder::new_current_thread()
    .enable_all()
    .build()
    .map_err(|e| InvocationError::new(ErrorKind::Internal, e.to_string()))?;
  rt.block_on(execute(job))
}

// ─── Watchdog ────────────────────────────────────────────────────────────────

/// Terminates the isolate at `deadline` unless dropped first.
struct Watchdog {
  _disarm: mpsc::Sender<()>,
}

impl Watchdog {
  fn arm(handle: v8::IsolateHandle, deadline: Instant, fired: Arc<AtomicBool>) -> Self {
    let (tx, rx) = mpsc::channel::<()>();
    thread::spawn(move || {
      let wait = deadline.saturating_duration_since(Instant::now());
      if let Err(RecvTimeoutError::Timeout) = rx.recv_timeout(wait) {
        fired.store(true, Ordering::SeqCst);
        handle.terminate_execution();
      }
    });
    Self { _disarm: tx }
  }
}

// ─── Execution ───────────────────────────────────────────────────────────────

/// Flags set from outside the isolate when it is forcibly stopped.
#[derive(Clone, Default)]
struct Stops {
  deadline: Arc<AtomicBool>,
  heap:     Arc<AtomicBool>,
}

impl Stops {
  fn forced(&self) -> Option<InvocationError> {
    if self.deadline.load(Ordering::SeqCst) {
      return Some(InvocationError::new(ErrorKind::TimedOut, "deadline exceeded"));
    }
    if self.heap.load(Ordering::SeqCst) {
      return Some(InvocationError::new(ErrorKind::ExecutionError, "memory limit exceeded"));
    }
    None
  }

  fn classify(&self, err: impl fmt::Display) -> InvocationError {
    self
      .forced()
      .unwrap_or_else(|| InvocationError::new(ErrorKind::ExecutionError, err.to_string()))
  }
}

async fn execute(job: Job) -> JobResult {
  let stops = Stops::default();
  let heap_bytes = job.heap_limit_mb * 1024 * 1024;

  let mut runtime = JsRuntime::new(RuntimeOptions {
    extensions: vec![stratum_sandbox::init_ops()],
    create_params: Some(v8::CreateParams::default().heap_limits(0, heap_bytes)),
    ..Default::default()
  });

  let handle = runtime.v8_isolate().thread_safe_handle();
  {
    let handle = handle.clone();
    let heap = stops.heap.clone();
    runtime.add_near_heap_limit_callback(move |current, _initial| {
      heap.store(true, Ordering::SeqCst);
      handle.terminate_execution();
      // Headroom so V8 can unwind instead of aborting the process.
      current * 2
    });
  }
  let _watchdog = Watchdog::arm(handle, job.deadline, stops.deadline.clone());

  {
    let state = runtime.op_state();
    let mut state = state.borrow_mut();
    state.put(SandboxState {
      event:        job.event,
      secrets:      Some(job.secrets),
      files:        job.files,
      entry:        job.entry,
      logs:         job.logs,
      max_timer_ms: job.max_timer_ms,
    });
    state.put(job.db);
  }

  let script = runtime.execute_script("stratum:prelude", ModuleCodeString::from_static(PRELUDE));
  if let Err(e) = script {
    return Err(stops.classify(e));
  }
  let looped = runtime.run_event_loop(PollEventLoopOptions::default()).await;

  if let Some(forced) = stops.forced() {
    return Err(forced);
  }
  let completion = runtime.op_state().borrow_mut().try_take::<Completion>();
  match (completion, looped) {
    (Some(Completion::Ok { value }), _) => Ok(value),
    (Some(Completion::Err { kind, message }), _) => Err(InvocationError::new(kind, message)),
    (None, Err(e)) => Err(stops.classify(e)),
    (None, Ok(())) => Err(InvocationError::new(
      ErrorKind::ExecutionError,
      "function finished without producing a result",
    )),
  }
}
