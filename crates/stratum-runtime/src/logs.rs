use std::sync::{Arc, Mutex, PoisonError};

/// Append-only log lines of one invocation.
///
/// Shared between the isolate thread that writes and the caller that takes a
/// snapshot, which may happen while the isolate is still being torn down.
#[derive(Clone, Debug)]
pub(crate) struct LogBuffer {
  lines: Arc<Mutex<Vec<String>>>,
  limit: usize,
}

impl LogBuffer {
  pub fn new(limit: usize) -> Self {
    Self { lines: Arc::default(), limit }
  }

  pub fn push(&self, line: impl Into<String>) {
    let mut lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
    match lines.len() {
      n if n < self.limit => lines.push(line.into()),
      n if n == self.limit => lines.push("log limit reached, further output dropped".into()),
      _ => {}
    }
  }

  pub fn snapshot(&self) -> Vec<String> {
    self.lines.lock().unwrap_or_else(PoisonError::into_inner).clone()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn stops_at_limit_with_one_marker() {
    let logs = LogBuffer::new(2);
    for i in 0..5 {
      logs.push(format!("line {i}"));
    }
    let lines = logs.snapshot();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[1], "line 1");
    assert!(lines[2].contains("limit"));
  }
}
