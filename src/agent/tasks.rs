//! Fire-and-forget background work.
//!
//! Work spawned here never reports back to the code path that started it.
//! Failures travel one way, into a sink channel whose receiver only logs.

use color_eyre::Result;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::task::TaskTracker;
use tracing::debug;

/// A background job that returned an error.
#[derive(Debug, Clone)]
pub struct BackgroundFailure {
  pub label: String,
  pub error: String,
}

/// Spawns detached jobs and routes their failures to a sink.
#[derive(Clone)]
pub struct BackgroundTasks {
  tracker: TaskTracker,
  failures: mpsc::UnboundedSender<BackgroundFailure>,
  // Serializes close/wait/reopen so one waiter cannot reopen under another
  idle_gate: Arc<Mutex<()>>,
}

impl BackgroundTasks {
  /// Create the queue and the receiving end of its failure sink.
  pub fn new() -> (Self, mpsc::UnboundedReceiver<BackgroundFailure>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let tasks = Self {
      tracker: TaskTracker::new(),
      failures: tx,
      idle_gate: Arc::new(Mutex::new(())),
    };
    (tasks, rx)
  }

  /// Create the queue with a sink that logs every failure at debug level.
  ///
  /// Must be called from within a Tokio runtime.
  pub fn with_log_sink() -> Self {
    let (tasks, mut rx) = Self::new();

    tokio::spawn(async move {
      while let Some(failure) = rx.recv().await {
        debug!("Background {} failed: {}", failure.label, failure.error);
      }
    });

    tasks
  }

  /// Run `job` detached. Its error, if any, goes to the sink.
  pub fn spawn<F>(&self, label: impl Into<String>, job: F)
  where
    F: Future<Output = Result<()>> + Send + 'static,
  {
    let label = label.into();
    let failures = self.failures.clone();

    self.tracker.spawn(async move {
      if let Err(e) = job.await {
        // Sink closed means nobody is listening any more
        let _ = failures.send(BackgroundFailure {
          label,
          error: e.to_string(),
        });
      }
    });
  }

  /// Wait until every job spawned so far (and any they spawn) has finished.
  ///
  /// Concurrent callers take turns; each returns once the queue drained
  /// during its own turn.
  pub async fn wait_idle(&self) {
    let _turn = self.idle_gate.lock().await;
    self.tracker.close();
    self.tracker.wait().await;
    self.tracker.reopen();
  }

  pub fn in_flight(&self) -> usize {
    self.tracker.len()
  }
}
