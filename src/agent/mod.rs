//! The request-interception caching engine.
//!
//! [`Agent`] owns the store, the network client and the background work
//! queue, and exposes the three things the hosting runtime drives:
//! lifecycle (install/activate), request handling, and shutdown.

mod lifecycle;
mod refresh;
mod router;
mod tasks;

pub use lifecycle::{Activated, Installed, Lifecycle, LifecycleSignal};
pub use router::{Interception, ResponseSource, Routed};
pub use tasks::{BackgroundFailure, BackgroundTasks};

use color_eyre::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::cache::{BlobStore, ExpiryTracker, Partition};
use crate::config::{Config, PartitionNames};
use crate::net::{Fetcher, Request, Response};

/// Routing inputs derived from configuration once, at construction.
#[derive(Debug, Clone)]
struct Routes {
  remote_data_pattern: String,
  ignored_schemes: Vec<String>,
  offline_page: Url,
  placeholder_image: Url,
}

/// Request-intercepting cache agent.
///
/// Cheap to clone; clones share the store, client and work queue.
#[derive(Clone)]
pub struct Agent {
  store: Arc<dyn BlobStore>,
  fetcher: Arc<dyn Fetcher>,
  names: PartitionNames,
  expiry: ExpiryTracker,
  routes: Arc<Routes>,
  lifecycle: Lifecycle,
  tasks: BackgroundTasks,
  cancel: CancellationToken,
}

impl Agent {
  /// Build an agent whose background failures are logged.
  ///
  /// Must be called from within a Tokio runtime.
  pub fn new(config: &Config, store: Arc<dyn BlobStore>, fetcher: Arc<dyn Fetcher>) -> Result<Self> {
    Self::with_tasks(config, store, fetcher, BackgroundTasks::with_log_sink())
  }

  /// Build an agent around an existing background work queue.
  pub fn with_tasks(
    config: &Config,
    store: Arc<dyn BlobStore>,
    fetcher: Arc<dyn Fetcher>,
    tasks: BackgroundTasks,
  ) -> Result<Self> {
    let origin = config.origin()?;
    let routes = Routes {
      remote_data_pattern: config.remote_data.pattern.clone(),
      ignored_schemes: config.ignored_schemes.clone(),
      offline_page: Request::resolve(&origin, &config.offline_page)?,
      placeholder_image: Request::resolve(&origin, &config.placeholder_image)?,
    };

    let precache = config
      .precache
      .iter()
      .map(|asset| Request::resolve(&origin, asset))
      .collect::<Result<Vec<_>>>()?;

    let cancel = CancellationToken::new();
    let lifecycle = Lifecycle::new(
      store.clone(),
      fetcher.clone(),
      config.partitions.clone(),
      precache,
      cancel.clone(),
    );

    Ok(Self {
      store,
      fetcher,
      names: config.partitions.clone(),
      expiry: ExpiryTracker::new(config.ttl()?),
      routes: Arc::new(routes),
      lifecycle,
      tasks,
      cancel,
    })
  }

  pub fn lifecycle(&self) -> &Lifecycle {
    &self.lifecycle
  }

  /// Open the dynamic partition.
  pub async fn dynamic(&self) -> Result<Partition> {
    Partition::open(self.store.clone(), &self.names.dynamic_name).await
  }

  /// Plain network fetch, as if no agent were present.
  pub async fn fetch(&self, request: &Request) -> Result<Response> {
    self.fetcher.fetch(request, self.cancel.child_token()).await
  }

  /// Wait for all in-flight background work.
  pub async fn wait_idle(&self) {
    self.tasks.wait_idle().await;
  }

  /// Abandon in-flight fetches, then wait for background work to settle.
  pub async fn shutdown(&self) {
    self.cancel.cancel();
    self.tasks.wait_idle().await;
  }

  /// Token cancelled by [`Agent::shutdown`].
  pub fn cancellation(&self) -> CancellationToken {
    self.cancel.clone()
  }
}
