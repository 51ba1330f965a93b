//! Install-time pre-population and activate-time cleanup.

use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use url::Url;

use crate::cache::{BlobStore, Partition};
use crate::config::PartitionNames;
use crate::net::{Fetcher, Request, Response};

/// What the agent asks of its hosting runtime after a lifecycle step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleSignal {
  /// Become active now instead of waiting for existing clients to close
  SkipWaiting,
  /// Take control of all open clients without waiting for a reload
  ClaimClients,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Installed {
  /// Number of assets stored in the static partition
  pub cached: usize,
  pub signal: LifecycleSignal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activated {
  /// Partitions removed because they are no longer current
  pub deleted: Vec<String>,
  pub signal: LifecycleSignal,
}

/// Handles the install and activate lifecycle events.
#[derive(Clone)]
pub struct Lifecycle {
  store: Arc<dyn BlobStore>,
  fetcher: Arc<dyn Fetcher>,
  names: PartitionNames,
  precache: Arc<Vec<Url>>,
  cancel: CancellationToken,
}

impl Lifecycle {
  pub fn new(
    store: Arc<dyn BlobStore>,
    fetcher: Arc<dyn Fetcher>,
    names: PartitionNames,
    precache: Vec<Url>,
    cancel: CancellationToken,
  ) -> Self {
    Self {
      store,
      fetcher,
      names,
      precache: Arc::new(precache),
      cancel,
    }
  }

  /// Fetch every precache asset and store them in the static partition.
  ///
  /// All or nothing: a failed or non-2xx fetch of any asset fails the whole
  /// install and nothing is written. Not retried.
  pub async fn install(&self) -> Result<Installed> {
    info!("Installing");
    let partition = Partition::open(self.store.clone(), &self.names.static_name).await?;

    info!(
      "Caching {} static assets into {}",
      self.precache.len(),
      partition.name()
    );
    let fetches = self.precache.iter().map(|url| self.fetch_asset(url));
    let entries = try_join_all(fetches).await?;

    partition.put_all(&entries).await?;

    info!("Skip waiting on install");
    Ok(Installed {
      cached: entries.len(),
      signal: LifecycleSignal::SkipWaiting,
    })
  }

  async fn fetch_asset(&self, url: &Url) -> Result<(String, Response)> {
    let request = Request::get(url.clone());
    let response = self
      .fetcher
      .fetch(&request, self.cancel.child_token())
      .await?;

    if !response.is_ok() {
      return Err(eyre!(
        "Failed to precache {}: status {}",
        url,
        response.status
      ));
    }

    Ok((request.cache_key(), response))
  }

  /// Delete every partition that is not one of the two current ones.
  pub async fn activate(&self) -> Result<Activated> {
    info!("Activating");
    let mut deleted = Vec::new();

    for name in self.store.partition_names().await? {
      if self.is_current(&name) {
        continue;
      }
      info!("Deleting old partition: {}", name);
      self.store.delete_partition(&name).await?;
      deleted.push(name);
    }

    info!("Claiming clients");
    Ok(Activated {
      deleted,
      signal: LifecycleSignal::ClaimClients,
    })
  }

  fn is_current(&self, name: &str) -> bool {
    name == self.names.static_name || name == self.names.dynamic_name
  }
}

#[cfg(test)]
mod tests {
  use super::super::testing::{fixture, fixture_with, url};
  use super::*;
  use crate::config::Config;

  #[tokio::test]
  async fn test_install_stores_all_assets() {
    let fx = fixture();
    fx.fetcher.respond("https://shop.test/", 200, "home");
    fx.fetcher.respond("https://shop.test/offline.html", 200, "offline");

    let installed = fx.agent.lifecycle().install().await.unwrap();
    assert_eq!(installed.cached, 2);
    assert_eq!(installed.signal, LifecycleSignal::SkipWaiting);

    let page = fx
      .store
      .get("sokoinn-v2", "https://shop.test/offline.html")
      .await
      .unwrap()
      .unwrap();
    assert_eq!(page.body_text(), "offline");
  }

  #[tokio::test]
  async fn test_install_is_all_or_nothing() {
    let fx = fixture();
    fx.fetcher.respond("https://shop.test/", 200, "home");
    fx.fetcher.fail("https://shop.test/offline.html");

    assert!(fx.agent.lifecycle().install().await.is_err());
    assert!(fx.store.keys("sokoinn-v2").await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_install_rejects_non_ok_asset() {
    let fx = fixture();
    fx.fetcher.respond("https://shop.test/", 200, "home");
    fx.fetcher.respond("https://shop.test/offline.html", 404, "missing");

    let err = fx.agent.lifecycle().install().await.unwrap_err();
    assert!(err.to_string().contains("status 404"));
    assert!(fx.store.match_any("https://shop.test/").await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_activate_deletes_only_stale_partitions() {
    let config = Config {
      partitions: PartitionNames {
        static_name: "static-v2".to_string(),
        dynamic_name: "dynamic-v2".to_string(),
      },
      ..super::super::testing::config()
    };
    let fx = fixture_with(config);

    for name in ["static-v1", "dynamic-v1", "static-v2", "dynamic-v2"] {
      fx.store.open_partition(name).await.unwrap();
      fx.store
        .put(name, "https://shop.test/", &Response::text(200, name))
        .await
        .unwrap();
    }

    let activated = fx.agent.lifecycle().activate().await.unwrap();
    assert_eq!(activated.deleted, vec!["static-v1", "dynamic-v1"]);
    assert_eq!(activated.signal, LifecycleSignal::ClaimClients);
    assert_eq!(
      fx.store.partition_names().await.unwrap(),
      vec!["static-v2", "dynamic-v2"]
    );
  }

  #[tokio::test]
  async fn test_activate_on_empty_store() {
    let fx = fixture();
    let activated = fx.agent.lifecycle().activate().await.unwrap();
    assert!(activated.deleted.is_empty());
  }

  #[tokio::test]
  async fn test_version_bump_discards_old_static_content() {
    let fx = fixture();
    fx.store
      .put("sokoinn-v1", "https://shop.test/", &Response::text(200, "old"))
      .await
      .unwrap();

    fx.fetcher.respond("https://shop.test/", 200, "new");
    fx.fetcher.respond("https://shop.test/offline.html", 200, "offline");
    fx.agent.lifecycle().install().await.unwrap();
    fx.agent.lifecycle().activate().await.unwrap();

    let hit = fx
      .store
      .match_any(url("https://shop.test/").as_str())
      .await
      .unwrap()
      .unwrap();
    assert_eq!(hit.body_text(), "new");
  }
}
