//! Network refresh of cached entries.

use chrono::Utc;
use color_eyre::Result;
use tracing::{debug, warn};

use super::Agent;
use crate::cache::data_key;
use crate::net::request::is_remote_data;
use crate::net::{Request, Response};

impl Agent {
  /// Fetch `request` and, if the response is 2xx, store a copy under `key`
  /// in the dynamic partition together with fresh expiry metadata.
  ///
  /// Non-2xx responses are returned untouched and leave any cached entry
  /// in place. Only a failed fetch is an error; a failed write is logged
  /// and the live response is still returned.
  pub(crate) async fn refresh_and_store(&self, request: &Request, key: &str) -> Result<Response> {
    let response = self.fetch(request).await?;
    if !response.is_ok() {
      debug!("Not caching {}: status {}", key, response.status);
      return Ok(response);
    }

    if let Err(e) = self.store_with_meta(key, response.duplicate()).await {
      warn!("Failed to cache {}: {}", key, e);
    }

    Ok(response)
  }

  async fn store_with_meta(&self, key: &str, blob: Response) -> Result<()> {
    if is_reserved_key(key) {
      return Ok(());
    }
    let dynamic = self.dynamic().await?;
    dynamic.put(key, &blob).await?;
    self.expiry.record(&dynamic, key, Utc::now()).await?;
    Ok(())
  }

  /// Store `blob` under `key` in the dynamic partition without waiting.
  pub(crate) fn store_in_background(&self, key: String, blob: Response) {
    if is_reserved_key(&key) {
      return;
    }
    let agent = self.clone();
    self.tasks.spawn(format!("store {}", key), async move {
      agent.dynamic().await?.put(&key, &blob).await
    });
  }

  /// Refresh a request that was just served from cache, without waiting.
  ///
  /// HTML requests are always refetched. Remote-data requests are refetched
  /// only when their metadata is missing, unreadable, or expired.
  pub(crate) fn refresh_in_background(&self, request: &Request) {
    if request.accepts_html() {
      let agent = self.clone();
      let request = request.clone();
      self
        .tasks
        .spawn(format!("refresh {}", request.url), async move {
          let key = request.cache_key();
          let response = agent.fetch(&request).await?;
          if response.is_ok() && !is_reserved_key(&key) {
            agent.dynamic().await?.put(&key, &response).await?;
          }
          Ok(())
        });
    }

    if is_remote_data(&request.url, &self.routes.remote_data_pattern) {
      let agent = self.clone();
      let request = request.clone();
      self
        .tasks
        .spawn(format!("revalidate {}", request.url), async move {
          let key = request.cache_key();
          if agent.is_stale(&key).await {
            agent.refresh_and_store(&request, &key).await?;
          }
          Ok(())
        });
    }
  }

  /// Whether the remote-data entry under `key` is due for a refetch.
  async fn is_stale(&self, key: &str) -> bool {
    let dynamic = match self.dynamic().await {
      Ok(dynamic) => dynamic,
      Err(e) => {
        debug!("Treating {} as stale: {}", key, e);
        return true;
      }
    };

    match self.expiry.read(&dynamic, key).await {
      Ok(Some(meta)) => meta.is_expired(Utc::now()),
      Ok(None) => true,
      Err(e) => {
        debug!("Treating {} as stale: {}", key, e);
        true
      }
    }
  }
}

/// Keys ending in the metadata suffix belong to expiry metadata; a data
/// entry stored under one would be read back as malformed metadata.
fn is_reserved_key(key: &str) -> bool {
  if data_key(key).is_some() {
    debug!("Not caching {}: key ends in the metadata suffix", key);
    return true;
  }
  false
}
