//! Per-request routing between cache and network.

use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error, warn};

use super::Agent;
use crate::cache::BlobStore;
use crate::net::{Destination, Request, RequestKind, Response};

/// Body of the synthesized 408 for generic requests that fail offline.
pub const NETWORK_ERROR_TEXT: &str = "Network error occurred";

/// Message in the degraded-success JSON for unavailable remote data.
pub const OFFLINE_DATA_MESSAGE: &str = "You are offline. Cached data not available.";

/// What the agent decided to do with a request.
#[derive(Debug)]
pub enum Interception {
  /// Not intercepted; the runtime performs the request itself
  Passthrough,
  /// The agent answers with this response
  Respond(Routed),
}

/// Where a routed response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSource {
  /// Live network response
  Network,
  /// Entry found in a partition
  Cache,
  /// Pre-cached fallback served because the network failed
  Offline,
  /// Built by the agent because nothing else was available
  Synthesized,
}

/// A response together with its source.
#[derive(Debug)]
pub struct Routed {
  pub response: Response,
  pub source: ResponseSource,
}

impl Routed {
  pub fn from_network(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Network,
    }
  }

  pub fn from_cache(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Cache,
    }
  }

  pub fn offline(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Offline,
    }
  }

  pub fn synthesized(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Synthesized,
    }
  }
}

impl Agent {
  /// Route one intercepted request.
  ///
  /// Resolves to a response on every path except one: an image that is
  /// neither cached nor fetchable while no placeholder is cached.
  pub async fn handle(&self, request: &Request) -> Result<Interception> {
    if !request.is_get() || self.is_ignored_scheme(request) {
      return Ok(Interception::Passthrough);
    }

    let routed = match RequestKind::classify(request, &self.routes.remote_data_pattern) {
      RequestKind::RemoteData => self.remote_data(request).await,
      RequestKind::Image => self.media(request).await?,
      RequestKind::Generic => self.generic(request).await,
    };

    debug!("{} served from {:?}", request.url, routed.source);
    Ok(Interception::Respond(routed))
  }

  fn is_ignored_scheme(&self, request: &Request) -> bool {
    let scheme = request.url.scheme();
    self
      .routes
      .ignored_schemes
      .iter()
      .any(|s| s.eq_ignore_ascii_case(scheme))
  }

  /// Combined lookup across partitions. Store failures count as a miss.
  async fn lookup(&self, key: &str) -> Option<Response> {
    match self.store.match_any(key).await {
      Ok(hit) => hit,
      Err(e) => {
        warn!("Cache lookup for {} failed: {}", key, e);
        None
      }
    }
  }

  /// Cache first with background refresh; network on miss; fallbacks offline.
  async fn generic(&self, request: &Request) -> Routed {
    let key = request.cache_key();

    if let Some(cached) = self.lookup(&key).await {
      self.refresh_in_background(request);
      return Routed::from_cache(cached);
    }

    match self.fetch(request).await {
      Ok(response) => {
        if response.status == 200 {
          self.store_in_background(key, response.duplicate());
        }
        Routed::from_network(response)
      }
      Err(e) => {
        error!("Fetch failed: {}", e);
        self.offline_fallback(request).await
      }
    }
  }

  async fn offline_fallback(&self, request: &Request) -> Routed {
    if request.accepts_html() {
      if let Some(page) = self.lookup(self.routes.offline_page.as_str()).await {
        return Routed::offline(page);
      }
      warn!("Offline page {} is not cached", self.routes.offline_page);
    }

    if request.destination == Destination::Image {
      if let Some(image) = self.lookup(self.routes.placeholder_image.as_str()).await {
        return Routed::offline(image);
      }
    }

    Routed::synthesized(Response::text(408, NETWORK_ERROR_TEXT))
  }

  /// Cache first from the dynamic partition, revalidating on every hit.
  async fn remote_data(&self, request: &Request) -> Routed {
    match self.try_remote_data(request).await {
      Ok(routed) => routed,
      Err(e) => {
        error!("Remote-data request failed: {}", e);
        Routed::synthesized(Response::json(
          200,
          &json!({
            "success": false,
            "message": OFFLINE_DATA_MESSAGE,
            "cached": false,
          }),
        ))
      }
    }
  }

  async fn try_remote_data(&self, request: &Request) -> Result<Routed> {
    let dynamic = self.dynamic().await?;
    let key = request.cache_key();

    if let Some(cached) = dynamic.get(&key).await? {
      let agent = self.clone();
      let request = request.clone();
      self
        .tasks
        .spawn(format!("revalidate {}", key), async move {
          let key = request.cache_key();
          agent.refresh_and_store(&request, &key).await.map(|_| ())
        });
      return Ok(Routed::from_cache(cached));
    }

    let response = self.refresh_and_store(request, &key).await?;
    Ok(Routed::from_network(response))
  }

  /// Cache first for images, placeholder when offline.
  async fn media(&self, request: &Request) -> Result<Routed> {
    let key = request.cache_key();

    if let Some(cached) = self.lookup(&key).await {
      return Ok(Routed::from_cache(cached));
    }

    match self.fetch(request).await {
      Ok(response) => {
        if response.is_ok() {
          self.store_in_background(key, response.duplicate());
        }
        Ok(Routed::from_network(response))
      }
      Err(e) => match self.lookup(self.routes.placeholder_image.as_str()).await {
        Some(image) => Ok(Routed::offline(image)),
        None => Err(eyre!(
          "Failed to load image {} and no placeholder is cached: {}",
          request.url,
          e
        )),
      },
    }
  }
}

#[cfg(test)]
mod tests {
  use super::super::testing::{failing_fixture, fixture, url, Fixture, StoreOp, API};
  use super::*;
  use crate::cache::meta_key;

  fn respond(interception: Interception) -> Routed {
    match interception {
      Interception::Respond(routed) => routed,
      Interception::Passthrough => panic!("expected the agent to respond"),
    }
  }

  async fn precache(fx: &Fixture, key: &str, body: &str) {
    fx.store
      .put("sokoinn-v2", key, &Response::text(200, body))
      .await
      .unwrap();
  }

  #[tokio::test]
  async fn test_non_get_is_passed_through() {
    let fx = fixture();
    let request = Request::get(url("https://shop.test/api/orders")).with_method("POST");

    let interception = fx.agent.handle(&request).await.unwrap();
    assert!(matches!(interception, Interception::Passthrough));
    assert_eq!(fx.fetcher.total_calls(), 0);
    assert!(fx.store.partition_names().await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_extension_scheme_is_passed_through() {
    let fx = fixture();
    let request = Request::get(url("chrome-extension://abcdef/popup.html"));

    let interception = fx.agent.handle(&request).await.unwrap();
    assert!(matches!(interception, Interception::Passthrough));
    assert_eq!(fx.fetcher.total_calls(), 0);
  }

  #[tokio::test]
  async fn test_generic_hit_is_served_after_first_fetch() {
    let fx = fixture();
    let page = "https://shop.test/js/app.js";
    fx.fetcher.respond(page, 200, "console.log(1)");

    let first = respond(fx.agent.handle(&Request::get(url(page))).await.unwrap());
    assert_eq!(first.source, ResponseSource::Network);
    assert_eq!(first.response.body_text(), "console.log(1)");
    fx.agent.wait_idle().await;

    let second = respond(fx.agent.handle(&Request::get(url(page))).await.unwrap());
    fx.agent.wait_idle().await;
    assert_eq!(second.source, ResponseSource::Cache);
    assert_eq!(second.response.body_text(), "console.log(1)");
    assert_eq!(fx.fetcher.calls_to(page), 1);
  }

  #[tokio::test]
  async fn test_generic_non_200_is_not_stored() {
    let fx = fixture();
    let page = "https://shop.test/missing.html";
    fx.fetcher.respond(page, 404, "not found");

    let routed = respond(fx.agent.handle(&Request::get(url(page))).await.unwrap());
    fx.agent.wait_idle().await;

    assert_eq!(routed.response.status, 404);
    assert!(fx.store.match_any(page).await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_generic_hit_with_html_accept_refreshes_in_background() {
    let fx = fixture();
    let page = "https://shop.test/jobs.html";
    precache(&fx, page, "jobs v1").await;
    fx.fetcher.respond(page, 200, "jobs v2");

    let request = Request::get(url(page)).with_header("accept", "text/html");
    let routed = respond(fx.agent.handle(&request).await.unwrap());
    assert_eq!(routed.response.body_text(), "jobs v1");

    fx.agent.wait_idle().await;
    assert_eq!(fx.fetcher.calls_to(page), 1);
    let dynamic = fx.agent.dynamic().await.unwrap();
    assert_eq!(dynamic.get(page).await.unwrap().unwrap().body_text(), "jobs v2");
  }

  #[tokio::test]
  async fn test_offline_html_request_gets_offline_page() {
    let fx = fixture();
    precache(&fx, "https://shop.test/offline.html", "<h1>offline</h1>").await;
    let page = "https://shop.test/skills.html";
    fx.fetcher.fail(page);

    let request = Request::get(url(page)).with_header("accept", "text/html");
    let routed = respond(fx.agent.handle(&request).await.unwrap());

    assert_eq!(routed.source, ResponseSource::Offline);
    assert_eq!(routed.response.status, 200);
    assert_eq!(routed.response.body_text(), "<h1>offline</h1>");
  }

  #[tokio::test]
  async fn test_offline_non_html_request_gets_408() {
    let fx = fixture();
    let script = "https://shop.test/js/products.js";
    fx.fetcher.fail(script);

    let request = Request::get(url(script)).with_header("accept", "*/*");
    let routed = respond(fx.agent.handle(&request).await.unwrap());

    assert_eq!(routed.source, ResponseSource::Synthesized);
    assert_eq!(routed.response.status, 408);
    assert_eq!(routed.response.header("content-type"), Some("text/plain"));
    assert_eq!(routed.response.body_text(), NETWORK_ERROR_TEXT);
  }

  #[tokio::test]
  async fn test_offline_html_without_cached_page_gets_408() {
    let fx = fixture();
    let page = "https://shop.test/rentals.html";
    fx.fetcher.fail(page);

    let request = Request::get(url(page)).with_header("accept", "text/html");
    let routed = respond(fx.agent.handle(&request).await.unwrap());
    assert_eq!(routed.response.status, 408);
  }

  #[tokio::test]
  async fn test_remote_data_miss_fetches_and_tracks_expiry() {
    let fx = fixture();
    fx.fetcher.respond(API, 200, r#"{"success":true,"products":[]}"#);

    let routed = respond(fx.agent.handle(&Request::get(url(API))).await.unwrap());
    assert_eq!(routed.source, ResponseSource::Network);
    assert_eq!(routed.response.body_text(), r#"{"success":true,"products":[]}"#);

    let dynamic = fx.agent.dynamic().await.unwrap();
    assert!(dynamic.get(API).await.unwrap().is_some());
    assert!(dynamic.get(&meta_key(API)).await.unwrap().is_some());
  }

  #[tokio::test]
  async fn test_remote_data_hit_serves_cache_and_revalidates() {
    let fx = fixture();
    let dynamic = fx.agent.dynamic().await.unwrap();
    dynamic.put(API, &Response::text(200, "old")).await.unwrap();
    fx.fetcher.respond(API, 200, "new");

    let routed = respond(fx.agent.handle(&Request::get(url(API))).await.unwrap());
    assert_eq!(routed.source, ResponseSource::Cache);
    assert_eq!(routed.response.body_text(), "old");

    fx.agent.wait_idle().await;
    assert_eq!(fx.fetcher.calls_to(API), 1);
    assert_eq!(dynamic.get(API).await.unwrap().unwrap().body_text(), "new");
  }

  #[tokio::test]
  async fn test_remote_data_hit_survives_failed_revalidation() {
    let fx = fixture();
    let dynamic = fx.agent.dynamic().await.unwrap();
    dynamic.put(API, &Response::text(200, "old")).await.unwrap();
    fx.fetcher.fail(API);

    let routed = respond(fx.agent.handle(&Request::get(url(API))).await.unwrap());
    fx.agent.wait_idle().await;

    assert_eq!(routed.response.body_text(), "old");
    assert_eq!(dynamic.get(API).await.unwrap().unwrap().body_text(), "old");
  }

  #[tokio::test]
  async fn test_remote_data_total_failure_returns_degraded_json() {
    let fx = fixture();
    fx.fetcher.fail(API);

    let routed = respond(fx.agent.handle(&Request::get(url(API))).await.unwrap());
    assert_eq!(routed.source, ResponseSource::Synthesized);
    assert_eq!(routed.response.status, 200);
    assert_eq!(routed.response.header("content-type"), Some("application/json"));

    let body: serde_json::Value = serde_json::from_slice(&routed.response.body).unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["cached"], false);
    assert_eq!(body["message"], OFFLINE_DATA_MESSAGE);
  }

  #[tokio::test]
  async fn test_remote_data_error_status_passes_through_uncached() {
    let fx = fixture();
    fx.fetcher.respond(API, 503, "unavailable");

    let routed = respond(fx.agent.handle(&Request::get(url(API))).await.unwrap());
    assert_eq!(routed.response.status, 503);
    assert!(fx.agent.dynamic().await.unwrap().keys().await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_image_miss_is_fetched_and_copied_into_dynamic() {
    let fx = fixture();
    let logo = "https://shop.test/images/logo.png";
    fx.fetcher.respond(logo, 200, "PNG-BYTES");

    let request = Request::get(url(logo)).with_destination(Destination::Image);
    let routed = respond(fx.agent.handle(&request).await.unwrap());
    fx.agent.wait_idle().await;

    assert_eq!(routed.source, ResponseSource::Network);
    assert_eq!(routed.response.body_text(), "PNG-BYTES");

    let stored = fx.agent.dynamic().await.unwrap().get(logo).await.unwrap().unwrap();
    assert_eq!(stored, routed.response);
  }

  #[tokio::test]
  async fn test_image_hit_skips_network() {
    let fx = fixture();
    let logo = "https://shop.test/images/logo.png";
    precache(&fx, logo, "PNG").await;

    let request = Request::get(url(logo)).with_destination(Destination::Image);
    let routed = respond(fx.agent.handle(&request).await.unwrap());

    assert_eq!(routed.source, ResponseSource::Cache);
    assert_eq!(fx.fetcher.total_calls(), 0);
  }

  #[tokio::test]
  async fn test_offline_image_gets_placeholder() {
    let fx = fixture();
    precache(&fx, "https://shop.test/images/placeholder-product.png", "PLACEHOLDER").await;
    let photo = "https://images.test/p/1.jpg";
    fx.fetcher.fail(photo);

    let request = Request::get(url(photo)).with_destination(Destination::Image);
    let routed = respond(fx.agent.handle(&request).await.unwrap());

    assert_eq!(routed.source, ResponseSource::Offline);
    assert_eq!(routed.response.body_text(), "PLACEHOLDER");
  }

  #[tokio::test]
  async fn test_url_with_metadata_suffix_is_served_but_not_cached() {
    let fx = fixture();
    let odd = "https://shop.test/exports/catalog.meta";
    fx.fetcher.respond(odd, 200, "catalog");

    let routed = respond(fx.agent.handle(&Request::get(url(odd))).await.unwrap());
    fx.agent.wait_idle().await;

    assert_eq!(routed.response.body_text(), "catalog");
    assert!(fx.store.match_any(odd).await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_generic_lookup_failure_falls_through_to_network() {
    let (fx, store) = failing_fixture();
    store.fail(StoreOp::MatchAny);
    let page = "https://shop.test/index.html";
    fx.fetcher.respond(page, 200, "home");

    let routed = respond(fx.agent.handle(&Request::get(url(page))).await.unwrap());
    fx.agent.wait_idle().await;

    assert_eq!(routed.source, ResponseSource::Network);
    assert_eq!(routed.response.body_text(), "home");
    assert_eq!(fx.fetcher.calls_to(page), 1);
  }

  #[tokio::test]
  async fn test_media_lookup_failure_falls_through_to_network() {
    let (fx, store) = failing_fixture();
    store.fail(StoreOp::MatchAny);
    let logo = "https://shop.test/images/logo.png";
    fx.fetcher.respond(logo, 200, "PNG");

    let request = Request::get(url(logo)).with_destination(Destination::Image);
    let routed = respond(fx.agent.handle(&request).await.unwrap());
    fx.agent.wait_idle().await;

    assert_eq!(routed.source, ResponseSource::Network);
    assert_eq!(routed.response.body_text(), "PNG");
  }

  #[tokio::test]
  async fn test_remote_data_with_unavailable_partition_returns_degraded_json() {
    let (fx, store) = failing_fixture();
    store.fail(StoreOp::OpenPartition);
    fx.fetcher.respond(API, 200, r#"{"success":true}"#);

    let routed = respond(fx.agent.handle(&Request::get(url(API))).await.unwrap());

    assert_eq!(routed.source, ResponseSource::Synthesized);
    assert_eq!(routed.response.status, 200);
    let body: serde_json::Value = serde_json::from_slice(&routed.response.body).unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["cached"], false);
  }

  #[tokio::test]
  async fn test_remote_data_with_failing_get_returns_degraded_json() {
    let (fx, store) = failing_fixture();
    store.fail(StoreOp::Get);
    fx.fetcher.respond(API, 200, r#"{"success":true}"#);

    let routed = respond(fx.agent.handle(&Request::get(url(API))).await.unwrap());

    assert_eq!(routed.source, ResponseSource::Synthesized);
    let body: serde_json::Value = serde_json::from_slice(&routed.response.body).unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["cached"], false);
  }

  #[tokio::test]
  async fn test_remote_data_write_failure_still_returns_live_response() {
    let (fx, store) = failing_fixture();
    store.fail(StoreOp::Put);
    fx.fetcher.respond(API, 200, r#"{"success":true}"#);

    let routed = respond(fx.agent.handle(&Request::get(url(API))).await.unwrap());

    assert_eq!(routed.source, ResponseSource::Network);
    assert_eq!(routed.response.body_text(), r#"{"success":true}"#);
  }

  #[tokio::test]
  async fn test_offline_image_without_placeholder_is_an_error() {
    let fx = fixture();
    let photo = "https://images.test/p/1.jpg";
    fx.fetcher.fail(photo);

    let request = Request::get(url(photo)).with_destination(Destination::Image);
    assert!(fx.agent.handle(&request).await.is_err());
  }
}
