//! Network fetch seam and its reqwest implementation.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use tokio_util::sync::CancellationToken;

use super::request::Request;
use super::response::Response;

/// Performs network requests on behalf of the agent.
///
/// Resolves with any HTTP status; only network-level failures are errors.
/// The token lets the caller abandon a fetch. Nothing cancels it on a timer.
#[async_trait]
pub trait Fetcher: Send + Sync {
  async fn fetch(&self, request: &Request, cancel: CancellationToken) -> Result<Response>;
}

/// HTTP client backed by reqwest.
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl HttpFetcher {
  pub fn new() -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("offline-cache/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }

  async fn send(&self, request: &Request) -> Result<Response> {
    let method = Method::from_bytes(request.method.as_bytes())
      .map_err(|e| eyre!("Invalid method '{}': {}", request.method, e))?;

    let mut headers = HeaderMap::new();
    for (name, value) in &request.headers {
      // Headers the HTTP stack refuses are dropped rather than failing the fetch
      if let (Ok(name), Ok(value)) = (
        HeaderName::from_bytes(name.as_bytes()),
        HeaderValue::from_str(value),
      ) {
        headers.append(name, value);
      }
    }

    let response = self
      .client
      .request(method, request.url.clone())
      .headers(headers)
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", request.url, e))?;

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(k, v)| Some((k.as_str().to_string(), v.to_str().ok()?.to_string())))
      .collect();
    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", request.url, e))?;

    Ok(Response::new(status, headers, body.to_vec()))
  }
}

#[async_trait]
impl Fetcher for HttpFetcher {
  async fn fetch(&self, request: &Request, cancel: CancellationToken) -> Result<Response> {
    tokio::select! {
      _ = cancel.cancelled() => Err(eyre!("Fetch of {} cancelled", request.url)),
      result = self.send(request) => result,
    }
  }
}
