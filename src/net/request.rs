//! Intercepted requests and their classification.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use url::Url;

/// What the runtime says the request is for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
  Document,
  Image,
  Script,
  Style,
  Font,
  #[default]
  Other,
}

impl Destination {
  /// Parse the runtime's destination string. Unknown or empty values are `Other`.
  pub fn parse(s: &str) -> Self {
    match s.trim().to_ascii_lowercase().as_str() {
      "document" => Destination::Document,
      "image" => Destination::Image,
      "script" => Destination::Script,
      "style" => Destination::Style,
      "font" => Destination::Font,
      _ => Destination::Other,
    }
  }
}

/// An outgoing request seen by the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  pub method: String,
  pub url: Url,
  pub headers: Vec<(String, String)>,
  pub destination: Destination,
}

impl Request {
  /// A plain GET with no headers.
  pub fn get(url: Url) -> Self {
    Self {
      method: "GET".to_string(),
      url,
      headers: Vec::new(),
      destination: Destination::Other,
    }
  }

  /// Parse an absolute URL, or resolve a relative one against `origin`.
  pub fn resolve(origin: &Url, raw: &str) -> Result<Url> {
    Url::parse(raw)
      .or_else(|_| origin.join(raw))
      .map_err(|e| eyre!("Failed to resolve URL '{}': {}", raw, e))
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  pub fn with_destination(mut self, destination: Destination) -> Self {
    self.destination = destination;
    self
  }

  pub fn with_method(mut self, method: &str) -> Self {
    self.method = method.to_ascii_uppercase();
    self
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  /// Whether the `Accept` header asks for HTML. No header means no.
  pub fn accepts_html(&self) -> bool {
    self
      .header("accept")
      .is_some_and(|accept| accept.contains("text/html"))
  }

  pub fn is_get(&self) -> bool {
    self.method.eq_ignore_ascii_case("GET")
  }

  /// Store key for this request: the absolute URL.
  pub fn cache_key(&self) -> String {
    self.url.as_str().to_string()
  }
}

/// How the router treats a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
  /// Matches the remote-data endpoint pattern
  RemoteData,
  /// Declared destination is an image
  Image,
  /// Everything else
  Generic,
}

impl RequestKind {
  pub fn classify(request: &Request, remote_data_pattern: &str) -> Self {
    if is_remote_data(&request.url, remote_data_pattern) {
      RequestKind::RemoteData
    } else if request.destination == Destination::Image {
      RequestKind::Image
    } else {
      RequestKind::Generic
    }
  }
}

/// Substring match of the endpoint pattern against the full URL.
pub fn is_remote_data(url: &Url, pattern: &str) -> bool {
  !pattern.is_empty() && url.as_str().contains(pattern)
}
