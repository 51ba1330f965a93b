//! Lifecycle and request events from the hosting runtime.
//!
//! Events arrive as JSON lines (`{"id": 7, "event": "fetch", "url": ...}`)
//! and each produces one JSON outcome line carrying the same `id`. Events
//! are handled concurrently, so outcomes may come back out of order.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};
use url::Url;

use crate::agent::{Agent, Interception, ResponseSource};
use crate::config::NotificationConfig;
use crate::net::{Destination, Request, Response};
use crate::notify::{resolve_click, ClickOutcome, Notification, Notifier};

/// An event dispatched by the hosting runtime.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HostEvent {
  Install,
  Activate,
  Fetch {
    url: String,
    #[serde(default = "default_method")]
    method: String,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default)]
    destination: String,
  },
  Sync {
    tag: String,
  },
  Push {
    #[serde(default)]
    payload: Option<String>,
  },
  NotificationClick {
    #[serde(default)]
    action: String,
    /// URLs of the app's currently open windows
    #[serde(default)]
    clients: Vec<String>,
  },
}

fn default_method() -> String {
  "GET".to_string()
}

/// Events produced by the reader task
#[derive(Debug)]
pub enum Event {
  Host(HostEvent),
  /// A line that could not be parsed
  Invalid(String),
}

/// An event together with the correlation id the runtime attached to it.
#[derive(Debug)]
pub struct Envelope {
  pub id: Option<Value>,
  pub event: Event,
}

impl Envelope {
  /// Parse one input line. The `id` is kept even when the event is invalid.
  pub fn parse(line: &str) -> Self {
    let value: Value = match serde_json::from_str(line) {
      Ok(value) => value,
      Err(e) => {
        return Self {
          id: None,
          event: Event::Invalid(format!("Failed to parse event: {}", e)),
        }
      }
    };

    let id = value.get("id").cloned();
    let event = match serde_json::from_value::<HostEvent>(value) {
      Ok(event) => Event::Host(event),
      Err(e) => Event::Invalid(format!("Failed to parse event: {}", e)),
    };
    Self { id, event }
  }
}

/// Result of handling one event, written back to the runtime.
#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum HostOutcome {
  Installed { cached: usize, signal: &'static str },
  InstallFailed { error: String },
  Activated { deleted: Vec<String>, signal: &'static str },
  ActivateFailed { error: String },
  Passthrough { status: Option<u16>, error: Option<String> },
  Response {
    status: u16,
    source: ResponseSource,
    headers: Vec<(String, String)>,
    /// Body text, when the body is valid UTF-8
    #[serde(skip_serializing_if = "Option::is_none")]
    body: Option<String>,
    /// Standard base64 of the body, when it is not valid UTF-8
    #[serde(skip_serializing_if = "Option::is_none")]
    body_base64: Option<String>,
  },
  FetchFailed { error: String },
  Synced { tag: String, handled: bool },
  Notified { notification: Notification },
  NotifyFailed { error: String },
  Clicked { result: ClickOutcome },
  Invalid { error: String },
}

/// One outcome line, tagged with the id of the event it answers.
#[derive(Debug)]
pub struct Reply {
  pub id: Option<Value>,
  pub outcome: HostOutcome,
}

impl Reply {
  /// Encode as a newline-terminated JSON object.
  pub fn to_line(&self) -> Result<Vec<u8>> {
    let mut value = serde_json::to_value(&self.outcome)
      .map_err(|e| eyre!("Failed to serialize outcome: {}", e))?;
    if let (Some(id), Some(fields)) = (&self.id, value.as_object_mut()) {
      fields.insert("id".to_string(), id.clone());
    }

    let mut line =
      serde_json::to_vec(&value).map_err(|e| eyre!("Failed to serialize outcome: {}", e))?;
    line.push(b'\n');
    Ok(line)
  }
}

/// Background sync tags the agent knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTag {
  Products,
  Messages,
}

impl SyncTag {
  pub fn parse(tag: &str) -> Option<Self> {
    match tag {
      "sync-products" => Some(SyncTag::Products),
      "sync-messages" => Some(SyncTag::Messages),
      _ => None,
    }
  }
}

/// Pending product uploads would be pushed here.
async fn sync_products() -> Result<()> {
  info!("Syncing products");
  Ok(())
}

/// Pending chat messages would be pushed here.
async fn sync_messages() -> Result<()> {
  info!("Syncing messages");
  Ok(())
}

/// Reads host events from a line-oriented input on a background task.
pub struct EventSource {
  rx: mpsc::UnboundedReceiver<Envelope>,
}

impl EventSource {
  /// Spawn a reader over `input`. The source ends when the input does.
  pub fn spawn<R>(input: R) -> Self
  where
    R: AsyncBufRead + Unpin + Send + 'static,
  {
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
      let mut lines = input.lines();
      loop {
        match lines.next_line().await {
          Ok(Some(line)) => {
            if line.trim().is_empty() {
              continue;
            }
            if tx.send(Envelope::parse(&line)).is_err() {
              break;
            }
          }
          Ok(None) => break,
          Err(e) => {
            let _ = tx.send(Envelope {
              id: None,
              event: Event::Invalid(format!("Failed to read event: {}", e)),
            });
            break;
          }
        }
      }
    });

    Self { rx }
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<Envelope> {
    self.rx.recv().await
  }
}

/// Routes host events to the agent and the notification subsystem.
pub struct Dispatcher {
  agent: Agent,
  notifier: Arc<dyn Notifier>,
  notifications: NotificationConfig,
  origin: Url,
}

impl Dispatcher {
  pub fn new(
    agent: Agent,
    notifier: Arc<dyn Notifier>,
    notifications: NotificationConfig,
    origin: Url,
  ) -> Self {
    Self {
      agent,
      notifier,
      notifications,
      origin,
    }
  }

  pub async fn dispatch(&self, event: Event) -> HostOutcome {
    match event {
      Event::Host(event) => self.dispatch_host(event).await,
      Event::Invalid(error) => HostOutcome::Invalid { error },
    }
  }

  async fn dispatch_host(&self, event: HostEvent) -> HostOutcome {
    match event {
      HostEvent::Install => match self.agent.lifecycle().install().await {
        Ok(installed) => HostOutcome::Installed {
          cached: installed.cached,
          signal: "skip_waiting",
        },
        Err(e) => {
          error!("Cache installation failed: {}", e);
          HostOutcome::InstallFailed {
            error: e.to_string(),
          }
        }
      },
      HostEvent::Activate => match self.agent.lifecycle().activate().await {
        Ok(activated) => HostOutcome::Activated {
          deleted: activated.deleted,
          signal: "claim_clients",
        },
        Err(e) => {
          error!("Activation failed: {}", e);
          HostOutcome::ActivateFailed {
            error: e.to_string(),
          }
        }
      },
      HostEvent::Fetch {
        url,
        method,
        headers,
        destination,
      } => self.fetch(&url, &method, headers, &destination).await,
      HostEvent::Sync { tag } => self.sync(tag).await,
      HostEvent::Push { payload } => self.push(payload.as_deref()),
      HostEvent::NotificationClick { action, clients } => {
        info!("Notification click: {}", action);
        HostOutcome::Clicked {
          result: resolve_click(
            &action,
            &clients,
            &self.notifications.click_url,
            &self.origin,
          ),
        }
      }
    }
  }

  async fn fetch(
    &self,
    url: &str,
    method: &str,
    headers: BTreeMap<String, String>,
    destination: &str,
  ) -> HostOutcome {
    let url = match Request::resolve(&self.origin, url) {
      Ok(url) => url,
      Err(e) => {
        return HostOutcome::Invalid {
          error: e.to_string(),
        }
      }
    };

    let mut request = Request::get(url)
      .with_method(method)
      .with_destination(Destination::parse(destination));
    request.headers = headers.into_iter().collect();

    match self.agent.handle(&request).await {
      Ok(Interception::Respond(routed)) => response_outcome(routed.response, routed.source),
      Ok(Interception::Passthrough) => {
        debug!("Passing through {} {}", request.method, request.url);
        match self.agent.fetch(&request).await {
          Ok(response) => HostOutcome::Passthrough {
            status: Some(response.status),
            error: None,
          },
          Err(e) => HostOutcome::Passthrough {
            status: None,
            error: Some(e.to_string()),
          },
        }
      }
      Err(e) => HostOutcome::FetchFailed {
        error: e.to_string(),
      },
    }
  }

  async fn sync(&self, tag: String) -> HostOutcome {
    info!("Background sync: {}", tag);

    let result = match SyncTag::parse(&tag) {
      Some(SyncTag::Products) => sync_products().await,
      Some(SyncTag::Messages) => sync_messages().await,
      None => {
        debug!("Ignoring unknown sync tag {}", tag);
        return HostOutcome::Synced {
          tag,
          handled: false,
        };
      }
    };

    if let Err(e) = result {
      error!("Sync {} failed: {}", tag, e);
    }
    HostOutcome::Synced { tag, handled: true }
  }

  fn push(&self, payload: Option<&str>) -> HostOutcome {
    info!("Push received");
    let notification = Notification::from_push(&self.notifications, payload, Utc::now());

    match self.notifier.show(&notification) {
      Ok(()) => HostOutcome::Notified { notification },
      Err(e) => HostOutcome::NotifyFailed {
        error: e.to_string(),
      },
    }
  }
}

fn response_outcome(response: Response, source: ResponseSource) -> HostOutcome {
  let Response {
    status,
    headers,
    body,
  } = response;

  let (body, body_base64) = match String::from_utf8(body) {
    Ok(text) => (Some(text), None),
    Err(e) => (None, Some(BASE64.encode(e.into_bytes()))),
  };
  HostOutcome::Response {
    status,
    source,
    headers,
    body,
    body_base64,
  }
}

/// Handle events until `events` ends, writing one reply line per event.
///
/// Every event runs on its own task, so a fetch that never completes holds
/// up only its own reply. Replies go through a channel to a single writer.
/// Returns after the input has ended and every in-flight event has been
/// answered.
pub async fn serve<W>(dispatcher: Arc<Dispatcher>, mut events: EventSource, out: W) -> Result<()>
where
  W: AsyncWrite + Unpin + Send + 'static,
{
  let (tx, rx) = mpsc::unbounded_channel();
  let writer = tokio::spawn(write_replies(rx, out));
  let in_flight = TaskTracker::new();

  while let Some(Envelope { id, event }) = events.next().await {
    let dispatcher = dispatcher.clone();
    let tx = tx.clone();
    in_flight.spawn(async move {
      let outcome = dispatcher.dispatch(event).await;
      // Writer gone means the output closed
      let _ = tx.send(Reply { id, outcome });
    });
  }

  debug!("Input closed, waiting for {} in-flight events", in_flight.len());
  in_flight.close();
  in_flight.wait().await;
  drop(tx);

  writer
    .await
    .map_err(|e| eyre!("Reply writer failed: {}", e))?
}

async fn write_replies<W>(mut rx: mpsc::UnboundedReceiver<Reply>, mut out: W) -> Result<()>
where
  W: AsyncWrite + Unpin,
{
  while let Some(reply) = rx.recv().await {
    out
      .write_all(&reply.to_line()?)
      .await
      .map_err(|e| eyre!("Failed to write outcome: {}", e))?;
    out
      .flush()
      .await
      .map_err(|e| eyre!("Failed to write outcome: {}", e))?;
  }
  Ok(())
}
