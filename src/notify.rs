//! Push notifications and notification clicks.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use serde::Serialize;
use tracing::info;
use url::Url;

use crate::config::NotificationConfig;

/// A notification ready to hand to the display subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub vibrate: Vec<u32>,
  pub data: NotificationData,
  pub actions: Vec<NotificationAction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationData {
  #[serde(with = "chrono::serde::ts_milliseconds")]
  pub date_of_arrival: DateTime<Utc>,
  pub primary_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationAction {
  pub action: String,
  pub title: String,
}

/// Action id that dismisses a notification without opening anything.
pub const CLOSE_ACTION: &str = "close";

impl Notification {
  /// Build the notification for a push, falling back to the default body
  /// when the push carries no payload.
  pub fn from_push(config: &NotificationConfig, payload: Option<&str>, now: DateTime<Utc>) -> Self {
    Self {
      title: config.title.clone(),
      body: payload.unwrap_or(config.default_body.as_str()).to_string(),
      icon: config.icon.clone(),
      badge: config.badge.clone(),
      vibrate: config.vibrate.clone(),
      data: NotificationData {
        date_of_arrival: now,
        primary_key: "1".to_string(),
      },
      actions: vec![
        NotificationAction {
          action: "explore".to_string(),
          title: "Browse Products".to_string(),
        },
        NotificationAction {
          action: CLOSE_ACTION.to_string(),
          title: "Close".to_string(),
        },
      ],
    }
  }
}

/// Display subsystem seam.
pub trait Notifier: Send + Sync {
  fn show(&self, notification: &Notification) -> Result<()>;
}

/// Notifier that only logs what it would display.
pub struct LogNotifier;

impl Notifier for LogNotifier {
  fn show(&self, notification: &Notification) -> Result<()> {
    info!(
      "Notification: {} - {}",
      notification.title, notification.body
    );
    Ok(())
  }
}

/// What a notification click should do to the app's windows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClickOutcome {
  /// Close action: nothing to open
  Dismissed,
  /// Focus an already-open client
  Focus { url: String },
  /// Open a new client
  Open { url: String },
}

/// Decide the effect of clicking a notification.
///
/// Any action other than close focuses the first open client whose URL
/// contains `click_path`, or opens `click_path` resolved against `origin`.
pub fn resolve_click(
  action: &str,
  open_clients: &[String],
  click_path: &str,
  origin: &Url,
) -> ClickOutcome {
  if action == CLOSE_ACTION {
    return ClickOutcome::Dismissed;
  }

  if let Some(client) = open_clients.iter().find(|c| c.contains(click_path)) {
    return ClickOutcome::Focus {
      url: client.clone(),
    };
  }

  let url = origin
    .join(click_path)
    .map(|u| u.to_string())
    .unwrap_or_else(|_| click_path.to_string());
  ClickOutcome::Open { url }
}
