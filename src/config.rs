use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Application origin; relative asset paths resolve against it
  pub origin: String,
  pub partitions: PartitionNames,
  /// Assets stored into the static partition at install, in order
  pub precache: Vec<String>,
  /// Page served to HTML requests when offline
  pub offline_page: String,
  /// Image served when an image cannot be fetched
  pub placeholder_image: String,
  pub remote_data: RemoteDataConfig,
  /// Milliseconds between expiry sweeps of the dynamic partition
  pub sweep_interval_ms: u64,
  /// URL schemes passed through without interception
  pub ignored_schemes: Vec<String>,
  pub notifications: NotificationConfig,
  /// Store file location (defaults to the platform data directory)
  pub database: Option<PathBuf>,
}

/// Names of the current partitions. Changing either one retires the old
/// partition at the next activation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PartitionNames {
  pub static_name: String,
  pub dynamic_name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemoteDataConfig {
  /// Substring that marks a URL as the remote-data endpoint
  pub pattern: String,
  /// Lifetime of a cached remote-data entry
  pub ttl_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
  pub title: String,
  /// Body used when a push carries no payload
  pub default_body: String,
  pub icon: String,
  pub badge: String,
  pub vibrate: Vec<u32>,
  /// Page focused or opened when a notification is clicked
  pub click_url: String,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: "http://localhost:8080/".to_string(),
      partitions: PartitionNames::default(),
      precache: DEFAULT_PRECACHE.iter().map(|s| s.to_string()).collect(),
      offline_page: "/offline.html".to_string(),
      placeholder_image: "/images/placeholder-product.png".to_string(),
      remote_data: RemoteDataConfig::default(),
      sweep_interval_ms: 3_600_000,
      ignored_schemes: vec!["chrome-extension".to_string()],
      notifications: NotificationConfig::default(),
      database: None,
    }
  }
}

impl Default for PartitionNames {
  fn default() -> Self {
    Self {
      static_name: "sokoinn-v2".to_string(),
      dynamic_name: "sokoinn-dynamic-v2".to_string(),
    }
  }
}

impl Default for RemoteDataConfig {
  fn default() -> Self {
    Self {
      pattern: "script.google.com/macros/s/".to_string(),
      ttl_ms: 3_600_000,
    }
  }
}

impl Default for NotificationConfig {
  fn default() -> Self {
    Self {
      title: "SokoInn Marketplace".to_string(),
      default_body: "New update from SokoInn".to_string(),
      icon: "/icons/icon-192x192.png".to_string(),
      badge: "/icons/badge-72x72.png".to_string(),
      vibrate: vec![200, 100, 200],
      click_url: "/index.html".to_string(),
    }
  }
}

/// Upper bound for the TTL and the sweep interval (365 days).
const MAX_DURATION_MS: u64 = 365 * 24 * 60 * 60 * 1000;

const DEFAULT_PRECACHE: &[&str] = &[
  "/",
  "/index.html",
  "/jobs.html",
  "/skills.html",
  "/rentals.html",
  "/offline.html",
  "/manifest.json",
  "/favicon.ico",
  "https://cdnjs.cloudflare.com/ajax/libs/font-awesome/6.4.0/css/all.min.css",
  "/icons/icon-72x72.png",
  "/icons/icon-96x96.png",
  "/icons/icon-128x128.png",
  "/icons/icon-144x144.png",
  "/icons/icon-152x152.png",
  "/icons/icon-192x192.png",
  "/icons/icon-512x512.png",
  "/images/logo.png",
  "/images/placeholder-product.png",
  "/js/app.js",
  "/js/products.js",
  "/js/chatbot.js",
];

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offline-cache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offline-cache/config.yaml
  ///
  /// Falls back to the built-in defaults when no file is found.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };
    config.validate()?;

    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("offline-cache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offline-cache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))
  }

  fn validate(&self) -> Result<()> {
    self.origin()?;
    if self.remote_data.ttl_ms == 0 || self.remote_data.ttl_ms > MAX_DURATION_MS {
      return Err(eyre!(
        "remote_data.ttl_ms must be between 1 and {} (got {})",
        MAX_DURATION_MS,
        self.remote_data.ttl_ms
      ));
    }
    if self.sweep_interval_ms == 0 || self.sweep_interval_ms > MAX_DURATION_MS {
      return Err(eyre!(
        "sweep_interval_ms must be between 1 and {} (got {})",
        MAX_DURATION_MS,
        self.sweep_interval_ms
      ));
    }
    if self.partitions.static_name == self.partitions.dynamic_name {
      return Err(eyre!(
        "Static and dynamic partitions must have different names (both are '{}')",
        self.partitions.static_name
      ));
    }
    Ok(())
  }

  /// Parsed application origin.
  pub fn origin(&self) -> Result<Url> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))
  }

  /// Lifetime of a cached remote-data entry.
  pub fn ttl(&self) -> Result<chrono::Duration> {
    i64::try_from(self.remote_data.ttl_ms)
      .ok()
      .and_then(chrono::Duration::try_milliseconds)
      .ok_or_else(|| eyre!("remote_data.ttl_ms is out of range: {}", self.remote_data.ttl_ms))
  }

  pub fn sweep_interval(&self) -> Duration {
    Duration::from_millis(self.sweep_interval_ms)
  }
}
