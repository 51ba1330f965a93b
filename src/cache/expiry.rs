//! Expiry metadata for remote-data entries in the dynamic partition.
//!
//! Each tracked entry `K` has a sibling `K.meta` holding
//! `{"cachedAt": <ms>, "expiresAt": <ms>}` (epoch milliseconds). The pair is
//! written together and removed together.

use chrono::{DateTime, Duration, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};

use super::traits::Partition;
use crate::net::Response;

/// Reserved key suffix for metadata entries.
pub const META_SUFFIX: &str = ".meta";

/// Creation and expiry times of a cached entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryMeta {
  #[serde(with = "chrono::serde::ts_milliseconds")]
  pub cached_at: DateTime<Utc>,
  #[serde(with = "chrono::serde::ts_milliseconds")]
  pub expires_at: DateTime<Utc>,
}

impl EntryMeta {
  /// Stale strictly after `expires_at`; at exactly `expires_at` still fresh.
  pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
    now > self.expires_at
  }
}

/// Metadata key for a data key.
pub fn meta_key(key: &str) -> String {
  format!("{}{}", key, META_SUFFIX)
}

/// Data key for a metadata key, or `None` if `key` is not a metadata key.
pub fn data_key(key: &str) -> Option<&str> {
  key.strip_suffix(META_SUFFIX)
}

/// Writes and reads expiry metadata with a fixed TTL.
#[derive(Debug, Clone, Copy)]
pub struct ExpiryTracker {
  ttl: Duration,
}

impl ExpiryTracker {
  pub fn new(ttl: Duration) -> Self {
    Self { ttl }
  }

  /// Metadata for an entry written at `now`.
  pub fn stamp(&self, now: DateTime<Utc>) -> Result<EntryMeta> {
    let expires_at = now
      .checked_add_signed(self.ttl)
      .ok_or_else(|| eyre!("Failed to compute expiry: {} + {} is out of range", now, self.ttl))?;
    Ok(EntryMeta {
      cached_at: now,
      expires_at,
    })
  }

  /// Record that `key` was (re)written at `now`.
  pub async fn record(
    &self,
    partition: &Partition,
    key: &str,
    now: DateTime<Utc>,
  ) -> Result<EntryMeta> {
    let meta = self.stamp(now)?;
    let body = serde_json::to_vec(&meta)
      .map_err(|e| eyre!("Failed to serialize metadata for {}: {}", key, e))?;
    let blob = Response::new(
      200,
      vec![("content-type".to_string(), "application/json".to_string())],
      body,
    );
    partition.put(&meta_key(key), &blob).await?;
    Ok(meta)
  }

  /// Read the metadata for `key`. `Ok(None)` when there is none; an error
  /// when the store fails or the stored value does not parse.
  pub async fn read(&self, partition: &Partition, key: &str) -> Result<Option<EntryMeta>> {
    let meta_key = meta_key(key);
    match partition.get(&meta_key).await? {
      Some(blob) => parse_meta(&meta_key, &blob).map(Some),
      None => Ok(None),
    }
  }
}

pub(crate) fn parse_meta(meta_key: &str, blob: &Response) -> Result<EntryMeta> {
  serde_json::from_slice(&blob.body)
    .map_err(|e| eyre!("Failed to parse metadata {}: {}", meta_key, e))
}
