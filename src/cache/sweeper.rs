//! Periodic eviction of expired remote-data entries.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::expiry::{data_key, parse_meta};
use super::traits::Partition;

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
  /// Data keys whose entry and metadata were removed
  pub evicted: Vec<String>,
  /// Metadata entries still within their TTL
  pub kept: usize,
  /// Metadata entries that could not be read or parsed
  pub skipped: usize,
}

/// Scans the dynamic partition and evicts expired data/metadata pairs.
///
/// Only entries with metadata are ever evicted. Image and generic entries
/// carry none and are left alone.
#[derive(Clone)]
pub struct Sweeper {
  partition: Partition,
  interval: Duration,
}

impl Sweeper {
  pub fn new(partition: Partition, interval: Duration) -> Self {
    Self {
      partition,
      interval,
    }
  }

  /// Run one sweep as of `now`.
  ///
  /// Per-key failures are logged and counted, never fatal. A missing data
  /// entry is treated as already evicted.
  pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<SweepReport> {
    let mut report = SweepReport::default();

    for key in self.partition.keys().await? {
      let Some(data) = data_key(&key) else {
        continue;
      };

      let blob = match self.partition.get(&key).await {
        Ok(Some(blob)) => blob,
        Ok(None) => {
          // Removed since the key listing
          continue;
        }
        Err(e) => {
          debug!("Skipping unreadable metadata {}: {}", key, e);
          report.skipped += 1;
          continue;
        }
      };

      let meta = match parse_meta(&key, &blob) {
        Ok(meta) => meta,
        Err(e) => {
          debug!("Skipping {}: {}", key, e);
          report.skipped += 1;
          continue;
        }
      };

      if !meta.is_expired(now) {
        report.kept += 1;
        continue;
      }

      if let Err(e) = self.partition.delete(data).await {
        warn!("Failed to evict {}: {}", data, e);
        continue;
      }
      if let Err(e) = self.partition.delete(&key).await {
        warn!("Failed to evict {}: {}", key, e);
        continue;
      }
      report.evicted.push(data.to_string());
    }

    if !report.evicted.is_empty() {
      info!(
        "Swept {} expired entries from {}",
        report.evicted.len(),
        self.partition.name()
      );
    }

    Ok(report)
  }

  /// Run sweeps on the configured interval until `cancel` fires.
  ///
  /// The first sweep happens one full interval after start.
  pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
      let start = tokio::time::Instant::now() + self.interval;
      let mut ticker = tokio::time::interval_at(start, self.interval);

      loop {
        tokio::select! {
          _ = cancel.cancelled() => break,
          _ = ticker.tick() => {
            if let Err(e) = self.sweep_once(Utc::now()).await {
              warn!("Sweep of {} failed: {}", self.partition.name(), e);
            }
          }
        }
      }

      debug!("Sweeper for {} stopped", self.partition.name());
    })
  }
}
