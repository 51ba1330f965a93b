//! Store adapter trait and partition handles.

use async_trait::async_trait;
use color_eyre::Result;
use std::sync::Arc;

use crate::net::Response;

/// Trait for partitioned key/blob store backends.
///
/// All operations may fail when the store is unavailable. Callers decide
/// whether a failure degrades to a cache miss or propagates.
#[async_trait]
pub trait BlobStore: Send + Sync {
  /// Create the partition if it does not exist yet.
  async fn open_partition(&self, name: &str) -> Result<()>;

  /// Names of all partitions, in creation order.
  async fn partition_names(&self) -> Result<Vec<String>>;

  /// Drop a partition and everything in it. Returns whether it existed.
  async fn delete_partition(&self, name: &str) -> Result<bool>;

  async fn get(&self, partition: &str, key: &str) -> Result<Option<Response>>;

  async fn put(&self, partition: &str, key: &str, blob: &Response) -> Result<()>;

  /// Store a batch as one unit: every entry lands or none does.
  async fn put_all(&self, partition: &str, entries: &[(String, Response)]) -> Result<()>;

  /// Returns whether the key existed.
  async fn delete(&self, partition: &str, key: &str) -> Result<bool>;

  /// Keys in the partition, oldest write first.
  async fn keys(&self, partition: &str) -> Result<Vec<String>>;

  /// First hit for `key` across all partitions, in partition creation order.
  async fn match_any(&self, key: &str) -> Result<Option<Response>>;
}

/// Handle to one named partition of a store.
#[derive(Clone)]
pub struct Partition {
  store: Arc<dyn BlobStore>,
  name: String,
}

impl Partition {
  /// Open (creating if needed) the named partition.
  pub async fn open(store: Arc<dyn BlobStore>, name: &str) -> Result<Self> {
    store.open_partition(name).await?;
    Ok(Self {
      store,
      name: name.to_string(),
    })
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub async fn get(&self, key: &str) -> Result<Option<Response>> {
    self.store.get(&self.name, key).await
  }

  pub async fn put(&self, key: &str, blob: &Response) -> Result<()> {
    self.store.put(&self.name, key, blob).await
  }

  pub async fn put_all(&self, entries: &[(String, Response)]) -> Result<()> {
    self.store.put_all(&self.name, entries).await
  }

  pub async fn delete(&self, key: &str) -> Result<bool> {
    self.store.delete(&self.name, key).await
  }

  pub async fn keys(&self) -> Result<Vec<String>> {
    self.store.keys(&self.name).await
  }
}
