use async_trait::async_trait;

use crate::KvError;

mod memory;
mod sqlite;

pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

/// Ordered byte-string key-value store.
#[async_trait]
pub trait KvBackend: Send + Sync {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError>;

    async fn put(&self, key: &[u8], value: &[u8]) -> Result<(), KvError>;

    /// Removing an absent key is not an error.
    async fn delete(&self, key: &[u8]) -> Result<(), KvError>;

    async fn has(&self, key: &[u8]) -> Result<bool, KvError> {
        Ok(self.get(key).await?.is_some())
    }

    /// All entries whose key starts with `prefix`, in ascending key order.
    async fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KvError>;

    fn name(&self) -> &'static str;
}

/// Smallest key strictly greater than every key carrying `prefix`.
/// `None` means the range is unbounded above (empty or all-0xFF prefix).
pub(crate) fn prefix_upper_bound(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}
