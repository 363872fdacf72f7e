use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;

use super::{prefix_upper_bound, KvBackend};
use crate::KvError;

#[derive(Default)]
pub struct MemoryBackend {
    map: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }
}

#[async_trait]
impl KvBackend for MemoryBackend {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError> {
        Ok(self.map.read().get(key).cloned())
    }

    async fn put(&self, key: &[u8], value: &[u8]) -> Result<(), KvError> {
        self.map.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &[u8]) -> Result<(), KvError> {
        self.map.write().remove(key);
        Ok(())
    }

    async fn has(&self, key: &[u8]) -> Result<bool, KvError> {
        Ok(self.map.read().contains_key(key))
    }

    async fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KvError> {
        let upper = match prefix_upper_bound(prefix) {
            Some(end) => Bound::Excluded(end),
            None => Bound::Unbounded,
        };
        let guard = self.map.read();
        Ok(guard
            .range::<[u8], _>((Bound::Included(prefix), upper.as_ref().map(|v| v.as_slice())))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scan_returns_only_prefixed_keys_in_order() {
        let kv = MemoryBackend::new();
        kv.put(b"a:2", b"2").await.unwrap();
        kv.put(b"a:1", b"1").await.unwrap();
        kv.put(b"a;", b"x").await.unwrap();
        kv.put(b"b:1", b"y").await.unwrap();

        let got = kv.scan_prefix(b"a:").await.unwrap();
        let keys: Vec<&[u8]> = got.iter().map(|(k, _)| k.as_slice()).collect();
        assert_eq!(keys, vec![b"a:1".as_slice(), b"a:2".as_slice()]);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let kv = MemoryBackend::new();
        kv.put(b"k", b"v").await.unwrap();
        kv.delete(b"k").await.unwrap();
        kv.delete(b"k").await.unwrap();
        assert!(!kv.has(b"k").await.unwrap());
        assert!(kv.is_empty());
    }
}
