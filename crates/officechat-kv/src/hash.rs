use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::time::now_secs;
use crate::{KvBackend, KvError};

/// Sentinel hash mapping any key to its unix expiry (seconds, decimal string).
pub const EXPIRE_MAIN_KEY: &str = "custom_tool:expires";

/// Something that can purge keys whose recorded expiry has passed.
#[async_trait]
pub trait ExpirySweeper: Send + Sync {
    /// Returns the number of keys removed.
    async fn delete_expire_keys(&self) -> Result<usize, KvError>;
}

/// Hash-map and TTL emulation over a plain byte-string store.
///
/// Each hash lives under its main key as one JSON object of string fields.
/// Every field write decodes, mutates and re-encodes the whole record.
/// Writes from this instance are serialized so concurrent read-modify-write
/// cycles (most importantly on the sentinel hash) cannot drop each other's
/// fields.
pub struct HashKv {
    backend: Arc<dyn KvBackend>,
    write_lock: Mutex<()>,
}

impl HashKv {
    pub fn new(backend: Arc<dyn KvBackend>) -> Self {
        info!("HashKv initialized on {} backend", backend.name());
        Self {
            backend,
            write_lock: Mutex::new(()),
        }
    }

    async fn load_record(&self, main_key: &str) -> Result<HashMap<String, String>, KvError> {
        match self.backend.get(main_key.as_bytes()).await? {
            Some(raw) => serde_json::from_slice(&raw).map_err(|source| KvError::Corrupt {
                key: main_key.to_string(),
                source,
            }),
            None => Ok(HashMap::new()),
        }
    }

    async fn store_record(
        &self,
        main_key: &str,
        record: &HashMap<String, String>,
    ) -> Result<(), KvError> {
        let raw = serde_json::to_vec(record).map_err(KvError::Encode)?;
        self.backend.put(main_key.as_bytes(), &raw).await
    }

    /// `HSET main_key field value`.
    pub async fn hset(&self, main_key: &str, field: &str, value: &str) -> Result<(), KvError> {
        let _guard = self.write_lock.lock().await;
        let mut record = self.load_record(main_key).await?;
        record.insert(field.to_string(), value.to_string());
        self.store_record(main_key, &record).await
    }

    /// Sets several fields with a single record rewrite.
    pub async fn hset_many<I, F, V>(&self, main_key: &str, fields: I) -> Result<(), KvError>
    where
        I: IntoIterator<Item = (F, V)>,
        F: Into<String>,
        V: Into<String>,
    {
        let _guard = self.write_lock.lock().await;
        let mut record = self.load_record(main_key).await?;
        for (field, value) in fields {
            record.insert(field.into(), value.into());
        }
        self.store_record(main_key, &record).await
    }

    /// `HGETALL main_key`. A missing key yields an empty map.
    pub async fn hget_all(&self, main_key: &str) -> Result<HashMap<String, String>, KvError> {
        self.load_record(main_key).await
    }

    pub async fn hget(&self, main_key: &str, field: &str) -> Result<Option<String>, KvError> {
        Ok(self.load_record(main_key).await?.remove(field))
    }

    /// Removes one field. The record is dropped entirely once empty.
    pub async fn hdel(&self, main_key: &str, field: &str) -> Result<bool, KvError> {
        let _guard = self.write_lock.lock().await;
        let mut record = self.load_record(main_key).await?;
        if record.remove(field).is_none() {
            return Ok(false);
        }
        if record.is_empty() {
            self.backend.delete(main_key.as_bytes()).await?;
        } else {
            self.store_record(main_key, &record).await?;
        }
        Ok(true)
    }

    /// Records `key` for deletion `ttl` from now. Nothing is removed here;
    /// the reaper does that on a later sweep.
    pub async fn expire(&self, key: &str, ttl: Duration) -> Result<(), KvError> {
        let deadline = now_secs().saturating_add(ttl.as_secs() as i64);
        self.expire_at(key, deadline).await
    }

    pub async fn expire_at(&self, key: &str, deadline_secs: i64) -> Result<(), KvError> {
        self.hset(EXPIRE_MAIN_KEY, key, &deadline_secs.to_string())
            .await
    }

    /// Recorded expiry of `key`, if any.
    pub async fn expiry_of(&self, key: &str) -> Result<Option<i64>, KvError> {
        Ok(self
            .hget(EXPIRE_MAIN_KEY, key)
            .await?
            .and_then(|v| v.parse().ok()))
    }

    pub async fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        self.backend.get(key.as_bytes()).await
    }

    pub async fn put_raw(&self, key: &str, value: &[u8]) -> Result<(), KvError> {
        let _guard = self.write_lock.lock().await;
        self.backend.put(key.as_bytes(), value).await
    }

    pub async fn delete(&self, key: &str) -> Result<(), KvError> {
        let _guard = self.write_lock.lock().await;
        self.backend.delete(key.as_bytes()).await
    }

    pub async fn exists(&self, key: &str) -> Result<bool, KvError> {
        self.backend.has(key.as_bytes()).await
    }

    /// Keys and raw values under `prefix`, ascending. Keys that are not valid
    /// UTF-8 are skipped.
    pub async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, KvError> {
        let rows = self.backend.scan_prefix(prefix.as_bytes()).await?;
        Ok(rows
            .into_iter()
            .filter_map(|(k, v)| String::from_utf8(k).ok().map(|k| (k, v)))
            .collect())
    }

    pub async fn delete_expired(&self) -> Result<usize, KvError> {
        self.delete_expired_at(now_secs()).await
    }

    /// One sweep against an explicit clock: every sentinel entry whose expiry
    /// is before `now_secs` has its target key deleted and its entry dropped.
    /// The sentinel hash is rewritten once at the end.
    pub async fn delete_expired_at(&self, now_secs: i64) -> Result<usize, KvError> {
        let _guard = self.write_lock.lock().await;
        let mut record = self.load_record(EXPIRE_MAIN_KEY).await?;
        if record.is_empty() {
            return Ok(0);
        }

        let mut due = Vec::new();
        for (key, value) in &record {
            match value.parse::<i64>() {
                Ok(deadline) if deadline < now_secs => due.push(key.clone()),
                Ok(_) => {}
                Err(_) => {
                    warn!("Dropping malformed expiry {:?} for key {}", value, key);
                    due.push(key.clone());
                }
            }
        }
        if due.is_empty() {
            return Ok(0);
        }

        for key in &due {
            self.backend.delete(key.as_bytes()).await?;
            record.remove(key);
            debug!("Expired key {}", key);
        }

        if record.is_empty() {
            self.backend.delete(EXPIRE_MAIN_KEY.as_bytes()).await?;
        } else {
            self.store_record(EXPIRE_MAIN_KEY, &record).await?;
        }
        Ok(due.len())
    }
}

#[async_trait]
impl ExpirySweeper for HashKv {
    async fn delete_expire_keys(&self) -> Result<usize, KvError> {
        self.delete_expired().await
    }
}
