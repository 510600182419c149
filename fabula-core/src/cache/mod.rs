//! Content-addressed cache for synthesized narration audio.
//!
//! ## Record layout
//!
//! One logical entry is two records in the underlying [`ByteStore`]:
//!
//! | Record | Contents |
//! |--------|----------|
//! | `<key>.wav`  | raw audio bytes exactly as the generator produced them |
//! | `<key>.meta` | serde_json sidecar: duration + created/accessed/expires |
//!
//! The blob is written before the sidecar, so an interrupted `store` never
//! leaves a visible partial entry — an entry exists only once its metadata
//! does. Expired entries read as misses but stay physically present until
//! explicitly deleted.

pub mod key;
pub mod store;

pub use key::{compute_key, CacheKey};
pub use store::{ByteStore, FsStore, MemoryStore};

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{FabulaError, Result};

/// Tunables for [`RawAudioCache`].
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Entry lifetime. Reads past `created_at + ttl` report a miss.
    /// Default: 7 days.
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::days(7),
        }
    }
}

/// A cached synthesis result.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub cache_key: CacheKey,
    pub audio_bytes: Vec<u8>,
    pub duration_seconds: f64,
    pub created_at: DateTime<Utc>,
    pub accessed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Metadata sidecar persisted next to the audio blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntryMeta {
    duration_seconds: f64,
    created_at: DateTime<Utc>,
    accessed_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

/// Content-addressed store for raw synthesized speech.
///
/// Avoids redundant TTS calls: callers derive a [`CacheKey`] from the
/// synthesis inputs and only invoke the generator on a miss. The cache
/// makes no retry decisions — storage failures surface unchanged.
pub struct RawAudioCache {
    store: Arc<dyn ByteStore>,
    config: CacheConfig,
}

impl RawAudioCache {
    pub fn new(store: Arc<dyn ByteStore>, config: CacheConfig) -> Self {
        Self { store, config }
    }

    /// Cache with the default 7-day TTL.
    pub fn with_defaults(store: Arc<dyn ByteStore>) -> Self {
        Self::new(store, CacheConfig::default())
    }

    /// Look up an entry. Misses on absent *or expired* keys; a hit bumps
    /// `accessed_at` in the persisted sidecar.
    pub async fn lookup(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let store = Arc::clone(&self.store);
        let key = key.clone();
        run_store(move || lookup_blocking(store.as_ref(), &key)).await
    }

    /// Insert (or overwrite) an entry. `created_at = accessed_at = now`,
    /// `expires_at = now + ttl`.
    pub async fn store(
        &self,
        key: &CacheKey,
        audio_bytes: Vec<u8>,
        duration_seconds: f64,
    ) -> Result<CacheEntry> {
        if self.config.ttl <= Duration::zero() {
            return Err(FabulaError::Validation(
                "cache ttl must be positive".into(),
            ));
        }
        let store = Arc::clone(&self.store);
        let key = key.clone();
        let ttl = self.config.ttl;
        run_store(move || store_blocking(store.as_ref(), key, audio_bytes, duration_seconds, ttl))
            .await
    }

    /// Remove one entry. Succeeds when the key is already absent.
    pub async fn delete(&self, key: &CacheKey) -> Result<()> {
        let store = Arc::clone(&self.store);
        let key = key.clone();
        run_store(move || {
            store.delete(&audio_record(&key))?;
            store.delete(&meta_record(&key))?;
            debug!(key = %key, "cache entry deleted");
            Ok(())
        })
        .await
    }

    /// Remove every record, including any that no longer form a full entry.
    pub async fn clear(&self) -> Result<()> {
        let store = Arc::clone(&self.store);
        run_store(move || {
            let keys = store.list()?;
            let count = keys.len();
            for record in keys {
                store.delete(&record)?;
            }
            info!(records = count, "cache cleared");
            Ok(())
        })
        .await
    }
}

async fn run_store<T, F>(op: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|e| FabulaError::Storage(format!("storage task failed: {e}")))?
}

fn audio_record(key: &CacheKey) -> String {
    format!("{key}.wav")
}

fn meta_record(key: &CacheKey) -> String {
    format!("{key}.meta")
}

fn lookup_blocking(store: &dyn ByteStore, key: &CacheKey) -> Result<Option<CacheEntry>> {
    let Some(meta_bytes) = store.read(&meta_record(key))? else {
        debug!(key = %key, "cache miss");
        return Ok(None);
    };
    let mut meta: EntryMeta = serde_json::from_slice(&meta_bytes)
        .map_err(|e| FabulaError::Storage(format!("corrupt metadata for {key}: {e}")))?;

    let now = Utc::now();
    if now > meta.expires_at {
        debug!(key = %key, expired_at = %meta.expires_at, "cache entry expired");
        return Ok(None);
    }

    let Some(audio_bytes) = store.read(&audio_record(key))? else {
        warn!(key = %key, "metadata present but audio blob missing — treating as miss");
        return Ok(None);
    };

    meta.accessed_at = now;
    let meta_bytes = serde_json::to_vec(&meta)
        .map_err(|e| FabulaError::Storage(format!("encode metadata for {key}: {e}")))?;
    store.write(&meta_record(key), &meta_bytes)?;

    debug!(key = %key, bytes = audio_bytes.len(), "cache hit");
    Ok(Some(CacheEntry {
        cache_key: key.clone(),
        audio_bytes,
        duration_seconds: meta.duration_seconds,
        created_at: meta.created_at,
        accessed_at: meta.accessed_at,
        expires_at: meta.expires_at,
    }))
}

fn store_blocking(
    store: &dyn ByteStore,
    key: CacheKey,
    audio_bytes: Vec<u8>,
    duration_seconds: f64,
    ttl: Duration,
) -> Result<CacheEntry> {
    let now = Utc::now();
    let meta = EntryMeta {
        duration_seconds,
        created_at: now,
        accessed_at: now,
        expires_at: now + ttl,
    };

    // Blob first, sidecar second: the entry becomes visible only once both
    // records exist.
    store.write(&audio_record(&key), &audio_bytes)?;
    let meta_bytes = serde_json::to_vec(&meta)
        .map_err(|e| FabulaError::Storage(format!("encode metadata for {key}: {e}")))?;
    store.write(&meta_record(&key), &meta_bytes)?;

    debug!(
        key = %key,
        bytes = audio_bytes.len(),
        duration_seconds,
        expires_at = %meta.expires_at,
        "cache entry stored"
    );

    Ok(CacheEntry {
        cache_key: key,
        audio_bytes,
        duration_seconds,
        created_at: meta.created_at,
        accessed_at: meta.accessed_at,
        expires_at: meta.expires_at,
    })
}
