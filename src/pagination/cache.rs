//! Pagination session cache.
//!
//! Snapshots are stored as opaque bytes under a session key with a TTL.
//! Readers treat a miss (including an expired entry) as normal control flow.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use super::SortMode;
use crate::config::PaginationConfig;
use crate::{Result, SemaphoreError};

/// Prefix of every snapshot key.
const KEY_PREFIX: &str = "item_scores";

/// TTL key-value store for ranked snapshots.
#[async_trait]
pub trait SessionCache: Send + Sync {
    /// Get the bytes stored under `key`, or `None` on a miss.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `value` under `key` for `ttl`.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()>;
}

struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

/// Default interval between expiry sweeps.
const DEFAULT_SWEEP_PERIOD: Duration = Duration::from_secs(60);

struct Entries {
    map: HashMap<String, Entry>,
    last_sweep: Instant,
}

impl Entries {
    fn purge_expired(&mut self, now: Instant) -> usize {
        let before = self.map.len();
        self.map.retain(|_, e| e.expires_at > now);
        self.last_sweep = now;
        before - self.map.len()
    }
}

/// In-process session cache.
///
/// Holds at most `max_entries` snapshots. Writes sweep expired entries once
/// per sweep period. When full, expired entries are purged first, then the
/// entry closest to expiry is evicted.
pub struct MemoryCache {
    entries: RwLock<Entries>,
    max_entries: usize,
    sweep_period: Duration,
}

impl MemoryCache {
    /// Create a cache holding at most `max_entries` snapshots.
    pub fn new(max_entries: usize) -> Self {
        Self::with_sweep_period(max_entries, DEFAULT_SWEEP_PERIOD)
    }

    /// Create a cache that sweeps expired entries every `sweep_period`.
    pub fn with_sweep_period(max_entries: usize, sweep_period: Duration) -> Self {
        Self {
            entries: RwLock::new(Entries {
                map: HashMap::new(),
                last_sweep: Instant::now(),
            }),
            max_entries: max_entries.max(1),
            sweep_period,
        }
    }

    /// Create a cache sized by the pagination config.
    ///
    /// Sweeps once per session TTL, so no entry outlives two TTLs.
    pub fn from_config(config: &PaginationConfig) -> Self {
        Self::with_sweep_period(config.max_cached_sessions, config.session_ttl())
    }

    /// Number of stored entries, expired or not.
    pub async fn len(&self) -> usize {
        self.entries.read().await.map.len()
    }

    /// Whether the cache is empty.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl SessionCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let entries = self.entries.read().await;
        Ok(entries
            .map
            .get(key)
            .filter(|e| e.expires_at > Instant::now())
            .map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;

        if now.duration_since(entries.last_sweep) >= self.sweep_period {
            let purged = entries.purge_expired(now);
            if purged > 0 {
                debug!(purged, "swept expired sessions");
            }
        }

        if entries.map.len() >= self.max_entries && !entries.map.contains_key(key) {
            entries.purge_expired(now);
            if entries.map.len() >= self.max_entries {
                let oldest = entries
                    .map
                    .iter()
                    .min_by_key(|(_, e)| e.expires_at)
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    entries.map.remove(&oldest);
                }
            }
        }

        entries.map.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: now + ttl,
            },
        );
        Ok(())
    }
}

/// Identity of a ranked snapshot.
///
/// The cache key is `item_scores:{wall_id}:{sort_mode}:{created_ms}:{nonce}`;
/// clients see it base64url-encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionKey {
    key: String,
    wall_id: i64,
}

impl SessionKey {
    /// Mint a fresh key for a wall.
    pub fn generate(wall_id: i64, mode: SortMode, now: DateTime<Utc>) -> Self {
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        let key = format!(
            "{KEY_PREFIX}:{wall_id}:{}:{}:{}",
            mode.as_str(),
            now.timestamp_millis(),
            &nonce[..12]
        );
        Self { key, wall_id }
    }

    /// Decode a client-supplied session id, which must belong to `wall_id`.
    pub fn decode(session_id: &str, wall_id: i64, mode: SortMode) -> Result<Self> {
        let raw = URL_SAFE_NO_PAD
            .decode(session_id)
            .map_err(|_| SemaphoreError::InvalidSession)?;
        let key = String::from_utf8(raw).map_err(|_| SemaphoreError::InvalidSession)?;

        let parts: Vec<&str> = key.split(':').collect();
        let valid = match parts.as_slice() {
            [prefix, wall, sort, created, nonce] => {
                *prefix == KEY_PREFIX
                    && wall.parse::<i64>().ok() == Some(wall_id)
                    && *sort == mode.as_str()
                    && created.parse::<i64>().is_ok()
                    && !nonce.is_empty()
                    && nonce.chars().all(|c| c.is_ascii_hexdigit())
            }
            _ => false,
        };
        if !valid {
            return Err(SemaphoreError::InvalidSession);
        }

        Ok(Self { key, wall_id })
    }

    /// Cache key.
    pub fn as_str(&self) -> &str {
        &self.key
    }

    /// Wall the snapshot belongs to.
    pub fn wall_id(&self) -> i64 {
        self.wall_id
    }

    /// Opaque id handed to clients.
    pub fn encode(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.key.as_bytes())
    }
}
