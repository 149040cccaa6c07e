//! Time-bounded memo of identity lookups against a backing system.

use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

/// Inserts between opportunistic sweeps of expired entries.
const SWEEP_EVERY_INSERTS: u64 = 256;

/// Definitive outcome of an identity lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution<V> {
    Found(V),
    NotFound,
}

impl<V> Resolution<V> {
    pub fn is_found(&self) -> bool {
        matches!(self, Resolution::Found(_))
    }

    pub fn found(self) -> Option<V> {
        match self {
            Resolution::Found(v) => Some(v),
            Resolution::NotFound => None,
        }
    }
}

struct CacheEntry<V> {
    resolution: Resolution<V>,
    stored_at: Instant,
}

/// Caches lookup outcomes, including negative ones, for a fixed TTL.
///
/// Only definitive outcomes are stored: a lookup that fails is retried by the
/// next caller. A TTL of zero disables the cache.
pub struct ValidationCache<V> {
    name: String,
    ttl: Duration,
    enabled: AtomicBool,
    entries: DashMap<String, CacheEntry<V>>,
    inserts: AtomicU64,
}

impl<V> ValidationCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, ttl: Duration) -> Self {
        Self {
            name: name.into(),
            ttl,
            enabled: AtomicBool::new(!ttl.is_zero()),
            entries: DashMap::new(),
            inserts: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Stop caching; every subsequent resolve calls through.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Relaxed);
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn is_live(&self, entry: &CacheEntry<V>, now: Instant) -> bool {
        now.duration_since(entry.stored_at) < self.ttl
    }

    /// Return the cached outcome for `identity` if it is still live.
    pub fn get(&self, identity: &str) -> Option<Resolution<V>> {
        if !self.is_enabled() {
            return None;
        }

        let now = Instant::now();
        let expired = match self.entries.get(identity) {
            Some(entry) if self.is_live(&entry, now) => return Some(entry.resolution.clone()),
            Some(_) => true,
            None => false,
        };

        if expired {
            self.entries
                .remove_if(identity, |_, entry| !self.is_live(entry, now));
        }
        None
    }

    pub fn insert(&self, identity: &str, resolution: Resolution<V>) {
        if !self.is_enabled() {
            return;
        }

        self.entries.insert(
            identity.to_string(),
            CacheEntry {
                resolution,
                stored_at: Instant::now(),
            },
        );

        if self.inserts.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY_INSERTS == SWEEP_EVERY_INSERTS - 1 {
            self.purge_expired();
        }
    }

    /// Remove every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| self.is_live(entry, now));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!(cache = %self.name, removed, "Purged expired cache entries");
        }
        removed
    }

    /// Resolve `identity`, calling `lookup` only when no live entry exists.
    pub async fn resolve<F, Fut, E>(&self, identity: &str, lookup: F) -> Result<Resolution<V>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Resolution<V>, E>>,
    {
        if let Some(hit) = self.get(identity) {
            metrics::counter!("validation_cache_hits_total", "cache" => self.name.clone()).increment(1);
            return Ok(hit);
        }

        metrics::counter!("validation_cache_misses_total", "cache" => self.name.clone()).increment(1);
        let resolution = lookup().await?;
        self.insert(identity, resolution.clone());
        Ok(resolution)
    }

    /// Periodically purge expired entries in the background. The task ends
    /// once the cache is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let cache: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else {
                    break;
                };
                cache.purge_expired();
            }
        })
    }
}
