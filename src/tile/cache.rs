//! Memoizing caches for rendered tiles and pyramid descriptors.
//!
//! Both caches are an LRU with a weight budget in front of a
//! [`SingleFlight`]. For tiles the weight is the encoded size in bytes, so the
//! budget bounds memory; for descriptors every entry weighs one and the budget
//! is an entry count.
//!
//! Values are handed out as cheap clones (`Bytes`, `Arc`), so eviction only
//! drops the cache's own reference and never disturbs a response in flight.

use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use lru::LruCache;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::deepzoom::{PyramidDescriptor, TileFormat};
use crate::error::TileError;

use super::singleflight::SingleFlight;

/// Default tile cache budget: 256MB
pub const DEFAULT_TILE_CACHE_CAPACITY: usize = 256 * 1024 * 1024;

/// Default number of cached descriptors
pub const DEFAULT_DESCRIPTOR_CACHE_CAPACITY: usize = 1024;

/// Identifies one rendered tile.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileKey {
    pub slide_id: Arc<str>,
    /// Deep Zoom level (0 = single pixel)
    pub level: u32,
    pub x: u32,
    pub y: u32,
    pub format: TileFormat,
}

impl TileKey {
    pub fn new(
        slide_id: impl Into<Arc<str>>,
        level: u32,
        x: u32,
        y: u32,
        format: TileFormat,
    ) -> Self {
        Self {
            slide_id: slide_id.into(),
            level,
            x,
            y,
            format,
        }
    }
}

/// How much of the budget a cached value uses.
pub trait Weigh {
    fn weight(&self) -> usize;
}

impl Weigh for Bytes {
    fn weight(&self) -> usize {
        self.len()
    }
}

impl Weigh for Arc<PyramidDescriptor> {
    fn weight(&self) -> usize {
        1
    }
}

/// A cached or freshly computed value.
#[derive(Debug, Clone)]
pub struct Cached<V> {
    pub value: V,
    pub hit: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    /// Weight currently held (bytes for tiles, entries for descriptors)
    pub size: usize,
    pub capacity: usize,
}

struct Store<K: Hash + Eq, V> {
    lru: LruCache<K, V>,
    size: usize,
    capacity: usize,
}

impl<K: Hash + Eq, V: Weigh> Store<K, V> {
    /// Insert, evicting least recently used entries until `value` fits.
    /// A value heavier than the whole budget is not stored.
    fn insert(&mut self, key: K, value: V) -> bool {
        let weight = value.weight();
        if weight > self.capacity {
            return false;
        }

        if let Some(old) = self.lru.pop(&key) {
            self.size = self.size.saturating_sub(old.weight());
        }
        while self.size + weight > self.capacity {
            match self.lru.pop_lru() {
                Some((_, evicted)) => self.size = self.size.saturating_sub(evicted.weight()),
                None => break,
            }
        }

        self.lru.put(key, value);
        self.size += weight;
        true
    }
}

/// LRU cache with a weight budget and single-flight fill.
pub struct MemoCache<K: Hash + Eq, V> {
    store: Arc<RwLock<Store<K, V>>>,
    flights: SingleFlight<K, Result<V, TileError>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Encoded tiles, budgeted in bytes.
pub type TileCache = MemoCache<TileKey, Bytes>;

/// Pyramid descriptors by slide id, budgeted in entries.
pub type DescriptorCache = MemoCache<Arc<str>, Arc<PyramidDescriptor>>;

impl<K, V> MemoCache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Weigh + Clone + Send + Sync + 'static,
{
    /// Cache holding at most `capacity` worth of weight.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            store: Arc::new(RwLock::new(Store {
                lru: LruCache::unbounded(),
                size: 0,
                capacity,
            })),
            flights: SingleFlight::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// The cached value for `key`, or the result of `compute`.
    ///
    /// Concurrent misses on one key share a single run of `compute`, which
    /// executes as a detached task and stores its value before anyone is
    /// woken. If every caller stops waiting, the task still finishes and fills
    /// the cache. Errors reach every waiter and are not stored.
    pub async fn get_or_compute<F, Fut>(&self, key: K, compute: F) -> Result<Cached<V>, TileError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, TileError>> + Send + 'static,
    {
        if let Some(value) = self.get(&key).await {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Cached { value, hit: true });
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let store = Arc::clone(&self.store);
        let fill_key = key.clone();
        let flight = self
            .flights
            .run(key, move || {
                let fut = compute();
                async move {
                    // A flight that finished between our lookup and this one
                    // has already filled the entry.
                    if let Some(value) = store.write().await.lru.get(&fill_key) {
                        return Ok(value.clone());
                    }
                    let value = fut.await?;
                    store.write().await.insert(fill_key, value.clone());
                    Ok(value)
                }
            })
            .await;

        flight.value.map(|value| Cached { value, hit: false })
    }

    /// Look up `key`, marking it recently used.
    pub async fn get(&self, key: &K) -> Option<V> {
        self.store.write().await.lru.get(key).cloned()
    }

    /// Store `value` under `key`. Returns false when the value alone exceeds
    /// the budget and was not stored.
    pub async fn insert(&self, key: K, value: V) -> bool {
        self.store.write().await.insert(key, value)
    }

    /// Presence check that leaves recency untouched.
    pub async fn contains(&self, key: &K) -> bool {
        self.store.read().await.lru.contains(key)
    }

    pub async fn remove(&self, key: &K) -> Option<V> {
        let mut store = self.store.write().await;
        let value = store.lru.pop(key)?;
        store.size = store.size.saturating_sub(value.weight());
        Some(value)
    }

    pub async fn clear(&self) {
        let mut store = self.store.write().await;
        store.lru.clear();
        store.size = 0;
    }

    pub async fn len(&self) -> usize {
        self.store.read().await.lru.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.store.read().await.lru.is_empty()
    }

    /// Weight currently held.
    pub async fn size(&self) -> usize {
        self.store.read().await.size
    }

    pub async fn capacity(&self) -> usize {
        self.store.read().await.capacity
    }

    /// Keys with a computation in progress.
    pub fn in_flight(&self) -> usize {
        self.flights.in_flight()
    }

    pub async fn stats(&self) -> CacheStats {
        let store = self.store.read().await;
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: store.lru.len(),
            size: store.size,
            capacity: store.capacity,
        }
    }
}
