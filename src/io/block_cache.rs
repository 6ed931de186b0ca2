use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use lru::LruCache;
use tokio::sync::{Notify, RwLock};

use super::range_reader::check_range;
use super::RangeReader;
use crate::error::IoError;

/// Default block size: 256KB
pub const DEFAULT_BLOCK_SIZE: usize = 256 * 1024;

/// Default number of cached blocks per reader (25.6MB at the default block size).
pub const DEFAULT_BLOCK_CACHE_CAPACITY: usize = 100;

/// Block-aligned read cache in front of any `RangeReader`.
///
/// TIFF parsing issues many small reads at scattered offsets (headers, IFDs,
/// tag arrays). Rounding them up to fixed blocks turns those into a handful of
/// storage requests. Concurrent misses on the same block share one fetch.
pub struct BlockCache<R> {
    inner: Arc<R>,
    block_size: usize,
    cache: RwLock<LruCache<u64, Bytes>>,
    in_flight: Mutex<HashMap<u64, Arc<Notify>>>,
}

/// Clears a block's in-flight marker even if the fetching future is dropped.
struct FetchGuard<'a> {
    in_flight: &'a Mutex<HashMap<u64, Arc<Notify>>>,
    block_idx: u64,
}

impl Drop for FetchGuard<'_> {
    fn drop(&mut self) {
        let notify = self
            .in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.block_idx);
        if let Some(notify) = notify {
            notify.notify_waiters();
        }
    }
}

impl<R: RangeReader> BlockCache<R> {
    pub fn new(inner: R) -> Self {
        Self::with_capacity(inner, DEFAULT_BLOCK_SIZE, DEFAULT_BLOCK_CACHE_CAPACITY)
    }

    /// Wrap `inner` with `capacity` blocks of `block_size` bytes.
    ///
    /// Zero values are bumped to 1.
    pub fn with_capacity(inner: R, block_size: usize, capacity: usize) -> Self {
        let capacity = std::num::NonZeroUsize::new(capacity).unwrap_or(std::num::NonZeroUsize::MIN);
        Self {
            inner: Arc::new(inner),
            block_size: block_size.max(1),
            cache: RwLock::new(LruCache::new(capacity)),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// The wrapped reader.
    pub fn inner(&self) -> &R {
        &self.inner
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Number of blocks currently cached.
    pub async fn cached_blocks(&self) -> usize {
        self.cache.read().await.len()
    }

    async fn get_block(&self, block_idx: u64) -> Result<Bytes, IoError> {
        loop {
            if let Some(data) = self.cache.write().await.get(&block_idx) {
                return Ok(data.clone());
            }

            let notify = {
                let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
                match in_flight.get(&block_idx) {
                    Some(notify) => Some(Arc::clone(notify)),
                    None => {
                        in_flight.insert(block_idx, Arc::new(Notify::new()));
                        None
                    }
                }
            };

            if let Some(notify) = notify {
                let notified = notify.notified();
                tokio::pin!(notified);
                // Register before re-checking so a completion in between is not lost.
                notified.as_mut().enable();
                let still_running = self
                    .in_flight
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .get(&block_idx)
                    .is_some_and(|current| Arc::ptr_eq(current, &notify));
                if still_running {
                    notified.await;
                }
                continue;
            }

            let _guard = FetchGuard {
                in_flight: &self.in_flight,
                block_idx,
            };
            let result = self.fetch_block(block_idx).await;
            if let Ok(ref data) = result {
                self.cache.write().await.put(block_idx, data.clone());
            }
            return result;
        }
    }

    async fn fetch_block(&self, block_idx: u64) -> Result<Bytes, IoError> {
        let offset = block_idx * self.block_size as u64;
        let size = self.inner.size();
        let remaining = size.saturating_sub(offset);
        if remaining == 0 {
            return Err(IoError::RangeOutOfBounds {
                offset,
                requested: self.block_size as u64,
                size,
            });
        }

        let len = remaining.min(self.block_size as u64) as usize;
        self.inner.read_exact_at(offset, len).await
    }
}

#[async_trait]
impl<R: RangeReader + 'static> RangeReader for BlockCache<R> {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        check_range(offset, len, self.inner.size())?;
        if len == 0 {
            return Ok(Bytes::new());
        }

        let block_size = self.block_size as u64;
        let first = offset / block_size;
        let last = (offset + len as u64 - 1) / block_size;

        if first == last {
            let block = self.get_block(first).await?;
            let start = (offset % block_size) as usize;
            return Ok(block.slice(start..start + len));
        }

        let mut out = BytesMut::with_capacity(len);
        let mut cursor = offset;
        for block_idx in first..=last {
            let block = self.get_block(block_idx).await?;
            let start = (cursor % block_size) as usize;
            let take = (block.len() - start).min(len - out.len());
            out.extend_from_slice(&block[start..start + take]);
            cursor += take as u64;
        }

        Ok(out.freeze())
    }

    fn size(&self) -> u64 {
        self.inner.size()
    }

    fn identifier(&self) -> &str {
        self.inner.identifier()
    }
}
