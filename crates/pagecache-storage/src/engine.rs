//! The LRU cache engine.
//!
//! A capacity-bounded page table with LRU recency, demand loading,
//! eviction of unpinned pages, and write-back to the backing file.
//!
//! A single cache-wide mutex guards the page table and the recency list.
//! It is held only for in-memory bookkeeping: demand loads run after the
//! mutex is released, with the target page pinned so it cannot be evicted
//! in the meantime. Page data itself is guarded by each page's own latch.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use pagecache_common::constants::MAX_BUFFER_POOL_BYTES;
use pagecache_common::types::PageNo;

use crate::error::{CacheError, CacheResult};
use crate::file::DataFile;
use crate::layout::PageSizeLayout;
use crate::lru::LruList;
use crate::page::{Page, PinGuard};
use crate::stats::CacheStats;

/// The cache contract the request dispatcher programs against.
///
/// `worker_id` is the dispatcher's stable per-connection index. Cache
/// variants that hold per-worker resources key them off it; the LRU
/// engine shares one file handle and ignores it.
pub trait PageCache: Send + Sync {
    /// Fills `out` with the contents of page `no`.
    fn read_page(
        &self,
        no: PageNo,
        page_size: u32,
        out: &mut [u8],
        worker_id: usize,
    ) -> CacheResult<()>;

    /// Overwrites page `no` with the contents of `buf`.
    fn write_page(
        &self,
        no: PageNo,
        page_size: u32,
        buf: &[u8],
        worker_id: usize,
    ) -> CacheResult<()>;

    /// Logs the cache hit rate and raw counters.
    fn log_hit_rate(&self);
}

/// Cache engine configuration.
#[derive(Debug, Clone, Default)]
pub struct CacheConfig {
    /// Maximum number of resident pages. When unset, the capacity is
    /// derived from the layout and the 4 GiB pool bound.
    pub capacity: Option<usize>,
}

impl CacheConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pins the resident-page capacity.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }
}

/// Page table plus recency list, guarded together by the cache mutex.
struct CacheInner {
    table: HashMap<PageNo, Arc<Page>>,
    lru: LruList<PageNo>,
}

/// LRU-ordered, capacity-bounded page cache over a single backing file.
pub struct LruCacheEngine {
    layout: PageSizeLayout,
    capacity: usize,
    file: DataFile,
    inner: Mutex<CacheInner>,
    stats: CacheStats,
}

impl LruCacheEngine {
    /// Opens the backing file and constructs the engine.
    pub fn open(
        path: impl AsRef<Path>,
        layout: PageSizeLayout,
        config: CacheConfig,
    ) -> CacheResult<Self> {
        let capacity = effective_capacity(&layout, &config)?;
        let file = DataFile::open(path)?;
        info!(
            capacity,
            total_pages = layout.total_pages(),
            file = %file.path().display(),
            "page cache initialized"
        );
        Ok(Self {
            layout,
            capacity,
            file,
            inner: Mutex::new(CacheInner {
                table: HashMap::with_capacity(capacity),
                lru: LruList::new(),
            }),
            stats: CacheStats::new(),
        })
    }

    /// Returns the resident-page capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the configured layout.
    pub fn layout(&self) -> &PageSizeLayout {
        &self.layout
    }

    /// Returns the hit/miss counters.
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Returns the number of pages currently resident.
    pub fn resident_pages(&self) -> usize {
        self.inner.lock().table.len()
    }

    /// Returns true if page `no` is resident.
    pub fn contains(&self, no: PageNo) -> bool {
        self.inner.lock().table.contains_key(&no)
    }

    /// Fills `out` with the contents of page `no`.
    ///
    /// The page is resolved through the layout, pinned for the duration
    /// of the copy, and demand-loaded from disk on a miss. A page whose
    /// load failed stays resident and reads as zeroes until a client
    /// writes it.
    pub fn read_page(&self, no: PageNo, page_size: u32, out: &mut [u8]) -> CacheResult<()> {
        let (offset, size) = self.resolve(no, page_size)?;
        if out.len() < size {
            return Err(CacheError::ShortBuffer {
                page_no: no,
                need: size,
                got: out.len(),
            });
        }

        let guard = self.acquire(no, size, offset);
        let copied = guard.read_at(0, &mut out[..size]);
        if copied < size {
            // The page was never loaded; its in-memory image is zeroes.
            out[copied..size].fill(0);
        }
        Ok(())
    }

    /// Overwrites page `no` with `buf`.
    ///
    /// Writes always cover the full page, so the post-image never mixes
    /// client bytes with stale disk bytes.
    pub fn write_page(&self, no: PageNo, page_size: u32, buf: &[u8]) -> CacheResult<()> {
        let (offset, size) = self.resolve(no, page_size)?;
        if buf.len() < size {
            return Err(CacheError::ShortBuffer {
                page_no: no,
                need: size,
                got: buf.len(),
            });
        }

        let guard = self.acquire(no, size, offset);
        guard.write_at(0, &buf[..size]);
        Ok(())
    }

    /// Writes every dirty resident page back to disk. Returns the number
    /// of pages flushed; failures are logged and skipped.
    pub fn flush_all(&self) -> usize {
        let inner = self.inner.lock();
        let mut flushed = 0;
        for (&no, page) in &inner.table {
            if !page.is_dirty() {
                continue;
            }
            match self.layout.offset_of(no) {
                Some(offset) => {
                    if page.flush_to(&self.file, offset) {
                        flushed += 1;
                    } else {
                        warn!(page = %no, "flush failed during shutdown");
                    }
                }
                None => warn!(page = %no, "resident page missing from layout"),
            }
        }
        flushed
    }

    /// Validates the request against the layout and returns the page's
    /// file offset and true size. Rejections leave cache and disk
    /// untouched.
    fn resolve(&self, no: PageNo, page_size: u32) -> CacheResult<(u64, usize)> {
        let expected = self
            .layout
            .size_of(no)
            .ok_or(CacheError::PageOutOfRange { page_no: no })?;
        if expected != page_size {
            return Err(CacheError::PageSizeMismatch {
                page_no: no,
                expected,
                requested: page_size,
            });
        }
        let offset = self
            .layout
            .offset_of(no)
            .ok_or(CacheError::PageOutOfRange { page_no: no })?;
        Ok((offset, expected as usize))
    }

    /// Looks up or inserts page `no`, returning it pinned.
    ///
    /// On a hit the page moves to the front of the recency list. On a
    /// miss, eviction restores headroom first, then the new page is
    /// inserted and pinned; the demand load runs after the cache mutex is
    /// dropped.
    fn acquire(&self, no: PageNo, size: usize, offset: u64) -> PinGuard {
        let (guard, needs_load) = {
            let mut locked = self.inner.lock();
            let inner = &mut *locked;
            if let Some(page) = inner.table.get(&no) {
                self.stats.record_hit();
                inner.lru.touch(&no);
                (PinGuard::new(Arc::clone(page)), false)
            } else {
                self.stats.record_miss();
                self.evict_for_headroom(inner);
                let page = Arc::new(Page::new(no, size));
                inner.table.insert(no, Arc::clone(&page));
                inner.lru.push_front(no);
                (PinGuard::new(page), true)
            }
        };

        if needs_load && !guard.load_from(&self.file, offset) {
            warn!(page = %no, "demand load failed, serving unloaded page");
        }
        guard
    }

    /// Evicts unpinned pages from the LRU end until the table has room
    /// for one more page. If every resident page is pinned, the insert
    /// proceeds over capacity rather than stalling the caller.
    fn evict_for_headroom(&self, inner: &mut CacheInner) {
        while inner.table.len() >= self.capacity {
            let victim = inner
                .lru
                .iter_lru()
                .find(|&no| inner.table.get(no).is_some_and(|page| !page.is_pinned()))
                .copied();

            let Some(no) = victim else {
                warn!(
                    resident = inner.table.len(),
                    capacity = self.capacity,
                    "all cached pages pinned, inserting over capacity"
                );
                break;
            };

            inner.lru.remove(&no);
            if let Some(page) = inner.table.remove(&no) {
                if page.is_dirty() {
                    match self.layout.offset_of(no) {
                        Some(offset) => {
                            if !page.flush_to(&self.file, offset) {
                                warn!(page = %no, "flush failed during eviction, dropping dirty page");
                            }
                        }
                        None => warn!(page = %no, "resident page missing from layout"),
                    }
                }
                debug!(page = %no, "evicted");
            }
        }
    }
}

impl PageCache for LruCacheEngine {
    fn read_page(
        &self,
        no: PageNo,
        page_size: u32,
        out: &mut [u8],
        _worker_id: usize,
    ) -> CacheResult<()> {
        LruCacheEngine::read_page(self, no, page_size, out)
    }

    fn write_page(
        &self,
        no: PageNo,
        page_size: u32,
        buf: &[u8],
        _worker_id: usize,
    ) -> CacheResult<()> {
        LruCacheEngine::write_page(self, no, page_size, buf)
    }

    fn log_hit_rate(&self) {
        info!("cache {}", self.stats);
    }
}

impl Drop for LruCacheEngine {
    fn drop(&mut self) {
        let flushed = self.flush_all();
        debug!(flushed, "cache engine closed");
    }
}

impl std::fmt::Debug for LruCacheEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LruCacheEngine")
            .field("capacity", &self.capacity)
            .field("resident", &self.resident_pages())
            .field("stats", &self.stats)
            .finish()
    }
}

/// Derives the resident-page capacity from the layout and the pool
/// bound, honoring an explicit override.
fn effective_capacity(layout: &PageSizeLayout, config: &CacheConfig) -> CacheResult<usize> {
    let largest = u64::from(layout.largest_page_size());
    let bound = usize::try_from(MAX_BUFFER_POOL_BYTES / largest)
        .unwrap_or(usize::MAX)
        .max(1);

    let capacity = match config.capacity {
        Some(capacity) => capacity,
        None => bound.min(usize::try_from(layout.total_pages()).unwrap_or(usize::MAX)),
    };

    if capacity == 0 {
        return Err(CacheError::layout("cache capacity must be positive"));
    }
    if capacity as u64 * largest > MAX_BUFFER_POOL_BYTES {
        return Err(CacheError::layout("cache capacity exceeds the pool byte bound"));
    }
    Ok(capacity)
}
