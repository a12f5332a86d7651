//! A single cached page.
//!
//! Each page owns a fixed-size buffer guarded by a reader-writer latch,
//! an atomic pin count consulted by the eviction policy, and atomic
//! dirty/loaded flags. Disk I/O is positional and retried across
//! interruptions.

use std::io;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use pagecache_common::types::{Lsn, PageNo};

use crate::file::DataFile;

/// A fixed-size in-memory page.
///
/// The buffer is zero-initialized at construction and stays zeroed until
/// the first disk load or client write. Multiple readers may copy out of
/// the page concurrently; writes and loads take the latch exclusively.
///
/// Pin counting is separate from the `Arc` handle count: the handle count
/// keeps the memory alive while a worker dereferences the page, the pin
/// count tells the cache policy the page must not be evicted.
pub struct Page {
    id: PageNo,
    size: usize,
    data: RwLock<Box<[u8]>>,
    pin_count: AtomicU32,
    dirty: AtomicBool,
    loaded: AtomicBool,
    lsn: AtomicU64,
}

impl Page {
    /// Creates a new unloaded page with a zeroed buffer.
    pub fn new(id: PageNo, size: usize) -> Self {
        Self {
            id,
            size,
            data: RwLock::new(vec![0u8; size].into_boxed_slice()),
            pin_count: AtomicU32::new(0),
            dirty: AtomicBool::new(false),
            loaded: AtomicBool::new(false),
            lsn: AtomicU64::new(Lsn::INVALID.as_u64()),
        }
    }

    /// Returns the page number.
    #[inline]
    pub fn id(&self) -> PageNo {
        self.id
    }

    /// Returns the page size in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    // -------------------------------------------------------------------------
    // Pin counting
    // -------------------------------------------------------------------------

    /// Increments the pin count and returns the new value.
    #[inline]
    pub fn pin(&self) -> u32 {
        self.pin_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Decrements the pin count and returns the new value.
    ///
    /// Unpinning a page whose count is already zero is a caller bug; the
    /// count is clamped at zero and the event logged.
    pub fn unpin(&self) -> u32 {
        let mut current = self.pin_count.load(Ordering::Acquire);
        loop {
            if current == 0 {
                debug!(page = %self.id, "unpin on page with zero pin count");
                return 0;
            }
            match self.pin_count.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return current - 1,
                Err(actual) => current = actual,
            }
        }
    }

    /// Returns the current pin count.
    #[inline]
    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    /// Returns true if the page is pinned.
    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.pin_count() > 0
    }

    // -------------------------------------------------------------------------
    // Metadata
    // -------------------------------------------------------------------------

    /// Returns true if the in-memory contents differ from disk.
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Returns true if the buffer reflects a disk load or a client write.
    #[inline]
    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    /// Returns the reserved log sequence number.
    #[inline]
    pub fn lsn(&self) -> Lsn {
        Lsn::new(self.lsn.load(Ordering::Acquire))
    }

    /// Sets the reserved log sequence number.
    #[inline]
    pub fn set_lsn(&self, lsn: Lsn) {
        self.lsn.store(lsn.as_u64(), Ordering::Release);
    }

    // -------------------------------------------------------------------------
    // Data access
    // -------------------------------------------------------------------------

    /// Copies page bytes starting at `offset` into `out`.
    ///
    /// Returns the number of bytes copied: 0 when `offset` is past the
    /// end of the page or the page has never been loaded, otherwise
    /// `min(out.len(), size - offset)`. Concurrent readers share the
    /// latch.
    pub fn read_at(&self, offset: usize, out: &mut [u8]) -> usize {
        if offset >= self.size {
            return 0;
        }
        let data = self.data.read();
        if !self.loaded.load(Ordering::Acquire) {
            return 0;
        }
        let n = out.len().min(self.size - offset);
        out[..n].copy_from_slice(&data[offset..offset + n]);
        n
    }

    /// Copies `buf` into the page starting at `offset`.
    ///
    /// Returns the number of bytes copied: 0 when `offset` is past the
    /// end of the page, otherwise `min(buf.len(), size - offset)`. Takes
    /// the latch exclusively, then marks the page loaded and dirty.
    pub fn write_at(&self, offset: usize, buf: &[u8]) -> usize {
        if offset >= self.size {
            return 0;
        }
        let mut data = self.data.write();
        let n = buf.len().min(self.size - offset);
        data[offset..offset + n].copy_from_slice(&buf[..n]);
        self.loaded.store(true, Ordering::Release);
        self.dirty.store(true, Ordering::Release);
        n
    }

    // -------------------------------------------------------------------------
    // Disk I/O
    // -------------------------------------------------------------------------

    /// Fills the page from `file` at `file_offset`.
    ///
    /// Holds the latch exclusively and reads positionally until the full
    /// page is consumed. A short read at end of file zero-pads the
    /// remainder (sparse page). Interrupted reads are retried. On a hard
    /// I/O failure returns false and leaves the loaded flag unchanged.
    pub fn load_from(&self, file: &DataFile, file_offset: u64) -> bool {
        let mut data = self.data.write();
        let mut total = 0usize;
        while total < self.size {
            match file.read_at(&mut data[total..], file_offset + total as u64) {
                Ok(0) => {
                    data[total..].fill(0);
                    total = self.size;
                }
                Ok(n) => total += n,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(page = %self.id, error = %e, "page load failed");
                    return false;
                }
            }
        }
        self.loaded.store(true, Ordering::Release);
        self.dirty.store(false, Ordering::Release);
        true
    }

    /// Writes the page back to `file` at `file_offset`.
    ///
    /// Returns false without touching disk if the page was never loaded,
    /// true with no I/O if it is clean. Otherwise copies the buffer under
    /// a shared latch, releases the latch, then writes positionally until
    /// the full page is committed, retrying interruptions. Clears the
    /// dirty flag on success. The copy-then-release policy bounds how
    /// long writers are blocked to a single memcpy.
    pub fn flush_to(&self, file: &DataFile, file_offset: u64) -> bool {
        let scratch = {
            let data = self.data.read();
            if !self.loaded.load(Ordering::Acquire) {
                return false;
            }
            if !self.dirty.load(Ordering::Acquire) {
                return true;
            }
            data.to_vec()
        };

        let mut total = 0usize;
        while total < self.size {
            match file.write_at(&scratch[total..], file_offset + total as u64) {
                Ok(0) => {
                    warn!(page = %self.id, "page flush made no progress");
                    return false;
                }
                Ok(n) => total += n,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(page = %self.id, error = %e, "page flush failed");
                    return false;
                }
            }
        }
        self.dirty.store(false, Ordering::Release);
        true
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("id", &self.id)
            .field("size", &self.size)
            .field("pin_count", &self.pin_count())
            .field("dirty", &self.is_dirty())
            .field("loaded", &self.is_loaded())
            .field("lsn", &self.lsn())
            .finish()
    }
}

/// RAII pin guard.
///
/// Pins the page on construction and unpins it on every exit path. The
/// guard keeps a reference-counted handle so the page outlives the
/// cache's critical section.
pub struct PinGuard {
    page: Arc<Page>,
}

impl PinGuard {
    /// Pins `page` and wraps it.
    pub fn new(page: Arc<Page>) -> Self {
        page.pin();
        Self { page }
    }

    /// Returns the guarded page.
    pub fn page(&self) -> &Page {
        &self.page
    }
}

impl Deref for PinGuard {
    type Target = Page;

    fn deref(&self) -> &Self::Target {
        &self.page
    }
}

impl Drop for PinGuard {
    fn drop(&mut self) {
        self.page.unpin();
    }
}

impl std::fmt::Debug for PinGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinGuard").field("page", &*self.page).finish()
    }
}
