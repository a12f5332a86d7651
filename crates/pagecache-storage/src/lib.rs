//! # pagecache-storage
//!
//! The in-memory page cache backing the pagecache server.
//!
//! This crate provides:
//!
//! - **Layout**: the mapping from logical page numbers to byte offsets in
//!   a backing file made of heterogeneous fixed-size page regions
//! - **Page**: a latched, pinnable page buffer with positional disk I/O
//! - **Engine**: a capacity-bounded, LRU-ordered page table with demand
//!   loading, eviction, and write-back

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Cache errors.
pub mod error;

/// Cache engine and the dispatcher-facing cache contract.
pub mod engine;

/// Backing-file wrapper with positional I/O.
pub mod file;

/// Page-number to byte-offset addressing.
pub mod layout;

/// LRU recency list.
pub mod lru;

/// Latched, pinnable page buffers.
pub mod page;

/// Hit/miss accounting.
pub mod stats;

pub use engine::{CacheConfig, LruCacheEngine, PageCache};
pub use error::{CacheError, CacheResult};
pub use layout::PageSizeLayout;
pub use page::{Page, PinGuard};
