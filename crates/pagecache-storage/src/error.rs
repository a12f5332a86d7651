//! Cache errors.

use std::io;

use pagecache_common::types::PageNo;
use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors that can occur during cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The page number does not belong to the configured layout.
    #[error("page {page_no} is out of range for the configured layout")]
    PageOutOfRange {
        /// The offending page number.
        page_no: PageNo,
    },

    /// The request carried a page size that does not match the page's
    /// size class.
    #[error("page {page_no} belongs to the {expected}-byte class, request carried {requested}")]
    PageSizeMismatch {
        /// The page number the request named.
        page_no: PageNo,
        /// The size class the layout assigns to this page.
        expected: u32,
        /// The size the request carried.
        requested: u32,
    },

    /// The caller's buffer is smaller than the page.
    #[error("buffer for page {page_no} holds {got} bytes, page needs {need}")]
    ShortBuffer {
        /// The page number the request named.
        page_no: PageNo,
        /// Bytes the page requires.
        need: usize,
        /// Bytes the caller supplied.
        got: usize,
    },

    /// An invalid layout description.
    #[error("invalid layout: {message}")]
    Layout {
        /// What was wrong with the layout.
        message: &'static str,
    },

    /// I/O error on the backing file.
    #[error("I/O error: {source}")]
    Io {
        /// The underlying error.
        #[from]
        source: io::Error,
    },
}

impl CacheError {
    /// Creates a layout error.
    pub fn layout(message: &'static str) -> Self {
        Self::Layout { message }
    }

    /// Returns true if the error is a client-side request error rather
    /// than a fault in the cache itself.
    pub fn is_request_error(&self) -> bool {
        matches!(
            self,
            Self::PageOutOfRange { .. } | Self::PageSizeMismatch { .. } | Self::ShortBuffer { .. }
        )
    }
}
