//! System-wide constants for the pagecache server.

// =============================================================================
// Page size classes
// =============================================================================

/// The page size classes a backing file may be configured with, in
/// ascending order. A layout assigns a page count to a leading prefix of
/// these classes.
pub const PAGE_SIZE_CLASSES: [u32; 4] = [8 * 1024, 16 * 1024, 32 * 1024, 2 * 1024 * 1024];

/// The largest supported page size (2 MiB).
///
/// Connection workers allocate their scratch buffer at this size once, so
/// any valid page fits without reallocation.
pub const MAX_PAGE_SIZE: usize = 2 * 1024 * 1024;

// =============================================================================
// Memory bounds
// =============================================================================

/// Upper bound on resident page bytes held by the cache (4 GiB).
pub const MAX_BUFFER_POOL_BYTES: u64 = 4 * 1024 * 1024 * 1024;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_classes_ascending_and_distinct() {
        for pair in PAGE_SIZE_CLASSES.windows(2) {
            assert!(pair[0] < pair[1]);
        }
        assert_eq!(PAGE_SIZE_CLASSES[PAGE_SIZE_CLASSES.len() - 1] as usize, MAX_PAGE_SIZE);
    }

    #[test]
    fn test_pool_bound_holds_pages() {
        // The pool must be able to hold at least one page of every class.
        for class in PAGE_SIZE_CLASSES {
            assert!(u64::from(class) <= MAX_BUFFER_POOL_BYTES);
        }
    }
}
