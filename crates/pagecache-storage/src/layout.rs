//! Page addressing over a heterogeneous page-size layout.
//!
//! The backing file is a concatenation of fixed-size regions, one per
//! page-size class, ordered by ascending page size. Page numbers are
//! dense across the whole file: for a layout `[(s1, n1), (s2, n2), ...]`
//! numbers `[0, n1)` are pages of size `s1`, `[n1, n1 + n2)` are pages of
//! size `s2`, and so on.

use pagecache_common::constants::PAGE_SIZE_CLASSES;
use pagecache_common::types::PageNo;

use crate::error::{CacheError, CacheResult};

/// One size class in the layout: a page size and how many pages of that
/// size the file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutEntry {
    /// Page size in bytes.
    pub page_size: u32,
    /// Number of pages of this size.
    pub page_count: u64,
}

/// The ordered list of size classes making up the backing file.
///
/// Immutable for the process lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSizeLayout {
    entries: Vec<LayoutEntry>,
}

impl PageSizeLayout {
    /// Builds a layout from `(page_size, page_count)` pairs.
    ///
    /// Entries must be sorted by page size ascending, sizes must be
    /// distinct, and every count must be positive.
    pub fn from_entries(entries: Vec<(u32, u64)>) -> CacheResult<Self> {
        if entries.is_empty() {
            return Err(CacheError::layout("layout has no size classes"));
        }
        for pair in entries.windows(2) {
            if pair[0].0 >= pair[1].0 {
                return Err(CacheError::layout(
                    "size classes must be distinct and sorted ascending",
                ));
            }
        }
        if entries.iter().any(|&(size, count)| size == 0 || count == 0) {
            return Err(CacheError::layout("size classes must have nonzero size and count"));
        }
        Ok(Self {
            entries: entries
                .into_iter()
                .map(|(page_size, page_count)| LayoutEntry {
                    page_size,
                    page_count,
                })
                .collect(),
        })
    }

    /// Builds a layout from per-class page counts given in
    /// [`PAGE_SIZE_CLASSES`] order. Only the leading classes with a
    /// positive count populate the layout.
    pub fn from_class_counts(counts: &[u64]) -> CacheResult<Self> {
        if counts.len() > PAGE_SIZE_CLASSES.len() {
            return Err(CacheError::layout("more counts than supported size classes"));
        }
        let entries: Vec<(u32, u64)> = PAGE_SIZE_CLASSES
            .iter()
            .zip(counts.iter())
            .take_while(|&(_, &count)| count > 0)
            .map(|(&size, &count)| (size, count))
            .collect();
        Self::from_entries(entries)
    }

    /// Returns the size classes.
    pub fn entries(&self) -> &[LayoutEntry] {
        &self.entries
    }

    /// Returns the size class owning `no`, or `None` if `no` is beyond
    /// the layout.
    pub fn size_of(&self, no: PageNo) -> Option<u32> {
        let mut n = u64::from(no.as_u32());
        for entry in &self.entries {
            if n < entry.page_count {
                return Some(entry.page_size);
            }
            n -= entry.page_count;
        }
        None
    }

    /// Returns the byte offset of `no` in the backing file, or `None` if
    /// `no` is beyond the layout.
    ///
    /// Walks the classes in ascending size order, skipping whole regions
    /// until the owning class is found.
    pub fn offset_of(&self, no: PageNo) -> Option<u64> {
        let mut n = u64::from(no.as_u32());
        let mut offset = 0u64;
        for entry in &self.entries {
            if n < entry.page_count {
                return Some(offset + n * u64::from(entry.page_size));
            }
            offset += entry.page_count * u64::from(entry.page_size);
            n -= entry.page_count;
        }
        None
    }

    /// Returns true if `no` belongs to the layout.
    pub fn contains(&self, no: PageNo) -> bool {
        u64::from(no.as_u32()) < self.total_pages()
    }

    /// Total number of pages across all classes.
    pub fn total_pages(&self) -> u64 {
        self.entries.iter().map(|e| e.page_count).sum()
    }

    /// Total footprint of the backing file in bytes.
    pub fn total_bytes(&self) -> u64 {
        self.entries
            .iter()
            .map(|e| e.page_count * u64::from(e.page_size))
            .sum()
    }

    /// The largest page size in the layout.
    pub fn largest_page_size(&self) -> u32 {
        // Entries are sorted ascending, the last one is the largest.
        self.entries[self.entries.len() - 1].page_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_class_layout() -> PageSizeLayout {
        PageSizeLayout::from_entries(vec![(8192, 3), (16384, 2)]).unwrap()
    }

    #[test]
    fn test_single_class_offsets() {
        let layout = PageSizeLayout::from_entries(vec![(8192, 4)]).unwrap();
        assert_eq!(layout.offset_of(PageNo::new(0)), Some(0));
        assert_eq!(layout.offset_of(PageNo::new(3)), Some(3 * 8192));
        assert_eq!(layout.offset_of(PageNo::new(4)), None);
        assert_eq!(layout.total_pages(), 4);
        assert_eq!(layout.total_bytes(), 4 * 8192);
    }

    #[test]
    fn test_cross_class_offsets() {
        let layout = two_class_layout();
        assert_eq!(layout.offset_of(PageNo::new(0)), Some(0));
        assert_eq!(layout.offset_of(PageNo::new(1)), Some(8192));
        assert_eq!(layout.offset_of(PageNo::new(2)), Some(16384));
        assert_eq!(layout.offset_of(PageNo::new(3)), Some(24576));
        assert_eq!(layout.offset_of(PageNo::new(4)), Some(40960));
        assert_eq!(layout.offset_of(PageNo::new(5)), None);
    }

    #[test]
    fn test_size_of() {
        let layout = two_class_layout();
        assert_eq!(layout.size_of(PageNo::new(2)), Some(8192));
        assert_eq!(layout.size_of(PageNo::new(3)), Some(16384));
        assert_eq!(layout.size_of(PageNo::new(5)), None);
    }

    #[test]
    fn test_from_class_counts_leading_prefix() {
        let layout = PageSizeLayout::from_class_counts(&[3, 2]).unwrap();
        assert_eq!(layout, two_class_layout());

        // A zero count cuts the layout off at the preceding class.
        let layout = PageSizeLayout::from_class_counts(&[3, 0, 5]).unwrap();
        assert_eq!(layout.entries().len(), 1);
        assert_eq!(layout.total_pages(), 3);
    }

    #[test]
    fn test_invalid_layouts() {
        assert!(PageSizeLayout::from_entries(vec![]).is_err());
        assert!(PageSizeLayout::from_entries(vec![(16384, 2), (8192, 3)]).is_err());
        assert!(PageSizeLayout::from_entries(vec![(8192, 3), (8192, 2)]).is_err());
        assert!(PageSizeLayout::from_entries(vec![(8192, 0)]).is_err());
        assert!(PageSizeLayout::from_class_counts(&[0, 4]).is_err());
        assert!(PageSizeLayout::from_class_counts(&[1, 1, 1, 1, 1]).is_err());
    }

    #[test]
    fn test_largest_page_size() {
        assert_eq!(two_class_layout().largest_page_size(), 16384);
    }
}
