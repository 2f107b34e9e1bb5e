//! Dirty tracking for partial uploads
//!
//! Setters record which packed array changed ([`DirtyFlags`]) and which
//! element span changed ([`DirtyRanges`]). The upload step walks the spans
//! instead of re-sending whole tables.

use std::ops::Range;

bitflags::bitflags! {
    /// Packed arrays with pending changes
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DirtyFlags: u32 {
        /// Shared vertex attribute storage
        const VERTICES = 1 << 0;
        /// Shared index storage
        const INDICES = 1 << 1;
        /// Per-instance transforms
        const TRANSFORMS = 1 << 2;
        /// Per-instance colors
        const COLORS = 1 << 3;
        /// Per-instance geometry assignment and visibility
        const INSTANCE_INFO = 1 << 4;
        /// Per-instance morph weights
        const MORPH = 1 << 5;
        /// Shared storage was reallocated; backend buffers must be recreated
        const STORAGE_RESIZED = 1 << 6;
        /// Instance arrays were reallocated
        const INSTANCES_RESIZED = 1 << 7;
    }
}

/// Sorted, non-overlapping, non-adjacent element ranges
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirtyRanges {
    ranges: Vec<Range<usize>>,
}

impl DirtyRanges {
    /// Empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `[start, end)` dirty, merging with overlapping or touching ranges
    pub fn mark_dirty(&mut self, start: usize, end: usize) {
        if start >= end {
            return;
        }
        let mut merged = start..end;
        let first = self.ranges.partition_point(|r| r.end < merged.start);
        let mut last = first;
        while last < self.ranges.len() && self.ranges[last].start <= merged.end {
            merged.start = merged.start.min(self.ranges[last].start);
            merged.end = merged.end.max(self.ranges[last].end);
            last += 1;
        }
        self.ranges.splice(first..last, std::iter::once(merged));
    }

    /// Mark a single element dirty
    pub fn mark_index(&mut self, index: usize) {
        self.mark_dirty(index, index + 1);
    }

    /// Drop ranges past `len`, clipping the one that straddles it
    pub fn clamp(&mut self, len: usize) {
        self.ranges.retain(|r| r.start < len);
        if let Some(last) = self.ranges.last_mut() {
            last.end = last.end.min(len);
        }
    }

    /// Iterate ranges in ascending order
    pub fn iter(&self) -> impl Iterator<Item = &Range<usize>> {
        self.ranges.iter()
    }

    /// True if nothing is dirty
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Total number of dirty elements
    pub fn total_len(&self) -> usize {
        self.ranges.iter().map(ExactSizeIterator::len).sum()
    }

    /// Forget all ranges
    pub fn clear(&mut self) {
        self.ranges.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(ranges: &DirtyRanges) -> Vec<Range<usize>> {
        ranges.iter().cloned().collect()
    }

    #[test]
    fn test_merges_overlapping_and_adjacent() {
        let mut dirty = DirtyRanges::new();
        dirty.mark_dirty(10, 12);
        dirty.mark_dirty(0, 2);
        dirty.mark_dirty(20, 25);
        assert_eq!(collect(&dirty), vec![0..2, 10..12, 20..25]);

        // Touches 10..12 and overlaps 20..25
        dirty.mark_dirty(12, 21);
        assert_eq!(collect(&dirty), vec![0..2, 10..25]);

        dirty.mark_index(2);
        assert_eq!(collect(&dirty), vec![0..3, 10..25]);
        assert_eq!(dirty.total_len(), 18);
    }

    #[test]
    fn test_empty_range_ignored() {
        let mut dirty = DirtyRanges::new();
        dirty.mark_dirty(5, 5);
        assert!(dirty.is_empty());
    }

    #[test]
    fn test_clamp() {
        let mut dirty = DirtyRanges::new();
        dirty.mark_dirty(0, 4);
        dirty.mark_dirty(6, 10);
        dirty.mark_dirty(12, 14);
        dirty.clamp(8);
        assert_eq!(collect(&dirty), vec![0..4, 6..8]);
    }
}
