//! Geometry Range Table
//!
//! Maps geometry ids to the vertex/index spans they own inside the shared
//! buffers. Each span has a reservation (its slot size) and a current data
//! size. Deleting a geometry leaves its reservation behind as a hole until
//! [`GeometryRangeTable::compact`] slides the live spans together.

use std::fmt;

use super::bounds::{Aabb, BoundingSphere};
use crate::foundation::collections::FreeList;

/// Stable handle of a registered geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GeometryId(pub u32);

impl GeometryId {
    /// Slot index
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for GeometryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "geometry#{}", self.0)
    }
}

/// Span of shared storage owned by one geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeometryRange {
    /// Owning geometry
    pub id: GeometryId,
    /// First vertex in shared vertex storage
    pub vertex_start: usize,
    /// Vertices currently holding data
    pub vertex_count: usize,
    /// Vertices reserved for this geometry
    pub reserved_vertex_count: usize,
    /// First index in shared index storage
    pub index_start: usize,
    /// Indices currently holding data
    pub index_count: usize,
    /// Indices reserved for this geometry
    pub reserved_index_count: usize,
}

impl GeometryRange {
    /// End of the reserved vertex span (exclusive)
    pub fn vertex_end(&self) -> usize {
        self.vertex_start + self.reserved_vertex_count
    }

    /// End of the reserved index span (exclusive)
    pub fn index_end(&self) -> usize {
        self.index_start + self.reserved_index_count
    }
}

/// Reservation left behind by a deleted geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hole {
    /// First vertex of the freed span
    pub vertex_start: usize,
    /// Freed vertex count
    pub reserved_vertex_count: usize,
    /// First index of the freed span
    pub index_start: usize,
    /// Freed index count
    pub reserved_index_count: usize,
}

/// Where a new range goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Reuse the hole at this position in the hole list
    Hole(usize),
    /// Append at the current high-water mark
    Append,
}

/// One span relocation produced by compaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeMove {
    /// Old start
    pub src: usize,
    /// New start (never above `src`)
    pub dst: usize,
    /// Elements moved
    pub len: usize,
}

/// Span relocations for one compaction pass, in application order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactionPlan {
    /// Vertex span moves, ascending by destination
    pub vertex_moves: Vec<RangeMove>,
    /// Index span moves, ascending by destination
    pub index_moves: Vec<RangeMove>,
    /// Vertices reclaimed from holes
    pub reclaimed_vertices: usize,
    /// Indices reclaimed from holes
    pub reclaimed_indices: usize,
}

#[derive(Debug, Clone)]
pub(crate) struct RangeEntry {
    pub range: GeometryRange,
    /// Registration order; stays put when ids are reused
    pub sequence: u64,
    pub bounding_box: Option<Aabb>,
    pub bounding_sphere: Option<BoundingSphere>,
}

/// Table of geometry ranges plus hole bookkeeping
#[derive(Debug, Default)]
pub struct GeometryRangeTable {
    entries: FreeList<RangeEntry>,
    /// Holes sorted by vertex start
    holes: Vec<Hole>,
    next_vertex_start: usize,
    next_index_start: usize,
    next_sequence: u64,
}

impl GeometryRangeTable {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live geometries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no geometry is registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of unreclaimed holes
    pub fn hole_count(&self) -> usize {
        self.holes.len()
    }

    /// Unreclaimed holes in storage order
    pub fn holes(&self) -> &[Hole] {
        &self.holes
    }

    /// First vertex past every allocated span (live or hole)
    pub fn vertex_high_water(&self) -> usize {
        self.next_vertex_start
    }

    /// First index past every allocated span (live or hole)
    pub fn index_high_water(&self) -> usize {
        self.next_index_start
    }

    /// Id the next insert will receive
    pub fn next_id(&self) -> GeometryId {
        GeometryId(self.entries.next_index() as u32)
    }

    /// Range of a live geometry
    pub fn get(&self, id: GeometryId) -> Option<&GeometryRange> {
        self.entries.get(id.index()).map(|entry| &entry.range)
    }

    /// True if `id` refers to a live geometry
    pub fn contains(&self, id: GeometryId) -> bool {
        self.entries.contains(id.index())
    }

    pub(crate) fn entry_mut(&mut self, id: GeometryId) -> Option<&mut RangeEntry> {
        self.entries.get_mut(id.index())
    }

    /// Registration sequence of a live geometry
    pub fn sequence(&self, id: GeometryId) -> Option<u64> {
        self.entries.get(id.index()).map(|entry| entry.sequence)
    }

    /// Live ranges in id order
    pub fn iter(&self) -> impl Iterator<Item = &GeometryRange> {
        self.entries.iter().map(|(_, entry)| &entry.range)
    }

    /// Decide where a reservation of the given size would go
    ///
    /// Only a hole matching both reservations exactly is reused; anything
    /// else appends so live spans keep their storage order.
    pub fn plan_placement(&self, reserved_vertices: usize, reserved_indices: usize) -> Placement {
        self.holes
            .iter()
            .position(|hole| {
                hole.reserved_vertex_count == reserved_vertices && hole.reserved_index_count == reserved_indices
            })
            .map_or(Placement::Append, Placement::Hole)
    }

    /// Storage extent an append of this size needs
    pub fn append_extent(&self, reserved_vertices: usize, reserved_indices: usize) -> (usize, usize) {
        (self.next_vertex_start + reserved_vertices, self.next_index_start + reserved_indices)
    }

    /// Register a range at a previously planned placement
    pub fn insert(
        &mut self,
        placement: Placement,
        vertex_count: usize,
        reserved_vertex_count: usize,
        index_count: usize,
        reserved_index_count: usize,
    ) -> GeometryRange {
        let (vertex_start, index_start) = match placement {
            Placement::Hole(position) => {
                let hole = self.holes.remove(position);
                (hole.vertex_start, hole.index_start)
            }
            Placement::Append => {
                let starts = (self.next_vertex_start, self.next_index_start);
                self.next_vertex_start += reserved_vertex_count;
                self.next_index_start += reserved_index_count;
                starts
            }
        };

        let id = self.next_id();
        let range = GeometryRange {
            id,
            vertex_start,
            vertex_count,
            reserved_vertex_count,
            index_start,
            index_count,
            reserved_index_count,
        };
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let index = self.entries.insert(RangeEntry {
            range,
            sequence,
            bounding_box: None,
            bounding_sphere: None,
        });
        debug_assert_eq!(index, id.index());
        range
    }

    /// Update the data sizes of a live range, dropping cached bounds
    pub fn set_counts(&mut self, id: GeometryId, vertex_count: usize, index_count: usize) -> Option<GeometryRange> {
        let entry = self.entries.get_mut(id.index())?;
        entry.range.vertex_count = vertex_count;
        entry.range.index_count = index_count;
        entry.bounding_box = None;
        entry.bounding_sphere = None;
        Some(entry.range)
    }

    /// Remove a live range, leaving its reservation as a hole
    pub fn remove(&mut self, id: GeometryId) -> Option<GeometryRange> {
        let entry = self.entries.remove(id.index())?;
        let range = entry.range;
        let hole = Hole {
            vertex_start: range.vertex_start,
            reserved_vertex_count: range.reserved_vertex_count,
            index_start: range.index_start,
            reserved_index_count: range.reserved_index_count,
        };
        let position = self.holes.partition_point(|h| h.vertex_start < hole.vertex_start);
        self.holes.insert(position, hole);
        Some(range)
    }

    /// Slide live ranges down to close every hole
    ///
    /// Updates the table in place and returns the storage moves the caller
    /// must apply, in order, to the shared buffers. Reservations move whole,
    /// so slack is preserved. Live entries are sorted by vertex and by index
    /// position first, making this O(n log n) in live geometries.
    pub fn compact(&mut self) -> CompactionPlan {
        let reclaimed_vertices = self.holes.iter().map(|h| h.reserved_vertex_count).sum();
        let reclaimed_indices = self.holes.iter().map(|h| h.reserved_index_count).sum();

        let mut by_vertex: Vec<usize> = self.entries.iter().map(|(index, _)| index).collect();
        let mut by_index = by_vertex.clone();
        by_vertex.sort_by_key(|&slot| self.entries.get(slot).map_or(0, |e| e.range.vertex_start));
        by_index.sort_by_key(|&slot| self.entries.get(slot).map_or(0, |e| e.range.index_start));

        let mut plan = CompactionPlan { reclaimed_vertices, reclaimed_indices, ..CompactionPlan::default() };

        let mut cursor = 0;
        for slot in by_vertex {
            if let Some(entry) = self.entries.get_mut(slot) {
                let range = &mut entry.range;
                if range.vertex_start != cursor {
                    plan.vertex_moves.push(RangeMove { src: range.vertex_start, dst: cursor, len: range.reserved_vertex_count });
                    range.vertex_start = cursor;
                }
                cursor += range.reserved_vertex_count;
            }
        }
        self.next_vertex_start = cursor;

        let mut cursor = 0;
        for slot in by_index {
            if let Some(entry) = self.entries.get_mut(slot) {
                let range = &mut entry.range;
                if range.index_start != cursor {
                    plan.index_moves.push(RangeMove { src: range.index_start, dst: cursor, len: range.reserved_index_count });
                    range.index_start = cursor;
                }
                cursor += range.reserved_index_count;
            }
        }
        self.next_index_start = cursor;

        self.holes.clear();
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn append(table: &mut GeometryRangeTable, vertices: usize, indices: usize) -> GeometryRange {
        let placement = table.plan_placement(vertices, indices);
        table.insert(placement, vertices, vertices, indices, indices)
    }

    fn assert_no_overlap(table: &GeometryRangeTable) {
        let ranges: Vec<_> = table.iter().copied().collect();
        for (i, a) in ranges.iter().enumerate() {
            for b in &ranges[i + 1..] {
                assert!(a.vertex_end() <= b.vertex_start || b.vertex_end() <= a.vertex_start, "{a:?} overlaps {b:?}");
                assert!(a.index_end() <= b.index_start || b.index_end() <= a.index_start, "{a:?} overlaps {b:?}");
            }
        }
    }

    #[test]
    fn test_append_assigns_consecutive_spans() {
        let mut table = GeometryRangeTable::new();
        let a = append(&mut table, 10, 30);
        let b = append(&mut table, 5, 6);
        assert_eq!((a.vertex_start, a.index_start), (0, 0));
        assert_eq!((b.vertex_start, b.index_start), (10, 30));
        assert_eq!(table.vertex_high_water(), 15);
        assert_no_overlap(&table);
    }

    #[test]
    fn test_exact_fit_hole_is_reused() {
        let mut table = GeometryRangeTable::new();
        let a = append(&mut table, 10, 10);
        append(&mut table, 20, 20);
        table.remove(a.id);
        assert_eq!(table.hole_count(), 1);

        // Different size appends
        assert_eq!(table.plan_placement(8, 10), Placement::Append);

        let reused = append(&mut table, 10, 10);
        assert_eq!(reused.id, a.id);
        assert_eq!(reused.vertex_start, 0);
        assert_eq!(table.hole_count(), 0);
        assert_no_overlap(&table);
    }

    #[test]
    fn test_compaction_closes_holes_and_is_idempotent() {
        let mut table = GeometryRangeTable::new();
        let a = append(&mut table, 10, 12);
        let b = append(&mut table, 20, 24);
        let c = append(&mut table, 5, 6);
        table.remove(b.id);

        let plan = table.compact();
        assert_eq!(plan.reclaimed_vertices, 20);
        assert_eq!(plan.vertex_moves, vec![RangeMove { src: 30, dst: 10, len: 5 }]);
        assert_eq!(plan.index_moves, vec![RangeMove { src: 36, dst: 12, len: 6 }]);
        assert_eq!(table.get(a.id).map(|r| r.vertex_start), Some(0));
        assert_eq!(table.get(c.id).map(|r| r.vertex_start), Some(10));
        assert_eq!(table.vertex_high_water(), 15);
        assert_eq!(table.hole_count(), 0);

        let layout: Vec<_> = table.iter().copied().collect();
        let second = table.compact();
        assert!(second.vertex_moves.is_empty() && second.index_moves.is_empty());
        assert_eq!(table.iter().copied().collect::<Vec<_>>(), layout);
    }

    #[test]
    fn test_compaction_walks_storage_order_not_id_order() {
        let mut table = GeometryRangeTable::new();
        let a = append(&mut table, 4, 4);
        let b = append(&mut table, 6, 6);
        let c = append(&mut table, 3, 3);
        table.remove(b.id);
        table.remove(a.id);

        // Lowest id lands in the later hole
        let d = append(&mut table, 6, 6);
        assert_eq!((d.id, d.vertex_start), (a.id, 4));

        let plan = table.compact();
        assert_eq!(
            plan.vertex_moves,
            vec![RangeMove { src: 4, dst: 0, len: 6 }, RangeMove { src: 10, dst: 6, len: 3 }]
        );
        assert_eq!(plan.index_moves, plan.vertex_moves);
        assert_eq!(table.get(c.id).map(|r| r.index_start), Some(6));
        assert_no_overlap(&table);
    }

    #[test]
    fn test_sequence_survives_id_reuse() {
        let mut table = GeometryRangeTable::new();
        let a = append(&mut table, 1, 1);
        let b = append(&mut table, 1, 1);
        table.remove(a.id);
        let c = append(&mut table, 2, 2);
        assert_eq!(c.id, a.id);
        assert!(table.sequence(c.id) > table.sequence(b.id));
    }
}
