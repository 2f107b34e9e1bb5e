//! Instance Table
//!
//! Flat per-instance storage addressed by [`InstanceId`]. Records live in a
//! free list so ids stay stable and freed ids are reused lowest-first. The
//! drawable attributes are mirrored into packed, `Pod` arrays sized to the
//! table capacity; every setter marks the touched element dirty so uploads
//! can be partial.

use std::fmt;

use bytemuck::{Pod, Zeroable};

use super::dirty::{DirtyFlags, DirtyRanges};
use super::error::{BatchError, BatchResult, ResourceKind};
use super::range_table::GeometryId;
use crate::foundation::collections::FreeList;
use crate::foundation::math::{Mat4, Mat4Ext, PackedMat4, Vec3};

/// Stable handle of an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(pub u32);

impl InstanceId {
    /// Slot index
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "instance#{}", self.0)
    }
}

/// CPU-side bookkeeping for one live instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceRecord {
    /// Geometry this instance draws
    pub geometry_id: GeometryId,
    /// Hidden instances stay allocated but are skipped when drawing
    pub visible: bool,
    /// Whether frustum culling may skip this instance
    pub frustum_culled: bool,
}

/// Packed per-instance draw info uploaded next to the transforms
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct InstanceInfo {
    /// Geometry id the instance draws
    pub geometry: u32,
    /// 1 when active and visible, 0 otherwise
    pub visible: u32,
}

const WHITE: [f32; 4] = [1.0, 1.0, 1.0, 1.0];

/// Per-instance storage with free-list id reuse
#[derive(Debug)]
pub struct InstanceTable {
    records: FreeList<InstanceRecord>,
    capacity: usize,
    growable: bool,

    transforms: Vec<PackedMat4>,
    /// Allocated on the first `set_color`
    colors: Option<Vec<[f32; 4]>>,
    info: Vec<InstanceInfo>,
    morph_stride: usize,
    morph_weights: Vec<f32>,

    dirty_transforms: DirtyRanges,
    dirty_colors: DirtyRanges,
    dirty_info: DirtyRanges,
    dirty_morph: DirtyRanges,
    resized: bool,
}

impl InstanceTable {
    /// Create a table with `capacity` slots
    pub fn new(capacity: usize, growable: bool, morph_stride: usize) -> Self {
        Self {
            records: FreeList::new(),
            capacity,
            growable,
            transforms: vec![Mat4::identity().to_packed(); capacity],
            colors: None,
            info: vec![InstanceInfo::default(); capacity],
            morph_stride,
            morph_weights: vec![0.0; capacity * morph_stride],
            dirty_transforms: DirtyRanges::new(),
            dirty_colors: DirtyRanges::new(),
            dirty_info: DirtyRanges::new(),
            dirty_morph: DirtyRanges::new(),
            resized: true,
        }
    }

    /// Slot count
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of live instances
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True if no instance is live
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Whether `set_capacity` is allowed
    pub fn is_growable(&self) -> bool {
        self.growable
    }

    /// Morph weights stored per instance
    pub fn morph_stride(&self) -> usize {
        self.morph_stride
    }

    /// Allocate a slot drawing `geometry_id`, reset to identity/white/visible
    pub fn add(&mut self, geometry_id: GeometryId) -> BatchResult<InstanceId> {
        if self.records.next_index() >= self.capacity {
            return Err(BatchError::CapacityExceeded {
                resource: ResourceKind::Instance,
                requested: self.records.len() + 1,
                limit: self.capacity,
            });
        }

        let index = self.records.insert(InstanceRecord { geometry_id, visible: true, frustum_culled: true });

        self.transforms[index] = Mat4::identity().to_packed();
        self.dirty_transforms.mark_index(index);
        if let Some(colors) = &mut self.colors {
            colors[index] = WHITE;
            self.dirty_colors.mark_index(index);
        }
        if self.morph_stride > 0 {
            self.morph_slice_mut(index).fill(0.0);
            self.dirty_morph.mark_index(index);
        }
        self.info[index] = InstanceInfo { geometry: geometry_id.0, visible: 1 };
        self.dirty_info.mark_index(index);

        Ok(InstanceId(index as u32))
    }

    /// Free a slot for reuse
    pub fn remove(&mut self, id: InstanceId) -> BatchResult<InstanceRecord> {
        let record = self.records.remove(id.index()).ok_or(BatchError::invalid_instance(id.0))?;
        self.info[id.index()] = InstanceInfo::default();
        self.dirty_info.mark_index(id.index());
        Ok(record)
    }

    /// Record of a live instance
    pub fn get(&self, id: InstanceId) -> BatchResult<&InstanceRecord> {
        self.records.get(id.index()).ok_or(BatchError::invalid_instance(id.0))
    }

    fn get_mut(&mut self, id: InstanceId) -> BatchResult<&mut InstanceRecord> {
        self.records.get_mut(id.index()).ok_or(BatchError::invalid_instance(id.0))
    }

    /// True if `id` refers to a live instance
    pub fn contains(&self, id: InstanceId) -> bool {
        self.records.contains(id.index())
    }

    /// Live instances in id order
    pub fn iter(&self) -> impl Iterator<Item = (InstanceId, &InstanceRecord)> {
        self.records.iter().map(|(index, record)| (InstanceId(index as u32), record))
    }

    /// Live instances drawing `geometry_id`
    pub fn ids_for_geometry(&self, geometry_id: GeometryId) -> Vec<InstanceId> {
        self.iter()
            .filter(|(_, record)| record.geometry_id == geometry_id)
            .map(|(id, _)| id)
            .collect()
    }

    /// Highest live id
    pub fn highest_live_id(&self) -> Option<InstanceId> {
        self.records.highest_live_index().map(|index| InstanceId(index as u32))
    }

    /// Write a transform
    pub fn set_matrix(&mut self, id: InstanceId, matrix: &Mat4) -> BatchResult<()> {
        self.get(id)?;
        self.transforms[id.index()] = matrix.to_packed();
        self.dirty_transforms.mark_index(id.index());
        Ok(())
    }

    /// Read a transform
    pub fn matrix(&self, id: InstanceId) -> BatchResult<Mat4> {
        self.get(id)?;
        Ok(Mat4::from_packed(&self.transforms[id.index()]))
    }

    /// Write a color, allocating color storage on first use
    pub fn set_color(&mut self, id: InstanceId, color: Vec3) -> BatchResult<()> {
        self.get(id)?;
        if self.colors.is_none() {
            // New backing array: the backend must allocate it and receive every slot
            self.colors = Some(vec![WHITE; self.capacity]);
            self.dirty_colors.mark_dirty(0, self.capacity);
            self.resized = true;
        }
        let Some(colors) = &mut self.colors else {
            return Ok(());
        };
        colors[id.index()] = [color.x, color.y, color.z, 1.0];
        self.dirty_colors.mark_index(id.index());
        Ok(())
    }

    /// Read a color (white when no color was ever set)
    pub fn color(&self, id: InstanceId) -> BatchResult<Vec3> {
        self.get(id)?;
        let [r, g, b, _] = self.colors.as_ref().map_or(WHITE, |colors| colors[id.index()]);
        Ok(Vec3::new(r, g, b))
    }

    /// Show or hide an instance
    pub fn set_visible(&mut self, id: InstanceId, visible: bool) -> BatchResult<()> {
        self.get_mut(id)?.visible = visible;
        self.info[id.index()].visible = u32::from(visible);
        self.dirty_info.mark_index(id.index());
        Ok(())
    }

    /// Opt an instance in or out of frustum culling
    pub fn set_frustum_culled(&mut self, id: InstanceId, culled: bool) -> BatchResult<()> {
        self.get_mut(id)?.frustum_culled = culled;
        Ok(())
    }

    /// Point an instance at another geometry
    pub fn set_geometry(&mut self, id: InstanceId, geometry_id: GeometryId) -> BatchResult<()> {
        self.get_mut(id)?.geometry_id = geometry_id;
        self.info[id.index()].geometry = geometry_id.0;
        self.dirty_info.mark_index(id.index());
        Ok(())
    }

    fn morph_slice_mut(&mut self, index: usize) -> &mut [f32] {
        let start = index * self.morph_stride;
        &mut self.morph_weights[start..start + self.morph_stride]
    }

    /// Write morph weights; missing trailing weights are zeroed
    pub fn set_morph(&mut self, id: InstanceId, weights: &[f32]) -> BatchResult<()> {
        self.get(id)?;
        if weights.len() > self.morph_stride {
            return Err(BatchError::MorphTargetMismatch { expected: self.morph_stride, actual: weights.len() });
        }
        let slot = self.morph_slice_mut(id.index());
        slot[..weights.len()].copy_from_slice(weights);
        slot[weights.len()..].fill(0.0);
        self.dirty_morph.mark_index(id.index());
        Ok(())
    }

    /// Read morph weights (`morph_stride` long)
    pub fn morph(&self, id: InstanceId) -> BatchResult<&[f32]> {
        self.get(id)?;
        let start = id.index() * self.morph_stride;
        Ok(&self.morph_weights[start..start + self.morph_stride])
    }

    /// Check whether the table could be resized to `capacity`
    pub fn check_capacity(&self, capacity: usize) -> BatchResult<()> {
        if !self.growable {
            return Err(BatchError::FixedInstanceCapacity { capacity: self.capacity });
        }
        if let Some(highest) = self.highest_live_id().filter(|id| id.index() >= capacity) {
            return Err(BatchError::InUseIdsBeyondNewCount { requested: capacity, highest_in_use: highest.0 });
        }
        Ok(())
    }

    /// Resize every packed array to `capacity` slots
    pub fn set_capacity(&mut self, capacity: usize) -> BatchResult<()> {
        self.check_capacity(capacity)?;
        if capacity == self.capacity {
            return Ok(());
        }

        let truncated = self.records.truncate(capacity);
        debug_assert!(truncated, "capacity check passed but live slots were cut");

        self.transforms.resize(capacity, Mat4::identity().to_packed());
        if let Some(colors) = &mut self.colors {
            colors.resize(capacity, WHITE);
        }
        self.info.resize(capacity, InstanceInfo::default());
        self.morph_weights.resize(capacity * self.morph_stride, 0.0);

        for dirty in [&mut self.dirty_transforms, &mut self.dirty_colors, &mut self.dirty_info, &mut self.dirty_morph] {
            dirty.clamp(capacity);
        }
        self.capacity = capacity;
        self.resized = true;
        Ok(())
    }

    /// Packed transforms, one column-major matrix per slot
    pub fn transforms(&self) -> &[PackedMat4] {
        &self.transforms
    }

    /// Packed colors, if any color was set
    pub fn colors(&self) -> Option<&[[f32; 4]]> {
        self.colors.as_deref()
    }

    /// Packed geometry/visibility info
    pub fn info(&self) -> &[InstanceInfo] {
        &self.info
    }

    /// Packed morph weights, `morph_stride` per slot
    pub fn morph_weights(&self) -> &[f32] {
        &self.morph_weights
    }

    /// Pending changes as flags
    pub fn dirty_flags(&self) -> DirtyFlags {
        let mut flags = DirtyFlags::empty();
        flags.set(DirtyFlags::TRANSFORMS, !self.dirty_transforms.is_empty());
        flags.set(DirtyFlags::COLORS, !self.dirty_colors.is_empty());
        flags.set(DirtyFlags::INSTANCE_INFO, !self.dirty_info.is_empty());
        flags.set(DirtyFlags::MORPH, !self.dirty_morph.is_empty());
        flags.set(DirtyFlags::INSTANCES_RESIZED, self.resized);
        flags
    }

    /// Dirty transform slots
    pub fn dirty_transforms(&self) -> &DirtyRanges {
        &self.dirty_transforms
    }

    /// Dirty color slots
    pub fn dirty_colors(&self) -> &DirtyRanges {
        &self.dirty_colors
    }

    /// Dirty info slots
    pub fn dirty_info(&self) -> &DirtyRanges {
        &self.dirty_info
    }

    /// Dirty morph slots
    pub fn dirty_morph(&self) -> &DirtyRanges {
        &self.dirty_morph
    }

    /// Forget pending changes after an upload
    pub fn clear_dirty(&mut self) {
        self.dirty_transforms.clear();
        self.dirty_colors.clear();
        self.dirty_info.clear();
        self.dirty_morph.clear();
        self.resized = false;
    }
}
