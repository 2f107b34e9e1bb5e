//! Batch Allocator
//!
//! [`BatchedMesh`] owns the shared buffer store, the geometry range table
//! and the instance table, and is the only way to mutate them. Every
//! operation validates fully before touching any table, so a failed call
//! leaves the batch unchanged.
//!
//! # Usage
//!
//! ```rust
//! use batched_mesh::prelude::*;
//!
//! let mut batch = BatchedMesh::new(BatchConfig::with_capacity(16, 1024, 2048));
//! let quad = GeometryData::from_positions(&[
//!     [0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 1.0, 0.0], [0.0, 1.0, 0.0],
//! ])
//! .with_index(AttributeData::UInt16(vec![0, 1, 2, 0, 2, 3]));
//!
//! let geometry = batch.add_geometry(&quad, None, None)?;
//! let instance = batch.add_instance(geometry)?;
//! batch.set_matrix_at(instance, &Mat4::new_translation(&Vec3::new(2.0, 0.0, 0.0)))?;
//!
//! let draws = batch.build_draw_list(&DrawOptions::default());
//! assert_eq!(draws.descriptors().len(), 1);
//! # Ok::<(), BatchError>(())
//! ```

use super::bounds::{Aabb, BoundingSphere, Frustum};
use super::buffer_store::{CapacityPlan, SharedBufferStore};
use super::dirty::{DirtyFlags, DirtyRanges};
use super::draw::{DrawDescriptorBuilder, DrawList, DrawOptions};
use super::element::GeometryData;
use super::error::{BatchError, BatchResult, ResourceKind};
use super::instance_table::{InstanceId, InstanceInfo, InstanceTable};
use super::range_table::{GeometryId, GeometryRange, GeometryRangeTable, Placement};
use super::upload::{BatchUploader, UploadTarget};
use crate::config::BatchConfig;
use crate::foundation::math::{Mat4, Mat4Ext, PackedMat4, Vec3};

/// Statistics for monitoring batch churn
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchStats {
    /// Geometries registered since creation
    pub geometries_added: u64,
    /// Geometries deleted since creation
    pub geometries_deleted: u64,
    /// Instances created since creation
    pub instances_added: u64,
    /// Instances deleted since creation, cascades included
    pub instances_deleted: u64,
    /// Compaction passes run
    pub optimize_passes: u64,
    /// Shared buffer reallocations
    pub growth_events: u64,
}

/// Many geometries and many instances of each, drawn from shared storage
#[derive(Debug)]
pub struct BatchedMesh {
    config: BatchConfig,
    store: SharedBufferStore,
    ranges: GeometryRangeTable,
    instances: InstanceTable,

    bounding_box: Option<Aabb>,
    bounding_sphere: Option<BoundingSphere>,

    stats: BatchStats,
}

impl BatchedMesh {
    /// Create an empty batch
    pub fn new(config: BatchConfig) -> Self {
        log::info!(
            "Creating BatchedMesh: {} instance slots, {} vertices, {} indices",
            config.max_instance_count,
            config.initial_vertex_capacity,
            config.initial_index_capacity
        );

        Self {
            store: SharedBufferStore::new(&config),
            ranges: GeometryRangeTable::new(),
            instances: InstanceTable::new(
                config.max_instance_count,
                config.growable_instances,
                config.morph_target_count,
            ),
            bounding_box: None,
            bounding_sphere: None,
            stats: BatchStats::default(),
            config,
        }
    }

    /// Configuration the batch was created with
    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    // ---------------------------------------------------------------------
    // Geometry ranges
    // ---------------------------------------------------------------------

    /// Register a geometry and copy its data into shared storage
    ///
    /// `reserved_vertex_count` / `reserved_index_count` default to the
    /// geometry's own size; larger values leave slack for in-place updates
    /// through [`set_geometry_at`](Self::set_geometry_at).
    pub fn add_geometry(
        &mut self,
        geometry: &GeometryData,
        reserved_vertex_count: Option<usize>,
        reserved_index_count: Option<usize>,
    ) -> BatchResult<GeometryId> {
        self.store.validate(geometry)?;

        let vertex_count = geometry.vertex_count();
        let index_count = geometry.index_count();
        let next_id = self.ranges.next_id().0;
        let reserved_vertices = reserved_vertex_count.unwrap_or(vertex_count);
        let reserved_indices = if geometry.index.is_some() {
            reserved_index_count.unwrap_or(index_count)
        } else {
            0
        };

        if vertex_count > reserved_vertices {
            return Err(BatchError::RangeTooSmall {
                geometry_id: next_id,
                resource: ResourceKind::Vertices,
                requested: vertex_count,
                reserved: reserved_vertices,
            });
        }
        if index_count > reserved_indices {
            return Err(BatchError::RangeTooSmall {
                geometry_id: next_id,
                resource: ResourceKind::Indices,
                requested: index_count,
                reserved: reserved_indices,
            });
        }

        let placement = self.ranges.plan_placement(reserved_vertices, reserved_indices);
        let growth = match placement {
            Placement::Hole(_) => None,
            Placement::Append => {
                let (vertices, indices) = self.ranges.append_extent(reserved_vertices, reserved_indices);
                Some(self.store.plan_growth(vertices, indices)?)
            }
        };

        // Validation complete; mutate from here on
        self.store.initialize_layout(geometry);
        if let Some(plan) = growth {
            self.apply_capacity(plan);
        }
        let range = self.ranges.insert(placement, vertex_count, reserved_vertices, index_count, reserved_indices);
        self.store.write_geometry(
            geometry,
            range.vertex_start,
            range.reserved_vertex_count,
            range.index_start,
            range.reserved_index_count,
        );
        self.stats.geometries_added += 1;

        log::trace!(
            "Added {} at vertices {}..{} (reserved {}), indices {}..{} (reserved {})",
            range.id,
            range.vertex_start,
            range.vertex_start + vertex_count,
            reserved_vertices,
            range.index_start,
            range.index_start + index_count,
            reserved_indices
        );
        Ok(range.id)
    }

    /// Replace a geometry's data in place
    ///
    /// Fails with [`BatchError::RangeTooSmall`] if the new data exceeds the
    /// range's reservation; delete and re-add (or reserve more up front) to
    /// grow past it.
    pub fn set_geometry_at(&mut self, geometry_id: GeometryId, geometry: &GeometryData) -> BatchResult<()> {
        let range = *self.ranges.get(geometry_id).ok_or(BatchError::invalid_geometry(geometry_id.0))?;
        self.store.validate(geometry)?;

        let vertex_count = geometry.vertex_count();
        let index_count = geometry.index_count();
        if vertex_count > range.reserved_vertex_count {
            return Err(BatchError::RangeTooSmall {
                geometry_id: geometry_id.0,
                resource: ResourceKind::Vertices,
                requested: vertex_count,
                reserved: range.reserved_vertex_count,
            });
        }
        if index_count > range.reserved_index_count {
            return Err(BatchError::RangeTooSmall {
                geometry_id: geometry_id.0,
                resource: ResourceKind::Indices,
                requested: index_count,
                reserved: range.reserved_index_count,
            });
        }

        self.store.write_geometry(
            geometry,
            range.vertex_start,
            range.reserved_vertex_count,
            range.index_start,
            range.reserved_index_count,
        );
        self.ranges.set_counts(geometry_id, vertex_count, index_count);
        log::trace!("Replaced {} with {} vertices, {} indices", geometry_id, vertex_count, index_count);
        Ok(())
    }

    /// Delete a geometry and every instance drawing it
    ///
    /// The storage span becomes a hole; it is reclaimed by
    /// [`optimize`](Self::optimize) or by an exact-fit `add_geometry`.
    pub fn delete_geometry(&mut self, geometry_id: GeometryId) -> BatchResult<()> {
        if !self.ranges.contains(geometry_id) {
            return Err(BatchError::invalid_geometry(geometry_id.0));
        }

        let orphans = self.instances.ids_for_geometry(geometry_id);
        for &instance_id in &orphans {
            self.instances.remove(instance_id)?;
        }
        self.ranges.remove(geometry_id);

        self.stats.geometries_deleted += 1;
        self.stats.instances_deleted += orphans.len() as u64;
        log::trace!("Deleted {} and {} dependent instances", geometry_id, orphans.len());
        Ok(())
    }

    /// Slide live ranges together to eliminate holes
    ///
    /// Cost is O(n log n) in live geometries for ordering the ranges, plus
    /// the element count actually moved; instance count does not matter.
    pub fn optimize(&mut self) {
        let plan = self.ranges.compact();
        for vertex_move in &plan.vertex_moves {
            self.store.move_vertices(vertex_move.src, vertex_move.dst, vertex_move.len);
        }
        for index_move in &plan.index_moves {
            self.store.move_indices(index_move.src, index_move.dst, index_move.len);
        }
        self.stats.optimize_passes += 1;

        log::debug!(
            "Optimized batch: reclaimed {} vertices and {} indices, moved {} ranges",
            plan.reclaimed_vertices,
            plan.reclaimed_indices,
            plan.vertex_moves.len().max(plan.index_moves.len())
        );
    }

    /// Resize the shared buffers explicitly
    ///
    /// Shrinking below the high-water mark of allocated ranges fails with
    /// [`BatchError::InsufficientUnusedSpace`]; run [`optimize`](Self::optimize)
    /// first to pull trailing holes in.
    pub fn set_geometry_size(&mut self, max_vertex_count: usize, max_index_count: usize) -> BatchResult<()> {
        let vertices_in_use = self.ranges.vertex_high_water();
        if max_vertex_count < vertices_in_use {
            return Err(BatchError::InsufficientUnusedSpace {
                resource: ResourceKind::Vertices,
                requested: max_vertex_count,
                in_use: vertices_in_use,
            });
        }
        let indices_in_use = self.ranges.index_high_water();
        if max_index_count < indices_in_use {
            return Err(BatchError::InsufficientUnusedSpace {
                resource: ResourceKind::Indices,
                requested: max_index_count,
                in_use: indices_in_use,
            });
        }
        self.store.check_resize(max_vertex_count, max_index_count)?;

        self.apply_capacity(CapacityPlan { vertices: max_vertex_count, indices: max_index_count });
        log::info!("Resized batch geometry storage to {} vertices, {} indices", max_vertex_count, max_index_count);
        Ok(())
    }

    fn apply_capacity(&mut self, plan: CapacityPlan) {
        let before = self.store.growth_events();
        self.store.resize(plan);
        self.stats.growth_events += self.store.growth_events() - before;
    }

    /// Storage range of a live geometry
    pub fn get_geometry_range_at(&self, geometry_id: GeometryId) -> Option<GeometryRange> {
        self.ranges.get(geometry_id).copied()
    }

    /// Bounding box of a geometry in its local space, computed lazily
    pub fn get_bounding_box_at(&mut self, geometry_id: GeometryId) -> Option<Aabb> {
        let store = &self.store;
        let entry = self.ranges.entry_mut(geometry_id)?;
        if entry.bounding_box.is_none() {
            entry.bounding_box = Some(geometry_box(store, &entry.range));
        }
        entry.bounding_box
    }

    /// Bounding sphere of a geometry in its local space, computed lazily
    pub fn get_bounding_sphere_at(&mut self, geometry_id: GeometryId) -> Option<BoundingSphere> {
        let aabb = self.get_bounding_box_at(geometry_id)?;
        let store = &self.store;
        let entry = self.ranges.entry_mut(geometry_id)?;
        if entry.bounding_sphere.is_none() {
            let range = entry.range;
            let points = (range.vertex_start..range.vertex_start + range.vertex_count)
                .filter_map(|vertex| store.position(vertex));
            entry.bounding_sphere = Some(BoundingSphere::from_points_around(&aabb, points));
        }
        entry.bounding_sphere
    }

    /// Whether a geometry placed by `matrix` touches `frustum`
    ///
    /// Tests the transformed bounding box, which is tighter than the sphere
    /// for elongated geometry. Geometries without vertices never intersect.
    pub fn geometry_in_frustum_at(&mut self, geometry_id: GeometryId, matrix: &Mat4, frustum: &Frustum) -> Option<bool> {
        let aabb = self.get_bounding_box_at(geometry_id)?;
        Some(frustum.intersects_aabb(&aabb.transformed(matrix)))
    }

    // ---------------------------------------------------------------------
    // Instances
    // ---------------------------------------------------------------------

    /// Create an instance drawing `geometry_id`
    pub fn add_instance(&mut self, geometry_id: GeometryId) -> BatchResult<InstanceId> {
        if !self.ranges.contains(geometry_id) {
            return Err(BatchError::invalid_geometry(geometry_id.0));
        }
        let id = self.instances.add(geometry_id)?;
        self.stats.instances_added += 1;
        log::trace!("Added {} drawing {}", id, geometry_id);
        Ok(id)
    }

    /// Delete an instance, freeing its id for reuse
    pub fn delete_instance(&mut self, instance_id: InstanceId) -> BatchResult<()> {
        self.instances.remove(instance_id)?;
        self.stats.instances_deleted += 1;
        log::trace!("Deleted {}", instance_id);
        Ok(())
    }

    /// Set an instance's local transform
    ///
    /// Mirrored (negative determinant) transforms are unsupported by the
    /// culling and packing math. They are rejected when
    /// `reject_mirrored_transforms` is set and logged otherwise.
    pub fn set_matrix_at(&mut self, instance_id: InstanceId, matrix: &Mat4) -> BatchResult<()> {
        self.instances.get(instance_id)?;
        if matrix.is_mirrored() {
            if self.config.reject_mirrored_transforms {
                return Err(BatchError::MirroredTransform { instance_id: instance_id.0 });
            }
            log::warn!("{} given a mirrored transform; culling and bounds may be wrong", instance_id);
        }
        self.instances.set_matrix(instance_id, matrix)
    }

    /// Get an instance's local transform
    pub fn get_matrix_at(&self, instance_id: InstanceId) -> BatchResult<Mat4> {
        self.instances.matrix(instance_id)
    }

    /// Set an instance's RGB tint
    pub fn set_color_at(&mut self, instance_id: InstanceId, color: Vec3) -> BatchResult<()> {
        self.instances.set_color(instance_id, color)
    }

    /// Get an instance's RGB tint (white if never set)
    pub fn get_color_at(&self, instance_id: InstanceId) -> BatchResult<Vec3> {
        self.instances.color(instance_id)
    }

    /// Show or hide an instance
    pub fn set_visible_at(&mut self, instance_id: InstanceId, visible: bool) -> BatchResult<()> {
        self.instances.set_visible(instance_id, visible)
    }

    /// Whether an instance is visible
    pub fn get_visible_at(&self, instance_id: InstanceId) -> BatchResult<bool> {
        Ok(self.instances.get(instance_id)?.visible)
    }

    /// Opt an instance in or out of frustum culling
    pub fn set_frustum_culled_at(&mut self, instance_id: InstanceId, culled: bool) -> BatchResult<()> {
        self.instances.set_frustum_culled(instance_id, culled)
    }

    /// Whether frustum culling may skip an instance
    pub fn get_frustum_culled_at(&self, instance_id: InstanceId) -> BatchResult<bool> {
        Ok(self.instances.get(instance_id)?.frustum_culled)
    }

    /// Point an instance at another registered geometry
    pub fn set_geometry_id_at(&mut self, instance_id: InstanceId, geometry_id: GeometryId) -> BatchResult<()> {
        self.instances.get(instance_id)?;
        if !self.ranges.contains(geometry_id) {
            return Err(BatchError::invalid_geometry(geometry_id.0));
        }
        self.instances.set_geometry(instance_id, geometry_id)
    }

    /// Geometry an instance draws
    pub fn get_geometry_id_at(&self, instance_id: InstanceId) -> BatchResult<GeometryId> {
        Ok(self.instances.get(instance_id)?.geometry_id)
    }

    /// Set an instance's morph weights
    pub fn set_morph_at(&mut self, instance_id: InstanceId, weights: &[f32]) -> BatchResult<()> {
        self.instances.set_morph(instance_id, weights)
    }

    /// Get an instance's morph weights, padded to the configured count
    pub fn get_morph_at(&self, instance_id: InstanceId) -> BatchResult<&[f32]> {
        self.instances.morph(instance_id)
    }

    /// Resize the instance table (growable tables only)
    pub fn set_instance_count(&mut self, max_instance_count: usize) -> BatchResult<()> {
        self.instances.set_capacity(max_instance_count)?;
        log::info!("Resized instance table to {} slots", max_instance_count);
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------

    /// Live instances
    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    /// Instance slots
    pub fn max_instance_count(&self) -> usize {
        self.instances.capacity()
    }

    /// Live geometries
    pub fn geometry_count(&self) -> usize {
        self.ranges.len()
    }

    /// Unreclaimed holes left by deleted geometries
    pub fn hole_count(&self) -> usize {
        self.ranges.hole_count()
    }

    /// Shared vertex capacity
    pub fn max_vertex_count(&self) -> usize {
        self.store.vertex_capacity()
    }

    /// Shared index capacity
    pub fn max_index_count(&self) -> usize {
        self.store.index_capacity()
    }

    /// Vertex capacity past the high-water mark
    pub fn unused_vertex_count(&self) -> usize {
        self.store.vertex_capacity() - self.ranges.vertex_high_water()
    }

    /// Index capacity past the high-water mark
    pub fn unused_index_count(&self) -> usize {
        self.store.index_capacity() - self.ranges.index_high_water()
    }

    /// Live geometry ranges
    pub fn geometry_ranges(&self) -> impl Iterator<Item = &GeometryRange> {
        self.ranges.iter()
    }

    /// Live instance ids
    pub fn instance_ids(&self) -> impl Iterator<Item = InstanceId> + '_ {
        self.instances.iter().map(|(id, _)| id)
    }

    /// Shared vertex/index storage
    pub fn store(&self) -> &SharedBufferStore {
        &self.store
    }

    /// Per-instance storage
    pub fn instances(&self) -> &InstanceTable {
        &self.instances
    }

    pub(crate) fn range_table(&self) -> &GeometryRangeTable {
        &self.ranges
    }

    /// Churn counters
    pub fn stats(&self) -> &BatchStats {
        &self.stats
    }

    // ---------------------------------------------------------------------
    // Aggregate bounds
    // ---------------------------------------------------------------------

    /// Recompute the box enclosing every live, visible instance
    pub fn compute_bounding_box(&mut self) -> Aabb {
        let mut aabb = Aabb::empty();
        for (instance_id, geometry_id) in self.visible_instances() {
            let (Some(local), Ok(matrix)) = (self.get_bounding_box_at(geometry_id), self.instances.matrix(instance_id)) else {
                continue;
            };
            aabb.union(&local.transformed(&matrix));
        }
        self.bounding_box = Some(aabb);
        aabb
    }

    /// Recompute the sphere enclosing every live, visible instance
    pub fn compute_bounding_sphere(&mut self) -> BoundingSphere {
        let mut sphere = BoundingSphere::empty();
        for (instance_id, geometry_id) in self.visible_instances() {
            let (Some(local), Ok(matrix)) = (self.get_bounding_sphere_at(geometry_id), self.instances.matrix(instance_id)) else {
                continue;
            };
            sphere.union(&local.transformed(&matrix));
        }
        self.bounding_sphere = Some(sphere);
        sphere
    }

    /// Last computed aggregate box; stale until recomputed
    pub fn bounding_box(&self) -> Option<Aabb> {
        self.bounding_box
    }

    /// Last computed aggregate sphere; stale until recomputed
    pub fn bounding_sphere(&self) -> Option<BoundingSphere> {
        self.bounding_sphere
    }

    fn visible_instances(&self) -> Vec<(InstanceId, GeometryId)> {
        self.instances
            .iter()
            .filter(|(_, record)| record.visible)
            .map(|(id, record)| (id, record.geometry_id))
            .collect()
    }

    // ---------------------------------------------------------------------
    // Frame output
    // ---------------------------------------------------------------------

    /// Build this frame's draw list with a one-shot builder
    ///
    /// Render loops should keep a [`DrawDescriptorBuilder`] around instead
    /// to reuse its allocations.
    pub fn build_draw_list(&mut self, options: &DrawOptions) -> DrawList {
        let mut builder = DrawDescriptorBuilder::new();
        builder.build(self, options).clone()
    }

    /// Pending changes across storage and instance arrays
    pub fn dirty_flags(&self) -> DirtyFlags {
        self.store.dirty_flags() | self.instances.dirty_flags()
    }

    /// Forget pending changes without uploading
    pub fn clear_dirty(&mut self) {
        self.store.clear_dirty();
        self.instances.clear_dirty();
    }

    /// Push every dirty span to the backend, then clear dirty state
    ///
    /// Reallocated storage is announced before any writes so the backend
    /// can recreate its buffers at the new size.
    pub fn flush(&mut self, uploader: &mut impl BatchUploader) {
        let flags = self.dirty_flags();
        if flags.is_empty() {
            return;
        }

        if flags.contains(DirtyFlags::STORAGE_RESIZED) {
            for (name, attribute) in self.store.attributes() {
                uploader.reallocate(UploadTarget::VertexAttribute(name), attribute.data.as_bytes().len());
            }
            if let Some(index) = self.store.index() {
                uploader.reallocate(UploadTarget::Index, index.as_bytes().len());
            }
        }
        if flags.contains(DirtyFlags::INSTANCES_RESIZED) {
            let instances = &self.instances;
            uploader.reallocate(UploadTarget::Transforms, bytemuck::cast_slice::<_, u8>(instances.transforms()).len());
            if let Some(colors) = instances.colors() {
                uploader.reallocate(UploadTarget::Colors, bytemuck::cast_slice::<_, u8>(colors).len());
            }
            uploader.reallocate(UploadTarget::InstanceInfo, bytemuck::cast_slice::<_, u8>(instances.info()).len());
            uploader.reallocate(UploadTarget::MorphWeights, bytemuck::cast_slice::<_, u8>(instances.morph_weights()).len());
        }

        let storage_resized = flags.contains(DirtyFlags::STORAGE_RESIZED);
        for (name, attribute) in self.store.attributes() {
            let stride = attribute.item_size * attribute.data.element_type().byte_size();
            let target = UploadTarget::VertexAttribute(name);
            upload_spans(uploader, target, attribute.data.as_bytes(), stride, storage_resized, self.store.dirty_vertices());
        }
        if let Some(index) = self.store.index() {
            let stride = index.element_type().byte_size();
            upload_spans(uploader, UploadTarget::Index, index.as_bytes(), stride, storage_resized, self.store.dirty_indices());
        }

        let instances_resized = flags.contains(DirtyFlags::INSTANCES_RESIZED);
        let instances = &self.instances;
        upload_spans(
            uploader,
            UploadTarget::Transforms,
            bytemuck::cast_slice(instances.transforms()),
            std::mem::size_of::<PackedMat4>(),
            instances_resized,
            instances.dirty_transforms(),
        );
        if let Some(colors) = instances.colors() {
            upload_spans(
                uploader,
                UploadTarget::Colors,
                bytemuck::cast_slice(colors),
                std::mem::size_of::<[f32; 4]>(),
                instances_resized,
                instances.dirty_colors(),
            );
        }
        upload_spans(
            uploader,
            UploadTarget::InstanceInfo,
            bytemuck::cast_slice(instances.info()),
            std::mem::size_of::<InstanceInfo>(),
            instances_resized,
            instances.dirty_info(),
        );
        upload_spans(
            uploader,
            UploadTarget::MorphWeights,
            bytemuck::cast_slice(instances.morph_weights()),
            instances.morph_stride() * std::mem::size_of::<f32>(),
            instances_resized,
            instances.dirty_morph(),
        );

        log::trace!("Flushed batch uploads: {:?}", flags);
        self.clear_dirty();
    }
}

/// Write the dirty element spans of one array, or all of it after a reallocation
fn upload_spans(
    uploader: &mut impl BatchUploader,
    target: UploadTarget<'_>,
    bytes: &[u8],
    stride: usize,
    full: bool,
    dirty: &DirtyRanges,
) {
    if stride == 0 || bytes.is_empty() {
        return;
    }
    if full {
        uploader.write(target, 0, bytes);
        return;
    }
    for span in dirty.iter() {
        let start = span.start * stride;
        let end = (span.end * stride).min(bytes.len());
        if start < end {
            uploader.write(target, start, &bytes[start..end]);
        }
    }
}

/// Local-space box over a range's current vertices
fn geometry_box(store: &SharedBufferStore, range: &GeometryRange) -> Aabb {
    Aabb::from_points(
        (range.vertex_start..range.vertex_start + range.vertex_count).filter_map(|vertex| store.position(vertex)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::element::{AttributeData, VertexAttribute};
    use crate::foundation::math::Point3;
    use approx::assert_relative_eq;

    fn strip(vertices: usize) -> GeometryData {
        let positions: Vec<[f32; 3]> = (0..vertices).map(|i| [i as f32, 0.0, 0.0]).collect();
        let indices = (0..vertices as u32).collect();
        GeometryData::from_positions(&positions).with_index(AttributeData::UInt32(indices))
    }

    fn batch() -> BatchedMesh {
        BatchedMesh::new(BatchConfig::with_capacity(8, 64, 64))
    }

    #[test]
    fn test_add_geometry_grows_storage() {
        let mut batch = batch();
        let a = batch.add_geometry(&strip(50), None, None).expect("fits");
        let b = batch.add_geometry(&strip(50), None, None).expect("grows");

        assert_eq!(batch.get_geometry_range_at(b).map(|r| r.vertex_start), Some(50));
        assert_eq!(batch.max_vertex_count(), 128);
        assert_eq!(batch.stats().growth_events, 1);
        assert!(batch.dirty_flags().contains(DirtyFlags::STORAGE_RESIZED));
        assert_ne!(a, b);
    }

    #[test]
    fn test_hard_cap_failure_leaves_batch_unchanged() {
        let config = BatchConfig { max_vertex_capacity: Some(64), ..BatchConfig::with_capacity(8, 64, 64) };
        let mut batch = BatchedMesh::new(config);
        batch.add_geometry(&strip(40), None, None).expect("fits");

        let err = batch.add_geometry(&strip(40), None, None).unwrap_err();
        assert_eq!(err, BatchError::CapacityExceeded { resource: ResourceKind::Vertices, requested: 80, limit: 64 });
        assert_eq!(batch.geometry_count(), 1);
        assert_eq!(batch.unused_vertex_count(), 24);
        assert_eq!(batch.max_vertex_count(), 64);
    }

    #[test]
    fn test_reservation_smaller_than_data_rejected() {
        let mut batch = batch();
        let err = batch.add_geometry(&strip(10), Some(5), None).unwrap_err();
        assert!(matches!(err, BatchError::RangeTooSmall { resource: ResourceKind::Vertices, requested: 10, reserved: 5, .. }));
        assert_eq!(batch.geometry_count(), 0);
    }

    #[test]
    fn test_set_geometry_at_zero_fills_tail_and_refreshes_bounds() {
        let mut batch = batch();
        let id = batch.add_geometry(&strip(6), Some(10), Some(10)).expect("add");
        assert_relative_eq!(batch.get_bounding_box_at(id).expect("bounds").max.x, 5.0);

        batch.set_geometry_at(id, &strip(3)).expect("fits reservation");
        let range = batch.get_geometry_range_at(id).expect("live");
        assert_eq!((range.vertex_count, range.index_count), (3, 3));
        assert_eq!(batch.store().position(range.vertex_start + 4), Some(Vec3::zeros()));
        assert_relative_eq!(batch.get_bounding_box_at(id).expect("bounds").max.x, 2.0);
    }

    #[test]
    fn test_set_geometry_size_rules() {
        let config = BatchConfig { max_index_capacity: Some(100), ..BatchConfig::with_capacity(8, 64, 64) };
        let mut batch = BatchedMesh::new(config);
        batch.add_geometry(&strip(20), None, None).expect("add");

        batch.set_geometry_size(20, 20).expect("exact fit");
        assert_eq!(batch.unused_vertex_count(), 0);

        assert!(matches!(
            batch.set_geometry_size(200, 200),
            Err(BatchError::CapacityExceeded { resource: ResourceKind::Indices, .. })
        ));
        assert_eq!(batch.max_vertex_count(), 20);
    }

    #[test]
    fn test_layout_mismatch_rejected() {
        let mut batch = batch();
        batch.add_geometry(&strip(3), None, None).expect("add");
        let with_normals = strip(3)
            .with_attribute("normal", VertexAttribute::new(3, AttributeData::Float32(vec![0.0; 9])));
        assert!(matches!(
            batch.add_geometry(&with_normals, None, None),
            Err(BatchError::AttributeMismatch { .. })
        ));
        let unindexed = GeometryData::from_positions(&[[0.0; 3]]);
        assert_eq!(batch.add_geometry(&unindexed, None, None), Err(BatchError::MissingIndex));
    }

    #[test]
    fn test_instances_require_live_geometry() {
        let mut batch = batch();
        let geometry = batch.add_geometry(&strip(3), None, None).expect("add");
        let instance = batch.add_instance(geometry).expect("instance");

        assert_eq!(batch.add_instance(GeometryId(9)), Err(BatchError::invalid_geometry(9)));
        assert_eq!(
            batch.set_geometry_id_at(instance, GeometryId(9)),
            Err(BatchError::invalid_geometry(9))
        );
        assert_eq!(batch.get_geometry_id_at(instance), Ok(geometry));
    }

    #[test]
    fn test_mirrored_transform_policy() {
        let mirror = Mat4::new_nonuniform_scaling(&Vec3::new(-1.0, 1.0, 1.0));

        let mut lenient = batch();
        let g = lenient.add_geometry(&strip(3), None, None).expect("add");
        let i = lenient.add_instance(g).expect("instance");
        lenient.set_matrix_at(i, &mirror).expect("accepted with a warning");
        assert_eq!(lenient.get_matrix_at(i), Ok(mirror));

        let config = BatchConfig { reject_mirrored_transforms: true, ..BatchConfig::with_capacity(8, 64, 64) };
        let mut strict = BatchedMesh::new(config);
        let g = strict.add_geometry(&strip(3), None, None).expect("add");
        let i = strict.add_instance(g).expect("instance");
        assert_eq!(strict.set_matrix_at(i, &mirror), Err(BatchError::MirroredTransform { instance_id: i.0 }));
        assert_eq!(strict.get_matrix_at(i), Ok(Mat4::identity()));
    }

    #[test]
    fn test_aggregate_bounds_skip_hidden_instances() {
        let mut batch = batch();
        let geometry = batch.add_geometry(&strip(2), None, None).expect("add");
        let near = batch.add_instance(geometry).expect("instance");
        let far = batch.add_instance(geometry).expect("instance");
        batch.set_matrix_at(far, &Mat4::new_translation(&Vec3::new(100.0, 0.0, 0.0))).expect("matrix");
        batch.set_visible_at(far, false).expect("hide");

        let aabb = batch.compute_bounding_box();
        assert_relative_eq!(aabb.max.x, 1.0);

        // Stale until recomputed
        batch.set_visible_at(far, true).expect("show");
        assert_eq!(batch.bounding_box(), Some(aabb));
        assert_relative_eq!(batch.compute_bounding_box().max.x, 101.0);

        let sphere = batch.compute_bounding_sphere();
        assert!(sphere.radius >= 50.0);
        assert!(batch.get_visible_at(near).expect("live"));
    }

    #[test]
    fn test_geometry_frustum_query_uses_placed_box() {
        let projection = Mat4::new_perspective(1.0, std::f32::consts::FRAC_PI_2, 0.1, 100.0);
        let view = Mat4::look_at_rh(&Point3::new(0.0, 0.0, 10.0), &Point3::origin(), &Vec3::y());
        let frustum = Frustum::from_matrix(&(projection * view));

        let mut batch = batch();
        let g = batch.add_geometry(&strip(4), None, None).expect("add");
        assert_eq!(batch.geometry_in_frustum_at(g, &Mat4::identity(), &frustum), Some(true));
        let far_left = Mat4::new_translation(&Vec3::new(-80.0, 0.0, 0.0));
        assert_eq!(batch.geometry_in_frustum_at(g, &far_left, &frustum), Some(false));

        batch.delete_geometry(g).expect("delete");
        assert_eq!(batch.geometry_in_frustum_at(g, &Mat4::identity(), &frustum), None);
    }

    #[test]
    fn test_empty_geometry_rejected_and_layout_left_open() {
        let mut batch = batch();
        assert!(matches!(
            batch.add_geometry(&GeometryData::new(), None, None),
            Err(BatchError::AttributeMismatch { .. })
        ));
        assert_eq!(batch.geometry_count(), 0);
        assert_eq!(batch.store().is_indexed(), None);

        batch.optimize();
        batch.add_geometry(&strip(3), None, None).expect("layout still open");
        assert_eq!(batch.store().is_indexed(), Some(true));
    }
}
