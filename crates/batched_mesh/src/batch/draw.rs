//! Draw Descriptor Builder
//!
//! Turns the live state of a [`BatchedMesh`] into the per-frame list of
//! draws: one descriptor per run of consecutive instances sharing a
//! geometry, after visibility, optional frustum culling and sorting.
//!
//! The instance order inside a [`DrawList`] is the order the backend should
//! lay out per-draw instance data (or an instance-id indirection buffer);
//! `first_instance` indexes into it.

use std::cmp::Ordering;
use std::fmt;

use bytemuck::{Pod, Zeroable};

use super::allocator::BatchedMesh;
use super::bounds::Frustum;
use super::instance_table::{InstanceId, InstanceRecord};
use super::range_table::GeometryId;
use crate::foundation::math::{Mat4Ext, Vec3};

/// One draw call over a geometry range and a contiguous instance run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawDescriptor {
    /// Geometry drawn
    pub geometry_id: GeometryId,
    /// First vertex of the range; also the base vertex for indexed draws
    pub vertex_start: usize,
    /// Vertices holding data
    pub vertex_count: usize,
    /// First index of the range (indexed batches only)
    pub index_start: usize,
    /// Indices holding data (indexed batches only)
    pub index_count: usize,
    /// Whether the batch draws with indices
    pub indexed: bool,
    /// Offset of this run in [`DrawList::instance_ids`]
    pub first_instance: usize,
    /// Instances in the run
    pub instance_count: usize,
}

/// GPU layout of an indexed indirect draw
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct DrawIndexedIndirectArgs {
    /// Index count
    pub index_count: u32,
    /// Instance count
    pub instance_count: u32,
    /// First index
    pub first_index: u32,
    /// Vertex offset added to every index
    pub vertex_offset: i32,
    /// First instance
    pub first_instance: u32,
}

/// GPU layout of a non-indexed indirect draw
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct DrawIndirectArgs {
    /// Vertex count
    pub vertex_count: u32,
    /// Instance count
    pub instance_count: u32,
    /// First vertex
    pub first_vertex: u32,
    /// First instance
    pub first_instance: u32,
}

impl DrawDescriptor {
    /// Elements the draw consumes (indices or vertices)
    pub fn element_count(&self) -> usize {
        if self.indexed { self.index_count } else { self.vertex_count }
    }

    /// Indirect arguments for an indexed batch
    ///
    /// `None` for non-indexed batches or when a value does not fit the
    /// 32-bit argument layout.
    pub fn indexed_indirect(&self) -> Option<DrawIndexedIndirectArgs> {
        if !self.indexed {
            return None;
        }
        Some(DrawIndexedIndirectArgs {
            index_count: u32::try_from(self.index_count).ok()?,
            instance_count: u32::try_from(self.instance_count).ok()?,
            first_index: u32::try_from(self.index_start).ok()?,
            vertex_offset: i32::try_from(self.vertex_start).ok()?,
            first_instance: u32::try_from(self.first_instance).ok()?,
        })
    }

    /// Indirect arguments for a non-indexed batch
    ///
    /// `None` for indexed batches or when a value does not fit in 32 bits.
    pub fn indirect(&self) -> Option<DrawIndirectArgs> {
        if self.indexed {
            return None;
        }
        Some(DrawIndirectArgs {
            vertex_count: u32::try_from(self.vertex_count).ok()?,
            instance_count: u32::try_from(self.instance_count).ok()?,
            first_vertex: u32::try_from(self.vertex_start).ok()?,
            first_instance: u32::try_from(self.first_instance).ok()?,
        })
    }
}

/// Result of one build: descriptors plus the instance order they index
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrawList {
    descriptors: Vec<DrawDescriptor>,
    instance_ids: Vec<InstanceId>,
    culled: usize,
    hidden: usize,
}

impl DrawList {
    /// Draw descriptors in submission order
    pub fn descriptors(&self) -> &[DrawDescriptor] {
        &self.descriptors
    }

    /// Every drawn instance, grouped by descriptor
    pub fn instance_ids(&self) -> &[InstanceId] {
        &self.instance_ids
    }

    /// Instances drawn by one descriptor of this list
    pub fn instances_of(&self, descriptor: &DrawDescriptor) -> &[InstanceId] {
        let end = (descriptor.first_instance + descriptor.instance_count).min(self.instance_ids.len());
        &self.instance_ids[descriptor.first_instance.min(end)..end]
    }

    /// Instances that will be drawn
    pub fn total_instances(&self) -> usize {
        self.instance_ids.len()
    }

    /// Visible instances skipped by frustum culling
    pub fn culled_count(&self) -> usize {
        self.culled
    }

    /// Instances skipped because they are hidden
    pub fn hidden_count(&self) -> usize {
        self.hidden
    }

    /// True if nothing is drawn
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    fn clear(&mut self) {
        self.descriptors.clear();
        self.instance_ids.clear();
        self.culled = 0;
        self.hidden = 0;
    }
}

/// Per-instance sort input
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawItem {
    /// Instance being drawn
    pub instance_id: InstanceId,
    /// Its geometry
    pub geometry_id: GeometryId,
    /// Registration order of the geometry
    pub sequence: u64,
    /// Distance along the view direction (0 without a viewpoint)
    pub depth: f32,
}

/// Camera position used for depth sorting
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewPoint {
    /// Eye position
    pub position: Vec3,
    /// View direction; zero sorts by plain distance
    pub forward: Vec3,
}

impl ViewPoint {
    /// Viewpoint looking along `forward`
    pub fn new(position: Vec3, forward: Vec3) -> Self {
        Self { position, forward }
    }

    /// Depth of a world-space point
    pub fn depth_of(&self, point: Vec3) -> f32 {
        let offset = point - self.position;
        match self.forward.try_normalize(f32::EPSILON) {
            Some(direction) => offset.dot(&direction),
            None => offset.magnitude(),
        }
    }
}

/// Instance ordering inside the draw list
#[derive(Default)]
pub enum DrawOrder {
    /// Group by geometry in registration order, then by instance id
    #[default]
    ByGeometry,
    /// Nearest first (opaque overdraw reduction)
    FrontToBack,
    /// Farthest first (transparency)
    BackToFront,
    /// Caller-supplied comparator
    Custom(Box<dyn Fn(&DrawItem, &DrawItem) -> Ordering>),
}

impl fmt::Debug for DrawOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DrawOrder::ByGeometry => write!(f, "ByGeometry"),
            DrawOrder::FrontToBack => write!(f, "FrontToBack"),
            DrawOrder::BackToFront => write!(f, "BackToFront"),
            DrawOrder::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// Per-frame build parameters
#[derive(Debug, Default)]
pub struct DrawOptions {
    /// Cull against this frustum when set
    pub frustum: Option<Frustum>,
    /// Depth reference for sorting
    pub viewpoint: Option<ViewPoint>,
    /// Instance ordering
    pub order: DrawOrder,
}

impl DrawOptions {
    /// Cull against `frustum`
    pub fn with_frustum(mut self, frustum: Frustum) -> Self {
        self.frustum = Some(frustum);
        self
    }

    /// Sort by depth from `viewpoint` in `order`
    pub fn sorted(mut self, viewpoint: ViewPoint, order: DrawOrder) -> Self {
        self.viewpoint = Some(viewpoint);
        self.order = order;
        self
    }
}

/// Reusable builder; keeps its allocations between frames
#[derive(Debug, Default)]
pub struct DrawDescriptorBuilder {
    candidates: Vec<(InstanceId, InstanceRecord)>,
    items: Vec<DrawItem>,
    list: DrawList,
}

impl DrawDescriptorBuilder {
    /// Create a builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recent list
    pub fn list(&self) -> &DrawList {
        &self.list
    }

    /// Build this frame's draw list
    ///
    /// Takes the batch mutably only to fill per-geometry bounds caches when
    /// culling needs them.
    pub fn build(&mut self, batch: &mut BatchedMesh, options: &DrawOptions) -> &DrawList {
        self.items.clear();
        self.list.clear();

        let cull_enabled = options.frustum.is_some() && batch.config().per_object_frustum_culled;
        self.candidates.clear();
        self.candidates.extend(batch.instances().iter().map(|(id, record)| (id, *record)));

        for &(instance_id, record) in &self.candidates {
            if !record.visible {
                self.list.hidden += 1;
                continue;
            }
            let Some(sequence) = batch.range_table().sequence(record.geometry_id) else {
                continue;
            };
            let Ok(matrix) = batch.get_matrix_at(instance_id) else {
                continue;
            };

            if let (true, true, Some(frustum)) = (cull_enabled, record.frustum_culled, &options.frustum) {
                let world = batch
                    .get_bounding_sphere_at(record.geometry_id)
                    .filter(|sphere| !sphere.is_empty())
                    .map(|sphere| sphere.transformed(&matrix));
                // Sphere rejects cheaply; the placed box settles the rest
                let outside = match world {
                    Some(sphere) if !frustum.intersects_sphere(&sphere) => true,
                    Some(_) => batch.geometry_in_frustum_at(record.geometry_id, &matrix, frustum) == Some(false),
                    None => false,
                };
                if outside {
                    self.list.culled += 1;
                    continue;
                }
            }

            let depth = options.viewpoint.map_or(0.0, |view| view.depth_of(matrix.translation()));
            self.items.push(DrawItem { instance_id, geometry_id: record.geometry_id, sequence, depth });
        }

        sort_items(&mut self.items, &options.order);
        self.merge_runs(batch);

        log::trace!(
            "Built draw list: {} descriptors, {} instances, {} culled, {} hidden",
            self.list.descriptors.len(),
            self.list.instance_ids.len(),
            self.list.culled,
            self.list.hidden
        );
        &self.list
    }

    fn merge_runs(&mut self, batch: &BatchedMesh) {
        let indexed = batch.store().is_indexed().unwrap_or(false);

        for item in &self.items {
            if let Some(last) = self.list.descriptors.last_mut() {
                if last.geometry_id == item.geometry_id {
                    last.instance_count += 1;
                    self.list.instance_ids.push(item.instance_id);
                    continue;
                }
            }

            let Some(range) = batch.get_geometry_range_at(item.geometry_id) else {
                continue;
            };
            let descriptor = DrawDescriptor {
                geometry_id: range.id,
                vertex_start: range.vertex_start,
                vertex_count: range.vertex_count,
                index_start: range.index_start,
                index_count: range.index_count,
                indexed,
                first_instance: self.list.instance_ids.len(),
                instance_count: 1,
            };
            // Nothing to rasterize
            if descriptor.element_count() == 0 {
                continue;
            }
            self.list.descriptors.push(descriptor);
            self.list.instance_ids.push(item.instance_id);
        }
    }
}

fn by_geometry(a: &DrawItem, b: &DrawItem) -> Ordering {
    a.sequence.cmp(&b.sequence).then(a.instance_id.cmp(&b.instance_id))
}

fn sort_items(items: &mut [DrawItem], order: &DrawOrder) {
    match order {
        DrawOrder::ByGeometry => items.sort_by(by_geometry),
        DrawOrder::FrontToBack => items.sort_by(|a, b| {
            a.depth.partial_cmp(&b.depth).unwrap_or(Ordering::Equal).then_with(|| by_geometry(a, b))
        }),
        DrawOrder::BackToFront => items.sort_by(|a, b| {
            b.depth.partial_cmp(&a.depth).unwrap_or(Ordering::Equal).then_with(|| by_geometry(a, b))
        }),
        DrawOrder::Custom(compare) => items.sort_by(|a, b| compare(a, b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::element::{AttributeData, GeometryData};
    use crate::config::BatchConfig;
    use crate::foundation::math::{Mat4, Point3};

    fn triangle() -> GeometryData {
        GeometryData::from_positions(&[[-0.5, -0.5, 0.0], [0.5, -0.5, 0.0], [0.0, 0.5, 0.0]])
            .with_index(AttributeData::UInt32(vec![0, 1, 2]))
    }

    fn place(batch: &mut BatchedMesh, geometry: GeometryId, x: f32, z: f32) -> InstanceId {
        let id = batch.add_instance(geometry).expect("instance");
        batch.set_matrix_at(id, &Mat4::new_translation(&Vec3::new(x, 0.0, z))).expect("matrix");
        id
    }

    fn camera_frustum() -> Frustum {
        let projection = Mat4::new_perspective(1.0, std::f32::consts::FRAC_PI_2, 0.1, 100.0);
        let view = Mat4::look_at_rh(&Point3::new(0.0, 0.0, 10.0), &Point3::origin(), &Vec3::y());
        Frustum::from_matrix(&(projection * view))
    }

    #[test]
    fn test_runs_merge_per_geometry_in_registration_order() {
        let mut batch = BatchedMesh::new(BatchConfig::default());
        let a = batch.add_geometry(&triangle(), None, None).expect("a");
        let b = batch.add_geometry(&triangle(), None, None).expect("b");
        let b0 = place(&mut batch, b, 0.0, 0.0);
        let a0 = place(&mut batch, a, 1.0, 0.0);
        let a1 = place(&mut batch, a, 2.0, 0.0);

        let list = batch.build_draw_list(&DrawOptions::default());
        assert_eq!(list.descriptors().len(), 2);
        assert_eq!(list.descriptors()[0].geometry_id, a);
        assert_eq!(list.instances_of(&list.descriptors()[0]), &[a0, a1]);
        assert_eq!(list.instances_of(&list.descriptors()[1]), &[b0]);

        let args = list.descriptors()[1].indexed_indirect().expect("indexed");
        assert_eq!(args, DrawIndexedIndirectArgs {
            index_count: 3,
            instance_count: 1,
            first_index: 3,
            vertex_offset: 3,
            first_instance: 2,
        });
        assert_eq!(list.descriptors()[1].indirect(), None);
    }

    #[test]
    fn test_frustum_culling_respects_toggles() {
        let mut batch = BatchedMesh::new(BatchConfig::default());
        let g = batch.add_geometry(&triangle(), None, None).expect("geometry");
        let inside = place(&mut batch, g, 0.0, 0.0);
        let outside = place(&mut batch, g, 500.0, 0.0);

        let options = DrawOptions::default().with_frustum(camera_frustum());
        let list = batch.build_draw_list(&options);
        assert_eq!(list.instance_ids(), &[inside]);
        assert_eq!(list.culled_count(), 1);

        batch.set_frustum_culled_at(outside, false).expect("toggle");
        let list = batch.build_draw_list(&options);
        assert_eq!(list.instance_ids(), &[inside, outside]);
        assert_eq!(list.culled_count(), 0);

        let mut no_cull = BatchedMesh::new(BatchConfig { per_object_frustum_culled: false, ..BatchConfig::default() });
        let g = no_cull.add_geometry(&triangle(), None, None).expect("geometry");
        place(&mut no_cull, g, 500.0, 0.0);
        assert_eq!(no_cull.build_draw_list(&options).total_instances(), 1);
    }

    #[test]
    fn test_box_culls_what_the_sphere_lets_through() {
        let mut batch = BatchedMesh::new(BatchConfig::default());
        let rod = GeometryData::from_positions(&[[-50.0, 0.0, 0.0], [50.0, 0.0, 0.0], [0.0, 0.0, 0.0]])
            .with_index(AttributeData::UInt32(vec![0, 1, 2]));
        let g = batch.add_geometry(&rod, None, None).expect("rod");
        let above = batch.add_instance(g).expect("instance");
        let matrix = Mat4::new_translation(&Vec3::new(0.0, 30.0, 0.0));
        batch.set_matrix_at(above, &matrix).expect("matrix");

        let frustum = camera_frustum();
        let sphere = batch.get_bounding_sphere_at(g).expect("sphere").transformed(&matrix);
        assert!(frustum.intersects_sphere(&sphere));

        let list = batch.build_draw_list(&DrawOptions::default().with_frustum(frustum));
        assert!(list.instance_ids().is_empty());
        assert_eq!(list.culled_count(), 1);
    }

    #[test]
    fn test_builder_reuses_candidate_buffer() {
        let mut batch = BatchedMesh::new(BatchConfig::default());
        let g = batch.add_geometry(&triangle(), None, None).expect("geometry");
        let ids: Vec<InstanceId> = (0..6).map(|i| place(&mut batch, g, i as f32, 0.0)).collect();

        let mut builder = DrawDescriptorBuilder::new();
        builder.build(&mut batch, &DrawOptions::default());
        let buffer = builder.candidates.as_ptr();
        let capacity = builder.candidates.capacity();

        batch.delete_instance(ids[4]).expect("delete");
        let list = builder.build(&mut batch, &DrawOptions::default());
        assert_eq!(list.total_instances(), 5);
        assert_eq!(builder.candidates.as_ptr(), buffer);
        assert_eq!(builder.candidates.capacity(), capacity);
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_indirect_args_reject_values_past_32_bits() {
        let descriptor = DrawDescriptor {
            geometry_id: GeometryId(0),
            vertex_start: 0,
            vertex_count: 3,
            index_start: 0,
            index_count: u32::MAX as usize + 1,
            indexed: true,
            first_instance: 0,
            instance_count: 1,
        };
        assert_eq!(descriptor.indexed_indirect(), None);

        let shifted = DrawDescriptor { index_count: 3, vertex_start: i32::MAX as usize + 1, ..descriptor };
        assert_eq!(shifted.indexed_indirect(), None);

        let flat = DrawDescriptor { indexed: false, vertex_start: u32::MAX as usize, ..descriptor };
        assert_eq!(
            flat.indirect(),
            Some(DrawIndirectArgs { vertex_count: 3, instance_count: 1, first_vertex: u32::MAX, first_instance: 0 })
        );
    }

    #[test]
    fn test_depth_sorting_splits_runs() {
        let mut batch = BatchedMesh::new(BatchConfig::default());
        let a = batch.add_geometry(&triangle(), None, None).expect("a");
        let b = batch.add_geometry(&triangle(), None, None).expect("b");
        let near_a = place(&mut batch, a, 0.0, 5.0);
        let far_a = place(&mut batch, a, 0.0, -5.0);
        let mid_b = place(&mut batch, b, 0.0, 0.0);

        let view = ViewPoint::new(Vec3::new(0.0, 0.0, 10.0), Vec3::new(0.0, 0.0, -1.0));
        let mut builder = DrawDescriptorBuilder::new();

        let list = builder.build(&mut batch, &DrawOptions::default().sorted(view, DrawOrder::BackToFront));
        assert_eq!(list.instance_ids(), &[far_a, mid_b, near_a]);
        assert_eq!(list.descriptors().len(), 3);

        let list = builder.build(&mut batch, &DrawOptions::default().sorted(view, DrawOrder::FrontToBack));
        assert_eq!(list.instance_ids(), &[near_a, mid_b, far_a]);
    }

    #[test]
    fn test_custom_comparator() {
        let mut batch = BatchedMesh::new(BatchConfig::default());
        let g = batch.add_geometry(&triangle(), None, None).expect("geometry");
        let first = place(&mut batch, g, 0.0, 0.0);
        let second = place(&mut batch, g, 0.0, 0.0);

        let options = DrawOptions {
            order: DrawOrder::Custom(Box::new(|a, b| b.instance_id.cmp(&a.instance_id))),
            ..DrawOptions::default()
        };
        let list = batch.build_draw_list(&options);
        assert_eq!(list.instance_ids(), &[second, first]);
        assert_eq!(list.descriptors().len(), 1);
    }

    #[test]
    fn test_viewpoint_depth_without_direction() {
        let view = ViewPoint::new(Vec3::zeros(), Vec3::zeros());
        assert!((view.depth_of(Vec3::new(3.0, 4.0, 0.0)) - 5.0).abs() < 1e-6);
    }
}
