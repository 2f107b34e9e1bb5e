//! Shared Buffer Store
//!
//! Growable linear buffers holding the concatenated data of every geometry
//! in the batch: one array per named vertex attribute plus one index array.
//! The attribute layout (names, item sizes, element types) is taken from
//! the first geometry written and enforced for every later one.
//!
//! Offsets here are in elements of the logical vertex/index space; attribute
//! arrays multiply by their item size internally.

use std::collections::BTreeMap;

use super::dirty::{DirtyFlags, DirtyRanges};
use super::element::{AttributeData, ElementType, GeometryData, VertexAttribute};
use super::error::{BatchError, BatchResult, ResourceKind};
use crate::config::{BatchConfig, IndexFormat};
use crate::foundation::math::Vec3;

/// Shared vertex and index storage for one batch
#[derive(Debug)]
pub struct SharedBufferStore {
    /// Shared attribute arrays, each `vertex_capacity * item_size` long
    attributes: BTreeMap<String, VertexAttribute>,
    /// Shared index array, `index_capacity` long (`None` until indexed data arrives)
    index: Option<AttributeData>,
    /// Set once the first geometry fixes the layout
    layout: Option<Layout>,

    vertex_capacity: usize,
    index_capacity: usize,
    max_vertex_capacity: Option<usize>,
    max_index_capacity: Option<usize>,
    index_format: IndexFormat,

    dirty_vertices: DirtyRanges,
    dirty_indices: DirtyRanges,
    resized: bool,
    growth_events: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Layout {
    indexed: bool,
}

/// Capacities a store should move to; produced by planning, applied by `resize`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityPlan {
    /// New vertex capacity
    pub vertices: usize,
    /// New index capacity
    pub indices: usize,
}

impl SharedBufferStore {
    /// Create an empty store sized from the config
    pub fn new(config: &BatchConfig) -> Self {
        Self {
            attributes: BTreeMap::new(),
            index: None,
            layout: None,
            vertex_capacity: config.initial_vertex_capacity,
            index_capacity: config.initial_index_capacity,
            max_vertex_capacity: config.max_vertex_capacity,
            max_index_capacity: config.max_index_capacity,
            index_format: config.index_format,
            dirty_vertices: DirtyRanges::new(),
            dirty_indices: DirtyRanges::new(),
            resized: false,
            growth_events: 0,
        }
    }

    /// Current vertex capacity
    pub fn vertex_capacity(&self) -> usize {
        self.vertex_capacity
    }

    /// Current index capacity
    pub fn index_capacity(&self) -> usize {
        self.index_capacity
    }

    /// Whether geometries in this batch carry indices (`None` before the first geometry)
    pub fn is_indexed(&self) -> Option<bool> {
        self.layout.map(|layout| layout.indexed)
    }

    /// Shared attribute array by name
    pub fn attribute(&self, name: &str) -> Option<&VertexAttribute> {
        self.attributes.get(name)
    }

    /// All shared attribute arrays
    pub fn attributes(&self) -> impl Iterator<Item = (&str, &VertexAttribute)> {
        self.attributes.iter().map(|(name, attribute)| (name.as_str(), attribute))
    }

    /// Shared index array
    pub fn index(&self) -> Option<&AttributeData> {
        self.index.as_ref()
    }

    /// Number of reallocations performed so far
    pub fn growth_events(&self) -> u64 {
        self.growth_events
    }

    fn index_element_type(&self) -> ElementType {
        match self.index_format {
            IndexFormat::U16 => ElementType::UInt16,
            IndexFormat::U32 => ElementType::UInt32,
        }
    }

    /// Check a geometry against the established layout without touching storage
    pub fn validate(&self, geometry: &GeometryData) -> BatchResult<()> {
        geometry.validate()?;

        if self.index_format == IndexFormat::U16 {
            if let Some(max) = geometry.index.as_ref().and_then(AttributeData::max_index) {
                if max > u32::from(u16::MAX) {
                    return Err(BatchError::mismatch(
                        "index",
                        format!("index {max} does not fit the 16-bit index format"),
                    ));
                }
            }
        }

        let Some(layout) = self.layout else {
            return Ok(());
        };

        match (layout.indexed, geometry.index.is_some()) {
            (true, false) => return Err(BatchError::MissingIndex),
            (false, true) => return Err(BatchError::UnexpectedIndex),
            _ => {}
        }

        for (name, shared) in &self.attributes {
            let Some(attribute) = geometry.attributes.get(name) else {
                return Err(BatchError::mismatch(name.as_str(), "missing from geometry"));
            };
            if !attribute.same_layout(shared) {
                return Err(BatchError::mismatch(
                    name.as_str(),
                    format!(
                        "expected {} x {:?} (normalized: {}), got {} x {:?} (normalized: {})",
                        shared.item_size,
                        shared.data.element_type(),
                        shared.normalized,
                        attribute.item_size,
                        attribute.data.element_type(),
                        attribute.normalized,
                    ),
                ));
            }
        }
        if let Some(extra) = geometry.attributes.keys().find(|name| !self.attributes.contains_key(*name)) {
            return Err(BatchError::mismatch(extra.as_str(), "not present in batch layout"));
        }
        Ok(())
    }

    /// Fix the attribute layout from the first geometry
    pub fn initialize_layout(&mut self, geometry: &GeometryData) {
        if self.layout.is_some() {
            return;
        }
        for (name, attribute) in &geometry.attributes {
            let data = AttributeData::zeroed(
                attribute.data.element_type(),
                self.vertex_capacity * attribute.item_size,
            );
            self.attributes.insert(
                name.clone(),
                VertexAttribute { item_size: attribute.item_size, normalized: attribute.normalized, data },
            );
        }
        let indexed = geometry.index.is_some();
        if indexed {
            self.index = Some(AttributeData::zeroed(self.index_element_type(), self.index_capacity));
        }
        self.layout = Some(Layout { indexed });
        self.resized = true;
        log::debug!(
            "Initialized shared buffer layout: {} attributes, indexed: {}",
            self.attributes.len(),
            indexed
        );
    }

    /// Capacities needed to hold `required_vertices` / `required_indices`
    ///
    /// Grows geometrically (at least doubling) but never past the hard caps;
    /// fails if the requirement itself is over a cap.
    pub fn plan_growth(&self, required_vertices: usize, required_indices: usize) -> BatchResult<CapacityPlan> {
        let vertices = grow_to(
            ResourceKind::Vertices,
            self.vertex_capacity,
            required_vertices,
            self.max_vertex_capacity,
        )?;
        let indices = grow_to(
            ResourceKind::Indices,
            self.index_capacity,
            required_indices,
            self.max_index_capacity,
        )?;
        Ok(CapacityPlan { vertices, indices })
    }

    /// Check an explicit resize request against caps
    pub fn check_resize(&self, vertices: usize, indices: usize) -> BatchResult<()> {
        if let Some(limit) = self.max_vertex_capacity.filter(|&limit| vertices > limit) {
            return Err(BatchError::CapacityExceeded { resource: ResourceKind::Vertices, requested: vertices, limit });
        }
        if let Some(limit) = self.max_index_capacity.filter(|&limit| indices > limit) {
            return Err(BatchError::CapacityExceeded { resource: ResourceKind::Indices, requested: indices, limit });
        }
        Ok(())
    }

    /// Reallocate every shared array, keeping existing contents
    pub fn resize(&mut self, plan: CapacityPlan) {
        if plan.vertices == self.vertex_capacity && plan.indices == self.index_capacity {
            return;
        }
        log::debug!(
            "Resizing shared buffers: vertices {} → {}, indices {} → {}",
            self.vertex_capacity,
            plan.vertices,
            self.index_capacity,
            plan.indices
        );

        for attribute in self.attributes.values_mut() {
            attribute.data.resize(plan.vertices * attribute.item_size);
        }
        if let Some(index) = &mut self.index {
            index.resize(plan.indices);
        }

        self.vertex_capacity = plan.vertices;
        self.index_capacity = plan.indices;
        self.dirty_vertices.clamp(plan.vertices);
        self.dirty_indices.clamp(plan.indices);
        self.resized = true;
        self.growth_events += 1;
    }

    /// Copy a geometry into `[vertex_start, vertex_start + reserved_vertices)`
    /// and the matching index span, zero-filling the unused reservation tail
    pub fn write_geometry(
        &mut self,
        geometry: &GeometryData,
        vertex_start: usize,
        reserved_vertices: usize,
        index_start: usize,
        reserved_indices: usize,
    ) {
        let vertex_count = geometry.vertex_count();
        for (name, shared) in &mut self.attributes {
            let item = shared.item_size;
            if let Some(source) = geometry.attributes.get(name) {
                shared.data.write_from(&source.data, vertex_start * item);
            }
            shared
                .data
                .zero_range((vertex_start + vertex_count) * item..(vertex_start + reserved_vertices) * item);
        }
        self.dirty_vertices.mark_dirty(vertex_start, vertex_start + reserved_vertices);

        if let (Some(shared), Some(source)) = (&mut self.index, &geometry.index) {
            shared.write_indices_from(source, index_start);
            shared.zero_range(index_start + source.len()..index_start + reserved_indices);
            self.dirty_indices.mark_dirty(index_start, index_start + reserved_indices);
        }
    }

    /// Slide a vertex span down to `dst` (used by compaction)
    pub fn move_vertices(&mut self, src: usize, dst: usize, len: usize) {
        if src == dst || len == 0 {
            return;
        }
        for shared in self.attributes.values_mut() {
            let item = shared.item_size;
            shared.data.copy_within(src * item..(src + len) * item, dst * item);
        }
        self.dirty_vertices.mark_dirty(dst, dst + len);
    }

    /// Slide an index span down to `dst` (used by compaction)
    ///
    /// Indices are geometry-local, so they move without rewriting.
    pub fn move_indices(&mut self, src: usize, dst: usize, len: usize) {
        if src == dst || len == 0 {
            return;
        }
        if let Some(index) = &mut self.index {
            index.copy_within(src..src + len, dst);
            self.dirty_indices.mark_dirty(dst, dst + len);
        }
    }

    /// Position of vertex `vertex`, if the batch has a `position` attribute
    pub fn position(&self, vertex: usize) -> Option<Vec3> {
        let positions = self.attributes.get("position")?;
        Some(Vec3::new(
            positions.component(vertex, 0)?,
            positions.component(vertex, 1).unwrap_or(0.0),
            positions.component(vertex, 2).unwrap_or(0.0),
        ))
    }

    /// Pending vertex/index changes as flags
    pub fn dirty_flags(&self) -> DirtyFlags {
        let mut flags = DirtyFlags::empty();
        flags.set(DirtyFlags::VERTICES, !self.dirty_vertices.is_empty());
        flags.set(DirtyFlags::INDICES, !self.dirty_indices.is_empty());
        flags.set(DirtyFlags::STORAGE_RESIZED, self.resized);
        flags
    }

    /// Dirty vertex spans
    pub fn dirty_vertices(&self) -> &DirtyRanges {
        &self.dirty_vertices
    }

    /// Dirty index spans
    pub fn dirty_indices(&self) -> &DirtyRanges {
        &self.dirty_indices
    }

    /// Forget pending changes after an upload
    pub fn clear_dirty(&mut self) {
        self.dirty_vertices.clear();
        self.dirty_indices.clear();
        self.resized = false;
    }
}

fn grow_to(resource: ResourceKind, current: usize, required: usize, cap: Option<usize>) -> BatchResult<usize> {
    if required <= current {
        return Ok(current);
    }
    if let Some(limit) = cap.filter(|&limit| required > limit) {
        return Err(BatchError::CapacityExceeded { resource, requested: required, limit });
    }
    let grown = required.max(current.saturating_mul(2));
    Ok(cap.map_or(grown, |limit| grown.min(limit)))
}
