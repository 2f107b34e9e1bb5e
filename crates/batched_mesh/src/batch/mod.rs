//! Batched multi-geometry drawing
//!
//! Many geometries share one set of vertex/index buffers, and many instances
//! of each share one set of per-instance arrays, so a whole batch renders in
//! a handful of draw calls.

pub mod allocator;
pub mod bounds;
pub mod buffer_store;
pub mod dirty;
pub mod draw;
pub mod element;
pub mod error;
pub mod instance_table;
pub mod range_table;
pub mod upload;

#[cfg(test)]
mod tests;

pub use allocator::{BatchStats, BatchedMesh};
pub use bounds::{Aabb, BoundingSphere, Frustum, Plane};
pub use buffer_store::SharedBufferStore;
pub use dirty::{DirtyFlags, DirtyRanges};
pub use draw::{
    DrawDescriptor, DrawDescriptorBuilder, DrawIndexedIndirectArgs, DrawIndirectArgs, DrawItem, DrawList,
    DrawOptions, DrawOrder, ViewPoint,
};
pub use element::{AttributeData, ElementType, GeometryData, VertexAttribute};
pub use error::{BatchError, BatchResult, ResourceKind};
pub use instance_table::{InstanceId, InstanceInfo, InstanceRecord, InstanceTable};
pub use range_table::{GeometryId, GeometryRange};
pub use upload::{BatchUploader, RecordingUploader, UploadTarget};
