//! # Batched Mesh
//!
//! Batched multi-geometry draw management: many distinct meshes, and many
//! instances of each, packed into shared storage and drawn with a minimal
//! number of draw calls.
//!
//! ## Features
//!
//! - **Shared Storage**: One vertex/index arena with geometric growth and hard caps
//! - **Stable Ids**: Geometry and instance ids survive churn and are reused lowest-first
//! - **Defragmentation**: `optimize` slides live ranges together to reclaim holes
//! - **Partial Uploads**: Dirty ranges per array, pushed through a backend-agnostic uploader
//! - **Draw Lists**: Per-frame descriptors with frustum culling and depth sorting
//!
//! ## Quick Start
//!
//! ```rust
//! use batched_mesh::prelude::*;
//!
//! fn main() -> Result<(), BatchError> {
//!     let mut batch = BatchedMesh::new(BatchConfig::default());
//!
//!     let triangle = GeometryData::from_positions(&[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]])
//!         .with_index(AttributeData::UInt32(vec![0, 1, 2]));
//!     let geometry = batch.add_geometry(&triangle, None, None)?;
//!
//!     for i in 0..3 {
//!         let instance = batch.add_instance(geometry)?;
//!         batch.set_matrix_at(instance, &Mat4::new_translation(&Vec3::new(i as f32, 0.0, 0.0)))?;
//!     }
//!
//!     let draws = batch.build_draw_list(&DrawOptions::default());
//!     assert_eq!(draws.total_instances(), 3);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(
    clippy::module_name_repetitions,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_precision_loss,
    clippy::missing_errors_doc
)]

pub mod batch;
pub mod config;
pub mod foundation;

pub use batch::{BatchError, BatchResult, BatchedMesh};
pub use config::{BatchConfig, Config, ConfigError, IndexFormat};

/// Common imports for batch users
pub mod prelude {
    pub use crate::{
        batch::{
            Aabb, AttributeData, BatchError, BatchResult, BatchStats, BatchUploader, BatchedMesh, BoundingSphere,
            DirtyFlags, DrawDescriptor, DrawDescriptorBuilder, DrawList, DrawOptions, DrawOrder, ElementType,
            Frustum, GeometryData, GeometryId, GeometryRange, InstanceId, UploadTarget, VertexAttribute, ViewPoint,
        },
        config::{BatchConfig, Config, IndexFormat},
        foundation::math::{Mat4, Vec3, Vec4},
    };
}
