//! Error types for batch allocation and instance management

use std::fmt;

/// Which kind of resource an error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// A registered geometry range
    Geometry,
    /// An instance slot
    Instance,
    /// Shared vertex storage
    Vertices,
    /// Shared index storage
    Indices,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Geometry => "geometry",
            Self::Instance => "instance",
            Self::Vertices => "vertex",
            Self::Indices => "index",
        };
        f.write_str(name)
    }
}

/// Errors reported by [`BatchedMesh`](super::BatchedMesh) operations
///
/// Every failing call leaves the batch exactly as it was before the call.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum BatchError {
    /// Growth past a configured hard cap, or a full fixed-size table
    #[error("{resource} capacity exceeded: requested {requested}, limit {limit}")]
    CapacityExceeded {
        /// Storage that ran out
        resource: ResourceKind,
        /// Total size the operation needed
        requested: usize,
        /// Hard limit in effect
        limit: usize,
    },

    /// Replacement data does not fit the geometry's reservation
    #[error("{resource} data for geometry {geometry_id} needs {requested} elements but only {reserved} are reserved")]
    RangeTooSmall {
        /// Geometry being written
        geometry_id: u32,
        /// Vertex or index space
        resource: ResourceKind,
        /// Element count of the new data
        requested: usize,
        /// Reserved element count of the range
        reserved: usize,
    },

    /// Shrinking shared storage would truncate live data
    #[error("cannot resize {resource} storage to {requested}: {in_use} elements still in use")]
    InsufficientUnusedSpace {
        /// Vertex or index space
        resource: ResourceKind,
        /// Requested capacity
        requested: usize,
        /// High-water mark of allocated ranges
        in_use: usize,
    },

    /// The id was never allocated or has been deleted
    #[error("invalid {kind} id {id}")]
    InvalidId {
        /// Geometry or instance
        kind: ResourceKind,
        /// Offending id
        id: u32,
    },

    /// Shrinking the instance table would orphan live instances
    #[error("cannot set instance count to {requested}: instance {highest_in_use} is still in use")]
    InUseIdsBeyondNewCount {
        /// Requested instance count
        requested: usize,
        /// Highest live instance id
        highest_in_use: u32,
    },

    /// The instance table was created without resize support
    #[error("instance table is fixed at {capacity} slots")]
    FixedInstanceCapacity {
        /// Fixed slot count
        capacity: usize,
    },

    /// Geometry layout disagrees with the batch's shared attribute layout
    #[error("attribute '{name}' mismatch: {reason}")]
    AttributeMismatch {
        /// Attribute name (`"index"` for the index buffer)
        name: String,
        /// What differed
        reason: String,
    },

    /// Non-indexed geometry added to an indexed batch
    #[error("geometry has no index buffer but the batch is indexed")]
    MissingIndex,

    /// Indexed geometry added to a non-indexed batch
    #[error("geometry has an index buffer but the batch is not indexed")]
    UnexpectedIndex,

    /// More morph weights than the batch stores per instance
    #[error("morph weight count {actual} exceeds configured morph target count {expected}")]
    MorphTargetMismatch {
        /// Configured per-instance morph stride
        expected: usize,
        /// Number of weights supplied
        actual: usize,
    },

    /// Transform flips handedness and mirrored transforms are rejected
    #[error("transform for instance {instance_id} has negative scale (mirrored)")]
    MirroredTransform {
        /// Instance being written
        instance_id: u32,
    },
}

/// Result alias for batch operations
pub type BatchResult<T> = Result<T, BatchError>;

impl BatchError {
    /// Shorthand for an unknown geometry id
    pub(crate) fn invalid_geometry(id: u32) -> Self {
        Self::InvalidId { kind: ResourceKind::Geometry, id }
    }

    /// Shorthand for an unknown instance id
    pub(crate) fn invalid_instance(id: u32) -> Self {
        Self::InvalidId { kind: ResourceKind::Instance, id }
    }

    pub(crate) fn mismatch(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::AttributeMismatch { name: name.into(), reason: reason.into() }
    }
}
