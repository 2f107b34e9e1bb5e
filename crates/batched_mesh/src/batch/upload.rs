//! Upload seam between the batch and a graphics backend
//!
//! The batch never talks to a GPU. [`BatchedMesh::flush`](super::BatchedMesh::flush)
//! walks its dirty state and hands byte spans to a [`BatchUploader`], which a
//! renderer implements over whatever buffer API it uses.

use std::fmt;

/// Which logical buffer an upload targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UploadTarget<'a> {
    /// A named vertex attribute array
    VertexAttribute(&'a str),
    /// The shared index array
    Index,
    /// Per-instance transforms, 16 floats each
    Transforms,
    /// Per-instance RGBA colors
    Colors,
    /// Per-instance geometry id and visibility
    InstanceInfo,
    /// Per-instance morph weights
    MorphWeights,
}

impl fmt::Display for UploadTarget<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadTarget::VertexAttribute(name) => write!(f, "attribute '{name}'"),
            UploadTarget::Index => write!(f, "index"),
            UploadTarget::Transforms => write!(f, "transforms"),
            UploadTarget::Colors => write!(f, "colors"),
            UploadTarget::InstanceInfo => write!(f, "instance info"),
            UploadTarget::MorphWeights => write!(f, "morph weights"),
        }
    }
}

/// Receives buffer updates from [`BatchedMesh::flush`](super::BatchedMesh::flush)
///
/// `reallocate` calls for a target always arrive before its `write` calls
/// in the same flush.
pub trait BatchUploader {
    /// The target's backing store must be recreated at `byte_len` bytes;
    /// a full rewrite of its live contents follows.
    fn reallocate(&mut self, target: UploadTarget<'_>, byte_len: usize);

    /// Copy `bytes` into the target at `byte_offset`
    fn write(&mut self, target: UploadTarget<'_>, byte_offset: usize, bytes: &[u8]);
}

/// Uploader that records every call, for tests and debugging
#[derive(Debug, Default, Clone)]
pub struct RecordingUploader {
    /// `(target, byte_len)` per reallocation
    pub reallocations: Vec<(String, usize)>,
    /// `(target, byte_offset, byte_len)` per write
    pub writes: Vec<(String, usize, usize)>,
}

impl RecordingUploader {
    /// Empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes written to a target across all recorded writes
    pub fn bytes_written(&self, target: UploadTarget<'_>) -> usize {
        let name = target.to_string();
        self.writes.iter().filter(|(t, _, _)| *t == name).map(|(_, _, len)| len).sum()
    }
}

impl BatchUploader for RecordingUploader {
    fn reallocate(&mut self, target: UploadTarget<'_>, byte_len: usize) {
        self.reallocations.push((target.to_string(), byte_len));
    }

    fn write(&mut self, target: UploadTarget<'_>, byte_offset: usize, bytes: &[u8]) {
        self.writes.push((target.to_string(), byte_offset, bytes.len()));
    }
}
