//! Configuration system

use std::path::Path;

pub use serde::{Deserialize, Serialize};

/// Configuration trait
pub trait Config: Serialize + for<'de> Deserialize<'de> + Default {
    /// Load configuration from file
    fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;

        // Try different formats
        match extension(path) {
            Some("toml") => toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string())),
            Some("ron") => ron::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string())),
            _ => Err(ConfigError::UnsupportedFormat(path.display().to_string())),
        }
    }

    /// Save configuration to file
    fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let contents = match extension(path) {
            Some("toml") => {
                toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?
            }
            Some("ron") => ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
                .map_err(|e| ConfigError::Serialize(e.to_string()))?,
            _ => return Err(ConfigError::UnsupportedFormat(path.display().to_string())),
        };

        std::fs::write(path, contents).map_err(ConfigError::Io)
    }
}

fn extension(path: &Path) -> Option<&str> {
    path.extension().and_then(|ext| ext.to_str())
}

/// Configuration errors
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialize(String),

    /// Unsupported format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

/// Element format of the shared index buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum IndexFormat {
    /// 16-bit indices; every geometry index must be below 65536
    U16,
    /// 32-bit indices
    #[default]
    U32,
}

/// Construction parameters for a [`BatchedMesh`](crate::batch::BatchedMesh)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Number of instance slots allocated up front
    pub max_instance_count: usize,

    /// Whether `set_instance_count` may resize the instance table
    pub growable_instances: bool,

    /// Initial vertex capacity of the shared vertex buffers
    pub initial_vertex_capacity: usize,

    /// Initial index capacity of the shared index buffer
    pub initial_index_capacity: usize,

    /// Hard cap on vertex capacity growth (`None` = unbounded)
    pub max_vertex_capacity: Option<usize>,

    /// Hard cap on index capacity growth (`None` = unbounded)
    pub max_index_capacity: Option<usize>,

    /// Element format of the shared index buffer
    pub index_format: IndexFormat,

    /// Batch-wide switch for per-instance frustum culling
    pub per_object_frustum_culled: bool,

    /// Morph weights stored per instance (0 disables morph storage)
    pub morph_target_count: usize,

    /// Reject transforms with a negative determinant in `set_matrix_at`
    pub reject_mirrored_transforms: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_instance_count: 1024,
            growable_instances: true,
            initial_vertex_capacity: 4096,
            initial_index_capacity: 8192,
            max_vertex_capacity: None,
            max_index_capacity: None,
            index_format: IndexFormat::U32,
            per_object_frustum_culled: true,
            morph_target_count: 0,
            reject_mirrored_transforms: false,
        }
    }
}

impl Config for BatchConfig {}

impl BatchConfig {
    /// Config with fixed capacities, mirroring the classic
    /// `(max instances, max vertices, max indices)` constructor
    pub fn with_capacity(max_instances: usize, max_vertices: usize, max_indices: usize) -> Self {
        Self {
            max_instance_count: max_instances,
            initial_vertex_capacity: max_vertices,
            initial_index_capacity: max_indices,
            ..Self::default()
        }
    }
}
