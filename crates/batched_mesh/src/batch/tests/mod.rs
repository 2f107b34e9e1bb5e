//! Batch-level tests: end-to-end scenarios and churn properties

mod scenarios;

use crate::batch::element::{AttributeData, GeometryData};

/// Line strip geometry with `vertices` vertices and a matching index run
pub(super) fn strip(vertices: usize) -> GeometryData {
    let positions: Vec<[f32; 3]> = (0..vertices).map(|i| [i as f32, (i % 3) as f32, 0.0]).collect();
    GeometryData::from_positions(&positions).with_index(AttributeData::UInt32((0..vertices as u32).collect()))
}
