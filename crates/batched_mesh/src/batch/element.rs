//! Typed attribute storage
//!
//! Vertex and index data arrive in several element types. Each attribute's
//! type is fixed when the batch layout is initialized and every geometry
//! written into that attribute must use the same type, so a range never
//! mixes element types.

use std::collections::BTreeMap;
use std::ops::Range;

use super::error::{BatchError, BatchResult};

/// Element type of an attribute array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    /// Signed 8-bit integer
    Int8,
    /// Unsigned 8-bit integer
    UInt8,
    /// Signed 16-bit integer
    Int16,
    /// Unsigned 16-bit integer
    UInt16,
    /// Signed 32-bit integer
    Int32,
    /// Unsigned 32-bit integer
    UInt32,
    /// 32-bit float
    Float32,
    /// IEEE 754 half float, stored as raw bits
    Float16,
}

impl ElementType {
    /// Size of one element in bytes
    pub const fn byte_size(self) -> usize {
        match self {
            Self::Int8 | Self::UInt8 => 1,
            Self::Int16 | Self::UInt16 | Self::Float16 => 2,
            Self::Int32 | Self::UInt32 | Self::Float32 => 4,
        }
    }

    /// True for the types an index buffer may use
    pub const fn is_index_type(self) -> bool {
        matches!(self, Self::UInt8 | Self::UInt16 | Self::UInt32)
    }
}

/// Attribute array, tagged with its element type
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeData {
    /// Signed 8-bit elements
    Int8(Vec<i8>),
    /// Unsigned 8-bit elements
    UInt8(Vec<u8>),
    /// Signed 16-bit elements
    Int16(Vec<i16>),
    /// Unsigned 16-bit elements
    UInt16(Vec<u16>),
    /// Signed 32-bit elements
    Int32(Vec<i32>),
    /// Unsigned 32-bit elements
    UInt32(Vec<u32>),
    /// 32-bit float elements
    Float32(Vec<f32>),
    /// Half float elements as raw bits
    Float16(Vec<u16>),
}

/// Expands `$body` once per variant with `$v` bound to the inner Vec
macro_rules! each_variant {
    ($data:expr, $v:ident => $body:expr) => {
        match $data {
            AttributeData::Int8($v) => $body,
            AttributeData::UInt8($v) => $body,
            AttributeData::Int16($v) => $body,
            AttributeData::UInt16($v) => $body,
            AttributeData::Int32($v) => $body,
            AttributeData::UInt32($v) => $body,
            AttributeData::Float32($v) => $body,
            AttributeData::Float16($v) => $body,
        }
    };
}

impl AttributeData {
    /// Zero-filled array of `len` elements
    pub fn zeroed(element_type: ElementType, len: usize) -> Self {
        match element_type {
            ElementType::Int8 => Self::Int8(vec![0; len]),
            ElementType::UInt8 => Self::UInt8(vec![0; len]),
            ElementType::Int16 => Self::Int16(vec![0; len]),
            ElementType::UInt16 => Self::UInt16(vec![0; len]),
            ElementType::Int32 => Self::Int32(vec![0; len]),
            ElementType::UInt32 => Self::UInt32(vec![0; len]),
            ElementType::Float32 => Self::Float32(vec![0.0; len]),
            ElementType::Float16 => Self::Float16(vec![0; len]),
        }
    }

    /// Element type tag
    pub const fn element_type(&self) -> ElementType {
        match self {
            Self::Int8(_) => ElementType::Int8,
            Self::UInt8(_) => ElementType::UInt8,
            Self::Int16(_) => ElementType::Int16,
            Self::UInt16(_) => ElementType::UInt16,
            Self::Int32(_) => ElementType::Int32,
            Self::UInt32(_) => ElementType::UInt32,
            Self::Float32(_) => ElementType::Float32,
            Self::Float16(_) => ElementType::Float16,
        }
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        each_variant!(self, v => v.len())
    }

    /// True if the array holds no elements
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw bytes, suitable for upload
    pub fn as_bytes(&self) -> &[u8] {
        each_variant!(self, v => bytemuck::cast_slice(v.as_slice()))
    }

    /// Resize to `len` elements, zero-filling new space
    pub(crate) fn resize(&mut self, len: usize) {
        each_variant!(self, v => v.resize(len, Default::default()));
    }

    /// Zero the elements in `range`
    pub(crate) fn zero_range(&mut self, range: Range<usize>) {
        each_variant!(self, v => v[range].fill(Default::default()));
    }

    /// Move `src` to start at `dst` within the same array
    pub(crate) fn copy_within(&mut self, src: Range<usize>, dst: usize) {
        each_variant!(self, v => v.copy_within(src, dst));
    }

    /// Copy all of `source` into this array starting at `dst`
    ///
    /// Both arrays must share an element type; callers validate that first.
    pub(crate) fn write_from(&mut self, source: &Self, dst: usize) {
        macro_rules! copy {
            ($target:expr, $source:expr, $dst:expr; $($variant:ident),*) => {
                match ($target, $source) {
                    $((AttributeData::$variant(to), AttributeData::$variant(from)) => {
                        to[$dst..$dst + from.len()].copy_from_slice(from);
                    })*
                    (to, from) => unreachable!(
                        "element type {:?} written into {:?} storage",
                        from.element_type(),
                        to.element_type()
                    ),
                }
            };
        }
        copy!(self, source, dst; Int8, UInt8, Int16, UInt16, Int32, UInt32, Float32, Float16);
    }

    /// Element `index` converted to f32
    ///
    /// Normalized integer data maps to [0, 1] (unsigned) or [-1, 1] (signed).
    pub fn get_f32(&self, index: usize, normalized: bool) -> Option<f32> {
        let value = match self {
            Self::Int8(v) => norm(f32::from(*v.get(index)?), f32::from(i8::MAX), normalized),
            Self::UInt8(v) => norm(f32::from(*v.get(index)?), f32::from(u8::MAX), normalized),
            Self::Int16(v) => norm(f32::from(*v.get(index)?), f32::from(i16::MAX), normalized),
            Self::UInt16(v) => norm(f32::from(*v.get(index)?), f32::from(u16::MAX), normalized),
            Self::Int32(v) => norm(*v.get(index)? as f32, i32::MAX as f32, normalized),
            Self::UInt32(v) => norm(*v.get(index)? as f32, u32::MAX as f32, normalized),
            Self::Float32(v) => *v.get(index)?,
            Self::Float16(v) => f16_bits_to_f32(*v.get(index)?),
        };
        Some(value)
    }

    /// Element `index` as an unsigned index value
    ///
    /// `None` for signed/float arrays or out-of-range positions.
    pub fn get_index(&self, index: usize) -> Option<u32> {
        match self {
            Self::UInt8(v) => v.get(index).map(|&i| u32::from(i)),
            Self::UInt16(v) => v.get(index).map(|&i| u32::from(i)),
            Self::UInt32(v) => v.get(index).copied(),
            _ => None,
        }
    }

    /// Largest value in an index array
    pub(crate) fn max_index(&self) -> Option<u32> {
        (0..self.len()).filter_map(|i| self.get_index(i)).max()
    }

    /// Write index values from `source` starting at `dst`, converting to
    /// this array's index type
    pub(crate) fn write_indices_from(&mut self, source: &Self, dst: usize) {
        for i in 0..source.len() {
            let value = source.get_index(i).unwrap_or(0);
            match self {
                Self::UInt8(v) => v[dst + i] = value as u8,
                Self::UInt16(v) => v[dst + i] = value as u16,
                Self::UInt32(v) => v[dst + i] = value,
                _ => {}
            }
        }
    }
}

fn norm(value: f32, max: f32, normalized: bool) -> f32 {
    if normalized {
        (value / max).max(-1.0)
    } else {
        value
    }
}

/// Decode IEEE 754 binary16 bits
pub fn f16_bits_to_f32(bits: u16) -> f32 {
    let sign = if bits & 0x8000 != 0 { -1.0 } else { 1.0 };
    let exponent = i32::from((bits >> 10) & 0x1f);
    let mantissa = f32::from(bits & 0x03ff);

    match exponent {
        0 => sign * mantissa * 2f32.powi(-24),
        0x1f if mantissa == 0.0 => sign * f32::INFINITY,
        0x1f => f32::NAN,
        _ => sign * (1.0 + mantissa / 1024.0) * 2f32.powi(exponent - 15),
    }
}

/// One named vertex attribute: interleaving-free array of `item_size`
/// components per vertex
#[derive(Debug, Clone, PartialEq)]
pub struct VertexAttribute {
    /// Components per vertex (3 for positions, 2 for UVs, ...)
    pub item_size: usize,
    /// Integer data is interpreted as normalized fixed point
    pub normalized: bool,
    /// Flat component array, `item_size * vertex_count` long
    pub data: AttributeData,
}

impl VertexAttribute {
    /// Non-normalized attribute
    pub fn new(item_size: usize, data: AttributeData) -> Self {
        Self { item_size, normalized: false, data }
    }

    /// Normalized integer attribute
    pub fn normalized(item_size: usize, data: AttributeData) -> Self {
        Self { item_size, normalized: true, data }
    }

    /// Number of vertices held
    pub fn count(&self) -> usize {
        if self.item_size == 0 {
            0
        } else {
            self.data.len() / self.item_size
        }
    }

    /// Components of vertex `vertex` converted to f32
    pub fn component(&self, vertex: usize, component: usize) -> Option<f32> {
        if component >= self.item_size {
            return None;
        }
        self.data.get_f32(vertex * self.item_size + component, self.normalized)
    }

    pub(crate) fn same_layout(&self, other: &Self) -> bool {
        self.item_size == other.item_size
            && self.normalized == other.normalized
            && self.data.element_type() == other.data.element_type()
    }
}

/// Source geometry handed to the batch: named attributes plus an optional
/// index buffer with geometry-local indices
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeometryData {
    /// Attributes by name; `"position"` feeds bounds computation
    pub attributes: BTreeMap<String, VertexAttribute>,
    /// Geometry-local indices (unsigned element types only)
    pub index: Option<AttributeData>,
}

impl GeometryData {
    /// Empty geometry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an attribute
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, attribute: VertexAttribute) -> Self {
        self.attributes.insert(name.into(), attribute);
        self
    }

    /// Set the index buffer
    #[must_use]
    pub fn with_index(mut self, index: AttributeData) -> Self {
        self.index = Some(index);
        self
    }

    /// Float32 positions, three components per vertex
    pub fn from_positions(positions: &[[f32; 3]]) -> Self {
        let flat = positions.iter().flatten().copied().collect();
        Self::new().with_attribute("position", VertexAttribute::new(3, AttributeData::Float32(flat)))
    }

    /// Number of vertices (0 for a geometry without attributes)
    pub fn vertex_count(&self) -> usize {
        self.attributes.values().next().map_or(0, VertexAttribute::count)
    }

    /// Number of indices (0 when non-indexed)
    pub fn index_count(&self) -> usize {
        self.index.as_ref().map_or(0, AttributeData::len)
    }

    /// Check internal consistency: at least one attribute is present, every
    /// attribute holds whole items and the same vertex count, indices use an
    /// unsigned type and stay within the vertex range
    pub fn validate(&self) -> BatchResult<()> {
        if self.attributes.is_empty() {
            return Err(BatchError::mismatch("position", "geometry has no vertex attributes"));
        }
        let vertex_count = self.vertex_count();
        for (name, attribute) in &self.attributes {
            if attribute.item_size == 0 || attribute.data.len() % attribute.item_size != 0 {
                return Err(BatchError::mismatch(
                    name.as_str(),
                    format!("{} elements is not a multiple of item size {}", attribute.data.len(), attribute.item_size),
                ));
            }
            if attribute.count() != vertex_count {
                return Err(BatchError::mismatch(
                    name.as_str(),
                    format!("has {} vertices, expected {}", attribute.count(), vertex_count),
                ));
            }
        }

        if let Some(index) = &self.index {
            if !index.element_type().is_index_type() {
                return Err(BatchError::mismatch(
                    "index",
                    format!("{:?} is not an unsigned index type", index.element_type()),
                ));
            }
            if let Some(max) = index.max_index() {
                if max as usize >= vertex_count {
                    return Err(BatchError::mismatch(
                        "index",
                        format!("index {max} out of range for {vertex_count} vertices"),
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_integer_conversion() {
        let data = AttributeData::UInt8(vec![0, 255, 51]);
        assert_eq!(data.get_f32(1, true), Some(1.0));
        assert_eq!(data.get_f32(2, false), Some(51.0));

        let signed = AttributeData::Int8(vec![-128, 127]);
        assert_eq!(signed.get_f32(0, true), Some(-1.0));
        assert_eq!(signed.get_f32(1, true), Some(1.0));
    }

    #[test]
    fn test_f16_decode() {
        assert_eq!(f16_bits_to_f32(0x3c00), 1.0);
        assert_eq!(f16_bits_to_f32(0xc000), -2.0);
        assert_eq!(f16_bits_to_f32(0x3800), 0.5);
        assert_eq!(f16_bits_to_f32(0x0000), 0.0);
        assert!(f16_bits_to_f32(0x7c00).is_infinite());
    }

    #[test]
    fn test_copy_and_zero_ranges() {
        let mut data = AttributeData::Float32(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        data.copy_within(3..6, 0);
        assert_eq!(data, AttributeData::Float32(vec![4.0, 5.0, 6.0, 4.0, 5.0, 6.0]));

        data.zero_range(3..6);
        assert_eq!(data, AttributeData::Float32(vec![4.0, 5.0, 6.0, 0.0, 0.0, 0.0]));

        data.write_from(&AttributeData::Float32(vec![9.0]), 4);
        assert_eq!(data.get_f32(4, false), Some(9.0));
    }

    #[test]
    fn test_index_conversion_between_widths() {
        let mut store = AttributeData::zeroed(ElementType::UInt16, 4);
        store.write_indices_from(&AttributeData::UInt32(vec![7, 8]), 1);
        assert_eq!(store, AttributeData::UInt16(vec![0, 7, 8, 0]));
        assert_eq!(store.max_index(), Some(8));
    }

    #[test]
    fn test_geometry_validation() {
        let geometry = GeometryData::from_positions(&[[0.0; 3], [1.0; 3], [2.0; 3]])
            .with_attribute("uv", VertexAttribute::new(2, AttributeData::Float32(vec![0.0; 6])))
            .with_index(AttributeData::UInt16(vec![0, 1, 2]));
        assert!(geometry.validate().is_ok());
        assert_eq!(geometry.vertex_count(), 3);
        assert_eq!(geometry.index_count(), 3);

        let short_uv = geometry
            .clone()
            .with_attribute("uv", VertexAttribute::new(2, AttributeData::Float32(vec![0.0; 4])));
        assert!(matches!(short_uv.validate(), Err(BatchError::AttributeMismatch { .. })));

        let bad_index = geometry.with_index(AttributeData::UInt16(vec![0, 1, 3]));
        assert!(matches!(bad_index.validate(), Err(BatchError::AttributeMismatch { .. })));
    }

    #[test]
    fn test_geometry_without_attributes_rejected() {
        assert_eq!(
            GeometryData::new().validate(),
            Err(BatchError::mismatch("position", "geometry has no vertex attributes"))
        );
        let index_only = GeometryData::new().with_index(AttributeData::UInt32(vec![]));
        assert!(matches!(index_only.validate(), Err(BatchError::AttributeMismatch { .. })));
    }
}
