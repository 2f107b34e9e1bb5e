//! Math utilities and types
//!
//! Provides the fundamental math types used by the batch tables and the
//! culling/sorting code in the draw list builder.

pub use nalgebra::{Matrix3, Matrix4, Vector3, Vector4};

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 4D vector type
pub type Vec4 = Vector4<f32>;

/// 3x3 matrix type
pub type Mat3 = Matrix3<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// 3D point type
pub type Point3 = nalgebra::Point3<f32>;

/// Column-major matrix layout as stored in packed instance arrays
pub type PackedMat4 = [[f32; 4]; 4];

/// Extension trait for Mat4 with batch-specific helpers
pub trait Mat4Ext {
    /// True if the upper 3x3 block flips handedness (negative determinant)
    fn is_mirrored(&self) -> bool;

    /// Largest scale factor applied along any basis axis
    fn max_scale_on_axis(&self) -> f32;

    /// Translation column of an affine transform
    fn translation(&self) -> Vec3;

    /// Pack into the column-major array layout used for upload
    fn to_packed(&self) -> PackedMat4;

    /// Rebuild a matrix from its packed representation
    fn from_packed(packed: &PackedMat4) -> Mat4;
}

impl Mat4Ext for Mat4 {
    fn is_mirrored(&self) -> bool {
        let linear: Mat3 = self.fixed_view::<3, 3>(0, 0).into_owned();
        linear.determinant() < 0.0
    }

    fn max_scale_on_axis(&self) -> f32 {
        let sx = Vec3::new(self.m11, self.m21, self.m31).magnitude_squared();
        let sy = Vec3::new(self.m12, self.m22, self.m32).magnitude_squared();
        let sz = Vec3::new(self.m13, self.m23, self.m33).magnitude_squared();
        sx.max(sy).max(sz).sqrt()
    }

    fn translation(&self) -> Vec3 {
        Vec3::new(self.m14, self.m24, self.m34)
    }

    fn to_packed(&self) -> PackedMat4 {
        (*self).into()
    }

    fn from_packed(packed: &PackedMat4) -> Mat4 {
        Mat4::from(*packed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mirrored_detection() {
        let uniform = Mat4::new_nonuniform_scaling(&Vec3::new(2.0, 2.0, 2.0));
        assert!(!uniform.is_mirrored());

        let flipped = Mat4::new_nonuniform_scaling(&Vec3::new(-1.0, 1.0, 1.0));
        assert!(flipped.is_mirrored());

        // Two negative axes are a rotation, not a mirror
        let rotated = Mat4::new_nonuniform_scaling(&Vec3::new(-1.0, -1.0, 1.0));
        assert!(!rotated.is_mirrored());
    }

    #[test]
    fn test_packed_round_trip_is_exact() {
        let m = Mat4::new_translation(&Vec3::new(1.5, -2.25, 3.0))
            * Mat4::new_nonuniform_scaling(&Vec3::new(0.1, 0.2, 0.3));
        let packed = m.to_packed();
        assert_eq!(packed[3][0], 1.5);
        assert_eq!(Mat4::from_packed(&packed), m);
    }

    #[test]
    fn test_max_scale_on_axis() {
        let m = Mat4::new_nonuniform_scaling(&Vec3::new(1.0, 4.0, 2.0));
        assert!((m.max_scale_on_axis() - 4.0).abs() < 1e-6);
    }
}
