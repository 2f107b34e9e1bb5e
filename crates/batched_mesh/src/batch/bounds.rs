//! Bounding volumes and view frustum
//!
//! Used for per-geometry bounds, aggregate batch bounds and per-instance
//! frustum culling in the draw list builder.

use crate::foundation::math::{Mat4, Mat4Ext, Point3, Vec3, Vec4};

/// Axis-Aligned Bounding Box
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    /// Minimum corner of the bounding box
    pub min: Vec3,
    /// Maximum corner of the bounding box
    pub max: Vec3,
}

impl Aabb {
    /// Create a new AABB from min and max points
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Inverted box that any `expand_by_point` replaces
    pub fn empty() -> Self {
        Self {
            min: Vec3::repeat(f32::INFINITY),
            max: Vec3::repeat(f32::NEG_INFINITY),
        }
    }

    /// Create an AABB centered at a point with given extents
    pub fn from_center_extents(center: Vec3, extents: Vec3) -> Self {
        Self {
            min: center - extents,
            max: center + extents,
        }
    }

    /// Smallest box containing all points (`empty()` for no points)
    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Self {
        points.into_iter().fold(Self::empty(), |mut aabb, p| {
            aabb.expand_by_point(p);
            aabb
        })
    }

    /// True if the box contains nothing
    pub fn is_empty(&self) -> bool {
        self.max.x < self.min.x || self.max.y < self.min.y || self.max.z < self.min.z
    }

    /// Grow to include a point
    pub fn expand_by_point(&mut self, point: Vec3) {
        self.min = self.min.inf(&point);
        self.max = self.max.sup(&point);
    }

    /// Grow to include another box
    pub fn union(&mut self, other: &Aabb) {
        if other.is_empty() {
            return;
        }
        self.min = self.min.inf(&other.min);
        self.max = self.max.sup(&other.max);
    }

    /// Get the center of the AABB
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Box around the eight transformed corners
    pub fn transformed(&self, matrix: &Mat4) -> Aabb {
        if self.is_empty() {
            return *self;
        }
        let corners = (0..8).map(|i| {
            let corner = Point3::new(
                if i & 1 == 0 { self.min.x } else { self.max.x },
                if i & 2 == 0 { self.min.y } else { self.max.y },
                if i & 4 == 0 { self.min.z } else { self.max.z },
            );
            matrix.transform_point(&corner).coords
        });
        Aabb::from_points(corners)
    }
}

/// A bounding sphere
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingSphere {
    /// The center position of the sphere
    pub center: Vec3,
    /// The radius of the sphere; negative marks an empty sphere
    pub radius: f32,
}

impl BoundingSphere {
    /// Creates a new bounding sphere with the given center and radius
    pub fn new(center: Vec3, radius: f32) -> Self {
        Self { center, radius }
    }

    /// Sphere that any `union` replaces
    pub fn empty() -> Self {
        Self { center: Vec3::zeros(), radius: -1.0 }
    }

    /// True if the sphere contains nothing
    pub fn is_empty(&self) -> bool {
        self.radius < 0.0
    }

    /// Sphere centered on the box center, enclosing every point
    pub fn from_points_around(aabb: &Aabb, points: impl IntoIterator<Item = Vec3>) -> Self {
        if aabb.is_empty() {
            return Self::empty();
        }
        let center = aabb.center();
        let radius_squared = points
            .into_iter()
            .map(|p| (p - center).magnitude_squared())
            .fold(0.0_f32, f32::max);
        Self { center, radius: radius_squared.sqrt() }
    }

    /// Grow to enclose another sphere
    pub fn union(&mut self, other: &BoundingSphere) {
        if other.is_empty() {
            return;
        }
        if self.is_empty() {
            *self = *other;
            return;
        }

        let offset = other.center - self.center;
        let distance = offset.magnitude();
        if distance + other.radius <= self.radius {
            return;
        }
        if distance + self.radius <= other.radius {
            *self = *other;
            return;
        }

        let radius = (distance + self.radius + other.radius) * 0.5;
        self.center += offset * ((radius - self.radius) / distance);
        self.radius = radius;
    }

    /// Sphere after an affine transform; radius scales by the largest axis
    pub fn transformed(&self, matrix: &Mat4) -> BoundingSphere {
        if self.is_empty() {
            return *self;
        }
        let center = matrix.transform_point(&Point3::from(self.center)).coords;
        Self { center, radius: self.radius * matrix.max_scale_on_axis() }
    }
}

/// Frustum for visibility culling
#[derive(Debug, Clone)]
pub struct Frustum {
    /// Six planes defining the frustum (left, right, bottom, top, near, far)
    pub planes: [Plane; 6],
}

impl Frustum {
    /// Extract frustum planes from a view-projection matrix
    ///
    /// Gribb-Hartmann extraction for clip space with z in [-w, w]
    /// (`Mat4::new_perspective` / `Mat4::new_orthographic` conventions).
    pub fn from_matrix(vp_matrix: &Mat4) -> Self {
        let row = |i: usize| -> Vec4 { vp_matrix.row(i).transpose() };
        let (r0, r1, r2, r3) = (row(0), row(1), row(2), row(3));

        Self {
            planes: [
                Plane::from_coefficients(r3 + r0),
                Plane::from_coefficients(r3 - r0),
                Plane::from_coefficients(r3 + r1),
                Plane::from_coefficients(r3 - r1),
                Plane::from_coefficients(r3 + r2),
                Plane::from_coefficients(r3 - r2),
            ],
        }
    }

    /// Check if an AABB is inside or intersects the frustum
    ///
    /// Empty boxes never intersect.
    pub fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        if aabb.is_empty() {
            return false;
        }
        // For each plane, check if the AABB is completely outside
        for plane in &self.planes {
            // Corner furthest along the plane normal
            let mut p = aabb.min;
            if plane.normal.x >= 0.0 { p.x = aabb.max.x; }
            if plane.normal.y >= 0.0 { p.y = aabb.max.y; }
            if plane.normal.z >= 0.0 { p.z = aabb.max.z; }

            // If this point is outside the plane, the entire AABB is outside
            if plane.distance_to_point(p) < 0.0 {
                return false;
            }
        }

        // AABB is inside or intersecting the frustum
        true
    }

    /// Check if a sphere is inside or intersects the frustum
    pub fn intersects_sphere(&self, sphere: &BoundingSphere) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.distance_to_point(sphere.center) >= -sphere.radius)
    }
}

/// Plane defined by normal and distance from origin
#[derive(Debug, Clone, Copy)]
pub struct Plane {
    /// Normal vector (should be normalized)
    pub normal: Vec3,
    /// Distance from origin along the normal
    pub distance: f32,
}

impl Plane {
    /// Plane `ax + by + cz + d = 0`, normalized
    pub fn from_coefficients(coefficients: Vec4) -> Self {
        let normal = coefficients.xyz();
        let length = normal.magnitude();
        if length == 0.0 {
            return Self { normal, distance: coefficients.w };
        }
        Self { normal: normal / length, distance: coefficients.w / length }
    }

    /// Calculate signed distance from plane to point
    pub fn distance_to_point(&self, point: Vec3) -> f32 {
        self.normal.dot(&point) + self.distance
    }
}
