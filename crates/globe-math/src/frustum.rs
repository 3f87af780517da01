//! Clip planes for culling terrain bounds in geocentric f64 space.

use glam::{DMat4, DVec3, DVec4};

use crate::Aabb;

/// A plane `normal · p + d = 0`. Points with a positive signed distance are
/// on the inside.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Plane {
    pub normal: DVec3,
    pub d: f64,
}

impl Plane {
    pub fn new(normal: DVec3, d: f64) -> Self {
        Self { normal, d }
    }

    /// Build a plane from `(a, b, c, d)` coefficients, normalizing so that
    /// `(a, b, c)` has unit length.
    pub fn from_coefficients(v: DVec4) -> Self {
        let len = v.truncate().length();
        let v = if len > 0.0 { v / len } else { v };
        Self {
            normal: v.truncate(),
            d: v.w,
        }
    }

    /// Signed distance of `p` to the plane (positive inside).
    pub fn signed_distance(&self, p: DVec3) -> f64 {
        self.normal.dot(p) + self.d
    }
}

/// Six inward-facing planes extracted from a view-projection matrix.
#[derive(Clone, Debug)]
pub struct Frustum {
    planes: [Plane; 6],
}

impl Frustum {
    /// Griggs-Hartmann plane extraction for a `[0, 1]` depth range
    /// (the convention of `DMat4::perspective_rh`).
    pub fn from_view_projection(vp: &DMat4) -> Self {
        let rows = [vp.row(0), vp.row(1), vp.row(2), vp.row(3)];
        Self {
            planes: [
                Plane::from_coefficients(rows[3] + rows[0]),
                Plane::from_coefficients(rows[3] - rows[0]),
                Plane::from_coefficients(rows[3] + rows[1]),
                Plane::from_coefficients(rows[3] - rows[1]),
                Plane::from_coefficients(rows[2]),
                Plane::from_coefficients(rows[3] - rows[2]),
            ],
        }
    }

    pub fn planes(&self) -> &[Plane] {
        &self.planes
    }

    /// Conservative visibility: may report partially hidden boxes as visible,
    /// never hides a visible one.
    pub fn is_visible(&self, aabb: &Aabb) -> bool {
        !self.planes.iter().any(|plane| aabb.is_outside(plane))
    }
}
