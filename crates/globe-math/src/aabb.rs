use glam::DVec3;

use crate::{Plane, Ray};

/// Axis-aligned bounding box in geocentric f64 space (meters).
///
/// Invariant: min.x <= max.x, min.y <= max.y, min.z <= max.z.
/// The constructor enforces this by swapping components if needed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min: DVec3,
    pub max: DVec3,
}

impl Default for Aabb {
    fn default() -> Self {
        Self {
            min: DVec3::ZERO,
            max: DVec3::ZERO,
        }
    }
}

impl Aabb {
    /// Create an AABB from two corners. Automatically sorts
    /// components so that min <= max on every axis.
    pub fn new(a: DVec3, b: DVec3) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    /// Returns true if the point lies inside or on the boundary.
    pub fn contains_point(&self, p: DVec3) -> bool {
        p.cmpge(self.min).all() && p.cmple(self.max).all()
    }

    /// Returns a new AABB expanded by `margin` on each side.
    pub fn expand_by(&self, margin: f64) -> Aabb {
        Aabb {
            min: self.min - DVec3::splat(margin),
            max: self.max + DVec3::splat(margin),
        }
    }

    /// Euclidean distance from `p` to the closest point of the box (0 inside).
    pub fn distance_to_point(&self, p: DVec3) -> f64 {
        let closest = p.clamp(self.min, self.max);
        (p - closest).length()
    }

    /// Returns true if the whole box lies on the negative side of `plane`.
    ///
    /// Uses the p-vertex: the corner furthest along the plane normal. If that
    /// corner is behind the plane, every other corner is too.
    pub fn is_outside(&self, plane: &Plane) -> bool {
        let n = plane.normal;
        let p = DVec3::new(
            if n.x >= 0.0 { self.max.x } else { self.min.x },
            if n.y >= 0.0 { self.max.y } else { self.min.y },
            if n.z >= 0.0 { self.max.z } else { self.min.z },
        );
        plane.signed_distance(p) < 0.0
    }

    /// Slab test against a ray segment `[0, limit)`.
    ///
    /// Returns the entry distance (0 when the origin is inside) if the ray can
    /// touch the box before `limit`, `None` otherwise.
    pub fn ray_entry(&self, ray: &Ray, limit: f64) -> Option<f64> {
        let mut t_near = 0.0_f64;
        let mut t_far = limit;

        for axis in 0..3 {
            let o = ray.origin[axis];
            let d = ray.direction[axis];
            let lo = self.min[axis];
            let hi = self.max[axis];

            if d == 0.0 {
                if o < lo || o > hi {
                    return None;
                }
                continue;
            }

            let inv = 1.0 / d;
            let (t0, t1) = {
                let a = (lo - o) * inv;
                let b = (hi - o) * inv;
                if a <= b { (a, b) } else { (b, a) }
            };
            t_near = t_near.max(t0);
            t_far = t_far.min(t1);
            if t_near > t_far {
                return None;
            }
        }

        (t_near < limit).then_some(t_near)
    }
}
