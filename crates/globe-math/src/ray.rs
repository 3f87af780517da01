use glam::DVec3;

/// A half-line in geocentric space. The direction is kept normalized so that
/// ray parameters are distances in meters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ray {
    pub origin: DVec3,
    pub direction: DVec3,
}

impl Ray {
    /// Create a ray. `direction` is normalized; a zero direction yields a ray
    /// that never hits anything.
    pub fn new(origin: DVec3, direction: DVec3) -> Self {
        Self {
            origin,
            direction: direction.normalize_or_zero(),
        }
    }

    /// Point at parameter `t`.
    pub fn at(&self, t: f64) -> DVec3 {
        self.origin + self.direction * t
    }

    /// Möller–Trumbore intersection with the triangle `(a, b, c)`, both faces.
    ///
    /// Returns the hit distance, or `None` when the ray misses or the hit lies
    /// behind the origin.
    pub fn intersect_triangle(&self, a: DVec3, b: DVec3, c: DVec3) -> Option<f64> {
        const EPSILON: f64 = 1e-12;

        let e1 = b - a;
        let e2 = c - a;
        let p = self.direction.cross(e2);
        let det = e1.dot(p);
        if det.abs() < EPSILON * e1.length() * e2.length() {
            return None;
        }
        let inv_det = 1.0 / det;

        let s = self.origin - a;
        let u = s.dot(p) * inv_det;
        if !(0.0..=1.0).contains(&u) {
            return None;
        }

        let q = s.cross(e1);
        let v = self.direction.dot(q) * inv_det;
        if v < 0.0 || u + v > 1.0 {
            return None;
        }

        let t = e2.dot(q) * inv_det;
        (t >= 0.0).then_some(t)
    }
}
