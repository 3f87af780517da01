//! Quadtree tile addressing in the global Web-Mercator tiling scheme.

use crate::geodesy::{unit_x_to_lon, unit_y_to_lat};

/// Identifies one cell of the global power-of-two tile quadtree.
///
/// - `level`: depth in the quadtree, 0 covers the whole globe.
/// - `x`, `y`: grid coordinates at this level. `x` grows eastward from the
///   antimeridian, `y` grows southward from the northern Mercator limit. Both
///   are in `0..2^level`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileKey {
    pub level: u8,
    pub x: u32,
    pub y: u32,
}

/// Footprint of a tile in unit Mercator coordinates (`[0, 1]` on both axes).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UnitRect {
    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
}

impl UnitRect {
    pub fn contains(&self, xt: f64, yt: f64) -> bool {
        xt >= self.x_min && xt < self.x_max && yt >= self.y_min && yt < self.y_max
    }
}

impl TileKey {
    /// Deepest addressable level. `2^31` cells per axis still fit in `u32`.
    pub const MAX_LEVEL: u8 = 31;

    pub const ROOT: TileKey = TileKey {
        level: 0,
        x: 0,
        y: 0,
    };

    /// Construct a key, validating the grid range.
    ///
    /// # Panics
    ///
    /// Panics if `level` exceeds [`Self::MAX_LEVEL`] or `x`/`y` are out of range.
    #[must_use]
    pub fn new(level: u8, x: u32, y: u32) -> Self {
        assert!(level <= Self::MAX_LEVEL, "level {level} exceeds MAX_LEVEL");
        let size = Self::grid_size(level);
        assert!(
            (x as u64) < size && (y as u64) < size,
            "({x}, {y}) out of range for level {level}"
        );
        Self { level, x, y }
    }

    /// Number of cells along one axis at `level`.
    #[must_use]
    pub fn grid_size(level: u8) -> u64 {
        1u64 << level
    }

    /// Child in quadrant `(u, v)`, each 0 or 1.
    #[must_use]
    pub fn child(&self, u: u32, v: u32) -> TileKey {
        debug_assert!(u < 2 && v < 2);
        TileKey {
            level: self.level + 1,
            x: self.x * 2 + u,
            y: self.y * 2 + v,
        }
    }

    /// Child by slot index `2 * v + u`.
    #[must_use]
    pub fn child_at(&self, index: usize) -> TileKey {
        self.child((index & 1) as u32, (index >> 1) as u32)
    }

    /// Slot index of this key inside its parent.
    #[must_use]
    pub fn child_index(&self) -> usize {
        ((self.y & 1) * 2 + (self.x & 1)) as usize
    }

    #[must_use]
    pub fn parent(&self) -> Option<TileKey> {
        (self.level > 0).then(|| TileKey {
            level: self.level - 1,
            x: self.x >> 1,
            y: self.y >> 1,
        })
    }

    /// The ancestor (or self) at `level`. `level` is clamped to `self.level`.
    #[must_use]
    pub fn ancestor(&self, level: u8) -> TileKey {
        let level = level.min(self.level);
        let shift = self.level - level;
        TileKey {
            level,
            x: self.x >> shift,
            y: self.y >> shift,
        }
    }

    /// Whether `self` is `other` or lies below it.
    #[must_use]
    pub fn is_descendant_of(&self, other: &TileKey) -> bool {
        self.level >= other.level && self.ancestor(other.level) == *other
    }

    /// Footprint in unit Mercator coordinates.
    #[must_use]
    pub fn unit_rect(&self) -> UnitRect {
        let size = Self::grid_size(self.level) as f64;
        UnitRect {
            x_min: self.x as f64 / size,
            y_min: self.y as f64 / size,
            x_max: (self.x as f64 + 1.0) / size,
            y_max: (self.y as f64 + 1.0) / size,
        }
    }

    /// Footprint of `self` expressed in the `[0, 1]²` local frame of
    /// `ancestor`. `u` grows east, `v` grows south.
    #[must_use]
    pub fn rect_in(&self, ancestor: &TileKey) -> UnitRect {
        debug_assert!(self.is_descendant_of(ancestor));
        let shift = self.level - ancestor.level;
        let scale = (1u64 << shift) as f64;
        let ox = (self.x as u64 - ((ancestor.x as u64) << shift)) as f64;
        let oy = (self.y as u64 - ((ancestor.y as u64) << shift)) as f64;
        UnitRect {
            x_min: ox / scale,
            y_min: oy / scale,
            x_max: (ox + 1.0) / scale,
            y_max: (oy + 1.0) / scale,
        }
    }

    /// Key at `level` containing the unit Mercator point `(xt, yt)`.
    #[must_use]
    pub fn containing(level: u8, xt: f64, yt: f64) -> TileKey {
        let size = Self::grid_size(level);
        let max = (size - 1) as f64;
        let x = (xt * size as f64).floor().clamp(0.0, max) as u32;
        let y = (yt * size as f64).floor().clamp(0.0, max) as u32;
        TileKey { level, x, y }
    }

    /// Longitude range `(west, east)` in radians.
    #[must_use]
    pub fn lon_range(&self) -> (f64, f64) {
        let r = self.unit_rect();
        (unit_x_to_lon(r.x_min), unit_x_to_lon(r.x_max))
    }

    /// Latitude range `(south, north)` in radians.
    #[must_use]
    pub fn lat_range(&self) -> (f64, f64) {
        let r = self.unit_rect();
        (unit_y_to_lat(r.y_max), unit_y_to_lat(r.y_min))
    }
}

impl std::fmt::Display for TileKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.level, self.x, self.y)
    }
}
