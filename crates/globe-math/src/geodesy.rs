//! Spherical globe geodesy: Mercator unit coordinates, geocentric positions
//! and tile bounding boxes.

use std::f64::consts::{FRAC_PI_2, PI};

use glam::DVec3;

use crate::{Aabb, TileKey};

/// Globe radius in meters (WGS84 equatorial radius, spherical model).
pub const EARTH_RADIUS: f64 = 6_378_137.0;

/// Longitude (radians) of a unit Mercator x coordinate.
pub fn unit_x_to_lon(xt: f64) -> f64 {
    (2.0 * xt - 1.0) * PI
}

/// Latitude (radians) of a unit Mercator y coordinate (0 = north edge).
pub fn unit_y_to_lat(yt: f64) -> f64 {
    let my = PI * (1.0 - 2.0 * yt);
    2.0 * my.exp().atan() - FRAC_PI_2
}

pub fn lon_to_unit_x(lon: f64) -> f64 {
    lon / (2.0 * PI) + 0.5
}

pub fn lat_to_unit_y(lat: f64) -> f64 {
    let my = (FRAC_PI_2 * 0.5 + lat * 0.5).tan().ln();
    0.5 - my / (2.0 * PI)
}

/// A geographic position: longitude and latitude in radians, height in
/// meters above the sphere.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct GeoPoint {
    pub lon: f64,
    pub lat: f64,
    pub height: f64,
}

impl GeoPoint {
    pub fn new(lon: f64, lat: f64, height: f64) -> Self {
        Self { lon, lat, height }
    }

    pub fn from_degrees(lon_deg: f64, lat_deg: f64, height: f64) -> Self {
        Self::new(lon_deg.to_radians(), lat_deg.to_radians(), height)
    }

    /// Unit Mercator coordinates `(xt, yt)`.
    pub fn to_unit(&self) -> (f64, f64) {
        (lon_to_unit_x(self.lon), lat_to_unit_y(self.lat))
    }

    /// Geocentric Cartesian position.
    pub fn to_cartesian(&self) -> DVec3 {
        let r = EARTH_RADIUS + self.height;
        let (sin_lat, cos_lat) = self.lat.sin_cos();
        let (sin_lon, cos_lon) = self.lon.sin_cos();
        DVec3::new(r * cos_lat * cos_lon, r * cos_lat * sin_lon, r * sin_lat)
    }
}

/// Geocentric position of the unit Mercator point `(xt, yt)` at `height`.
pub fn unit_to_cartesian(xt: f64, yt: f64, height: f64) -> DVec3 {
    GeoPoint::new(unit_x_to_lon(xt), unit_y_to_lat(yt), height).to_cartesian()
}

/// Ground length in meters of one tile edge at the tile's mid-latitude.
///
/// Used as the scale for height safety margins: coarse tiles span more
/// terrain and may hide larger relief.
pub fn tile_ground_size(key: &TileKey) -> f64 {
    let r = key.unit_rect();
    let lat_mid = unit_y_to_lat((r.y_min + r.y_max) * 0.5);
    EARTH_RADIUS * (2.0 * PI / TileKey::grid_size(key.level) as f64) * lat_mid.cos()
}

/// Conservative geocentric bounding box of a tile whose terrain lies between
/// `height_min` and `height_max`.
///
/// Levels 0 and 1 use fixed sphere/hemisphere boxes. Deeper levels use the
/// closed-form extremes of `cos`/`sin` over the tile's longitude and latitude
/// ranges instead of enumerating corners, so bulges across the equator or a
/// cardinal meridian are accounted for.
pub fn tile_bounds(key: &TileKey, height_min: f64, height_max: f64) -> Aabb {
    let r_min = (EARTH_RADIUS + height_min).max(0.0);
    let r_max = (EARTH_RADIUS + height_max).max(r_min);

    match key.level {
        0 => Aabb::new(DVec3::splat(-r_max), DVec3::splat(r_max)),
        1 => {
            // x == 0 is the western hemisphere (sin(lon) <= 0), y == 0 the northern one.
            let (y_min, y_max) = if key.x == 0 { (-r_max, 0.0) } else { (0.0, r_max) };
            let (z_min, z_max) = if key.y == 0 { (0.0, r_max) } else { (-r_max, 0.0) };
            Aabb::new(
                DVec3::new(-r_max, y_min, z_min),
                DVec3::new(r_max, y_max, z_max),
            )
        }
        _ => {
            let (west, east) = key.lon_range();
            let (south, north) = key.lat_range();

            let cos_lat = {
                let (a, b) = (south.cos(), north.cos());
                let hi = if south <= 0.0 && north >= 0.0 { 1.0 } else { a.max(b) };
                (a.min(b), hi)
            };
            let cos_lon = {
                let (a, b) = (west.cos(), east.cos());
                let hi = if west <= 0.0 && east >= 0.0 { 1.0 } else { a.max(b) };
                (a.min(b), hi)
            };
            let sin_lon = {
                let (a, b) = (west.sin(), east.sin());
                let hi = if west <= FRAC_PI_2 && east >= FRAC_PI_2 { 1.0 } else { a.max(b) };
                let lo = if west <= -FRAC_PI_2 && east >= -FRAC_PI_2 { -1.0 } else { a.min(b) };
                (lo, hi)
            };
            let sin_lat = (south.sin(), north.sin());
            let radius = (r_min, r_max);

            let x = mul_range(radius, mul_range(cos_lat, cos_lon));
            let y = mul_range(radius, mul_range(cos_lat, sin_lon));
            let z = mul_range(radius, sin_lat);
            Aabb::new(DVec3::new(x.0, y.0, z.0), DVec3::new(x.1, y.1, z.1))
        }
    }
}

/// Range of `a * b` for `a` in `[a.0, a.1]` and `b` in `[b.0, b.1]`.
fn mul_range(a: (f64, f64), b: (f64, f64)) -> (f64, f64) {
    let p = [a.0 * b.0, a.0 * b.1, a.1 * b.0, a.1 * b.1];
    let lo = p.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = p.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    (lo, hi)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Dense sampling of the tile footprint at both height extremes.
    fn sampled_points(key: &TileKey, h_min: f64, h_max: f64) -> Vec<DVec3> {
        let r = key.unit_rect();
        let mut points = Vec::new();
        for i in 0..=16 {
            for j in 0..=16 {
                let xt = r.x_min + (r.x_max - r.x_min) * i as f64 / 16.0;
                let yt = r.y_min + (r.y_max - r.y_min) * j as f64 / 16.0;
                for h in [h_min, h_max] {
                    points.push(unit_to_cartesian(xt, yt, h));
                }
            }
        }
        points
    }

    #[test]
    fn test_unit_lat_roundtrip() {
        for lat_deg in [-80.0_f64, -45.0, 0.0, 12.5, 60.0, 85.0] {
            let lat = lat_deg.to_radians();
            let back = unit_y_to_lat(lat_to_unit_y(lat));
            assert!((back - lat).abs() < 1e-12, "lat {lat_deg} -> {back}");
        }
        assert!((unit_x_to_lon(lon_to_unit_x(1.25)) - 1.25).abs() < 1e-12);
    }

    #[test]
    fn test_cartesian_on_axes() {
        let p = GeoPoint::new(0.0, 0.0, 0.0).to_cartesian();
        assert!((p - DVec3::new(EARTH_RADIUS, 0.0, 0.0)).length() < 1e-6);
        let q = GeoPoint::from_degrees(90.0, 0.0, 100.0).to_cartesian();
        assert!((q - DVec3::new(0.0, EARTH_RADIUS + 100.0, 0.0)).length() < 1e-6);
    }

    #[test]
    fn test_bounds_contain_sampled_surface() {
        let keys = [
            TileKey::new(0, 0, 0),
            TileKey::new(1, 0, 0),
            TileKey::new(1, 1, 1),
            TileKey::new(2, 1, 1),
            TileKey::new(2, 2, 2),
            TileKey::new(3, 0, 7),
            TileKey::new(5, 16, 9),
            TileKey::new(9, 300, 200),
        ];
        for key in keys {
            let aabb = tile_bounds(&key, -500.0, 3000.0).expand_by(1e-6);
            for p in sampled_points(&key, -500.0, 3000.0) {
                assert!(aabb.contains_point(p), "tile {key} does not contain {p:?}");
            }
        }
    }

    #[test]
    fn test_bounds_shrink_with_level() {
        let coarse = tile_bounds(&TileKey::new(4, 5, 5), 0.0, 100.0);
        let fine = tile_bounds(&TileKey::new(8, 80, 80), 0.0, 100.0);
        let coarse_size = (coarse.max - coarse.min).length();
        let fine_size = (fine.max - fine.min).length();
        assert!(fine_size < coarse_size);
    }

    #[test]
    fn test_ground_size_halves_per_level() {
        let a = tile_ground_size(&TileKey::new(4, 3, 8));
        let b = tile_ground_size(&TileKey::new(5, 6, 16));
        // Same mid-latitude band only approximately; ratio stays close to 2.
        assert!((a / b - 2.0).abs() < 0.1, "ratio {}", a / b);
    }
}
