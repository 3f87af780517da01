//! f64 geometry for the globe: bounding boxes, rays, clip planes, Mercator tile
//! addressing and spherical geodesy.

mod aabb;
mod frustum;
pub mod geodesy;
mod ray;
mod tile_key;

pub use aabb::Aabb;
pub use frustum::{Frustum, Plane};
pub use geodesy::{EARTH_RADIUS, GeoPoint, tile_bounds, tile_ground_size, unit_to_cartesian};
pub use ray::Ray;
pub use tile_key::{TileKey, UnitRect};
