//! A producer that highlights a longitude/latitude box.

use std::sync::atomic::{AtomicBool, Ordering};

use glam::{DVec3, Vec3};
use globe_math::TileKey;
use globe_terrain::{AreaStatus, EntityProducer, OverlayMesh, ProducerId, TerrainMesh};

/// Overlay covering every terrain triangle whose centroid lies inside a
/// geographic box. Angles in radians.
pub struct RegionProducer {
    id: ProducerId,
    west: f64,
    east: f64,
    south: f64,
    north: f64,
    dirty: AtomicBool,
}

impl RegionProducer {
    pub fn new(id: ProducerId, west: f64, east: f64, south: f64, north: f64) -> Self {
        Self {
            id,
            west,
            east,
            south,
            north,
            dirty: AtomicBool::new(false),
        }
    }

    pub fn from_degrees(id: ProducerId, west: f64, east: f64, south: f64, north: f64) -> Self {
        Self::new(
            id,
            west.to_radians(),
            east.to_radians(),
            south.to_radians(),
            north.to_radians(),
        )
    }

    /// Ask the tree to propagate this producer again.
    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Relaxed);
    }

    fn contains(&self, p: DVec3) -> bool {
        let lon = p.y.atan2(p.x);
        let lat = (p.z / p.length()).asin();
        lon >= self.west && lon <= self.east && lat >= self.south && lat <= self.north
    }
}

impl EntityProducer for RegionProducer {
    fn id(&self) -> ProducerId {
        self.id
    }

    fn area_status(&self, key: &TileKey) -> AreaStatus {
        let (west, east) = key.lon_range();
        let (south, north) = key.lat_range();
        if east <= self.west || west >= self.east || north <= self.south || south >= self.north {
            AreaStatus::Empty
        } else if west >= self.west && east <= self.east && south >= self.south && north <= self.north
        {
            AreaStatus::Full
        } else {
            AreaStatus::Partial
        }
    }

    fn create_overlay(&self, _key: &TileKey, mesh: &TerrainMesh, full: bool) -> Option<OverlayMesh> {
        let indices: Vec<u32> = if full {
            mesh.indices.clone()
        } else {
            mesh.indices
                .chunks_exact(3)
                .filter(|tri| {
                    let centroid = tri
                        .iter()
                        .map(|&i| Vec3::from_array(mesh.vertices[i as usize].position).as_dvec3())
                        .sum::<DVec3>()
                        / 3.0;
                    self.contains(mesh.center + centroid)
                })
                .flatten()
                .copied()
                .collect()
        };
        if indices.is_empty() {
            return None;
        }
        Some(OverlayMesh {
            producer: self.id,
            vertices: mesh.vertices.clone(),
            indices,
        })
    }

    fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use globe_terrain::GridTile;

    fn alps() -> RegionProducer {
        RegionProducer::from_degrees(ProducerId(1), 5.0, 15.0, 43.0, 48.0)
    }

    #[test]
    fn test_area_status() {
        let region = alps();
        assert_eq!(region.area_status(&TileKey::ROOT), AreaStatus::Partial);
        // Level 1 south-west quadrant: western and southern hemispheres.
        assert_eq!(region.area_status(&TileKey::new(1, 0, 1)), AreaStatus::Empty);

        let (xt, yt) = globe_math::GeoPoint::from_degrees(10.0, 45.5, 0.0).to_unit();
        let small = TileKey::containing(12, xt, yt);
        assert_eq!(region.area_status(&small), AreaStatus::Full);
    }

    #[test]
    fn test_partial_overlay_keeps_inside_triangles() {
        let region = alps();
        let tile = GridTile::flat(TileKey::ROOT, 4, 0, 0.0);
        let (xt, yt) = globe_math::GeoPoint::from_degrees(10.0, 45.5, 0.0).to_unit();
        let key = TileKey::containing(4, xt, yt);
        let mesh = TerrainMesh::build(key, 4, &tile);

        let partial = region.create_overlay(&key, &mesh, false).unwrap();
        assert!(partial.indices.len() < mesh.indices.len());
        assert_eq!(partial.indices.len() % 3, 0);

        let full = region.create_overlay(&key, &mesh, true).unwrap();
        assert_eq!(full.indices, mesh.indices);
    }

    #[test]
    fn test_dirty_flag_is_taken_once() {
        let region = alps();
        assert!(!region.take_dirty());
        region.mark_dirty();
        assert!(region.take_dirty());
        assert!(!region.take_dirty());
    }
}
