//! Ray/terrain intersection by branch and bound over node bounds.

use globe_math::{Ray, unit_to_cartesian};

use crate::node::NodeKey;
use crate::provider::TileProvider;
use crate::tile::ElevationTile;
use crate::tree::{Tree, TreeStatus};

impl<P: TileProvider> Tree<P> {
    /// Distance along `ray` to the first terrain hit closer than `limit`, or
    /// `limit` when there is none.
    ///
    /// Nodes exactly ρ levels below their nearest loaded tile are resolved as
    /// one quad of that tile. Other nodes are pruned by their bounds, and
    /// every hit found narrows `limit` for the remaining search.
    pub fn find_ray_distance(&mut self, ray: &Ray, limit: f64) -> f64 {
        match (self.status(), self.root) {
            (TreeStatus::Ready, Some(root)) => self.ray_distance_in(root, ray, limit),
            _ => limit,
        }
    }

    fn ray_distance_in(&mut self, id: NodeKey, ray: &Ray, limit: f64) -> f64 {
        self.estimate(id);
        let Some(node) = self.nodes.get(id) else {
            return limit;
        };
        let key = node.key;

        if let Some(tile) = self.nearest_loaded(id, key.level)
            && key.level - tile.key().level == self.settings.rho
        {
            return quad_ray_distance(tile.as_ref(), &key, ray, limit);
        }

        if node.bounds.ray_entry(ray, limit).is_none() {
            return limit;
        }

        let mut limit = limit;
        for index in 0..4 {
            if let Some(child) = self.child(id, index) {
                limit = self.ray_distance_in(child, ray, limit);
            }
        }
        limit
    }
}

/// Intersect `ray` with the two triangles spanned by the corners of `key`
/// sampled from `tile`.
fn quad_ray_distance<T: ElevationTile>(
    tile: &T,
    key: &globe_math::TileKey,
    ray: &Ray,
    limit: f64,
) -> f64 {
    let [h_nw, h_ne, h_sw, h_se] = tile.corner_heights(key);
    let r = key.unit_rect();
    let nw = unit_to_cartesian(r.x_min, r.y_min, h_nw);
    let ne = unit_to_cartesian(r.x_max, r.y_min, h_ne);
    let sw = unit_to_cartesian(r.x_min, r.y_max, h_sw);
    let se = unit_to_cartesian(r.x_max, r.y_max, h_se);

    [ray.intersect_triangle(nw, ne, sw), ray.intersect_triangle(se, sw, ne)]
        .into_iter()
        .flatten()
        .filter(|&t| t < limit)
        .fold(limit, f64::min)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TreeSettings;
    use crate::provider::{Delivery, MemoryTileProvider};
    use glam::DVec3;
    use globe_math::{EARTH_RADIUS, GeoPoint, TileKey};

    const LIMIT: f64 = 1.0e8;

    fn flat_tree(rho: u8, leaf_level: u8, height: f32) -> Tree<MemoryTileProvider> {
        let provider = MemoryTileProvider::flat(Delivery::Immediate, rho, leaf_level, height);
        let mut tree = Tree::new(provider, TreeSettings::with_rho(rho));
        tree.poll();
        tree
    }

    /// Create the path to `key` and keep estimating its node until the tile
    /// chain above it has loaded.
    fn load_path(tree: &mut Tree<MemoryTileProvider>, key: TileKey) {
        let mut id = tree.root().unwrap();
        for level in 1..=key.level {
            id = tree.child(id, key.ancestor(level).child_index()).unwrap();
        }
        for _ in 0..32 {
            tree.poll();
            tree.estimate(id);
        }
    }

    #[test]
    fn test_not_ready_returns_limit() {
        let provider = MemoryTileProvider::flat(Delivery::Manual, 2, 4, 0.0);
        let mut tree = Tree::new(provider, TreeSettings::with_rho(2));
        let ray = Ray::new(DVec3::new(2.0 * EARTH_RADIUS, 0.0, 0.0), -DVec3::X);
        assert_eq!(tree.find_ray_distance(&ray, LIMIT), LIMIT);
    }

    #[test]
    fn test_ray_pointing_away_returns_limit() {
        let mut tree = flat_tree(2, 6, 0.0);
        let ray = Ray::new(DVec3::new(2.0 * EARTH_RADIUS, 0.0, 0.0), DVec3::X);
        assert_eq!(tree.find_ray_distance(&ray, LIMIT), LIMIT);
        let ray = Ray::new(DVec3::new(0.0, 0.0, 3.0 * EARTH_RADIUS), DVec3::new(1.0, 1.0, 0.5));
        assert_eq!(tree.find_ray_distance(&ray, LIMIT), LIMIT);
    }

    #[test]
    fn test_ray_straight_down_on_flat_tile() {
        let rho = 2;
        let leaf_level = 18;
        let mut tree = flat_tree(rho, leaf_level, 100.0);

        let surface = GeoPoint::from_degrees(50.3, 30.7, 0.0);
        let (xt, yt) = surface.to_unit();
        let key = TileKey::containing(leaf_level + rho, xt, yt);
        load_path(&mut tree, key);

        let r = key.unit_rect();
        let center = unit_to_cartesian((r.x_min + r.x_max) * 0.5, (r.y_min + r.y_max) * 0.5, 1000.0);
        let ray = Ray::new(center, -center);
        let distance = tree.find_ray_distance(&ray, LIMIT);
        assert!((distance - 900.0).abs() < 1e-3, "distance {distance}");
    }

    #[test]
    fn test_quad_miss_keeps_limit() {
        let tile = crate::grid_tile::GridTile::flat(TileKey::ROOT, 2, 0, 0.0);
        let key = TileKey::new(2, 1, 1);
        let origin = unit_to_cartesian(0.9, 0.9, 1000.0);
        let ray = Ray::new(origin, -origin);
        assert_eq!(quad_ray_distance(&tile, &key, &ray, 50.0), 50.0);
    }
}
