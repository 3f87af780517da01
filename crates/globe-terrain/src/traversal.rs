//! Per-frame top-down walk: culling, refinement and mesh selection.

use std::sync::Arc;

use glam::DVec3;
use globe_config::TerrainConfig;
use globe_math::{Frustum, Plane, TileKey, tile_ground_size};

use crate::mesh::TerrainMesh;
use crate::node::NodeKey;
use crate::provider::TileProvider;
use crate::tree::{Tree, TreeStatus};

/// Camera state for one frame.
#[derive(Clone, Debug)]
pub struct FrameView {
    /// Eye position, geocentric meters.
    pub eye: DVec3,
    /// Clip volume. `None` keeps every node.
    pub frustum: Option<Frustum>,
    /// A node is refined while its ground size over its distance to the eye
    /// exceeds this value.
    pub lod_factor: f64,
    /// Mesh subdivision exponent for selected nodes.
    pub mesh_lod: u8,
    /// Deepest level ever selected.
    pub max_level: u8,
}

impl FrameView {
    pub fn new(eye: DVec3, config: &TerrainConfig) -> Self {
        Self {
            eye,
            frustum: None,
            lod_factor: config.lod_factor,
            mesh_lod: config.mesh_lod,
            max_level: config.max_level.min(TileKey::MAX_LEVEL),
        }
    }

    pub fn with_frustum(mut self, frustum: Frustum) -> Self {
        self.frustum = Some(frustum);
        self
    }
}

/// A node chosen for rendering this frame.
#[derive(Clone, Debug)]
pub struct TileSelection {
    pub node: NodeKey,
    pub key: TileKey,
    /// `None` only if no tile covering the node has loaded.
    pub mesh: Option<Arc<TerrainMesh>>,
}

impl<P: TileProvider> Tree<P> {
    /// Whether the bounds of `id` lie entirely outside any of `planes`.
    /// Unknown nodes are invisible.
    pub fn is_invisible(&self, id: NodeKey, planes: &[Plane]) -> bool {
        match self.nodes.get(id) {
            Some(node) => planes.iter().any(|plane| node.bounds.is_outside(plane)),
            None => true,
        }
    }

    /// Walk the tree for one frame and return the nodes to draw, parents
    /// visited before children. Every visited node is touched and estimated.
    pub fn select_tiles(&mut self, view: &FrameView) -> Vec<TileSelection> {
        let mut selected = Vec::new();
        if let (TreeStatus::Ready, Some(root)) = (self.status(), self.root) {
            self.select_in(root, view, &mut selected);
        }
        selected
    }

    fn select_in(&mut self, id: NodeKey, view: &FrameView, out: &mut Vec<TileSelection>) {
        self.touch(id);
        self.estimate(id);
        if let Some(frustum) = &view.frustum
            && self.is_invisible(id, frustum.planes())
        {
            return;
        }
        let Some(node) = self.nodes.get(id) else {
            return;
        };
        let key = node.key;
        let distance = node.bounds.distance_to_point(view.eye).max(1.0);

        if key.level < view.max_level && tile_ground_size(&key) / distance > view.lod_factor {
            for index in 0..4 {
                if let Some(child) = self.child(id, index) {
                    self.select_in(child, view, out);
                }
            }
            return;
        }

        let mesh = self.get_render_mesh(id, view.mesh_lod);
        out.push(TileSelection { node: id, key, mesh });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TreeSettings;
    use crate::provider::{Delivery, MemoryTileProvider};
    use glam::DMat4;
    use globe_config::Config;
    use globe_math::{EARTH_RADIUS, GeoPoint};

    fn tree() -> Tree<MemoryTileProvider> {
        let provider = MemoryTileProvider::flat(Delivery::Immediate, 3, 12, 0.0);
        let mut tree = Tree::new(provider, TreeSettings::with_rho(3));
        tree.poll();
        tree
    }

    #[test]
    fn test_far_eye_selects_root() {
        let mut tree = tree();
        let view = FrameView::new(DVec3::new(1.0e10, 0.0, 0.0), &Config::default().terrain);
        let selected = tree.select_tiles(&view);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].key, TileKey::ROOT);
        assert!(selected[0].mesh.is_some());
        assert_eq!(tree.stats().touched_nodes, 1);
    }

    #[test]
    fn test_near_eye_refines_below() {
        let mut tree = tree();
        let mut config = Config::default().terrain;
        config.max_level = 8;
        let eye = GeoPoint::from_degrees(10.0, 45.0, 2000.0).to_cartesian();
        let selected = tree.select_tiles(&FrameView::new(eye, &config));

        let (xt, yt) = GeoPoint::from_degrees(10.0, 45.0, 0.0).to_unit();
        let under = TileKey::containing(8, xt, yt);
        assert!(
            selected.iter().any(|s| s.key == under),
            "the tile under the eye reaches max_level"
        );
        // Selections form a partition: no selected key lies under another.
        for a in &selected {
            for b in &selected {
                assert!(a.key == b.key || !a.key.is_descendant_of(&b.key));
            }
        }
        assert_eq!(tree.stats().touched_nodes, tree.node_count());
    }

    fn frame_from(eye: DVec3, target: DVec3, config: &TerrainConfig) -> FrameView {
        let view = DMat4::look_at_rh(eye, target, DVec3::Z);
        let proj = DMat4::perspective_rh(0.3, 1.0, 1000.0, 1.0e8);
        FrameView::new(eye, config).with_frustum(Frustum::from_view_projection(&(proj * view)))
    }

    #[test]
    fn test_frustum_facing_away_selects_nothing() {
        let mut tree = tree();
        let config = Config::default().terrain;
        let eye = DVec3::new(3.0 * EARTH_RADIUS, 0.0, 0.0);
        let selected = tree.select_tiles(&frame_from(eye, eye * 2.0, &config));
        assert!(selected.is_empty(), "globe is behind the camera");
        // The root is still visited and touched before being culled.
        assert_eq!(tree.stats().touched_nodes, 1);
        assert_eq!(tree.node_count(), 1);
    }

    #[test]
    fn test_frustum_facing_globe_selects_tiles() {
        let mut tree = tree();
        let mut config = Config::default().terrain;
        config.max_level = 4;
        let eye = DVec3::new(3.0 * EARTH_RADIUS, 0.0, 0.0);
        let selected = tree.select_tiles(&frame_from(eye, DVec3::ZERO, &config));
        assert!(!selected.is_empty());
        assert!(selected.iter().all(|s| s.key.level <= 4));
    }

    #[test]
    fn test_unknown_node_is_invisible() {
        let mut tree = tree();
        let root = tree.root().unwrap();
        let child = tree.child(root, 0).unwrap();
        tree.dispose(child);
        assert!(tree.is_invisible(child, &[]));
        assert!(!tree.is_invisible(root, &[]));
    }
}
