//! Elevation lookups against whatever is already cached.

use std::sync::Arc;

use globe_math::{GeoPoint, TileKey};

use crate::node::TileState;
use crate::provider::TileProvider;
use crate::tile::ElevationTile;
use crate::tree::Tree;

impl<P: TileProvider> Tree<P> {
    /// Finest loaded tile covering the unit Mercator point `(xt, yt)`.
    ///
    /// Follows existing children only. Nothing is created, touched or
    /// requested.
    pub fn find_highest_accuracy(&self, xt: f64, yt: f64) -> Option<Arc<P::Tile>> {
        let mut id = self.root?;
        let mut best = None;
        loop {
            let node = self.nodes.get(id)?;
            if let TileState::Loaded(tile) = &node.tile {
                best = Some(Arc::clone(tile));
            }
            if node.key.level >= TileKey::MAX_LEVEL {
                break;
            }
            let index = TileKey::containing(node.key.level + 1, xt, yt).child_index();
            match node.children[index] {
                Some(child) => id = child,
                None => break,
            }
        }
        best
    }

    /// Height above the sphere at each point from the finest cached tile, or
    /// `0.0` where nothing covers it. Read-only.
    pub fn get_existing_elevations(&self, points: &[GeoPoint]) -> Vec<f64> {
        points
            .iter()
            .map(|point| {
                let (xt, yt) = point.to_unit();
                self.find_highest_accuracy(xt, yt)
                    .map_or(0.0, |tile| sample_unit(tile.as_ref(), xt, yt))
            })
            .collect()
    }
}

fn sample_unit<T: ElevationTile>(tile: &T, xt: f64, yt: f64) -> f64 {
    let r = tile.key().unit_rect();
    let u = ((xt - r.x_min) / (r.x_max - r.x_min)).clamp(0.0, 1.0);
    let v = ((yt - r.y_min) / (r.y_max - r.y_min)).clamp(0.0, 1.0);
    tile.sample(u, v)
}
