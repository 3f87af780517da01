//! Representative-height estimation.
//!
//! Every node carries a conservative `(min, base, max)` height triple and a
//! bounding box derived from it. The estimate comes from the best tile data
//! currently loaded along the node's ancestry and tightens as finer tiles
//! arrive. Until it is final, unresolved bounds are widened by a margin that
//! scales with the tile's ground size.

use globe_math::{TileKey, tile_bounds, tile_ground_size};

use crate::node::NodeKey;
use crate::provider::TileProvider;
use crate::tile::ElevationTile;
use crate::tree::Tree;

/// Margin coefficient below the representative height.
pub const FM: f64 = -2.0;
/// Margin coefficient above the representative height.
pub const FP: f64 = 2.0;

#[derive(Clone, Copy, Debug)]
struct Estimate {
    base: f64,
    min: f64,
    max: f64,
    determined: bool,
    zlimit: u8,
}

impl Estimate {
    /// Margin bounds around `base`, clamped to the range of a tile known to
    /// cover the footprint.
    fn with_margin(
        key: &TileKey,
        base: f64,
        range: (f64, f64),
        determined: bool,
        zlimit: u8,
    ) -> Self {
        let alpha = tile_ground_size(key);
        let mut min = (base + alpha * FM).max(range.0);
        let mut max = (base + alpha * FP).min(range.1);
        if min > max {
            (min, max) = range;
        }
        Self {
            base: base.clamp(min, max),
            min,
            max,
            determined,
            zlimit,
        }
    }
}

impl<P: TileProvider> Tree<P> {
    /// Recompute the height estimate and bounds of `id` unless they are
    /// already final. May request a finer ancestor tile.
    pub fn estimate(&mut self, id: NodeKey) {
        let Some(node) = self.nodes.get(id) else {
            return;
        };
        if node.determined {
            return;
        }
        let key = node.key;
        let estimate = if key.level < self.settings.rho {
            self.estimate_low(id, key)
        } else {
            self.estimate_high(id, key)
        };
        let Some(estimate) = estimate else {
            return;
        };

        if let Some(node) = self.nodes.get_mut(id) {
            node.base_height = estimate.base;
            node.height_min = estimate.min;
            node.height_max = estimate.max;
            node.determined = estimate.determined;
            node.dem_zlimit = estimate.zlimit;
            node.bounds = tile_bounds(&key, estimate.min, estimate.max);
            tracing::trace!(
                "Estimated {key}: {:.1} [{:.1}, {:.1}] determined={}",
                estimate.base,
                estimate.min,
                estimate.max,
                estimate.determined
            );
        }
    }

    /// Nodes shallower than ρ: base from the average-height map.
    fn estimate_low(&self, id: NodeKey, key: TileKey) -> Option<Estimate> {
        let zr = self.nearest_loaded(id, key.level)?;
        let base = self.avg_map.as_ref()?.sample(&key);
        let determined = zr.key().level == key.level || zr.is_leaf(&key);
        Some(Estimate::with_margin(
            &key,
            base,
            (zr.height_min(), zr.height_max()),
            determined,
            zr.key().level,
        ))
    }

    /// Nodes at or below ρ: base from the corners of the tile ρ levels up.
    fn estimate_high(&mut self, id: NodeKey, key: TileKey) -> Option<Estimate> {
        let rho = self.settings.rho;
        let zg = key.level;
        let za = self.nearest_loaded(id, zg - rho)?;
        let za_level = za.key().level;
        let corners = za.corner_heights(&key);

        if za.is_leaf(&key) {
            let min = corners.iter().copied().fold(f64::INFINITY, f64::min);
            let max = corners.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let base = corners.iter().sum::<f64>() / 4.0;
            return Some(Estimate {
                base: base.clamp(min, max),
                min,
                max,
                determined: true,
                zlimit: za_level,
            });
        }

        let base = corners.iter().sum::<f64>() / 4.0;
        let zc = self.nearest_loaded(id, za_level + rho)?;
        let determined = za_level + rho == zg && (zc.key().level == zg || zc.is_leaf(&key));
        let estimate = Estimate::with_margin(
            &key,
            base,
            (zc.height_min(), zc.height_max()),
            determined,
            za_level,
        );

        if za_level < zg - rho {
            // Skip ahead over levels the tile already reports as covered.
            let step = za.quad_level(&key).max(1);
            let ze = za_level.saturating_add(step).min(zg - rho);
            self.request_ancestor_tile(id, ze);
        }
        Some(estimate)
    }
}
