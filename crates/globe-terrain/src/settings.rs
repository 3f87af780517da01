//! Tree tuning parameters.

use globe_config::Config;

/// Parameters fixed for the lifetime of a [`Tree`](crate::Tree).
#[derive(Clone, Debug, PartialEq)]
pub struct TreeSettings {
    /// Resolution power ρ: quadtree levels spanned by one elevation tile.
    pub rho: u8,
    /// Tile requests allowed in flight at once.
    pub max_pending_requests: usize,
    /// Node eviction runs when cached nodes exceed `reduce_thresh * max_touch`.
    pub reduce_thresh: f64,
    /// Node eviction keeps `floor(reduce_factor * max_touch)` nodes.
    pub reduce_factor: f64,
    /// Mesh eviction never runs at or below this many cached meshes.
    pub mesh_floor: usize,
    /// Mesh eviction runs when cached meshes exceed `mesh_thresh * touched`.
    pub mesh_thresh: f64,
    /// Mesh eviction keeps `floor(mesh_factor * touched)` meshes.
    pub mesh_factor: f64,
    /// Frames of touch history tracked for `max_touch`.
    pub hist_window: usize,
}

impl Default for TreeSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for TreeSettings {
    fn from(config: &Config) -> Self {
        Self {
            rho: config.terrain.resolution_power.clamp(1, 16),
            max_pending_requests: config.terrain.max_pending_requests,
            reduce_thresh: config.cache.reduce_thresh,
            reduce_factor: config.cache.reduce_factor,
            mesh_floor: config.cache.mesh_floor,
            mesh_thresh: config.cache.mesh_thresh,
            mesh_factor: config.cache.mesh_factor,
            hist_window: config.cache.hist_window,
        }
    }
}

impl TreeSettings {
    /// Default settings with resolution power `rho`.
    pub fn with_rho(rho: u8) -> Self {
        Self {
            rho: rho.clamp(1, 16),
            ..Self::default()
        }
    }
}
