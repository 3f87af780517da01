//! Level-of-detail terrain quadtree for a spherical globe.
//!
//! A [`Tree`] mirrors the Web-Mercator tile pyramid. Nodes are created lazily
//! by traversal, carry estimated height bounds that tighten as elevation tiles
//! arrive from a [`TileProvider`], cache render meshes, and are evicted by
//! recency at the end of each frame. The tree also answers ray casts and
//! elevation queries and tracks which entity producers cover each node.

mod estimate;
mod eviction;
mod grid_tile;
mod hist_stats;
mod mesh;
mod node;
mod producer;
mod provider;
mod query;
mod raycast;
mod settings;
mod tile;
mod traversal;
mod tree;

pub use estimate::{FM, FP};
pub use grid_tile::GridTile;
pub use hist_stats::HistStats;
pub use mesh::{MeshCacheEntry, OverlayMesh, TerrainMesh, TerrainVertex};
pub use node::{Node, NodeKey, TileState};
pub use producer::{AreaStatus, EntityProducer, ProducerId};
pub use provider::{
    CancelToken, Delivery, MemoryTileProvider, RequestId, TileProvider, TileReply, TileResponse,
};
pub use settings::TreeSettings;
pub use tile::{AverageHeightMap, ElevationTile, TileError};
pub use traversal::{FrameView, TileSelection};
pub use tree::{CacheStats, Tree, TreeStatus};
