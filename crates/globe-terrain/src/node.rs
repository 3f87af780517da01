//! Quadtree cells and their tile binding.

use std::sync::Arc;

use globe_math::{Aabb, TileKey};
use rustc_hash::FxHashMap;

use crate::mesh::MeshCacheEntry;
use crate::producer::ProducerId;
use crate::provider::{CancelToken, RequestId};

slotmap::new_key_type! {
    /// Handle to a [`Node`] inside a [`Tree`](crate::Tree). Stale handles to
    /// disposed nodes resolve to nothing.
    pub struct NodeKey;
}

/// Elevation tile bound to exactly one node.
#[derive(Debug)]
pub enum TileState<T> {
    None,
    Requested { request: RequestId, token: CancelToken },
    Loaded(Arc<T>),
    Failed,
}

impl<T> TileState<T> {
    pub fn loaded(&self) -> Option<&Arc<T>> {
        match self {
            TileState::Loaded(tile) => Some(tile),
            _ => None,
        }
    }

    pub fn is_requested(&self) -> bool {
        matches!(self, TileState::Requested { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, TileState::Failed)
    }
}

/// One cell of the terrain quadtree.
///
/// Height and bounds fields are only meaningful after the tree has estimated
/// the node, which happens as soon as it is created.
#[derive(Debug)]
pub struct Node<T> {
    pub(crate) key: TileKey,
    pub(crate) parent: Option<NodeKey>,
    pub(crate) children: [Option<NodeKey>; 4],
    pub(crate) tile: TileState<T>,
    pub(crate) base_height: f64,
    pub(crate) height_min: f64,
    pub(crate) height_max: f64,
    pub(crate) bounds: Aabb,
    pub(crate) dem_zlimit: u8,
    pub(crate) determined: bool,
    pub(crate) last_touch_frame: i64,
    pub(crate) meshes: FxHashMap<u8, MeshCacheEntry>,
    pub(crate) producers: Option<FxHashMap<ProducerId, bool>>,
}

impl<T> Node<T> {
    pub(crate) fn new(key: TileKey, parent: Option<NodeKey>) -> Self {
        Self {
            key,
            parent,
            children: [None; 4],
            tile: TileState::None,
            base_height: 0.0,
            height_min: 0.0,
            height_max: 0.0,
            bounds: Aabb::default(),
            dem_zlimit: 0,
            determined: false,
            last_touch_frame: -1,
            meshes: FxHashMap::default(),
            producers: None,
        }
    }

    pub fn key(&self) -> TileKey {
        self.key
    }

    /// `None` for the root.
    pub fn parent(&self) -> Option<NodeKey> {
        self.parent
    }

    /// Child slots indexed by `2 * v + u`. Empty until first accessed.
    pub fn children(&self) -> &[Option<NodeKey>; 4] {
        &self.children
    }

    pub fn tile(&self) -> &TileState<T> {
        &self.tile
    }

    /// Representative terrain height.
    pub fn base_height(&self) -> f64 {
        self.base_height
    }

    pub fn height_min(&self) -> f64 {
        self.height_min
    }

    pub fn height_max(&self) -> f64 {
        self.height_max
    }

    /// Geocentric box enclosing all terrain under this node.
    pub fn bounds(&self) -> &Aabb {
        &self.bounds
    }

    /// Finest tile level usable for meshing this node without new requests.
    pub fn dem_zlimit(&self) -> u8 {
        self.dem_zlimit
    }

    /// Whether the height estimate is final for the current tile states.
    pub fn is_determined(&self) -> bool {
        self.determined
    }

    /// Frame of the last touch, `-1` if never touched.
    pub fn last_touch_frame(&self) -> i64 {
        self.last_touch_frame
    }

    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    /// Mesh LODs cached on this node.
    pub fn mesh_lods(&self) -> impl Iterator<Item = u8> + '_ {
        self.meshes.keys().copied()
    }
}
