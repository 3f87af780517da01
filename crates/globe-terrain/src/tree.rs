//! The terrain quadtree: root bootstrap, node lifecycle and the asynchronous
//! tile cache.

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, unbounded};
use globe_math::TileKey;
use rustc_hash::{FxHashMap, FxHashSet};
use slotmap::SlotMap;

use crate::hist_stats::HistStats;
use crate::node::{Node, NodeKey, TileState};
use crate::producer::{EntityProducer, ProducerId};
use crate::provider::{CancelToken, RequestId, TileProvider, TileReply, TileResponse};
use crate::settings::TreeSettings;
use crate::tile::{AverageHeightMap, ElevationTile};

/// Bootstrap state of a [`Tree`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TreeStatus {
    /// The root tile has not arrived yet.
    NotReady,
    Ready,
    /// The root tile could not be loaded. Permanent.
    Failed,
}

/// Snapshot of the cache counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub frame: i64,
    pub touched_nodes: usize,
    pub cached_nodes: usize,
    pub touched_meshes: usize,
    pub cached_meshes: usize,
    pub pending_requests: usize,
}

#[derive(Clone, Copy, Debug)]
enum RequestTarget {
    Root,
    Node(NodeKey),
}

#[derive(Clone, Copy, Debug)]
struct PendingRequest {
    target: RequestTarget,
    key: TileKey,
    token: CancelToken,
}

/// Terrain quadtree over one tile provider.
///
/// All mutation happens through `&mut self` on the owning thread. Tile
/// completions are queued by the provider and applied by [`Tree::poll`].
pub struct Tree<P: TileProvider> {
    pub(crate) provider: P,
    pub(crate) settings: TreeSettings,
    status: TreeStatus,
    pub(crate) nodes: SlotMap<NodeKey, Node<P::Tile>>,
    pub(crate) root: Option<NodeKey>,
    pub(crate) avg_map: Option<AverageHeightMap>,
    hist: HistStats,
    pub(crate) frame_counter: i64,
    pub(crate) num_touch_nodes: usize,
    pub(crate) num_cache_nodes: usize,
    pub(crate) num_touch_meshes: usize,
    pub(crate) num_cache_meshes: usize,
    num_pending_requests: usize,
    next_request: u64,
    root_request: Option<RequestId>,
    pending: FxHashMap<RequestId, PendingRequest>,
    sender: Sender<TileResponse>,
    receiver: Receiver<TileResponse>,
    pub(crate) producers: FxHashMap<ProducerId, Arc<dyn EntityProducer>>,
    updated_tiles: Vec<TileKey>,
    updated_set: FxHashSet<TileKey>,
}

impl<P: TileProvider> Tree<P> {
    /// Create a tree and request the root tile.
    pub fn new(provider: P, settings: TreeSettings) -> Self {
        let (sender, receiver) = unbounded();
        let hist = HistStats::new(settings.hist_window);
        let mut tree = Self {
            provider,
            settings,
            status: TreeStatus::NotReady,
            nodes: SlotMap::with_key(),
            root: None,
            avg_map: None,
            hist,
            frame_counter: 0,
            num_touch_nodes: 0,
            num_cache_nodes: 0,
            num_touch_meshes: 0,
            num_cache_meshes: 0,
            num_pending_requests: 0,
            next_request: 0,
            root_request: None,
            pending: FxHashMap::default(),
            sender,
            receiver,
            producers: FxHashMap::default(),
            updated_tiles: Vec::new(),
            updated_set: FxHashSet::default(),
        };
        let (request, _) = tree.issue_request(RequestTarget::Root, TileKey::ROOT);
        tree.root_request = Some(request);
        tracing::debug!("Requested root tile (rho = {})", tree.settings.rho);
        tree
    }

    pub fn status(&self) -> TreeStatus {
        self.status
    }

    pub fn settings(&self) -> &TreeSettings {
        &self.settings
    }

    /// Resolution power ρ.
    pub fn rho(&self) -> u8 {
        self.settings.rho
    }

    pub fn root(&self) -> Option<NodeKey> {
        self.root
    }

    pub fn node(&self, id: NodeKey) -> Option<&Node<P::Tile>> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: NodeKey) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn node_count(&self) -> usize {
        self.num_cache_nodes
    }

    pub fn mesh_count(&self) -> usize {
        self.num_cache_meshes
    }

    pub fn frame(&self) -> i64 {
        self.frame_counter
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn provider_mut(&mut self) -> &mut P {
        &mut self.provider
    }

    pub fn average_height_map(&self) -> Option<&AverageHeightMap> {
        self.avg_map.as_ref()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            frame: self.frame_counter,
            touched_nodes: self.num_touch_nodes,
            cached_nodes: self.num_cache_nodes,
            touched_meshes: self.num_touch_meshes,
            cached_meshes: self.num_cache_meshes,
            pending_requests: self.num_pending_requests,
        }
    }

    /// Tiles loaded since the last call or the last [`Tree::end_frame`],
    /// in arrival order, each key once.
    pub fn take_updated_tiles(&mut self) -> Vec<TileKey> {
        self.updated_set.clear();
        std::mem::take(&mut self.updated_tiles)
    }

    fn note_updated(&mut self, key: TileKey) {
        if self.updated_set.insert(key) {
            self.updated_tiles.push(key);
        }
    }

    /// Live node for `key`, if the path down to it has been created.
    pub fn find_node(&self, key: TileKey) -> Option<NodeKey> {
        let mut id = self.root?;
        for level in 1..=key.level {
            let index = key.ancestor(level).child_index();
            id = self.nodes.get(id)?.children[index]?;
        }
        Some(id)
    }

    // --- Tile delivery ---

    /// Apply every tile completion queued by the provider. Returns how many
    /// responses were processed, including ignored late ones.
    pub fn poll(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(response) = self.receiver.try_recv() {
            self.on_tile_response(response);
            handled += 1;
        }
        handled
    }

    fn on_tile_response(&mut self, response: TileResponse) {
        let Some(pending) = self.pending.remove(&response.request) else {
            tracing::trace!("Ignoring response for retired request {:?}", response.request);
            return;
        };
        self.num_pending_requests = self.num_pending_requests.saturating_sub(1);

        let tile = response.data.and_then(|bytes| {
            P::Tile::decode(pending.key, self.settings.rho, &bytes)
                .map_err(|e| tracing::warn!("Failed to decode tile {}: {e}", pending.key))
                .ok()
        });

        match pending.target {
            RequestTarget::Root => self.on_root_tile(tile),
            RequestTarget::Node(id) => self.on_node_tile(id, response.request, pending.key, tile),
        }
    }

    fn on_root_tile(&mut self, tile: Option<P::Tile>) {
        self.root_request = None;
        match tile {
            Some(tile) => {
                let avg_map = tile.new_average_height_map(self.settings.rho);
                let mut node = Node::new(TileKey::ROOT, None);
                node.tile = TileState::Loaded(Arc::new(tile));
                let root = self.nodes.insert(node);
                self.root = Some(root);
                self.avg_map = Some(avg_map);
                self.num_cache_nodes += 1;
                self.status = TreeStatus::Ready;
                self.note_updated(TileKey::ROOT);
                self.estimate(root);
                tracing::info!("Terrain tree ready");
            }
            None => {
                self.status = TreeStatus::Failed;
                tracing::warn!("Root tile unavailable, terrain tree failed");
            }
        }
    }

    fn on_node_tile(
        &mut self,
        id: NodeKey,
        request: RequestId,
        key: TileKey,
        tile: Option<P::Tile>,
    ) {
        let Some(node) = self.nodes.get_mut(id) else {
            return;
        };
        match node.tile {
            TileState::Requested { request: r, .. } if r == request => {}
            _ => return,
        }
        match tile {
            Some(tile) => {
                node.tile = TileState::Loaded(Arc::new(tile));
                self.note_updated(key);
                tracing::trace!("Loaded tile {key}");
            }
            None => {
                node.tile = TileState::Failed;
                tracing::debug!("Tile {key} unavailable");
            }
        }
    }

    fn issue_request(&mut self, target: RequestTarget, key: TileKey) -> (RequestId, CancelToken) {
        let request = RequestId(self.next_request);
        self.next_request += 1;
        let reply = TileReply::new(request, self.sender.clone());
        let token = self.provider.request_tile(key, reply);
        self.pending.insert(
            request,
            PendingRequest {
                target,
                key,
                token,
            },
        );
        self.num_pending_requests += 1;
        (request, token)
    }

    fn retire_request(&mut self, request: RequestId) {
        if let Some(pending) = self.pending.remove(&request) {
            self.provider.cancel_request(pending.token);
            self.num_pending_requests = self.num_pending_requests.saturating_sub(1);
        }
    }

    /// Make sure the tile of the ancestor of `id` at level `ze` is loaded or on
    /// its way.
    ///
    /// A failed tile is never re-requested; its parent is tried instead. When
    /// the request budget is exhausted nothing happens and a later call
    /// retries.
    pub fn request_ancestor_tile(&mut self, id: NodeKey, ze: u8) {
        let Some(mut current) = self.ancestor_at(id, ze) else {
            return;
        };
        loop {
            let Some(node) = self.nodes.get(current) else {
                return;
            };
            match node.tile {
                TileState::Loaded(_) | TileState::Requested { .. } => return,
                TileState::Failed => match node.parent {
                    Some(parent) => current = parent,
                    None => return,
                },
                TileState::None => {
                    let key = node.key;
                    if self.num_pending_requests >= self.settings.max_pending_requests {
                        tracing::debug!("Request budget exhausted, deferring tile {key}");
                        return;
                    }
                    let (request, token) = self.issue_request(RequestTarget::Node(current), key);
                    if let Some(node) = self.nodes.get_mut(current) {
                        node.tile = TileState::Requested { request, token };
                    }
                    tracing::trace!("Requested tile {key}");
                    return;
                }
            }
        }
    }

    /// Walk from `id` up to its ancestor (or itself) at `level`.
    pub(crate) fn ancestor_at(&self, id: NodeKey, level: u8) -> Option<NodeKey> {
        let mut current = id;
        loop {
            let node = self.nodes.get(current)?;
            if node.key.level <= level {
                return Some(current);
            }
            current = node.parent?;
        }
    }

    /// Nearest loaded tile at or above `level` on the path from `id` to the
    /// root.
    pub(crate) fn nearest_loaded(&self, id: NodeKey, level: u8) -> Option<Arc<P::Tile>> {
        let mut current = self.ancestor_at(id, level);
        while let Some(cid) = current {
            let node = self.nodes.get(cid)?;
            if let TileState::Loaded(tile) = &node.tile {
                return Some(Arc::clone(tile));
            }
            current = node.parent;
        }
        None
    }

    // --- Node lifecycle ---

    /// Child `index` (`2 * v + u`) of `parent`, created and estimated on first
    /// access.
    pub fn child(&mut self, parent: NodeKey, index: usize) -> Option<NodeKey> {
        let node = self.nodes.get(parent)?;
        if let Some(child) = node.children[index] {
            return Some(child);
        }
        if node.key.level >= TileKey::MAX_LEVEL {
            return None;
        }
        let key = node.key.child_at(index);
        let child = self.nodes.insert(Node::new(key, Some(parent)));
        if let Some(node) = self.nodes.get_mut(parent) {
            node.children[index] = Some(child);
        }
        self.num_cache_nodes += 1;
        self.estimate(child);
        Some(child)
    }

    /// Mark `id` as used this frame. Only the first touch per frame counts.
    pub fn touch(&mut self, id: NodeKey) {
        if let Some(node) = self.nodes.get_mut(id)
            && node.last_touch_frame != self.frame_counter
        {
            node.last_touch_frame = self.frame_counter;
            self.num_touch_nodes += 1;
        }
    }

    /// Remove `id` and its subtree, cancelling their requests and dropping
    /// their meshes. The root cannot be disposed. Returns the number of nodes
    /// removed.
    pub fn dispose(&mut self, id: NodeKey) -> usize {
        let Some(node) = self.nodes.get(id) else {
            return 0;
        };
        let Some(parent) = node.parent else {
            tracing::debug!("Refusing to dispose the root node");
            return 0;
        };
        let slot = node.key.child_index();
        if let Some(parent) = self.nodes.get_mut(parent) {
            parent.children[slot] = None;
        }

        let mut removed = 0;
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(node) = self.nodes.remove(current) else {
                continue;
            };
            stack.extend(node.children.iter().flatten());
            if let TileState::Requested { request, .. } = node.tile {
                self.retire_request(request);
            }
            self.num_cache_meshes -= node.meshes.len();
            self.num_cache_nodes -= 1;
            removed += 1;
        }
        removed
    }

    /// Abort bootstrap, or once ready drop everything below the root.
    pub fn cancel(&mut self) {
        match self.status {
            TreeStatus::NotReady => {
                if let Some(request) = self.root_request.take() {
                    self.retire_request(request);
                    tracing::debug!("Cancelled root tile request");
                }
            }
            TreeStatus::Ready => {
                let Some(root) = self.root else {
                    return;
                };
                let children = self.nodes.get(root).map(|n| n.children).unwrap_or_default();
                let removed: usize = children.into_iter().flatten().map(|c| self.dispose(c)).sum();
                tracing::debug!("Cancelled tree, disposed {removed} nodes");
            }
            TreeStatus::Failed => {}
        }
    }

    // --- Frame lifecycle ---

    /// Close the current frame: evict if the caches outgrew recent demand,
    /// then reset the touch counters and updated tiles and advance the frame
    /// counter.
    pub fn end_frame(&mut self) {
        let max_touch = self.hist.get_max(self.num_touch_nodes);
        if self.num_cache_nodes as f64 > self.settings.reduce_thresh * max_touch as f64 {
            self.reduce_nodes(max_touch);
        }

        if self.num_cache_meshes > self.settings.mesh_floor
            && self.num_cache_meshes as f64
                > self.settings.mesh_thresh * self.num_touch_meshes as f64
        {
            self.reduce_meshes();
        }

        self.updated_tiles.clear();
        self.updated_set.clear();
        self.num_touch_nodes = 0;
        self.num_touch_meshes = 0;
        self.frame_counter += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid_tile::GridTile;
    use crate::provider::{Delivery, MemoryTileProvider};

    fn manual_tree(rho: u8) -> Tree<MemoryTileProvider> {
        let provider = MemoryTileProvider::flat(Delivery::Manual, rho, 12, 50.0);
        Tree::new(provider, TreeSettings::with_rho(rho))
    }

    fn ready_tree(rho: u8) -> Tree<MemoryTileProvider> {
        let mut tree = manual_tree(rho);
        tree.provider_mut().deliver_all();
        tree.poll();
        tree
    }

    #[test]
    fn test_bootstrap_ready() {
        let mut tree = manual_tree(2);
        assert_eq!(tree.status(), TreeStatus::NotReady);
        assert_eq!(tree.stats().pending_requests, 1);
        assert!(tree.root().is_none());

        assert_eq!(tree.provider_mut().deliver_all(), 1);
        assert_eq!(tree.poll(), 1);
        assert_eq!(tree.status(), TreeStatus::Ready);
        assert_eq!(tree.node_count(), 1);
        assert_eq!(tree.stats().pending_requests, 0);
        assert_eq!(tree.average_height_map().map(|m| m.levels()), Some(2));
        assert_eq!(tree.take_updated_tiles(), vec![TileKey::ROOT]);
    }

    #[test]
    fn test_bootstrap_failure_is_permanent() {
        let provider = MemoryTileProvider::new(Delivery::Immediate, |_| None);
        let mut tree = Tree::new(provider, TreeSettings::with_rho(2));
        tree.poll();
        assert_eq!(tree.status(), TreeStatus::Failed);
        tree.end_frame();
        tree.poll();
        assert_eq!(tree.status(), TreeStatus::Failed);
        assert_eq!(tree.provider().requested().len(), 1, "root must not be retried");
    }

    #[test]
    fn test_undecodable_root_fails() {
        let provider = MemoryTileProvider::new(Delivery::Immediate, |_| Some(vec![0; 4]));
        let mut tree = Tree::new(provider, TreeSettings::with_rho(2));
        tree.poll();
        assert_eq!(tree.status(), TreeStatus::Failed);
    }

    #[test]
    fn test_cancel_before_ready() {
        let mut tree = manual_tree(2);
        tree.cancel();
        assert_eq!(tree.provider().cancelled(), &[TileKey::ROOT]);
        assert_eq!(tree.stats().pending_requests, 0);

        // The provider still answers; the tree ignores it.
        tree.provider_mut().deliver_all();
        tree.poll();
        assert_eq!(tree.status(), TreeStatus::NotReady);
        assert!(tree.root().is_none());
    }

    #[test]
    fn test_cancel_when_ready_keeps_root() {
        let mut tree = ready_tree(2);
        let root = tree.root().unwrap();
        let a = tree.child(root, 0).unwrap();
        tree.child(a, 3).unwrap();
        tree.child(root, 2).unwrap();
        assert_eq!(tree.node_count(), 4);

        tree.cancel();
        assert_eq!(tree.node_count(), 1);
        assert!(tree.contains(root));
        assert!(!tree.contains(a));
        assert_eq!(tree.node(root).unwrap().children(), &[None; 4]);
    }

    #[test]
    fn test_child_is_created_once() {
        let mut tree = ready_tree(2);
        let root = tree.root().unwrap();
        let a = tree.child(root, 1).unwrap();
        let b = tree.child(root, 1).unwrap();
        assert_eq!(a, b);
        assert_eq!(tree.node(a).unwrap().key(), TileKey::new(1, 1, 0));
        assert_eq!(tree.node(a).unwrap().parent(), Some(root));
        assert_eq!(tree.find_node(TileKey::new(1, 1, 0)), Some(a));
        assert_eq!(tree.find_node(TileKey::new(1, 0, 0)), None);
    }

    #[test]
    fn test_touch_counts_once_per_frame() {
        let mut tree = ready_tree(2);
        let root = tree.root().unwrap();
        tree.touch(root);
        tree.touch(root);
        assert_eq!(tree.stats().touched_nodes, 1);
        tree.end_frame();
        assert_eq!(tree.stats().touched_nodes, 0);
        tree.touch(root);
        assert_eq!(tree.stats().touched_nodes, 1);
        assert_eq!(tree.node(root).unwrap().last_touch_frame(), 1);
    }

    #[test]
    fn test_dispose_root_refused() {
        let mut tree = ready_tree(2);
        let root = tree.root().unwrap();
        assert_eq!(tree.dispose(root), 0);
        assert!(tree.contains(root));
    }

    #[test]
    fn test_dispose_cancels_requests() {
        let mut tree = ready_tree(2);
        let root = tree.root().unwrap();
        let a = tree.child(root, 0).unwrap();
        let b = tree.child(a, 0).unwrap();
        tree.request_ancestor_tile(b, 2);
        assert!(tree.node(b).unwrap().tile().is_requested());
        assert_eq!(tree.stats().pending_requests, 1);

        assert_eq!(tree.dispose(a), 2);
        assert_eq!(tree.stats().pending_requests, 0);
        assert_eq!(tree.provider().cancelled(), &[TileKey::new(2, 0, 0)]);
        assert!(tree.node(b).is_none());

        // Late completion for the disposed node is ignored.
        tree.take_updated_tiles();
        tree.provider_mut().deliver_all();
        assert_eq!(tree.poll(), 1);
        assert_eq!(tree.node_count(), 1);
        assert!(tree.take_updated_tiles().is_empty());
        assert_eq!(tree.stats().pending_requests, 0);
    }

    #[test]
    fn test_dispose_drops_subtree_meshes() {
        let mut tree = ready_tree(2);
        let root = tree.root().unwrap();
        let a = tree.child(root, 0).unwrap();
        let b = tree.child(a, 0).unwrap();
        let c = tree.child(a, 3).unwrap();
        let other = tree.child(root, 1).unwrap();
        for lod in 0..=2 {
            tree.get_render_mesh(a, lod).unwrap();
            tree.get_render_mesh(other, lod).unwrap();
        }
        tree.get_render_mesh(b, 1).unwrap();
        tree.get_render_mesh(c, 2).unwrap();
        tree.get_render_mesh(root, 2).unwrap();
        assert_eq!(tree.mesh_count(), 9);

        let subtree: usize = [a, b, c]
            .iter()
            .map(|&id| tree.node(id).unwrap().mesh_count())
            .sum();
        assert_eq!(subtree, 5);
        let before = tree.mesh_count();
        assert_eq!(tree.dispose(a), 3);
        assert_eq!(tree.mesh_count(), before - subtree);
        assert_eq!(tree.stats().cached_meshes, 4);
    }

    #[test]
    fn test_updated_tiles_are_per_frame() {
        let mut tree = ready_tree(2);
        let root = tree.root().unwrap();
        // Load, evict and reload the same tile without draining.
        for _ in 0..50 {
            let a = tree.child(root, 0).unwrap();
            tree.request_ancestor_tile(a, 1);
            tree.provider_mut().deliver_all();
            tree.poll();
            tree.end_frame();
            assert!(!tree.contains(a));
        }
        assert!(tree.take_updated_tiles().is_empty());

        // Reloads within one frame are reported once.
        for _ in 0..3 {
            let a = tree.child(root, 0).unwrap();
            tree.request_ancestor_tile(a, 1);
            tree.provider_mut().deliver_all();
            tree.poll();
            tree.dispose(a);
        }
        assert_eq!(tree.take_updated_tiles(), vec![TileKey::new(1, 0, 0)]);
        assert!(tree.take_updated_tiles().is_empty());
    }

    #[test]
    fn test_request_loads_tile() {
        let mut tree = ready_tree(2);
        let root = tree.root().unwrap();
        let a = tree.child(root, 3).unwrap();
        tree.request_ancestor_tile(a, 1);
        tree.request_ancestor_tile(a, 1);
        assert_eq!(tree.stats().pending_requests, 1, "one request per node");

        tree.provider_mut().deliver_all();
        tree.poll();
        let tile: &Arc<GridTile> = tree.node(a).unwrap().tile().loaded().unwrap();
        assert_eq!(tile.key(), TileKey::new(1, 1, 1));
    }

    #[test]
    fn test_failed_tile_retries_one_level_up() {
        let provider = MemoryTileProvider::flat(Delivery::Manual, 2, 12, 50.0);
        let mut tree = Tree::new(provider, TreeSettings::with_rho(2));
        tree.provider_mut().deliver_all();
        tree.poll();
        let root = tree.root().unwrap();
        let a = tree.child(root, 0).unwrap();
        let b = tree.child(a, 0).unwrap();

        tree.request_ancestor_tile(b, 2);
        tree.provider_mut().fail(TileKey::new(2, 0, 0));
        tree.poll();
        assert!(tree.node(b).unwrap().tile().is_failed());

        tree.request_ancestor_tile(b, 2);
        assert_eq!(
            tree.provider().queued_keys(),
            vec![TileKey::new(1, 0, 0)],
            "failed level is skipped"
        );
    }

    #[test]
    fn test_request_budget() {
        let provider = MemoryTileProvider::flat(Delivery::Manual, 2, 12, 50.0);
        let settings = TreeSettings {
            max_pending_requests: 2,
            ..TreeSettings::with_rho(2)
        };
        let mut tree = Tree::new(provider, settings);
        tree.provider_mut().deliver_all();
        tree.poll();
        let root = tree.root().unwrap();
        let children: Vec<_> = (0..4).map(|i| tree.child(root, i).unwrap()).collect();
        for &c in &children {
            tree.request_ancestor_tile(c, 1);
        }
        assert_eq!(tree.stats().pending_requests, 2);
        assert!(matches!(tree.node(children[3]).unwrap().tile(), TileState::None));

        tree.provider_mut().deliver_all();
        tree.poll();
        tree.request_ancestor_tile(children[3], 1);
        assert!(tree.node(children[3]).unwrap().tile().is_requested());
    }
}
