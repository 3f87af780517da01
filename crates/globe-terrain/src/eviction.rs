//! Recency-based cache reduction for nodes and meshes.

use rustc_hash::FxHashSet;

use crate::node::NodeKey;
use crate::provider::TileProvider;
use crate::tree::Tree;

impl<P: TileProvider> Tree<P> {
    /// Keep the `floor(reduce_factor * max_touch)` most recently touched
    /// nodes, preferring shallow ones on ties, together with their ancestors,
    /// and dispose the rest.
    pub(crate) fn reduce_nodes(&mut self, max_touch: usize) {
        let mut order: Vec<(i64, u8, NodeKey)> = self
            .nodes
            .iter()
            .map(|(id, node)| (node.last_touch_frame, node.key.level, id))
            .collect();
        order.sort_unstable_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

        let keep = (self.settings.reduce_factor * max_touch as f64).floor() as usize;
        let before = self.num_cache_nodes;

        // Disposing an ancestor takes its subtree with it, so a kept node pins
        // its whole parent chain.
        let mut pinned: FxHashSet<NodeKey> = FxHashSet::default();
        for &(_, _, id) in order.iter().take(keep) {
            let mut current = Some(id);
            while let Some(key) = current {
                if !pinned.insert(key) {
                    break;
                }
                current = self.nodes.get(key).and_then(|node| node.parent);
            }
        }

        for &(_, _, id) in order.iter().skip(keep) {
            if Some(id) != self.root && !pinned.contains(&id) {
                self.dispose(id);
            }
        }
        tracing::debug!(
            "Node eviction: {before} -> {} (max_touch {max_touch})",
            self.num_cache_nodes
        );
    }

    /// Keep the `floor(mesh_factor * touched)` most recently touched meshes.
    pub(crate) fn reduce_meshes(&mut self) {
        let mut order: Vec<(i64, NodeKey, u8)> = self
            .nodes
            .iter()
            .flat_map(|(id, node)| {
                node.meshes
                    .iter()
                    .map(move |(&lod, entry)| (entry.last_touch_frame, id, lod))
            })
            .collect();
        order.sort_unstable_by(|a, b| b.0.cmp(&a.0));

        let keep = (self.settings.mesh_factor * self.num_touch_meshes as f64).floor() as usize;
        let before = self.num_cache_meshes;
        for &(_, id, lod) in order.iter().skip(keep) {
            if let Some(node) = self.nodes.get_mut(id)
                && node.meshes.remove(&lod).is_some()
            {
                self.num_cache_meshes -= 1;
            }
        }
        tracing::debug!(
            "Mesh eviction: {before} -> {} (touched {})",
            self.num_cache_meshes,
            self.num_touch_meshes
        );
    }
}
