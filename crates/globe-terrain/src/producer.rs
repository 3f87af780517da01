//! Entity producers: overlay geometry generators that claim parts of the
//! globe.
//!
//! Each node lazily records which producers touch its footprint and whether
//! they cover it fully. A producer that fully covers a node covers every
//! descendant, so its children inherit the flag without asking the producer
//! again. Partial coverage is re-queried per child.

use std::sync::Arc;

use globe_math::TileKey;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::mesh::{OverlayMesh, TerrainMesh};
use crate::node::NodeKey;
use crate::provider::TileProvider;
use crate::tree::Tree;

/// Stable identity of a producer across frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProducerId(pub u32);

/// How much of a footprint a producer draws on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AreaStatus {
    Empty,
    Partial,
    Full,
}

/// Overlay geometry source consulted by the tree.
pub trait EntityProducer {
    fn id(&self) -> ProducerId;

    /// Coverage of the footprint of `key`.
    fn area_status(&self, key: &TileKey) -> AreaStatus;

    /// Build overlay geometry for `key` on top of `mesh`. `full` is the
    /// recorded coverage flag.
    fn create_overlay(&self, key: &TileKey, mesh: &TerrainMesh, full: bool) -> Option<OverlayMesh>;

    /// Whether the producer changed since the last call. Dirty producers are
    /// re-propagated by [`Tree::put_next_producers`].
    fn take_dirty(&self) -> bool {
        false
    }
}

impl<P: TileProvider> Tree<P> {
    /// Replace the registered producer set with `next`.
    ///
    /// Producers missing from `next` are removed, new ones are added and
    /// retained ones reporting [`EntityProducer::take_dirty`] are updated.
    pub fn put_next_producers(&mut self, next: &[Arc<dyn EntityProducer>]) {
        let next_ids: FxHashSet<ProducerId> = next.iter().map(|p| p.id()).collect();
        let removed: Vec<ProducerId> = self
            .producers
            .keys()
            .copied()
            .filter(|id| !next_ids.contains(id))
            .collect();
        for id in removed {
            self.remove_producer(id);
        }

        for producer in next {
            let id = producer.id();
            if !self.producers.contains_key(&id) {
                producer.take_dirty();
                self.add_producer(Arc::clone(producer));
            } else if producer.take_dirty() {
                self.update_producer(Arc::clone(producer));
            }
        }
    }

    /// Registered producer ids.
    pub fn producer_ids(&self) -> Vec<ProducerId> {
        let mut ids: Vec<_> = self.producers.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    fn add_producer(&mut self, producer: Arc<dyn EntityProducer>) {
        let id = producer.id();
        self.producers.insert(id, Arc::clone(&producer));
        if let Some(root) = self.root {
            self.add_membership(root, &producer, false);
        }
        tracing::debug!("Added entity producer {id:?}");
    }

    fn remove_producer(&mut self, id: ProducerId) {
        self.producers.remove(&id);
        if let Some(root) = self.root {
            self.remove_membership(root, id);
        }
        tracing::debug!("Removed entity producer {id:?}");
    }

    fn update_producer(&mut self, producer: Arc<dyn EntityProducer>) {
        let id = producer.id();
        if let Some(root) = self.root {
            self.remove_membership(root, id);
        }
        self.producers.insert(id, Arc::clone(&producer));
        if let Some(root) = self.root {
            self.add_membership(root, &producer, false);
        }
        tracing::debug!("Updated entity producer {id:?}");
    }

    /// Record `producer` on the materialized part of the subtree at `id`.
    fn add_membership(
        &mut self,
        id: NodeKey,
        producer: &Arc<dyn EntityProducer>,
        parent_full: bool,
    ) {
        let Some(node) = self.nodes.get_mut(id) else {
            return;
        };
        let Some(map) = node.producers.as_mut() else {
            return;
        };
        let full = if parent_full {
            true
        } else {
            match producer.area_status(&node.key) {
                AreaStatus::Empty => return,
                AreaStatus::Partial => false,
                AreaStatus::Full => true,
            }
        };
        map.insert(producer.id(), full);
        let children = node.children;
        for child in children.into_iter().flatten() {
            self.add_membership(child, producer, full);
        }
    }

    fn remove_membership(&mut self, id: NodeKey, producer: ProducerId) {
        let Some(node) = self.nodes.get_mut(id) else {
            return;
        };
        let Some(map) = node.producers.as_mut() else {
            return;
        };
        map.remove(&producer);
        for entry in node.meshes.values_mut() {
            entry.overlays.remove(&producer);
        }
        let children = node.children;
        for child in children.into_iter().flatten() {
            self.remove_membership(child, producer);
        }
    }

    /// Populate the membership map of `id` from its parent's, materializing
    /// ancestors first.
    fn materialize_membership(&mut self, id: NodeKey) {
        let Some(node) = self.nodes.get(id) else {
            return;
        };
        if node.producers.is_some() {
            return;
        }
        let key = node.key;
        let parent = node.parent;
        let map = match parent {
            None => self
                .producers
                .iter()
                .filter_map(|(&pid, producer)| match producer.area_status(&key) {
                    AreaStatus::Empty => None,
                    AreaStatus::Partial => Some((pid, false)),
                    AreaStatus::Full => Some((pid, true)),
                })
                .collect(),
            Some(parent) => {
                self.materialize_membership(parent);
                let Some(parent_map) = self.nodes.get(parent).and_then(|p| p.producers.as_ref())
                else {
                    return;
                };
                parent_map
                    .iter()
                    .filter_map(|(&pid, &parent_full)| {
                        if parent_full {
                            return Some((pid, true));
                        }
                        match self.producers.get(&pid)?.area_status(&key) {
                            AreaStatus::Empty => None,
                            AreaStatus::Partial => Some((pid, false)),
                            AreaStatus::Full => Some((pid, true)),
                        }
                    })
                    .collect::<FxHashMap<_, _>>()
            }
        };
        if let Some(node) = self.nodes.get_mut(id) {
            node.producers = Some(map);
        }
    }

    /// Producers touching `id` and whether each covers it fully.
    pub fn producer_membership(&mut self, id: NodeKey) -> Option<&FxHashMap<ProducerId, bool>> {
        self.materialize_membership(id);
        self.nodes.get(id)?.producers.as_ref()
    }

    /// Overlays of every producer touching `id`, built on the node's mesh at
    /// `lod` and cached alongside it.
    pub fn get_overlay_meshes(&mut self, id: NodeKey, lod: u8) -> Vec<Arc<OverlayMesh>> {
        let Some(mesh) = self.get_render_mesh(id, lod) else {
            return Vec::new();
        };
        let lod = mesh.lod;
        self.materialize_membership(id);

        let Some(node) = self.nodes.get_mut(id) else {
            return Vec::new();
        };
        let (Some(membership), Some(entry)) = (node.producers.as_ref(), node.meshes.get_mut(&lod))
        else {
            return Vec::new();
        };

        let mut members: Vec<_> = membership.iter().map(|(&pid, &full)| (pid, full)).collect();
        members.sort_unstable_by_key(|&(pid, _)| pid);
        let mut overlays = Vec::new();
        for (pid, full) in members {
            let overlay = entry.overlays.entry(pid).or_insert_with(|| {
                self.producers
                    .get(&pid)
                    .and_then(|p| p.create_overlay(&mesh.key, &mesh, full))
                    .map(Arc::new)
            });
            if let Some(overlay) = overlay {
                overlays.push(Arc::clone(overlay));
            }
        }
        overlays
    }
}
