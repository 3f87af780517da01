//! CPU terrain meshes and the per-node mesh cache.

use std::sync::Arc;

use glam::DVec3;
use globe_math::{TileKey, unit_to_cartesian};
use rustc_hash::FxHashMap;

use crate::node::NodeKey;
use crate::producer::ProducerId;
use crate::provider::TileProvider;
use crate::tile::ElevationTile;
use crate::tree::Tree;

/// Terrain vertex ready for GPU upload. 20 bytes.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct TerrainVertex {
    /// Position relative to [`TerrainMesh::center`], meters.
    pub position: [f32; 3],
    /// Texture coordinates across the node footprint, `v` growing south.
    pub uv: [f32; 2],
}

/// Regular grid mesh over one node footprint.
///
/// `2^lod` cells per side. Each cell is split into the triangles
/// `(nw, ne, sw)` and `(se, sw, ne)`, the same split ray casting uses.
#[derive(Clone, Debug)]
pub struct TerrainMesh {
    pub key: TileKey,
    pub lod: u8,
    /// Level of the tile the heights were sampled from.
    pub tile_level: u8,
    /// Geocentric origin the vertex positions are relative to.
    pub center: DVec3,
    pub vertices: Vec<TerrainVertex>,
    pub indices: Vec<u32>,
}

impl TerrainMesh {
    /// Sample `tile` over `key` at `2^lod` cells per side. `tile` must cover
    /// `key`.
    pub fn build<T: ElevationTile>(key: TileKey, lod: u8, tile: &T) -> Self {
        let n = 1u32 << lod;
        let side = n + 1;
        let rect = key.unit_rect();
        let local = key.rect_in(&tile.key());
        let center = unit_to_cartesian(
            (rect.x_min + rect.x_max) * 0.5,
            (rect.y_min + rect.y_max) * 0.5,
            0.0,
        );

        let mut vertices = Vec::with_capacity((side * side) as usize);
        for j in 0..side {
            let fv = j as f64 / n as f64;
            for i in 0..side {
                let fu = i as f64 / n as f64;
                let u = local.x_min + fu * (local.x_max - local.x_min);
                let v = local.y_min + fv * (local.y_max - local.y_min);
                let height = tile.sample(u, v);
                let xt = rect.x_min + fu * (rect.x_max - rect.x_min);
                let yt = rect.y_min + fv * (rect.y_max - rect.y_min);
                let p = unit_to_cartesian(xt, yt, height) - center;
                vertices.push(TerrainVertex {
                    position: p.as_vec3().to_array(),
                    uv: [fu as f32, fv as f32],
                });
            }
        }

        let mut indices = Vec::with_capacity((n * n * 6) as usize);
        for j in 0..n {
            for i in 0..n {
                let nw = j * side + i;
                let ne = nw + 1;
                let sw = nw + side;
                let se = sw + 1;
                indices.extend_from_slice(&[nw, ne, sw, se, sw, ne]);
            }
        }

        Self {
            key,
            lod,
            tile_level: tile.key().level,
            center,
            vertices,
            indices,
        }
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Vertex data as bytes for GPU upload.
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }
}

/// Geometry an entity producer draws on top of one terrain mesh.
#[derive(Clone, Debug)]
pub struct OverlayMesh {
    pub producer: ProducerId,
    pub vertices: Vec<TerrainVertex>,
    pub indices: Vec<u32>,
}

/// A cached mesh on a node plus the overlays built against it.
#[derive(Debug)]
pub struct MeshCacheEntry {
    pub(crate) mesh: Arc<TerrainMesh>,
    /// `None` records that the producer had nothing to draw here.
    pub(crate) overlays: FxHashMap<ProducerId, Option<Arc<OverlayMesh>>>,
    pub(crate) last_touch_frame: i64,
}

impl MeshCacheEntry {
    fn new(mesh: TerrainMesh) -> Self {
        Self {
            mesh: Arc::new(mesh),
            overlays: FxHashMap::default(),
            last_touch_frame: -1,
        }
    }
}

impl<P: TileProvider> Tree<P> {
    /// Mesh of `id` at `lod` (clamped to ρ), built from the finest usable
    /// tile and rebuilt once a finer one arrives.
    ///
    /// The ideal source tile sits `ρ - lod` levels above the node so that mesh
    /// vertices land on tile samples. While it is missing the mesh is built
    /// from a coarser tile and the ideal one is requested.
    pub fn get_render_mesh(&mut self, id: NodeKey, lod: u8) -> Option<Arc<TerrainMesh>> {
        let key = self.nodes.get(id)?.key;
        let lod = lod.min(self.settings.rho);
        let wanted = (key.level + lod).saturating_sub(self.settings.rho);
        let tile = self.nearest_loaded(id, wanted)?;
        let tile_level = tile.key().level;
        if tile_level < wanted && !tile.is_leaf(&key) {
            self.request_ancestor_tile(id, wanted);
        }

        let frame = self.frame_counter;
        let node = self.nodes.get_mut(id)?;
        node.dem_zlimit = node.dem_zlimit.max(tile_level);
        let is_new = !node.meshes.contains_key(&lod);
        let entry = node
            .meshes
            .entry(lod)
            .or_insert_with(|| MeshCacheEntry::new(TerrainMesh::build(key, lod, tile.as_ref())));
        if is_new {
            self.num_cache_meshes += 1;
        } else if entry.mesh.tile_level < tile_level {
            tracing::trace!("Rebuilding mesh {key}@{lod} from level {tile_level}");
            entry.mesh = Arc::new(TerrainMesh::build(key, lod, tile.as_ref()));
            entry.overlays.clear();
        }
        if entry.last_touch_frame != frame {
            entry.last_touch_frame = frame;
            self.num_touch_meshes += 1;
        }
        Some(Arc::clone(&entry.mesh))
    }
}
