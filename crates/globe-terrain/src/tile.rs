//! Elevation tile contract and the coarse average-height map.

use globe_math::TileKey;

/// Errors produced while decoding tile bytes.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TileError {
    /// The payload ended before all declared data was read.
    #[error("tile payload truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    /// The payload does not start with the expected magic bytes.
    #[error("tile payload has an unknown magic")]
    BadMagic,

    /// The payload format version is newer than this decoder.
    #[error("unsupported tile format version {0}")]
    UnsupportedVersion(u8),

    /// The grid resolution in the payload disagrees with the tree's ρ.
    #[error("tile resolution power {found} does not match expected {expected}")]
    BadDimensions { expected: u8, found: u8 },
}

/// A decoded elevation tile covering [`ElevationTile::key`] and the `ρ`
/// quadtree levels below it.
///
/// Local coordinates `(u, v)` span the tile footprint: `u` grows east, `v`
/// grows south, both in `[0, 1]`.
pub trait ElevationTile: Sized {
    /// Decode the provider payload for `key`.
    fn decode(key: TileKey, rho: u8, bytes: &[u8]) -> Result<Self, TileError>;

    /// The tile this data belongs to.
    fn key(&self) -> TileKey;

    /// Interpolated height at local `(u, v)`.
    fn sample(&self, u: f64, v: f64) -> f64;

    /// True when no finer tile exists anywhere over `target`'s footprint.
    fn is_leaf(&self, target: &TileKey) -> bool;

    /// Number of levels below this tile over which finer tiles are known to
    /// exist for `target`'s footprint. Zero for leaves.
    fn quad_level(&self, target: &TileKey) -> u8;

    /// Lowest height anywhere in the tile.
    fn height_min(&self) -> f64;

    /// Highest height anywhere in the tile.
    fn height_max(&self) -> f64;

    /// Heights at the corners of `target`, which must be this tile or lie
    /// below it. Order: north-west, north-east, south-west, south-east.
    fn corner_heights(&self, target: &TileKey) -> [f64; 4] {
        let r = target.rect_in(&self.key());
        [
            self.sample(r.x_min, r.y_min),
            self.sample(r.x_max, r.y_min),
            self.sample(r.x_min, r.y_max),
            self.sample(r.x_max, r.y_max),
        ]
    }

    /// Coarse per-level averages used to estimate nodes shallower than ρ.
    fn new_average_height_map(&self, levels: u8) -> AverageHeightMap {
        AverageHeightMap::from_tile(self, levels)
    }
}

/// Mean terrain height for every cell of levels `0..levels`, derived from the
/// root tile.
#[derive(Clone, Debug)]
pub struct AverageHeightMap {
    levels: Vec<Vec<f64>>,
}

impl AverageHeightMap {
    /// Samples per cell axis when averaging.
    const SUBSAMPLES: usize = 4;

    /// Build the map from a tile covering the whole globe. Cells are averaged
    /// over a regular grid of interior samples.
    pub fn from_tile<T: ElevationTile>(tile: &T, levels: u8) -> Self {
        let levels = (0..levels.max(1))
            .map(|level| {
                let n = TileKey::grid_size(level) as usize;
                let mut cells = Vec::with_capacity(n * n);
                for y in 0..n {
                    for x in 0..n {
                        cells.push(Self::cell_mean(tile, n, x, y));
                    }
                }
                cells
            })
            .collect();
        Self { levels }
    }

    fn cell_mean<T: ElevationTile>(tile: &T, n: usize, x: usize, y: usize) -> f64 {
        let s = Self::SUBSAMPLES;
        let mut sum = 0.0;
        for j in 0..s {
            for i in 0..s {
                let u = (x as f64 + (i as f64 + 0.5) / s as f64) / n as f64;
                let v = (y as f64 + (j as f64 + 0.5) / s as f64) / n as f64;
                sum += tile.sample(u, v);
            }
        }
        sum / (s * s) as f64
    }

    /// Number of levels stored.
    pub fn levels(&self) -> u8 {
        self.levels.len() as u8
    }

    /// Average height of the cell `key`. Keys deeper than the map fall back to
    /// their ancestor at the finest stored level.
    pub fn sample(&self, key: &TileKey) -> f64 {
        let level = key.level.min(self.levels() - 1);
        let cell = key.ancestor(level);
        let n = TileKey::grid_size(level) as usize;
        self.levels[level as usize][cell.y as usize * n + cell.x as usize]
    }
}
