//! Reference elevation tile format: a regular height grid.
//!
//! Layout (little endian):
//!
//! | offset | size | field                                   |
//! |--------|------|-----------------------------------------|
//! | 0      | 4    | magic `GTIL`                            |
//! | 4      | 1    | format version (1)                      |
//! | 5      | 1    | resolution power ρ                      |
//! | 6      | 1    | availability depth (0 = leaf)           |
//! | 7      | 1    | reserved                                |
//! | 8      | 4·N  | `(2^ρ + 1)²` f32 heights, rows north→south |

use globe_math::TileKey;

use crate::tile::{ElevationTile, TileError};

const MAGIC: &[u8; 4] = b"GTIL";
const VERSION: u8 = 1;
const HEADER_LEN: usize = 8;

/// Heights sampled on a `(2^ρ + 1)²` lattice over one tile footprint.
#[derive(Clone, Debug)]
pub struct GridTile {
    key: TileKey,
    rho: u8,
    depth: u8,
    heights: Vec<f32>,
    height_min: f64,
    height_max: f64,
}

impl GridTile {
    /// Lattice points along one axis for resolution power `rho`.
    pub fn side(rho: u8) -> usize {
        (1usize << rho) + 1
    }

    /// Build a tile directly from lattice heights.
    ///
    /// `depth` is the number of levels of finer tiles available below this
    /// one; zero marks a leaf.
    pub fn from_heights(
        key: TileKey,
        rho: u8,
        depth: u8,
        heights: Vec<f32>,
    ) -> Result<Self, TileError> {
        let side = Self::side(rho);
        if heights.len() != side * side {
            return Err(TileError::Truncated {
                expected: side * side,
                actual: heights.len(),
            });
        }
        let (height_min, height_max) = heights
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &h| {
                (lo.min(h as f64), hi.max(h as f64))
            });
        Ok(Self {
            key,
            rho,
            depth,
            heights,
            height_min,
            height_max,
        })
    }

    /// A tile at constant `height`.
    pub fn flat(key: TileKey, rho: u8, depth: u8, height: f32) -> Self {
        let side = Self::side(rho);
        Self {
            key,
            rho,
            depth,
            heights: vec![height; side * side],
            height_min: height as f64,
            height_max: height as f64,
        }
    }

    /// Serialize lattice heights into the wire layout.
    pub fn encode(rho: u8, depth: u8, heights: &[f32]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_LEN + heights.len() * 4);
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&[VERSION, rho, depth, 0]);
        for h in heights {
            bytes.extend_from_slice(&h.to_le_bytes());
        }
        bytes
    }

    /// Availability depth from the header.
    pub fn depth(&self) -> u8 {
        self.depth
    }

    pub fn rho(&self) -> u8 {
        self.rho
    }

    fn lattice(&self, i: usize, j: usize) -> f64 {
        self.heights[j * Self::side(self.rho) + i] as f64
    }
}

impl ElevationTile for GridTile {
    fn decode(key: TileKey, rho: u8, bytes: &[u8]) -> Result<Self, TileError> {
        if bytes.len() < HEADER_LEN {
            return Err(TileError::Truncated {
                expected: HEADER_LEN,
                actual: bytes.len(),
            });
        }
        if &bytes[0..4] != MAGIC {
            return Err(TileError::BadMagic);
        }
        if bytes[4] != VERSION {
            return Err(TileError::UnsupportedVersion(bytes[4]));
        }
        if bytes[5] != rho {
            return Err(TileError::BadDimensions {
                expected: rho,
                found: bytes[5],
            });
        }
        let depth = bytes[6];

        let side = Self::side(rho);
        let expected = HEADER_LEN + side * side * 4;
        if bytes.len() < expected {
            return Err(TileError::Truncated {
                expected,
                actual: bytes.len(),
            });
        }

        let heights = bytes[HEADER_LEN..expected]
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Self::from_heights(key, rho, depth, heights)
    }

    fn key(&self) -> TileKey {
        self.key
    }

    fn sample(&self, u: f64, v: f64) -> f64 {
        let cells = (1usize << self.rho) as f64;
        let fx = (u * cells).clamp(0.0, cells);
        let fy = (v * cells).clamp(0.0, cells);
        let i = (fx.floor() as usize).min((1usize << self.rho) - 1);
        let j = (fy.floor() as usize).min((1usize << self.rho) - 1);
        let tx = fx - i as f64;
        let ty = fy - j as f64;

        let h00 = self.lattice(i, j);
        let h10 = self.lattice(i + 1, j);
        let h01 = self.lattice(i, j + 1);
        let h11 = self.lattice(i + 1, j + 1);
        let top = h00 + (h10 - h00) * tx;
        let bottom = h01 + (h11 - h01) * tx;
        top + (bottom - top) * ty
    }

    fn is_leaf(&self, _target: &TileKey) -> bool {
        self.depth == 0
    }

    fn quad_level(&self, _target: &TileKey) -> u8 {
        self.depth.min(self.rho)
    }

    fn height_min(&self) -> f64 {
        self.height_min
    }

    fn height_max(&self) -> f64 {
        self.height_max
    }
}
