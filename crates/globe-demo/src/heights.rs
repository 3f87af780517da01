//! Fractal noise elevation over the unit sphere.

use glam::DVec3;
use noise::{NoiseFn, Simplex};

/// Parameters for multi-octave fBm elevation.
#[derive(Clone, Debug)]
pub struct HeightParams {
    pub seed: u32,
    pub octaves: u32,
    /// Frequency multiplier between octaves.
    pub lacunarity: f64,
    /// Amplitude multiplier between octaves.
    pub persistence: f64,
    /// Frequency of the first octave, in cycles per globe radius.
    pub base_frequency: f64,
    /// Amplitude of the first octave in meters.
    pub amplitude: f64,
}

impl Default for HeightParams {
    fn default() -> Self {
        Self {
            seed: 0,
            octaves: 12,
            lacunarity: 2.0,
            persistence: 0.5,
            base_frequency: 1.5,
            amplitude: 4000.0,
        }
    }
}

/// Samples fBm simplex noise at points on the unit sphere. Shareable across
/// worker threads.
pub struct HeightSampler {
    noise: Simplex,
    params: HeightParams,
}

impl HeightSampler {
    pub fn new(params: HeightParams) -> Self {
        Self {
            noise: Simplex::new(params.seed),
            params,
        }
    }

    /// Height in meters at the unit direction `dir`.
    pub fn sample(&self, dir: DVec3) -> f64 {
        let mut total = 0.0;
        let mut frequency = self.params.base_frequency;
        let mut amplitude = self.params.amplitude;
        for _ in 0..self.params.octaves {
            let p = dir * frequency;
            total += self.noise.get([p.x, p.y, p.z]) * amplitude;
            frequency *= self.params.lacunarity;
            amplitude *= self.params.persistence;
        }
        total
    }

    /// Upper bound on `|sample|`.
    pub fn max_amplitude(&self) -> f64 {
        let mut sum = 0.0;
        let mut amplitude = self.params.amplitude;
        for _ in 0..self.params.octaves {
            sum += amplitude;
            amplitude *= self.params.persistence;
        }
        sum
    }
}
