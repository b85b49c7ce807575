//! Multiresolution hash-grid positional encoding.
//!
//! Each level is a virtual grid of resolution `res_l`; the eight corners of
//! the cell containing the point are looked up in that level's feature
//! table and blended trilinearly. Coarse levels whose dense grid fits the
//! table are indexed directly, finer levels go through a spatial hash.
//!
//! Parameter layout: levels are concatenated, each holding
//! `table_size_l * n_features` values with the features of one entry
//! adjacent.

use super::config::EncodingConfig;
use super::{Features32, PositionalEncoder, Vec3};

/// Spatial hash primes, one per dimension.
const PRIMES: [u32; 3] = [1, 2_654_435_761, 805_459_861];

#[derive(Debug, Clone, Copy, PartialEq)]
struct Level {
    scale: f32,
    resolution: u32,
    table_size: u32,
    offset: usize,
}

/// Hash-grid encoder producing 32 features.
#[derive(Debug, Clone)]
pub struct HashGridEncoding {
    n_features: usize,
    levels: Vec<Level>,
    params: Vec<f32>,
}

fn next_multiple(value: u64, multiple: u64) -> u64 {
    value.div_ceil(multiple) * multiple
}

impl HashGridEncoding {
    /// Build an encoder with zeroed parameters.
    pub fn new(config: &EncodingConfig) -> Self {
        let n_features = config.n_features_per_level as usize;
        let max_table = 1u64 << config.log2_hashmap_size;
        let log2_scale = config.per_level_scale().log2();

        let mut offset = 0usize;
        let levels = (0..config.n_levels)
            .map(|l| {
                let scale = (l as f32 * log2_scale).exp2() * config.base_resolution as f32 - 1.0;
                let resolution = scale.ceil() as u32 + 1;
                let dense = (resolution as u64).pow(3);
                let table_size = next_multiple(dense, 8).min(max_table) as u32;
                let level = Level {
                    scale,
                    resolution,
                    table_size,
                    offset,
                };
                offset += table_size as usize * n_features;
                level
            })
            .collect();

        Self {
            n_features,
            levels,
            params: vec![0.0; offset],
        }
    }

    /// Replace the feature tables. `params.len()` must equal `num_params()`.
    pub fn load_parameters(&mut self, params: Vec<f32>) {
        debug_assert_eq!(params.len(), self.params.len());
        self.params = params;
    }

    /// Grid resolution of each level, coarse to fine.
    pub fn level_resolutions(&self) -> Vec<u32> {
        self.levels.iter().map(|l| l.resolution).collect()
    }

    fn table_index(level: &Level, corner: [u32; 3]) -> usize {
        let res = level.resolution as u64;
        let dense = res * res * res;
        let index = if dense <= level.table_size as u64 {
            corner[0] as u64 + corner[1] as u64 * res + corner[2] as u64 * res * res
        } else {
            let hashed = (corner[0].wrapping_mul(PRIMES[0]))
                ^ (corner[1].wrapping_mul(PRIMES[1]))
                ^ (corner[2].wrapping_mul(PRIMES[2]));
            hashed as u64
        };
        (index % level.table_size as u64) as usize
    }
}

impl PositionalEncoder for HashGridEncoding {
    fn encode(&self, position: &Vec3) -> Features32 {
        let mut out = Features32::zeros();
        for (l, level) in self.levels.iter().enumerate() {
            let mut base = [0u32; 3];
            let mut frac = [0f32; 3];
            for d in 0..3 {
                let p = position[d] * level.scale + 0.5;
                let floor = p.floor();
                base[d] = floor.max(0.0) as u32;
                frac[d] = p - floor;
            }

            for corner in 0..8u32 {
                let mut weight = 1.0f32;
                let mut pos = [0u32; 3];
                for d in 0..3 {
                    if corner & (1 << d) != 0 {
                        weight *= frac[d];
                        pos[d] = base[d] + 1;
                    } else {
                        weight *= 1.0 - frac[d];
                        pos[d] = base[d];
                    }
                }
                let entry = level.offset + Self::table_index(level, pos) * self.n_features;
                for f in 0..self.n_features {
                    let slot = l * self.n_features + f;
                    if slot < 32 {
                        out[slot] += weight * self.params[entry + f];
                    }
                }
            }
        }
        out
    }

    fn num_params(&self) -> usize {
        self.params.len()
    }
}
