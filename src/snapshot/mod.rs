//! Trained-parameter snapshots (`<scene>.msgpack`).
//!
//! A snapshot is a msgpack map whose `snapshot` entry holds two binary
//! blobs of little-endian halves:
//!
//! - `params_binary`: density network weights, then color network weights,
//!   then the hash-grid tables, with no separators
//! - `density_grid_binary`: the density grid in Morton order, one value per
//!   cell
//!
//! The parameter count must match the model shapes exactly.

pub mod float16;
pub mod morton;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use memmap2::Mmap;
use rmpv::Value;
use thiserror::Error;

use crate::model::{
    Camera, HashGridEncoding, Mlp, ModelConfig, OccupancyGrid, PositionalEncoder, SceneModels,
    SphericalHarmonics,
};
use crate::pipeline::PipelineError;

pub use float16::{decode_f16_le, encode_f16_le};
pub use morton::inv_morton;

/// Density above which a grid cell counts as occupied.
pub const OCCUPANCY_THRESHOLD: f32 = 0.01;

/// Errors decoding a snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("invalid msgpack: {0}")]
    Decode(#[from] rmpv::decode::Error),

    #[error("snapshot has no `{0}` entry")]
    MissingKey(String),

    #[error("snapshot entry `{key}` is not {expected}")]
    WrongType { key: String, expected: &'static str },

    #[error("snapshot entry `{key}` has odd byte length {len}")]
    OddLength { key: String, len: usize },

    #[error("density grid holds {actual} cells, resolution needs {expected}")]
    GridSize { expected: usize, actual: usize },

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// Decoded snapshot contents.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    params: Vec<f32>,
    density_grid: Vec<f32>,
}

/// `params_binary` split per component.
#[derive(Debug, Clone, Copy)]
pub struct ParamSplit<'a> {
    pub density: &'a [f32],
    pub color: &'a [f32],
    pub table: &'a [f32],
}

fn lookup<'a>(map: &'a Value, key: &str) -> Result<&'a Value, SnapshotError> {
    let entries = match map {
        Value::Map(entries) => entries,
        _ => {
            return Err(SnapshotError::WrongType {
                key: key.to_string(),
                expected: "inside a map",
            })
        }
    };
    entries
        .iter()
        .find(|(k, _)| k.as_str() == Some(key))
        .map(|(_, v)| v)
        .ok_or_else(|| SnapshotError::MissingKey(key.to_string()))
}

fn binary<'a>(map: &'a Value, key: &str) -> Result<&'a [u8], SnapshotError> {
    match lookup(map, key)? {
        Value::Binary(bytes) => Ok(bytes),
        _ => Err(SnapshotError::WrongType {
            key: key.to_string(),
            expected: "a binary blob",
        }),
    }
}

impl Snapshot {
    pub fn new(params: Vec<f32>, density_grid: Vec<f32>) -> Self {
        Self { params, density_grid }
    }

    /// Decode a msgpack document.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SnapshotError> {
        let mut reader = bytes;
        let root = rmpv::decode::read_value(&mut reader)?;
        let snapshot = lookup(&root, "snapshot")?;
        let params = decode_f16_le("params_binary", binary(snapshot, "params_binary")?)?;
        let density_grid = decode_f16_le("density_grid_binary", binary(snapshot, "density_grid_binary")?)?;
        Ok(Self { params, density_grid })
    }

    /// Memory-map and decode a snapshot file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open snapshot {}", path.display()))?;
        let mmap = unsafe { Mmap::map(&file) }
            .with_context(|| format!("Failed to mmap {}", path.display()))?;
        let snapshot = Self::from_bytes(&mmap)
            .with_context(|| format!("Failed to decode snapshot {}", path.display()))?;
        log::info!(
            "Loaded snapshot {}: {} parameters, {} density cells",
            path.display(),
            snapshot.params.len(),
            snapshot.density_grid.len()
        );
        Ok(snapshot)
    }

    pub fn num_params(&self) -> usize {
        self.params.len()
    }

    pub fn params(&self) -> &[f32] {
        &self.params
    }

    pub fn density_grid(&self) -> &[f32] {
        &self.density_grid
    }

    /// Split parameters into density, color and table segments.
    pub fn split_params(&self, density: usize, color: usize, table: usize) -> Result<ParamSplit<'_>, PipelineError> {
        let expected = density + color + table;
        if self.params.len() != expected {
            return Err(PipelineError::ConfigMismatch {
                expected,
                actual: self.params.len(),
            });
        }
        let (d, rest) = self.params.split_at(density);
        let (c, t) = rest.split_at(color);
        Ok(ParamSplit {
            density: d,
            color: c,
            table: t,
        })
    }

    /// Threshold the first `resolution³` Morton-ordered density values into
    /// a linear occupancy grid.
    pub fn occupancy_grid(&self, resolution: u32) -> Result<OccupancyGrid, SnapshotError> {
        if resolution == 0 {
            return Err(PipelineError::InvalidConfig("occupancy resolution must be positive".into()).into());
        }
        let n = (resolution as usize).pow(3);
        if self.density_grid.len() < n {
            return Err(SnapshotError::GridSize {
                expected: n,
                actual: self.density_grid.len(),
            });
        }
        let mut cells = vec![false; n];
        for (code, density) in self.density_grid[..n].iter().enumerate() {
            cells[inv_morton(code as u32, resolution)] = *density > OCCUPANCY_THRESHOLD;
        }
        Ok(OccupancyGrid::from_cells(resolution, cells))
    }

    /// Build every collaborator of a frame from this snapshot.
    pub fn scene_models(
        &self,
        config: &ModelConfig,
        camera: Camera,
        occupancy_resolution: u32,
    ) -> Result<SceneModels, SnapshotError> {
        let mut hash_grid = HashGridEncoding::new(&config.encoding);
        let mut density = Mlp::from_config(&config.density_network);
        let mut color = Mlp::from_config(&config.color_network);

        let split = self.split_params(density.num_params(), color.num_params(), hash_grid.num_params())?;
        density.load_parameters(split.density);
        color.load_parameters(split.color);
        hash_grid.load_parameters(split.table.to_vec());

        Ok(SceneModels {
            camera: Arc::new(camera),
            occupancy: Arc::new(self.occupancy_grid(occupancy_resolution)?),
            positional: Arc::new(hash_grid),
            directional: Arc::new(SphericalHarmonics::from_config(&config.dir_encoding)),
            density: Arc::new(density),
            color: Arc::new(color),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EncodingConfig, NetworkConfig, Occupancy, ShConfig, Vec3};

    fn document(params: &[f32], grid: &[f32]) -> Vec<u8> {
        let inner = Value::Map(vec![
            (Value::from("params_binary"), Value::Binary(encode_f16_le(params))),
            (Value::from("density_grid_binary"), Value::Binary(encode_f16_le(grid))),
        ]);
        let root = Value::Map(vec![(Value::from("snapshot"), inner)]);
        let mut bytes = Vec::new();
        rmpv::encode::write_value(&mut bytes, &root).unwrap();
        bytes
    }

    fn tiny_config() -> ModelConfig {
        ModelConfig {
            encoding: EncodingConfig {
                n_levels: 16,
                n_features_per_level: 2,
                log2_hashmap_size: 4,
                base_resolution: 2,
                per_level_scale: Some(1.0),
            },
            density_network: NetworkConfig {
                n_neurons: 4,
                n_hidden_layers: 1,
            },
            color_network: NetworkConfig {
                n_neurons: 4,
                n_hidden_layers: 1,
            },
            dir_encoding: ShConfig {
                degree: 4,
                n_dims_to_encode: 3,
            },
        }
    }

    #[test]
    fn test_decode_document() {
        let bytes = document(&[1.0, -0.5, 0.25], &[0.0, 2.0]);
        let snap = Snapshot::from_bytes(&bytes).unwrap();
        assert_eq!(snap.params(), &[1.0, -0.5, 0.25]);
        assert_eq!(snap.density_grid(), &[0.0, 2.0]);
    }

    #[test]
    fn test_missing_key() {
        let root = Value::Map(vec![(Value::from("snapshot"), Value::Map(vec![]))]);
        let mut bytes = Vec::new();
        rmpv::encode::write_value(&mut bytes, &root).unwrap();
        assert!(matches!(
            Snapshot::from_bytes(&bytes),
            Err(SnapshotError::MissingKey(k)) if k == "params_binary"
        ));
    }

    #[test]
    fn test_param_count_mismatch() {
        let snap = Snapshot::new(vec![0.0; 10], vec![]);
        assert_eq!(
            snap.split_params(4, 4, 4).unwrap_err(),
            PipelineError::ConfigMismatch {
                expected: 12,
                actual: 10,
            }
        );
        let split = snap.split_params(3, 5, 2).unwrap();
        assert_eq!((split.density.len(), split.color.len(), split.table.len()), (3, 5, 2));
    }

    #[test]
    fn test_occupancy_from_morton_grid() {
        // Morton code 1 is cell (x=1, y=0, z=0).
        let mut grid = vec![0.0; 8];
        grid[1] = 0.5;
        grid[2] = 0.005;
        let occ = Snapshot::new(vec![], grid).occupancy_grid(2).unwrap();
        assert_eq!(occ.occupied_count(), 1);
        assert!(occ.is_occupied(&Vec3::new(0.75, 0.25, 0.25)));
        assert!(!occ.is_occupied(&Vec3::new(0.25, 0.75, 0.25)));

        assert!(matches!(
            Snapshot::new(vec![], vec![0.0; 7]).occupancy_grid(2),
            Err(SnapshotError::GridSize { expected: 8, actual: 7 })
        ));
    }

    #[test]
    fn test_zero_occupancy_resolution_rejected() {
        let err = Snapshot::new(vec![], vec![0.5; 8]).occupancy_grid(0).unwrap_err();
        assert!(matches!(err, SnapshotError::Pipeline(PipelineError::InvalidConfig(_))));
    }

    #[test]
    fn test_scene_models_checks_sizes() {
        let config = tiny_config();
        let density = 32 * 4 + 4 * 16;
        let color = 32 * 4 + 4 * 16;
        // Every level has resolution 2: 8 entries x 2 features.
        let table = 16 * 8 * 2;
        let camera = crate::pipeline::test_support::front_camera(2, 2);

        let snap = Snapshot::new(vec![0.0; density + color + table], vec![1.0; 8]);
        let models = snap.scene_models(&config, camera.clone(), 2).unwrap();
        assert_eq!(models.positional.num_params(), table);

        let short = Snapshot::new(vec![0.0; density + color + table - 1], vec![1.0; 8]);
        assert!(matches!(
            short.scene_models(&config, camera, 2),
            Err(SnapshotError::Pipeline(PipelineError::ConfigMismatch { .. }))
        ));
    }
}
