//! Numerical collaborators of the pipeline.
//!
//! The pipeline consumes each of these as a pure function over fixed-size
//! vectors. They are loaded once before simulation, never mutated while a
//! frame runs, and shared with the stages as `Arc<dyn Trait>` handles.
//!
//! - [`PositionalEncoder`]: 3-D point → 32 features (multiresolution hash grid)
//! - [`DirectionalEncoder`]: direction → 16 features (spherical harmonics)
//! - [`DensityNetwork`]: 32 features → 16 outputs, output 0 is log-density
//! - [`ColorNetwork`]: 32 features → raw rgb
//! - [`Occupancy`]: coarse binary grid used to skip empty space
//! - [`RayGenerator`]: pixel → ray
//!
//! Reference implementations live in the submodules; tests substitute small
//! stubs through the same traits.

pub mod camera;
pub mod config;
pub mod hash_grid;
pub mod mlp;
pub mod occupancy;
pub mod spherical;

use std::sync::Arc;

use nalgebra::{SVector, Vector3};

pub use camera::{Camera, Ray};
pub use config::{EncodingConfig, ModelConfig, NetworkConfig, ShConfig};
pub use hash_grid::HashGridEncoding;
pub use mlp::Mlp;
pub use occupancy::OccupancyGrid;
pub use spherical::SphericalHarmonics;

use crate::pipeline::ray::RayId;

/// 3-vector used for positions, directions and colors.
pub type Vec3 = Vector3<f32>;

/// Positional features / network input width.
pub type Features32 = SVector<f32, 32>;

/// Directional features / density network output width.
pub type Features16 = SVector<f32, 16>;

/// Maps a sample position to hash-grid features.
pub trait PositionalEncoder: Send + Sync {
    fn encode(&self, position: &Vec3) -> Features32;

    /// Number of trainable parameters held by the encoder.
    fn num_params(&self) -> usize;
}

/// Maps a ray direction, remapped to `[0, 1]³`, to directional features.
pub trait DirectionalEncoder: Send + Sync {
    fn encode(&self, direction: &Vec3) -> Features16;
}

/// Density network. Output element 0 is the raw (log-space) density.
pub trait DensityNetwork: Send + Sync {
    fn infer(&self, features: &Features32) -> Features16;

    fn num_params(&self) -> usize;
}

/// Color network over concatenated density and directional features.
pub trait ColorNetwork: Send + Sync {
    /// Raw (pre-sigmoid) rgb.
    fn infer(&self, features: &Features32) -> Vec3;

    fn num_params(&self) -> usize;
}

/// Coarse occupancy test.
pub trait Occupancy: Send + Sync {
    fn is_occupied(&self, point: &Vec3) -> bool;
}

/// Per-pixel ray generation.
pub trait RayGenerator: Send + Sync {
    /// Image size as (width, height).
    fn resolution(&self) -> (u32, u32);

    /// Ray through pixel `ray_id`.
    fn generate(&self, ray_id: RayId) -> Ray;

    /// Number of pixels.
    fn num_rays(&self) -> usize {
        let (w, h) = self.resolution();
        w as usize * h as usize
    }
}

/// Read-only handles to everything a frame needs.
#[derive(Clone)]
pub struct SceneModels {
    pub camera: Arc<dyn RayGenerator>,
    pub occupancy: Arc<dyn Occupancy>,
    pub positional: Arc<dyn PositionalEncoder>,
    pub directional: Arc<dyn DirectionalEncoder>,
    pub density: Arc<dyn DensityNetwork>,
    pub color: Arc<dyn ColorNetwork>,
}

impl std::fmt::Debug for SceneModels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (w, h) = self.camera.resolution();
        f.debug_struct("SceneModels")
            .field("resolution", &(w, h))
            .field("positional_params", &self.positional.num_params())
            .field("density_params", &self.density.num_params())
            .field("color_params", &self.color.num_params())
            .finish()
    }
}

/// Concatenate density features and directional features into the color
/// network input.
pub fn color_input(density: &Features16, direction: &Features16) -> Features32 {
    Features32::from_fn(|i, _| if i < 16 { density[i] } else { direction[i - 16] })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_input_layout() {
        let a = Features16::from_fn(|i, _| i as f32);
        let b = Features16::from_fn(|i, _| 100.0 + i as f32);
        let c = color_input(&a, &b);
        assert_eq!(c[0], 0.0);
        assert_eq!(c[15], 15.0);
        assert_eq!(c[16], 100.0);
        assert_eq!(c[31], 115.0);
    }
}
