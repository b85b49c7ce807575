//! Model shape configuration (`configs/base.json`).
//!
//! The file follows the instant-ngp network config layout:
//!
//! ```json
//! {
//!   "encoding":     { "n_levels": 16, "n_features_per_level": 2,
//!                     "log2_hashmap_size": 19, "base_resolution": 16 },
//!   "network":      { "n_neurons": 64, "n_hidden_layers": 1 },
//!   "dir_encoding": { "nested": [ { "n_dims_to_encode": 3, "degree": 4 } ] },
//!   "rgb_network":  { "n_neurons": 64, "n_hidden_layers": 2 }
//! }
//! ```
//!
//! Unknown keys (`otype`, `activation`, `loss`, ...) are ignored.

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Finest grid resolution targeted when `per_level_scale` is not given.
pub const DEFAULT_DESIRED_RESOLUTION: f32 = 2048.0;

/// Multiresolution hash-grid shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodingConfig {
    pub n_levels: u32,
    pub n_features_per_level: u32,
    pub log2_hashmap_size: u32,
    pub base_resolution: u32,
    #[serde(default)]
    pub per_level_scale: Option<f32>,
}

impl EncodingConfig {
    /// Growth factor between consecutive levels.
    pub fn per_level_scale(&self) -> f32 {
        self.per_level_scale.unwrap_or_else(|| {
            if self.n_levels <= 1 {
                1.0
            } else {
                ((DEFAULT_DESIRED_RESOLUTION / self.base_resolution as f32).ln()
                    / (self.n_levels - 1) as f32)
                    .exp()
            }
        })
    }

    /// Width of the encoded feature vector.
    pub fn output_dims(&self) -> u32 {
        self.n_levels * self.n_features_per_level
    }
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            n_levels: 16,
            n_features_per_level: 2,
            log2_hashmap_size: 19,
            base_resolution: 16,
            per_level_scale: None,
        }
    }
}

/// Dense network shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub n_neurons: u32,
    pub n_hidden_layers: u32,
}

/// Spherical-harmonics encoder shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShConfig {
    pub degree: u32,
    pub n_dims_to_encode: u32,
}

#[derive(Debug, Clone, Deserialize)]
struct DirEncodingConfig {
    nested: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawModelConfig {
    encoding: EncodingConfig,
    network: NetworkConfig,
    dir_encoding: DirEncodingConfig,
    rgb_network: NetworkConfig,
}

/// Shapes of all learned components.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    pub encoding: EncodingConfig,
    pub density_network: NetworkConfig,
    pub color_network: NetworkConfig,
    pub dir_encoding: ShConfig,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            encoding: EncodingConfig::default(),
            density_network: NetworkConfig {
                n_neurons: 64,
                n_hidden_layers: 1,
            },
            color_network: NetworkConfig {
                n_neurons: 64,
                n_hidden_layers: 2,
            },
            dir_encoding: ShConfig {
                degree: 4,
                n_dims_to_encode: 3,
            },
        }
    }
}

impl ModelConfig {
    /// Parse a JSON document.
    pub fn from_json(text: &str) -> Result<Self> {
        let raw: RawModelConfig = serde_json::from_str(text).context("Invalid model config JSON")?;
        let dir_encoding: ShConfig = match raw.dir_encoding.nested.into_iter().next() {
            Some(sh) => serde_json::from_value(sh).context("Invalid spherical harmonics encoder")?,
            None => bail!("dir_encoding.nested must contain the spherical harmonics encoder"),
        };
        let config = Self {
            encoding: raw.encoding,
            density_network: raw.network,
            color_network: raw.rgb_network,
            dir_encoding,
        };
        config.validate()?;
        Ok(config)
    }

    /// Load from a file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read model config {}", path.display()))?;
        let config = Self::from_json(&text)
            .with_context(|| format!("Failed to parse model config {}", path.display()))?;
        log::info!("Read model config from {}", path.display());
        Ok(config)
    }

    /// Check the shapes fit the fixed pipeline widths.
    pub fn validate(&self) -> Result<()> {
        if self.encoding.output_dims() != 32 {
            bail!(
                "hash encoding must produce 32 features, config gives {} levels x {} features",
                self.encoding.n_levels,
                self.encoding.n_features_per_level
            );
        }
        if !(1..=4).contains(&self.dir_encoding.degree) {
            bail!("spherical harmonics degree must be 1..=4, got {}", self.dir_encoding.degree);
        }
        for (name, net) in [("network", &self.density_network), ("rgb_network", &self.color_network)] {
            if net.n_neurons == 0 || net.n_hidden_layers == 0 {
                bail!("{} needs at least one hidden layer with nonzero width", name);
            }
        }
        Ok(())
    }
}
