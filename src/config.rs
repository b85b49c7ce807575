//! Configuration management for ngp-sim.
//!
//! Configuration is loaded from multiple sources in priority order:
//! 1. Environment variables (NGP_DATA_PATH, etc.)
//! 2. Project-local config file (`./ngp-sim.toml`)
//! 3. User config file (`~/.config/ngp-sim/config.toml`)
//! 4. Built-in defaults
//!
//! # Config File Format
//!
//! ```toml
//! # ngp-sim.toml
//! data_path = "/data/nerf_synthetic"
//! snapshot_path = "/data/snapshots/Hash19_Float"
//!
//! [pipeline]
//! reentry = true
//! max_steps = 1024
//!
//! [pipeline.latencies]
//! positional_encode = 12
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::pipeline::{ChannelCapacities, EngineOptions, MarchParams, NumericPolicy, StageLatencies};

/// Global cached configuration.
static CONFIG: OnceLock<Config> = OnceLock::new();

/// Default clock used for timing figures.
pub const DEFAULT_FREQUENCY_MHZ: f64 = 100.0;

/// Default square image resolution.
pub const DEFAULT_RESOLUTION: u32 = 800;

/// Pipeline settings that override [`EngineOptions`] defaults.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct PipelineOverrides {
    pub reentry: Option<bool>,
    pub valid_pixel_skip: Option<bool>,
    pub numeric: Option<NumericPolicy>,
    pub max_steps: Option<u32>,
    pub saturation_threshold: Option<f32>,
    pub march: Option<MarchParams>,
    pub latencies: Option<StageLatencies>,
    pub capacities: Option<ChannelCapacities>,
}

impl PipelineOverrides {
    /// Write every set field into `options`.
    pub fn apply(&self, options: &mut EngineOptions) {
        if let Some(v) = self.reentry {
            options.reentry = v;
        }
        if let Some(v) = self.valid_pixel_skip {
            options.valid_pixel_skip = v;
        }
        if let Some(v) = self.numeric {
            options.numeric = v;
        }
        if let Some(v) = self.max_steps {
            options.max_steps = v;
        }
        if let Some(v) = self.saturation_threshold {
            options.saturation_threshold = v;
        }
        if let Some(v) = self.march {
            options.march = v;
        }
        if let Some(v) = self.latencies {
            options.latencies = v;
        }
        if let Some(v) = self.capacities {
            options.capacities = v;
        }
    }

    fn merge(&mut self, other: Self) {
        self.reentry = other.reentry.or(self.reentry);
        self.valid_pixel_skip = other.valid_pixel_skip.or(self.valid_pixel_skip);
        self.numeric = other.numeric.or(self.numeric);
        self.max_steps = other.max_steps.or(self.max_steps);
        self.saturation_threshold = other.saturation_threshold.or(self.saturation_threshold);
        self.march = other.march.or(self.march);
        self.latencies = other.latencies.or(self.latencies);
        self.capacities = other.capacities.or(self.capacities);
    }
}

/// ngp-sim configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Root of the nerf-synthetic scenes (`<scene>/transforms_test.json`).
    pub data_path: Option<String>,

    /// Directory of `<scene>.msgpack` snapshots.
    pub snapshot_path: Option<String>,

    /// Network shape JSON.
    pub model_config: Option<String>,

    /// Where images and reports are written.
    pub output_dir: Option<String>,

    /// Simulated clock (MHz).
    pub frequency_mhz: Option<f64>,

    /// Square image resolution.
    pub resolution: Option<u32>,

    /// Engine overrides.
    pub pipeline: PipelineOverrides,
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. Project-local `ngp-sim.toml`
    /// 3. User config `~/.config/ngp-sim/config.toml`
    /// 4. Defaults
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(user_config) = Self::load_user_config() {
            config.merge(user_config);
        }

        if let Some(local_config) = Self::load_local_config() {
            config.merge(local_config);
        }

        config.apply_env_overrides();

        config
    }

    /// Get the cached global configuration.
    ///
    /// Loads configuration on first call and caches it.
    pub fn get() -> &'static Config {
        CONFIG.get_or_init(|| {
            let config = Self::load();
            log::debug!("Loaded configuration: {:?}", config);
            config
        })
    }

    pub fn data_path(&self) -> PathBuf {
        PathBuf::from(self.data_path.as_deref().unwrap_or("./data/nerf_synthetic"))
    }

    pub fn snapshot_path(&self) -> PathBuf {
        PathBuf::from(self.snapshot_path.as_deref().unwrap_or("./snapshots/Hash19_Float"))
    }

    pub fn model_config(&self) -> PathBuf {
        PathBuf::from(self.model_config.as_deref().unwrap_or("./configs/base.json"))
    }

    pub fn output_dir(&self) -> PathBuf {
        PathBuf::from(self.output_dir.as_deref().unwrap_or("."))
    }

    pub fn frequency_mhz(&self) -> f64 {
        self.frequency_mhz.unwrap_or(DEFAULT_FREQUENCY_MHZ)
    }

    pub fn resolution(&self) -> u32 {
        self.resolution.unwrap_or(DEFAULT_RESOLUTION)
    }

    /// Camera transforms of a scene.
    pub fn scene_transforms(&self, scene: &str) -> PathBuf {
        self.data_path().join(scene).join("transforms_test.json")
    }

    /// Parameter snapshot of a scene.
    pub fn scene_snapshot(&self, scene: &str) -> PathBuf {
        self.snapshot_path().join(format!("{}.msgpack", scene))
    }

    /// Ground-truth test image of a scene.
    pub fn reference_image(&self, scene: &str, frame: usize) -> PathBuf {
        self.data_path().join(scene).join("test").join(format!("r_{}.png", frame))
    }

    /// Engine options with the `[pipeline]` overrides applied.
    pub fn engine_options(&self) -> EngineOptions {
        let mut options = EngineOptions::default();
        self.pipeline.apply(&mut options);
        options
    }

    fn load_user_config() -> Option<Self> {
        let config_dir = dirs::config_dir()?;
        let config_path = config_dir.join("ngp-sim").join("config.toml");
        Self::load_from_file(&config_path)
    }

    fn load_local_config() -> Option<Self> {
        let local_path = Path::new("ngp-sim.toml");
        if let Some(config) = Self::load_from_file(local_path) {
            return Some(config);
        }

        if let Ok(manifest_dir) = std::env::var("CARGO_MANIFEST_DIR") {
            let project_path = Path::new(&manifest_dir).join("ngp-sim.toml");
            if let Some(config) = Self::load_from_file(&project_path) {
                return Some(config);
            }
        }

        None
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => {
                    log::info!("Loaded config from {}", path.display());
                    Some(config)
                }
                Err(e) => {
                    log::warn!("Failed to parse {}: {}", path.display(), e);
                    None
                }
            },
            Err(e) => {
                log::warn!("Failed to read {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Merge another config into this one.
    /// Only overrides fields that are Some in the other config.
    fn merge(&mut self, other: Self) {
        if other.data_path.is_some() {
            self.data_path = other.data_path;
        }
        if other.snapshot_path.is_some() {
            self.snapshot_path = other.snapshot_path;
        }
        if other.model_config.is_some() {
            self.model_config = other.model_config;
        }
        if other.output_dir.is_some() {
            self.output_dir = other.output_dir;
        }
        if other.frequency_mhz.is_some() {
            self.frequency_mhz = other.frequency_mhz;
        }
        if other.resolution.is_some() {
            self.resolution = other.resolution;
        }
        self.pipeline.merge(other.pipeline);
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        let vars = [
            ("NGP_DATA_PATH", &mut self.data_path),
            ("NGP_SNAPSHOT_PATH", &mut self.snapshot_path),
            ("NGP_MODEL_CONFIG", &mut self.model_config),
            ("NGP_OUTPUT_DIR", &mut self.output_dir),
        ];
        for (name, slot) in vars {
            if let Ok(value) = std::env::var(name) {
                log::info!("Using {} from environment: {}", name, value);
                *slot = Some(value);
            }
        }
    }

    /// Get the path to the user config file (for display/creation).
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("ngp-sim").join("config.toml"))
    }

    /// Generate a sample config file content.
    pub fn sample_config() -> String {
        r#"# ngp-sim configuration
# Place this file at ~/.config/ngp-sim/config.toml or ./ngp-sim.toml

# nerf-synthetic scenes (each with transforms_test.json and test/r_*.png)
data_path = "./data/nerf_synthetic"

# Trained parameter snapshots, one <scene>.msgpack per scene
snapshot_path = "./snapshots/Hash19_Float"

# Network shapes (instant-ngp base.json layout)
model_config = "./configs/base.json"

# Output directory for images and History_*.txt reports
# output_dir = "."

# frequency_mhz = 100.0
# resolution = 800

[pipeline]
# reentry = true
# valid_pixel_skip = true
# max_steps = 1024
# saturation_threshold = 0.99
# numeric = { mode = "fixed" }

# [pipeline.latencies]
# ray_march = 1
# positional_encode = 10
# directional_encode = 4
# density_network = 4
# color_network = 6
# composite = 1

# [pipeline.capacities]
# march_to_positional = 2
"#
        .to_string()
    }
}
