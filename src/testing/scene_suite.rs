//! Scene suite for rendering a batch of nerf-synthetic scenes.
//!
//! Each scene is loaded, rendered for one frame and scored independently, so
//! a missing file or an aborted frame only marks that scene.

use std::path::PathBuf;

use anyhow::Result;

use crate::config::{Config, DEFAULT_FREQUENCY_MHZ, DEFAULT_RESOLUTION};
use crate::model::occupancy::DEFAULT_OCCUPANCY_RESOLUTION;
use crate::model::{Camera, ModelConfig};
use crate::pipeline::{EngineOptions, FrameResult, PipelineEngine};
use crate::report;
use crate::snapshot::Snapshot;

/// The eight nerf-synthetic scenes.
pub const NERF_SYNTHETIC_SCENES: [&str; 8] = ["chair", "drums", "ficus", "hotdog", "lego", "materials", "mic", "ship"];

/// Result of rendering a single scene.
#[derive(Debug)]
pub enum SceneOutcome {
    /// Frame completed.
    Pass {
        cycles: u64,
        fps: f64,
        /// Present when a reference image was available.
        psnr: Option<f64>,
    },
    /// The engine aborted the frame.
    Fail {
        message: String,
        cycles: u64,
    },
    /// Inputs could not be loaded.
    LoadError {
        message: String,
    },
}

impl SceneOutcome {
    pub fn is_pass(&self) -> bool {
        matches!(self, SceneOutcome::Pass { .. })
    }

    /// Get the cycle count (if available).
    pub fn cycles(&self) -> Option<u64> {
        match self {
            SceneOutcome::Pass { cycles, .. } => Some(*cycles),
            SceneOutcome::Fail { cycles, .. } => Some(*cycles),
            SceneOutcome::LoadError { .. } => None,
        }
    }
}

/// Input files of one scene.
#[derive(Debug, Clone)]
pub struct SceneCase {
    pub name: String,
    /// `transforms_test.json`.
    pub transforms: PathBuf,
    /// `<scene>.msgpack`.
    pub snapshot: PathBuf,
    /// Ground truth for PSNR; skipped when absent on disk.
    pub reference: Option<PathBuf>,
}

impl SceneCase {
    /// Locate a scene's files through the tool configuration.
    pub fn from_config(config: &Config, name: &str, frame: usize) -> Self {
        Self {
            name: name.to_string(),
            transforms: config.scene_transforms(name),
            snapshot: config.scene_snapshot(name),
            reference: Some(config.reference_image(name, frame)),
        }
    }
}

/// Batch of scenes rendered with one set of engine options.
pub struct SceneSuite {
    scenes: Vec<SceneCase>,
    model_config: PathBuf,
    options: EngineOptions,
    resolution: u32,
    frame: usize,
    frequency_mhz: f64,
    occupancy_resolution: u32,
    /// Reports and images are written here when set.
    output_dir: Option<PathBuf>,
    write_depth: bool,
    results: Vec<(String, SceneOutcome)>,
}

impl SceneSuite {
    pub fn new(model_config: impl Into<PathBuf>, options: EngineOptions) -> Self {
        Self {
            scenes: Vec::new(),
            model_config: model_config.into(),
            options,
            resolution: DEFAULT_RESOLUTION,
            frame: 0,
            frequency_mhz: DEFAULT_FREQUENCY_MHZ,
            occupancy_resolution: DEFAULT_OCCUPANCY_RESOLUTION,
            output_dir: None,
            write_depth: false,
            results: Vec::new(),
        }
    }

    /// Suite over the nerf-synthetic scenes, paths and options taken from
    /// `config`.
    pub fn nerf_synthetic(config: &Config) -> Self {
        let mut suite = Self::new(config.model_config(), config.engine_options())
            .with_resolution(config.resolution())
            .with_frequency(config.frequency_mhz());
        for name in NERF_SYNTHETIC_SCENES {
            suite.add_scene(SceneCase::from_config(config, name, 0));
        }
        suite
    }

    pub fn with_resolution(mut self, resolution: u32) -> Self {
        self.resolution = resolution;
        self
    }

    /// Camera frame of `transforms_test.json` to render.
    pub fn with_frame(mut self, frame: usize) -> Self {
        self.frame = frame;
        self
    }

    pub fn with_frequency(mut self, frequency_mhz: f64) -> Self {
        self.frequency_mhz = frequency_mhz;
        self
    }

    pub fn with_occupancy_resolution(mut self, resolution: u32) -> Self {
        self.occupancy_resolution = resolution;
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>, write_depth: bool) -> Self {
        self.output_dir = Some(dir.into());
        self.write_depth = write_depth;
        self
    }

    pub fn add_scene(&mut self, scene: SceneCase) {
        self.scenes.push(scene);
    }

    pub fn scene_count(&self) -> usize {
        self.scenes.len()
    }

    /// Render every scene and return the summary.
    pub fn run_all(&mut self) -> SuiteResult {
        let scenes = self.scenes.clone();
        let mut result = SuiteResult {
            total: scenes.len(),
            ..Default::default()
        };
        let mut fps_sum = 0.0;
        let mut psnr_sum = 0.0;
        let mut psnr_count = 0;

        for scene in scenes {
            log::info!("Rendering scene {}", scene.name);
            let outcome = self.run_single(&scene);
            match &outcome {
                SceneOutcome::Pass { fps, psnr, .. } => {
                    result.passed += 1;
                    fps_sum += fps;
                    if let Some(p) = psnr.filter(|p| p.is_finite()) {
                        psnr_sum += p;
                        psnr_count += 1;
                    }
                }
                SceneOutcome::Fail { message, .. } => {
                    log::warn!("Scene {} failed: {}", scene.name, message);
                    result.failed += 1;
                }
                SceneOutcome::LoadError { message } => {
                    log::warn!("Scene {} not loaded: {}", scene.name, message);
                    result.load_error += 1;
                }
            }
            self.results.push((scene.name.clone(), outcome));
        }

        if result.passed > 0 {
            result.mean_fps = Some(fps_sum / result.passed as f64);
        }
        if psnr_count > 0 {
            result.mean_psnr = Some(psnr_sum / psnr_count as f64);
        }
        result
    }

    /// Render one scene.
    pub fn run_single(&self, scene: &SceneCase) -> SceneOutcome {
        let mut engine = match self.load(scene) {
            Ok(engine) => engine,
            Err(e) => {
                return SceneOutcome::LoadError {
                    message: format!("{:#}", e),
                };
            }
        };

        let frame = match engine.run_frame() {
            Ok(frame) => frame,
            Err(e) => {
                return SceneOutcome::Fail {
                    message: e.to_string(),
                    cycles: engine.cycles(),
                };
            }
        };

        let psnr = self.score(scene, &frame);
        if let Err(e) = self.write_outputs(scene, &frame, psnr) {
            return SceneOutcome::Fail {
                message: format!("{:#}", e),
                cycles: frame.cycles,
            };
        }

        SceneOutcome::Pass {
            cycles: frame.cycles,
            fps: frame.throughput(self.frequency_mhz).fps(),
            psnr,
        }
    }

    fn load(&self, scene: &SceneCase) -> Result<PipelineEngine> {
        let model_config = ModelConfig::from_file(&self.model_config)?;
        let camera = Camera::from_file(&scene.transforms, self.resolution, self.resolution, self.frame)?;
        let snapshot = Snapshot::from_file(&scene.snapshot)?;
        let models = snapshot.scene_models(&model_config, camera, self.occupancy_resolution)?;
        Ok(PipelineEngine::new(models, self.options.clone())?)
    }

    fn score(&self, scene: &SceneCase, frame: &FrameResult) -> Option<f64> {
        let path = scene.reference.as_ref().filter(|p| p.exists())?;
        match report::load_reference(path) {
            Ok(reference) => report::psnr(&report::color_image(frame), &reference),
            Err(e) => {
                log::warn!("{:#}", e);
                None
            }
        }
    }

    fn write_outputs(&self, scene: &SceneCase, frame: &FrameResult, psnr: Option<f64>) -> Result<()> {
        let Some(dir) = &self.output_dir else {
            return Ok(());
        };
        std::fs::create_dir_all(dir)?;
        report::write_history_report(dir, &scene.name, self.frequency_mhz, frame, psnr)?;
        let color = dir.join(format!("{}_{}.png", scene.name, self.frame));
        let depth = dir.join(format!("{}_{}_depth.png", scene.name, self.frame));
        let depth = self.write_depth.then_some((depth.as_path(), self.options.march.t_max));
        report::write_images(frame, &color, depth)
    }

    /// Get results from completed scenes.
    pub fn results(&self) -> &[(String, SceneOutcome)] {
        &self.results
    }

    /// Generate a summary report.
    pub fn summary_report(&self, result: &SuiteResult) -> String {
        let mut report = String::new();

        report.push_str("=== Scene Suite Results ===\n\n");
        report.push_str(&format!(
            "Total: {}, Passed: {}, Failed: {}, Load Error: {}\n",
            result.total, result.passed, result.failed, result.load_error
        ));
        if let Some(fps) = result.mean_fps {
            report.push_str(&format!("Mean FPS: {:.4}\n", fps));
        }
        if let Some(psnr) = result.mean_psnr {
            report.push_str(&format!("Mean PSNR(dB): {:.4}\n", psnr));
        }
        report.push('\n');

        if result.failed > 0 || result.load_error > 0 {
            report.push_str("--- Failed Scenes ---\n");
            for (name, outcome) in &self.results {
                match outcome {
                    SceneOutcome::Fail { message, cycles } => {
                        report.push_str(&format!("{}: FAIL after {} cycles - {}\n", name, cycles, message));
                    }
                    SceneOutcome::LoadError { message } => {
                        report.push_str(&format!("{}: LOAD ERROR - {}\n", name, message));
                    }
                    SceneOutcome::Pass { .. } => {}
                }
            }
            report.push('\n');
        }

        if result.passed > 0 {
            report.push_str("--- Passed Scenes ---\n");
            for (name, outcome) in &self.results {
                if let SceneOutcome::Pass { cycles, fps, psnr } = outcome {
                    let psnr = psnr.map(|p| format!(", PSNR {:.4} dB", p)).unwrap_or_default();
                    report.push_str(&format!("{}: PASS ({} cycles, {:.4} FPS{})\n", name, cycles, fps, psnr));
                }
            }
            report.push('\n');
        }

        report
    }
}

/// Summary of a suite run.
#[derive(Debug, Clone, Default)]
pub struct SuiteResult {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub load_error: usize,
    /// Mean FPS over passing scenes.
    pub mean_fps: Option<f64>,
    /// Mean PSNR over passing scenes with a finite score.
    pub mean_psnr: Option<f64>,
}

impl SuiteResult {
    /// Get pass rate as a percentage.
    pub fn pass_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.passed as f64 / self.total as f64) * 100.0
        }
    }
}
