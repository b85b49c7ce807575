//! Cycle driver for the six-stage pipeline.
//!
//! One call to [`PipelineEngine::step`] is one clock cycle:
//!
//! ```text
//!   march → positional → directional → density → color → composite
//!   then commit() on every channel
//! ```
//!
//! Stages run in that fixed order but only ever see channel contents
//! committed at the end of the previous cycle, so the order does not leak
//! into timing. The frame is complete once the marcher has retired every
//! ray in the valid-pixel set; whatever is still in flight is folded into
//! the history by a final merge.

use log::{debug, error, info};
use serde::{Deserialize, Serialize};

use super::adapters::{ColorStage, DensityStage, DirectionalEncodeStage, PositionalEncodeStage, RawRgba};
use super::channel::{Channel, ChannelKind, ChannelStats, DEFAULT_CHANNEL_CAPACITY};
use super::compositor::{Compositor, DEFAULT_SATURATION_THRESHOLD};
use super::error::{PipelineError, Result};
use super::history::{FrameHistory, PixelResult, ThroughputReport};
use super::marcher::{MarchParams, RayMarcher, ValidPixelSet};
use super::numeric::NumericPolicy;
use super::ray::RayArena;
use super::stage::{StageKind, StageLatencies, StageStats};
use crate::model::{Features16, Features32, SceneModels, Vec3};

/// Default sample budget per ray.
pub const DEFAULT_MAX_STEPS: u32 = 1024;

/// Cycles between progress log lines.
const PROGRESS_INTERVAL: u64 = 10_000;

/// Depth of each link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelCapacities {
    pub march_to_positional: usize,
    pub march_to_directional: usize,
    pub positional_to_density: usize,
    pub directional_to_color: usize,
    pub density_to_color: usize,
    pub color_to_composite: usize,
    pub retire: usize,
}

impl Default for ChannelCapacities {
    fn default() -> Self {
        Self::uniform(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl ChannelCapacities {
    /// Same depth everywhere.
    pub fn uniform(capacity: usize) -> Self {
        Self {
            march_to_positional: capacity,
            march_to_directional: capacity,
            positional_to_density: capacity,
            directional_to_color: capacity,
            density_to_color: capacity,
            color_to_composite: capacity,
            retire: capacity,
        }
    }

    pub fn get(&self, kind: ChannelKind) -> usize {
        match kind {
            ChannelKind::MarchToPositional => self.march_to_positional,
            ChannelKind::MarchToDirectional => self.march_to_directional,
            ChannelKind::PositionalToDensity => self.positional_to_density,
            ChannelKind::DirectionalToColor => self.directional_to_color,
            ChannelKind::DensityToColor => self.density_to_color,
            ChannelKind::ColorToComposite => self.color_to_composite,
            ChannelKind::Retire => self.retire,
        }
    }

    pub fn validate(&self) -> Result<()> {
        for kind in ChannelKind::ALL {
            if self.get(kind) == 0 {
                return Err(PipelineError::InvalidConfig(format!(
                    "channel {} needs a capacity of at least 1",
                    kind
                )));
            }
        }
        Ok(())
    }
}

/// Every knob of the pipeline. One engine covers the single-pass,
/// re-entrant and quantized variants of the design.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    /// Keep rescheduling a ray until the compositor retires it.
    pub reentry: bool,
    /// Arithmetic of inter-stage payloads.
    pub numeric: NumericPolicy,
    /// Only schedule pixels whose ray hits the occupied volume.
    pub valid_pixel_skip: bool,
    /// Sample budget per ray.
    pub max_steps: u32,
    /// Opacity that retires a ray in the compositor.
    pub saturation_threshold: f32,
    pub march: MarchParams,
    pub latencies: StageLatencies,
    pub capacities: ChannelCapacities,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            reentry: true,
            numeric: NumericPolicy::Float,
            valid_pixel_skip: true,
            max_steps: DEFAULT_MAX_STEPS,
            saturation_threshold: DEFAULT_SATURATION_THRESHOLD,
            march: MarchParams::default(),
            latencies: StageLatencies::default(),
            capacities: ChannelCapacities::default(),
        }
    }
}

impl EngineOptions {
    pub fn validate(&self) -> Result<()> {
        self.latencies.validate()?;
        self.capacities.validate()?;
        self.march.validate()?;
        if !(self.saturation_threshold > 0.0 && self.saturation_threshold <= 1.0) {
            return Err(PipelineError::InvalidConfig(format!(
                "saturation threshold {} outside (0, 1]",
                self.saturation_threshold
            )));
        }
        Ok(())
    }
}

/// Engine lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    /// Built, no cycle run yet.
    Ready,
    /// Mid-frame.
    Running,
    /// Every scheduled ray retired.
    Complete,
    /// Stopped on a protocol error.
    Error,
}

/// All links of the pipeline.
#[derive(Debug)]
struct Channels {
    march_to_positional: Channel<Vec3>,
    march_to_directional: Channel<Vec3>,
    positional_to_density: Channel<Features32>,
    directional_to_color: Channel<Features16>,
    density_to_color: Channel<Features16>,
    color_to_composite: Channel<RawRgba>,
    retire: Channel<()>,
}

impl Channels {
    fn new(caps: &ChannelCapacities) -> Self {
        Self {
            march_to_positional: Channel::new(ChannelKind::MarchToPositional, caps.march_to_positional),
            march_to_directional: Channel::new(ChannelKind::MarchToDirectional, caps.march_to_directional),
            positional_to_density: Channel::new(ChannelKind::PositionalToDensity, caps.positional_to_density),
            directional_to_color: Channel::new(ChannelKind::DirectionalToColor, caps.directional_to_color),
            density_to_color: Channel::new(ChannelKind::DensityToColor, caps.density_to_color),
            color_to_composite: Channel::new(ChannelKind::ColorToComposite, caps.color_to_composite),
            retire: Channel::new(ChannelKind::Retire, caps.retire),
        }
    }

    fn commit_all(&mut self) {
        self.march_to_positional.commit();
        self.march_to_directional.commit();
        self.positional_to_density.commit();
        self.directional_to_color.commit();
        self.density_to_color.commit();
        self.color_to_composite.commit();
        self.retire.commit();
    }

    /// `(kind, visible plus staged length, capacity)` per link.
    fn levels(&self) -> [(ChannelKind, usize, usize); 7] {
        [
            level(&self.march_to_positional),
            level(&self.march_to_directional),
            level(&self.positional_to_density),
            level(&self.directional_to_color),
            level(&self.density_to_color),
            level(&self.color_to_composite),
            level(&self.retire),
        ]
    }

    fn stats(&self) -> Vec<(ChannelKind, ChannelStats)> {
        vec![
            (ChannelKind::MarchToPositional, *self.march_to_positional.stats()),
            (ChannelKind::MarchToDirectional, *self.march_to_directional.stats()),
            (ChannelKind::PositionalToDensity, *self.positional_to_density.stats()),
            (ChannelKind::DirectionalToColor, *self.directional_to_color.stats()),
            (ChannelKind::DensityToColor, *self.density_to_color.stats()),
            (ChannelKind::ColorToComposite, *self.color_to_composite.stats()),
            (ChannelKind::Retire, *self.retire.stats()),
        ]
    }
}

fn level<T>(ch: &Channel<T>) -> (ChannelKind, usize, usize) {
    (ch.kind(), ch.len() + ch.staged_len(), ch.capacity())
}

/// Outcome of a finished frame.
#[derive(Debug, Clone)]
pub struct FrameResult {
    pub width: u32,
    pub height: u32,
    pub cycles: u64,
    /// Pixels scheduled for marching.
    pub valid_rays: usize,
    /// Final per-pixel values, indexed by ray id.
    pub pixels: Vec<PixelResult>,
    pub stage_stats: Vec<(StageKind, StageStats)>,
    pub channel_stats: Vec<(ChannelKind, ChannelStats)>,
    /// Rays retired by the compositor.
    pub saturated_rays: usize,
    /// Samples dropped because their ray had already saturated.
    pub discarded_samples: u64,
    /// Retirement notices that arrived after their ray had moved on.
    pub stale_notices: u64,
}

impl FrameResult {
    pub fn num_rays(&self) -> usize {
        self.pixels.len()
    }

    /// Timing figures at `frequency_mhz`.
    pub fn throughput(&self, frequency_mhz: f64) -> ThroughputReport {
        ThroughputReport::new(frequency_mhz, self.cycles, self.num_rays(), self.valid_rays)
    }
}

/// Owns every stage and channel of one frame.
pub struct PipelineEngine {
    models: SceneModels,
    options: EngineOptions,
    status: EngineStatus,
    arena: RayArena,
    history: FrameHistory,
    marcher: RayMarcher,
    positional: PositionalEncodeStage,
    directional: DirectionalEncodeStage,
    density: DensityStage,
    color: ColorStage,
    compositor: Compositor,
    channels: Channels,
}

impl PipelineEngine {
    /// Validate `options`, compute the valid-pixel set and build the stages.
    pub fn new(models: SceneModels, options: EngineOptions) -> Result<Self> {
        options.validate()?;
        let num_rays = models.camera.num_rays();
        let valid = if options.valid_pixel_skip {
            ValidPixelSet::compute(models.camera.as_ref(), models.occupancy.as_ref(), &options.march)
        } else {
            ValidPixelSet::all(num_rays)
        };
        let (w, h) = models.camera.resolution();
        info!(
            "Pipeline ready: {}x{} pixels, {} scheduled, reentry={}, numeric={:?}",
            w,
            h,
            valid.len(),
            options.reentry,
            options.numeric
        );

        let lat = options.latencies;
        Ok(Self {
            arena: RayArena::new(num_rays, options.march.t_min),
            history: FrameHistory::new(num_rays),
            marcher: RayMarcher::new(valid, &options),
            positional: PositionalEncodeStage::new(models.positional.clone(), &lat, options.numeric),
            directional: DirectionalEncodeStage::new(models.directional.clone(), &lat, options.numeric),
            density: DensityStage::new(models.density.clone(), &lat, options.numeric),
            color: ColorStage::new(models.color.clone(), &lat, options.numeric),
            compositor: Compositor::new(
                &lat,
                options.march.step_size,
                options.saturation_threshold,
                options.reentry,
            ),
            channels: Channels::new(&options.capacities),
            status: EngineStatus::Ready,
            models,
            options,
        })
    }

    pub fn status(&self) -> EngineStatus {
        self.status
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Cycles run so far.
    pub fn cycles(&self) -> u64 {
        self.history.cycles()
    }

    pub fn history(&self) -> &FrameHistory {
        &self.history
    }

    pub fn arena(&self) -> &RayArena {
        &self.arena
    }

    pub fn valid_pixels(&self) -> &ValidPixelSet {
        self.marcher.valid_pixels()
    }

    /// `(kind, occupancy, capacity)` of every channel, staged writes included.
    pub fn channel_levels(&self) -> [(ChannelKind, usize, usize); 7] {
        self.channels.levels()
    }

    pub fn channel_stats(&self) -> Vec<(ChannelKind, ChannelStats)> {
        self.channels.stats()
    }

    pub fn stage_stats(&self) -> Vec<(StageKind, StageStats)> {
        vec![
            (StageKind::RayMarch, *self.marcher.stats()),
            (StageKind::PositionalEncode, *self.positional.stats()),
            (StageKind::DirectionalEncode, *self.directional.stats()),
            (StageKind::DensityNetwork, *self.density.stats()),
            (StageKind::ColorNetwork, *self.color.stats()),
            (StageKind::Composite, *self.compositor.stats()),
        ]
    }

    /// Run one clock cycle.
    pub fn step(&mut self) -> Result<()> {
        match self.status {
            EngineStatus::Complete | EngineStatus::Error => return Ok(()),
            EngineStatus::Ready => self.status = EngineStatus::Running,
            EngineStatus::Running => {}
        }

        let ch = &mut self.channels;
        self.marcher.step(
            &self.models,
            &mut self.arena,
            &mut self.history,
            &mut ch.retire,
            &mut ch.march_to_positional,
            &mut ch.march_to_directional,
        )?;
        self.positional
            .step(&mut ch.march_to_positional, &mut ch.positional_to_density)?;
        self.directional
            .step(&mut ch.march_to_directional, &mut ch.directional_to_color)?;
        self.density
            .step(&mut ch.positional_to_density, &mut ch.density_to_color)?;
        self.color.step(
            &mut ch.density_to_color,
            &mut ch.directional_to_color,
            &mut ch.color_to_composite,
        )?;
        self.compositor.step(
            &mut self.arena,
            &mut self.history,
            &mut ch.color_to_composite,
            &mut ch.retire,
        )?;
        ch.commit_all();
        self.history.tick();

        if self.marcher.is_exhausted() {
            self.status = EngineStatus::Complete;
        }
        Ok(())
    }

    /// Run until every scheduled ray is retired, then merge in-flight
    /// results into the history.
    pub fn run_frame(&mut self) -> Result<FrameResult> {
        while self.status != EngineStatus::Complete {
            if let Err(e) = self.step() {
                self.status = EngineStatus::Error;
                error!("Frame aborted at cycle {}: {}", self.cycles(), e);
                return Err(e);
            }
            let cycles = self.cycles();
            if cycles % PROGRESS_INTERVAL == 0 {
                debug!(
                    "cycle {}: {}/{} rays retired",
                    cycles,
                    self.marcher.retired_count(),
                    self.marcher.valid_pixels().len()
                );
            }
        }

        let merged = self.history.merge_arena(&self.arena);
        info!(
            "Frame complete in {} cycles ({} rays saturated, {} in-flight results merged)",
            self.cycles(),
            self.compositor.saturated_count(),
            merged
        );
        Ok(self.result())
    }

    fn result(&self) -> FrameResult {
        let (width, height) = self.models.camera.resolution();
        FrameResult {
            width,
            height,
            cycles: self.cycles(),
            valid_rays: self.marcher.valid_pixels().len(),
            pixels: self.history.pixels().to_vec(),
            stage_stats: self.stage_stats(),
            channel_stats: self.channel_stats(),
            saturated_rays: self.compositor.saturated_count(),
            discarded_samples: self.compositor.discarded_samples(),
            stale_notices: self.marcher.stale_notices(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OccupancyGrid;
    use crate::pipeline::test_support::stub_models;

    fn engine(models: SceneModels, options: EngineOptions) -> PipelineEngine {
        PipelineEngine::new(models, options).unwrap()
    }

    #[test]
    fn test_empty_valid_set_completes_in_march_latency() {
        let models = stub_models(1, 1, vec![0], OccupancyGrid::full(4), 0.0);
        let options = EngineOptions {
            latencies: StageLatencies {
                ray_march: 3,
                ..Default::default()
            },
            ..Default::default()
        };
        let mut e = engine(models, options);
        assert!(e.valid_pixels().is_empty());
        let result = e.run_frame().unwrap();
        assert_eq!(result.cycles, 3);
        assert_eq!(result.pixels[0], PixelResult::default());
        assert_eq!(e.status(), EngineStatus::Complete);
    }

    #[test]
    fn test_saturating_first_sample_writes_history_once() {
        for reentry in [true, false] {
            let models = stub_models(1, 1, vec![], OccupancyGrid::full(4), 20.0);
            let options = EngineOptions {
                reentry,
                ..Default::default()
            };
            let mut e = engine(models, options);
            let result = e.run_frame().unwrap();

            assert_eq!(e.history().write_count(0), 1, "reentry={reentry}");
            assert_eq!(result.saturated_rays, 1);
            let composite = result
                .stage_stats
                .iter()
                .find(|(k, _)| *k == StageKind::Composite)
                .map(|(_, s)| *s)
                .unwrap();
            assert_eq!(composite.activations - result.discarded_samples, 1);
            assert!(result.pixels[0].opacity >= 0.99);
        }
    }

    #[test]
    fn test_deterministic_across_runs() {
        let run = || {
            let models = stub_models(2, 2, vec![1], OccupancyGrid::full(4), 3.0);
            engine(models, EngineOptions::default()).run_frame().unwrap()
        };
        let a = run();
        let b = run();
        assert_eq!(a.cycles, b.cycles);
        assert_eq!(a.pixels, b.pixels);
        assert_eq!(a.saturated_rays, 3);
    }

    #[test]
    fn test_skipped_pixel_keeps_default() {
        let models = stub_models(2, 1, vec![1], OccupancyGrid::full(4), 20.0);
        let skipped = engine(models.clone(), EngineOptions::default()).run_frame().unwrap();
        assert_eq!(skipped.valid_rays, 1);
        assert_eq!(skipped.pixels[1], PixelResult::default());

        let options = EngineOptions {
            valid_pixel_skip: false,
            ..Default::default()
        };
        let scheduled = engine(models, options).run_frame().unwrap();
        assert_eq!(scheduled.valid_rays, 2);
        assert_eq!(scheduled.pixels[1], PixelResult::default());
        let activations = |r: &FrameResult| r.stage_stats[0].1.activations;
        assert!(activations(&skipped) < activations(&scheduled));
        assert!(skipped.cycles < scheduled.cycles);
    }

    #[test]
    fn test_channels_never_exceed_capacity() {
        let models = stub_models(2, 1, vec![], OccupancyGrid::full(4), 3.0);
        let options = EngineOptions {
            capacities: ChannelCapacities::uniform(1),
            ..Default::default()
        };
        let mut e = engine(models, options);
        while e.status() != EngineStatus::Complete {
            e.step().unwrap();
            for (kind, len, cap) in e.channel_levels() {
                assert!(len <= cap, "{kind} holds {len} > {cap}");
            }
        }
        assert!(e.cycles() > 0);
    }

    #[test]
    fn test_single_pass_and_fixed_point_variants_finish() {
        let models = stub_models(2, 1, vec![], OccupancyGrid::full(4), 3.0);
        let options = EngineOptions {
            reentry: false,
            numeric: NumericPolicy::fixed(),
            ..Default::default()
        };
        let result = engine(models, options).run_frame().unwrap();
        assert_eq!(result.stale_notices, 0);
        for px in &result.pixels {
            assert!(px.opacity >= 0.99 && px.opacity <= 1.0);
        }
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let models = stub_models(1, 1, vec![], OccupancyGrid::full(4), 0.0);
        let options = EngineOptions {
            capacities: ChannelCapacities {
                retire: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(
            PipelineEngine::new(models, options),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_throughput_from_result() {
        let models = stub_models(1, 1, vec![0], OccupancyGrid::full(4), 0.0);
        let result = engine(models, EngineOptions::default()).run_frame().unwrap();
        let report = result.throughput(100.0);
        assert_eq!(report.cycles, 1);
        assert_eq!(report.num_rays, 1);
        assert!((report.sim_time_s() - 1e-8).abs() < 1e-15);
    }
}
