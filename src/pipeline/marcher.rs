//! Ray marcher: empty-space skipping, sample emission and ray retirement.
//!
//! The marcher walks the valid-pixel set in ascending id order and works on
//! one ray at a time. Each activation it either
//!
//! - consumes a retirement notice for the current ray and moves on,
//! - scans the current ray forward from its held `t` until an occupied
//!   sample is found and emits it to both encoders, or
//! - retires the current ray because it left the volume or ran out of
//!   steps, recording its accumulators in the frame history.
//!
//! With re-entry enabled the current ray is rescheduled after every emitted
//! sample until the compositor's notice arrives, so a ray can be marched
//! further than the compositor needs while the notice is in flight. Those
//! extra samples are discarded downstream.

use log::{debug, trace};
use serde::{Deserialize, Serialize};

use super::channel::{Channel, ChannelKind};
use super::engine::EngineOptions;
use super::error::{PipelineError, Result};
use super::history::{FrameHistory, PixelResult};
use super::numeric::NumericPolicy;
use super::ray::{RayArena, RayId, RayState, Sample};
use super::stage::{Phase, StageController, StageKind, StageStats};
use crate::model::{Occupancy, Ray, RayGenerator, SceneModels, Vec3};

/// Near bound of every ray.
pub const DEFAULT_T_MIN: f32 = 0.1;

/// Far bound of every ray.
pub const DEFAULT_T_MAX: f32 = 3.0;

/// Marching step: the unit-cube diagonal split into 1024 steps.
pub const DEFAULT_STEP_SIZE: f32 = 1.732_050_8 / 1024.0;

/// Direction components below this are treated as parallel to a slab.
const EPSILON: f32 = 1e-5;

/// Ray extent and step size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarchParams {
    pub t_min: f32,
    pub t_max: f32,
    pub step_size: f32,
}

impl Default for MarchParams {
    fn default() -> Self {
        Self {
            t_min: DEFAULT_T_MIN,
            t_max: DEFAULT_T_MAX,
            step_size: DEFAULT_STEP_SIZE,
        }
    }
}

impl MarchParams {
    pub fn validate(&self) -> Result<()> {
        let finite = self.t_min.is_finite() && self.t_max.is_finite() && self.step_size.is_finite();
        if !finite || self.t_min < 0.0 || self.t_min >= self.t_max {
            return Err(PipelineError::InvalidConfig(format!(
                "ray extent [{}, {}] is empty",
                self.t_min, self.t_max
            )));
        }
        if self.step_size <= 0.0 {
            return Err(PipelineError::InvalidConfig(
                "marching step must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// First `t` on the step grid starting at `from` whose position is
    /// occupied, or `None` once `t` reaches `t_max`.
    pub fn first_occupied(&self, ray: &Ray, occupancy: &dyn Occupancy, from: f32) -> Option<f32> {
        let mut t = from;
        while t < self.t_max {
            if occupancy.is_occupied(&ray.at(t)) {
                return Some(t);
            }
            t += self.step_size;
        }
        None
    }

    /// Whether any grid sample of `ray` is occupied. Same grid as
    /// [`first_occupied`](Self::first_occupied) from `t_min`, with lookups
    /// skipped outside the unit cube.
    fn hits_volume(&self, ray: &Ray, occupancy: &dyn Occupancy) -> bool {
        let Some((enter, exit)) = unit_cube_span(ray) else {
            return false;
        };
        let mut t = self.t_min;
        while t < self.t_max {
            if t > exit + self.step_size {
                return false;
            }
            if t >= enter - self.step_size && occupancy.is_occupied(&ray.at(t)) {
                return true;
            }
            t += self.step_size;
        }
        false
    }
}

/// Parametric span of `ray` inside `[0, 1]³`.
fn unit_cube_span(ray: &Ray) -> Option<(f32, f32)> {
    let mut t0 = f32::NEG_INFINITY;
    let mut t1 = f32::INFINITY;
    for axis in 0..3 {
        let o = ray.origin[axis];
        let d = ray.direction[axis];
        if d.abs() < EPSILON {
            if !(0.0..=1.0).contains(&o) {
                return None;
            }
            continue;
        }
        let a = -o / d;
        let b = (1.0 - o) / d;
        t0 = t0.max(a.min(b));
        t1 = t1.min(a.max(b));
    }
    (t0 <= t1).then_some((t0, t1))
}

/// Ray ids worth scheduling, ascending. Fixed for the whole frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidPixelSet {
    ids: Vec<RayId>,
}

impl ValidPixelSet {
    /// Every pixel of the frame.
    pub fn all(num_rays: usize) -> Self {
        Self {
            ids: (0..num_rays as RayId).collect(),
        }
    }

    /// Pixels whose ray has at least one occupied sample.
    pub fn compute(camera: &dyn RayGenerator, occupancy: &dyn Occupancy, params: &MarchParams) -> Self {
        let ids: Vec<RayId> = (0..camera.num_rays() as RayId)
            .filter(|id| params.hits_volume(&camera.generate(*id), occupancy))
            .collect();
        debug!("{} of {} pixels hit the occupied volume", ids.len(), camera.num_rays());
        Self { ids }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<RayId> {
        self.ids.get(index).copied()
    }

    pub fn contains(&self, ray_id: RayId) -> bool {
        self.ids.binary_search(&ray_id).is_ok()
    }

    pub fn as_slice(&self) -> &[RayId] {
        &self.ids
    }
}

/// Stage 1 of the pipeline.
#[derive(Debug)]
pub struct RayMarcher {
    ctrl: StageController<()>,
    params: MarchParams,
    max_steps: u32,
    reentry: bool,
    numeric: NumericPolicy,
    valid: ValidPixelSet,
    cursor: usize,
    exhausted: bool,
    retired: usize,
    stale_notices: u64,
}

impl RayMarcher {
    /// Marcher over `valid`. The first activation happens after the march
    /// latency has elapsed.
    pub fn new(valid: ValidPixelSet, options: &EngineOptions) -> Self {
        Self {
            ctrl: StageController::armed(StageKind::RayMarch, options.latencies.ray_march),
            params: options.march,
            max_steps: options.max_steps,
            reentry: options.reentry,
            numeric: options.numeric,
            valid,
            cursor: 0,
            exhausted: false,
            retired: 0,
            stale_notices: 0,
        }
    }

    /// Ray currently being marched.
    pub fn current_ray(&self) -> Option<RayId> {
        self.valid.get(self.cursor)
    }

    /// Every ray of the valid set has been retired.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn retired_count(&self) -> usize {
        self.retired
    }

    /// Notices that arrived for rays already retired.
    pub fn stale_notices(&self) -> u64 {
        self.stale_notices
    }

    pub fn valid_pixels(&self) -> &ValidPixelSet {
        &self.valid
    }

    pub fn stats(&self) -> &StageStats {
        self.ctrl.stats()
    }

    /// Run one cycle.
    pub fn step(
        &mut self,
        models: &SceneModels,
        arena: &mut RayArena,
        history: &mut FrameHistory,
        retire: &mut Channel<()>,
        to_positional: &mut Channel<Vec3>,
        to_directional: &mut Channel<Vec3>,
    ) -> Result<()> {
        if self.ctrl.begin_cycle() == Phase::Busy {
            return Ok(());
        }

        if self.reentry && retire.has_data() {
            let notice = retire.read()?;
            match self.current_ray() {
                Some(current) if notice.ray_id == current => {
                    let state = lookup(arena, current)?;
                    trace!("ray {} retired by compositor after {} samples", current, state.step_count);
                    self.finish_ray(state, history, false);
                    self.ctrl.rearm();
                    return Ok(());
                }
                Some(current) if notice.ray_id > current => {
                    return Err(PipelineError::RayIdDesync {
                        stage: StageKind::RayMarch,
                        expected: current,
                        found: notice.ray_id,
                    });
                }
                _ => {
                    self.stale_notices += 1;
                    trace!("dropping stale retirement notice for ray {}", notice.ray_id);
                }
            }
        }

        let Some(ray_id) = self.current_ray() else {
            if !self.exhausted {
                self.exhausted = true;
                debug!("ray marcher retired all {} scheduled rays", self.retired);
            }
            return Ok(());
        };

        if !to_positional.can_accept() || !to_directional.can_accept() {
            self.ctrl.stall();
            trace!("ray march stalled on encoder input (ray {})", ray_id);
            return Ok(());
        }

        let state = lookup(arena, ray_id)?;
        if state.step_count >= self.max_steps {
            trace!("ray {} exhausted its step budget", ray_id);
            self.finish_ray(state, history, true);
            self.ctrl.rearm();
            return Ok(());
        }

        let ray = models.camera.generate(ray_id);
        match self.params.first_occupied(&ray, models.occupancy.as_ref(), state.t) {
            None => {
                state.t = self.params.t_max;
                trace!("ray {} left the volume after {} samples", ray_id, state.step_count);
                self.finish_ray(state, history, true);
            }
            Some(t) => {
                let mut position = ray.at(t);
                let mut direction = (ray.direction + Vec3::repeat(1.0)) / 2.0;
                self.numeric.apply_to(ChannelKind::MarchToPositional, &mut position);
                self.numeric.apply_to(ChannelKind::MarchToDirectional, &mut direction);
                to_positional.write(Sample::new(ray_id, t, position))?;
                to_directional.write(Sample::new(ray_id, t, direction))?;
                state.step_count += 1;
                state.t = t + self.params.step_size;
            }
        }
        self.ctrl.rearm();
        Ok(())
    }

    fn finish_ray(&mut self, state: &mut RayState, history: &mut FrameHistory, record: bool) {
        state.active = false;
        if record {
            history.record(state.ray_id, PixelResult::from_state(state));
        }
        self.cursor += 1;
        self.retired += 1;
    }
}

fn lookup(arena: &mut RayArena, ray_id: RayId) -> Result<&mut RayState> {
    arena.get_mut(ray_id).ok_or(PipelineError::UnknownRay {
        stage: StageKind::RayMarch,
        ray_id,
    })
}
