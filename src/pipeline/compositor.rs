//! Front-to-back volume compositing and saturation retirement.
//!
//! Per sample, with `T = 1 - opacity`:
//!
//! ```text
//! alpha   = 1 - exp(-exp(raw_density) · step)
//! weight  = alpha · T
//! opacity += weight
//! color   += weight · sigmoid(raw_rgb)
//! depth   += weight · t
//! ```
//!
//! Once opacity reaches the saturation threshold the ray's result is
//! recorded and, with re-entry enabled, a retirement notice is sent back to
//! the marcher. Samples that arrive for a ray already saturated are dropped.

use super::adapters::RawRgba;
use super::channel::Channel;
use super::error::{PipelineError, Result};
use super::history::{FrameHistory, PixelResult};
use super::ray::{RayArena, RayState, Sample};
use super::stage::{StageController, StageKind, StageLatencies, StageStats};
use crate::model::Vec3;

/// Opacity at which a ray counts as fully opaque.
pub const DEFAULT_SATURATION_THRESHOLD: f32 = 0.99;

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Fold one sample into a ray's accumulators. Returns the sample weight.
pub fn accumulate(state: &mut RayState, raw: &RawRgba, t: f32, step_size: f32) -> f32 {
    let transmittance = 1.0 - state.accumulated_opacity;
    let alpha = 1.0 - (-raw.w.exp() * step_size).exp();
    let alpha = if alpha.is_nan() { 0.0 } else { alpha.clamp(0.0, 1.0) };
    let weight = alpha * transmittance;
    let rgb = Vec3::new(sigmoid(raw.x), sigmoid(raw.y), sigmoid(raw.z));
    state.accumulated_opacity = (state.accumulated_opacity + weight).min(1.0);
    state.accumulated_color += rgb * weight;
    state.accumulated_depth += t * weight;
    weight
}

/// Stage 6 of the pipeline.
#[derive(Debug)]
pub struct Compositor {
    ctrl: StageController<()>,
    step_size: f32,
    threshold: f32,
    reentry: bool,
    saturated: usize,
    discarded: u64,
}

impl Compositor {
    pub fn new(latencies: &StageLatencies, step_size: f32, threshold: f32, reentry: bool) -> Self {
        Self {
            ctrl: StageController::new(StageKind::Composite, latencies.composite),
            step_size,
            threshold,
            reentry,
            saturated: 0,
            discarded: 0,
        }
    }

    /// Rays that reached the threshold.
    pub fn saturated_count(&self) -> usize {
        self.saturated
    }

    /// Samples dropped because their ray had already saturated.
    pub fn discarded_samples(&self) -> u64 {
        self.discarded
    }

    pub fn stats(&self) -> &StageStats {
        self.ctrl.stats()
    }

    pub fn is_idle(&self) -> bool {
        self.ctrl.is_idle()
    }

    /// Run one cycle.
    pub fn step(
        &mut self,
        arena: &mut RayArena,
        history: &mut FrameHistory,
        input: &mut Channel<RawRgba>,
        retire: &mut Channel<()>,
    ) -> Result<()> {
        if !self.ctrl.ready_for_input(retire)? {
            return Ok(());
        }
        let Some(sample) = input.try_read() else {
            self.ctrl.starve();
            return Ok(());
        };
        let state = arena.get_mut(sample.ray_id).ok_or(PipelineError::UnknownRay {
            stage: StageKind::Composite,
            ray_id: sample.ray_id,
        })?;
        if state.saturated {
            self.discarded += 1;
            self.ctrl.complete(None);
            return Ok(());
        }

        accumulate(state, &sample.value, sample.t, self.step_size);
        let mut notice = None;
        if state.accumulated_opacity >= self.threshold {
            state.saturated = true;
            self.saturated += 1;
            history.record(sample.ray_id, PixelResult::from_state(state));
            log::trace!(
                "ray {} saturated at t={:.4} (opacity {:.4})",
                sample.ray_id,
                sample.t,
                state.accumulated_opacity
            );
            if self.reentry {
                notice = Some(Sample::new(sample.ray_id, sample.t, ()));
            }
        }
        self.ctrl.complete(notice);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::channel::ChannelKind;

    const STEP: f32 = 1.732_050_8 / 1024.0;

    fn rig(n: usize) -> (RayArena, FrameHistory, Channel<RawRgba>, Channel<()>) {
        (
            RayArena::new(n, 0.1),
            FrameHistory::new(n),
            Channel::new(ChannelKind::ColorToComposite, 2),
            Channel::new(ChannelKind::Retire, 2),
        )
    }

    #[test]
    fn test_opacity_is_monotone_and_bounded() {
        let mut state = RayState::new(0, 0.1);
        let mut last = 0.0;
        for (i, density) in [-3.0_f32, 0.0, 2.0, 5.0, 8.0, 12.0, 40.0, 100.0].iter().enumerate() {
            let raw = RawRgba::new(0.3, -1.0, 2.0, *density);
            accumulate(&mut state, &raw, 0.1 + i as f32 * STEP, STEP);
            assert!(state.accumulated_opacity >= last);
            assert!(state.accumulated_opacity <= 1.0 + 1e-6);
            // Color stays inside the simplex implied by opacity.
            assert!(state.accumulated_color.iter().all(|c| *c <= state.accumulated_opacity + 1e-6));
            last = state.accumulated_opacity;
        }
    }

    #[test]
    fn test_nan_density_adds_nothing() {
        let mut state = RayState::new(0, 0.1);
        let w = accumulate(&mut state, &RawRgba::new(0.0, 0.0, 0.0, f32::NAN), 0.5, STEP);
        assert_eq!(w, 0.0);
        assert_eq!(state.accumulated_opacity, 0.0);
    }

    #[test]
    fn test_weight_matches_closed_form() {
        let mut state = RayState::new(0, 0.1);
        let w = accumulate(&mut state, &RawRgba::new(0.0, 0.0, 0.0, 4.0), 0.5, STEP);
        let expected = 1.0 - (-(4.0_f32).exp() * STEP).exp();
        assert!((w - expected).abs() < 1e-6);
        // sigmoid(0) = 0.5
        assert!((state.accumulated_color.x - 0.5 * expected).abs() < 1e-6);
        assert!((state.accumulated_depth - 0.5 * expected).abs() < 1e-6);
    }

    #[test]
    fn test_saturation_sends_single_notice() {
        let (mut arena, mut history, mut input, mut retire) = rig(1);
        let mut comp = Compositor::new(&StageLatencies::unit(), STEP, DEFAULT_SATURATION_THRESHOLD, true);

        input.write(Sample::new(0, 0.1, RawRgba::new(0.0, 0.0, 0.0, 20.0))).unwrap();
        input.write(Sample::new(0, 0.11, RawRgba::new(0.0, 0.0, 0.0, 20.0))).unwrap();
        input.commit();

        comp.step(&mut arena, &mut history, &mut input, &mut retire).unwrap();
        assert!(arena.get(0).unwrap().saturated);
        assert_eq!(history.write_count(0), 1);
        comp.step(&mut arena, &mut history, &mut input, &mut retire).unwrap();
        retire.commit();
        assert_eq!(retire.try_read().unwrap().ray_id, 0);

        // The second sample is discarded without a second notice.
        comp.step(&mut arena, &mut history, &mut input, &mut retire).unwrap();
        comp.step(&mut arena, &mut history, &mut input, &mut retire).unwrap();
        retire.commit();
        assert!(retire.is_idle());
        assert_eq!(comp.discarded_samples(), 1);
        assert_eq!(history.write_count(0), 1);
    }

    #[test]
    fn test_composites_one_sample_per_cycle() {
        let (mut arena, mut history, _, mut retire) = rig(1);
        let mut input = Channel::new(ChannelKind::ColorToComposite, 4);
        let mut comp = Compositor::new(&StageLatencies::unit(), STEP, DEFAULT_SATURATION_THRESHOLD, true);
        for i in 0..4 {
            input.write(Sample::new(0, 0.1 + i as f32 * STEP, RawRgba::zeros())).unwrap();
        }
        input.commit();
        for _ in 0..4 {
            comp.step(&mut arena, &mut history, &mut input, &mut retire).unwrap();
        }
        assert!(input.is_idle());
        assert_eq!(comp.stats().activations, 4);
    }

    #[test]
    fn test_below_threshold_emits_nothing() {
        let (mut arena, mut history, mut input, mut retire) = rig(1);
        let mut comp = Compositor::new(&StageLatencies::unit(), STEP, DEFAULT_SATURATION_THRESHOLD, true);
        input.write(Sample::new(0, 0.1, RawRgba::new(0.0, 0.0, 0.0, 0.0))).unwrap();
        input.commit();
        comp.step(&mut arena, &mut history, &mut input, &mut retire).unwrap();
        comp.step(&mut arena, &mut history, &mut input, &mut retire).unwrap();
        retire.commit();
        assert!(retire.is_idle());
        assert!(!arena.get(0).unwrap().saturated);
        assert_eq!(history.write_count(0), 0);
    }

    #[test]
    fn test_no_notice_without_reentry() {
        let (mut arena, mut history, mut input, mut retire) = rig(1);
        let mut comp = Compositor::new(&StageLatencies::unit(), STEP, DEFAULT_SATURATION_THRESHOLD, false);
        input.write(Sample::new(0, 0.1, RawRgba::new(0.0, 0.0, 0.0, 20.0))).unwrap();
        input.commit();
        comp.step(&mut arena, &mut history, &mut input, &mut retire).unwrap();
        comp.step(&mut arena, &mut history, &mut input, &mut retire).unwrap();
        retire.commit();
        assert!(retire.is_idle());
        assert_eq!(comp.saturated_count(), 1);
        assert_eq!(history.write_count(0), 1);
    }

    #[test]
    fn test_unknown_ray_is_rejected() {
        let (mut arena, mut history, mut input, mut retire) = rig(1);
        let mut comp = Compositor::new(&StageLatencies::unit(), STEP, DEFAULT_SATURATION_THRESHOLD, true);
        input.write(Sample::new(9, 0.1, RawRgba::zeros())).unwrap();
        input.commit();
        let err = comp.step(&mut arena, &mut history, &mut input, &mut retire).unwrap_err();
        assert!(matches!(err, PipelineError::UnknownRay { ray_id: 9, .. }));
    }
}
