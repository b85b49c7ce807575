//! Pass-through stages wrapping the encoders and networks.
//!
//! Each stage reads one tagged sample, applies its collaborator, rounds the
//! result per the numeric policy and holds it in the controller register
//! until the downstream channel has room. The color stage is the only one
//! with two inputs; it pairs them by ray id.

use std::sync::Arc;

use nalgebra::Vector4;

use super::channel::{Channel, ChannelKind};
use super::error::{PipelineError, Result};
use super::numeric::{NumericPolicy, Payload};
use super::ray::Sample;
use super::stage::{StageController, StageKind, StageLatencies, StageStats};
use crate::model::{
    color_input, ColorNetwork, DensityNetwork, DirectionalEncoder, Features16, Features32,
    PositionalEncoder, Vec3,
};

/// Color network output as it travels to the compositor: raw rgb in
/// `xyz`, raw (log-space) density in `w`.
pub type RawRgba = Vector4<f32>;

/// Single-input stage body shared by the three one-to-one adapters.
#[derive(Debug)]
struct PassThrough<O> {
    ctrl: StageController<O>,
    link: ChannelKind,
    numeric: NumericPolicy,
}

impl<O: Payload> PassThrough<O> {
    fn new(kind: StageKind, latency: u32, link: ChannelKind, numeric: NumericPolicy) -> Self {
        Self {
            ctrl: StageController::new(kind, latency),
            link,
            numeric,
        }
    }

    fn step<I>(
        &mut self,
        input: &mut Channel<I>,
        output: &mut Channel<O>,
        f: impl FnOnce(&I) -> O,
    ) -> Result<()> {
        if !self.ctrl.ready_for_input(output)? {
            return Ok(());
        }
        match input.try_read() {
            Some(sample) => {
                let mut result = sample.map(|v| f(&v));
                self.numeric.apply_to(self.link, &mut result.value);
                log::trace!("{} accepted ray {}", self.ctrl.kind(), result.ray_id);
                self.ctrl.complete(Some(result));
            }
            None => self.ctrl.starve(),
        }
        Ok(())
    }
}

/// Hash-grid encoding of sample positions.
pub struct PositionalEncodeStage {
    inner: PassThrough<Features32>,
    encoder: Arc<dyn PositionalEncoder>,
}

impl PositionalEncodeStage {
    pub fn new(encoder: Arc<dyn PositionalEncoder>, latencies: &StageLatencies, numeric: NumericPolicy) -> Self {
        Self {
            inner: PassThrough::new(
                StageKind::PositionalEncode,
                latencies.positional_encode,
                ChannelKind::PositionalToDensity,
                numeric,
            ),
            encoder,
        }
    }

    pub fn step(&mut self, input: &mut Channel<Vec3>, output: &mut Channel<Features32>) -> Result<()> {
        let encoder = &self.encoder;
        self.inner.step(input, output, |p| encoder.encode(p))
    }

    pub fn stats(&self) -> &StageStats {
        self.inner.ctrl.stats()
    }

    pub fn is_idle(&self) -> bool {
        self.inner.ctrl.is_idle()
    }
}

/// Spherical-harmonics encoding of ray directions.
pub struct DirectionalEncodeStage {
    inner: PassThrough<Features16>,
    encoder: Arc<dyn DirectionalEncoder>,
}

impl DirectionalEncodeStage {
    pub fn new(encoder: Arc<dyn DirectionalEncoder>, latencies: &StageLatencies, numeric: NumericPolicy) -> Self {
        Self {
            inner: PassThrough::new(
                StageKind::DirectionalEncode,
                latencies.directional_encode,
                ChannelKind::DirectionalToColor,
                numeric,
            ),
            encoder,
        }
    }

    pub fn step(&mut self, input: &mut Channel<Vec3>, output: &mut Channel<Features16>) -> Result<()> {
        let encoder = &self.encoder;
        self.inner.step(input, output, |d| encoder.encode(d))
    }

    pub fn stats(&self) -> &StageStats {
        self.inner.ctrl.stats()
    }

    pub fn is_idle(&self) -> bool {
        self.inner.ctrl.is_idle()
    }
}

/// Density network.
pub struct DensityStage {
    inner: PassThrough<Features16>,
    network: Arc<dyn DensityNetwork>,
}

impl DensityStage {
    pub fn new(network: Arc<dyn DensityNetwork>, latencies: &StageLatencies, numeric: NumericPolicy) -> Self {
        Self {
            inner: PassThrough::new(
                StageKind::DensityNetwork,
                latencies.density_network,
                ChannelKind::DensityToColor,
                numeric,
            ),
            network,
        }
    }

    pub fn step(&mut self, input: &mut Channel<Features32>, output: &mut Channel<Features16>) -> Result<()> {
        let network = &self.network;
        self.inner.step(input, output, |x| network.infer(x))
    }

    pub fn stats(&self) -> &StageStats {
        self.inner.ctrl.stats()
    }

    pub fn is_idle(&self) -> bool {
        self.inner.ctrl.is_idle()
    }
}

/// Color network over the paired density and direction paths.
pub struct ColorStage {
    ctrl: StageController<RawRgba>,
    network: Arc<dyn ColorNetwork>,
    numeric: NumericPolicy,
}

impl ColorStage {
    pub fn new(network: Arc<dyn ColorNetwork>, latencies: &StageLatencies, numeric: NumericPolicy) -> Self {
        Self {
            ctrl: StageController::new(StageKind::ColorNetwork, latencies.color_network),
            network,
            numeric,
        }
    }

    /// Both inputs must be non-empty before either is consumed, and their
    /// heads must belong to the same ray.
    pub fn step(
        &mut self,
        density: &mut Channel<Features16>,
        direction: &mut Channel<Features16>,
        output: &mut Channel<RawRgba>,
    ) -> Result<()> {
        if !self.ctrl.ready_for_input(output)? {
            return Ok(());
        }
        // Poll both sides so the handshake counters see every check.
        let has_density = density.has_data();
        let has_direction = direction.has_data();
        if !(has_density && has_direction) {
            self.ctrl.starve();
            return Ok(());
        }
        let d = density.read()?;
        let s = direction.read()?;
        if d.ray_id != s.ray_id {
            return Err(PipelineError::RayIdDesync {
                stage: StageKind::ColorNetwork,
                expected: d.ray_id,
                found: s.ray_id,
            });
        }
        let rgb = self.network.infer(&color_input(&d.value, &s.value));
        let mut out = RawRgba::new(rgb.x, rgb.y, rgb.z, d.value[0]);
        self.numeric.apply_to(ChannelKind::ColorToComposite, &mut out);
        log::trace!("color network accepted ray {}", d.ray_id);
        self.ctrl.complete(Some(Sample::new(d.ray_id, d.t, out)));
        Ok(())
    }

    pub fn stats(&self) -> &StageStats {
        self.ctrl.stats()
    }

    pub fn is_idle(&self) -> bool {
        self.ctrl.is_idle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::numeric::{FixedPointFormat, QuantScheme};
    use crate::pipeline::test_support::{ConstColor, ConstDensity, PassPositional};

    fn tick<I, O>(input: &mut Channel<I>, output: &mut Channel<O>) {
        input.commit();
        output.commit();
    }

    #[test]
    fn test_positional_stage_respects_latency() {
        let lat = StageLatencies {
            positional_encode: 3,
            ..Default::default()
        };
        let mut stage = PositionalEncodeStage::new(Arc::new(PassPositional), &lat, NumericPolicy::Float);
        let mut input = Channel::new(ChannelKind::MarchToPositional, 2);
        let mut output = Channel::new(ChannelKind::PositionalToDensity, 2);
        input.write(Sample::new(4, 0.2, Vec3::new(0.1, 0.2, 0.3))).unwrap();
        input.commit();

        // Cycle 1 accepts, cycles 2-3 count down, cycle 4 drains.
        for cycle in 1..=4 {
            stage.step(&mut input, &mut output).unwrap();
            tick(&mut input, &mut output);
            if cycle < 4 {
                assert!(output.is_idle(), "early result at cycle {cycle}");
            }
        }
        let out = output.try_read().unwrap();
        assert_eq!(out.ray_id, 4);
        assert_eq!(out.t, 0.2);
        assert_eq!(out.value[2], 0.3);
        assert_eq!(stage.stats().activations, 1);
        assert_eq!(stage.stats().busy_cycles, 2);
        assert!(stage.is_idle());
    }

    #[test]
    fn test_unit_latency_stage_runs_every_cycle() {
        let mut stage = DensityStage::new(
            Arc::new(ConstDensity(0.5)),
            &StageLatencies::unit(),
            NumericPolicy::Float,
        );
        let mut input = Channel::new(ChannelKind::PositionalToDensity, 8);
        let mut output = Channel::new(ChannelKind::DensityToColor, 8);
        for id in 0..8 {
            input.write(Sample::new(id, 0.1, Features32::zeros())).unwrap();
        }
        input.commit();

        for _ in 0..8 {
            stage.step(&mut input, &mut output).unwrap();
            tick(&mut input, &mut output);
        }
        let ids: Vec<u32> = std::iter::from_fn(|| output.try_read()).map(|s| s.ray_id).collect();
        assert_eq!(ids, (0..7).collect::<Vec<_>>());
        assert_eq!(stage.stats().activations, 8);
    }

    #[test]
    fn test_positional_stage_initiation_interval() {
        let lat = StageLatencies {
            positional_encode: 10,
            ..Default::default()
        };
        let mut stage = PositionalEncodeStage::new(Arc::new(PassPositional), &lat, NumericPolicy::Float);
        let mut input = Channel::new(ChannelKind::MarchToPositional, 4);
        let mut output = Channel::new(ChannelKind::PositionalToDensity, 4);
        for id in 0..3 {
            input.write(Sample::new(id, 0.1, Vec3::zeros())).unwrap();
        }
        input.commit();

        // Accepts at cycles 1, 11 and 21; results drain at 11 and 21.
        for _ in 0..21 {
            stage.step(&mut input, &mut output).unwrap();
            tick(&mut input, &mut output);
        }
        assert_eq!(output.len(), 2);
        assert_eq!(stage.stats().activations, 3);
    }

    #[test]
    fn test_stage_starves_on_empty_input() {
        let mut stage = DensityStage::new(
            Arc::new(ConstDensity(1.5)),
            &StageLatencies::unit(),
            NumericPolicy::Float,
        );
        let mut input: Channel<Features32> = Channel::new(ChannelKind::PositionalToDensity, 2);
        let mut output = Channel::new(ChannelKind::DensityToColor, 2);
        stage.step(&mut input, &mut output).unwrap();
        assert_eq!(stage.stats().input_starved, 1);
        assert_eq!(stage.stats().activations, 0);
    }

    #[test]
    fn test_density_output_is_quantized() {
        let numeric = NumericPolicy::Fixed(QuantScheme {
            network: FixedPointFormat::new(4, 1),
            ..Default::default()
        });
        let mut stage = DensityStage::new(Arc::new(ConstDensity(1.3)), &StageLatencies::unit(), numeric);
        let mut input = Channel::new(ChannelKind::PositionalToDensity, 2);
        let mut output = Channel::new(ChannelKind::DensityToColor, 2);
        input.write(Sample::new(0, 0.1, Features32::zeros())).unwrap();
        input.commit();
        stage.step(&mut input, &mut output).unwrap();
        tick(&mut input, &mut output);
        stage.step(&mut input, &mut output).unwrap();
        tick(&mut input, &mut output);
        assert_eq!(output.try_read().unwrap().value[0], 1.5);
    }

    #[test]
    fn test_color_stage_pairs_by_ray_id() {
        let mut stage = ColorStage::new(
            Arc::new(ConstColor(Vec3::new(1.0, 2.0, 3.0))),
            &StageLatencies::unit(),
            NumericPolicy::Float,
        );
        let mut density = Channel::new(ChannelKind::DensityToColor, 2);
        let mut direction = Channel::new(ChannelKind::DirectionalToColor, 2);
        let mut output = Channel::new(ChannelKind::ColorToComposite, 2);

        let mut sigma = Features16::zeros();
        sigma[0] = -0.5;
        density.write(Sample::new(7, 0.4, sigma)).unwrap();
        density.commit();
        // Direction path not ready: no read happens on either side.
        stage.step(&mut density, &mut direction, &mut output).unwrap();
        assert_eq!(density.len(), 1);
        assert_eq!(stage.stats().input_starved, 1);

        direction.write(Sample::new(7, 0.4, Features16::zeros())).unwrap();
        direction.commit();
        stage.step(&mut density, &mut direction, &mut output).unwrap();
        stage.step(&mut density, &mut direction, &mut output).unwrap();
        output.commit();
        let out = output.try_read().unwrap();
        assert_eq!(out.ray_id, 7);
        assert_eq!(out.value, RawRgba::new(1.0, 2.0, 3.0, -0.5));
    }

    #[test]
    fn test_color_stage_desync_is_fatal() {
        let mut stage = ColorStage::new(
            Arc::new(ConstColor(Vec3::zeros())),
            &StageLatencies::unit(),
            NumericPolicy::Float,
        );
        let mut density = Channel::new(ChannelKind::DensityToColor, 2);
        let mut direction = Channel::new(ChannelKind::DirectionalToColor, 2);
        let mut output = Channel::new(ChannelKind::ColorToComposite, 2);
        density.write(Sample::new(3, 0.1, Features16::zeros())).unwrap();
        direction.write(Sample::new(5, 0.1, Features16::zeros())).unwrap();
        density.commit();
        direction.commit();

        let err = stage.step(&mut density, &mut direction, &mut output).unwrap_err();
        assert_eq!(
            err,
            PipelineError::RayIdDesync {
                stage: StageKind::ColorNetwork,
                expected: 3,
                found: 5,
            }
        );
    }
}
