//! Numeric policy for inter-stage payloads.
//!
//! The accelerator can be evaluated with IEEE single precision everywhere,
//! or with every value crossing a channel rounded to the signed fixed-point
//! format of that link. Rounding is round-to-nearest and saturates at the
//! format's range, matching what a hardware register of that width holds.

use nalgebra::SVector;
use serde::{Deserialize, Serialize};

use super::channel::ChannelKind;

/// A payload made of scalars that the numeric policy can rewrite in place.
pub trait Payload {
    fn values_mut(&mut self) -> &mut [f32];
}

impl<const N: usize> Payload for SVector<f32, N> {
    fn values_mut(&mut self) -> &mut [f32] {
        self.as_mut_slice()
    }
}

/// Signed fixed-point format with `int_bits` integer bits and `frac_bits`
/// fractional bits (plus one sign bit).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedPointFormat {
    pub int_bits: u8,
    pub frac_bits: u8,
}

impl FixedPointFormat {
    pub const fn new(int_bits: u8, frac_bits: u8) -> Self {
        Self { int_bits, frac_bits }
    }

    /// Value of one least-significant bit.
    pub fn resolution(&self) -> f32 {
        (-(self.frac_bits as f32)).exp2()
    }

    /// Largest representable value.
    pub fn max_value(&self) -> f32 {
        let steps = (1u64 << (self.int_bits as u32 + self.frac_bits as u32)) - 1;
        steps as f32 * self.resolution()
    }

    /// Smallest representable value.
    pub fn min_value(&self) -> f32 {
        -((self.int_bits as f32).exp2())
    }

    /// Round `v` onto the format's grid, saturating at the range ends.
    pub fn quantize(&self, v: f32) -> f32 {
        if v.is_nan() {
            return 0.0;
        }
        let scale = (self.frac_bits as f32).exp2();
        let q = (v * scale).round() / scale;
        q.clamp(self.min_value(), self.max_value())
    }
}

/// Fixed-point format per pipeline link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuantScheme {
    /// Sample positions and directions leaving the marcher.
    pub march: FixedPointFormat,
    /// Hash-grid features.
    pub positional: FixedPointFormat,
    /// Spherical-harmonics features.
    pub directional: FixedPointFormat,
    /// Density and color network outputs.
    pub network: FixedPointFormat,
}

impl Default for QuantScheme {
    fn default() -> Self {
        Self {
            march: FixedPointFormat::new(4, 12),
            positional: FixedPointFormat::new(5, 10),
            directional: FixedPointFormat::new(10, 10),
            network: FixedPointFormat::new(5, 10),
        }
    }
}

impl QuantScheme {
    /// Format used on a link; `None` for links that carry no numeric payload.
    pub fn format_for(&self, link: ChannelKind) -> Option<FixedPointFormat> {
        match link {
            ChannelKind::MarchToPositional | ChannelKind::MarchToDirectional => Some(self.march),
            ChannelKind::PositionalToDensity => Some(self.positional),
            ChannelKind::DirectionalToColor => Some(self.directional),
            ChannelKind::DensityToColor | ChannelKind::ColorToComposite => Some(self.network),
            ChannelKind::Retire => None,
        }
    }
}

/// Arithmetic used for every inter-stage payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum NumericPolicy {
    /// Single-precision floats, untouched.
    #[default]
    Float,
    /// Per-link fixed point.
    Fixed(QuantScheme),
}

impl NumericPolicy {
    /// Fixed point with the reference formats.
    pub fn fixed() -> Self {
        NumericPolicy::Fixed(QuantScheme::default())
    }

    pub fn is_fixed(&self) -> bool {
        matches!(self, NumericPolicy::Fixed(_))
    }

    /// Apply the policy in place to a payload about to cross `link`.
    pub fn apply(&self, link: ChannelKind, values: &mut [f32]) {
        if let NumericPolicy::Fixed(scheme) = self {
            if let Some(format) = scheme.format_for(link) {
                for v in values.iter_mut() {
                    *v = format.quantize(*v);
                }
            }
        }
    }

    /// Apply the policy to a whole payload.
    pub fn apply_to<P: Payload>(&self, link: ChannelKind, payload: &mut P) {
        self.apply(link, payload.values_mut());
    }
}
