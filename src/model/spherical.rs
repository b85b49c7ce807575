//! Real spherical-harmonics directional encoding, degrees 1 to 4.
//!
//! The input direction arrives remapped to `[0, 1]³` (the marcher sends
//! `(d + 1) / 2`), so it is mapped back to `[-1, 1]³` first. A degree-`n`
//! encoding fills the first `n²` outputs; the rest stay zero.

use super::config::ShConfig;
use super::{DirectionalEncoder, Features16, Vec3};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SphericalHarmonics {
    degree: u32,
}

impl SphericalHarmonics {
    /// `degree` is clamped to `1..=4`.
    pub fn new(degree: u32) -> Self {
        Self {
            degree: degree.clamp(1, 4),
        }
    }

    pub fn from_config(config: &ShConfig) -> Self {
        Self::new(config.degree)
    }

    pub fn degree(&self) -> u32 {
        self.degree
    }

    /// Number of meaningful outputs.
    pub fn output_dims(&self) -> usize {
        (self.degree * self.degree) as usize
    }
}

impl DirectionalEncoder for SphericalHarmonics {
    #[allow(clippy::excessive_precision)]
    fn encode(&self, direction: &Vec3) -> Features16 {
        let x = direction.x * 2.0 - 1.0;
        let y = direction.y * 2.0 - 1.0;
        let z = direction.z * 2.0 - 1.0;
        let (xy, xz, yz) = (x * y, x * z, y * z);
        let (x2, y2, z2) = (x * x, y * y, z * z);

        let mut out = Features16::zeros();
        out[0] = 0.28209479177387814;
        if self.degree <= 1 {
            return out;
        }
        out[1] = -0.48860251190291987 * y;
        out[2] = 0.48860251190291987 * z;
        out[3] = -0.48860251190291987 * x;
        if self.degree <= 2 {
            return out;
        }
        out[4] = 1.0925484305920792 * xy;
        out[5] = -1.0925484305920792 * yz;
        out[6] = 0.94617469575755997 * z2 - 0.31539156525251999;
        out[7] = -1.0925484305920792 * xz;
        out[8] = 0.54627421529603959 * x2 - 0.54627421529603959 * y2;
        if self.degree <= 3 {
            return out;
        }
        out[9] = 0.59004358992664352 * y * (-3.0 * x2 + y2);
        out[10] = 2.8906114426405538 * xy * z;
        out[11] = 0.45704579946446572 * y * (1.0 - 5.0 * z2);
        out[12] = 0.3731763325901154 * z * (5.0 * z2 - 3.0);
        out[13] = 0.45704579946446572 * x * (1.0 - 5.0 * z2);
        out[14] = 1.4453057213202769 * z * (x2 - y2);
        out[15] = 0.59004358992664352 * x * (-x2 + 3.0 * y2);
        out
    }
}
