//! Per-pixel best results and frame throughput figures.
//!
//! A pixel's record changes only when a new result has strictly higher
//! opacity than the one already stored ("max-opacity wins"). Writes from the
//! marcher on exit, from the compositor on saturation and from the
//! end-of-frame merge therefore commute, and repeating a write is a no-op.

use nalgebra::Vector3;

use super::ray::{RayArena, RayId, RayState};

/// Width and height of the square reference resolution.
pub const REFERENCE_RESOLUTION: (u32, u32) = (800, 800);

/// Full-HD reference resolution.
pub const FULL_HD_RESOLUTION: (u32, u32) = (1920, 1080);

/// Final value of one pixel.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PixelResult {
    /// Premultiplied color.
    pub color: Vector3<f32>,
    pub opacity: f32,
    /// Opacity-weighted sample distance.
    pub depth: f32,
}

impl PixelResult {
    /// Snapshot a ray's accumulators.
    pub fn from_state(state: &RayState) -> Self {
        Self {
            color: state.accumulated_color,
            opacity: state.accumulated_opacity,
            depth: state.accumulated_depth,
        }
    }
}

/// Best result per pixel plus the frame's cycle counter.
#[derive(Debug, Clone, Default)]
pub struct FrameHistory {
    pixels: Vec<PixelResult>,
    writes: Vec<u32>,
    cycles: u64,
}

impl FrameHistory {
    /// All pixels start transparent black.
    pub fn new(num_pixels: usize) -> Self {
        Self {
            pixels: vec![PixelResult::default(); num_pixels],
            writes: vec![0; num_pixels],
            cycles: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    /// Store `result` if it beats the recorded opacity. Returns whether the
    /// record changed.
    pub fn record(&mut self, ray_id: RayId, result: PixelResult) -> bool {
        let idx = ray_id as usize;
        match self.pixels.get_mut(idx) {
            Some(best) if result.opacity > best.opacity => {
                *best = result;
                self.writes[idx] += 1;
                true
            }
            _ => false,
        }
    }

    /// Fold every ray's accumulators into the history. Returns the number of
    /// pixels that improved.
    pub fn merge_arena(&mut self, arena: &RayArena) -> usize {
        arena
            .iter()
            .filter(|state| self.record(state.ray_id, PixelResult::from_state(state)))
            .count()
    }

    pub fn pixel(&self, ray_id: RayId) -> Option<&PixelResult> {
        self.pixels.get(ray_id as usize)
    }

    pub fn pixels(&self) -> &[PixelResult] {
        &self.pixels
    }

    /// How many times a pixel's record changed.
    pub fn write_count(&self, ray_id: RayId) -> u32 {
        self.writes.get(ray_id as usize).copied().unwrap_or(0)
    }

    pub fn total_writes(&self) -> u64 {
        self.writes.iter().map(|w| *w as u64).sum()
    }

    /// Advance the cycle counter by one.
    pub fn tick(&mut self) {
        self.cycles += 1;
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }
}

/// Timing figures derived from a finished frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThroughputReport {
    /// Simulated clock frequency (MHz).
    pub frequency_mhz: f64,
    /// Cycles the frame took.
    pub cycles: u64,
    /// Pixels in the frame.
    pub num_rays: usize,
    /// Pixels that were actually scheduled.
    pub valid_rays: usize,
}

impl ThroughputReport {
    pub fn new(frequency_mhz: f64, cycles: u64, num_rays: usize, valid_rays: usize) -> Self {
        Self {
            frequency_mhz,
            cycles,
            num_rays,
            valid_rays,
        }
    }

    /// Average cycles per pixel of the frame.
    pub fn cycles_per_ray(&self) -> f64 {
        if self.num_rays == 0 {
            0.0
        } else {
            self.cycles as f64 / self.num_rays as f64
        }
    }

    /// Average cycles per scheduled pixel.
    pub fn cycles_per_valid_ray(&self) -> f64 {
        if self.valid_rays == 0 {
            0.0
        } else {
            self.cycles as f64 / self.valid_rays as f64
        }
    }

    /// Simulated wall-clock time in seconds.
    pub fn sim_time_s(&self) -> f64 {
        if self.frequency_mhz <= 0.0 {
            return 0.0;
        }
        self.cycles as f64 / (self.frequency_mhz * 1e6)
    }

    /// Frames per second at this frame's resolution.
    pub fn fps(&self) -> f64 {
        let t = self.sim_time_s();
        if t > 0.0 {
            1.0 / t
        } else {
            0.0
        }
    }

    /// Frames per second scaled to a `width × height` frame with the same
    /// time per pixel.
    pub fn equivalent_fps(&self, width: u32, height: u32) -> f64 {
        let t = self.sim_time_s();
        if t <= 0.0 || self.num_rays == 0 {
            return 0.0;
        }
        let per_ray = t / self.num_rays as f64;
        1.0 / (per_ray * width as f64 * height as f64)
    }

    pub fn fps_reference(&self) -> f64 {
        let (w, h) = REFERENCE_RESOLUTION;
        self.equivalent_fps(w, h)
    }

    pub fn fps_full_hd(&self) -> f64 {
        let (w, h) = FULL_HD_RESOLUTION;
        self.equivalent_fps(w, h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(opacity: f32) -> PixelResult {
        PixelResult {
            color: Vector3::new(opacity, 0.0, 0.0),
            opacity,
            depth: 1.0,
        }
    }

    #[test]
    fn test_record_requires_strict_improvement() {
        let mut history = FrameHistory::new(2);
        assert!(history.record(1, result(0.5)));
        assert!(!history.record(1, result(0.5)));
        assert!(!history.record(1, result(0.3)));
        assert!(history.record(1, result(0.9)));
        assert_eq!(history.write_count(1), 2);
        assert_eq!(history.pixel(1).unwrap().opacity, 0.9);
        assert_eq!(history.write_count(0), 0);
    }

    #[test]
    fn test_zero_opacity_never_written() {
        let mut history = FrameHistory::new(1);
        assert!(!history.record(0, result(0.0)));
        assert!(!history.record(5, result(1.0)));
        assert_eq!(history.total_writes(), 0);
    }

    #[test]
    fn test_merge_arena_only_improves() {
        let mut arena = RayArena::new(3, 0.1);
        arena.get_mut(0).unwrap().accumulated_opacity = 0.4;
        arena.get_mut(2).unwrap().accumulated_opacity = 0.2;

        let mut history = FrameHistory::new(3);
        history.record(2, result(0.7));
        assert_eq!(history.merge_arena(&arena), 1);
        assert_eq!(history.pixel(0).unwrap().opacity, 0.4);
        assert_eq!(history.pixel(2).unwrap().opacity, 0.7);
    }

    #[test]
    fn test_throughput_arithmetic() {
        // 1e6 cycles at 100 MHz over a 100x100 frame.
        let report = ThroughputReport::new(100.0, 1_000_000, 10_000, 2_500);
        assert!((report.sim_time_s() - 0.01).abs() < 1e-12);
        assert!((report.fps() - 100.0).abs() < 1e-9);
        assert_eq!(report.cycles_per_ray(), 100.0);
        assert_eq!(report.cycles_per_valid_ray(), 400.0);
        // 64x as many pixels at the reference resolution.
        assert!((report.fps_reference() - 100.0 / 64.0).abs() < 1e-9);
    }

    #[test]
    fn test_throughput_zero_cycles() {
        let report = ThroughputReport::new(100.0, 0, 0, 0);
        assert_eq!(report.fps(), 0.0);
        assert_eq!(report.fps_full_hd(), 0.0);
        assert_eq!(report.cycles_per_ray(), 0.0);
    }
}
