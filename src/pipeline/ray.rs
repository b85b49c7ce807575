//! Per-ray lifecycle state.
//!
//! Ray state lives in a [`RayArena`] indexed by ray id (the flattened pixel
//! index). Stages never share a scratch slot across rays: the marcher owns
//! the marching fields (`t`, `step_count`, `active`) and the compositor owns
//! the accumulation fields, each reached through the arena by id.

use nalgebra::Vector3;

/// Stable ray identity: the pixel's flattened index.
pub type RayId = u32;

/// A value travelling through the pipeline, tagged with its ray.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample<T> {
    /// Ray this value belongs to.
    pub ray_id: RayId,
    /// Marching distance at which the sample was taken.
    pub t: f32,
    /// Stage payload.
    pub value: T,
}

impl<T> Sample<T> {
    /// Tag a payload.
    pub fn new(ray_id: RayId, t: f32, value: T) -> Self {
        Self { ray_id, t, value }
    }

    /// Replace the payload, keeping the tag.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Sample<U> {
        Sample {
            ray_id: self.ray_id,
            t: self.t,
            value: f(self.value),
        }
    }
}

/// State of one ray over a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct RayState {
    /// Pixel index.
    pub ray_id: RayId,
    /// Current marching distance. Non-decreasing while active.
    pub t: f32,
    /// Samples emitted so far.
    pub step_count: u32,
    /// Transmittance-weighted color sum.
    pub accumulated_color: Vector3<f32>,
    /// Accumulated opacity in `[0, 1]`, non-decreasing.
    pub accumulated_opacity: f32,
    /// Transmittance-weighted sample distance.
    pub accumulated_depth: f32,
    /// Still needs marching.
    pub active: bool,
    /// Opacity crossed the saturation threshold in the compositor.
    pub saturated: bool,
}

impl RayState {
    /// Fresh ray starting at `t_min`.
    pub fn new(ray_id: RayId, t_min: f32) -> Self {
        Self {
            ray_id,
            t: t_min,
            step_count: 0,
            accumulated_color: Vector3::zeros(),
            accumulated_opacity: 0.0,
            accumulated_depth: 0.0,
            active: true,
            saturated: false,
        }
    }
}

/// Arena of ray states for one frame.
#[derive(Debug, Clone, Default)]
pub struct RayArena {
    rays: Vec<RayState>,
}

impl RayArena {
    /// One ray per pixel, all starting at `t_min`.
    pub fn new(num_rays: usize, t_min: f32) -> Self {
        Self {
            rays: (0..num_rays as RayId).map(|id| RayState::new(id, t_min)).collect(),
        }
    }

    /// Number of rays.
    pub fn len(&self) -> usize {
        self.rays.len()
    }

    /// Whether the arena holds no rays.
    pub fn is_empty(&self) -> bool {
        self.rays.is_empty()
    }

    /// Look up a ray.
    pub fn get(&self, id: RayId) -> Option<&RayState> {
        self.rays.get(id as usize)
    }

    /// Look up a ray mutably.
    pub fn get_mut(&mut self, id: RayId) -> Option<&mut RayState> {
        self.rays.get_mut(id as usize)
    }

    /// Iterate over all rays in id order.
    pub fn iter(&self) -> impl Iterator<Item = &RayState> {
        self.rays.iter()
    }
}
