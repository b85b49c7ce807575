//! Stub collaborators shared by the pipeline tests.

use std::sync::Arc;

use crate::model::{
    Camera, ColorNetwork, DensityNetwork, Features16, Features32, OccupancyGrid,
    PositionalEncoder, Ray, RayGenerator, SceneModels, SphericalHarmonics, Vec3,
};
use crate::pipeline::ray::RayId;

/// Rays travelling along +z. Hits enter the unit cube at `t = 0.1`; ids in
/// `misses` pass beside it.
pub struct StubCamera {
    pub width: u32,
    pub height: u32,
    pub misses: Vec<RayId>,
}

impl RayGenerator for StubCamera {
    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn generate(&self, ray_id: RayId) -> Ray {
        let x = if self.misses.contains(&ray_id) { 2.0 } else { 0.5 };
        Ray::new(Vec3::new(x, 0.5, -0.1), Vec3::new(0.0, 0.0, 1.0))
    }
}

/// Passes the position through in the first three features.
pub struct PassPositional;

impl PositionalEncoder for PassPositional {
    fn encode(&self, position: &Vec3) -> Features32 {
        Features32::from_fn(|i, _| if i < 3 { position[i] } else { 0.0 })
    }

    fn num_params(&self) -> usize {
        0
    }
}

/// Constant raw density in output 0.
pub struct ConstDensity(pub f32);

impl DensityNetwork for ConstDensity {
    fn infer(&self, _features: &Features32) -> Features16 {
        let mut out = Features16::zeros();
        out[0] = self.0;
        out
    }

    fn num_params(&self) -> usize {
        0
    }
}

/// Constant raw rgb.
pub struct ConstColor(pub Vec3);

impl ColorNetwork for ConstColor {
    fn infer(&self, _features: &Features32) -> Vec3 {
        self.0
    }

    fn num_params(&self) -> usize {
        0
    }
}

/// Models around [`StubCamera`] with a constant-density scene.
pub fn stub_models(
    width: u32,
    height: u32,
    misses: Vec<RayId>,
    occupancy: OccupancyGrid,
    raw_density: f32,
) -> SceneModels {
    SceneModels {
        camera: Arc::new(StubCamera {
            width,
            height,
            misses,
        }),
        occupancy: Arc::new(occupancy),
        positional: Arc::new(PassPositional),
        directional: Arc::new(SphericalHarmonics::new(4)),
        density: Arc::new(ConstDensity(raw_density)),
        color: Arc::new(ConstColor(Vec3::new(0.0, 2.0, -2.0))),
    }
}

/// Occupancy grid with a single occupied z-slab `[z0, z1)` in cells.
pub fn slab_occupancy(resolution: u32, z0: u32, z1: u32) -> OccupancyGrid {
    let mut grid = OccupancyGrid::new(resolution);
    for x in 0..resolution {
        for y in 0..resolution {
            for z in z0..z1 {
                grid.set(x, y, z, true);
            }
        }
    }
    grid
}

/// A real camera looking down the -z axis of the nerf frame from distance 4.
pub fn front_camera(width: u32, height: u32) -> Camera {
    let json = r#"{
        "camera_angle_x": 0.6911112070083618,
        "frames": [ { "transform_matrix": [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 4.0],
            [0.0, 0.0, 0.0, 1.0]
        ] } ]
    }"#;
    match Camera::from_transforms_json(json, width, height, 0) {
        Ok(camera) => camera,
        Err(e) => panic!("test camera: {e}"),
    }
}
