//! Pinhole camera built from a nerf-synthetic `transforms_*.json`.
//!
//! Poses are converted from the NeRF convention into the NGP unit cube:
//! scaled by 0.33, offset to the cube centre, with the axes cycled and the
//! camera y/z axes flipped.

use std::path::Path;

use anyhow::{bail, Context, Result};
use nalgebra::{Matrix3, Matrix4};
use serde::Deserialize;

use super::{RayGenerator, Vec3};
use crate::pipeline::ray::RayId;

/// Pose scale applied when mapping a NeRF scene into the unit cube.
pub const NGP_SCALE: f32 = 0.33;

/// Cube centre the scene is moved to.
pub const NGP_OFFSET: f32 = 0.5;

/// A ray `origin + t · direction` with unit direction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
}

impl Ray {
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self { origin, direction }
    }

    /// Point at distance `t`.
    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }
}

#[derive(Debug, Deserialize)]
struct TransformsFile {
    camera_angle_x: f32,
    frames: Vec<FrameEntry>,
}

#[derive(Debug, Deserialize)]
struct FrameEntry {
    transform_matrix: Vec<Vec<f32>>,
}

/// Convert a NeRF camera-to-world matrix (3×4 used) into NGP space.
#[rustfmt::skip]
pub fn nerf_matrix_to_ngp(pose: &Matrix4<f32>) -> Matrix4<f32> {
    let row = |src: usize, offset: f32| {
        [
            pose[(src, 0)],
            -pose[(src, 1)],
            -pose[(src, 2)],
            pose[(src, 3)] * NGP_SCALE + offset,
        ]
    };
    let (r0, r1, r2) = (row(1, NGP_OFFSET), row(2, NGP_OFFSET), row(0, NGP_OFFSET));
    Matrix4::new(
        r0[0], r0[1], r0[2], r0[3],
        r1[0], r1[1], r1[2], r1[3],
        r2[0], r2[1], r2[2], r2[3],
        0.0, 0.0, 0.0, 1.0,
    )
}

/// Camera at a fixed pose rendering a `width × height` image.
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    width: u32,
    height: u32,
    position: Vec3,
    camera_to_world: Matrix3<f32>,
    focal_length: f32,
}

impl Camera {
    /// Camera from an NGP-space pose.
    pub fn new(width: u32, height: u32, camera_angle_x: f32, ngp_pose: &Matrix4<f32>) -> Self {
        let focal_length = 0.5 * width as f32 / (0.5 * camera_angle_x).tan();
        Self {
            width,
            height,
            position: Vec3::new(ngp_pose[(0, 3)], ngp_pose[(1, 3)], ngp_pose[(2, 3)]),
            camera_to_world: ngp_pose.fixed_view::<3, 3>(0, 0).into_owned(),
            focal_length,
        }
    }

    /// Parse a transforms document and take frame `frame`.
    pub fn from_transforms_json(text: &str, width: u32, height: u32, frame: usize) -> Result<Self> {
        let doc: TransformsFile = serde_json::from_str(text).context("Invalid transforms JSON")?;
        let entry = match doc.frames.get(frame) {
            Some(e) => e,
            None => bail!("frame {} out of range ({} frames)", frame, doc.frames.len()),
        };
        let m = &entry.transform_matrix;
        if m.len() < 3 || m.iter().take(3).any(|r| r.len() < 4) {
            bail!("transform_matrix of frame {} must be at least 3x4", frame);
        }
        let pose = Matrix4::from_fn(|r, c| if r < 3 { m[r][c] } else if c == 3 { 1.0 } else { 0.0 });
        Ok(Self::new(width, height, doc.camera_angle_x, &nerf_matrix_to_ngp(&pose)))
    }

    /// Load `transforms_test.json` style file.
    pub fn from_file<P: AsRef<Path>>(path: P, width: u32, height: u32, frame: usize) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read camera transforms {}", path.display()))?;
        let camera = Self::from_transforms_json(&text, width, height, frame)
            .with_context(|| format!("Failed to parse camera transforms {}", path.display()))?;
        log::info!("Camera loaded from {} (frame {})", path.display(), frame);
        Ok(camera)
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn focal_length(&self) -> f32 {
        self.focal_length
    }

    /// Ray through pixel column `dx`, row `dy`.
    pub fn ray_through(&self, dx: f32, dy: f32) -> Ray {
        let h = self.height as f32;
        let w = self.width as f32;
        let local = Vec3::new(
            ((dx + 0.5) / h - 0.5) * h / self.focal_length,
            ((dy + 0.5) / w - 0.5) * w / self.focal_length,
            1.0,
        );
        let dir = (self.camera_to_world * local).normalize();
        Ray::new(self.position, dir)
    }
}

impl RayGenerator for Camera {
    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn generate(&self, ray_id: RayId) -> Ray {
        let dx = (ray_id / self.height) as f32;
        let dy = (ray_id % self.height) as f32;
        self.ray_through(dx, dy)
    }
}
