//! Frame outputs: history report, color and depth images, PSNR.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::{GrayImage, Luma, Rgb, RgbImage, RgbaImage};

use crate::pipeline::{FrameResult, PixelResult};

/// `History_<freq>MHz_<scene>.txt`.
pub fn report_file_name(scene: &str, frequency_mhz: f64) -> String {
    format!("History_{}MHz_{}.txt", frequency_mhz, scene)
}

/// Text report of a finished frame.
pub fn history_report(scene: &str, frequency_mhz: f64, result: &FrameResult, psnr: Option<f64>) -> String {
    let t = result.throughput(frequency_mhz);
    let mut report = String::new();

    report.push_str("========== Simulation History ==========\n");
    report.push_str(&format!("Scene: {}\n", scene));
    report.push_str(&format!("Simulation Frequency: {} MHz\n", frequency_mhz));
    report.push_str(&format!("Resolution: {}x{}\n", result.width, result.height));
    report.push_str(&format!("Valid Pixels: {} / {}\n", result.valid_rays, result.num_rays()));
    report.push_str(&format!("Cycle Count: {}\n", result.cycles));
    report.push_str(&format!("Cycle Per Ray: {:.6}\n", t.cycles_per_ray()));
    report.push_str(&format!("Cycle Per Valid Ray: {:.6}\n", t.cycles_per_valid_ray()));
    report.push_str(&format!("Simulation Time: {:.6} s\n", t.sim_time_s()));
    report.push_str(&format!("FPS: {:.6}\n", t.fps()));
    report.push_str(&format!("Equivalent FPS to 800x800: {:.6}\n", t.fps_reference()));
    report.push_str(&format!("Equivalent FPS to 1920x1080: {:.6}\n", t.fps_full_hd()));
    report.push_str(&format!(
        "Saturated Rays: {}, Discarded Samples: {}, Stale Notices: {}\n",
        result.saturated_rays, result.discarded_samples, result.stale_notices
    ));

    report.push_str("\n--- Stages ---\n");
    report.push_str(&format!(
        "{:<20} {:>12} {:>12} {:>12} {:>12} {:>8}\n",
        "stage", "activations", "busy", "stalled", "starved", "util%"
    ));
    for (kind, s) in &result.stage_stats {
        report.push_str(&format!(
            "{:<20} {:>12} {:>12} {:>12} {:>12} {:>8.2}\n",
            kind.name(),
            s.activations,
            s.busy_cycles,
            s.output_stalls,
            s.input_starved,
            s.utilization(result.cycles) * 100.0
        ));
    }

    report.push_str("\n--- Channels ---\n");
    report.push_str(&format!(
        "{:<22} {:>12} {:>6} {:>10} {:>10}\n",
        "channel", "transfers", "peak", "full%", "empty%"
    ));
    for (kind, s) in &result.channel_stats {
        report.push_str(&format!(
            "{:<22} {:>12} {:>6} {:>10.2} {:>10.2}\n",
            kind.name(),
            s.transfers,
            s.peak_len,
            s.full_rate() * 100.0,
            s.empty_rate() * 100.0
        ));
    }

    if let Some(psnr) = psnr {
        report.push_str(&format!("\nPSNR(dB): {:.4}\n", psnr));
    }
    report
}

/// Write the history report into `dir`, returning its path.
pub fn write_history_report(
    dir: &Path,
    scene: &str,
    frequency_mhz: f64,
    result: &FrameResult,
    psnr: Option<f64>,
) -> Result<PathBuf> {
    let path = dir.join(report_file_name(scene, frequency_mhz));
    std::fs::write(&path, history_report(scene, frequency_mhz, result, psnr))
        .with_context(|| format!("Failed to write report {}", path.display()))?;
    log::info!("Wrote report {}", path.display());
    Ok(path)
}

fn to_u8(v: f32) -> u8 {
    if v.is_nan() {
        return 0;
    }
    (255.0 * v.clamp(0.0, 1.0)) as u8
}

/// Image position of ray `id`: column `id / height`, rows bottom-up.
fn pixel_position(id: usize, height: u32) -> (u32, u32) {
    let h = height as usize;
    ((id / h) as u32, height - 1 - (id % h) as u32)
}

fn render<P: image::Pixel<Subpixel = u8>>(
    result: &FrameResult,
    f: impl Fn(&PixelResult) -> P,
) -> image::ImageBuffer<P, Vec<u8>> {
    let mut img = image::ImageBuffer::new(result.width, result.height);
    if result.height == 0 {
        return img;
    }
    for (id, px) in result.pixels.iter().enumerate() {
        let (x, y) = pixel_position(id, result.height);
        if x < result.width {
            img.put_pixel(x, y, f(px));
        }
    }
    img
}

/// Premultiplied color over a black background.
pub fn color_image(result: &FrameResult) -> RgbImage {
    render(result, |px| Rgb([to_u8(px.color.x), to_u8(px.color.y), to_u8(px.color.z)]))
}

/// Accumulated depth scaled by `t_max`.
pub fn depth_image(result: &FrameResult, t_max: f32) -> GrayImage {
    render(result, |px| Luma([to_u8(px.depth / t_max)]))
}

/// Save the color image, and the depth image when `depth_path` is given.
pub fn write_images(result: &FrameResult, color_path: &Path, depth_path: Option<(&Path, f32)>) -> Result<()> {
    color_image(result)
        .save(color_path)
        .with_context(|| format!("Failed to write {}", color_path.display()))?;
    log::info!("Wrote {}", color_path.display());
    if let Some((path, t_max)) = depth_path {
        depth_image(result, t_max)
            .save(path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        log::info!("Wrote {}", path.display());
    }
    Ok(())
}

/// Load a reference RGBA image.
pub fn load_reference(path: &Path) -> Result<RgbaImage> {
    let img = image::open(path).with_context(|| format!("Failed to read reference image {}", path.display()))?;
    Ok(img.to_rgba8())
}

/// Peak signal-to-noise ratio of `rendered` against `reference`, whose color
/// is premultiplied by its alpha first. `None` when the sizes differ.
pub fn psnr(rendered: &RgbImage, reference: &RgbaImage) -> Option<f64> {
    if rendered.dimensions() != reference.dimensions() {
        log::warn!(
            "Reference image is {:?}, rendered image is {:?}; skipping PSNR",
            reference.dimensions(),
            rendered.dimensions()
        );
        return None;
    }
    let mut sum = 0.0f64;
    let mut count = 0usize;
    for (a, b) in rendered.pixels().zip(reference.pixels()) {
        let alpha = b[3] as f64 / 255.0;
        for c in 0..3 {
            let x = a[c] as f64 / 255.0;
            let y = b[c] as f64 / 255.0 * alpha;
            sum += (x - y) * (x - y);
            count += 1;
        }
    }
    if count == 0 {
        return None;
    }
    let mse = sum / count as f64;
    if mse == 0.0 {
        Some(f64::INFINITY)
    } else {
        Some(10.0 * (1.0 / mse).log10())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{ChannelKind, ChannelStats, StageKind, StageStats};
    use image::Rgba;
    use nalgebra::Vector3;

    fn frame(width: u32, height: u32) -> FrameResult {
        let n = (width * height) as usize;
        FrameResult {
            width,
            height,
            cycles: 1000,
            valid_rays: n,
            pixels: vec![PixelResult::default(); n],
            stage_stats: StageKind::ALL.iter().map(|k| (*k, StageStats::default())).collect(),
            channel_stats: ChannelKind::ALL.iter().map(|k| (*k, ChannelStats::default())).collect(),
            saturated_rays: 0,
            discarded_samples: 0,
            stale_notices: 0,
        }
    }

    #[test]
    fn test_report_file_name() {
        assert_eq!(report_file_name("lego", 100.0), "History_100MHz_lego.txt");
        assert_eq!(report_file_name("mic", 250.5), "History_250.5MHz_mic.txt");
    }

    #[test]
    fn test_report_contents() {
        let text = history_report("lego", 100.0, &frame(10, 10), Some(31.5));
        assert!(text.contains("Cycle Count: 1000\n"));
        assert!(text.contains("Cycle Per Ray: 10.000000"));
        assert!(text.contains("Simulation Time: 0.000010 s"));
        assert!(text.contains("color network"));
        assert!(text.contains("composite->march"));
        assert!(text.ends_with("PSNR(dB): 31.5000\n"));
    }

    #[test]
    fn test_pixel_layout() {
        let mut result = frame(2, 2);
        result.pixels[1].color = Vector3::new(1.0, 0.0, 0.0);
        result.pixels[2].color = Vector3::new(0.0, 1.0, 2.0);
        let img = color_image(&result);
        // Ray 1: column 0, bottom-up row 0.
        assert_eq!(img.get_pixel(0, 0), &Rgb([255, 0, 0]));
        // Ray 2: column 1, row 1; values clamp to 255.
        assert_eq!(img.get_pixel(1, 1), &Rgb([0, 255, 255]));
        assert_eq!(img.get_pixel(0, 1), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_depth_scaled_by_t_max() {
        let mut result = frame(1, 1);
        result.pixels[0].depth = 1.5;
        assert_eq!(depth_image(&result, 3.0).get_pixel(0, 0), &Luma([127]));
    }

    #[test]
    fn test_psnr_premultiplies_reference() {
        let rendered = RgbImage::from_pixel(2, 2, Rgb([0, 0, 0]));
        let transparent = RgbaImage::from_pixel(2, 2, Rgba([255, 255, 255, 0]));
        assert_eq!(psnr(&rendered, &transparent), Some(f64::INFINITY));

        let white = RgbaImage::from_pixel(2, 2, Rgba([255, 255, 255, 255]));
        // Every channel off by 1.0: mse = 1, psnr = 0 dB.
        assert!((psnr(&rendered, &white).unwrap()).abs() < 1e-9);

        let wrong_size = RgbaImage::new(3, 2);
        assert_eq!(psnr(&rendered, &wrong_size), None);
    }
}
