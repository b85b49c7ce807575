//! ngp-sim: cycle-accurate NeRF accelerator simulator

use std::env;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use ngp_sim::config::Config;
use ngp_sim::pipeline::NumericPolicy;
use ngp_sim::testing::{SceneCase, SceneSuite};

const USAGE: &str = "\
Usage: ngp-sim [scene] [frequency_mhz] [max_steps] [options]

Options:
  --resolution N     square image resolution (default 800)
  --frame N          camera frame of transforms_test.json (default 0)
  --no-reentry       single-pass marching, no retirement notices
  --no-valid-skip    schedule every pixel
  --fixed-point      quantize inter-stage payloads
  --depth            also write the depth image
  --reference PATH   reference image for PSNR
  --suite            render all nerf-synthetic scenes
  --print-config     print a sample config file and exit";

/// Command-line settings layered over the tool configuration.
#[derive(Debug, Default)]
struct Args {
    scene: Option<String>,
    frequency_mhz: Option<f64>,
    max_steps: Option<u32>,
    resolution: Option<u32>,
    frame: usize,
    no_reentry: bool,
    no_valid_skip: bool,
    fixed_point: bool,
    depth: bool,
    reference: Option<PathBuf>,
    suite: bool,
    print_config: bool,
    help: bool,
}

fn value<'a>(iter: &mut impl Iterator<Item = &'a String>, flag: &str) -> Result<&'a String> {
    iter.next().with_context(|| format!("{} needs a value", flag))
}

fn parse_args(args: &[String]) -> Result<Args> {
    let mut parsed = Args::default();
    let mut positional = Vec::new();
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--resolution" => {
                let v = value(&mut iter, arg)?;
                parsed.resolution = Some(v.parse().with_context(|| format!("Invalid resolution: {}", v))?);
            }
            "--frame" => {
                let v = value(&mut iter, arg)?;
                parsed.frame = v.parse().with_context(|| format!("Invalid frame: {}", v))?;
            }
            "--reference" => parsed.reference = Some(PathBuf::from(value(&mut iter, arg)?)),
            "--no-reentry" => parsed.no_reentry = true,
            "--no-valid-skip" => parsed.no_valid_skip = true,
            "--fixed-point" => parsed.fixed_point = true,
            "--depth" => parsed.depth = true,
            "--suite" => parsed.suite = true,
            "--print-config" => parsed.print_config = true,
            "--help" | "-h" => parsed.help = true,
            other if other.starts_with('-') => bail!("Unknown option: {}\n\n{}", other, USAGE),
            other => positional.push(other),
        }
    }

    let mut positional = positional.into_iter();
    parsed.scene = positional.next().map(str::to_string);
    if let Some(v) = positional.next() {
        parsed.frequency_mhz = Some(v.parse().with_context(|| format!("Invalid frequency: {}", v))?);
    }
    if let Some(v) = positional.next() {
        parsed.max_steps = Some(v.parse().with_context(|| format!("Invalid max steps: {}", v))?);
    }
    if let Some(extra) = positional.next() {
        bail!("Unexpected argument: {}\n\n{}", extra, USAGE);
    }
    Ok(parsed)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let argv: Vec<String> = env::args().skip(1).collect();
    let args = parse_args(&argv)?;

    if args.help {
        println!("{}", USAGE);
        return Ok(());
    }

    if args.print_config {
        if let Some(path) = Config::user_config_path() {
            println!("# {}", path.display());
        }
        print!("{}", Config::sample_config());
        return Ok(());
    }

    let config = Config::get();
    let mut options = config.engine_options();
    if let Some(max_steps) = args.max_steps {
        options.max_steps = max_steps;
    }
    if args.no_reentry {
        options.reentry = false;
    }
    if args.no_valid_skip {
        options.valid_pixel_skip = false;
    }
    if args.fixed_point {
        options.numeric = NumericPolicy::fixed();
    }

    let mut suite = SceneSuite::new(config.model_config(), options)
        .with_resolution(args.resolution.unwrap_or_else(|| config.resolution()))
        .with_frame(args.frame)
        .with_frequency(args.frequency_mhz.unwrap_or_else(|| config.frequency_mhz()))
        .with_output_dir(config.output_dir(), args.depth);

    if args.suite {
        for name in ngp_sim::testing::NERF_SYNTHETIC_SCENES {
            suite.add_scene(SceneCase::from_config(config, name, args.frame));
        }
    } else {
        let scene = args.scene.as_deref().unwrap_or("lego");
        let mut case = SceneCase::from_config(config, scene, args.frame);
        if args.reference.is_some() {
            case.reference = args.reference.clone();
        }
        suite.add_scene(case);
    }

    let result = suite.run_all();
    print!("{}", suite.summary_report(&result));

    if result.passed != result.total {
        bail!("{} of {} scenes did not complete", result.total - result.passed, result.total);
    }
    Ok(())
}
