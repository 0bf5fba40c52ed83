//! Denoise an image with the manually and the automatically scheduled
//! non-local means pipelines, and compare their run times.
//!
//! Usage:
//!   process <input> <patch_size> <search_area> <sigma> <timing_iterations> <output>
//!
//! Images are JSON files of the form
//! `{"width": W, "height": H, "channels": C, "data": [...]}`.

use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info};
use pixelflow::apps::{ImageFile, NlMeans, ScheduleStyle};
use pixelflow::bench::{benchmark, check_performance, Verdict, MAX_AUTO_SLOWDOWN};
use pixelflow::buffer::Buffer;
use pixelflow::ir::Type;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

/// Runs the denoiser with its two schedules and reports both timings
#[derive(Parser, Debug)]
#[command(name = "process")]
#[command(version)]
struct Cli {
    /// Input image
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Side of the square patches that are compared
    patch_size: i32,

    /// Side of the square area searched around each pixel
    search_area: i32,

    /// Falloff of the patch weights
    sigma: f32,

    /// Number of timing samples per pipeline
    timing_iterations: usize,

    /// Where to write the manually scheduled pipeline's output
    #[arg(value_name = "OUTPUT")]
    output: PathBuf,

    /// Verbose output (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    info!("pixelflow v{}", pixelflow::VERSION);
    debug!("{:?}", cli);

    let image = ImageFile::load(&cli.input).with_context(|| format!("Failed to read input image {:?}", cli.input))?;
    let input = Arc::new(image.to_buffer().context("Input is not a valid image")?);
    println!("Input size: {} {} {}", image.width, image.height, image.channels);

    let manual = NlMeans::new(ScheduleStyle::Manual).context("Failed to build the manual pipeline")?;
    let auto = NlMeans::new(ScheduleStyle::Auto).context("Failed to build the auto-scheduled pipeline")?;

    let extents = [image.width, image.height, 3];
    let mut manual_out = Buffer::new(Type::float(32), &extents);
    let mut auto_out = Buffer::new(Type::float(32), &extents);

    let manual_time = benchmark(cli.timing_iterations, 10, || {
        manual.run(Arc::clone(&input), cli.patch_size, cli.search_area, cli.sigma, &mut manual_out)
    })
    .context("Manually-tuned pipeline failed")?;
    println!("Manually-tuned time: {}ms", manual_time.min_time * 1e3);

    let auto_time = benchmark(cli.timing_iterations, 10, || {
        auto.run(Arc::clone(&input), cli.patch_size, cli.search_area, cli.sigma, &mut auto_out)
    })
    .context("Auto-scheduled pipeline failed")?;
    println!("Auto-scheduled time: {}ms", auto_time.min_time * 1e3);
    debug!("manual: {}; auto: {}", manual_time, auto_time);

    ImageFile::from_buffer(&manual_out)?
        .save(&cli.output)
        .with_context(|| format!("Failed to write output image {:?}", cli.output))?;

    let target = manual.output.target().context("Failed to query the pipeline target")?;
    match check_performance(&target.to_string(), manual_time.min_time, auto_time.min_time) {
        Verdict::Regression { ratio } => {
            eprintln!(
                "Auto-scheduler is much much slower than it should be ({:.2}x the manual time, limit {}x).",
                ratio, MAX_AUTO_SLOWDOWN
            );
            Ok(ExitCode::FAILURE)
        }
        Verdict::SkippedGpu => {
            info!("{} is a GPU target; not checking auto-scheduler performance", target);
            Ok(ExitCode::SUCCESS)
        }
        Verdict::Pass => Ok(ExitCode::SUCCESS),
    }
}
