//! # Perceptual Image Compressor - Main Entry Point
//!
//! ## Responsibilities:
//! - Command line parsing with `clap`
//! - Logging initialization with `tracing`
//! - Input validation, configuration assembly and batch start
//! - Writing the JSON/CSV reports after the batch completes
//!
//! ## Execution flow:
//! 1. Parse CLI arguments (directories, quality range, thresholds, workers)
//! 2. Configure logging (INFO, or DEBUG with --verbose)
//! 3. Validate the input directory and create the output directory
//! 4. Build a Config and start the BatchCompressor
//! 5. Write reports and log the final summary
//!
//! ## Example:
//! ```bash
//! image-compressor /photos -o /compressed --target-psnr 40 --workers 8
//! ```

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};

use perceptual_image_compressor::{
    config::QualitySpec, report, BatchCompressor, BatchSummary, Config,
};

#[derive(Parser)]
#[command(name = "image-compressor")]
#[command(about = "Compress images to the smallest encoding that still looks right")]
struct Args {
    /// Directory containing images to compress
    input_directory: PathBuf,

    /// Output directory for compressed files
    #[arg(short, long)]
    output: PathBuf,

    /// Lowest quality the search may try
    #[arg(long, default_value = "30")]
    min_quality: u8,

    /// Highest quality the search may try
    #[arg(long, default_value = "95")]
    max_quality: u8,

    /// PSNR floor in dB, the default pass criterion
    #[arg(long, default_value = "38.0")]
    target_psnr: f64,

    /// Optional SSIM floor (0.0-1.0); takes precedence over PSNR
    #[arg(long)]
    target_ssim: Option<f64>,

    /// Optional butteraugli ceiling; takes precedence over SSIM and PSNR
    #[arg(long)]
    target_butteraugli: Option<f64>,

    /// Number of parallel jobs
    #[arg(short, long, default_value_t = Config::default_workers())]
    workers: usize,

    /// Timeout per external encoder/metric process, in seconds
    #[arg(long, default_value = "30")]
    timeout: u64,

    /// Disable the mozjpeg pipeline
    #[arg(long)]
    no_jpeg: bool,

    /// Disable the cwebp pipeline
    #[arg(long)]
    no_webp: bool,

    /// Disable the avifenc pipeline
    #[arg(long)]
    no_avif: bool,

    /// Disable the oxipng lossless pipeline for PNG inputs
    #[arg(long)]
    no_png_lossless: bool,

    /// Do not copy the original into the output directory when every
    /// pipeline fails
    #[arg(long)]
    no_fallback_copy: bool,

    /// Downscale inputs whose longest side exceeds this many pixels
    #[arg(long)]
    max_dimension: Option<u32>,

    /// Path to save a JSON report
    #[arg(long)]
    report_json: Option<PathBuf>,

    /// Path to save a CSV report
    #[arg(long)]
    report_csv: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(if args.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    // Validate arguments
    if !args.input_directory.exists() {
        return Err(anyhow::anyhow!(
            "Input directory does not exist: {}",
            args.input_directory.display()
        ));
    }

    if !args.output.exists() {
        std::fs::create_dir_all(&args.output)?;
        info!("Created output directory: {}", args.output.display());
    }
    if !args.output.is_dir() {
        return Err(anyhow::anyhow!(
            "Output path is not a directory: {}",
            args.output.display()
        ));
    }

    let defaults = Config::default();
    let config = Config {
        jpeg_quality: QualitySpec::new(args.min_quality, args.max_quality)?,
        target_psnr: args.target_psnr,
        target_ssim: args.target_ssim,
        target_butteraugli: args.target_butteraugli,
        workers: args.workers,
        process_timeout_secs: args.timeout,
        jpeg: !args.no_jpeg,
        webp: !args.no_webp,
        avif: !args.no_avif,
        png_lossless: !args.no_png_lossless,
        copy_on_failure: !args.no_fallback_copy,
        max_dimension: args.max_dimension,
        output_path: args.output,
        ..defaults
    };

    let compressor = BatchCompressor::new(config)?;
    let results = compressor.run(&args.input_directory).await?;

    if let Some(ref path) = args.report_json {
        if let Err(e) = report::save_json_report(path, &results) {
            warn!("Failed to save JSON report: {}", e);
        }
    }
    if let Some(ref path) = args.report_csv {
        if let Err(e) = report::save_csv_report(path, &results) {
            warn!("Failed to save CSV report: {}", e);
        }
    }

    let summary = BatchSummary::from_results(&results);
    info!("{}", summary.format_summary());

    Ok(())
}
