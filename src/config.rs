//! # Configuration Management Module
//!
//! All tunables for a batch run live here.
//!
//! ## Responsibilities:
//! - Defines the `Config` struct with every compression parameter
//! - Defines `QualitySpec`, the inclusive integer quality range one
//!   pipeline is allowed to search
//! - Validates parameters before any job starts
//! - Supports loading/saving configuration as JSON
//!
//! ## Parameters:
//! - `jpeg_quality` / `webp_quality` / `avif_quality`: searchable quality
//!   ranges per pipeline (defaults: 30-95, 10-100, 10-90)
//! - `target_psnr`: PSNR floor in dB (default: 38.0), always present
//! - `target_ssim`: optional SSIM floor (0.0-1.0)
//! - `target_butteraugli`: optional butteraugli ceiling (lower is better)
//! - `workers`: number of parallel jobs (default: host CPU count)
//! - `process_timeout_secs`: per external process (default: 30)
//! - pipeline toggles (`jpeg`, `webp`, `avif`, `png_lossless`)
//! - `copy_on_failure`: copy the original when no pipeline succeeds
//! - `max_dimension`: optional pre-resize bound before compression

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Inclusive quality range searched for one pipeline.
///
/// The search never evaluates a quality outside `[min, max]`. Construction
/// and `Config::validate` both enforce `min <= max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualitySpec {
    pub min: u8,
    pub max: u8,
}

impl QualitySpec {
    pub fn new(min: u8, max: u8) -> Result<Self> {
        if min > max {
            return Err(anyhow::anyhow!(
                "Quality range lower bound {} exceeds upper bound {}",
                min,
                max
            ));
        }
        Ok(Self { min, max })
    }

    /// Number of quality values in the range.
    pub fn span(&self) -> u32 {
        u32::from(self.max) - u32::from(self.min) + 1
    }
}

/// Configuration for a batch compression run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// JPEG quality search range
    pub jpeg_quality: QualitySpec,
    /// WebP quality search range
    pub webp_quality: QualitySpec,
    /// AVIF quality search range (0-100 scale, mapped to quantizers internally)
    pub avif_quality: QualitySpec,
    /// PSNR floor in dB, used when no stricter metric applies
    pub target_psnr: f64,
    /// Optional SSIM floor (0.0-1.0, higher = more similar)
    pub target_ssim: Option<f64>,
    /// Optional butteraugli ceiling (lower = more similar)
    pub target_butteraugli: Option<f64>,
    /// Number of parallel jobs
    pub workers: usize,
    /// Timeout for each external encoder/metric process, in seconds
    pub process_timeout_secs: u64,
    /// Enable the mozjpeg pipeline
    pub jpeg: bool,
    /// Enable the cwebp pipeline
    pub webp: bool,
    /// Enable the avifenc pipeline
    pub avif: bool,
    /// Enable the oxipng lossless pipeline for PNG inputs
    pub png_lossless: bool,
    /// Oxipng optimization level (0-6)
    pub oxipng_level: u8,
    /// Copy the original file to the output directory when every pipeline fails
    pub copy_on_failure: bool,
    /// Downscale inputs whose longest side exceeds this before compressing
    pub max_dimension: Option<u32>,
    /// Output directory for compressed files
    pub output_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            jpeg_quality: QualitySpec { min: 30, max: 95 },
            webp_quality: QualitySpec { min: 10, max: 100 },
            avif_quality: QualitySpec { min: 10, max: 90 },
            target_psnr: 38.0,
            target_ssim: None,
            target_butteraugli: None,
            workers: Self::default_workers(),
            process_timeout_secs: 30,
            jpeg: true,
            webp: true,
            avif: true,
            png_lossless: true,
            oxipng_level: 4,
            copy_on_failure: true,
            max_dimension: None,
            output_path: PathBuf::from("."),
        }
    }
}

impl Config {
    /// Default worker count: one job per host CPU.
    pub fn default_workers() -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    }

    /// Timeout for one external process.
    pub fn process_timeout(&self) -> Duration {
        Duration::from_secs(self.process_timeout_secs)
    }

    /// Wall-clock budget for one whole job. A job runs several searches of
    /// O(log range) encode attempts each plus metric evaluations, so this is
    /// a generous multiple of the per-process timeout.
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.process_timeout_secs.saturating_mul(40))
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        for (name, spec) in [
            ("jpeg", self.jpeg_quality),
            ("webp", self.webp_quality),
            ("avif", self.avif_quality),
        ] {
            if spec.min > spec.max {
                return Err(anyhow::anyhow!(
                    "{} quality range is empty: {} > {}",
                    name,
                    spec.min,
                    spec.max
                ));
            }
            if spec.max > 100 {
                return Err(anyhow::anyhow!(
                    "{} quality upper bound must be at most 100",
                    name
                ));
            }
        }

        if !self.target_psnr.is_finite() || self.target_psnr <= 0.0 {
            return Err(anyhow::anyhow!("Target PSNR must be a positive number"));
        }

        if let Some(ssim) = self.target_ssim {
            if !(0.0..=1.0).contains(&ssim) {
                return Err(anyhow::anyhow!("Target SSIM must be between 0.0 and 1.0"));
            }
        }

        if let Some(butter) = self.target_butteraugli {
            if !butter.is_finite() || butter <= 0.0 {
                return Err(anyhow::anyhow!(
                    "Target butteraugli must be a positive number"
                ));
            }
        }

        if self.workers == 0 {
            return Err(anyhow::anyhow!("Number of workers must be greater than 0"));
        }

        if self.process_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Process timeout must be greater than 0"));
        }

        if self.oxipng_level > 6 {
            return Err(anyhow::anyhow!("Oxipng level must be between 0 and 6"));
        }

        if !self.jpeg && !self.webp && !self.avif && !self.png_lossless {
            return Err(anyhow::anyhow!("At least one pipeline must be enabled"));
        }

        Ok(())
    }

    /// Load configuration from file
    pub async fn from_file(path: &PathBuf) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path).await?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save_to_file(&self, path: &PathBuf) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }
}
