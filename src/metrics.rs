//! # Perceptual Metric Adapters
//!
//! The search engine never computes a metric itself; it consumes scores
//! through the `MetricEvaluator` capability interface defined here.
//!
//! ## Responsibilities:
//! - `MetricScores`: the (possibly partial) set of scores for one candidate
//! - `Threshold`: the pass/fail decision with its documented priority order
//! - `MetricEvaluator`: capability trait the search controller depends on
//! - `PerceptualEvaluator`: concrete adapter computing PSNR and SSIM from
//!   decoded pixels and delegating butteraugli to an external binary
//!
//! A metric that cannot be computed (undecodable candidate format, missing
//! butteraugli binary, dimension mismatch) is reported as `None`, never as
//! an error: the threshold logic falls through its priority order instead
//! of failing the search.

use crate::error::CompressError;
use async_trait::async_trait;
use image::{GrayImage, RgbImage};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tracing::{debug, warn};

/// Perceptual similarity scores for one candidate against its original.
///
/// Any field may be `None` when that metric was unavailable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricScores {
    /// Peak Signal-to-Noise Ratio in dB (higher = more similar)
    pub psnr: Option<f64>,
    /// Structural similarity in [0, 1] (higher = more similar)
    pub ssim: Option<f64>,
    /// Butteraugli distance (lower = more similar)
    pub butteraugli: Option<f64>,
}

/// Pass/fail decision for one candidate.
///
/// Exactly one metric is authoritative per evaluation, chosen by a fixed
/// priority order:
///
/// 1. butteraugli ceiling, when configured and the score is available
/// 2. SSIM floor, when configured and the score is available
/// 3. PSNR floor (always configured; the default criterion)
///
/// A configured metric whose score is missing falls through to the next
/// entry. A candidate with no usable score at all fails.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Threshold {
    /// Distance ceiling: pass when `butteraugli <= target`
    pub butteraugli: Option<f64>,
    /// Similarity floor: pass when `ssim >= target`
    pub ssim: Option<f64>,
    /// Similarity floor: pass when `psnr >= target`
    pub psnr: f64,
}

impl Threshold {
    pub fn passes(&self, scores: &MetricScores) -> bool {
        if let (Some(target), Some(score)) = (self.butteraugli, scores.butteraugli) {
            return score <= target;
        }
        if let (Some(target), Some(score)) = (self.ssim, scores.ssim) {
            return score >= target;
        }
        match scores.psnr {
            Some(psnr) => psnr >= self.psnr,
            None => false,
        }
    }

    /// Human-readable criterion, for logging and method strings.
    pub fn describe(&self) -> String {
        if let Some(b) = self.butteraugli {
            format!("butteraugli <= {b}")
        } else if let Some(s) = self.ssim {
            format!("ssim >= {s}")
        } else {
            format!("psnr >= {}", self.psnr)
        }
    }
}

impl From<&crate::config::Config> for Threshold {
    fn from(config: &crate::config::Config) -> Self {
        Self {
            butteraugli: config.target_butteraugli,
            ssim: config.target_ssim,
            psnr: config.target_psnr,
        }
    }
}

/// Capability interface for perceptual similarity scoring.
///
/// Implementations must be pure with respect to their two inputs and safe to
/// call concurrently for different candidates.
#[async_trait]
pub trait MetricEvaluator: Send + Sync {
    async fn evaluate(&self, original: &Path, candidate: &Path) -> MetricScores;
}

/// Default evaluator: in-process PSNR and SSIM over decoded pixels, plus an
/// optional external `butteraugli` binary for the distance score.
pub struct PerceptualEvaluator {
    butteraugli_bin: Option<PathBuf>,
    timeout: Duration,
}

impl PerceptualEvaluator {
    pub fn new(butteraugli_bin: Option<PathBuf>, timeout: Duration) -> Self {
        Self {
            butteraugli_bin,
            timeout,
        }
    }

    /// Decode both files and compute the pixel metrics on a blocking thread.
    async fn pixel_scores(
        &self,
        original: &Path,
        candidate: &Path,
    ) -> Result<(Option<f64>, Option<f64>), CompressError> {
        let original = original.to_path_buf();
        let candidate = candidate.to_path_buf();

        tokio::task::spawn_blocking(move || {
            let orig = image::open(&original)?;
            let cand = image::open(&candidate)?;
            let psnr = mse_psnr(&orig.to_rgb8(), &cand.to_rgb8());
            let ssim = block_ssim(&orig.to_luma8(), &cand.to_luma8());
            Ok((psnr, ssim))
        })
        .await
        .map_err(|e| CompressError::Job(format!("metric task panicked: {e}")))?
    }

    /// Run the butteraugli binary and parse the distance from its stdout.
    async fn butteraugli_score(
        &self,
        bin: &Path,
        original: &Path,
        candidate: &Path,
    ) -> Result<f64, CompressError> {
        let mut command = tokio::process::Command::new(bin);
        command
            .arg(original)
            .arg(candidate)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command.spawn()?;
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| CompressError::Timeout(self.timeout))??;

        if !output.status.success() {
            return Err(CompressError::MetricUnavailable(format!(
                "butteraugli exited with {}",
                output.status
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout
            .split_whitespace()
            .find_map(|token| token.parse::<f64>().ok())
            .ok_or_else(|| {
                CompressError::MetricUnavailable(format!(
                    "butteraugli produced no score: {}",
                    stdout.trim()
                ))
            })
    }
}

#[async_trait]
impl MetricEvaluator for PerceptualEvaluator {
    async fn evaluate(&self, original: &Path, candidate: &Path) -> MetricScores {
        let (psnr, ssim) = match self.pixel_scores(original, candidate).await {
            Ok(scores) => scores,
            Err(e) => {
                debug!(
                    "Pixel metrics unavailable for {}: {}",
                    candidate.display(),
                    e
                );
                (None, None)
            }
        };

        let butteraugli = match &self.butteraugli_bin {
            Some(bin) => match self.butteraugli_score(bin, original, candidate).await {
                Ok(score) => Some(score),
                Err(e) => {
                    warn!(
                        "Butteraugli unavailable for {}: {}",
                        candidate.display(),
                        e
                    );
                    None
                }
            },
            None => None,
        };

        MetricScores {
            psnr,
            ssim,
            butteraugli,
        }
    }
}

/// PSNR from per-channel mean squared error. `None` on dimension mismatch,
/// infinite for identical images.
fn mse_psnr(original: &RgbImage, candidate: &RgbImage) -> Option<f64> {
    if original.dimensions() != candidate.dimensions() {
        return None;
    }
    let (width, height) = original.dimensions();
    if width == 0 || height == 0 {
        return None;
    }

    let mut sum = 0.0f64;
    for (a, b) in original.as_raw().iter().zip(candidate.as_raw().iter()) {
        let diff = f64::from(*a) - f64::from(*b);
        sum += diff * diff;
    }
    let mse = sum / original.as_raw().len() as f64;

    if mse == 0.0 {
        Some(f64::INFINITY)
    } else {
        Some(20.0 * (255.0 / mse.sqrt()).log10())
    }
}

/// Mean SSIM over non-overlapping 8x8 luma windows (whole image when
/// smaller). `None` on dimension mismatch or empty images.
fn block_ssim(original: &GrayImage, candidate: &GrayImage) -> Option<f64> {
    const C1: f64 = 6.5025; // (0.01 * 255)^2
    const C2: f64 = 58.5225; // (0.03 * 255)^2
    const WINDOW: u32 = 8;

    if original.dimensions() != candidate.dimensions() {
        return None;
    }
    let (width, height) = original.dimensions();
    if width == 0 || height == 0 {
        return None;
    }

    let win_w = WINDOW.min(width);
    let win_h = WINDOW.min(height);

    let mut total = 0.0f64;
    let mut windows = 0u64;

    let mut y = 0;
    while y + win_h <= height {
        let mut x = 0;
        while x + win_w <= width {
            let n = f64::from(win_w * win_h);
            let (mut sum_a, mut sum_b) = (0.0f64, 0.0f64);
            let (mut sum_aa, mut sum_bb, mut sum_ab) = (0.0f64, 0.0f64, 0.0f64);

            for dy in 0..win_h {
                for dx in 0..win_w {
                    let a = f64::from(original.get_pixel(x + dx, y + dy)[0]);
                    let b = f64::from(candidate.get_pixel(x + dx, y + dy)[0]);
                    sum_a += a;
                    sum_b += b;
                    sum_aa += a * a;
                    sum_bb += b * b;
                    sum_ab += a * b;
                }
            }

            let mean_a = sum_a / n;
            let mean_b = sum_b / n;
            let var_a = sum_aa / n - mean_a * mean_a;
            let var_b = sum_bb / n - mean_b * mean_b;
            let cov = sum_ab / n - mean_a * mean_b;

            let numerator = (2.0 * mean_a * mean_b + C1) * (2.0 * cov + C2);
            let denominator = (mean_a * mean_a + mean_b * mean_b + C1) * (var_a + var_b + C2);
            total += numerator / denominator;
            windows += 1;

            x += win_w;
        }
        y += win_h;
    }

    if windows == 0 {
        return None;
    }
    Some(total / windows as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn gradient_image(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
        })
    }

    #[test]
    fn test_psnr_identical_is_infinite() {
        let img = gradient_image(32, 32);
        assert_eq!(mse_psnr(&img, &img), Some(f64::INFINITY));
    }

    #[test]
    fn test_psnr_degrades_with_noise() {
        let img = gradient_image(32, 32);
        let mut slightly_off = img.clone();
        let mut very_off = img.clone();
        for pixel in slightly_off.pixels_mut() {
            pixel[0] = pixel[0].saturating_add(2);
        }
        for pixel in very_off.pixels_mut() {
            pixel[0] = pixel[0].saturating_add(60);
        }

        let near = mse_psnr(&img, &slightly_off).unwrap();
        let far = mse_psnr(&img, &very_off).unwrap();
        assert!(near > far);
        assert!(near > 38.0);
        assert!(far < 20.0);
    }

    #[test]
    fn test_psnr_dimension_mismatch() {
        let a = gradient_image(32, 32);
        let b = gradient_image(16, 16);
        assert_eq!(mse_psnr(&a, &b), None);
    }

    #[test]
    fn test_ssim_identical_is_one() {
        let img = gradient_image(32, 32);
        let gray = image::DynamicImage::ImageRgb8(img).to_luma8();
        let score = block_ssim(&gray, &gray).unwrap();
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_ssim_small_image_uses_single_window() {
        let img = GrayImage::from_pixel(4, 4, image::Luma([128]));
        let score = block_ssim(&img, &img).unwrap();
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_threshold_priority_butteraugli_first() {
        let threshold = Threshold {
            butteraugli: Some(1.0),
            ssim: Some(0.9),
            psnr: 38.0,
        };
        // Butteraugli is authoritative even though ssim and psnr would pass.
        let scores = MetricScores {
            psnr: Some(50.0),
            ssim: Some(0.99),
            butteraugli: Some(3.0),
        };
        assert!(!threshold.passes(&scores));

        let scores = MetricScores {
            psnr: Some(10.0),
            ssim: Some(0.1),
            butteraugli: Some(0.5),
        };
        assert!(threshold.passes(&scores));
    }

    #[test]
    fn test_threshold_falls_through_missing_metrics() {
        let threshold = Threshold {
            butteraugli: Some(1.0),
            ssim: Some(0.9),
            psnr: 38.0,
        };

        // No butteraugli score: ssim becomes authoritative.
        let scores = MetricScores {
            psnr: Some(10.0),
            ssim: Some(0.95),
            butteraugli: None,
        };
        assert!(threshold.passes(&scores));

        // Neither butteraugli nor ssim: psnr decides.
        let scores = MetricScores {
            psnr: Some(39.0),
            ssim: None,
            butteraugli: None,
        };
        assert!(threshold.passes(&scores));

        // Nothing usable at all fails.
        assert!(!threshold.passes(&MetricScores::default()));
    }

    #[test]
    fn test_threshold_psnr_default() {
        let threshold = Threshold {
            butteraugli: None,
            ssim: None,
            psnr: 38.0,
        };
        assert!(threshold.passes(&MetricScores {
            psnr: Some(38.0),
            ..Default::default()
        }));
        assert!(!threshold.passes(&MetricScores {
            psnr: Some(37.9),
            ..Default::default()
        }));
    }

    #[tokio::test]
    async fn test_evaluator_scores_real_files() {
        let temp_dir = TempDir::new().unwrap();
        let original = temp_dir.path().join("original.png");
        let candidate = temp_dir.path().join("candidate.png");

        let img = gradient_image(32, 32);
        img.save(&original).unwrap();
        img.save(&candidate).unwrap();

        let evaluator = PerceptualEvaluator::new(None, Duration::from_secs(5));
        let scores = evaluator.evaluate(&original, &candidate).await;

        assert_eq!(scores.psnr, Some(f64::INFINITY));
        assert!(scores.ssim.unwrap() > 0.999);
        assert!(scores.butteraugli.is_none());
    }

    #[tokio::test]
    async fn test_evaluator_undecodable_candidate_is_unavailable() {
        let temp_dir = TempDir::new().unwrap();
        let original = temp_dir.path().join("original.png");
        let candidate = temp_dir.path().join("candidate.png");

        gradient_image(16, 16).save(&original).unwrap();
        tokio::fs::write(&candidate, b"not an image").await.unwrap();

        let evaluator = PerceptualEvaluator::new(None, Duration::from_secs(5));
        let scores = evaluator.evaluate(&original, &candidate).await;
        assert_eq!(scores, MetricScores::default());
    }
}
