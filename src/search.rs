//! # Quality Search Controller
//!
//! Binary search over one pipeline's quality range for the lowest quality
//! whose candidate still meets the perceptual threshold.
//!
//! ## Algorithm
//!
//! Classic integer binary search over `[min, max]`:
//! - encode at the midpoint quality
//! - encode failure counts as "not good enough": search the upper half, so
//!   a transient failure at one quality does not kill the whole search
//! - threshold pass: record the candidate as best-so-far and keep searching
//!   strictly lower
//! - threshold fail: search strictly higher
//! - stop when the bounds cross
//!
//! The recorded candidate is the one with the smallest *passing quality*
//! seen, in O(log range) encode attempts. Quality is assumed to predict
//! both perceptual score and file size monotonically; when an encoder
//! violates that (a rare but real behavior), the result is locally optimal
//! rather than the globally smallest passing candidate. That trade-off is
//! deliberate: an exhaustive scan would turn the O(log n) contract into
//! O(n).
//!
//! Within one search, steps are strictly sequential: each midpoint depends
//! on the previous outcome. Superseded and rejected candidate files are
//! deleted eagerly so at most one artifact per search outlives a step.

use crate::config::QualitySpec;
use crate::encoder::Encoder;
use crate::error::CompressError;
use crate::metrics::{MetricEvaluator, MetricScores, Threshold};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// One encoded artifact produced during search, not yet promoted.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Pipeline identifier ("jpeg", "webp", ...)
    pub pipeline: String,
    /// Quality value the encoder was invoked with
    pub quality: u8,
    /// Artifact location inside the job's temporary directory
    pub path: PathBuf,
    /// Artifact size in bytes
    pub size: u64,
    /// Scores observed when the candidate passed
    pub scores: MetricScores,
}

/// Outcome of one pipeline's quality search.
#[derive(Debug)]
pub enum SearchResult {
    /// The lowest passing quality found in range
    Found(Candidate),
    /// No quality in range produced a passing candidate
    Failed {
        /// Encode attempts spent before giving up
        attempts: u32,
        reason: CompressError,
    },
}

impl SearchResult {
    pub fn candidate(&self) -> Option<&Candidate> {
        match self {
            Self::Found(candidate) => Some(candidate),
            Self::Failed { .. } => None,
        }
    }
}

/// Drives the binary search for one encoder pipeline.
pub struct QualitySearch<'a> {
    encoder: &'a dyn Encoder,
    evaluator: &'a dyn MetricEvaluator,
    threshold: &'a Threshold,
}

impl<'a> QualitySearch<'a> {
    pub fn new(
        encoder: &'a dyn Encoder,
        evaluator: &'a dyn MetricEvaluator,
        threshold: &'a Threshold,
    ) -> Self {
        Self {
            encoder,
            evaluator,
            threshold,
        }
    }

    /// Search `spec` for the lowest passing quality, writing candidate files
    /// into `workdir`.
    pub async fn run(&self, original: &Path, spec: QualitySpec, workdir: &Path) -> SearchResult {
        if spec.min > spec.max {
            return SearchResult::Failed {
                attempts: 0,
                reason: CompressError::SearchExhausted,
            };
        }

        let mut lo = i32::from(spec.min);
        let mut hi = i32::from(spec.max);
        let mut best: Option<Candidate> = None;
        let mut attempts = 0u32;
        let mut evaluated_any = false;
        let mut last_encode_error: Option<CompressError> = None;

        while lo <= hi {
            let mid = ((lo + hi) / 2) as u8;
            let candidate_path = workdir.join(format!(
                "{}_q{}.{}",
                self.encoder.id(),
                mid,
                self.encoder.extension()
            ));
            attempts += 1;

            if let Err(e) = self.encoder.encode(original, &candidate_path, mid).await {
                debug!("{} encode at q{} failed: {}", self.encoder.id(), mid, e);
                last_encode_error = Some(e);
                let _ = tokio::fs::remove_file(&candidate_path).await;
                lo = i32::from(mid) + 1;
                continue;
            }

            // A "successful" encode with a missing or empty output is still
            // a failed attempt.
            let size = match tokio::fs::metadata(&candidate_path).await {
                Ok(meta) if meta.len() > 0 => meta.len(),
                _ => {
                    debug!(
                        "{} produced empty output at q{}, treating as failure",
                        self.encoder.id(),
                        mid
                    );
                    last_encode_error = Some(CompressError::EncodeFailure {
                        tool: self.encoder.id().to_string(),
                        reason: "empty output".to_string(),
                    });
                    let _ = tokio::fs::remove_file(&candidate_path).await;
                    lo = i32::from(mid) + 1;
                    continue;
                }
            };

            let scores = self.evaluator.evaluate(original, &candidate_path).await;
            evaluated_any = true;

            if self.threshold.passes(&scores) {
                trace!(
                    "{} q{} passes ({} bytes), searching lower",
                    self.encoder.id(),
                    mid,
                    size
                );
                if let Some(previous) = best.take() {
                    let _ = tokio::fs::remove_file(&previous.path).await;
                }
                best = Some(Candidate {
                    pipeline: self.encoder.id().to_string(),
                    quality: mid,
                    path: candidate_path,
                    size,
                    scores,
                });
                hi = i32::from(mid) - 1;
            } else {
                trace!("{} q{} fails threshold, searching higher", self.encoder.id(), mid);
                let _ = tokio::fs::remove_file(&candidate_path).await;
                lo = i32::from(mid) + 1;
            }
        }

        match best {
            Some(candidate) => {
                debug!(
                    "{} search done: q{} in {} attempts ({} bytes)",
                    self.encoder.id(),
                    candidate.quality,
                    attempts,
                    candidate.size
                );
                SearchResult::Found(candidate)
            }
            None => {
                let reason = if evaluated_any {
                    CompressError::SearchExhausted
                } else {
                    last_encode_error.unwrap_or(CompressError::SearchExhausted)
                };
                SearchResult::Failed { attempts, reason }
            }
        }
    }
}
