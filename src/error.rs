//! # Error Types Module
//!
//! Custom error types for the compression engine.
//!
//! ## Categories:
//! - `Io`: filesystem errors (missing files, permissions, etc.)
//! - `Image`: decode errors from the metric adapters
//! - `ToolMissing`: a required external binary could not be resolved
//! - `EncodeFailure`: an external encode invocation returned non-zero or
//!   produced no/empty output
//! - `MetricUnavailable`: a requested perceptual metric could not be computed
//! - `Timeout`: an external process exceeded its allotted time and was killed
//! - `SearchExhausted`: no quality in range satisfied the threshold
//! - `Job`: any other failure while processing one input file
//!
//! Everything except `Job` is recovered locally by the search and selection
//! layers and folded into per-pipeline or per-file outcomes; the batch never
//! aborts because one file misbehaved.

use std::time::Duration;

/// Custom error types for image compression
#[derive(thiserror::Error, Debug)]
pub enum CompressError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image decode error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Required tool not found: {0}")]
    ToolMissing(String),

    #[error("Encode failed ({tool}): {reason}")]
    EncodeFailure { tool: String, reason: String },

    #[error("Metric unavailable: {0}")]
    MetricUnavailable(String),

    #[error("External process timed out after {0:?}")]
    Timeout(Duration),

    #[error("No quality in range met the threshold")]
    SearchExhausted,

    #[error("Job failed: {0}")]
    Job(String),
}

impl CompressError {
    /// Short reason string used in per-pipeline failure notes and reports.
    pub fn brief(&self) -> String {
        match self {
            Self::EncodeFailure { tool, reason } => {
                let line = reason.lines().next().unwrap_or("");
                format!("{tool}: {line}")
            }
            other => other.to_string(),
        }
    }
}
