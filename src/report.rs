//! # Report Module
//!
//! Serializable per-file outcomes and their reduction into batch totals.
//!
//! ## Responsibilities:
//! - `JobResult`: the record produced for every input file, success or not
//! - `BatchSummary`: counts and byte totals reduced from all results
//! - JSON writer (array of `JobResult` objects) and CSV writer with the
//!   fixed column set `file, original_size, final_size, method,
//!   output_file, error`
//!
//! The compression core only exposes these shapes; deciding where report
//! files go (and whether to write them at all) belongs to the caller.

use crate::metrics::MetricScores;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Why one pipeline produced no candidate for a file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineFailure {
    pub pipeline: String,
    pub reason: String,
}

/// Outcome of one job. Exactly one of these exists per input file; failed
/// files are marked, never omitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    /// Input file path
    pub file: PathBuf,
    /// Input size in bytes
    pub original_size: u64,
    /// Size of the file written to the output directory, if any
    pub final_size: Option<u64>,
    /// Winning method, e.g. "webp (q=62)" or "png (lossless)"
    pub method: Option<String>,
    /// Name of the file written to the output directory
    pub output_file: Option<String>,
    /// Scores observed for the winning candidate
    pub metrics: Option<MetricScores>,
    /// Per-pipeline failure notes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pipeline_failures: Vec<PipelineFailure>,
    /// Job-level error, or the reason no pipeline succeeded
    pub error: Option<String>,
}

impl JobResult {
    /// A result for a job that produced nothing.
    pub fn failed(file: PathBuf, original_size: u64, error: impl Into<String>) -> Self {
        Self {
            file,
            original_size,
            final_size: None,
            method: None,
            output_file: None,
            metrics: None,
            pipeline_failures: Vec::new(),
            error: Some(error.into()),
        }
    }

    /// Bytes on disk after the job: the compressed size, the fallback copy
    /// size, or the untouched original.
    pub fn effective_size(&self) -> u64 {
        self.final_size.unwrap_or(self.original_size)
    }
}

/// Batch totals reduced from every job result.
#[derive(Debug, Default, Clone, Serialize)]
pub struct BatchSummary {
    pub files_processed: usize,
    pub files_compressed: usize,
    pub fallback_copies: usize,
    pub errors: usize,
    pub total_original_bytes: u64,
    pub total_final_bytes: u64,
}

impl BatchSummary {
    pub fn from_results(results: &[JobResult]) -> Self {
        let mut summary = Self::default();
        for result in results {
            summary.files_processed += 1;
            summary.total_original_bytes += result.original_size;
            summary.total_final_bytes += result.effective_size();
            match &result.error {
                None => summary.files_compressed += 1,
                Some(_) => {
                    summary.errors += 1;
                    if result.output_file.is_some() {
                        summary.fallback_copies += 1;
                    }
                }
            }
        }
        summary
    }

    pub fn overall_reduction_percent(&self) -> f64 {
        if self.total_original_bytes == 0 {
            0.0
        } else {
            (self.total_original_bytes.saturating_sub(self.total_final_bytes)) as f64
                / self.total_original_bytes as f64
                * 100.0
        }
    }

    pub fn format_summary(&self) -> String {
        format!(
            "Processed: {} files | Compressed: {} | Fallback copies: {} | Errors: {} | Saved: {} ({:.2}%)",
            self.files_processed,
            self.files_compressed,
            self.fallback_copies,
            self.errors,
            crate::file_manager::format_size(
                self.total_original_bytes.saturating_sub(self.total_final_bytes)
            ),
            self.overall_reduction_percent()
        )
    }
}

/// Write all results as a pretty-printed JSON array.
pub fn save_json_report(path: &Path, results: &[JobResult]) -> Result<()> {
    let content = serde_json::to_string_pretty(results)?;
    std::fs::write(path, content)?;
    info!("JSON report saved to {}", path.display());
    Ok(())
}

/// Write all results as CSV with the fixed column set.
pub fn save_csv_report(path: &Path, results: &[JobResult]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;

    writer.write_record([
        "file",
        "original_size",
        "final_size",
        "method",
        "output_file",
        "error",
    ])?;

    for result in results {
        let file = result.file.to_string_lossy();
        let original_size = result.original_size.to_string();
        let final_size = result
            .final_size
            .map(|s| s.to_string())
            .unwrap_or_default();
        writer.write_record([
            file.as_ref(),
            original_size.as_str(),
            final_size.as_str(),
            result.method.as_deref().unwrap_or(""),
            result.output_file.as_deref().unwrap_or(""),
            result.error.as_deref().unwrap_or(""),
        ])?;
    }

    writer.flush()?;
    info!("CSV report saved to {}", path.display());
    Ok(())
}
