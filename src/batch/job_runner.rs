//! # Job Runner Module
//!
//! Worker for one input file: creates the job-scoped temporary directory,
//! prepares the working reference, runs the best-of selection and applies
//! the fallback policy. Any error escaping these steps is folded into the
//! job's result instead of propagating.

use crate::{
    config::Config,
    encoder::Pipeline,
    error::CompressError,
    metrics::{MetricEvaluator, Threshold},
    report::{JobResult, PipelineFailure},
    resize,
    selector::BestOfSelector,
};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Processes a single input file in isolation.
pub struct JobRunner {
    config: Arc<Config>,
    pipelines: Arc<Vec<Pipeline>>,
    evaluator: Arc<dyn MetricEvaluator>,
    threshold: Threshold,
}

impl JobRunner {
    pub fn new(
        config: Arc<Config>,
        pipelines: Arc<Vec<Pipeline>>,
        evaluator: Arc<dyn MetricEvaluator>,
    ) -> Self {
        let threshold = Threshold::from(config.as_ref());
        Self {
            config,
            pipelines,
            evaluator,
            threshold,
        }
    }

    /// Process one file. Never returns an error: failures become the
    /// result's error field so the batch always gets one record per input.
    pub async fn process(&self, input: &Path) -> JobResult {
        match self.process_inner(input).await {
            Ok(result) => result,
            Err(e) => {
                warn!("Job failed for {}: {}", input.display(), e);
                let original_size = std::fs::metadata(input).map(|m| m.len()).unwrap_or(0);
                JobResult::failed(input.to_path_buf(), original_size, e.to_string())
            }
        }
    }

    async fn process_inner(&self, input: &Path) -> Result<JobResult, CompressError> {
        let original_size = tokio::fs::metadata(input).await?.len();

        // Job-scoped temporary directory; removal on drop is best-effort.
        let workdir = tempfile::Builder::new()
            .prefix("imgjob_")
            .tempdir()
            .map_err(CompressError::Io)?;

        let reference =
            resize::prepare_reference(input, workdir.path(), self.config.max_dimension).await?;

        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "output".to_string());
        let input_extension = input
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        let selector =
            BestOfSelector::new(&self.pipelines, self.evaluator.as_ref(), &self.threshold);
        let outcome = selector
            .select(
                &reference,
                &input_extension,
                workdir.path(),
                &self.config.output_path,
                &stem,
            )
            .await?;

        let pipeline_failures = outcome
            .failures
            .into_iter()
            .map(|(pipeline, reason)| PipelineFailure { pipeline, reason })
            .collect();

        match outcome.winner {
            Some(candidate) => {
                debug!(
                    "{} -> {} ({} bytes, {})",
                    input.display(),
                    candidate.path.display(),
                    candidate.size,
                    outcome.method.as_deref().unwrap_or("?")
                );
                Ok(JobResult {
                    file: input.to_path_buf(),
                    original_size,
                    final_size: Some(candidate.size),
                    method: outcome.method,
                    output_file: file_name(&candidate.path),
                    metrics: Some(candidate.scores),
                    pipeline_failures,
                    error: None,
                })
            }
            None => self
                .handle_total_failure(input, original_size, pipeline_failures)
                .await,
        }
    }

    /// Every pipeline failed: either copy the original through unchanged or
    /// record the failure with no output, depending on the fallback policy.
    async fn handle_total_failure(
        &self,
        input: &Path,
        original_size: u64,
        pipeline_failures: Vec<PipelineFailure>,
    ) -> Result<JobResult, CompressError> {
        let error = "no pipeline met thresholds".to_string();

        if !self.config.copy_on_failure {
            return Ok(JobResult {
                pipeline_failures,
                ..JobResult::failed(input.to_path_buf(), original_size, error)
            });
        }

        let fallback_name = input
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "output".to_string());
        let fallback_path = self.config.output_path.join(&fallback_name);

        tokio::fs::create_dir_all(&self.config.output_path).await?;
        tokio::fs::copy(input, &fallback_path).await?;
        debug!(
            "Copied original to {} after total failure",
            fallback_path.display()
        );

        Ok(JobResult {
            file: input.to_path_buf(),
            original_size,
            final_size: Some(original_size),
            method: None,
            output_file: Some(fallback_name),
            metrics: None,
            pipeline_failures,
            error: Some(error),
        })
    }
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().to_string())
}
