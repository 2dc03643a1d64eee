//! # Batch Compressor Orchestrator
//!
//! Wires tool resolution, pipeline construction and the bounded worker pool
//! into one entry point for a whole batch.
//!
//! ## Concurrency model
//! A `tokio::sync::Semaphore` bounds the number of in-flight jobs to the
//! configured worker count. Each job runs in its own spawned task with its
//! own temporary directory and its own wall-clock budget; results are
//! collected in dispatch order but jobs complete in any order. A job that
//! fails, times out or panics contributes an error record instead of
//! aborting the batch.

use crate::{
    config::Config,
    encoder::{build_pipelines, Pipeline},
    file_manager,
    metrics::{MetricEvaluator, PerceptualEvaluator, Threshold},
    progress::ProgressManager,
    report::{BatchSummary, JobResult},
    tool_resolver::ToolResolver,
};
use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use super::job_runner::JobRunner;

/// Runs one best-of selection per input file over a bounded worker pool.
pub struct BatchCompressor {
    config: Arc<Config>,
    pipelines: Arc<Vec<Pipeline>>,
    evaluator: Arc<dyn MetricEvaluator>,
}

impl BatchCompressor {
    /// Resolve external tools and build the enabled pipelines. Fails fast,
    /// before any job starts, when nothing usable remains.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let resolver = ToolResolver::new();
        let pipelines = build_pipelines(&config, &resolver)?;

        let butteraugli_bin = if config.target_butteraugli.is_some() {
            let bin = resolver.resolve(&["butteraugli"]);
            if bin.is_none() {
                warn!(
                    "butteraugli target set but binary not found, falling back to ssim/psnr ({})",
                    ToolResolver::install_hint("butteraugli")
                );
            }
            bin
        } else {
            None
        };
        let evaluator = Arc::new(PerceptualEvaluator::new(
            butteraugli_bin,
            config.process_timeout(),
        ));

        Ok(Self::from_parts(config, pipelines, evaluator))
    }

    /// Assemble a compressor from already-built parts.
    pub fn from_parts(
        config: Config,
        pipelines: Vec<Pipeline>,
        evaluator: Arc<dyn MetricEvaluator>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            pipelines: Arc::new(pipelines),
            evaluator,
        }
    }

    /// Compress every supported image under `input_dir`. Returns one result
    /// per discovered file, failures included.
    pub async fn run(&self, input_dir: &Path) -> Result<Vec<JobResult>> {
        let files = file_manager::find_input_images(input_dir)?;
        if files.is_empty() {
            info!("No supported images found in {}", input_dir.display());
            return Ok(Vec::new());
        }

        self.log_configuration(files.len());

        let progress = ProgressManager::new(files.len() as u64);
        let semaphore = Arc::new(Semaphore::new(self.config.workers));
        let job_timeout = self.config.job_timeout();
        let mut tasks = Vec::with_capacity(files.len());

        for file in files {
            let permit = semaphore.clone().acquire_owned().await?;
            let runner = JobRunner::new(
                self.config.clone(),
                self.pipelines.clone(),
                self.evaluator.clone(),
            );
            let progress = progress.clone();
            let task_file = file.clone();

            let task = tokio::spawn(async move {
                let _permit = permit;

                let result = match tokio::time::timeout(job_timeout, runner.process(&task_file))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => {
                        error!(
                            "Job timed out after {:?}: {}",
                            job_timeout,
                            task_file.display()
                        );
                        let original_size = std::fs::metadata(&task_file)
                            .map(|m| m.len())
                            .unwrap_or(0);
                        JobResult::failed(task_file.clone(), original_size, "processing timeout")
                    }
                };

                progress.update(&describe(&result));
                result
            });

            tasks.push((file, task));
        }

        let (task_files, handles): (Vec<PathBuf>, Vec<_>) = tasks.into_iter().unzip();
        let mut results = Vec::with_capacity(task_files.len());
        for (file, joined) in task_files
            .into_iter()
            .zip(futures::future::join_all(handles).await)
        {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => {
                    error!("Job panicked for {}: {}", file.display(), e);
                    results.push(JobResult::failed(file, 0, format!("job panicked: {e}")));
                }
            }
        }

        let summary = BatchSummary::from_results(&results);
        progress.finish(&summary.format_summary());

        Ok(results)
    }

    fn log_configuration(&self, file_count: usize) {
        let pipeline_names: Vec<&str> = self.pipelines.iter().map(|p| p.id()).collect();
        info!(
            "Pipelines: {} | Criterion: {}",
            pipeline_names.join(", "),
            Threshold::from(self.config.as_ref()).describe()
        );
        info!(
            "Workers: {} | Process timeout: {}s",
            self.config.workers, self.config.process_timeout_secs
        );
        if let Some(max) = self.config.max_dimension {
            info!("Pre-resize: longest side capped at {}px", max);
        }
        info!("Found {} images to process", file_count);
    }
}

fn describe(result: &JobResult) -> String {
    let name = result
        .file
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    match (&result.error, &result.method) {
        (Some(error), _) => format!("{name}: {error}"),
        (None, Some(method)) => format!(
            "{name}: {} saved via {method}",
            file_manager::format_size(
                result
                    .original_size
                    .saturating_sub(result.effective_size())
            )
        ),
        (None, None) => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QualitySpec;
    use crate::encoder::Encoder;
    use crate::error::CompressError;
    use crate::metrics::MetricScores;
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    /// Encoder deriving artifact size from the input size; inputs whose
    /// name contains "bad" always fail to encode.
    struct NameAwareEncoder;

    #[async_trait]
    impl Encoder for NameAwareEncoder {
        fn id(&self) -> &str {
            "jpeg"
        }

        fn extension(&self) -> &str {
            "jpg"
        }

        async fn encode(
            &self,
            input: &Path,
            output: &Path,
            _quality: u8,
        ) -> Result<(), CompressError> {
            if input.to_string_lossy().contains("bad") {
                return Err(CompressError::EncodeFailure {
                    tool: "jpeg".to_string(),
                    reason: "simulated".to_string(),
                });
            }
            let len = tokio::fs::metadata(input).await?.len() / 4;
            tokio::fs::write(output, vec![0u8; len as usize])
                .await
                .map_err(CompressError::Io)
        }
    }

    struct AlwaysPass;

    #[async_trait]
    impl MetricEvaluator for AlwaysPass {
        async fn evaluate(&self, _original: &Path, _candidate: &Path) -> MetricScores {
            MetricScores {
                psnr: Some(45.0),
                ..Default::default()
            }
        }
    }

    fn compressor(output_path: PathBuf, workers: usize) -> BatchCompressor {
        let config = Config {
            output_path,
            workers,
            copy_on_failure: true,
            ..Default::default()
        };
        let pipelines = vec![Pipeline {
            encoder: Arc::new(NameAwareEncoder),
            quality: QualitySpec { min: 30, max: 95 },
        }];
        BatchCompressor::from_parts(config, pipelines, Arc::new(AlwaysPass))
    }

    async fn make_inputs(dir: &Path) {
        for (name, size) in [
            ("alpha.jpg", 8_000usize),
            ("bad.jpg", 6_000),
            ("delta.png", 4_000),
            ("gamma.jpg", 12_000),
        ] {
            tokio::fs::write(dir.join(name), vec![7u8; size])
                .await
                .unwrap();
        }
    }

    fn comparable(results: &[JobResult]) -> Vec<(String, u64, Option<u64>, Option<String>)> {
        let mut rows: Vec<_> = results
            .iter()
            .map(|r| {
                (
                    r.file
                        .file_name()
                        .unwrap()
                        .to_string_lossy()
                        .to_string(),
                    r.original_size,
                    r.final_size,
                    r.error.clone(),
                )
            })
            .collect();
        rows.sort();
        rows
    }

    #[tokio::test]
    async fn test_one_result_per_input_with_isolated_failure() {
        let temp = TempDir::new().unwrap();
        let input_dir = temp.path().join("in");
        let output_dir = temp.path().join("out");
        tokio::fs::create_dir_all(&input_dir).await.unwrap();
        make_inputs(&input_dir).await;

        let results = compressor(output_dir.clone(), 4)
            .run(&input_dir)
            .await
            .unwrap();

        assert_eq!(results.len(), 4);
        let failed: Vec<_> = results.iter().filter(|r| r.error.is_some()).collect();
        assert_eq!(failed.len(), 1);
        assert!(failed[0].file.to_string_lossy().contains("bad"));
        // The failing file fell back to a copy; the others compressed.
        assert!(output_dir.join("bad.jpg").exists());
        assert!(output_dir.join("alpha.jpg").exists());
        assert!(output_dir.join("gamma.jpg").exists());
    }

    #[tokio::test]
    async fn test_concurrent_matches_sequential() {
        let temp = TempDir::new().unwrap();
        let input_dir = temp.path().join("in");
        tokio::fs::create_dir_all(&input_dir).await.unwrap();
        make_inputs(&input_dir).await;

        let sequential_out = temp.path().join("out_seq");
        let concurrent_out = temp.path().join("out_par");

        let sequential = compressor(sequential_out, 1)
            .run(&input_dir)
            .await
            .unwrap();
        let concurrent = compressor(concurrent_out, 4)
            .run(&input_dir)
            .await
            .unwrap();

        assert_eq!(comparable(&sequential), comparable(&concurrent));
    }

    #[tokio::test]
    async fn test_empty_input_directory() {
        let temp = TempDir::new().unwrap();
        let input_dir = temp.path().join("in");
        tokio::fs::create_dir_all(&input_dir).await.unwrap();

        let results = compressor(temp.path().join("out"), 2)
            .run(&input_dir)
            .await
            .unwrap();
        assert!(results.is_empty());
    }
}
