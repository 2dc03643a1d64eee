//! # Best-Of Selector
//!
//! Runs the quality search (or a single fixed attempt for lossless
//! pipelines) across every enabled pipeline for one input, then keeps the
//! globally smallest successful artifact.
//!
//! ## Contract
//! - pipelines run in declaration order; ties on size resolve to the
//!   first-declared pipeline
//! - exactly one artifact (the winner's) is promoted to the job's output
//!   path; every other artifact produced during selection is deleted before
//!   returning, success or not
//! - when every pipeline fails, the outcome carries the per-pipeline
//!   reasons and the caller decides the fallback policy

use crate::encoder::Pipeline;
use crate::error::CompressError;
use crate::metrics::{MetricEvaluator, Threshold};
use crate::search::{Candidate, QualitySearch, SearchResult};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Result of a best-of selection for one input file.
#[derive(Debug)]
pub struct SelectionOutcome {
    /// The promoted winner; its `path` points at the final output file.
    pub winner: Option<Candidate>,
    /// Method description for the winner ("webp (q=62)", "png (lossless)")
    pub method: Option<String>,
    /// Per-pipeline failure notes, in pipeline order
    pub failures: Vec<(String, String)>,
}

/// Chooses the smallest passing candidate across pipelines.
pub struct BestOfSelector<'a> {
    pipelines: &'a [Pipeline],
    evaluator: &'a dyn MetricEvaluator,
    threshold: &'a Threshold,
}

impl<'a> BestOfSelector<'a> {
    pub fn new(
        pipelines: &'a [Pipeline],
        evaluator: &'a dyn MetricEvaluator,
        threshold: &'a Threshold,
    ) -> Self {
        Self {
            pipelines,
            evaluator,
            threshold,
        }
    }

    /// Run every applicable pipeline against `original` and promote the
    /// smallest success to `output_dir`, named `stem` plus the winning
    /// pipeline's extension.
    pub async fn select(
        &self,
        original: &Path,
        input_extension: &str,
        workdir: &Path,
        output_dir: &Path,
        stem: &str,
    ) -> Result<SelectionOutcome, CompressError> {
        let mut candidates: Vec<(Candidate, bool)> = Vec::new();
        let mut failures: Vec<(String, String)> = Vec::new();

        for pipeline in self.pipelines {
            if !pipeline.encoder.accepts(input_extension) {
                debug!(
                    "Pipeline {} does not accept .{} input, skipping",
                    pipeline.id(),
                    input_extension
                );
                continue;
            }

            if pipeline.encoder.supports_search() {
                let search =
                    QualitySearch::new(pipeline.encoder.as_ref(), self.evaluator, self.threshold);
                match search.run(original, pipeline.quality, workdir).await {
                    SearchResult::Found(candidate) => candidates.push((candidate, true)),
                    SearchResult::Failed { reason, .. } => {
                        failures.push((pipeline.id().to_string(), reason.brief()));
                    }
                }
            } else {
                match self.fixed_attempt(pipeline, original, workdir).await {
                    Ok(candidate) => candidates.push((candidate, false)),
                    Err(reason) => failures.push((pipeline.id().to_string(), reason.brief())),
                }
            }
        }

        // Smallest size wins; strict comparison keeps the first-declared
        // pipeline on ties.
        let mut winner_index: Option<usize> = None;
        for (index, (candidate, _)) in candidates.iter().enumerate() {
            match winner_index {
                Some(best) if candidates[best].0.size <= candidate.size => {}
                _ => winner_index = Some(index),
            }
        }

        let mut winner = None;
        let mut method = None;
        for (index, (candidate, searched)) in candidates.into_iter().enumerate() {
            if Some(index) == winner_index {
                let final_path = promote(&candidate, output_dir, stem).await?;
                method = Some(if searched {
                    format!("{} (q={})", candidate.pipeline, candidate.quality)
                } else {
                    format!("{} (lossless)", candidate.pipeline)
                });
                info!(
                    "Selected {} for {}: {} bytes",
                    candidate.pipeline,
                    stem,
                    candidate.size
                );
                winner = Some(Candidate {
                    path: final_path,
                    ..candidate
                });
            } else {
                let _ = tokio::fs::remove_file(&candidate.path).await;
            }
        }

        Ok(SelectionOutcome {
            winner,
            method,
            failures,
        })
    }

    /// Single fixed-parameter attempt for pipelines without a quality
    /// search. The threshold is not consulted: these pipelines are
    /// lossless by construction, the attempt only has to produce output.
    async fn fixed_attempt(
        &self,
        pipeline: &Pipeline,
        original: &Path,
        workdir: &Path,
    ) -> Result<Candidate, CompressError> {
        let path = workdir.join(format!(
            "{}_lossless.{}",
            pipeline.id(),
            pipeline.encoder.extension()
        ));
        if let Err(e) = pipeline.encoder.encode(original, &path, 0).await {
            let _ = tokio::fs::remove_file(&path).await;
            return Err(e);
        }

        let size = match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.len() > 0 => meta.len(),
            _ => {
                let _ = tokio::fs::remove_file(&path).await;
                return Err(CompressError::EncodeFailure {
                    tool: pipeline.id().to_string(),
                    reason: "empty output".to_string(),
                });
            }
        };

        let scores = self.evaluator.evaluate(original, &path).await;
        Ok(Candidate {
            pipeline: pipeline.id().to_string(),
            quality: 0,
            path,
            size,
            scores,
        })
    }
}

/// Move the winning artifact to its final location. Rename first, copy and
/// delete when the output directory sits on another filesystem.
async fn promote(
    candidate: &Candidate,
    output_dir: &Path,
    stem: &str,
) -> Result<PathBuf, CompressError> {
    let extension = candidate
        .path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("bin");
    let final_path = output_dir.join(format!("{stem}.{extension}"));

    tokio::fs::create_dir_all(output_dir).await?;
    if tokio::fs::rename(&candidate.path, &final_path).await.is_err() {
        tokio::fs::copy(&candidate.path, &final_path).await?;
        let _ = tokio::fs::remove_file(&candidate.path).await;
    }
    Ok(final_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QualitySpec;
    use crate::encoder::Encoder;
    use crate::metrics::MetricScores;
    use async_trait::async_trait;
    use std::sync::Arc;
    use tempfile::TempDir;

    /// Encoder producing a fixed-size artifact at any quality, optionally
    /// always failing, optionally restricted to one input extension.
    struct FixedSizeEncoder {
        id: &'static str,
        extension: &'static str,
        size: u64,
        fail: bool,
        searchable: bool,
        only_extension: Option<&'static str>,
    }

    impl FixedSizeEncoder {
        fn new(id: &'static str, extension: &'static str, size: u64) -> Self {
            Self {
                id,
                extension,
                size,
                fail: false,
                searchable: true,
                only_extension: None,
            }
        }

        fn broken(id: &'static str, extension: &'static str) -> Self {
            Self {
                id,
                extension,
                size: 0,
                fail: true,
                searchable: true,
                only_extension: None,
            }
        }
    }

    #[async_trait]
    impl Encoder for FixedSizeEncoder {
        fn id(&self) -> &str {
            self.id
        }

        fn extension(&self) -> &str {
            self.extension
        }

        fn supports_search(&self) -> bool {
            self.searchable
        }

        fn accepts(&self, input_extension: &str) -> bool {
            self.only_extension
                .map_or(true, |only| only.eq_ignore_ascii_case(input_extension))
        }

        async fn encode(
            &self,
            _input: &Path,
            output: &Path,
            _quality: u8,
        ) -> Result<(), CompressError> {
            if self.fail {
                return Err(CompressError::EncodeFailure {
                    tool: self.id.to_string(),
                    reason: "simulated".to_string(),
                });
            }
            tokio::fs::write(output, vec![0u8; self.size as usize])
                .await
                .map_err(CompressError::Io)
        }
    }

    struct AlwaysPass;

    #[async_trait]
    impl crate::metrics::MetricEvaluator for AlwaysPass {
        async fn evaluate(&self, _original: &Path, _candidate: &Path) -> MetricScores {
            MetricScores {
                psnr: Some(45.0),
                ..Default::default()
            }
        }
    }

    fn pipeline(encoder: FixedSizeEncoder) -> Pipeline {
        Pipeline {
            encoder: Arc::new(encoder),
            quality: QualitySpec { min: 30, max: 95 },
        }
    }

    fn threshold() -> Threshold {
        Threshold {
            butteraugli: None,
            ssim: None,
            psnr: 38.0,
        }
    }

    async fn setup() -> (TempDir, PathBuf, PathBuf, PathBuf) {
        let temp = TempDir::new().unwrap();
        let workdir = temp.path().join("work");
        let output_dir = temp.path().join("out");
        tokio::fs::create_dir_all(&workdir).await.unwrap();
        tokio::fs::create_dir_all(&output_dir).await.unwrap();
        let original = workdir.join("original.jpg");
        tokio::fs::write(&original, b"reference").await.unwrap();
        (temp, workdir, output_dir, original)
    }

    async fn workdir_artifacts(workdir: &Path) -> usize {
        let mut entries = tokio::fs::read_dir(workdir).await.unwrap();
        let mut count = 0;
        while let Some(entry) = entries.next_entry().await.unwrap() {
            if entry.file_name() != "original.jpg" {
                count += 1;
            }
        }
        count
    }

    #[tokio::test]
    async fn test_smallest_candidate_wins() {
        let (_temp, workdir, output_dir, original) = setup().await;
        let pipelines = vec![
            pipeline(FixedSizeEncoder::new("jpeg", "jpg", 120_000)),
            pipeline(FixedSizeEncoder::new("webp", "webp", 95_000)),
        ];
        let evaluator = AlwaysPass;
        let threshold = threshold();
        let selector = BestOfSelector::new(&pipelines, &evaluator, &threshold);

        let outcome = selector
            .select(&original, "jpg", &workdir, &output_dir, "photo")
            .await
            .unwrap();

        let winner = outcome.winner.unwrap();
        assert_eq!(winner.pipeline, "webp");
        assert_eq!(winner.size, 95_000);
        assert_eq!(winner.path, output_dir.join("photo.webp"));
        assert_eq!(
            tokio::fs::metadata(&winner.path).await.unwrap().len(),
            95_000
        );
        assert!(outcome.failures.is_empty());

        // Losing artifacts are gone from the work directory.
        assert_eq!(workdir_artifacts(&workdir).await, 0);
    }

    #[tokio::test]
    async fn test_tie_goes_to_first_declared() {
        let (_temp, workdir, output_dir, original) = setup().await;
        let pipelines = vec![
            pipeline(FixedSizeEncoder::new("jpeg", "jpg", 80_000)),
            pipeline(FixedSizeEncoder::new("webp", "webp", 80_000)),
        ];
        let evaluator = AlwaysPass;
        let threshold = threshold();
        let selector = BestOfSelector::new(&pipelines, &evaluator, &threshold);

        let outcome = selector
            .select(&original, "jpg", &workdir, &output_dir, "photo")
            .await
            .unwrap();

        assert_eq!(outcome.winner.unwrap().pipeline, "jpeg");
    }

    #[tokio::test]
    async fn test_all_pipelines_fail() {
        let (_temp, workdir, output_dir, original) = setup().await;
        let pipelines = vec![
            pipeline(FixedSizeEncoder::broken("jpeg", "jpg")),
            pipeline(FixedSizeEncoder::broken("webp", "webp")),
        ];
        let evaluator = AlwaysPass;
        let threshold = threshold();
        let selector = BestOfSelector::new(&pipelines, &evaluator, &threshold);

        let outcome = selector
            .select(&original, "jpg", &workdir, &output_dir, "photo")
            .await
            .unwrap();

        assert!(outcome.winner.is_none());
        assert!(outcome.method.is_none());
        assert_eq!(outcome.failures.len(), 2);

        // No stray artifacts and nothing promoted.
        assert_eq!(workdir_artifacts(&workdir).await, 0);
        let mut out_entries = tokio::fs::read_dir(&output_dir).await.unwrap();
        assert!(out_entries.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_inapplicable_pipeline_is_skipped_not_failed() {
        let (_temp, workdir, output_dir, original) = setup().await;
        let mut lossless = FixedSizeEncoder::new("png", "png", 50_000);
        lossless.searchable = false;
        lossless.only_extension = Some("png");
        let pipelines = vec![
            pipeline(FixedSizeEncoder::new("jpeg", "jpg", 90_000)),
            Pipeline {
                encoder: Arc::new(lossless),
                quality: QualitySpec { min: 0, max: 0 },
            },
        ];
        let evaluator = AlwaysPass;
        let threshold = threshold();
        let selector = BestOfSelector::new(&pipelines, &evaluator, &threshold);

        // Input is a jpg: the png-only pipeline neither runs nor fails.
        let outcome = selector
            .select(&original, "jpg", &workdir, &output_dir, "photo")
            .await
            .unwrap();

        assert_eq!(outcome.winner.unwrap().pipeline, "jpeg");
        assert!(outcome.failures.is_empty());
    }

    #[tokio::test]
    async fn test_lossless_fixed_attempt_method_string() {
        let (_temp, workdir, output_dir, original) = setup().await;
        let mut lossless = FixedSizeEncoder::new("png", "png", 40_000);
        lossless.searchable = false;
        lossless.only_extension = Some("jpg"); // accept the test input
        let pipelines = vec![Pipeline {
            encoder: Arc::new(lossless),
            quality: QualitySpec { min: 0, max: 0 },
        }];
        let evaluator = AlwaysPass;
        let threshold = threshold();
        let selector = BestOfSelector::new(&pipelines, &evaluator, &threshold);

        let outcome = selector
            .select(&original, "jpg", &workdir, &output_dir, "photo")
            .await
            .unwrap();

        assert_eq!(outcome.method.as_deref(), Some("png (lossless)"));
    }
}
