//! # Pre-resize Module
//!
//! Optional downscale step before compression. When a maximum dimension is
//! configured and an input exceeds it, the job works from a Lanczos-scaled
//! copy in its temporary directory instead of the original. The copy is
//! saved as PNG so the working reference stays lossless; every candidate is
//! then measured against this reference.

use crate::error::CompressError;
use image::imageops::FilterType;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Return the reference file the pipelines should compress and compare
/// against: the input itself, or a downscaled copy inside `workdir`.
pub async fn prepare_reference(
    input: &Path,
    workdir: &Path,
    max_dimension: Option<u32>,
) -> Result<PathBuf, CompressError> {
    let Some(max_dimension) = max_dimension else {
        return Ok(input.to_path_buf());
    };

    let input = input.to_path_buf();
    let target = workdir.join("reference.png");

    tokio::task::spawn_blocking(move || {
        let (width, height) = image::image_dimensions(&input)?;
        if width.max(height) <= max_dimension {
            return Ok(input);
        }

        debug!(
            "Downscaling {} ({}x{}) to fit {}px",
            input.display(),
            width,
            height,
            max_dimension
        );
        let img = image::open(&input)?;
        let resized = img.resize(max_dimension, max_dimension, FilterType::Lanczos3);
        resized.save(&target)?;
        Ok(target)
    })
    .await
    .map_err(|e| CompressError::Job(format!("resize task panicked: {e}")))?
}
