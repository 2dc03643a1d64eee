//! # Encoder Adapters
//!
//! Uniform interface over the external encoding tools. The search and
//! selection layers only ever see the `Encoder` trait; each concrete adapter
//! owns the command-line syntax of one tool.
//!
//! ## Adapters:
//! - `MozjpegEncoder` (`cjpeg`): progressive JPEG with 4:4:4 sampling
//! - `CwebpEncoder` (`cwebp`): lossy WebP at maximum effort
//! - `AvifencEncoder` (`avifenc`): AVIF with a pinned quantizer pair
//! - `OxipngEncoder` (`oxipng`): lossless PNG, a fixed attempt with no
//!   quality search
//!
//! Every invocation runs under an enforced timeout with kill-on-drop, and a
//! nominally successful encode whose output file is missing or empty is
//! reported as a failure of that attempt.

use crate::config::{Config, QualitySpec};
use crate::error::CompressError;
use crate::tool_resolver::ToolResolver;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Capability interface for one external encoding operation.
///
/// `encode` must be safely callable many times concurrently for different
/// inputs; adapters hold no mutable state.
#[async_trait]
pub trait Encoder: Send + Sync {
    /// Pipeline identifier ("jpeg", "webp", "avif", "png")
    fn id(&self) -> &str;

    /// Output file extension
    fn extension(&self) -> &str;

    /// Whether quality meaningfully parameterizes this encoder. Lossless
    /// pipelines return false and get a single fixed attempt instead of a
    /// quality search.
    fn supports_search(&self) -> bool {
        true
    }

    /// Whether this encoder can consume an input with the given extension.
    fn accepts(&self, input_extension: &str) -> bool {
        let _ = input_extension;
        true
    }

    /// Produce `output` from `input` at the given quality.
    async fn encode(&self, input: &Path, output: &Path, quality: u8) -> Result<(), CompressError>;
}

/// One entry in the best-of selection: an encoder plus its searchable range.
#[derive(Clone)]
pub struct Pipeline {
    pub encoder: Arc<dyn Encoder>,
    pub quality: QualitySpec,
}

impl Pipeline {
    pub fn id(&self) -> &str {
        self.encoder.id()
    }
}

/// Build the enabled pipelines in declaration order (jpeg, webp, avif, png).
///
/// Declaration order is also the tie-break order of the best-of selection.
/// A missing binary disables its pipeline with a warning; an empty result
/// set is a hard error so the run fails before any job starts.
pub fn build_pipelines(
    config: &Config,
    resolver: &ToolResolver,
) -> Result<Vec<Pipeline>, CompressError> {
    let timeout = config.process_timeout();
    let mut pipelines: Vec<Pipeline> = Vec::new();
    let mut missing: Vec<&'static str> = Vec::new();

    fn disabled(tool: &'static str, missing: &mut Vec<&'static str>) {
        warn!(
            "{} not found, pipeline disabled ({})",
            tool,
            ToolResolver::install_hint(tool)
        );
        missing.push(tool);
    }

    if config.jpeg {
        match resolver.resolve(&["cjpeg", "mozjpeg"]) {
            Some(bin) => pipelines.push(Pipeline {
                encoder: Arc::new(MozjpegEncoder::new(bin, timeout)),
                quality: config.jpeg_quality,
            }),
            None => disabled("cjpeg", &mut missing),
        }
    }

    if config.webp {
        match resolver.resolve(&["cwebp"]) {
            Some(bin) => pipelines.push(Pipeline {
                encoder: Arc::new(CwebpEncoder::new(bin, timeout)),
                quality: config.webp_quality,
            }),
            None => disabled("cwebp", &mut missing),
        }
    }

    if config.avif {
        match resolver.resolve(&["avifenc"]) {
            Some(bin) => pipelines.push(Pipeline {
                encoder: Arc::new(AvifencEncoder::new(bin, timeout)),
                quality: config.avif_quality,
            }),
            None => disabled("avifenc", &mut missing),
        }
    }

    if config.png_lossless {
        match resolver.resolve(&["oxipng"]) {
            Some(bin) => pipelines.push(Pipeline {
                encoder: Arc::new(OxipngEncoder::new(bin, config.oxipng_level, timeout)),
                quality: QualitySpec { min: 0, max: 0 },
            }),
            None => disabled("oxipng", &mut missing),
        }
    }

    if pipelines.is_empty() {
        return Err(CompressError::ToolMissing(format!(
            "no usable encoder found (missing: {})",
            missing.join(", ")
        )));
    }

    Ok(pipelines)
}

/// Run one encoder process to completion under a timeout and verify that it
/// actually produced a non-empty output file.
async fn run_encoder(
    mut command: tokio::process::Command,
    tool: &str,
    output: &Path,
    timeout: Duration,
) -> Result<(), CompressError> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!("Running {} -> {}", tool, output.display());

    let child = command.spawn().map_err(|e| {
        if e.kind() == ErrorKind::NotFound {
            CompressError::ToolMissing(tool.to_string())
        } else {
            CompressError::Io(e)
        }
    })?;

    let result = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| CompressError::Timeout(timeout))??;

    if !result.status.success() {
        return Err(CompressError::EncodeFailure {
            tool: tool.to_string(),
            reason: String::from_utf8_lossy(&result.stderr).trim().to_string(),
        });
    }

    match tokio::fs::metadata(output).await {
        Ok(meta) if meta.len() > 0 => Ok(()),
        _ => Err(CompressError::EncodeFailure {
            tool: tool.to_string(),
            reason: "produced no output file".to_string(),
        }),
    }
}

/// Progressive JPEG via mozjpeg's `cjpeg`.
pub struct MozjpegEncoder {
    bin: PathBuf,
    timeout: Duration,
}

impl MozjpegEncoder {
    pub fn new(bin: PathBuf, timeout: Duration) -> Self {
        Self { bin, timeout }
    }
}

#[async_trait]
impl Encoder for MozjpegEncoder {
    fn id(&self) -> &str {
        "jpeg"
    }

    fn extension(&self) -> &str {
        "jpg"
    }

    async fn encode(&self, input: &Path, output: &Path, quality: u8) -> Result<(), CompressError> {
        let mut command = tokio::process::Command::new(&self.bin);
        command
            .arg("-quality")
            .arg(quality.to_string())
            .arg("-optimize")
            .arg("-progressive")
            .arg("-sample")
            .arg("1x1")
            .arg("-outfile")
            .arg(output)
            .arg(input);
        run_encoder(command, "cjpeg", output, self.timeout).await
    }
}

/// Lossy WebP via `cwebp`.
pub struct CwebpEncoder {
    bin: PathBuf,
    timeout: Duration,
}

impl CwebpEncoder {
    pub fn new(bin: PathBuf, timeout: Duration) -> Self {
        Self { bin, timeout }
    }
}

#[async_trait]
impl Encoder for CwebpEncoder {
    fn id(&self) -> &str {
        "webp"
    }

    fn extension(&self) -> &str {
        "webp"
    }

    async fn encode(&self, input: &Path, output: &Path, quality: u8) -> Result<(), CompressError> {
        let mut command = tokio::process::Command::new(&self.bin);
        command
            .arg("-q")
            .arg(quality.to_string())
            .arg("-m")
            .arg("6")
            .arg("-mt")
            .arg(input)
            .arg("-o")
            .arg(output);
        run_encoder(command, "cwebp", output, self.timeout).await
    }
}

/// Map a 0-100 quality value onto avifenc's 0-63 quantizer scale, inverted
/// so that a higher quality always means higher fidelity.
fn avif_quantizer(quality: u8) -> u8 {
    let quality = u32::from(quality.min(100));
    (63 - quality * 63 / 100) as u8
}

/// AVIF via `avifenc`, quantizer pinned to a single value per attempt.
pub struct AvifencEncoder {
    bin: PathBuf,
    timeout: Duration,
}

impl AvifencEncoder {
    pub fn new(bin: PathBuf, timeout: Duration) -> Self {
        Self { bin, timeout }
    }
}

#[async_trait]
impl Encoder for AvifencEncoder {
    fn id(&self) -> &str {
        "avif"
    }

    fn extension(&self) -> &str {
        "avif"
    }

    async fn encode(&self, input: &Path, output: &Path, quality: u8) -> Result<(), CompressError> {
        let quantizer = avif_quantizer(quality).to_string();
        let mut command = tokio::process::Command::new(&self.bin);
        command
            .arg("-j")
            .arg("all")
            .arg("--min")
            .arg(&quantizer)
            .arg("--max")
            .arg(&quantizer)
            .arg(input)
            .arg(output);
        run_encoder(command, "avifenc", output, self.timeout).await
    }
}

/// Lossless PNG optimization via `oxipng`. No quality search: one fixed
/// attempt, and only PNG inputs are accepted.
pub struct OxipngEncoder {
    bin: PathBuf,
    level: u8,
    timeout: Duration,
}

impl OxipngEncoder {
    pub fn new(bin: PathBuf, level: u8, timeout: Duration) -> Self {
        Self { bin, level, timeout }
    }
}

#[async_trait]
impl Encoder for OxipngEncoder {
    fn id(&self) -> &str {
        "png"
    }

    fn extension(&self) -> &str {
        "png"
    }

    fn supports_search(&self) -> bool {
        false
    }

    fn accepts(&self, input_extension: &str) -> bool {
        input_extension.eq_ignore_ascii_case("png")
    }

    async fn encode(&self, input: &Path, output: &Path, _quality: u8) -> Result<(), CompressError> {
        let mut command = tokio::process::Command::new(&self.bin);
        command
            .arg("-o")
            .arg(self.level.to_string())
            .arg("--strip")
            .arg("safe")
            .arg("--out")
            .arg(output)
            .arg(input);
        run_encoder(command, "oxipng", output, self.timeout).await
    }
}
