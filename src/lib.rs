//! # Perceptual Image Compressor Library
//!
//! Batch-compresses images by trying several external encoders per file and
//! keeping the smallest result that still meets a perceptual-quality
//! threshold.
//!
//! ## Module architecture:
//! - `config`: run configuration, quality ranges and validation
//! - `error`: custom error taxonomy for the compression engine
//! - `tool_resolver`: locating external encoder/metric binaries on PATH
//! - `encoder`: capability trait plus one adapter per external encoder
//! - `metrics`: perceptual score adapters and the threshold decision
//! - `search`: binary search for the lowest passing quality per pipeline
//! - `selector`: best-of selection across pipelines, winner promotion
//! - `batch`: bounded worker pool running one job per input file
//! - `report`: serializable per-file results, batch totals, JSON/CSV output
//! - `file_manager`: input discovery and size helpers
//! - `resize`: optional pre-compression downscale step
//! - `progress`: batch progress bar
//!
//! ## Usage:
//! ```rust,no_run
//! use perceptual_image_compressor::{BatchCompressor, Config};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = Config::default();
//! let compressor = BatchCompressor::new(config)?;
//! let results = compressor.run(std::path::Path::new("/photos")).await?;
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod config;
pub mod encoder;
pub mod error;
pub mod file_manager;
pub mod metrics;
pub mod progress;
pub mod report;
pub mod resize;
pub mod search;
pub mod selector;
pub mod tool_resolver;

pub use batch::BatchCompressor;
pub use config::{Config, QualitySpec};
pub use error::CompressError;
pub use report::{BatchSummary, JobResult};
