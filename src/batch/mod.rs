//! # Batch Execution Module
//!
//! Dispatching one best-of selection per input file over a bounded worker
//! pool, with per-job isolation and partial-failure tolerance.

pub mod batch_compressor;
pub mod job_runner;

pub use batch_compressor::BatchCompressor;
pub use job_runner::JobRunner;
