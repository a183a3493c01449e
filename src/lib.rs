//! Kinesync - phase-synchronized EMG analysis
//!
//! Kinesync aligns surface EMG with motion-capture and force-plate recordings
//! of the same trial, resolves named movement landmarks into EMG intervals and
//! computes per-channel statistics over them: interval mean/max, phase-bucket
//! summaries, sliding-window max-of-means and reference normalization.
//!
//! ## Modules
//!
//! - **Ingestion**: [`numeric`], [`parsers`], [`manifest`]
//! - **Alignment**: [`sync`], [`phase`]
//! - **Engines**: [`window`] (on a [`pool::WorkerPool`]), [`stats`], [`normalizer`]
//! - **Output**: [`assembler`]
//! - **Orchestration**: [`pipeline::PhaseAnalyzer`]

pub mod assembler;
pub mod config;
pub mod error;
pub mod manifest;
pub mod normalizer;
pub mod numeric;
pub mod parsers;
pub mod phase;
pub mod pipeline;
pub mod pool;
pub mod stats;
pub mod sync;
pub mod types;
pub mod window;

pub use assembler::{output_file_name, ResultAssembler, Table};
pub use config::{AnalysisConfig, OutputFormat};
pub use error::{AnalysisError, ErrorKind};
pub use numeric::ScaledCodec;
pub use phase::{get_phase_time_range, validate_phase_order};
pub use pipeline::{PhaseAnalyzer, Recording};
pub use pool::{CancelToken, ProgressSink};
pub use types::{AnalysisRequest, EmgStream, Landmark, Manifest, Stats, TimeRange};

/// Kinesync version embedded in JSON output
pub const KINESYNC_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for JSON output
pub const PRODUCER_NAME: &str = "kinesync";
