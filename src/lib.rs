//! # Hypercopy
//!
//! A **parallel ingestion pipeline** that consolidates many delimited text files
//! into one compact binary columnar container, sized and parallelized for the
//! host it runs on.
//!
//! ## Key Features
//!
//! - **Auto-tuning** - a one-shot system profile picks worker count and I/O chunk size
//! - **Bounded memory** - every in-flight block is reserved against a RAM budget
//! - **Parallel parsing** - files are spread across a rayon worker pool
//! - **Fail-fast** - the first parse error, I/O fault or panic cancels the whole run
//! - **Typed schema** - Int64, Float64, Utf8 and Timestamp columns, checked per field
//! - **Compressed inputs** - `.gz` and `.zst` sources are decoded transparently
//! - **Reproducible order** - rows read back in file-then-row order on every run
//! - **C ABI** - a four-string entry point returning a row count or error code
//!
//! ## Quick Start
//!
//! ```no_run
//! use hypercopy::HyperCopy;
//! # use anyhow::Result;
//!
//! # fn main() -> Result<()> {
//! let summary = HyperCopy::from_json(
//!     "data/sales_*.csv",
//!     "out/sales.hcc",
//!     r#"{"column_names": ["id", "amount"], "column_types": ["Int64", "Float64"]}"#,
//!     r#"{"delimiter": ",", "has_header": true}"#,
//! )
//! .run()?;
//! println!("wrote {} rows", summary.rows_written);
//! # Ok(())
//! # }
//! ```
//!
//! Hosts that only need the boundary result call [`hyper_copy`], which returns
//! the row count or one of the negative codes listed on [`HyperError::code`].
//!
//! ## Core Concepts
//!
//! ### System report
//!
//! [`SystemReport`] captures thread count, RAM, GPU presence and a derived
//! [`Profile`]. [`profiler::profile`] detects it once per process; tests and
//! embedders can pin one with [`SystemReport::synthetic`] and
//! [`HyperCopy::with_report`].
//!
//! ### Schema and config
//!
//! Schema and config arrive as JSON and are compiled into [`CompiledSchema`]
//! and [`CompiledConfig`] before any file is opened. Unset config fields fall
//! back to the system report (chunk size, threads) or fixed defaults.
//!
//! ### Blocks and the pool
//!
//! Workers parse rows into column-major [`HyperBlock`]s. Each block holds a
//! [`Lease`] from the [`BufferPool`]; a worker waits for capacity when the budget
//! is spent, and the lease is returned once the writer has flushed the block.
//!
//! ### Container
//!
//! The [`ContainerWriter`] is the only thing that touches the output file. It
//! appends blocks as they arrive and seals the file with a footer indexing them
//! by `(file_index, block_seq)`. [`ContainerReader`] decodes a sealed container
//! in logical order and rejects unsealed ones.
//!
//! ## Feature Flags
//!
//! - `compression-gzip` - read gzip-compressed sources (default)
//! - `compression-zstd` - read zstd sources and compress container payloads (default)
//! - `ffi` - export the C ABI in [`ffi`] (default)

pub mod block;
pub mod cancel;
pub mod config;
pub mod container;
pub mod error;
pub mod io;
pub mod parse;
pub mod pipeline;
pub mod pool;
pub mod profiler;
pub mod schema;
pub mod worker;

#[cfg(feature = "ffi")]
pub mod ffi;

// General re-exports
pub use block::{ColumnData, HyperBlock, Value};
pub use cancel::CancelToken;
pub use config::{BlockCompression, CompiledConfig, RawConfig, compile_config};
pub use container::{ContainerReader, ContainerSummary, ContainerWriter, DecodedBlock};
pub use error::{HyperError, Result};
pub use io::glob::{FileSet, resolve};
pub use pipeline::{HyperCopy, PipelineState, RunSummary, hyper_copy};
pub use pool::{BufferPool, Lease, PoolStats};
pub use profiler::{Profile, SystemReport};
pub use schema::{CompiledSchema, LogicalType, PhysicalEncoding, compile_schema};

// Gated re-exports
#[cfg(feature = "ffi")]
pub use ffi::{hypercopy_free_string, hypercopy_run, hypercopy_system_report, hypercopy_version};

/// Crate version string.
#[must_use]
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// The cached host report as JSON:
/// `{"profile", "threads", "io_chunk_mb", "gpu_detected", "total_memory_mb"}`.
#[must_use]
pub fn system_report_json() -> String {
    profiler::profile().to_json()
}
