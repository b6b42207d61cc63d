//! Pipeline configuration: raw JSON knobs compiled against a [`SystemReport`].
//!
//! Unset fields take their defaults from the host report (chunk size, thread
//! count) or from the constants below. Compilation is pure.

use crate::error::{HyperError, Result};
use crate::profiler::SystemReport;
use serde::{Deserialize, Serialize};

/// Fraction of physical RAM used for buffered blocks when unset.
pub const DEFAULT_TARGET_RAM_RATIO: f64 = 0.45;
/// Default zstd level for container payloads.
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// Payload compression applied to column data inside the container.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockCompression {
    #[default]
    None,
    Zstd,
}

/// A single-byte setting given either as a number or a one-character string.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum ByteSpec {
    Code(i64),
    Text(String),
}

impl ByteSpec {
    fn resolve(&self, field: &str) -> Result<u8> {
        let code = match self {
            ByteSpec::Code(n) => *n,
            ByteSpec::Text(s) => {
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => i64::from(u32::from(c)),
                    _ => {
                        return Err(HyperError::Config(format!(
                            "{field} must be a single character, got {s:?}"
                        )));
                    }
                }
            }
        };
        let byte = u8::try_from(code)
            .ok()
            .filter(u8::is_ascii)
            .ok_or_else(|| HyperError::Config(format!("{field} {code} is not an ASCII byte")))?;
        if byte == b'\n' || byte == b'\r' {
            return Err(HyperError::Config(format!(
                "{field} cannot be a line terminator"
            )));
        }
        Ok(byte)
    }
}

/// Loosely-typed configuration as it arrives from the host.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct RawConfig {
    pub delimiter: Option<ByteSpec>,
    pub quote_char: Option<ByteSpec>,
    pub has_header: Option<bool>,
    #[serde(alias = "chunk_size_bytes")]
    pub chunk_size: Option<u64>,
    pub target_ram_ratio: Option<f64>,
    pub threads: Option<u32>,
    pub compression: Option<BlockCompression>,
    pub compression_level: Option<i32>,
}

impl RawConfig {
    /// Parse the boundary JSON document.
    ///
    /// # Errors
    /// [`HyperError::Config`] if the document is not a valid config object.
    pub fn from_json(config_json: &str) -> Result<Self> {
        serde_json::from_str(config_json)
            .map_err(|e| HyperError::Config(format!("malformed config JSON: {e}")))
    }
}

/// Validated tuning parameters for one run.
#[derive(Clone, Debug, PartialEq)]
pub struct CompiledConfig {
    pub delimiter: u8,
    pub quote_char: u8,
    pub has_header: bool,
    pub chunk_size_bytes: u64,
    pub target_ram_ratio: f64,
    /// Upper bound on parse workers.
    pub max_threads: u32,
    pub compression: BlockCompression,
    pub compression_level: i32,
}

impl CompiledConfig {
    /// Bytes of RAM the run may hold in outstanding blocks.
    #[must_use]
    pub fn budget_bytes(&self, report: &SystemReport) -> u64 {
        // Ratio is validated to (0, 1], so the product never exceeds physical RAM.
        (report.total_memory_bytes as f64 * self.target_ram_ratio).floor() as u64
    }

    /// Bytes reserved per block: the chunk size, shrunk to fit the budget.
    #[must_use]
    pub fn block_capacity(&self, report: &SystemReport) -> u64 {
        self.chunk_size_bytes.min(self.budget_bytes(report))
    }
}

/// Compile raw settings, filling gaps from `report`.
///
/// # Errors
/// [`HyperError::Config`] for a zero chunk size, a ratio outside `(0, 1]` or
/// one that leaves no memory budget, invalid delimiter/quote bytes, or an
/// unavailable compression codec.
pub fn compile_config(raw: &RawConfig, report: &SystemReport) -> Result<CompiledConfig> {
    let delimiter = match &raw.delimiter {
        Some(spec) => spec.resolve("delimiter")?,
        None => b',',
    };
    let quote_char = match &raw.quote_char {
        Some(spec) => spec.resolve("quote_char")?,
        None => b'"',
    };
    if delimiter == quote_char {
        return Err(HyperError::Config(format!(
            "delimiter and quote_char are both {:?}",
            char::from(delimiter)
        )));
    }

    let chunk_size_bytes = raw.chunk_size.unwrap_or_else(|| report.io_chunk_bytes());
    if chunk_size_bytes == 0 {
        return Err(HyperError::Config("chunk_size must be positive".into()));
    }

    let target_ram_ratio = raw.target_ram_ratio.unwrap_or(DEFAULT_TARGET_RAM_RATIO);
    if !target_ram_ratio.is_finite() || target_ram_ratio <= 0.0 || target_ram_ratio > 1.0 {
        return Err(HyperError::Config(format!(
            "target_ram_ratio must be in (0, 1], got {target_ram_ratio}"
        )));
    }

    let max_threads = match raw.threads {
        Some(n) if n > 0 => n.min(report.thread_count),
        _ => report.thread_count,
    }
    .max(1);

    let compression = raw.compression.unwrap_or_default();
    if compression == BlockCompression::Zstd && !cfg!(feature = "compression-zstd") {
        return Err(HyperError::Config(
            "zstd compression requested but the `compression-zstd` feature is disabled".into(),
        ));
    }
    let compression_level = raw.compression_level.unwrap_or(DEFAULT_COMPRESSION_LEVEL);
    if !(1..=22).contains(&compression_level) {
        return Err(HyperError::Config(format!(
            "compression_level must be in 1..=22, got {compression_level}"
        )));
    }

    let config = CompiledConfig {
        delimiter,
        quote_char,
        has_header: raw.has_header.unwrap_or(true),
        chunk_size_bytes,
        target_ram_ratio,
        max_threads,
        compression,
        compression_level,
    };
    let budget = config.budget_bytes(report);
    if budget == 0 {
        return Err(HyperError::Config(format!(
            "target_ram_ratio {target_ram_ratio} of {} bytes leaves no memory budget",
            report.total_memory_bytes
        )));
    }
    Ok(config)
}
