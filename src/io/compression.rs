//! Transparent decompression of source files.
//!
//! Sources are matched against registered [`SourceCodec`]s by file extension
//! first, then by magic bytes at the start of the stream. Anything unmatched is
//! streamed as-is.
//!
//! ## Built-in Codecs
//!
//! - **Gzip** (`.gz`, `.gzip`) via `flate2` (feature `compression-gzip`)
//! - **Zstd** (`.zst`, `.zstd`) via `zstd` (feature `compression-zstd`)
//!
//! Readers are `Send` so a worker thread can own them for the whole file.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::sync::{Arc, RwLock};

/// Boxed, thread-movable byte stream.
pub type SourceReader = Box<dyn Read + Send>;

static CODEC_REGISTRY: RwLock<Option<Vec<Arc<dyn SourceCodec>>>> = RwLock::new(None);

fn builtin_codecs() -> Vec<Arc<dyn SourceCodec>> {
    vec![
        #[cfg(feature = "compression-gzip")]
        Arc::new(GzipCodec),
        #[cfg(feature = "compression-zstd")]
        Arc::new(ZstdCodec),
    ]
}

fn registry() -> Vec<Arc<dyn SourceCodec>> {
    if let Ok(lock) = CODEC_REGISTRY.read()
        && let Some(codecs) = lock.as_ref()
    {
        return codecs.clone();
    }
    match CODEC_REGISTRY.write() {
        Ok(mut lock) => lock.get_or_insert_with(builtin_codecs).clone(),
        Err(_) => builtin_codecs(),
    }
}

/// Register an additional codec; it is consulted after the built-ins.
pub fn register_codec(codec: Arc<dyn SourceCodec>) {
    if let Ok(mut lock) = CODEC_REGISTRY.write() {
        lock.get_or_insert_with(builtin_codecs).push(codec);
    }
}

/// Decompressor for one source format.
pub trait SourceCodec: Send + Sync {
    /// Human-readable name, used in error context.
    fn name(&self) -> &str;

    /// Lowercase extensions including the leading dot.
    fn extensions(&self) -> &[&str];

    /// Leading signature bytes, if the format has one.
    fn magic_bytes(&self) -> Option<&[u8]>;

    /// Wrap a raw stream with decompression.
    fn wrap(&self, reader: SourceReader) -> std::io::Result<SourceReader>;
}

fn detect_from_extension(path: &Path) -> Option<Arc<dyn SourceCodec>> {
    let name = path.to_string_lossy().to_lowercase();
    registry()
        .into_iter()
        .find(|codec| codec.extensions().iter().any(|ext| name.ends_with(ext)))
}

fn detect_from_magic<R: BufRead>(reader: &mut R) -> Option<Arc<dyn SourceCodec>> {
    let head = reader.fill_buf().ok()?;
    if head.is_empty() {
        return None;
    }
    registry().into_iter().find(|codec| {
        codec
            .magic_bytes()
            .is_some_and(|magic| head.len() >= magic.len() && head.starts_with(magic))
    })
}

/// Largest raw read buffer a source gets, whatever the requested chunk size.
pub const MAX_READ_CHUNK: usize = 64 * 1024 * 1024;

/// Open `path` for streaming, reading the raw file in `chunk_size`-byte pieces
/// (clamped to [`MAX_READ_CHUNK`]) and decompressing when a codec matches.
///
/// # Errors
/// Returns an error if the file cannot be opened or the codec cannot start.
pub fn open_source(path: &Path, chunk_size: usize) -> Result<SourceReader> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut raw = BufReader::with_capacity(chunk_size.clamp(1, MAX_READ_CHUNK), file);

    if let Some(codec) = detect_from_extension(path) {
        return codec
            .wrap(Box::new(raw))
            .with_context(|| format!("start {} decoder for {}", codec.name(), path.display()));
    }
    if let Some(codec) = detect_from_magic(&mut raw) {
        return codec
            .wrap(Box::new(raw))
            .with_context(|| format!("start {} decoder for {}", codec.name(), path.display()));
    }
    Ok(Box::new(raw))
}

#[cfg(feature = "compression-gzip")]
struct GzipCodec;

#[cfg(feature = "compression-gzip")]
impl SourceCodec for GzipCodec {
    fn name(&self) -> &str {
        "gzip"
    }

    fn extensions(&self) -> &[&str] {
        &[".gz", ".gzip"]
    }

    fn magic_bytes(&self) -> Option<&[u8]> {
        Some(&[0x1f, 0x8b])
    }

    fn wrap(&self, reader: SourceReader) -> std::io::Result<SourceReader> {
        // Multi-member archives (concatenated gzip files) are common in lakes.
        Ok(Box::new(flate2::read::MultiGzDecoder::new(reader)))
    }
}

#[cfg(feature = "compression-zstd")]
struct ZstdCodec;

#[cfg(feature = "compression-zstd")]
impl SourceCodec for ZstdCodec {
    fn name(&self) -> &str {
        "zstd"
    }

    fn extensions(&self) -> &[&str] {
        &[".zst", ".zstd"]
    }

    fn magic_bytes(&self) -> Option<&[u8]> {
        Some(&[0x28, 0xb5, 0x2f, 0xfd])
    }

    fn wrap(&self, reader: SourceReader) -> std::io::Result<SourceReader> {
        zstd::stream::read::Decoder::new(reader).map(|d| Box::new(d) as SourceReader)
    }
}
