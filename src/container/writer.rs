//! Single-owner, append-only container writer.

use crate::block::HyperBlock;
use crate::config::BlockCompression;
use crate::container::format::{
    BLOCK_MARKER, BlockHeader, BlockIndexEntry, ColumnExtent, FLAG_ZSTD, FOOTER_MAGIC,
    FORMAT_VERSION, Footer, MAGIC, ROW_COUNT_OFFSET, SchemaDescriptor,
};
use crate::error::{HyperError, Result};
use crate::schema::CompiledSchema;
use log::{debug, info};
use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Outcome of sealing a container.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContainerSummary {
    pub total_rows: u64,
    pub blocks: usize,
    pub bytes_written: u64,
}

/// Serializes blocks into the container in submission order.
///
/// Only this type ever writes to the output. Each [`submit`](Self::submit)
/// appends one block record and drops the block, which releases its pool lease;
/// [`finalize`](Self::finalize) writes the footer and patches the row count.
pub struct ContainerWriter<W: Write + Seek = BufWriter<File>> {
    out: W,
    schema: CompiledSchema,
    compression: BlockCompression,
    level: i32,
    position: u64,
    index: Vec<BlockIndexEntry>,
    total_rows: u64,
    target: PathBuf,
}

impl ContainerWriter<BufWriter<File>> {
    /// Create (truncating) the container at `path` and write its header.
    ///
    /// # Errors
    /// [`HyperError::Writer`] if the file cannot be created or written.
    pub fn create(
        path: &Path,
        schema: &CompiledSchema,
        compression: BlockCompression,
        level: i32,
    ) -> Result<Self> {
        let file = File::create(path)
            .map_err(|e| HyperError::Writer(format!("create {}: {e}", path.display())))?;
        let mut writer =
            Self::new(BufWriter::with_capacity(1 << 20, file), schema, compression, level)?;
        writer.target = path.to_path_buf();
        Ok(writer)
    }
}

impl<W: Write + Seek> ContainerWriter<W> {
    /// Start a container on an arbitrary seekable sink.
    ///
    /// # Errors
    /// [`HyperError::Writer`] if the header cannot be written.
    pub fn new(
        mut out: W,
        schema: &CompiledSchema,
        compression: BlockCompression,
        level: i32,
    ) -> Result<Self> {
        let descriptor = postcard::to_allocvec(&SchemaDescriptor::from(schema))
            .map_err(|e| HyperError::Writer(format!("encode schema descriptor: {e}")))?;
        let flags = match compression {
            BlockCompression::None => 0,
            BlockCompression::Zstd => FLAG_ZSTD,
        };

        let mut header = Vec::with_capacity(24 + descriptor.len());
        header.extend_from_slice(MAGIC);
        header.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        header.extend_from_slice(&flags.to_le_bytes());
        header.extend_from_slice(&0u64.to_le_bytes());
        header.extend_from_slice(&(descriptor.len() as u32).to_le_bytes());
        header.extend_from_slice(&descriptor);
        out.write_all(&header).map_err(write_err("header"))?;

        Ok(Self {
            out,
            schema: schema.clone(),
            compression,
            level,
            position: header.len() as u64,
            index: Vec::new(),
            total_rows: 0,
            target: PathBuf::from("<stream>"),
        })
    }

    /// Rows appended so far.
    #[must_use]
    pub fn rows_written(&self) -> u64 {
        self.total_rows
    }

    /// Append `block` as one column-block record, then release it.
    ///
    /// # Errors
    /// [`HyperError::Writer`] on a schema shape mismatch or an I/O failure.
    pub fn submit(&mut self, block: HyperBlock) -> Result<()> {
        self.check_shape(&block)?;
        if block.is_empty() {
            return Ok(());
        }

        let payloads = self.encode_payloads(&block)?;
        let header = BlockHeader {
            file_index: block.file_index(),
            block_seq: block.block_seq(),
            row_count: block.rows(),
            columns: payloads.iter().map(|(extent, _)| *extent).collect(),
        };
        let header_bytes = postcard::to_allocvec(&header)
            .map_err(|e| HyperError::Writer(format!("encode block header: {e}")))?;

        let offset = self.position;
        self.out
            .write_all(&BLOCK_MARKER.to_le_bytes())
            .and_then(|()| self.out.write_all(&(header_bytes.len() as u32).to_le_bytes()))
            .and_then(|()| self.out.write_all(&header_bytes))
            .map_err(write_err("block header"))?;
        self.position += 8 + header_bytes.len() as u64;

        for (column, (extent, encoded)) in block.columns().iter().zip(&payloads) {
            let written = match encoded {
                Some(bytes) => self.out.write_all(bytes),
                None => column.write_payload(&mut self.out),
            };
            written.map_err(write_err("column payload"))?;
            self.position += extent.stored_len;
        }

        debug!(
            "flushed block file={} seq={} rows={} at offset {offset}",
            block.file_index(),
            block.block_seq(),
            block.rows()
        );
        self.index.push(BlockIndexEntry {
            offset,
            file_index: block.file_index(),
            block_seq: block.block_seq(),
            row_start: 0,
            row_count: block.rows(),
        });
        self.total_rows += block.rows();
        Ok(())
    }

    /// Write the footer, patch the header row count and flush.
    ///
    /// # Errors
    /// [`HyperError::Writer`] if any of the final writes fail.
    pub fn finalize(mut self) -> Result<ContainerSummary> {
        let footer = Footer::from_entries(std::mem::take(&mut self.index));
        if footer.total_rows != self.total_rows {
            return Err(HyperError::Writer(format!(
                "block index covers {} rows but {} were written",
                footer.total_rows, self.total_rows
            )));
        }
        let footer_bytes = postcard::to_allocvec(&footer)
            .map_err(|e| HyperError::Writer(format!("encode footer: {e}")))?;

        self.out
            .write_all(&footer_bytes)
            .and_then(|()| self.out.write_all(&(footer_bytes.len() as u64).to_le_bytes()))
            .and_then(|()| self.out.write_all(FOOTER_MAGIC))
            .map_err(write_err("footer"))?;
        self.position += footer_bytes.len() as u64 + 16;

        self.out
            .seek(SeekFrom::Start(ROW_COUNT_OFFSET))
            .and_then(|_| self.out.write_all(&footer.total_rows.to_le_bytes()))
            .and_then(|()| self.out.seek(SeekFrom::End(0)).map(|_| ()))
            .and_then(|()| self.out.flush())
            .map_err(write_err("row count"))?;

        info!(
            "sealed {} with {} rows in {} blocks ({} bytes)",
            self.target.display(),
            footer.total_rows,
            footer.blocks.len(),
            self.position
        );
        Ok(ContainerSummary {
            total_rows: footer.total_rows,
            blocks: footer.blocks.len(),
            bytes_written: self.position,
        })
    }

    /// Hand back the sink; the container stays unsealed.
    pub fn into_inner(self) -> W {
        self.out
    }

    fn check_shape(&self, block: &HyperBlock) -> Result<()> {
        let columns = block.columns();
        if columns.len() != self.schema.len() {
            return Err(HyperError::Writer(format!(
                "block has {} columns, container declares {}",
                columns.len(),
                self.schema.len()
            )));
        }
        for (idx, (column, expected)) in columns.iter().zip(self.schema.encodings()).enumerate() {
            if column.encoding() != expected {
                return Err(HyperError::Writer(format!(
                    "block column {idx} is {:?}, container declares {expected:?}",
                    column.encoding()
                )));
            }
            if column.len() as u64 != block.rows() {
                return Err(HyperError::Writer(format!(
                    "block column {idx} holds {} values for {} rows",
                    column.len(),
                    block.rows()
                )));
            }
        }
        Ok(())
    }

    /// Compute extents, compressing payloads up front when enabled.
    fn encode_payloads(&self, block: &HyperBlock) -> Result<Vec<(ColumnExtent, Option<Vec<u8>>)>> {
        block
            .columns()
            .iter()
            .map(|column| {
                let raw_len = column.payload_len();
                match self.compression {
                    BlockCompression::None => Ok((
                        ColumnExtent {
                            raw_len,
                            stored_len: raw_len,
                        },
                        None,
                    )),
                    BlockCompression::Zstd => {
                        let compressed = compress(column, raw_len, self.level)?;
                        Ok((
                            ColumnExtent {
                                raw_len,
                                stored_len: compressed.len() as u64,
                            },
                            Some(compressed),
                        ))
                    }
                }
            })
            .collect()
    }
}

#[cfg(feature = "compression-zstd")]
fn compress(column: &crate::block::ColumnData, raw_len: u64, level: i32) -> Result<Vec<u8>> {
    let mut raw = Vec::with_capacity(raw_len as usize);
    column
        .write_payload(&mut raw)
        .map_err(write_err("column payload"))?;
    zstd::bulk::compress(&raw, level)
        .map_err(|e| HyperError::Writer(format!("zstd compress column payload: {e}")))
}

#[cfg(not(feature = "compression-zstd"))]
fn compress(_column: &crate::block::ColumnData, _raw_len: u64, _level: i32) -> Result<Vec<u8>> {
    Err(HyperError::Writer(
        "zstd payload compression is not compiled in".into(),
    ))
}

fn write_err(what: &'static str) -> impl Fn(std::io::Error) -> HyperError {
    move |e| HyperError::Writer(format!("write {what}: {e}"))
}
