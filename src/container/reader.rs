//! Reader for sealed containers.
//!
//! Blocks are visited in logical order, sorted by `(file_index, block_seq)`
//! from the footer index, whatever order they were physically appended in.

use crate::block::{ColumnData, Value};
use crate::container::format::{
    BLOCK_MARKER, BlockHeader, BlockIndexEntry, FLAG_ZSTD, FOOTER_MAGIC, FORMAT_VERSION, Footer,
    MAGIC, SchemaDescriptor, TAIL_LEN,
};
use crate::schema::CompiledSchema;
use anyhow::{Context, Result, ensure};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// One decoded block.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedBlock {
    pub file_index: u32,
    pub block_seq: u32,
    pub row_start: u64,
    pub columns: Vec<ColumnData>,
}

impl DecodedBlock {
    #[must_use]
    pub fn rows(&self) -> usize {
        self.columns.first().map_or(0, ColumnData::len)
    }
}

/// Random-access view over a sealed container file.
pub struct ContainerReader {
    path: PathBuf,
    file: BufReader<File>,
    schema: CompiledSchema,
    compressed: bool,
    footer: Footer,
}

impl ContainerReader {
    /// Open and validate the container at `path`.
    ///
    /// # Errors
    /// Fails on I/O errors, a bad magic or version, or a missing or
    /// inconsistent footer (which is what an aborted run leaves behind).
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).with_context(|| format!("open {}", path.display()))?;
        let len = file.metadata()?.len();
        let mut file = BufReader::new(file);

        let mut fixed = [0u8; 24];
        file.read_exact(&mut fixed)
            .with_context(|| format!("read header of {}", path.display()))?;
        ensure!(&fixed[..8] == MAGIC, "{} is not a container", path.display());
        let version = u16::from_le_bytes([fixed[8], fixed[9]]);
        ensure!(
            version == FORMAT_VERSION,
            "unsupported container version {version}"
        );
        let flags = u16::from_le_bytes([fixed[10], fixed[11]]);
        let header_rows = read_u64(&fixed[12..20]);
        let desc_len = u32::from_le_bytes([fixed[20], fixed[21], fixed[22], fixed[23]]) as usize;

        let mut desc = vec![0u8; desc_len];
        file.read_exact(&mut desc).context("read schema descriptor")?;
        let desc: SchemaDescriptor =
            postcard::from_bytes(&desc).context("decode schema descriptor")?;
        let schema = CompiledSchema::new(desc.columns)?;

        let body_start = 24 + desc_len as u64;
        ensure!(
            len >= body_start + TAIL_LEN,
            "{} has no footer; the run that wrote it did not complete",
            path.display()
        );
        file.seek(SeekFrom::Start(len - TAIL_LEN))?;
        let mut tail = [0u8; 16];
        file.read_exact(&mut tail)?;
        ensure!(
            &tail[8..] == FOOTER_MAGIC,
            "{} has no footer; the run that wrote it did not complete",
            path.display()
        );
        let footer_len = read_u64(&tail[..8]);
        ensure!(
            footer_len <= len - TAIL_LEN - body_start,
            "footer length {footer_len} exceeds file size"
        );
        file.seek(SeekFrom::Start(len - TAIL_LEN - footer_len))?;
        let mut footer = vec![0u8; footer_len as usize];
        file.read_exact(&mut footer)?;
        let footer: Footer = postcard::from_bytes(&footer).context("decode footer")?;
        ensure!(
            footer.total_rows == header_rows,
            "header reports {header_rows} rows but footer reports {}",
            footer.total_rows
        );

        Ok(Self {
            path,
            file,
            schema,
            compressed: flags & FLAG_ZSTD != 0,
            footer,
        })
    }

    #[must_use]
    pub fn schema(&self) -> &CompiledSchema {
        &self.schema
    }

    #[must_use]
    pub fn total_rows(&self) -> u64 {
        self.footer.total_rows
    }

    #[must_use]
    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    /// Block index in logical order.
    #[must_use]
    pub fn blocks(&self) -> &[BlockIndexEntry] {
        &self.footer.blocks
    }

    /// Decode the block described by `entry`.
    ///
    /// # Errors
    /// Fails on I/O errors or when the record disagrees with its index entry.
    pub fn read_block(&mut self, entry: &BlockIndexEntry) -> Result<DecodedBlock> {
        self.file.seek(SeekFrom::Start(entry.offset))?;
        let mut prefix = [0u8; 8];
        self.file.read_exact(&mut prefix)?;
        let marker = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]);
        ensure!(
            marker == BLOCK_MARKER,
            "no block record at offset {} in {}",
            entry.offset,
            self.path.display()
        );
        let header_len = u32::from_le_bytes([prefix[4], prefix[5], prefix[6], prefix[7]]);
        let mut header = vec![0u8; header_len as usize];
        self.file.read_exact(&mut header)?;
        let header: BlockHeader = postcard::from_bytes(&header).context("decode block header")?;
        ensure!(
            header.file_index == entry.file_index
                && header.block_seq == entry.block_seq
                && header.row_count == entry.row_count,
            "block at offset {} does not match the footer index",
            entry.offset
        );
        ensure!(
            header.columns.len() == self.schema.len(),
            "block has {} columns, schema has {}",
            header.columns.len(),
            self.schema.len()
        );

        let rows = usize::try_from(header.row_count)?;
        let mut columns = Vec::with_capacity(header.columns.len());
        for (extent, spec) in header.columns.iter().zip(self.schema.columns()) {
            let mut stored = vec![0u8; usize::try_from(extent.stored_len)?];
            self.file
                .read_exact(&mut stored)
                .with_context(|| format!("read column `{}`", spec.name))?;
            let raw = if self.compressed {
                decompress(&stored, usize::try_from(extent.raw_len)?)?
            } else {
                stored
            };
            ensure!(
                raw.len() as u64 == extent.raw_len,
                "column `{}` payload is {} bytes, expected {}",
                spec.name,
                raw.len(),
                extent.raw_len
            );
            let column = ColumnData::decode(spec.encoding, rows, &raw)
                .with_context(|| format!("decode column `{}`", spec.name))?;
            columns.push(column);
        }

        Ok(DecodedBlock {
            file_index: header.file_index,
            block_seq: header.block_seq,
            row_start: entry.row_start,
            columns,
        })
    }

    /// Decode every block and concatenate the columns in logical order.
    ///
    /// # Errors
    /// See [`read_block`](Self::read_block).
    pub fn read_all(&mut self) -> Result<Vec<ColumnData>> {
        let mut out: Vec<ColumnData> = self.schema.encodings().map(ColumnData::empty).collect();
        for entry in self.footer.blocks.clone() {
            let block = self.read_block(&entry)?;
            for (acc, column) in out.iter_mut().zip(&block.columns) {
                acc.append(column)?;
            }
        }
        Ok(out)
    }

    /// All rows as owned values, in logical order.
    ///
    /// # Errors
    /// See [`read_block`](Self::read_block).
    pub fn read_rows(&mut self) -> Result<Vec<Vec<Value>>> {
        let columns = self.read_all()?;
        let rows = columns.first().map_or(0, ColumnData::len);
        (0..rows)
            .map(|r| {
                columns
                    .iter()
                    .map(|c| c.value(r).context("ragged column data"))
                    .collect()
            })
            .collect()
    }
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut word = [0u8; 8];
    word.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(word)
}

#[cfg(feature = "compression-zstd")]
fn decompress(stored: &[u8], raw_len: usize) -> Result<Vec<u8>> {
    zstd::bulk::decompress(stored, raw_len).context("zstd decompress column payload")
}

#[cfg(not(feature = "compression-zstd"))]
fn decompress(_stored: &[u8], _raw_len: usize) -> Result<Vec<u8>> {
    anyhow::bail!("container uses zstd payloads but the `compression-zstd` feature is disabled")
}
