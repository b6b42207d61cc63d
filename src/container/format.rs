//! On-disk layout of the columnar container.
//!
//! ```text
//! +--------------------------------------------------------------+
//! | MAGIC (8) | version u16 | flags u16 | total_rows u64         |
//! | schema_len u32 | postcard(SchemaDescriptor)                  |
//! +--------------------------------------------------------------+
//! | BLOCK_MARKER u32 | header_len u32 | postcard(BlockHeader)    |
//! | column payload 0 | column payload 1 | ...                    |
//! +--------------------------------------------------------------+
//! | ... more block records, in submission order ...              |
//! +--------------------------------------------------------------+
//! | postcard(Footer) | footer_len u64 | FOOTER_MAGIC (8)         |
//! +--------------------------------------------------------------+
//! ```
//!
//! Integers are little-endian. `total_rows` is written as 0 and patched when the
//! container is sealed; a container without the trailing footer is invalid.

use crate::schema::{CompiledSchema, LogicalType};
use serde::{Deserialize, Serialize};

pub const MAGIC: &[u8; 8] = b"HYPRCPY\0";
pub const FOOTER_MAGIC: &[u8; 8] = b"HYPRFTR\0";
pub const FORMAT_VERSION: u16 = 1;

/// Column payloads are individually zstd-compressed.
pub const FLAG_ZSTD: u16 = 0b1;

pub const BLOCK_MARKER: u32 = 0x4B4C_4248;

/// Offset of the `total_rows` placeholder within the header.
pub const ROW_COUNT_OFFSET: u64 = 12;

/// Size of the fixed tail: footer length plus footer magic.
pub const TAIL_LEN: u64 = 16;

/// Column names and types, in order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    pub columns: Vec<(String, LogicalType)>,
}

impl From<&CompiledSchema> for SchemaDescriptor {
    fn from(schema: &CompiledSchema) -> Self {
        Self {
            columns: schema
                .columns()
                .iter()
                .map(|c| (c.name.clone(), c.logical))
                .collect(),
        }
    }
}

/// Byte extent of one column payload inside a block record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnExtent {
    /// Length once decompressed.
    pub raw_len: u64,
    /// Length on disk.
    pub stored_len: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub file_index: u32,
    pub block_seq: u32,
    pub row_count: u64,
    pub columns: Vec<ColumnExtent>,
}

/// Footer entry locating one block record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockIndexEntry {
    /// Absolute offset of the block marker.
    pub offset: u64,
    pub file_index: u32,
    pub block_seq: u32,
    /// First logical row (file-index-then-row order) held by this block.
    pub row_start: u64,
    pub row_count: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Footer {
    pub total_rows: u64,
    /// Entries sorted by `(file_index, block_seq)`.
    pub blocks: Vec<BlockIndexEntry>,
}

impl Footer {
    /// Sort `entries` into logical order and assign contiguous row ranges.
    #[must_use]
    pub fn from_entries(mut entries: Vec<BlockIndexEntry>) -> Self {
        entries.sort_by_key(|e| (e.file_index, e.block_seq));
        let mut next = 0u64;
        for entry in &mut entries {
            entry.row_start = next;
            next += entry.row_count;
        }
        Self {
            total_rows: next,
            blocks: entries,
        }
    }
}
