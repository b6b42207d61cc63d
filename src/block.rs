//! Column-major accumulation buffers.
//!
//! A [`HyperBlock`] holds parsed rows of one source file, one [`ColumnData`]
//! array per schema column. It owns a pool [`Lease`]; whoever drops the block
//! (normally the container writer after flushing it) returns that capacity.

use crate::parse;
use crate::pool::Lease;
use crate::schema::{CompiledSchema, PhysicalEncoding};
use anyhow::{Context, Result, bail, ensure};
use csv::ByteRecord;
use std::io::Write;

/// Decoded or accumulating values for one column.
#[derive(Clone, Debug, PartialEq)]
pub enum ColumnData {
    Int64(Vec<i64>),
    Float64(Vec<f64>),
    /// `offsets` has one more entry than there are values; value `i` is
    /// `data[offsets[i]..offsets[i + 1]]`.
    Utf8 { offsets: Vec<u64>, data: Vec<u8> },
    /// Microseconds since the Unix epoch.
    Timestamp(Vec<i64>),
}

/// One cell, for row-wise access.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Int64(i64),
    Float64(f64),
    Utf8(String),
    Timestamp(i64),
}

impl ColumnData {
    /// Empty column for `encoding`.
    #[must_use]
    pub fn empty(encoding: PhysicalEncoding) -> Self {
        match encoding {
            PhysicalEncoding::Int64 => ColumnData::Int64(Vec::new()),
            PhysicalEncoding::Float64 => ColumnData::Float64(Vec::new()),
            PhysicalEncoding::VarUtf8 => ColumnData::Utf8 {
                offsets: vec![0],
                data: Vec::new(),
            },
            PhysicalEncoding::TimestampMicros => ColumnData::Timestamp(Vec::new()),
        }
    }

    #[must_use]
    pub fn encoding(&self) -> PhysicalEncoding {
        match self {
            ColumnData::Int64(_) => PhysicalEncoding::Int64,
            ColumnData::Float64(_) => PhysicalEncoding::Float64,
            ColumnData::Utf8 { .. } => PhysicalEncoding::VarUtf8,
            ColumnData::Timestamp(_) => PhysicalEncoding::TimestampMicros,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Int64(v) | ColumnData::Timestamp(v) => v.len(),
            ColumnData::Float64(v) => v.len(),
            ColumnData::Utf8 { offsets, .. } => offsets.len().saturating_sub(1),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Text at `row` for a Utf8 column.
    #[must_use]
    pub fn str_at(&self, row: usize) -> Option<&str> {
        let ColumnData::Utf8 { offsets, data } = self else {
            return None;
        };
        let start = usize::try_from(*offsets.get(row)?).ok()?;
        let end = usize::try_from(*offsets.get(row + 1)?).ok()?;
        std::str::from_utf8(data.get(start..end)?).ok()
    }

    #[must_use]
    pub fn value(&self, row: usize) -> Option<Value> {
        match self {
            ColumnData::Int64(v) => v.get(row).copied().map(Value::Int64),
            ColumnData::Float64(v) => v.get(row).copied().map(Value::Float64),
            ColumnData::Timestamp(v) => v.get(row).copied().map(Value::Timestamp),
            ColumnData::Utf8 { .. } => self.str_at(row).map(|s| Value::Utf8(s.to_string())),
        }
    }

    /// Append all values of `other`, which must have the same encoding.
    pub fn append(&mut self, other: &ColumnData) -> Result<()> {
        match (self, other) {
            (ColumnData::Int64(a), ColumnData::Int64(b))
            | (ColumnData::Timestamp(a), ColumnData::Timestamp(b)) => a.extend_from_slice(b),
            (ColumnData::Float64(a), ColumnData::Float64(b)) => a.extend_from_slice(b),
            (
                ColumnData::Utf8 { offsets, data },
                ColumnData::Utf8 {
                    offsets: other_offsets,
                    data: other_data,
                },
            ) => {
                let base = data.len() as u64;
                offsets.extend(other_offsets.iter().skip(1).map(|o| base + o));
                data.extend_from_slice(other_data);
            }
            (a, b) => bail!(
                "cannot append {:?} values to a {:?} column",
                b.encoding(),
                a.encoding()
            ),
        }
        Ok(())
    }

    fn truncate(&mut self, rows: usize) {
        match self {
            ColumnData::Int64(v) | ColumnData::Timestamp(v) => v.truncate(rows),
            ColumnData::Float64(v) => v.truncate(rows),
            ColumnData::Utf8 { offsets, data } => {
                offsets.truncate(rows + 1);
                let end = offsets.last().copied().unwrap_or(0);
                data.truncate(end as usize);
            }
        }
    }

    /// Byte length of the uncompressed payload written for this column.
    #[must_use]
    pub fn payload_len(&self) -> u64 {
        match self {
            ColumnData::Int64(v) | ColumnData::Timestamp(v) => 8 * v.len() as u64,
            ColumnData::Float64(v) => 8 * v.len() as u64,
            ColumnData::Utf8 { offsets, data } => 8 * offsets.len() as u64 + data.len() as u64,
        }
    }

    /// Write the little-endian payload.
    pub fn write_payload<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        match self {
            ColumnData::Int64(v) | ColumnData::Timestamp(v) => {
                for x in v {
                    out.write_all(&x.to_le_bytes())?;
                }
            }
            ColumnData::Float64(v) => {
                for x in v {
                    out.write_all(&x.to_le_bytes())?;
                }
            }
            ColumnData::Utf8 { offsets, data } => {
                for o in offsets {
                    out.write_all(&o.to_le_bytes())?;
                }
                out.write_all(data)?;
            }
        }
        Ok(())
    }

    /// Decode `rows` values of `encoding` from an uncompressed payload.
    pub fn decode(encoding: PhysicalEncoding, rows: usize, payload: &[u8]) -> Result<Self> {
        let words = |count: usize| -> Result<Vec<[u8; 8]>> {
            ensure!(
                payload.len() >= count * 8,
                "payload of {} bytes too short for {count} words",
                payload.len()
            );
            Ok(payload[..count * 8]
                .chunks_exact(8)
                .map(|c| {
                    let mut w = [0u8; 8];
                    w.copy_from_slice(c);
                    w
                })
                .collect())
        };
        let column = match encoding {
            PhysicalEncoding::Int64 | PhysicalEncoding::TimestampMicros => {
                ensure!(payload.len() == rows * 8, "fixed-width payload length mismatch");
                let values = words(rows)?.into_iter().map(i64::from_le_bytes).collect();
                if encoding == PhysicalEncoding::Int64 {
                    ColumnData::Int64(values)
                } else {
                    ColumnData::Timestamp(values)
                }
            }
            PhysicalEncoding::Float64 => {
                ensure!(payload.len() == rows * 8, "fixed-width payload length mismatch");
                ColumnData::Float64(words(rows)?.into_iter().map(f64::from_le_bytes).collect())
            }
            PhysicalEncoding::VarUtf8 => {
                let offsets: Vec<u64> =
                    words(rows + 1)?.into_iter().map(u64::from_le_bytes).collect();
                let data = payload[(rows + 1) * 8..].to_vec();
                ensure!(offsets.first() == Some(&0), "text offsets must start at 0");
                ensure!(
                    offsets.windows(2).all(|w| w[0] <= w[1]),
                    "text offsets are not monotonic"
                );
                ensure!(
                    offsets.last().copied() == Some(data.len() as u64),
                    "text offsets do not cover the data section"
                );
                for w in offsets.windows(2) {
                    std::str::from_utf8(&data[w[0] as usize..w[1] as usize])
                        .context("text value is not valid UTF-8")?;
                }
                ColumnData::Utf8 { offsets, data }
            }
        };
        Ok(column)
    }
}

/// Failure to store one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// Index of the offending column, if a single field is to blame.
    pub column: Option<usize>,
    pub reason: String,
}

/// Bounded, column-major buffer of parsed rows from one source file.
pub struct HyperBlock {
    file_index: u32,
    block_seq: u32,
    rows: u64,
    bytes: u64,
    columns: Vec<ColumnData>,
    lease: Lease,
}

impl HyperBlock {
    /// Start an empty block for `file_index`, backed by `lease`.
    #[must_use]
    pub fn new(schema: &CompiledSchema, lease: Lease, file_index: u32, block_seq: u32) -> Self {
        Self {
            file_index,
            block_seq,
            rows: 0,
            bytes: 0,
            columns: schema.encodings().map(ColumnData::empty).collect(),
            lease,
        }
    }

    /// Accounted size of `record` once stored.
    #[must_use]
    pub fn record_bytes(record: &ByteRecord, schema: &CompiledSchema) -> u64 {
        schema
            .encodings()
            .zip(record.iter())
            .map(|(enc, field)| match enc.fixed_width() {
                Some(w) => w as u64,
                None => 8 + field.len() as u64,
            })
            .sum()
    }

    /// Whether a record of `record_bytes` still fits in the leased capacity.
    #[must_use]
    pub fn fits(&self, record_bytes: u64) -> bool {
        self.bytes + record_bytes <= self.capacity()
    }

    /// Parse and append one record. On failure the block is left unchanged;
    /// a record that does not [fit](Self::fits) is refused.
    pub fn push_record(
        &mut self,
        record: &ByteRecord,
        record_bytes: u64,
    ) -> std::result::Result<(), FieldError> {
        if !self.fits(record_bytes) {
            return Err(FieldError {
                column: None,
                reason: format!(
                    "record needs {record_bytes} bytes, {} of {} left in block",
                    self.capacity() - self.bytes,
                    self.capacity()
                ),
            });
        }
        if record.len() != self.columns.len() {
            return Err(FieldError {
                column: None,
                reason: format!(
                    "expected {} fields, found {}",
                    self.columns.len(),
                    record.len()
                ),
            });
        }
        let mut failure = None;
        for (idx, (column, field)) in self.columns.iter_mut().zip(record.iter()).enumerate() {
            if let Err(reason) = push_field(column, field) {
                failure = Some(FieldError {
                    column: Some(idx),
                    reason,
                });
                break;
            }
        }
        if let Some(err) = failure {
            let keep = self.rows as usize;
            for column in &mut self.columns {
                column.truncate(keep);
            }
            return Err(err);
        }
        self.rows += 1;
        self.bytes += record_bytes;
        Ok(())
    }

    #[must_use]
    pub fn file_index(&self) -> u32 {
        self.file_index
    }

    #[must_use]
    pub fn block_seq(&self) -> u32 {
        self.block_seq
    }

    #[must_use]
    pub fn rows(&self) -> u64 {
        self.rows
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Accounted bytes currently buffered.
    #[must_use]
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Capacity reserved from the pool.
    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.lease.bytes()
    }

    #[must_use]
    pub fn columns(&self) -> &[ColumnData] {
        &self.columns
    }

    #[must_use]
    pub fn worker_id(&self) -> usize {
        self.lease.worker_id()
    }
}

impl std::fmt::Debug for HyperBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HyperBlock")
            .field("file_index", &self.file_index)
            .field("block_seq", &self.block_seq)
            .field("rows", &self.rows)
            .field("bytes", &self.bytes)
            .field("capacity", &self.capacity())
            .finish()
    }
}

fn push_field(column: &mut ColumnData, field: &[u8]) -> std::result::Result<(), String> {
    match column {
        ColumnData::Int64(v) => v.push(parse::parse_int(field)?),
        ColumnData::Float64(v) => v.push(parse::parse_float(field)?),
        ColumnData::Timestamp(v) => v.push(parse::parse_timestamp_micros(field)?),
        ColumnData::Utf8 { offsets, data } => {
            data.extend_from_slice(parse::parse_utf8(field)?.as_bytes());
            offsets.push(data.len() as u64);
        }
    }
    Ok(())
}
