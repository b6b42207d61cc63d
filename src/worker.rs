//! Parallel parse workers.
//!
//! Workers claim whole files from a shared cursor, so every file is parsed by
//! exactly one worker and its rows keep source order. Each file is streamed in
//! reads of one block's capacity (at most [`MAX_READ_CHUNK`]), split into
//! records by the `csv` reader (quoted delimiters and newlines stay inside
//! fields), and coerced into the worker's current [`HyperBlock`]. Full blocks,
//! and the last partial block of each file, are sent to the writer.

use crate::block::HyperBlock;
use crate::cancel::{CancelToken, Interrupt};
use crate::config::CompiledConfig;
use crate::error::HyperError;
use crate::io::compression::{MAX_READ_CHUNK, open_source};
use crate::io::glob::FileSet;
use crate::pool::BufferPool;
use crate::schema::CompiledSchema;
use csv::{ByteRecord, ReaderBuilder};
use log::debug;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::SyncSender;

/// Records parsed between cancellation checks inside one block.
const CANCEL_CHECK_INTERVAL: u64 = 8_192;

/// What one worker got through.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub files: usize,
    pub rows: u64,
    pub blocks: u64,
}

/// Shared, read-only inputs for every worker of a run.
pub struct WorkerContext<'a> {
    pub schema: &'a CompiledSchema,
    pub config: &'a CompiledConfig,
    pub files: &'a FileSet,
    pub cursor: &'a AtomicUsize,
    pub pool: &'a BufferPool,
    pub cancel: &'a CancelToken,
}

impl WorkerContext<'_> {
    fn next_file(&self) -> Option<usize> {
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed);
        (idx < self.files.len()).then_some(idx)
    }

    fn check_cancelled(&self) -> Result<(), Interrupt> {
        if self.cancel.is_cancelled() {
            Err(Interrupt::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Parse files until the set is drained, sending blocks through `tx`.
///
/// # Errors
/// [`Interrupt::Failed`] for this worker's own fault, [`Interrupt::Cancelled`]
/// when a sibling failed first.
pub fn run_worker(
    worker_id: usize,
    ctx: &WorkerContext<'_>,
    tx: SyncSender<HyperBlock>,
) -> Result<WorkerStats, Interrupt> {
    let mut stats = WorkerStats::default();
    while let Some(file_index) = ctx.next_file() {
        ctx.check_cancelled()?;
        let path = ctx
            .files
            .get(file_index)
            .ok_or_else(|| HyperError::Channel(format!("file index {file_index} out of range")))?;
        let (rows, blocks) = parse_file(worker_id, ctx, &tx, file_index, path)?;
        debug!(
            "worker {worker_id} parsed {} ({rows} rows, {blocks} blocks)",
            path.display()
        );
        stats.files += 1;
        stats.rows += rows;
        stats.blocks += blocks;
    }
    Ok(stats)
}

fn parse_file(
    worker_id: usize,
    ctx: &WorkerContext<'_>,
    tx: &SyncSender<HyperBlock>,
    file_index: usize,
    path: &Path,
) -> Result<(u64, u64), Interrupt> {
    // Read buffers are not pool-accounted; size them to one block.
    let chunk = usize::try_from(ctx.pool.block_capacity())
        .unwrap_or(MAX_READ_CHUNK)
        .min(MAX_READ_CHUNK);
    let source = open_source(path, chunk)
        .map_err(|e| HyperError::WorkerPanic(format!("{e:#}")))?;
    let mut reader = ReaderBuilder::new()
        .delimiter(ctx.config.delimiter)
        .quote(ctx.config.quote_char)
        .has_headers(ctx.config.has_header)
        .flexible(true)
        .buffer_capacity(chunk.max(8 * 1024))
        .from_reader(source);

    if ctx.config.has_header {
        let header = reader
            .byte_headers()
            .map_err(|e| csv_failure(path, 0, e))?;
        if !header.is_empty() && header.len() != ctx.schema.len() {
            return Err(HyperError::Parse {
                path: path.to_path_buf(),
                record: 0,
                column: None,
                reason: format!(
                    "header has {} fields, schema declares {}",
                    header.len(),
                    ctx.schema.len()
                ),
            }
            .into());
        }
    }

    let file_index = u32::try_from(file_index)
        .map_err(|_| HyperError::Channel(format!("file index {file_index} exceeds u32")))?;
    let mut record = ByteRecord::new();
    let mut block: Option<HyperBlock> = None;
    let mut block_seq = 0u32;
    let mut rows = 0u64;
    let mut blocks = 0u64;

    loop {
        let more = reader
            .read_byte_record(&mut record)
            .map_err(|e| csv_failure(path, rows + 1, e))?;
        if !more {
            break;
        }
        rows += 1;
        if rows % CANCEL_CHECK_INTERVAL == 0 {
            ctx.check_cancelled()?;
        }

        let need = HyperBlock::record_bytes(&record, ctx.schema);
        if block.as_ref().is_some_and(|b| !b.fits(need))
            && let Some(full) = block.take()
        {
            submit(ctx, tx, full)?;
            blocks += 1;
            block_seq += 1;
        }
        if block.is_none() {
            if need > ctx.pool.budget_bytes() {
                return Err(HyperError::Parse {
                    path: path.to_path_buf(),
                    record: rows,
                    column: None,
                    reason: format!(
                        "record needs {need} bytes, more than the {}-byte memory budget",
                        ctx.pool.budget_bytes()
                    ),
                }
                .into());
            }
            // Only ever wait on the pool while holding no block.
            let lease = ctx.pool.acquire_bytes(worker_id, need)?;
            block = Some(HyperBlock::new(ctx.schema, lease, file_index, block_seq));
        }
        if let Some(current) = block.as_mut() {
            current
                .push_record(&record, need)
                .map_err(|fe| HyperError::Parse {
                    path: path.to_path_buf(),
                    record: rows,
                    column: fe
                        .column
                        .and_then(|idx| ctx.schema.columns().get(idx))
                        .map(|c| c.name.clone()),
                    reason: fe.reason,
                })?;
        }
    }

    if let Some(last) = block.take()
        && !last.is_empty()
    {
        submit(ctx, tx, last)?;
        blocks += 1;
    }
    Ok((rows, blocks))
}

fn submit(
    ctx: &WorkerContext<'_>,
    tx: &SyncSender<HyperBlock>,
    block: HyperBlock,
) -> Result<(), Interrupt> {
    ctx.check_cancelled()?;
    tx.send(block).map_err(|_| {
        if ctx.cancel.is_cancelled() {
            Interrupt::Cancelled
        } else {
            Interrupt::Failed(HyperError::Channel(
                "container writer stopped receiving blocks".into(),
            ))
        }
    })
}

/// Classify a reader failure: I/O faults abort the run as a worker fault,
/// anything else is malformed input.
fn csv_failure(path: &Path, record: u64, err: csv::Error) -> Interrupt {
    let failure = match err.kind() {
        csv::ErrorKind::Io(io) => HyperError::WorkerPanic(format!(
            "I/O failure reading {} near record {record}: {io}",
            path.display()
        )),
        _ => HyperError::Parse {
            path: path.to_path_buf(),
            record,
            column: None,
            reason: err.to_string(),
        },
    };
    Interrupt::Failed(failure)
}
