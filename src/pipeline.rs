//! The copy run orchestrator.
//!
//! A [`HyperCopy`] request moves through
//! `Idle -> Resolving -> Validating -> Streaming -> Finalizing -> Completed`,
//! or straight to `Failed` from any stage. Streaming wires the pieces together:
//! a rayon pool of parse workers pulls files off a shared cursor and fills
//! budgeted blocks, a dedicated writer thread appends them to the container,
//! and the first fatal error cancels everyone else.

use crate::block::HyperBlock;
use crate::cancel::{CancelToken, FailureSlot, Interrupt, panic_message};
use crate::config::{CompiledConfig, RawConfig, compile_config};
use crate::container::ContainerWriter;
use crate::error::{HyperError, Result};
use crate::io::glob::{self, FileSet};
use crate::pool::BufferPool;
use crate::profiler::{self, SystemReport};
use crate::schema::{CompiledSchema, compile_schema};
use crate::worker::{WorkerContext, WorkerStats, run_worker};
use log::{debug, info, warn};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicUsize;
use std::sync::mpsc::{self, Receiver};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

/// Lifecycle of one run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Resolving,
    Validating,
    Streaming,
    Finalizing,
    Completed,
    Failed,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Idle => "idle",
            PipelineState::Resolving => "resolving",
            PipelineState::Validating => "validating",
            PipelineState::Streaming => "streaming",
            PipelineState::Finalizing => "finalizing",
            PipelineState::Completed => "completed",
            PipelineState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// What a successful run did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunSummary {
    pub rows_written: u64,
    pub files_processed: usize,
    pub blocks_written: usize,
    /// Container size; 0 when no file matched and nothing was created.
    pub bytes_written: u64,
    /// Highest simultaneous block reservation seen by the pool.
    pub peak_buffered_bytes: u64,
    pub budget_bytes: u64,
    pub elapsed: Duration,
}

enum SchemaInput {
    Json(String),
    Compiled(CompiledSchema),
}

enum ConfigInput {
    Json(String),
    Raw(RawConfig),
}

/// One copy request: sources, destination, schema and tuning.
pub struct HyperCopy {
    pattern: String,
    output: PathBuf,
    schema: SchemaInput,
    config: ConfigInput,
    report: SystemReport,
}

impl HyperCopy {
    /// Request from the four boundary strings, tuned for this host.
    pub fn from_json(
        pattern: impl Into<String>,
        output: impl Into<PathBuf>,
        schema_json: impl Into<String>,
        config_json: impl Into<String>,
    ) -> Self {
        Self {
            pattern: pattern.into(),
            output: output.into(),
            schema: SchemaInput::Json(schema_json.into()),
            config: ConfigInput::Json(config_json.into()),
            report: profiler::profile().clone(),
        }
    }

    /// Request from already-typed inputs, tuned for this host.
    pub fn new(
        pattern: impl Into<String>,
        output: impl Into<PathBuf>,
        schema: CompiledSchema,
        config: RawConfig,
    ) -> Self {
        Self {
            pattern: pattern.into(),
            output: output.into(),
            schema: SchemaInput::Compiled(schema),
            config: ConfigInput::Raw(config),
            report: profiler::profile().clone(),
        }
    }

    /// Tune against `report` instead of the detected host.
    #[must_use]
    pub fn with_report(mut self, report: SystemReport) -> Self {
        self.report = report;
        self
    }

    /// Execute the run.
    ///
    /// # Errors
    /// The first fatal [`HyperError`] of the run. A container left behind by a
    /// failed run has no footer and must be discarded.
    pub fn run(&self) -> Result<RunSummary> {
        let started = Instant::now();
        let mut state = StateTracker::default();
        match self.execute(&mut state, started) {
            Ok(summary) => {
                state.advance(PipelineState::Completed);
                info!(
                    "copied {} rows from {} files into {} in {:?}",
                    summary.rows_written,
                    summary.files_processed,
                    self.output.display(),
                    summary.elapsed
                );
                debug!(
                    "{} blocks written, peak buffer {} of {} bytes",
                    summary.blocks_written,
                    summary.peak_buffered_bytes,
                    summary.budget_bytes
                );
                Ok(summary)
            }
            Err(err) => {
                state.advance(PipelineState::Failed);
                warn!("copy into {} failed ({}): {err}", self.output.display(), err.code());
                Err(err)
            }
        }
    }

    fn execute(&self, state: &mut StateTracker, started: Instant) -> Result<RunSummary> {
        state.advance(PipelineState::Resolving);
        let files = glob::resolve(&self.pattern)?;
        debug!("{} matched {} files", self.pattern, files.len());

        state.advance(PipelineState::Validating);
        let schema = match &self.schema {
            SchemaInput::Json(json) => compile_schema(json)?,
            SchemaInput::Compiled(schema) => schema.clone(),
        };
        let raw = match &self.config {
            ConfigInput::Json(json) => RawConfig::from_json(json)?,
            ConfigInput::Raw(raw) => raw.clone(),
        };
        let config = compile_config(&raw, &self.report)?;
        let budget = config.budget_bytes(&self.report);
        check_output_path(&self.output)?;

        if files.is_empty() {
            info!("{} matched no files; nothing to copy", self.pattern);
            return Ok(RunSummary {
                rows_written: 0,
                files_processed: 0,
                blocks_written: 0,
                bytes_written: 0,
                peak_buffered_bytes: 0,
                budget_bytes: budget,
                elapsed: started.elapsed(),
            });
        }

        prepare_output_dir(&self.output)?;
        let cancel = CancelToken::new();
        let pool = BufferPool::new(budget, config.block_capacity(&self.report), cancel.clone())?;
        let writer = ContainerWriter::create(
            &self.output,
            &schema,
            config.compression,
            config.compression_level,
        )?;

        state.advance(PipelineState::Streaming);
        let (writer, stats) = stream(&schema, &config, &files, &pool, &cancel, writer)?;

        state.advance(PipelineState::Finalizing);
        let parsed: u64 = stats.iter().map(|s| s.rows).sum();
        if parsed != writer.rows_written() {
            return Err(HyperError::Channel(format!(
                "workers parsed {parsed} rows but the writer received {}",
                writer.rows_written()
            )));
        }
        let sealed = writer.finalize()?;
        let pool_stats = pool.stats();

        Ok(RunSummary {
            rows_written: sealed.total_rows,
            files_processed: stats.iter().map(|s| s.files).sum(),
            blocks_written: sealed.blocks,
            bytes_written: sealed.bytes_written,
            peak_buffered_bytes: pool_stats.peak_reserved_bytes,
            budget_bytes: budget,
            elapsed: started.elapsed(),
        })
    }
}

#[derive(Default)]
struct StateTracker {
    current: Option<PipelineState>,
}

impl StateTracker {
    fn advance(&mut self, next: PipelineState) {
        let from = self.current.unwrap_or(PipelineState::Idle);
        info!("pipeline {from} -> {next}");
        self.current = Some(next);
    }
}

/// Reject output paths that can never be a container file.
fn check_output_path(output: &Path) -> Result<()> {
    if output.as_os_str().is_empty() {
        return Err(HyperError::InvalidOutput("output path is empty".into()));
    }
    if output.is_dir() {
        return Err(HyperError::InvalidOutput(format!(
            "{} is a directory",
            output.display()
        )));
    }
    Ok(())
}

fn prepare_output_dir(output: &Path) -> Result<()> {
    match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent)
            .map_err(|e| {
                HyperError::InvalidOutput(format!("cannot create {}: {e}", parent.display()))
            }),
        _ => Ok(()),
    }
}

/// Number of parse workers for this run.
fn worker_count(config: &CompiledConfig, files: &FileSet, pool: &BufferPool) -> usize {
    let by_budget = (pool.budget_bytes() / pool.block_capacity()).max(1);
    let by_budget = usize::try_from(by_budget).unwrap_or(usize::MAX);
    let threads = usize::try_from(config.max_threads).unwrap_or(1);
    threads.min(files.len()).min(by_budget).max(1)
}

fn stream(
    schema: &CompiledSchema,
    config: &CompiledConfig,
    files: &FileSet,
    pool: &BufferPool,
    cancel: &CancelToken,
    writer: ContainerWriter,
) -> Result<(ContainerWriter, Vec<WorkerStats>)> {
    let workers = worker_count(config, files, pool);
    info!(
        "streaming {} files with {workers} workers, {} byte blocks, {} byte budget",
        files.len(),
        pool.block_capacity(),
        pool.budget_bytes()
    );
    let threads = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("hypercopy-parse-{i}"))
        .build()
        .map_err(|e| HyperError::Channel(format!("start parse workers: {e}")))?;

    let failures = FailureSlot::new();
    let abort = |err: HyperError| {
        failures.fail(err, cancel);
        pool.wake_all();
    };
    let cursor = AtomicUsize::new(0);
    let ctx = WorkerContext {
        schema,
        config,
        files,
        cursor: &cursor,
        pool,
        cancel,
    };
    let finished = Mutex::new(Vec::with_capacity(workers));
    let (tx, rx) = mpsc::sync_channel::<HyperBlock>(workers);
    // Once every worker returns, the last sender is gone and the writer drains
    // what is queued and stops.
    let senders: Vec<_> = (0..workers).map(|_| tx.clone()).collect();
    drop(tx);

    let drained = thread::scope(|s| {
        // `rx` is dropped only after a writer failure is recorded, so workers
        // blocked in `send` see the run as cancelled rather than as a broken channel.
        let writer_thread = s.spawn(move || {
            match panic::catch_unwind(AssertUnwindSafe(|| drain(writer, &rx, cancel, pool))) {
                Ok(Ok(writer)) => Some(writer),
                Ok(Err(Interrupt::Failed(err))) => {
                    abort(err);
                    None
                }
                Ok(Err(Interrupt::Cancelled)) => None,
                Err(payload) => {
                    abort(HyperError::WorkerPanic(format!(
                        "container writer panicked: {}",
                        panic_message(payload.as_ref())
                    )));
                    None
                }
            }
        });

        threads.scope(|scope| {
            for (worker_id, tx) in senders.into_iter().enumerate() {
                let (ctx, finished, abort) = (&ctx, &finished, &abort);
                scope.spawn(move |_| {
                    let outcome =
                        panic::catch_unwind(AssertUnwindSafe(|| run_worker(worker_id, ctx, tx)));
                    match outcome {
                        Ok(Ok(stats)) => finished
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .push(stats),
                        Ok(Err(Interrupt::Cancelled)) => {
                            debug!("worker {worker_id} stood down after cancellation");
                        }
                        Ok(Err(Interrupt::Failed(err))) => abort(err),
                        Err(payload) => abort(HyperError::WorkerPanic(format!(
                            "worker {worker_id} panicked: {}",
                            panic_message(payload.as_ref())
                        ))),
                    }
                });
            }
        });

        writer_thread.join().unwrap_or_else(|payload| {
            abort(HyperError::WorkerPanic(format!(
                "container writer thread died: {}",
                panic_message(payload.as_ref())
            )));
            None
        })
    });

    if let Some(err) = failures.take() {
        return Err(err);
    }
    let writer = drained.ok_or_else(|| {
        HyperError::Channel("container writer stopped without reporting a failure".into())
    })?;
    let stats = finished
        .into_inner()
        .unwrap_or_else(PoisonError::into_inner);
    Ok((writer, stats))
}

/// Writer loop: append every block until all senders hang up.
fn drain(
    mut writer: ContainerWriter,
    rx: &Receiver<HyperBlock>,
    cancel: &CancelToken,
    pool: &BufferPool,
) -> std::result::Result<ContainerWriter, Interrupt> {
    for block in rx {
        if cancel.is_cancelled() {
            pool.release(block);
            return Err(Interrupt::Cancelled);
        }
        writer.submit(block)?;
    }
    Ok(writer)
}

/// Run a copy and collapse the outcome into the boundary result code: the row
/// count on success, a negative [`HyperError::code`] on failure.
pub fn hyper_copy(pattern: &str, output: &str, schema_json: &str, config_json: &str) -> i64 {
    match HyperCopy::from_json(pattern, output, schema_json, config_json).run() {
        Ok(summary) => i64::try_from(summary.rows_written).unwrap_or(i64::MAX),
        Err(err) => err.code(),
    }
}
