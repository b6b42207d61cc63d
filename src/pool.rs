//! Memory-budgeted block pool.
//!
//! The pool hands out [`Lease`]s, each reserving one block's worth of capacity
//! against a global byte budget. When the budget is spent, [`BufferPool::acquire`]
//! parks the calling worker until the writer flushes a block and its lease is
//! dropped. This is the run's backpressure: parsing can never outrun flushing by
//! more than the budget.
//!
//! Leases release on drop, so a block freed on any path (flushed, discarded on
//! cancellation, unwound by a panic) returns its capacity.

use crate::block::HyperBlock;
use crate::cancel::{CancelToken, Interrupt};
use crate::error::HyperError;
use log::debug;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

/// How long a parked worker sleeps before re-checking cancellation.
const CANCEL_POLL: Duration = Duration::from_millis(25);

/// Point-in-time accounting snapshot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub budget_bytes: u64,
    pub block_capacity: u64,
    pub reserved_bytes: u64,
    pub peak_reserved_bytes: u64,
    pub leases_granted: u64,
    pub outstanding: usize,
}

struct PoolState {
    reserved: u64,
    peak: u64,
    granted: u64,
    outstanding: usize,
}

struct PoolShared {
    budget: u64,
    block_capacity: u64,
    state: Mutex<PoolState>,
    freed: Condvar,
    cancel: CancelToken,
}

/// Shared, budgeted source of block capacity.
#[derive(Clone)]
pub struct BufferPool {
    shared: Arc<PoolShared>,
}

impl BufferPool {
    /// Create a pool of `budget_bytes` handing out `block_capacity`-byte leases.
    ///
    /// # Errors
    /// [`HyperError::Config`] when the budget cannot hold a single block.
    pub fn new(
        budget_bytes: u64,
        block_capacity: u64,
        cancel: CancelToken,
    ) -> Result<Self, HyperError> {
        if block_capacity == 0 || block_capacity > budget_bytes {
            return Err(HyperError::Config(format!(
                "memory budget of {budget_bytes} bytes cannot hold a {block_capacity}-byte block"
            )));
        }
        Ok(Self {
            shared: Arc::new(PoolShared {
                budget: budget_bytes,
                block_capacity,
                state: Mutex::new(PoolState {
                    reserved: 0,
                    peak: 0,
                    granted: 0,
                    outstanding: 0,
                }),
                freed: Condvar::new(),
                cancel,
            }),
        })
    }

    #[must_use]
    pub fn block_capacity(&self) -> u64 {
        self.shared.block_capacity
    }

    #[must_use]
    pub fn budget_bytes(&self) -> u64 {
        self.shared.budget
    }

    /// Reserve one block of capacity, blocking while the budget is exhausted.
    ///
    /// # Errors
    /// [`Interrupt::Cancelled`] once the run is cancelled; lock poisoning is
    /// reported as a channel failure.
    pub fn acquire(&self, worker_id: usize) -> Result<Lease, Interrupt> {
        self.acquire_bytes(worker_id, 0)
    }

    /// Reserve at least `min_bytes`, and never less than one block.
    ///
    /// # Errors
    /// As [`BufferPool::acquire`], plus [`HyperError::Config`] when
    /// `min_bytes` exceeds the whole budget.
    pub fn acquire_bytes(&self, worker_id: usize, min_bytes: u64) -> Result<Lease, Interrupt> {
        let shared = &self.shared;
        let bytes = min_bytes.max(shared.block_capacity);
        if bytes > shared.budget {
            return Err(HyperError::Config(format!(
                "{bytes}-byte reservation exceeds the {}-byte memory budget",
                shared.budget
            ))
            .into());
        }
        let mut state = shared
            .state
            .lock()
            .map_err(|_| HyperError::poisoned("buffer pool"))?;
        loop {
            if shared.cancel.is_cancelled() {
                return Err(Interrupt::Cancelled);
            }
            if state.reserved + bytes <= shared.budget {
                state.reserved += bytes;
                state.peak = state.peak.max(state.reserved);
                state.granted += 1;
                state.outstanding += 1;
                return Ok(Lease {
                    bytes,
                    worker_id,
                    shared: Arc::clone(shared),
                });
            }
            debug!(
                "worker {worker_id} waiting for {bytes} budget bytes ({} of {} reserved)",
                state.reserved, shared.budget
            );
            state = shared
                .freed
                .wait_timeout(state, CANCEL_POLL)
                .map_err(|_| HyperError::poisoned("buffer pool"))?
                .0;
        }
    }

    /// Return a flushed block's capacity to the pool.
    pub fn release(&self, block: HyperBlock) {
        drop(block);
    }

    /// Wake every parked worker, e.g. after cancelling the run.
    pub fn wake_all(&self) {
        self.shared.freed.notify_all();
    }

    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let state = self
            .shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        PoolStats {
            budget_bytes: self.shared.budget,
            block_capacity: self.shared.block_capacity,
            reserved_bytes: state.reserved,
            peak_reserved_bytes: state.peak,
            leases_granted: state.granted,
            outstanding: state.outstanding,
        }
    }
}

/// One block's reservation against the pool budget.
pub struct Lease {
    bytes: u64,
    worker_id: usize,
    shared: Arc<PoolShared>,
}

impl Lease {
    /// Reserved capacity in bytes.
    #[must_use]
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Worker that acquired this lease.
    #[must_use]
    pub fn worker_id(&self) -> usize {
        self.worker_id
    }
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("bytes", &self.bytes)
            .field("worker_id", &self.worker_id)
            .finish()
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        {
            let mut state = self
                .shared
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            state.reserved = state.reserved.saturating_sub(self.bytes);
            state.outstanding = state.outstanding.saturating_sub(1);
        }
        self.shared.freed.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{CompiledSchema, LogicalType};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    #[test]
    fn rejects_budget_smaller_than_a_block() {
        assert!(BufferPool::new(10, 11, CancelToken::new()).is_err());
        assert!(BufferPool::new(10, 0, CancelToken::new()).is_err());
        assert!(BufferPool::new(10, 10, CancelToken::new()).is_ok());
    }

    #[test]
    fn leases_are_released_on_drop() {
        let pool = BufferPool::new(300, 100, CancelToken::new()).unwrap();
        let a = pool.acquire(0).unwrap();
        let b = pool.acquire(1).unwrap();
        assert_eq!(pool.stats().reserved_bytes, 200);
        drop(a);
        assert_eq!(pool.stats().reserved_bytes, 100);
        drop(b);
        let stats = pool.stats();
        assert_eq!(stats.reserved_bytes, 0);
        assert_eq!(stats.peak_reserved_bytes, 200);
        assert_eq!(stats.leases_granted, 2);
        assert_eq!(stats.outstanding, 0);
    }

    #[test]
    fn release_returns_block_capacity() {
        let schema = CompiledSchema::new([("id", LogicalType::Int64)]).unwrap();
        let pool = BufferPool::new(100, 100, CancelToken::new()).unwrap();
        let block = HyperBlock::new(&schema, pool.acquire(3).unwrap(), 0, 0);
        assert_eq!(block.worker_id(), 3);
        assert_eq!(pool.stats().outstanding, 1);
        pool.release(block);
        assert_eq!(pool.stats().reserved_bytes, 0);
        assert!(pool.acquire(0).is_ok());
    }

    #[test]
    fn sized_leases_cover_large_records_within_budget() {
        let pool = BufferPool::new(1000, 100, CancelToken::new()).unwrap();
        let small = pool.acquire_bytes(0, 40).unwrap();
        assert_eq!(small.bytes(), 100);
        let large = pool.acquire_bytes(1, 700).unwrap();
        assert_eq!(large.bytes(), 700);
        assert_eq!(pool.stats().reserved_bytes, 800);

        let err = pool.acquire_bytes(2, 1001).unwrap_err();
        assert!(matches!(err, Interrupt::Failed(e) if e.code() == -4));
        drop((small, large));
        assert_eq!(pool.stats().reserved_bytes, 0);
    }

    #[test]
    fn acquire_blocks_until_capacity_is_freed() {
        let pool = BufferPool::new(100, 100, CancelToken::new()).unwrap();
        let held = pool.acquire(0).unwrap();
        let acquired = Arc::new(AtomicBool::new(false));

        let waiter = {
            let pool = pool.clone();
            let acquired = Arc::clone(&acquired);
            thread::spawn(move || {
                let lease = pool.acquire(1).unwrap();
                acquired.store(true, Ordering::SeqCst);
                drop(lease);
            })
        };

        thread::sleep(Duration::from_millis(100));
        assert!(!acquired.load(Ordering::SeqCst));
        assert_eq!(pool.stats().peak_reserved_bytes, 100);

        drop(held);
        waiter.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
        assert_eq!(pool.stats().peak_reserved_bytes, 100);
    }

    #[test]
    fn cancellation_wakes_parked_workers() {
        let cancel = CancelToken::new();
        let pool = BufferPool::new(100, 100, cancel.clone()).unwrap();
        let _held = pool.acquire(0).unwrap();

        let waiter = {
            let pool = pool.clone();
            thread::spawn(move || matches!(pool.acquire(1), Err(Interrupt::Cancelled)))
        };
        thread::sleep(Duration::from_millis(50));
        cancel.cancel();
        pool.wake_all();
        assert!(waiter.join().unwrap());
    }
}
