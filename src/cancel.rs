//! Run-wide cancellation and first-failure aggregation.

use crate::error::HyperError;
use log::warn;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Shared abort flag, checked by workers at chunk boundaries.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Why a task stopped before finishing its work.
#[derive(Debug)]
pub enum Interrupt {
    /// A sibling failed first; this task just stood down.
    Cancelled,
    /// This task hit the failure.
    Failed(HyperError),
}

impl From<HyperError> for Interrupt {
    fn from(err: HyperError) -> Self {
        Interrupt::Failed(err)
    }
}

/// Keeps the first fatal error of a run and drops the rest.
#[derive(Clone, Default)]
pub struct FailureSlot {
    first: Arc<Mutex<Option<HyperError>>>,
}

impl FailureSlot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `err` unless something failed earlier, then trip `cancel`.
    pub fn fail(&self, err: HyperError, cancel: &CancelToken) {
        {
            let mut slot = self.first.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.is_none() {
                warn!("run aborted: {err}");
                *slot = Some(err);
            }
        }
        cancel.cancel();
    }

    /// Take the recorded failure, if any.
    pub fn take(&self) -> Option<HyperError> {
        self.first
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// Best-effort text from a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
