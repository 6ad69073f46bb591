use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Result, WvcError};

/// Cancellation signal threaded through every top-level operation. Checked
/// at I/O suspension points (object-store and remote calls) and inside the
/// vector-transfer worker pools, where a failing sibling cancels the rest.
#[derive(Debug, Clone, Default)]
pub struct Context {
    cancelled: Arc<AtomicBool>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// The shared flag, for wiring to a signal handler.
    pub fn flag(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(WvcError::Cancelled)
        } else {
            Ok(())
        }
    }
}
