//! Cancellation handle threaded through every operation.
//!
//! The core is synchronous; cancellation is checked at external
//! boundaries (driver calls). A fired handle surfaces as an interrupted
//! I/O error and any open transaction rolls back on the way out.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// Deadline plus abort signal.
#[derive(Clone, Default)]
pub struct Cancel {
    deadline: Option<Instant>,
    aborted: Option<Arc<AtomicBool>>,
}

impl Cancel {
    /// A handle that never fires.
    pub fn never() -> Self {
        Self::default()
    }

    /// A handle that fires once `timeout` has elapsed.
    pub fn with_deadline(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            aborted: None,
        }
    }

    /// A handle with an external abort flag (and optional deadline).
    pub fn with_abort(flag: Arc<AtomicBool>) -> Self {
        Self {
            deadline: None,
            aborted: Some(flag),
        }
    }

    /// Adds a deadline to an existing handle.
    pub fn deadline(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    /// Errors if the deadline passed or the abort flag is set.
    pub fn check(&self) -> Result<()> {
        if let Some(flag) = &self.aborted {
            if flag.load(Ordering::Relaxed) {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::Interrupted,
                    "operation aborted",
                )));
            }
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "deadline exceeded",
                )));
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Cancel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cancel")
            .field("deadline", &self.deadline)
            .field(
                "aborted",
                &self
                    .aborted
                    .as_ref()
                    .map(|f| f.load(Ordering::Relaxed)),
            )
            .finish()
    }
}
