use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::ScanError;

/// Cooperative cancellation token shared by every unit of work in a scan.
///
/// Clones share one flag. Setting it never preempts in-flight I/O; loops poll
/// [`InterruptionChecker::check`] before starting the next resource.
#[derive(Debug, Clone, Default)]
pub struct InterruptionChecker {
    interrupted: Arc<AtomicBool>,
}

impl InterruptionChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::Release);
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Acquire)
    }

    pub fn check(&self) -> Result<(), ScanError> {
        if self.is_interrupted() {
            return Err(ScanError::Interrupted);
        }
        Ok(())
    }
}
