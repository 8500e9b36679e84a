//! Cooperative cancellation and progress reporting.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{Result, TagError};

#[derive(Debug, Default)]
struct Shared {
    aborted: AtomicBool,
    percentage: AtomicU8,
    step: Mutex<String>,
}

/// A cloneable handle used to observe and cancel long-running operations.
///
/// Engines call [`AbortableProgressFeedback::try_continue`] at well-defined
/// points (between structural elements and between copied blocks); once
/// [`AbortableProgressFeedback::abort`] has been called from any clone, the
/// running operation unwinds with [`TagError::OperationAbort`] without
/// mutating the target file.
#[derive(Debug, Clone, Default)]
pub struct AbortableProgressFeedback {
    shared: Arc<Shared>,
}

impl AbortableProgressFeedback {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation of the running operation.
    pub fn abort(&self) {
        self.shared.aborted.store(true, Ordering::Relaxed);
    }

    pub fn is_aborted(&self) -> bool {
        self.shared.aborted.load(Ordering::Relaxed)
    }

    /// Returns `Err(OperationAbort)` once cancellation has been requested.
    pub fn try_continue(&self) -> Result<()> {
        if self.is_aborted() {
            Err(TagError::OperationAbort)
        } else {
            Ok(())
        }
    }

    pub fn update_step(&self, step: impl Into<String>) {
        if let Ok(mut current) = self.shared.step.lock() {
            *current = step.into();
        }
        self.shared.percentage.store(0, Ordering::Relaxed);
    }

    pub fn update_percentage(&self, percentage: u8) {
        self.shared
            .percentage
            .store(percentage.min(100), Ordering::Relaxed);
    }

    pub fn step(&self) -> String {
        self.shared
            .step
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    pub fn percentage(&self) -> u8 {
        self.shared.percentage.load(Ordering::Relaxed)
    }
}
