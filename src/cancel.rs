use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::GeoError;

/// Shared stop flag checked between pipeline steps.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<(), GeoError> {
        if self.is_cancelled() {
            return Err(GeoError::Cancelled);
        }
        Ok(())
    }
}
