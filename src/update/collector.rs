// Wed Jan 14 2026 - Alex

use crate::error::CacheError;
use itertools::Itertools;
use parking_lot::Mutex;
use std::sync::Arc;

/// Append-only record of recoverable failures for one rebuild run.
#[derive(Clone, Default)]
pub struct ErrorCollector {
    errors: Arc<Mutex<Vec<CacheError>>>,
}

impl ErrorCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, error: CacheError) {
        log::debug!("Collected rebuild error: {}", error);
        self.errors.lock().push(error);
    }

    pub fn len(&self) -> usize {
        self.errors.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.lock().is_empty()
    }

    pub fn messages(&self) -> Vec<String> {
        self.errors.lock().iter().map(|e| e.to_string()).collect()
    }

    pub fn summary(&self) -> String {
        self.errors.lock().iter().map(|e| e.to_string()).join("; ")
    }

    /// Takes every collected error, leaving the collector empty.
    pub fn drain(&self) -> Vec<CacheError> {
        std::mem::take(&mut *self.errors.lock())
    }
}
