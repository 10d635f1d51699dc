// Tue Jan 13 2026 - Alex

use crate::datasource::DatasourceError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Datasource error: {0}")]
    Datasource(#[from] DatasourceError),
    #[error("Update step '{step}' failed: {source}")]
    Step {
        step: &'static str,
        #[source]
        source: Box<CacheError>,
    },
    #[error("Update step '{step}' panicked: {message}")]
    StepPanicked { step: &'static str, message: String },
    #[error("Worker for procedure '{procedure}' failed: {source}")]
    Worker {
        procedure: String,
        #[source]
        source: DatasourceError,
    },
    #[error("Worker for procedure '{procedure}' panicked: {message}")]
    WorkerPanicked { procedure: String, message: String },
    #[error("Cache rebuild degraded with {errors} error(s)")]
    RebuildDegraded { errors: usize },
    #[error("Initial cache rebuild produced no usable content: {0}")]
    RebuildFatal(String),
    #[error("Cache rebuild failed: {0}")]
    PipelineFailed(String),
    #[error("Cache controller is shutting down")]
    ShuttingDown,
}

impl CacheError {
    pub fn step(step: &'static str, source: CacheError) -> Self {
        CacheError::Step {
            step,
            source: Box::new(source),
        }
    }

    /// Procedure identifier a worker error is tagged with, if any.
    pub fn procedure(&self) -> Option<&str> {
        match self {
            CacheError::Worker { procedure, .. } | CacheError::WorkerPanicked { procedure, .. } => {
                Some(procedure)
            }
            _ => None,
        }
    }

    pub fn step_name(&self) -> Option<&'static str> {
        match self {
            CacheError::Step { step, .. } | CacheError::StepPanicked { step, .. } => Some(step),
            _ => None,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            CacheError::Configuration(_) | CacheError::RebuildFatal(_) | CacheError::ShuttingDown
        )
    }
}

pub type CacheResult<T> = Result<T, CacheError>;

/// Extracts a readable message from a caught panic payload.
pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_error_is_tagged() {
        let err = CacheError::Worker {
            procedure: "urn:proc:1".to_string(),
            source: DatasourceError::Query {
                query: "offerings_for_procedure".to_string(),
                reason: "timeout".to_string(),
            },
        };

        assert_eq!(err.procedure(), Some("urn:proc:1"));
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("urn:proc:1"));
    }

    #[test]
    fn test_step_error_wraps_source() {
        let err = CacheError::step("related_features", CacheError::Datasource(DatasourceError::SessionClosed));

        assert_eq!(err.step_name(), Some("related_features"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_panic_message_payloads() {
        let payload = std::panic::catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(panic_message(payload), "boom");

        let payload = std::panic::catch_unwind(|| panic!("{}", String::from("owned"))).unwrap_err();
        assert_eq!(panic_message(payload), "owned");
    }

    #[test]
    fn test_fatal_is_not_recoverable() {
        assert!(!CacheError::RebuildFatal("empty".to_string()).is_recoverable());
        assert!(!CacheError::Configuration("bad".to_string()).is_recoverable());
    }
}
