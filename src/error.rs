//! Error types for KyroLogic.
//!
//! All errors in KyroLogic are strongly typed using thiserror.
//! Errors raised while a chain is running never reach the dispatching
//! caller; the chain coordinator renders them into `error` monitor events.
//! Setup errors (binding a store, building a descriptor, blocking waits)
//! are returned as `Err`.

use thiserror::Error;

/// Validation errors for actions and logic descriptors.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Action is missing its type label")]
    MissingActionType,

    #[error("Invalid action: {reason}")]
    InvalidAction {
        reason: String,
    },

    #[error("Type pattern cannot be empty")]
    EmptyPattern,

    #[error("Invalid type pattern '{pattern}': {reason}")]
    InvalidPattern {
        pattern: String,
        reason: String,
    },
}

/// Execution errors raised while binding or driving the pipeline.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Pipeline is not connected to a store")]
    NotConnected,

    #[error("Pipeline is already connected to a store")]
    AlreadyConnected,

    #[error("Store was dropped while the pipeline was still running")]
    StoreUnavailable,

    #[error("Logic '{logic}' failed in {phase}: {message}")]
    PhaseFailed {
        logic: String,
        phase: String,
        message: String,
    },

    #[error("Logic '{logic}' violated the completion contract in {phase}: {detail}")]
    ContractViolation {
        logic: String,
        phase: String,
        detail: String,
    },

    #[error("Operation timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },

    #[error("Channel disconnected: {path}")]
    Disconnected {
        path: String,
    },

    #[error("Scheduler unavailable: {reason}")]
    SchedulerUnavailable {
        reason: String,
    },
}

/// Top-level error type for KyroLogic.
#[derive(Debug, Error)]
pub enum KyroError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),
}

impl KyroError {
    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is an execution error.
    #[must_use]
    pub const fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_))
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) => false,
            Self::Execution(e) => matches!(e, ExecutionError::Timeout { .. }),
        }
    }
}

/// Result type alias for KyroLogic operations.
pub type KyroResult<T> = Result<T, KyroError>;

/// Boxed error returned by phase functions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_invalid_pattern() {
        let err = ValidationError::InvalidPattern {
            pattern: "(".to_string(),
            reason: "unclosed group".to_string(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("'('"));
        assert!(msg.contains("unclosed group"));
    }

    #[test]
    fn test_execution_error_phase_failed() {
        let err = ExecutionError::PhaseFailed {
            logic: "L(DEC)-0".to_string(),
            phase: "validate".to_string(),
            message: "boom".to_string(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("L(DEC)-0"));
        assert!(msg.contains("validate"));
        assert!(msg.contains("boom"));
    }

    #[test]
    fn test_execution_error_timeout() {
        let err = ExecutionError::Timeout { duration_ms: 5000 };
        let msg = format!("{err}");
        assert!(msg.contains("5000ms"));
    }

    #[test]
    fn test_kyro_error_from_validation() {
        let kyro_err: KyroError = ValidationError::MissingActionType.into();
        assert!(kyro_err.is_validation());
        assert!(!kyro_err.is_retryable());
    }

    #[test]
    fn test_kyro_error_from_execution() {
        let kyro_err: KyroError = ExecutionError::Timeout { duration_ms: 1000 }.into();
        assert!(kyro_err.is_execution());
        assert!(kyro_err.is_retryable());

        let kyro_err: KyroError = ExecutionError::NotConnected.into();
        assert!(kyro_err.is_execution());
        assert!(!kyro_err.is_retryable());
    }
}
