//! Error taxonomy for the judge worker.
//!
//! Every fault a worker can hit folds into one of five buckets. The bucket
//! decides what the worker does next (ack, nack+requeue, nack+DLQ) — see
//! `JudgeError::is_retryable` and `JudgeError::routes_to_dlq`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum JudgeError {
    /// Submitted code failed to compile, ran out of bounds, or produced the
    /// wrong output. Terminal: recorded as the submission's verdict, never retried.
    #[error("user code fault: {0}")]
    UserError(String),

    /// A dependency call (storage, broker, catalog) failed in a way that is
    /// expected to clear up on its own.
    #[error("transient failure: {0}")]
    Transient(String),

    /// A dependency has been failing for long enough that retrying is no
    /// longer productive (breaker open, retries exhausted).
    #[error("permanent external failure: {0}")]
    PermanentExternal(String),

    /// The sandbox itself (the isolation tool, cgroups, box lifecycle)
    /// misbehaved independent of the submitted code.
    #[error("sandbox fault: {0}")]
    SandboxFault(String),

    /// Anything else: bad state, programmer error, unreachable branch.
    #[error("internal fault: {0}")]
    InternalFault(String),
}

impl JudgeError {
    /// Whether a single-shot retry by requeueing the same message makes sense.
    pub fn is_retryable(&self) -> bool {
        matches!(self, JudgeError::Transient(_) | JudgeError::SandboxFault(_))
    }

    /// Whether this fault should go straight to the dead-letter queue instead
    /// of being retried at all.
    pub fn routes_to_dlq(&self) -> bool {
        matches!(self, JudgeError::PermanentExternal(_) | JudgeError::InternalFault(_))
    }

    pub fn code(&self) -> &'static str {
        match self {
            JudgeError::UserError(_) => "USER_ERROR",
            JudgeError::Transient(_) => "TRANSIENT",
            JudgeError::PermanentExternal(_) => "PERMANENT_EXTERNAL",
            JudgeError::SandboxFault(_) => "SANDBOX_FAULT",
            JudgeError::InternalFault(_) => "INTERNAL_FAULT",
        }
    }
}

pub type JudgeResult<T> = std::result::Result<T, JudgeError>;
