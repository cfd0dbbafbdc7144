//! Error types for the benchmark harness
//!
//! Fatal and trial-scoped failures are distinct variants so callers can see
//! from the type whether an error ends the run or only the current trial.
//! Best-effort operations never return these; they log and move on.

use thiserror::Error;

/// Errors raised by the container runtime boundary
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The container, network or exec instance does not exist (anymore)
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    /// Any other failure reported by the runtime API
    #[error("container runtime error: {0}")]
    Api(String),
}

impl RuntimeError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RuntimeError::NotFound { .. })
    }
}

/// Errors raised by the message broker boundary
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("failed to create client for {bootstrap}: {message}")]
    Client { bootstrap: String, message: String },

    #[error("topic operation on {topic} failed: {message}")]
    Topic { topic: String, message: String },

    #[error("poll on {topic} failed: {message}")]
    Poll { topic: String, message: String },
}

/// Top-level harness error
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Shared infrastructure could not be provisioned; fatal to the whole run
    #[error("infrastructure failure: {0}")]
    Infrastructure(String),

    /// An engine resource never became ready; fatal to the current trial
    #[error("{target} not ready: {reason}")]
    Readiness { target: String, reason: String },

    /// The query submission step exited non-zero; fatal to the current trial
    #[error("query {case} failed with exit code {exit_code}: {output}")]
    Query {
        case: String,
        exit_code: i64,
        output: String,
    },

    /// A bounded wait other than readiness polling ran out
    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },

    /// The engine declares this case unsupported
    #[error("Unsupported case: {0}")]
    Unsupported(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    /// Returns true if the error is scoped to a single trial
    pub fn is_trial_scoped(&self) -> bool {
        matches!(
            self,
            HarnessError::Readiness { .. }
                | HarnessError::Query { .. }
                | HarnessError::Timeout { .. }
                | HarnessError::Unsupported(_)
        )
    }
}

pub type Result<T, E = HarnessError> = std::result::Result<T, E>;
