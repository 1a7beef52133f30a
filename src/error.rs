// Error taxonomy for the job lifecycle engine.
//
// Kinds, not type names: the transport layer (out of scope here) maps these
// to status codes, but the variants themselves carry enough data to do that
// without knowing anything about HTTP.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed or inconsistent config. Never logged as an incident.
    #[error("validation failed: {0:?}")]
    Validation(Vec<String>),

    /// Illegal state transition: update while running, start while at cap,
    /// duplicate name, etc.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Unknown job id.
    #[error("job not found: {0}")]
    NotFound(String),

    /// Exec failed, missing binary, permission denied.
    #[error("spawn failed for job {job_id}: {message}")]
    Spawn { job_id: String, message: String },

    /// Encoder exited non-zero; carries the tail of stderr.
    #[error("job {job_id} exited with error: {message}")]
    Runtime { job_id: String, message: String },

    /// Store shows running but the OS has no such process (boot reconciliation).
    #[error("job {job_id} lost: process missing on restart")]
    Lost { job_id: String },

    /// Bug class. Logged and surfaced; never corrupts state.
    #[error("internal error: {0}")]
    Internal(String),

    #[error("storage error: {0}")]
    Store(#[from] sqlx::Error),
}

impl EngineError {
    pub fn validation(problems: impl IntoIterator<Item = impl Into<String>>) -> Self {
        EngineError::Validation(problems.into_iter().map(Into::into).collect())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        EngineError::Conflict(msg.into())
    }

    pub fn not_found(job_id: impl Into<String>) -> Self {
        EngineError::NotFound(job_id.into())
    }

    /// True for error kinds that must surface via state transitions and bus
    /// events rather than synchronously to the caller (spec.md §7 policy).
    pub fn is_async_surfaced(&self) -> bool {
        matches!(
            self,
            EngineError::Spawn { .. } | EngineError::Runtime { .. } | EngineError::Lost { .. }
        )
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
