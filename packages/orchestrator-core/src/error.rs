//! Structured error classification for the orchestration core.
//!
//! Mirrors `seesaw::error`'s split between an internal, detail-carrying
//! error (`anyhow` there, [`OrchestratorError`] here) and a small, safe
//! category used for branching logic (retry vs. terminal, job-visible vs.
//! silently-absorbed). The error-kind table in spec.md §7 is this enum.

use std::fmt;

use thiserror::Error;

/// The error-kind table of spec.md §7, made pattern-matchable.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Rollback and let the caller retry the whole ingestion step; the
    /// source queue message is not deleted on this path *except* in the
    /// update ingester, which always deletes to avoid poison loops.
    #[error("transient store failure: {0}")]
    TransientStore(#[source] anyhow::Error),

    /// A worker reported a failure for a work item. Whether it is retried
    /// is a property of the item's `retryCount` vs. `retryLimit`, decided
    /// by the caller, not by this variant.
    #[error("work item {work_item_id} reported failure: {message}")]
    WorkerFailure {
        work_item_id: uuid::Uuid,
        message: String,
    },

    /// A paginator-step item failed. Immediately terminal for the job: no
    /// subsequent step can proceed meaningfully without catalog pages.
    #[error("paginator step failed for job {job_id}: {message}")]
    PaginatorFailure {
        job_id: uuid::Uuid,
        message: String,
    },

    /// The job's `JobError` count exceeded `maxErrorsForJob`. Terminal
    /// regardless of `ignoreErrors`.
    #[error("job {job_id} exceeded the error limit ({count}/{limit})")]
    ErrorCountBreach {
        job_id: uuid::Uuid,
        count: i64,
        limit: i64,
    },

    /// Reading or writing a catalog artifact in the blob store failed
    /// during aggregation. The caller should synthesize a FAILED update
    /// for the downstream aggregating item so the normal retry path
    /// applies.
    #[error("catalog artifact operation failed: {0}")]
    CatalogStore(#[source] anyhow::Error),

    /// A worker went silent past the adaptive expiry threshold. The
    /// failer turns this into a synthetic FAILED update.
    #[error("work item {work_item_id} expired after {elapsed_secs}s in RUNNING")]
    LostWorker {
        work_item_id: uuid::Uuid,
        elapsed_secs: i64,
    },

    /// An internal invariant was violated (e.g. a step's results were
    /// required but missing). Surfaces to the job as a fatal failure
    /// rather than propagating a stack trace to a user.
    #[error("internal failure: {0}")]
    Internal(String),
}

impl OrchestratorError {
    /// The category used to decide retry/terminal/silent handling; kept
    /// distinct from the `Display` message so internal detail never has to
    /// leak into a `JobError.message` unless the category says it's safe.
    pub fn category(&self) -> ErrorCategory {
        match self {
            OrchestratorError::TransientStore(_) => ErrorCategory::Transient,
            OrchestratorError::WorkerFailure { .. } => ErrorCategory::Retryable,
            OrchestratorError::PaginatorFailure { .. } => ErrorCategory::FatalForJob,
            OrchestratorError::ErrorCountBreach { .. } => ErrorCategory::FatalForJob,
            OrchestratorError::CatalogStore(_) => ErrorCategory::Retryable,
            OrchestratorError::LostWorker { .. } => ErrorCategory::Retryable,
            OrchestratorError::Internal(_) => ErrorCategory::FatalForJob,
        }
    }

    /// The message safe to persist on a `JobError` row and show to users.
    /// Transient/internal detail is summarized rather than echoed verbatim.
    pub fn job_visible_message(&self) -> String {
        match self {
            OrchestratorError::WorkerFailure { message, .. } => message.clone(),
            OrchestratorError::PaginatorFailure { message, .. } => message.clone(),
            OrchestratorError::Internal(_) => "Harmony internal failure".to_string(),
            other => other.to_string(),
        }
    }
}

/// How a failure should be handled by the state machine, independent of
/// its root cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Local recovery preferred: rollback and retry the operation itself
    /// (queue receive, DB transaction) without touching job state.
    Transient,
    /// Subject to the work item's own `retryCount < retryLimit` rule.
    Retryable,
    /// Always terminal for the owning job regardless of retry budget.
    FatalForJob,
}

/// Whether a work-item failure should be retried or is terminal, per
/// spec.md §4.1 ("A FAILED update for an item with retryCount < retryLimit
/// is rewritten to READY"). Generalizes `seesaw::job::FailureKind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Retryable,
    NonRetryable,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Retryable => write!(f, "retryable"),
            FailureKind::NonRetryable => write!(f, "non_retryable"),
        }
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
