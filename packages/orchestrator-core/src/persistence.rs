//! Optimistic-concurrency bookkeeping for rows multiple workers contend on.
//!
//! Narrows `seesaw::persistence` (which persisted arbitrary `Machine`
//! snapshots) down to the one piece the orchestration core actually needs:
//! a [`Revision`] and [`StoreError`] vocabulary for rows that are read,
//! mutated, and written back by concurrent workers without a surrounding
//! state machine abstraction. Two call sites use this:
//!
//! - the `user_work` ledger row (spec.md §4.2), which "may be rebuilt from
//!   WorkItems... invoked when the store restarts or when a job resumes
//!   from PAUSED" — the rebuild must not clobber a concurrent increment
//!   from the scheduler, so it is revision-checked;
//! - a `work_item` row transitioning under the Job→WorkItem→UserWork lock
//!   order (spec.md §5), where a stale read (e.g. by the failer, racing a
//!   worker's own update) must be rejected rather than silently overwritten.
//!
//! Row locking itself (`SELECT ... FOR UPDATE`) is a property of the
//! `orchestrator` crate's `sqlx` repositories; this module only gives their
//! optimistic-concurrency failures one shared vocabulary.

/// Errors from row storage under optimistic concurrency control.
///
/// [`StoreError::Conflict`] means another writer moved the row since it was
/// read — expected under contention, the caller should reload and retry
/// (or, for the ledger rebuild, abandon the rebuild: a concurrent writer
/// means the row is not stale). [`StoreError::Backend`] means the store
/// itself failed (connection, timeout, constraint violation unrelated to
/// the revision check). Treating them the same breaks determinism: a
/// conflict should never be surfaced to a job as a failure.
#[derive(Debug)]
pub enum StoreError {
    Conflict,
    Backend(anyhow::Error),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Conflict => write!(f, "revision conflict: row was modified concurrently"),
            StoreError::Backend(e) => write!(f, "storage backend error: {}", e),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Conflict => None,
            StoreError::Backend(e) => Some(e.as_ref()),
        }
    }
}

impl From<anyhow::Error> for StoreError {
    fn from(err: anyhow::Error) -> Self {
        StoreError::Backend(err)
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// A row revision (maps to the `version` column `sqlx` repositories carry
/// on `user_work` and `work_items`). [`Revision::NONE`] marks a row that
/// has never been written.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Revision(pub u64);

impl Revision {
    pub const NONE: Revision = Revision(0);

    pub fn new(value: u64) -> Self {
        Revision(value)
    }

    pub fn next(self) -> Self {
        Revision(self.0.saturating_add(1))
    }

    pub fn is_none(&self) -> bool {
        self.0 == 0
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Revision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_none() {
            write!(f, "NONE")
        } else {
            write!(f, "r{}", self.0)
        }
    }
}

/// Applies `expected` against `actual`, returning the conflict error the
/// repository layer should surface on a failed `UPDATE ... WHERE version =
/// $expected` (zero rows affected). Kept as a free function so every
/// repository's conflict check reads the same way.
pub fn check_revision(expected: Revision, actual: Revision) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(StoreError::Conflict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revision_none_is_zero() {
        assert!(Revision::NONE.is_none());
        assert_eq!(Revision::NONE.value(), 0);
    }

    #[test]
    fn next_advances_by_one() {
        assert_eq!(Revision::new(3).next(), Revision::new(4));
    }

    #[test]
    fn check_revision_matches() {
        assert!(check_revision(Revision::new(5), Revision::new(5)).is_ok());
    }

    #[test]
    fn check_revision_rejects_mismatch() {
        let err = check_revision(Revision::new(5), Revision::new(6)).unwrap_err();
        assert!(matches!(err, StoreError::Conflict));
    }
}
