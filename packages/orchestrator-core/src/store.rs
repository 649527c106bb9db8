//! Retry policy and lease bookkeeping shared by the ingester and the failer.
//!
//! Generalizes `seesaw::job`'s `JobStore`/`FailureKind` split: that module
//! owned "claim a ready job, then mark it succeeded/failed/heartbeat".
//! Here the claimable unit is a work item rather than a generic serialized
//! command, so the concrete store lives in the orchestrator crate's
//! `repository` module (backed by `sqlx`, using `FOR UPDATE SKIP LOCKED`
//! in the same spirit this module's docs describe); what stays
//! domain-agnostic is the retry arithmetic itself.

use chrono::{DateTime, Utc};

use crate::error::FailureKind;

/// Pure decision of what a FAILED update should become, per spec.md §4.1:
/// "A FAILED update for an item with `retryCount < retryLimit` is
/// rewritten to READY (+retry)". Kept as a free function so the ingester,
/// the failer, and their unit tests all share one definition instead of
/// three copies.
pub fn classify_failure(retry_count: i32, retry_limit: i32) -> FailureKind {
    if retry_count < retry_limit {
        FailureKind::Retryable
    } else {
        FailureKind::NonRetryable
    }
}

/// A percentile-based expiry threshold for one `(job, service)` pair, as
/// used by the failer (spec.md §4.8): "a high percentile of observed
/// successful durations, with a floor".
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExpiryThreshold {
    pub seconds: i64,
}

impl ExpiryThreshold {
    /// `floor_secs` bounds the threshold below (so a service with only a
    /// handful of very fast historical runs doesn't get an unreasonably
    /// short fuse); `percentile_secs` is the caller-computed high
    /// percentile (e.g. p95) of `duration` over recent SUCCESSFUL items
    /// for this `(job, service)`.
    pub fn new(percentile_secs: i64, floor_secs: i64) -> Self {
        Self {
            seconds: percentile_secs.max(floor_secs),
        }
    }

    pub fn has_expired(&self, started_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        (now - started_at).num_seconds() >= self.seconds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn failure_under_limit_is_retryable() {
        assert_eq!(classify_failure(0, 3), FailureKind::Retryable);
        assert_eq!(classify_failure(2, 3), FailureKind::Retryable);
    }

    #[test]
    fn failure_at_or_over_limit_is_terminal() {
        assert_eq!(classify_failure(3, 3), FailureKind::NonRetryable);
        assert_eq!(classify_failure(4, 3), FailureKind::NonRetryable);
    }

    #[test]
    fn threshold_applies_floor() {
        let t = ExpiryThreshold::new(5, 30);
        assert_eq!(t.seconds, 30);
        let t = ExpiryThreshold::new(120, 30);
        assert_eq!(t.seconds, 120);
    }

    #[test]
    fn threshold_detects_expiry() {
        let now = Utc::now();
        let t = ExpiryThreshold::new(60, 10);
        let started = now - Duration::seconds(61);
        assert!(t.has_expired(started, now));
        let started = now - Duration::seconds(10);
        assert!(!t.has_expired(started, now));
    }
}
