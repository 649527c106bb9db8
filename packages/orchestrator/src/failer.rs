//! The failer (spec.md §4.8): every `workFailerPeriodSec`, scans for
//! WorkItems stuck in RUNNING past an adaptive per-service threshold and
//! injects a synthetic FAILED update for each, recovering from lost
//! workers, crashed containers, and exhausted queue visibility timeouts.
//!
//! The synthetic update goes straight through [`ingester::process_update`]
//! rather than a real queue round-trip — there is no worker on the other
//! end to redeliver to, and the ingester's own idempotency (an
//! already-completed item is a silent no-op) makes this safe to call
//! concurrently with a real update racing in for the same item.

use std::collections::HashMap;

use orchestrator_core::{CorrelationId, ExpiryThreshold};

use crate::deps::Deps;
use crate::ingester;
use crate::repository::work_item::WorkItemRepository;
use crate::wire::Update;

/// How many recent successful durations feed the percentile estimate per
/// service. Small enough to keep each sweep cheap, large enough to smooth
/// over a handful of slow outliers.
const DURATION_SAMPLE_SIZE: i64 = 50;
/// "A high percentile of observed successful durations" (spec.md §4.8).
const EXPIRY_PERCENTILE: f64 = 0.95;
/// Cap on how many stuck items one sweep will process, so a large backlog
/// spreads across several periods instead of monopolizing one.
const SWEEP_LIMIT: i64 = 200;

/// One sweep: finds RUNNING items whose age exceeds their service's
/// adaptive threshold and fails each through the normal ingestion path.
/// Returns the number of items failed.
pub async fn run_once(deps: &Deps) -> sqlx::Result<usize> {
    let now = deps.clock.now();
    let floor_secs = deps.config.work_failer_expiry_floor.as_secs() as i64;

    let mut conn = deps.pool.acquire().await?;
    // Cheap prefilter at the floor; the real, per-service threshold (which
    // can only be >= the floor) is applied below.
    let cutoff = now - chrono::Duration::seconds(floor_secs);
    let candidates = WorkItemRepository::find_stuck_running(&mut conn, cutoff, SWEEP_LIMIT).await?;

    let mut thresholds: HashMap<String, ExpiryThreshold> = HashMap::new();
    let mut expired = 0usize;

    for item in candidates {
        let Some(started_at) = item.started_at else {
            continue;
        };

        let threshold = match thresholds.get(&item.service_id) {
            Some(t) => *t,
            None => {
                let recent_ms =
                    WorkItemRepository::recent_successful_durations(&mut conn, &item.service_id, DURATION_SAMPLE_SIZE)
                        .await?;
                let t = ExpiryThreshold::new(percentile_seconds(&recent_ms, EXPIRY_PERCENTILE), floor_secs);
                thresholds.insert(item.service_id.clone(), t);
                t
            }
        };

        if !threshold.has_expired(started_at, now) {
            continue;
        }

        let elapsed = (now - started_at).num_seconds();
        let update = Update::Failed {
            message: format!("lost worker: no update received within {elapsed}s (threshold {}s)", threshold.seconds),
            duration_ms: Some((now - started_at).num_milliseconds().max(0)),
        };

        if let Err(err) = ingester::process_update(deps, item.id, update, CorrelationId::new()).await {
            tracing::warn!(work_item_id = %item.id, error = %err, "failer could not synthesize a FAILED update");
            continue;
        }
        expired += 1;
    }

    Ok(expired)
}

/// `p`-th percentile of a list of millisecond durations, converted to
/// whole seconds. Empty input yields 0, letting the caller's floor decide
/// the threshold entirely for a service with no history yet.
fn percentile_seconds(duration_ms: &[i64], p: f64) -> i64 {
    if duration_ms.is_empty() {
        return 0;
    }
    let mut sorted = duration_ms.to_vec();
    sorted.sort_unstable();
    let idx = (((sorted.len() - 1) as f64) * p).round() as usize;
    sorted[idx.min(sorted.len() - 1)] / 1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentile_of_empty_is_zero() {
        assert_eq!(percentile_seconds(&[], 0.95), 0);
    }

    #[test]
    fn percentile_picks_a_high_value_among_uniform_samples() {
        let samples: Vec<i64> = (1..=100).map(|s| s * 1000).collect();
        let p95 = percentile_seconds(&samples, 0.95);
        assert!(p95 >= 94 && p95 <= 100, "expected p95 near the top of the range, got {p95}");
    }

    #[test]
    fn percentile_is_stable_for_a_single_sample() {
        assert_eq!(percentile_seconds(&[5000], 0.95), 5);
    }
}
