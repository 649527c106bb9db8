//! Out-of-transaction I/O effects.
//!
//! Narrows `seesaw::effect_impl::Effect` down to the one property spec.md
//! §5 requires: "All external I/O (object store reads for aggregation)
//! happens **outside** the DB transaction and must be retried or failed
//! deterministically before the transaction opens." An [`Effect`] is
//! exactly that — a fallible, retryable unit of I/O that produces the
//! value a transaction needs, run to completion (or deterministic failure)
//! before any lock is taken.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

/// One unit of out-of-transaction I/O: catalog queries, blob-store reads
/// and writes, and similar. `In` is the request, `Out` the result handed
/// to the transaction that follows.
#[async_trait]
pub trait Effect<In, Out>: Send + Sync
where
    In: Send + Sync,
    Out: Send,
{
    async fn run(&self, input: In) -> anyhow::Result<Out>;
}

/// Deterministic retry wrapper: retries a fallible async operation up to
/// `max_attempts` times with a fixed backoff, then gives up. Used to wrap
/// catalog/blob-store calls so their eventual failure is decided before a
/// DB transaction ever opens, rather than mid-transaction.
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    pub async fn run<F, Fut, T>(&self, mut op: F) -> anyhow::Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.max_attempts => {
                    tracing::warn!(attempt, max = self.max_attempts, error = %err, "effect attempt failed, retrying");
                    tokio::time::sleep(self.backoff).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let result = policy
            .run(|| async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(anyhow::anyhow!("not yet"))
                } else {
                    Ok(42)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(2, Duration::from_millis(1));
        let result: anyhow::Result<()> = policy
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(anyhow::anyhow!("always fails"))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
