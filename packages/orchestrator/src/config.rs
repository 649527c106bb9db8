//! Application configuration loaded from environment variables.
//!
//! Follows `server::config::Config::from_env` exactly: `dotenvy::dotenv()`
//! then `anyhow::Context` on every required variable. Extended with the
//! orchestrator-specific tunables spec.md §4 names throughout (scheduler
//! bounds, retry/error limits, queue URLs, artifact bucket).

use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,

    /// Catalog page size per paginator dispatch (spec.md §4.5).
    pub cmr_max_page_size: i32,
    /// Max retries for a retryable work-item failure before it's terminal
    /// (spec.md §4.1).
    pub retry_limit: i32,
    /// Job fails once its JobError count exceeds this (spec.md §4.1, §7).
    pub max_errors_for_job: i64,
    /// Max items per non-batched aggregated catalog page (spec.md §4.3).
    pub aggregate_max_page_size: i32,
    /// Batched-aggregation bounds (spec.md §4.4).
    pub max_batch_inputs: i32,
    pub max_batch_size_bytes: i64,

    /// Failer sweep interval (spec.md §4.8).
    pub work_failer_period: Duration,
    /// Floor on the failer's adaptive expiry threshold (spec.md §4.8).
    pub work_failer_expiry_floor: Duration,

    /// Object store bucket root for catalog artifacts (spec.md §6).
    pub artifact_bucket: String,

    /// SQS queue URLs: one worker-facing queue per service, the small- and
    /// large-update queues, and the scheduler-trigger queue (spec.md §2).
    pub scheduler_trigger_queue_url: String,
    pub small_update_queue_url: String,
    pub large_update_queue_url: String,
    pub service_queue_urls: Vec<(String, String)>,

    /// Max messages pulled per `receive` on the large-update queue; the
    /// small queue always uses the fixed cap of 10 spec.md §4.7 specifies.
    pub large_update_batch_cap: u32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,

            cmr_max_page_size: env_parse("CMR_MAX_PAGE_SIZE", 2000)?,
            retry_limit: env_parse("RETRY_LIMIT", 3)?,
            max_errors_for_job: env_parse("MAX_ERRORS_FOR_JOB", 100)?,
            aggregate_max_page_size: env_parse("AGGREGATE_MAX_PAGE_SIZE", 2000)?,
            max_batch_inputs: env_parse("MAX_BATCH_INPUTS", 100)?,
            max_batch_size_bytes: env_parse("MAX_BATCH_SIZE_BYTES", 20 * 1024 * 1024)?,

            work_failer_period: Duration::from_secs(env_parse("WORK_FAILER_PERIOD_SEC", 60)?),
            work_failer_expiry_floor: Duration::from_secs(env_parse(
                "WORK_FAILER_EXPIRY_FLOOR_SEC",
                30,
            )?),

            artifact_bucket: env::var("ARTIFACT_BUCKET").context("ARTIFACT_BUCKET must be set")?,

            scheduler_trigger_queue_url: env::var("SCHEDULER_TRIGGER_QUEUE_URL")
                .context("SCHEDULER_TRIGGER_QUEUE_URL must be set")?,
            small_update_queue_url: env::var("SMALL_UPDATE_QUEUE_URL")
                .context("SMALL_UPDATE_QUEUE_URL must be set")?,
            large_update_queue_url: env::var("LARGE_UPDATE_QUEUE_URL")
                .context("LARGE_UPDATE_QUEUE_URL must be set")?,
            service_queue_urls: parse_service_queue_urls(
                &env::var("SERVICE_QUEUE_URLS").unwrap_or_default(),
            ),

            large_update_batch_cap: env_parse("LARGE_UPDATE_BATCH_CAP", 5)?,
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("{key} must be a valid value: {e}")),
        Err(_) => Ok(default),
    }
}

/// `SERVICE_QUEUE_URLS` is a comma-separated `serviceId=queueUrl` list,
/// since the set of containerized step services is configured per
/// deployment rather than known at compile time.
fn parse_service_queue_urls(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .filter(|s| !s.is_empty())
        .filter_map(|pair| pair.split_once('='))
        .map(|(service, url)| (service.to_string(), url.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_service_queue_url_pairs() {
        let pairs = parse_service_queue_urls("foo=https://a,bar=https://b");
        assert_eq!(
            pairs,
            vec![
                ("foo".to_string(), "https://a".to_string()),
                ("bar".to_string(), "https://b".to_string()),
            ]
        );
    }

    #[test]
    fn empty_service_queue_urls_yields_empty_vec() {
        assert!(parse_service_queue_urls("").is_empty());
    }
}
