//! Workflow orchestration core for the satellite-data-processing
//! platform: the fair scheduler, the update ingester, downstream
//! generation (fan-out and aggregation), the paginator, leaf/job
//! finalization, and the failer, all built on a Postgres-backed store
//! and SQS-shaped queues.

pub mod catalog;
pub mod config;
pub mod deps;
pub mod downstream;
pub mod failer;
pub mod ingester;
pub mod leaf;
pub mod models;
pub mod paginator;
pub mod queues;
pub mod repository;
pub mod scheduler;
pub mod wire;

pub use config::Config;
pub use deps::Deps;
