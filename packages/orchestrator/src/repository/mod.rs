//! `sqlx`-backed repositories over the six orchestration tables.
//!
//! Every repository takes either a `&PgPool` (read-only / autocommit
//! calls) or a `&mut sqlx::Transaction<'_, sqlx::Postgres>` (calls that
//! must participate in a caller-held transaction, e.g. the Job→WorkItem→
//! UserWork locking sequence of spec.md §5). Runtime `sqlx::query_as`
//! rather than the compile-time `query_as!` macro, matching
//! `server::kernel::job_queue::Job`'s style, since this repository layer
//! has no reachable database to check query strings against at build time.

pub mod batch_buffer;
pub mod job;
pub mod job_error;
pub mod job_link;
pub mod outbox;
pub mod user_work;
pub mod work_item;
pub mod workflow_step;
