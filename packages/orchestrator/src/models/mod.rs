//! Row types for the orchestration store's six tables (spec.md §3).
//!
//! Each type mirrors its `sqlx::FromRow` row shape directly — no separate
//! DTO layer — the same way `server`'s `kernel::job_queue::Job` maps one
//! struct straight onto `jobs`.

pub mod job;
pub mod job_error;
pub mod job_link;
pub mod user_work;
pub mod work_item;
pub mod workflow_step;

pub use job::{Job, JobStatus};
pub use job_error::JobError;
pub use job_link::JobLink;
pub use user_work::UserWork;
pub use work_item::{WorkItem, WorkItemStatus};
pub use workflow_step::WorkflowStep;
