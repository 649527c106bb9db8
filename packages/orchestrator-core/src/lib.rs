//! # orchestrator-core
//!
//! Queue, store, effect, and outbox abstractions shared by the workflow
//! orchestration core. This crate carries no domain types of its own (no
//! `Job`, no `WorkItem`) — it is the vocabulary the `orchestrator` crate's
//! concrete scheduler, ingester, and failer are built from, the same way
//! the teacher's coordination layer stayed generic over any machine/event
//! pair while its application crate supplied the domain.
//!
//! ## Modules
//!
//! - [`ids`]: strongly-typed identifiers (`JobId`, `WorkItemId`,
//!   `ServiceId`, `CorrelationId`) and the [`ids::Clock`] trait.
//! - [`error`]: the structured error-kind table and retry classification.
//! - [`queue`]: the FIFO [`queue::Queue`] trait all five orchestrator
//!   queues share, plus an in-memory test double.
//! - [`store`]: retry/expiry arithmetic shared by the ingester and failer.
//! - [`effect`]: out-of-transaction, retryable I/O.
//! - [`outbox`]: the transactional outbox that replaces in-process
//!   event emission for cross-replica signaling.
//! - [`persistence`]: optimistic-concurrency bookkeeping for contended rows.
//! - [`testing`] (feature `testing`): shared test doubles.
//!
//! ## What this crate is not
//!
//! It is not a state-machine runtime: there is no in-process event bus, no
//! machine/command dispatch, and no engine loop. State transitions here
//! are rows mutated under transactions, and the signal that a transition
//! happened travels through the outbox to a real queue — never through an
//! in-memory broadcast a second replica could miss.

pub mod effect;
pub mod error;
pub mod ids;
pub mod outbox;
pub mod persistence;
pub mod queue;
pub mod store;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use crate::effect::{Effect, RetryPolicy};
pub use crate::error::{ErrorCategory, FailureKind, OrchestratorError, Result};
pub use crate::ids::{Clock, CorrelationId, JobId, ServiceId, SystemClock, WorkItemId};
pub use crate::outbox::{
    drain_once, OutboxEntry, OutboxError, OutboxEvent, OutboxPublisher, OutboxPublisherConfig,
    OutboxReader, OutboxWriter,
};
pub use crate::persistence::{check_revision, Revision, StoreError};
pub use crate::queue::{InMemoryQueue, Message, Queue, QueueError};
pub use crate::store::{classify_failure, ExpiryThreshold};

pub use async_trait::async_trait;
