//! Task executor: persisted background work with bounded retry and terminal failure states.
//!
//! Producers call [`TaskExecutor::enqueue`], which persists a PENDING task and hands its id
//! to the worker. Dispatch claims the task atomically, runs the registered handler and
//! records COMPLETED, RETRYING or FAILED. A periodic sweep reclaims expired leases and
//! re-dispatches due retries.

mod executor;
mod handlers;
mod kind;
mod memory;
mod registry;

#[cfg(feature = "sqlite")]
mod sqlite;

pub use executor::{DispatchOutcome, ExecutorConfig, SweepReport, TaskError, TaskExecutor};
pub use handlers::{
    BurnoutAssessment, BurnoutAssessmentHandler, BurnoutPayload, ResumeAnalysis,
    ResumeAnalysisHandler, ResumeAnalysisPayload, WorkPatterns,
};
pub use hr_types::{Task, TaskFilter, TaskStatus, TaskStore, TaskStoreError};
pub use kind::TaskKind;
pub use memory::InMemoryTaskStore;
pub use registry::{HandlerError, HandlerRegistry, TaskHandler, TypedTaskHandler};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteTaskStore;
