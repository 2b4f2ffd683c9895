//! In-process task execution collaborators.
//!
//! The gated handler only depends on the [`TaskExecution`] seam; the types
//! here are the default in-memory wiring a hosting server composes around
//! its agent logic.

pub mod aggregator;
pub mod execution;
pub mod manager;
pub mod queue;
pub mod store;

pub use aggregator::ResultAggregator;
pub use execution::{
    AgentExecutor, ExecutionHandle, ExecutionRequest, LocalTaskExecution, TaskExecution,
};
pub use manager::TaskManager;
pub use queue::{EventQueue, EventReader, EventStream, EventTap, QueueManager};
pub use store::{InMemoryTaskStore, TaskStore};
