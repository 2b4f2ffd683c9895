//! Payment-gated A2A task execution.
//!
//! Sits between an inbound agent task request and the task-execution
//! engine: validates the caller's x402 payment authorization before the
//! task runs, meters usage from the task's event stream, and settles the
//! consumed credits once the task reaches a terminal state, in blocking,
//! non-blocking, and streaming modes.

pub mod context;
pub mod engine;
pub mod error;
pub mod handler;
pub mod notify;
pub mod settlement;
pub mod types;
pub mod validator;

pub use context::{AuthContext, AuthContextStore, ValidationOutcome};
pub use engine::{
    AgentExecutor, EventQueue, EventReader, EventStream, EventTap, ExecutionHandle,
    ExecutionRequest, InMemoryTaskStore, LocalTaskExecution, QueueManager, ResultAggregator,
    TaskExecution, TaskManager, TaskStore,
};
pub use error::GateError;
pub use handler::GatedTaskHandler;
pub use notify::{InMemoryPushConfigStore, NotifyError, PushConfigStore, PushNotifier};
pub use settlement::{SettlementOutcome, SettlementTap, settle_terminal_event};
pub use types::{
    AgentCard, AgentCapabilities, AgentExtension, ExecutionEvent, Message, MessagePart,
    MessageSendConfiguration, MessageSendParams, PAYMENT_EXTENSION_URI, PaymentExtension,
    PushAuthenticationInfo, PushNotificationConfig, SendMessageResult, Task, TaskState,
    TaskStatus, TaskStatusUpdateEvent,
};
pub use validator::RequestValidator;
