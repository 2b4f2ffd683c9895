use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::engine::aggregator::ResultAggregator;
use crate::engine::manager::TaskManager;
use crate::engine::queue::{EventQueue, EventReader, QueueManager};
use crate::engine::store::TaskStore;
use crate::error::GateError;
use crate::types::{Message, MessageSendParams, Task};

/// Everything the producer needs to run one task turn.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub task_id: String,
    pub context_id: Option<String>,
    pub message: Message,
    pub existing_task: Option<Task>,
}

/// The agent logic itself: runs a task turn, emitting events onto the queue.
///
/// Implementations signal completion by enqueueing a final status update and
/// returning; the handler never cancels a running executor.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    async fn execute(&self, request: ExecutionRequest, queue: EventQueue);
}

/// Live collaborators for one task execution.
pub struct ExecutionHandle {
    pub task_id: String,
    pub reader: EventReader,
    pub aggregator: ResultAggregator,
    pub producer: JoinHandle<()>,
}

/// Seam between the gated handler and the execution engine.
#[async_trait]
pub trait TaskExecution: Send + Sync {
    async fn setup(&self, params: &MessageSendParams) -> Result<ExecutionHandle, GateError>;
}

/// Default in-process engine wiring: one queue, one manager, and one spawned
/// producer per request.
pub struct LocalTaskExecution {
    executor: Arc<dyn AgentExecutor>,
    task_store: Arc<dyn TaskStore>,
    queues: Arc<QueueManager>,
}

impl LocalTaskExecution {
    #[must_use]
    pub fn new(
        executor: Arc<dyn AgentExecutor>,
        task_store: Arc<dyn TaskStore>,
        queues: Arc<QueueManager>,
    ) -> Self {
        Self {
            executor,
            task_store,
            queues,
        }
    }
}

#[async_trait]
impl TaskExecution for LocalTaskExecution {
    async fn setup(&self, params: &MessageSendParams) -> Result<ExecutionHandle, GateError> {
        let message = params.message.clone();
        let task_id = message
            .task_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let existing_task = self.task_store.get(&task_id).await;
        let context_id = message
            .context_id
            .clone()
            .or_else(|| {
                existing_task
                    .as_ref()
                    .and_then(|task| task.context_id.clone())
            })
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let (queue, reader) = self.queues.create(&task_id);
        let manager = TaskManager::new(
            task_id.clone(),
            Some(context_id.clone()),
            self.task_store.clone(),
        );
        let aggregator = ResultAggregator::new(manager);

        let request = ExecutionRequest {
            task_id: task_id.clone(),
            context_id: Some(context_id),
            message,
            existing_task,
        };
        let executor = self.executor.clone();
        let producer = tokio::spawn(async move {
            executor.execute(request, queue).await;
        });

        Ok(ExecutionHandle {
            task_id,
            reader,
            aggregator,
            producer,
        })
    }
}
