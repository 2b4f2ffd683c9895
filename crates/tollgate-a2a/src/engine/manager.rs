use std::sync::Arc;

use crate::engine::store::TaskStore;
use crate::types::{ExecutionEvent, Task, TaskStatusUpdateEvent};

/// Folds a task's event sequence into its persisted snapshot.
///
/// One manager exists per in-flight request; it only ever writes the task id
/// it was created for.
#[derive(Clone)]
pub struct TaskManager {
    task_id: String,
    context_id: Option<String>,
    store: Arc<dyn TaskStore>,
}

impl TaskManager {
    #[must_use]
    pub fn new(task_id: String, context_id: Option<String>, store: Arc<dyn TaskStore>) -> Self {
        Self {
            task_id,
            context_id,
            store,
        }
    }

    #[must_use]
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub async fn current(&self) -> Option<Task> {
        self.store.get(&self.task_id).await
    }

    /// Apply an event and return the resulting snapshot. Message events do
    /// not mutate the task.
    pub async fn process(&self, event: &ExecutionEvent) -> Option<Task> {
        match event {
            ExecutionEvent::Task(task) => {
                self.store.save(task.clone()).await;
                Some(task.clone())
            }
            ExecutionEvent::StatusUpdate(update) => Some(self.apply_status_update(update).await),
            ExecutionEvent::Message(_) => self.current().await,
        }
    }

    async fn apply_status_update(&self, update: &TaskStatusUpdateEvent) -> Task {
        let mut task = self.store.get(&self.task_id).await.unwrap_or_else(|| Task {
            id: self.task_id.clone(),
            context_id: self.context_id.clone(),
            status: update.status.clone(),
            history: Vec::new(),
            metadata: None,
        });

        task.status = update.status.clone();
        if let Some(incoming) = update.metadata.as_ref() {
            let metadata = task.metadata.get_or_insert_with(serde_json::Map::new);
            for (key, value) in incoming {
                metadata.insert(key.clone(), value.clone());
            }
        }

        self.store.save(task.clone()).await;
        task
    }
}
