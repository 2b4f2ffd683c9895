use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::types::Task;

/// Persistence seam for task snapshots.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn get(&self, task_id: &str) -> Option<Task>;
    async fn save(&self, task: Task);
    async fn delete(&self, task_id: &str);
}

#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<String, Task>>,
}

impl InMemoryTaskStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn get(&self, task_id: &str) -> Option<Task> {
        self.tasks
            .read()
            .ok()
            .and_then(|tasks| tasks.get(task_id).cloned())
    }

    async fn save(&self, task: Task) {
        if let Ok(mut tasks) = self.tasks.write() {
            tasks.insert(task.id.clone(), task);
        }
    }

    async fn delete(&self, task_id: &str) {
        if let Ok(mut tasks) = self.tasks.write() {
            tasks.remove(task_id);
        }
    }
}
