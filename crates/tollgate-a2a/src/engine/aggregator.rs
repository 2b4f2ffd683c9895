use std::sync::Arc;

use crate::engine::manager::TaskManager;
use crate::engine::queue::{EventReader, EventTap};
use crate::types::{ExecutionEvent, SendMessageResult};

/// Per-request result aggregation over a task's event sequence.
///
/// In blocking mode the sequence is drained to its final event. Non-blocking
/// calls and interrupt states (input-required, auth-required) return the
/// current snapshot early and keep draining in a background continuation so
/// the task still reaches its terminal state.
///
/// The continuation tap is installed per aggregator instance and travels
/// with the background drain; it is how terminal-event interception stays
/// alive after the early return.
pub struct ResultAggregator {
    manager: TaskManager,
    continuation_tap: Option<Arc<dyn EventTap>>,
}

impl ResultAggregator {
    #[must_use]
    pub fn new(manager: TaskManager) -> Self {
        Self {
            manager,
            continuation_tap: None,
        }
    }

    /// Compose a tap around the background continuation's reader.
    #[must_use]
    pub fn with_continuation_tap(mut self, tap: Arc<dyn EventTap>) -> Self {
        self.continuation_tap = Some(tap);
        self
    }

    /// Consume events until a result is available.
    ///
    /// Returns the result (task snapshot or direct message) and whether the
    /// consumption broke early, leaving a background continuation running.
    pub async fn consume_and_break_on_interrupt(
        self,
        mut reader: EventReader,
        blocking: bool,
    ) -> (Option<SendMessageResult>, bool) {
        while let Some(event) = reader.next_event().await {
            if let ExecutionEvent::Message(message) = &event {
                return (Some(SendMessageResult::Message(message.clone())), false);
            }

            let is_final = match &event {
                ExecutionEvent::StatusUpdate(update) => update.is_final,
                ExecutionEvent::Task(task) => task.status.state.is_terminal(),
                ExecutionEvent::Message(_) => false,
            };
            let snapshot = self.manager.process(&event).await;

            if is_final {
                return (snapshot.map(SendMessageResult::Task), false);
            }

            let interrupted = snapshot
                .as_ref()
                .is_some_and(|task| task.status.state.is_interrupt());
            if interrupted || (!blocking && snapshot.is_some()) {
                let result = snapshot.map(SendMessageResult::Task);
                self.continue_in_background(reader);
                return (result, true);
            }
        }

        (
            self.manager.current().await.map(SendMessageResult::Task),
            false,
        )
    }

    fn continue_in_background(self, reader: EventReader) {
        let reader = match self.continuation_tap {
            Some(tap) => reader.tapped(tap),
            None => reader,
        };
        let manager = self.manager;
        tokio::spawn(async move {
            let mut reader = reader;
            while let Some(event) = reader.next_event().await {
                manager.process(&event).await;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;

    use super::ResultAggregator;
    use crate::engine::manager::TaskManager;
    use crate::engine::queue::{EventQueue, EventTap};
    use crate::engine::store::{InMemoryTaskStore, TaskStore};
    use crate::types::{
        ExecutionEvent, Message, SendMessageResult, TaskState, TaskStatus, TaskStatusUpdateEvent,
    };

    struct FinalCounter {
        finals: AtomicUsize,
    }

    #[async_trait]
    impl EventTap for FinalCounter {
        async fn on_event(&self, event: &ExecutionEvent) {
            if event
                .as_status_update()
                .is_some_and(|update| update.is_final)
            {
                self.finals.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn update(state: TaskState, is_final: bool) -> ExecutionEvent {
        let metadata = if is_final {
            json!({"creditsUsed": 1}).as_object().cloned()
        } else {
            None
        };
        ExecutionEvent::StatusUpdate(TaskStatusUpdateEvent {
            task_id: "tid".to_string(),
            context_id: None,
            status: TaskStatus::new(state),
            is_final,
            metadata,
        })
    }

    fn aggregator(store: Arc<InMemoryTaskStore>) -> ResultAggregator {
        ResultAggregator::new(TaskManager::new("tid".to_string(), None, store))
    }

    #[tokio::test]
    async fn blocking_consumption_returns_the_final_snapshot() {
        let store = Arc::new(InMemoryTaskStore::new());
        let (queue, reader) = EventQueue::channel();
        queue.enqueue(update(TaskState::Working, false));
        queue.enqueue(update(TaskState::Completed, true));
        drop(queue);

        let (result, interrupted) = aggregator(store)
            .consume_and_break_on_interrupt(reader, true)
            .await;

        assert!(!interrupted);
        let state = result
            .as_ref()
            .and_then(SendMessageResult::as_task)
            .map(|task| task.status.state);
        assert_eq!(state, Some(TaskState::Completed));
    }

    #[tokio::test]
    async fn message_event_short_circuits() {
        let store = Arc::new(InMemoryTaskStore::new());
        let (queue, reader) = EventQueue::channel();
        queue.enqueue(ExecutionEvent::Message(Message::user_text("mid", "hi")));
        drop(queue);

        let (result, interrupted) = aggregator(store)
            .consume_and_break_on_interrupt(reader, true)
            .await;

        assert!(!interrupted);
        assert!(matches!(result, Some(SendMessageResult::Message(_))));
    }

    #[tokio::test]
    async fn non_blocking_returns_early_and_drains_in_background() {
        let store = Arc::new(InMemoryTaskStore::new());
        let (queue, reader) = EventQueue::channel();
        queue.enqueue(update(TaskState::Submitted, false));

        let tap = Arc::new(FinalCounter {
            finals: AtomicUsize::new(0),
        });
        let (result, interrupted) = aggregator(store.clone())
            .with_continuation_tap(tap.clone())
            .consume_and_break_on_interrupt(reader, false)
            .await;

        assert!(interrupted);
        let state = result
            .as_ref()
            .and_then(SendMessageResult::as_task)
            .map(|task| task.status.state);
        assert_eq!(state, Some(TaskState::Submitted));
        assert_eq!(tap.finals.load(Ordering::SeqCst), 0);

        // Terminal event arrives after the early return; the continuation
        // must observe it.
        queue.enqueue(update(TaskState::Completed, true));
        drop(queue);

        for _ in 0..50 {
            if tap.finals.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(tap.finals.load(Ordering::SeqCst), 1);
        assert_eq!(
            store.get("tid").await.map(|task| task.status.state),
            Some(TaskState::Completed)
        );
    }

    #[tokio::test]
    async fn input_required_interrupts_blocking_consumption() {
        let store = Arc::new(InMemoryTaskStore::new());
        let (queue, reader) = EventQueue::channel();
        queue.enqueue(update(TaskState::InputRequired, false));
        drop(queue);

        let (result, interrupted) = aggregator(store)
            .consume_and_break_on_interrupt(reader, true)
            .await;

        assert!(interrupted);
        let state = result
            .as_ref()
            .and_then(SendMessageResult::as_task)
            .map(|task| task.status.state);
        assert_eq!(state, Some(TaskState::InputRequired));
    }

    #[tokio::test]
    async fn empty_sequence_yields_no_result() {
        let store = Arc::new(InMemoryTaskStore::new());
        let (queue, reader) = EventQueue::channel();
        drop(queue);

        let (result, interrupted) = aggregator(store)
            .consume_and_break_on_interrupt(reader, true)
            .await;

        assert!(!interrupted);
        assert!(result.is_none());
    }
}
