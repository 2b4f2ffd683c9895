use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::types::ExecutionEvent;

/// Pipeline stage over the event sequence.
///
/// Taps observe every event before it is handed on; they must never block
/// the sequence on failure.
#[async_trait]
pub trait EventTap: Send + Sync {
    async fn on_event(&self, event: &ExecutionEvent);
}

/// Producer side of a task's event queue.
#[derive(Debug, Clone)]
pub struct EventQueue {
    tx: mpsc::UnboundedSender<ExecutionEvent>,
}

impl EventQueue {
    /// Create a connected queue/reader pair.
    #[must_use]
    pub fn channel() -> (Self, EventReader) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, EventReader { rx, tap: None })
    }

    /// Enqueue an event. Events sent after the reader is gone are dropped;
    /// the task is already being torn down at that point.
    pub fn enqueue(&self, event: ExecutionEvent) {
        let _ = self.tx.send(event);
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer side of a task's event queue, optionally composed with a tap.
///
/// The reader ends once every queue handle is dropped and the buffer is
/// drained.
pub struct EventReader {
    rx: mpsc::UnboundedReceiver<ExecutionEvent>,
    tap: Option<Arc<dyn EventTap>>,
}

impl EventReader {
    pub async fn next_event(&mut self) -> Option<ExecutionEvent> {
        let event = self.rx.recv().await?;
        if let Some(tap) = self.tap.as_ref() {
            tap.on_event(&event).await;
        }
        Some(event)
    }

    /// Compose a tap around this reader. The tap sees each event before the
    /// caller does.
    #[must_use]
    pub fn tapped(self, tap: Arc<dyn EventTap>) -> Self {
        Self {
            rx: self.rx,
            tap: Some(tap),
        }
    }
}

impl std::fmt::Debug for EventReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventReader")
            .field("tapped", &self.tap.is_some())
            .finish()
    }
}

/// Event stream handed to streaming callers.
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<ExecutionEvent>,
}

impl EventStream {
    #[must_use]
    pub fn channel() -> (mpsc::UnboundedSender<ExecutionEvent>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }
}

impl futures::Stream for EventStream {
    type Item = ExecutionEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Owns the live event queues, keyed by task id.
///
/// Closing a task's queue drops the manager's producer handle; the reader
/// then ends as soon as the remaining producers hang up.
#[derive(Debug, Default)]
pub struct QueueManager {
    queues: Mutex<HashMap<String, EventQueue>>,
}

impl QueueManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or replace) the queue for a task, returning the producer
    /// handle and the reader.
    #[must_use]
    pub fn create(&self, task_id: &str) -> (EventQueue, EventReader) {
        let (queue, reader) = EventQueue::channel();
        if let Ok(mut queues) = self.queues.lock() {
            queues.insert(task_id.to_string(), queue.clone());
        }
        (queue, reader)
    }

    #[must_use]
    pub fn get(&self, task_id: &str) -> Option<EventQueue> {
        self.queues
            .lock()
            .ok()
            .and_then(|queues| queues.get(task_id).cloned())
    }

    /// Release the queue resources held for a task.
    pub fn close(&self, task_id: &str) {
        if let Ok(mut queues) = self.queues.lock() {
            queues.remove(task_id);
        }
    }
}
