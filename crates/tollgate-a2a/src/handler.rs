use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tollgate_x402::PermissionFacilitator;

use crate::context::{AuthContext, AuthContextStore, ValidationOutcome};
use crate::engine::execution::{ExecutionHandle, TaskExecution};
use crate::engine::queue::{EventReader, EventStream, EventTap, QueueManager};
use crate::error::GateError;
use crate::notify::{InMemoryPushConfigStore, PushConfigStore, PushNotifier};
use crate::settlement::{SettlementOutcome, SettlementTap, settle_terminal_event};
use crate::types::{AgentCard, MessageSendParams, SendMessageResult, TaskState};
use crate::validator::RequestValidator;

/// Pause after producer completion so trailing events flush before the
/// queue is released.
const TRAILING_FLUSH_DELAY: Duration = Duration::from_millis(50);

/// Payment-gated task handling on top of a task-execution engine.
///
/// Binds each inbound request's authorization context to its message or task
/// identity, intercepts terminal metered events to settle consumed credits,
/// and delivers push notifications, in blocking, non-blocking, and streaming
/// modes. Settlement and notification failures never surface to the caller.
pub struct GatedTaskHandler {
    agent_card: AgentCard,
    execution: Arc<dyn TaskExecution>,
    facilitator: Arc<dyn PermissionFacilitator>,
    validator: RequestValidator,
    queues: Arc<QueueManager>,
    contexts: Arc<AuthContextStore>,
    push_configs: Arc<dyn PushConfigStore>,
    notifier: PushNotifier,
    running: Arc<Mutex<HashSet<String>>>,
}

impl GatedTaskHandler {
    #[must_use]
    pub fn new(
        agent_card: AgentCard,
        execution: Arc<dyn TaskExecution>,
        facilitator: Arc<dyn PermissionFacilitator>,
        queues: Arc<QueueManager>,
    ) -> Self {
        Self {
            agent_card,
            execution,
            validator: RequestValidator::new(facilitator.clone()),
            facilitator,
            queues,
            contexts: Arc::new(AuthContextStore::new()),
            push_configs: Arc::new(InMemoryPushConfigStore::new()),
            notifier: PushNotifier::new(),
            running: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    #[must_use]
    pub fn with_push_config_store(mut self, push_configs: Arc<dyn PushConfigStore>) -> Self {
        self.push_configs = push_configs;
        self
    }

    #[must_use]
    pub fn with_notifier(mut self, notifier: PushNotifier) -> Self {
        self.notifier = notifier;
        self
    }

    // ---- context helpers, called by the hosting transport -------------

    pub fn set_context_for_message(&self, message_id: &str, context: AuthContext) {
        self.contexts.set_for_message(message_id, context);
    }

    pub fn set_context_for_task(&self, task_id: &str, context: AuthContext) {
        self.contexts.set_for_task(task_id, context);
    }

    pub fn delete_context_for_message(&self, message_id: &str) {
        self.contexts.delete_for_message(message_id);
    }

    pub fn delete_context_for_task(&self, task_id: &str) {
        self.contexts.delete_for_task(task_id);
    }

    pub fn migrate_context(&self, message_id: &str, task_id: &str) {
        self.contexts.migrate(message_id, task_id);
    }

    #[must_use]
    pub fn context(&self, task_id: Option<&str>, message_id: Option<&str>) -> Option<AuthContext> {
        self.contexts.get(task_id, message_id)
    }

    #[must_use]
    pub fn is_running(&self, task_id: &str) -> bool {
        self.running
            .lock()
            .map_or(false, |running| running.contains(task_id))
    }

    /// Validate an inbound request's payment authorization against this
    /// handler's agent card.
    pub async fn validate_request(
        &self,
        bearer_token: &str,
        url_requested: &str,
        http_method: &str,
    ) -> Result<ValidationOutcome, GateError> {
        self.validator
            .validate(&self.agent_card, bearer_token, url_requested, http_method)
            .await
    }

    // ---- non-streaming entry ------------------------------------------

    pub async fn on_message_send(
        &self,
        mut params: MessageSendParams,
    ) -> Result<SendMessageResult, GateError> {
        if params.message.message_id.trim().is_empty() {
            return Err(GateError::bad_request("message.messageId is required"));
        }
        if params.message.parts.is_empty() {
            return Err(GateError::bad_request("message parts are required"));
        }

        let prior_task_id = params.message.task_id.clone();
        let context = if let Some(task_id) = prior_task_id.as_deref() {
            self.contexts.get(Some(task_id), None)
        } else {
            self.contexts.get(None, Some(&params.message.message_id))
        };
        let Some(context) = context else {
            return Err(GateError::unauthorized(
                "authorization context missing for request; bearer token not found",
            ));
        };

        let Some(extension) = self.agent_card.payment_extension() else {
            return Err(GateError::internal(
                "agent id not found in payment extension",
            ));
        };

        let handle = self.execution.setup(&params).await?;
        let task_id = handle.task_id.clone();

        if prior_task_id.is_none() {
            self.contexts.migrate(&params.message.message_id, &task_id);
            params.message.task_id = Some(task_id.clone());
        }
        if let Some(config) = params
            .configuration
            .as_ref()
            .and_then(|configuration| configuration.push_notification_config.clone())
        {
            self.push_configs.set(&task_id, config).await;
        }
        if let Ok(mut running) = self.running.lock() {
            running.insert(task_id.clone());
        }

        let blocking = params.is_blocking();
        let tap: Arc<dyn EventTap> = Arc::new(SettlementTap::new(
            self.facilitator.clone(),
            context,
            Some(extension.agent_id),
        ));

        let ExecutionHandle {
            reader,
            aggregator,
            producer,
            ..
        } = handle;

        // Blocking consumption intercepts terminal events inline on the
        // foreground reader. Non-blocking consumption leaves the foreground
        // reader untouched so the aggregator's early return is undisturbed;
        // the interception rides on the background continuation instead.
        let (result, interrupted_or_non_blocking) = if blocking {
            aggregator
                .consume_and_break_on_interrupt(reader.tapped(tap), true)
                .await
        } else {
            aggregator
                .with_continuation_tap(tap)
                .consume_and_break_on_interrupt(reader, false)
                .await
        };

        let outcome = self.finish_message_send(&task_id, result).await;

        if interrupted_or_non_blocking {
            self.spawn_cleanup(producer, task_id);
        } else {
            cleanup_task(
                producer,
                self.queues.clone(),
                self.running.clone(),
                self.contexts.clone(),
                task_id,
            )
            .await;
        }

        outcome
    }

    async fn finish_message_send(
        &self,
        task_id: &str,
        result: Option<SendMessageResult>,
    ) -> Result<SendMessageResult, GateError> {
        let Some(result) = result else {
            return Err(GateError::internal(
                "agent execution finished without a result",
            ));
        };

        if let SendMessageResult::Task(task) = &result {
            if task.id != task_id {
                return Err(GateError::internal(format!(
                    "task id mismatch: expected {task_id}, got {}",
                    task.id
                )));
            }
            if task.status.state.is_terminal() {
                self.notify_if_configured(task_id, task.status.state).await;
            }
        }

        Ok(result)
    }

    async fn notify_if_configured(&self, task_id: &str, state: TaskState) {
        let Some(config) = self.push_configs.get(task_id).await else {
            return;
        };
        if let Err(error) = self
            .notifier
            .send(task_id, state.as_str(), &config, None)
            .await
        {
            tracing::debug!(task_id, reason = %error, "push notification delivery failed");
        }
    }

    fn spawn_cleanup(&self, producer: JoinHandle<()>, task_id: String) {
        let queues = self.queues.clone();
        let running = self.running.clone();
        let contexts = self.contexts.clone();
        tokio::spawn(async move {
            cleanup_task(producer, queues, running, contexts, task_id).await;
        });
    }

    // ---- streaming entry ----------------------------------------------

    /// Streaming variant: yields the engine's events unchanged while
    /// settling terminal metered events inline and pushing terminal state
    /// to the configured webhook.
    pub async fn on_message_send_stream(
        &self,
        mut params: MessageSendParams,
    ) -> Result<EventStream, GateError> {
        if params.message.message_id.trim().is_empty() {
            return Err(GateError::bad_request("message.messageId is required"));
        }

        let context = self.contexts.get(
            params.message.task_id.as_deref(),
            Some(&params.message.message_id),
        );
        let Some(context) = context else {
            return Err(GateError::unauthorized(
                "authorization context missing for request; bearer token not found",
            ));
        };

        let agent_id = self
            .agent_card
            .payment_extension()
            .map(|extension| extension.agent_id);

        let prior_task_id = params.message.task_id.clone();
        let handle = self.execution.setup(&params).await?;
        let task_id = handle.task_id.clone();

        if prior_task_id.is_none() {
            self.contexts.migrate(&params.message.message_id, &task_id);
            params.message.task_id = Some(task_id.clone());
        }
        if let Some(config) = params
            .configuration
            .as_ref()
            .and_then(|configuration| configuration.push_notification_config.clone())
        {
            self.push_configs.set(&task_id, config).await;
        }
        if let Ok(mut running) = self.running.lock() {
            running.insert(task_id.clone());
        }

        let ExecutionHandle {
            reader, producer, ..
        } = handle;

        let (tx, stream) = EventStream::channel();
        let facilitator = self.facilitator.clone();
        let push_configs = self.push_configs.clone();
        let notifier = self.notifier.clone();
        let queues = self.queues.clone();
        let running = self.running.clone();
        let contexts = self.contexts.clone();
        let monitor_task_id = task_id.clone();

        tokio::spawn(async move {
            let mut reader: EventReader = reader;
            while let Some(event) = reader.next_event().await {
                if let Some(update) = event.as_status_update() {
                    if update.is_final
                        && update.credits_used().is_some()
                        && !context.bearer_token.is_empty()
                    {
                        let outcome = settle_terminal_event(
                            facilitator.as_ref(),
                            &context,
                            agent_id.as_deref(),
                            update,
                        )
                        .await;
                        if let SettlementOutcome::Failed(reason) = outcome {
                            tracing::warn!(
                                task_id = %update.task_id,
                                reason = %reason,
                                "credit settlement failed"
                            );
                        }
                    }

                    if update.is_final && update.status.state.is_terminal() {
                        if let Some(config) = push_configs.get(&update.task_id).await {
                            if let Err(error) = notifier
                                .send(
                                    &update.task_id,
                                    update.status.state.as_str(),
                                    &config,
                                    None,
                                )
                                .await
                            {
                                tracing::debug!(
                                    task_id = %update.task_id,
                                    reason = %error,
                                    "push notification delivery failed"
                                );
                            }
                        }
                    }
                }

                // The event goes onward unchanged regardless of settlement
                // outcome. A gone subscriber ends the monitor cleanly.
                if tx.send(event).is_err() {
                    break;
                }
            }

            cleanup_task(producer, queues, running, contexts, monitor_task_id).await;
        });

        Ok(stream)
    }
}

/// Tear down one finished task: await the producer (never cancel it; in
/// non-blocking mode it must keep running so the background drain can
/// observe the terminal event), let trailing events flush, release the
/// queue, drop the task from the running set, and delete its authorization
/// context.
async fn cleanup_task(
    producer: JoinHandle<()>,
    queues: Arc<QueueManager>,
    running: Arc<Mutex<HashSet<String>>>,
    contexts: Arc<AuthContextStore>,
    task_id: String,
) {
    if let Err(error) = producer.await {
        if error.is_cancelled() {
            tracing::debug!(task_id = %task_id, "producer task cancelled externally");
        } else {
            tracing::warn!(task_id = %task_id, reason = %error, "producer task ended abnormally");
        }
    }

    tokio::time::sleep(TRAILING_FLUSH_DELAY).await;
    queues.close(&task_id);
    if let Ok(mut running) = running.lock() {
        running.remove(&task_id);
    }
    contexts.delete_for_task(&task_id);
}
