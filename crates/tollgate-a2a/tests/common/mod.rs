use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tollgate_x402::{
    FacilitatorError, PaymentRequired, PaymentScheme, PermissionFacilitator, SettleOutcome,
    VerifyOutcome,
};

use tollgate_a2a::{
    AgentCard, AgentExecutor, AuthContext, EventQueue, ExecutionEvent, ExecutionRequest,
    GatedTaskHandler, InMemoryTaskStore, LocalTaskExecution, Message, MessagePart,
    MessageSendParams, QueueManager, Task, TaskState, TaskStatus, TaskStatusUpdateEvent,
    ValidationOutcome,
};

#[derive(Debug, Clone)]
pub struct SettleCall {
    pub plan_id: String,
    pub max_amount: u64,
    pub agent_request_id: Option<String>,
    pub access_token: String,
}

/// Facilitator double recording every verify/settle call.
pub struct RecordingFacilitator {
    pub verify_is_valid: bool,
    pub settle_fails: bool,
    verify_calls: Mutex<usize>,
    settle_calls: Mutex<Vec<SettleCall>>,
}

impl RecordingFacilitator {
    pub fn new() -> Self {
        Self {
            verify_is_valid: true,
            settle_fails: false,
            verify_calls: Mutex::new(0),
            settle_calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_settlement() -> Self {
        Self {
            settle_fails: true,
            ..Self::new()
        }
    }

    pub fn verify_count(&self) -> usize {
        self.verify_calls.lock().map(|count| *count).unwrap_or(0)
    }

    pub fn settle_calls(&self) -> Vec<SettleCall> {
        self.settle_calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl PermissionFacilitator for RecordingFacilitator {
    async fn verify(
        &self,
        _required: &PaymentRequired,
        _access_token: &str,
        _max_amount: u64,
    ) -> Result<VerifyOutcome, FacilitatorError> {
        if let Ok(mut count) = self.verify_calls.lock() {
            *count += 1;
        }
        Ok(VerifyOutcome {
            is_valid: self.verify_is_valid,
            invalid_reason: (!self.verify_is_valid).then(|| "rejected".to_string()),
            payer: Some("0xsubscriber".to_string()),
            agent_request_id: Some("req-42".to_string()),
        })
    }

    async fn settle(
        &self,
        required: &PaymentRequired,
        access_token: &str,
        max_amount: u64,
        agent_request_id: Option<&str>,
    ) -> Result<SettleOutcome, FacilitatorError> {
        if let Ok(mut calls) = self.settle_calls.lock() {
            calls.push(SettleCall {
                plan_id: required
                    .accepts
                    .first()
                    .map(|entry| entry.plan_id.clone())
                    .unwrap_or_default(),
                max_amount,
                agent_request_id: agent_request_id.map(str::to_string),
                access_token: access_token.to_string(),
            });
        }
        if self.settle_fails {
            return Err(FacilitatorError::Transport("connection reset".to_string()));
        }
        Ok(SettleOutcome {
            success: true,
            error_reason: None,
            transaction: Some("0xsettled".to_string()),
            network: Some("eip155:84532".to_string()),
        })
    }
}

/// One step of a scripted agent run.
#[derive(Debug, Clone)]
pub enum ScriptedEvent {
    Status {
        state: TaskState,
        is_final: bool,
        metadata: Option<Map<String, Value>>,
    },
    TaskSnapshot {
        id: String,
        state: TaskState,
    },
    Pause(Duration),
}

impl ScriptedEvent {
    pub fn working() -> Self {
        Self::Status {
            state: TaskState::Working,
            is_final: false,
            metadata: None,
        }
    }

    pub fn submitted() -> Self {
        Self::Status {
            state: TaskState::Submitted,
            is_final: false,
            metadata: None,
        }
    }

    pub fn completed(credits_used: Option<u64>) -> Self {
        let metadata = credits_used
            .and_then(|credits| json!({"creditsUsed": credits}).as_object().cloned());
        Self::Status {
            state: TaskState::Completed,
            is_final: true,
            metadata,
        }
    }
}

/// Executor double that replays a scripted event sequence.
pub struct ScriptedExecutor {
    script: Vec<ScriptedEvent>,
}

impl ScriptedExecutor {
    pub fn new(script: Vec<ScriptedEvent>) -> Self {
        Self { script }
    }
}

#[async_trait]
impl AgentExecutor for ScriptedExecutor {
    async fn execute(&self, request: ExecutionRequest, queue: EventQueue) {
        for step in &self.script {
            match step {
                ScriptedEvent::Pause(delay) => tokio::time::sleep(*delay).await,
                ScriptedEvent::Status {
                    state,
                    is_final,
                    metadata,
                } => {
                    queue.enqueue(ExecutionEvent::StatusUpdate(TaskStatusUpdateEvent {
                        task_id: request.task_id.clone(),
                        context_id: request.context_id.clone(),
                        status: TaskStatus::new(*state),
                        is_final: *is_final,
                        metadata: metadata.clone(),
                    }));
                }
                ScriptedEvent::TaskSnapshot { id, state } => {
                    queue.enqueue(ExecutionEvent::Task(Task {
                        id: id.clone(),
                        context_id: request.context_id.clone(),
                        status: TaskStatus::new(*state),
                        history: Vec::new(),
                        metadata: None,
                    }));
                }
            }
        }
    }
}

pub fn paid_agent_card() -> AgentCard {
    serde_json::from_value(json!({
        "name": "scripted-agent",
        "capabilities": {
            "extensions": [{
                "uri": "urn:nevermined:payment",
                "params": {"agentId": "agent-1", "planId": "plan-1"},
            }]
        }
    }))
    .unwrap_or_default()
}

pub fn cardless_agent_card() -> AgentCard {
    AgentCard::default()
}

pub fn validated_context() -> AuthContext {
    AuthContext::new("BEARER", "https://agent.example/task", "POST").with_validation(
        ValidationOutcome {
            plan_id: "plan-1".to_string(),
            plan_ids: vec!["plan-1".to_string()],
            subscriber_address: "0xsubscriber".to_string(),
            scheme: PaymentScheme::Erc4337,
            agent_request_id: Some("req-42".to_string()),
        },
    )
}

pub fn text_params(message_id: &str) -> MessageSendParams {
    MessageSendParams::new(Message {
        message_id: message_id.to_string(),
        task_id: None,
        context_id: None,
        role: Some("user".to_string()),
        parts: vec![MessagePart::Text {
            text: "run the task".to_string(),
        }],
        metadata: None,
    })
}

pub struct Harness {
    pub handler: GatedTaskHandler,
    pub facilitator: Arc<RecordingFacilitator>,
    pub task_store: Arc<InMemoryTaskStore>,
}

pub fn harness(
    card: AgentCard,
    facilitator: RecordingFacilitator,
    script: Vec<ScriptedEvent>,
) -> Harness {
    let facilitator = Arc::new(facilitator);
    let task_store = Arc::new(InMemoryTaskStore::new());
    let queues = Arc::new(QueueManager::new());
    let execution = Arc::new(LocalTaskExecution::new(
        Arc::new(ScriptedExecutor::new(script)),
        task_store.clone(),
        queues.clone(),
    ));
    let handler = GatedTaskHandler::new(card, execution, facilitator.clone(), queues);
    Harness {
        handler,
        facilitator,
        task_store,
    }
}

/// Poll until `check` passes or the deadline expires.
pub async fn wait_until(check: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
