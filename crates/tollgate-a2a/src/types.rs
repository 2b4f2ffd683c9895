use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// URI of the payment capability entry on an agent card.
pub const PAYMENT_EXTENSION_URI: &str = "urn:nevermined:payment";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskState {
    Submitted,
    Working,
    InputRequired,
    AuthRequired,
    Completed,
    Failed,
    Canceled,
    Rejected,
    Unknown,
}

impl TaskState {
    /// Terminal states produce no further status changes.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Canceled | Self::Rejected
        )
    }

    /// States that pause execution waiting on the caller.
    #[must_use]
    pub fn is_interrupt(self) -> bool {
        matches!(self, Self::InputRequired | Self::AuthRequired)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Working => "working",
            Self::InputRequired => "input-required",
            Self::AuthRequired => "auth-required",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
            Self::Rejected => "rejected",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub message_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parts: Vec<MessagePart>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl Message {
    #[must_use]
    pub fn user_text(message_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            task_id: None,
            context_id: None,
            role: Some("user".to_string()),
            parts: vec![MessagePart::Text { text: text.into() }],
            metadata: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum MessagePart {
    Text { text: String },
    Data { data: Value },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    pub state: TaskState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl TaskStatus {
    #[must_use]
    pub fn new(state: TaskState) -> Self {
        Self {
            state,
            timestamp: Some(Utc::now()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatusUpdateEvent {
    pub task_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,
    pub status: TaskStatus,
    #[serde(rename = "final")]
    pub is_final: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl TaskStatusUpdateEvent {
    /// Metered credits carried on a terminal event. Accepts both numeric
    /// and string-encoded values.
    #[must_use]
    pub fn credits_used(&self) -> Option<u64> {
        let value = self.metadata.as_ref()?.get("creditsUsed")?;
        match value {
            Value::Number(number) => number.as_u64(),
            Value::String(text) => text.parse().ok(),
            _ => None,
        }
    }

    /// Correlation id stamped on the event by the execution engine.
    #[must_use]
    pub fn agent_request_id(&self) -> Option<&str> {
        self.metadata
            .as_ref()?
            .get("agentRequestId")
            .and_then(Value::as_str)
    }
}

/// Everything the execution engine can emit onto a task's event queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ExecutionEvent {
    Message(Message),
    Task(Task),
    StatusUpdate(TaskStatusUpdateEvent),
}

impl ExecutionEvent {
    #[must_use]
    pub fn as_status_update(&self) -> Option<&TaskStatusUpdateEvent> {
        match self {
            Self::StatusUpdate(update) => Some(update),
            _ => None,
        }
    }

    #[must_use]
    pub fn task_id(&self) -> Option<&str> {
        match self {
            Self::Message(message) => message.task_id.as_deref(),
            Self::Task(task) => Some(&task.id),
            Self::StatusUpdate(update) => Some(&update.task_id),
        }
    }
}

/// Result of a non-streaming send: either the finished/interrupted task or
/// a direct agent message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SendMessageResult {
    Task(Task),
    Message(Message),
}

impl SendMessageResult {
    #[must_use]
    pub fn as_task(&self) -> Option<&Task> {
        match self {
            Self::Task(task) => Some(task),
            Self::Message(_) => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSendConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocking: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_notification_config: Option<PushNotificationConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSendParams {
    pub message: Message,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<MessageSendConfiguration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl MessageSendParams {
    #[must_use]
    pub fn new(message: Message) -> Self {
        Self {
            message,
            configuration: None,
            metadata: None,
        }
    }

    /// Blocking unless the caller's configuration explicitly disables it.
    #[must_use]
    pub fn is_blocking(&self) -> bool {
        self.configuration
            .as_ref()
            .and_then(|configuration| configuration.blocking)
            != Some(false)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushNotificationConfig {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication: Option<PushAuthenticationInfo>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushAuthenticationInfo {
    #[serde(default)]
    pub schemes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCard {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub capabilities: AgentCapabilities,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCapabilities {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extensions: Vec<AgentExtension>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentExtension {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// Parsed payment capability from an agent card.
#[derive(Debug, Clone)]
pub struct PaymentExtension {
    pub agent_id: String,
    pub plan_ids: Vec<String>,
}

impl AgentCard {
    /// The payment capability entry, if the card declares one with an
    /// agent id. Accepts a single `planId` or a `planIds` list.
    #[must_use]
    pub fn payment_extension(&self) -> Option<PaymentExtension> {
        let params = self
            .capabilities
            .extensions
            .iter()
            .find(|extension| extension.uri == PAYMENT_EXTENSION_URI)?
            .params
            .as_ref()?;

        let agent_id = params.get("agentId").and_then(Value::as_str)?.to_string();

        let mut plan_ids: Vec<String> = Vec::new();
        if let Some(plan_id) = params.get("planId").and_then(Value::as_str) {
            plan_ids.push(plan_id.to_string());
        }
        if let Some(values) = params.get("planIds").and_then(Value::as_array) {
            plan_ids.extend(
                values
                    .iter()
                    .filter_map(Value::as_str)
                    .map(|plan_id| plan_id.to_string()),
            );
        }

        Some(PaymentExtension { agent_id, plan_ids })
    }
}
