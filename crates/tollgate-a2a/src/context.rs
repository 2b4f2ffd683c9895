use std::collections::HashMap;
use std::sync::Mutex;

use tollgate_x402::PaymentScheme;

/// Outcome of a successful payment validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationOutcome {
    /// Primary plan, charged at settlement time.
    pub plan_id: String,
    pub plan_ids: Vec<String>,
    pub subscriber_address: String,
    pub scheme: PaymentScheme,
    /// Correlation id returned by verification, replayed at settlement.
    pub agent_request_id: Option<String>,
}

/// Authorization captured from an inbound request.
///
/// The bearer token is opaque and must never be logged.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub bearer_token: String,
    pub url_requested: String,
    pub http_method_requested: String,
    pub validation: Option<ValidationOutcome>,
}

impl AuthContext {
    #[must_use]
    pub fn new(
        bearer_token: impl Into<String>,
        url_requested: impl Into<String>,
        http_method_requested: impl Into<String>,
    ) -> Self {
        Self {
            bearer_token: bearer_token.into(),
            url_requested: url_requested.into(),
            http_method_requested: http_method_requested.into(),
            validation: None,
        }
    }

    #[must_use]
    pub fn with_validation(mut self, validation: ValidationOutcome) -> Self {
        self.validation = Some(validation);
        self
    }
}

#[derive(Debug, Default)]
struct ContextMaps {
    by_task: HashMap<String, AuthContext>,
    by_message: HashMap<String, AuthContext>,
}

/// Bidirectional association between request authorization and task or
/// message identity.
///
/// A context starts keyed by message id and is moved to the task id once the
/// task exists. Both maps share one lock so migration is atomic with respect
/// to lookups by either key. Each task id is only ever written by the single
/// handler invocation driving that task.
#[derive(Debug, Default)]
pub struct AuthContextStore {
    inner: Mutex<ContextMaps>,
}

impl AuthContextStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_for_task(&self, task_id: &str, context: AuthContext) {
        if let Ok(mut maps) = self.inner.lock() {
            maps.by_task.insert(task_id.to_string(), context);
        }
    }

    pub fn set_for_message(&self, message_id: &str, context: AuthContext) {
        if let Ok(mut maps) = self.inner.lock() {
            maps.by_message.insert(message_id.to_string(), context);
        }
    }

    /// Look up a context; the task-id key takes priority over the message-id
    /// key.
    #[must_use]
    pub fn get(&self, task_id: Option<&str>, message_id: Option<&str>) -> Option<AuthContext> {
        let maps = self.inner.lock().ok()?;
        if let Some(task_id) = task_id {
            if let Some(context) = maps.by_task.get(task_id) {
                return Some(context.clone());
            }
        }
        if let Some(message_id) = message_id {
            if let Some(context) = maps.by_message.get(message_id) {
                return Some(context.clone());
            }
        }
        None
    }

    /// Move a context from the message key to the task key. No-op when the
    /// message id is absent.
    pub fn migrate(&self, message_id: &str, task_id: &str) {
        if let Ok(mut maps) = self.inner.lock() {
            if let Some(context) = maps.by_message.remove(message_id) {
                maps.by_task.insert(task_id.to_string(), context);
            }
        }
    }

    pub fn delete_for_task(&self, task_id: &str) {
        if let Ok(mut maps) = self.inner.lock() {
            maps.by_task.remove(task_id);
        }
    }

    pub fn delete_for_message(&self, message_id: &str) {
        if let Ok(mut maps) = self.inner.lock() {
            maps.by_message.remove(message_id);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .map_or(0, |maps| maps.by_task.len() + maps.by_message.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
