use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value, json};

use crate::types::{PushAuthenticationInfo, PushNotificationConfig};

/// Push deliveries must never hold up task completion.
const PUSH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("webhook returned status {0}")]
    Status(u16),
}

/// Caller-configured webhook targets, keyed by task id.
#[async_trait]
pub trait PushConfigStore: Send + Sync {
    async fn get(&self, task_id: &str) -> Option<PushNotificationConfig>;
    async fn set(&self, task_id: &str, config: PushNotificationConfig);
    async fn delete(&self, task_id: &str);
}

#[derive(Debug, Default)]
pub struct InMemoryPushConfigStore {
    configs: RwLock<HashMap<String, PushNotificationConfig>>,
}

impl InMemoryPushConfigStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PushConfigStore for InMemoryPushConfigStore {
    async fn get(&self, task_id: &str) -> Option<PushNotificationConfig> {
        self.configs
            .read()
            .ok()
            .and_then(|configs| configs.get(task_id).cloned())
    }

    async fn set(&self, task_id: &str, config: PushNotificationConfig) {
        if let Ok(mut configs) = self.configs.write() {
            configs.insert(task_id.to_string(), config);
        }
    }

    async fn delete(&self, task_id: &str) {
        if let Ok(mut configs) = self.configs.write() {
            configs.remove(task_id);
        }
    }
}

/// Best-effort webhook delivery of terminal task state.
#[derive(Debug, Clone, Default)]
pub struct PushNotifier {
    http: reqwest::Client,
}

impl PushNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// POST `{taskId, state, payload}` to the configured webhook.
    ///
    /// The auth header follows the first matching declared scheme: basic,
    /// bearer, or a custom header map.
    pub async fn send(
        &self,
        task_id: &str,
        state: &str,
        config: &PushNotificationConfig,
        payload: Option<Value>,
    ) -> Result<(), NotifyError> {
        let body = json!({
            "taskId": task_id,
            "state": state,
            "payload": payload.unwrap_or_else(|| json!({})),
        });

        let mut request = self
            .http
            .post(&config.url)
            .timeout(PUSH_TIMEOUT)
            .json(&body);
        if let Some(authentication) = config.authentication.as_ref() {
            request = apply_authentication(request, authentication);
        }

        let response = request
            .send()
            .await
            .map_err(|error| NotifyError::Transport(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Status(status.as_u16()));
        }
        Ok(())
    }
}

fn apply_authentication(
    request: reqwest::RequestBuilder,
    authentication: &PushAuthenticationInfo,
) -> reqwest::RequestBuilder {
    for scheme in &authentication.schemes {
        match scheme.to_ascii_lowercase().as_str() {
            "basic" => {
                if let Some(credentials) =
                    authentication.credentials.as_ref().and_then(Value::as_str)
                {
                    return request
                        .header("authorization", format!("Basic {}", STANDARD.encode(credentials)));
                }
            }
            "bearer" => {
                if let Some(credentials) =
                    authentication.credentials.as_ref().and_then(Value::as_str)
                {
                    return request.header("authorization", format!("Bearer {credentials}"));
                }
            }
            "custom" => {
                if let Some(headers) =
                    authentication.credentials.as_ref().and_then(Value::as_object)
                {
                    let mut request = request;
                    for (name, value) in headers {
                        if let Some(value) = value.as_str() {
                            request = request.header(name.as_str(), value);
                        }
                    }
                    return request;
                }
            }
            _ => {}
        }
    }
    request
}
