use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::requirements::PaymentRequired;
use crate::resolver::{PlanRegistry, PlanRegistryError};

/// Result of a non-charging permission check.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyOutcome {
    pub is_valid: bool,
    #[serde(default)]
    pub invalid_reason: Option<String>,
    #[serde(default)]
    pub payer: Option<String>,
    /// Correlation id attached to this verification, replayed at settlement.
    #[serde(default)]
    pub agent_request_id: Option<String>,
}

/// Result of a settlement (credit burn).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleOutcome {
    pub success: bool,
    #[serde(default)]
    pub error_reason: Option<String>,
    #[serde(default)]
    pub transaction: Option<String>,
    #[serde(default)]
    pub network: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum FacilitatorError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("api error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("parse error: {0}")]
    Parse(String),
}

/// Verifies and settles payment authorizations.
///
/// `max_amount` is the number of credits to authorize or burn. Verification
/// is a simulation and never charges; settlement executes the burn.
#[async_trait]
pub trait PermissionFacilitator: Send + Sync {
    async fn verify(
        &self,
        required: &PaymentRequired,
        access_token: &str,
        max_amount: u64,
    ) -> Result<VerifyOutcome, FacilitatorError>;

    async fn settle(
        &self,
        required: &PaymentRequired,
        access_token: &str,
        max_amount: u64,
        agent_request_id: Option<&str>,
    ) -> Result<SettleOutcome, FacilitatorError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VerifyRequestBody<'a> {
    payment_required: &'a PaymentRequired,
    x402_access_token: &'a str,
    /// String-encoded integer, per the x402 wire convention.
    max_amount: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SettleRequestBody<'a> {
    payment_required: &'a PaymentRequired,
    x402_access_token: &'a str,
    max_amount: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    agent_request_id: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    message: String,
}

/// HTTP client for the payments backend.
///
/// Covers the facilitator verify/settle endpoints and plan metadata reads;
/// the operator API key is sent as a bearer header when configured.
#[derive(Debug, Clone)]
pub struct FacilitatorApiClient {
    base_url: String,
    api_key: Option<String>,
    http: reqwest::Client,
}

impl FacilitatorApiClient {
    #[must_use]
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
            http: reqwest::Client::new(),
        }
    }

    async fn post_json<TReq, TRes>(&self, path: &str, body: &TReq) -> Result<TRes, FacilitatorError>
    where
        TReq: Serialize + ?Sized + Sync,
        TRes: for<'de> Deserialize<'de>,
    {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        let mut request = self.http.post(url).json(body);
        if let Some(token) = self.api_key.as_ref() {
            request = request.header("authorization", format!("Bearer {token}"));
        }

        let response = request
            .send()
            .await
            .map_err(|error| FacilitatorError::Transport(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let status_u16 = status.as_u16();
            let body_bytes = response
                .bytes()
                .await
                .map_err(|error| FacilitatorError::Transport(error.to_string()))?;
            if let Ok(parsed) = serde_json::from_slice::<ApiErrorEnvelope>(&body_bytes) {
                return Err(FacilitatorError::Api {
                    status: status_u16,
                    message: parsed.message,
                });
            }
            let text = String::from_utf8_lossy(body_bytes.as_ref()).to_string();
            return Err(FacilitatorError::Api {
                status: status_u16,
                message: text,
            });
        }

        response
            .json::<TRes>()
            .await
            .map_err(|error| FacilitatorError::Parse(error.to_string()))
    }

    async fn get_json<TRes>(&self, path: &str) -> Result<TRes, FacilitatorError>
    where
        TRes: for<'de> Deserialize<'de>,
    {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        let mut request = self.http.get(url);
        if let Some(token) = self.api_key.as_ref() {
            request = request.header("authorization", format!("Bearer {token}"));
        }

        let response = request
            .send()
            .await
            .map_err(|error| FacilitatorError::Transport(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FacilitatorError::Api {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        response
            .json::<TRes>()
            .await
            .map_err(|error| FacilitatorError::Parse(error.to_string()))
    }
}

#[async_trait]
impl PermissionFacilitator for FacilitatorApiClient {
    async fn verify(
        &self,
        required: &PaymentRequired,
        access_token: &str,
        max_amount: u64,
    ) -> Result<VerifyOutcome, FacilitatorError> {
        let body = VerifyRequestBody {
            payment_required: required,
            x402_access_token: access_token,
            max_amount: max_amount.to_string(),
        };
        self.post_json("/api/v1/x402/permissions/verify", &body)
            .await
    }

    async fn settle(
        &self,
        required: &PaymentRequired,
        access_token: &str,
        max_amount: u64,
        agent_request_id: Option<&str>,
    ) -> Result<SettleOutcome, FacilitatorError> {
        let body = SettleRequestBody {
            payment_required: required,
            x402_access_token: access_token,
            max_amount: max_amount.to_string(),
            agent_request_id,
        };
        self.post_json("/api/v1/x402/permissions/settle", &body)
            .await
    }
}

#[async_trait]
impl PlanRegistry for FacilitatorApiClient {
    async fn get_plan(&self, plan_id: &str) -> Result<Value, PlanRegistryError> {
        self.get_json(&format!("/api/v1/protocol/plans/{plan_id}"))
            .await
            .map_err(|error| match error {
                FacilitatorError::Transport(message) => PlanRegistryError::Transport(message),
                FacilitatorError::Api { status, message } => {
                    PlanRegistryError::Api { status, message }
                }
                FacilitatorError::Parse(message) => PlanRegistryError::Parse(message),
            })
    }
}
