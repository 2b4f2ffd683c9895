use std::sync::Arc;

use tollgate_x402::{PaymentRequiredBuilder, PermissionFacilitator, decode_access_token};

use crate::context::ValidationOutcome;
use crate::error::GateError;
use crate::types::AgentCard;

/// Probe amount used for verification; settlement charges the metered value.
const VERIFY_PROBE_CREDITS: u64 = 1;

/// Decides whether a request may proceed.
///
/// Combines the agent card's payment extension, the decoded bearer token,
/// and a facilitator verification into a [`ValidationOutcome`] that later
/// drives settlement.
pub struct RequestValidator {
    facilitator: Arc<dyn PermissionFacilitator>,
}

impl RequestValidator {
    #[must_use]
    pub fn new(facilitator: Arc<dyn PermissionFacilitator>) -> Self {
        Self { facilitator }
    }

    pub async fn validate(
        &self,
        agent_card: &AgentCard,
        bearer_token: &str,
        url_requested: &str,
        http_method: &str,
    ) -> Result<ValidationOutcome, GateError> {
        let extension = agent_card.payment_extension();

        let token = decode_access_token(bearer_token).ok_or_else(|| {
            GateError::unauthorized("bearer token is not a decodable x402 access token")
        })?;

        let mut plan_ids: Vec<String> = extension
            .as_ref()
            .map(|extension| extension.plan_ids.clone())
            .unwrap_or_default();
        if plan_ids.is_empty() {
            if let Some(plan_id) = token.plan_id() {
                plan_ids.push(plan_id.to_string());
            }
        }
        let Some(primary_plan_id) = plan_ids.first().cloned() else {
            return Err(GateError::unauthorized(
                "plan id missing from agent card and access token",
            ));
        };

        let Some(subscriber_address) = token.subscriber_address().map(str::to_string) else {
            return Err(GateError::unauthorized(
                "subscriber address missing from access token",
            ));
        };

        // Unknown declared schemes fall back to the default rail.
        let scheme = token.declared_scheme().unwrap_or_default();

        let mut builder = PaymentRequiredBuilder::for_plans(plan_ids.clone())
            .endpoint(url_requested)
            .http_verb(http_method)
            .scheme(scheme);
        if let Some(extension) = extension.as_ref() {
            builder = builder.agent_id(extension.agent_id.clone());
        }
        let required = builder.build();

        let outcome = self
            .facilitator
            .verify(&required, bearer_token, VERIFY_PROBE_CREDITS)
            .await
            .map_err(|error| {
                GateError::internal(format!("permission verification failed: {error}"))
            })?;

        if !outcome.is_valid {
            return Err(GateError::payment_required(
                outcome
                    .invalid_reason
                    .unwrap_or_else(|| "payment verification rejected".to_string()),
            ));
        }

        Ok(ValidationOutcome {
            plan_id: primary_plan_id,
            plan_ids,
            subscriber_address,
            scheme,
            agent_request_id: outcome.agent_request_id,
        })
    }
}
