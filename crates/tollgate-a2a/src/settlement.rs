use std::sync::Arc;

use async_trait::async_trait;
use tollgate_x402::{PaymentRequiredBuilder, PermissionFacilitator};

use crate::context::AuthContext;
use crate::engine::queue::EventTap;
use crate::types::{ExecutionEvent, TaskStatusUpdateEvent};

/// Result of one settlement attempt.
///
/// Failures stop at this boundary: the owning task response is never failed
/// by a settlement problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementOutcome {
    Settled { transaction: Option<String> },
    Skipped(&'static str),
    Failed(String),
}

/// Settle the credits metered on a terminal event against the context's
/// primary plan.
///
/// Skips silently when the event carries no metered credits or the context
/// holds no validated plan. The correlation id from validation wins over one
/// stamped on the event metadata.
pub async fn settle_terminal_event(
    facilitator: &dyn PermissionFacilitator,
    context: &AuthContext,
    agent_id: Option<&str>,
    update: &TaskStatusUpdateEvent,
) -> SettlementOutcome {
    let Some(credits_used) = update.credits_used() else {
        return SettlementOutcome::Skipped("event carries no metered credits");
    };
    let Some(validation) = context.validation.as_ref() else {
        return SettlementOutcome::Skipped("no plan to settle against");
    };
    if validation.plan_id.is_empty() {
        return SettlementOutcome::Skipped("no plan to settle against");
    }

    let agent_request_id = validation
        .agent_request_id
        .as_deref()
        .or_else(|| update.agent_request_id());

    let mut builder = PaymentRequiredBuilder::for_plan(validation.plan_id.clone())
        .endpoint(context.url_requested.clone())
        .http_verb(context.http_method_requested.clone())
        .scheme(validation.scheme);
    if let Some(agent_id) = agent_id {
        builder = builder.agent_id(agent_id);
    }
    let required = builder.build();

    match facilitator
        .settle(
            &required,
            &context.bearer_token,
            credits_used,
            agent_request_id,
        )
        .await
    {
        Ok(outcome) if outcome.success => SettlementOutcome::Settled {
            transaction: outcome.transaction,
        },
        Ok(outcome) => SettlementOutcome::Failed(
            outcome
                .error_reason
                .unwrap_or_else(|| "settlement rejected".to_string()),
        ),
        Err(error) => SettlementOutcome::Failed(error.to_string()),
    }
}

/// Event-pipeline stage that settles terminal metered events.
///
/// One tap exists per request; it carries the request's authorization
/// context into whichever reader (foreground or background continuation)
/// ends up observing the terminal event.
pub struct SettlementTap {
    facilitator: Arc<dyn PermissionFacilitator>,
    context: AuthContext,
    agent_id: Option<String>,
}

impl SettlementTap {
    #[must_use]
    pub fn new(
        facilitator: Arc<dyn PermissionFacilitator>,
        context: AuthContext,
        agent_id: Option<String>,
    ) -> Self {
        Self {
            facilitator,
            context,
            agent_id,
        }
    }
}

#[async_trait]
impl EventTap for SettlementTap {
    async fn on_event(&self, event: &ExecutionEvent) {
        let Some(update) = event.as_status_update() else {
            return;
        };
        if !update.is_final
            || update.credits_used().is_none()
            || self.context.bearer_token.is_empty()
        {
            return;
        }

        match settle_terminal_event(
            self.facilitator.as_ref(),
            &self.context,
            self.agent_id.as_deref(),
            update,
        )
        .await
        {
            SettlementOutcome::Settled { .. } => {
                tracing::debug!(task_id = %update.task_id, "credits settled");
            }
            SettlementOutcome::Skipped(reason) => {
                tracing::debug!(task_id = %update.task_id, reason, "settlement skipped");
            }
            SettlementOutcome::Failed(reason) => {
                tracing::warn!(task_id = %update.task_id, reason = %reason, "credit settlement failed");
            }
        }
    }
}
