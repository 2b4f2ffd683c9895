use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::schemes::PaymentScheme;

/// x402 protocol version carried on every payment-required descriptor.
pub const X402_VERSION: u32 = 2;

/// Describes what must be authorized for a protected resource.
///
/// Built on demand for verify and settle calls, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequired {
    pub x402_version: u32,
    pub resource: PaymentResource,
    pub accepts: Vec<PaymentRequirement>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extensions: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentResource {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirement {
    pub scheme: PaymentScheme,
    pub network: String,
    pub plan_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<RequirementExtra>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequirementExtra {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_verb: Option<String>,
}

/// Builder for [`PaymentRequired`] descriptors.
///
/// One `accepts` entry is emitted per plan id, all sharing the same scheme,
/// network, and extra fields. The network is derived from the scheme unless
/// set explicitly.
#[derive(Debug, Clone, Default)]
pub struct PaymentRequiredBuilder {
    plan_ids: Vec<String>,
    endpoint: Option<String>,
    agent_id: Option<String>,
    http_verb: Option<String>,
    network: Option<String>,
    description: Option<String>,
    scheme: PaymentScheme,
}

impl PaymentRequiredBuilder {
    #[must_use]
    pub fn for_plan(plan_id: impl Into<String>) -> Self {
        Self {
            plan_ids: vec![plan_id.into()],
            ..Self::default()
        }
    }

    #[must_use]
    pub fn for_plans(plan_ids: Vec<String>) -> Self {
        Self {
            plan_ids,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    #[must_use]
    pub fn agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    #[must_use]
    pub fn http_verb(mut self, http_verb: impl Into<String>) -> Self {
        self.http_verb = Some(http_verb.into());
        self
    }

    #[must_use]
    pub fn network(mut self, network: impl Into<String>) -> Self {
        self.network = Some(network.into());
        self
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn scheme(mut self, scheme: PaymentScheme) -> Self {
        self.scheme = scheme;
        self
    }

    #[must_use]
    pub fn build(self) -> PaymentRequired {
        let network = self
            .network
            .unwrap_or_else(|| self.scheme.default_network().to_string());

        let extra = if self.agent_id.is_some() || self.http_verb.is_some() {
            Some(RequirementExtra {
                agent_id: self.agent_id,
                http_verb: self.http_verb,
            })
        } else {
            None
        };

        let accepts = self
            .plan_ids
            .into_iter()
            .map(|plan_id| PaymentRequirement {
                scheme: self.scheme,
                network: network.clone(),
                plan_id,
                extra: extra.clone(),
            })
            .collect();

        PaymentRequired {
            x402_version: X402_VERSION,
            resource: PaymentResource {
                url: self.endpoint.unwrap_or_default(),
                description: self.description,
            },
            accepts,
            extensions: Map::new(),
        }
    }
}
