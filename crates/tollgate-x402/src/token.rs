use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use serde::Deserialize;

use crate::schemes::PaymentScheme;

/// Decoded x402 access token.
///
/// The bearer credential is a base64-encoded JSON document carrying the
/// accepted payment terms and the subscriber's signed authorization. Only
/// the fields this crate reads are modeled; everything else is ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessToken {
    #[serde(default)]
    pub accepted: Option<AcceptedPayment>,
    #[serde(default)]
    pub payload: Option<TokenPayload>,
    #[serde(default)]
    pub plan_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedPayment {
    #[serde(default)]
    pub scheme: Option<String>,
    #[serde(default)]
    pub network: Option<String>,
    #[serde(default)]
    pub plan_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPayload {
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub authorization: Option<TokenAuthorization>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenAuthorization {
    #[serde(default)]
    pub from: Option<String>,
}

impl AccessToken {
    /// Plan id embedded in the token: top-level `planId` first, then the
    /// accepted payment terms.
    #[must_use]
    pub fn plan_id(&self) -> Option<&str> {
        self.plan_id
            .as_deref()
            .or_else(|| self.accepted.as_ref().and_then(|a| a.plan_id.as_deref()))
    }

    /// Subscriber address from `payload.authorization.from`.
    #[must_use]
    pub fn subscriber_address(&self) -> Option<&str> {
        self.payload
            .as_ref()
            .and_then(|p| p.authorization.as_ref())
            .and_then(|a| a.from.as_deref())
    }

    /// Declared scheme from the accepted payment terms. Unknown scheme
    /// identifiers are treated as absent.
    #[must_use]
    pub fn declared_scheme(&self) -> Option<PaymentScheme> {
        self.accepted
            .as_ref()
            .and_then(|a| a.scheme.as_deref())
            .and_then(PaymentScheme::parse)
    }
}

/// Decode an x402 access token.
///
/// Tries URL-safe base64 first, then the standard alphabet. Padding is
/// normalized away before decoding. Returns `None` for anything that is
/// not base64-encoded JSON.
#[must_use]
pub fn decode_access_token(access_token: &str) -> Option<AccessToken> {
    let trimmed = access_token.trim().trim_end_matches('=');
    if trimmed.is_empty() {
        return None;
    }

    for engine in [&URL_SAFE_NO_PAD, &STANDARD_NO_PAD] {
        if let Ok(bytes) = engine.decode(trimmed) {
            if let Ok(token) = serde_json::from_slice::<AccessToken>(&bytes) {
                return Some(token);
            }
        }
    }

    None
}
