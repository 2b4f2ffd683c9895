/// Caller-facing failure taxonomy for gated task handling.
///
/// Settlement and push-notification failures never appear here; they are
/// logged and swallowed at their own boundaries.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("payment required: {0}")]
    PaymentRequired(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl GateError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn payment_required(message: impl Into<String>) -> Self {
        Self::PaymentRequired(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::Unauthorized(_) => "unauthorized",
            Self::PaymentRequired(_) => "payment_required",
            Self::Internal(_) => "internal_error",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::BadRequest(message)
            | Self::Unauthorized(message)
            | Self::PaymentRequired(message)
            | Self::Internal(message) => message,
        }
    }
}
