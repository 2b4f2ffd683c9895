//! x402 payment primitives used by Tollgate's payment-gated task handlers.

pub mod facilitator;
pub mod requirements;
pub mod resolver;
pub mod schemes;
pub mod token;

pub use facilitator::{
    FacilitatorApiClient, FacilitatorError, PermissionFacilitator, SettleOutcome, VerifyOutcome,
};
pub use requirements::{
    PaymentRequired, PaymentRequiredBuilder, PaymentRequirement, PaymentResource, RequirementExtra,
    X402_VERSION,
};
pub use resolver::{PlanRegistry, PlanRegistryError, SCHEME_CACHE_TTL, SchemeCache, SchemeResolver};
pub use schemes::PaymentScheme;
pub use token::{AcceptedPayment, AccessToken, TokenAuthorization, TokenPayload, decode_access_token};
