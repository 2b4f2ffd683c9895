use std::fmt;

use serde::{Deserialize, Serialize};

/// Payment rails supported by the x402 protocol.
///
/// `Erc4337` is account-abstraction based crypto settlement and is the
/// default whenever a scheme cannot be determined. `CardDelegation` is
/// fiat settlement through delegated card charges.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentScheme {
    #[default]
    #[serde(rename = "nvm:erc4337")]
    Erc4337,
    #[serde(rename = "nvm:card-delegation")]
    CardDelegation,
}

impl PaymentScheme {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Erc4337 => "nvm:erc4337",
            Self::CardDelegation => "nvm:card-delegation",
        }
    }

    /// Type guard for wire values. Anything outside the two known
    /// identifiers is rejected.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "nvm:erc4337" => Some(Self::Erc4337),
            "nvm:card-delegation" => Some(Self::CardDelegation),
            _ => None,
        }
    }

    /// Default network identifier for each scheme.
    #[must_use]
    pub fn default_network(self) -> &'static str {
        match self {
            Self::Erc4337 => "eip155:84532",
            Self::CardDelegation => "stripe",
        }
    }
}

impl fmt::Display for PaymentScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
