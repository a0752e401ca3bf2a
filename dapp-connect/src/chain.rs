//! Chain Registry
//!
//! Validates protocol chain identifiers (`<namespace>:<reference>`) against the
//! wallet's allow-list and converts between them and native EVM chain ids.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

/// Namespace for EVM chains
pub const EIP155_NAMESPACE: &str = "eip155";

/// Main networks the wallet can sign for
pub const SUPPORTED_MAIN_CHAINS: &[u64] = &[1, 10, 137, 42161];

/// Test networks the wallet can sign for
pub const SUPPORTED_TEST_CHAINS: &[u64] = &[3, 4, 5, 42];

/// Errors raised while parsing a chain identifier
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    /// No `:` between namespace and reference
    #[error("chain id {0:?} has no namespace separator")]
    MissingNamespace(String),

    /// Reference part is not a decimal number
    #[error("chain id {0:?} has a non-numeric reference")]
    InvalidReference(String),

    /// Namespace other than eip155, which has no native id
    #[error("chain namespace {0:?} has no native chain id")]
    UnknownNamespace(String),
}

/// A protocol-qualified chain identifier such as `eip155:137`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChainId {
    namespace: String,
    reference: u64,
}

impl ChainId {
    /// Build an eip155 chain id from a native chain id
    pub fn eip155(native: u64) -> Self {
        Self {
            namespace: EIP155_NAMESPACE.to_string(),
            reference: native,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn reference(&self) -> u64 {
        self.reference
    }

    /// Native chain id, only defined for the eip155 namespace
    pub fn native(&self) -> Result<u64, ChainError> {
        if self.namespace == EIP155_NAMESPACE {
            Ok(self.reference)
        } else {
            Err(ChainError::UnknownNamespace(self.namespace.clone()))
        }
    }

    /// Whether this chain is on the allow-list
    pub fn is_supported(&self) -> bool {
        self.namespace == EIP155_NAMESPACE
            && (SUPPORTED_MAIN_CHAINS.contains(&self.reference)
                || SUPPORTED_TEST_CHAINS.contains(&self.reference))
    }
}

impl FromStr for ChainId {
    type Err = ChainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (namespace, reference) = s
            .split_once(':')
            .ok_or_else(|| ChainError::MissingNamespace(s.to_string()))?;

        if namespace.is_empty() {
            return Err(ChainError::MissingNamespace(s.to_string()));
        }

        let reference = reference
            .parse::<u64>()
            .map_err(|_| ChainError::InvalidReference(s.to_string()))?;

        Ok(Self {
            namespace: namespace.to_string(),
            reference,
        })
    }
}

impl TryFrom<String> for ChainId {
    type Error = ChainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ChainId> for String {
    fn from(chain: ChainId) -> Self {
        chain.to_string()
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.reference)
    }
}

/// Check a raw chain identifier against the allow-list.
///
/// Malformed identifiers are unsupported rather than an error.
pub fn is_supported(chain: &str) -> bool {
    chain
        .parse::<ChainId>()
        .map(|c| c.is_supported())
        .unwrap_or(false)
}

/// `1` -> `eip155:1`
pub fn to_protocol_id(native: u64) -> ChainId {
    ChainId::eip155(native)
}

/// `eip155:1` -> `1`
pub fn to_native_id(chain: &str) -> Result<u64, ChainError> {
    chain.parse::<ChainId>()?.native()
}

pub fn is_testnet(native: u64) -> bool {
    SUPPORTED_TEST_CHAINS.contains(&native)
}

/// All supported chains, main networks first
pub fn supported_chains() -> impl Iterator<Item = ChainId> {
    SUPPORTED_MAIN_CHAINS
        .iter()
        .chain(SUPPORTED_TEST_CHAINS)
        .copied()
        .map(ChainId::eip155)
}
