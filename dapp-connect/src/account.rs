//! Account Codec
//!
//! Session state binds accounts as `<address>@<chain id>`, e.g.
//! `0xABC@eip155:1`.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

use crate::chain::{ChainError, ChainId};

/// Separator between the address and the chain id
const ACCOUNT_SEPARATOR: char = '@';

/// A malformed account identifier
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("account {0:?} has no '@' separator")]
    MissingSeparator(String),

    #[error("account {0:?} has an empty address")]
    EmptyAddress(String),

    #[error("account {account:?} has a bad chain id: {source}")]
    Chain {
        account: String,
        #[source]
        source: ChainError,
    },
}

/// An address bound to a chain
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountId {
    pub address: String,
    pub chain: ChainId,
}

impl AccountId {
    pub fn new(address: impl Into<String>, chain: ChainId) -> Self {
        Self {
            address: address.into(),
            chain,
        }
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.address, ACCOUNT_SEPARATOR, self.chain)
    }
}

impl FromStr for AccountId {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Chain ids never contain '@', so split on the last one.
        let (address, chain) = s
            .rsplit_once(ACCOUNT_SEPARATOR)
            .ok_or_else(|| DecodeError::MissingSeparator(s.to_string()))?;

        if address.is_empty() {
            return Err(DecodeError::EmptyAddress(s.to_string()));
        }

        let chain = chain.parse::<ChainId>().map_err(|source| DecodeError::Chain {
            account: s.to_string(),
            source,
        })?;

        Ok(Self::new(address, chain))
    }
}

impl TryFrom<String> for AccountId {
    type Error = DecodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AccountId> for String {
    fn from(account: AccountId) -> Self {
        account.to_string()
    }
}

/// Encode an address and chain into a session account string
pub fn encode(address: &str, chain: &ChainId) -> String {
    AccountId::new(address, chain.clone()).to_string()
}

/// Decode a session account string into the address and native chain id
pub fn decode(account: &str) -> Result<(String, u64), DecodeError> {
    let parsed: AccountId = account.parse()?;
    let native = parsed.chain.native().map_err(|source| DecodeError::Chain {
        account: account.to_string(),
        source,
    })?;
    Ok((parsed.address, native))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{supported_chains, to_native_id};
    use proptest::prelude::*;

    #[test]
    fn test_encode_matches_wire_format() {
        assert_eq!(encode("0xABC", &ChainId::eip155(1)), "0xABC@eip155:1");
    }

    #[test]
    fn test_decode_returns_native_chain() {
        let (address, chain) = decode("0xABC@eip155:137").unwrap();
        assert_eq!(address, "0xABC");
        assert_eq!(chain, 137);
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert!(matches!(
            decode("0xABC"),
            Err(DecodeError::MissingSeparator(_))
        ));
        assert!(matches!(
            decode("@eip155:1"),
            Err(DecodeError::EmptyAddress(_))
        ));
        assert!(matches!(decode("0xABC@1"), Err(DecodeError::Chain { .. })));
        assert!(matches!(
            decode("0xABC@cosmos:1"),
            Err(DecodeError::Chain {
                source: ChainError::UnknownNamespace(_),
                ..
            })
        ));
    }

    proptest! {
        #[test]
        fn test_decode_inverts_encode(
            address in "0x[0-9a-fA-F]{1,40}",
            index in 0usize..8,
        ) {
            let chain = supported_chains().nth(index).unwrap();
            let encoded = encode(&address, &chain);
            let decoded = decode(&encoded).unwrap();
            prop_assert_eq!(decoded, (address, to_native_id(&chain.to_string()).unwrap()));
        }
    }
}
