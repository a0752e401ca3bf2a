//! Request Classifier
//!
//! Every inbound method maps to exactly one [`RequestClass`]. Methods that are
//! in none of the tables are treated as signing so that nothing unknown runs
//! without the user's approval.

use serde::Serialize;
use std::fmt;

/// Methods that authorize a transaction or a message
pub const SIGNING_METHODS: &[&str] = &[
    "eth_sendTransaction",
    "eth_signTransaction",
    "eth_sign",
    "personal_sign",
    "eth_signTypedData",
    "eth_signTypedData_v3",
    "eth_signTypedData_v4",
];

/// Chain switching is handled at session-update granularity
pub const CHAIN_MANAGEMENT_METHODS: &[&str] =
    &["wallet_addEthereumChain", "wallet_switchEthereumChain"];

/// Read-only queries forwarded verbatim to chain infrastructure
pub const PASSTHROUGH_METHODS: &[&str] = &[
    "eth_accounts",
    "eth_blockNumber",
    "eth_call",
    "eth_chainId",
    "eth_estimateGas",
    "eth_feeHistory",
    "eth_gasPrice",
    "eth_getBalance",
    "eth_getBlockByHash",
    "eth_getBlockByNumber",
    "eth_getBlockTransactionCountByHash",
    "eth_getBlockTransactionCountByNumber",
    "eth_getCode",
    "eth_getLogs",
    "eth_getStorageAt",
    "eth_getTransactionByBlockHashAndIndex",
    "eth_getTransactionByBlockNumberAndIndex",
    "eth_getTransactionByHash",
    "eth_getTransactionCount",
    "eth_getTransactionReceipt",
    "eth_maxPriorityFeePerGas",
    "eth_protocolVersion",
    "eth_syncing",
    "net_listening",
    "net_peerCount",
    "net_version",
    "web3_clientVersion",
    "web3_sha3",
];

/// How an inbound request is routed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestClass {
    /// Acknowledged without RPC or signing UI
    ChainManagement,
    /// Forwarded to the RPC executor
    Passthrough,
    /// Requires user approval
    Signing,
}

impl fmt::Display for RequestClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestClass::ChainManagement => "chain-management",
            RequestClass::Passthrough => "passthrough",
            RequestClass::Signing => "signing",
        };
        f.write_str(name)
    }
}

pub fn classify(method: &str) -> RequestClass {
    if CHAIN_MANAGEMENT_METHODS.contains(&method) {
        RequestClass::ChainManagement
    } else if PASSTHROUGH_METHODS.contains(&method) {
        RequestClass::Passthrough
    } else {
        RequestClass::Signing
    }
}

pub fn is_signing_method(method: &str) -> bool {
    classify(method) == RequestClass::Signing
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_tables_are_disjoint() {
        let signing: HashSet<_> = SIGNING_METHODS.iter().collect();
        let chain: HashSet<_> = CHAIN_MANAGEMENT_METHODS.iter().collect();
        let passthrough: HashSet<_> = PASSTHROUGH_METHODS.iter().collect();

        assert!(signing.is_disjoint(&chain));
        assert!(signing.is_disjoint(&passthrough));
        assert!(chain.is_disjoint(&passthrough));
    }

    #[test]
    fn test_every_table_entry_classifies_to_its_table() {
        for method in SIGNING_METHODS {
            assert_eq!(classify(method), RequestClass::Signing, "{method}");
        }
        for method in CHAIN_MANAGEMENT_METHODS {
            assert_eq!(classify(method), RequestClass::ChainManagement, "{method}");
        }
        for method in PASSTHROUGH_METHODS {
            assert_eq!(classify(method), RequestClass::Passthrough, "{method}");
        }
    }

    #[test]
    fn test_unknown_methods_require_signing() {
        assert_eq!(classify("eth_someNewThing"), RequestClass::Signing);
        assert_eq!(classify(""), RequestClass::Signing);
        assert!(is_signing_method("wallet_watchAsset"));
    }

    #[test]
    fn test_common_methods() {
        assert_eq!(classify("eth_chainId"), RequestClass::Passthrough);
        assert_eq!(classify("eth_sendTransaction"), RequestClass::Signing);
        assert_eq!(
            classify("wallet_addEthereumChain"),
            RequestClass::ChainManagement
        );
        assert!(!is_signing_method("eth_getBalance"));
    }
}
