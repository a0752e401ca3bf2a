//! User-visible notices and the error sink.

use serde::Serialize;
use std::fmt;
use tracing::{error, warn};

/// Alerts surfaced to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "notice", rename_all = "snake_case")]
pub enum Notice {
    /// A dapp asked for a chain the wallet does not support
    UnsupportedChain { chain: String },
    /// A dapp asked a watch-only wallet to sign
    ReadOnlyWallet { dapp_name: String },
    /// Something went wrong while handling a dapp event
    GenericFailure,
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::UnsupportedChain { chain } => {
                write!(f, "Chain not supported: {} is not supported", chain)
            }
            Notice::ReadOnlyWallet { dapp_name } => write!(
                f,
                "{} asked to sign, but this wallet is in watch mode",
                dapp_name
            ),
            Notice::GenericFailure => write!(f, "Something went wrong, please try again"),
        }
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Where handler failures go. Reporting never changes control flow.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, error: &dyn std::error::Error, context: &str);
}

/// Notifier for headless use: notices only go to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notice: Notice) {
        warn!("{}", notice);
    }
}

/// Reporter that writes failures to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, error: &dyn std::error::Error, context: &str) {
        error!(context, "{}", error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notice_text() {
        let notice = Notice::UnsupportedChain {
            chain: "eip155:999".to_string(),
        };
        assert_eq!(
            notice.to_string(),
            "Chain not supported: eip155:999 is not supported"
        );
    }
}
