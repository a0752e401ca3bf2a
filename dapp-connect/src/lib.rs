//! Dapp Connect
//!
//! Wallet-side session layer for dapps paired over a relay. Dapps propose
//! sessions and send JSON-RPC requests; the wallet approves sessions, routes
//! each request to the right handler, and answers every request exactly once.
//!
//! ## Request routing
//!
//! - Chain-management methods are acknowledged without side effects
//! - Read-only methods are forwarded to chain RPC endpoints
//! - Everything else needs the user's approval before it is signed
//!
//! Watch-only wallets refuse signing requests up front.

pub mod account;
pub mod approval;
pub mod chain;
pub mod classifier;
pub mod client;
pub mod config;
pub mod error;
pub mod jsonrpc;
pub mod notify;
pub mod registry;
pub mod router;
pub mod rpc;
pub mod service;
pub mod transport;
pub mod wallet;

pub use approval::{ApprovalCoordinator, ChannelPresenter};
pub use chain::ChainId;
pub use client::ClientSlot;
pub use config::Config;
pub use error::{Result, WalletConnectError};
pub use registry::SessionRegistry;
pub use router::{Collaborators, ProtocolVersion, SessionEventRouter};
pub use rpc::HttpRpcExecutor;
pub use service::WalletConnect;
