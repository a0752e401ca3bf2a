//! RPC passthrough
//!
//! Non-signing requests are forwarded verbatim to chain infrastructure. The
//! router only depends on [`RpcExecutor`]; [`HttpRpcExecutor`] is the JSON-RPC
//! over HTTP implementation.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};
use thiserror::Error;
use tracing::debug;

use crate::{
    config::RpcConfig,
    jsonrpc::{JsonRpcError, JsonRpcRequest},
};

/// Outbound JSON-RPC request ID counter
static REQUEST_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Error)]
pub enum RpcPassthroughError {
    /// No endpoint configured for this chain
    #[error("no rpc endpoint for chain {0}")]
    UnknownChain(u64),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("http status {0}")]
    Status(u16),

    /// The node answered with a JSON-RPC error object
    #[error("rpc error {code}: {message}")]
    Rpc { code: i32, message: String },

    #[error("missing result in rpc response")]
    MissingResult,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RpcExecutor: Send + Sync {
    /// Execute `request` against chain `chain_id` and return its `result`
    async fn send_rpc_call(
        &self,
        chain_id: u64,
        request: &JsonRpcRequest,
    ) -> Result<Value, RpcPassthroughError>;
}

#[derive(Debug, Deserialize)]
struct NodeResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

/// Forwards requests to per-chain HTTP JSON-RPC endpoints
#[derive(Debug, Clone)]
pub struct HttpRpcExecutor {
    client: reqwest::Client,
    endpoints: HashMap<u64, String>,
}

impl HttpRpcExecutor {
    pub fn new(config: &RpcConfig) -> Result<Self, RpcPassthroughError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        let endpoints = config
            .endpoints
            .iter()
            .map(|e| (e.chain_id, e.url.clone()))
            .collect();

        Ok(Self { client, endpoints })
    }

    pub fn endpoint(&self, chain_id: u64) -> Option<&str> {
        self.endpoints.get(&chain_id).map(String::as_str)
    }
}

#[async_trait]
impl RpcExecutor for HttpRpcExecutor {
    async fn send_rpc_call(
        &self,
        chain_id: u64,
        request: &JsonRpcRequest,
    ) -> Result<Value, RpcPassthroughError> {
        let url = self
            .endpoint(chain_id)
            .ok_or(RpcPassthroughError::UnknownChain(chain_id))?;

        // The dapp's id is restored by the router when it responds.
        let outbound = JsonRpcRequest::new(
            REQUEST_ID.fetch_add(1, Ordering::SeqCst),
            request.method.clone(),
            request.params.clone(),
        );

        debug!("Forwarding {} to chain {}", request.method, chain_id);
        let response = self.client.post(url).json(&outbound).send().await?;

        if !response.status().is_success() {
            return Err(RpcPassthroughError::Status(response.status().as_u16()));
        }

        let body: NodeResponse = response.json().await?;
        if let Some(error) = body.error {
            return Err(RpcPassthroughError::Rpc {
                code: error.code,
                message: error.message,
            });
        }

        body.result.ok_or(RpcPassthroughError::MissingResult)
    }
}
