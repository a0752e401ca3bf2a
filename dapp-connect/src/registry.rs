//! Session Registry
//!
//! The wallet's view of its sessions. The relay client's session store is the
//! only source of truth: every mutation goes through the relay and the result
//! is read back from it, nothing is cached here.
//!
//! Dapp names are not unique. Lookups used for disconnecting take the first
//! matching session, lookups used for updates take the last one.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::{
    account,
    approval::ApprovalCoordinator,
    chain::ChainId,
    error::{Result, WalletConnectError},
    transport::{
        AppMetadata, Permissions, Proposal, Reason, RelayClient, Session, SessionResponse,
        SessionState, Topic,
    },
};

/// Flattened session view for listing connected dapps
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub topic: Topic,
    pub account: String,
    pub chain_id: u64,
    pub dapp_name: String,
    pub dapp_url: String,
    pub dapp_icon: Option<String>,
}

impl SessionSummary {
    fn from_session(session: &Session) -> Result<Self> {
        let (address, chain_id) = account::decode(session.account().unwrap_or_default())?;

        Ok(Self {
            topic: session.topic.clone(),
            account: address,
            chain_id,
            dapp_name: session.peer.name.clone(),
            dapp_url: session.peer.url.clone(),
            dapp_icon: session.peer.icon().map(str::to_string),
        })
    }
}

pub struct SessionRegistry {
    relay: Arc<dyn RelayClient>,
    approvals: Arc<ApprovalCoordinator>,
    metadata: AppMetadata,
}

impl SessionRegistry {
    pub fn new(
        relay: Arc<dyn RelayClient>,
        approvals: Arc<ApprovalCoordinator>,
        metadata: AppMetadata,
    ) -> Self {
        Self {
            relay,
            approvals,
            metadata,
        }
    }

    /// All live sessions, in the order the relay registered them
    pub fn sessions(&self) -> Vec<Session> {
        self.relay.sessions()
    }

    pub fn session(&self, topic: &str) -> Option<Session> {
        self.relay.session(topic)
    }

    /// Summaries of every session with a well-formed account
    pub fn list_sessions(&self) -> Vec<SessionSummary> {
        self.relay
            .sessions()
            .iter()
            .filter_map(|session| match SessionSummary::from_session(session) {
                Ok(summary) => Some(summary),
                Err(e) => {
                    warn!("Skipping session {}: {}", session.topic, e);
                    None
                }
            })
            .collect()
    }

    /// First session whose peer has this name
    pub fn find_by_dapp_name(&self, name: &str) -> Option<Session> {
        self.relay
            .sessions()
            .into_iter()
            .find(|s| s.peer.name == name)
    }

    /// Most recently registered session whose peer has this name
    pub fn find_last_by_dapp_name(&self, name: &str) -> Option<Session> {
        self.relay
            .sessions()
            .into_iter()
            .rev()
            .find(|s| s.peer.name == name)
    }

    /// Pair with a dapp from a scanned URI
    pub async fn pair(&self, uri: &str) -> Result<()> {
        self.relay.pair(uri).await?;
        info!("Paired from uri");
        Ok(())
    }

    /// Approve a proposal binding `address` on `chain`
    pub async fn approve(
        &self,
        proposal: &Proposal,
        address: &str,
        chain: &ChainId,
    ) -> Result<Session> {
        if !chain.is_supported() {
            return Err(WalletConnectError::UnsupportedChain(chain.to_string()));
        }

        let response = SessionResponse {
            metadata: self.metadata.clone(),
            state: SessionState {
                accounts: vec![account::encode(address, chain)],
            },
        };

        let settled = self.relay.approve(proposal, response).await?;
        info!(
            "Approved session {} with {}",
            settled.topic, proposal.proposer.metadata.name
        );
        self.reread(&settled.topic)
    }

    pub async fn reject(&self, proposal: &Proposal, reason: Reason) -> Result<()> {
        self.relay.reject(proposal, reason).await?;
        info!("Rejected proposal from {}", proposal.proposer.metadata.name);
        Ok(())
    }

    /// Close a session. Approvals still pending on it are cancelled first so
    /// their requests get answered.
    ///
    /// Returns `SessionNotFound` if the session is already gone; callers
    /// should treat that as done.
    pub async fn disconnect(&self, topic: &str, reason: Reason) -> Result<()> {
        self.approvals.cancel_topic(topic);
        self.relay.disconnect(topic, reason).await?;
        info!("Disconnected session {}", topic);
        Ok(())
    }

    /// Close every session. Returns how many were actually closed.
    pub async fn disconnect_all(&self) -> Result<usize> {
        let sessions = self.relay.sessions();
        debug!("Disconnecting {} sessions", sessions.len());

        let mut closed = 0;
        for session in sessions {
            match self
                .disconnect(&session.topic, Reason::user_disconnected())
                .await
            {
                Ok(()) => closed += 1,
                Err(e) if e.is_session_not_found() => {
                    debug!("Session {} already closed", session.topic);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(closed)
    }

    /// Close the first session whose peer has this name
    pub async fn disconnect_by_dapp_name(&self, name: &str) -> Result<Topic> {
        let session = self
            .find_by_dapp_name(name)
            .ok_or_else(|| WalletConnectError::SessionNotFound(name.to_string()))?;
        self.disconnect(&session.topic, Reason::user_disconnected())
            .await?;
        Ok(session.topic)
    }

    /// Rebind the session's active account
    pub async fn update_account(
        &self,
        topic: &str,
        address: &str,
        chain: &ChainId,
    ) -> Result<Session> {
        if !chain.is_supported() {
            return Err(WalletConnectError::UnsupportedChain(chain.to_string()));
        }

        let state = SessionState {
            accounts: vec![account::encode(address, chain)],
        };
        self.relay.update(topic, state).await?;
        info!("Updated session {} to {}", topic, chain);
        self.reread(topic)
    }

    /// Rebind the account of the last session registered under this name
    pub async fn update_account_by_dapp_name(
        &self,
        name: &str,
        address: &str,
        chain: &ChainId,
    ) -> Result<Session> {
        let session = self
            .find_last_by_dapp_name(name)
            .ok_or_else(|| WalletConnectError::SessionNotFound(name.to_string()))?;
        self.update_account(&session.topic, address, chain).await
    }

    /// Replace the chains granted to a session
    pub async fn upgrade_permissions(&self, topic: &str, chains: &[ChainId]) -> Result<Session> {
        if let Some(unsupported) = chains.iter().find(|c| !c.is_supported()) {
            return Err(WalletConnectError::UnsupportedChain(unsupported.to_string()));
        }

        let current = self
            .relay
            .session(topic)
            .ok_or_else(|| WalletConnectError::SessionNotFound(topic.to_string()))?;

        let permissions = Permissions {
            chains: chains.iter().map(ChainId::to_string).collect(),
            methods: current.permissions.methods,
        };
        self.relay.upgrade(topic, permissions).await?;
        info!("Upgraded session {} to {} chains", topic, chains.len());
        self.reread(topic)
    }

    fn reread(&self, topic: &str) -> Result<Session> {
        self.relay
            .session(topic)
            .ok_or_else(|| WalletConnectError::SessionNotFound(topic.to_string()))
    }
}
