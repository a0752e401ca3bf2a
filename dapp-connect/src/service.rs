//! Wallet-facing entry point.
//!
//! [`WalletConnect`] wires the relay client, registry, approval coordinator,
//! and router together and starts routing events.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::{
    approval::{ApprovalCoordinator, ProposalDecision, SigningDecision, TicketId},
    chain::ChainId,
    client::ClientSlot,
    config::Config,
    error::Result,
    registry::{SessionRegistry, SessionSummary},
    router::{self, Collaborators, RouterSettings, SessionEventRouter},
    transport::{RelayConnector, Session, Topic},
};

pub struct WalletConnect {
    registry: Arc<SessionRegistry>,
    approvals: Arc<ApprovalCoordinator>,
    router: Arc<dyn SessionEventRouter>,
}

impl WalletConnect {
    /// Connect (or reuse the slot's client) and start routing relay events.
    ///
    /// Only the first start on a slot gets the event stream; a second start
    /// on the same slot fails with `EventsTaken`.
    pub async fn start(
        slot: &ClientSlot,
        connector: &dyn RelayConnector,
        config: &Config,
        collaborators: Collaborators,
    ) -> Result<(Self, JoinHandle<()>)> {
        let relay = slot.get_or_init(connector, &config.relay).await?;
        let events = relay.take_events()?;

        let approvals = Arc::new(ApprovalCoordinator::new());
        let registry = Arc::new(SessionRegistry::new(
            relay.clone(),
            approvals.clone(),
            config.relay.metadata.clone(),
        ));

        let router = router::build(
            config.protocol.version,
            relay,
            registry.clone(),
            approvals.clone(),
            collaborators,
            RouterSettings::from(&config.signing),
        );
        let handle = tokio::spawn(router::run(router.clone(), events));
        info!("WalletConnect started as {}", config.relay.metadata.name);

        Ok((
            Self {
                registry,
                approvals,
                router,
            },
            handle,
        ))
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn approvals(&self) -> &Arc<ApprovalCoordinator> {
        &self.approvals
    }

    pub fn router(&self) -> &Arc<dyn SessionEventRouter> {
        &self.router
    }

    pub async fn pair(&self, uri: &str) -> Result<()> {
        self.registry.pair(uri).await
    }

    pub fn sessions(&self) -> Vec<SessionSummary> {
        self.registry.list_sessions()
    }

    pub fn approve_session(&self, ticket: TicketId, chain_id: u64, address: &str) -> Result<()> {
        self.approvals.resolve_proposal(
            ticket,
            ProposalDecision::Approve {
                chain_id,
                address: address.to_string(),
            },
        )?;
        Ok(())
    }

    pub fn reject_session(&self, ticket: TicketId) -> Result<()> {
        self.approvals
            .resolve_proposal(ticket, ProposalDecision::Reject)?;
        Ok(())
    }

    pub fn resolve_signing(&self, ticket: TicketId, decision: SigningDecision) -> Result<()> {
        self.approvals.resolve_signing(ticket, decision)?;
        Ok(())
    }

    pub async fn disconnect_by_dapp_name(&self, name: &str) -> Result<Topic> {
        self.registry.disconnect_by_dapp_name(name).await
    }

    pub async fn disconnect_all(&self) -> Result<usize> {
        self.registry.disconnect_all().await
    }

    pub async fn update_account_by_dapp_name(
        &self,
        name: &str,
        address: &str,
        chain_id: u64,
    ) -> Result<Session> {
        self.registry
            .update_account_by_dapp_name(name, address, &ChainId::eip155(chain_id))
            .await
    }
}
