//! Session Event Router
//!
//! Turns relay events into registry mutations and protocol responses.
//!
//! Per session: `Proposed → Settled → Disconnected`.
//! Per request: `Received → Classified → {Executing | AwaitingApproval} →
//! Responded`. `Responded` is terminal and reached exactly once.
//!
//! Routers are versioned behind [`SessionEventRouter`] so a new protocol
//! revision can be added next to the current one. [`run`] drives any router
//! from the relay's event stream.
//!
//! Dispatch is synchronous and runs in event order, which keeps per-topic
//! ordering. Anything that waits (relay round-trips, RPC calls, the user) is
//! spawned, so one slow approval never holds up other sessions.

pub mod v2;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, panic::AssertUnwindSafe, sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::{
    approval::{ApprovalCoordinator, ApprovalPresenter},
    config::SigningConfig,
    notify::{ErrorReporter, Notifier},
    registry::SessionRegistry,
    rpc::RpcExecutor,
    transport::{RelayClient, Topic, TransportEvent},
    wallet::WalletStatus,
};

/// Wire protocol revision a router speaks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum ProtocolVersion {
    #[default]
    V2,
}

/// Where an inbound request is in its lifecycle. Responded requests are
/// removed from tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Received,
    Classified,
    Executing,
    AwaitingApproval,
}

/// In-flight requests keyed by `(topic, request id)`
#[derive(Debug, Default)]
pub struct PendingRequests {
    entries: Mutex<HashMap<(Topic, u64), RequestState>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a request. False if it is already in flight.
    pub fn begin(&self, topic: &str, id: u64) -> bool {
        let mut entries = self.entries.lock();
        let key = (topic.to_string(), id);
        if entries.contains_key(&key) {
            return false;
        }
        entries.insert(key, RequestState::Received);
        true
    }

    pub fn advance(&self, topic: &str, id: u64, state: RequestState) {
        if let Some(current) = self.entries.lock().get_mut(&(topic.to_string(), id)) {
            *current = state;
        }
    }

    /// Stop tracking a request. Only the first call for a request returns
    /// true, and only that caller may send the response.
    pub fn finish(&self, topic: &str, id: u64) -> bool {
        self.entries
            .lock()
            .remove(&(topic.to_string(), id))
            .is_some()
    }

    pub fn state(&self, topic: &str, id: u64) -> Option<RequestState> {
        self.entries.lock().get(&(topic.to_string(), id)).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// External actors the router talks to
#[derive(Clone)]
pub struct Collaborators {
    pub presenter: Arc<dyn ApprovalPresenter>,
    pub executor: Arc<dyn RpcExecutor>,
    pub wallet: Arc<dyn WalletStatus>,
    pub notifier: Arc<dyn Notifier>,
    pub reporter: Arc<dyn ErrorReporter>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouterSettings {
    /// Let watch-only wallets see signing prompts
    pub allow_signing_on_read_only: bool,
    /// Cancel approvals nobody acted on within this long
    pub approval_timeout: Option<Duration>,
}

impl From<&SigningConfig> for RouterSettings {
    fn from(config: &SigningConfig) -> Self {
        Self {
            allow_signing_on_read_only: config.allow_on_read_only,
            approval_timeout: config.approval_timeout(),
        }
    }
}

/// Common interface of every protocol revision's router
pub trait SessionEventRouter: Send + Sync {
    fn version(&self) -> ProtocolVersion;

    /// Take one event. Must be called from within a Tokio runtime.
    fn dispatch(&self, event: TransportEvent);

    /// Requests not yet responded to
    fn in_flight(&self) -> usize;
}

/// Build the router for a protocol revision
pub fn build(
    version: ProtocolVersion,
    relay: Arc<dyn RelayClient>,
    registry: Arc<SessionRegistry>,
    approvals: Arc<ApprovalCoordinator>,
    collaborators: Collaborators,
    settings: RouterSettings,
) -> Arc<dyn SessionEventRouter> {
    match version {
        ProtocolVersion::V2 => Arc::new(v2::RouterV2::new(
            relay,
            registry,
            approvals,
            collaborators,
            settings,
        )),
    }
}

/// Feed every relay event to the router until the stream closes.
///
/// A panicking dispatch is logged and the loop keeps going.
pub async fn run(
    router: Arc<dyn SessionEventRouter>,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
) {
    info!("Routing {:?} session events", router.version());

    while let Some(event) = events.recv().await {
        debug!(event = event.name(), topic = event.topic(), "Transport event");
        if std::panic::catch_unwind(AssertUnwindSafe(|| router.dispatch(event))).is_err() {
            error!("Event dispatch panicked, continuing with next event");
        }
    }

    info!("Transport event stream closed");
}
