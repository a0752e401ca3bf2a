//! In-process relay.
//!
//! Keeps sessions in memory, generates topics, and records every outbound
//! call so tests and local tooling can inspect what the wallet sent.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use tokio::sync::mpsc;
use tracing::debug;

use super::{
    Permissions, Proposal, Reason, RelayClient, RelayConnector, RelayError, Session,
    SessionResponse, SessionState, SessionStatus, Topic, TransportEvent,
};
use crate::{config::RelayConfig, jsonrpc::JsonRpcResponse};

/// Scheme prefix of pairing URIs
const PAIRING_SCHEME: &str = "wc:";

#[derive(Debug, Default)]
struct MemoryState {
    sessions: Vec<Session>,
    pairings: Vec<Topic>,
    approvals: Vec<(Proposal, SessionResponse)>,
    rejections: Vec<(Proposal, Reason)>,
    responses: Vec<(Topic, JsonRpcResponse)>,
    disconnects: Vec<(Topic, Reason)>,
}

/// In-memory [`RelayClient`]
#[derive(Debug)]
pub struct MemoryRelay {
    state: Mutex<MemoryState>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
}

impl Default for MemoryRelay {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRelay {
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            state: Mutex::new(MemoryState::default()),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    /// Deliver an event as if it came from the relay
    pub fn emit(&self, event: TransportEvent) {
        // A dropped receiver just means nobody is routing events.
        let _ = self.events_tx.send(event);
    }

    /// Seed a settled session without going through a proposal
    pub fn insert_session(&self, session: Session) {
        self.state.lock().sessions.push(session);
    }

    pub fn pairings(&self) -> Vec<Topic> {
        self.state.lock().pairings.clone()
    }

    pub fn approvals(&self) -> Vec<(Proposal, SessionResponse)> {
        self.state.lock().approvals.clone()
    }

    pub fn rejections(&self) -> Vec<(Proposal, Reason)> {
        self.state.lock().rejections.clone()
    }

    /// Every respond attempt, including ones on topics that no longer exist
    pub fn responses(&self) -> Vec<(Topic, JsonRpcResponse)> {
        self.state.lock().responses.clone()
    }

    pub fn disconnects(&self) -> Vec<(Topic, Reason)> {
        self.state.lock().disconnects.clone()
    }

    fn with_session<T>(
        &self,
        topic: &str,
        f: impl FnOnce(&mut Session) -> T,
    ) -> Result<T, RelayError> {
        let mut state = self.state.lock();
        let session = state
            .sessions
            .iter_mut()
            .find(|s| s.topic == topic)
            .ok_or_else(|| RelayError::SessionNotFound(topic.to_string()))?;
        Ok(f(session))
    }
}

fn new_topic() -> Topic {
    hex::encode(rand::random::<[u8; 32]>())
}

#[async_trait]
impl RelayClient for MemoryRelay {
    fn take_events(&self) -> Result<mpsc::UnboundedReceiver<TransportEvent>, RelayError> {
        self.events_rx.lock().take().ok_or(RelayError::EventsTaken)
    }

    async fn pair(&self, uri: &str) -> Result<(), RelayError> {
        let topic = uri
            .strip_prefix(PAIRING_SCHEME)
            .and_then(|rest| rest.split_once('@'))
            .map(|(topic, _)| topic)
            .filter(|topic| !topic.is_empty())
            .ok_or_else(|| RelayError::InvalidUri(uri.to_string()))?;

        debug!("Paired on topic {}", topic);
        self.state.lock().pairings.push(topic.to_string());
        Ok(())
    }

    async fn approve(
        &self,
        proposal: &Proposal,
        response: SessionResponse,
    ) -> Result<Session, RelayError> {
        let session = Session {
            topic: new_topic(),
            peer: proposal.proposer.metadata.clone(),
            permissions: proposal.permissions.clone(),
            state: response.state.clone(),
            status: SessionStatus::Settled,
        };

        {
            let mut state = self.state.lock();
            state.approvals.push((proposal.clone(), response));
            state.sessions.push(session.clone());
        }

        self.emit(TransportEvent::SessionCreated(session.clone()));
        Ok(session)
    }

    async fn reject(&self, proposal: &Proposal, reason: Reason) -> Result<(), RelayError> {
        self.state
            .lock()
            .rejections
            .push((proposal.clone(), reason));
        Ok(())
    }

    async fn respond(&self, topic: &str, response: JsonRpcResponse) -> Result<(), RelayError> {
        let mut state = self.state.lock();
        state.responses.push((topic.to_string(), response));
        if state.sessions.iter().any(|s| s.topic == topic) {
            Ok(())
        } else {
            Err(RelayError::SessionNotFound(topic.to_string()))
        }
    }

    async fn disconnect(&self, topic: &str, reason: Reason) -> Result<(), RelayError> {
        {
            let mut state = self.state.lock();
            let index = state
                .sessions
                .iter()
                .position(|s| s.topic == topic)
                .ok_or_else(|| RelayError::SessionNotFound(topic.to_string()))?;
            state.sessions.remove(index);
            state.disconnects.push((topic.to_string(), reason.clone()));
        }

        self.emit(TransportEvent::SessionDeleted {
            topic: topic.to_string(),
            reason,
        });
        Ok(())
    }

    async fn update(&self, topic: &str, state: SessionState) -> Result<(), RelayError> {
        self.with_session(topic, |session| session.state = state)
    }

    async fn upgrade(&self, topic: &str, permissions: Permissions) -> Result<(), RelayError> {
        self.with_session(topic, |session| session.permissions = permissions)
    }

    fn sessions(&self) -> Vec<Session> {
        self.state.lock().sessions.clone()
    }

    fn session(&self, topic: &str) -> Option<Session> {
        self.state
            .lock()
            .sessions
            .iter()
            .find(|s| s.topic == topic)
            .cloned()
    }
}

/// Connector handing out one shared [`MemoryRelay`]
#[derive(Debug, Default)]
pub struct MemoryConnector {
    relay: Arc<MemoryRelay>,
    connects: AtomicUsize,
}

impl MemoryConnector {
    pub fn new(relay: Arc<MemoryRelay>) -> Self {
        Self {
            relay,
            connects: AtomicUsize::new(0),
        }
    }

    pub fn relay(&self) -> &Arc<MemoryRelay> {
        &self.relay
    }

    /// How many times `connect` ran
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RelayConnector for MemoryConnector {
    async fn connect(&self, config: &RelayConfig) -> Result<Arc<dyn RelayClient>, RelayError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        // Let concurrent callers overlap with this one.
        tokio::task::yield_now().await;
        debug!("Connected in-memory relay for {}", config.url);
        Ok(self.relay.clone())
    }
}
