//! Approval Coordinator
//!
//! Bridges a decision made in an external UI back into the protocol flow.
//!
//! The router opens a [`Ticket`] and hands its [`TicketId`] to the
//! [`ApprovalPresenter`]. The UI later calls `resolve_*` with that id. The
//! ticket is a future the router awaits without blocking anything else:
//!
//! ```text
//!  router                    coordinator                    UI
//!    │ open_signing(topic) ─────▶ │                           │
//!    │ ◀──────── Ticket ───────── │                           │
//!    │ present_signing(prompt) ───┼─────────────────────────▶ │
//!    │ ticket.await               │ ◀── resolve_signing(id) ─ │
//!    │ ◀──────── decision ─────── │                           │
//! ```
//!
//! Resolution is one-shot: the entry is removed on the first `resolve` or
//! `cancel`, so a second call finds nothing and returns
//! [`ApprovalError::NotPending`].

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::{
    collections::HashMap,
    fmt,
    future::Future,
    pin::Pin,
    sync::atomic::{AtomicU64, Ordering},
    task::{Context, Poll},
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::{
    jsonrpc::JsonRpcRequest,
    transport::{Session, Topic},
};

/// Correlation id of one pending decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TicketId(u64);

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ticket-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApprovalError {
    /// Already resolved, cancelled, or never issued
    #[error("{0} is not pending")]
    NotPending(TicketId),

    #[error("{0} was cancelled")]
    Cancelled(TicketId),
}

/// The user's answer to a session proposal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProposalDecision {
    /// Bind `address` on native chain `chain_id`
    Approve { chain_id: u64, address: String },
    Reject,
}

/// The signer's answer to a signing request
#[derive(Debug, Clone, PartialEq)]
pub enum SigningDecision {
    /// Signature, transaction hash, or whatever the method returns
    Result(Value),
    /// Declined or failed, with a message for the dapp
    Error(String),
}

/// Awaitable side of a pending decision.
///
/// Resolves to `Err(ApprovalError::Cancelled)` when the ticket is cancelled.
#[derive(Debug)]
pub struct Ticket<D> {
    id: TicketId,
    rx: oneshot::Receiver<D>,
}

impl<D> Ticket<D> {
    pub fn id(&self) -> TicketId {
        self.id
    }
}

impl<D> Future for Ticket<D> {
    type Output = Result<D, ApprovalError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let id = self.id;
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.map_err(|_| ApprovalError::Cancelled(id)))
    }
}

struct PendingTicket<D> {
    topic: Topic,
    sender: oneshot::Sender<D>,
}

/// Pending tickets of one decision type
struct TicketBook<D> {
    entries: Mutex<HashMap<TicketId, PendingTicket<D>>>,
}

impl<D> TicketBook<D> {
    fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn open(&self, id: TicketId, topic: &str) -> Ticket<D> {
        let (sender, rx) = oneshot::channel();
        self.entries.lock().insert(
            id,
            PendingTicket {
                topic: topic.to_string(),
                sender,
            },
        );
        Ticket { id, rx }
    }

    fn resolve(&self, id: TicketId, decision: D) -> Result<(), ApprovalError> {
        let pending = self
            .entries
            .lock()
            .remove(&id)
            .ok_or(ApprovalError::NotPending(id))?;

        if pending.sender.send(decision).is_err() {
            debug!("{} resolved after its waiter went away", id);
        }
        Ok(())
    }

    /// Dropping the sender wakes the waiter with `Cancelled`
    fn cancel(&self, id: TicketId) -> bool {
        self.entries.lock().remove(&id).is_some()
    }

    fn cancel_topic(&self, topic: &str) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, pending| pending.topic != topic);
        before - entries.len()
    }

    fn contains(&self, id: TicketId) -> bool {
        self.entries.lock().contains_key(&id)
    }

    fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

/// Registry of every in-flight approval
pub struct ApprovalCoordinator {
    next_id: AtomicU64,
    proposals: TicketBook<ProposalDecision>,
    signing: TicketBook<SigningDecision>,
}

impl Default for ApprovalCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ApprovalCoordinator {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            proposals: TicketBook::new(),
            signing: TicketBook::new(),
        }
    }

    fn next_id(&self) -> TicketId {
        TicketId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    pub fn open_proposal(&self, topic: &str) -> Ticket<ProposalDecision> {
        self.proposals.open(self.next_id(), topic)
    }

    pub fn open_signing(&self, topic: &str) -> Ticket<SigningDecision> {
        self.signing.open(self.next_id(), topic)
    }

    pub fn resolve_proposal(
        &self,
        id: TicketId,
        decision: ProposalDecision,
    ) -> Result<(), ApprovalError> {
        self.proposals.resolve(id, decision)
    }

    pub fn resolve_signing(
        &self,
        id: TicketId,
        decision: SigningDecision,
    ) -> Result<(), ApprovalError> {
        self.signing.resolve(id, decision)
    }

    /// Cancel one ticket. Returns false if it was no longer pending.
    pub fn cancel(&self, id: TicketId) -> bool {
        self.proposals.cancel(id) || self.signing.cancel(id)
    }

    /// Cancel every ticket belonging to a topic
    pub fn cancel_topic(&self, topic: &str) -> usize {
        let cancelled = self.proposals.cancel_topic(topic) + self.signing.cancel_topic(topic);
        if cancelled > 0 {
            debug!("Cancelled {} approvals on topic {}", cancelled, topic);
        }
        cancelled
    }

    pub fn is_pending(&self, id: TicketId) -> bool {
        self.proposals.contains(id) || self.signing.contains(id)
    }

    /// Number of tickets awaiting a decision
    pub fn pending(&self) -> usize {
        self.proposals.len() + self.signing.len()
    }
}

/// What the approval sheet shows for a new session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalPrompt {
    pub ticket: TicketId,
    pub dapp_name: String,
    pub dapp_url: String,
    pub dapp_icon: Option<String>,
    /// Native id of the requested chain
    pub chain_id: u64,
}

/// What the confirmation screen shows for a signing request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SigningPrompt {
    pub ticket: TicketId,
    pub session: Session,
    pub request: JsonRpcRequest,
}

/// The approval UI. Presenting must not block; the answer comes back
/// through the coordinator.
pub trait ApprovalPresenter: Send + Sync {
    fn present_proposal(&self, prompt: ProposalPrompt);

    fn present_signing(&self, prompt: SigningPrompt);
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ApprovalRequest {
    Proposal(ProposalPrompt),
    Signing(SigningPrompt),
}

impl ApprovalRequest {
    pub fn ticket(&self) -> TicketId {
        match self {
            ApprovalRequest::Proposal(prompt) => prompt.ticket,
            ApprovalRequest::Signing(prompt) => prompt.ticket,
        }
    }
}

/// Presenter that queues prompts for a UI loop to pick up
#[derive(Debug, Clone)]
pub struct ChannelPresenter {
    sender: mpsc::UnboundedSender<ApprovalRequest>,
}

impl ChannelPresenter {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ApprovalRequest>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    fn send(&self, request: ApprovalRequest) {
        if self.sender.send(request).is_err() {
            debug!("Approval UI is gone, prompt dropped");
        }
    }
}

impl ApprovalPresenter for ChannelPresenter {
    fn present_proposal(&self, prompt: ProposalPrompt) {
        self.send(ApprovalRequest::Proposal(prompt));
    }

    fn present_signing(&self, prompt: SigningPrompt) {
        self.send(ApprovalRequest::Signing(prompt));
    }
}
