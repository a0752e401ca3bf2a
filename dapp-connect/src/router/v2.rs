//! Router for protocol v2 sessions.

use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use std::{
    collections::HashMap,
    future::Future,
    panic::AssertUnwindSafe,
    sync::{Arc, Weak},
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{
    Collaborators, PendingRequests, ProtocolVersion, RequestState, RouterSettings,
    SessionEventRouter,
};
use crate::{
    account,
    approval::{
        ApprovalCoordinator, ApprovalError, ApprovalPresenter, ProposalDecision, ProposalPrompt,
        SigningDecision, SigningPrompt, Ticket, TicketId,
    },
    chain::{self, ChainId},
    classifier::{classify, RequestClass},
    error::{Result, WalletConnectError},
    jsonrpc::{JsonRpcRequest, JsonRpcResponse, INTERNAL_ERROR},
    notify::Notice,
    registry::SessionRegistry,
    transport::{Proposal, Reason, RelayClient, RequestEvent, Session, Topic, TransportEvent},
};

struct Inner {
    relay: Arc<dyn RelayClient>,
    registry: Arc<SessionRegistry>,
    approvals: Arc<ApprovalCoordinator>,
    collaborators: Collaborators,
    settings: RouterSettings,
    pending: PendingRequests,
    /// Per-topic queues for responses decided during dispatch
    outboxes: Mutex<HashMap<Topic, mpsc::UnboundedSender<JsonRpcResponse>>>,
}

#[derive(Clone)]
pub struct RouterV2 {
    inner: Arc<Inner>,
}

impl RouterV2 {
    pub fn new(
        relay: Arc<dyn RelayClient>,
        registry: Arc<SessionRegistry>,
        approvals: Arc<ApprovalCoordinator>,
        collaborators: Collaborators,
        settings: RouterSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                relay,
                registry,
                approvals,
                collaborators,
                settings,
                pending: PendingRequests::new(),
                outboxes: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Lifecycle state of an unanswered request
    pub fn request_state(&self, topic: &str, id: u64) -> Option<RequestState> {
        self.inner.pending.state(topic, id)
    }

    fn handle(&self, event: TransportEvent) -> Result<()> {
        match event {
            TransportEvent::Proposal(proposal) => self.on_proposal(proposal),
            TransportEvent::SessionCreated(session) => {
                info!(
                    "Session {} settled with {}",
                    session.topic, session.peer.name
                );
                Ok(())
            }
            TransportEvent::Request(request) => {
                self.on_request(request);
                Ok(())
            }
            TransportEvent::SessionDeleted { topic, reason } => {
                let cancelled = self.inner.approvals.cancel_topic(&topic);
                self.close_outbox(&topic);
                info!(
                    "Session {} deleted ({}), {} approvals cancelled",
                    topic, reason.message, cancelled
                );
                Ok(())
            }
        }
    }

    fn on_proposal(&self, proposal: Proposal) -> Result<()> {
        let requested = proposal.requested_chain().unwrap_or_default().to_string();

        let native = match requested.parse::<ChainId>() {
            Ok(chain) if chain.is_supported() => chain.native()?,
            _ => {
                warn!(
                    "Rejecting proposal from {}: chain {:?} not supported",
                    proposal.proposer.metadata.name, requested
                );
                let notice = Notice::UnsupportedChain {
                    chain: requested.clone(),
                };

                let inner = self.inner.clone();
                self.spawn_task("reject_proposal", async move {
                    inner
                        .registry
                        .reject(&proposal, Reason::unsupported_chain(&requested))
                        .await
                });
                self.inner.collaborators.notifier.notify(notice);
                return Ok(());
            }
        };

        let ticket = self.inner.approvals.open_proposal(&proposal.topic);
        let ticket_id = ticket.id();
        let metadata = &proposal.proposer.metadata;
        info!(
            "Session proposal from {} on chain {} ({})",
            metadata.name, native, ticket_id
        );
        let prompt = ProposalPrompt {
            ticket: ticket_id,
            dapp_name: metadata.name.clone(),
            dapp_url: metadata.url.clone(),
            dapp_icon: metadata.icon().map(str::to_string),
            chain_id: native,
        };

        let inner = self.inner.clone();
        self.spawn_task("session_proposal", async move {
            inner.settle_proposal(proposal, ticket).await
        });
        self.present(ticket_id, "present_proposal", |presenter| {
            presenter.present_proposal(prompt)
        });
        Ok(())
    }

    /// Route one request. A panic while routing still answers the dapp.
    fn on_request(&self, event: RequestEvent) {
        let topic = event.topic.clone();
        let id = event.request.id;

        if !self.inner.pending.begin(&topic, id) {
            warn!(
                "Request {} on {} is already being handled, ignoring",
                id, topic
            );
            return;
        }

        if std::panic::catch_unwind(AssertUnwindSafe(|| self.route_request(event))).is_err() {
            self.respond_now(&topic, JsonRpcResponse::not_supported(id));
            self.inner
                .fail(&WalletConnectError::HandlerPanicked, "request");
        }
    }

    fn route_request(&self, event: RequestEvent) {
        let RequestEvent {
            topic,
            request,
            chain_id,
        } = event;
        let id = request.id;

        let Some(session) = self.inner.registry.session(&topic) else {
            warn!("Request {} for unknown session {}", id, topic);
            self.respond_now(&topic, JsonRpcResponse::not_supported(id));
            self.close_outbox(&topic);
            return;
        };

        let class = classify(&request.method);
        self.inner
            .pending
            .advance(&topic, id, RequestState::Classified);
        debug!("Request {} {} on {} is {}", id, request.method, topic, class);

        match class {
            RequestClass::ChainManagement => {
                info!("Acknowledging {} from {}", request.method, session.peer.name);
                self.respond_now(&topic, JsonRpcResponse::success(id, Value::Null));
            }
            RequestClass::Passthrough => {
                let target = match target_chain(&session, chain_id.as_deref()) {
                    Ok(target) => target,
                    Err(e) => {
                        warn!("Cannot route {} on {}: {}", request.method, topic, e);
                        self.respond_now(&topic, JsonRpcResponse::not_supported(id));
                        return;
                    }
                };

                self.inner
                    .pending
                    .advance(&topic, id, RequestState::Executing);
                let executor = self.inner.collaborators.executor.clone();
                self.spawn_request(topic, id, async move {
                    let response = match executor.send_rpc_call(target, &request).await {
                        Ok(result) => JsonRpcResponse::success(id, result),
                        Err(e) => {
                            warn!("{} on chain {} failed: {}", request.method, target, e);
                            JsonRpcResponse::not_supported(id)
                        }
                    };
                    Ok(response)
                });
            }
            RequestClass::Signing => self.on_signing(topic, session, request),
        }
    }

    fn check_can_sign(&self) -> Result<()> {
        if self.inner.collaborators.wallet.is_read_only()
            && !self.inner.settings.allow_signing_on_read_only
        {
            return Err(WalletConnectError::ReadOnlyWallet);
        }
        Ok(())
    }

    fn on_signing(&self, topic: Topic, session: Session, request: JsonRpcRequest) {
        let id = request.id;

        if let Err(e) = self.check_can_sign() {
            info!(
                "Refusing {} from {}: {}",
                request.method, session.peer.name, e
            );
            self.respond_now(&topic, JsonRpcResponse::not_supported(id));
            self.inner
                .collaborators
                .notifier
                .notify(Notice::ReadOnlyWallet {
                    dapp_name: session.peer.name,
                });
            return;
        }

        let ticket = self.inner.approvals.open_signing(&topic);
        let ticket_id = ticket.id();
        self.inner
            .pending
            .advance(&topic, id, RequestState::AwaitingApproval);
        info!(
            "{} from {} awaiting approval ({})",
            request.method, session.peer.name, ticket_id
        );

        let inner = self.inner.clone();
        self.spawn_request(topic, id, async move {
            let response = match inner.await_ticket(ticket).await {
                Ok(SigningDecision::Result(result)) => JsonRpcResponse::success(id, result),
                Ok(SigningDecision::Error(message)) => {
                    JsonRpcResponse::error(id, INTERNAL_ERROR, &message)
                }
                Err(e) => {
                    info!("{}, request {} not signed", e, id);
                    JsonRpcResponse::not_supported(id)
                }
            };
            Ok(response)
        });

        self.present(ticket_id, "present_signing", |presenter| {
            presenter.present_signing(SigningPrompt {
                ticket: ticket_id,
                session,
                request,
            })
        });
    }

    /// Hand a prompt to the approval UI. The ticket's waiter is already
    /// running, so a panicking presenter cancels the ticket to settle it.
    fn present(
        &self,
        ticket: TicketId,
        context: &'static str,
        show: impl FnOnce(&dyn ApprovalPresenter),
    ) {
        let presenter = self.inner.collaborators.presenter.as_ref();
        if std::panic::catch_unwind(AssertUnwindSafe(|| show(presenter))).is_err() {
            self.inner.approvals.cancel(ticket);
            self.inner.fail(&WalletConnectError::HandlerPanicked, context);
        }
    }

    /// Queue a response decided during dispatch. Responses queued on one
    /// topic go out in the order they were queued.
    fn respond_now(&self, topic: &str, response: JsonRpcResponse) {
        let mut outboxes = self.inner.outboxes.lock();
        let outbox = outboxes
            .entry(topic.to_string())
            .or_insert_with(|| open_outbox(Arc::downgrade(&self.inner), topic.to_string()));

        if let Err(mpsc::error::SendError(response)) = outbox.send(response) {
            outboxes.remove(topic);
            drop(outboxes);
            warn!("Outbox for {} is gone, sending directly", topic);
            let inner = self.inner.clone();
            let topic = topic.to_string();
            tokio::spawn(async move { inner.respond(&topic, response).await });
        }
    }

    /// Already queued responses still go out.
    fn close_outbox(&self, topic: &str) {
        self.inner.outboxes.lock().remove(topic);
    }

    /// Run a request continuation and send whatever it produces. A failed
    /// or panicked continuation still answers the dapp.
    fn spawn_request<F>(&self, topic: Topic, id: u64, task: F)
    where
        F: Future<Output = Result<JsonRpcResponse>> + Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let (response, failure) = match AssertUnwindSafe(task).catch_unwind().await {
                Ok(Ok(response)) => (response, None),
                Ok(Err(e)) => (JsonRpcResponse::not_supported(id), Some(e)),
                Err(_) => (
                    JsonRpcResponse::not_supported(id),
                    Some(WalletConnectError::HandlerPanicked),
                ),
            };
            inner.respond(&topic, response).await;
            if let Some(e) = failure {
                inner.fail(&e, "request");
            }
        });
    }

    fn spawn_task<F>(&self, context: &'static str, task: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            match AssertUnwindSafe(task).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => inner.fail(&e, context),
                Err(_) => inner.fail(&WalletConnectError::HandlerPanicked, context),
            }
        });
    }
}

impl SessionEventRouter for RouterV2 {
    fn version(&self) -> ProtocolVersion {
        ProtocolVersion::V2
    }

    fn dispatch(&self, event: TransportEvent) {
        let name = event.name();
        if let Err(e) = self.handle(event) {
            self.inner.fail(&e, name);
        }
    }

    fn in_flight(&self) -> usize {
        self.inner.pending.len()
    }
}

/// Start the task draining one topic's outbox. It stops once the outbox is
/// closed or the router is gone.
fn open_outbox(inner: Weak<Inner>, topic: Topic) -> mpsc::UnboundedSender<JsonRpcResponse> {
    let (sender, mut receiver) = mpsc::unbounded_channel::<JsonRpcResponse>();

    tokio::spawn(async move {
        while let Some(response) = receiver.recv().await {
            let Some(inner) = inner.upgrade() else {
                break;
            };
            if AssertUnwindSafe(inner.respond(&topic, response))
                .catch_unwind()
                .await
                .is_err()
            {
                inner.fail(&WalletConnectError::HandlerPanicked, "respond");
            }
        }
        debug!("Outbox for {} closed", topic);
    });

    sender
}

impl Inner {
    fn fail(&self, error: &dyn std::error::Error, context: &str) {
        self.collaborators.reporter.report(error, context);
        self.collaborators.notifier.notify(Notice::GenericFailure);
    }

    /// Send the response for a request unless one was already sent
    async fn respond(&self, topic: &str, response: JsonRpcResponse) {
        if !self.pending.finish(topic, response.id) {
            debug!("Request {} on {} already answered", response.id, topic);
            return;
        }

        match self.relay.respond(topic, response).await {
            Ok(()) => {}
            Err(e) => {
                let e = WalletConnectError::from(e);
                if e.is_session_not_found() {
                    debug!("Session {} closed before its response went out", topic);
                } else {
                    self.fail(&e, "respond");
                }
            }
        }
    }

    /// Wait for a decision, cancelling the ticket if the approval timeout
    /// runs out first
    async fn await_ticket<D: Send>(&self, mut ticket: Ticket<D>) -> Result<D, ApprovalError> {
        let Some(limit) = self.settings.approval_timeout else {
            return ticket.await;
        };

        match tokio::time::timeout(limit, &mut ticket).await {
            Ok(decision) => decision,
            Err(_) => {
                warn!("{} timed out after {:?}", ticket.id(), limit);
                self.expire(ticket).await
            }
        }
    }

    /// Cancel an expired ticket. A decision that landed before the cancel
    /// is still delivered.
    async fn expire<D: Send>(&self, ticket: Ticket<D>) -> Result<D, ApprovalError> {
        let id = ticket.id();
        if self.approvals.cancel(id) {
            Err(ApprovalError::Cancelled(id))
        } else {
            ticket.await
        }
    }

    async fn settle_proposal(
        &self,
        proposal: Proposal,
        ticket: Ticket<ProposalDecision>,
    ) -> Result<()> {
        match self.await_ticket(ticket).await {
            Ok(ProposalDecision::Approve { chain_id, address }) => {
                let chain = chain::to_protocol_id(chain_id);
                match self.registry.approve(&proposal, &address, &chain).await {
                    Ok(_) => Ok(()),
                    Err(WalletConnectError::UnsupportedChain(chain)) => {
                        self.collaborators
                            .notifier
                            .notify(Notice::UnsupportedChain {
                                chain: chain.clone(),
                            });
                        self.registry
                            .reject(&proposal, Reason::unsupported_chain(&chain))
                            .await
                    }
                    Err(e) => Err(e),
                }
            }
            Ok(ProposalDecision::Reject) => {
                self.registry
                    .reject(&proposal, Reason::user_rejected())
                    .await
            }
            Err(e) => {
                info!("{}, rejecting proposal", e);
                self.registry
                    .reject(&proposal, Reason::user_rejected())
                    .await
            }
        }
    }
}

/// Chain a passthrough call runs against: the one the dapp named, else the
/// chain of the session's active account
fn target_chain(session: &Session, requested: Option<&str>) -> Result<u64> {
    match requested {
        Some(chain) => Ok(chain::to_native_id(chain)?),
        None => {
            let (_, native) = account::decode(session.account().unwrap_or_default())?;
            Ok(native)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        approval::{ApprovalRequest, ChannelPresenter},
        jsonrpc::METHOD_NOT_SUPPORTED,
        notify::{ErrorReporter, Notifier},
        rpc::{MockRpcExecutor, RpcPassthroughError},
        transport::{
            mem::MemoryRelay, AppMetadata, Permissions, Proposer, SessionState, SessionStatus,
        },
        wallet::{ReadOnlyFlag, WalletStatus},
    };
    use parking_lot::Mutex;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct Recorder {
        notices: Mutex<Vec<Notice>>,
        reports: Mutex<Vec<String>>,
    }

    impl Notifier for Recorder {
        fn notify(&self, notice: Notice) {
            self.notices.lock().push(notice);
        }
    }

    impl ErrorReporter for Recorder {
        fn report(&self, error: &dyn std::error::Error, context: &str) {
            self.reports.lock().push(format!("{}: {}", context, error));
        }
    }

    struct Harness {
        relay: Arc<MemoryRelay>,
        approvals: Arc<ApprovalCoordinator>,
        wallet: Arc<ReadOnlyFlag>,
        recorder: Arc<Recorder>,
        prompts: mpsc::UnboundedReceiver<ApprovalRequest>,
        router: RouterV2,
    }

    fn harness(executor: MockRpcExecutor, settings: RouterSettings) -> Harness {
        let (presenter, prompts) = ChannelPresenter::new();
        harness_with(executor, settings, Arc::new(presenter), prompts)
    }

    fn harness_with(
        executor: MockRpcExecutor,
        settings: RouterSettings,
        presenter: Arc<dyn ApprovalPresenter>,
        prompts: mpsc::UnboundedReceiver<ApprovalRequest>,
    ) -> Harness {
        let relay = Arc::new(MemoryRelay::new());
        let approvals = Arc::new(ApprovalCoordinator::new());
        let registry = Arc::new(SessionRegistry::new(
            relay.clone(),
            approvals.clone(),
            AppMetadata::default(),
        ));
        let wallet = Arc::new(ReadOnlyFlag::new(false));
        let recorder = Arc::new(Recorder::default());

        let router = RouterV2::new(
            relay.clone(),
            registry,
            approvals.clone(),
            Collaborators {
                presenter,
                executor: Arc::new(executor),
                wallet: wallet.clone(),
                notifier: recorder.clone(),
                reporter: recorder.clone(),
            },
            settings,
        );

        Harness {
            relay,
            approvals,
            wallet,
            recorder,
            prompts,
            router,
        }
    }

    /// Presenter whose UI crashes on every prompt
    struct CrashingPresenter;

    impl ApprovalPresenter for CrashingPresenter {
        fn present_proposal(&self, _prompt: ProposalPrompt) {
            panic!("approval sheet crashed");
        }

        fn present_signing(&self, _prompt: SigningPrompt) {
            panic!("approval sheet crashed");
        }
    }

    fn crashing_harness() -> Harness {
        let (_, prompts) = mpsc::unbounded_channel();
        harness_with(
            MockRpcExecutor::new(),
            RouterSettings::default(),
            Arc::new(CrashingPresenter),
            prompts,
        )
    }

    fn settled(topic: &str, name: &str, account: &str) -> Session {
        Session {
            topic: topic.to_string(),
            peer: AppMetadata {
                name: name.to_string(),
                url: "https://dapp.example".to_string(),
                ..Default::default()
            },
            permissions: Permissions {
                chains: vec!["eip155:1".to_string()],
                methods: vec![],
            },
            state: SessionState {
                accounts: vec![account.to_string()],
            },
            status: SessionStatus::Settled,
        }
    }

    fn proposal(chain: &str) -> Proposal {
        Proposal {
            topic: "pairing".to_string(),
            proposer: Proposer {
                public_key: "ab".to_string(),
                metadata: AppMetadata {
                    name: "Uniswap".to_string(),
                    url: "https://app.uniswap.org".to_string(),
                    icons: vec!["https://app.uniswap.org/icon.png".to_string()],
                    ..Default::default()
                },
            },
            permissions: Permissions {
                chains: vec![chain.to_string()],
                methods: vec!["eth_sendTransaction".to_string()],
            },
        }
    }

    fn request(topic: &str, id: u64, method: &str) -> TransportEvent {
        TransportEvent::Request(RequestEvent {
            topic: topic.to_string(),
            request: JsonRpcRequest::new(id, method, json!([])),
            chain_id: None,
        })
    }

    /// Poll until `cond` holds or a second passes
    async fn eventually(cond: impl Fn() -> bool) {
        for _ in 0..500 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("condition never became true");
    }

    async fn drain() {
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_supported_proposal_is_approved() {
        let mut h = harness(MockRpcExecutor::new(), RouterSettings::default());
        h.router.dispatch(TransportEvent::Proposal(proposal("eip155:1")));

        let prompt = match h.prompts.recv().await.unwrap() {
            ApprovalRequest::Proposal(prompt) => prompt,
            other => panic!("unexpected prompt {:?}", other),
        };
        assert_eq!(prompt.chain_id, 1);
        assert_eq!(prompt.dapp_name, "Uniswap");
        assert_eq!(
            prompt.dapp_icon.as_deref(),
            Some("https://app.uniswap.org/icon.png")
        );

        h.approvals
            .resolve_proposal(
                prompt.ticket,
                ProposalDecision::Approve {
                    chain_id: 1,
                    address: "0xABC".to_string(),
                },
            )
            .unwrap();

        let relay = h.relay.clone();
        eventually(move || relay.sessions().len() == 1).await;
        assert_eq!(h.relay.sessions()[0].account(), Some("0xABC@eip155:1"));
        assert!(h.relay.rejections().is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_proposal_is_rejected_without_ticket() {
        let mut h = harness(MockRpcExecutor::new(), RouterSettings::default());
        h.router
            .dispatch(TransportEvent::Proposal(proposal("eip155:999")));

        let relay = h.relay.clone();
        eventually(move || relay.rejections().len() == 1).await;

        assert_eq!(h.relay.rejections()[0].1.code, 5100);
        assert_eq!(h.approvals.pending(), 0);
        assert!(h.prompts.try_recv().is_err());
        assert_eq!(
            *h.recorder.notices.lock(),
            vec![Notice::UnsupportedChain {
                chain: "eip155:999".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_proposal_without_chains_is_rejected() {
        let h = harness(MockRpcExecutor::new(), RouterSettings::default());
        let mut empty = proposal("eip155:1");
        empty.permissions.chains.clear();
        h.router.dispatch(TransportEvent::Proposal(empty));

        let relay = h.relay.clone();
        eventually(move || relay.rejections().len() == 1).await;
        assert_eq!(h.approvals.pending(), 0);
    }

    #[tokio::test]
    async fn test_user_rejects_proposal() {
        let mut h = harness(MockRpcExecutor::new(), RouterSettings::default());
        h.router
            .dispatch(TransportEvent::Proposal(proposal("eip155:137")));

        let ticket = h.prompts.recv().await.unwrap().ticket();
        h.approvals
            .resolve_proposal(ticket, ProposalDecision::Reject)
            .unwrap();

        let relay = h.relay.clone();
        eventually(move || relay.rejections().len() == 1).await;
        assert_eq!(h.relay.rejections()[0].1, Reason::user_rejected());
        assert!(h.relay.sessions().is_empty());
    }

    #[tokio::test]
    async fn test_chain_management_is_acknowledged() {
        let h = harness(MockRpcExecutor::new(), RouterSettings::default());
        h.relay
            .insert_session(settled("t1", "Aave", "0xABC@eip155:1"));

        h.router
            .dispatch(request("t1", 7, "wallet_switchEthereumChain"));

        let relay = h.relay.clone();
        eventually(move || relay.responses().len() == 1).await;
        let (topic, response) = h.relay.responses().remove(0);
        assert_eq!(topic, "t1");
        assert_eq!(response, JsonRpcResponse::success(7, Value::Null));
        assert_eq!(h.router.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_passthrough_uses_account_chain() {
        let mut executor = MockRpcExecutor::new();
        executor
            .expect_send_rpc_call()
            .withf(|chain_id, request| *chain_id == 137 && request.method == "eth_chainId")
            .times(1)
            .returning(|_, _| Ok(json!("0x89")));

        let h = harness(executor, RouterSettings::default());
        h.relay
            .insert_session(settled("t1", "Aave", "0xABC@eip155:137"));
        h.router.dispatch(request("t1", 3, "eth_chainId"));

        let relay = h.relay.clone();
        eventually(move || relay.responses().len() == 1).await;
        assert_eq!(
            h.relay.responses()[0].1,
            JsonRpcResponse::success(3, json!("0x89"))
        );
    }

    #[tokio::test]
    async fn test_passthrough_prefers_requested_chain() {
        let mut executor = MockRpcExecutor::new();
        executor
            .expect_send_rpc_call()
            .withf(|chain_id, _| *chain_id == 10)
            .times(1)
            .returning(|_, _| Ok(json!("0x10")));

        let h = harness(executor, RouterSettings::default());
        h.relay
            .insert_session(settled("t1", "Aave", "0xABC@eip155:1"));
        h.router.dispatch(TransportEvent::Request(RequestEvent {
            topic: "t1".to_string(),
            request: JsonRpcRequest::new(4, "eth_blockNumber", json!([])),
            chain_id: Some("eip155:10".to_string()),
        }));

        let relay = h.relay.clone();
        eventually(move || relay.responses().len() == 1).await;
        assert_eq!(h.relay.responses()[0].1.result, Some(json!("0x10")));
    }

    #[tokio::test]
    async fn test_passthrough_failure_is_not_supported() {
        let mut executor = MockRpcExecutor::new();
        executor
            .expect_send_rpc_call()
            .returning(|chain_id, _| Err(RpcPassthroughError::UnknownChain(chain_id)));

        let h = harness(executor, RouterSettings::default());
        h.relay
            .insert_session(settled("t1", "Aave", "0xABC@eip155:1"));
        h.router.dispatch(request("t1", 5, "eth_getBalance"));

        let relay = h.relay.clone();
        eventually(move || relay.responses().len() == 1).await;
        assert_eq!(
            h.relay.responses()[0].1,
            JsonRpcResponse::not_supported(5)
        );
        // Expected failures are not reported as generic errors.
        assert!(h.recorder.reports.lock().is_empty());
    }

    #[tokio::test]
    async fn test_read_only_wallet_refuses_signing() {
        let mut h = harness(MockRpcExecutor::new(), RouterSettings::default());
        h.wallet.set(true);
        h.relay
            .insert_session(settled("t1", "OpenSea", "0xABC@eip155:1"));

        h.router.dispatch(request("t1", 9, "eth_sendTransaction"));

        let relay = h.relay.clone();
        eventually(move || relay.responses().len() == 1).await;
        assert_eq!(
            h.relay.responses()[0].1.error_code(),
            Some(METHOD_NOT_SUPPORTED)
        );
        assert!(h.prompts.try_recv().is_err());
        assert_eq!(h.approvals.pending(), 0);
        assert_eq!(
            *h.recorder.notices.lock(),
            vec![Notice::ReadOnlyWallet {
                dapp_name: "OpenSea".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_read_only_wallet_can_opt_in_to_prompts() {
        let mut h = harness(
            MockRpcExecutor::new(),
            RouterSettings {
                allow_signing_on_read_only: true,
                approval_timeout: None,
            },
        );
        h.wallet.set(true);
        h.relay
            .insert_session(settled("t1", "OpenSea", "0xABC@eip155:1"));

        h.router.dispatch(request("t1", 9, "personal_sign"));

        assert!(matches!(
            h.prompts.recv().await.unwrap(),
            ApprovalRequest::Signing(_)
        ));
        assert_eq!(
            h.router.request_state("t1", 9),
            Some(RequestState::AwaitingApproval)
        );
    }

    #[tokio::test]
    async fn test_signing_result_is_sent_once() {
        let mut h = harness(MockRpcExecutor::new(), RouterSettings::default());
        h.relay
            .insert_session(settled("t1", "Uniswap", "0xABC@eip155:1"));
        h.router.dispatch(request("t1", 11, "eth_signTypedData"));

        let prompt = match h.prompts.recv().await.unwrap() {
            ApprovalRequest::Signing(prompt) => prompt,
            other => panic!("unexpected prompt {:?}", other),
        };
        assert_eq!(prompt.request.method, "eth_signTypedData");
        assert_eq!(prompt.session.topic, "t1");

        h.approvals
            .resolve_signing(prompt.ticket, SigningDecision::Result(json!("0xsig")))
            .unwrap();
        assert_eq!(
            h.approvals
                .resolve_signing(prompt.ticket, SigningDecision::Result(json!("0xother"))),
            Err(ApprovalError::NotPending(prompt.ticket))
        );

        drain().await;
        assert_eq!(
            h.relay.responses(),
            vec![(
                "t1".to_string(),
                JsonRpcResponse::success(11, json!("0xsig"))
            )]
        );
    }

    #[tokio::test]
    async fn test_signer_error_is_forwarded() {
        let mut h = harness(MockRpcExecutor::new(), RouterSettings::default());
        h.relay
            .insert_session(settled("t1", "Uniswap", "0xABC@eip155:1"));
        h.router.dispatch(request("t1", 12, "eth_sign"));

        let ticket = h.prompts.recv().await.unwrap().ticket();
        h.approvals
            .resolve_signing(ticket, SigningDecision::Error("user declined".to_string()))
            .unwrap();

        let relay = h.relay.clone();
        eventually(move || relay.responses().len() == 1).await;
        let response = &h.relay.responses()[0].1;
        assert_eq!(response.error_code(), Some(INTERNAL_ERROR));
        assert_eq!(response.error.as_ref().unwrap().message, "user declined");
    }

    #[tokio::test]
    async fn test_unknown_session_is_not_supported() {
        let h = harness(MockRpcExecutor::new(), RouterSettings::default());
        h.router.dispatch(request("ghost", 1, "eth_chainId"));

        let relay = h.relay.clone();
        eventually(move || relay.responses().len() == 1).await;
        assert_eq!(
            h.relay.responses()[0].1,
            JsonRpcResponse::not_supported(1)
        );
        assert_eq!(h.router.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_request_is_ignored_while_in_flight() {
        let mut h = harness(MockRpcExecutor::new(), RouterSettings::default());
        h.relay
            .insert_session(settled("t1", "Uniswap", "0xABC@eip155:1"));

        h.router.dispatch(request("t1", 20, "eth_sendTransaction"));
        h.router.dispatch(request("t1", 20, "eth_sendTransaction"));

        let ticket = h.prompts.recv().await.unwrap().ticket();
        assert!(h.prompts.try_recv().is_err());
        assert_eq!(h.approvals.pending(), 1);

        h.approvals
            .resolve_signing(ticket, SigningDecision::Result(json!("0xhash")))
            .unwrap();
        drain().await;
        assert_eq!(h.relay.responses().len(), 1);
    }

    #[tokio::test]
    async fn test_session_deleted_cancels_pending_signing() {
        let mut h = harness(MockRpcExecutor::new(), RouterSettings::default());
        h.relay
            .insert_session(settled("t1", "Uniswap", "0xABC@eip155:1"));
        h.router.dispatch(request("t1", 30, "eth_sendTransaction"));
        let ticket = h.prompts.recv().await.unwrap().ticket();

        h.router.dispatch(TransportEvent::SessionDeleted {
            topic: "t1".to_string(),
            reason: Reason::user_disconnected(),
        });

        let relay = h.relay.clone();
        eventually(move || relay.responses().len() == 1).await;
        assert_eq!(
            h.relay.responses()[0].1,
            JsonRpcResponse::not_supported(30)
        );
        assert!(!h.approvals.is_pending(ticket));

        // A late decision finds nothing to resolve.
        assert!(h
            .approvals
            .resolve_signing(ticket, SigningDecision::Result(json!("0x")))
            .is_err());
        drain().await;
        assert_eq!(h.relay.responses().len(), 1);
    }

    #[tokio::test]
    async fn test_approval_timeout_answers_not_supported() {
        let mut h = harness(
            MockRpcExecutor::new(),
            RouterSettings {
                allow_signing_on_read_only: false,
                approval_timeout: Some(Duration::from_millis(20)),
            },
        );
        h.relay
            .insert_session(settled("t1", "Uniswap", "0xABC@eip155:1"));
        h.router.dispatch(request("t1", 40, "personal_sign"));
        let ticket = h.prompts.recv().await.unwrap().ticket();

        tokio::time::sleep(Duration::from_millis(100)).await;
        drain().await;

        assert_eq!(
            h.relay.responses(),
            vec![("t1".to_string(), JsonRpcResponse::not_supported(40))]
        );
        assert!(!h.approvals.is_pending(ticket));
    }

    #[tokio::test]
    async fn test_panicking_executor_still_answers() {
        let mut executor = MockRpcExecutor::new();
        executor
            .expect_send_rpc_call()
            .returning(|_, _| panic!("node client exploded"));

        let h = harness(executor, RouterSettings::default());
        h.relay
            .insert_session(settled("t1", "Aave", "0xABC@eip155:1"));
        h.router.dispatch(request("t1", 50, "eth_call"));

        let relay = h.relay.clone();
        eventually(move || relay.responses().len() == 1).await;
        assert_eq!(
            h.relay.responses()[0].1,
            JsonRpcResponse::not_supported(50)
        );
        let recorder = h.recorder.clone();
        eventually(move || recorder.reports.lock().len() == 1).await;
        assert!(h.recorder.notices.lock().contains(&Notice::GenericFailure));
    }

    #[tokio::test]
    async fn test_proposal_timeout_rejects() {
        let mut h = harness(
            MockRpcExecutor::new(),
            RouterSettings {
                allow_signing_on_read_only: false,
                approval_timeout: Some(Duration::from_millis(20)),
            },
        );
        h.router.dispatch(TransportEvent::Proposal(proposal("eip155:1")));
        let ticket = h.prompts.recv().await.unwrap().ticket();

        let relay = h.relay.clone();
        eventually(move || relay.rejections().len() == 1).await;
        assert_eq!(h.relay.rejections()[0].1, Reason::user_rejected());
        assert!(h.relay.sessions().is_empty());
        assert!(!h.approvals.is_pending(ticket));
    }

    #[tokio::test]
    async fn test_approving_unsupported_chain_rejects_proposal() {
        let mut h = harness(MockRpcExecutor::new(), RouterSettings::default());
        h.router.dispatch(TransportEvent::Proposal(proposal("eip155:1")));

        let ticket = h.prompts.recv().await.unwrap().ticket();
        h.approvals
            .resolve_proposal(
                ticket,
                ProposalDecision::Approve {
                    chain_id: 999,
                    address: "0xABC".to_string(),
                },
            )
            .unwrap();

        let relay = h.relay.clone();
        eventually(move || relay.rejections().len() == 1).await;
        let reason = h.relay.rejections()[0].1.clone();
        assert_eq!(reason.code, 5100);
        assert_eq!(reason, Reason::unsupported_chain("eip155:999"));
        assert!(h.relay.sessions().is_empty());
        assert!(h.recorder.notices.lock().contains(&Notice::UnsupportedChain {
            chain: "eip155:999".to_string()
        }));
    }

    #[tokio::test]
    async fn test_decision_before_expiry_wins() {
        let h = harness(MockRpcExecutor::new(), RouterSettings::default());

        let ticket = h.approvals.open_signing("t1");
        h.approvals
            .resolve_signing(ticket.id(), SigningDecision::Result(json!("0xsig")))
            .unwrap();
        assert_eq!(
            h.router.inner.expire(ticket).await,
            Ok(SigningDecision::Result(json!("0xsig")))
        );

        let ticket = h.approvals.open_signing("t1");
        let id = ticket.id();
        assert_eq!(
            h.router.inner.expire(ticket).await,
            Err(ApprovalError::Cancelled(id))
        );
        assert!(!h.approvals.is_pending(id));
    }

    #[tokio::test]
    async fn test_crashing_presenter_answers_signing_request() {
        let h = crashing_harness();
        h.relay
            .insert_session(settled("t1", "Uniswap", "0xABC@eip155:1"));

        h.router.dispatch(request("t1", 60, "personal_sign"));

        let relay = h.relay.clone();
        eventually(move || relay.responses().len() == 1).await;
        assert_eq!(
            h.relay.responses(),
            vec![("t1".to_string(), JsonRpcResponse::not_supported(60))]
        );
        assert_eq!(h.approvals.pending(), 0);
        let router = h.router.clone();
        eventually(move || router.in_flight() == 0).await;

        let reports = h.recorder.reports.lock().clone();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].starts_with("present_signing"));
        assert!(h.recorder.notices.lock().contains(&Notice::GenericFailure));
    }

    #[tokio::test]
    async fn test_crashing_presenter_rejects_proposal() {
        let h = crashing_harness();
        h.router.dispatch(TransportEvent::Proposal(proposal("eip155:1")));

        let relay = h.relay.clone();
        eventually(move || relay.rejections().len() == 1).await;
        assert_eq!(h.relay.rejections()[0].1, Reason::user_rejected());
        assert_eq!(h.approvals.pending(), 0);
        assert!(h.recorder.notices.lock().contains(&Notice::GenericFailure));
    }

    /// Wallet status that fails while a request is being routed
    struct BrokenWallet;

    impl WalletStatus for BrokenWallet {
        fn is_read_only(&self) -> bool {
            panic!("keystore unavailable");
        }
    }

    #[tokio::test]
    async fn test_panic_while_routing_still_answers() {
        let relay = Arc::new(MemoryRelay::new());
        let approvals = Arc::new(ApprovalCoordinator::new());
        let registry = Arc::new(SessionRegistry::new(
            relay.clone(),
            approvals.clone(),
            AppMetadata::default(),
        ));
        let recorder = Arc::new(Recorder::default());
        let router = RouterV2::new(
            relay.clone(),
            registry,
            approvals.clone(),
            Collaborators {
                presenter: Arc::new(ChannelPresenter::new().0),
                executor: Arc::new(MockRpcExecutor::new()),
                wallet: Arc::new(BrokenWallet),
                notifier: recorder.clone(),
                reporter: recorder.clone(),
            },
            RouterSettings::default(),
        );
        relay.insert_session(settled("t1", "Uniswap", "0xABC@eip155:1"));

        router.dispatch(request("t1", 70, "eth_sendTransaction"));

        let responses = relay.clone();
        eventually(move || responses.responses().len() == 1).await;
        assert_eq!(
            relay.responses(),
            vec![("t1".to_string(), JsonRpcResponse::not_supported(70))]
        );
        assert_eq!(approvals.pending(), 0);
        assert_eq!(router.in_flight(), 0);
        assert_eq!(recorder.reports.lock().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_immediate_responses_keep_dispatch_order() {
        let h = harness(MockRpcExecutor::new(), RouterSettings::default());
        h.relay
            .insert_session(settled("t1", "Aave", "0xABC@eip155:1"));

        for round in 0..5u64 {
            let ids: Vec<u64> = (0..20).map(|i| round * 100 + i).collect();
            for id in &ids {
                h.router.dispatch(request("t1", *id, "wallet_addEthereumChain"));
            }

            let relay = h.relay.clone();
            let expected = ids.len() * (round as usize + 1);
            eventually(move || relay.responses().len() == expected).await;

            let answered: Vec<u64> = h
                .relay
                .responses()
                .into_iter()
                .skip(expected - ids.len())
                .map(|(_, response)| response.id)
                .collect();
            assert_eq!(answered, ids);
        }
        assert_eq!(h.router.in_flight(), 0);
    }
}
