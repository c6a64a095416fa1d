//! Session Lifecycle Manager
//!
//! [`PaymentMonitor`] owns at most one monitoring session. `start` and `stop`
//! are its only mutators; each session runs as one spawned task that drives
//! the streaming transport, falls back to polling when streaming gives up, and
//! reports the first matching transfer exactly once.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::error::MonitorError;
use super::poller::Poller;
use super::registry::{ChainEntry, ChainRegistry};
use super::session::{LinkMachine, SessionContext, SessionMode, SessionState, lock};
use super::stream::{StreamConnector, StreamOutcome, StreamTransport, WsConnector};
use super::types::{
    PaymentAsset, PaymentCallbacks, PaymentReceipt, PaymentRequest, SessionSnapshot,
    TransferCandidate, is_evm_address,
};
use crate::config::MonitorConfig;

struct ActiveSession {
    state: Arc<SessionState>,
    task: JoinHandle<()>,
}

impl ActiveSession {
    /// Mark stopped and cancel the task, dropping its socket and timers.
    fn retire(self) {
        self.state.transition(LinkMachine::on_stop);
        self.task.abort();
        info!(session_id = self.state.id, "Payment monitoring stopped");
    }
}

struct EngineInner {
    registry: ChainRegistry,
    config: MonitorConfig,
    connector: Arc<dyn StreamConnector>,
    active: Mutex<Option<ActiveSession>>,
    next_session_id: AtomicU64,
}

/// Payment confirmation engine. Cheap to clone; clones share the session.
#[derive(Clone)]
pub struct PaymentMonitor {
    inner: Arc<EngineInner>,
}

impl PaymentMonitor {
    pub fn new(registry: ChainRegistry, config: MonitorConfig) -> Self {
        Self::with_connector(registry, config, Arc::new(WsConnector))
    }

    pub fn with_connector(
        registry: ChainRegistry,
        config: MonitorConfig,
        connector: Arc<dyn StreamConnector>,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                registry,
                config,
                connector,
                active: Mutex::new(None),
                next_session_id: AtomicU64::new(1),
            }),
        }
    }

    /// Begin watching for `request`, replacing any active session.
    ///
    /// Must be called from within a Tokio runtime. Start-time failures are
    /// reported through `on_error` and returned; nothing else ever reaches
    /// `on_error`.
    pub fn start(
        &self,
        request: PaymentRequest,
        callbacks: PaymentCallbacks,
    ) -> Result<(), MonitorError> {
        let (entry, runtime) = match self.prepare(&request) {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!(
                    chain_id = request.chain_id,
                    chain = %request.chain_name,
                    error = %e,
                    "Payment monitoring not started"
                );
                // a failed start still ends whatever was running
                self.stop();
                callbacks.error(&e.to_string());
                return Err(e);
            }
        };

        let id = self.inner.next_session_id.fetch_add(1, Ordering::Relaxed);
        let streaming = entry.ws_url.is_some();
        let link = LinkMachine::new(streaming, self.inner.config.max_reconnect_attempts);
        let state = Arc::new(SessionState::new(id, request, link));

        info!(
            session_id = id,
            chain_id = state.request.chain_id,
            chain = %state.request.chain_name,
            recipient = %state.expected.recipient,
            token = %state.request.token_symbol,
            amount = %state.request.expected_amount,
            mode = %state.mode(),
            "Payment monitoring started"
        );

        let ctx = SessionContext {
            state: state.clone(),
            rpc: entry.rpc.clone(),
            config: self.inner.config.clone(),
        };
        let driver = SessionDriver {
            engine: Arc::downgrade(&self.inner),
            ctx,
            connector: self.inner.connector.clone(),
            ws_url: entry.ws_url.clone(),
            pending_filter: entry.pending_filter,
            callbacks,
        };

        // hold the slot while spawning so a fast match cannot finish first,
        // and retire the previous session under the same lock
        let mut active = lock(&self.inner.active);
        let task = runtime.spawn(driver.run());
        if let Some(previous) = active.replace(ActiveSession { state, task }) {
            previous.retire();
        }
        Ok(())
    }

    /// End the active session, if any. Idempotent, and safe to call from
    /// inside `on_payment_received`.
    pub fn stop(&self) {
        let session = lock(&self.inner.active).take();
        if let Some(session) = session {
            session.retire();
        }
    }

    pub fn is_monitoring(&self) -> bool {
        lock(&self.inner.active)
            .as_ref()
            .is_some_and(|session| !session.state.mode().is_terminal())
    }

    pub fn current_session(&self) -> Option<SessionSnapshot> {
        lock(&self.inner.active)
            .as_ref()
            .map(|session| session.state.snapshot())
    }

    fn prepare(&self, request: &PaymentRequest) -> Result<(ChainEntry, Handle), MonitorError> {
        let entry = self
            .inner
            .registry
            .get(request.chain_id)
            .ok_or_else(|| MonitorError::UnsupportedChain(request.chain_name.clone()))?;

        for address in [&request.recipient_address, &request.token_address] {
            if !is_evm_address(address) {
                return Err(MonitorError::InvalidAddress(address.clone()));
            }
        }

        let runtime = Handle::try_current().map_err(|_| MonitorError::NoRuntime)?;
        Ok((entry.clone(), runtime))
    }
}

impl EngineInner {
    /// Close out a matched session. Only the session still occupying the slot
    /// may report; a replaced or stopped session's late match is dropped.
    fn finish(&self, state: &SessionState, candidate: TransferCandidate, callbacks: &PaymentCallbacks) {
        {
            let mut active = lock(&self.active);
            let current = active.as_ref().is_some_and(|s| s.state.id == state.id);
            if !current || state.transition(LinkMachine::on_match) != SessionMode::Matched {
                debug!(session_id = state.id, tx_hash = %candidate.hash, "Match after session ended, dropped");
                return;
            }
            // our own task: dropping the handle detaches it
            active.take();
        }

        let receipt = receipt_for(&state.request, &candidate);
        info!(
            session_id = state.id,
            tx_hash = %receipt.tx_hash,
            token = %receipt.token_symbol,
            category = %candidate.category,
            "Payment received"
        );
        callbacks.payment_received(&receipt);
    }
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        if let Some(session) = lock(&self.active).take() {
            session.retire();
        }
    }
}

fn receipt_for(request: &PaymentRequest, candidate: &TransferCandidate) -> PaymentReceipt {
    let address = match PaymentAsset::from_token_address(&request.token_address) {
        PaymentAsset::Native => request.recipient_address.clone(),
        PaymentAsset::Erc20 { .. } => request.token_address.clone(),
    };
    PaymentReceipt {
        tx_hash: candidate.hash.clone(),
        token_symbol: request.token_symbol.clone(),
        address,
        decimals: request.decimals,
    }
}

/// Head block at session start, fetched in its own task. Aborted when the
/// session ends before anyone asks for it.
struct OriginBlock {
    session_id: u64,
    task: JoinHandle<Result<u64, MonitorError>>,
}

impl OriginBlock {
    fn fetch(ctx: &SessionContext) -> Self {
        let rpc = ctx.rpc.clone();
        Self {
            session_id: ctx.state.id,
            task: tokio::spawn(async move { rpc.block_number().await }),
        }
    }

    async fn get(mut self) -> Option<u64> {
        match (&mut self.task).await {
            Ok(Ok(block)) => Some(block),
            Ok(Err(e)) => {
                warn!(session_id = self.session_id, error = %e, "Failed to record origin block");
                None
            }
            Err(e) => {
                warn!(session_id = self.session_id, error = %e, "Origin block task failed");
                None
            }
        }
    }
}

impl Drop for OriginBlock {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Everything one session task owns
struct SessionDriver {
    engine: Weak<EngineInner>,
    ctx: SessionContext,
    connector: Arc<dyn StreamConnector>,
    ws_url: Option<String>,
    pending_filter: bool,
    callbacks: PaymentCallbacks,
}

impl SessionDriver {
    async fn run(self) {
        let state = &self.ctx.state;

        // read alongside the first dial; only polling needs the answer
        let origin = OriginBlock::fetch(&self.ctx);

        let candidate = match self.stream().await {
            Some(StreamOutcome::Matched(candidate)) => candidate,
            Some(StreamOutcome::Stopped) => return,
            Some(StreamOutcome::FallBack) | None => {
                if let Some(origin) = origin.get().await {
                    state.set_watermark(origin.saturating_sub(1));
                }
                Poller::new(self.ctx.clone()).run().await
            }
        };

        match self.engine.upgrade() {
            Some(engine) => engine.finish(state, candidate, &self.callbacks),
            None => debug!(session_id = state.id, "Engine dropped before match was reported"),
        }
    }

    /// `None` for polling-only chains
    async fn stream(&self) -> Option<StreamOutcome> {
        let url = self.ws_url.as_deref()?;
        let transport =
            StreamTransport::new(&self.ctx, self.connector.as_ref(), url, self.pending_filter);
        Some(transport.run().await)
    }
}
