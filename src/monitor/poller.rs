//! Polling Transport
//!
//! Fixed-interval fallback over indexed transfers, and the only transport for
//! chains without a streaming endpoint. Each tick scans
//! `[watermark + 1, head]` and advances the watermark to `head`, except when
//! the indexer reports the range as beyond its head.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use super::error::MonitorError;
use super::matcher::ExpectedPayment;
use super::rpc::{ChainRpc, TransferQuery};
use super::session::SessionContext;
use super::types::{PaymentAsset, TransferCandidate, TransferCategory};

/// Result of one polling tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Previous tick still awaiting RPC; this one was dropped
    Busy,
    /// `eth_blockNumber` failed
    HeadUnavailable,
    /// No block past the watermark yet
    UpToDate { head: u64 },
    /// Range scanned, watermark advanced to `to`
    Scanned { from: u64, to: u64 },
    /// Indexer behind the head; watermark unchanged, retried next tick
    Deferred { from: u64, to: u64 },
    Matched(TransferCandidate),
}

/// Outcome of querying one block range
#[derive(Debug, Default)]
pub struct RangeScan {
    pub matched: Option<TransferCandidate>,
    /// At least one query hit the "range beyond head" condition
    pub deferred: bool,
}

/// Query native transfers (and token transfers for ERC-20 sessions) to the
/// recipient over `[from, to]` and return the first match. Query failures
/// are logged and swallowed.
pub async fn scan_range(
    rpc: &dyn ChainRpc,
    expected: &ExpectedPayment,
    from: u64,
    to: u64,
) -> RangeScan {
    let native = TransferQuery {
        from_block: from,
        to_block: to,
        to_address: expected.recipient.clone(),
        category: TransferCategory::Native,
        contract_address: None,
    };
    let token = match &expected.asset {
        PaymentAsset::Native => None,
        PaymentAsset::Erc20 { contract } => Some(TransferQuery {
            category: TransferCategory::Erc20,
            contract_address: Some(contract.clone()),
            ..native.clone()
        }),
    };

    let (native_result, token_result) = tokio::join!(rpc.asset_transfers(&native), async {
        match &token {
            Some(query) => Some(rpc.asset_transfers(query).await),
            None => None,
        }
    });

    let mut scan = RangeScan::default();
    for (query, result) in std::iter::once((&native, native_result))
        .chain(token.as_ref().zip(token_result))
    {
        match result {
            Ok(transfers) => {
                debug!(
                    category = %query.category,
                    from_block = from,
                    to_block = to,
                    count = transfers.len(),
                    "Indexed transfers fetched"
                );
                if scan.matched.is_none() {
                    scan.matched = expected.first_match(&transfers);
                }
            }
            Err(e) => record_query_error(&mut scan, query, &e),
        }
    }
    scan
}

fn record_query_error(scan: &mut RangeScan, query: &TransferQuery, error: &MonitorError) {
    if error.is_range_beyond_head() {
        debug!(
            category = %query.category,
            from_block = query.from_block,
            to_block = query.to_block,
            "Transfer range beyond indexer head, retrying next tick"
        );
        scan.deferred = true;
    } else {
        warn!(
            category = %query.category,
            from_block = query.from_block,
            to_block = query.to_block,
            error = %error,
            "Transfer query failed"
        );
    }
}

/// Clears the busy flag when the tick finishes or is cancelled
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Poller {
    ctx: SessionContext,
    busy: AtomicBool,
}

impl Poller {
    pub fn new(ctx: SessionContext) -> Self {
        Self {
            ctx,
            busy: AtomicBool::new(false),
        }
    }

    /// Tick until a payment matches. Runs until cancelled otherwise.
    pub async fn run(&self) -> TransferCandidate {
        let state = &self.ctx.state;
        info!(
            session_id = state.id,
            chain_id = state.request.chain_id,
            watermark = ?state.watermark(),
            interval_ms = self.ctx.config.poll_interval_ms,
            "Polling for payment"
        );

        let mut ticker = interval(self.ctx.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            if let TickOutcome::Matched(candidate) = self.tick().await {
                return candidate;
            }
        }
    }

    /// One polling cycle. Overlapping calls return [`TickOutcome::Busy`]
    /// instead of racing on the watermark.
    pub async fn tick(&self) -> TickOutcome {
        let Some(_guard) = BusyGuard::acquire(&self.busy) else {
            debug!(session_id = self.ctx.state.id, "Previous poll still running, tick dropped");
            return TickOutcome::Busy;
        };

        let state = &self.ctx.state;
        let head = match self.ctx.rpc.block_number().await {
            Ok(head) => head,
            Err(e) => {
                warn!(session_id = state.id, error = %e, "Failed to fetch block number");
                return TickOutcome::HeadUnavailable;
            }
        };

        let watermark = match state.watermark() {
            Some(watermark) => watermark,
            None => {
                // first tick without an origin: scan the current head
                let watermark = head.saturating_sub(1);
                state.set_watermark(watermark);
                watermark
            }
        };
        if head <= watermark {
            return TickOutcome::UpToDate { head };
        }

        let from = watermark + 1;
        let scan = scan_range(self.ctx.rpc.as_ref(), &state.expected, from, head).await;

        if let Some(candidate) = scan.matched {
            return TickOutcome::Matched(candidate);
        }
        if scan.deferred {
            return TickOutcome::Deferred { from, to: head };
        }

        state.set_watermark(head);
        debug!(session_id = state.id, from_block = from, to_block = head, "Polled range");
        TickOutcome::Scanned { from, to: head }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonitorConfig;
    use crate::monitor::session::{LinkMachine, SessionState};
    use crate::monitor::types::PaymentRequest;
    use async_trait::async_trait;
    use num_bigint::BigUint;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use tokio::sync::Notify;

    const RECIPIENT: &str = "0x742d35cc6634c0532925a3b844bc454e4438f44e";
    const USDC: &str = "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48";

    #[derive(Default)]
    struct ScriptedRpc {
        heads: Mutex<VecDeque<Result<u64, MonitorError>>>,
        responses: Mutex<VecDeque<Result<Vec<TransferCandidate>, MonitorError>>>,
        queries: Mutex<Vec<TransferQuery>>,
        gate: Option<Arc<Notify>>,
    }

    impl ScriptedRpc {
        fn head(self, head: u64) -> Self {
            self.heads.lock().unwrap().push_back(Ok(head));
            self
        }

        fn respond(self, response: Result<Vec<TransferCandidate>, MonitorError>) -> Self {
            self.responses.lock().unwrap().push_back(response);
            self
        }
    }

    #[async_trait]
    impl ChainRpc for ScriptedRpc {
        async fn block_number(&self) -> Result<u64, MonitorError> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            self.heads
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(MonitorError::RpcConnection("no head scripted".to_string())))
        }

        async fn asset_transfers(
            &self,
            query: &TransferQuery,
        ) -> Result<Vec<TransferCandidate>, MonitorError> {
            self.queries.lock().unwrap().push(query.clone());
            self.responses.lock().unwrap().pop_front().unwrap_or(Ok(vec![]))
        }
    }

    fn context(rpc: Arc<ScriptedRpc>, token: &str, amount: u64) -> SessionContext {
        let request = PaymentRequest {
            recipient_address: RECIPIENT.to_string(),
            token_address: token.to_string(),
            expected_amount: BigUint::from(amount),
            token_symbol: "USDC".to_string(),
            decimals: 6,
            merchant_usd: None,
            chain_id: 1,
            chain_name: "Ethereum".to_string(),
        };
        SessionContext {
            state: Arc::new(SessionState::new(1, request, LinkMachine::new(false, 5))),
            rpc,
            config: MonitorConfig::default(),
        }
    }

    fn usdc_transfer(amount: u64) -> TransferCandidate {
        TransferCandidate {
            hash: "0xusdc".to_string(),
            from: "0x1111111111111111111111111111111111111111".to_string(),
            to: RECIPIENT.to_string(),
            value_raw: BigUint::from(amount),
            category: TransferCategory::Erc20,
            contract_address: Some(USDC.to_string()),
        }
    }

    #[tokio::test]
    async fn test_first_tick_seeds_watermark_from_head() {
        let rpc = Arc::new(ScriptedRpc::default().head(100));
        let ctx = context(rpc.clone(), crate::monitor::types::NATIVE_TOKEN_ADDRESS, 1);
        let poller = Poller::new(ctx.clone());

        assert_eq!(poller.tick().await, TickOutcome::Scanned { from: 100, to: 100 });
        assert_eq!(ctx.state.watermark(), Some(100));

        // native session: one query per tick
        let queries = rpc.queries.lock().unwrap();
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].category, TransferCategory::Native);
    }

    #[tokio::test]
    async fn test_no_new_blocks_does_nothing() {
        let rpc = Arc::new(ScriptedRpc::default().head(100));
        let ctx = context(rpc.clone(), USDC, 1_000_000);
        ctx.state.set_watermark(100);

        assert_eq!(Poller::new(ctx).tick().await, TickOutcome::UpToDate { head: 100 });
        assert!(rpc.queries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_erc20_session_queries_both_categories() {
        let rpc = Arc::new(
            ScriptedRpc::default()
                .head(120)
                .respond(Ok(vec![]))
                .respond(Ok(vec![usdc_transfer(1_000_000)])),
        );
        let ctx = context(rpc.clone(), USDC, 1_000_000);
        ctx.state.set_watermark(110);

        match Poller::new(ctx).tick().await {
            TickOutcome::Matched(candidate) => assert_eq!(candidate.hash, "0xusdc"),
            other => panic!("unexpected outcome {:?}", other),
        }

        let queries = rpc.queries.lock().unwrap();
        assert_eq!(queries.len(), 2);
        assert!(queries.iter().all(|q| q.from_block == 111 && q.to_block == 120));
        let token_query = queries
            .iter()
            .find(|q| q.category == TransferCategory::Erc20)
            .unwrap();
        assert_eq!(token_query.contract_address.as_deref(), Some(USDC));
    }

    #[tokio::test]
    async fn test_wrong_amount_advances_without_match() {
        let rpc = Arc::new(
            ScriptedRpc::default()
                .head(120)
                .respond(Ok(vec![]))
                .respond(Ok(vec![usdc_transfer(999_999)])),
        );
        let ctx = context(rpc, USDC, 1_000_000);
        ctx.state.set_watermark(110);

        assert_eq!(
            Poller::new(ctx.clone()).tick().await,
            TickOutcome::Scanned { from: 111, to: 120 }
        );
        assert_eq!(ctx.state.watermark(), Some(120));
    }

    #[tokio::test]
    async fn test_range_beyond_head_keeps_watermark() {
        let rpc = Arc::new(
            ScriptedRpc::default()
                .head(120)
                .respond(Err(MonitorError::RangeBeyondHead)),
        );
        let ctx = context(rpc, crate::monitor::types::NATIVE_TOKEN_ADDRESS, 1);
        ctx.state.set_watermark(110);

        assert_eq!(
            Poller::new(ctx.clone()).tick().await,
            TickOutcome::Deferred { from: 111, to: 120 }
        );
        assert_eq!(ctx.state.watermark(), Some(110));
    }

    #[tokio::test]
    async fn test_generic_query_error_is_swallowed() {
        let rpc = Arc::new(ScriptedRpc::default().head(120).respond(Err(MonitorError::Rpc {
            code: -32000,
            message: "upstream timeout".to_string(),
        })));
        let ctx = context(rpc, crate::monitor::types::NATIVE_TOKEN_ADDRESS, 1);
        ctx.state.set_watermark(110);

        assert_eq!(
            Poller::new(ctx.clone()).tick().await,
            TickOutcome::Scanned { from: 111, to: 120 }
        );
    }

    #[tokio::test]
    async fn test_head_failure_leaves_state_untouched() {
        let rpc = Arc::new(ScriptedRpc::default());
        let ctx = context(rpc, USDC, 1);

        assert_eq!(Poller::new(ctx.clone()).tick().await, TickOutcome::HeadUnavailable);
        assert_eq!(ctx.state.watermark(), None);
    }

    #[tokio::test]
    async fn test_overlapping_tick_is_dropped() {
        let gate = Arc::new(Notify::new());
        let rpc = Arc::new(ScriptedRpc {
            gate: Some(gate.clone()),
            ..ScriptedRpc::default()
        }
        .head(50));
        let poller = Arc::new(Poller::new(context(rpc, USDC, 1)));

        let first = tokio::spawn({
            let poller = poller.clone();
            async move { poller.tick().await }
        });
        // let the first tick park on the gate
        while !poller.busy.load(Ordering::Acquire) {
            tokio::task::yield_now().await;
        }

        assert_eq!(poller.tick().await, TickOutcome::Busy);

        gate.notify_one();
        assert_eq!(first.await.unwrap(), TickOutcome::Scanned { from: 50, to: 50 });
        assert!(!poller.busy.load(Ordering::Acquire));
    }
}
