//! Streaming Transport
//!
//! Watches the pending-transaction feed of a chain node over a websocket, and
//! re-scans every newly announced block through the indexed transfer query
//! to catch transactions the pending feed never showed. Link failures go
//! through the session's [`LinkMachine`]; once it gives up, the caller hands
//! the session over to polling.

use std::fmt;

use async_trait::async_trait;
use futures::stream::FuturesUnordered;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::{Instant, sleep, sleep_until, timeout_at};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use super::error::MonitorError;
use super::frame::{
    InboundFrame, NEW_HEADS_ID, PENDING_FILTERED_ID, Subscriptions, new_heads_request,
    parse_frame, pending_filtered_request, pending_unfiltered_request,
};
use super::poller::scan_range;
use super::session::{LinkMachine, SessionContext, SessionMode};
use super::types::TransferCandidate;

/// Opens streaming connections
#[async_trait]
pub trait StreamConnector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn StreamConnection>, MonitorError>;
}

/// One open text-frame connection
#[async_trait]
pub trait StreamConnection: Send {
    async fn send_text(&mut self, text: String) -> Result<(), MonitorError>;

    /// Next text frame. `None` once the peer closed the connection.
    async fn recv_text(&mut self) -> Option<Result<String, MonitorError>>;

    async fn close(&mut self);
}

/// `tokio-tungstenite` backed connector
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

#[async_trait]
impl StreamConnector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn StreamConnection>, MonitorError> {
        let (socket, _response) = connect_async(url).await?;
        Ok(Box::new(WsConnection { socket }))
    }
}

struct WsConnection {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl StreamConnection for WsConnection {
    async fn send_text(&mut self, text: String) -> Result<(), MonitorError> {
        self.socket.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn recv_text(&mut self) -> Option<Result<String, MonitorError>> {
        loop {
            match self.socket.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Binary(bytes)) => {
                    return Some(Ok(String::from_utf8_lossy(&bytes).into_owned()));
                }
                Ok(Message::Close(_)) => return None,
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => continue,
                Err(e) => return Some(Err(e.into())),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.socket.close(None).await {
            debug!(error = %e, "Websocket close failed");
        }
    }
}

/// How the streaming transport ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    Matched(TransferCandidate),
    /// Reconnect budget exhausted; the session is now `POLLING`
    FallBack,
    /// Session left streaming for a terminal mode
    Stopped,
}

#[derive(Debug)]
enum LinkFailure {
    Timeout,
    Closed,
    Error(MonitorError),
}

impl fmt::Display for LinkFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkFailure::Timeout => write!(f, "connect timeout"),
            LinkFailure::Closed => write!(f, "closed by peer"),
            LinkFailure::Error(e) => write!(f, "{}", e),
        }
    }
}

pub struct StreamTransport<'a> {
    ctx: &'a SessionContext,
    connector: &'a dyn StreamConnector,
    url: &'a str,
    pending_filter: bool,
}

impl<'a> StreamTransport<'a> {
    pub fn new(
        ctx: &'a SessionContext,
        connector: &'a dyn StreamConnector,
        url: &'a str,
        pending_filter: bool,
    ) -> Self {
        Self {
            ctx,
            connector,
            url,
            pending_filter,
        }
    }

    /// Connect, watch, and reconnect until a match or until the link machine
    /// falls back to polling.
    pub async fn run(&self) -> StreamOutcome {
        let state = &self.ctx.state;
        loop {
            let failure = match self.connect_and_watch().await {
                Ok(candidate) => return StreamOutcome::Matched(candidate),
                Err(failure) => failure,
            };

            let mode = state.transition(|link| match &failure {
                LinkFailure::Timeout => link.on_timeout(),
                LinkFailure::Closed => link.on_close(),
                LinkFailure::Error(_) => link.on_error(),
            });

            match mode {
                SessionMode::Reconnecting => {
                    warn!(
                        session_id = state.id,
                        attempt = state.reconnect_attempts(),
                        max_attempts = self.ctx.config.max_reconnect_attempts,
                        reason = %failure,
                        "Stream link failed, reconnecting"
                    );
                    sleep(self.ctx.config.reconnect_delay()).await;
                    state.transition(LinkMachine::on_retry);
                }
                SessionMode::Polling => {
                    warn!(
                        session_id = state.id,
                        attempts = state.reconnect_attempts(),
                        reason = %failure,
                        "Stream reconnect budget exhausted, falling back to polling"
                    );
                    return StreamOutcome::FallBack;
                }
                _ => return StreamOutcome::Stopped,
            }
        }
    }

    async fn connect_and_watch(&self) -> Result<TransferCandidate, LinkFailure> {
        let state = &self.ctx.state;
        let deadline = Instant::now() + self.ctx.config.connect_timeout();

        debug!(session_id = state.id, url = %self.url, "Connecting stream");
        let mut conn = match timeout_at(deadline, self.connector.connect(self.url)).await {
            Err(_) => return Err(LinkFailure::Timeout),
            Ok(Err(e)) => return Err(LinkFailure::Error(e)),
            Ok(Ok(conn)) => conn,
        };
        state.transition(LinkMachine::on_open);

        let result = self.watch(conn.as_mut(), deadline).await;
        conn.close().await;
        result
    }

    async fn watch(
        &self,
        conn: &mut dyn StreamConnection,
        deadline: Instant,
    ) -> Result<TransferCandidate, LinkFailure> {
        let state = &self.ctx.state;
        let expected = &state.expected;

        let pending_request = if self.pending_filter {
            pending_filtered_request(expected)
        } else {
            pending_unfiltered_request()
        };
        conn.send_text(pending_request)
            .await
            .map_err(LinkFailure::Error)?;
        conn.send_text(new_heads_request())
            .await
            .map_err(LinkFailure::Error)?;

        let mut subscriptions = Subscriptions::default();
        let mut open = false;
        let mut scans = FuturesUnordered::new();
        let connect_timer = sleep_until(deadline);
        tokio::pin!(connect_timer);

        loop {
            tokio::select! {
                frame = conn.recv_text() => {
                    let text = match frame {
                        None => return Err(LinkFailure::Closed),
                        Some(Err(e)) => return Err(LinkFailure::Error(e)),
                        Some(Ok(text)) => text,
                    };

                    match parse_frame(&text, &subscriptions) {
                        InboundFrame::SubscriptionAck { id, subscription } => {
                            debug!(session_id = state.id, id, subscription = %subscription, "Subscribed");
                            if subscriptions.record(id, subscription) && !open {
                                open = true;
                                state.transition(LinkMachine::on_subscribed);
                                info!(session_id = state.id, "Pending transaction stream open");
                            }
                        }
                        InboundFrame::SubscriptionRejected { id, message } => match id {
                            PENDING_FILTERED_ID => {
                                warn!(
                                    session_id = state.id,
                                    error = %message,
                                    "Filtered pending feed rejected, subscribing unfiltered"
                                );
                                conn.send_text(pending_unfiltered_request())
                                    .await
                                    .map_err(LinkFailure::Error)?;
                            }
                            NEW_HEADS_ID => {
                                warn!(
                                    session_id = state.id,
                                    error = %message,
                                    "New heads feed rejected, block re-scans disabled"
                                );
                            }
                            _ => {
                                return Err(LinkFailure::Error(MonitorError::Stream(format!(
                                    "pending feed rejected: {}",
                                    message
                                ))));
                            }
                        },
                        InboundFrame::PendingTx(tx) => {
                            if let Some(candidate) = expected.match_pending(&tx) {
                                info!(session_id = state.id, tx_hash = %candidate.hash, "Matched pending transaction");
                                return Ok(candidate);
                            }
                        }
                        InboundFrame::NewHead { number } => {
                            debug!(session_id = state.id, block = number, "New head");
                            let rpc = self.ctx.rpc.as_ref();
                            let delay = self.ctx.config.block_scan_delay();
                            scans.push(async move {
                                sleep(delay).await;
                                (number, scan_range(rpc, expected, number, number).await)
                            });
                        }
                        InboundFrame::Unknown => {}
                    }
                }
                Some((number, scan)) = scans.next(), if !scans.is_empty() => {
                    if let Some(candidate) = scan.matched {
                        info!(
                            session_id = state.id,
                            block = number,
                            tx_hash = %candidate.hash,
                            "Matched transfer in new block"
                        );
                        return Ok(candidate);
                    }
                }
                _ = &mut connect_timer, if !open => {
                    return Err(LinkFailure::Timeout);
                }
            }
        }
    }
}
