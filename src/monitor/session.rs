//! Session state machine
//!
//! ```text
//! STREAM_CONNECTING ─ack─▶ STREAM_OPEN ─fail─▶ RECONNECTING ─retry─▶ STREAM_CONNECTING
//!        │                                          │
//!        └──────────fail (attempts ≥ max)───────────┴──────▶ POLLING
//!
//! any active mode ─match─▶ MATCHED      any active mode ─stop─▶ STOPPED
//! ```
//!
//! MATCHED and STOPPED are terminal: every event is a no-op afterwards.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use super::matcher::ExpectedPayment;
use super::rpc::ChainRpc;
use super::types::{PaymentRequest, SessionSnapshot};
use crate::config::MonitorConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionMode {
    StreamConnecting,
    StreamOpen,
    Reconnecting,
    Polling,
    Matched,
    Stopped,
}

impl SessionMode {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionMode::Matched | SessionMode::Stopped)
    }

    #[inline]
    pub fn is_streaming(&self) -> bool {
        matches!(
            self,
            SessionMode::StreamConnecting | SessionMode::StreamOpen | SessionMode::Reconnecting
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionMode::StreamConnecting => "STREAM_CONNECTING",
            SessionMode::StreamOpen => "STREAM_OPEN",
            SessionMode::Reconnecting => "RECONNECTING",
            SessionMode::Polling => "POLLING",
            SessionMode::Matched => "MATCHED",
            SessionMode::Stopped => "STOPPED",
        }
    }
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Link state machine: one dispatcher per event, each returning the mode it
/// leaves the session in.
#[derive(Debug, Clone)]
pub struct LinkMachine {
    mode: SessionMode,
    reconnect_attempts: u32,
    max_reconnect_attempts: u32,
}

impl LinkMachine {
    pub fn new(streaming: bool, max_reconnect_attempts: u32) -> Self {
        Self {
            mode: if streaming {
                SessionMode::StreamConnecting
            } else {
                SessionMode::Polling
            },
            reconnect_attempts: 0,
            max_reconnect_attempts,
        }
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    /// Socket connected; still waiting for the subscription ack.
    pub fn on_open(&mut self) -> SessionMode {
        self.mode
    }

    /// Pending feed acknowledged.
    pub fn on_subscribed(&mut self) -> SessionMode {
        if self.mode == SessionMode::StreamConnecting {
            self.mode = SessionMode::StreamOpen;
        }
        self.mode
    }

    /// Socket error, close, or connect timeout. Never resets the attempt
    /// counter.
    pub fn on_error(&mut self) -> SessionMode {
        if !self.mode.is_streaming() {
            return self.mode;
        }
        self.reconnect_attempts = self.reconnect_attempts.saturating_add(1);
        self.mode = if self.reconnect_attempts >= self.max_reconnect_attempts {
            SessionMode::Polling
        } else {
            SessionMode::Reconnecting
        };
        self.mode
    }

    pub fn on_close(&mut self) -> SessionMode {
        self.on_error()
    }

    pub fn on_timeout(&mut self) -> SessionMode {
        self.on_error()
    }

    /// Backoff elapsed, dialing again.
    pub fn on_retry(&mut self) -> SessionMode {
        if self.mode == SessionMode::Reconnecting {
            self.mode = SessionMode::StreamConnecting;
        }
        self.mode
    }

    pub fn on_match(&mut self) -> SessionMode {
        if !self.mode.is_terminal() {
            self.mode = SessionMode::Matched;
        }
        self.mode
    }

    pub fn on_stop(&mut self) -> SessionMode {
        if !self.mode.is_terminal() {
            self.mode = SessionMode::Stopped;
        }
        self.mode
    }
}

/// State of one monitoring session shared by the engine and its transports
#[derive(Debug)]
pub struct SessionState {
    pub id: u64,
    pub request: PaymentRequest,
    pub expected: ExpectedPayment,
    pub started_at: DateTime<Utc>,
    link: Mutex<LinkMachine>,
    /// Last block fully scanned by polling; `None` while streaming
    watermark: Mutex<Option<u64>>,
}

impl SessionState {
    pub fn new(id: u64, request: PaymentRequest, link: LinkMachine) -> Self {
        let expected = ExpectedPayment::from_request(&request);
        Self {
            id,
            request,
            expected,
            started_at: Utc::now(),
            link: Mutex::new(link),
            watermark: Mutex::new(None),
        }
    }

    /// Apply one event to the link machine.
    pub fn transition<F>(&self, event: F) -> SessionMode
    where
        F: FnOnce(&mut LinkMachine) -> SessionMode,
    {
        event(&mut lock(&self.link))
    }

    pub fn mode(&self) -> SessionMode {
        lock(&self.link).mode()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        lock(&self.link).reconnect_attempts()
    }

    pub fn watermark(&self) -> Option<u64> {
        *lock(&self.watermark)
    }

    pub fn set_watermark(&self, block: u64) {
        *lock(&self.watermark) = Some(block);
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let link = lock(&self.link);
        SessionSnapshot {
            session_id: self.id,
            chain_id: self.request.chain_id,
            chain_name: self.request.chain_name.clone(),
            token_symbol: self.request.token_symbol.clone(),
            decimals: self.request.decimals,
            expected_amount: self.request.expected_amount.clone(),
            merchant_usd: self.request.merchant_usd,
            started_at: self.started_at,
            mode: link.mode(),
            reconnect_attempts: link.reconnect_attempts(),
        }
    }
}

/// What a transport needs to work one session
#[derive(Clone)]
pub struct SessionContext {
    pub state: Arc<SessionState>,
    pub rpc: Arc<dyn ChainRpc>,
    pub config: MonitorConfig,
}

/// Poisoning only means another holder panicked mid-update; the guarded
/// values are plain data and stay usable.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
