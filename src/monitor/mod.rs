//! Payment Monitor
//!
//! Confirms a single point-of-sale payment on an EVM chain:
//! - Streaming transport over the node's pending-transaction feed
//! - Per-block re-scans through the indexed transfer API
//! - Polling fallback once streaming exhausts its reconnect budget
//! - Exactly-once delivery of the first matching transfer

pub mod abi;
pub mod engine;
pub mod error;
pub mod frame;
pub mod matcher;
pub mod poller;
pub mod registry;
pub mod rpc;
pub mod session;
pub mod stream;
pub mod types;

// Re-exports for convenience
pub use engine::PaymentMonitor;
pub use error::{ConfigError, MonitorError};
pub use matcher::ExpectedPayment;
pub use poller::{Poller, TickOutcome};
pub use registry::{ChainEntry, ChainRegistry};
pub use rpc::{ChainRpc, HttpChainRpc, TransferQuery};
pub use session::SessionMode;
pub use stream::{StreamConnection, StreamConnector, WsConnector};
pub use types::{
    NATIVE_TOKEN_ADDRESS, PaymentAsset, PaymentCallbacks, PaymentReceipt, PaymentRequest,
    SessionSnapshot, TransferCandidate, TransferCategory,
};
