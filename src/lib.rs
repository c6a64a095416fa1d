//! POS payment monitor
//!
//! Watches an EVM chain for the one transfer that settles a tap-to-pay sale.
//!
//! # Modules
//!
//! - [`config`] - YAML configuration (logging, engine timings, chains)
//! - [`logging`] - tracing subscriber bootstrap
//! - [`monitor`] - matcher, transports and the session engine

pub mod config;
pub mod logging;
pub mod monitor;

// Convenient re-exports at crate root
pub use config::{AppConfig, ChainConfig, LogConfig, MonitorConfig};
pub use monitor::{
    ChainRegistry, MonitorError, PaymentCallbacks, PaymentMonitor, PaymentReceipt,
    PaymentRequest, SessionSnapshot,
};
