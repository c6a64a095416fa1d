use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use num_bigint::BigUint;
use rust_decimal::Decimal;

use super::session::SessionMode;

/// Token address reserved for the chain's native asset
pub const NATIVE_TOKEN_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

/// `0x` followed by exactly 40 hex digits
pub fn is_evm_address(address: &str) -> bool {
    match address.strip_prefix("0x").or_else(|| address.strip_prefix("0X")) {
        Some(body) => body.len() == 40 && body.bytes().all(|b| b.is_ascii_hexdigit()),
        None => false,
    }
}

/// Case-insensitive address comparison (checksummed vs lowercase)
#[inline]
pub fn same_address(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

/// Asset transfer category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferCategory {
    Native,
    Erc20,
}

impl TransferCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferCategory::Native => "NATIVE",
            TransferCategory::Erc20 => "ERC20",
        }
    }
}

impl fmt::Display for TransferCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A transfer decoded from either transport, before matching
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferCandidate {
    pub hash: String,
    pub from: String,
    pub to: String,
    /// Amount in the asset's smallest unit
    pub value_raw: BigUint,
    pub category: TransferCategory,
    /// Token contract; only set for `Erc20`
    pub contract_address: Option<String>,
}

/// What the session expects to be paid in
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentAsset {
    Native,
    Erc20 { contract: String },
}

impl PaymentAsset {
    /// The all-zero address selects the native asset, anything else is a
    /// token contract.
    pub fn from_token_address(token_address: &str) -> Self {
        if same_address(token_address, NATIVE_TOKEN_ADDRESS) {
            PaymentAsset::Native
        } else {
            PaymentAsset::Erc20 {
                contract: token_address.to_ascii_lowercase(),
            }
        }
    }

    pub fn contract(&self) -> Option<&str> {
        match self {
            PaymentAsset::Native => None,
            PaymentAsset::Erc20 { contract } => Some(contract),
        }
    }

    pub fn category(&self) -> TransferCategory {
        match self {
            PaymentAsset::Native => TransferCategory::Native,
            PaymentAsset::Erc20 { .. } => TransferCategory::Erc20,
        }
    }
}

/// Parameters of one payment the terminal is waiting for
#[derive(Debug, Clone)]
pub struct PaymentRequest {
    pub recipient_address: String,
    /// [`NATIVE_TOKEN_ADDRESS`] for the native asset
    pub token_address: String,
    pub expected_amount: BigUint,
    pub token_symbol: String,
    pub decimals: u8,
    /// Display only, never used for matching
    pub merchant_usd: Option<Decimal>,
    pub chain_id: u64,
    pub chain_name: String,
}

/// Delivered to `on_payment_received` exactly once per session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentReceipt {
    pub tx_hash: String,
    pub token_symbol: String,
    /// Address the matching transaction targeted: the recipient for native
    /// payments, the token contract for ERC-20 payments.
    pub address: String,
    pub decimals: u8,
}

type ReceivedFn = dyn Fn(&PaymentReceipt) + Send + Sync;
type ErrorFn = dyn Fn(&str) + Send + Sync;

/// Caller-supplied sinks
#[derive(Clone)]
pub struct PaymentCallbacks {
    on_payment_received: Arc<ReceivedFn>,
    on_error: Arc<ErrorFn>,
}

impl PaymentCallbacks {
    pub fn new<R, E>(on_payment_received: R, on_error: E) -> Self
    where
        R: Fn(&PaymentReceipt) + Send + Sync + 'static,
        E: Fn(&str) + Send + Sync + 'static,
    {
        Self {
            on_payment_received: Arc::new(on_payment_received),
            on_error: Arc::new(on_error),
        }
    }

    pub(crate) fn payment_received(&self, receipt: &PaymentReceipt) {
        (self.on_payment_received)(receipt)
    }

    pub(crate) fn error(&self, message: &str) {
        (self.on_error)(message)
    }
}

impl fmt::Debug for PaymentCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaymentCallbacks").finish_non_exhaustive()
    }
}

/// Immutable view of the active session for display
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub session_id: u64,
    pub chain_id: u64,
    pub chain_name: String,
    pub token_symbol: String,
    pub decimals: u8,
    pub expected_amount: BigUint,
    pub merchant_usd: Option<Decimal>,
    pub started_at: DateTime<Utc>,
    pub mode: SessionMode,
    pub reconnect_attempts: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evm_address_validation() {
        assert!(is_evm_address("0x742d35Cc6634C0532925a3b844Bc454e4438f44e"));
        assert!(is_evm_address(NATIVE_TOKEN_ADDRESS));
        assert!(!is_evm_address("742d35Cc6634C0532925a3b844Bc454e4438f44e"));
        assert!(!is_evm_address("0x742d35Cc6634C0532925a3b844Bc454e4438f4"));
        assert!(!is_evm_address("0xZZ2d35Cc6634C0532925a3b844Bc454e4438f44e"));
    }

    #[test]
    fn test_payment_asset_from_token_address() {
        assert_eq!(
            PaymentAsset::from_token_address(NATIVE_TOKEN_ADDRESS),
            PaymentAsset::Native
        );

        let usdc = PaymentAsset::from_token_address("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48");
        assert_eq!(usdc.category(), TransferCategory::Erc20);
        assert_eq!(
            usdc.contract(),
            Some("0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48")
        );
    }

    #[test]
    fn test_callbacks_forward() {
        use std::sync::Mutex;

        let seen = Arc::new(Mutex::new(Vec::new()));
        let errors = Arc::new(Mutex::new(Vec::new()));
        let seen_cb = seen.clone();
        let errors_cb = errors.clone();
        let callbacks = PaymentCallbacks::new(
            move |r: &PaymentReceipt| seen_cb.lock().unwrap().push(r.tx_hash.clone()),
            move |m: &str| errors_cb.lock().unwrap().push(m.to_string()),
        );

        callbacks.payment_received(&PaymentReceipt {
            tx_hash: "0xabc".to_string(),
            token_symbol: "ETH".to_string(),
            address: NATIVE_TOKEN_ADDRESS.to_string(),
            decimals: 18,
        });
        callbacks.error("boom");

        assert_eq!(seen.lock().unwrap().as_slice(), ["0xabc".to_string()]);
        assert_eq!(errors.lock().unwrap().as_slice(), ["boom".to_string()]);
    }
}
