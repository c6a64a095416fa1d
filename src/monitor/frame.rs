//! Streaming frames
//!
//! Every inbound socket frame goes through [`parse_frame`] once and comes out
//! as an [`InboundFrame`]; nothing downstream looks at raw JSON.

use serde::Deserialize;
use serde_json::{Value, json};

use super::abi::parse_hex_u64;
use super::matcher::ExpectedPayment;

/// Request id of the server-side filtered pending feed
pub const PENDING_FILTERED_ID: u64 = 1;
/// Request id of the new-block-header feed
pub const NEW_HEADS_ID: u64 = 2;
/// Request id of the unfiltered full-transaction pending feed
pub const PENDING_UNFILTERED_ID: u64 = 3;

/// Pending (unmined) transaction as pushed by the node
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PendingTransaction {
    pub hash: String,
    #[serde(default)]
    pub from: Option<String>,
    /// `None` for contract creation
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub input: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// Response to one of our subscribe requests
    SubscriptionAck { id: u64, subscription: String },
    /// Error response to one of our subscribe requests
    SubscriptionRejected { id: u64, message: String },
    PendingTx(PendingTransaction),
    NewHead { number: u64 },
    Unknown,
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RawError>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<NotificationParams>,
}

#[derive(Deserialize)]
struct RawError {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct NotificationParams {
    subscription: String,
    result: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HeadHeader {
    number: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Feed {
    Pending,
    Heads,
}

/// Subscription ids handed out by the node on this socket
#[derive(Debug, Default, Clone)]
pub struct Subscriptions {
    pending: Option<String>,
    heads: Option<String>,
}

impl Subscriptions {
    /// Store an acknowledged subscription id. Returns true when it belongs to
    /// a pending-transaction feed.
    pub fn record(&mut self, request_id: u64, subscription: String) -> bool {
        match request_id {
            PENDING_FILTERED_ID | PENDING_UNFILTERED_ID => {
                self.pending = Some(subscription);
                true
            }
            NEW_HEADS_ID => {
                self.heads = Some(subscription);
                false
            }
            _ => false,
        }
    }

    fn feed(&self, subscription: &str) -> Option<Feed> {
        if self.pending.as_deref() == Some(subscription) {
            Some(Feed::Pending)
        } else if self.heads.as_deref() == Some(subscription) {
            Some(Feed::Heads)
        } else {
            None
        }
    }
}

/// Classify one inbound text frame. Malformed input is `Unknown`.
pub fn parse_frame(text: &str, subscriptions: &Subscriptions) -> InboundFrame {
    let Ok(raw) = serde_json::from_str::<RawFrame>(text) else {
        return InboundFrame::Unknown;
    };

    if let Some(params) = raw.params {
        if raw.method.as_deref() != Some("eth_subscription") {
            return InboundFrame::Unknown;
        }
        let feed = subscriptions
            .feed(&params.subscription)
            .or_else(|| guess_feed(&params.result));
        return match feed {
            Some(Feed::Pending) => parse_pending(params.result),
            Some(Feed::Heads) => parse_head(params.result),
            None => InboundFrame::Unknown,
        };
    }

    let Some(id) = raw.id else {
        return InboundFrame::Unknown;
    };
    if let Some(error) = raw.error {
        return InboundFrame::SubscriptionRejected {
            id,
            message: format!("{} ({})", error.message, error.code),
        };
    }
    match raw.result {
        Some(Value::String(subscription)) => InboundFrame::SubscriptionAck { id, subscription },
        _ => InboundFrame::Unknown,
    }
}

/// Route a notification whose subscription id we have not seen acknowledged
/// yet (ack and first notification can race) by payload shape.
fn guess_feed(result: &Value) -> Option<Feed> {
    let object = result.as_object()?;
    if object.contains_key("parentHash") {
        Some(Feed::Heads)
    } else if object.contains_key("hash")
        && (object.contains_key("input") || object.contains_key("to"))
    {
        Some(Feed::Pending)
    } else {
        None
    }
}

fn parse_pending(result: Value) -> InboundFrame {
    // hash-only notifications carry a bare string; they cannot be matched
    match serde_json::from_value::<PendingTransaction>(result) {
        Ok(tx) => InboundFrame::PendingTx(tx),
        Err(_) => InboundFrame::Unknown,
    }
}

fn parse_head(result: Value) -> InboundFrame {
    serde_json::from_value::<HeadHeader>(result)
        .ok()
        .and_then(|header| parse_hex_u64(&header.number))
        .map_or(InboundFrame::Unknown, |number| InboundFrame::NewHead { number })
}

/// Pending feed filtered by destination, full transaction objects.
/// ERC-20 sessions also watch the token contract, since that is the `to` of
/// a token transfer.
pub fn pending_filtered_request(expected: &ExpectedPayment) -> String {
    let mut to_addresses = vec![expected.recipient.clone()];
    if let Some(contract) = expected.asset.contract() {
        to_addresses.push(contract.to_string());
    }
    json!({
        "jsonrpc": "2.0",
        "id": PENDING_FILTERED_ID,
        "method": "eth_subscribe",
        "params": [
            "alchemy_pendingTransactions",
            { "toAddress": to_addresses, "hashesOnly": false }
        ]
    })
    .to_string()
}

/// Unfiltered pending feed with full transaction objects
pub fn pending_unfiltered_request() -> String {
    json!({
        "jsonrpc": "2.0",
        "id": PENDING_UNFILTERED_ID,
        "method": "eth_subscribe",
        "params": ["newPendingTransactions", true]
    })
    .to_string()
}

pub fn new_heads_request() -> String {
    json!({
        "jsonrpc": "2.0",
        "id": NEW_HEADS_ID,
        "method": "eth_subscribe",
        "params": ["newHeads"]
    })
    .to_string()
}
