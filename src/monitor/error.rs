use thiserror::Error;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Unsupported chain: {0}")]
    UnsupportedChain(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("No async runtime available to drive the session")]
    NoRuntime,

    #[error("RPC connection failed: {0}")]
    RpcConnection(String),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Requested block range is beyond the chain head")]
    RangeBeyondHead,

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl MonitorError {
    /// Transient polling condition: the indexer has not caught up with the
    /// head it just reported. The range is retried on the next tick.
    pub fn is_range_beyond_head(&self) -> bool {
        match self {
            MonitorError::RangeBeyondHead => true,
            MonitorError::Rpc { message, .. } => mentions_range_beyond_head(message),
            _ => false,
        }
    }
}

/// Node/indexer wording varies ("toBlock is past head", "block range extends
/// beyond current head block", ...).
pub(crate) fn mentions_range_beyond_head(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("head")
        && ["past", "beyond", "exceed", "ahead"]
            .iter()
            .any(|word| message.contains(word))
}

impl From<reqwest::Error> for MonitorError {
    fn from(value: reqwest::Error) -> Self {
        MonitorError::RpcConnection(value.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for MonitorError {
    fn from(value: tokio_tungstenite::tungstenite::Error) -> Self {
        MonitorError::Stream(value.to_string())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
