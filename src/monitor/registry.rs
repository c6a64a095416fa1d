//! Read-only chain registry, populated once at startup.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::info;

use super::error::MonitorError;
use super::rpc::{ChainRpc, HttpChainRpc};
use crate::config::{ChainConfig, MonitorConfig};

/// Everything the engine needs to watch one chain
#[derive(Clone)]
pub struct ChainEntry {
    pub chain_id: u64,
    pub name: String,
    pub native_symbol: String,
    pub rpc: Arc<dyn ChainRpc>,
    /// Streaming endpoint; `None` means polling only
    pub ws_url: Option<String>,
    /// Node accepts the destination-filtered pending subscription
    pub pending_filter: bool,
}

impl fmt::Debug for ChainEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainEntry")
            .field("chain_id", &self.chain_id)
            .field("name", &self.name)
            .field("native_symbol", &self.native_symbol)
            .field("ws_url", &self.ws_url)
            .field("pending_filter", &self.pending_filter)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChainRegistry {
    chains: HashMap<u64, ChainEntry>,
}

impl ChainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build HTTP RPC clients for every configured chain.
    pub fn from_config(
        chains: &[ChainConfig],
        monitor: &MonitorConfig,
    ) -> Result<Self, MonitorError> {
        let mut registry = Self::new();
        for chain in chains {
            let rpc = HttpChainRpc::new(
                &chain.rpc_url,
                chain.rpc_timeout(),
                monitor.transfer_page_limit,
            )?;
            info!(
                chain_id = chain.chain_id,
                name = %chain.name,
                streaming = chain.ws_url.is_some(),
                "Registered chain"
            );
            registry = registry.with_chain(ChainEntry {
                chain_id: chain.chain_id,
                name: chain.name.clone(),
                native_symbol: chain.native_symbol.clone(),
                rpc: Arc::new(rpc),
                ws_url: chain.ws_url.clone(),
                pending_filter: chain.pending_filter,
            });
        }
        Ok(registry)
    }

    /// Builder-style insert; a later entry for the same id replaces the
    /// earlier one.
    pub fn with_chain(mut self, entry: ChainEntry) -> Self {
        self.chains.insert(entry.chain_id, entry);
        self
    }

    pub fn get(&self, chain_id: u64) -> Option<&ChainEntry> {
        self.chains.get(&chain_id)
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    pub fn chain_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.chains.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}
