//! Target chain discovery.
//!
//! A node can host more than one VEIL chain while migrations are in flight, so
//! the choice among candidates is deterministic: exact `VEIL` name, then
//! `VEIL2`, then the first surviving row.
use crate::error::HarnessError;
use crate::node::{BlockchainRow, NodeClient};
use anyhow::Result;
use serde::Serialize;

const CHAIN_NAME_PREFIX: &str = "VEIL";
const PREFERRED_NAMES: [&str; 2] = ["VEIL", "VEIL2"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiscoveryStrategy {
    Explicit,
    VmId,
    NameFallback,
}

impl DiscoveryStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscoveryStrategy::Explicit => "explicit",
            DiscoveryStrategy::VmId => "vm-id",
            DiscoveryStrategy::NameFallback => "name-fallback",
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ChainSelection {
    pub chain_id: String,
    pub strategy: DiscoveryStrategy,
    /// Every surviving candidate, kept for audit in the bundle.
    pub discovered: Vec<BlockchainRow>,
}

/// Use `explicit` when given, otherwise discover from the node.
pub fn resolve_chain(
    client: &dyn NodeClient,
    node_url: &str,
    explicit: Option<&str>,
    vm_ids: &[String],
) -> Result<ChainSelection> {
    if let Some(chain_id) = explicit {
        return Ok(ChainSelection {
            chain_id: chain_id.to_string(),
            strategy: DiscoveryStrategy::Explicit,
            discovered: Vec::new(),
        });
    }
    let rows = client.list_blockchains(node_url)?;
    let selection = select_chain(node_url, rows, vm_ids)?;
    tracing::info!(
        chain_id = selection.chain_id.as_str(),
        strategy = selection.strategy.as_str(),
        candidates = selection.discovered.len(),
        "chain resolved"
    );
    Ok(selection)
}

/// Pure selection over a `platform.getBlockchains` listing.
pub fn select_chain(
    node_url: &str,
    rows: Vec<BlockchainRow>,
    vm_ids: &[String],
) -> Result<ChainSelection, HarnessError> {
    let (strategy, candidates): (DiscoveryStrategy, Vec<BlockchainRow>) = {
        let by_vm: Vec<BlockchainRow> = rows
            .iter()
            .filter(|row| vm_ids.iter().any(|id| *id == row.vm_id))
            .cloned()
            .collect();
        if by_vm.is_empty() {
            let by_name = rows
                .into_iter()
                .filter(|row| row.name.to_ascii_uppercase().starts_with(CHAIN_NAME_PREFIX))
                .collect();
            (DiscoveryStrategy::NameFallback, by_name)
        } else {
            (DiscoveryStrategy::VmId, by_vm)
        }
    };

    let preferred = PREFERRED_NAMES
        .iter()
        .find_map(|name| {
            candidates
                .iter()
                .find(|row| row.name.eq_ignore_ascii_case(name))
        })
        .or_else(|| candidates.first())
        .ok_or_else(|| HarnessError::ChainNotFound {
            node_url: node_url.to_string(),
        })?;
    if preferred.id.is_empty() {
        return Err(HarnessError::config("failed to resolve chain ID"));
    }

    Ok(ChainSelection {
        chain_id: preferred.id.clone(),
        strategy,
        discovered: candidates.clone(),
    })
}
