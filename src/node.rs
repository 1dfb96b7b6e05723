//! Node access: health probes and JSON-RPC discovery calls.
//!
//! The [`NodeClient`] trait is the seam between readiness logic and the wire;
//! [`HttpNodeClient`] is the only production implementation.
mod health;
mod rpc;

pub use health::{resolve_healthy_node, wait_for_healthy, HealthPolicy, HealthyNode};
pub use rpc::HttpNodeClient;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which health endpoint answered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthEndpoint {
    Readiness,
    Health,
}

impl HealthEndpoint {
    pub fn path(&self) -> &'static str {
        match self {
            HealthEndpoint::Readiness => "/ext/health/readiness",
            HealthEndpoint::Health => "/ext/health",
        }
    }
}

/// One row of `platform.getBlockchains`.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct BlockchainRow {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "subnetID")]
    pub subnet_id: String,
    #[serde(default, rename = "vmID")]
    pub vm_id: String,
}

pub trait NodeClient {
    /// Returns the payload's `healthy` flag; transport and non-2xx responses
    /// are errors.
    fn probe_health(&self, base_url: &str, endpoint: HealthEndpoint, timeout: Duration)
        -> Result<bool>;

    fn list_blockchains(&self, base_url: &str) -> Result<Vec<BlockchainRow>>;
}
