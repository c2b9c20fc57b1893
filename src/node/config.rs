//! Node bootstrap configuration and on-disk layout.

use std::path::{Path, PathBuf};
use std::time::Duration;

use super::types::NodeError;

/// Network identifier of the Rinkeby test network.
pub const RINKEBY_NETWORK_ID: u64 = 4;

/// Bootstrap peer for the Rinkeby test network.
pub const RINKEBY_BOOTNODE: &str = "enode://a24ac7c5484ef4ed0c5eb2d36620ba4e4aa13b8c84684e1b4aab0cebea2ae45cb4d375b77eab56516d34bfbd3c1a833fc51296ff084b770b94fb9028c4d25ccf@52.169.42.101:30303";

/// Stats reporting endpoint (`name:secret@host`).
pub const RINKEBY_ETH_STATS: &str = "flypaper:Respect my authoritah!@stats.rinkeby.io";

/// Bundled Rinkeby genesis definition.
pub const RINKEBY_GENESIS: &str = include_str!("../../res/rinkeby.json");

/// Default name of the light node executable, resolved through `PATH`.
pub const DEFAULT_NODE_EXECUTABLE: &str = "geth";

/// Directories used by the wallet under its private data root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding encrypted key files.
    pub fn keystore_dir(&self) -> PathBuf {
        self.root.join("keystore")
    }

    /// Directory handed to the node for its chain database.
    pub fn node_data_dir(&self) -> PathBuf {
        self.root.join(".rinkeby")
    }
}

/// Everything needed to launch a node. Immutable once the node is started.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Network identifier the node must report once up.
    pub network_id: u64,
    /// Genesis definition as JSON.
    pub genesis: String,
    /// Bootstrap peers (enode URLs).
    pub bootstrap_nodes: Vec<String>,
    /// Stats reporting endpoint.
    pub eth_stats: String,
    /// Node chain data directory.
    pub data_dir: PathBuf,
    /// Node executable.
    pub executable: PathBuf,
    /// Local HTTP JSON-RPC port.
    pub http_port: u16,
    /// Local WebSocket JSON-RPC port.
    pub ws_port: u16,
    /// Upper bound on the wait for the node to answer after spawning.
    pub startup_timeout: Duration,
}

impl NodeConfig {
    /// Rinkeby light node rooted in `layout`.
    pub fn rinkeby(layout: &StorageLayout) -> Self {
        Self {
            network_id: RINKEBY_NETWORK_ID,
            genesis: RINKEBY_GENESIS.to_string(),
            bootstrap_nodes: vec![RINKEBY_BOOTNODE.to_string()],
            eth_stats: RINKEBY_ETH_STATS.to_string(),
            data_dir: layout.node_data_dir(),
            executable: PathBuf::from(DEFAULT_NODE_EXECUTABLE),
            http_port: 8545,
            ws_port: 8546,
            startup_timeout: Duration::from_secs(60),
        }
    }

    pub fn rpc_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.http_port)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://127.0.0.1:{}", self.ws_port)
    }

    pub fn genesis_path(&self) -> PathBuf {
        self.data_dir.join("genesis.json")
    }

    /// Check the configuration before anything is spawned.
    pub fn validate(&self) -> Result<(), NodeError> {
        if self.network_id == 0 {
            return Err(NodeError::StartFailed(
                "network id must be non-zero".to_string(),
            ));
        }
        if self.bootstrap_nodes.is_empty() {
            return Err(NodeError::StartFailed(
                "at least one bootstrap node is required".to_string(),
            ));
        }
        if let Some(bad) = self
            .bootstrap_nodes
            .iter()
            .find(|node| !node.starts_with("enode://"))
        {
            return Err(NodeError::StartFailed(format!(
                "invalid bootstrap node {bad:?}"
            )));
        }
        if self.http_port == self.ws_port {
            return Err(NodeError::StartFailed(
                "HTTP and WebSocket ports must differ".to_string(),
            ));
        }

        let genesis: serde_json::Value = serde_json::from_str(&self.genesis)
            .map_err(|e| NodeError::StartFailed(format!("invalid genesis definition: {e}")))?;
        let chain_id = genesis
            .get("config")
            .and_then(|c| c.get("chainId"))
            .and_then(|c| c.as_u64());
        if chain_id.is_none() {
            return Err(NodeError::StartFailed(
                "genesis definition has no config.chainId".to_string(),
            ));
        }

        Ok(())
    }
}
