//! Configuration of the wallet core.

use crate::node::{DEFAULT_HEAD_BUFFER, NodeConfig, StorageLayout};
use crate::wallet::keystore::KeyStoreConfig;
use crate::wallet::sync::progress_monitor::MonitorConfig;

use std::path::PathBuf;

/// Everything `WalletCore` needs to run.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub storage: StorageLayout,
    pub node: NodeConfig,
    pub keystore: KeyStoreConfig,
    pub monitor: MonitorConfig,
    /// Heads buffered between the node subscription and the head dispatcher.
    pub head_buffer_size: usize,
}

impl CoreConfig {
    /// Rinkeby light wallet storing its data under `root`.
    pub fn rinkeby(root: impl Into<PathBuf>) -> Self {
        let storage = StorageLayout::new(root);
        Self {
            node: NodeConfig::rinkeby(&storage),
            storage,
            keystore: KeyStoreConfig::default(),
            monitor: MonitorConfig::default(),
            head_buffer_size: DEFAULT_HEAD_BUFFER,
        }
    }
}
