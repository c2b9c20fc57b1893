//! Node integration module
//!
//! This module owns the lifecycle of the light node process and the JSON-RPC client used to
//! query it. The node tracks chain state and serves blocks, balances, sync progress and a
//! push subscription for new chain heads.

/// JSON-RPC client and the `NodeClient` seam
mod client;
/// Bootstrap configuration and storage layout
pub mod config;
/// Node process lifecycle
mod launcher;
/// Bounded head delivery
mod subscription;
/// Type definitions for node data structures
mod types;

pub use client::{HeadStream, NodeClient, RpcNodeClient};
pub use config::{NodeConfig, StorageLayout};
pub use launcher::{NodeHandle, NodeLauncher, ProcessLauncher};
pub use subscription::{DEFAULT_HEAD_BUFFER, HeadHandler, Subscription, subscribe_new_head};
pub use types::*;
