//! Wallet Synchronization Module
//!
//! This module provides the services that keep the wallet in step with the chain. It is composed
//! of several submodules, each responsible for a specific aspect of the sync process:
//!
//! - `orchestrator`: The `WalletCore` entry point. It owns the key store and wires the sync services
//!   to a running node.
//! - `events`: Event types, the event dispatcher and the bridge to the application observers.
//! - `progress_monitor`: Periodic progress polling and the shared bulk-sync flag.
//! - `head_dispatcher`: Balance refresh and single-block scans on every new chain head.
//! - `scanner`: Block range scans for transactions touching an address.
//! - `diagnostics`: Reporting of failures absorbed by the background tasks.
//!
//! The monitor and the head dispatcher run concurrently and communicate only through `SyncState`.

/// Swallowed failure reporting
pub mod diagnostics;
/// Event system for decoupled communication during sync
pub mod events;
/// Per-head balance and transaction updates
pub mod head_dispatcher;
/// Main coordinator for the wallet sync process
pub mod orchestrator;
/// Tracks the node's bulk synchronization
pub mod progress_monitor;
/// Block range transaction scanning
pub mod scanner;

pub use orchestrator::*;
