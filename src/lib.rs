//! Synchronization core of a light Ethereum wallet.
//!
//! [`WalletCore`] launches a light node, keeps the local key store, tracks the node's bulk sync
//! and reports balance changes and relevant transactions for the current account as new chain
//! heads arrive.

pub mod config;
pub mod node;
pub mod utils;
pub mod wallet;

#[cfg(test)]
mod testing;

pub use config::CoreConfig;
pub use wallet::{
    Account, BalanceObserver, CoreError, EncryptedKey, KeyStoreError, ScanError,
    ScannedTransaction, SyncObserver, WalletCore,
};
