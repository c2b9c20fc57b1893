use crate::node::{Address, NodeError};

/// Errors raised by the key store
#[derive(Debug, thiserror::Error)]
pub enum KeyStoreError {
	#[error("An account already exists")]
	AccountExists,

	#[error("Could not decrypt key: wrong passphrase or corrupted key")]
	Decrypt,

	#[error("Import failed: {0}")]
	Import(String),

	#[error("No key file for account {0}")]
	AccountNotFound(Address),

	#[error("Malformed key file: {0}")]
	MalformedKey(String),

	#[error("IO error: {0}")]
	IoError(#[from] std::io::Error),

	#[error("JSON error: {0}")]
	JsonError(#[from] serde_json::Error),
}

/// Errors raised by a block range scan
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
	#[error("Invalid block range: start {start} is after end {end}")]
	InvalidRange { start: u64, end: u64 },

	#[error("Sync has not been started")]
	NotStarted,

	#[error("Node error: {0}")]
	Node(#[from] NodeError),
}

/// Errors surfaced by the wallet core
#[allow(clippy::enum_variant_names)]
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
	#[error("Node error: {0}")]
	NodeError(#[from] NodeError),

	#[error("Key store error: {0}")]
	KeyStoreError(#[from] KeyStoreError),

	#[error("Scan error: {0}")]
	ScanError(#[from] ScanError),

	#[error("Sync is already running")]
	AlreadySyncing,

	#[error("Sync start was cancelled")]
	Cancelled,
}
