//! Per-head wallet updates.
//!
//! On every new chain head the dispatcher refreshes the current account's balance and, once
//! the node has caught up, scans the head's block for transactions touching the account.
//! During bulk sync the scan is skipped; the balance is still refreshed.

use crate::node::{Header, HeadHandler, NodeClient, NodeError};
use crate::wallet::keystore::KeyStore;
use crate::wallet::sync::diagnostics::{Diagnostic, DiagnosticSink};
use crate::wallet::sync::events::{EventDispatcher, SyncEvent};
use crate::wallet::sync::progress_monitor::SyncState;
use crate::wallet::sync::scanner::BlockTransactionScanner;

use std::sync::Arc;
use tracing::{debug, trace};

/// Handles heads delivered by a [`crate::node::Subscription`].
pub struct HeadDispatcher {
	keystore: Arc<KeyStore>,
	node: Arc<dyn NodeClient>,
	scanner: BlockTransactionScanner,
	state: SyncState,
	events: Arc<EventDispatcher>,
	diagnostics: Arc<dyn DiagnosticSink>,
}

impl HeadDispatcher {
	pub fn new(
		keystore: Arc<KeyStore>,
		node: Arc<dyn NodeClient>,
		state: SyncState,
		events: Arc<EventDispatcher>,
		diagnostics: Arc<dyn DiagnosticSink>,
	) -> Self {
		Self {
			keystore,
			scanner: BlockTransactionScanner::new(node.clone()),
			node,
			state,
			events,
			diagnostics,
		}
	}

	/// Process one head; the first failure ends processing of this head.
	async fn process(&self, head: &Header) -> Result<(), Diagnostic> {
		let block = head.number;
		let account = match self.keystore.current_account() {
			Ok(Some(account)) => account,
			Ok(None) => return Err(Diagnostic::Account { block, error: None }),
			Err(e) => {
				return Err(Diagnostic::Account {
					block,
					error: Some(e),
				});
			}
		};

		let balance = self
			.node
			.balance_at(&account.address, block)
			.await
			.map_err(|error| Diagnostic::Balance { block, error })?;
		self.events
			.dispatch(&SyncEvent::BalanceUpdated {
				block_number: block,
				balance,
			})
			.await;

		if self.state.is_bulk_syncing() {
			trace!("Bulk syncing, skipping scan of block {}", block);
			return Ok(());
		}

		let transactions = self
			.scanner
			.scan(&account.address, block, block)
			.await
			.map_err(|error| Diagnostic::Scan { block, error })?;
		if !transactions.is_empty() {
			self.events
				.dispatch(&SyncEvent::TransactionsReceived {
					block_number: block,
					transactions,
				})
				.await;
		}

		Ok(())
	}
}

#[async_trait::async_trait]
impl HeadHandler for HeadDispatcher {
	async fn on_new_head(&self, head: Header) {
		debug!("New head {} ({})", head.number, head.hash);
		if let Err(diagnostic) = self.process(&head).await {
			self.diagnostics.record(diagnostic);
		}
	}

	async fn on_stream_error(&self, error: NodeError) {
		self.diagnostics.record(Diagnostic::HeadStream(error));
	}

	async fn on_stream_closed(&self) {
		self.diagnostics.record(Diagnostic::HeadStreamClosed);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::node::{DEFAULT_HEAD_BUFFER, subscribe_new_head};
	use crate::testing::{MockNode, transfer, wait_until};
	use crate::wallet::keystore::KeyStoreConfig;
	use crate::wallet::keystore::crypto::KdfParams;
	use crate::wallet::sync::diagnostics::RecordingDiagnostics;
	use crate::wallet::sync::events::ObserverBridge;
	use crate::wallet::sync::events::tests::RecordingObserver;

	struct Fixture {
		_dir: tempfile::TempDir,
		keystore: Arc<KeyStore>,
		node: Arc<MockNode>,
		state: SyncState,
		observer: Arc<RecordingObserver>,
		diagnostics: Arc<RecordingDiagnostics>,
	}

	impl Fixture {
		fn new() -> Self {
			let dir = tempfile::tempdir().unwrap();
			let keystore = Arc::new(KeyStore::open(
				dir.path().join("keystore"),
				KeyStoreConfig {
					storage_kdf: KdfParams { iterations: 2 },
					export_kdf: KdfParams { iterations: 2 },
				},
			));
			Self {
				_dir: dir,
				keystore,
				node: MockNode::new(),
				state: SyncState::new(),
				observer: Arc::new(RecordingObserver::default()),
				diagnostics: Arc::new(RecordingDiagnostics::default()),
			}
		}

		fn dispatcher(&self) -> Arc<HeadDispatcher> {
			let mut events = EventDispatcher::new();
			events.register_handler(Arc::new(ObserverBridge::new(
				self.observer.clone(),
				self.observer.clone(),
			)));
			Arc::new(HeadDispatcher::new(
				self.keystore.clone(),
				self.node.clone(),
				self.state.clone(),
				Arc::new(events),
				self.diagnostics.clone(),
			))
		}
	}

	#[tokio::test]
	async fn bulk_sync_skips_scans() {
		let fixture = Fixture::new();
		let account = fixture.keystore.create_account("pw").unwrap();
		fixture.node.set_balance(account.address, 7);
		fixture.state.set_bulk_syncing(true);
		let dispatcher = fixture.dispatcher();

		for n in 1..=3 {
			dispatcher.on_new_head(crate::testing::header(n)).await;
		}

		assert_eq!(fixture.node.balance_calls(), 3);
		assert_eq!(fixture.node.block_calls(), 0);
		assert_eq!(fixture.observer.count("balance 7"), 3);
	}

	#[tokio::test]
	async fn caught_up_scans_each_head_once() {
		let fixture = Fixture::new();
		let account = fixture.keystore.create_account("pw").unwrap();
		fixture.node.add_block(1, vec![]);
		fixture
			.node
			.add_block(2, vec![(transfer(1, Some(account.address), 100), None)]);
		let dispatcher = fixture.dispatcher();

		dispatcher.on_new_head(crate::testing::header(1)).await;
		dispatcher.on_new_head(crate::testing::header(2)).await;

		assert_eq!(fixture.node.balance_calls(), 2);
		assert_eq!(fixture.node.block_calls(), 2);
		assert_eq!(
			fixture.observer.calls(),
			vec!["balance 0", "balance 0", "transactions 1"]
		);
		assert_eq!(fixture.diagnostics.count(), 0);
	}

	#[tokio::test]
	async fn missing_account_is_a_diagnostic() {
		let fixture = Fixture::new();
		let dispatcher = fixture.dispatcher();

		dispatcher.on_new_head(crate::testing::header(1)).await;

		assert_eq!(fixture.node.balance_calls(), 0);
		assert_eq!(
			fixture.diagnostics.messages(),
			vec!["no account to update for head 1"]
		);
	}

	#[tokio::test]
	async fn failures_do_not_stop_later_heads() {
		let fixture = Fixture::new();
		fixture.keystore.create_account("pw").unwrap();
		fixture.node.fail_balance_at(1);
		// Block 2 is unknown to the node, so its scan fails.
		fixture.node.add_block(3, vec![]);
		let dispatcher = fixture.dispatcher();

		let subscription = subscribe_new_head(
			fixture.node.clone(),
			dispatcher,
			DEFAULT_HEAD_BUFFER,
		)
		.await
		.unwrap();
		fixture.node.push_head(1);
		fixture.node.push_head(2);
		fixture.node.push_head_error("garbled frame");
		fixture.node.push_head(3);

		wait_until(|| fixture.node.block_calls() == 2).await;
		wait_until(|| fixture.diagnostics.count() == 3).await;
		assert!(subscription.is_active());
		assert_eq!(fixture.node.balance_calls(), 3);
		assert_eq!(fixture.observer.count("balance"), 2);

		let messages = fixture.diagnostics.messages();
		assert!(messages[0].starts_with("balance query failed for head 1"));
		assert!(messages[1].starts_with("scan failed for head 2"));
		assert!(messages[2].starts_with("head subscription error"));
		subscription.unsubscribe();
	}

	#[tokio::test]
	async fn dropped_connection_is_reported_and_reopened() {
		let fixture = Fixture::new();
		let account = fixture.keystore.create_account("pw").unwrap();
		fixture.node.set_balance(account.address, 4);
		fixture.node.add_block(1, vec![]);
		fixture.node.add_block(2, vec![]);
		let dispatcher = fixture.dispatcher();

		let subscription = subscribe_new_head(
			fixture.node.clone(),
			dispatcher,
			DEFAULT_HEAD_BUFFER,
		)
		.await
		.unwrap();
		fixture.node.push_head(1);
		wait_until(|| fixture.node.block_calls() == 1).await;

		fixture.node.drop_head_connection();
		fixture.node.push_head(2);
		wait_until(|| fixture.node.block_calls() == 2).await;

		assert_eq!(fixture.node.head_subscriptions(), 2);
		assert_eq!(
			fixture.diagnostics.messages(),
			vec!["head subscription closed by node, resubscribing"]
		);
		assert_eq!(fixture.observer.count("balance 4"), 2);
		subscription.unsubscribe();
	}
}
