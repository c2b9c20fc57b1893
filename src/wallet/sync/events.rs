//! Event system for wallet synchronization.
//!
//! The progress monitor and the head dispatcher never call observers directly. They emit
//! [`SyncEvent`]s into an [`EventDispatcher`], which fans every event out to the registered
//! handlers in registration order. [`ObserverBridge`] is the handler that forwards events to
//! the application's [`BalanceObserver`] and [`SyncObserver`].

use crate::node::Wei;
use crate::utils::{ETHER_DECIMALS, format_token_amount};
use crate::wallet::CoreError;
use crate::wallet::sync::scanner::ScannedTransaction;

use std::sync::Arc;
use tracing::{debug, error, info};

/// Events that occur during wallet synchronization
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// Balance of the current account at a new head
    BalanceUpdated { block_number: u64, balance: Wei },
    /// Transactions touching the current account found in a new head
    TransactionsReceived {
        block_number: u64,
        transactions: Vec<ScannedTransaction>,
    },
    /// Progress reported by a monitor tick while bulk syncing
    ProgressUpdate {
        current_block: u64,
        highest_block: u64,
    },
    /// Bulk sync has caught up with the chain
    SyncCompleted,
}

/// Trait for handling sync events.
#[async_trait::async_trait]
pub trait SyncEventHandler: Send + Sync {
    /// Handle a sync event.
    ///
    /// Called for every event, concurrently from the monitor and the head dispatcher.
    async fn handle(&self, event: &SyncEvent) -> Result<(), CoreError>;

    /// Get the name of this handler for logging and diagnostics.
    fn name(&self) -> &'static str;
}

/// Event dispatcher that manages multiple event handlers.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: Vec<Arc<dyn SyncEventHandler>>,
}

impl EventDispatcher {
    /// Create a new, empty event dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new event handler.
    ///
    /// Handlers are called in the order they are registered.
    pub fn register_handler(&mut self, handler: Arc<dyn SyncEventHandler>) {
        self.handlers.push(handler);
    }

    /// Dispatch an event to all registered handlers.
    ///
    /// Errors from handlers are logged, but do not stop other handlers from running.
    pub async fn dispatch(&self, event: &SyncEvent) {
        for handler in &self.handlers {
            if let Err(e) = handler.handle(event).await {
                error!("Handler {} failed to process event: {}", handler.name(), e);
            }
        }
    }
}

/// Receives balance and transaction updates for the current account.
pub trait BalanceObserver: Send + Sync {
    fn did_update_balance(&self, balance: Wei);
    fn did_receive_transactions(&self, transactions: &[ScannedTransaction]);
}

/// Receives bulk sync progress.
pub trait SyncObserver: Send + Sync {
    fn did_change_progress(&self, current_block: u64, highest_block: u64);
    fn did_finish(&self);
}

/// Forwards sync events to the application observers.
pub struct ObserverBridge {
    balance: Arc<dyn BalanceObserver>,
    sync: Arc<dyn SyncObserver>,
}

impl ObserverBridge {
    pub fn new(balance: Arc<dyn BalanceObserver>, sync: Arc<dyn SyncObserver>) -> Self {
        Self { balance, sync }
    }
}

#[async_trait::async_trait]
impl SyncEventHandler for ObserverBridge {
    async fn handle(&self, event: &SyncEvent) -> Result<(), CoreError> {
        match event {
            SyncEvent::BalanceUpdated { balance, .. } => self.balance.did_update_balance(*balance),
            SyncEvent::TransactionsReceived { transactions, .. } => {
                self.balance.did_receive_transactions(transactions)
            }
            SyncEvent::ProgressUpdate {
                current_block,
                highest_block,
            } => self.sync.did_change_progress(*current_block, *highest_block),
            SyncEvent::SyncCompleted => self.sync.did_finish(),
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "observer-bridge"
    }
}

/// Logs every event.
pub struct LoggingHandler;

#[async_trait::async_trait]
impl SyncEventHandler for LoggingHandler {
    async fn handle(&self, event: &SyncEvent) -> Result<(), CoreError> {
        match event {
            SyncEvent::BalanceUpdated {
                block_number,
                balance,
            } => debug!(
                "Balance at block {}: {} ETH",
                block_number,
                format_token_amount(*balance, ETHER_DECIMALS)
            ),
            SyncEvent::TransactionsReceived {
                block_number,
                transactions,
            } => info!(
                "Block {} has {} transactions for the current account",
                block_number,
                transactions.len()
            ),
            SyncEvent::ProgressUpdate {
                current_block,
                highest_block,
            } => debug!("Sync progress {}/{}", current_block, highest_block),
            SyncEvent::SyncCompleted => info!("Sync completed"),
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "logging"
    }
}
