//! Wallet core: the integration point for all sync services.
//!
//! `WalletCore` owns the key store and, while syncing, one [`SyncSession`]: the running node,
//! the progress monitor task and the head subscription. The session's parts share the node
//! client and the [`SyncState`] flag; they are wired together by [`WalletCore::start_sync`]
//! and torn down together by [`WalletCore::stop`].
//!
//! The core is responsible for:
//! - Launching the node and rejecting a second session while one is running
//! - Registering the event handlers that forward sync events to the application observers
//! - Running the monitor and the head dispatcher against the same node
//! - Serving account operations and on-demand scans

use crate::config::CoreConfig;
use crate::node::{
    Address, NodeClient, NodeHandle, NodeLauncher, ProcessLauncher, Subscription,
    subscribe_new_head,
};
use crate::wallet::keystore::{Account, EncryptedKey, KeyStore};
use crate::wallet::sync::{
    diagnostics::{DiagnosticSink, TracingDiagnostics},
    events::{
        BalanceObserver, EventDispatcher, LoggingHandler, ObserverBridge, SyncObserver,
    },
    head_dispatcher::HeadDispatcher,
    progress_monitor::{SyncProgressMonitor, SyncState},
    scanner::{BlockTransactionScanner, ScannedTransaction},
};
use crate::wallet::types::{CoreError, ScanError};

use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Everything running on behalf of one `start_sync` call.
struct SyncSession {
    node: NodeHandle,
    client: Arc<dyn NodeClient>,
    state: SyncState,
    monitor: JoinHandle<()>,
    subscription: Subscription,
}

impl SyncSession {
    async fn shutdown(self) -> Result<(), CoreError> {
        self.subscription.unsubscribe();
        self.monitor.abort();
        self.node.shutdown().await?;
        Ok(())
    }
}

/// Lifecycle of the session slot. The lock guarding it is never held across node calls.
enum SessionSlot {
    Idle,
    /// A `start_sync` call is launching the node; `cancel` aborts it.
    Starting { cancel: Arc<Notify> },
    Running(SyncSession),
}

/// The light wallet's synchronization core.
pub struct WalletCore {
    config: CoreConfig,
    keystore: Arc<KeyStore>,
    launcher: Arc<dyn NodeLauncher>,
    diagnostics: Arc<dyn DiagnosticSink>,
    session: Mutex<SessionSlot>,
}

impl WalletCore {
    /// Create a core that spawns the configured node executable and logs diagnostics.
    pub fn new(config: CoreConfig) -> Self {
        Self::with_parts(
            config,
            Arc::new(ProcessLauncher::new()),
            Arc::new(TracingDiagnostics),
        )
    }

    pub fn with_parts(
        config: CoreConfig,
        launcher: Arc<dyn NodeLauncher>,
        diagnostics: Arc<dyn DiagnosticSink>,
    ) -> Self {
        let keystore = Arc::new(KeyStore::open(
            config.storage.keystore_dir(),
            config.keystore,
        ));
        Self {
            config,
            keystore,
            launcher,
            diagnostics,
            session: Mutex::new(SessionSlot::Idle),
        }
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn keystore(&self) -> &Arc<KeyStore> {
        &self.keystore
    }

    /// Start the node, the progress monitor and the head subscription.
    ///
    /// # Errors
    /// * `CoreError::AlreadySyncing` if a session is running or starting; `stop` it first.
    /// * `CoreError::NodeError` with `NodeError::StartFailed` if the node does not come up,
    ///   or with the subscription failure.
    /// * `CoreError::Cancelled` if `stop` was called before the start completed.
    ///
    /// Nothing keeps running after an error.
    pub async fn start_sync(
        &self,
        balance_observer: Arc<dyn BalanceObserver>,
        sync_observer: Arc<dyn SyncObserver>,
    ) -> Result<(), CoreError> {
        let cancel = Arc::new(Notify::new());
        {
            let mut slot = self.session.lock().await;
            if !matches!(*slot, SessionSlot::Idle) {
                return Err(CoreError::AlreadySyncing);
            }
            *slot = SessionSlot::Starting {
                cancel: cancel.clone(),
            };
        }

        info!("Starting sync on network {}", self.config.node.network_id);
        let opened = tokio::select! {
            result = self.open_session(balance_observer, sync_observer) => result,
            _ = cancel.notified() => Err(CoreError::Cancelled),
        };

        let mut slot = self.session.lock().await;
        let still_ours = matches!(
            &*slot,
            SessionSlot::Starting { cancel: current } if Arc::ptr_eq(current, &cancel)
        );
        match opened {
            Ok(session) if still_ours => {
                *slot = SessionSlot::Running(session);
                info!("Sync started");
                Ok(())
            }
            Ok(session) => {
                drop(slot);
                if let Err(e) = session.shutdown().await {
                    warn!("Failed to stop cancelled session: {}", e);
                }
                Err(CoreError::Cancelled)
            }
            Err(e) => {
                if still_ours {
                    *slot = SessionSlot::Idle;
                }
                Err(e)
            }
        }
    }

    /// Launch the node and wire the monitor and head dispatcher to it.
    async fn open_session(
        &self,
        balance_observer: Arc<dyn BalanceObserver>,
        sync_observer: Arc<dyn SyncObserver>,
    ) -> Result<SyncSession, CoreError> {
        let node = self.launcher.launch(&self.config.node).await?;
        let client = node.client();
        let state = SyncState::new();

        let mut events = EventDispatcher::new();
        events.register_handler(Arc::new(LoggingHandler));
        events.register_handler(Arc::new(ObserverBridge::new(
            balance_observer,
            sync_observer,
        )));
        let events = Arc::new(events);

        let monitor = SyncProgressMonitor::new(
            client.clone(),
            state.clone(),
            events.clone(),
            self.diagnostics.clone(),
            self.config.monitor.clone(),
        )
        .spawn();

        let dispatcher = Arc::new(HeadDispatcher::new(
            self.keystore.clone(),
            client.clone(),
            state.clone(),
            events,
            self.diagnostics.clone(),
        ));
        let subscription =
            match subscribe_new_head(client.clone(), dispatcher, self.config.head_buffer_size)
                .await
            {
                Ok(subscription) => subscription,
                Err(e) => {
                    monitor.abort();
                    if let Err(shutdown_err) = node.shutdown().await {
                        warn!("Failed to stop node: {}", shutdown_err);
                    }
                    return Err(e.into());
                }
            };

        Ok(SyncSession {
            node,
            client,
            state,
            monitor,
            subscription,
        })
    }

    /// Stop the subscription, the monitor and the node, or cancel a start in progress.
    /// A no-op when not syncing.
    pub async fn stop(&self) -> Result<(), CoreError> {
        let previous = std::mem::replace(&mut *self.session.lock().await, SessionSlot::Idle);
        match previous {
            SessionSlot::Idle => Ok(()),
            SessionSlot::Starting { cancel } => {
                info!("Cancelling sync start");
                cancel.notify_one();
                Ok(())
            }
            SessionSlot::Running(session) => {
                session.shutdown().await?;
                info!("Sync stopped");
                Ok(())
            }
        }
    }

    /// Whether a sync session is running. `false` while a start is still in progress.
    pub async fn is_syncing(&self) -> bool {
        matches!(*self.session.lock().await, SessionSlot::Running(_))
    }

    /// Whether the running node is bulk syncing. `false` when not syncing.
    pub async fn is_bulk_syncing(&self) -> bool {
        match &*self.session.lock().await {
            SessionSlot::Running(session) => session.state.is_bulk_syncing(),
            _ => false,
        }
    }

    /// Scan `start_block..=end_block` for transactions to or from `address`.
    ///
    /// # Errors
    /// `ScanError::NotStarted` before a session is running, otherwise as
    /// [`BlockTransactionScanner::scan`].
    pub async fn scan(
        &self,
        address: &Address,
        start_block: u64,
        end_block: u64,
    ) -> Result<Vec<ScannedTransaction>, CoreError> {
        let client = match &*self.session.lock().await {
            SessionSlot::Running(session) => session.client.clone(),
            _ => return Err(ScanError::NotStarted.into()),
        };
        Ok(BlockTransactionScanner::new(client)
            .scan(address, start_block, end_block)
            .await?)
    }

    /// Create the device account; fails with `KeyStoreError::AccountExists` if any exists.
    pub fn create_account(&self, passphrase: &str) -> Result<Account, CoreError> {
        Ok(self.keystore.create_account(passphrase)?)
    }

    pub fn export_key(&self, account: &Account, passphrase: &str) -> Result<EncryptedKey, CoreError> {
        Ok(self.keystore.export_key(account, passphrase)?)
    }

    pub fn import_key(&self, bytes: &[u8], passphrase: &str) -> Result<Account, CoreError> {
        Ok(self.keystore.import_key(bytes, passphrase)?)
    }

    pub fn accounts(&self) -> Result<Vec<Account>, CoreError> {
        Ok(self.keystore.accounts()?)
    }

    pub fn current_account(&self) -> Result<Option<Account>, CoreError> {
        Ok(self.keystore.current_account()?)
    }
}
