//! Progress monitoring for the node's bulk synchronization.
//!
//! The `SyncProgressMonitor` polls the node on a fixed period. While the node reports progress
//! it emits `ProgressUpdate` events and flags the shared [`SyncState`] as bulk syncing; the
//! first tick without progress after that emits `SyncCompleted`, clears the flag and ends the
//! monitor. The head dispatcher reads the flag to skip per-block scans during bulk sync.

use crate::node::{NodeClient, SyncProgress};
use crate::wallet::sync::diagnostics::{Diagnostic, DiagnosticSink};
use crate::wallet::sync::events::{EventDispatcher, SyncEvent};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Shared bulk-sync flag. Written by the monitor only.
#[derive(Debug, Clone, Default)]
pub struct SyncState(Arc<AtomicBool>);

impl SyncState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_bulk_syncing(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn set_bulk_syncing(&self, syncing: bool) {
        self.0.store(syncing, Ordering::Release);
    }
}

/// Configuration for the progress monitor
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Time between progress queries; the first query runs immediately.
    pub period: Duration,
    /// Progress is logged when the current block is a multiple of this.
    pub log_every_blocks: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(1),
            log_every_blocks: 10_000,
        }
    }
}

/// What a single monitor tick observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The node is bulk syncing.
    Progress(SyncProgress),
    /// Bulk sync just finished; the monitor stops.
    Finished,
    /// The node is synced and no bulk sync was observed.
    Idle,
    /// The progress query failed.
    Failed,
}

pub struct SyncProgressMonitor {
    node: Arc<dyn NodeClient>,
    state: SyncState,
    events: Arc<EventDispatcher>,
    diagnostics: Arc<dyn DiagnosticSink>,
    config: MonitorConfig,
}

impl SyncProgressMonitor {
    pub fn new(
        node: Arc<dyn NodeClient>,
        state: SyncState,
        events: Arc<EventDispatcher>,
        diagnostics: Arc<dyn DiagnosticSink>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            node,
            state,
            events,
            diagnostics,
            config,
        }
    }

    /// Query progress once and apply the state transition.
    pub async fn tick(&self) -> TickOutcome {
        match self.node.sync_progress().await {
            Ok(Some(progress)) => {
                self.state.set_bulk_syncing(true);
                if self.config.log_every_blocks > 0
                    && progress.current_block % self.config.log_every_blocks == 0
                {
                    info!(
                        "Sync progress: block {} of {}",
                        progress.current_block, progress.highest_block
                    );
                }
                self.events
                    .dispatch(&SyncEvent::ProgressUpdate {
                        current_block: progress.current_block,
                        highest_block: progress.highest_block,
                    })
                    .await;
                TickOutcome::Progress(progress)
            }
            Ok(None) if self.state.is_bulk_syncing() => {
                self.state.set_bulk_syncing(false);
                info!("Node caught up with the chain");
                self.events.dispatch(&SyncEvent::SyncCompleted).await;
                TickOutcome::Finished
            }
            Ok(None) => TickOutcome::Idle,
            Err(e) => {
                self.diagnostics.record(Diagnostic::ProgressQuery(e));
                TickOutcome::Failed
            }
        }
    }

    /// Run the monitor on its own task until bulk sync finishes.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if self.tick().await == TickOutcome::Finished {
                    debug!("Progress monitor stopped");
                    break;
                }
            }
        })
    }
}
