//! Failures that the background sync tasks absorb instead of surfacing.
//!
//! The progress monitor and the head dispatcher run detached from any caller, so their
//! errors never reach a `Result`. They are reported to a [`DiagnosticSink`] instead.

use crate::node::NodeError;
use crate::wallet::types::{KeyStoreError, ScanError};

use tracing::warn;

/// A swallowed failure and where it happened.
#[derive(Debug)]
pub enum Diagnostic {
    /// The progress query of a monitor tick failed.
    ProgressQuery(NodeError),
    /// No current account could be resolved while handling head `block`.
    Account { block: u64, error: Option<KeyStoreError> },
    /// The balance query for head `block` failed.
    Balance { block: u64, error: NodeError },
    /// Scanning head `block` failed.
    Scan { block: u64, error: ScanError },
    /// The head stream yielded an error item.
    HeadStream(NodeError),
    /// The head stream ended; the subscription is reopening it.
    HeadStreamClosed,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Diagnostic::ProgressQuery(e) => write!(f, "sync progress query failed: {e}"),
            Diagnostic::Account { block, error: None } => {
                write!(f, "no account to update for head {block}")
            }
            Diagnostic::Account {
                block,
                error: Some(e),
            } => write!(f, "account lookup failed for head {block}: {e}"),
            Diagnostic::Balance { block, error } => {
                write!(f, "balance query failed for head {block}: {error}")
            }
            Diagnostic::Scan { block, error } => write!(f, "scan failed for head {block}: {error}"),
            Diagnostic::HeadStream(e) => write!(f, "head subscription error: {e}"),
            Diagnostic::HeadStreamClosed => write!(f, "head subscription closed by node, resubscribing"),
        }
    }
}

/// Receives swallowed failures.
pub trait DiagnosticSink: Send + Sync {
    fn record(&self, diagnostic: Diagnostic);
}

/// Logs every diagnostic as a warning.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingDiagnostics;

impl DiagnosticSink for TracingDiagnostics {
    fn record(&self, diagnostic: Diagnostic) {
        warn!("Sync diagnostic: {}", diagnostic);
    }
}

/// Keeps diagnostics in memory for inspection.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingDiagnostics {
    pub recorded: std::sync::Mutex<Vec<String>>,
}

#[cfg(test)]
impl RecordingDiagnostics {
    pub fn count(&self) -> usize {
        self.recorded.lock().unwrap().len()
    }

    pub fn messages(&self) -> Vec<String> {
        self.recorded.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl DiagnosticSink for RecordingDiagnostics {
    fn record(&self, diagnostic: Diagnostic) {
        self.recorded.lock().unwrap().push(diagnostic.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostics_render_block_context() {
        let sink = RecordingDiagnostics::default();
        sink.record(Diagnostic::Balance {
            block: 7,
            error: NodeError::NoData,
        });
        sink.record(Diagnostic::Account {
            block: 8,
            error: None,
        });

        assert_eq!(
            sink.messages(),
            vec![
                "balance query failed for head 7: No data returned".to_string(),
                "no account to update for head 8".to_string(),
            ]
        );
    }
}
