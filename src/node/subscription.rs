//! Bounded delivery of chain heads to a handler.

use super::client::{HeadStream, NodeClient};
use super::types::{Header, NodeError};

use backoff::ExponentialBackoff;
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default number of heads buffered between the node and the handler.
pub const DEFAULT_HEAD_BUFFER: usize = 16;

/// Receives heads from a [`Subscription`], one at a time, in arrival order.
#[async_trait::async_trait]
pub trait HeadHandler: Send + Sync {
    async fn on_new_head(&self, head: Header);

    /// Called for items of the head stream that failed to decode or transport.
    async fn on_stream_error(&self, error: NodeError) {
        warn!("Head subscription error: {}", error);
    }

    /// Called each time the node closes the stream, before resubscribing.
    async fn on_stream_closed(&self) {
        debug!("Head subscription closed");
    }
}

enum Delivery {
    Item(Result<Header, NodeError>),
    Closed,
}

/// A running head subscription.
///
/// A pump task moves heads from the node stream into a channel of `buffer_size` slots and a
/// worker task feeds them to the handler. When the handler falls behind, the pump waits for
/// a free slot, so reading from the node pauses instead of the buffer growing. When the node
/// closes the stream, the pump reopens it with exponential backoff until it succeeds or the
/// subscription is dropped.
pub struct Subscription {
    pump: JoinHandle<()>,
    worker: JoinHandle<()>,
}

fn resubscribe_policy() -> ExponentialBackoff {
    ExponentialBackoff {
        initial_interval: Duration::from_millis(250),
        max_interval: Duration::from_secs(30),
        max_elapsed_time: None,
        ..ExponentialBackoff::default()
    }
}

async fn resubscribe(node: &dyn NodeClient) -> Result<HeadStream, NodeError> {
    backoff::future::retry(resubscribe_policy(), || async move {
        node.subscribe_new_heads().await.map_err(|e| {
            debug!("Resubscribing to heads failed: {}", e);
            backoff::Error::transient(e)
        })
    })
    .await
}

impl Subscription {
    /// Deliver `stream` to `handler`, reopening it on `node` whenever it ends.
    pub fn spawn(
        node: Arc<dyn NodeClient>,
        mut stream: HeadStream,
        handler: Arc<dyn HeadHandler>,
        buffer_size: usize,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<Delivery>(buffer_size.max(1));

        let pump = tokio::spawn(async move {
            loop {
                while let Some(item) = stream.next().await {
                    if tx.send(Delivery::Item(item)).await.is_err() {
                        return;
                    }
                }
                if tx.send(Delivery::Closed).await.is_err() {
                    return;
                }
                match resubscribe(node.as_ref()).await {
                    Ok(reopened) => {
                        info!("Resubscribed to new heads");
                        stream = reopened;
                    }
                    Err(e) => {
                        warn!("Giving up on head subscription: {}", e);
                        return;
                    }
                }
            }
        });

        let worker = tokio::spawn(async move {
            while let Some(delivery) = rx.recv().await {
                match delivery {
                    Delivery::Item(Ok(head)) => handler.on_new_head(head).await,
                    Delivery::Item(Err(e)) => handler.on_stream_error(e).await,
                    Delivery::Closed => handler.on_stream_closed().await,
                }
            }
        });

        Self { pump, worker }
    }

    /// Whether heads are still being delivered.
    pub fn is_active(&self) -> bool {
        !self.worker.is_finished()
    }

    /// Stop delivery. Heads still buffered are dropped.
    pub fn unsubscribe(self) {
        self.pump.abort();
        self.worker.abort();
    }
}

/// Subscribe `handler` to new heads of `node` with a delivery buffer of `buffer_size`.
pub async fn subscribe_new_head(
    node: Arc<dyn NodeClient>,
    handler: Arc<dyn HeadHandler>,
    buffer_size: usize,
) -> Result<Subscription, NodeError> {
    let stream = node.subscribe_new_heads().await?;
    Ok(Subscription::spawn(node, stream, handler, buffer_size))
}
