//!
//! JSON-RPC client for a locally running light node.
//!
//! This module provides the [`NodeClient`] seam used by the sync components and its
//! production implementation, [`RpcNodeClient`], which talks to the node over HTTP for
//! queries and over WebSocket for the `newHeads` subscription. All methods are async and
//! designed for use with Tokio; the client is cheap to clone and safe to share between
//! the progress monitor and the head subscription.

use super::types::*;
use futures_util::{SinkExt, StreamExt};
use reqwest::Client;
use serde_json::json;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_tungstenite::{
	connect_async,
	tungstenite::{Message, client::IntoClientRequest},
};
use tracing::{debug, error, info};

/// Stream of chain heads in arrival order.
pub type HeadStream =
	Pin<Box<dyn futures_util::Stream<Item = Result<Header, NodeError>> + Send>>;

/// Queries against a running node.
///
/// Implementations must tolerate concurrent calls; callers never lock around them.
#[async_trait::async_trait]
pub trait NodeClient: Send + Sync {
	/// Network identifier reported by the node (`net_version`).
	async fn network_id(&self) -> Result<u64, NodeError>;

	/// Fetch a block with its full transaction list.
	async fn block_by_number(&self, number: u64) -> Result<Block, NodeError>;

	/// Recover the sender of `tx`, located at `index` in the block `block_hash`.
	async fn transaction_sender(
		&self,
		tx: &Transaction,
		block_hash: &H256,
		index: u64,
	) -> Result<Address, NodeError>;

	/// Balance of `address` at `block_number`.
	async fn balance_at(&self, address: &Address, block_number: u64) -> Result<Wei, NodeError>;

	/// Current sync progress, `None` once the node is fully synced.
	async fn sync_progress(&self) -> Result<Option<SyncProgress>, NodeError>;

	/// Open a push subscription for new chain heads.
	async fn subscribe_new_heads(&self) -> Result<HeadStream, NodeError>;
}

/// JSON-RPC node client
#[derive(Clone)]
pub struct RpcNodeClient {
	/// The underlying HTTP client for JSON-RPC calls.
	http_client: Client,
	/// HTTP JSON-RPC endpoint.
	rpc_url: String,
	/// WebSocket endpoint for subscriptions.
	ws_url: String,
	/// Monotonic JSON-RPC request id.
	next_id: Arc<AtomicU64>,
}

impl RpcNodeClient {
	/// Create a new node client.
	///
	/// # Arguments
	/// * `rpc_url` - The HTTP endpoint for JSON-RPC calls.
	/// * `ws_url` - The WebSocket endpoint for subscriptions.
	///
	/// # Errors
	/// Returns `NodeError::HttpError` if the HTTP client cannot be built.
	pub fn new(rpc_url: String, ws_url: String) -> Result<Self, NodeError> {
		let http_client = Client::builder().timeout(Duration::from_secs(30)).build()?;

		Ok(Self {
			http_client,
			rpc_url,
			ws_url,
			next_id: Arc::new(AtomicU64::new(1)),
		})
	}

	pub fn rpc_url(&self) -> &str {
		&self.rpc_url
	}

	/// Execute a JSON-RPC call and return its `result` member.
	///
	/// # Arguments
	/// * `method` - The JSON-RPC method name.
	/// * `params` - Positional parameters.
	///
	/// # Returns
	/// The `result` value, which may be JSON `null`, or a `NodeError` if the request fails.
	pub async fn call(
		&self,
		method: &str,
		params: serde_json::Value,
	) -> Result<serde_json::Value, NodeError> {
		let request_body = json!({
			"jsonrpc": "2.0",
			"id": self.next_id.fetch_add(1, Ordering::Relaxed),
			"method": method,
			"params": params,
		});

		let response = self
			.http_client
			.post(&self.rpc_url)
			.header("Content-Type", "application/json")
			.json(&request_body)
			.send()
			.await?;

		if !response.status().is_success() {
			return Err(NodeError::RpcError {
				code: i64::from(response.status().as_u16()),
				message: format!("HTTP error: {}", response.status()),
			});
		}

		let mut response_json: serde_json::Value = response.json().await?;
		rpc_result(&mut response_json)
	}
}

/// Extract the `result` of a JSON-RPC response, mapping the `error` member.
fn rpc_result(response: &mut serde_json::Value) -> Result<serde_json::Value, NodeError> {
	if let Some(error) = response.get("error") {
		return Err(NodeError::RpcError {
			code: error.get("code").and_then(|c| c.as_i64()).unwrap_or(0),
			message: error
				.get("message")
				.and_then(|m| m.as_str())
				.unwrap_or("unknown error")
				.to_string(),
		});
	}

	response
		.get_mut("result")
		.map(serde_json::Value::take)
		.ok_or(NodeError::NoData)
}

/// Parse one WebSocket text frame of an `eth_subscribe` stream.
///
/// Returns `None` for frames that carry no head (replies to other requests).
fn parse_head_notification(text: &str) -> Option<Result<Header, NodeError>> {
	let parsed: serde_json::Value = match serde_json::from_str(text) {
		Ok(parsed) => parsed,
		Err(e) => return Some(Err(NodeError::JsonError(e))),
	};

	match parsed.get("method").and_then(|m| m.as_str()) {
		Some("eth_subscription") => {
			let Some(result) = parsed.get("params").and_then(|p| p.get("result")) else {
				return Some(Err(NodeError::NoData));
			};
			match serde_json::from_value::<Header>(result.clone()) {
				Ok(header) => Some(Ok(header)),
				Err(e) => {
					error!("Failed to deserialize head notification: {}", e);
					Some(Err(NodeError::JsonError(e)))
				}
			}
		}
		Some(other) => {
			debug!("Ignoring notification method: {}", other);
			None
		}
		None => {
			if let Some(error) = parsed.get("error") {
				let message = error
					.get("message")
					.and_then(|m| m.as_str())
					.unwrap_or("Unknown subscription error");
				Some(Err(NodeError::SubscriptionError(message.to_string())))
			} else {
				None
			}
		}
	}
}

#[async_trait::async_trait]
impl NodeClient for RpcNodeClient {
	async fn network_id(&self) -> Result<u64, NodeError> {
		let result = self.call("net_version", json!([])).await?;
		let version = result.as_str().ok_or(NodeError::NoData)?;
		version.parse::<u64>().map_err(|e| NodeError::RpcError {
			code: 0,
			message: format!("invalid net_version {version:?}: {e}"),
		})
	}

	async fn block_by_number(&self, number: u64) -> Result<Block, NodeError> {
		let result = self
			.call(
				"eth_getBlockByNumber",
				json!([quantity::encode(number as u128), true]),
			)
			.await?;

		if result.is_null() {
			return Err(NodeError::BlockNotFound(number));
		}

		Ok(serde_json::from_value(result)?)
	}

	async fn transaction_sender(
		&self,
		tx: &Transaction,
		block_hash: &H256,
		index: u64,
	) -> Result<Address, NodeError> {
		let result = self
			.call(
				"eth_getTransactionByBlockHashAndIndex",
				json!([block_hash.to_string(), quantity::encode(index as u128)]),
			)
			.await
			.map_err(|e| NodeError::SenderRecovery(e.to_string()))?;

		if result.is_null() {
			return Err(NodeError::SenderRecovery(format!(
				"no transaction at index {} of block {}",
				index, block_hash
			)));
		}

		let hash = result
			.get("hash")
			.and_then(|h| h.as_str())
			.and_then(|h| h.parse::<H256>().ok());
		if hash != Some(tx.hash) {
			return Err(NodeError::SenderRecovery(format!(
				"transaction at index {} of block {} is not {}",
				index, block_hash, tx.hash
			)));
		}

		result
			.get("from")
			.and_then(|f| f.as_str())
			.ok_or_else(|| NodeError::SenderRecovery("sender missing".to_string()))?
			.parse::<Address>()
			.map_err(|e| NodeError::SenderRecovery(e.to_string()))
	}

	async fn balance_at(&self, address: &Address, block_number: u64) -> Result<Wei, NodeError> {
		let result = self
			.call(
				"eth_getBalance",
				json!([address.to_string(), quantity::encode(block_number as u128)]),
			)
			.await?;

		let raw = result.as_str().ok_or(NodeError::NoData)?;
		quantity::parse_u128(raw).map_err(|message| NodeError::RpcError { code: 0, message })
	}

	async fn sync_progress(&self) -> Result<Option<SyncProgress>, NodeError> {
		let result = self.call("eth_syncing", json!([])).await?;
		let response: SyncingResponse = serde_json::from_value(result)?;
		Ok(response.into_progress())
	}

	/// Subscribe to new chain heads.
	///
	/// # Returns
	/// A pinned async stream of headers. Each item is either a header or an error.
	///
	/// # Errors
	/// Returns `NodeError` if the WebSocket connection or the subscription request fails.
	async fn subscribe_new_heads(&self) -> Result<HeadStream, NodeError> {
		debug!("Attempting WebSocket connection to: {}", self.ws_url);

		let request = self.ws_url.clone().into_client_request()?;
		let (ws_stream, response) = connect_async(request).await?;
		debug!(
			"WebSocket connection established, response status: {}",
			response.status()
		);
		let (mut ws_sender, mut ws_receiver) = ws_stream.split();

		let subscribe_message = json!({
			"jsonrpc": "2.0",
			"id": self.next_id.fetch_add(1, Ordering::Relaxed),
			"method": "eth_subscribe",
			"params": ["newHeads"],
		});
		ws_sender
			.send(Message::Text(subscribe_message.to_string()))
			.await?;

		// Wait for the subscription id
		let subscription_id = match ws_receiver.next().await {
			Some(msg) => match msg? {
				Message::Text(text) => {
					let mut parsed: serde_json::Value = serde_json::from_str(&text)?;
					let result = rpc_result(&mut parsed)?;
					result
						.as_str()
						.map(str::to_string)
						.ok_or_else(|| {
							NodeError::SubscriptionError("Subscription id missing".to_string())
						})?
				}
				_ => {
					return Err(NodeError::SubscriptionError(
						"Unexpected message type during handshake".to_string(),
					));
				}
			},
			None => {
				return Err(NodeError::SubscriptionError(
					"Connection closed before subscription was confirmed".to_string(),
				));
			}
		};

		info!("Subscribed to new heads with id {}", subscription_id);

		// Keep the sink alive for as long as the stream is polled
		let stream = ws_receiver.filter_map(move |msg| {
			let _sink = &ws_sender;
			async move {
				match msg {
					Ok(Message::Text(text)) => parse_head_notification(&text),
					Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => None,
					Ok(Message::Close(_)) => {
						debug!("Head subscription closed by node");
						None
					}
					Ok(_) => Some(Err(NodeError::SubscriptionError(
						"Unexpected message type".to_string(),
					))),
					Err(e) => Some(Err(NodeError::WebSocketError(e))),
				}
			}
		});

		Ok(Box::pin(stream))
	}
}
