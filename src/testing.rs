//! Shared fixtures for unit tests: a scripted in-memory node and small builders.

use crate::node::{
    Address, Block, H256, Header, HeadStream, NodeClient, NodeConfig, NodeError, NodeHandle,
    NodeLauncher, SyncProgress, Transaction, Wei,
};

use futures::channel::mpsc::{UnboundedReceiver, UnboundedSender, unbounded};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub fn address(byte: u8) -> Address {
    Address([byte; 20])
}

pub fn hash(seed: u64) -> H256 {
    let mut bytes = [0u8; 32];
    bytes[24..].copy_from_slice(&seed.to_be_bytes());
    H256(bytes)
}

pub fn block_hash(number: u64) -> H256 {
    let mut h = hash(number);
    h.0[0] = 0xbb;
    h
}

pub fn header(number: u64) -> Header {
    Header {
        number,
        hash: block_hash(number),
        parent_hash: block_hash(number.saturating_sub(1)),
    }
}

/// A value transfer with a unique hash derived from `seed`.
pub fn transfer(seed: u64, to: Option<Address>, value: Wei) -> Transaction {
    Transaction {
        hash: hash(seed),
        nonce: seed,
        to,
        value,
        gas: 21_000,
        gas_price: Some(1_000_000_000),
        input: "0x".to_string(),
        transaction_index: None,
    }
}

/// Poll `condition` until it holds, failing the test after five seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not met within 5s");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Scripted [`NodeClient`] with call counters and failure injection.
pub struct MockNode {
    blocks: Mutex<HashMap<u64, Block>>,
    senders: Mutex<HashMap<H256, Address>>,
    balances: Mutex<HashMap<Address, Wei>>,
    progress: Mutex<VecDeque<Result<Option<SyncProgress>, String>>>,
    failing_balances: Mutex<HashSet<u64>>,
    head_tx: Mutex<UnboundedSender<Result<Header, NodeError>>>,
    head_rx: Mutex<Option<UnboundedReceiver<Result<Header, NodeError>>>>,
    pub head_subscriptions: AtomicUsize,
    pub balance_calls: AtomicUsize,
    pub block_calls: AtomicUsize,
    pub progress_calls: AtomicUsize,
}

impl Default for MockNode {
    fn default() -> Self {
        let (head_tx, head_rx) = unbounded();
        Self {
            blocks: Mutex::new(HashMap::new()),
            senders: Mutex::new(HashMap::new()),
            balances: Mutex::new(HashMap::new()),
            progress: Mutex::new(VecDeque::new()),
            failing_balances: Mutex::new(HashSet::new()),
            head_tx: Mutex::new(head_tx),
            head_rx: Mutex::new(Some(head_rx)),
            head_subscriptions: AtomicUsize::new(0),
            balance_calls: AtomicUsize::new(0),
            block_calls: AtomicUsize::new(0),
            progress_calls: AtomicUsize::new(0),
        }
    }
}

impl MockNode {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Add block `number` holding `transactions`; `from` gives each sender, `None` when
    /// recovery should fail.
    pub fn add_block(&self, number: u64, transactions: Vec<(Transaction, Option<Address>)>) {
        let mut senders = self.senders.lock().unwrap();
        let transactions = transactions
            .into_iter()
            .enumerate()
            .map(|(index, (mut tx, from))| {
                tx.transaction_index = Some(index as u64);
                if let Some(from) = from {
                    senders.insert(tx.hash, from);
                }
                tx
            })
            .collect();
        let header = header(number);
        self.blocks.lock().unwrap().insert(
            number,
            Block {
                number,
                hash: header.hash,
                parent_hash: header.parent_hash,
                transactions,
            },
        );
    }

    pub fn set_balance(&self, address: Address, balance: Wei) {
        self.balances.lock().unwrap().insert(address, balance);
    }

    pub fn fail_balance_at(&self, block_number: u64) {
        self.failing_balances.lock().unwrap().insert(block_number);
    }

    /// Queue the answers of successive progress queries; once drained the node reports synced.
    pub fn script_progress(&self, script: Vec<Option<(u64, u64)>>) {
        let mut queue = self.progress.lock().unwrap();
        queue.extend(script.into_iter().map(|step| {
            Ok(step.map(|(current, highest)| SyncProgress {
                starting_block: 0,
                current_block: current,
                highest_block: highest,
            }))
        }));
    }

    pub fn fail_next_progress(&self, reason: &str) {
        self.progress
            .lock()
            .unwrap()
            .push_back(Err(reason.to_string()));
    }

    pub fn push_head(&self, number: u64) {
        let _ = self
            .head_tx
            .lock()
            .unwrap()
            .unbounded_send(Ok(header(number)));
    }

    pub fn push_head_error(&self, reason: &str) {
        let _ = self
            .head_tx
            .lock()
            .unwrap()
            .unbounded_send(Err(NodeError::SubscriptionError(reason.to_string())));
    }

    /// End the current head stream, as a dropped socket would, and accept a new subscription.
    pub fn drop_head_connection(&self) {
        let (tx, rx) = unbounded();
        *self.head_rx.lock().unwrap() = Some(rx);
        *self.head_tx.lock().unwrap() = tx;
    }

    pub fn head_subscriptions(&self) -> usize {
        self.head_subscriptions.load(Ordering::SeqCst)
    }

    pub fn balance_calls(&self) -> usize {
        self.balance_calls.load(Ordering::SeqCst)
    }

    pub fn block_calls(&self) -> usize {
        self.block_calls.load(Ordering::SeqCst)
    }

    pub fn progress_calls(&self) -> usize {
        self.progress_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl NodeClient for MockNode {
    async fn network_id(&self) -> Result<u64, NodeError> {
        Ok(4)
    }

    async fn block_by_number(&self, number: u64) -> Result<Block, NodeError> {
        self.block_calls.fetch_add(1, Ordering::SeqCst);
        self.blocks
            .lock()
            .unwrap()
            .get(&number)
            .cloned()
            .ok_or(NodeError::BlockNotFound(number))
    }

    async fn transaction_sender(
        &self,
        tx: &Transaction,
        _block_hash: &H256,
        _index: u64,
    ) -> Result<Address, NodeError> {
        self.senders
            .lock()
            .unwrap()
            .get(&tx.hash)
            .copied()
            .ok_or_else(|| NodeError::SenderRecovery(format!("no sender for {}", tx.hash)))
    }

    async fn balance_at(&self, address: &Address, block_number: u64) -> Result<Wei, NodeError> {
        self.balance_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_balances.lock().unwrap().contains(&block_number) {
            return Err(NodeError::RpcError {
                code: -32000,
                message: format!("balance unavailable at {block_number}"),
            });
        }
        Ok(self
            .balances
            .lock()
            .unwrap()
            .get(address)
            .copied()
            .unwrap_or_default())
    }

    async fn sync_progress(&self) -> Result<Option<SyncProgress>, NodeError> {
        self.progress_calls.fetch_add(1, Ordering::SeqCst);
        match self.progress.lock().unwrap().pop_front() {
            Some(Ok(progress)) => Ok(progress),
            Some(Err(reason)) => Err(NodeError::RpcError {
                code: -32000,
                message: reason,
            }),
            None => Ok(None),
        }
    }

    async fn subscribe_new_heads(&self) -> Result<HeadStream, NodeError> {
        let rx = self
            .head_rx
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| NodeError::SubscriptionError("already subscribed".to_string()))?;
        self.head_subscriptions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::pin(rx))
    }
}

/// Launcher handing out a shared [`MockNode`] instead of spawning a process.
pub struct MockLauncher {
    node: Arc<MockNode>,
    fail_with: Mutex<Option<String>>,
    delay: Mutex<Option<Duration>>,
    pub launches: AtomicUsize,
}

impl MockLauncher {
    pub fn new(node: Arc<MockNode>) -> Arc<Self> {
        Arc::new(Self {
            node,
            fail_with: Mutex::new(None),
            delay: Mutex::new(None),
            launches: AtomicUsize::new(0),
        })
    }

    pub fn fail_next(&self, reason: &str) {
        *self.fail_with.lock().unwrap() = Some(reason.to_string());
    }

    /// Make every following launch take `delay` before the node is up.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl NodeLauncher for MockLauncher {
    async fn launch(&self, _config: &NodeConfig) -> Result<NodeHandle, NodeError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(reason) = self.fail_with.lock().unwrap().take() {
            return Err(NodeError::StartFailed(reason));
        }
        Ok(NodeHandle::new(self.node.clone(), None))
    }
}
