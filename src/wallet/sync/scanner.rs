//! Block range scanning for transactions touching an address.

use crate::node::{Address, H256, NodeClient, Transaction};
use crate::wallet::types::ScanError;

use std::sync::Arc;
use tracing::{debug, trace};

/// How a transaction relates to the scanned address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Incoming,
    Outgoing,
    /// Sent from the address to itself.
    SelfTransfer,
}

/// A transaction relevant to a scanned address, with its position in the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedTransaction {
    pub block_number: u64,
    pub block_hash: H256,
    /// Position within the block.
    pub index: u64,
    pub transaction: Transaction,
    /// Recovered sender, `None` when recovery failed.
    pub from: Option<Address>,
    pub direction: Direction,
}

/// Finds the transactions of a block range that involve a given address.
#[derive(Clone)]
pub struct BlockTransactionScanner {
    node: Arc<dyn NodeClient>,
}

impl BlockTransactionScanner {
    pub fn new(node: Arc<dyn NodeClient>) -> Self {
        Self { node }
    }

    /// Scan blocks `start_block..=end_block` for transactions sent to or from `address`.
    ///
    /// Results are ordered by block number, then by position in the block. A transaction
    /// whose sender cannot be recovered is still matched on its recipient.
    ///
    /// # Errors
    /// * `ScanError::InvalidRange` if `start_block > end_block`.
    /// * `ScanError::Node` with the first block retrieval failure.
    pub async fn scan(
        &self,
        address: &Address,
        start_block: u64,
        end_block: u64,
    ) -> Result<Vec<ScannedTransaction>, ScanError> {
        if start_block > end_block {
            return Err(ScanError::InvalidRange {
                start: start_block,
                end: end_block,
            });
        }

        let mut found = Vec::new();
        for number in start_block..=end_block {
            let block = self.node.block_by_number(number).await?;
            trace!(
                "Scanning block {} with {} transactions",
                number,
                block.transactions.len()
            );

            for (index, tx) in block.transactions.into_iter().enumerate() {
                let index = index as u64;
                let from = match self.node.transaction_sender(&tx, &block.hash, index).await {
                    Ok(sender) => Some(sender),
                    Err(e) => {
                        debug!("No sender for {} in block {}: {}", tx.hash, number, e);
                        None
                    }
                };

                let incoming = tx.to.as_ref() == Some(address);
                let outgoing = from.as_ref() == Some(address);
                let direction = match (incoming, outgoing) {
                    (true, true) => Direction::SelfTransfer,
                    (true, false) => Direction::Incoming,
                    (false, true) => Direction::Outgoing,
                    (false, false) => continue,
                };

                found.push(ScannedTransaction {
                    block_number: number,
                    block_hash: block.hash,
                    index,
                    transaction: tx,
                    from,
                    direction,
                });
            }
        }

        debug!(
            "Found {} transactions for {} in blocks {}..={}",
            found.len(),
            address,
            start_block,
            end_block
        );
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeError;
    use crate::testing::{MockNode, address, transfer};

    #[tokio::test]
    async fn finds_incoming_and_outgoing_in_order() {
        let me = address(0xaa);
        let other = address(0x01);
        let node = MockNode::new();
        node.add_block(
            10,
            vec![
                (transfer(1, Some(other), 5), Some(me)),
                (transfer(2, Some(other), 6), Some(other)),
                (transfer(3, Some(me), 7), Some(other)),
            ],
        );
        node.add_block(11, vec![]);
        node.add_block(12, vec![(transfer(4, Some(me), 8), Some(me))]);

        let scanner = BlockTransactionScanner::new(node.clone());
        let found = scanner.scan(&me, 10, 12).await.unwrap();

        let positions: Vec<(u64, u64)> = found.iter().map(|t| (t.block_number, t.index)).collect();
        assert_eq!(positions, vec![(10, 0), (10, 2), (12, 0)]);
        assert_eq!(found[0].direction, Direction::Outgoing);
        assert_eq!(found[1].direction, Direction::Incoming);
        assert_eq!(found[2].direction, Direction::SelfTransfer);
        assert_eq!(found[1].transaction.value, 7);
        assert_eq!(node.block_calls(), 3);
    }

    #[tokio::test]
    async fn sender_recovery_failure_still_matches_recipient() {
        let me = address(0xaa);
        let node = MockNode::new();
        node.add_block(
            5,
            vec![
                (transfer(1, Some(me), 1), None),
                (transfer(2, Some(address(0x02)), 1), None),
            ],
        );

        let found = BlockTransactionScanner::new(node)
            .scan(&me, 5, 5)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].from, None);
        assert_eq!(found[0].direction, Direction::Incoming);
    }

    #[tokio::test]
    async fn contract_creation_matches_on_sender() {
        let me = address(0xaa);
        let node = MockNode::new();
        node.add_block(3, vec![(transfer(1, None, 0), Some(me))]);

        let found = BlockTransactionScanner::new(node)
            .scan(&me, 3, 3)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].direction, Direction::Outgoing);
    }

    #[tokio::test]
    async fn inverted_range_is_rejected() {
        let node = MockNode::new();
        let result = BlockTransactionScanner::new(node.clone())
            .scan(&address(1), 9, 8)
            .await;
        assert!(matches!(
            result,
            Err(ScanError::InvalidRange { start: 9, end: 8 })
        ));
        assert_eq!(node.block_calls(), 0);
    }

    #[tokio::test]
    async fn missing_block_aborts_scan() {
        let node = MockNode::new();
        node.add_block(1, vec![]);

        let result = BlockTransactionScanner::new(node.clone())
            .scan(&address(1), 1, 4)
            .await;
        assert!(matches!(
            result,
            Err(ScanError::Node(NodeError::BlockNotFound(2)))
        ));
        assert_eq!(node.block_calls(), 2);
    }
}
