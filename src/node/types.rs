//! Types for JSON-RPC node integration

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Amount of wei.
pub type Wei = u128;

/// Errors produced while parsing hex-encoded identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HexParseError {
    #[error("invalid hex: {0}")]
    InvalidHex(String),

    #[error("expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

fn decode_fixed<const N: usize>(s: &str) -> Result<[u8; N], HexParseError> {
    let stripped = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    let bytes = hex::decode(stripped).map_err(|e| HexParseError::InvalidHex(e.to_string()))?;
    let actual = bytes.len();
    bytes.try_into().map_err(|_| HexParseError::InvalidLength {
        expected: N,
        actual,
    })
}

/// A 20-byte account address.
///
/// Parsing accepts any hex casing, so two addresses compare equal regardless of
/// how the caller spelled them. Displayed as lowercase `0x`-prefixed hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Lowercase hex without the `0x` prefix, as used in key file names.
    pub fn to_plain_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl FromStr for Address {
    type Err = HexParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_fixed::<20>(s).map(Address)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A 32-byte hash (block or transaction).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct H256(pub [u8; 32]);

impl FromStr for H256 {
    type Err = HexParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_fixed::<32>(s).map(H256)
    }
}

impl fmt::Display for H256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for H256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "H256({})", self)
    }
}

impl Serialize for H256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for H256 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Serde helpers for JSON-RPC hex quantities (`"0x1a"`).
pub mod quantity {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn parse_u128(s: &str) -> Result<u128, String> {
        let digits = s
            .strip_prefix("0x")
            .ok_or_else(|| format!("quantity {s:?} is missing the 0x prefix"))?;
        if digits.is_empty() {
            return Err("empty quantity".to_string());
        }
        u128::from_str_radix(digits, 16).map_err(|e| format!("invalid quantity {s:?}: {e}"))
    }

    pub fn parse_u64(s: &str) -> Result<u64, String> {
        let value = parse_u128(s)?;
        u64::try_from(value).map_err(|_| format!("quantity {s:?} overflows u64"))
    }

    pub fn encode(value: u128) -> String {
        format!("{value:#x}")
    }

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&encode(*value as u128))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse_u64(&s).map_err(serde::de::Error::custom)
    }

    pub mod wide {
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
            serializer.serialize_str(&super::encode(*value))
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
            let s = String::deserialize(deserializer)?;
            super::parse_u128(&s).map_err(serde::de::Error::custom)
        }
    }

    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            value: &Option<u64>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(v) => serializer.serialize_str(&super::encode(*v as u128)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<u64>, D::Error> {
            Option::<String>::deserialize(deserializer)?
                .map(|s| super::parse_u64(&s).map_err(serde::de::Error::custom))
                .transpose()
        }
    }

    pub mod option_wide {
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            value: &Option<u128>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(v) => serializer.serialize_str(&super::encode(*v)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<u128>, D::Error> {
            Option::<String>::deserialize(deserializer)?
                .map(|s| super::parse_u128(&s).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}

/// A block header as delivered by the `newHeads` subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Block number.
    #[serde(with = "quantity")]
    pub number: u64,
    /// Block hash.
    pub hash: H256,
    /// Parent block hash.
    #[serde(rename = "parentHash")]
    pub parent_hash: H256,
}

/// A transaction as contained in a block.
///
/// The sender is not part of the payload; recover it through
/// [`crate::node::NodeClient::transaction_sender`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// The transaction hash.
    pub hash: H256,
    /// Sender nonce.
    #[serde(with = "quantity")]
    pub nonce: u64,
    /// Recipient; `None` for contract creation.
    pub to: Option<Address>,
    /// Transferred value in wei.
    #[serde(with = "quantity::wide")]
    pub value: Wei,
    /// Gas limit.
    #[serde(with = "quantity")]
    pub gas: u64,
    /// Gas price in wei, absent for some typed transactions.
    #[serde(rename = "gasPrice", default, with = "quantity::option_wide")]
    pub gas_price: Option<Wei>,
    /// Call data as hex.
    #[serde(default)]
    pub input: String,
    /// Position within the block.
    #[serde(rename = "transactionIndex", default, with = "quantity::option")]
    pub transaction_index: Option<u64>,
}

/// A block with its full transaction list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    #[serde(with = "quantity")]
    pub number: u64,
    pub hash: H256,
    #[serde(rename = "parentHash")]
    pub parent_hash: H256,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
}

/// Snapshot of the node's synchronization progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncProgress {
    #[serde(rename = "startingBlock", with = "quantity")]
    pub starting_block: u64,
    #[serde(rename = "currentBlock", with = "quantity")]
    pub current_block: u64,
    #[serde(rename = "highestBlock", with = "quantity")]
    pub highest_block: u64,
}

/// Result of `eth_syncing`: `false` once the node is synced, a progress object otherwise.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum SyncingResponse {
    Synced(#[allow(dead_code)] bool),
    Progress(SyncProgress),
}

impl SyncingResponse {
    pub(crate) fn into_progress(self) -> Option<SyncProgress> {
        match self {
            SyncingResponse::Synced(_) => None,
            SyncingResponse::Progress(progress) => Some(progress),
        }
    }
}

/// Error types for node lifecycle and queries
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("Node start failed: {0}")]
    StartFailed(String),

    #[error("Block {0} not found")]
    BlockNotFound(u64),

    #[error("Sender recovery failed: {0}")]
    SenderRecovery(String),

    #[error("JSON-RPC error {code}: {message}")]
    RpcError { code: i64, message: String },

    #[error("No data returned")]
    NoData,

    #[error("Subscription error: {0}")]
    SubscriptionError(String),

    #[error("WebSocket error: {0}")]
    WebSocketError(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
