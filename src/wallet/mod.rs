pub mod keystore;
pub mod sync;
pub mod types;

pub use keystore::{Account, EncryptedKey, KeyStore, KeyStoreConfig};
pub use sync::WalletCore;
pub use sync::events::{BalanceObserver, SyncObserver};
pub use sync::scanner::{Direction, ScannedTransaction};
pub use types::*;
