//! Key Store Manager
//!
//! Local, passphrase-protected account keys. The store holds at most one account created
//! on the device; further accounts can only arrive through [`KeyStore::import_key`].
//! Every operation is synchronous and touches the keystore directory only.

/// Key file encryption and address derivation
pub mod crypto;
/// Key file persistence
pub mod repository;

use crate::node::Address;
use crate::wallet::types::KeyStoreError;

use crypto::{KdfParams, KeyFile, decrypt_key, encrypt_key, generate_secret};
use repository::{FileKeyRepository, KeyRepository};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};
use uuid::Uuid;

/// Key derivation settings for stored and exported keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyStoreConfig {
	pub storage_kdf: KdfParams,
	pub export_kdf: KdfParams,
}

impl Default for KeyStoreConfig {
	fn default() -> Self {
		Self {
			storage_kdf: KdfParams::light(),
			export_kdf: KdfParams::standard(),
		}
	}
}

/// A key pair held in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
	pub address: Address,
	/// Location of the account's key file.
	pub path: PathBuf,
}

/// Serialized, passphrase-protected key material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedKey(Vec<u8>);

impl EncryptedKey {
	pub fn as_bytes(&self) -> &[u8] {
		&self.0
	}

	pub fn into_bytes(self) -> Vec<u8> {
		self.0
	}
}

impl From<Vec<u8>> for EncryptedKey {
	fn from(bytes: Vec<u8>) -> Self {
		Self(bytes)
	}
}

pub struct KeyStore {
	repo: Box<dyn KeyRepository>,
	config: KeyStoreConfig,
	current: Mutex<Option<Account>>,
}

impl KeyStore {
	/// Open the key store rooted at `keystore_dir`. The directory is created on first write.
	pub fn open(keystore_dir: PathBuf, config: KeyStoreConfig) -> Self {
		Self::with_repository(Box::new(FileKeyRepository::new(keystore_dir)), config)
	}

	pub fn with_repository(repo: Box<dyn KeyRepository>, config: KeyStoreConfig) -> Self {
		Self {
			repo,
			config,
			current: Mutex::new(None),
		}
	}

	fn current_slot(&self) -> MutexGuard<'_, Option<Account>> {
		// The slot holds plain data, so a poisoned lock is still consistent
		self.current.lock().unwrap_or_else(|e| e.into_inner())
	}

	/// All accounts, oldest key file first.
	pub fn accounts(&self) -> Result<Vec<Account>, KeyStoreError> {
		self.repo
			.list()?
			.into_iter()
			.map(|(path, key)| {
				Ok(Account {
					address: key.address()?,
					path,
				})
			})
			.collect()
	}

	/// The selected account while its key file exists, otherwise the oldest account.
	pub fn current_account(&self) -> Result<Option<Account>, KeyStoreError> {
		let accounts = self.accounts()?;
		let mut current = self.current_slot();

		if let Some(selected) = current.as_ref() {
			if accounts.contains(selected) {
				return Ok(Some(selected.clone()));
			}
			debug!("Selected account {} is gone", selected.address);
		}

		*current = accounts.into_iter().next();
		Ok(current.clone())
	}

	/// Make the account with `address` the current one.
	pub fn select_account(&self, address: &Address) -> Result<Account, KeyStoreError> {
		let account = self
			.accounts()?
			.into_iter()
			.find(|account| &account.address == address)
			.ok_or(KeyStoreError::AccountNotFound(*address))?;
		*self.current_slot() = Some(account.clone());
		Ok(account)
	}

	/// Create the device account.
	///
	/// # Errors
	/// `KeyStoreError::AccountExists` if the store already holds any account.
	pub fn create_account(&self, passphrase: &str) -> Result<Account, KeyStoreError> {
		let mut current = self.current_slot();
		if !self.repo.list()?.is_empty() {
			return Err(KeyStoreError::AccountExists);
		}

		let secret = generate_secret();
		let key = encrypt_key(&secret, Uuid::new_v4(), passphrase, self.config.storage_kdf)?;
		let path = self.repo.save(&key)?;
		let account = Account {
			address: key.address()?,
			path,
		};

		info!("Created account {}", account.address);
		*current = Some(account.clone());
		Ok(account)
	}

	/// Export `account` re-encrypted under the same passphrase with the export KDF.
	///
	/// # Errors
	/// `KeyStoreError::Decrypt` if `passphrase` does not open the stored key.
	pub fn export_key(
		&self,
		account: &Account,
		passphrase: &str,
	) -> Result<EncryptedKey, KeyStoreError> {
		if !account.path.exists() {
			return Err(KeyStoreError::AccountNotFound(account.address));
		}
		let stored = self.repo.load(&account.path)?;
		let secret = decrypt_key(&stored, passphrase)?;
		let exported = encrypt_key(&secret, stored.id, passphrase, self.config.export_kdf)?;

		info!("Exported key for {}", account.address);
		Ok(EncryptedKey(serde_json::to_vec(&exported)?))
	}

	/// Import an exported key, storing it under the same passphrase.
	///
	/// The store does not check whether the address is already present. The imported
	/// account becomes current when no account is selected.
	///
	/// # Errors
	/// Every failure is reported as `KeyStoreError::Import`.
	pub fn import_key(&self, bytes: &[u8], passphrase: &str) -> Result<Account, KeyStoreError> {
		let imported: KeyFile = serde_json::from_slice(bytes)
			.map_err(|e| KeyStoreError::Import(format!("not a key file: {e}")))?;
		let secret = decrypt_key(&imported, passphrase).map_err(|e| KeyStoreError::Import(e.to_string()))?;

		let mut current = self.current_slot();
		let key = encrypt_key(&secret, imported.id, passphrase, self.config.storage_kdf)
			.map_err(|e| KeyStoreError::Import(e.to_string()))?;
		let path = self
			.repo
			.save(&key)
			.map_err(|e| KeyStoreError::Import(e.to_string()))?;
		let account = Account {
			address: key
				.address()
				.map_err(|e| KeyStoreError::Import(e.to_string()))?,
			path,
		};

		info!("Imported account {}", account.address);
		if current.is_none() {
			*current = Some(account.clone());
		}
		Ok(account)
	}
}
