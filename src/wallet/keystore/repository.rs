use crate::wallet::keystore::crypto::KeyFile;
use crate::wallet::types::KeyStoreError;

use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Repository for encrypted key files
pub trait KeyRepository: Send + Sync {
	/// All readable key files, ordered by file name.
	fn list(&self) -> Result<Vec<(PathBuf, KeyFile)>, KeyStoreError>;
	/// Persist a new key file and return its path.
	fn save(&self, key: &KeyFile) -> Result<PathBuf, KeyStoreError>;
	fn load(&self, path: &Path) -> Result<KeyFile, KeyStoreError>;
}

/// File-based implementation of KeyRepository
///
/// Key files are named `UTC--<timestamp>--<address>`, so name order is creation order.
pub struct FileKeyRepository {
	keystore_dir: PathBuf,
}

impl FileKeyRepository {
	pub fn new(keystore_dir: PathBuf) -> Self {
		Self { keystore_dir }
	}

	pub fn dir(&self) -> &Path {
		&self.keystore_dir
	}

	fn key_filename(&self, key: &KeyFile, now: DateTime<Utc>) -> PathBuf {
		self.keystore_dir.join(format!(
			"UTC--{}--{}",
			now.format("%Y-%m-%dT%H-%M-%S%.9fZ"),
			key.address.as_deref().unwrap_or_default()
		))
	}
}

impl KeyRepository for FileKeyRepository {
	fn list(&self) -> Result<Vec<(PathBuf, KeyFile)>, KeyStoreError> {
		if !self.keystore_dir.exists() {
			return Ok(Vec::new());
		}

		let mut paths = Vec::new();
		for entry in fs::read_dir(&self.keystore_dir)? {
			let entry = entry?;
			let name = entry.file_name();
			let name = name.to_string_lossy();
			// Skip editor backups and in-flight temporary files
			if name.starts_with('.') || name.ends_with('~') || !entry.file_type()?.is_file() {
				continue;
			}
			paths.push(entry.path());
		}
		paths.sort();

		let mut keys = Vec::with_capacity(paths.len());
		for path in paths {
			match self.load(&path) {
				Ok(key) => keys.push((path, key)),
				Err(e) => warn!("Ignoring unreadable key file {:?}: {}", path, e),
			}
		}

		Ok(keys)
	}

	fn save(&self, key: &KeyFile) -> Result<PathBuf, KeyStoreError> {
		fs::create_dir_all(&self.keystore_dir)?;

		let filename = self.key_filename(key, Utc::now());
		let contents = serde_json::to_vec_pretty(key)?;

		// Hidden until renamed into place
		let tmp_name = format!(
			".{}.tmp",
			filename
				.file_name()
				.map(|n| n.to_string_lossy().into_owned())
				.unwrap_or_default()
		);
		let tmp_path = self.keystore_dir.join(tmp_name);
		fs::write(&tmp_path, &contents)?;

		#[cfg(unix)]
		{
			use std::os::unix::fs::PermissionsExt;
			fs::set_permissions(&tmp_path, fs::Permissions::from_mode(0o600))?;
		}

		fs::rename(&tmp_path, &filename)?;
		info!("Saved key file {:?}", filename);
		Ok(filename)
	}

	fn load(&self, path: &Path) -> Result<KeyFile, KeyStoreError> {
		let contents = fs::read(path)?;
		let key: KeyFile = serde_json::from_slice(&contents)
			.map_err(|e| KeyStoreError::MalformedKey(format!("{}: {e}", path.display())))?;
		debug!("Loaded key file {:?} for {:?}", path, key.address);
		Ok(key)
	}
}
