use light_wallet_sync::node::Address;
use light_wallet_sync::utils::{ETHER_DECIMALS, format_token_amount};
use light_wallet_sync::{
	BalanceObserver, CoreConfig, CoreError, KeyStoreError, ScannedTransaction, SyncObserver,
	WalletCore,
};

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

const HOME_ENV: &str = "LIGHT_WALLET_HOME";
const PASSPHRASE_ENV: &str = "LIGHT_WALLET_PASSPHRASE";
const DEFAULT_HOME: &str = "light-wallet";

/// Logs wallet updates for the current account.
struct LogObserver {
	address: Address,
}

impl BalanceObserver for LogObserver {
	fn did_update_balance(&self, balance: u128) {
		info!(
			"Balance of {}: {} ETH",
			self.address,
			format_token_amount(balance, ETHER_DECIMALS)
		);
	}

	fn did_receive_transactions(&self, transactions: &[ScannedTransaction]) {
		for scanned in transactions {
			info!(
				"{:?} transaction {} in block {}: {} ETH",
				scanned.direction,
				scanned.transaction.hash,
				scanned.block_number,
				format_token_amount(scanned.transaction.value, ETHER_DECIMALS)
			);
		}
	}
}

impl SyncObserver for LogObserver {
	fn did_change_progress(&self, current_block: u64, highest_block: u64) {
		info!("Syncing block {} of {}", current_block, highest_block);
	}

	fn did_finish(&self) {
		info!("Sync finished");
	}
}

#[tokio::main]
async fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::from_default_env()
				.add_directive(tracing::Level::INFO.into()),
		)
		.with_target(false)
		.with_thread_ids(false)
		.with_thread_names(false)
		.with_file(false)
		.with_line_number(false)
		.with_timer(tracing_subscriber::fmt::time::time())
		.init();

	let home = std::env::var_os(HOME_ENV)
		.map(PathBuf::from)
		.unwrap_or_else(|| PathBuf::from(DEFAULT_HOME));
	info!("Starting light wallet in {}", home.display());

	let core = WalletCore::new(CoreConfig::rinkeby(home));

	let account = match core.current_account() {
		Ok(Some(account)) => account,
		Ok(None) => {
			let Ok(passphrase) = std::env::var(PASSPHRASE_ENV) else {
				error!("No account yet; set {} to create one", PASSPHRASE_ENV);
				return;
			};
			match core.create_account(&passphrase) {
				Ok(account) => account,
				Err(CoreError::KeyStoreError(KeyStoreError::AccountExists)) => {
					warn!("Account appeared while starting, retry");
					return;
				}
				Err(e) => {
					error!("Failed to create account: {}", e);
					return;
				}
			}
		}
		Err(e) => {
			error!("Failed to read key store: {}", e);
			return;
		}
	};
	info!("Using account {}", account.address);

	let observer = Arc::new(LogObserver {
		address: account.address,
	});
	if let Err(e) = core.start_sync(observer.clone(), observer).await {
		error!("Failed to start sync: {}", e);
		return;
	}

	if let Err(e) = tokio::signal::ctrl_c().await {
		error!("Failed to wait for Ctrl-C: {}", e);
	}

	info!("Shutting down");
	if let Err(e) = core.stop().await {
		error!("Failed to stop cleanly: {}", e);
	}
}
