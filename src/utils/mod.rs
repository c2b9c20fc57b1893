//!
//! Utility module for the light wallet.
//!
//! Re-exports formatting helpers used in log output.
/// Utility functions for formatting and display
pub mod index;

pub use index::{ETHER_DECIMALS, format_token_amount};
