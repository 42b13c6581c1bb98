use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::types::duration_millis_format;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TxmConfigError {
	#[error("broadcast-chan-size must be greater than zero")]
	ZeroBroadcastChanSize,
	#[error("confirm-poll-secs must be greater than zero")]
	ZeroConfirmPoll,
	#[error("tx-expiration-secs must be greater than zero")]
	ZeroTxExpiration,
	#[error("finalized-retention-secs must be greater than zero")]
	ZeroFinalizedRetention,
}

/// Transaction manager configuration.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct TxmConfig {
	/// Capacity of the intake channel, requests beyond it are rejected (default: 100).
	pub broadcast_chan_size: usize,
	/// Interval between confirmation ticks in seconds (default: 5).
	pub confirm_poll_secs: u64,
	/// Delay between send attempts in milliseconds (default: 3000).
	#[serde(with = "duration_millis_format")]
	pub send_retry_delay: Duration,
	/// Maximum number of send attempts (default: 5). Broadcasts are not retried yet.
	pub max_send_retry_attempts: u32,
	/// Seconds after broadcast at which an unresolved trace is failed (default: 300).
	pub tx_expiration_secs: u64,
	/// Seconds a finalized, failed or fatal request stays queryable (default: 3600).
	pub finalized_retention_secs: u64,
	/// Keep using the node client the manager was created with (default: true).
	pub sticky_node_context_enabled: bool,
}

impl Default for TxmConfig {
	fn default() -> Self {
		Self {
			broadcast_chan_size: 100,
			confirm_poll_secs: 5,
			send_retry_delay: Duration::from_secs(3),
			max_send_retry_attempts: 5,
			tx_expiration_secs: 300,
			finalized_retention_secs: 3600,
			sticky_node_context_enabled: true,
		}
	}
}

impl TxmConfig {
	pub fn confirm_poll_interval(&self) -> Duration {
		Duration::from_secs(self.confirm_poll_secs)
	}

	pub fn tx_expiration(&self) -> Duration {
		Duration::from_secs(self.tx_expiration_secs)
	}

	pub fn finalized_retention(&self) -> Duration {
		Duration::from_secs(self.finalized_retention_secs)
	}

	pub fn validate(&self) -> Result<(), TxmConfigError> {
		if self.broadcast_chan_size == 0 {
			return Err(TxmConfigError::ZeroBroadcastChanSize);
		}
		if self.confirm_poll_secs == 0 {
			return Err(TxmConfigError::ZeroConfirmPoll);
		}
		if self.tx_expiration_secs == 0 {
			return Err(TxmConfigError::ZeroTxExpiration);
		}
		if self.finalized_retention_secs == 0 {
			return Err(TxmConfigError::ZeroFinalizedRetention);
		}
		Ok(())
	}
}
