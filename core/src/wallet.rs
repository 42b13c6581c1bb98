//! Wallet and key store capabilities. Message assembly, signing and
//! serialization are provided by the implementations.

use async_trait::async_trait;
use mockall::automock;
use std::sync::Arc;
use thiserror::Error;

use crate::{
	network::{ClientError, NodeClient},
	transaction::Transaction,
	types::{Address, BlockId, Cell, Coins},
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeystoreError {
	#[error("Key {0} not found in key store")]
	KeyNotFound(String),
	#[error("Signing failed: {0}")]
	Signing(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WalletError {
	#[error("Invalid message: {0}")]
	InvalidMessage(String),
	#[error(transparent)]
	Client(#[from] ClientError),
	#[error(transparent)]
	Keystore(#[from] KeystoreError),
	#[error("Transaction was not found after sending: {0}")]
	NotConfirmed(String),
}

/// Signs payloads with keys identified by hex encoded public keys.
#[async_trait]
#[automock]
pub trait Keystore: Send + Sync + 'static {
	async fn accounts(&self) -> Result<Vec<String>, KeystoreError>;

	async fn sign(&self, account: String, data: Vec<u8>) -> Result<Vec<u8>, KeystoreError>;
}

/// Send mode flags of an outgoing wallet message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SendMode(pub u8);

impl SendMode {
	pub const ORDINARY: SendMode = SendMode(0);
	pub const PAY_FEES_SEPARATELY: SendMode = SendMode(1);
	pub const IGNORE_ERRORS: SendMode = SendMode(2);
	pub const DESTROY_IF_ZERO: SendMode = SendMode(32);
	pub const CARRY_REMAINING_VALUE: SendMode = SendMode(64);
	pub const CARRY_ALL_BALANCE: SendMode = SendMode(128);

	pub fn contains(&self, flag: SendMode) -> bool {
		self.0 & flag.0 == flag.0
	}
}

impl std::ops::BitOr for SendMode {
	type Output = SendMode;

	fn bitor(self, other: SendMode) -> SendMode {
		SendMode(self.0 | other.0)
	}
}

/// Internal message to be sent from a wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletMessage {
	pub mode: SendMode,
	pub destination: Address,
	pub amount: Coins,
	pub bounce: bool,
	pub ihr_disabled: bool,
	pub created_at: u32,
	pub state_init: Option<Cell>,
	pub body: Option<Cell>,
}

/// Wallet able to sign and send messages and wait for their transaction.
#[async_trait]
pub trait Wallet: Send + Sync + 'static {
	fn address(&self) -> Address;

	/// Hex encoded public key used to look the wallet up in the key store.
	fn public_key(&self) -> String;

	/// Sends `message` and returns the wallet transaction that processed it,
	/// together with the masterchain block it was committed in.
	async fn send_wait_transaction(
		&self,
		message: WalletMessage,
	) -> Result<(Transaction, BlockId), WalletError>;
}

/// Builds the signer wallet of a key store account on top of a node client.
#[async_trait]
pub trait WalletFactory<C: NodeClient>: Send + Sync + 'static {
	type Wallet: Wallet;

	async fn wallet(
		&self,
		client: Arc<C>,
		public_key: String,
		keystore: Arc<dyn Keystore>,
	) -> Result<Self::Wallet, WalletError>;
}
