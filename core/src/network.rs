//! Node client capability consumed by the rest of the crate.

use async_trait::async_trait;
use mockall::automock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
	transaction::Transaction,
	types::{Address, BlockId, Cell, Coins},
};

pub mod pool;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClientError {
	#[error("Cannot connect to node {url}: {reason}")]
	Connection { url: String, reason: String },
	#[error("Request {method} failed: {reason}")]
	Request { method: String, reason: String },
	#[error("Block {0} not found")]
	BlockNotFound(BlockId),
	#[error("Transaction subscription for {0} closed")]
	SubscriptionClosed(Address),
}

impl ClientError {
	pub fn request(method: &str, reason: impl ToString) -> Self {
		ClientError::Request {
			method: method.to_string(),
			reason: reason.to_string(),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockData {
	pub global_id: i32,
	pub gen_utime: u32,
	pub root_hash: [u8; 32],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountState {
	pub is_active: bool,
	pub balance: Coins,
	pub last_lt: u64,
	pub code: Option<Cell>,
	pub data: Option<Cell>,
}

/// Account as seen at a given block, `state` is `None` for accounts that
/// were never initialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
	pub address: Address,
	pub state: Option<AccountState>,
}

impl Account {
	pub fn balance(&self) -> Coins {
		self.state
			.as_ref()
			.map(|state| state.balance)
			.unwrap_or_default()
	}
}

/// Value on the virtual machine stack, used for get method parameters and results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StackEntry {
	Null,
	Int(i128),
	Cell(Cell),
	Slice(Cell),
}

impl StackEntry {
	pub fn as_int(&self) -> Option<i128> {
		match self {
			StackEntry::Int(value) => Some(*value),
			_ => None,
		}
	}
}

/// Operations the crate needs from a node.
#[async_trait]
#[automock]
pub trait NodeClient: Send + Sync + 'static {
	/// Latest committed masterchain block.
	async fn current_masterchain_info(&self) -> Result<BlockId, ClientError>;

	async fn get_block_data(&self, block: BlockId) -> Result<BlockData, ClientError>;

	async fn get_account(&self, block: BlockId, address: Address) -> Result<Account, ClientError>;

	/// Runs a read-only getter of a contract.
	async fn run_get_method(
		&self,
		block: BlockId,
		address: Address,
		method: String,
		params: Vec<StackEntry>,
	) -> Result<Vec<StackEntry>, ClientError>;

	/// Pushes every transaction of `address` with logical time of at least
	/// `from_lt` into `sink`, oldest first, then keeps tailing new ones.
	/// Returns once `shutdown` is cancelled or the sink is closed.
	async fn subscribe_on_transactions(
		&self,
		address: Address,
		from_lt: u64,
		sink: mpsc::Sender<Transaction>,
		shutdown: CancellationToken,
	) -> Result<(), ClientError>;

	/// Resolves once masterchain block `seqno` is committed.
	async fn wait_for_block(&self, seqno: u32) -> Result<(), ClientError>;
}

/// View of a node whose reads wait for a masterchain block first.
pub struct BlockView<'a, C: NodeClient + ?Sized> {
	client: &'a C,
	seqno: u32,
}

impl<'a, C: NodeClient + ?Sized> BlockView<'a, C> {
	pub fn new(client: &'a C, seqno: u32) -> Self {
		Self { client, seqno }
	}

	pub async fn current_masterchain_info(&self) -> Result<BlockId, ClientError> {
		self.client.wait_for_block(self.seqno).await?;
		self.client.current_masterchain_info().await
	}

	pub async fn get_account(&self, address: Address) -> Result<Account, ClientError> {
		let block = self.current_masterchain_info().await?;
		self.client.get_account(block, address).await
	}

	pub async fn run_get_method(
		&self,
		address: Address,
		method: &str,
		params: Vec<StackEntry>,
	) -> Result<Vec<StackEntry>, ClientError> {
		let block = self.current_masterchain_info().await?;
		self.client
			.run_get_method(block, address, method.to_string(), params)
			.await
	}
}
