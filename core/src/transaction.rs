//! Raw transaction records as delivered by a node.

use serde::{Deserialize, Serialize};

use crate::types::{Address, Cell, Coins};

/// Internal message carried between two accounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalMessage {
	pub ihr_disabled: bool,
	pub bounce: bool,
	pub bounced: bool,
	pub src: Address,
	pub dst: Address,
	pub amount: Coins,
	pub ihr_fee: Coins,
	pub fwd_fee: Coins,
	/// Logical time of the emitting transaction.
	pub created_lt: u64,
	pub created_at: u32,
	pub state_init: Option<Cell>,
	pub body: Option<Cell>,
}

/// Message arriving from outside the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalInMessage {
	pub dst: Address,
	pub import_fee: Coins,
	pub state_init: Option<Cell>,
	pub body: Option<Cell>,
}

/// Event emitted to the outside world.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalOutMessage {
	pub src: Address,
	pub created_lt: u64,
	pub created_at: u32,
	pub body: Option<Cell>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
	Internal(InternalMessage),
	ExternalIn(ExternalInMessage),
	ExternalOut(ExternalOutMessage),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComputeSkipReason {
	NoState,
	BadState,
	NoGas,
	Suspended,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputePhaseVm {
	pub success: bool,
	pub exit_code: i32,
	pub gas_fees: Coins,
	pub gas_used: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComputePhase {
	Skipped(ComputeSkipReason),
	Vm(ComputePhaseVm),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoragePhase {
	pub storage_fees_collected: Coins,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionPhase {
	pub success: bool,
	pub result_code: i32,
	pub total_fwd_fees: Option<Coins>,
	pub total_action_fees: Option<Coins>,
	pub total_actions: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BouncePhase {
	NegativeFunds,
	NoFunds { msg_size: u64, required_fwd_fees: Coins },
	Ok { msg_fees: Coins, fwd_fees: Coins },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrdinaryDescription {
	pub credit_first: bool,
	pub storage_phase: Option<StoragePhase>,
	pub compute_phase: ComputePhase,
	pub action_phase: Option<ActionPhase>,
	pub bounce_phase: Option<BouncePhase>,
	pub aborted: bool,
	pub destroyed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionDescription {
	Ordinary(OrdinaryDescription),
	/// Tick-tock, split, merge and storage transactions. Carry no phases the
	/// trace model cares about.
	Other,
}

/// Committed transaction of a single account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
	pub account: Address,
	pub lt: u64,
	pub hash: [u8; 32],
	pub prev_lt: u64,
	pub now: u32,
	pub in_msg: Option<Message>,
	pub out_msgs: Vec<Message>,
	pub total_fees: Coins,
	pub description: TransactionDescription,
}

impl Transaction {
	pub fn ordinary(&self) -> Option<&OrdinaryDescription> {
		match &self.description {
			TransactionDescription::Ordinary(description) => Some(description),
			TransactionDescription::Other => None,
		}
	}

	/// Incoming internal message, if this transaction was triggered by one.
	pub fn internal_in(&self) -> Option<&InternalMessage> {
		match &self.in_msg {
			Some(Message::Internal(message)) => Some(message),
			_ => None,
		}
	}
}
