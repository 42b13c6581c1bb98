use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
	types::{Address, Cell, Coins},
	wallet::SendMode,
};

pub type RequestId = Uuid;

/// Message submission handed to the transaction manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
	/// Wallet sending the message.
	pub from: Address,
	pub destination: Address,
	pub amount: Coins,
	pub body: Option<Cell>,
	/// Present when the message deploys a contract.
	pub state_init: Option<Cell>,
	pub mode: SendMode,
	pub bounce: bool,
	/// Run every intake check without queueing the request.
	pub simulate: bool,
}

/// Where a request is in its lifecycle, before its trace takes over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestState {
	/// Queued, not broadcast yet.
	Pending,
	/// Broadcast and tracked under the wallet transaction LT.
	Broadcast { account: Address, lt: u64 },
	/// Broadcast failed, the request is dropped.
	Fatal { cause: String },
}
