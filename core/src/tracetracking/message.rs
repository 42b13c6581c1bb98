use serde::{Deserialize, Serialize};
use strum::Display;
use thiserror::Error;

use crate::{
	transaction::{
		BouncePhase, ComputePhase, ExternalInMessage, ExternalOutMessage, InternalMessage, Message,
		Transaction,
	},
	tvm::ExitCode,
	types::{Address, Cell, Coins, BOC_MAGIC},
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
	#[error("Transaction {lt} of {account} has no incoming message")]
	MissingIncoming { account: Address, lt: u64 },
	#[error("Transaction {lt} of {account} has an external-out incoming message")]
	UnexpectedIncoming { account: Address, lt: u64 },
	#[error("Transaction {lt} of {account} emits an external-in message")]
	UnexpectedOutgoing { account: Address, lt: u64 },
}

/// Resolution state of a received message and its outgoing children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, Serialize, Deserialize)]
pub enum MsgStatus {
	/// Children exist, none resolved yet.
	Received,
	/// Some children resolved.
	Cascading,
	/// Every child resolved.
	Finalized,
}

/// Outgoing internal message that has not been matched to its receipt yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentMessage {
	pub source: Address,
	pub destination: Address,
	pub amount: Coins,
	/// Logical time of the emitting transaction.
	pub lt: u64,
	pub fwd_fee: Coins,
	pub bounce: bool,
	pub body: Option<Cell>,
}

impl From<&InternalMessage> for SentMessage {
	fn from(message: &InternalMessage) -> Self {
		SentMessage {
			source: message.src,
			destination: message.dst,
			amount: message.amount,
			lt: message.created_lt,
			fwd_fee: message.fwd_fee,
			bounce: message.bounce,
			body: message.body.clone(),
		}
	}
}

impl SentMessage {
	/// Whether `message` is the delivery of this sent message.
	pub fn matches(&self, message: &InternalMessage) -> bool {
		message.src == self.source && message.dst == self.destination && message.created_lt == self.lt
	}
}

/// External-out message emitted by a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingEvent {
	pub created_at: u32,
	pub lt: u64,
	pub body: Option<Cell>,
}

impl From<&ExternalOutMessage> for OutgoingEvent {
	fn from(message: &ExternalOutMessage) -> Self {
		OutgoingEvent {
			created_at: message.created_at,
			lt: message.created_lt,
			body: message.body.clone(),
		}
	}
}

/// Message that triggered a received transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IncomingMessage {
	Internal(InternalMessage),
	ExternalIn(ExternalInMessage),
}

impl IncomingMessage {
	pub fn destination(&self) -> Address {
		match self {
			IncomingMessage::Internal(message) => message.dst,
			IncomingMessage::ExternalIn(message) => message.dst,
		}
	}

	pub fn source(&self) -> Option<Address> {
		match self {
			IncomingMessage::Internal(message) => Some(message.src),
			IncomingMessage::ExternalIn(_) => None,
		}
	}
}

/// Message together with the execution of the transaction it triggered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedMessage {
	pub incoming: IncomingMessage,
	/// Account that executed the transaction.
	pub account: Address,
	/// Logical time of the executed transaction.
	pub lt: u64,
	/// Coins credited by the incoming message.
	pub amount: Coins,
	pub success: bool,
	pub exit_code: ExitCode,
	/// False when the action phase ran and failed, e.g. not enough balance to send.
	pub action_success: bool,
	pub action_result_code: ExitCode,
	pub bounced: bool,
	pub import_fee: Coins,
	/// Forward fee paid by the sender to deliver the incoming message.
	pub fwd_fee: Coins,
	pub storage_fee: Coins,
	pub gas_fee: Coins,
	/// Action phase fee, excluding forward fees of the children.
	pub action_fee: Coins,
	/// Sum of forward fees of the outgoing internal messages.
	pub msg_fees_charged_to_sender: Coins,
	/// Fees reported by the node and not explained by any phase.
	pub magic_fee: i128,
	pub sent: Vec<SentMessage>,
	pub received: Vec<ReceivedMessage>,
	pub events: Vec<OutgoingEvent>,
}

impl ReceivedMessage {
	/// Lifts a committed transaction into a received message, decomposing fees
	/// and classifying outgoing messages.
	pub fn parse(transaction: &Transaction) -> Result<Self, ParseError> {
		let account = transaction.account;
		let lt = transaction.lt;

		let incoming = match &transaction.in_msg {
			Some(Message::Internal(message)) => IncomingMessage::Internal(message.clone()),
			Some(Message::ExternalIn(message)) => IncomingMessage::ExternalIn(message.clone()),
			Some(Message::ExternalOut(_)) => {
				return Err(ParseError::UnexpectedIncoming { account, lt })
			},
			None => return Err(ParseError::MissingIncoming { account, lt }),
		};

		let (amount, fwd_fee, import_fee) = match &incoming {
			IncomingMessage::Internal(message) => (message.amount, message.fwd_fee, Coins::ZERO),
			IncomingMessage::ExternalIn(message) => (Coins::ZERO, Coins::ZERO, message.import_fee),
		};

		let mut received = ReceivedMessage {
			incoming,
			account,
			lt,
			amount,
			success: false,
			exit_code: ExitCode::COMPUTE_SKIPPED,
			action_success: true,
			action_result_code: ExitCode::SUCCESS,
			bounced: false,
			import_fee,
			fwd_fee,
			storage_fee: Coins::ZERO,
			gas_fee: Coins::ZERO,
			action_fee: Coins::ZERO,
			msg_fees_charged_to_sender: Coins::ZERO,
			magic_fee: transaction.total_fees.signed() - import_fee.signed(),
			sent: vec![],
			received: vec![],
			events: vec![],
		};

		if let Some(description) = transaction.ordinary() {
			if let ComputePhase::Vm(compute) = &description.compute_phase {
				received.success = compute.success;
				received.exit_code = ExitCode(compute.exit_code);
				received.gas_fee = compute.gas_fees;
				received.magic_fee -= compute.gas_fees.signed();
			}

			if let Some(storage) = &description.storage_phase {
				received.storage_fee = storage.storage_fees_collected;
				received.magic_fee -= storage.storage_fees_collected.signed();
			}

			if let Some(action) = &description.action_phase {
				if let Some(total_action_fees) = action.total_action_fees {
					received.action_fee = total_action_fees;
					received.magic_fee -= total_action_fees.signed();
				}
				received.action_success = action.success;
				received.action_result_code = ExitCode(action.result_code);
			}

			if let Some(BouncePhase::Ok { .. }) = &description.bounce_phase {
				received.bounced = true;
			}
		}

		for message in &transaction.out_msgs {
			match message {
				Message::Internal(message) => {
					received.msg_fees_charged_to_sender =
						received.msg_fees_charged_to_sender + message.fwd_fee;
					received.sent.push(message.into());
				},
				Message::ExternalOut(message) => received.events.push(message.into()),
				Message::ExternalIn(_) => return Err(ParseError::UnexpectedOutgoing { account, lt }),
			}
		}

		Ok(received)
	}

	/// Node local status, derived from the outgoing children.
	pub fn status(&self) -> MsgStatus {
		if self.sent.is_empty() {
			MsgStatus::Finalized
		} else if !self.received.is_empty() {
			MsgStatus::Cascading
		} else {
			MsgStatus::Received
		}
	}

	/// Status of the whole trace rooted at this message.
	pub fn trace_status(&self) -> MsgStatus {
		if self.pending_count() == 0 {
			MsgStatus::Finalized
		} else if self.received.is_empty() {
			MsgStatus::Received
		} else {
			MsgStatus::Cascading
		}
	}

	/// Number of sent children not yet matched, at any depth.
	pub fn pending_count(&self) -> usize {
		self.sent.len() + self.received.iter().map(Self::pending_count).sum::<usize>()
	}

	/// Number of received messages in the trace, this one included.
	pub fn trace_size(&self) -> usize {
		1 + self.received.iter().map(Self::trace_size).sum::<usize>()
	}

	/// Depth of the resolved trace, a leaf has depth 1.
	pub fn trace_depth(&self) -> usize {
		1 + self.received.iter().map(Self::trace_depth).max().unwrap_or(0)
	}

	/// Coins sent out to children, resolved or not.
	pub fn outgoing_amount(&self) -> Coins {
		let sent: Coins = self.sent.iter().map(|message| message.amount).sum();
		let received: Coins = self.received.iter().map(|message| message.amount).sum();
		sent + received
	}

	/// Coins retained by the account: incoming amount minus what was sent on.
	pub fn net_credit(&self) -> i128 {
		self.amount.signed() - self.outgoing_amount().signed()
	}

	/// Action phase fee plus the forward fee of every outgoing child.
	pub fn total_action_phase_fees(&self) -> Coins {
		let sent: Coins = self.sent.iter().map(|message| message.fwd_fee).sum();
		let received: Coins = self.received.iter().map(|message| message.fwd_fee).sum();
		self.action_fee + sent + received
	}

	/// Fees paid for executing this message. Storage is charged to the account
	/// balance and is not included.
	pub fn total_execution_fee(&self) -> i128 {
		(self.import_fee + self.gas_fee + self.total_action_phase_fees()).signed() + self.magic_fee
	}

	pub fn trace_succeeded(&self) -> bool {
		self.success && self.received.iter().all(Self::trace_succeeded)
	}

	/// Exit code of the first failed message in pre-order, success otherwise.
	/// A failed message never reports a success code.
	pub fn outcome_exit_code(&self) -> ExitCode {
		let mut stack = vec![self];
		while let Some(message) = stack.pop() {
			if !message.success {
				return match message.exit_code {
					code if code.is_success() => ExitCode::UNKNOWN_ERROR,
					code => code,
				};
			}
			stack.extend(message.received.iter().rev());
		}
		ExitCode::SUCCESS
	}

	/// Indented rendering of the trace.
	pub fn dump(&self) -> String {
		self.dump_lines().join("\n")
	}

	fn dump_lines(&self) -> Vec<String> {
		let mut lines = vec![match &self.incoming {
			IncomingMessage::Internal(message) => describe_internal(
				&message.src.to_string(),
				&message.dst,
				message.amount,
				message.bounced,
				&message.body,
				Some(self.exit_code),
			),
			IncomingMessage::ExternalIn(message) => format!(
				"external -- ({}, {}) --> {}",
				describe_body(&message.body),
				describe_exit_code(Some(self.exit_code)),
				message.dst
			),
		}];

		for child in &self.received {
			for (index, line) in child.dump_lines().into_iter().enumerate() {
				let prefix = if index == 0 { "└ " } else { "│ " };
				lines.push(format!("{prefix}{line}"));
			}
		}
		for child in &self.sent {
			lines.push(format!(
				"└ {}",
				describe_internal(
					&child.source.to_string(),
					&child.destination,
					child.amount,
					false,
					&child.body,
					None
				)
			));
		}
		for event in &self.events {
			lines.push(format!(
				"└ {} emit: ({})",
				self.account,
				describe_body(&event.body)
			));
		}
		lines
	}
}

fn describe_internal(
	source: &str,
	destination: &Address,
	amount: Coins,
	bounced: bool,
	body: &Option<Cell>,
	exit_code: Option<ExitCode>,
) -> String {
	let bounce = if bounced { ", bounce" } else { "" };
	format!(
		"{source} -- ({}, amount: {amount}{bounce}, {}) --> {destination}",
		describe_body(body),
		describe_exit_code(exit_code)
	)
}

fn describe_exit_code(exit_code: Option<ExitCode>) -> String {
	match exit_code {
		None => "pending".to_string(),
		Some(ExitCode::SUCCESS) => "exit code 0".to_string(),
		Some(code) => format!("exit code: {code}"),
	}
}

/// Describes a body by the leading 32 bits of its cell data, past the
/// serialization header.
fn describe_body(body: &Option<Cell>) -> String {
	let data = body.as_ref().map(|body| {
		let bytes = body.as_bytes();
		bytes.strip_prefix(&BOC_MAGIC[..]).unwrap_or(bytes)
	});
	match data {
		None | Some([]) => "empty".to_string(),
		Some([a, b, c, d, ..]) => format!("opcode: 0x{:08x}", u32::from_be_bytes([*a, *b, *c, *d])),
		Some(bytes) => format!("body: {}", hex::encode(bytes)),
	}
}
