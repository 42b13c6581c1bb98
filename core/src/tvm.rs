//! Virtual machine exit codes.

use derive_more::From;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Exit code reported by the compute or action phase of a transaction.
///
/// Codes `0` and `1` are success, `2..=14` and `32..=50` are raised by the
/// virtual machine and the action phase, and codes from `63` up are assigned
/// by high level language compilers.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, From)]
#[derive(Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExitCode(pub i32);

impl ExitCode {
	pub const SUCCESS: ExitCode = ExitCode(0);
	pub const SUCCESS_VARIANT: ExitCode = ExitCode(1);
	pub const STACK_UNDERFLOW: ExitCode = ExitCode(2);
	pub const STACK_OVERFLOW: ExitCode = ExitCode(3);
	pub const INTEGER_OVERFLOW: ExitCode = ExitCode(4);
	pub const INTEGER_OUT_OF_RANGE: ExitCode = ExitCode(5);
	pub const INVALID_OPCODE: ExitCode = ExitCode(6);
	pub const TYPE_CHECK_ERROR: ExitCode = ExitCode(7);
	pub const CELL_OVERFLOW: ExitCode = ExitCode(8);
	pub const CELL_UNDERFLOW: ExitCode = ExitCode(9);
	pub const DICTIONARY_ERROR: ExitCode = ExitCode(10);
	pub const UNKNOWN_ERROR: ExitCode = ExitCode(11);
	pub const FATAL_ERROR: ExitCode = ExitCode(12);
	pub const OUT_OF_GAS: ExitCode = ExitCode(13);
	/// Negative twin of [`ExitCode::OUT_OF_GAS`], cannot be thrown from user code.
	pub const OUT_OF_GAS_VARIANT: ExitCode = ExitCode(-14);
	pub const VIRTUALIZATION_ERROR: ExitCode = ExitCode(14);
	pub const ACTION_LIST_INVALID: ExitCode = ExitCode(32);
	pub const ACTION_LIST_TOO_LONG: ExitCode = ExitCode(33);
	pub const ACTION_INVALID_OR_UNSUPPORTED: ExitCode = ExitCode(34);
	pub const INVALID_SOURCE_ADDRESS: ExitCode = ExitCode(35);
	pub const INVALID_DESTINATION_ADDRESS: ExitCode = ExitCode(36);
	pub const NOT_ENOUGH_TONCOIN: ExitCode = ExitCode(37);
	pub const NOT_ENOUGH_EXTRA_CURRENCIES: ExitCode = ExitCode(38);
	pub const OUTBOUND_MESSAGE_DOES_NOT_FIT: ExitCode = ExitCode(39);
	pub const CANNOT_PROCESS_MESSAGE: ExitCode = ExitCode(40);
	pub const LIBRARY_REFERENCE_NULL: ExitCode = ExitCode(41);
	pub const LIBRARY_CHANGE_ACTION_ERROR: ExitCode = ExitCode(42);
	pub const EXCEEDED_MAX_CELLS_OR_DEPTH: ExitCode = ExitCode(43);
	pub const ACCOUNT_STATE_SIZE_EXCEEDED: ExitCode = ExitCode(50);
	pub const UNMATCHED_OPCODE: ExitCode = ExitCode(63);
	pub const NULL_REFERENCE: ExitCode = ExitCode(128);
	pub const INVALID_SERIALIZATION_PREFIX: ExitCode = ExitCode(129);
	pub const INVALID_INCOMING_MESSAGE: ExitCode = ExitCode(130);
	pub const CONSTRAINTS_ERROR: ExitCode = ExitCode(131);
	pub const ACCESS_DENIED: ExitCode = ExitCode(132);
	pub const CONTRACT_STOPPED: ExitCode = ExitCode(133);
	pub const INVALID_ARGUMENT: ExitCode = ExitCode(134);
	pub const CODE_NOT_FOUND: ExitCode = ExitCode(135);
	pub const INVALID_STANDARD_ADDRESS: ExitCode = ExitCode(136);
	pub const NOT_A_BASECHAIN_ADDRESS: ExitCode = ExitCode(138);
	/// Recorded for messages whose compute phase did not run. Negative, so
	/// contracts cannot throw it.
	pub const COMPUTE_SKIPPED: ExitCode = ExitCode(-1);

	pub fn code(&self) -> i32 {
		self.0
	}

	pub fn is_success(&self) -> bool {
		matches!(*self, Self::SUCCESS | Self::SUCCESS_VARIANT)
	}

	/// Deploying a contract with an empty body succeeds even when the contract
	/// has no handler for it, in which case it reports an unmatched opcode or
	/// an invalid incoming message.
	pub fn is_successful_deployment(&self) -> bool {
		matches!(
			*self,
			Self::SUCCESS | Self::UNMATCHED_OPCODE | Self::INVALID_INCOMING_MESSAGE
		)
	}

	pub fn describe(&self) -> String {
		let description = match *self {
			Self::SUCCESS => "Success",
			Self::SUCCESS_VARIANT => "Success (variant)",
			Self::STACK_UNDERFLOW => "Stack underflow",
			Self::STACK_OVERFLOW => "Stack overflow",
			Self::INTEGER_OVERFLOW => "Integer overflow",
			Self::INTEGER_OUT_OF_RANGE => "Integer out of expected range",
			Self::INVALID_OPCODE => "Invalid opcode",
			Self::TYPE_CHECK_ERROR => "Type check error",
			Self::CELL_OVERFLOW => "Cell overflow",
			Self::CELL_UNDERFLOW => "Cell underflow",
			Self::DICTIONARY_ERROR => "Dictionary error",
			Self::UNKNOWN_ERROR => "'Unknown' error",
			Self::FATAL_ERROR => "Fatal error",
			Self::OUT_OF_GAS => "Out of gas error",
			Self::OUT_OF_GAS_VARIANT => "Out of gas error (variant)",
			Self::VIRTUALIZATION_ERROR => "Virtualization error",
			Self::ACTION_LIST_INVALID => "Action list is invalid",
			Self::ACTION_LIST_TOO_LONG => "Action list is too long",
			Self::ACTION_INVALID_OR_UNSUPPORTED => "Action is invalid or not supported",
			Self::INVALID_SOURCE_ADDRESS => "Invalid source address in outbound message",
			Self::INVALID_DESTINATION_ADDRESS => "Invalid destination address in outbound message",
			Self::NOT_ENOUGH_TONCOIN => "Not enough Toncoin",
			Self::NOT_ENOUGH_EXTRA_CURRENCIES => "Not enough extra currencies",
			Self::OUTBOUND_MESSAGE_DOES_NOT_FIT => {
				"Outbound message does not fit into a cell after rewriting"
			},
			Self::CANNOT_PROCESS_MESSAGE => "Cannot process a message",
			Self::LIBRARY_REFERENCE_NULL => "Library reference is null",
			Self::LIBRARY_CHANGE_ACTION_ERROR => "Library change action error",
			Self::EXCEEDED_MAX_CELLS_OR_DEPTH => {
				"Exceeded maximum number of cells in the library or the maximum depth of the Merkle tree"
			},
			Self::ACCOUNT_STATE_SIZE_EXCEEDED => "Account state size exceeded limits",
			Self::UNMATCHED_OPCODE => "Unmatched opcode",
			Self::NULL_REFERENCE => "Null reference exception",
			Self::INVALID_SERIALIZATION_PREFIX => "Invalid serialization prefix",
			Self::INVALID_INCOMING_MESSAGE => "Invalid incoming message",
			Self::CONSTRAINTS_ERROR => "Constraints error",
			Self::ACCESS_DENIED => "Access denied",
			Self::CONTRACT_STOPPED => "Contract stopped",
			Self::INVALID_ARGUMENT => "Invalid argument",
			Self::CODE_NOT_FOUND => "Code of a contract was not found",
			Self::INVALID_STANDARD_ADDRESS => "Invalid standard address",
			Self::NOT_A_BASECHAIN_ADDRESS => "Not a basechain address",
			Self::COMPUTE_SKIPPED => "Compute phase skipped",
			ExitCode(code) => return format!("Non-standard exit code: {code}"),
		};
		description.to_string()
	}
}

impl fmt::Display for ExitCode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{} ({})", self.0, self.describe())
	}
}
