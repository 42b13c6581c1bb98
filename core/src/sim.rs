//! In-process chain for tests: accounts with scripted contracts, a single
//! global logical time and asynchronous delivery of internal messages.

use async_trait::async_trait;
use std::{
	collections::{HashMap, HashSet, VecDeque},
	sync::{Arc, Mutex},
};
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

use crate::{
	network::{
		pool::{Connector, Endpoint},
		Account, AccountState, BlockData, ClientError, NodeClient, StackEntry,
	},
	transaction::{
		ActionPhase, BouncePhase, ComputePhase, ComputePhaseVm, ComputeSkipReason,
		ExternalInMessage, InternalMessage, Message, OrdinaryDescription, StoragePhase,
		Transaction, TransactionDescription,
	},
	tvm::ExitCode,
	types::{Address, BlockId, Cell, Coins, BASECHAIN, BOC_MAGIC, MASTERCHAIN},
	utils::unix_now,
	wallet::{
		Keystore, KeystoreError, SendMode, Wallet, WalletError, WalletFactory, WalletMessage,
	},
};

pub const IMPORT_FEE: u128 = 1_000;
pub const WALLET_GAS_FEE: u128 = 2_000_000;
pub const GAS_FEE: u128 = 1_000_000;
pub const STORAGE_FEE: u128 = 1_500;
pub const ACTION_FEE: u128 = 50_000;
pub const FWD_FEE: u128 = 100_000;
/// Fee the wallet pays that no phase accounts for.
pub const RESIDUAL_FEE: u128 = 7;
/// Value contracts attach to the messages they emit.
pub const FORWARD_VALUE: u128 = 50_000_000;

const STATE_INIT_TAG: &[u8] = b"init";

/// Message bodies understood by the scripted contracts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
	Store { memory: Address, value: i64 },
	SetValue { value: i64 },
	GetPrice { registry: Address, key: u32 },
	PriceRequest { key: u32 },
	PriceQuery { key: u32 },
	PriceReply { key: u32, price: i64 },
	BeginTransaction { id: u64 },
	SetCounter { counter: Address, value: i64 },
	SendAck,
	Ack,
	Commit,
}

impl Op {
	fn opcode(&self) -> u32 {
		match self {
			Op::Store { .. } => 0x01,
			Op::SetValue { .. } => 0x02,
			Op::GetPrice { .. } => 0x03,
			Op::PriceRequest { .. } => 0x04,
			Op::PriceQuery { .. } => 0x05,
			Op::PriceReply { .. } => 0x06,
			Op::BeginTransaction { .. } => 0x07,
			Op::SetCounter { .. } => 0x08,
			Op::SendAck => 0x09,
			Op::Ack => 0x0a,
			Op::Commit => 0x0b,
		}
	}

	pub fn cell(&self) -> Cell {
		let mut bytes = BOC_MAGIC.to_vec();
		bytes.extend(self.opcode().to_be_bytes());
		match self {
			Op::Store { memory, value } => {
				put_address(&mut bytes, memory);
				bytes.extend(value.to_be_bytes());
			},
			Op::SetValue { value } => bytes.extend(value.to_be_bytes()),
			Op::GetPrice { registry, key } => {
				put_address(&mut bytes, registry);
				bytes.extend(key.to_be_bytes());
			},
			Op::PriceRequest { key } | Op::PriceQuery { key } => bytes.extend(key.to_be_bytes()),
			Op::PriceReply { key, price } => {
				bytes.extend(key.to_be_bytes());
				bytes.extend(price.to_be_bytes());
			},
			Op::BeginTransaction { id } => bytes.extend(id.to_be_bytes()),
			Op::SetCounter { counter, value } => {
				put_address(&mut bytes, counter);
				bytes.extend(value.to_be_bytes());
			},
			Op::SendAck | Op::Ack | Op::Commit => {},
		}
		Cell::new(bytes)
	}

	fn decode(cell: &Cell) -> Option<Op> {
		let mut reader = Reader(cell.as_bytes().strip_prefix(&BOC_MAGIC)?);
		let op = match reader.u32()? {
			0x01 => Op::Store {
				memory: reader.address()?,
				value: reader.i64()?,
			},
			0x02 => Op::SetValue {
				value: reader.i64()?,
			},
			0x03 => Op::GetPrice {
				registry: reader.address()?,
				key: reader.u32()?,
			},
			0x04 => Op::PriceRequest { key: reader.u32()? },
			0x05 => Op::PriceQuery { key: reader.u32()? },
			0x06 => Op::PriceReply {
				key: reader.u32()?,
				price: reader.i64()?,
			},
			0x07 => Op::BeginTransaction { id: reader.u64()? },
			0x08 => Op::SetCounter {
				counter: reader.address()?,
				value: reader.i64()?,
			},
			0x09 => Op::SendAck,
			0x0a => Op::Ack,
			0x0b => Op::Commit,
			_ => return None,
		};
		Some(op)
	}
}

fn put_address(bytes: &mut Vec<u8>, address: &Address) {
	bytes.extend(address.workchain.to_be_bytes());
	bytes.extend(address.hash);
}

struct Reader<'a>(&'a [u8]);

impl Reader<'_> {
	fn take<const N: usize>(&mut self) -> Option<[u8; N]> {
		let (head, tail) = self.0.split_first_chunk::<N>()?;
		self.0 = tail;
		Some(*head)
	}

	fn u32(&mut self) -> Option<u32> {
		self.take().map(u32::from_be_bytes)
	}

	fn u64(&mut self) -> Option<u64> {
		self.take().map(u64::from_be_bytes)
	}

	fn i64(&mut self) -> Option<i64> {
		self.take().map(i64::from_be_bytes)
	}

	fn address(&mut self) -> Option<Address> {
		let workchain = self.take().map(i32::from_be_bytes)?;
		Some(Address::new(workchain, self.take()?))
	}
}

/// Contracts that can be deployed on the simulated chain.
#[derive(Debug, Clone)]
pub enum Contract {
	/// Accepts everything, no code runs.
	Plain,
	/// Rejects messages without a body.
	Strict,
	/// Stores a value locally or forwards it to a memory contract.
	Storage,
	Memory,
	/// Resolves prices through the item price contract registered per key.
	PriceRegistry(Vec<(u32, Address)>),
	ItemPrice(i64),
	/// Coordinator of a two phase commit over counters.
	Db,
	Counter { auto_ack: bool },
	/// Never accepts a message.
	BlackHole,
}

enum Code {
	Wallet,
	Plain,
	Strict,
	Storage {
		value: i64,
	},
	Memory {
		value: i64,
	},
	PriceRegistry {
		items: HashMap<u32, Address>,
		waiting: HashMap<u32, VecDeque<Address>>,
	},
	ItemPrice {
		price: i64,
	},
	Db {
		participants: Vec<Address>,
		acked: HashSet<Address>,
		commit_requested: bool,
	},
	Counter {
		value: i64,
		pending: Option<i64>,
		db: Option<Address>,
		auto_ack: bool,
	},
	BlackHole,
}

impl From<Contract> for Code {
	fn from(contract: Contract) -> Self {
		match contract {
			Contract::Plain => Code::Plain,
			Contract::Strict => Code::Strict,
			Contract::Storage => Code::Storage { value: 0 },
			Contract::Memory => Code::Memory { value: 0 },
			Contract::PriceRegistry(items) => Code::PriceRegistry {
				items: items.into_iter().collect(),
				waiting: HashMap::new(),
			},
			Contract::ItemPrice(price) => Code::ItemPrice { price },
			Contract::Db => Code::Db {
				participants: vec![],
				acked: HashSet::new(),
				commit_requested: false,
			},
			Contract::Counter { auto_ack } => Code::Counter {
				value: 0,
				pending: None,
				db: None,
				auto_ack,
			},
			Contract::BlackHole => Code::BlackHole,
		}
	}
}

impl Code {
	fn gas_fee(&self) -> u128 {
		match self {
			Code::Wallet | Code::Plain => 0,
			_ => GAS_FEE,
		}
	}

	/// Runs the contract on an incoming message and returns the messages it emits.
	fn execute(&mut self, source: Address, body: Option<&Cell>) -> Result<Vec<(Address, Op)>, ExitCode> {
		let op = body.and_then(Op::decode);
		match (self, op) {
			(Code::Wallet | Code::Plain, _) => Ok(vec![]),
			(Code::Strict, Some(_)) => Ok(vec![]),
			(Code::Storage { value }, Some(Op::Store { memory, value: stored })) => {
				*value = stored;
				Ok(vec![(memory, Op::SetValue { value: stored })])
			},
			(Code::Storage { .. }, Some(Op::GetPrice { registry, key })) => {
				Ok(vec![(registry, Op::PriceRequest { key })])
			},
			(Code::Storage { value }, Some(Op::PriceReply { price, .. })) => {
				*value = price;
				Ok(vec![])
			},
			(Code::Memory { value }, Some(Op::SetValue { value: stored })) => {
				*value = stored;
				Ok(vec![])
			},
			(Code::PriceRegistry { items, waiting }, Some(Op::PriceRequest { key })) => {
				let item = items.get(&key).ok_or(ExitCode::INVALID_ARGUMENT)?;
				waiting.entry(key).or_default().push_back(source);
				Ok(vec![(*item, Op::PriceQuery { key })])
			},
			(Code::PriceRegistry { waiting, .. }, Some(Op::PriceReply { key, price })) => {
				let requester = waiting
					.get_mut(&key)
					.and_then(VecDeque::pop_front)
					.ok_or(ExitCode::ACCESS_DENIED)?;
				Ok(vec![(requester, Op::PriceReply { key, price })])
			},
			(Code::ItemPrice { price }, Some(Op::PriceQuery { key })) => {
				Ok(vec![(source, Op::PriceReply { key, price: *price })])
			},
			(
				Code::Db {
					participants,
					acked,
					commit_requested,
				},
				Some(Op::BeginTransaction { .. }),
			) => {
				participants.clear();
				acked.clear();
				*commit_requested = false;
				Ok(vec![])
			},
			(Code::Db { participants, .. }, Some(Op::SetCounter { counter, value })) => {
				participants.push(counter);
				Ok(vec![(counter, Op::SetValue { value })])
			},
			(
				Code::Db {
					participants,
					acked,
					commit_requested,
				},
				Some(op @ (Op::Ack | Op::Commit)),
			) => {
				if op == Op::Ack {
					if !participants.contains(&source) {
						return Err(ExitCode::ACCESS_DENIED);
					}
					acked.insert(source);
				} else {
					*commit_requested = true;
				}
				let ready = *commit_requested
					&& !participants.is_empty()
					&& participants.iter().all(|participant| acked.contains(participant));
				if !ready {
					return Ok(vec![]);
				}
				acked.clear();
				*commit_requested = false;
				Ok(participants
					.drain(..)
					.map(|participant| (participant, Op::Commit))
					.collect())
			},
			(
				Code::Counter {
					pending,
					db,
					auto_ack,
					..
				},
				Some(Op::SetValue { value }),
			) => {
				*pending = Some(value);
				*db = Some(source);
				Ok(if *auto_ack {
					vec![(source, Op::Ack)]
				} else {
					vec![]
				})
			},
			(Code::Counter { db, .. }, Some(Op::SendAck)) => {
				let db = db.ok_or(ExitCode::INVALID_ARGUMENT)?;
				Ok(vec![(db, Op::Ack)])
			},
			(Code::Counter { value, pending, .. }, Some(Op::Commit)) => {
				if let Some(pending) = pending.take() {
					*value = pending;
				}
				Ok(vec![])
			},
			_ => Err(ExitCode::INVALID_INCOMING_MESSAGE),
		}
	}

	fn get(&self, method: &str) -> Option<i64> {
		match (self, method) {
			(Code::Storage { value }, "value")
			| (Code::Memory { value }, "get-value")
			| (Code::Counter { value, .. }, "value")
			| (Code::ItemPrice { price: value }, "price") => Some(*value),
			_ => None,
		}
	}
}

struct SimAccount {
	balance: u128,
	code: Option<Code>,
	last_lt: u64,
}

#[derive(Default)]
struct State {
	lt: u64,
	seqno: u32,
	next_address: u32,
	accounts: HashMap<Address, SimAccount>,
	transactions: HashMap<Address, Vec<Transaction>>,
	/// Code of not yet deployed contracts, keyed by their state init.
	pending_code: HashMap<Cell, Code>,
	wallets: HashMap<String, Address>,
}

impl State {
	fn allocate_address(&mut self) -> Address {
		self.next_address += 1;
		let mut hash = [0x5a; 32];
		hash[..4].copy_from_slice(&self.next_address.to_be_bytes());
		Address::new(BASECHAIN, hash)
	}

	fn next_lt(&mut self, out_msgs: usize) -> u64 {
		let lt = self.lt + 1;
		self.lt = lt + out_msgs as u64 + 1;
		lt
	}

	/// Commits `transaction` in a new masterchain block.
	fn commit(&mut self, transaction: Transaction) -> BlockId {
		if let Some(account) = self.accounts.get_mut(&transaction.account) {
			account.last_lt = transaction.lt;
		}
		self.transactions
			.entry(transaction.account)
			.or_default()
			.push(transaction);
		self.seqno += 1;
		BlockId::masterchain(self.seqno)
	}

	fn prev_lt(&self, address: &Address) -> u64 {
		self.accounts
			.get(address)
			.map(|account| account.last_lt)
			.unwrap_or_default()
	}
}

/// Simulated chain, cloning shares the same state.
#[derive(Clone)]
pub struct SimChain {
	global_id: i32,
	state: Arc<Mutex<State>>,
	committed: Arc<Notify>,
}

impl SimChain {
	pub fn new(global_id: i32) -> Self {
		Self {
			global_id,
			state: Arc::new(Mutex::new(State::default())),
			committed: Arc::new(Notify::new()),
		}
	}

	fn state(&self) -> std::sync::MutexGuard<'_, State> {
		self.state.lock().unwrap()
	}

	/// Creates a funded wallet whose key is its hex encoded account hash.
	pub fn wallet(&self, balance: u128) -> SimWallet {
		let mut state = self.state();
		let address = state.allocate_address();
		state.accounts.insert(
			address,
			SimAccount {
				balance,
				code: Some(Code::Wallet),
				last_lt: 0,
			},
		);
		state.wallets.insert(hex::encode(address.hash), address);
		SimWallet {
			chain: self.clone(),
			address,
			keystore: None,
		}
	}

	pub fn deploy(&self, contract: Contract, balance: u128) -> Address {
		let mut state = self.state();
		let address = state.allocate_address();
		state.accounts.insert(
			address,
			SimAccount {
				balance,
				code: Some(contract.into()),
				last_lt: 0,
			},
		);
		address
	}

	/// State init deploying `contract` on its first message, with the address it deploys to.
	pub fn state_init(&self, contract: Contract) -> (Address, Cell) {
		let mut state = self.state();
		let address = state.allocate_address();
		let mut bytes = BOC_MAGIC.to_vec();
		bytes.extend(STATE_INIT_TAG);
		put_address(&mut bytes, &address);
		let cell = Cell::new(bytes);
		state.pending_code.insert(cell.clone(), contract.into());
		(address, cell)
	}

	pub fn balance(&self, address: Address) -> Coins {
		Coins(
			self.state()
				.accounts
				.get(&address)
				.map(|account| account.balance)
				.unwrap_or_default(),
		)
	}

	pub fn transaction(&self, address: Address, lt: u64) -> Option<Transaction> {
		self.state()
			.transactions
			.get(&address)?
			.iter()
			.find(|transaction| transaction.lt == lt)
			.cloned()
	}

	pub fn transactions(&self, address: Address) -> Vec<Transaction> {
		self.state()
			.transactions
			.get(&address)
			.cloned()
			.unwrap_or_default()
	}

	fn wallet_address(&self, public_key: &str) -> Option<Address> {
		self.state().wallets.get(public_key).copied()
	}

	fn send_external(
		&self,
		wallet: Address,
		message: WalletMessage,
	) -> Result<(Transaction, BlockId), WalletError> {
		if ![BASECHAIN, MASTERCHAIN].contains(&message.destination.workchain) {
			return Err(WalletError::InvalidMessage(format!(
				"unsupported workchain {}",
				message.destination.workchain
			)));
		}

		let (transaction, block, outgoing) = {
			let mut state = self.state();
			let lt = state.next_lt(1);
			let prev_lt = state.prev_lt(&wallet);
			let account = state
				.accounts
				.get_mut(&wallet)
				.ok_or_else(|| WalletError::NotConfirmed(format!("wallet {wallet} not deployed")))?;

			let (value, debit) = if message.mode.contains(SendMode::PAY_FEES_SEPARATELY) {
				(message.amount.nano(), message.amount.nano() + FWD_FEE)
			} else {
				(message.amount.nano().saturating_sub(FWD_FEE), message.amount.nano())
			};
			let fees = IMPORT_FEE + WALLET_GAS_FEE + STORAGE_FEE + ACTION_FEE + RESIDUAL_FEE;
			let funded = account.balance >= fees + debit;
			account.balance = account.balance.saturating_sub(fees);

			let mut out_msgs = vec![];
			if funded {
				account.balance -= debit;
				out_msgs.push(InternalMessage {
					ihr_disabled: message.ihr_disabled,
					bounce: message.bounce,
					bounced: false,
					src: wallet,
					dst: message.destination,
					amount: Coins(value),
					ihr_fee: Coins::ZERO,
					fwd_fee: Coins(FWD_FEE),
					created_lt: lt + 1,
					created_at: message.created_at,
					state_init: message.state_init.clone(),
					body: message.body.clone(),
				});
			}

			let transaction = Transaction {
				account: wallet,
				lt,
				hash: transaction_hash(&wallet, lt),
				prev_lt,
				now: unix_now(),
				in_msg: Some(Message::ExternalIn(ExternalInMessage {
					dst: wallet,
					import_fee: Coins(IMPORT_FEE),
					state_init: None,
					body: message.body,
				})),
				out_msgs: out_msgs.iter().cloned().map(Message::Internal).collect(),
				total_fees: Coins(fees),
				description: TransactionDescription::Ordinary(OrdinaryDescription {
					credit_first: false,
					storage_phase: Some(StoragePhase {
						storage_fees_collected: Coins(STORAGE_FEE),
					}),
					compute_phase: ComputePhase::Vm(ComputePhaseVm {
						success: true,
						exit_code: 0,
						gas_fees: Coins(WALLET_GAS_FEE),
						gas_used: 3_000,
					}),
					action_phase: Some(ActionPhase {
						success: funded,
						result_code: if funded { 0 } else { ExitCode::NOT_ENOUGH_TONCOIN.code() },
						total_fwd_fees: Some(Coins(FWD_FEE * out_msgs.len() as u128)),
						total_action_fees: Some(Coins(ACTION_FEE)),
						total_actions: 1,
					}),
					bounce_phase: None,
					aborted: !funded,
					destroyed: false,
				}),
			};
			let block = state.commit(transaction.clone());
			(transaction, block, out_msgs)
		};

		self.committed.notify_waiters();
		self.spawn_delivery(outgoing);
		Ok((transaction, block))
	}

	fn spawn_delivery(&self, messages: Vec<InternalMessage>) {
		if messages.is_empty() {
			return;
		}
		let chain = self.clone();
		tokio::spawn(async move {
			let mut queue = VecDeque::from(messages);
			while let Some(message) = queue.pop_front() {
				tokio::task::yield_now().await;
				queue.extend(chain.deliver(message));
				chain.committed.notify_waiters();
			}
		});
	}

	/// Executes `message` on its destination and returns the messages it emitted.
	fn deliver(&self, message: InternalMessage) -> Vec<InternalMessage> {
		let mut state = self.state();
		let destination = message.dst;

		if !state.accounts.contains_key(&destination) {
			let code = message
				.state_init
				.as_ref()
				.and_then(|state_init| state.pending_code.remove(state_init));
			state.accounts.insert(
				destination,
				SimAccount {
					balance: 0,
					code,
					last_lt: 0,
				},
			);
		}
		let prev_lt = state.prev_lt(&destination);
		if matches!(
			state.accounts.get(&destination).and_then(|account| account.code.as_ref()),
			Some(Code::BlackHole)
		) {
			return vec![];
		}

		let lt = state.lt + 1;
		let Some(account) = state.accounts.get_mut(&destination) else {
			return vec![];
		};
		account.balance = (account.balance + message.amount.nano()).saturating_sub(STORAGE_FEE);

		let mut gas_fee = 0;
		let (compute_phase, result) = match account.code.as_mut() {
			_ if message.bounced => (vm(true, ExitCode::SUCCESS, 0), Ok(vec![])),
			None => (ComputePhase::Skipped(ComputeSkipReason::NoState), Err(ExitCode::SUCCESS)),
			Some(code) => {
				gas_fee = code.gas_fee();
				match code.execute(message.src, message.body.as_ref()) {
					Ok(emitted) => (vm(true, ExitCode::SUCCESS, gas_fee), Ok(emitted)),
					Err(exit_code) => (vm(false, exit_code, gas_fee), Err(exit_code)),
				}
			},
		};
		account.balance = account.balance.saturating_sub(gas_fee);

		let mut out_msgs = vec![];
		let mut action_phase = None;
		let mut bounce_phase = None;
		let mut action_fee = 0;
		match result {
			Ok(emitted) if !emitted.is_empty() => {
				action_fee = ACTION_FEE;
				let debit = emitted.len() as u128 * (FORWARD_VALUE + FWD_FEE) + ACTION_FEE;
				let funded = account.balance >= debit;
				if funded {
					account.balance -= debit;
					for (index, (target, op)) in emitted.iter().enumerate() {
						out_msgs.push(InternalMessage {
							ihr_disabled: true,
							bounce: true,
							bounced: false,
							src: destination,
							dst: *target,
							amount: Coins(FORWARD_VALUE),
							ihr_fee: Coins::ZERO,
							fwd_fee: Coins(FWD_FEE),
							created_lt: lt + 1 + index as u64,
							created_at: unix_now(),
							state_init: None,
							body: Some(op.cell()),
						});
					}
				} else {
					account.balance = account.balance.saturating_sub(ACTION_FEE);
				}
				action_phase = Some(ActionPhase {
					success: funded,
					result_code: if funded { 0 } else { ExitCode::NOT_ENOUGH_TONCOIN.code() },
					total_fwd_fees: Some(Coins(FWD_FEE * out_msgs.len() as u128)),
					total_action_fees: Some(Coins(ACTION_FEE)),
					total_actions: emitted.len() as u16,
				});
			},
			Ok(_) => {},
			Err(_) if message.bounce => {
				let refund = message.amount.nano().saturating_sub(gas_fee + FWD_FEE);
				account.balance = account.balance.saturating_sub(refund);
				out_msgs.push(InternalMessage {
					ihr_disabled: true,
					bounce: false,
					bounced: true,
					src: destination,
					dst: message.src,
					amount: Coins(refund),
					ihr_fee: Coins::ZERO,
					fwd_fee: Coins(FWD_FEE),
					created_lt: lt + 1,
					created_at: unix_now(),
					state_init: None,
					body: None,
				});
				bounce_phase = Some(BouncePhase::Ok {
					msg_fees: Coins::ZERO,
					fwd_fees: Coins(FWD_FEE),
				});
			},
			Err(_) => {},
		}

		let lt = state.next_lt(out_msgs.len());
		let transaction = Transaction {
			account: destination,
			lt,
			hash: transaction_hash(&destination, lt),
			prev_lt,
			now: unix_now(),
			in_msg: Some(Message::Internal(message)),
			out_msgs: out_msgs.iter().cloned().map(Message::Internal).collect(),
			total_fees: Coins(STORAGE_FEE + gas_fee + action_fee),
			description: TransactionDescription::Ordinary(OrdinaryDescription {
				credit_first: true,
				storage_phase: Some(StoragePhase {
					storage_fees_collected: Coins(STORAGE_FEE),
				}),
				compute_phase,
				action_phase,
				bounce_phase,
				aborted: false,
				destroyed: false,
			}),
		};
		state.commit(transaction);
		out_msgs
	}
}

fn vm(success: bool, exit_code: ExitCode, gas_fee: u128) -> ComputePhase {
	ComputePhase::Vm(ComputePhaseVm {
		success,
		exit_code: exit_code.code(),
		gas_fees: Coins(gas_fee),
		gas_used: (gas_fee / 1_000) as u64,
	})
}

fn transaction_hash(account: &Address, lt: u64) -> [u8; 32] {
	let mut hash = account.hash;
	for (byte, lt_byte) in hash.iter_mut().zip(lt.to_be_bytes()) {
		*byte ^= lt_byte;
	}
	hash
}

#[async_trait]
impl NodeClient for SimChain {
	async fn current_masterchain_info(&self) -> Result<BlockId, ClientError> {
		Ok(BlockId::masterchain(self.state().seqno))
	}

	async fn get_block_data(&self, block: BlockId) -> Result<BlockData, ClientError> {
		if block.seqno > self.state().seqno {
			return Err(ClientError::BlockNotFound(block));
		}
		Ok(BlockData {
			global_id: self.global_id,
			gen_utime: unix_now(),
			root_hash: [block.seqno as u8; 32],
		})
	}

	async fn get_account(&self, _block: BlockId, address: Address) -> Result<Account, ClientError> {
		let state = self.state();
		Ok(Account {
			address,
			state: state.accounts.get(&address).map(|account| AccountState {
				is_active: account.code.is_some(),
				balance: Coins(account.balance),
				last_lt: account.last_lt,
				code: None,
				data: None,
			}),
		})
	}

	async fn run_get_method(
		&self,
		_block: BlockId,
		address: Address,
		method: String,
		_params: Vec<StackEntry>,
	) -> Result<Vec<StackEntry>, ClientError> {
		self.state()
			.accounts
			.get(&address)
			.and_then(|account| account.code.as_ref()?.get(&method))
			.map(|value| vec![StackEntry::Int(value.into())])
			.ok_or_else(|| {
				ClientError::request("run_get_method", format!("{method} failed on {address}"))
			})
	}

	async fn subscribe_on_transactions(
		&self,
		address: Address,
		from_lt: u64,
		sink: mpsc::Sender<Transaction>,
		shutdown: CancellationToken,
	) -> Result<(), ClientError> {
		let mut next_lt = from_lt;
		loop {
			let committed = self.committed.notified();
			tokio::pin!(committed);
			committed.as_mut().enable();

			let pending = self
				.transactions(address)
				.into_iter()
				.filter(|transaction| transaction.lt >= next_lt)
				.collect::<Vec<_>>();
			for transaction in pending {
				next_lt = transaction.lt + 1;
				if sink.send(transaction).await.is_err() {
					return Ok(());
				}
			}

			tokio::select! {
				_ = shutdown.cancelled() => return Ok(()),
				_ = sink.closed() => return Ok(()),
				_ = committed => {},
			}
		}
	}

	async fn wait_for_block(&self, seqno: u32) -> Result<(), ClientError> {
		let mut state = self.state();
		state.seqno = state.seqno.max(seqno);
		Ok(())
	}
}

/// Wallet account of a [`SimChain`], signing through the key store when it has one.
#[derive(Clone)]
pub struct SimWallet {
	chain: SimChain,
	address: Address,
	keystore: Option<Arc<dyn Keystore>>,
}

#[async_trait]
impl Wallet for SimWallet {
	fn address(&self) -> Address {
		self.address
	}

	fn public_key(&self) -> String {
		hex::encode(self.address.hash)
	}

	async fn send_wait_transaction(
		&self,
		message: WalletMessage,
	) -> Result<(Transaction, BlockId), WalletError> {
		if let Some(keystore) = &self.keystore {
			let payload = message
				.body
				.as_ref()
				.map(|body| body.as_bytes().to_vec())
				.unwrap_or_default();
			keystore.sign(self.public_key(), payload).await?;
		}
		self.chain.send_external(self.address, message)
	}
}

/// Connects endpoints to chains by URL.
#[derive(Clone, Default)]
pub struct SimConnector {
	chains: HashMap<String, SimChain>,
}

impl SimConnector {
	pub fn with(mut self, url: &str, chain: SimChain) -> Self {
		self.chains.insert(url.to_string(), chain);
		self
	}
}

#[async_trait]
impl Connector for SimConnector {
	type Client = SimChain;

	async fn connect(&self, endpoint: &Endpoint) -> Result<SimChain, ClientError> {
		self.chains
			.get(&endpoint.url)
			.cloned()
			.ok_or_else(|| ClientError::Connection {
				url: endpoint.url.clone(),
				reason: "connection refused".to_string(),
			})
	}
}

pub struct SimWalletFactory;

#[async_trait]
impl WalletFactory<SimChain> for SimWalletFactory {
	type Wallet = SimWallet;

	async fn wallet(
		&self,
		client: Arc<SimChain>,
		public_key: String,
		keystore: Arc<dyn Keystore>,
	) -> Result<SimWallet, WalletError> {
		let address = client
			.wallet_address(&public_key)
			.ok_or(KeystoreError::KeyNotFound(public_key))?;
		Ok(SimWallet {
			chain: client.as_ref().clone(),
			address,
			keystore: Some(keystore),
		})
	}
}

/// Node serving a fixed set of transactions.
#[derive(Default)]
pub struct StaticNode {
	transactions: Mutex<Vec<Transaction>>,
}

impl StaticNode {
	pub fn push(&self, transaction: Transaction) {
		self.transactions.lock().unwrap().push(transaction);
	}
}

#[async_trait]
impl NodeClient for StaticNode {
	async fn current_masterchain_info(&self) -> Result<BlockId, ClientError> {
		Ok(BlockId::masterchain(1))
	}

	async fn get_block_data(&self, block: BlockId) -> Result<BlockData, ClientError> {
		Err(ClientError::BlockNotFound(block))
	}

	async fn get_account(&self, _block: BlockId, address: Address) -> Result<Account, ClientError> {
		Ok(Account {
			address,
			state: None,
		})
	}

	async fn run_get_method(
		&self,
		_block: BlockId,
		_address: Address,
		method: String,
		_params: Vec<StackEntry>,
	) -> Result<Vec<StackEntry>, ClientError> {
		Err(ClientError::request(&method, "no state"))
	}

	async fn subscribe_on_transactions(
		&self,
		address: Address,
		from_lt: u64,
		sink: mpsc::Sender<Transaction>,
		shutdown: CancellationToken,
	) -> Result<(), ClientError> {
		let mut matching = self
			.transactions
			.lock()
			.unwrap()
			.iter()
			.filter(|transaction| transaction.account == address && transaction.lt >= from_lt)
			.cloned()
			.collect::<Vec<_>>();
		matching.sort_by_key(|transaction| transaction.lt);

		for transaction in matching {
			if sink.send(transaction).await.is_err() {
				return Ok(());
			}
		}
		tokio::select! {
			_ = shutdown.cancelled() => {},
			_ = sink.closed() => {},
		}
		Ok(())
	}

	async fn wait_for_block(&self, _seqno: u32) -> Result<(), ClientError> {
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use test_case::test_case;

	#[test_case(Op::Store { memory: Address::new(0, [3; 32]), value: -2 } ; "store")]
	#[test_case(Op::PriceReply { key: 7, price: 100 } ; "price reply")]
	#[test_case(Op::SetCounter { counter: Address::new(-1, [9; 32]), value: 1 } ; "set counter")]
	#[test_case(Op::Commit ; "commit")]
	fn op_survives_cell_encoding(op: Op) {
		assert_eq!(Op::decode(&op.cell()), Some(op));
	}

	#[test]
	fn foreign_body_is_not_an_op() {
		assert_eq!(Op::decode(&Cell::new(vec![1, 2, 3, 4, 0, 0, 0, 1])), None);
		assert_eq!(Op::decode(&Cell::new(BOC_MAGIC.to_vec())), None);
	}

	#[tokio::test]
	async fn wallet_without_funds_fails_action_phase() {
		let chain = SimChain::new(0);
		let wallet = chain.wallet(1_000);
		let bob = chain.deploy(Contract::Plain, 0);

		let (transaction, _) = wallet
			.send_wait_transaction(WalletMessage {
				mode: SendMode::PAY_FEES_SEPARATELY,
				destination: bob,
				amount: Coins(1),
				bounce: false,
				ihr_disabled: true,
				created_at: 0,
				state_init: None,
				body: None,
			})
			.await
			.unwrap();
		assert!(transaction.out_msgs.is_empty());
		assert_eq!(chain.balance(wallet.address()), Coins::ZERO);
	}
}
