//! Relayer surface of a single chain, delegating to the node client pool and
//! the transaction manager.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use color_eyre::{
	eyre::{eyre, WrapErr},
	Result,
};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, future::Future, sync::Arc};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
	config::{ConfigError, TomlConfig},
	network::{
		pool::{ClientPool, Connector},
		BlockData, ClientError, NodeClient,
	},
	tracetracking::SignedClient,
	tvm::ExitCode,
	txm::{
		request::{Request, RequestId, RequestState},
		store::TransactionStatus,
		ServiceError, TxManager,
	},
	types::{Address, BlockId, Cell, Coins},
	wallet::{Keystore, SendMode, Wallet, WalletFactory},
};

pub const FAMILY_NAME: &str = "ton";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Head {
	pub height: String,
	pub hash: String,
	pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainInfo {
	pub family_name: String,
	pub chain_id: String,
	pub network_name: String,
	pub network_name_full: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainStatus {
	pub id: String,
	pub enabled: bool,
	pub config: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
	pub chain_id: String,
	pub name: String,
	pub config: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatusPage {
	pub statuses: Vec<NodeStatus>,
	/// Empty on the last page.
	pub next_page_token: String,
	pub total: usize,
}

/// Message submitted through `send_tx`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxMessage {
	/// Sending wallet, the chain signer when not set.
	pub from: Option<String>,
	pub to_address: String,
	/// Decimal coins, e.g. "1.5".
	pub amount: String,
	/// Serialized bag of cells, may be empty.
	pub body: Vec<u8>,
	/// Serialized bag of cells, may be empty.
	pub state_init: Vec<u8>,
	pub mode: u8,
	pub bounce: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestStatus {
	pub status: TransactionStatus,
	/// Carries the LT once broadcast and the cause of a fatal broadcast.
	pub state: RequestState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
	Idle,
	Started,
	Closed,
}

pub struct Chain<N: Connector, F: WalletFactory<N::Client>> {
	config: TomlConfig,
	chain_id: i32,
	pool: ClientPool<N>,
	txm: TxManager<N::Client, F::Wallet>,
	state: Mutex<State>,
}

impl<N: Connector, F: WalletFactory<N::Client>> Chain<N, F> {
	/// Builds the chain with the first key store account as its signer.
	pub async fn new(
		config: TomlConfig,
		connector: N,
		factory: F,
		keystore: Arc<dyn Keystore>,
	) -> Result<Self> {
		if !config.is_enabled() {
			return Err(ConfigError::Disabled)
				.wrap_err_with(|| format!("Cannot create chain {}", config.chain_id));
		}
		config.validate()?;
		let chain_id = config.chain_id_i32()?;

		let accounts = keystore
			.accounts()
			.await
			.wrap_err("Failed to fetch accounts from key store")?;
		let public_key = accounts
			.first()
			.cloned()
			.ok_or_else(|| eyre!("No account available in key store"))?;

		let pool = ClientPool::new(connector, config.endpoints(), chain_id, config.client_ttl);
		let client = pool
			.get_client()
			.await
			.wrap_err_with(|| format!("Failed to create client for chain {chain_id}"))?;
		let wallet = factory
			.wallet(client.clone(), public_key, keystore.clone())
			.await
			.wrap_err_with(|| format!("Failed to get signer wallet for chain {chain_id}"))?;
		info!(chain_id, wallet = %wallet.address(), "Signer wallet loaded");

		let signed_client = SignedClient::new(client, Arc::new(wallet));
		let txm = TxManager::new(config.transaction_manager.clone(), keystore, signed_client)?;

		Ok(Self {
			config,
			chain_id,
			pool,
			txm,
			state: Mutex::new(State::Idle),
		})
	}

	pub fn id(&self) -> &str {
		&self.config.chain_id
	}

	pub fn name(&self) -> String {
		format!("Chain.{}", self.chain_id)
	}

	pub fn tx_manager(&self) -> &TxManager<N::Client, F::Wallet> {
		&self.txm
	}

	pub async fn start(&self, shutdown: &CancellationToken) -> Result<()> {
		let mut state = self.state.lock().await;
		match *state {
			State::Started => return Ok(()),
			State::Closed => return Err(ServiceError::Stopped("Chain").into()),
			State::Idle => {},
		}
		debug!(chain_id = self.chain_id, "Starting chain");
		self.txm.start(shutdown).await?;
		*state = State::Started;
		Ok(())
	}

	pub async fn close(&self) -> Result<()> {
		let mut state = self.state.lock().await;
		if *state == State::Closed {
			return Ok(());
		}
		debug!(chain_id = self.chain_id, "Stopping chain");
		self.txm.close().await?;
		*state = State::Closed;
		Ok(())
	}

	async fn healthy(&self) -> Result<(), ServiceError> {
		match *self.state.lock().await {
			State::Idle => Err(ServiceError::NotStarted("Chain")),
			State::Started => Ok(()),
			State::Closed => Err(ServiceError::Stopped("Chain")),
		}
	}

	pub async fn ready(&self) -> Result<(), ServiceError> {
		self.healthy().await?;
		self.txm.ready().await
	}

	pub async fn health_report(&self) -> HashMap<String, Result<(), ServiceError>> {
		let mut report = HashMap::from([(self.name(), self.healthy().await)]);
		report.extend(self.txm.health_report().await);
		report
	}

	/// Runs `call` on a pooled client, dropping the client from the pool when the call fails.
	async fn with_client<T, Fut>(
		&self,
		method: &str,
		call: impl FnOnce(Arc<N::Client>) -> Fut,
	) -> Result<T>
	where
		Fut: Future<Output = Result<T, ClientError>>,
	{
		let client = self
			.pool
			.get_client()
			.await
			.wrap_err_with(|| format!("Failed to get client for chain {}", self.chain_id))?;
		match call(client.clone()).await {
			Ok(value) => Ok(value),
			Err(error) => {
				warn!(chain_id = self.chain_id, method, %error, "Node call failed, dropping client");
				self.pool.invalidate(&client).await;
				Err(error).wrap_err_with(|| format!("{method} failed for chain {}", self.chain_id))
			},
		}
	}

	pub async fn latest_head(&self) -> Result<Head> {
		let (block, data) = self
			.with_client("latest_head", |client| async move {
				let block = client.current_masterchain_info().await?;
				let data = client.get_block_data(block).await?;
				Ok::<_, ClientError>((block, data))
			})
			.await?;
		Ok(Head {
			height: block.seqno.to_string(),
			hash: hex::encode(data.root_hash),
			timestamp: data.gen_utime.into(),
		})
	}

	pub fn get_chain_info(&self) -> ChainInfo {
		ChainInfo {
			family_name: FAMILY_NAME.to_string(),
			chain_id: self.config.chain_id.clone(),
			network_name: self.config.network_name(),
			network_name_full: self.config.network_name_full(),
		}
	}

	pub fn get_chain_status(&self) -> Result<ChainStatus> {
		Ok(ChainStatus {
			id: self.config.chain_id.clone(),
			enabled: self.config.is_enabled(),
			config: self.config.to_toml_string()?,
		})
	}

	/// Pages through the configured nodes. Page tokens are opaque node offsets
	/// and a page size of zero returns every remaining node.
	pub fn list_node_statuses(&self, page_size: usize, page_token: &str) -> Result<NodeStatusPage> {
		let total = self.config.nodes.len();
		let start = if page_token.is_empty() {
			0
		} else {
			decode_page_token(page_token)?
		};
		if start >= total {
			return Err(eyre!("Page token {page_token:?} is out of range, {total} nodes configured"));
		}
		let end = match page_size {
			0 => total,
			size => start.saturating_add(size).min(total),
		};

		let statuses = self.config.nodes[start..end]
			.iter()
			.map(|node| {
				Ok(NodeStatus {
					chain_id: self.config.chain_id.clone(),
					name: node.name.clone().unwrap_or_default(),
					config: toml::to_string(node).wrap_err("Failed to render node config")?,
				})
			})
			.collect::<Result<Vec<_>>>()?;
		let next_page_token = if end < total {
			STANDARD.encode(end.to_string())
		} else {
			String::new()
		};

		Ok(NodeStatusPage {
			statuses,
			next_page_token,
			total,
		})
	}

	pub async fn transact(&self, from: &str, to: &str, amount: Coins, balance_check: bool) -> Result<()> {
		debug!(from, to, %amount, balance_check, "Transact requested");
		Err(eyre!("Transact is not supported on chain {}", self.chain_id))
	}

	/// Queues a wallet message. Insufficient balance is not checked here, it
	/// surfaces as a failed transaction after broadcast.
	pub async fn send_tx(&self, message: TxMessage) -> Result<RequestId> {
		let from = match &message.from {
			Some(from) => from
				.parse::<Address>()
				.wrap_err_with(|| format!("Failed parsing from address {from}"))?,
			None => self.txm.client().wallet().address(),
		};
		let destination = message
			.to_address
			.parse::<Address>()
			.wrap_err_with(|| format!("Failed parsing to address {}", message.to_address))?;
		let amount = message
			.amount
			.parse::<Coins>()
			.wrap_err_with(|| format!("Failed parsing amount {}", message.amount))?;
		let body = Cell::from_boc(&message.body).wrap_err("Failed parsing body")?;
		let state_init = Cell::from_boc(&message.state_init).wrap_err("Failed parsing state init")?;

		let request = Request {
			from,
			destination,
			amount,
			body,
			state_init,
			mode: SendMode(message.mode),
			bounce: message.bounce,
			simulate: false,
		};
		self.txm
			.enqueue(request)
			.await
			.wrap_err_with(|| format!("Failed to enqueue message to {destination}"))
	}

	/// Status of a request returned by `send_tx`, including the states that
	/// have no LT yet or never get one.
	pub async fn get_request_status(&self, id: &RequestId) -> Result<RequestStatus> {
		let state = self
			.txm
			.request_state(id)
			.await
			.ok_or_else(|| eyre!("No request with id {id}"))?;
		let status = self
			.txm
			.request_status(id)
			.await
			.ok_or_else(|| eyre!("Request {id} has no tracked transaction"))?;
		Ok(RequestStatus { status, state })
	}

	pub async fn get_tx_status(&self, lt: u64) -> Result<(TransactionStatus, ExitCode)> {
		let state = self
			.txm
			.get_transaction_status(lt)
			.await
			.ok_or_else(|| eyre!("No transaction with LT {lt}"))?;
		Ok((state.status, state.exit_code))
	}

	/// Action phase fees of the wallet transaction, once its trace is resolved.
	pub async fn get_tx_execution_fees(&self, lt: u64) -> Result<Coins> {
		let state = self
			.txm
			.get_transaction_status(lt)
			.await
			.ok_or_else(|| eyre!("No transaction with LT {lt}"))?;
		match state.status {
			TransactionStatus::Finalized | TransactionStatus::Failed => Ok(state.action_fees),
			status => Err(eyre!("Transaction with LT {lt} is not finalized, status {status}")),
		}
	}

	pub async fn get_masterchain_info(&self) -> Result<BlockId> {
		self.with_client("get_masterchain_info", |client| async move {
			client.current_masterchain_info().await
		})
		.await
	}

	pub async fn get_block_data(&self, block: BlockId) -> Result<BlockData> {
		self.with_client("get_block_data", |client| async move {
			client.get_block_data(block).await
		})
		.await
	}

	/// Balance of `address` at `block`, zero for accounts without state.
	pub async fn get_account_balance(&self, address: &str, block: BlockId) -> Result<Coins> {
		let address = address
			.parse::<Address>()
			.wrap_err_with(|| format!("Failed parsing address {address}"))?;
		let account = self
			.with_client("get_account", |client| async move {
				client.get_account(block, address).await
			})
			.await?;
		Ok(account.balance())
	}
}

fn decode_page_token(token: &str) -> Result<usize> {
	let decoded = STANDARD
		.decode(token)
		.wrap_err_with(|| format!("Invalid page token {token:?}"))?;
	String::from_utf8(decoded)
		.wrap_err_with(|| format!("Invalid page token {token:?}"))?
		.parse()
		.wrap_err_with(|| format!("Invalid page token {token:?}"))
}
