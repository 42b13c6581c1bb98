//! Transaction manager: queues wallet messages, broadcasts them and tracks
//! their traces until they finalize or expire.

use futures::future::join_all;
use std::{collections::HashMap, sync::Arc};
use thiserror::Error;
use tokio::{
	sync::{
		mpsc::{self, error::TrySendError},
		Mutex, RwLock,
	},
	task::JoinHandle,
	time::{self, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
	network::NodeClient,
	tracetracking::{wait_for_trace, MsgStatus, SignedClient, TrackError},
	types::Address,
	utils::{spawn_in_span, unix_now, with_jitter},
	wallet::{Keystore, KeystoreError, Wallet, WalletMessage},
};

pub mod configuration;
pub mod request;
pub mod store;

use configuration::{TxmConfig, TxmConfigError};
use request::{Request, RequestId, RequestState};
use store::{AccountStore, TransactionStatus, TxState, TxStore, UnconfirmedTx};

const SERVICE_NAME: &str = "TxManager";

#[derive(Debug, Error)]
pub enum EnqueueError {
	#[error("Broadcast channel is full")]
	ChannelFull,
	#[error("Transaction manager is closed")]
	Closed,
	#[error("Wallet {0} is not present in the key store")]
	UnknownWallet(String),
	#[error("Request sender {0} is not the manager wallet")]
	UnknownSender(Address),
	#[error("Cannot verify the signing key")]
	Signing(#[from] KeystoreError),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
	#[error("{0} is not started")]
	NotStarted(&'static str),
	#[error("{0} is stopped")]
	Stopped(&'static str),
	#[error("{0} loop exited unexpectedly")]
	LoopExited(&'static str),
}

struct Queued {
	id: RequestId,
	request: Arc<Request>,
}

enum Lifecycle {
	Idle,
	Running {
		shutdown: CancellationToken,
		broadcast: JoinHandle<()>,
		confirm: JoinHandle<()>,
	},
	Closed,
}

struct TrackedRequest {
	state: RequestState,
	updated_at: Instant,
}

struct Shared<C: NodeClient, W: Wallet> {
	config: TxmConfig,
	keystore: Arc<dyn Keystore>,
	client: SignedClient<C, W>,
	accounts: AccountStore,
	requests: RwLock<HashMap<RequestId, TrackedRequest>>,
}

pub struct TxManager<C: NodeClient, W: Wallet> {
	shared: Arc<Shared<C, W>>,
	sender: mpsc::Sender<Queued>,
	receiver: Mutex<Option<mpsc::Receiver<Queued>>>,
	lifecycle: Mutex<Lifecycle>,
}

impl<C: NodeClient, W: Wallet> TxManager<C, W> {
	pub fn new(
		config: TxmConfig,
		keystore: Arc<dyn Keystore>,
		client: SignedClient<C, W>,
	) -> Result<Self, TxmConfigError> {
		config.validate()?;
		let (sender, receiver) = mpsc::channel(config.broadcast_chan_size);
		Ok(Self {
			shared: Arc::new(Shared {
				config,
				keystore,
				client,
				accounts: AccountStore::default(),
				requests: RwLock::new(HashMap::new()),
			}),
			sender,
			receiver: Mutex::new(Some(receiver)),
			lifecycle: Mutex::new(Lifecycle::Idle),
		})
	}

	pub fn accounts(&self) -> &AccountStore {
		&self.shared.accounts
	}

	pub fn client(&self) -> &SignedClient<C, W> {
		&self.shared.client
	}

	/// Queues `request` for broadcast without waiting for it. Simulated
	/// requests go through the same checks and are never queued.
	pub async fn enqueue(&self, request: Request) -> Result<RequestId, EnqueueError> {
		if matches!(*self.lifecycle.lock().await, Lifecycle::Closed) {
			return Err(EnqueueError::Closed);
		}

		let wallet = self.shared.client.wallet();
		if request.from != wallet.address() {
			return Err(EnqueueError::UnknownSender(request.from));
		}
		let public_key = wallet.public_key();
		if !self.shared.keystore.accounts().await?.contains(&public_key) {
			return Err(EnqueueError::UnknownWallet(public_key));
		}

		let id = Uuid::new_v4();
		if request.simulate {
			debug!(%id, destination = %request.destination, "Simulated request accepted");
			return Ok(id);
		}

		let queued = Queued {
			id,
			request: Arc::new(request),
		};
		// Registered first so the broadcast loop never overwrites a later state.
		self.shared.set_request(id, RequestState::Pending).await;
		if let Err(error) = self.sender.try_send(queued) {
			self.shared.requests.write().await.remove(&id);
			return Err(match error {
				TrySendError::Full(_) => EnqueueError::ChannelFull,
				TrySendError::Closed(_) => EnqueueError::Closed,
			});
		}
		debug!(%id, "Request queued");
		Ok(id)
	}

	/// Number of queued requests and of broadcast transactions awaiting their trace.
	pub async fn inflight(&self) -> (usize, usize) {
		let queued = self.sender.max_capacity() - self.sender.capacity();
		(queued, self.shared.accounts.total_inflight().await)
	}

	/// Status of the transaction the wallet committed at `lt`.
	pub async fn get_transaction_status(&self, lt: u64) -> Option<TxState> {
		self.shared.accounts.tx_state(lt).await
	}

	pub async fn request_status(&self, id: &RequestId) -> Option<TransactionStatus> {
		let state = self.request_state(id).await?;
		match state {
			RequestState::Pending => Some(TransactionStatus::Pending),
			RequestState::Fatal { .. } => Some(TransactionStatus::Fatal),
			RequestState::Broadcast { lt, .. } => self
				.get_transaction_status(lt)
				.await
				.map(|state| state.status),
		}
	}

	pub async fn request_state(&self, id: &RequestId) -> Option<RequestState> {
		self.shared
			.requests
			.read()
			.await
			.get(id)
			.map(|tracked| tracked.state.clone())
	}

	/// Starts the broadcast and confirmation loops. Starting a running manager
	/// is a no-op; a closed manager cannot be restarted.
	pub async fn start(&self, shutdown: &CancellationToken) -> Result<(), ServiceError> {
		let mut lifecycle = self.lifecycle.lock().await;
		match *lifecycle {
			Lifecycle::Running { .. } => return Ok(()),
			Lifecycle::Closed => return Err(ServiceError::Stopped(SERVICE_NAME)),
			Lifecycle::Idle => {},
		}

		let receiver = self
			.receiver
			.lock()
			.await
			.take()
			.ok_or(ServiceError::Stopped(SERVICE_NAME))?;
		let shutdown = shutdown.child_token();

		info!("Starting transaction manager...");
		let broadcast = spawn_in_span(broadcast_loop(
			self.shared.clone(),
			receiver,
			shutdown.clone(),
		));
		let confirm = spawn_in_span(confirm_loop(self.shared.clone(), shutdown.clone()));

		*lifecycle = Lifecycle::Running {
			shutdown,
			broadcast,
			confirm,
		};
		Ok(())
	}

	/// Stops both loops and waits for them. Requests still queued are failed.
	pub async fn close(&self) -> Result<(), ServiceError> {
		let mut lifecycle = self.lifecycle.lock().await;
		match std::mem::replace(&mut *lifecycle, Lifecycle::Closed) {
			Lifecycle::Closed => {},
			Lifecycle::Idle => {
				if let Some(receiver) = self.receiver.lock().await.take() {
					self.shared.drain(receiver).await;
				}
			},
			Lifecycle::Running {
				shutdown,
				broadcast,
				confirm,
			} => {
				shutdown.cancel();
				for (name, handle) in [("broadcast", broadcast), ("confirmation", confirm)] {
					if let Err(error) = handle.await {
						error!(%error, "Transaction manager {name} loop panicked");
					}
				}
				info!("Transaction manager stopped");
			},
		}
		Ok(())
	}

	pub async fn ready(&self) -> Result<(), ServiceError> {
		match &*self.lifecycle.lock().await {
			Lifecycle::Idle => Err(ServiceError::NotStarted(SERVICE_NAME)),
			Lifecycle::Closed => Err(ServiceError::Stopped(SERVICE_NAME)),
			Lifecycle::Running {
				broadcast, confirm, ..
			} => {
				if broadcast.is_finished() || confirm.is_finished() {
					Err(ServiceError::LoopExited(SERVICE_NAME))
				} else {
					Ok(())
				}
			},
		}
	}

	pub async fn health_report(&self) -> HashMap<String, Result<(), ServiceError>> {
		HashMap::from([(SERVICE_NAME.to_string(), self.ready().await)])
	}
}

impl<C: NodeClient, W: Wallet> Shared<C, W> {
	async fn set_request(&self, id: RequestId, state: RequestState) {
		let tracked = TrackedRequest {
			state,
			updated_at: Instant::now(),
		};
		self.requests.write().await.insert(id, tracked);
	}

	async fn fail_request(&self, id: RequestId, cause: String) {
		self.set_request(id, RequestState::Fatal { cause }).await;
	}

	async fn broadcast(&self, queued: Queued, shutdown: &CancellationToken) {
		let Queued { id, request } = queued;
		// Expiry counts from broadcast.
		let expires_at = Instant::now() + self.config.tx_expiration();
		let message = WalletMessage {
			mode: request.mode,
			destination: request.destination,
			amount: request.amount,
			bounce: request.bounce,
			ihr_disabled: true,
			created_at: unix_now(),
			state_init: request.state_init.clone(),
			body: request.body.clone(),
		};

		let result = tokio::select! {
			biased;
			_ = shutdown.cancelled() => {
				self.fail_request(id, "Cancelled during broadcast".to_string()).await;
				return;
			},
			result = self.client.send_wait_one(message) => result,
		};

		let root = match result {
			Ok((root, _)) => root,
			Err(error) => {
				error!(%id, destination = %request.destination, %error, "Broadcast failed, dropping request");
				self.fail_request(id, error.to_string()).await;
				return;
			},
		};

		let (account, lt) = (root.account, root.lt);
		let store = self.accounts.get_store(&account).await;
		let tx = UnconfirmedTx::new(lt, id, request.clone(), expires_at, root);
		if let Err(error) = store.add_unconfirmed(tx).await {
			error!(%id, %account, lt, %error, "Cannot track broadcast transaction");
			self.fail_request(id, error.to_string()).await;
			return;
		}

		info!(%id, %account, lt, destination = %request.destination, "Transaction broadcast");
		self.set_request(id, RequestState::Broadcast { account, lt })
			.await;
	}

	async fn drain(&self, mut receiver: mpsc::Receiver<Queued>) {
		receiver.close();
		while let Ok(queued) = receiver.try_recv() {
			warn!(id = %queued.id, "Transaction manager closed before broadcast");
			self.fail_request(queued.id, "Closed before broadcast".to_string())
				.await;
		}
	}

	/// Advances every unconfirmed trace until `deadline`, confirming the
	/// finalized ones and evicting the expired ones.
	async fn confirm_tick(&self, deadline: Instant, shutdown: &CancellationToken) {
		let snapshot = self.accounts.snapshot_all_unconfirmed().await;
		let mut tracking = vec![];
		for (account, unconfirmed) in snapshot {
			let Some(store) = self.accounts.store(&account).await else {
				continue;
			};
			for tx in unconfirmed {
				tracking.push(self.confirm_one(store.clone(), tx, deadline, shutdown));
			}
		}
		debug!(unconfirmed = tracking.len(), "Confirmation tick");
		join_all(tracking).await;
		self.prune().await;
	}

	/// Forgets transactions and fatal requests resolved longer than the
	/// retention period ago.
	async fn prune(&self) {
		let Some(cutoff) = Instant::now().checked_sub(self.config.finalized_retention()) else {
			return;
		};
		let pruned = self.accounts.prune_finalized(cutoff).await;
		let mut requests = self.requests.write().await;
		let before = requests.len();
		for id in &pruned {
			requests.remove(id);
		}
		requests.retain(|_, tracked| {
			!matches!(tracked.state, RequestState::Fatal { .. }) || tracked.updated_at > cutoff
		});
		if requests.len() < before {
			debug!(pruned = before - requests.len(), "Pruned resolved requests");
		}
	}

	async fn confirm_one(
		&self,
		store: Arc<TxStore>,
		tx: Arc<UnconfirmedTx>,
		deadline: Instant,
		shutdown: &CancellationToken,
	) {
		let lt = tx.lt;
		let mut root = tx.root().await;
		let tracked = time::timeout_at(
			deadline,
			wait_for_trace(self.client.client().as_ref(), &mut root, shutdown),
		)
		.await;
		let finalized = root.trace_status() == MsgStatus::Finalized;
		tx.set_root(root).await;

		match tracked {
			Ok(Ok(())) if finalized => {
				match store.confirm(lt).await {
					Ok(confirmed) => info!(
						id = %confirmed.id,
						lt,
						status = %confirmed.status(),
						exit_code = %confirmed.exit_code,
						"Transaction trace finalized"
					),
					Err(error) => error!(lt, %error, "Cannot confirm transaction"),
				}
				return;
			},
			Ok(Ok(())) => {},
			Ok(Err(TrackError::Cancelled)) => return,
			Ok(Err(error)) => warn!(lt, %error, "Trace tracking failed, retrying next tick"),
			Err(_) => debug!(lt, "Trace not finalized in this tick"),
		}

		if tx.is_expired(Instant::now()) {
			match store.expire(lt).await {
				Ok(expired) => warn!(id = %expired.id, lt, "Transaction expired before its trace finalized"),
				Err(error) => error!(lt, %error, "Cannot expire transaction"),
			}
		}
	}
}

async fn broadcast_loop<C: NodeClient, W: Wallet>(
	shared: Arc<Shared<C, W>>,
	mut receiver: mpsc::Receiver<Queued>,
	shutdown: CancellationToken,
) {
	info!("Starting broadcast loop...");
	loop {
		tokio::select! {
			biased;
			_ = shutdown.cancelled() => break,
			queued = receiver.recv() => match queued {
				Some(queued) => shared.broadcast(queued, &shutdown).await,
				None => break,
			},
		}
	}
	shared.drain(receiver).await;
	info!("Broadcast loop stopped");
}

async fn confirm_loop<C: NodeClient, W: Wallet>(
	shared: Arc<Shared<C, W>>,
	shutdown: CancellationToken,
) {
	info!("Starting confirmation loop...");
	let interval = shared.config.confirm_poll_interval();
	loop {
		let started = Instant::now();
		shared.confirm_tick(started + interval, &shutdown).await;

		let delay = with_jitter(interval).saturating_sub(started.elapsed());
		tokio::select! {
			biased;
			_ = shutdown.cancelled() => break,
			_ = time::sleep(delay) => {},
		}
	}
	info!("Confirmation loop stopped");
}
