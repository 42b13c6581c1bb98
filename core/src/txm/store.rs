use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc};
use strum::Display;
use thiserror::Error;
use tokio::{sync::RwLock, time::Instant};

use super::request::{Request, RequestId};
use crate::{
	tracetracking::{MsgStatus, ReceivedMessage},
	tvm::ExitCode,
	types::{Address, Coins},
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
	#[error("Transaction with LT {0} already exists")]
	AlreadyExists(u64),
	#[error("Unconfirmed transaction with LT {0} not found")]
	NotFound(u64),
}

/// Externally reported status of a submitted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
pub enum TransactionStatus {
	/// Queued, broadcast not complete.
	Pending,
	/// Broadcast, trace not finalized yet.
	Unconfirmed,
	/// Trace finalized and every receipt succeeded.
	Finalized,
	/// Trace finalized with a failed receipt, or expired.
	Failed,
	/// Broadcast failed.
	Fatal,
}

/// Snapshot of a stored transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxState {
	pub status: TransactionStatus,
	pub exit_code: ExitCode,
	/// Action phase fees of the wallet transaction, forward fees included.
	pub action_fees: Coins,
}

/// Broadcast transaction whose trace is still being resolved.
#[derive(Debug)]
pub struct UnconfirmedTx {
	pub lt: u64,
	pub id: RequestId,
	pub request: Arc<Request>,
	pub expires_at: Instant,
	root: RwLock<ReceivedMessage>,
}

impl UnconfirmedTx {
	pub fn new(
		lt: u64,
		id: RequestId,
		request: Arc<Request>,
		expires_at: Instant,
		root: ReceivedMessage,
	) -> Self {
		Self {
			lt,
			id,
			request,
			expires_at,
			root: RwLock::new(root),
		}
	}

	pub async fn root(&self) -> ReceivedMessage {
		self.root.read().await.clone()
	}

	pub async fn set_root(&self, root: ReceivedMessage) {
		*self.root.write().await = root;
	}

	pub fn is_expired(&self, now: Instant) -> bool {
		now >= self.expires_at
	}

	async fn state(&self) -> TxState {
		let root = self.root.read().await;
		TxState {
			status: TransactionStatus::Unconfirmed,
			exit_code: root.outcome_exit_code(),
			action_fees: root.total_action_phase_fees(),
		}
	}
}

/// Transaction that left the unconfirmed set.
#[derive(Debug, Clone)]
pub struct FinalizedTx {
	pub id: RequestId,
	pub root: ReceivedMessage,
	pub exit_code: ExitCode,
	pub succeeded: bool,
	pub expired: bool,
	pub finalized_at: Instant,
}

impl FinalizedTx {
	pub fn status(&self) -> TransactionStatus {
		if self.succeeded && !self.expired {
			TransactionStatus::Finalized
		} else {
			TransactionStatus::Failed
		}
	}

	fn state(&self) -> TxState {
		TxState {
			status: self.status(),
			exit_code: self.exit_code,
			action_fees: self.root.total_action_phase_fees(),
		}
	}
}

#[derive(Default)]
struct Entries {
	unconfirmed: HashMap<u64, Arc<UnconfirmedTx>>,
	finalized: HashMap<u64, FinalizedTx>,
}

/// Transactions of a single sending account, keyed by logical time.
#[derive(Default)]
pub struct TxStore {
	entries: RwLock<Entries>,
}

impl TxStore {
	pub async fn add_unconfirmed(&self, tx: UnconfirmedTx) -> Result<(), StoreError> {
		let mut entries = self.entries.write().await;
		if entries.unconfirmed.contains_key(&tx.lt) || entries.finalized.contains_key(&tx.lt) {
			return Err(StoreError::AlreadyExists(tx.lt));
		}
		entries.unconfirmed.insert(tx.lt, Arc::new(tx));
		Ok(())
	}

	/// Moves a transaction with a finalized trace out of the unconfirmed set.
	pub async fn confirm(&self, lt: u64) -> Result<FinalizedTx, StoreError> {
		self.finalize(lt, false).await
	}

	/// Moves an expired transaction out of the unconfirmed set, as failed.
	pub async fn expire(&self, lt: u64) -> Result<FinalizedTx, StoreError> {
		self.finalize(lt, true).await
	}

	async fn finalize(&self, lt: u64, expired: bool) -> Result<FinalizedTx, StoreError> {
		let mut entries = self.entries.write().await;
		let tx = entries
			.unconfirmed
			.remove(&lt)
			.ok_or(StoreError::NotFound(lt))?;

		let root = tx.root().await;
		let finalized = FinalizedTx {
			id: tx.id,
			exit_code: root.outcome_exit_code(),
			succeeded: root.trace_status() == MsgStatus::Finalized && root.trace_succeeded(),
			expired,
			root,
			finalized_at: Instant::now(),
		};
		entries.finalized.insert(lt, finalized.clone());
		Ok(finalized)
	}

	/// Unconfirmed transactions, soonest to expire first.
	pub async fn snapshot_unconfirmed(&self) -> Vec<Arc<UnconfirmedTx>> {
		let mut unconfirmed = self
			.entries
			.read()
			.await
			.unconfirmed
			.values()
			.cloned()
			.collect::<Vec<_>>();
		unconfirmed.sort_by_key(|tx| (tx.expires_at, tx.lt));
		unconfirmed
	}

	pub async fn inflight_count(&self) -> usize {
		self.entries.read().await.unconfirmed.len()
	}

	/// Drops finalized transactions that left the unconfirmed set at or
	/// before `cutoff`, returning their request ids.
	pub async fn prune_finalized(&self, cutoff: Instant) -> Vec<RequestId> {
		let mut pruned = vec![];
		self.entries.write().await.finalized.retain(|_, tx| {
			let keep = tx.finalized_at > cutoff;
			if !keep {
				pruned.push(tx.id);
			}
			keep
		});
		pruned
	}

	pub async fn tx_state(&self, lt: u64) -> Option<TxState> {
		let entries = self.entries.read().await;
		if let Some(tx) = entries.unconfirmed.get(&lt) {
			return Some(tx.state().await);
		}
		entries.finalized.get(&lt).map(FinalizedTx::state)
	}
}

/// Per account transaction stores, keyed by the account address string.
#[derive(Default)]
pub struct AccountStore {
	stores: RwLock<HashMap<String, Arc<TxStore>>>,
}

impl AccountStore {
	/// Returns the store of `address`, creating it on first use.
	pub async fn get_store(&self, address: &Address) -> Arc<TxStore> {
		let key = address.to_string();
		if let Some(store) = self.stores.read().await.get(&key) {
			return store.clone();
		}
		self.stores.write().await.entry(key).or_default().clone()
	}

	pub async fn store(&self, key: &str) -> Option<Arc<TxStore>> {
		self.stores.read().await.get(key).cloned()
	}

	pub async fn total_inflight(&self) -> usize {
		let stores = self.stores.read().await.values().cloned().collect::<Vec<_>>();
		let mut total = 0;
		for store in stores {
			total += store.inflight_count().await;
		}
		total
	}

	pub async fn snapshot_all_unconfirmed(&self) -> HashMap<String, Vec<Arc<UnconfirmedTx>>> {
		let stores = self
			.stores
			.read()
			.await
			.iter()
			.map(|(key, store)| (key.clone(), store.clone()))
			.collect::<Vec<_>>();

		let mut snapshot = HashMap::with_capacity(stores.len());
		for (key, store) in stores {
			let unconfirmed = store.snapshot_unconfirmed().await;
			if !unconfirmed.is_empty() {
				snapshot.insert(key, unconfirmed);
			}
		}
		snapshot
	}

	pub async fn prune_finalized(&self, cutoff: Instant) -> Vec<RequestId> {
		let stores = self.stores.read().await.values().cloned().collect::<Vec<_>>();
		let mut pruned = vec![];
		for store in stores {
			pruned.extend(store.prune_finalized(cutoff).await);
		}
		pruned
	}

	/// State of the transaction with `lt`, looked up across every account.
	pub async fn tx_state(&self, lt: u64) -> Option<TxState> {
		let stores = self.stores.read().await.values().cloned().collect::<Vec<_>>();
		for store in stores {
			if let Some(state) = store.tx_state(lt).await {
				return Some(state);
			}
		}
		None
	}
}
