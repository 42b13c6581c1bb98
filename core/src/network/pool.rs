//! Round-robin cache of node clients with chain id verification.

use async_trait::async_trait;
use color_eyre::{
	eyre::{eyre, WrapErr},
	Result,
};
use rand::{seq::SliceRandom, thread_rng};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::{sync::RwLock, time::Instant};
use tracing::{debug, info, warn};

use super::{ClientError, NodeClient};

/// Builds node clients for configured endpoints.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
	type Client: NodeClient;

	async fn connect(&self, endpoint: &Endpoint) -> Result<Self::Client, ClientError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
	pub name: String,
	pub url: String,
}

struct CachedClient<C> {
	client: Arc<C>,
	created_at: Instant,
}

pub struct ClientPool<N: Connector> {
	connector: N,
	endpoints: Vec<Endpoint>,
	chain_id: i32,
	ttl: Duration,
	cache: RwLock<HashMap<usize, CachedClient<N::Client>>>,
}

impl<N: Connector> ClientPool<N> {
	pub fn new(connector: N, endpoints: Vec<Endpoint>, chain_id: i32, ttl: Duration) -> Self {
		Self {
			connector,
			endpoints,
			chain_id,
			ttl,
			cache: RwLock::new(HashMap::new()),
		}
	}

	pub fn endpoints(&self) -> &[Endpoint] {
		&self.endpoints
	}

	/// Returns a verified client, trying endpoint slots in random order.
	pub async fn get_client(&self) -> Result<Arc<N::Client>> {
		let order = {
			let mut order = (0..self.endpoints.len()).collect::<Vec<_>>();
			order.shuffle(&mut thread_rng());
			order
		};

		let mut last_error = eyre!("No nodes configured");
		for index in order {
			if let Some(client) = self.cached(index).await {
				return Ok(client);
			}

			let endpoint = &self.endpoints[index];
			match self.connect_and_verify(endpoint).await {
				Ok(client) => {
					let client = Arc::new(client);
					self.cache.write().await.insert(
						index,
						CachedClient {
							client: client.clone(),
							created_at: Instant::now(),
						},
					);
					info!(node = %endpoint.name, url = %endpoint.url, "Connected to node");
					return Ok(client);
				},
				Err(error) => {
					self.cache.write().await.remove(&index);
					warn!(node = %endpoint.name, %error, "Skipping connection with this node");
					last_error = error;
				},
			}
		}

		Err(last_error.wrap_err("No valid nodes available"))
	}

	/// Drops a client from the cache after a failed call.
	pub async fn invalidate(&self, client: &Arc<N::Client>) {
		let mut cache = self.cache.write().await;
		let stale = cache
			.iter()
			.filter(|(_, cached)| Arc::ptr_eq(&cached.client, client))
			.map(|(index, _)| *index)
			.collect::<Vec<_>>();
		for index in stale {
			cache.remove(&index);
			warn!(node = %self.endpoints[index].name, "Evicted client due to error");
		}
	}

	async fn cached(&self, index: usize) -> Option<Arc<N::Client>> {
		{
			let cache = self.cache.read().await;
			let cached = cache.get(&index)?;
			if cached.created_at.elapsed() < self.ttl {
				return Some(cached.client.clone());
			}
		}

		debug!(node = %self.endpoints[index].name, "Cached client expired");
		self.cache.write().await.remove(&index);
		None
	}

	async fn connect_and_verify(&self, endpoint: &Endpoint) -> Result<N::Client> {
		let client = self
			.connector
			.connect(endpoint)
			.await
			.wrap_err_with(|| format!("Failed to create client for {}", endpoint.url))?;

		let block = client
			.current_masterchain_info()
			.await
			.wrap_err("Failed to get masterchain info")?;
		let block_data = client
			.get_block_data(block)
			.await
			.wrap_err_with(|| format!("Failed to get block data of {block}"))?;

		if block_data.global_id != self.chain_id {
			return Err(eyre!(
				"Chain id mismatch: expected {}, node {} reports {}",
				self.chain_id,
				endpoint.name,
				block_data.global_id
			));
		}

		Ok(client)
	}
}
