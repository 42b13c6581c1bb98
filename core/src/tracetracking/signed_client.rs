use async_stream::stream;
use futures::Stream;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{
	message::{ParseError, ReceivedMessage},
	tracker::{wait_for_trace, TrackError},
};
use crate::{
	network::{BlockView, ClientError, NodeClient},
	transaction::Transaction,
	types::{Address, BlockId},
	utils::spawn_in_span,
	wallet::{Wallet, WalletError, WalletMessage},
};

const SUBSCRIPTION_BUFFER: usize = 64;

#[derive(Debug, Error)]
pub enum SendError {
	#[error("Failed to send message to {destination}")]
	Wallet {
		destination: Address,
		#[source]
		source: WalletError,
	},
	#[error(transparent)]
	Parse(#[from] ParseError),
	#[error(transparent)]
	Track(#[from] TrackError),
	#[error("Failed to wait for block after the trace")]
	Client(#[from] ClientError),
}

/// Wallet bound to a node client.
pub struct SignedClient<C: NodeClient, W: Wallet> {
	client: Arc<C>,
	wallet: Arc<W>,
}

impl<C: NodeClient, W: Wallet> Clone for SignedClient<C, W> {
	fn clone(&self) -> Self {
		Self {
			client: self.client.clone(),
			wallet: self.wallet.clone(),
		}
	}
}

impl<C: NodeClient, W: Wallet> SignedClient<C, W> {
	pub fn new(client: Arc<C>, wallet: Arc<W>) -> Self {
		Self { client, wallet }
	}

	pub fn client(&self) -> &Arc<C> {
		&self.client
	}

	pub fn wallet(&self) -> &Arc<W> {
		&self.wallet
	}

	/// Sends a message and returns the wallet receipt and the block it was committed in.
	pub async fn send_wait_one(
		&self,
		message: WalletMessage,
	) -> Result<(ReceivedMessage, BlockId), SendError> {
		let destination = message.destination;
		let (transaction, block) = self
			.wallet
			.send_wait_transaction(message)
			.await
			.map_err(|source| SendError::Wallet {
				destination,
				source,
			})?;
		let received = ReceivedMessage::parse(&transaction)?;
		debug!(
			wallet = %self.wallet.address(),
			%destination,
			lt = received.lt,
			%block,
			"Message committed"
		);
		Ok((received, block))
	}

	/// Sends a message and waits until its whole trace is resolved and the
	/// masterchain moved past the committing block.
	pub async fn send_wait_trace(
		&self,
		message: WalletMessage,
		shutdown: &CancellationToken,
	) -> Result<ReceivedMessage, SendError> {
		let (mut root, block) = self.send_wait_one(message).await?;
		wait_for_trace(self.client.as_ref(), &mut root, shutdown).await?;
		BlockView::new(self.client.as_ref(), block.seqno + 1)
			.current_masterchain_info()
			.await?;
		Ok(root)
	}

	/// Live stream of the account transactions from `from_lt` onward. The
	/// subscription stops when the stream is dropped or `shutdown` is cancelled.
	pub fn subscribe_transactions(
		&self,
		address: Address,
		from_lt: u64,
		shutdown: &CancellationToken,
	) -> impl Stream<Item = Transaction> {
		let (sender, mut receiver) = mpsc::channel(SUBSCRIPTION_BUFFER);
		let subscription_shutdown = shutdown.child_token();
		let cancel_subscription = subscription_shutdown.clone().drop_guard();
		let client = self.client.clone();

		spawn_in_span(async move {
			if let Err(error) = client
				.subscribe_on_transactions(address, from_lt, sender, subscription_shutdown)
				.await
			{
				warn!(%address, %error, "Transaction subscription failed");
			}
		});

		stream! {
			let _cancel_subscription = cancel_subscription;
			while let Some(transaction) = receiver.recv().await {
				yield transaction;
			}
		}
	}
}
