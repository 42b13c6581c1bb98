use std::collections::VecDeque;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::message::{ParseError, ReceivedMessage, SentMessage};
use crate::{
	network::{ClientError, NodeClient},
	transaction::Transaction,
	types::Address,
};

const SUBSCRIPTION_BUFFER: usize = 64;

#[derive(Debug, Error)]
pub enum TrackError {
	#[error("Transaction subscription on {destination} failed")]
	Subscription {
		destination: Address,
		#[source]
		source: ClientError,
	},
	#[error("Transaction subscription on {0} ended before the message was received")]
	SubscriptionClosed(Address),
	#[error(transparent)]
	Parse(#[from] ParseError),
	#[error("Trace tracking cancelled")]
	Cancelled,
}

/// Resolves every outgoing internal message of the trace rooted at `root`,
/// breadth first, attaching the receipts to their parents.
///
/// On error or cancellation the children resolved so far stay attached, so
/// tracking can be resumed on the same root later.
pub async fn wait_for_trace<C: NodeClient + ?Sized>(
	client: &C,
	root: &mut ReceivedMessage,
	shutdown: &CancellationToken,
) -> Result<(), TrackError> {
	let mut pending = VecDeque::from([vec![]]);

	while let Some(path) = pending.pop_front() {
		let message = node_mut(root, &path);
		wait_for_outgoing_messages(client, message, shutdown).await?;

		for index in 0..message.received.len() {
			let mut child = path.clone();
			child.push(index);
			pending.push_back(child);
		}
	}

	Ok(())
}

fn node_mut<'a>(root: &'a mut ReceivedMessage, path: &[usize]) -> &'a mut ReceivedMessage {
	path.iter()
		.fold(root, |message, index| &mut message.received[*index])
}

/// Resolves the sent children of `message` in emission order.
pub async fn wait_for_outgoing_messages<C: NodeClient + ?Sized>(
	client: &C,
	message: &mut ReceivedMessage,
	shutdown: &CancellationToken,
) -> Result<(), TrackError> {
	while let Some(sent) = message.sent.first().cloned() {
		let transaction = wait_for_delivery(client, message.lt, &sent, shutdown).await?;
		let received = ReceivedMessage::parse(&transaction)?;
		debug!(
			source = %sent.source,
			destination = %sent.destination,
			lt = received.lt,
			exit_code = received.exit_code.code(),
			"Outgoing message received"
		);
		message.received.push(received);
		message.sent.remove(0);
	}

	Ok(())
}

/// Subscribes to the destination transactions from `from_lt` and returns the
/// one triggered by `sent`.
async fn wait_for_delivery<C: NodeClient + ?Sized>(
	client: &C,
	from_lt: u64,
	sent: &SentMessage,
	shutdown: &CancellationToken,
) -> Result<Transaction, TrackError> {
	let destination = sent.destination;
	let (sender, mut receiver) = mpsc::channel(SUBSCRIPTION_BUFFER);
	let subscription_shutdown = shutdown.child_token();
	let _cancel_subscription = subscription_shutdown.clone().drop_guard();

	let subscription =
		client.subscribe_on_transactions(destination, from_lt, sender, subscription_shutdown);
	tokio::pin!(subscription);

	let is_delivery = |transaction: &Transaction| {
		trace!(account = %transaction.account, lt = transaction.lt, "Transaction received");
		transaction
			.internal_in()
			.is_some_and(|message| sent.matches(message))
	};

	loop {
		tokio::select! {
			biased;
			_ = shutdown.cancelled() => return Err(TrackError::Cancelled),
			transaction = receiver.recv() => match transaction {
				Some(transaction) if is_delivery(&transaction) => return Ok(transaction),
				Some(_) => continue,
				None => return Err(subscription_ended(subscription.as_mut().await, destination)),
			},
			result = &mut subscription => {
				while let Ok(transaction) = receiver.try_recv() {
					if is_delivery(&transaction) {
						return Ok(transaction);
					}
				}
				return Err(subscription_ended(result, destination));
			},
		}
	}
}

fn subscription_ended(result: Result<(), ClientError>, destination: Address) -> TrackError {
	match result {
		Ok(()) => TrackError::SubscriptionClosed(destination),
		Err(source) => TrackError::Subscription {
			destination,
			source,
		},
	}
}
