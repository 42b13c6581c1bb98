//! Message trace model, trace resolution and the wallet bound client.

pub mod message;
pub mod signed_client;
pub mod tracker;

pub use message::{MsgStatus, ParseError, ReceivedMessage, SentMessage};
pub use signed_client::{SendError, SignedClient};
pub use tracker::{wait_for_trace, TrackError};
