// Shared data types and small helpers used across crates.
pub mod channel;
pub mod message;

pub use channel::{ChannelName, MAX_CHANNEL_NAME_BYTES, StorageId};
pub use message::{HistoryResponse, InboundMessage, Message};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("invalid channel name: {0}")]
    InvalidChannelName(String),
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}
