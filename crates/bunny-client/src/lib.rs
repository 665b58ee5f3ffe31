// Client library: a live channel session over the bus, plus a reader for the
// relay's history endpoint.
pub mod config;
pub mod history;
pub mod session;

pub use config::SessionConfig;
pub use history::HistoryClient;
pub use session::ChannelSession;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    InvalidInput(#[from] bunny_common::Error),
    #[error(transparent)]
    Routing(#[from] bunny_router::RoutingError),
    #[error(transparent)]
    Broker(#[from] bunny_broker::BrokerError),
    #[error("history request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("history request rejected with {status} ({code}): {message}")]
    Rejected {
        status: u16,
        code: String,
        message: String,
    },
}
