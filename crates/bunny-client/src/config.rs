// Client-side defaults for channel sessions.
use bunny_broker::DEFAULT_PUBLISH_TIMEOUT;
use bunny_common::ChannelName;
use std::time::Duration;

pub(crate) const DEFAULT_INBOUND_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Sender name stamped on every outgoing message.
    pub identity: String,
    pub channel: ChannelName,
    pub publish_timeout: Duration,
    /// Depth of both the delivery queue and the decoded-message queue.
    pub inbound_capacity: usize,
}

impl SessionConfig {
    pub fn new(identity: impl Into<String>, channel: ChannelName) -> Self {
        Self {
            identity: identity.into(),
            channel,
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
            inbound_capacity: DEFAULT_INBOUND_CAPACITY,
        }
    }

    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    pub fn with_inbound_capacity(mut self, capacity: usize) -> Self {
        self.inbound_capacity = capacity.max(1);
        self
    }
}
