// Topic exchange abstraction for chat traffic.
// Consumers get an exclusive, auto-deleting queue whose deliveries are handed
// to the application through a bounded channel. Consumption is auto-ack: a
// delivery counts as delivered once it is in that channel.
use async_trait::async_trait;
use bunny_router::{BindingPattern, RoutingError};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub mod amqp;
pub mod inprocess;

pub use amqp::AmqpExchange;
pub use inprocess::InProcessExchange;

pub type Result<T> = std::result::Result<T, BrokerError>;

/// Default depth of a consumer's hand-off queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;
/// Default bound on a single publish attempt.
pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(thiserror::Error, Debug)]
pub enum BrokerError {
    #[error("amqp error: {0}")]
    Amqp(#[from] lapin::Error),
    #[error("publish to {0} was rejected by the broker")]
    PublishNacked(String),
    #[error("publish timed out after {0:?}")]
    PublishTimeout(Duration),
    #[error("queue closed: {0}")]
    QueueClosed(String),
    #[error("exchange closed")]
    ExchangeClosed,
    #[error(transparent)]
    Routing(#[from] RoutingError),
}

/// A message handed to a consumer, with the routing key it was published under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub routing_key: String,
    pub payload: Bytes,
}

impl Delivery {
    pub fn new(routing_key: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            routing_key: routing_key.into(),
            payload: payload.into(),
        }
    }
}

/// A topic-pattern exchange shared by publishers and consumers.
#[async_trait]
pub trait TopicExchange: Send + Sync {
    async fn publish(&self, routing_key: &str, payload: Bytes) -> Result<()>;

    /// Declare an exclusive, auto-deleting, anonymous queue with no bindings.
    async fn declare_queue(&self, capacity: usize) -> Result<ExclusiveQueue>;

    async fn close(&self) -> Result<()>;

    fn backend_name(&self) -> &'static str;
}

/// Binding control for one declared queue.
#[async_trait]
pub trait QueueBindings: Send + Sync {
    fn queue_name(&self) -> &str;

    async fn bind(&self, pattern: &BindingPattern) -> Result<()>;

    async fn unbind(&self, pattern: &BindingPattern) -> Result<()>;

    /// Delete the queue. Its receiver observes end-of-stream afterwards.
    async fn close(&self) -> Result<()>;
}

/// A declared queue: binding handle plus the bounded delivery receiver.
pub struct ExclusiveQueue {
    bindings: Arc<dyn QueueBindings>,
    deliveries: mpsc::Receiver<Delivery>,
}

impl ExclusiveQueue {
    pub fn new(bindings: Arc<dyn QueueBindings>, deliveries: mpsc::Receiver<Delivery>) -> Self {
        Self {
            bindings,
            deliveries,
        }
    }

    pub fn name(&self) -> &str {
        self.bindings.queue_name()
    }

    /// A second handle on the queue's bindings, e.g. to close it from
    /// outside the task draining it.
    pub fn bindings(&self) -> Arc<dyn QueueBindings> {
        self.bindings.clone()
    }

    pub async fn bind(&self, pattern: &BindingPattern) -> Result<()> {
        self.bindings.bind(pattern).await
    }

    pub async fn unbind(&self, pattern: &BindingPattern) -> Result<()> {
        self.bindings.unbind(pattern).await
    }

    pub async fn recv(&mut self) -> Option<Delivery> {
        self.deliveries.recv().await
    }

    pub async fn close(self) -> Result<()> {
        self.bindings.close().await
    }

    // Split so one task can drain deliveries while another rebinds.
    pub fn into_parts(self) -> (Arc<dyn QueueBindings>, mpsc::Receiver<Delivery>) {
        (self.bindings, self.deliveries)
    }
}

impl std::fmt::Debug for ExclusiveQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExclusiveQueue")
            .field("name", &self.name())
            .finish()
    }
}

/// Publish with a bounded wait so a stalled bus cannot block the caller.
pub async fn publish_with_timeout(
    exchange: &dyn TopicExchange,
    routing_key: &str,
    payload: Bytes,
    timeout: Duration,
) -> Result<()> {
    match tokio::time::timeout(timeout, exchange.publish(routing_key, payload)).await {
        Ok(result) => result,
        Err(_) => {
            metrics::counter!("bunny_publish_timeouts_total").increment(1);
            Err(BrokerError::PublishTimeout(timeout))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StalledExchange;

    #[async_trait]
    impl TopicExchange for StalledExchange {
        async fn publish(&self, _routing_key: &str, _payload: Bytes) -> Result<()> {
            std::future::pending::<()>().await;
            Ok(())
        }

        async fn declare_queue(&self, _capacity: usize) -> Result<ExclusiveQueue> {
            Err(BrokerError::ExchangeClosed)
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }

        fn backend_name(&self) -> &'static str {
            "stalled"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn publish_times_out_on_stalled_exchange() {
        let err = publish_with_timeout(
            &StalledExchange,
            "bunny.general",
            Bytes::from_static(b"{}"),
            DEFAULT_PUBLISH_TIMEOUT,
        )
        .await
        .expect_err("timeout");
        assert!(matches!(err, BrokerError::PublishTimeout(d) if d == DEFAULT_PUBLISH_TIMEOUT));
    }

    #[tokio::test]
    async fn publish_passes_through_when_exchange_responds() {
        let exchange = InProcessExchange::new();
        publish_with_timeout(
            &exchange,
            "bunny.general",
            Bytes::from_static(b"{}"),
            Duration::from_millis(100),
        )
        .await
        .expect("publish");
    }

    #[test]
    fn broker_error_display() {
        let err = BrokerError::QueueClosed("q1".to_string());
        assert_eq!(err.to_string(), "queue closed: q1");
        let err = BrokerError::PublishTimeout(Duration::from_secs(5));
        assert_eq!(err.to_string(), "publish timed out after 5s");
    }
}
