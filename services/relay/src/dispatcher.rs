//! Relay dispatcher: turns bus deliveries into channel log entries.
//!
//! Each delivery is handled independently. A bad routing key, an undecodable
//! payload or a failed append drops that delivery with a warning and a
//! counter; the loop always moves on to the next one. Deliveries were
//! auto-acknowledged by the bus, so a dropped delivery is gone.
use bunny_broker::{Delivery, ExclusiveQueue};
use bunny_common::InboundMessage;
use bunny_router::RoutingKey;
use bunny_storage::ChannelLogStore;
use chrono::Utc;
use std::sync::Arc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Persisted,
    MalformedRoutingKey,
    MalformedPayload,
    AppendFailed,
}

impl DispatchOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Persisted => "persisted",
            Self::MalformedRoutingKey => "malformed_routing_key",
            Self::MalformedPayload => "malformed_payload",
            Self::AppendFailed => "append_failed",
        }
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn ChannelLogStore>,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn ChannelLogStore>) -> Self {
        Self { store }
    }

    pub async fn handle_delivery(&self, delivery: &Delivery) -> DispatchOutcome {
        let outcome = self.persist(delivery).await;
        match outcome {
            DispatchOutcome::Persisted => {
                metrics::counter!("bunny_relay_persisted_total").increment(1);
            }
            dropped => {
                metrics::counter!("bunny_relay_dropped_total", "reason" => dropped.as_str())
                    .increment(1);
            }
        }
        outcome
    }

    async fn persist(&self, delivery: &Delivery) -> DispatchOutcome {
        let key = match RoutingKey::parse(&delivery.routing_key) {
            Ok(key) => key,
            Err(err) => {
                tracing::warn!(
                    routing_key = %delivery.routing_key,
                    error = %err,
                    "dropping delivery: malformed routing key"
                );
                return DispatchOutcome::MalformedRoutingKey;
            }
        };
        let message = match InboundMessage::decode(&delivery.payload) {
            Ok(inbound) => inbound.into_message(Utc::now()),
            Err(err) => {
                tracing::warn!(
                    routing_key = %delivery.routing_key,
                    error = %err,
                    "dropping delivery: malformed payload"
                );
                return DispatchOutcome::MalformedPayload;
            }
        };
        match self.store.append(key.channel(), &message).await {
            Ok(()) => {
                tracing::debug!(channel = %key.channel(), sender = %message.sender, "persisted message");
                DispatchOutcome::Persisted
            }
            Err(err) => {
                tracing::warn!(
                    routing_key = %delivery.routing_key,
                    error = %err,
                    "dropping delivery: append failed"
                );
                DispatchOutcome::AppendFailed
            }
        }
    }

    /// Drain `queue` until the bus closes it.
    pub async fn run(self, mut queue: ExclusiveQueue) {
        tracing::info!(queue = %queue.name(), "relay dispatcher started");
        while let Some(delivery) = queue.recv().await {
            self.handle_delivery(&delivery).await;
        }
        tracing::info!("relay dispatcher stopped");
    }

    pub fn spawn(self, queue: ExclusiveQueue) -> JoinHandle<()> {
        tokio::spawn(self.run(queue))
    }
}
