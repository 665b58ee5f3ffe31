// AMQP 0-9-1 topic exchange backed by lapin.
// One connection per exchange handle. Publishing goes through a shared
// channel in confirm mode, so a publish returns only after the broker acks it.
// Every declared queue gets its own channel and a pump task that moves
// deliveries into the bounded hand-off queue. Closing or dropping the
// bindings closes that channel, which cancels the consumer and lets the
// broker auto-delete the queue.
use crate::{BrokerError, Delivery, ExclusiveQueue, QueueBindings, Result, TopicExchange};
use async_trait::async_trait;
use bunny_router::{BindingPattern, ExchangeSpec, QueueSpec};
use bytes::Bytes;
use futures::StreamExt;
use lapin::message::Delivery as AmqpDelivery;
use lapin::options::{
    BasicConsumeOptions, BasicPublishOptions, ConfirmSelectOptions, ExchangeDeclareOptions,
    QueueBindOptions, QueueDeclareOptions, QueueDeleteOptions,
};
use lapin::publisher_confirm::Confirmation;
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

const CONTENT_TYPE_JSON: &str = "application/json";
const REPLY_SUCCESS: u16 = 200;

pub struct AmqpExchange {
    connection: Connection,
    publisher: Channel,
    exchange: ExchangeSpec,
}

impl AmqpExchange {
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with(url, ExchangeSpec::default()).await
    }

    /// Connect and declare the topic exchange. Declaring is idempotent, so
    /// every client and the relay can do it on startup.
    pub async fn connect_with(url: &str, exchange: ExchangeSpec) -> Result<Self> {
        let connection = Connection::connect(url, ConnectionProperties::default()).await?;
        let publisher = connection.create_channel().await?;
        publisher
            .exchange_declare(
                &exchange.name,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: exchange.durable,
                    auto_delete: exchange.auto_delete,
                    ..ExchangeDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;
        publisher
            .confirm_select(ConfirmSelectOptions::default())
            .await?;
        tracing::info!(exchange = %exchange.name, "connected to amqp broker");
        Ok(Self {
            connection,
            publisher,
            exchange,
        })
    }

    pub fn exchange_name(&self) -> &str {
        &self.exchange.name
    }
}

#[async_trait]
impl TopicExchange for AmqpExchange {
    async fn publish(&self, routing_key: &str, payload: Bytes) -> Result<()> {
        let confirmation = self
            .publisher
            .basic_publish(
                &self.exchange.name,
                routing_key,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default().with_content_type(CONTENT_TYPE_JSON.into()),
            )
            .await?
            .await?;
        check_confirmation(routing_key, &confirmation)?;
        metrics::counter!("bunny_exchange_published_total").increment(1);
        Ok(())
    }

    async fn declare_queue(&self, capacity: usize) -> Result<ExclusiveQueue> {
        let channel = self.connection.create_channel().await?;
        let spec = QueueSpec::EPHEMERAL;
        let queue = channel
            .queue_declare(
                "",
                QueueDeclareOptions {
                    durable: spec.durable,
                    exclusive: spec.exclusive,
                    auto_delete: spec.auto_delete,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;
        let name = queue.name().as_str().to_string();
        let consumer = channel
            .basic_consume(
                &name,
                "",
                BasicConsumeOptions {
                    no_ack: true,
                    ..BasicConsumeOptions::default()
                },
                FieldTable::default(),
            )
            .await?;
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        tokio::spawn(pump_deliveries(name.clone(), consumer, sender));
        tracing::debug!(queue = %name, "declared exclusive queue");
        let bindings = AmqpBindings {
            channel,
            queue: name,
            exchange: self.exchange.name.clone(),
            closed: AtomicBool::new(false),
        };
        Ok(ExclusiveQueue::new(Arc::new(bindings), receiver))
    }

    async fn close(&self) -> Result<()> {
        self.publisher.close(REPLY_SUCCESS, "closing").await?;
        self.connection.close(REPLY_SUCCESS, "closing").await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "amqp"
    }
}

fn check_confirmation(routing_key: &str, confirmation: &Confirmation) -> Result<()> {
    if confirmation.is_nack() {
        metrics::counter!("bunny_exchange_nacked_total").increment(1);
        return Err(BrokerError::PublishNacked(routing_key.to_string()));
    }
    Ok(())
}

struct AmqpBindings {
    channel: Channel,
    queue: String,
    exchange: String,
    closed: AtomicBool,
}

#[async_trait]
impl QueueBindings for AmqpBindings {
    fn queue_name(&self) -> &str {
        &self.queue
    }

    async fn bind(&self, pattern: &BindingPattern) -> Result<()> {
        self.channel
            .queue_bind(
                &self.queue,
                &self.exchange,
                pattern.as_str(),
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(BrokerError::from)
    }

    async fn unbind(&self, pattern: &BindingPattern) -> Result<()> {
        self.channel
            .queue_unbind(
                &self.queue,
                &self.exchange,
                pattern.as_str(),
                FieldTable::default(),
            )
            .await
            .map_err(BrokerError::from)
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.channel
            .queue_delete(&self.queue, QueueDeleteOptions::default())
            .await?;
        self.channel.close(REPLY_SUCCESS, "closing").await?;
        Ok(())
    }
}

impl Drop for AmqpBindings {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::AcqRel) || !self.channel.status().connected() {
            return;
        }
        // Closing needs the runtime; outside one the connection close cleans up.
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let channel = self.channel.clone();
        let queue = std::mem::take(&mut self.queue);
        runtime.spawn(async move {
            if let Err(err) = channel.close(REPLY_SUCCESS, "dropped").await {
                tracing::debug!(queue = %queue, error = %err, "closing dropped queue channel failed");
            }
        });
    }
}

// Runs until the consumer stream ends or the receiver is dropped.
async fn pump_deliveries(
    queue: String,
    mut consumer: Consumer,
    sender: mpsc::Sender<Delivery>,
) {
    while let Some(next) = consumer.next().await {
        let AmqpDelivery {
            routing_key, data, ..
        } = match next {
            Ok(delivery) => delivery,
            Err(err) => {
                tracing::warn!(queue = %queue, error = %err, "amqp consumer error");
                break;
            }
        };
        match sender.try_send(Delivery::new(routing_key.as_str(), data)) {
            Ok(()) => {
                metrics::counter!("bunny_exchange_delivered_total").increment(1);
            }
            Err(TrySendError::Full(_)) => {
                metrics::counter!("bunny_exchange_dropped_total", "reason" => "full").increment(1);
                tracing::debug!(queue = %queue, "queue full; dropping delivery");
            }
            Err(TrySendError::Closed(_)) => break,
        }
    }
    tracing::debug!(queue = %queue, "delivery pump stopped");
}
