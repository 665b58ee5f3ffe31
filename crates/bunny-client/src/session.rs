// Client-side channel session.
//
// A session owns one exclusive queue bound to exactly one channel at a time.
// A decode task turns deliveries into messages and forwards them, tagged with
// their channel, through a bounded queue. Deliveries for any channel other
// than the current one are discarded when decoded, and again when handed to
// the caller, so messages already queued before a switch are dropped too.
//
// Switching channels sets the current channel first, binds the new key, then
// unbinds the old key. Messages sent to the new channel while the bind is in
// flight can still be missed; nothing from the old channel reaches the caller
// once the switch has started.
use crate::{ClientError, Result, SessionConfig};
use bunny_broker::{Delivery, QueueBindings, TopicExchange, publish_with_timeout};
use bunny_common::{ChannelName, InboundMessage, Message};
use bunny_router::{BindingPattern, RoutingKey};
use bytes::Bytes;
use chrono::Utc;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

pub struct ChannelSession {
    exchange: Arc<dyn TopicExchange>,
    bindings: Arc<dyn QueueBindings>,
    identity: String,
    current: Arc<RwLock<ChannelName>>,
    publish_timeout: Duration,
    inbound: mpsc::Receiver<(ChannelName, Message)>,
    decode_task: JoinHandle<()>,
}

impl ChannelSession {
    /// Declare a private queue, bind it to the configured channel and start
    /// decoding deliveries.
    pub async fn connect(exchange: Arc<dyn TopicExchange>, config: SessionConfig) -> Result<Self> {
        let SessionConfig {
            identity,
            channel,
            publish_timeout,
            inbound_capacity,
        } = config;
        if identity.trim().is_empty() {
            return Err(bunny_common::Error::MalformedPayload("identity is empty".to_string()).into());
        }
        let binding = BindingPattern::exact(&channel)?;
        let queue = exchange.declare_queue(inbound_capacity).await?;
        queue.bind(&binding).await?;
        let (bindings, deliveries) = queue.into_parts();

        let current = Arc::new(RwLock::new(channel));
        let (inbound_tx, inbound) = mpsc::channel(inbound_capacity.max(1));
        let decode_task = tokio::spawn(run_decode_task(deliveries, inbound_tx, current.clone()));
        tracing::debug!(queue = %bindings.queue_name(), identity = %identity, "channel session started");

        Ok(Self {
            exchange,
            bindings,
            identity,
            current,
            publish_timeout,
            inbound,
            decode_task,
        })
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn current_channel(&self) -> ChannelName {
        self.current.read().clone()
    }

    /// Publish `text` to the current channel, stamped with this session's
    /// identity and the current time. Returns the message as sent.
    pub async fn send(&self, text: impl Into<String>) -> Result<Message> {
        let channel = self.current_channel();
        let message = Message::new(self.identity.clone(), text, Utc::now())?
            .with_chat_name(channel.as_str());
        let payload = Bytes::from(message.encode()?);
        let key = RoutingKey::for_channel(&channel);
        publish_with_timeout(
            self.exchange.as_ref(),
            key.as_str(),
            payload,
            self.publish_timeout,
        )
        .await?;
        Ok(message)
    }

    pub async fn switch_channel(&self, channel: &str) -> Result<()> {
        let next = ChannelName::new(channel)?;
        let previous = self.current_channel();
        if next == previous {
            return Ok(());
        }
        let next_binding = BindingPattern::exact(&next)?;
        let previous_binding = BindingPattern::exact(&previous)?;

        *self.current.write() = next.clone();
        if let Err(err) = self.bindings.bind(&next_binding).await {
            *self.current.write() = previous;
            return Err(err.into());
        }
        self.bindings.unbind(&previous_binding).await?;
        tracing::debug!(from = %previous, to = %next, "switched channel");
        Ok(())
    }

    /// Next message on the current channel. `None` once the session's queue
    /// is gone.
    pub async fn next_message(&mut self) -> Option<Message> {
        loop {
            let (channel, message) = self.inbound.recv().await?;
            if let Some(message) = self.keep_current(channel, message) {
                return Some(message);
            }
        }
    }

    pub fn try_next_message(&mut self) -> Option<Message> {
        loop {
            let (channel, message) = self.inbound.try_recv().ok()?;
            if let Some(message) = self.keep_current(channel, message) {
                return Some(message);
            }
        }
    }

    fn keep_current(&self, channel: ChannelName, message: Message) -> Option<Message> {
        if channel == *self.current.read() {
            return Some(message);
        }
        metrics::counter!("bunny_session_dropped_total", "reason" => "stale").increment(1);
        tracing::debug!(channel = %channel, "dropping message queued before channel switch");
        None
    }

    pub async fn close(self) -> Result<()> {
        self.decode_task.abort();
        self.bindings.close().await.map_err(ClientError::from)
    }
}

async fn run_decode_task(
    mut deliveries: mpsc::Receiver<Delivery>,
    inbound: mpsc::Sender<(ChannelName, Message)>,
    current: Arc<RwLock<ChannelName>>,
) {
    while let Some(delivery) = deliveries.recv().await {
        let Some(item) = decode_delivery(&delivery, &current) else {
            continue;
        };
        match inbound.try_send(item) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                metrics::counter!("bunny_session_dropped_total", "reason" => "full").increment(1);
                tracing::debug!("session inbound queue full; dropping message");
            }
            Err(TrySendError::Closed(_)) => break,
        }
    }
}

fn decode_delivery(
    delivery: &Delivery,
    current: &RwLock<ChannelName>,
) -> Option<(ChannelName, Message)> {
    let key = match RoutingKey::parse(&delivery.routing_key) {
        Ok(key) => key,
        Err(err) => {
            tracing::debug!(routing_key = %delivery.routing_key, error = %err, "ignoring delivery");
            return None;
        }
    };
    if key.channel() != &*current.read() {
        return None;
    }
    match InboundMessage::decode(&delivery.payload) {
        Ok(inbound) => Some((key.channel().clone(), inbound.into_message(Utc::now()))),
        Err(err) => {
            tracing::debug!(routing_key = %delivery.routing_key, error = %err, "ignoring delivery");
            None
        }
    }
}
