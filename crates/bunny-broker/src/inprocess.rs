// In-process topic exchange.
// Queues live in a slab guarded by a mutex. Publishing matches each queue's
// bindings and uses `try_send`, so a slow consumer drops the newest delivery
// instead of blocking publishers.
use crate::{BrokerError, Delivery, ExclusiveQueue, QueueBindings, Result, TopicExchange};
use async_trait::async_trait;
use bunny_router::BindingPattern;
use bytes::Bytes;
use parking_lot::Mutex;
use slab::Slab;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

#[derive(Clone, Default)]
pub struct InProcessExchange {
    shared: Arc<Shared>,
}

#[derive(Default)]
struct Shared {
    queues: Mutex<Slab<QueueEntry>>,
    closed: AtomicBool,
    next_queue: AtomicU64,
}

struct QueueEntry {
    name: String,
    sender: mpsc::Sender<Delivery>,
    bindings: Vec<BindingPattern>,
}

impl InProcessExchange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_count(&self) -> usize {
        self.shared.queues.lock().len()
    }

    /// Number of queues whose bindings match `routing_key`.
    pub fn route_count(&self, routing_key: &str) -> usize {
        self.shared
            .queues
            .lock()
            .iter()
            .filter(|(_, entry)| entry.routes(routing_key))
            .count()
    }
}

impl QueueEntry {
    fn routes(&self, routing_key: &str) -> bool {
        self.bindings
            .iter()
            .any(|pattern| pattern.matches(routing_key))
    }
}

#[async_trait]
impl TopicExchange for InProcessExchange {
    async fn publish(&self, routing_key: &str, payload: Bytes) -> Result<()> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(BrokerError::ExchangeClosed);
        }
        metrics::counter!("bunny_exchange_published_total").increment(1);
        let mut queues = self.shared.queues.lock();
        let mut gone = Vec::new();
        // A queue receives a message at most once even when several of its
        // bindings match.
        for (key, entry) in queues.iter() {
            if !entry.routes(routing_key) {
                continue;
            }
            match entry
                .sender
                .try_send(Delivery::new(routing_key, payload.clone()))
            {
                Ok(()) => {
                    metrics::counter!("bunny_exchange_delivered_total").increment(1);
                }
                Err(TrySendError::Full(_)) => {
                    metrics::counter!("bunny_exchange_dropped_total", "reason" => "full")
                        .increment(1);
                    tracing::debug!(queue = %entry.name, routing_key, "queue full; dropping delivery");
                }
                Err(TrySendError::Closed(_)) => gone.push(key),
            }
        }
        for key in gone {
            let entry = queues.remove(key);
            tracing::debug!(queue = %entry.name, "removing queue with closed receiver");
        }
        if queues.is_empty() {
            tracing::trace!(routing_key, "published with no consumers");
        }
        Ok(())
    }

    async fn declare_queue(&self, capacity: usize) -> Result<ExclusiveQueue> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(BrokerError::ExchangeClosed);
        }
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let name = format!(
            "inproc.gen-{}",
            self.shared.next_queue.fetch_add(1, Ordering::Relaxed)
        );
        let key = self.shared.queues.lock().insert(QueueEntry {
            name: name.clone(),
            sender,
            bindings: Vec::new(),
        });
        tracing::debug!(queue = %name, "declared exclusive queue");
        let bindings = InProcessBindings {
            key,
            name,
            shared: Arc::downgrade(&self.shared),
        };
        Ok(ExclusiveQueue::new(Arc::new(bindings), receiver))
    }

    async fn close(&self) -> Result<()> {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.queues.lock().clear();
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "inprocess"
    }
}

struct InProcessBindings {
    key: usize,
    name: String,
    shared: Weak<Shared>,
}

impl InProcessBindings {
    fn with_entry<T>(&self, f: impl FnOnce(&mut QueueEntry) -> T) -> Result<T> {
        let shared = self
            .shared
            .upgrade()
            .ok_or(BrokerError::ExchangeClosed)?;
        let mut queues = shared.queues.lock();
        // Slab keys are reused, so confirm the slot still holds this queue.
        match queues.get_mut(self.key) {
            Some(entry) if entry.name == self.name => Ok(f(entry)),
            _ => Err(BrokerError::QueueClosed(self.name.clone())),
        }
    }

    fn remove(&self) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let mut queues = shared.queues.lock();
        if queues
            .get(self.key)
            .is_some_and(|entry| entry.name == self.name)
        {
            queues.remove(self.key);
        }
    }
}

#[async_trait]
impl QueueBindings for InProcessBindings {
    fn queue_name(&self) -> &str {
        &self.name
    }

    async fn bind(&self, pattern: &BindingPattern) -> Result<()> {
        self.with_entry(|entry| {
            if !entry.bindings.contains(pattern) {
                entry.bindings.push(pattern.clone());
            }
        })
    }

    async fn unbind(&self, pattern: &BindingPattern) -> Result<()> {
        self.with_entry(|entry| entry.bindings.retain(|existing| existing != pattern))
    }

    async fn close(&self) -> Result<()> {
        self.remove();
        Ok(())
    }
}

impl Drop for InProcessBindings {
    fn drop(&mut self) {
        // Auto-delete once the last handle is gone.
        self.remove();
    }
}
