//! Relay process wiring: bus and store construction, dispatcher lifecycle,
//! and the serve loop used by `main`.
//!
//! Failing to reach the bus or the store, or to bind the dispatcher queue,
//! aborts startup. Shutdown closes the bus subscription first, then the
//! store.
use crate::app::{AppState, build_router};
use crate::config::{BusBackend, RelayConfig, StorageBackend};
use crate::dispatcher::Dispatcher;
use crate::observability;
use anyhow::{Context, Result};
use axum::Router;
use bunny_broker::{AmqpExchange, InProcessExchange, QueueBindings, TopicExchange};
use bunny_router::BindingPattern;
use bunny_storage::{ChannelLogStore, InMemoryChannelLog, SqliteChannelLog};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

const DISPATCHER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn connect_bus(config: &RelayConfig) -> Result<Arc<dyn TopicExchange>> {
    let exchange: Arc<dyn TopicExchange> = match config.bus {
        BusBackend::Amqp => Arc::new(
            AmqpExchange::connect(&config.amqp_url)
                .await
                .context("connect amqp broker")?,
        ),
        BusBackend::InProcess => Arc::new(InProcessExchange::new()),
    };
    Ok(exchange)
}

pub async fn connect_store(config: &RelayConfig) -> Result<Arc<dyn ChannelLogStore>> {
    let store: Arc<dyn ChannelLogStore> = match config.storage {
        StorageBackend::Memory => Arc::new(InMemoryChannelLog::new()),
        StorageBackend::Sqlite => Arc::new(
            SqliteChannelLog::connect(&config.sqlite)
                .await
                .context("open sqlite channel log")?,
        ),
    };
    store
        .health_check()
        .await
        .context("channel log health check")?;
    Ok(store)
}

/// A running relay: the dispatcher consuming the bus plus the state served
/// over HTTP.
pub struct RelayRuntime {
    state: AppState,
    exchange: Arc<dyn TopicExchange>,
    subscription: Arc<dyn QueueBindings>,
    dispatcher: JoinHandle<()>,
}

impl RelayRuntime {
    pub async fn start(config: &RelayConfig) -> Result<Self> {
        let exchange = connect_bus(config).await?;
        let store = connect_store(config).await?;
        Self::start_with(exchange, store, &config.binding, config.queue_capacity).await
    }

    pub async fn start_with(
        exchange: Arc<dyn TopicExchange>,
        store: Arc<dyn ChannelLogStore>,
        binding: &BindingPattern,
        queue_capacity: usize,
    ) -> Result<Self> {
        let queue = exchange
            .declare_queue(queue_capacity)
            .await
            .context("declare dispatcher queue")?;
        queue
            .bind(binding)
            .await
            .with_context(|| format!("bind dispatcher queue to {binding}"))?;
        tracing::info!(
            bus = exchange.backend_name(),
            storage = store.backend_name(),
            durable = store.is_durable(),
            binding = %binding,
            "relay started"
        );
        if !store.is_durable() {
            tracing::warn!("channel logs are not durable; history is lost on restart");
        }
        let subscription = queue.bindings();
        let dispatcher = Dispatcher::new(store.clone()).spawn(queue);
        Ok(Self {
            state: AppState::new(store),
            exchange,
            subscription,
            dispatcher,
        })
    }

    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    pub fn exchange(&self) -> Arc<dyn TopicExchange> {
        self.exchange.clone()
    }

    pub fn router(&self) -> Router {
        build_router(self.state())
    }

    pub async fn shutdown(self) -> Result<()> {
        if let Err(err) = self.subscription.close().await {
            tracing::warn!(error = %err, "closing dispatcher queue failed");
        }
        let mut dispatcher = self.dispatcher;
        if tokio::time::timeout(DISPATCHER_DRAIN_TIMEOUT, &mut dispatcher)
            .await
            .is_err()
        {
            tracing::warn!("dispatcher did not stop in time; aborting");
            dispatcher.abort();
        }
        if let Err(err) = self.exchange.close().await {
            tracing::warn!(error = %err, "closing bus connection failed");
        }
        self.state.store.close().await;
        tracing::info!("relay stopped");
        Ok(())
    }
}

pub async fn run_with_shutdown<F>(config: RelayConfig, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let metrics_handle = observability::init_observability("bunny-relay")?;
    let runtime = RelayRuntime::start(&config).await?;
    let metrics_task = tokio::spawn(observability::serve_metrics(
        metrics_handle,
        config.metrics_bind,
    ));

    let addr = config.bind_addr;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    tracing::info!(%addr, "relay history api listening");
    let app = runtime.router();
    tokio::pin!(shutdown);
    let served = tokio::select! {
        result = axum::serve(listener, app.into_make_service()) => result.context("serve history api"),
        _ = &mut shutdown => Ok(()),
    };

    metrics_task.abort();
    let _ = metrics_task.await;
    runtime.shutdown().await?;
    served
}
