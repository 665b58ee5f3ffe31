// Console demo: two chat sessions, the relay dispatcher and the history API,
// all over the in-process bus and an in-memory sqlite log.
use anyhow::{Context, Result};
use bunny_broker::{InProcessExchange, TopicExchange};
use bunny_client::{ChannelSession, HistoryClient, SessionConfig};
use bunny_common::ChannelName;
use bunny_router::BindingPattern;
use bunny_storage::{ChannelLogStore, SqliteChannelLog, SqliteConfig};
use relay::runtime::RelayRuntime;
use std::sync::Arc;
use tokio::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    println!("== Bunny Chat Relay Demo ==");
    println!("Goal: live chat between two sessions, then read history back over HTTP.");

    println!("Step 1/6: booting in-process bus, sqlite log and relay dispatcher.");
    let exchange: Arc<dyn TopicExchange> = Arc::new(InProcessExchange::new());
    let store: Arc<dyn ChannelLogStore> =
        Arc::new(SqliteChannelLog::connect(&SqliteConfig::in_memory()).await?);
    let relay = RelayRuntime::start_with(
        exchange.clone(),
        store,
        &BindingPattern::all_channels(),
        bunny_broker::DEFAULT_QUEUE_CAPACITY,
    )
    .await?;
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let app = relay.router();
    let server = tokio::spawn(async move { axum::serve(listener, app).await });

    println!("Step 2/6: alice and bob join #general.");
    let general = ChannelName::new("general")?;
    let alice = ChannelSession::connect(
        exchange.clone(),
        SessionConfig::new("alice", general.clone()),
    )
    .await?;
    let mut bob =
        ChannelSession::connect(exchange.clone(), SessionConfig::new("bob", general)).await?;

    println!("Step 3/6: alice sends three messages.");
    for text in ["hi bob", "how is the rabbit?", "see you in #random"] {
        alice.send(text).await?;
    }
    for _ in 0..3 {
        let message = tokio::time::timeout(Duration::from_secs(1), bob.next_message())
            .await
            .context("waiting for message")?
            .context("session closed")?;
        println!("  bob <- {}: {}", message.sender, message.body);
    }

    println!("Step 4/6: bob switches to #random and replies.");
    bob.switch_channel("random").await?;
    bob.send("made it").await?;
    alice.send("anyone still here?").await?;

    // Let the dispatcher catch up before reading history.
    tokio::time::sleep(Duration::from_millis(100)).await;

    println!("Step 5/6: reading history over HTTP.");
    let history = HistoryClient::new(format!("http://{addr}"));
    for chat in ["general", "random"] {
        let reply = history.fetch(chat, Some(10)).await?;
        println!("  #{} ({} messages)", reply.chat, reply.messages.len());
        for message in reply.messages {
            println!("    [{}] {}: {}", message.timestamp, message.sender, message.body);
        }
    }

    println!("Step 6/6: shutting down.");
    alice.close().await?;
    bob.close().await?;
    relay.shutdown().await?;
    server.abort();
    println!("Done.");
    Ok(())
}
