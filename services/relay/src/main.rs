//! Relay service entry point.
use relay::config::RelayConfig;
use relay::runtime::run_with_shutdown;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = RelayConfig::from_env_or_yaml()?;
    run_with_shutdown(config, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
}
