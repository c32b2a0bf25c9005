use milvaion_common::config::make_config_loader;
use milvaion_common::SafeDisplay;
use milvaion_server::Services;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::var("MILVAION_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

    let config = make_config_loader(&config_path)
        .load()
        .map_err(|err| anyhow::anyhow!("failed to load configuration: {err}"))?;

    if let Err(reason) = config.validate() {
        anyhow::bail!("invalid configuration: {reason}");
    }

    milvaion_common::tracing_init::init_tracing(&config.tracing);
    info!(config = %config.to_safe_string(), "starting milvaion-server");

    let services = Services::new(&config).await?;
    info!(node_id = %services.node_id, "node initialized");

    let cancellation = CancellationToken::new();
    let shutdown_token = cancellation.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("shutdown signal received");
        shutdown_token.cancel();
    });

    services.supervisor.run(cancellation).await;
    info!("milvaion-server exited");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(err) => {
            error!(error = %err, "failed to install SIGTERM handler");
            std::future::pending::<()>().await;
            unreachable!()
        }
    };

    tokio::select! {
        _ = sigterm.recv() => {}
        _ = tokio::signal::ctrl_c() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
