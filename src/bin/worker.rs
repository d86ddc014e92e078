//! Worker entry point: management server plus the pull-based worker pool.

use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tally::{mgmt, worker, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = WorkerConfig::from_env()?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_new(&config.log_level)?)
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!(?config, "starting worker");

    mgmt::init_metrics();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut mgmt_task = tokio::spawn(mgmt::serve(config.mgmt_addr, shutdown_rx.clone()));
    let mut pool_task = tokio::spawn(worker::run(config, shutdown_rx));

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("shutdown signal received");
        }
        result = &mut pool_task => {
            result??;
            anyhow::bail!("worker pool exited unexpectedly");
        }
        result = &mut mgmt_task => {
            result??;
            anyhow::bail!("management server exited unexpectedly");
        }
    }
    let _ = shutdown_tx.send(true);

    pool_task.await??;
    mgmt_task.await??;
    info!("worker stopped");
    Ok(())
}
