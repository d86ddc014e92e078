//! Coordinator entry point: store, gRPC + HTTP servers, management server.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tally::{coordinator, mgmt, AppState, AuthManager, CoordinatorConfig, Store};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = CoordinatorConfig::from_env()?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_new(&config.log_level)?)
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!(?config, "starting coordinator");

    mgmt::init_metrics();

    let store = Store::connect(&config.db_sqlite_path).await?;
    info!(path = %config.db_sqlite_path, "database ready");

    let auth = Arc::new(AuthManager::new(
        config.auth_jwt_secret.clone(),
        config.auth_jwt_expiration,
    ));
    let config = Arc::new(config);
    let state = AppState {
        store,
        auth,
        config: config.clone(),
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut mgmt_task = tokio::spawn(mgmt::serve(config.mgmt_addr, shutdown_rx.clone()));
    let mut serve_task = tokio::spawn(coordinator::serve(state, shutdown_rx));

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("shutdown signal received");
        }
        result = &mut serve_task => {
            result??;
            anyhow::bail!("coordinator servers exited unexpectedly");
        }
        result = &mut mgmt_task => {
            result??;
            anyhow::bail!("management server exited unexpectedly");
        }
    }
    let _ = shutdown_tx.send(true);

    serve_task.await??;
    mgmt_task.await??;
    info!("coordinator stopped");
    Ok(())
}
