use std::net::SocketAddr;
use std::sync::Arc;

use eyre::{eyre, Result};

use bridge_operator::api;
use bridge_operator::config::Config;
use bridge_operator::db::{self, PgStore};
use bridge_operator::dispatcher::UnlockDispatcher;
use bridge_operator::evm::EvmChain;
use bridge_operator::metrics::PrometheusSink;
use bridge_operator::multisig::SigServerClient;
use bridge_operator::types::BridgeRole;
use bridge_operator::watcher::ChainWatcher;

fn main() -> Result<()> {
    // Install color-eyre for better error reporting
    color_eyre::install()?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> Result<()> {
    init_logging();

    tracing::info!("Starting bridge operator");

    let config = Config::load()?;
    tracing::info!(
        role = %config.role,
        chain = %config.chain.chain_tag,
        network = ?config.network,
        "Configuration loaded"
    );

    let pool = db::create_pool(&config.database.url).await?;
    tracing::info!("Database connected");

    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations complete");

    let store = Arc::new(PgStore::new(pool));
    let chain = Arc::new(EvmChain::new(&config.chain)?);
    let metrics = Arc::new(PrometheusSink);

    // Metrics/status server
    let api_addr = SocketAddr::from(([0, 0, 0, 0], config.api_port));
    let api_store = store.clone();
    let api_chain_tag = config.chain.chain_tag.clone();
    tokio::spawn(async move {
        if let Err(e) = api::start_api_server(api_addr, api_store, api_chain_tag).await {
            tracing::error!(error = %e, "API server error");
        }
    });

    let watcher = Arc::new(ChainWatcher::new(
        config.clone(),
        chain.clone(),
        store.clone(),
        metrics.clone(),
    )?);

    match config.role {
        BridgeRole::Collector => {
            let sig_server_url = config
                .collector
                .sig_server_url
                .clone()
                .ok_or_else(|| eyre!("Collector role requires a signature server URL"))?;
            let multisig = Arc::new(SigServerClient::new(sig_server_url));
            let dispatcher = Arc::new(UnlockDispatcher::new(
                config,
                chain,
                store,
                metrics,
                multisig,
            ));

            tokio::select! {
                result = watcher.run() => {
                    if let Err(e) = result {
                        tracing::error!(error = %e, "Watcher stopped");
                    }
                }
                result = dispatcher.run() => {
                    if let Err(e) = result {
                        tracing::error!(error = %e, "Unlock dispatcher stopped");
                    }
                }
                _ = wait_for_shutdown_signal() => {}
            }
        }
        BridgeRole::Watcher => {
            tokio::select! {
                result = watcher.run() => {
                    if let Err(e) = result {
                        tracing::error!(error = %e, "Watcher stopped");
                    }
                }
                _ = wait_for_shutdown_signal() => {}
            }
        }
    }

    tracing::info!("Bridge operator stopped");
    Ok(())
}

/// Initialize tracing/logging with structured output
fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,bridge_operator=debug"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(filter)
        .init();
}

/// Wait for shutdown signals (SIGINT/SIGTERM)
async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
