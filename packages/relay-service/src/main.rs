use std::sync::Arc;

use relay_chain::ChainClient;
use relay_service::config::Config;
use relay_service::context::RelayContext;
use relay_service::{db, http};

fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> eyre::Result<()> {
    init_logging();

    tracing::info!("starting relay service");

    let config = Config::load()?;
    tracing::info!(chain_id = config.chain.chain_id, relay_host = %config.chain.relay_host, "configuration loaded");

    let pool = db::create_pool(&config.database.url).await?;
    tracing::info!("database connected");
    db::run_migrations(&pool).await?;
    tracing::info!("database migrations complete");

    let ctx = Arc::new(RelayContext::build(&config, pool).await?);
    tracing::info!("relay context initialized, starting background loops and HTTP server");

    let (shutdown_tx, mut shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        let _ = shutdown_tx.send(()).await;
    });

    let http_ctx = ctx.clone();
    let http_config = config.http.clone();
    let http_handle = tokio::spawn(async move {
        if let Err(e) = http::start_server(&http_config.bind_address, http_config.port, http_ctx).await {
            tracing::error!(error = %e, "HTTP server error");
        }
    });

    tokio::select! {
        _ = shutdown_rx.recv() => {
            tracing::info!("shutdown signal received");
        }
        () = run_background_loops(ctx.clone(), config.background.clone()) => {
            tracing::error!("background loop task ended unexpectedly");
        }
    }

    http_handle.abort();
    tracing::info!("relay service stopped");
    Ok(())
}

/// Drives every periodic maintenance pass the orchestrator and deal
/// engine need: batch building, deposit sync, expired-deal sweeping,
/// and shared-link cleanup. Each tick logs and continues past failures
/// rather than aborting the whole loop (§9: background work degrades,
/// it never crashes the service).
async fn run_background_loops(ctx: Arc<RelayContext>, config: relay_service::config::BackgroundConfig) {
    let mut batch_interval = tokio::time::interval(config.batch_interval);
    let mut deposit_interval = tokio::time::interval(config.deposit_sync_interval);
    let mut link_cleanup_interval = tokio::time::interval(config.link_cleanup_interval);
    let mut reconcile_interval = tokio::time::interval(config.reconcile_interval);

    let mut last_synced_block: u64 = 0;

    loop {
        tokio::select! {
            _ = batch_interval.tick() => {
                match ctx.bridge.run_batch_builder().await {
                    Ok(Some(batch)) => {
                        ctx.metrics.batches_submitted_total.inc();
                        ctx.metrics.last_batch_id.set(batch.batch_id as i64);
                        if let Err(e) = db::upsert_batch(&ctx.db, batch.batch_id as i64, &batch.root, batch.withdrawals.len() as i32, batch.finalized).await
                        {
                            tracing::warn!(error = %e, "failed to index batch in operational database");
                        }
                        let receipt_hashes: Vec<String> = batch.withdrawals.iter().map(|w| w.receipt_hash.clone()).collect();
                        if let Err(e) = db::mark_withdrawals_batched(&ctx.db, &receipt_hashes, batch.batch_id as i64).await {
                            tracing::warn!(error = %e, "failed to mark withdrawals batched in operational database");
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        ctx.metrics.batches_failed_total.inc();
                        tracing::error!(error = %e, "batch builder pass failed");
                    }
                }
                ctx.metrics.pending_withdrawals.set(ctx.bridge.pending_withdrawals().await.len() as i64);
            }
            _ = deposit_interval.tick() => {
                match ctx.chain.get_current_batch_id().await {
                    Ok(_) => {
                        let to_block = last_synced_block + 1000;
                        match ctx.bridge.sync_deposits(last_synced_block, to_block, None).await {
                            Ok(report) => {
                                ctx.metrics.deposits_credited_total.inc_by(report.credited);
                                last_synced_block = to_block + 1;
                            }
                            Err(e) => tracing::error!(error = %e, "deposit sync pass failed"),
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "chain unreachable, skipping deposit sync pass"),
                }
            }
            _ = link_cleanup_interval.tick() => {
                match ctx.links.cleanup().await {
                    Ok(removed) => {
                        if removed > 0 {
                            tracing::info!(removed, "shared-link cleanup pass removed expired links");
                        }
                    }
                    Err(e) => tracing::error!(error = %e, "shared-link cleanup pass failed"),
                }
            }
            _ = reconcile_interval.tick() => {
                match ctx.deals.sweep_expired().await {
                    Ok(expired) => {
                        if !expired.is_empty() {
                            tracing::info!(count = expired.len(), "expired deals swept");
                        }
                    }
                    Err(e) => tracing::error!(error = %e, "deal expiry sweep failed"),
                }
            }
        }
    }
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,relay_service=debug"));

    tracing_subscriber::registry().with(fmt::layer().with_target(true).with_thread_ids(true)).with(filter).init();
}

async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            tracing::info!("received SIGTERM, initiating shutdown");
        }
    }
}
