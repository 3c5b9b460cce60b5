//! The composition root: wires the scheduler, processor, notifier, and
//! admin HTTP server together as tasks on one async runtime, all sharing a
//! single `CancellationToken`, per the "collapse five processes into one
//! binary" redesign flag. The pub/sub contract between components is
//! unchanged — they only ever talk to each other through the bus and the
//! store, never through direct function calls.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::bus::EventBus;
use crate::config::Config;
use crate::notifier::Notifier;
use crate::processor::Processor;
use crate::scheduler::Scheduler;
use crate::{db, scheduler, server};

pub async fn run(config: Config) -> Result<()> {
    let pool = db::create_pool(&config).await.context("creating database")?;
    info!(db_path = %config.db_path().display(), "database ready");

    let bus = EventBus::new(&config.bus).context("connecting to event bus")?;

    let alarm_scheduler = Arc::new(Scheduler::new(pool.clone()));
    alarm_scheduler.reload().await.context("loading alarms from store")?;
    info!(count = alarm_scheduler.count(), "alarms loaded from store");

    let processor = Arc::new(Processor::new(pool.clone()));
    let notifier = Arc::new(Notifier::new(&config.notifier).context("building notifier")?);

    let cancel = CancellationToken::new();

    let tick_handle = tokio::spawn(scheduler::tick_loop(alarm_scheduler.clone(), bus.clone(), cancel.clone()));
    let processor_handle = tokio::spawn(crate::processor::run(bus.clone(), processor.clone(), cancel.clone()));
    let notifier_handle = tokio::spawn(crate::notifier::run(bus.clone(), notifier.clone(), cancel.clone()));

    let app_state = server::AppState {
        scheduler: alarm_scheduler.clone(),
        pool: pool.clone(),
        bus: bus.clone(),
        default_timezone: config.chime.default_timezone.clone(),
        processor_stats: processor.stats(),
        notifier_stats: notifier.stats(),
    };
    let router = server::build_router(app_state);
    let listener = tokio::net::TcpListener::bind(&config.chime.listen)
        .await
        .with_context(|| format!("binding to {}", config.chime.listen))?;
    info!(listen = %config.chime.listen, "admin HTTP server listening");

    let server_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                server_cancel.cancelled().await;
            })
            .await
    });

    wait_for_shutdown().await;
    info!("shutdown signal received");
    cancel.cancel();

    let shutdown_timeout = std::time::Duration::from_secs(10);
    let _ = tokio::time::timeout(shutdown_timeout, async {
        let _ = tick_handle.await;
        let _ = processor_handle.await;
        let _ = notifier_handle.await;
        let _ = server_handle.await;
    })
    .await;

    pool.close().await;
    info!("shutdown complete");

    Ok(())
}

async fn wait_for_shutdown() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {},
            _ = sigterm.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
