//! `skylark run`: the long-lived bot process.
//!
//! Startup order is store, transport, model, plugins, then the stream
//! dispatcher, auto-poster and maintenance jobs. Shutdown runs in reverse
//! behind one cancellation token.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use skylark_core::autopost::{AutoPostSettings, AutoPoster};
use skylark_core::maintenance::start_maintenance;
use skylark_core::pipeline::Responder;
use skylark_core::stream::{StreamDispatcher, WorkerPool};
use skylark_types::config::BotConfig;

use crate::state::AppState;

/// How long queued events may keep running after shutdown is requested.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

pub async fn run(config: BotConfig) -> anyhow::Result<()> {
    config.validate()?;
    let state = AppState::init(config).await?;
    let AppState {
        config,
        agent,
        connector,
    } = state;

    let cancel = CancellationToken::new();

    let responder = Arc::new(Responder::new(agent.clone()));
    let workers = Arc::new(WorkerPool::spawn(
        responder,
        config.stream.workers,
        config.stream.queue_capacity,
        Duration::from_millis(config.stream.enqueue_timeout_ms),
    ));

    info!(url = %connector.redacted_url(), "starting stream dispatcher");
    let dispatcher = StreamDispatcher::new(
        connector,
        agent.subscriptions.clone(),
        agent.dedup.clone(),
        workers.clone(),
        cancel.clone(),
    )
    .with_self_id(agent.bot.id.clone())
    .with_status(agent.stream.clone())
    .with_event_dump(config.log.dump_events);
    let mut stream_task = tokio::spawn(dispatcher.run());

    let poster = Arc::new(AutoPoster::new(
        agent.clone(),
        AutoPostSettings::from_config(&config.auto_post),
    ));
    let poster_task = tokio::spawn(poster.run(cancel.clone()));

    let mut scheduler =
        match start_maintenance(agent.store.clone(), agent.clock.clone(), config.db.retention_days).await {
            Ok(scheduler) => Some(scheduler),
            Err(e) => {
                warn!(error = %e, "maintenance jobs not scheduled");
                None
            }
        };

    info!(
        username = agent.bot.username.as_deref().unwrap_or(""),
        workers = config.stream.workers,
        "skylark is running, press Ctrl+C to stop"
    );

    let stream_result = tokio::select! {
        _ = shutdown_signal() => {
            info!("shutdown requested");
            cancel.cancel();
            stream_task.await
        }
        result = &mut stream_task => {
            cancel.cancel();
            result
        }
    };

    let fatal = match stream_result {
        Ok(Ok(())) => None,
        Ok(Err(e)) => {
            error!(error = %e, "stream dispatcher stopped");
            Some(anyhow::Error::new(e))
        }
        Err(e) => {
            error!(error = %e, "stream dispatcher task failed");
            Some(anyhow::anyhow!("stream dispatcher task failed: {e}"))
        }
    };

    if let Err(e) = poster_task.await {
        warn!(error = %e, "auto-poster task failed");
    }

    match Arc::try_unwrap(workers) {
        Ok(workers) => workers.shutdown(SHUTDOWN_GRACE).await,
        Err(_) => warn!("stream workers still referenced, skipping drain"),
    }

    agent.plugins.shutdown_all().await;

    if let Some(scheduler) = scheduler.as_mut() {
        if let Err(e) = scheduler.shutdown().await {
            warn!(error = %e, "maintenance scheduler shutdown failed");
        }
    }

    info!("skylark stopped");
    match fatal {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
