use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{broadcast, mpsc};

use preview_build::BuildEngine;
use preview_core::Config;

use crate::dispatch::{CycleRequest, Dispatcher};
use crate::error::DaemonError;
use crate::http::{build_router, AppState};

/// Start the daemon and block the current thread until it exits.
pub fn start_blocking(config: Config) -> Result<(), DaemonError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(DaemonError::Runtime)?;
    runtime.block_on(run(config))
}

/// Run the daemon: HTTP server, cycle worker, reaper and signal handling.
///
/// A full cycle is queued at startup so the previews catch up with anything
/// pushed while the service was down.
pub async fn run(config: Config) -> Result<(), DaemonError> {
    config.validate()?;

    let addr = format!("{}:{}", config.host, config.port);
    let reap_interval = config.reap_interval();
    let secret = config.secret.clone();

    let engine = Arc::new(BuildEngine::new(config));
    let (dispatcher, cycle_rx) = Dispatcher::new(Arc::clone(&engine));
    let dispatcher = Arc::new(dispatcher);
    dispatcher.request_cycle(CycleRequest::Startup)?;

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| DaemonError::Bind {
            addr: addr.clone(),
            source,
        })?;
    tracing::info!(%addr, "listening for webhooks");
    let router = build_router(AppState::new(secret, dispatcher));

    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let server_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            let result = server_task(listener, router, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let processor_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown.subscribe();
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            let result = cycle_processor_task(engine, cycle_rx, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let reaper_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown.subscribe();
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            let result = reaper_task(engine, reap_interval, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        let mut shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            let mut terminate = match signal(SignalKind::terminate()) {
                Ok(stream) => stream,
                Err(err) => return Err(DaemonError::Signal(err)),
            };
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                _ = terminate.recv() => {
                    tracing::info!("received SIGTERM, shutting down");
                    let _ = shutdown.send(());
                    Ok(())
                }
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Signal(err)),
                    }
                }
            }
        })
    };

    let (server_result, processor_result, reaper_result, signal_result) = tokio::join!(
        server_handle,
        processor_handle,
        reaper_handle,
        signal_handle
    );

    handle_join("http_server", server_result)?;
    handle_join("cycle_processor", processor_result)?;
    handle_join("reaper", reaper_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

async fn server_task(
    listener: TcpListener,
    router: axum::Router,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let addr = listener
        .local_addr()
        .map_err(|source| DaemonError::Bind {
            addr: "listener".to_string(),
            source,
        })?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
        })
        .await
        .map_err(|source| DaemonError::Serve { addr, source })
}

/// Single worker draining the cycle queue; cycles never overlap.
async fn cycle_processor_task(
    engine: Arc<BuildEngine>,
    mut cycle_rx: mpsc::Receiver<CycleRequest>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            maybe_request = cycle_rx.recv() => {
                let Some(source) = maybe_request else { break };
                let started = Instant::now();
                tracing::info!(?source, "build cycle started");

                let engine = Arc::clone(&engine);
                let result = tokio::task::spawn_blocking(move || engine.run_cycle())
                    .await
                    .map_err(|err| DaemonError::Join {
                        task: "build cycle",
                        message: err.to_string(),
                    })?;

                match result {
                    Ok(summary) => tracing::info!(
                        ?source,
                        fetched = summary.fetched,
                        built = summary.reconcile.built.len(),
                        failed = summary.reconcile.failed.len(),
                        duration_ms = started.elapsed().as_millis() as u64,
                        "build cycle done",
                    ),
                    Err(err) => tracing::error!(?source, error = %err, "build cycle failed"),
                }
            }
        }
    }
    Ok(())
}

/// Reap on every SIGCHLD and on a fixed interval.
async fn reaper_task(
    engine: Arc<BuildEngine>,
    every: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut sigchld = signal(SignalKind::child()).map_err(DaemonError::Signal)?;
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = sigchld.recv() => {}
            _ = interval.tick() => {}
        }
        let engine = Arc::clone(&engine);
        let report = tokio::task::spawn_blocking(move || engine.reap())
            .await
            .map_err(|err| DaemonError::Join {
                task: "reap",
                message: err.to_string(),
            })?;
        if !report.reaped.is_empty() {
            tracing::debug!(count = report.reaped.len(), "reaped children");
        }
    }
    Ok(())
}

fn handle_join(
    task: &'static str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Join {
            task,
            message: err.to_string(),
        }),
    }
}

/// Install the global subscriber on stderr; `RUST_LOG` overrides the
/// default level.
pub fn init_tracing(json: bool, debug: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
