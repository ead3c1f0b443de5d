use crate::cli::ServeArgs;
use crate::infra::{AppState, Engine};
use crate::routes::with_worker_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use candidate_docs::config::AppConfig;
use candidate_docs::error::AppError;
use candidate_docs::revalidation::{EngineError, FileLease, ProcessLease};
use candidate_docs::telemetry;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let engine = Engine::build(&config)?;
    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
        last_cycle: engine.scheduler.last_cycle(),
    };

    let lease = Arc::new(ProcessLease::new(FileLease::new(config.lease.path.clone())));
    let app = with_worker_routes(
        engine.store.clone(),
        engine.clock.clone(),
        engine.scheduler.clone(),
        lease.clone(),
    )
    .layer(Extension(app_state))
    .layer(prometheus_layer);

    let cancel = CancellationToken::new();
    let scheduler = engine.scheduler.clone();
    let scheduler_cancel = cancel.clone();
    let scheduler_ready = readiness_flag.clone();
    let scheduler_task = tokio::spawn(async move {
        let result = scheduler.run(lease, scheduler_cancel.clone()).await;
        if result.is_err() {
            // A lease failure takes the worker out of rotation and stops the server.
            scheduler_ready.store(false, Ordering::Release);
            scheduler_cancel.cancel();
        }
        result
    });

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    if !cancel.is_cancelled() {
        readiness_flag.store(true, Ordering::Release);
    }

    info!(?config.environment, %addr, "candidate document revalidation worker ready");

    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                signal = tokio::signal::ctrl_c() => {
                    if let Err(err) = signal {
                        error!(error = %err, "failed to listen for shutdown signal");
                    }
                    info!("shutdown requested");
                }
                _ = shutdown.cancelled() => {
                    info!("revalidation loop stopped; shutting down");
                }
            }
            shutdown.cancel();
        })
        .await?;

    // The server may also stop on its own; the loop must not outlive it.
    cancel.cancel();
    match scheduler_task.await {
        Ok(result) => result?,
        Err(err) => return Err(EngineError::Task(err.to_string()).into()),
    }
    Ok(())
}
