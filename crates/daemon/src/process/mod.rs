pub mod utils;

use std::net::SocketAddr;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::http_server;
use crate::lifecycle::LifecycleManager;
use crate::{ServiceConfig, ServiceState};

const FINAL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Handle for shutting the daemon down.
pub struct ShutdownHandle {
    graceful_waiter: tokio::task::JoinHandle<()>,
    handles: Vec<tokio::task::JoinHandle<()>>,
    shutdown_tx: watch::Sender<()>,
}

impl ShutdownHandle {
    /// Block until the service shuts down, via signal or [`shutdown`](Self::shutdown).
    pub async fn wait(self) {
        shutdown_and_join(self.graceful_waiter, self.handles).await;
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// Initialize logging, the panic hook and build info reporting.
/// The returned guards must outlive the program's logging.
fn init_logging(
    service_config: &ServiceConfig,
) -> Vec<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::fmt::format::FmtSpan;

    let mut guards = Vec::new();

    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    guards.push(stdout_guard);

    let stdout_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(stdout_writer)
        .with_filter(
            EnvFilter::builder()
                .with_default_directive(service_config.log_level.into())
                .from_env_lossy(),
        );

    if let Some(log_dir) = &service_config.log_dir {
        if let Err(e) = std::fs::create_dir_all(log_dir) {
            eprintln!("Warning: failed to create log directory {:?}: {}", log_dir, e);
        }

        let file_appender = tracing_appender::rolling::daily(log_dir, "drive.log");
        let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
        guards.push(file_guard);

        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_writer)
            .with_ansi(false)
            .with_span_events(FmtSpan::CLOSE)
            .with_filter(
                EnvFilter::builder()
                    .with_default_directive(service_config.log_level.into())
                    .from_env_lossy(),
            );

        tracing_subscriber::registry()
            .with(stdout_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry().with(stdout_layer).init();
    }

    utils::register_panic_logger();
    utils::report_build_info();

    guards
}

async fn create_state(service_config: &ServiceConfig) -> ServiceState {
    match ServiceState::from_config(service_config).await {
        Ok(state) => state,
        Err(e) => {
            tracing::error!("error creating server state: {}", e);
            std::process::exit(3);
        }
    }
}

async fn shutdown_and_join(
    graceful_waiter: tokio::task::JoinHandle<()>,
    handles: Vec<tokio::task::JoinHandle<()>>,
) {
    let _ = graceful_waiter.await;

    if timeout(FINAL_SHUTDOWN_TIMEOUT, join_all(handles))
        .await
        .is_err()
    {
        tracing::error!(
            "failed to shut down within {} seconds",
            FINAL_SHUTDOWN_TIMEOUT.as_secs()
        );
        std::process::exit(4);
    }
}

/// Build state and spawn the background tasks: cache writeback, purger,
/// API server, and the lifecycle task that drains uploads on shutdown.
pub async fn start_service(service_config: &ServiceConfig) -> (ServiceState, ShutdownHandle) {
    let (graceful_waiter, shutdown_tx, shutdown_rx) = utils::graceful_shutdown_blocker();
    let state = create_state(service_config).await;
    let cancel = state.cancel_token().clone();

    let mut handles = Vec::new();

    let writeback = state.cache().clone();
    handles.push(tokio::spawn(writeback.run_writeback()));

    let purger = state.cache().purger();
    let purger_cancel = cancel.clone();
    handles.push(tokio::spawn(purger.run(purger_cancel)));

    let api_addr = SocketAddr::from(([0, 0, 0, 0], service_config.api_port));
    let api_state = state.clone();
    let api_config = http_server::Config::new(api_addr);
    let api_rx = shutdown_rx.clone();
    handles.push(tokio::spawn(async move {
        if let Err(e) = http_server::run_api(api_config, api_state, api_rx).await {
            tracing::error!("API server error: {}", e);
        }
    }));

    let manager = LifecycleManager::new(
        state.objects().clone(),
        cancel,
        state.drain_timeout(),
    );
    let mut lifecycle_rx = shutdown_rx.clone();
    handles.push(tokio::spawn(async move {
        let _ = lifecycle_rx.changed().await;
        let outcome = manager.shutdown().await;
        tracing::info!(?outcome, "storage shut down");
    }));

    tracing::info!(port = service_config.api_port, "drive daemon running");

    let handle = ShutdownHandle {
        graceful_waiter,
        handles,
        shutdown_tx,
    };
    (state, handle)
}

/// Run the daemon until a shutdown signal arrives.
pub async fn spawn_service(service_config: &ServiceConfig) {
    let _guards = init_logging(service_config);
    let (_, handle) = start_service(service_config).await;
    handle.wait().await;
}
