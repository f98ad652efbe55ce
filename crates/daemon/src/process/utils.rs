use std::time::Duration;

use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::sync::watch;
use tokio::task::JoinHandle;

const REQUEST_GRACE_PERIOD: Duration = Duration::from_secs(10);

async fn recv(signal: &mut Option<Signal>) {
    match signal {
        Some(signal) => {
            signal.recv().await;
        }
        None => std::future::pending().await,
    }
}

fn listen(kind: SignalKind) -> Option<Signal> {
    match signal(kind) {
        Ok(signal) => Some(signal),
        Err(e) => {
            tracing::error!(?kind, error = %e, "failed to register signal handler");
            None
        }
    }
}

/// Spawns a task that waits for SIGINT, SIGTERM or a programmatic shutdown
/// and then broadcasts shutdown through a watch.
///
/// SIGTERM waits out a grace period first so in-flight requests can finish.
pub fn graceful_shutdown_blocker() -> (JoinHandle<()>, watch::Sender<()>, watch::Receiver<()>) {
    let mut sigint = listen(SignalKind::interrupt());
    let mut sigterm = listen(SignalKind::terminate());

    let (tx, rx) = watch::channel(());
    let signal_tx = tx.clone();
    let mut requested = rx.clone();

    let handle = tokio::spawn(async move {
        tokio::select! {
            _ = recv(&mut sigint) => {
                tracing::debug!("shutting down immediately on SIGINT");
            }
            _ = recv(&mut sigterm) => {
                tracing::debug!(grace = ?REQUEST_GRACE_PERIOD, "shutting down after grace period on SIGTERM");
                tokio::time::sleep(REQUEST_GRACE_PERIOD).await;
            }
            _ = requested.changed() => {
                tracing::debug!("shutdown requested");
            }
        }

        let _ = signal_tx.send(());
    });

    (handle, tx, rx)
}

/// Registers a panic hook that logs panics through `tracing`.
pub fn register_panic_logger() {
    std::panic::set_hook(Box::new(|panic| match panic.location() {
        Some(loc) => {
            tracing::error!(
                message = %panic,
                panic.file = loc.file(),
                panic.line = loc.line(),
                panic.column = loc.column(),
            );
        }
        None => tracing::error!(message = %panic),
    }));
}

pub fn report_build_info() {
    let build = common::build_info!();

    tracing::info!(
        package = build.name,
        build_profile = build.build_profile,
        version = build.version,
        "drive daemon starting up"
    );
}
