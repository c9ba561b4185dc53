//! Binds the listener, serves `app` with axum's graceful shutdown, and
//! bounds the whole SIGINT/SIGTERM → drain → [`Service::stop`] sequence
//! to one shutdown budget (`spec.md` §4.5: "allow up to 16s for graceful
//! shutdown, then invoke StopAll within the remaining shutdown budget").

use std::future::Future;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use axum::Router;
use tokio::sync::watch;

/// Serves `app` on `addr` until SIGINT/SIGTERM, then drains in-flight
/// requests and runs `stop_all`, both bounded in total by
/// `shutdown_budget`. Connections still open when the budget expires are
/// forced closed by dropping the serve future.
pub async fn run<F>(app: Router, addr: SocketAddr, shutdown_budget: Duration, stop_all: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");

    let (signal_tx, mut signal_rx) = watch::channel(None::<Instant>);
    let mut budget_rx = signal_rx.clone();

    let graceful = async move {
        wait_for_shutdown_signal().await;
        tracing::info!("shutdown signal received, draining in-flight requests");
        let _ = signal_tx.send(Some(Instant::now()));
    };

    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    let serve_fut = axum::serve(listener, make_service).with_graceful_shutdown(graceful);

    let budget_enforcer = async move {
        loop {
            if budget_rx.borrow().is_some() {
                break;
            }
            if budget_rx.changed().await.is_err() {
                return;
            }
        }
        tokio::time::sleep(shutdown_budget).await;
    };

    tokio::select! {
        res = serve_fut => res?,
        _ = budget_enforcer => {
            tracing::warn!("graceful shutdown exceeded its budget, forcing remaining connections closed");
        }
    }

    let stop_budget = match *signal_rx.borrow() {
        Some(signaled_at) => shutdown_budget.saturating_sub(signaled_at.elapsed()),
        None => shutdown_budget,
    };

    tracing::info!("shutting down services");
    if tokio::time::timeout(stop_budget, stop_all).await.is_err() {
        tracing::warn!("service stop did not complete within the remaining shutdown budget");
    }

    Ok(())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
