//! FABRIC Ceph Manager - 多集群 CephX 用户管理服务
//!
//! 通过各集群的 Ceph Dashboard REST API 管理 CephX 用户，
//! 并通过 SSH 在集群间同步同一用户的 keyring

pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod infra;
pub mod logging;
pub mod metrics;
pub mod middleware;
pub mod services;
pub mod state;

use anyhow::Context;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::metrics::Metrics;
use crate::state::AppState;

/// 启动 API 与 metrics 两个 HTTP 服务，直到收到 Ctrl-C / SIGTERM
pub async fn run(config: Config) -> anyhow::Result<()> {
    let api_port = config.runtime.port;
    let metrics_port = config.runtime.metrics_port;

    let metrics = Arc::new(Metrics::new().context("failed to register metrics")?);
    let state = Arc::new(AppState::new(config, metrics.clone())?);

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    let api_listener = TcpListener::bind(("0.0.0.0", api_port))
        .await
        .with_context(|| format!("failed to bind API port {}", api_port))?;
    let metrics_listener = TcpListener::bind(("0.0.0.0", metrics_port))
        .await
        .with_context(|| format!("failed to bind metrics port {}", metrics_port))?;

    info!(
        version = crate::config::constants::VERSION,
        port = api_port,
        metrics_port = metrics_port,
        "FABRIC Ceph manager listening"
    );

    let api_token = shutdown.clone();
    let api_server = axum::serve(api_listener, api::router(state))
        .with_graceful_shutdown(async move { api_token.cancelled().await });
    let metrics_token = shutdown.clone();
    let metrics_server = axum::serve(metrics_listener, metrics::router(metrics))
        .with_graceful_shutdown(async move { metrics_token.cancelled().await });

    let (api_result, metrics_result) =
        tokio::join!(async { api_server.await }, async { metrics_server.await });
    api_result.context("API server failed")?;
    metrics_result.context("metrics server failed")?;

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
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
    info!("Shutdown signal received, stopping servers");
    token.cancel();
}
