use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::Notify;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use gitfusion::api::{self, AppState};
use gitfusion::cache::Manager;
use gitfusion::config::Config;
use gitfusion::control_plane::{FileControlPlane, GitServerService};
use gitfusion::providers::default_registry;
use gitfusion::services::{
    spawn_warm_up, BranchDispatcher, BranchService, OrganizationDispatcher, OrganizationService,
    PipelineDispatcher, PipelineService, PullRequestDispatcher, PullRequestService,
    RepositoryDispatcher, RepositoryService,
};

/// How long in-flight requests get to finish after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;

    let control_plane = Arc::new(FileControlPlane::new(
        config.control_plane_dir.clone(),
        config.namespace.clone(),
    ));
    let git_servers = GitServerService::new(control_plane);

    let registry = default_registry();

    let repositories = Arc::new(RepositoryDispatcher::new(registry.clone()));
    let organizations = Arc::new(OrganizationDispatcher::new(registry.clone()));
    let branches = Arc::new(BranchDispatcher::new(registry.clone()));
    let pull_requests = Arc::new(PullRequestDispatcher::new(registry.clone()));
    let pipelines = Arc::new(PipelineDispatcher::new(registry));

    let cache_manager = Arc::new(Manager::new(
        Arc::new(repositories.cache()),
        Arc::new(organizations.cache()),
        Arc::new(branches.cache()),
        Arc::new(pull_requests.cache()),
        Arc::new(pipelines.cache()),
    ));

    let warm_up = spawn_warm_up(git_servers.clone(), organizations.clone());

    let state = AppState {
        repositories: Arc::new(RepositoryService::new(git_servers.clone(), repositories)),
        organizations: Arc::new(OrganizationService::new(git_servers.clone(), organizations)),
        branches: Arc::new(BranchService::new(git_servers.clone(), branches)),
        pull_requests: Arc::new(PullRequestService::new(git_servers.clone(), pull_requests)),
        pipelines: Arc::new(PipelineService::new(git_servers, pipelines)),
        cache_manager,
    };

    let app = api::router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!(addr = %addr, namespace = %config.namespace, "gitfusion-api listening");

    // Drain connections on SIGINT/SIGTERM; give up after the grace
    // period rather than hanging forever.
    let drain = Arc::new(Notify::new());
    let drain_rx = drain.clone();

    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received, draining connections");
        drain.notify_one();

        tokio::time::sleep(SHUTDOWN_GRACE).await;
        error!("graceful shutdown deadline exceeded, aborting");
        std::process::exit(1);
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { drain_rx.notified().await })
        .await
        .context("server error")?;

    warm_up.abort();
    info!("shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "failed to install SIGINT handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => error!(error = %err, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
