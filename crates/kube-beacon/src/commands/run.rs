//! `kube-beacon run`: watch the cluster until interrupted.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use kube::Client;
use tokio::signal;
use tracing::{error, info, warn};

use kube_beacon::background::BackgroundTasks;
use kube_beacon::build_info;
use kube_beacon::cluster::{ClusterApi, KubeCluster};
use kube_beacon::config::{Config, HealthConfig, MonitorsConfig, WatchScope};
use kube_beacon::events::{EnhancerPipeline, WatcherSettings, spawn_watchers};
use kube_beacon::monitor::informer::spawn_informers;
use kube_beacon::monitor::{CheckinStateMachine, MonitorIndex, MonitorSettings, SyncGroup};
use kube_beacon::ownership::OwnershipResolver;
use kube_beacon::scope::GlobalScope;
use kube_beacon::server::{self, AppState};
use kube_beacon::{backend, integrations};

pub async fn run(config_path: &str, namespaces_override: Option<&str>, historical: bool) -> Result<()> {
    let mut config = super::load_config(config_path).await?;

    // CLI overrides env and config
    if let Some(namespaces) = namespaces_override {
        config.watch.namespaces = namespaces.split(',').map(str::to_string).collect();
    }
    if historical {
        config.watch.historical = true;
    }

    let watch_scope = config.watch_scope().context("Invalid watch namespaces")?;
    info!(version = %build_info::version_string(), scope = %watch_scope, "Starting kube-beacon");

    let kube_config = kube::Config::infer()
        .await
        .context("Failed to load Kubernetes client configuration")?;
    let api_url = kube_config.cluster_url.to_string();
    let client = Client::try_from(kube_config).context("Failed to create Kubernetes client")?;

    let global = Arc::new(build_global_scope(&config, &client, &api_url).await);
    let backend = backend::from_config(&config.backend).context("Failed to configure backend")?;
    info!(backend = backend.name(), "Backend configured");

    let tasks = BackgroundTasks::new();
    let sync = SyncGroup::new();

    if config.health.enabled {
        start_health_server(&tasks, &config.health, sync.clone()).await?;
    }

    if config.monitors.enabled {
        let started = tokio::select! {
            result = start_monitors(&tasks, &client, &watch_scope, &config.monitors, backend.clone(), &sync) => Some(result),
            _ = shutdown_signal() => None,
        };
        match started {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                tasks.shutdown().await;
                return Err(e);
            }
            None => {
                tasks.shutdown().await;
                info!("Stopped before CronJob informers synced");
                return Ok(());
            }
        }
    } else {
        info!("CronJob monitors disabled");
    }

    let cluster: Arc<dyn ClusterApi> = Arc::new(KubeCluster::new(client.clone()));
    let settings = WatcherSettings::from_config(&config.watch);
    let pipeline = Arc::new(EnhancerPipeline::new(
        OwnershipResolver::new(cluster),
        global,
        settings.breadcrumb_limit,
    ));
    spawn_watchers(&tasks, &client, &watch_scope, pipeline, backend, &settings);

    shutdown_signal().await;
    tasks.shutdown().await;
    info!("kube-beacon stopped");
    Ok(())
}

/// Global tags, the Kubernetes context and integration metadata.
async fn build_global_scope(config: &Config, client: &Client, api_url: &str) -> GlobalScope {
    let mut scope = GlobalScope::with_tags(config.global_tags.clone());

    let server_version = match client.apiserver_version().await {
        Ok(info) => {
            info!(version = %info.git_version, "Connected to cluster");
            Some(info.git_version)
        }
        Err(e) => {
            error!(error = %e, "Error while getting cluster version");
            None
        }
    };
    scope.set_kubernetes(api_url, server_version.as_deref());

    integrations::apply_enabled(&config.integrations, &mut scope).await;
    scope
}

async fn start_monitors(
    tasks: &BackgroundTasks,
    client: &Client,
    watch_scope: &WatchScope,
    config: &MonitorsConfig,
    backend: Arc<dyn backend::Backend>,
    sync: &SyncGroup,
) -> Result<()> {
    let index = MonitorIndex::new(MonitorSettings {
        max_runtime_minutes: config.max_runtime_minutes,
        checkin_margin_minutes: config.checkin_margin_minutes,
    });
    let machine = CheckinStateMachine::new(index, backend);

    for namespace in watch_scope.namespaces() {
        spawn_informers(tasks, client, &namespace, &machine, sync);
    }

    let timeout = Duration::from_secs(config.sync_timeout_seconds);
    sync.wait_all(timeout)
        .await
        .context("CronJob and Job informers did not sync")?;
    info!(cronjobs = machine.index().len(), "CronJob monitors ready");
    Ok(())
}

async fn start_health_server(tasks: &BackgroundTasks, config: &HealthConfig, sync: SyncGroup) -> Result<()> {
    let ip: IpAddr = config
        .host
        .parse()
        .with_context(|| format!("Invalid health host '{}'", config.host))?;
    let addr = SocketAddr::new(ip, config.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind health server to {addr}"))?;

    let app = server::build_app(AppState::new(sync));
    let cancel = tasks.cancellation_token();
    info!(addr = %addr, "Starting health server");

    tasks.spawn("health-server", async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(cancel.cancelled_owned())
            .await
        {
            error!(error = %e, "Health server failed");
        }
    });
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}
