#![deny(unused)]
//! Code Play - browser playground backend.
//!
//! Runs user code in per-project Docker sandboxes and exposes them over an
//! HTTP and WebSocket API.

use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;

use code_play_core::config::AppConfig;
use code_play_core::traits::{CredentialValidator, RecordStore, SandboxRegistry};
use code_play_gateway::{AppState, GatewayConfig, GatewayServer};
use code_play_governance::JwtCredentialValidator;
use code_play_sandbox::{ContainerBackend, DockerBackend, OrchestratorConfig, SandboxOrchestrator};
use code_play_scaffold::{ProjectCreator, Scaffolder, TemplateCatalog, ViteInstantiator};
use code_play_store::redis::redacted_url;
use code_play_store::{InMemoryRecordStore, InMemoryRegistry, RedisSandboxRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().context("Failed to load configuration")?;

    code_play_governance::configure_tracing(&config.telemetry)?;
    tracing::info!("Starting Code Play v{}", env!("CARGO_PKG_VERSION"));

    let metrics_handle = code_play_governance::setup_metrics_recorder()?;

    let jwt_secret = config
        .auth
        .jwt_secret
        .clone()
        .context("auth.jwt_secret is required (set APP__AUTH__JWT_SECRET)")?;

    // =========================================================================
    // Container runtime
    // =========================================================================
    let backend = Arc::new(
        DockerBackend::connect(
            config.docker.socket_path.as_deref(),
            Duration::from_secs(config.docker.remove_grace_secs),
        )?
        .with_exec_timeout(config.execution.timeout()),
    );
    if !backend.is_available().await {
        anyhow::bail!("Docker daemon not reachable; is Docker running?");
    }
    backend.ensure_network(&config.docker.network).await?;
    if !backend.ensure_image(&config.docker.image).await? {
        tracing::warn!(
            image = %config.docker.image,
            "Sandbox image not found locally; build it with `docker build -t {} .` before creating sandboxes",
            config.docker.image
        );
    }

    // =========================================================================
    // Stores
    // =========================================================================
    let registry: Arc<dyn SandboxRegistry> = match &config.registry.redis_url {
        Some(url) => {
            tracing::info!(url = %redacted_url(url), "Using Redis sandbox registry");
            Arc::new(RedisSandboxRegistry::connect(url, &config.registry.key_prefix).await?)
        }
        None => {
            tracing::info!("Using in-memory sandbox registry");
            Arc::new(InMemoryRegistry::new())
        }
    };
    let records: Arc<dyn RecordStore> = Arc::new(InMemoryRecordStore::new());
    let credentials: Arc<dyn CredentialValidator> =
        Arc::new(JwtCredentialValidator::new(&jwt_secret));

    // =========================================================================
    // Services
    // =========================================================================
    let orchestrator = SandboxOrchestrator::new(
        backend,
        registry,
        records.clone(),
        credentials.clone(),
        OrchestratorConfig::from_app(&config),
    );
    match orchestrator.reap_orphans().await {
        Ok(0) => {}
        Ok(n) => tracing::info!(removed = n, "Removed orphaned sandbox containers"),
        Err(e) => tracing::warn!(error = %e, "Orphan sweep failed"),
    }

    let instantiator = ViteInstantiator::new(
        config.scaffold.program.clone(),
        Duration::from_secs(config.scaffold.timeout_secs),
    );
    let scaffolder = Arc::new(Scaffolder::new(TemplateCatalog::new(), Arc::new(instantiator)));
    let projects = Arc::new(ProjectCreator::new(records.clone(), scaffolder));

    // =========================================================================
    // Gateway
    // =========================================================================
    let state = AppState {
        orchestrator: orchestrator.clone(),
        projects,
        records,
        credentials,
    };
    let server = GatewayServer::new(GatewayConfig::from_server(&config.server), state)
        .with_metrics(metrics_handle);

    server.run(shutdown_signal()).await?;

    if let Err(e) = orchestrator.shutdown().await {
        tracing::warn!(error = %e, "Registry close failed");
    }
    code_play_governance::shutdown_tracing();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
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
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
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
    tracing::info!("Shutdown signal received");
}
