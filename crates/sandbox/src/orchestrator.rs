//! Sandbox orchestrator.
//!
//! Owns the lifecycle of every sandbox: provisioning a container, running
//! commands in it, attaching terminals, stopping and deleting. Each sandbox has
//! its own lock; different sandboxes never contend with each other.

use dashmap::DashMap;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use code_play_core::config::AppConfig;
use code_play_core::traits::{CredentialValidator, RecordStore, SandboxRegistry, REGISTRY_TTL};
use code_play_core::types::{
    ExecutionResult, RegistryEntry, Sandbox, SandboxId, SandboxStatus, UNKNOWN_EXIT_CODE,
};
use code_play_core::{Error, Result};

use crate::demux::OutputCollector;
use crate::engine::{
    ContainerBackend, ContainerHandle, ContainerSpec, ResourceLimits, ShellSession,
    PROJECT_ID_LABEL, SANDBOX_ID_LABEL,
};
use crate::state::{Lifecycle, LifecycleEvent, StopTicket};

type Slot = Arc<Mutex<Lifecycle>>;

// =============================================================================
// Configuration
// =============================================================================

/// Orchestrator settings.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Image every sandbox runs.
    pub image: String,
    /// Internal bridge network sandboxes join.
    pub network: String,
    /// Default working directory for commands and terminals.
    pub workdir: String,
    pub limits: ResourceLimits,
    pub stop_grace: Duration,
    /// Upper bound for one `execute` call, output collection included.
    pub exec_timeout: Duration,
    pub registry_ttl: Duration,
    pub shell: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            image: "code-play-sandbox:latest".into(),
            network: "code-play-network".into(),
            workdir: "/workspace".into(),
            limits: ResourceLimits::default(),
            stop_grace: Duration::from_secs(10),
            exec_timeout: Duration::from_secs(30),
            registry_ttl: REGISTRY_TTL,
            shell: "/bin/sh".into(),
        }
    }
}

impl OrchestratorConfig {
    pub fn from_app(config: &AppConfig) -> Self {
        Self {
            image: config.docker.image.clone(),
            network: config.docker.network.clone(),
            workdir: config.docker.workdir.clone(),
            limits: ResourceLimits {
                memory_bytes: config.docker.memory_bytes,
                cpu_share: config.docker.cpu_share,
            },
            stop_grace: config.docker.stop_grace(),
            exec_timeout: config.execution.timeout(),
            registry_ttl: config.registry.ttl(),
            shell: config.execution.shell.clone(),
        }
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Coordinates the container backend, the registry and the record store.
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct SandboxOrchestrator {
    backend: Arc<dyn ContainerBackend>,
    registry: Arc<dyn SandboxRegistry>,
    records: Arc<dyn RecordStore>,
    credentials: Arc<dyn CredentialValidator>,
    config: Arc<OrchestratorConfig>,
    slots: Arc<DashMap<SandboxId, Slot>>,
}

impl SandboxOrchestrator {
    pub fn new(
        backend: Arc<dyn ContainerBackend>,
        registry: Arc<dyn SandboxRegistry>,
        records: Arc<dyn RecordStore>,
        credentials: Arc<dyn CredentialValidator>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            backend,
            registry,
            records,
            credentials,
            config: Arc::new(config),
            slots: Arc::new(DashMap::new()),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Create a sandbox for `project_id` and wait until it is running.
    ///
    /// Provisioning runs in its own task so that a caller going away cannot
    /// leave a half-created container behind: the task always finishes with
    /// the sandbox either `running` or `failed` (container removed).
    pub async fn create(&self, project_id: &str) -> Result<Sandbox> {
        let id = SandboxId::generate();
        let record = Sandbox::new(id.clone(), project_id);
        self.records.insert_sandbox(&record).await?;

        let slot: Slot = Arc::new(Mutex::new(Lifecycle::new(record)));
        self.slots.insert(id.clone(), Arc::clone(&slot));
        record_transition(SandboxStatus::Creating);
        tracing::info!(sandbox_id = %id, project_id = %project_id, "Creating sandbox");

        let this = self.clone();
        let project_id = project_id.to_string();
        tokio::spawn(async move { this.provision(id, project_id, slot).await })
            .await
            .map_err(|e| Error::internal(format!("Provisioning task aborted: {}", e)))?
    }

    /// Current record of a sandbox.
    pub async fn get(&self, id: &SandboxId) -> Result<Sandbox> {
        let slot = self.slot(id).await?;
        let record = slot.lock().await.record().clone();
        Ok(record)
    }

    /// Run `command` through the shell inside a running sandbox.
    ///
    /// A non-zero exit code is a normal result. `cwd` defaults to the
    /// configured working directory.
    pub async fn execute(
        &self,
        id: &SandboxId,
        command: &str,
        cwd: Option<&str>,
    ) -> Result<ExecutionResult> {
        if command.trim().is_empty() {
            return Err(Error::invalid_request("command must not be empty"));
        }

        let slot = self.slot(id).await?;
        let handle = slot.lock().await.require_running()?;
        self.require_registered(id).await?;

        let cwd = cwd.unwrap_or(&self.config.workdir);
        let started = Instant::now();
        let result = tokio::time::timeout(
            self.config.exec_timeout,
            self.run_exec(&handle, command, cwd),
        )
        .await
        .map_err(|_| {
            Error::timeout(format!(
                "command in sandbox {} did not finish within {}s",
                id,
                self.config.exec_timeout.as_secs()
            ))
        })?;

        let elapsed = started.elapsed();
        metrics::histogram!("sandbox_exec_duration_seconds").record(elapsed.as_secs_f64());

        match &result {
            Ok(output) => tracing::info!(
                sandbox_id = %id,
                exit_code = output.exit_code,
                duration_ms = elapsed.as_millis() as u64,
                "Command executed"
            ),
            Err(e) => tracing::warn!(sandbox_id = %id, error = %e, "Command failed"),
        }
        result
    }

    /// Stop a running sandbox. Stopping a stopped sandbox is a no-op.
    ///
    /// A stop that arrives while another stop or a delete is in flight waits
    /// for it and reports its outcome.
    pub async fn stop(&self, id: &SandboxId) -> Result<Sandbox> {
        let slot = self.slot(id).await?;
        let mut lifecycle = slot.lock().await;
        let ticket = lifecycle.begin_stop()?;
        let handle = match ticket {
            StopTicket::Stop(handle) => handle,
            StopTicket::Stopped => return Ok(lifecycle.record().clone()),
            StopTicket::Wait(done) => {
                let notified = done.notified();
                drop(lifecycle);
                notified.await;

                let lifecycle = slot.lock().await;
                if lifecycle.is_discarded() {
                    return Err(Error::not_found(format!("sandbox {}", id)));
                }
                return match lifecycle.status() {
                    SandboxStatus::Stopped => Ok(lifecycle.record().clone()),
                    status => Err(Error::not_running(id.as_str(), status)),
                };
            }
        };
        drop(lifecycle);

        match self.backend.stop(&handle, self.config.stop_grace).await {
            Ok(()) => {
                let record = {
                    let mut lifecycle = slot.lock().await;
                    let applied = lifecycle.apply(LifecycleEvent::Stopped);
                    lifecycle.end_teardown();
                    applied?;
                    lifecycle.record().clone()
                };
                if let Err(e) = self.registry.delete(id).await {
                    tracing::warn!(sandbox_id = %id, error = %e, "Failed to remove registry entry");
                }
                self.records.update_sandbox(&record).await?;
                record_transition(SandboxStatus::Stopped);
                tracing::info!(sandbox_id = %id, container_id = %handle, "Sandbox stopped");
                Ok(record)
            }
            Err(e) => {
                self.fail_teardown(id, &slot).await;
                tracing::error!(sandbox_id = %id, error = %e, "Failed to stop sandbox");
                Err(e)
            }
        }
    }

    /// Remove a sandbox and its container. Works from any state.
    pub async fn delete(&self, id: &SandboxId) -> Result<()> {
        let existing = self.slots.get(id).map(|slot| Arc::clone(slot.value()));
        let slot = match existing {
            Some(slot) => slot,
            // Records left by a previous process are deletable even when stale
            None => match self.records.get_sandbox(id).await? {
                Some(record) => Arc::new(Mutex::new(Lifecycle::new(record))),
                None => return Err(Error::not_found(format!("sandbox {}", id))),
            },
        };

        let handle = slot.lock().await.begin_delete();
        if let Some(handle) = handle {
            if let Err(e) = self.backend.remove(&handle, true).await {
                let record = {
                    let mut lifecycle = slot.lock().await;
                    lifecycle.abort_delete();
                    lifecycle.end_teardown();
                    lifecycle.record().clone()
                };
                if let Err(store_err) = self.records.update_sandbox(&record).await {
                    tracing::warn!(sandbox_id = %id, error = %store_err, "Failed to persist failed status");
                }
                record_transition(SandboxStatus::Failed);
                tracing::error!(sandbox_id = %id, error = %e, "Failed to remove sandbox container");
                return Err(e);
            }
        }

        if let Err(e) = self.registry.delete(id).await {
            tracing::warn!(sandbox_id = %id, error = %e, "Failed to remove registry entry");
        }
        slot.lock().await.end_teardown();
        self.records.delete_sandbox(id).await?;
        self.slots.remove(id);

        tracing::info!(sandbox_id = %id, "Sandbox deleted");
        Ok(())
    }

    /// Attach an interactive shell for the holder of `credential`.
    ///
    /// The credential is checked before anything else is looked up; a sandbox
    /// belonging to another user is reported as not found.
    pub async fn attach_terminal(&self, id: &SandboxId, credential: &str) -> Result<ShellSession> {
        let identity = self.credentials.validate(credential).await?;

        let slot = self.slot(id).await?;
        let project_id = slot.lock().await.record().project_id.clone();
        match self.records.get_project(&project_id).await? {
            Some(project) if project.owner_id == identity.user_id => {}
            _ => {
                tracing::warn!(sandbox_id = %id, user_id = %identity.user_id, "Terminal refused: not the owner");
                return Err(Error::not_found(format!("sandbox {}", id)));
            }
        }

        let handle = slot.lock().await.require_running()?;
        self.require_registered(id).await?;

        let session = self
            .backend
            .attach_shell(&handle, &self.config.shell, &self.config.workdir)
            .await?;
        tracing::info!(
            sandbox_id = %id,
            user_id = %identity.user_id,
            exec_id = %session.exec_id,
            "Terminal attached"
        );
        Ok(session)
    }

    /// Remove managed containers with no registry entry and no live sandbox.
    ///
    /// Returns how many containers were removed.
    pub async fn reap_orphans(&self) -> Result<usize> {
        let containers = self.backend.list().await?;
        let mut reaped = 0;

        for container in containers {
            let Some(sandbox_id) = container.sandbox_id() else {
                continue;
            };
            let id = SandboxId::from(sandbox_id);
            if self.slots.contains_key(&id) || self.registry.get(&id).await?.is_some() {
                continue;
            }

            match self.backend.remove(&container.handle, true).await {
                Ok(()) => {
                    reaped += 1;
                    tracing::info!(sandbox_id = %id, container_id = %container.handle, "Removed orphaned container");
                }
                Err(e) => {
                    tracing::warn!(sandbox_id = %id, error = %e, "Failed to remove orphaned container")
                }
            }
        }

        Ok(reaped)
    }

    /// Release the registry connection.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!(live_sandboxes = self.slots.len(), "Orchestrator shutting down");
        self.registry.close().await
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn provision(&self, id: SandboxId, project_id: String, slot: Slot) -> Result<Sandbox> {
        let spec = self.container_spec(&id, &project_id);
        let mut created: Option<ContainerHandle> = None;

        let outcome = async {
            let handle = self
                .backend
                .create(&spec)
                .await
                .map_err(|e| ("create", e))?;
            created = Some(handle.clone());
            self.backend
                .start(&handle)
                .await
                .map_err(|e| ("start", e))?;
            let entry = RegistryEntry::new(handle.as_str(), project_id.as_str());
            self.registry
                .put(&id, &entry, self.config.registry_ttl)
                .await
                .map_err(|e| ("register", e))?;
            Ok::<_, (&'static str, Error)>(handle)
        }
        .await;

        match outcome {
            Ok(handle) => self.finish_provisioning(&id, &slot, handle).await,
            Err((step, cause)) => Err(self.fail_provisioning(&id, &slot, created, step, cause).await),
        }
    }

    async fn finish_provisioning(
        &self,
        id: &SandboxId,
        slot: &Slot,
        handle: ContainerHandle,
    ) -> Result<Sandbox> {
        let record = {
            let mut lifecycle = slot.lock().await;
            if lifecycle.is_discarded() {
                None
            } else {
                lifecycle.apply(LifecycleEvent::ContainerStarted {
                    container_id: handle.0.clone(),
                })?;
                Some(lifecycle.record().clone())
            }
        };

        let Some(record) = record else {
            tracing::info!(sandbox_id = %id, "Sandbox deleted while provisioning, discarding container");
            if let Err(e) = self.backend.remove(&handle, true).await {
                tracing::warn!(sandbox_id = %id, error = %e, "Failed to remove discarded container");
            }
            if let Err(e) = self.registry.delete(id).await {
                tracing::warn!(sandbox_id = %id, error = %e, "Failed to remove registry entry");
            }
            return Err(Error::not_found(format!("sandbox {} (deleted)", id)));
        };

        self.records.update_sandbox(&record).await?;
        record_transition(SandboxStatus::Running);
        tracing::info!(sandbox_id = %id, container_id = %handle, "Sandbox running");
        Ok(record)
    }

    /// Clean up after a provisioning failure and build the error for the caller.
    async fn fail_provisioning(
        &self,
        id: &SandboxId,
        slot: &Slot,
        created: Option<ContainerHandle>,
        step: &str,
        cause: Error,
    ) -> Error {
        let mut cleanup = String::new();
        if let Some(handle) = &created {
            if let Err(e) = self.backend.remove(handle, true).await {
                cleanup = format!("; removing container {} also failed: {}", handle, e);
            }
        }

        let record = {
            let mut lifecycle = slot.lock().await;
            if lifecycle.apply(LifecycleEvent::ProvisioningFailed).is_err() {
                lifecycle.mark_failed();
            }
            (!lifecycle.is_discarded()).then(|| lifecycle.record().clone())
        };
        if let Some(record) = record {
            if let Err(e) = self.records.update_sandbox(&record).await {
                tracing::warn!(sandbox_id = %id, error = %e, "Failed to persist failed status");
            }
        }

        record_transition(SandboxStatus::Failed);
        tracing::error!(sandbox_id = %id, step = step, error = %cause, "Sandbox provisioning failed");
        Error::runtime(format!(
            "Sandbox {} failed during {}: {}{}",
            id, step, cause, cleanup
        ))
    }

    /// A stop failed: the sandbox can no longer be trusted.
    async fn fail_teardown(&self, id: &SandboxId, slot: &Slot) {
        let record = {
            let mut lifecycle = slot.lock().await;
            if lifecycle.apply(LifecycleEvent::TeardownFailed).is_err() {
                lifecycle.mark_failed();
            }
            lifecycle.end_teardown();
            lifecycle.record().clone()
        };
        if let Err(e) = self.records.update_sandbox(&record).await {
            tracing::warn!(sandbox_id = %id, error = %e, "Failed to persist failed status");
        }
        record_transition(SandboxStatus::Failed);
    }

    async fn run_exec(
        &self,
        handle: &ContainerHandle,
        command: &str,
        cwd: &str,
    ) -> Result<ExecutionResult> {
        let mut session = self
            .backend
            .exec(handle, &self.config.shell, command, cwd)
            .await?;

        let mut collector = OutputCollector::new();
        while let Some(chunk) = session.output.next().await {
            collector.feed(chunk?)?;
        }
        let (stdout, stderr) = collector.finish()?;

        let exit_code = match self.backend.exec_exit_code(&session.exec_id).await {
            Ok(Some(code)) => code,
            Ok(None) => UNKNOWN_EXIT_CODE,
            Err(e) => {
                tracing::warn!(exec_id = %session.exec_id, error = %e, "Could not read exit code");
                UNKNOWN_EXIT_CODE
            }
        };

        Ok(ExecutionResult {
            stdout,
            stderr,
            exit_code,
        })
    }

    /// Slot for `id`, rehydrated from the record store after a restart.
    async fn slot(&self, id: &SandboxId) -> Result<Slot> {
        if let Some(slot) = self.slots.get(id) {
            return Ok(Arc::clone(slot.value()));
        }

        let record = self
            .records
            .get_sandbox(id)
            .await?
            .ok_or_else(|| Error::not_found(format!("sandbox {}", id)))?;

        // A running record whose registry entry expired has no known container
        if record.status == SandboxStatus::Running && self.registry.get(id).await?.is_none() {
            return Err(Error::not_found(format!(
                "sandbox {} (registry entry expired)",
                id
            )));
        }

        let slot = self
            .slots
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(Lifecycle::new(record))));
        Ok(Arc::clone(slot.value()))
    }

    async fn require_registered(&self, id: &SandboxId) -> Result<()> {
        match self.registry.get(id).await? {
            Some(_) => Ok(()),
            None => Err(Error::not_found(format!(
                "sandbox {} (no live container registered)",
                id
            ))),
        }
    }

    fn container_spec(&self, id: &SandboxId, project_id: &str) -> ContainerSpec {
        ContainerSpec {
            image: self.config.image.clone(),
            name: id.container_name(),
            env: vec![
                format!("PROJECT_ID={}", project_id),
                format!("SANDBOX_ID={}", id),
            ],
            limits: self.config.limits,
            network: self.config.network.clone(),
            workdir: self.config.workdir.clone(),
            labels: HashMap::from([
                (SANDBOX_ID_LABEL.to_string(), id.to_string()),
                (PROJECT_ID_LABEL.to_string(), project_id.to_string()),
            ]),
        }
    }
}

fn record_transition(to: SandboxStatus) {
    metrics::counter!("sandbox_transitions_total", "status" => to.as_str()).increment(1);
}
