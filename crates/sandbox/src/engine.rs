//! Container backend adapter.
//!
//! This module provides the `ContainerBackend` trait, a thin capability interface
//! over a container runtime. The Docker implementation lives in [`crate::docker`],
//! a scripted one for tests in [`crate::mock`].

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::pin::Pin;
use std::time::Duration;
use tokio::io::AsyncWrite;

use code_play_core::Result;

/// Label marking containers owned by this service.
pub const MANAGED_BY_LABEL: &str = "managed-by";
/// Value of [`MANAGED_BY_LABEL`].
pub const MANAGED_BY_VALUE: &str = "code-play-sandbox";
/// Label carrying the sandbox identifier.
pub const SANDBOX_ID_LABEL: &str = "code-play.sandbox-id";
/// Label carrying the project identifier.
pub const PROJECT_ID_LABEL: &str = "code-play.project-id";

/// Standard CFS scheduling period (100ms).
pub const CPU_PERIOD_MICROS: i64 = 100_000;

// =============================================================================
// Backend Types
// =============================================================================

/// Opaque reference to a runtime container.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct ContainerHandle(pub String);

impl ContainerHandle {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContainerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Container ids are long; the short form is what operators recognise.
        let short = match self.0.char_indices().nth(12) {
            Some((end, _)) => &self.0[..end],
            None => self.0.as_str(),
        };
        write!(f, "{}", short)
    }
}

/// Resource limits applied to every container. There is no unbounded variant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Hard memory limit in bytes. Swap is capped at the same value.
    pub memory_bytes: i64,
    /// Fraction of one CPU core.
    pub cpu_share: f64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_bytes: 512 * 1024 * 1024, // 512MB
            cpu_share: 0.5,
        }
    }
}

impl ResourceLimits {
    /// CFS quota for [`CPU_PERIOD_MICROS`].
    pub fn cpu_quota(&self) -> i64 {
        (self.cpu_share * CPU_PERIOD_MICROS as f64).round() as i64
    }
}

/// Everything needed to create one sandbox container.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub image: String,
    pub name: String,
    /// `KEY=value` pairs.
    pub env: Vec<String>,
    pub limits: ResourceLimits,
    pub network: String,
    pub workdir: String,
    pub labels: HashMap<String, String>,
}

/// Output channel of an executed process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamChannel {
    Stdout,
    Stderr,
}

/// A piece of exec output as handed over by the runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecChunk {
    /// Raw bytes in the runtime's multiplexed frame format.
    Multiplexed(Bytes),
    /// Bytes the runtime client already attributed to a channel.
    Output(StreamChannel, Bytes),
}

/// A started one-shot exec.
pub struct ExecSession {
    /// Runtime exec id, used to query the exit code.
    pub exec_id: String,
    /// Output until the process exits.
    pub output: BoxStream<'static, Result<ExecChunk>>,
}

/// An interactive process attached to a container.
pub struct ShellSession {
    pub exec_id: String,
    /// Process standard input.
    pub input: Pin<Box<dyn AsyncWrite + Send>>,
    /// Everything the process writes; ends when the process exits.
    pub output: BoxStream<'static, Result<Bytes>>,
}

impl std::fmt::Debug for ShellSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShellSession")
            .field("exec_id", &self.exec_id)
            .finish_non_exhaustive()
    }
}

/// Snapshot of a container as reported by the runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerInfo {
    pub handle: ContainerHandle,
    pub name: String,
    pub running: bool,
    pub labels: HashMap<String, String>,
}

impl ContainerInfo {
    /// Sandbox id recorded on the container, if it is one of ours.
    pub fn sandbox_id(&self) -> Option<&str> {
        self.labels.get(SANDBOX_ID_LABEL).map(String::as_str)
    }
}

// =============================================================================
// Container Backend Trait
// =============================================================================

/// Capability interface over a container runtime.
#[async_trait]
pub trait ContainerBackend: Send + Sync {
    /// Create (but do not start) a container.
    async fn create(&self, spec: &ContainerSpec) -> Result<ContainerHandle>;

    /// Start a created container.
    async fn start(&self, handle: &ContainerHandle) -> Result<()>;

    /// Run `command` through `shell -c` inside the container.
    async fn exec(
        &self,
        handle: &ContainerHandle,
        shell: &str,
        command: &str,
        cwd: &str,
    ) -> Result<ExecSession>;

    /// Exit code of a finished exec; `None` if the runtime reports no clean exit.
    async fn exec_exit_code(&self, exec_id: &str) -> Result<Option<i64>>;

    /// Start an interactive `shell` with a TTY and attach to its stdio.
    async fn attach_shell(
        &self,
        handle: &ContainerHandle,
        shell: &str,
        cwd: &str,
    ) -> Result<ShellSession>;

    /// Stop the container. Stopping a stopped container is a no-op.
    async fn stop(&self, handle: &ContainerHandle, grace: Duration) -> Result<()>;

    /// Remove the container: stop it with a short grace period (ignoring
    /// failures), then remove it. Removing a missing container is a no-op.
    async fn remove(&self, handle: &ContainerHandle, force: bool) -> Result<()>;

    /// Inspect a container.
    async fn inspect(&self, handle: &ContainerHandle) -> Result<ContainerInfo>;

    /// List every container managed by this service, running or not.
    async fn list(&self) -> Result<Vec<ContainerInfo>>;

    /// Create the bridge network if it does not exist.
    async fn ensure_network(&self, name: &str) -> Result<()>;

    /// Whether the image is present locally.
    async fn ensure_image(&self, reference: &str) -> Result<bool>;

    /// Check if the runtime is reachable.
    async fn is_available(&self) -> bool;
}
