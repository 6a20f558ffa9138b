#![deny(unused)]
//! Sandbox orchestration for Code Play.
//!
//! Every sandbox is one container running an idle entry process. Commands are
//! run next to it through the runtime's exec facility, and interactive
//! terminals attach a TTY shell the same way.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────┐
//! │  Gateway (HTTP + WebSocket)            │
//! │    ↓ create / execute / stop / attach  │
//! ├────────────────────────────────────────┤
//! │  SandboxOrchestrator                   │
//! │    per-sandbox lifecycle lock          │
//! │    ↓ registry + record store           │
//! ├────────────────────────────────────────┤
//! │  ContainerBackend (DockerBackend)      │
//! │    ↓ Docker API via bollard            │
//! ├────────────────────────────────────────┤
//! │  Container (internal network only)     │
//! │    /workspace, 512MB, half a core      │
//! └────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use code_play_sandbox::{DockerBackend, OrchestratorConfig, SandboxOrchestrator};
//!
//! let backend = Arc::new(DockerBackend::connect(None, Duration::from_secs(5))?);
//! let orchestrator = SandboxOrchestrator::new(
//!     backend, registry, records, credentials, OrchestratorConfig::default(),
//! );
//!
//! let sandbox = orchestrator.create("project-1").await?;
//! let output = orchestrator.execute(&sandbox.id, "echo hi", None).await?;
//! ```

pub mod demux;
pub mod docker;
pub mod engine;
pub mod mock;
pub mod orchestrator;
pub mod relay;
pub mod state;

pub use docker::DockerBackend;
pub use engine::{
    ContainerBackend, ContainerHandle, ContainerInfo, ContainerSpec, ExecChunk, ExecSession,
    ResourceLimits, ShellSession, StreamChannel,
};
pub use mock::{ExecScript, MockBackend, MockOp};
pub use orchestrator::{OrchestratorConfig, SandboxOrchestrator};
pub use relay::{relay, RelayOutcome};
pub use state::{Lifecycle, LifecycleEvent};
