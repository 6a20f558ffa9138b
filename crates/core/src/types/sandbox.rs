use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Sandbox Types
// =============================================================================

/// Unique identifier for a sandbox.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SandboxId(pub String);

impl SandboxId {
    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the runtime container backing this sandbox.
    pub fn container_name(&self) -> String {
        format!("sandbox-{}", self.0)
    }
}

impl std::fmt::Display for SandboxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SandboxId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Lifecycle status of a sandbox.
///
/// `stopped` and `failed` are terminal: recovering means creating a new sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxStatus {
    Creating,
    Running,
    Stopped,
    Failed,
}

impl SandboxStatus {
    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Creating => "creating",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SandboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user-facing ephemeral execution environment backed by one container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sandbox {
    pub id: SandboxId,
    pub project_id: String,
    pub status: SandboxStatus,
    /// Set once the container has been created; never null while `running`.
    pub container_id: Option<String>,
    /// Host port, if one was published. Sandboxes only join the internal network.
    pub port: Option<u16>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Sandbox {
    /// A new sandbox record in the `creating` state.
    pub fn new(id: SandboxId, project_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            project_id: project_id.into(),
            status: SandboxStatus::Creating,
            container_id: None,
            port: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `status`, touching `updated_at`.
    pub fn set_status(&mut self, status: SandboxStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

/// Recovery-cache entry kept in the ephemeral registry under `sandbox:<id>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryEntry {
    pub container_id: String,
    pub project_id: String,
    pub created_at: DateTime<Utc>,
}

impl RegistryEntry {
    pub fn new(container_id: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            container_id: container_id.into(),
            project_id: project_id.into(),
            created_at: Utc::now(),
        }
    }
}
