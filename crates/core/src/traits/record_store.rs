//! Durable record store trait.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{ProjectRecord, Sandbox, SandboxId};

/// Durable storage for sandbox and project metadata.
///
/// The schema belongs to the caller; the orchestrator only reads records for
/// ownership and recovery, and writes sandbox status and container id.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert a new sandbox record.
    async fn insert_sandbox(&self, sandbox: &Sandbox) -> Result<()>;

    /// Get a sandbox record by ID.
    async fn get_sandbox(&self, id: &SandboxId) -> Result<Option<Sandbox>>;

    /// Replace an existing sandbox record.
    async fn update_sandbox(&self, sandbox: &Sandbox) -> Result<()>;

    /// Delete a sandbox record. Returns whether a record was removed.
    async fn delete_sandbox(&self, id: &SandboxId) -> Result<bool>;

    /// Insert a new project record.
    async fn insert_project(&self, project: &ProjectRecord) -> Result<()>;

    /// Get a project record by ID.
    async fn get_project(&self, id: &str) -> Result<Option<ProjectRecord>>;

    /// Delete a project record. Returns whether a record was removed.
    async fn delete_project(&self, id: &str) -> Result<bool>;
}
