//! In-memory stores using DashMap.

use async_trait::async_trait;
use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

use code_play_core::{
    traits::{RecordStore, SandboxRegistry},
    types::{ProjectRecord, RegistryEntry, Sandbox, SandboxId},
    Error, Result,
};

// =============================================================================
// In-Memory Registry
// =============================================================================

/// Registry that keeps entries in process memory and honours their TTL.
///
/// Expiry is checked lazily on read.
#[derive(Default)]
pub struct InMemoryRegistry {
    entries: DashMap<SandboxId, (RegistryEntry, Instant)>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries, including expired ones not yet read.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl SandboxRegistry for InMemoryRegistry {
    async fn put(&self, id: &SandboxId, entry: &RegistryEntry, ttl: Duration) -> Result<()> {
        self.entries
            .insert(id.clone(), (entry.clone(), Instant::now() + ttl));
        Ok(())
    }

    async fn get(&self, id: &SandboxId) -> Result<Option<RegistryEntry>> {
        let expired = match self.entries.get(id) {
            Some(slot) if slot.1 > Instant::now() => return Ok(Some(slot.0.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(id);
            tracing::debug!(sandbox_id = %id, "Registry entry expired");
        }
        Ok(None)
    }

    async fn delete(&self, id: &SandboxId) -> Result<()> {
        self.entries.remove(id);
        Ok(())
    }
}

// =============================================================================
// In-Memory Record Store
// =============================================================================

/// Record store backed by process memory.
#[derive(Default)]
pub struct InMemoryRecordStore {
    sandboxes: DashMap<SandboxId, Sandbox>,
    projects: DashMap<String, ProjectRecord>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn project_count(&self) -> usize {
        self.projects.len()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn insert_sandbox(&self, sandbox: &Sandbox) -> Result<()> {
        if self.sandboxes.contains_key(&sandbox.id) {
            return Err(Error::storage(format!("Sandbox {} already exists", sandbox.id)));
        }
        self.sandboxes.insert(sandbox.id.clone(), sandbox.clone());
        Ok(())
    }

    async fn get_sandbox(&self, id: &SandboxId) -> Result<Option<Sandbox>> {
        Ok(self.sandboxes.get(id).map(|s| s.clone()))
    }

    async fn update_sandbox(&self, sandbox: &Sandbox) -> Result<()> {
        match self.sandboxes.get_mut(&sandbox.id) {
            Some(mut slot) => {
                *slot = sandbox.clone();
                Ok(())
            }
            None => Err(Error::not_found(format!("sandbox {}", sandbox.id))),
        }
    }

    async fn delete_sandbox(&self, id: &SandboxId) -> Result<bool> {
        Ok(self.sandboxes.remove(id).is_some())
    }

    async fn insert_project(&self, project: &ProjectRecord) -> Result<()> {
        if self.projects.contains_key(&project.id) {
            return Err(Error::storage(format!("Project {} already exists", project.id)));
        }
        self.projects.insert(project.id.clone(), project.clone());
        Ok(())
    }

    async fn get_project(&self, id: &str) -> Result<Option<ProjectRecord>> {
        Ok(self.projects.get(id).map(|p| p.clone()))
    }

    async fn delete_project(&self, id: &str) -> Result<bool> {
        // Sandboxes belonging to the project go with it.
        self.sandboxes.retain(|_, s| s.project_id != id);
        Ok(self.projects.remove(id).is_some())
    }
}
