//! Ephemeral registry trait.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;
use crate::types::{RegistryEntry, SandboxId};

/// Default lifetime of a registry entry.
pub const REGISTRY_TTL: Duration = Duration::from_secs(24 * 3600);

/// TTL-capable store mapping a sandbox to its container.
///
/// Advisory only: the record store owns the sandbox status. An entry may vanish
/// at any time once its TTL elapses.
#[async_trait]
pub trait SandboxRegistry: Send + Sync {
    /// Write (or overwrite) the entry for a sandbox with the given lifetime.
    async fn put(&self, id: &SandboxId, entry: &RegistryEntry, ttl: Duration) -> Result<()>;

    /// Get the entry for a sandbox, if present and not expired.
    async fn get(&self, id: &SandboxId) -> Result<Option<RegistryEntry>>;

    /// Remove the entry. Removing an absent entry is not an error.
    async fn delete(&self, id: &SandboxId) -> Result<()>;

    /// Release any connection held by the registry.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
