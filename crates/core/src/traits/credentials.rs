//! Bearer credential validation.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::Identity;

/// Validates a bearer credential and resolves the caller identity.
///
/// Implementations must fail with `Error::Unauthorized` for missing, malformed
/// or expired credentials.
#[async_trait]
pub trait CredentialValidator: Send + Sync {
    async fn validate(&self, token: &str) -> Result<Identity>;
}
