use serde::{Deserialize, Serialize};

/// Caller identity resolved from a bearer credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Subject of the credential.
    pub user_id: String,
    /// Expiry as a unix timestamp (seconds).
    pub expires_at: u64,
}
