//! Mock implementations of core traits for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::{traits::CredentialValidator, types::Identity, Error, Result};

// =============================================================================
// Mock Credential Validator
// =============================================================================

/// Accepts a fixed set of tokens; everything else is unauthorized.
#[derive(Default)]
pub struct MockCredentialValidator {
    tokens: Mutex<HashMap<String, Identity>>,
    expired: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl MockCredentialValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `token` as `user_id`.
    pub fn with_token(self, token: &str, user_id: &str) -> Self {
        self.tokens.lock().unwrap().insert(
            token.to_string(),
            Identity {
                user_id: user_id.to_string(),
                expires_at: u64::MAX,
            },
        );
        self
    }

    /// Reject `token` as expired.
    pub fn with_expired(self, token: &str) -> Self {
        self.expired.lock().unwrap().push(token.to_string());
        self
    }

    /// Number of validation calls made.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialValidator for MockCredentialValidator {
    async fn validate(&self, token: &str) -> Result<Identity> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.expired.lock().unwrap().iter().any(|t| t == token) {
            return Err(Error::unauthorized("token expired"));
        }
        self.tokens
            .lock()
            .unwrap()
            .get(token)
            .cloned()
            .ok_or_else(|| Error::unauthorized("invalid token"))
    }
}
