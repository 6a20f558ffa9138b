//! Bearer credential validation with HS256 JSON Web Tokens.

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use code_play_core::traits::CredentialValidator;
use code_play_core::types::Identity;
use code_play_core::{Error, Result};

/// Token claims. `id` is accepted as the subject for tokens issued by the web backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    #[serde(alias = "id")]
    pub sub: String,
    /// Expiry, unix seconds.
    pub exp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

/// Validates HS256 tokens signed with the shared secret.
pub struct JwtCredentialValidator {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl JwtCredentialValidator {
    pub fn new(secret: &Secret<String>) -> Self {
        let key = secret.expose_secret().as_bytes();
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        Self {
            encoding: EncodingKey::from_secret(key),
            decoding: DecodingKey::from_secret(key),
            validation,
        }
    }

    /// Sign a token for `user_id` valid for `ttl`.
    pub fn issue(&self, user_id: &str, ttl: Duration) -> Result<String> {
        let claims = Claims {
            sub: user_id.to_string(),
            exp: Utc::now().timestamp().max(0) as u64 + ttl.as_secs(),
            username: None,
        };
        self.sign(&claims)
    }

    pub fn sign(&self, claims: &Claims) -> Result<String> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| Error::internal(format!("Failed to sign token: {}", e)))
    }
}

#[async_trait]
impl CredentialValidator for JwtCredentialValidator {
    async fn validate(&self, token: &str) -> Result<Identity> {
        let token = token.trim();
        let token = token.strip_prefix("Bearer ").unwrap_or(token).trim();
        if token.is_empty() {
            return Err(Error::unauthorized("missing credential"));
        }

        let data = decode::<Claims>(token, &self.decoding, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => Error::unauthorized("token expired"),
                _ => Error::unauthorized(format!("invalid token: {}", e)),
            }
        })?;

        Ok(Identity {
            user_id: data.claims.sub,
            expires_at: data.claims.exp,
        })
    }
}
