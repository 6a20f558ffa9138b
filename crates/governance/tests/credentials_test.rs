//! Integration tests for bearer credential validation.

use jsonwebtoken::{encode, EncodingKey, Header};
use secrecy::Secret;
use serde_json::json;
use std::time::Duration;

use code_play_core::traits::CredentialValidator;
use code_play_core::Error;
use code_play_governance::JwtCredentialValidator;

const SECRET: &str = "integration-secret";

fn validator() -> JwtCredentialValidator {
    JwtCredentialValidator::new(&Secret::new(SECRET.to_string()))
}

#[tokio::test]
async fn test_backend_token_with_id_claim() {
    // The web backend signs `{ id, githubId, username }` plus an expiry
    let exp = chrono::Utc::now().timestamp() + 3600;
    let token = encode(
        &Header::default(),
        &json!({ "id": "cuid-42", "githubId": 7, "username": "octo", "exp": exp }),
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap();

    let identity = validator().validate(&token).await.unwrap();
    assert_eq!(identity.user_id, "cuid-42");
    assert_eq!(identity.expires_at, exp as u64);
}

#[tokio::test]
async fn test_token_without_expiry_is_rejected() {
    let token = encode(
        &Header::default(),
        &json!({ "sub": "user-1" }),
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap();

    assert!(matches!(
        validator().validate(&token).await,
        Err(Error::Unauthorized(_))
    ));
}

#[tokio::test]
async fn test_usable_through_trait_object() {
    let auth = validator();
    let token = auth.issue("user-9", Duration::from_secs(60)).unwrap();

    let dynamic: &dyn CredentialValidator = &auth;
    assert_eq!(dynamic.validate(&token).await.unwrap().user_id, "user-9");
}
