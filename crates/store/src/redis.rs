//! Redis implementation of the sandbox registry.

use ::redis::{aio::MultiplexedConnection, AsyncCommands, Client};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::RwLock;

use code_play_core::{
    traits::SandboxRegistry,
    types::{RegistryEntry, SandboxId},
    Error, Result,
};

/// `url` with any `user:password@` part masked, for logging.
pub fn redacted_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let authority_end = rest.find('/').unwrap_or(rest.len());
    match rest[..authority_end].rfind('@') {
        Some(at) => format!("{}://***@{}", scheme, &rest[at + 1..]),
        None => url.to_string(),
    }
}

/// Registry entries stored as JSON under `<prefix>:<sandbox id>` with `SETEX`.
pub struct RedisSandboxRegistry {
    prefix: String,
    conn: RwLock<Option<MultiplexedConnection>>,
}

impl RedisSandboxRegistry {
    /// Open a client and establish the shared multiplexed connection.
    pub async fn connect(url: &str, prefix: &str) -> Result<Self> {
        let client = Client::open(url)
            .map_err(|e| Error::storage(format!("Invalid Redis URL: {}", e)))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| Error::storage(format!("Failed to connect to Redis: {}", e)))?;

        tracing::info!(prefix = %prefix, "Redis registry connected");
        Ok(Self {
            prefix: prefix.to_string(),
            conn: RwLock::new(Some(conn)),
        })
    }

    fn key(&self, id: &SandboxId) -> String {
        format!("{}:{}", self.prefix, id)
    }

    async fn connection(&self) -> Result<MultiplexedConnection> {
        self.conn
            .read()
            .await
            .clone()
            .ok_or_else(|| Error::storage("Redis registry is closed"))
    }
}

#[async_trait]
impl SandboxRegistry for RedisSandboxRegistry {
    async fn put(&self, id: &SandboxId, entry: &RegistryEntry, ttl: Duration) -> Result<()> {
        let mut conn = self.connection().await?;
        let json = serde_json::to_string(entry)?;

        let _: () = conn
            .set_ex(self.key(id), json, ttl.as_secs().max(1))
            .await
            .map_err(|e| Error::storage(format!("Redis set error: {}", e)))?;

        Ok(())
    }

    async fn get(&self, id: &SandboxId) -> Result<Option<RegistryEntry>> {
        let mut conn = self.connection().await?;
        let data: Option<String> = conn
            .get(self.key(id))
            .await
            .map_err(|e| Error::storage(format!("Redis get error: {}", e)))?;

        match data {
            Some(json) => {
                let entry = serde_json::from_str(&json).map_err(|e| {
                    Error::storage(format!("Corrupt registry entry for {}: {}", id, e))
                })?;
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, id: &SandboxId) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: () = conn
            .del(self.key(id))
            .await
            .map_err(|e| Error::storage(format!("Redis delete error: {}", e)))?;

        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.conn.write().await.take().is_some() {
            tracing::info!("Redis registry connection closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redacted_url_masks_credentials() {
        assert_eq!(
            redacted_url("redis://:s3cret@cache.internal:6379/0"),
            "redis://***@cache.internal:6379/0"
        );
        assert_eq!(
            redacted_url("rediss://app:p@ss@cache:6380"),
            "rediss://***@cache:6380"
        );
    }

    #[test]
    fn test_redacted_url_keeps_urls_without_credentials() {
        assert_eq!(redacted_url("redis://127.0.0.1:6379"), "redis://127.0.0.1:6379");
        assert_eq!(redacted_url("redis://host/0?x=a@b"), "redis://host/0?x=a@b");
        assert_eq!(redacted_url("not a url"), "not a url");
    }
}
