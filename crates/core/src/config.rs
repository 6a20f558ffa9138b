use config::{Config, ConfigError, Environment, File};
use secrecy::Secret;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub docker: DockerConfig,
    pub registry: RegistryConfig,
    pub execution: ExecutionConfig,
    pub auth: AuthConfig,
    pub scaffold: ScaffoldConfig,
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3001,
            allowed_origins: vec!["*".into()],
        }
    }
}

/// Container runtime settings. Resource limits apply to every sandbox.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DockerConfig {
    /// Unix socket of the daemon; local defaults are used when unset.
    pub socket_path: Option<String>,
    pub image: String,
    pub network: String,
    pub workdir: String,
    pub memory_bytes: i64,
    /// Fraction of one CPU core.
    pub cpu_share: f64,
    pub stop_grace_secs: u64,
    pub remove_grace_secs: u64,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            socket_path: None,
            image: "code-play-sandbox:latest".into(),
            network: "code-play-network".into(),
            workdir: "/workspace".into(),
            memory_bytes: 512 * 1024 * 1024, // 512MB
            cpu_share: 0.5,
            stop_grace_secs: 10,
            remove_grace_secs: 5,
        }
    }
}

impl DockerConfig {
    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RegistryConfig {
    /// In-memory registry when unset.
    pub redis_url: Option<String>,
    pub key_prefix: String,
    pub ttl_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            key_prefix: "sandbox".into(),
            ttl_secs: 24 * 3600,
        }
    }
}

impl RegistryConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ExecutionConfig {
    pub timeout_secs: u64,
    /// Interpreter used for one-shot commands and terminal sessions.
    pub shell: String,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            shell: "/bin/sh".into(),
        }
    }
}

impl ExecutionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AuthConfig {
    /// HMAC secret for bearer tokens. Required at startup.
    pub jwt_secret: Option<Secret<String>>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ScaffoldConfig {
    /// Package manager used to run `create vite`.
    pub program: String,
    pub timeout_secs: u64,
}

impl Default for ScaffoldConfig {
    fn default() -> Self {
        Self {
            program: "pnpm".into(),
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct TelemetryConfig {
    pub json_logs: bool,
    pub otlp_endpoint: Option<String>,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("CODEPLAY_ENV").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(File::with_name("config/local").required(false))
            // Map APP__SERVER__PORT=3001 to server.port
            .add_source(Environment::with_prefix("APP").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
