//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (`TASKCAST_HOST`, `TASKCAST_PORT`)
//! - TOML configuration file
//! - Sensible defaults

use anyhow::{Context, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::Path;
use tracing::warn;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Address to bind the hub to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port for the channel endpoints.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Channel-token settings.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Metrics export settings.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Directory entries seeded into the standalone binary.
    #[serde(default)]
    pub seed: SeedConfig,
}

/// Channel-token settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HS256 signing secret shared with the task backend. When unset, an
    /// ephemeral secret is generated at startup.
    #[serde(default)]
    pub secret: Option<String>,

    /// Lifetime of issued tokens, in seconds.
    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: u64,
}

/// Metrics export settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether to expose Prometheus metrics.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Port for the metrics HTTP endpoint.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

/// Users and tasks seeded into the in-memory directory at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeedConfig {
    #[serde(default)]
    pub users: Vec<SeedUser>,

    #[serde(default)]
    pub tasks: Vec<SeedTask>,
}

/// One seeded user account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedUser {
    pub id: i64,
    pub subject: String,
    #[serde(default)]
    pub superuser: bool,
}

/// One seeded task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedTask {
    pub id: i64,
    pub owner: i64,
}

fn default_host() -> String {
    std::env::var("TASKCAST_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("TASKCAST_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080)
}

fn default_true() -> bool {
    true
}

fn default_token_ttl() -> u64 {
    1800
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            auth: AuthConfig::default(),
            metrics: MetricsConfig::default(),
            seed: SeedConfig::default(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret: None,
            token_ttl_secs: default_token_ttl(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            port: default_metrics_port(),
        }
    }
}

impl AuthConfig {
    /// The signing secret as bytes, generating an ephemeral one when unset.
    ///
    /// Ephemeral secrets do not survive restarts, so tokens issued before a
    /// restart stop validating.
    #[must_use]
    pub fn resolve_secret(&self) -> Vec<u8> {
        match &self.secret {
            Some(secret) => secret.as_bytes().to_vec(),
            None => {
                warn!("no auth secret configured, generated an ephemeral one");
                let secret: [u8; 32] = rand::rng().random();
                secret.to_vec()
            }
        }
    }
}

impl Config {
    /// Load configuration, trying file paths in order then falling back to
    /// defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let paths = [
            "taskcast.toml",
            "/etc/taskcast/taskcast.toml",
            "~/.config/taskcast/taskcast.toml",
        ];

        for path in paths {
            let expanded = shellexpand::tilde(path);
            let p = Path::new(expanded.as_ref());
            if p.exists() {
                return Self::from_file(p);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// The socket address the hub binds.
    ///
    /// The host may be an IP address or a name such as `localhost`; names
    /// resolve through the system resolver and the first address wins.
    ///
    /// # Errors
    ///
    /// Returns an error naming the configured address when it does not
    /// parse or resolve.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        let addr = format!("{}:{}", self.host, self.port);
        addr.to_socket_addrs()
            .with_context(|| format!("Invalid bind address: {}", addr))?
            .next()
            .with_context(|| format!("Bind address did not resolve: {}", addr))
    }
}
