//! Upstream PostgreSQL connection settings.
//!
//! A single connection pool is shared by every schema session, so this is the
//! only place database credentials are configured. The URL is resolved from,
//! in order: an environment variable named by `database_url_env`, an inline
//! `database_url`, or the individual host/port/database fields.

use serde::{Deserialize, Serialize};

/// Connection settings for the upstream database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Name of an environment variable holding the full connection URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url_env: Option<String>,

    /// Full connection URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_database")]
    pub database: String,

    #[serde(default = "default_username")]
    pub username: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Name of an environment variable holding the password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,

    /// Reported to the server as `application_name`.
    #[serde(default = "default_application_name")]
    pub application_name: String,

    #[serde(default)]
    pub ssl_mode: SslMode,

    #[serde(default)]
    pub pool: PoolConfig,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            database_url_env: None,
            database_url: None,
            host: default_host(),
            port: default_port(),
            database: default_database(),
            username: default_username(),
            password: None,
            password_env: None,
            application_name: default_application_name(),
            ssl_mode: SslMode::default(),
            pool: PoolConfig::default(),
        }
    }
}

/// TLS negotiation mode, mirroring libpq's `sslmode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SslMode {
    Disable,
    Allow,
    #[default]
    Prefer,
    Require,
    #[serde(rename = "verify-ca")]
    VerifyCa,
    #[serde(rename = "verify-full")]
    VerifyFull,
}

/// Sizing of the shared connection pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Seconds to wait for a free connection before failing the request.
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_seconds: u64,

    /// Seconds an idle connection is kept open.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_seconds: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: default_min_connections(),
            max_connections: default_max_connections(),
            acquire_timeout_seconds: default_acquire_timeout(),
            idle_timeout_seconds: default_idle_timeout(),
        }
    }
}

impl UpstreamConfig {
    /// Resolve the connection URL.
    pub fn connection_string(&self) -> String {
        if let Some(var) = &self.database_url_env
            && let Ok(url) = std::env::var(var)
        {
            return url;
        }

        if let Some(url) = &self.database_url {
            return url.clone();
        }

        let username = urlencoding::encode(&self.username);
        let credentials = match self.resolve_password() {
            Some(password) => format!("{}:{}", username, urlencoding::encode(&password)),
            None => username.into_owned(),
        };
        format!(
            "postgresql://{}@{}:{}/{}",
            credentials,
            self.host,
            self.port,
            urlencoding::encode(&self.database)
        )
    }

    fn resolve_password(&self) -> Option<String> {
        if let Some(var) = &self.password_env
            && let Ok(password) = std::env::var(var)
        {
            return Some(password);
        }
        self.password.clone()
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_database() -> String {
    "postgres".to_string()
}

fn default_username() -> String {
    "postgres".to_string()
}

fn default_application_name() -> String {
    "tessera".to_string()
}

fn default_min_connections() -> u32 {
    1
}

fn default_max_connections() -> u32 {
    10
}

fn default_acquire_timeout() -> u64 {
    30
}

fn default_idle_timeout() -> u64 {
    600
}
