//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the engine.
//! All types derive Serde traits so a TOML file can supply any subset of the
//! settings; environment variables are layered on top by the loader.

use serde::{Deserialize, Serialize};

use crate::lifecycle::mode::OperatingMode;

/// Address every listener binds to. The engine always listens on all interfaces.
pub const BIND_HOST: &str = "0.0.0.0";

/// Root configuration for the engine process.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Which subsystems this process runs.
    pub mode: OperatingMode,

    /// Runtime environment name (`NODE_ENV`). Selects the schema path.
    pub environment: String,

    /// Listener configuration (port, TLS, proxy trust).
    pub listener: ListenerConfig,

    /// Database bootstrap settings.
    pub database: DatabaseConfig,

    /// Security settings (headers, CORS, auth, sandbox).
    pub security: SecurityConfig,

    /// Rate limiting configuration.
    pub rate_limit: RateLimitConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Shutdown deadlines.
    pub shutdown: ShutdownConfig,

    /// Queue consumer settings.
    pub worker: WorkerConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: OperatingMode::default(),
            environment: "development".to_string(),
            listener: ListenerConfig::default(),
            database: DatabaseConfig::default(),
            security: SecurityConfig::default(),
            rate_limit: RateLimitConfig::default(),
            observability: ObservabilityConfig::default(),
            shutdown: ShutdownConfig::default(),
            worker: WorkerConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Whether the process runs in the production environment.
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Port bound on all interfaces.
    pub port: u16,

    /// Secure transport settings.
    pub https: HttpsConfig,

    /// Trust `x-forwarded-for` from the fronting proxy.
    pub trust_proxy: bool,

    /// Deployment tier identifier. Any tier implies a fronting proxy.
    pub tier: Option<String>,

    /// Longest a single request may run before it is answered with 408.
    pub request_timeout_secs: u64,
}

impl ListenerConfig {
    /// Effective proxy trust: explicit flag, or any deployment tier.
    pub fn trusts_proxy(&self) -> bool {
        self.trust_proxy || self.tier.is_some()
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            https: HttpsConfig::default(),
            trust_proxy: false,
            tier: None,
            request_timeout_secs: 60,
        }
    }
}

/// Secure transport configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpsConfig {
    /// Serve HTTPS instead of plain HTTP.
    pub enabled: bool,

    /// Passphrase for the key material, if any.
    pub passphrase: Option<String>,

    /// Path to the private key file (PEM).
    pub key_path: String,

    /// Path to the certificate file (PEM).
    pub cert_path: String,
}

impl Default for HttpsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            passphrase: None,
            key_path: "https/key.pem".to_string(),
            cert_path: "https/cert.pem".to_string(),
        }
    }
}

/// Database bootstrap configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Postgres connection URL.
    pub url: Option<String>,

    /// Table whose presence marks a provisioned schema.
    pub sentinel_table: String,

    /// Program (and leading arguments) of the external schema tool.
    pub schema_tool: String,

    /// Maximum wait for the bootstrap pool to report released, in milliseconds.
    pub release_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            sentinel_table: "wallets".to_string(),
            schema_tool: "npx prisma".to_string(),
            release_timeout_ms: 5_000,
        }
    }
}

/// Security hardening configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Add security response headers.
    pub enable_headers: bool,

    /// Read-only request enforcement.
    pub sandbox: bool,

    /// Allowed CORS origins; `*` allows any.
    pub cors_origins: Vec<String>,

    /// Require a bearer token on non-public routes.
    pub auth_enabled: bool,

    /// Accepted bearer tokens.
    pub access_tokens: Vec<String>,

    /// Bearer key for the admin API. Admin routes reject everything when unset.
    pub admin_api_key: Option<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            enable_headers: true,
            sandbox: false,
            cors_origins: vec!["*".to_string()],
            auth_enabled: true,
            access_tokens: Vec::new(),
            admin_api_key: None,
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Sustained requests per second per client.
    pub requests_per_second: u32,

    /// Burst capacity.
    pub burst_size: u32,

    /// Seconds without a request after which a client's bucket is dropped.
    pub idle_secs: u64,

    /// Most clients tracked at once. Clients beyond it share one bucket.
    pub max_clients: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_second: 100,
            burst_size: 200,
            idle_secs: 300,
            max_clients: 100_000,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Expose the Prometheus endpoint.
    pub metrics_enabled: bool,

    /// Log output format.
    pub log_format: LogFormat,

    /// Interval for logging the usage summary, in seconds. Zero disables it.
    pub usage_flush_secs: u64,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: true,
            log_format: LogFormat::Pretty,
            usage_flush_secs: 60,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Shutdown deadlines.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Deadline for a single queue close, in milliseconds.
    pub queue_close_timeout_ms: u64,

    /// Drain window for in-flight HTTP requests, in milliseconds.
    pub http_drain_ms: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            queue_close_timeout_ms: 10_000,
            http_drain_ms: 5_000,
        }
    }
}

/// Queue consumer configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Jobs processed concurrently per queue.
    pub concurrency: usize,

    /// Pending jobs buffered per queue before `enqueue` waits.
    pub queue_capacity: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            queue_capacity: 1_024,
        }
    }
}
