//! Application configuration with layered loading.
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded in this order (later overrides earlier):
//!
//! 1. **Compiled defaults**: hardcoded in struct `Default` implementations
//! 2. **Config file**: TOML file specified by the `PORTICO_CONFIG` env var
//! 3. **Environment variables**: `PORTICO__*` vars override specific fields
//! 4. **Flat aliases**: the deployment environment's conventional names
//!    (`PORT`, `JWT_SECRET`, `RATE_LIMIT_RPS`, ...) override everything
//!
//! # Validation
//!
//! Configuration is validated at load time; an invalid configuration is a
//! startup error (non-zero exit), never a silent fallback.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, path::Path, time::Duration};

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// IP address to bind. Defaults to `0.0.0.0`.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Listener port. Defaults to `8080`.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request body ceiling in bytes. Defaults to 10 MiB.
    #[serde(default = "default_max_request_size")]
    pub max_request_size: usize,

    /// Per-request deadline in seconds. Defaults to `30`.
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,

    /// Graceful shutdown grace period in seconds. Defaults to `30`.
    #[serde(default = "default_shutdown_grace_seconds")]
    pub shutdown_grace_seconds: u64,
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_max_request_size() -> usize {
    10 * 1024 * 1024
}

fn default_request_timeout_seconds() -> u64 {
    30
}

fn default_shutdown_grace_seconds() -> u64 {
    30
}

/// Token-bucket admission control settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Refill rate in tokens per second. Defaults to `100`.
    pub rps: f64,

    /// Bucket capacity. Defaults to `200`.
    pub burst: u32,

    /// Idle lifetime before a bucket is reclaimed, in seconds. Defaults to `600`.
    #[serde(default = "default_idle_ttl_seconds")]
    pub idle_ttl_seconds: u64,

    /// Sweeper interval in seconds. Defaults to `600`.
    #[serde(default = "default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,
}

fn default_idle_ttl_seconds() -> u64 {
    600
}

fn default_sweep_interval_seconds() -> u64 {
    600
}

/// Two-level cache settings. The L2 tier is enabled by setting `redis_url`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Redis URL for the shared L2 store; absent means L1-only mode.
    #[serde(default)]
    pub redis_url: Option<String>,

    /// L1 cost ceiling in bytes of cached values. Defaults to 64 MiB.
    #[serde(default = "default_l1_max_cost")]
    pub l1_max_cost: u64,

    /// L1 entry TTL ceiling in seconds. Defaults to `300`.
    #[serde(default = "default_l1_max_ttl_seconds")]
    pub l1_max_ttl_seconds: u64,

    /// L2 connection pool ceiling. Defaults to `10`.
    #[serde(default = "default_redis_pool_size")]
    pub redis_pool_size: usize,

    /// Accepted for deployment-environment compatibility; the pool keeps
    /// connections on demand rather than maintaining a warm floor.
    #[serde(default = "default_redis_min_idle_conns")]
    pub redis_min_idle_conns: usize,
}

fn default_l1_max_cost() -> u64 {
    64 * 1024 * 1024
}

fn default_l1_max_ttl_seconds() -> u64 {
    300
}

fn default_redis_pool_size() -> usize {
    10
}

fn default_redis_min_idle_conns() -> usize {
    5
}

/// Authentication settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Signing key for the internal token. Required.
    #[serde(default)]
    pub jwt_secret: String,

    /// Base URL of the auth collaborator.
    #[serde(default = "default_auth_service_url")]
    pub auth_service_url: String,

    /// Verified-token cache TTL ceiling in seconds. Defaults to `1800`
    /// and is clamped to 30 minutes.
    #[serde(default = "default_token_cache_ttl_seconds")]
    pub token_cache_ttl_seconds: u64,

    /// Internal token lifetime in seconds. Defaults to `300`.
    #[serde(default = "default_internal_token_ttl_seconds")]
    pub internal_token_ttl_seconds: u64,
}

fn default_auth_service_url() -> String {
    "http://auth-service:8081".to_string()
}

fn default_token_cache_ttl_seconds() -> u64 {
    1800
}

fn default_internal_token_ttl_seconds() -> u64 {
    300
}

/// Logical service resolution and authorization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicesConfig {
    /// Logical name -> base URL. Names absent here fall back to the
    /// `<NAME>_URL` environment convention at resolution time.
    #[serde(default)]
    pub targets: HashMap<String, String>,

    /// System-wide default service for the failover chain and slug routes.
    #[serde(default = "default_system_default")]
    pub system_default: String,

    /// Per-service permission requirements enforced by the authorize
    /// stage on `/api/{service}` routes (all listed permissions required).
    #[serde(default)]
    pub required_permissions: HashMap<String, Vec<String>>,
}

fn default_system_default() -> String {
    "dashboard-service".to_string()
}

/// Dispatcher settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Upstream dial timeout in seconds. Defaults to `10`.
    #[serde(default = "default_dial_timeout_seconds")]
    pub dial_timeout_seconds: u64,

    /// Upstream statuses at or above this value trigger failover.
    /// Defaults to `502`; 500/501 are forwarded unmodified.
    #[serde(default = "default_failover_status_threshold")]
    pub failover_status_threshold: u16,

    /// Maximum attempts per idempotent upstream call. Defaults to `3`.
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,

    /// First retry backoff in milliseconds, doubled per attempt. Defaults to `100`.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

fn default_dial_timeout_seconds() -> u64 {
    10
}

fn default_failover_status_threshold() -> u16 {
    502
}

fn default_retry_max_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    100
}

/// Circuit breaker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerSettings {
    /// Whether outbound calls are breaker-guarded. Defaults to `true`.
    pub enabled: bool,

    /// Counter window in seconds while closed. Defaults to `60`.
    #[serde(default = "default_breaker_interval_seconds")]
    pub interval_seconds: u64,

    /// Open-state cooldown in seconds. Defaults to `30`.
    #[serde(default = "default_breaker_cooldown_seconds")]
    pub cooldown_seconds: u64,

    /// Concurrent probe ceiling while half-open. Defaults to `3`.
    #[serde(default = "default_breaker_max_probes")]
    pub max_probes: u32,

    /// Minimum requests before the ratio predicate may trip. Defaults to `3`.
    #[serde(default = "default_breaker_min_requests")]
    pub min_requests: u32,

    /// Failure ratio that trips the breaker. Defaults to `0.6`.
    #[serde(default = "default_breaker_failure_ratio")]
    pub failure_ratio: f64,
}

fn default_breaker_interval_seconds() -> u64 {
    60
}

fn default_breaker_cooldown_seconds() -> u64 {
    30
}

fn default_breaker_max_probes() -> u32 {
    3
}

fn default_breaker_min_requests() -> u32 {
    3
}

fn default_breaker_failure_ratio() -> f64 {
    0.6
}

/// Prometheus metrics exposition settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether the `/metrics` endpoint and request metrics are enabled.
    /// Defaults to `true`.
    pub enabled: bool,
}

/// Distributed tracing settings. The exporter itself is an external
/// collaborator; enabling only widens log verbosity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracingConfig {
    pub enabled: bool,
    #[serde(default)]
    pub jaeger_url: Option<String>,
}

/// CORS policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
    pub allow_credentials: bool,
    /// Preflight cache lifetime in seconds. Defaults to 12 hours.
    pub max_age_seconds: u64,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g. "info", "debug"). Defaults to `"info"`.
    pub level: String,

    /// Output format: `"json"` or `"pretty"`. Defaults to `"pretty"`.
    pub format: String,
}

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Deployment environment label. Defaults to `"development"`.
    #[serde(default = "default_environment")]
    pub environment: String,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub services: ServicesConfig,

    #[serde(default)]
    pub proxy: ProxyConfig,

    #[serde(default)]
    pub breaker: BreakerSettings,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default)]
    pub tracing: TracingConfig,

    #[serde(default)]
    pub cors: CorsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_environment() -> String {
    "development".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            max_request_size: default_max_request_size(),
            request_timeout_seconds: default_request_timeout_seconds(),
            shutdown_grace_seconds: default_shutdown_grace_seconds(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            rps: 100.0,
            burst: 200,
            idle_ttl_seconds: default_idle_ttl_seconds(),
            sweep_interval_seconds: default_sweep_interval_seconds(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            l1_max_cost: default_l1_max_cost(),
            l1_max_ttl_seconds: default_l1_max_ttl_seconds(),
            redis_pool_size: default_redis_pool_size(),
            redis_min_idle_conns: default_redis_min_idle_conns(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            auth_service_url: default_auth_service_url(),
            token_cache_ttl_seconds: default_token_cache_ttl_seconds(),
            internal_token_ttl_seconds: default_internal_token_ttl_seconds(),
        }
    }
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            targets: HashMap::from([
                ("auth".to_string(), default_auth_service_url()),
                ("user".to_string(), "http://user-service:8082".to_string()),
                ("tenant".to_string(), "http://tenant-service:8083".to_string()),
                (
                    "notification".to_string(),
                    "http://notification-service:8084".to_string(),
                ),
            ]),
            system_default: default_system_default(),
            required_permissions: HashMap::new(),
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            dial_timeout_seconds: default_dial_timeout_seconds(),
            failover_status_threshold: default_failover_status_threshold(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
        }
    }
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: default_breaker_interval_seconds(),
            cooldown_seconds: default_breaker_cooldown_seconds(),
            max_probes: default_breaker_max_probes(),
            min_requests: default_breaker_min_requests(),
            failure_ratio: default_breaker_failure_ratio(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            jaeger_url: None,
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["*".to_string()],
            allowed_methods: ["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"]
                .map(String::from)
                .to_vec(),
            allowed_headers: [
                "Origin",
                "Content-Type",
                "Accept",
                "Authorization",
                "X-Correlation-ID",
                "X-Tenant-ID",
            ]
            .map(String::from)
            .to_vec(),
            allow_credentials: true,
            max_age_seconds: 12 * 3600,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            server: ServerConfig::default(),
            rate_limit: RateLimitConfig::default(),
            cache: CacheConfig::default(),
            auth: AuthConfig::default(),
            services: ServicesConfig::default(),
            proxy: ProxyConfig::default(),
            breaker: BreakerSettings::default(),
            metrics: MetricsConfig::default(),
            tracing: TracingConfig::default(),
            cors: CorsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from `config/portico.toml` (overridable via
    /// `PORTICO_CONFIG`) with environment overrides applied on top.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file or environment cannot be parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("PORTICO_CONFIG").unwrap_or_else(|_| "config/portico.toml".to_string());
        Self::from_file(&config_path)
    }

    /// Loads configuration from a TOML file with env overrides.
    ///
    /// `PORTICO__*` variables override nested fields using `__` as the
    /// separator (e.g. `PORTICO__SERVER__PORT=9000`); the flat aliases the
    /// original deployment uses (`PORT`, `JWT_SECRET`, ...) are applied last.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or deserialized.
    pub fn from_file<P: AsRef<Path>>(config_path: P) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::with_name(&config_path.as_ref().to_string_lossy()).required(false))
            .add_source(Environment::with_prefix("PORTICO").separator("__"))
            .build()?;

        // Missing sections fall back to serde defaults.
        let mut config: Self = builder.try_deserialize()?;
        config.apply_env_aliases();
        Ok(config)
    }

    /// Applies the flat environment variable names documented for the
    /// deployment environment.
    fn apply_env_aliases(&mut self) {
        if let Some(port) = env_parse::<u16>("PORT") {
            self.server.port = port;
        }
        if let Ok(secret) = std::env::var("JWT_SECRET") {
            self.auth.jwt_secret = secret;
        }
        for (env, name) in [
            ("AUTH_SERVICE_URL", "auth"),
            ("USER_SERVICE_URL", "user"),
            ("TENANT_SERVICE_URL", "tenant"),
            ("NOTIFICATION_SERVICE_URL", "notification"),
        ] {
            if let Ok(url) = std::env::var(env) {
                if env == "AUTH_SERVICE_URL" {
                    self.auth.auth_service_url.clone_from(&url);
                }
                self.services.targets.insert(name.to_string(), url);
            }
        }
        if let Some(rps) = env_parse::<f64>("RATE_LIMIT_RPS") {
            self.rate_limit.rps = rps;
        }
        if let Some(burst) = env_parse::<u32>("RATE_LIMIT_BURST") {
            self.rate_limit.burst = burst;
        }
        if let Some(size) = env_parse::<usize>("MAX_REQUEST_SIZE") {
            self.server.max_request_size = size;
        }
        if let Ok(url) = std::env::var("REDIS_URL") {
            self.cache.redis_url = Some(url);
        }
        if let Some(pool) = env_parse::<usize>("REDIS_POOL_SIZE") {
            self.cache.redis_pool_size = pool;
        }
        if let Some(idle) = env_parse::<usize>("REDIS_MIN_IDLE_CONNS") {
            self.cache.redis_min_idle_conns = idle;
        }
        if let Ok(enabled) = std::env::var("ENABLE_TRACING") {
            self.tracing.enabled = enabled == "true";
        }
        if let Ok(url) = std::env::var("JAEGER_URL") {
            self.tracing.jaeger_url = Some(url);
        }
        if let Ok(enabled) = std::env::var("ENABLE_METRICS") {
            self.metrics.enabled = enabled != "false";
        }
        if let Ok(enabled) = std::env::var("CIRCUIT_BREAKER_ENABLED") {
            self.breaker.enabled = enabled != "false";
        }
    }

    /// Validates the configuration for correctness and consistency.
    ///
    /// # Errors
    ///
    /// Returns a descriptive error string if validation fails.
    pub fn validate(&self) -> Result<(), String> {
        if self.auth.jwt_secret.is_empty() {
            return Err("JWT_SECRET must be set".to_string());
        }
        if self.server.port == 0 {
            return Err("Listener port must be greater than 0".to_string());
        }
        if self.server.max_request_size == 0 {
            return Err("Max request size must be greater than 0".to_string());
        }
        if self.rate_limit.rps <= 0.0 {
            return Err("Rate limit RPS must be greater than 0".to_string());
        }
        if self.rate_limit.burst == 0 {
            return Err("Rate limit burst must be greater than 0".to_string());
        }
        if !self.auth.auth_service_url.starts_with("http") {
            return Err(format!(
                "Invalid auth service URL: {}",
                self.auth.auth_service_url
            ));
        }
        for (name, url) in &self.services.targets {
            if !url.starts_with("http") && !url.starts_with("grpc") {
                return Err(format!("Invalid URL for service {name}: {url}"));
            }
        }
        if !(0.0..=1.0).contains(&self.breaker.failure_ratio) || self.breaker.failure_ratio == 0.0 {
            return Err("Breaker failure ratio must be in (0, 1]".to_string());
        }
        if self.breaker.max_probes == 0 {
            return Err("Breaker max probes must be greater than 0".to_string());
        }
        if self.proxy.failover_status_threshold < 500 {
            return Err("Failover status threshold must be a 5xx status".to_string());
        }
        if !["json", "pretty"].contains(&self.logging.format.as_str()) {
            return Err("Logging format must be 'json' or 'pretty'".to_string());
        }
        Ok(())
    }

    /// Socket address for the listener.
    ///
    /// # Errors
    ///
    /// Returns an error string when the address cannot be parsed.
    pub fn socket_addr(&self) -> Result<std::net::SocketAddr, String> {
        format!("{}:{}", self.server.bind_address, self.server.port)
            .parse()
            .map_err(|_| {
                format!(
                    "Invalid socket address: {}:{}",
                    self.server.bind_address, self.server.port
                )
            })
    }

    /// Per-request deadline.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_seconds)
    }

    /// Graceful shutdown grace period.
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_grace_seconds)
    }

    /// Breaker tunables in the registry's own terms.
    #[must_use]
    pub fn breaker_config(&self) -> crate::breaker::BreakerConfig {
        crate::breaker::BreakerConfig {
            interval: Duration::from_secs(self.breaker.interval_seconds),
            cooldown: Duration::from_secs(self.breaker.cooldown_seconds),
            max_probes: self.breaker.max_probes,
            min_requests: self.breaker.min_requests,
            failure_ratio: self.breaker.failure_ratio,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
