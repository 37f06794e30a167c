use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use medsuite_auth::{AuthConfig, Identity, Role};
use medsuite_notifications::{ConsumerSettings, ReminderCategory, SchedulerSettings};
use medsuite_notifications::stream::{DEFAULT_MAX_LEN, DEFAULT_STREAM};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub service: ServiceSettings,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    /// Absent means notifications and schedule entries live in process memory.
    #[serde(default)]
    pub postgres: Option<PostgresConfig>,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub services: ServicesConfig,
}

impl AppConfig {
    pub fn addr(&self) -> SocketAddr {
        let ip = self
            .server
            .host
            .parse()
            .unwrap_or_else(|_| std::net::IpAddr::from([0, 0, 0, 0]));
        SocketAddr::new(ip, self.server.port)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.service.name.trim().is_empty() {
            return Err("service.name must not be empty".into());
        }
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        if self.server.body_limit_bytes == 0 {
            return Err("server.body_limit_bytes must be > 0".into());
        }

        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }

        self.auth.validate().map_err(|e| e.to_string())?;

        if self.redis.enabled {
            if self.redis.url.trim().is_empty() {
                return Err("redis.url must not be empty when redis.enabled=true".into());
            }
            if self.redis.pool_size == 0 {
                return Err("redis.pool_size must be > 0".into());
            }
        }

        if let Some(ref pg) = self.postgres {
            if pg.url.is_none() && pg.host.is_empty() {
                return Err("postgres requires either url or host".into());
            }
            if pg.url.is_none() && pg.database.is_empty() {
                return Err("postgres.database must not be empty".into());
            }
            if pg.pool_size == 0 {
                return Err("postgres.pool_size must be > 0".into());
            }
        }

        let ev = &self.events;
        if ev.stream.is_empty() || ev.group.is_empty() || ev.consumer.is_empty() {
            return Err("events.stream, events.group and events.consumer must be set".into());
        }
        if ev.max_len == 0 {
            return Err("events.max_len must be > 0".into());
        }
        if ev.batch_size == 0 {
            return Err("events.batch_size must be > 0".into());
        }
        if ev.start_id.is_empty() {
            return Err("events.start_id must be '0', '$' or a stream id".into());
        }

        if self.scheduler.enabled {
            if self.scheduler.interval.is_zero() {
                return Err("scheduler.interval must be > 0".into());
            }
            self.scheduler.parsed_categories()?;
        }

        let svc = &self.services;
        if svc.max_attempts == 0 {
            return Err("services.max_attempts must be >= 1".into());
        }
        if svc.timeout_ms == 0 {
            return Err("services.timeout_ms must be > 0".into());
        }
        if svc.service_token_lifetime.is_zero() {
            return Err("services.service_token_lifetime must be > 0".into());
        }
        if let Some(ref gateway) = svc.gateway_url {
            url::Url::parse(gateway).map_err(|e| format!("services.gateway_url: {e}"))?;
        }
        for (name, base) in &svc.urls {
            url::Url::parse(base).map_err(|e| format!("services.urls.{name}: {e}"))?;
        }

        Ok(())
    }
}

// =============================================================================
// Service and HTTP server
// =============================================================================

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceSettings {
    /// Reported by `/health/` and sent as `X-Service-Name`.
    #[serde(default = "default_service_name")]
    pub name: String,
}

fn default_service_name() -> String {
    "notifications".into()
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            name: default_service_name(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8080
}
fn default_body_limit() -> usize {
    1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

/// Line format written to stdout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

// =============================================================================
// Redis
// =============================================================================

/// Redis backs the event stream, the revocation list and the session store.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedisConfig {
    /// When false all three run in process memory (local development only).
    #[serde(default = "default_redis_enabled")]
    pub enabled: bool,
    #[serde(default = "default_redis_url")]
    pub url: String,
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_redis_enabled() -> bool {
    true
}
fn default_redis_url() -> String {
    "redis://localhost:6379".into()
}
fn default_redis_pool_size() -> usize {
    10
}
fn default_redis_timeout_ms() -> u64 {
    5000
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: default_redis_enabled(),
            url: default_redis_url(),
            pool_size: default_redis_pool_size(),
            timeout_ms: default_redis_timeout_ms(),
        }
    }
}

// =============================================================================
// PostgreSQL
// =============================================================================

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PostgresConfig {
    /// Full connection URL; overrides the individual fields.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_pg_host")]
    pub host: String,
    #[serde(default = "default_pg_port")]
    pub port: u16,
    #[serde(default = "default_pg_user")]
    pub user: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_pg_database")]
    pub database: String,
    #[serde(default = "default_pg_pool_size")]
    pub pool_size: u32,
    #[serde(default = "default_pg_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_pg_host() -> String {
    "localhost".into()
}
fn default_pg_port() -> u16 {
    5432
}
fn default_pg_user() -> String {
    "postgres".into()
}
fn default_pg_database() -> String {
    "medsuite".into()
}
fn default_pg_pool_size() -> u32 {
    10
}
fn default_pg_connect_timeout_ms() -> u64 {
    5000
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: default_pg_host(),
            port: default_pg_port(),
            user: default_pg_user(),
            password: None,
            database: default_pg_database(),
            pool_size: default_pg_pool_size(),
            connect_timeout_ms: default_pg_connect_timeout_ms(),
        }
    }
}

impl PostgresConfig {
    pub fn connection_url(&self) -> String {
        if let Some(ref url) = self.url {
            return url.clone();
        }
        match self.password {
            Some(ref password) => format!(
                "postgres://{}:{}@{}:{}/{}",
                self.user, password, self.host, self.port, self.database
            ),
            None => format!(
                "postgres://{}@{}:{}/{}",
                self.user, self.host, self.port, self.database
            ),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

// =============================================================================
// Event stream consumer
// =============================================================================

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EventsConfig {
    #[serde(default = "default_stream")]
    pub stream: String,
    #[serde(default = "default_max_len")]
    pub max_len: usize,
    /// Run the fan-out consumer in this process.
    #[serde(default = "default_consumer_enabled")]
    pub consumer_enabled: bool,
    #[serde(default = "default_group")]
    pub group: String,
    #[serde(default = "default_consumer")]
    pub consumer: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_block_ms")]
    pub block_ms: u64,
    #[serde(default = "default_reclaim_idle_ms")]
    pub reclaim_idle_ms: u64,
    #[serde(default = "default_start_id")]
    pub start_id: String,
}

fn default_stream() -> String {
    DEFAULT_STREAM.into()
}
fn default_max_len() -> usize {
    DEFAULT_MAX_LEN
}
fn default_consumer_enabled() -> bool {
    true
}
fn default_group() -> String {
    "notification_service".into()
}
fn default_consumer() -> String {
    "notifications-1".into()
}
fn default_batch_size() -> usize {
    10
}
fn default_block_ms() -> u64 {
    5000
}
fn default_reclaim_idle_ms() -> u64 {
    60_000
}
fn default_start_id() -> String {
    "0".into()
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            stream: default_stream(),
            max_len: default_max_len(),
            consumer_enabled: default_consumer_enabled(),
            group: default_group(),
            consumer: default_consumer(),
            batch_size: default_batch_size(),
            block_ms: default_block_ms(),
            reclaim_idle_ms: default_reclaim_idle_ms(),
            start_id: default_start_id(),
        }
    }
}

impl EventsConfig {
    pub fn consumer_settings(&self) -> ConsumerSettings {
        ConsumerSettings {
            group: self.group.clone(),
            consumer: self.consumer.clone(),
            batch_size: self.batch_size,
            block: Duration::from_millis(self.block_ms),
            reclaim_idle: Duration::from_millis(self.reclaim_idle_ms),
            start_id: self.start_id.clone(),
        }
    }
}

// =============================================================================
// Reminder scheduler
// =============================================================================

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_scheduler_enabled")]
    pub enabled: bool,
    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,
    #[serde(default = "default_lookahead", with = "humantime_serde")]
    pub lookahead: Duration,
    /// Enabled categories, e.g. `["appointment", "payment_due"]`.
    #[serde(default = "default_categories")]
    pub categories: Vec<String>,
}

fn default_scheduler_enabled() -> bool {
    true
}
fn default_interval() -> Duration {
    Duration::from_secs(300)
}
fn default_lookahead() -> Duration {
    Duration::from_secs(24 * 3600)
}
fn default_categories() -> Vec<String> {
    ReminderCategory::ALL
        .iter()
        .map(|c| c.as_str().to_string())
        .collect()
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: default_scheduler_enabled(),
            interval: default_interval(),
            lookahead: default_lookahead(),
            categories: default_categories(),
        }
    }
}

impl SchedulerConfig {
    pub fn parsed_categories(&self) -> Result<Vec<ReminderCategory>, String> {
        self.categories
            .iter()
            .map(|c| {
                c.parse::<ReminderCategory>()
                    .map_err(|e| format!("scheduler.categories: {e}"))
            })
            .collect()
    }

    pub fn settings(&self) -> Result<SchedulerSettings, String> {
        Ok(SchedulerSettings {
            interval: self.interval,
            lookahead: self.lookahead,
            categories: self.parsed_categories()?,
        })
    }
}

// =============================================================================
// Sibling services
// =============================================================================

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServicesConfig {
    /// Used for any service without an entry in `urls`.
    #[serde(default)]
    pub gateway_url: Option<String>,
    /// Base URL per service, keyed by lowercase service name (`appointments`, `users`, ...).
    #[serde(default)]
    pub urls: HashMap<String, String>,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_service_timeout_ms")]
    pub timeout_ms: u64,
    /// Subject id of tokens this service signs for its own calls.
    #[serde(default)]
    pub service_user_id: i64,
    /// Role of tokens this service signs for its own calls.
    #[serde(default = "default_service_role")]
    pub service_role: Role,
    #[serde(default = "default_service_token_lifetime", with = "humantime_serde")]
    pub service_token_lifetime: Duration,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    1000
}
fn default_service_timeout_ms() -> u64 {
    5000
}
fn default_service_role() -> Role {
    Role::Admin
}
fn default_service_token_lifetime() -> Duration {
    Duration::from_secs(5 * 60)
}

impl ServicesConfig {
    /// Identity carried by tokens signed for background calls.
    pub fn service_identity(&self, service_name: &str) -> Identity {
        let mut identity = Identity::new(self.service_user_id, self.service_role);
        identity.given_name = Some(service_name.to_string());
        identity
    }
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            gateway_url: None,
            urls: HashMap::new(),
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            timeout_ms: default_service_timeout_ms(),
            service_user_id: 0,
            service_role: default_service_role(),
            service_token_lifetime: default_service_token_lifetime(),
        }
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    /// Loads `path` (when it exists) and applies `MEDSUITE__*` overrides,
    /// e.g. `MEDSUITE__AUTH__JWT_SECRET` or `MEDSUITE__SERVER__PORT=9090`.
    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or("medsuite.toml"));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        builder = builder.add_source(
            Environment::with_prefix("MEDSUITE")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}
