//! Gateway configuration.
//!
//! Layered the way the teacher crate loads configuration: a `routes.yml`
//! file merged with environment variables via `figment`, producing one
//! immutable [`Config`] snapshot at startup. Nothing after startup
//! mutates it; a reload replaces the whole `RouteTable` atomically
//! (spec §3), not individual fields here.

use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::{Deserialize, Serialize};

use crate::errors::{AppError, AppResult};
use crate::routing::RouteTable;

/// Top-level application configuration, assembled from defaults, an
/// optional TOML file, and environment variables (highest priority).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub jwt: JwtConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub web: WebConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            password: None,
        }
    }
}

impl RedisConfig {
    /// `redis://[:password@]host:port/0`
    pub fn connection_url(&self) -> String {
        match &self.password {
            Some(password) if !password.is_empty() => {
                format!("redis://:{}@{}:{}/0", password, self.host, self.port)
            }
            _ => format!("redis://{}:{}/0", self.host, self.port),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JwtConfig {
    pub secret_key: String,
    pub algorithm: String,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret_key: "your_secret_key".to_string(),
            algorithm: "HS256".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    pub local_ttl_secs: u64,
    pub max_local_cache_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 60,
            local_ttl_secs: 10,
            max_local_cache_size: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub request_timeout_secs: u64,
    pub retry_count: u32,
    pub retry_backoff_secs: f64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            retry_count: 3,
            retry_backoff_secs: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub reset_timeout_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            reset_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// `"<count>/<period>"`, e.g. `"10/minute"`.
    pub limit: String,
    pub allowed_hosts: Vec<String>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limit: "10/minute".to_string(),
            allowed_hosts: vec!["*".to_string()],
        }
    }
}

impl RateLimitConfig {
    /// `true` when `host` (the `Host` header, port stripped) passes the
    /// configured allow-list — `"*"` allows everything, `"*.example.com"`
    /// allows any subdomain, anything else must match exactly. Mirrors
    /// Starlette's `TrustedHostMiddleware`, which `ALLOWED_HOSTS` fed in
    /// the original (`original_source/main.py`).
    pub fn is_host_allowed(&self, host: &str) -> bool {
        let host = host.rsplit_once(':').map_or(host, |(h, _)| h);
        self.allowed_hosts.iter().any(|pattern| {
            if pattern == "*" {
                true
            } else if let Some(suffix) = pattern.strip_prefix("*.") {
                host.ends_with(suffix) && host.len() > suffix.len() && host.as_bytes()[host.len() - suffix.len() - 1] == b'.'
            } else {
                pattern == host
            }
        })
    }

    /// Parse `"<count>/<period>"` into `(count, Duration)`. Falls back to
    /// the documented default on any parse failure rather than failing
    /// startup over a cosmetic config typo.
    pub fn parsed(&self) -> (u32, std::time::Duration) {
        let Some((count_str, period_str)) = self.limit.split_once('/') else {
            return (10, std::time::Duration::from_secs(60));
        };
        let count: u32 = count_str.trim().parse().unwrap_or(10);
        let period = match period_str.trim() {
            "second" | "seconds" => std::time::Duration::from_secs(1),
            "minute" | "minutes" => std::time::Duration::from_secs(60),
            "hour" | "hours" => std::time::Duration::from_secs(3600),
            _ => std::time::Duration::from_secs(60),
        };
        (count.max(1), period)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self { port: 8000 }
    }
}

impl Config {
    /// Load defaults, layer an optional `gateway.toml` on top, then apply
    /// the documented environment variables (spec §6) — the same
    /// `Figment::from(..).merge(..)` chain the teacher crate uses for
    /// `Config::load_from_file`, with a final explicit env-var pass
    /// because the documented names are flat (`REDIS_HOST`) rather than
    /// nested under the TOML section names.
    pub fn load() -> AppResult<Self> {
        let mut config: Config =
            Figment::from(figment::providers::Serialized::defaults(Config::default_values()))
                .merge(Toml::file("gateway.toml"))
                .extract()
                .map_err(|e| AppError::Config(e.to_string()))?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> AppResult<()> {
        if let Ok(v) = std::env::var("REDIS_HOST") {
            self.redis.host = v;
        }
        if let Some(v) = parse_env("REDIS_PORT")? {
            self.redis.port = v;
        }
        if let Ok(v) = std::env::var("REDIS_PASSWORD") {
            self.redis.password = Some(v);
        }
        if let Ok(v) = std::env::var("JWT_SECRET_KEY") {
            self.jwt.secret_key = v;
        }
        if let Ok(v) = std::env::var("JWT_ALGORITHM") {
            self.jwt.algorithm = v;
        }
        if let Some(v) = parse_env("CACHE_TTL")? {
            self.cache.ttl_secs = v;
        }
        if let Some(v) = parse_env("REQUEST_TIMEOUT")? {
            self.upstream.request_timeout_secs = v;
        }
        if let Some(v) = parse_env("RETRY_COUNT")? {
            self.upstream.retry_count = v;
        }
        if let Some(v) = parse_env("RETRY_BACKOFF")? {
            self.upstream.retry_backoff_secs = v;
        }
        if let Some(v) = parse_env("CIRCUIT_RESET_TIMEOUT")? {
            self.circuit_breaker.reset_timeout_secs = v;
        }
        if let Ok(v) = std::env::var("RATE_LIMIT") {
            self.rate_limit.limit = v;
        }
        if let Ok(v) = std::env::var("ALLOWED_HOSTS") {
            self.rate_limit.allowed_hosts = v.split(',').map(|s| s.trim().to_string()).collect();
        }
        if let Some(v) = parse_env("PORT")? {
            self.web.port = v;
        }
        Ok(())
    }

    fn default_values() -> Config {
        Config {
            redis: RedisConfig::default(),
            jwt: JwtConfig::default(),
            cache: CacheConfig::default(),
            upstream: UpstreamConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            rate_limit: RateLimitConfig::default(),
            web: WebConfig::default(),
        }
    }
}

/// Load and build the [`RouteTable`] from a `routes.yml` file.
///
/// A missing or malformed file is a `ConfigError`: the caller (`main`)
/// logs the failure and exits non-zero rather than serving with an empty
/// or partial route table (spec §7).
pub fn load_route_table(routes_file: &str) -> AppResult<RouteTable> {
    let contents = std::fs::read_to_string(routes_file)
        .map_err(|e| AppError::Config(format!("reading {routes_file}: {e}")))?;
    let raw: RawRoutesFile = serde_yaml::from_str(&contents)
        .map_err(|e| AppError::Config(format!("parsing {routes_file}: {e}")))?;
    Ok(RouteTable::from_raw(raw.gateway.routes))
}

#[derive(Debug, Deserialize)]
struct RawRoutesFile {
    gateway: RawGateway,
}

#[derive(Debug, Deserialize)]
struct RawGateway {
    routes: Vec<crate::routing::RawRoute>,
}

/// Parse an optional env var into `T`, surfacing a `ConfigError` for a
/// present-but-unparseable value rather than silently keeping the default.
fn parse_env<T: std::str::FromStr>(key: &str) -> AppResult<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| AppError::Config(format!("{key}={raw:?}: {e}"))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trusted_host_wildcard_star_allows_everything() {
        let cfg = RateLimitConfig {
            limit: "10/minute".to_string(),
            allowed_hosts: vec!["*".to_string()],
        };
        assert!(cfg.is_host_allowed("anything.example"));
    }

    #[test]
    fn trusted_host_exact_match_ignores_port() {
        let cfg = RateLimitConfig {
            limit: "10/minute".to_string(),
            allowed_hosts: vec!["gateway.internal".to_string()],
        };
        assert!(cfg.is_host_allowed("gateway.internal:8443"));
        assert!(!cfg.is_host_allowed("evil.example"));
    }

    #[test]
    fn trusted_host_subdomain_wildcard() {
        let cfg = RateLimitConfig {
            limit: "10/minute".to_string(),
            allowed_hosts: vec!["*.internal".to_string()],
        };
        assert!(cfg.is_host_allowed("gateway.internal"));
        assert!(!cfg.is_host_allowed("internal"));
        assert!(!cfg.is_host_allowed("notinternal"));
    }

    #[test]
    fn rate_limit_parses_count_and_period() {
        let cfg = RateLimitConfig {
            limit: "25/minute".to_string(),
            allowed_hosts: vec!["*".to_string()],
        };
        let (count, period) = cfg.parsed();
        assert_eq!(count, 25);
        assert_eq!(period, std::time::Duration::from_secs(60));
    }

    #[test]
    fn rate_limit_falls_back_on_garbage() {
        let cfg = RateLimitConfig {
            limit: "garbage".to_string(),
            allowed_hosts: vec!["*".to_string()],
        };
        let (count, period) = cfg.parsed();
        assert_eq!(count, 10);
        assert_eq!(period, std::time::Duration::from_secs(60));
    }

    #[test]
    fn redis_connection_url_includes_password() {
        let cfg = RedisConfig {
            host: "cache.internal".to_string(),
            port: 6380,
            password: Some("hunter2".to_string()),
        };
        assert_eq!(cfg.connection_url(), "redis://:hunter2@cache.internal:6380/0");
    }

    #[test]
    fn redis_connection_url_without_password() {
        let cfg = RedisConfig {
            host: "cache.internal".to_string(),
            port: 6379,
            password: None,
        };
        assert_eq!(cfg.connection_url(), "redis://cache.internal:6379/0");
    }
}
