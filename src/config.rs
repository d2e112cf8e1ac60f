/*!
 * Configuration loading for Bulwark
 *
 * Sources, first match wins:
 * 1. An explicit TOML file
 * 2. `config/bulwark.toml` when it exists
 * 3. `SLO_*` environment variables layered over the defaults
 * 4. Defaults
 *
 * Every source is validated before it is returned.
 */

use bulwark_core_resilience::{
    BulkheadConfig, CircuitBreakerConfig, RateLimiterConfig, ResilienceError, RetryPolicy,
};
use bulwark_core_sli::SloConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Config file consulted when no explicit path is given
pub const DEFAULT_CONFIG_PATH: &str = "config/bulwark.toml";

pub const ENV_AVAILABILITY_TARGET: &str = "SLO_AVAILABILITY_TARGET";
pub const ENV_LATENCY_P95_MS: &str = "SLO_LATENCY_P95_MS";
pub const ENV_LATENCY_P99_MS: &str = "SLO_LATENCY_P99_MS";
pub const ENV_ERROR_RATE_MAX: &str = "SLO_ERROR_RATE_MAX";
pub const ENV_ERROR_BUDGET_WINDOW_HOURS: &str = "SLO_ERROR_BUDGET_WINDOW_HOURS";

const SECS_PER_HOUR: u64 = 3600;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config from {origin}: {source}")]
    Parse {
        origin: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid {var}={value:?}: {reason}")]
    Env {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),
}

/// Where a loaded configuration came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigOrigin {
    File(PathBuf),
    Environment,
    Defaults,
}

impl fmt::Display for ConfigOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigOrigin::File(path) => write!(f, "file {}", path.display()),
            ConfigOrigin::Environment => f.write_str("environment"),
            ConfigOrigin::Defaults => f.write_str("defaults"),
        }
    }
}

/// Top-level configuration file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulwarkConfig {
    pub service_name: String,
    pub logging: LoggingConfig,
    pub slo: SloSettings,
    pub dependencies: Vec<DependencyConfig>,
}

impl Default for BulwarkConfig {
    fn default() -> Self {
        Self {
            service_name: "default".to_string(),
            logging: LoggingConfig::default(),
            slo: SloSettings::default(),
            dependencies: Vec::new(),
        }
    }
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// Output format when logging to stderr; file output is always JSON
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    pub file: Option<PathBuf>,
}

/// `[slo]` table; windows are whole hours
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SloSettings {
    pub availability_target: f64,
    pub latency_p95_ms: u64,
    /// Zero disables the p99 check
    pub latency_p99_ms: u64,
    pub max_error_rate: f64,
    pub error_budget_window_hours: u64,
    pub fast_burn_window_hours: u64,
    pub fast_burn_percent: f64,
    pub slow_burn_window_hours: u64,
    pub slow_burn_percent: f64,
}

impl Default for SloSettings {
    fn default() -> Self {
        let slo = SloConfig::default();
        Self {
            availability_target: slo.availability_target,
            latency_p95_ms: slo.latency_p95_ms,
            latency_p99_ms: slo.latency_p99_ms.unwrap_or(0),
            max_error_rate: slo.max_error_rate,
            error_budget_window_hours: slo.error_budget_window.as_secs() / SECS_PER_HOUR,
            fast_burn_window_hours: slo.fast_burn_window.as_secs() / SECS_PER_HOUR,
            fast_burn_percent: slo.fast_burn_percent,
            slow_burn_window_hours: slo.slow_burn_window.as_secs() / SECS_PER_HOUR,
            slow_burn_percent: slo.slow_burn_percent,
        }
    }
}

impl SloSettings {
    pub fn to_slo_config(&self, service_name: &str) -> SloConfig {
        SloConfig {
            service_name: service_name.to_string(),
            availability_target: self.availability_target,
            latency_p95_ms: self.latency_p95_ms,
            latency_p99_ms: (self.latency_p99_ms > 0).then_some(self.latency_p99_ms),
            max_error_rate: self.max_error_rate,
            error_budget_window: hours(self.error_budget_window_hours),
            fast_burn_window: hours(self.fast_burn_window_hours),
            fast_burn_percent: self.fast_burn_percent,
            slow_burn_window: hours(self.slow_burn_window_hours),
            slow_burn_percent: self.slow_burn_percent,
        }
    }
}

fn hours(n: u64) -> Duration {
    Duration::from_secs(n.saturating_mul(SECS_PER_HOUR))
}

/// One `[[dependencies]]` entry; each omitted table disables that guard stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breaker: Option<BreakerSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetrySettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bulkhead: Option<BulkheadSettings>,
}

impl DependencyConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            breaker: None,
            retry: None,
            rate_limit: None,
            bulkhead: None,
        }
    }

    pub fn breaker_config(&self) -> Option<CircuitBreakerConfig> {
        self.breaker.as_ref().map(|b| b.to_config(&self.name))
    }

    pub fn retry_policy(&self) -> Option<RetryPolicy> {
        self.retry.as_ref().map(RetrySettings::to_policy)
    }

    pub fn rate_limiter_config(&self) -> Option<RateLimiterConfig> {
        self.rate_limit.as_ref().map(|r| r.to_config(&self.name))
    }

    pub fn bulkhead_config(&self) -> Option<BulkheadConfig> {
        self.bulkhead.as_ref().map(|b| b.to_config(&self.name))
    }

    fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        let mut check = |result: Option<Result<(), ResilienceError>>, prefix: bool| {
            if let Some(Err(err)) = result {
                let msg = match err {
                    ResilienceError::InvalidConfig(msg) => msg,
                    other => other.to_string(),
                };
                problems.push(if prefix {
                    format!("dependency '{}': {}", self.name, msg)
                } else {
                    msg
                });
            }
        };
        check(self.breaker_config().map(|c| c.validate()), false);
        check(self.retry_policy().map(|p| p.validate()), true);
        check(self.rate_limiter_config().map(|c| c.validate()), false);
        check(self.bulkhead_config().map(|c| c.validate()), false);
        problems
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    pub failure_threshold: Option<u32>,
    pub open_duration_secs: Option<u64>,
    pub half_open_trial_count: Option<u32>,
}

impl BreakerSettings {
    pub fn to_config(&self, name: &str) -> CircuitBreakerConfig {
        let base = CircuitBreakerConfig::named(name);
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold.unwrap_or(base.failure_threshold),
            open_duration: self
                .open_duration_secs
                .map_or(base.open_duration, Duration::from_secs),
            half_open_trial_count: self
                .half_open_trial_count
                .unwrap_or(base.half_open_trial_count),
            ..base
        }
    }
}

/// Named starting points for a retry table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RetryPreset {
    #[default]
    Default,
    Fast,
    Network,
    Slow,
}

impl RetryPreset {
    pub fn policy(&self) -> RetryPolicy {
        match self {
            RetryPreset::Default => RetryPolicy::default(),
            RetryPreset::Fast => RetryPolicy::fast(),
            RetryPreset::Network => RetryPolicy::network(),
            RetryPreset::Slow => RetryPolicy::slow(),
        }
    }
}

/// Explicit fields override the chosen preset
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub preset: RetryPreset,
    pub max_attempts: Option<u32>,
    pub initial_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub multiplier: Option<f64>,
    pub jitter: Option<bool>,
}

impl RetrySettings {
    pub fn to_policy(&self) -> RetryPolicy {
        let mut policy = self.preset.policy();
        if let Some(n) = self.max_attempts {
            policy.max_attempts = n;
        }
        if let Some(ms) = self.initial_delay_ms {
            policy.initial_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = self.max_delay_ms {
            policy.max_delay = Duration::from_millis(ms);
        }
        if let Some(m) = self.multiplier {
            policy.multiplier = m;
        }
        if let Some(j) = self.jitter {
            policy.jitter = j;
        }
        policy
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub requests_per_second: Option<f64>,
    pub burst: Option<u32>,
}

impl RateLimitSettings {
    pub fn to_config(&self, name: &str) -> RateLimiterConfig {
        let base = RateLimiterConfig::default();
        RateLimiterConfig {
            name: name.to_string(),
            requests_per_second: self.requests_per_second.unwrap_or(base.requests_per_second),
            burst: self.burst.unwrap_or(base.burst),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkheadSettings {
    pub max_concurrency: Option<usize>,
    pub acquire_timeout_ms: Option<u64>,
}

impl BulkheadSettings {
    pub fn to_config(&self, name: &str) -> BulkheadConfig {
        let base = BulkheadConfig::default();
        BulkheadConfig {
            name: name.to_string(),
            max_concurrency: self.max_concurrency.unwrap_or(base.max_concurrency),
            acquire_timeout: self
                .acquire_timeout_ms
                .map_or(base.acquire_timeout, Duration::from_millis),
        }
    }
}

impl BulwarkConfig {
    /// Load and validate configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&contents, path.display().to_string())
    }

    /// Parse and validate TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Self::parse(contents, "inline TOML".to_string())
    }

    fn parse(contents: &str, origin: String) -> Result<Self, ConfigError> {
        let config: BulwarkConfig =
            toml::from_str(contents).map_err(|source| ConfigError::Parse { origin, source })?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults with `SLO_*` overrides read through `lookup`
    ///
    /// Returns the config and whether any variable was set.
    pub fn from_env_with<F>(lookup: F) -> Result<(Self, bool), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let mut found = false;
        let slo = &mut config.slo;

        if let Some(v) = env_value(&lookup, ENV_AVAILABILITY_TARGET)? {
            slo.availability_target = v;
            found = true;
        }
        if let Some(v) = env_value(&lookup, ENV_LATENCY_P95_MS)? {
            slo.latency_p95_ms = v;
            found = true;
        }
        if let Some(v) = env_value(&lookup, ENV_LATENCY_P99_MS)? {
            slo.latency_p99_ms = v;
            found = true;
        }
        if let Some(v) = env_value(&lookup, ENV_ERROR_RATE_MAX)? {
            slo.max_error_rate = v;
            found = true;
        }
        if let Some(v) = env_value(&lookup, ENV_ERROR_BUDGET_WINDOW_HOURS)? {
            slo.error_budget_window_hours = v;
            found = true;
        }

        config.validate()?;
        Ok((config, found))
    }

    /// Resolve configuration from the process environment and working directory
    pub fn load(explicit: Option<&Path>) -> Result<(Self, ConfigOrigin), ConfigError> {
        Self::resolve(explicit, Path::new(DEFAULT_CONFIG_PATH), |key| {
            std::env::var(key).ok()
        })
    }

    /// [`load`](Self::load) with the default path and environment injected
    pub fn resolve<F>(
        explicit: Option<&Path>,
        default_path: &Path,
        lookup: F,
    ) -> Result<(Self, ConfigOrigin), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = explicit {
            return Ok((Self::from_file(path)?, ConfigOrigin::File(path.to_path_buf())));
        }
        if default_path.is_file() {
            return Ok((
                Self::from_file(default_path)?,
                ConfigOrigin::File(default_path.to_path_buf()),
            ));
        }
        let (config, from_env) = Self::from_env_with(lookup)?;
        let origin = if from_env {
            ConfigOrigin::Environment
        } else {
            ConfigOrigin::Defaults
        };
        Ok((config, origin))
    }

    /// SLO targets for this service
    pub fn slo_config(&self) -> SloConfig {
        self.slo.to_slo_config(&self.service_name)
    }

    pub fn dependency(&self, name: &str) -> Option<&DependencyConfig> {
        self.dependencies.iter().find(|d| d.name == name)
    }

    /// Every problem in the configuration, empty when valid
    pub fn problems(&self) -> Vec<String> {
        let mut problems = self.slo_config().problems();

        let mut seen = HashSet::new();
        for dep in &self.dependencies {
            if dep.name.trim().is_empty() {
                problems.push("dependency name must not be empty".to_string());
                continue;
            }
            if !seen.insert(dep.name.as_str()) {
                problems.push(format!("duplicate dependency '{}'", dep.name));
            }
            problems.extend(dep.problems());
        }

        problems
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let problems = self.problems();
        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(problems))
        }
    }
}

fn env_value<T, F>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::Env {
                var,
                value: raw.clone(),
                reason: e.to_string(),
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = BulwarkConfig::default();
        assert!(config.validate().is_ok());

        let slo = config.slo_config();
        assert_eq!(slo, SloConfig::for_service("default"));
        assert_eq!(config.slo.error_budget_window_hours, 720);
    }

    #[test]
    fn test_parse_full_config() {
        let config = BulwarkConfig::from_toml_str(
            r#"
            service_name = "checkout"

            [logging]
            level = "debug"
            format = "json"

            [slo]
            availability_target = 0.995
            latency_p95_ms = 300
            latency_p99_ms = 0
            error_budget_window_hours = 168

            [[dependencies]]
            name = "inventory"

            [dependencies.breaker]
            failure_threshold = 3
            open_duration_secs = 10

            [dependencies.retry]
            preset = "fast"
            max_attempts = 2

            [dependencies.rate_limit]
            requests_per_second = 50.0
            burst = 5

            [dependencies.bulkhead]
            max_concurrency = 4
            acquire_timeout_ms = 250

            [[dependencies]]
            name = "audit-log"
            "#,
        )
        .unwrap();

        assert_eq!(config.service_name, "checkout");
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.logging.format, LogFormat::Json);

        let slo = config.slo_config();
        assert_eq!(slo.availability_target, 0.995);
        assert_eq!(slo.latency_p95_ms, 300);
        assert_eq!(slo.latency_p99_ms, None);
        assert_eq!(slo.error_budget_window, Duration::from_secs(168 * 3600));
        assert_eq!(slo.max_error_rate, 0.001);

        let inventory = config.dependency("inventory").unwrap();
        let breaker = inventory.breaker_config().unwrap();
        assert_eq!(breaker.name, "inventory");
        assert_eq!(breaker.failure_threshold, 3);
        assert_eq!(breaker.open_duration, Duration::from_secs(10));
        assert_eq!(breaker.half_open_trial_count, 3);

        let retry = inventory.retry_policy().unwrap();
        assert_eq!(retry.max_attempts, 2);
        assert_eq!(retry.initial_delay, Duration::from_millis(50));

        let limiter = inventory.rate_limiter_config().unwrap();
        assert_eq!(limiter.requests_per_second, 50.0);
        assert_eq!(limiter.burst, 5);

        let bulkhead = inventory.bulkhead_config().unwrap();
        assert_eq!(bulkhead.max_concurrency, 4);
        assert_eq!(bulkhead.acquire_timeout, Duration::from_millis(250));

        let audit = config.dependency("audit-log").unwrap();
        assert!(audit.breaker_config().is_none());
        assert!(audit.retry_policy().is_none());
    }

    #[test]
    fn test_validation_collects_every_problem() {
        let err = BulwarkConfig::from_toml_str(
            r#"
            [slo]
            availability_target = 1.5
            fast_burn_window_hours = 0

            [[dependencies]]
            name = "db"
            [dependencies.breaker]
            failure_threshold = 0
            [dependencies.retry]
            multiplier = 1.0

            [[dependencies]]
            name = "db"
            "#,
        )
        .unwrap_err();

        let ConfigError::Validation(problems) = &err else {
            panic!("expected validation error, got {err:?}");
        };
        assert_eq!(problems.len(), 5, "{problems:?}");
        assert!(problems.iter().any(|p| p.contains("availability_target")));
        assert!(problems.iter().any(|p| p.contains("fast_burn_window")));
        assert!(problems.iter().any(|p| p.contains("failure_threshold")));
        assert!(problems
            .iter()
            .any(|p| p.starts_with("dependency 'db': retry multiplier")));
        assert!(problems.contains(&"duplicate dependency 'db'".to_string()));
    }

    #[test]
    fn test_parse_error_names_origin() {
        let err = BulwarkConfig::from_toml_str("service_name = ").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("inline TOML"));
    }

    #[test]
    fn test_env_overrides() {
        let (config, found) = BulwarkConfig::from_env_with(env(&[
            (ENV_AVAILABILITY_TARGET, "0.99"),
            (ENV_LATENCY_P95_MS, "150"),
            (ENV_LATENCY_P99_MS, "400"),
            (ENV_ERROR_RATE_MAX, "0.01"),
            (ENV_ERROR_BUDGET_WINDOW_HOURS, "24"),
        ]))
        .unwrap();

        assert!(found);
        let slo = config.slo_config();
        assert_eq!(slo.availability_target, 0.99);
        assert_eq!(slo.latency_p95_ms, 150);
        assert_eq!(slo.latency_p99_ms, Some(400));
        assert_eq!(slo.max_error_rate, 0.01);
        assert_eq!(slo.error_budget_window, Duration::from_secs(24 * 3600));
        // Burn windows keep their defaults
        assert_eq!(slo.fast_burn_window, Duration::from_secs(3600));
    }

    #[test]
    fn test_env_unparseable_value() {
        let err = BulwarkConfig::from_env_with(env(&[(ENV_LATENCY_P95_MS, "fast")])).unwrap_err();
        match err {
            ConfigError::Env { var, value, .. } => {
                assert_eq!(var, ENV_LATENCY_P95_MS);
                assert_eq!(value, "fast");
            }
            other => panic!("expected env error, got {other:?}"),
        }
    }

    #[test]
    fn test_env_values_are_validated() {
        let err =
            BulwarkConfig::from_env_with(env(&[(ENV_AVAILABILITY_TARGET, "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_resolve_without_file_or_env_uses_defaults() {
        let missing = Path::new("does/not/exist/bulwark.toml");
        let (config, origin) = BulwarkConfig::resolve(None, missing, env(&[])).unwrap();
        assert_eq!(origin, ConfigOrigin::Defaults);
        assert_eq!(config, BulwarkConfig::default());

        let (_, origin) =
            BulwarkConfig::resolve(None, missing, env(&[(ENV_ERROR_RATE_MAX, "0.002")])).unwrap();
        assert_eq!(origin, ConfigOrigin::Environment);
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let err = BulwarkConfig::resolve(
            Some(Path::new("does/not/exist.toml")),
            Path::new(DEFAULT_CONFIG_PATH),
            env(&[]),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_log_level_conversion() {
        assert_eq!(LogLevel::Error.to_tracing_level(), tracing::Level::ERROR);
        assert_eq!(LogLevel::Warn.to_tracing_level(), tracing::Level::WARN);
        assert_eq!(LogLevel::Info.to_tracing_level(), tracing::Level::INFO);
        assert_eq!(LogLevel::Debug.to_tracing_level(), tracing::Level::DEBUG);
        assert_eq!(LogLevel::Trace.to_tracing_level(), tracing::Level::TRACE);
    }
}
