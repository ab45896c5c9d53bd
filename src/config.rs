//! Configuration management for token scans
//!
//! Configuration is read from a TOML file, then environment variables are
//! applied on top. Every field has a default, so an empty file is valid.
//!
//! ```toml
//! [cluster]
//! contact_points = ["127.0.0.1:9042"]
//! keyspace = "test_keyspace"
//! table = "example"
//! partition_key = ["id"]
//!
//! [scan]
//! granularity = 100
//! dispatch = "batched"
//! batch_concurrency = 32
//!
//! [retry]
//! max_retries = 3
//! failure_mode = "report_partial"
//! ```

use crate::coordinator::{DispatchMode, FailureMode, FailurePolicy, RetryPolicy, ScanConfig};
use crate::error::{Error, Result};
use crate::estimator::EstimationPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ApplicationConfig {
    /// Cluster connection settings
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Scan planning and dispatch
    #[serde(default)]
    pub scan: ScanSettings,

    /// Default parallelism estimation
    #[serde(default)]
    pub estimator: EstimatorSettings,

    /// Retry and failure handling
    #[serde(default)]
    pub retry: RetrySettings,

    /// Logging
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Cluster connection configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClusterConfig {
    /// Contact points as `host:port`
    #[serde(default = "default_contact_points")]
    pub contact_points: Vec<String>,

    /// Keyspace holding the scanned table
    #[serde(default = "default_keyspace")]
    pub keyspace: String,

    /// Table to scan
    #[serde(default = "default_table")]
    pub table: String,

    /// Partition key columns, in key order
    #[serde(default = "default_partition_key")]
    pub partition_key: Vec<String>,

    /// Timeout for establishing a session
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,
}

/// Dispatch strategy as written in configuration files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchKind {
    /// One range per dispatched unit
    PerRange,
    /// Up to `batch_concurrency` ranges per unit, queried concurrently
    Batched,
}

/// Scan configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScanSettings {
    /// Logical partition count; estimated from topology when absent
    #[serde(default)]
    pub partitions: Option<u64>,

    /// Number of workers (one session each)
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Query units per logical partition
    #[serde(default = "default_granularity")]
    pub granularity: u64,

    /// Dispatch strategy
    #[serde(default = "default_dispatch")]
    pub dispatch: DispatchKind,

    /// Ranges per batch in batched dispatch
    #[serde(default = "default_batch_concurrency")]
    pub batch_concurrency: usize,

    /// Per-range query timeout in milliseconds (0 = no timeout)
    #[serde(default = "default_unit_timeout_ms")]
    pub unit_timeout_ms: u64,
}

/// Parallelism estimation configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EstimatorSettings {
    /// Assumed cores per node (not measured)
    #[serde(default = "default_cores_per_node")]
    pub cores_per_node: u64,

    /// Range queries offered per core
    #[serde(default = "default_oversubscription")]
    pub oversubscription: u64,
}

/// Retry configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrySettings {
    /// Re-dispatches allowed per range (0 = fail fast)
    #[serde(default)]
    pub max_retries: u32,

    /// Delay before the first re-dispatch
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Upper bound on the backoff delay
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Backoff multiplier
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Add random jitter to delays
    #[serde(default = "default_true")]
    pub jitter: bool,

    /// What to do once a range runs out of retries
    #[serde(default = "default_failure_mode")]
    pub failure_mode: FailureMode,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log every range query and its row count
    #[serde(default)]
    pub verbose: bool,
}

// Default value functions
fn default_contact_points() -> Vec<String> { vec!["127.0.0.1:9042".to_string()] }
fn default_keyspace() -> String { "test_keyspace".to_string() }
fn default_table() -> String { "example".to_string() }
fn default_partition_key() -> Vec<String> { vec!["id".to_string()] }
fn default_connection_timeout_ms() -> u64 { 5_000 }
fn default_pool_size() -> usize { num_cpus::get() }
fn default_granularity() -> u64 { 100 }
fn default_dispatch() -> DispatchKind { DispatchKind::PerRange }
fn default_batch_concurrency() -> usize { 32 }
fn default_unit_timeout_ms() -> u64 { 30_000 }
fn default_cores_per_node() -> u64 { EstimationPolicy::PLACEHOLDER_CORES_PER_NODE }
fn default_oversubscription() -> u64 { EstimationPolicy::DEFAULT_OVERSUBSCRIPTION }
fn default_initial_delay_ms() -> u64 { 100 }
fn default_max_delay_ms() -> u64 { 5_000 }
fn default_multiplier() -> f64 { 2.0 }
fn default_failure_mode() -> FailureMode { FailureMode::Abort }
fn default_log_level() -> String { "info".to_string() }
fn default_true() -> bool { true }

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            contact_points: default_contact_points(),
            keyspace: default_keyspace(),
            table: default_table(),
            partition_key: default_partition_key(),
            connection_timeout_ms: default_connection_timeout_ms(),
        }
    }
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            partitions: None,
            pool_size: default_pool_size(),
            granularity: default_granularity(),
            dispatch: default_dispatch(),
            batch_concurrency: default_batch_concurrency(),
            unit_timeout_ms: default_unit_timeout_ms(),
        }
    }
}

impl Default for EstimatorSettings {
    fn default() -> Self {
        Self {
            cores_per_node: default_cores_per_node(),
            oversubscription: default_oversubscription(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            jitter: true,
            failure_mode: default_failure_mode(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            verbose: false,
        }
    }
}

impl ApplicationConfig {
    /// Load configuration from TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        toml::from_str(&contents).map_err(|e| {
            Error::Configuration(format!("Failed to parse config file {}: {}", path.display(), e))
        })
    }

    /// Load configuration with environment variable overrides
    pub fn from_file_with_env(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from environment variables only
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply `TOKEN_SCAN_*` overrides read through `lookup`
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        // Cluster
        if let Some(hosts) = lookup("TOKEN_SCAN_HOSTS") {
            self.cluster.contact_points = hosts
                .split(',')
                .map(str::trim)
                .filter(|h| !h.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(keyspace) = lookup("TOKEN_SCAN_KEYSPACE") {
            self.cluster.keyspace = keyspace;
        }
        if let Some(table) = lookup("TOKEN_SCAN_TABLE") {
            self.cluster.table = table;
        }

        // Scan
        if let Some(n) = lookup("TOKEN_SCAN_PARTITIONS").and_then(|v| v.parse().ok()) {
            self.scan.partitions = Some(n);
        }
        if let Some(n) = lookup("TOKEN_SCAN_POOL_SIZE").and_then(|v| v.parse().ok()) {
            self.scan.pool_size = n;
        }

        // Retry
        if let Some(n) = lookup("TOKEN_SCAN_MAX_RETRIES").and_then(|v| v.parse().ok()) {
            self.retry.max_retries = n;
        }

        // Logging
        if let Some(log_level) = lookup("RUST_LOG") {
            self.logging.level = log_level;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.cluster.contact_points.is_empty() {
            return Err(Error::Configuration(
                "At least one contact point is required".to_string(),
            ));
        }
        crate::session::RangeQuery::new(
            &self.cluster.keyspace,
            &self.cluster.table,
            self.cluster.partition_key.iter().cloned(),
        )?;

        if self.scan.partitions == Some(0) {
            return Err(Error::Configuration("Partition count must be > 0".to_string()));
        }
        if self.scan.pool_size == 0 {
            return Err(Error::Configuration("Pool size must be > 0".to_string()));
        }
        if self.scan.pool_size > 1024 {
            return Err(Error::Configuration("Pool size cannot exceed 1024".to_string()));
        }
        if self.scan.granularity == 0 {
            return Err(Error::Configuration("Granularity must be > 0".to_string()));
        }
        if self.scan.batch_concurrency == 0 {
            return Err(Error::Configuration("Batch concurrency must be > 0".to_string()));
        }

        if self.estimator.cores_per_node == 0 || self.estimator.oversubscription == 0 {
            return Err(Error::Configuration(
                "Estimator factors must be > 0".to_string(),
            ));
        }

        if self.retry.multiplier < 1.0 {
            return Err(Error::Configuration(
                "Retry multiplier must be >= 1.0".to_string(),
            ));
        }

        Ok(())
    }

    /// Save configuration to TOML file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Configuration(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, contents).map_err(|e| {
            Error::Configuration(format!("Failed to write config file {}: {}", path.display(), e))
        })
    }

    /// Estimation policy from the `[estimator]` section
    pub fn estimation_policy(&self) -> EstimationPolicy {
        EstimationPolicy {
            cores_per_node: self.estimator.cores_per_node,
            oversubscription: self.estimator.oversubscription,
        }
    }

    /// Failure policy from the `[retry]` section
    pub fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy {
            retry: RetryPolicy {
                max_retries: self.retry.max_retries,
                initial_delay: Duration::from_millis(self.retry.initial_delay_ms),
                max_delay: Duration::from_millis(self.retry.max_delay_ms),
                multiplier: self.retry.multiplier,
                jitter: self.retry.jitter,
            },
            mode: self.retry.failure_mode,
        }
    }

    /// Runtime scan configuration
    pub fn scan_config(&self) -> ScanConfig {
        let dispatch = match self.scan.dispatch {
            DispatchKind::PerRange => DispatchMode::PerRange,
            DispatchKind::Batched => DispatchMode::Batched {
                concurrency: self.scan.batch_concurrency,
            },
        };
        let unit_timeout = match self.scan.unit_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };

        ScanConfig::default()
            .granularity(self.scan.granularity)
            .dispatch(dispatch)
            .unit_timeout(unit_timeout)
            .failure_policy(self.failure_policy())
            .estimation_policy(self.estimation_policy())
            .verbose(self.logging.verbose)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = ApplicationConfig::default();
        assert_eq!(config.cluster.keyspace, "test_keyspace");
        assert_eq!(config.scan.granularity, 100);
        assert_eq!(config.estimator.cores_per_node, 2);
        assert_eq!(config.estimator.oversubscription, 3);
        assert_eq!(config.retry.max_retries, 0);
        assert_eq!(config.retry.failure_mode, FailureMode::Abort);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: ApplicationConfig = toml::from_str("").unwrap();
        assert_eq!(config.cluster.contact_points, vec!["127.0.0.1:9042"]);
        assert_eq!(config.scan.dispatch, DispatchKind::PerRange);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[cluster]
keyspace = "metrics"
table = "samples"
partition_key = ["tenant", "day"]

[scan]
partitions = 12
dispatch = "batched"
batch_concurrency = 8
unit_timeout_ms = 0

[retry]
max_retries = 2
failure_mode = "report_partial"
"#
        )
        .unwrap();

        let config = ApplicationConfig::from_file(file.path()).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.scan.partitions, Some(12));
        assert_eq!(config.cluster.partition_key, vec!["tenant", "day"]);

        let scan = config.scan_config();
        assert_eq!(scan.dispatch, DispatchMode::Batched { concurrency: 8 });
        assert_eq!(scan.unit_timeout, None);
        assert_eq!(scan.failure.retry.max_retries, 2);
        assert_eq!(scan.failure.mode, FailureMode::ReportPartial);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.toml");

        let mut config = ApplicationConfig::default();
        config.scan.partitions = Some(42);
        config.save_to_file(&path).unwrap();

        let loaded = ApplicationConfig::from_file(&path).unwrap();
        assert_eq!(loaded.scan.partitions, Some(42));
    }

    #[test]
    fn test_invalid_configs() {
        let mut config = ApplicationConfig::default();
        config.scan.pool_size = 0;
        assert!(config.validate().is_err());

        let mut config = ApplicationConfig::default();
        config.scan.partitions = Some(0);
        assert!(config.validate().is_err());

        let mut config = ApplicationConfig::default();
        config.cluster.table = "example; DROP TABLE x".to_string();
        assert!(config.validate().is_err());

        let mut config = ApplicationConfig::default();
        config.retry.multiplier = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = ApplicationConfig::from_file("/nonexistent/token-scan.toml").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_env_override() {
        let vars: HashMap<&str, &str> = [
            ("TOKEN_SCAN_PARTITIONS", "24"),
            ("TOKEN_SCAN_HOSTS", "10.0.0.1:9042, 10.0.0.2:9042"),
            ("TOKEN_SCAN_POOL_SIZE", "not-a-number"),
            ("TOKEN_SCAN_MAX_RETRIES", "3"),
        ]
        .into_iter()
        .collect();

        let mut config = ApplicationConfig::default();
        config.apply_overrides_from(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.scan.partitions, Some(24));
        assert_eq!(config.cluster.contact_points, vec!["10.0.0.1:9042", "10.0.0.2:9042"]);
        assert_eq!(config.scan.pool_size, num_cpus::get());
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.cluster.keyspace, "test_keyspace");
    }

    #[test]
    fn test_default_pool_size_matches_cpu_count() {
        assert_eq!(ScanSettings::default().pool_size, num_cpus::get());
    }
}
