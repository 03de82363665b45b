//! Configuration for Casemail

use crate::types::MailboxRef;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming an explicit configuration file
pub const CONFIG_PATH_ENV: &str = "CASEMAIL_CONFIG";

/// Prefix for environment overrides, e.g. `CASEMAIL__DATABASE__URL`
pub const ENV_PREFIX: &str = "CASEMAIL";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Mail provider client configuration
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Classification scoring configuration
    #[serde(default)]
    pub classification: ClassificationConfig,

    /// Batch reclassification configuration
    #[serde(default)]
    pub reclassify: ReclassifyConfig,

    /// Ingestion configuration
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Audit sink configuration
    #[serde(default)]
    pub audit: AuditConfig,

    /// Worker loop configuration
    #[serde(default)]
    pub worker: WorkerConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: Option<String>,

    /// Maximum connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Seconds to wait for a pooled connection
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            acquire_timeout_secs: default_acquire_timeout(),
        }
    }
}

fn default_max_connections() -> u32 {
    20
}

fn default_min_connections() -> u32 {
    1
}

fn default_acquire_timeout() -> u64 {
    30
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

/// Mail provider client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Base URL of the delta endpoint
    pub base_url: Option<String>,

    /// Bearer token sent with every request
    pub api_token: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,

    /// Maximum messages requested per page
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Retries for transient failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay for exponential backoff in milliseconds
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_token: None,
            timeout_secs: default_provider_timeout(),
            page_size: default_page_size(),
            max_retries: default_max_retries(),
            retry_base_ms: default_retry_base_ms(),
        }
    }
}

fn default_provider_timeout() -> u64 {
    30
}

fn default_page_size() -> u32 {
    100
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_ms() -> u64 {
    500
}

/// Classification scoring configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationConfig {
    /// Minimum score for an automatic case assignment
    #[serde(default = "default_classify_threshold")]
    pub classify_threshold: f64,

    /// Scores below this are reported as "no confident match"
    #[serde(default = "default_floor_threshold")]
    pub floor_threshold: f64,

    /// Signal weights
    #[serde(default)]
    pub weights: SignalWeights,

    /// Age in days at which the recency tie-breaker halves
    #[serde(default = "default_recency_half_life")]
    pub recency_half_life_days: f64,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            classify_threshold: default_classify_threshold(),
            floor_threshold: default_floor_threshold(),
            weights: SignalWeights::default(),
            recency_half_life_days: default_recency_half_life(),
        }
    }
}

impl ClassificationConfig {
    /// Reject thresholds that cannot produce a sensible decision
    pub fn validate(&self) -> crate::Result<()> {
        let in_unit = |v: f64| (0.0..=1.0).contains(&v);
        if !in_unit(self.classify_threshold) || !in_unit(self.floor_threshold) {
            return Err(crate::Error::Config(
                "Classification thresholds must lie within [0, 1]".to_string(),
            ));
        }
        if self.floor_threshold > self.classify_threshold {
            return Err(crate::Error::Config(format!(
                "floor_threshold ({}) exceeds classify_threshold ({})",
                self.floor_threshold, self.classify_threshold
            )));
        }
        if self.recency_half_life_days <= 0.0 {
            return Err(crate::Error::Config(
                "recency_half_life_days must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_classify_threshold() -> f64 {
    0.75
}

fn default_floor_threshold() -> f64 {
    0.40
}

fn default_recency_half_life() -> f64 {
    30.0
}

/// Weights of the individual scoring signals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalWeights {
    #[serde(default = "default_identifier_weight")]
    pub identifier: f64,

    #[serde(default = "default_participant_weight")]
    pub participant: f64,

    #[serde(default = "default_recency_weight")]
    pub recency: f64,
}

impl Default for SignalWeights {
    fn default() -> Self {
        Self {
            identifier: default_identifier_weight(),
            participant: default_participant_weight(),
            recency: default_recency_weight(),
        }
    }
}

fn default_identifier_weight() -> f64 {
    0.60
}

fn default_participant_weight() -> f64 {
    0.35
}

fn default_recency_weight() -> f64 {
    0.05
}

/// Batch reclassification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReclassifyConfig {
    /// Messages scored in parallel
    #[serde(default = "default_reclassify_concurrency")]
    pub concurrency: usize,

    /// Maximum unresolved messages loaded per pass
    #[serde(default = "default_batch_limit")]
    pub batch_limit: i64,

    /// Follow-up passes for thread siblings of newly classified messages
    #[serde(default = "default_max_passes")]
    pub max_passes: u32,

    /// Log progress every N messages
    #[serde(default = "default_progress_every")]
    pub progress_every: usize,
}

impl Default for ReclassifyConfig {
    fn default() -> Self {
        Self {
            concurrency: default_reclassify_concurrency(),
            batch_limit: default_batch_limit(),
            max_passes: default_max_passes(),
            progress_every: default_progress_every(),
        }
    }
}

fn default_reclassify_concurrency() -> usize {
    4
}

fn default_batch_limit() -> i64 {
    500
}

fn default_max_passes() -> u32 {
    3
}

fn default_progress_every() -> usize {
    100
}

/// Ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Score new messages synchronously as they are stored
    #[serde(default = "default_classify_on_ingest")]
    pub classify_on_ingest: bool,

    /// Upper bound on pages fetched by one catch-up run
    #[serde(default = "default_max_pages")]
    pub max_pages_per_run: u32,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            classify_on_ingest: default_classify_on_ingest(),
            max_pages_per_run: default_max_pages(),
        }
    }
}

fn default_classify_on_ingest() -> bool {
    true
}

fn default_max_pages() -> u32 {
    10
}

/// Audit sink configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Persist events to the audit table
    #[serde(default = "default_audit_persist")]
    pub persist: bool,

    /// Optional webhook receiving every event
    pub webhook_url: Option<String>,

    /// HMAC secret used to sign webhook bodies
    pub webhook_secret: Option<String>,

    /// Webhook timeout in milliseconds
    #[serde(default = "default_webhook_timeout")]
    pub timeout_ms: u64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            persist: default_audit_persist(),
            webhook_url: None,
            webhook_secret: None,
            timeout_ms: default_webhook_timeout(),
        }
    }
}

fn default_audit_persist() -> bool {
    true
}

fn default_webhook_timeout() -> u64 {
    5000
}

/// Worker loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Seconds between cycles
    #[serde(default = "default_worker_interval")]
    pub interval_secs: u64,

    /// Exit after a single cycle
    #[serde(default)]
    pub run_once: bool,

    /// Mailboxes synchronised every cycle
    #[serde(default)]
    pub mailboxes: Vec<MailboxRef>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_worker_interval(),
            run_once: false,
            mailboxes: Vec::new(),
        }
    }
}

fn default_worker_interval() -> u64 {
    300
}

impl Config {
    /// Parse configuration from a TOML string
    pub fn from_toml_str(content: &str) -> crate::Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.classification.validate()?;
        Ok(config)
    }

    /// Load configuration from a file, layered with `CASEMAIL__*` environment overrides
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Toml))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .map_err(|e| crate::Error::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.classification.validate()?;
        Ok(config)
    }

    /// Load configuration from `CASEMAIL_CONFIG` or the default locations
    pub fn load() -> crate::Result<Self> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            return Self::from_file(Path::new(&path));
        }

        let paths = [
            PathBuf::from("./casemail.toml"),
            PathBuf::from("/etc/casemail/config.toml"),
        ];

        for path in paths {
            if path.exists() {
                return Self::from_file(&path);
            }
        }

        Err(crate::Error::Config(
            "No configuration file found".to_string(),
        ))
    }
}
