//! Configuration for the expense ingestion worker

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::ingestion::{CsvOptions, ExcelOptions, SheetSelector};
use crate::processing::{RetryPolicy, WorkerConfig};

/// Default bucket, matching the invoice bucket used by the upload side
pub const DEFAULT_BUCKET: &str = "guild-expense-bucket";
/// Default AWS region
pub const DEFAULT_REGION: &str = "us-central-1";
/// Longest long-poll SQS accepts
pub const SQS_MAX_WAIT_SECS: u64 = 20;
/// Longest visibility timeout SQS accepts (12 hours)
pub const SQS_MAX_VISIBILITY_SECS: u64 = 43_200;

/// Main ingestion configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Where raw files are fetched from
    #[serde(default)]
    pub object_store: ObjectStoreConfig,
    /// Work queue
    #[serde(default)]
    pub queue: QueueConfig,
    /// Expense database
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Parser options
    #[serde(default)]
    pub parsing: ParsingConfig,
    /// Timeouts and retries around blocking I/O
    #[serde(default)]
    pub retry: RetryConfig,
}

impl IngestConfig {
    /// Load from a TOML file, then apply environment overrides
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        let mut config = Self::from_toml_str(&text)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse TOML without touching the environment
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(format!("Invalid configuration: {}", e)))
    }

    /// Apply `AWS_INVOICE_BUCKET`, `AWS_REGION`, `EXPENSE_QUEUE_NAME`, `EXPENSE_DB_PATH`
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(bucket) = lookup("AWS_INVOICE_BUCKET") {
            self.object_store.bucket = bucket;
        }
        if let Some(region) = lookup("AWS_REGION") {
            self.object_store.region = region.clone();
            self.queue.region = region;
        }
        if let Some(queue_name) = lookup("EXPENSE_QUEUE_NAME") {
            self.queue.queue_name = queue_name;
        }
        if let Some(db_path) = lookup("EXPENSE_DB_PATH") {
            self.database.path = PathBuf::from(db_path);
        }
    }

    /// Reject settings the worker cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.object_store.bucket.trim().is_empty() {
            return Err(Error::Config("object_store.bucket must not be empty".to_string()));
        }
        if self.queue.backend == QueueBackend::Sqs {
            if self.queue.wait_time_secs > SQS_MAX_WAIT_SECS {
                return Err(Error::Config(format!(
                    "queue.wait_time_secs ({}) exceeds the SQS limit of {}s",
                    self.queue.wait_time_secs, SQS_MAX_WAIT_SECS
                )));
            }
            if self.queue.visibility_timeout_secs > SQS_MAX_VISIBILITY_SECS {
                return Err(Error::Config(format!(
                    "queue.visibility_timeout_secs ({}) exceeds the SQS limit of {}s",
                    self.queue.visibility_timeout_secs, SQS_MAX_VISIBILITY_SECS
                )));
            }
        }
        if !self.parsing.csv_delimiter.is_ascii() {
            return Err(Error::Config(format!(
                "parsing.csv_delimiter must be a single ASCII character, got '{}'",
                self.parsing.csv_delimiter
            )));
        }
        if self.parsing.excel_header_row == 0 {
            return Err(Error::Config("parsing.excel_header_row is 1-based".to_string()));
        }
        if self.parsing.timeout_secs == 0 {
            return Err(Error::Config("parsing.timeout_secs must be at least 1".to_string()));
        }
        self.retry.fetch.validate("retry.fetch")?;
        self.retry.store.validate("retry.store")?;

        // Queue names, receive count and the visibility budget
        WorkerConfig::from_config(self).validate()
    }
}

/// Object store backend selection
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ObjectStoreBackend {
    /// Filesystem directory laid out as `<root>/<bucket>/<key>`
    #[default]
    Local,
    /// Amazon S3 (feature `aws`)
    S3,
}

/// Object store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectStoreConfig {
    #[serde(default)]
    pub backend: ObjectStoreBackend,
    /// Bucket holding partner files
    #[serde(default = "default_bucket")]
    pub bucket: String,
    /// Root directory for the local backend
    #[serde(default = "default_local_root")]
    pub local_root: PathBuf,
    /// AWS region for the S3 backend
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint (S3-compatible stores)
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        Self {
            backend: ObjectStoreBackend::Local,
            bucket: default_bucket(),
            local_root: default_local_root(),
            region: default_region(),
            endpoint_url: None,
        }
    }
}

/// Queue backend selection
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    /// Durable queue in a local SQLite file
    #[default]
    Sqlite,
    /// Amazon SQS (feature `aws`)
    Sqs,
}

/// Queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default)]
    pub backend: QueueBackend,
    /// Queue carrying file messages
    #[serde(default = "default_queue_name")]
    pub queue_name: String,
    /// Side queue for poison messages (default: `<queue_name>-dead-letter`)
    #[serde(default)]
    pub dead_letter_queue: Option<String>,
    /// Long-poll wait per receive (default: 3s)
    #[serde(default = "default_wait_time")]
    pub wait_time_secs: u64,
    /// How long a received message stays hidden (default: 600s)
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout_secs: u64,
    /// Deliveries before a failing message is dead-lettered (default: 5)
    #[serde(default = "default_max_receive_count")]
    pub max_receive_count: u32,
    /// Re-check interval while long-polling the SQLite backend
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// SQLite file for the local backend
    #[serde(default = "default_queue_path")]
    pub sqlite_path: PathBuf,
    /// AWS region for the SQS backend
    #[serde(default = "default_region")]
    pub region: String,
}

impl QueueConfig {
    pub fn dead_letter_name(&self) -> String {
        self.dead_letter_queue
            .clone()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| format!("{}-dead-letter", self.queue_name))
    }

    pub fn wait_time(&self) -> Duration {
        Duration::from_secs(self.wait_time_secs)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(10))
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackend::Sqlite,
            queue_name: default_queue_name(),
            dead_letter_queue: None,
            wait_time_secs: default_wait_time(),
            visibility_timeout_secs: default_visibility_timeout(),
            max_receive_count: default_max_receive_count(),
            poll_interval_ms: default_poll_interval(),
            sqlite_path: default_queue_path(),
            region: default_region(),
        }
    }
}

/// Expense database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database path
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

/// Parser configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsingConfig {
    /// CSV field delimiter (default: ',')
    #[serde(default = "default_delimiter")]
    pub csv_delimiter: char,
    /// First CSV row is a header (default: true)
    #[serde(default = "default_true")]
    pub csv_has_headers: bool,
    /// Worksheet by name; takes precedence over the index
    #[serde(default)]
    pub excel_sheet_name: Option<String>,
    /// Worksheet by position (default: 0, the first sheet)
    #[serde(default)]
    pub excel_sheet_index: usize,
    /// Worksheet has a header row (default: true)
    #[serde(default = "default_true")]
    pub excel_has_headers: bool,
    /// 1-based header row within the used range (default: 1)
    #[serde(default = "default_header_row")]
    pub excel_header_row: usize,
    /// Limit for parsing one file (default: 120s)
    #[serde(default = "default_parse_timeout")]
    pub timeout_secs: u64,
}

impl ParsingConfig {
    pub fn csv_options(&self) -> CsvOptions {
        CsvOptions {
            delimiter: u8::try_from(self.csv_delimiter).unwrap_or(b','),
            has_headers: self.csv_has_headers,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn excel_options(&self) -> ExcelOptions {
        let sheet = match &self.excel_sheet_name {
            Some(name) if !name.trim().is_empty() => SheetSelector::Name(name.clone()),
            _ => SheetSelector::Index(self.excel_sheet_index),
        };
        ExcelOptions {
            sheet,
            has_headers: self.excel_has_headers,
            header_row: self.excel_header_row,
        }
    }
}

impl Default for ParsingConfig {
    fn default() -> Self {
        Self {
            csv_delimiter: ',',
            csv_has_headers: true,
            excel_sheet_name: None,
            excel_sheet_index: 0,
            excel_has_headers: true,
            excel_header_row: 1,
            timeout_secs: default_parse_timeout(),
        }
    }
}

/// Retry configuration for the two blocking stages
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Object store fetch
    #[serde(default)]
    pub fetch: RetryPolicyConfig,
    /// Expense store persist
    #[serde(default)]
    pub store: RetryPolicyConfig,
}

/// Timeout and back-off for one stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicyConfig {
    /// Attempts including the first (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Per-attempt timeout (default: 30s)
    #[serde(default = "default_attempt_timeout")]
    pub timeout_secs: u64,
    /// First back-off (default: 200ms), doubled per retry
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    /// Back-off cap (default: 5s)
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl RetryPolicyConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            attempt_timeout: Duration::from_secs(self.timeout_secs),
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        }
    }

    fn validate(&self, section: &str) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::Config(format!("{}.max_attempts must be at least 1", section)));
        }
        if self.timeout_secs == 0 {
            return Err(Error::Config(format!("{}.timeout_secs must be at least 1", section)));
        }
        Ok(())
    }
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            timeout_secs: default_attempt_timeout(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
        .join("partner-expenses")
}

fn default_bucket() -> String { DEFAULT_BUCKET.to_string() }
fn default_region() -> String { DEFAULT_REGION.to_string() }
fn default_local_root() -> PathBuf { data_dir().join("objects") }
fn default_queue_name() -> String { "partner-expense-files".to_string() }
fn default_wait_time() -> u64 { 3 }
fn default_visibility_timeout() -> u64 { 600 }
fn default_max_receive_count() -> u32 { 5 }
fn default_poll_interval() -> u64 { 250 }
fn default_queue_path() -> PathBuf { data_dir().join("queue.db") }
fn default_database_path() -> PathBuf { data_dir().join("expenses.db") }
fn default_delimiter() -> char { ',' }
fn default_true() -> bool { true }
fn default_header_row() -> usize { 1 }
fn default_parse_timeout() -> u64 { 120 }
fn default_max_attempts() -> u32 { 3 }
fn default_attempt_timeout() -> u64 { 30 }
fn default_initial_backoff() -> u64 { 200 }
fn default_max_backoff() -> u64 { 5_000 }
