//! Configuration loaded from `gridwatch.toml`.
//!
//! [`GridwatchConfig`] holds every tunable. Fields missing from the file use
//! the defaults below, and a missing file yields a fully-default config, so a
//! bare checkout runs out of the box.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Result;
use serde::Deserialize;

use crate::state_machine::RssStatus;

/// Nested map: attribute name -> attribute value -> integer (limit or delay).
pub type AttributeTable = HashMap<String, HashMap<String, u64>>;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct GridwatchConfig {
    /// Seconds between inspection cycles.
    #[serde(default = "default_polling_interval_secs")]
    pub polling_interval_secs: u64,

    /// Hard cap on the inspection worker pool.
    #[serde(default = "default_max_threads")]
    pub max_threads: usize,

    /// Seconds between log-summarization passes.
    #[serde(default = "default_summarize_interval_secs")]
    pub summarize_interval_secs: u64,

    /// History retention window in months.
    #[serde(default = "default_retention_months")]
    pub retention_months: u32,

    #[serde(default)]
    pub check_frequencies: CheckFrequencies,

    #[serde(default)]
    pub limiter: LimiterConfig,
}

/// How often an element in each status is re-inspected, in minutes.
/// More severe statuses are checked more often.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckFrequencies {
    #[serde(default = "default_freq_active")]
    pub active: i64,
    #[serde(default = "default_freq_active")]
    pub degraded: i64,
    #[serde(default = "default_freq_active")]
    pub probing: i64,
    #[serde(default = "default_freq_banned")]
    pub banned: i64,
    #[serde(default = "default_freq_unknown")]
    pub unknown: i64,
    #[serde(default = "default_freq_error")]
    pub error: i64,
}

impl CheckFrequencies {
    /// Re-check interval for a status.
    pub fn for_status(&self, status: RssStatus) -> chrono::Duration {
        let minutes = match status {
            RssStatus::Active => self.active,
            RssStatus::Degraded => self.degraded,
            RssStatus::Probing => self.probing,
            RssStatus::Banned => self.banned,
            RssStatus::Unknown => self.unknown,
            RssStatus::Error => self.error,
        };
        chrono::Duration::minutes(minutes)
    }
}

/// Running-limit and matching-delay tables for the job-matching throttle.
#[derive(Debug, Clone, Deserialize)]
pub struct LimiterConfig {
    /// Enforce per-site running-job caps.
    #[serde(default = "default_true")]
    pub check_job_limit: bool,

    /// Enforce post-dispatch matching delays.
    #[serde(default = "default_true")]
    pub check_matching_delay: bool,

    /// Site name -> attribute -> value -> max running jobs.
    #[serde(default)]
    pub site_limits: HashMap<String, AttributeTable>,

    /// Resource name -> attribute -> value -> max running jobs, merged on top
    /// of the site table when matching against a specific resource.
    #[serde(default)]
    pub resource_limits: HashMap<String, AttributeTable>,

    /// Site name -> attribute -> value -> delay seconds applied after a
    /// dispatch outcome for a job carrying that value.
    #[serde(default)]
    pub site_delays: HashMap<String, AttributeTable>,
}

fn default_polling_interval_secs() -> u64 {
    300
}

fn default_max_threads() -> usize {
    15
}

fn default_summarize_interval_secs() -> u64 {
    3600
}

fn default_retention_months() -> u32 {
    36
}

fn default_freq_active() -> i64 {
    20
}

fn default_freq_banned() -> i64 {
    15
}

fn default_freq_unknown() -> i64 {
    10
}

fn default_freq_error() -> i64 {
    5
}

fn default_true() -> bool {
    true
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            check_job_limit: true,
            check_matching_delay: true,
            site_limits: HashMap::new(),
            resource_limits: HashMap::new(),
            site_delays: HashMap::new(),
        }
    }
}

impl Default for CheckFrequencies {
    fn default() -> Self {
        Self {
            active: default_freq_active(),
            degraded: default_freq_active(),
            probing: default_freq_active(),
            banned: default_freq_banned(),
            unknown: default_freq_unknown(),
            error: default_freq_error(),
        }
    }
}

impl Default for GridwatchConfig {
    fn default() -> Self {
        Self {
            polling_interval_secs: default_polling_interval_secs(),
            max_threads: default_max_threads(),
            summarize_interval_secs: default_summarize_interval_secs(),
            retention_months: default_retention_months(),
            check_frequencies: CheckFrequencies::default(),
            limiter: LimiterConfig::default(),
        }
    }
}

impl GridwatchConfig {
    /// Load configuration from the given path, or from `gridwatch.toml` in
    /// the working directory. A missing file falls back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.unwrap_or(Path::new("gridwatch.toml"));
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            Ok(toml::from_str::<GridwatchConfig>(&contents)?)
        } else {
            Ok(Self::default())
        }
    }
}
