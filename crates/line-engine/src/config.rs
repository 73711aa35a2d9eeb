//! # Line Engine Configuration
//!
//! Configuration for every component of the line engine. Each section maps to
//! one component and carries the reference cadences as defaults, so an empty
//! config file yields a working engine backed by an in-memory database.
//!
//! ## Loading
//!
//! [`LineEngineConfig::load`] layers, in order:
//!
//! 1. built-in defaults,
//! 2. an optional TOML file,
//! 3. `LINEPOOL__<SECTION>__<KEY>` environment variables.
//!
//! ```toml
//! [database]
//! database_url = "sqlite://linepool.db?mode=rwc"
//!
//! [queue]
//! entry_ttl_secs = 1800
//!
//! [control_panel.segments.7]
//! max_operators_per_line = 3
//! active_providers = ["evolution-a"]
//! ```
//!
//! Values are validated with [`LineEngineConfig::validate`] before the
//! engine is built.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LineEngineError, Result};
use crate::types::SegmentId;

/// Line engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LineEngineConfig {
    /// General settings
    pub general: GeneralConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Allocation engine configuration
    pub allocation: AllocationConfig,

    /// Waiting queue configuration
    pub queue: QueueConfig,

    /// Health monitor and reallocation configuration
    pub health: HealthConfig,

    /// Load balancer configuration
    pub balancer: BalancerConfig,

    /// Sticky contact routing configuration
    pub contacts: ContactRoutingConfig,

    /// Control panel defaults and per-segment overrides
    pub control_panel: ControlPanelConfig,

    /// Provider probe configuration
    pub provider: ProviderConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// General settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Name of this engine instance, stamped on queue claims
    pub instance_name: String,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// sqlx connection URL; `sqlite::memory:` for an in-memory store
    pub database_url: String,

    /// Maximum pooled connections (forced to 1 for in-memory stores)
    pub max_connections: u32,

    /// SQLite busy timeout (milliseconds)
    pub busy_timeout_ms: u64,

    /// Upper bound for one mutating transaction (milliseconds)
    pub transaction_timeout_ms: u64,
}

/// Allocation engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocationConfig {
    /// Id of the "Default" pool segment, if the deployment has one
    pub default_segment_id: Option<i64>,

    /// Treat an indeterminate probe result as connected when filtering candidates
    pub treat_unknown_as_connected: bool,

    /// Candidates tried by `request_line` before falling back to the queue
    pub max_assign_attempts: u32,
}

/// Waiting queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Time-to-live of a waiting entry (seconds)
    pub entry_ttl_secs: u64,

    /// Queue drain cadence (milliseconds)
    pub process_interval_ms: u64,

    /// Lease held on a claimed entry while it is being assigned (seconds)
    pub claim_lease_secs: u64,
}

/// Health monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Full sweep of every line (seconds)
    pub full_sweep_interval_secs: u64,

    /// Targeted sweep of online operators' lines (seconds)
    pub targeted_sweep_interval_secs: u64,

    /// Delay before the confirming probe (milliseconds)
    pub confirm_delay_ms: u64,

    /// Idle reclamation cadence (seconds)
    pub idle_sweep_interval_secs: u64,

    /// Offline time after which an operator's bindings are released (hours)
    pub idle_threshold_hours: u64,

    /// Tabulation written on conversations stranded by a lost line
    pub abandoned_tabulation: String,
}

/// Load balancer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BalancerConfig {
    /// Run the periodic sweep
    pub enabled: bool,

    /// Sweep cadence (seconds)
    pub interval_secs: u64,

    /// Score at or above which an operator is moved off their line
    pub switch_threshold: f64,

    /// Minimum score advantage a candidate line must offer
    pub min_score_gap: f64,

    /// Score above which the sweep looks at a line
    pub overload_threshold: f64,
}

/// Sticky contact routing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContactRoutingConfig {
    /// Sticky binding window (hours)
    pub sticky_window_hours: u64,
}

/// Control panel defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlPanelConfig {
    /// Remove the capacity cap and disable manual unbind
    pub shared_line_mode: bool,

    /// Policy for segments without an override
    pub default_policy: SegmentPolicyConfig,

    /// Per-segment overrides, keyed by segment id
    pub segments: HashMap<String, SegmentPolicyConfig>,
}

/// Allocation policy for one segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentPolicyConfig {
    /// Automatic allocation is enabled
    pub allocation_enabled: bool,

    /// Capacity of a non-reserve line
    pub max_operators_per_line: u32,

    /// Provider allow-list; `None` allows every provider
    pub active_providers: Option<Vec<String>>,
}

/// Provider probe configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Base URL of the provider API
    pub base_url: String,

    /// API key sent in the `apikey` header
    pub api_key: Option<String>,

    /// Request timeout (milliseconds)
    pub request_timeout_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level directive (`info`, `linepool_line_engine=debug`, ...)
    pub level: String,

    /// Emit JSON lines
    pub json: bool,

    /// Include file and line information
    pub file_info: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            instance_name: "linepool".to_string(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            max_connections: 5,
            busy_timeout_ms: 5_000,
            transaction_timeout_ms: 15_000,
        }
    }
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            default_segment_id: None,
            treat_unknown_as_connected: true,
            max_assign_attempts: 3,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            entry_ttl_secs: 30 * 60,
            process_interval_ms: 5_000,
            claim_lease_secs: 30,
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            full_sweep_interval_secs: 30 * 60,
            targeted_sweep_interval_secs: 15,
            confirm_delay_ms: 5_000,
            idle_sweep_interval_secs: 60 * 60,
            idle_threshold_hours: 72,
            abandoned_tabulation: "line_lost".to_string(),
        }
    }
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 5 * 60,
            switch_threshold: 80.0,
            min_score_gap: 20.0,
            overload_threshold: 70.0,
        }
    }
}

impl Default for ContactRoutingConfig {
    fn default() -> Self {
        Self {
            sticky_window_hours: 24,
        }
    }
}

impl Default for ControlPanelConfig {
    fn default() -> Self {
        Self {
            shared_line_mode: false,
            default_policy: SegmentPolicyConfig::default(),
            segments: HashMap::new(),
        }
    }
}

impl Default for SegmentPolicyConfig {
    fn default() -> Self {
        Self {
            allocation_enabled: true,
            max_operators_per_line: 2,
            active_providers: None,
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            api_key: None,
            request_timeout_ms: 10_000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file_info: false,
        }
    }
}

impl LineEngineConfig {
    /// Load configuration from an optional TOML file plus `LINEPOOL__*` environment variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config: Self = builder
            .add_source(
                config::Environment::with_prefix("LINEPOOL")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration for consistency and correctness
    pub fn validate(&self) -> Result<()> {
        if self.general.instance_name.is_empty() {
            return Err(LineEngineError::config("instance_name cannot be empty"));
        }

        if self.database.database_url.is_empty() {
            return Err(LineEngineError::config("database_url cannot be empty"));
        }

        if self.database.max_connections == 0 {
            return Err(LineEngineError::config("max_connections must be greater than 0"));
        }

        if self.database.transaction_timeout_ms == 0 {
            return Err(LineEngineError::config("transaction_timeout_ms must be greater than 0"));
        }

        if self.allocation.max_assign_attempts == 0 {
            return Err(LineEngineError::config("max_assign_attempts must be greater than 0"));
        }

        if self.queue.entry_ttl_secs == 0 {
            return Err(LineEngineError::config("entry_ttl_secs must be greater than 0"));
        }

        if self.queue.process_interval_ms == 0 {
            return Err(LineEngineError::config("process_interval_ms must be greater than 0"));
        }

        if self.health.full_sweep_interval_secs == 0
            || self.health.targeted_sweep_interval_secs == 0
            || self.health.idle_sweep_interval_secs == 0
        {
            return Err(LineEngineError::config("health sweep intervals must be greater than 0"));
        }

        if self.health.abandoned_tabulation.is_empty() {
            return Err(LineEngineError::config("abandoned_tabulation cannot be empty"));
        }

        if self.balancer.interval_secs == 0 {
            return Err(LineEngineError::config("balancer interval_secs must be greater than 0"));
        }

        for (name, value) in [
            ("switch_threshold", self.balancer.switch_threshold),
            ("min_score_gap", self.balancer.min_score_gap),
            ("overload_threshold", self.balancer.overload_threshold),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(LineEngineError::config(format!("{} must be within 0..=100, got {}", name, value)));
            }
        }

        if self.contacts.sticky_window_hours == 0 {
            return Err(LineEngineError::config("sticky_window_hours must be greater than 0"));
        }

        if self.control_panel.default_policy.max_operators_per_line == 0 {
            return Err(LineEngineError::config("max_operators_per_line must be greater than 0"));
        }

        for (key, policy) in &self.control_panel.segments {
            if key.parse::<i64>().is_err() {
                return Err(LineEngineError::config(format!("segment key '{}' is not a segment id", key)));
            }
            if policy.max_operators_per_line == 0 {
                return Err(LineEngineError::config(format!(
                    "segment {} max_operators_per_line must be greater than 0",
                    key
                )));
            }
        }

        Ok(())
    }

    /// Id of the Default pool segment
    pub fn default_segment(&self) -> Option<SegmentId> {
        self.allocation.default_segment_id.map(SegmentId)
    }
}

impl DatabaseConfig {
    /// Whether the URL points at an in-memory store
    pub fn is_in_memory(&self) -> bool {
        self.database_url.contains(":memory:") || self.database_url.contains("mode=memory")
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn transaction_timeout(&self) -> Duration {
        Duration::from_millis(self.transaction_timeout_ms)
    }
}

impl QueueConfig {
    pub fn entry_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.entry_ttl_secs as i64)
    }

    pub fn claim_lease(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.claim_lease_secs as i64)
    }

    pub fn process_interval(&self) -> Duration {
        Duration::from_millis(self.process_interval_ms)
    }
}

impl HealthConfig {
    pub fn full_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.full_sweep_interval_secs)
    }

    pub fn targeted_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.targeted_sweep_interval_secs)
    }

    pub fn confirm_delay(&self) -> Duration {
        Duration::from_millis(self.confirm_delay_ms)
    }

    pub fn idle_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.idle_sweep_interval_secs)
    }

    pub fn idle_threshold(&self) -> chrono::Duration {
        chrono::Duration::hours(self.idle_threshold_hours as i64)
    }
}

impl BalancerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl ContactRoutingConfig {
    pub fn sticky_window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.sticky_window_hours as i64)
    }
}

impl ProviderConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
