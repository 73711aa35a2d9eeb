//! Control panel settings
//!
//! Operators of the platform tune allocation per segment: which provider
//! integrations are active, whether automatic allocation runs at all, and how
//! many operators share one line. A global shared-line mode removes the cap.

use parking_lot::RwLock;
use tracing::info;

use crate::config::{ControlPanelConfig, SegmentPolicyConfig};
use crate::types::SegmentId;

/// Effective settings for one segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentSettings {
    pub allocation_enabled: bool,
    pub max_operators_per_line: usize,
    /// `None` allows every provider
    pub active_providers: Option<Vec<String>>,
}

impl SegmentSettings {
    pub fn provider_enabled(&self, provider_ref: &str) -> bool {
        match &self.active_providers {
            Some(providers) => providers.iter().any(|p| p == provider_ref),
            None => true,
        }
    }
}

impl From<&SegmentPolicyConfig> for SegmentSettings {
    fn from(policy: &SegmentPolicyConfig) -> Self {
        Self {
            allocation_enabled: policy.allocation_enabled,
            max_operators_per_line: policy.max_operators_per_line.max(1) as usize,
            active_providers: policy.active_providers.clone(),
        }
    }
}

/// Control panel collaborator
pub trait ControlPanel: Send + Sync {
    /// Settings for a segment; `None` is the unsegmented pool
    fn segment_settings(&self, segment: Option<SegmentId>) -> SegmentSettings;

    fn shared_line_mode(&self) -> bool;
}

/// Control panel backed by the `[control_panel]` config section, adjustable at runtime
#[derive(Debug)]
pub struct StaticControlPanel {
    inner: RwLock<ControlPanelConfig>,
}

impl StaticControlPanel {
    pub fn new(config: ControlPanelConfig) -> Self {
        Self { inner: RwLock::new(config) }
    }

    pub fn set_shared_line_mode(&self, enabled: bool) {
        info!("🎛️ Shared line mode {}", if enabled { "enabled" } else { "disabled" });
        self.inner.write().shared_line_mode = enabled;
    }

    pub fn set_segment_policy(&self, segment: SegmentId, policy: SegmentPolicyConfig) {
        info!("🎛️ Updating policy for {}", segment);
        self.inner.write().segments.insert(segment.0.to_string(), policy);
    }

    pub fn set_default_policy(&self, policy: SegmentPolicyConfig) {
        self.inner.write().default_policy = policy;
    }
}

impl Default for StaticControlPanel {
    fn default() -> Self {
        Self::new(ControlPanelConfig::default())
    }
}

impl ControlPanel for StaticControlPanel {
    fn segment_settings(&self, segment: Option<SegmentId>) -> SegmentSettings {
        let config = self.inner.read();
        let policy = segment
            .and_then(|s| config.segments.get(&s.0.to_string()))
            .unwrap_or(&config.default_policy);
        SegmentSettings::from(policy)
    }

    fn shared_line_mode(&self) -> bool {
        self.inner.read().shared_line_mode
    }
}
