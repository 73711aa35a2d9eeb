//! Provider connection probes
//!
//! A probe asks the messaging provider how one instance is doing and
//! normalizes the answer into a [`ProbeReport`]. Probe errors are never
//! fatal to callers: they are logged and read as [`ConnectionState::Unknown`].

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::ProviderConfig;
use crate::error::{LineEngineError, Result};

/// Normalized provider connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connected,
    Connecting,
    Disconnected,
    Unknown,
}

/// Typed failure classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureSignal {
    Banned,
    Disconnected,
}

/// Result of one probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeReport {
    pub state: ConnectionState,
    /// Set when the provider's answer looks like a ban or a lost session
    pub signal: Option<FailureSignal>,
}

impl ProbeReport {
    pub fn connected() -> Self {
        Self { state: ConnectionState::Connected, signal: None }
    }

    pub fn connecting() -> Self {
        Self { state: ConnectionState::Connecting, signal: None }
    }

    pub fn disconnected() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            signal: Some(FailureSignal::Disconnected),
        }
    }

    pub fn banned() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            signal: Some(FailureSignal::Banned),
        }
    }

    pub fn unknown() -> Self {
        Self { state: ConnectionState::Unknown, signal: None }
    }

    /// Whether the line may receive new operators
    pub fn is_allocatable(&self, treat_unknown_as_connected: bool) -> bool {
        match self.state {
            ConnectionState::Connected => true,
            ConnectionState::Unknown => treat_unknown_as_connected,
            ConnectionState::Connecting | ConnectionState::Disconnected => false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}

/// Provider connection probe
#[async_trait]
pub trait ProviderProbe: Send + Sync {
    /// Probe one provider instance
    async fn probe(&self, instance_name: &str) -> Result<ProbeReport>;
}

/// Probe and fold any error into an unknown report
pub async fn probe_or_unknown(probe: &dyn ProviderProbe, instance_name: &str) -> ProbeReport {
    match probe.probe(instance_name).await {
        Ok(report) => report,
        Err(e) => {
            warn!("⚠️ Probe for instance {} failed, treating as unknown: {}", instance_name, e);
            ProbeReport::unknown()
        }
    }
}

/// Interpret a provider `connectionState` response body.
///
/// Accepts both `{"instance": {"state": ..}}` and a flat `{"state": ..}`.
pub fn interpret_connection_state(body: &Value) -> ProbeReport {
    let instance = body.get("instance").unwrap_or(body);

    let status_reason = instance
        .get("statusReason")
        .or_else(|| body.get("statusReason"))
        .and_then(Value::as_i64);
    if matches!(status_reason, Some(401) | Some(403)) {
        return ProbeReport::banned();
    }

    let state = instance
        .get("state")
        .or_else(|| body.get("state"))
        .and_then(Value::as_str)
        .map(|s| s.to_ascii_lowercase());

    match state.as_deref() {
        Some("open") => ProbeReport::connected(),
        Some("connecting") | Some("qr") => ProbeReport::connecting(),
        Some("close") | Some("closed") | Some("disconnected") | Some("logout") => ProbeReport::disconnected(),
        _ => ProbeReport::unknown(),
    }
}

/// HTTP probe against the provider's `connectionState` endpoint
pub struct HttpProviderProbe {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpProviderProbe {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| LineEngineError::config(format!("Failed to build provider client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn state_url(&self, instance_name: &str) -> String {
        format!("{}/instance/connectionState/{}", self.base_url, instance_name)
    }
}

#[async_trait]
impl ProviderProbe for HttpProviderProbe {
    async fn probe(&self, instance_name: &str) -> Result<ProbeReport> {
        let mut request = self.client.get(self.state_url(instance_name));
        if let Some(key) = &self.api_key {
            request = request.header("apikey", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| LineEngineError::provider_unavailable(format!("{}: {}", instance_name, e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            debug!("🔍 Instance {} not found at provider, reading as disconnected", instance_name);
            return Ok(ProbeReport::disconnected());
        }
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Ok(ProbeReport::banned());
        }
        if !status.is_success() {
            return Err(LineEngineError::provider_unavailable(format!(
                "{}: provider answered {}",
                instance_name, status
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| LineEngineError::provider_unavailable(format!("{}: bad body: {}", instance_name, e)))?;

        let report = interpret_connection_state(&body);
        debug!("🔍 Instance {} probed as {:?}", instance_name, report.state);
        Ok(report)
    }
}

/// Probe whose answers are set at runtime.
///
/// Scripted answers queued with [`StaticProbe::push_script`] are consumed
/// first, then the steady answer for the instance, then the default.
pub struct StaticProbe {
    steady: DashMap<String, ProbeReport>,
    scripted: DashMap<String, VecDeque<ProbeReport>>,
    calls: DashMap<String, usize>,
    default_report: ProbeReport,
    latency: Option<Duration>,
}

impl StaticProbe {
    /// Every instance reports connected unless told otherwise
    pub fn new() -> Self {
        Self::with_default(ProbeReport::connected())
    }

    pub fn with_default(default_report: ProbeReport) -> Self {
        Self {
            steady: DashMap::new(),
            scripted: DashMap::new(),
            calls: DashMap::new(),
            default_report,
            latency: None,
        }
    }

    /// Delay every answer, to widen race windows in tests
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn set(&self, instance_name: &str, report: ProbeReport) {
        self.steady.insert(instance_name.to_string(), report);
    }

    pub fn push_script(&self, instance_name: &str, reports: impl IntoIterator<Item = ProbeReport>) {
        self.scripted
            .entry(instance_name.to_string())
            .or_default()
            .extend(reports);
    }

    /// Number of probes issued for an instance
    pub fn calls(&self, instance_name: &str) -> usize {
        self.calls.get(instance_name).map(|c| *c).unwrap_or(0)
    }
}

impl Default for StaticProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderProbe for StaticProbe {
    async fn probe(&self, instance_name: &str) -> Result<ProbeReport> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        *self.calls.entry(instance_name.to_string()).or_insert(0) += 1;

        let scripted = self
            .scripted
            .get_mut(instance_name)
            .and_then(|mut queue| queue.pop_front());
        if let Some(report) = scripted {
            return Ok(report);
        }

        Ok(self
            .steady
            .get(instance_name)
            .map(|r| *r)
            .unwrap_or(self.default_report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_provider_vocabulary() {
        let cases = [
            ("open", ConnectionState::Connected),
            ("connecting", ConnectionState::Connecting),
            ("qr", ConnectionState::Connecting),
            ("close", ConnectionState::Disconnected),
            ("closed", ConnectionState::Disconnected),
            ("logout", ConnectionState::Disconnected),
            ("whatever", ConnectionState::Unknown),
        ];
        for (raw, expected) in cases {
            let report = interpret_connection_state(&json!({"instance": {"instanceName": "x", "state": raw}}));
            assert_eq!(report.state, expected, "state {}", raw);
        }
    }

    #[test]
    fn test_flat_body_and_ban_reason() {
        assert!(interpret_connection_state(&json!({"state": "open"})).is_connected());

        let banned = interpret_connection_state(&json!({"instance": {"state": "close", "statusReason": 401}}));
        assert_eq!(banned.signal, Some(FailureSignal::Banned));

        let closed = interpret_connection_state(&json!({"instance": {"state": "close", "statusReason": 428}}));
        assert_eq!(closed.signal, Some(FailureSignal::Disconnected));
    }

    #[test]
    fn test_allocatable() {
        assert!(ProbeReport::connected().is_allocatable(false));
        assert!(!ProbeReport::connecting().is_allocatable(true));
        assert!(ProbeReport::unknown().is_allocatable(true));
        assert!(!ProbeReport::unknown().is_allocatable(false));
    }

    #[tokio::test]
    async fn test_static_probe_script_then_steady() {
        let probe = StaticProbe::new();
        probe.set("a", ProbeReport::connecting());
        probe.push_script("a", [ProbeReport::banned()]);

        assert_eq!(probe.probe("a").await.unwrap(), ProbeReport::banned());
        assert_eq!(probe.probe("a").await.unwrap(), ProbeReport::connecting());
        assert_eq!(probe.probe("b").await.unwrap(), ProbeReport::connected());
        assert_eq!(probe.calls("a"), 2);
    }
}
