//! Audit event log
//!
//! Emission is synchronous and infallible so that a broken audit pipeline
//! can never fail the state change it describes.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

/// Audit event type names used by the engine
pub mod event_types {
    pub const LINE_ASSIGNED: &str = "line.assigned";
    pub const LINE_UNBOUND: &str = "line.unbound";
    pub const LINE_BANNED: &str = "line.banned";
    pub const LINE_DISCONNECTED: &str = "line.disconnected";
    pub const LINE_RESTORED: &str = "line.restored";
    pub const LINE_SWITCHED: &str = "line.switched";
    pub const LINE_PROVISIONED: &str = "line.provisioned";
    pub const LINE_DEPROVISIONED: &str = "line.deprovisioned";
    pub const OPERATOR_IDLE_RELEASED: &str = "operator.idle_released";
    pub const QUEUE_EXPIRED: &str = "queue.expired";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditSeverity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_type: String,
    /// Component that raised the event
    pub module: String,
    pub payload: Value,
    /// Who triggered it; `None` for automatic flows
    pub actor: Option<String>,
    pub severity: AuditSeverity,
    pub at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(event_type: impl Into<String>, module: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            module: module.into(),
            payload,
            actor: None,
            severity: AuditSeverity::Info,
            at: Utc::now(),
        }
    }

    pub fn with_actor(mut self, actor: Option<&str>) -> Self {
        self.actor = actor.map(str::to_string);
        self
    }

    pub fn with_severity(mut self, severity: AuditSeverity) -> Self {
        self.severity = severity;
        self
    }
}

/// Audit collaborator
pub trait AuditSink: Send + Sync {
    fn emit(&self, event: AuditEvent);
}

/// Writes audit events to the `audit` tracing target
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        let payload = event.payload.to_string();
        match event.severity {
            AuditSeverity::Info => info!(
                target: "audit",
                event_type = %event.event_type,
                module = %event.module,
                actor = event.actor.as_deref().unwrap_or("system"),
                %payload,
                "📝 audit"
            ),
            AuditSeverity::Warning | AuditSeverity::Critical => warn!(
                target: "audit",
                event_type = %event.event_type,
                module = %event.module,
                actor = event.actor.as_deref().unwrap_or("system"),
                severity = ?event.severity,
                %payload,
                "📝 audit"
            ),
        }
    }
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    /// Number of recorded events of one type
    pub fn count(&self, event_type: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl AuditSink for MemoryAuditSink {
    fn emit(&self, event: AuditEvent) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_memory_sink_counts_by_type() {
        let sink = MemoryAuditSink::new();
        sink.emit(AuditEvent::new(event_types::LINE_BANNED, "health", json!({"line_id": 1})));
        sink.emit(
            AuditEvent::new(event_types::LINE_ASSIGNED, "allocation", json!({}))
                .with_actor(Some("admin")),
        );
        assert_eq!(sink.count(event_types::LINE_BANNED), 1);
        assert_eq!(sink.events()[1].actor.as_deref(), Some("admin"));
        sink.clear();
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_tracing_sink_never_panics() {
        TracingAuditSink.emit(
            AuditEvent::new(event_types::LINE_DISCONNECTED, "health", Value::Null)
                .with_severity(AuditSeverity::Critical),
        );
    }
}
