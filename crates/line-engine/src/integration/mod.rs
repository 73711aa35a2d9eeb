//! # Collaborator integration
//!
//! Everything the engine talks to but does not own sits behind a trait here:
//!
//! - [`ProviderProbe`]: live connection state of a provider instance
//! - [`Notifier`]: real-time pushes to operators
//! - [`AuditSink`]: the structured event log
//! - [`ControlPanel`]: per-segment allocation settings
//!
//! plus the internal capabilities ([`LineAssigner`], [`QueueGate`]) that let
//! components call each other without owning each other.

pub mod audit;
pub mod capabilities;
pub mod control_panel;
pub mod notifier;
pub mod probe;

use std::sync::Arc;

pub use audit::{event_types, AuditEvent, AuditSeverity, AuditSink, MemoryAuditSink, TracingAuditSink};
pub use capabilities::{LineAssigner, QueueGate};
pub use control_panel::{ControlPanel, SegmentSettings, StaticControlPanel};
pub use notifier::{BroadcastNotifier, NoopNotifier, Notification, NotificationEvent, NotificationTarget, Notifier};
pub use probe::{ConnectionState, FailureSignal, HttpProviderProbe, ProbeReport, ProviderProbe, StaticProbe};

use crate::config::LineEngineConfig;
use crate::error::Result;

/// The external collaborators an engine is wired with
#[derive(Clone)]
pub struct Collaborators {
    pub probe: Arc<dyn ProviderProbe>,
    pub notifier: Arc<dyn Notifier>,
    pub audit: Arc<dyn AuditSink>,
    pub control_panel: Arc<dyn ControlPanel>,
}

impl Collaborators {
    /// Production wiring: HTTP probe, broadcast notifier, tracing audit, config-backed panel
    pub fn from_config(config: &LineEngineConfig) -> Result<Self> {
        Ok(Self {
            probe: Arc::new(HttpProviderProbe::new(&config.provider)?),
            notifier: Arc::new(BroadcastNotifier::default()),
            audit: Arc::new(TracingAuditSink),
            control_panel: Arc::new(StaticControlPanel::new(config.control_panel.clone())),
        })
    }

    /// Offline wiring: every line probes connected and nothing leaves the process
    pub fn offline(config: &LineEngineConfig) -> Self {
        Self {
            probe: Arc::new(StaticProbe::new()),
            notifier: Arc::new(NoopNotifier),
            audit: Arc::new(TracingAuditSink),
            control_panel: Arc::new(StaticControlPanel::new(config.control_panel.clone())),
        }
    }
}
