//! Shared harness for the line engine integration tests
//!
//! Builds an engine on an in-memory database with in-process collaborators
//! the tests can steer: a scripted probe, a recording audit sink, a broadcast
//! notifier and a mutable control panel.

#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use linepool_line_engine::config::SegmentPolicyConfig;
use linepool_line_engine::integration::{
    BroadcastNotifier, MemoryAuditSink, NotificationTarget, StaticControlPanel, StaticProbe,
};
use linepool_line_engine::prelude::*;

pub struct Harness {
    pub engine: Arc<LineEngine>,
    pub probe: Arc<StaticProbe>,
    pub audit: Arc<MemoryAuditSink>,
    pub panel: Arc<StaticControlPanel>,
    notifications: Mutex<broadcast::Receiver<Notification>>,
}

/// Defaults tuned for tests: fast confirmation, no default segment
pub fn test_config() -> LineEngineConfig {
    let mut config = LineEngineConfig::default();
    config.health.confirm_delay_ms = 20;
    config
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: LineEngineConfig) -> Self {
        Self::with_probe(config, StaticProbe::new()).await
    }

    pub async fn with_probe(config: LineEngineConfig, probe: StaticProbe) -> Self {
        let probe = Arc::new(probe);
        let audit = Arc::new(MemoryAuditSink::new());
        let panel = Arc::new(StaticControlPanel::new(config.control_panel.clone()));
        let notifier = BroadcastNotifier::default();
        let receiver = notifier.subscribe();

        let collaborators = Collaborators {
            probe: probe.clone(),
            notifier: Arc::new(notifier),
            audit: audit.clone(),
            control_panel: panel.clone(),
        };

        let db = LineDatabase::new(&config.database).await.expect("in-memory database");
        let engine = Arc::new(LineEngine::with_database(config, db, collaborators));

        Self {
            engine,
            probe,
            audit,
            panel,
            notifications: Mutex::new(receiver),
        }
    }

    pub async fn line(&self, phone: &str) -> Line {
        self.provision(NewLine::new(phone, "evolution")).await
    }

    pub async fn scoped_line(&self, phone: &str, segment: i64) -> Line {
        self.provision(NewLine::new(phone, "evolution").with_segment(SegmentId(segment)))
            .await
    }

    pub async fn provision(&self, new_line: NewLine) -> Line {
        self.engine.lines().provision_line(new_line).await.expect("provision line")
    }

    pub async fn operator(&self, name: &str, segment: Option<i64>) -> Operator {
        self.engine
            .operators()
            .create_operator(NewOperator::new(name, segment.map(SegmentId)))
            .await
            .expect("create operator")
    }

    /// Create an operator and bring them online without allocating
    pub async fn online_operator(&self, name: &str, segment: Option<i64>) -> Operator {
        let operator = self.operator(name, segment).await;
        self.engine.operators().set_online(operator.id).await.expect("set online")
    }

    pub async fn assign(&self, line: &Line, operator: &Operator) -> Result<AssignOutcome> {
        self.engine.allocation().assign(line.id, operator.id).await
    }

    pub async fn bound(&self, line: &Line) -> Vec<OperatorId> {
        self.engine
            .lines()
            .bound_operators(line.id)
            .await
            .expect("bound operators")
            .into_iter()
            .map(|o| o.id)
            .collect()
    }

    pub async fn reload(&self, line: &Line) -> Line {
        self.engine.lines().fetch_line(line.id).await.expect("line exists")
    }

    pub async fn reload_operator(&self, operator: &Operator) -> Operator {
        self.engine.operators().fetch(operator.id).await.expect("operator exists")
    }

    pub fn set_segment_policy(&self, segment: i64, policy: SegmentPolicyConfig) {
        self.panel.set_segment_policy(SegmentId(segment), policy);
    }

    /// Every notification pushed since the last call
    pub fn notifications(&self) -> Vec<Notification> {
        let mut receiver = self.notifications.lock();
        let mut out = Vec::new();
        while let Ok(notification) = receiver.try_recv() {
            out.push(notification);
        }
        out
    }

    /// No line holds more than its capacity or mixes segments
    pub async fn assert_invariants(&self) {
        let violations = self.engine.allocation().audit_invariants().await.expect("audit");
        assert!(violations.is_empty(), "invariant violations: {:?}", violations);
    }
}

pub fn has_notification(notifications: &[Notification], operator: OperatorId, event: NotificationEvent) -> bool {
    notifications
        .iter()
        .any(|n| n.event == event && n.target == NotificationTarget::Operator(operator))
}
