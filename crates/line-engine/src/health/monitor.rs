//! Health monitor

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashSet;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error, info, warn};

use super::reallocation::{ReallocationCoordinator, ReallocationReport};
use crate::config::LineEngineConfig;
use crate::database::{bindings, lines, operators, LineDatabase};
use crate::error::Result;
use crate::integration::audit::event_types;
use crate::integration::probe::probe_or_unknown;
use crate::integration::{AuditEvent, Collaborators, FailureSignal, LineAssigner};
use crate::line::{Line, LineStatus};
use crate::routing::ContactBindingTable;
use crate::scheduler::SingleFlight;
use crate::types::{LineId, OperatorId};

const MODULE: &str = "health";

/// Outcome of the double-check on one suspicious line
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "result")]
pub enum Confirmation {
    /// The second probe agreed; the line was taken down
    Confirmed {
        signal: FailureSignal,
        report: ReallocationReport,
    },
    /// The second probe came back healthy
    FalsePositive,
    /// Another check on this line is already waiting for its second probe
    AlreadyPending,
    /// The line is not active, so there is nothing to confirm
    NotActive,
}

/// What one health sweep did
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SweepReport {
    pub skipped: bool,
    pub checked: usize,
    pub suspected: usize,
    pub confirmed: Vec<(LineId, FailureSignal)>,
    pub false_positives: usize,
    /// Disconnected lines that came back
    pub restored: Vec<LineId>,
}

impl SweepReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

/// What one idle reclamation pass did
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IdleReport {
    pub skipped: bool,
    pub released: Vec<(OperatorId, LineId)>,
    pub purged_contacts: u64,
}

/// Removes a line from the pending set when the check finishes
struct PendingCheck {
    pending: Arc<DashSet<LineId>>,
    line_id: LineId,
}

impl Drop for PendingCheck {
    fn drop(&mut self) {
        self.pending.remove(&self.line_id);
    }
}

/// Periodic provider probing with debounced failure handling
pub struct HealthMonitor {
    db: LineDatabase,
    collaborators: Collaborators,
    coordinator: Arc<ReallocationCoordinator>,
    assigner: Arc<dyn LineAssigner>,
    contacts: ContactBindingTable,
    confirm_delay: Duration,
    idle_threshold: chrono::Duration,
    pending: Arc<DashSet<LineId>>,
    full_flight: SingleFlight,
    targeted_flight: SingleFlight,
    idle_flight: SingleFlight,
}

impl HealthMonitor {
    pub fn new(
        db: LineDatabase,
        config: &LineEngineConfig,
        collaborators: Collaborators,
        coordinator: Arc<ReallocationCoordinator>,
        assigner: Arc<dyn LineAssigner>,
        contacts: ContactBindingTable,
    ) -> Self {
        Self {
            db,
            collaborators,
            coordinator,
            assigner,
            contacts,
            confirm_delay: config.health.confirm_delay(),
            idle_threshold: config.health.idle_threshold(),
            pending: Arc::new(DashSet::new()),
            full_flight: SingleFlight::new(),
            targeted_flight: SingleFlight::new(),
            idle_flight: SingleFlight::new(),
        }
    }

    /// Probe every line that is not banned.
    ///
    /// Active lines that look broken go through confirmation; disconnected
    /// lines that probe connected again are restored.
    pub async fn full_sweep(&self) -> Result<SweepReport> {
        let Some(_guard) = self.full_flight.try_enter() else {
            debug!("⏭️ Full health sweep already running, skipping");
            return Ok(SweepReport::skipped());
        };

        let candidates = {
            let mut conn = self.db.acquire().await?;
            lines::list_unbanned_lines(&mut conn).await?
        };
        info!("🩺 Full health sweep over {} lines", candidates.len());

        let report = self.sweep(candidates).await;
        info!(
            "🩺 Full sweep done: {} checked, {} suspected, {} confirmed, {} restored",
            report.checked,
            report.suspected,
            report.confirmed.len(),
            report.restored.len()
        );
        Ok(report)
    }

    /// Probe the active lines currently held by online operators
    pub async fn targeted_sweep(&self) -> Result<SweepReport> {
        let Some(_guard) = self.targeted_flight.try_enter() else {
            debug!("⏭️ Targeted health sweep already running, skipping");
            return Ok(SweepReport::skipped());
        };

        let candidates = {
            let mut conn = self.db.acquire().await?;
            let mut by_id = BTreeMap::new();
            for operator in operators::list_online(&mut conn).await? {
                for line in bindings::lines_for_operator(&mut conn, operator.id).await? {
                    if line.is_active() {
                        by_id.insert(line.id, line);
                    }
                }
            }
            by_id.into_values().collect::<Vec<_>>()
        };
        debug!("🩺 Targeted sweep over {} lines", candidates.len());

        Ok(self.sweep(candidates).await)
    }

    async fn sweep(&self, candidates: Vec<Line>) -> SweepReport {
        let mut report = SweepReport::default();

        for line in candidates {
            report.checked += 1;
            let probe = probe_or_unknown(self.collaborators.probe.as_ref(), &line.instance_name).await;

            if line.status == LineStatus::Disconnected {
                if probe.is_connected() {
                    match self.restore(&line).await {
                        Ok(true) => report.restored.push(line.id),
                        Ok(false) => {}
                        Err(e) => error!("❌ Failed to restore line {}: {}", line.id, e),
                    }
                }
                continue;
            }

            let Some(signal) = probe.signal else {
                continue;
            };
            report.suspected += 1;
            debug!("🤔 Line {} looks {:?}, confirming", line.id, signal);

            match self.confirm_and_act(&line).await {
                Ok(Confirmation::Confirmed { signal, .. }) => report.confirmed.push((line.id, signal)),
                Ok(Confirmation::FalsePositive) => report.false_positives += 1,
                Ok(_) => {}
                Err(e) => error!("❌ Failed to handle suspected failure on line {}: {}", line.id, e),
            }
        }

        report
    }

    /// Bring a disconnected line back to `active`
    async fn restore(&self, line: &Line) -> Result<bool> {
        let mut conn = self.db.acquire().await?;
        let current = lines::fetch_line(&mut conn, line.id).await?;
        if current.status != LineStatus::Disconnected {
            return Ok(false);
        }
        lines::set_status(&mut conn, line.id, LineStatus::Active, Utc::now()).await?;

        info!("💚 Line {} reconnected, back to active", line.id);
        self.collaborators.audit.emit(AuditEvent::new(
            event_types::LINE_RESTORED,
            MODULE,
            json!({ "line_id": line.id }),
        ));
        Ok(true)
    }

    /// Wait, probe again, and act only if the second probe also reports a
    /// failure. The second probe's signal picks ban vs disconnect.
    pub async fn confirm_and_act(&self, line: &Line) -> Result<Confirmation> {
        if !self.pending.insert(line.id) {
            debug!("⏳ Line {} already awaiting confirmation", line.id);
            return Ok(Confirmation::AlreadyPending);
        }
        let _pending = PendingCheck {
            pending: Arc::clone(&self.pending),
            line_id: line.id,
        };

        tokio::time::sleep(self.confirm_delay).await;

        let second = probe_or_unknown(self.collaborators.probe.as_ref(), &line.instance_name).await;
        let Some(signal) = second.signal else {
            warn!("🙈 Line {} recovered before confirmation, ignoring ({:?})", line.id, second.state);
            return Ok(Confirmation::FalsePositive);
        };

        let report = self.coordinator.handle_failure(line.id, signal, None).await?;
        Ok(Confirmation::Confirmed { signal, report })
    }

    /// A send through the line failed; double-check before acting
    pub async fn report_send_failure(&self, line_id: LineId, signal: FailureSignal) -> Result<Confirmation> {
        let line = {
            let mut conn = self.db.acquire().await?;
            lines::fetch_line(&mut conn, line_id).await?
        };
        if !line.is_active() {
            return Ok(Confirmation::NotActive);
        }

        warn!("📮 Send failure on line {} ({:?}), confirming", line_id, signal);
        self.confirm_and_act(&line).await
    }

    /// Lines currently waiting for their confirming probe
    pub fn pending_confirmations(&self) -> Vec<LineId> {
        self.pending.iter().map(|id| *id).collect()
    }

    /// Release the bindings of operators offline longer than the idle
    /// threshold, then purge expired sticky contact bindings
    pub async fn idle_reclamation(&self) -> Result<IdleReport> {
        let Some(_guard) = self.idle_flight.try_enter() else {
            debug!("⏭️ Idle reclamation already running, skipping");
            return Ok(IdleReport {
                skipped: true,
                ..IdleReport::default()
            });
        };

        let mut report = IdleReport::default();
        let cutoff = Utc::now() - self.idle_threshold;

        let idle = {
            let mut conn = self.db.acquire().await?;
            let mut idle = Vec::new();
            for operator in operators::list_idle_bound(&mut conn, cutoff).await? {
                let held = bindings::lines_for_operator(&mut conn, operator.id).await?;
                idle.push((operator.id, held));
            }
            idle
        };

        for (operator_id, held) in idle {
            for line in held {
                match self.assigner.unbind(line.id, operator_id).await {
                    Ok(true) => {
                        info!("💤 Released line {} from idle operator {}", line.id, operator_id);
                        self.collaborators.audit.emit(AuditEvent::new(
                            event_types::OPERATOR_IDLE_RELEASED,
                            MODULE,
                            json!({ "operator_id": operator_id, "line_id": line.id }),
                        ));
                        report.released.push((operator_id, line.id));
                    }
                    Ok(false) => {}
                    Err(e) => error!("❌ Failed to release line {} from operator {}: {}", line.id, operator_id, e),
                }
            }
        }

        report.purged_contacts = self.contacts.purge_expired().await?;
        Ok(report)
    }
}
