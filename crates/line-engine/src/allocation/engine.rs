//! Allocation engine

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use sqlx::SqliteConnection;
use tracing::{debug, info, warn};

use super::rules::{self, SegmentCheck};
use crate::config::LineEngineConfig;
use crate::database::{bindings, lines, operators, queue as queue_db, LineDatabase};
use crate::error::{LineEngineError, Result};
use crate::integration::audit::event_types;
use crate::integration::probe::probe_or_unknown;
use crate::integration::{
    AuditEvent, AuditSeverity, Collaborators, LineAssigner, Notification, NotificationEvent, QueueGate,
};
use crate::line::{Line, LineScope};
use crate::operator::Operator;
use crate::queue::QueueAdmission;
use crate::types::{LineId, OperatorId, SegmentId};

const MODULE: &str = "allocation";

/// Result of [`AllocationEngine::assign`]
#[derive(Debug, Clone, PartialEq)]
pub enum AssignOutcome {
    /// A new binding was created
    Assigned(Line),
    /// The operator was already bound to this line; nothing changed
    AlreadyAssigned(Line),
}

impl AssignOutcome {
    pub fn line(&self) -> &Line {
        match self {
            AssignOutcome::Assigned(line) | AssignOutcome::AlreadyAssigned(line) => line,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, AssignOutcome::Assigned(_))
    }
}

/// Result of [`AllocationEngine::request_line`]
#[derive(Debug, Clone, PartialEq)]
pub enum RequestOutcome {
    /// The operator already holds an active line
    AlreadyAssigned(Line),
    /// A line was bound directly
    Assigned(Line),
    /// The operator waits in the queue
    Queued(QueueAdmission),
    /// Administrators are never auto-assigned
    NotEligible,
    /// Automatic allocation is switched off for the operator's segment
    AllocationDisabled,
}

impl RequestOutcome {
    pub fn line(&self) -> Option<&Line> {
        match self {
            RequestOutcome::AlreadyAssigned(line) | RequestOutcome::Assigned(line) => Some(line),
            _ => None,
        }
    }
}

/// Core exclusive-assignment engine
pub struct AllocationEngine {
    db: LineDatabase,
    default_segment: Option<SegmentId>,
    treat_unknown_as_connected: bool,
    max_assign_attempts: u32,
    collaborators: Collaborators,
    queue: Arc<dyn QueueGate>,
}

impl AllocationEngine {
    pub fn new(
        db: LineDatabase,
        config: &LineEngineConfig,
        collaborators: Collaborators,
        queue: Arc<dyn QueueGate>,
    ) -> Self {
        Self {
            db,
            default_segment: config.default_segment(),
            treat_unknown_as_connected: config.allocation.treat_unknown_as_connected,
            max_assign_attempts: config.allocation.max_assign_attempts,
            collaborators,
            queue,
        }
    }

    /// Give the operator a line, or queue them
    pub async fn request_line(&self, operator_id: OperatorId) -> Result<RequestOutcome> {
        let (operator, current) = {
            let mut conn = self.db.acquire().await?;
            let operator = operators::fetch_operator(&mut conn, operator_id).await?;
            let current = current_active_line(&mut conn, &operator).await?;
            (operator, current)
        };

        if operator.is_admin() {
            debug!("🚫 Operator {} is an administrator, not allocating", operator_id);
            return Ok(RequestOutcome::NotEligible);
        }

        if let Some(line) = current {
            debug!("📱 Operator {} already holds line {}", operator_id, line.id);
            return Ok(RequestOutcome::AlreadyAssigned(line));
        }

        let settings = self.collaborators.control_panel.segment_settings(operator.segment_id);
        if !settings.allocation_enabled {
            info!("⏸️ Allocation disabled for {:?}, operator {} not served", operator.segment_id, operator_id);
            return Ok(RequestOutcome::AllocationDisabled);
        }

        if self.queue.has_waiting(operator.segment_id, Some(operator_id)).await? {
            info!("📋 Others are already waiting, queueing operator {}", operator_id);
            let admission = self.queue.enqueue(operator_id, operator.segment_id, 0).await?;
            return Ok(RequestOutcome::Queued(admission));
        }

        let mut exclude = HashSet::new();
        for attempt in 1..=self.max_assign_attempts {
            let Some(line) = self
                .find_available_line(operator_id, operator.segment_id, &exclude)
                .await?
            else {
                break;
            };

            match self.assign(line.id, operator_id).await {
                Ok(AssignOutcome::Assigned(line)) => return Ok(RequestOutcome::Assigned(line)),
                Ok(AssignOutcome::AlreadyAssigned(line)) => return Ok(RequestOutcome::AlreadyAssigned(line)),
                Err(
                    e @ (LineEngineError::CapacityExceeded { .. }
                    | LineEngineError::SegmentMismatch { .. }
                    | LineEngineError::LineNotActive(_)
                    | LineEngineError::ProviderDisabled { .. }),
                ) => {
                    warn!(
                        "⚠️ Lost line {} for operator {} (attempt {}): {}",
                        line.id, operator_id, attempt, e
                    );
                    exclude.insert(line.id);
                }
                Err(e) => return Err(e),
            }
        }

        info!("📋 No line available for operator {}, queueing", operator_id);
        let admission = self.queue.enqueue(operator_id, operator.segment_id, 0).await?;
        Ok(RequestOutcome::Queued(admission))
    }

    /// Best reachable line for the operator, skipping `exclude`
    pub async fn find_available_line(
        &self,
        operator_id: OperatorId,
        segment: Option<SegmentId>,
        exclude: &HashSet<LineId>,
    ) -> Result<Option<Line>> {
        let panel = &self.collaborators.control_panel;
        let shared = panel.shared_line_mode();
        let settings = panel.segment_settings(segment);

        let (occupancy, bound_segments) = {
            let mut conn = self.db.acquire().await?;
            let occupancy = lines::list_active_occupancy(&mut conn).await?;
            let bound_segments = bindings::list_bound_segments(&mut conn).await?;
            (occupancy, bound_segments)
        };

        let mut segments_by_line: HashMap<LineId, Vec<Option<SegmentId>>> = HashMap::new();
        for (line_id, operator_segment) in bound_segments {
            segments_by_line.entry(line_id).or_default().push(operator_segment);
        }

        let mut candidates: Vec<(rules::CandidateTier, usize, Line)> = occupancy
            .into_iter()
            .filter(|occ| !exclude.contains(&occ.line.id))
            .filter_map(|occ| {
                let scope = occ.line.scope(self.default_segment);
                let bound = occ.bound();
                let tier = rules::candidate_tier(scope, segment, self.default_segment, bound)?;

                if !settings.provider_enabled(&occ.line.provider_ref) {
                    return None;
                }

                let capacity = rules::line_capacity(occ.line.is_reserve, settings.max_operators_per_line, shared);
                if !rules::has_spare_capacity(bound, capacity) {
                    return None;
                }

                let existing = segments_by_line.get(&occ.line.id).map(Vec::as_slice).unwrap_or(&[]);
                match rules::check_segment(scope, segment, existing, self.default_segment) {
                    SegmentCheck::Compatible { .. } => Some((tier, bound, occ.line)),
                    SegmentCheck::Mismatch => None,
                }
            })
            .collect();

        candidates.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)).then(a.2.id.cmp(&b.2.id)));

        for (tier, bound, line) in candidates {
            let report = probe_or_unknown(self.collaborators.probe.as_ref(), &line.instance_name).await;
            if report.is_allocatable(self.treat_unknown_as_connected) {
                debug!(
                    "🔍 Line {} ({:?}, {} bound) selected for operator {}",
                    line.id, tier, bound, operator_id
                );
                return Ok(Some(line));
            }
            debug!("🔍 Skipping line {}: provider reports {:?}", line.id, report.state);
        }

        Ok(None)
    }

    /// Bind an operator to a line.
    ///
    /// Binding an operator already on the line is a no-op that returns
    /// [`AssignOutcome::AlreadyAssigned`] and emits nothing.
    pub async fn assign(&self, line_id: LineId, operator_id: OperatorId) -> Result<AssignOutcome> {
        let outcome = self
            .db
            .with_timeout("assign", self.assign_in_transaction(line_id, operator_id))
            .await?;

        if let AssignOutcome::Assigned(line) = &outcome {
            info!("✅ Operator {} assigned to line {} ({})", operator_id, line.id, line.phone);
            self.collaborators.audit.emit(AuditEvent::new(
                event_types::LINE_ASSIGNED,
                MODULE,
                json!({
                    "line_id": line.id,
                    "operator_id": operator_id,
                    "segment_id": line.segment_id,
                }),
            ));
            self.collaborators.notifier.notify(Notification::to_operator(
                operator_id,
                NotificationEvent::LineAssigned,
                json!({ "line_id": line.id, "phone": line.phone }),
            ));
        }

        Ok(outcome)
    }

    async fn assign_in_transaction(&self, line_id: LineId, operator_id: OperatorId) -> Result<AssignOutcome> {
        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        if !lines::lock_line(&mut tx, line_id, now).await? {
            return Err(LineEngineError::not_found(format!("line {}", line_id)));
        }
        let line = lines::fetch_line(&mut tx, line_id).await?;
        let operator = operators::fetch_operator(&mut tx, operator_id).await?;

        if bindings::is_bound(&mut tx, line_id, operator_id).await? {
            tx.rollback().await?;
            return Ok(AssignOutcome::AlreadyAssigned(line));
        }

        if !line.is_active() {
            return Err(LineEngineError::LineNotActive(line_id));
        }

        let scope = line.scope(self.default_segment);
        let policy_segment = match scope {
            LineScope::Scoped(segment) => Some(segment),
            LineScope::Unscoped | LineScope::Default => operator.segment_id,
        };
        let panel = &self.collaborators.control_panel;
        let settings = panel.segment_settings(policy_segment);

        if !settings.provider_enabled(&line.provider_ref) {
            return Err(LineEngineError::ProviderDisabled {
                provider: line.provider_ref.clone(),
                segment: policy_segment,
            });
        }

        let bound = bindings::bound_operators(&mut tx, line_id).await?;
        let bound_segments: Vec<Option<SegmentId>> = bound.iter().map(|o| o.segment_id).collect();

        let promote_to = match rules::check_segment(scope, operator.segment_id, &bound_segments, self.default_segment) {
            SegmentCheck::Compatible { promote_to } => promote_to,
            SegmentCheck::Mismatch => {
                return Err(LineEngineError::SegmentMismatch {
                    line_id,
                    line_segment: line.segment_id,
                    operator_id,
                    operator_segment: operator.segment_id,
                })
            }
        };

        let capacity = rules::line_capacity(line.is_reserve, settings.max_operators_per_line, panel.shared_line_mode());
        if !rules::has_spare_capacity(bound.len(), capacity) {
            return Err(LineEngineError::CapacityExceeded {
                line_id,
                capacity: capacity.unwrap_or(usize::MAX),
            });
        }

        bindings::insert_binding(&mut tx, line_id, operator_id, now).await?;

        if scope.is_pool() {
            if let Some(segment) = promote_to {
                info!("🔒 Line {} promoted to {}", line_id, segment);
                lines::promote_segment(&mut tx, line_id, segment, now).await?;
            }
        }

        operators::set_current_line(&mut tx, operator_id, Some(line_id), now).await?;
        if line.primary_operator_id.is_none() {
            lines::set_primary_operator(&mut tx, line_id, Some(operator_id), now).await?;
        }
        queue_db::mark_assigned(&mut tx, operator_id, line_id, now).await?;

        let updated = lines::fetch_line(&mut tx, line_id).await?;
        verify_line(&mut tx, &updated, capacity, self.default_segment).await?;

        tx.commit().await?;
        Ok(AssignOutcome::Assigned(updated))
    }

    /// Remove one binding and repair the denormalized pointers
    pub async fn unbind(&self, line_id: LineId, operator_id: OperatorId) -> Result<bool> {
        self.unbind_as(line_id, operator_id, None).await
    }

    /// Admin entry point for unbinding; refused in shared-line mode
    pub async fn manual_unbind(&self, line_id: LineId, operator_id: OperatorId, actor: &str) -> Result<bool> {
        if self.collaborators.control_panel.shared_line_mode() {
            return Err(LineEngineError::NotPermitted(
                "manual unbind is disabled while shared line mode is active".to_string(),
            ));
        }
        self.unbind_as(line_id, operator_id, Some(actor)).await
    }

    async fn unbind_as(&self, line_id: LineId, operator_id: OperatorId, actor: Option<&str>) -> Result<bool> {
        let removed = self
            .db
            .with_timeout("unbind", self.unbind_in_transaction(line_id, operator_id))
            .await?;

        if removed {
            info!("🔓 Operator {} unbound from line {}", operator_id, line_id);
            self.collaborators.audit.emit(
                AuditEvent::new(
                    event_types::LINE_UNBOUND,
                    MODULE,
                    json!({ "line_id": line_id, "operator_id": operator_id }),
                )
                .with_actor(actor),
            );
        }
        Ok(removed)
    }

    async fn unbind_in_transaction(&self, line_id: LineId, operator_id: OperatorId) -> Result<bool> {
        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        if !lines::lock_line(&mut tx, line_id, now).await? {
            return Err(LineEngineError::not_found(format!("line {}", line_id)));
        }
        if !bindings::delete_binding(&mut tx, line_id, operator_id).await? {
            tx.rollback().await?;
            return Ok(false);
        }

        operators::repair_current_line(&mut tx, operator_id, now).await?;

        let line = lines::fetch_line(&mut tx, line_id).await?;
        if line.primary_operator_id == Some(operator_id) {
            let next = bindings::bound_operators(&mut tx, line_id).await?.first().map(|o| o.id);
            lines::set_primary_operator(&mut tx, line_id, next, now).await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    /// Scan every line for capacity or segment violations.
    ///
    /// Returns one description per violating line; an empty vector means the
    /// store is consistent.
    pub async fn audit_invariants(&self) -> Result<Vec<String>> {
        let mut conn = self.db.acquire().await?;
        let all_lines = lines::list_lines(&mut conn).await?;
        let panel = &self.collaborators.control_panel;
        let mut violations = Vec::new();

        for line in all_lines {
            let bound = bindings::bound_operators(&mut conn, line.id).await?;
            let segments: Vec<Option<SegmentId>> = bound.iter().map(|o| o.segment_id).collect();
            let scope = line.scope(self.default_segment);
            let policy_segment = match scope {
                LineScope::Scoped(segment) => Some(segment),
                _ => bound.first().and_then(|o| o.segment_id),
            };
            let capacity = rules::line_capacity(
                line.is_reserve,
                panel.segment_settings(policy_segment).max_operators_per_line,
                panel.shared_line_mode(),
            );
            if let Err(violation) = rules::check_line_invariants(scope, &segments, capacity) {
                violations.push(format!("line {}: {}", line.id, violation));
            }
        }

        Ok(violations)
    }

    /// Emit a critical audit event for each violation found by [`Self::audit_invariants`]
    pub async fn report_invariant_violations(&self) -> Result<usize> {
        let violations = self.audit_invariants().await?;
        for violation in &violations {
            warn!("🚨 Invariant violation: {}", violation);
            self.collaborators.audit.emit(
                AuditEvent::new("invariant.violation", MODULE, json!({ "detail": violation }))
                    .with_severity(AuditSeverity::Critical),
            );
        }
        Ok(violations.len())
    }
}

/// The operator's current active line: `current_line_id` if it is still
/// bound and active, else the oldest active binding
pub(crate) async fn current_active_line(conn: &mut SqliteConnection, operator: &Operator) -> Result<Option<Line>> {
    let bound = bindings::lines_for_operator(conn, operator.id).await?;
    let active: Vec<Line> = bound.into_iter().filter(Line::is_active).collect();
    let preferred = operator
        .current_line_id
        .and_then(|current| active.iter().position(|l| l.id == current))
        .unwrap_or(0);
    Ok(active.into_iter().nth(preferred))
}

/// Re-read the line's bindings inside the transaction and reject the write
/// if either hard invariant broke
async fn verify_line(
    conn: &mut SqliteConnection,
    line: &Line,
    capacity: Option<usize>,
    default_segment: Option<SegmentId>,
) -> Result<()> {
    let bound = bindings::bound_operators(conn, line.id).await?;
    let segments: Vec<Option<SegmentId>> = bound.iter().map(|o| o.segment_id).collect();
    rules::check_line_invariants(line.scope(default_segment), &segments, capacity).map_err(|violation| {
        LineEngineError::InvariantViolation(format!("line {}: {}", line.id, violation))
    })
}

#[async_trait]
impl LineAssigner for AllocationEngine {
    async fn find_available_line(
        &self,
        operator_id: OperatorId,
        segment: Option<SegmentId>,
        exclude: &HashSet<LineId>,
    ) -> Result<Option<Line>> {
        AllocationEngine::find_available_line(self, operator_id, segment, exclude).await
    }

    async fn assign(&self, line_id: LineId, operator_id: OperatorId) -> Result<AssignOutcome> {
        AllocationEngine::assign(self, line_id, operator_id).await
    }

    async fn unbind(&self, line_id: LineId, operator_id: OperatorId) -> Result<bool> {
        AllocationEngine::unbind(self, line_id, operator_id).await
    }
}
