use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{QueueAdmission, QueueEntry};
use crate::allocation::{rules, AssignOutcome, SegmentCheck};
use crate::config::{LineEngineConfig, QueueConfig};
use crate::database::queue::SegmentDepth;
use crate::database::{bindings, lines, operators, queue as queue_db, LineDatabase};
use crate::error::{LineEngineError, Result};
use crate::integration::audit::event_types;
use crate::integration::{
    AuditEvent, Collaborators, LineAssigner, Notification, NotificationEvent, QueueGate, SegmentSettings,
};
use crate::line::{Line, LineScope};
use crate::scheduler::SingleFlight;
use crate::types::{LineId, OperatorId, SegmentId};

const MODULE: &str = "queue";

/// Persisted operator waiting queue
pub struct WaitingQueue {
    db: LineDatabase,
    config: QueueConfig,
    instance_name: String,
    default_segment: Option<SegmentId>,
    collaborators: Collaborators,
    drain: SingleFlight,
}

/// What one `process_queue` pass did
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueueDrainReport {
    /// Another drain was in flight; nothing was done
    pub skipped: bool,
    /// Entries that passed their TTL this pass
    pub expired: usize,
    /// `(operator, line)` pairs served, in service order
    pub assigned: Vec<(OperatorId, LineId)>,
    /// Claimed entries whose assignment failed
    pub failed: usize,
    /// Entries skipped because allocation is disabled for their segment
    pub disabled: usize,
}

impl QueueDrainReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

/// Queue statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueStats {
    pub total_waiting: usize,
    pub waiting_by_segment: Vec<(Option<SegmentId>, usize)>,
    pub longest_wait_seconds: Option<i64>,
}

/// An active line that still has room for somebody
struct EligibleLine {
    line: Line,
    bound_segments: Vec<Option<SegmentId>>,
}

impl WaitingQueue {
    pub fn new(db: LineDatabase, config: &LineEngineConfig, collaborators: Collaborators) -> Self {
        Self {
            db,
            config: config.queue.clone(),
            instance_name: config.general.instance_name.clone(),
            default_segment: config.default_segment(),
            collaborators,
            drain: SingleFlight::new(),
        }
    }

    /// Put an operator in the queue.
    ///
    /// Administrators are rejected and an operator who is already waiting
    /// keeps their existing entry.
    pub async fn add_to_queue(
        &self,
        operator_id: OperatorId,
        segment_id: Option<SegmentId>,
        priority: i64,
    ) -> Result<QueueAdmission> {
        let admission = self
            .db
            .with_timeout("add_to_queue", self.add_in_transaction(operator_id, segment_id, priority))
            .await?;

        match &admission {
            QueueAdmission::Enqueued { entry_id, position } => {
                info!(
                    "📞 Operator {} queued (entry {}, segment {:?}, priority {}, position {})",
                    operator_id, entry_id, segment_id, priority, position
                );
                self.collaborators.notifier.notify(Notification::to_operator(
                    operator_id,
                    NotificationEvent::QueueJoined,
                    json!({ "entry_id": entry_id, "position": position }),
                ));
            }
            QueueAdmission::AlreadyWaiting { entry_id, .. } => {
                debug!("📞 Operator {} already waiting in entry {}", operator_id, entry_id);
            }
            QueueAdmission::Rejected { reason } => {
                debug!("📞 Operator {} not queued: {}", operator_id, reason);
            }
        }

        Ok(admission)
    }

    async fn add_in_transaction(
        &self,
        operator_id: OperatorId,
        segment_id: Option<SegmentId>,
        priority: i64,
    ) -> Result<QueueAdmission> {
        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        // writes first so concurrent joins serialize here
        queue_db::expire_entries(&mut tx, now).await?;

        let operator = operators::fetch_operator(&mut tx, operator_id).await?;
        if operator.is_admin() {
            tx.rollback().await?;
            return Ok(QueueAdmission::Rejected {
                reason: "administrators are never queued".to_string(),
            });
        }

        if let Some(existing) = queue_db::get_waiting_for_operator(&mut tx, operator_id).await? {
            let position = queue_db::count_ahead(&mut tx, &existing, now).await?;
            tx.commit().await?;
            return Ok(QueueAdmission::AlreadyWaiting {
                entry_id: existing.id,
                position,
            });
        }

        let expires_at = now + self.config.entry_ttl();
        let entry = queue_db::insert_waiting(&mut tx, operator_id, segment_id, priority, now, expires_at).await?;
        let position = queue_db::count_ahead(&mut tx, &entry, now).await?;
        tx.commit().await?;

        Ok(QueueAdmission::Enqueued {
            entry_id: entry.id,
            position,
        })
    }

    /// One drain pass: expire, then serve waiting entries while lines have room.
    ///
    /// Returns a skipped report when another pass is still running.
    pub async fn process_queue(&self, assigner: &dyn LineAssigner) -> Result<QueueDrainReport> {
        let Some(_guard) = self.drain.try_enter() else {
            debug!("⏭️ Queue drain already in flight, skipping");
            return Ok(QueueDrainReport::skipped());
        };

        let mut report = QueueDrainReport::default();
        let now = Utc::now();

        let expired = {
            let mut conn = self.db.acquire().await?;
            queue_db::expire_entries(&mut conn, now).await?
        };
        if !expired.is_empty() {
            warn!("⏰ {} queue entries expired", expired.len());
            self.collaborators.audit.emit(AuditEvent::new(
                event_types::QUEUE_EXPIRED,
                MODULE,
                json!({ "operator_ids": expired }),
            ));
        }
        report.expired = expired.len();

        let (waiting, mut eligible) = {
            let mut conn = self.db.acquire().await?;
            let waiting = queue_db::list_waiting(&mut conn, now).await?;
            if waiting.is_empty() {
                return Ok(report);
            }
            let eligible = self.eligible_lines(&mut conn).await?;
            (waiting, eligible)
        };

        debug!("🔄 Draining queue: {} waiting, {} eligible lines", waiting.len(), eligible.len());

        for entry in waiting {
            if eligible.is_empty() {
                break;
            }

            let settings = self.collaborators.control_panel.segment_settings(entry.segment_id);
            if !settings.allocation_enabled {
                report.disabled += 1;
                continue;
            }

            let Some(index) = self.pick_line(&entry, &eligible) else {
                continue;
            };
            let line_id = eligible[index].line.id;

            let token = format!("{}:{}", self.instance_name, Uuid::new_v4());
            let claimed = {
                let mut conn = self.db.acquire().await?;
                let now = Utc::now();
                queue_db::claim_entry(&mut conn, entry.id, &token, now, now + self.config.claim_lease()).await?
            };
            if !claimed {
                debug!("🔒 Entry {} claimed elsewhere, skipping", entry.id);
                continue;
            }

            match assigner.assign(line_id, entry.operator_id).await {
                Ok(outcome) => {
                    if let AssignOutcome::AlreadyAssigned(_) = outcome {
                        let mut conn = self.db.acquire().await?;
                        queue_db::mark_assigned(&mut conn, entry.operator_id, line_id, Utc::now()).await?;
                    }
                    info!("📤 Queue entry {} served: operator {} → line {}", entry.id, entry.operator_id, line_id);
                    report.assigned.push((entry.operator_id, line_id));
                    self.record_bind(&mut eligible, index, &entry, &settings);
                }
                Err(e) => {
                    warn!(
                        "⚠️ Queue assignment of operator {} to line {} failed: {}",
                        entry.operator_id, line_id, e
                    );
                    report.failed += 1;
                    self.release(entry.id, &token).await;
                    if matches!(
                        e,
                        LineEngineError::CapacityExceeded { .. }
                            | LineEngineError::LineNotActive(_)
                            | LineEngineError::ProviderDisabled { .. }
                            | LineEngineError::NotFound(_)
                    ) {
                        eligible.remove(index);
                    }
                }
            }
        }

        if !report.assigned.is_empty() {
            info!("✅ Queue drain assigned {} operators", report.assigned.len());
        }
        Ok(report)
    }

    /// Active, provider-enabled lines with spare capacity, least-bound first
    async fn eligible_lines(&self, conn: &mut sqlx::SqliteConnection) -> Result<Vec<EligibleLine>> {
        let occupancy = lines::list_active_occupancy(&mut *conn).await?;
        let bound = bindings::list_bound_segments(&mut *conn).await?;
        let panel = &self.collaborators.control_panel;
        let shared = panel.shared_line_mode();

        Ok(occupancy
            .into_iter()
            .filter_map(|occ| {
                let settings = panel.segment_settings(occ.line.segment_id);
                if !settings.provider_enabled(&occ.line.provider_ref) {
                    return None;
                }
                let capacity = rules::line_capacity(occ.line.is_reserve, settings.max_operators_per_line, shared);
                if !rules::has_spare_capacity(occ.bound(), capacity) {
                    return None;
                }
                let bound_segments = bound
                    .iter()
                    .filter(|(line_id, _)| *line_id == occ.line.id)
                    .map(|(_, segment)| *segment)
                    .collect();
                Some(EligibleLine {
                    line: occ.line,
                    bound_segments,
                })
            })
            .collect())
    }

    /// Segment match first, else a pool line
    fn pick_line(&self, entry: &QueueEntry, eligible: &[EligibleLine]) -> Option<usize> {
        let entry_segment = rules::normalize_segment(entry.segment_id, self.default_segment);
        let panel = &self.collaborators.control_panel;
        let shared = panel.shared_line_mode();

        let fits = |candidate: &EligibleLine| -> bool {
            let scope = candidate.line.scope(self.default_segment);
            let policy_segment = match scope {
                LineScope::Scoped(segment) => Some(segment),
                _ => entry.segment_id,
            };
            let settings = panel.segment_settings(policy_segment);
            let capacity = rules::line_capacity(candidate.line.is_reserve, settings.max_operators_per_line, shared);
            settings.provider_enabled(&candidate.line.provider_ref)
                && rules::has_spare_capacity(candidate.bound_segments.len(), capacity)
                && matches!(
                    rules::check_segment(scope, entry.segment_id, &candidate.bound_segments, self.default_segment),
                    SegmentCheck::Compatible { .. }
                )
        };

        let same_segment = entry_segment.and_then(|segment| {
            eligible.iter().position(|candidate| {
                candidate.line.scope(self.default_segment) == LineScope::Scoped(segment) && fits(candidate)
            })
        });

        same_segment.or_else(|| {
            eligible
                .iter()
                .position(|candidate| candidate.line.scope(self.default_segment).is_pool() && fits(candidate))
        })
    }

    /// Reflect a successful bind in the in-memory eligible set
    fn record_bind(
        &self,
        eligible: &mut Vec<EligibleLine>,
        index: usize,
        entry: &QueueEntry,
        settings: &SegmentSettings,
    ) {
        let shared = self.collaborators.control_panel.shared_line_mode();
        let candidate = &mut eligible[index];
        candidate.bound_segments.push(entry.segment_id);

        if candidate.line.scope(self.default_segment).is_pool() {
            if let Some(segment) = rules::normalize_segment(entry.segment_id, self.default_segment) {
                candidate.line.segment_id = Some(segment);
            }
        }

        let capacity = rules::line_capacity(candidate.line.is_reserve, settings.max_operators_per_line, shared);
        if !rules::has_spare_capacity(candidate.bound_segments.len(), capacity) {
            eligible.remove(index);
        }
    }

    async fn release(&self, entry_id: i64, token: &str) {
        let released = async {
            let mut conn = self.db.acquire().await?;
            queue_db::release_claim(&mut conn, entry_id, token).await
        }
        .await;
        if let Err(e) = released {
            // the lease runs out on its own
            warn!("⚠️ Could not release claim on entry {}: {}", entry_id, e);
        }
    }

    /// Entries strictly ahead of the operator, or `None` when not waiting
    pub async fn get_position(&self, operator_id: OperatorId) -> Result<Option<usize>> {
        let now = Utc::now();
        let mut conn = self.db.acquire().await?;
        match queue_db::get_waiting_for_operator(&mut conn, operator_id).await? {
            Some(entry) if entry.expires_at > now => Ok(Some(queue_db::count_ahead(&mut conn, &entry, now).await?)),
            _ => Ok(None),
        }
    }

    /// Withdraw the operator's waiting entry
    pub async fn remove(&self, operator_id: OperatorId) -> Result<bool> {
        let mut conn = self.db.acquire().await?;
        let removed = queue_db::withdraw(&mut conn, operator_id, Utc::now()).await?;
        if removed {
            info!("📤 Operator {} left the queue", operator_id);
        }
        Ok(removed)
    }

    pub async fn has_waiting(&self, segment: Option<SegmentId>, excluding: Option<OperatorId>) -> Result<bool> {
        let mut conn = self.db.acquire().await?;
        queue_db::has_waiting(&mut conn, segment, excluding, Utc::now()).await
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        let now = Utc::now();
        let mut conn = self.db.acquire().await?;
        let depths: Vec<SegmentDepth> = queue_db::waiting_by_segment(&mut conn, now).await?;
        let oldest = queue_db::oldest_waiting(&mut conn, now).await?;

        let waiting_by_segment: Vec<(Option<SegmentId>, usize)> = depths
            .into_iter()
            .map(|d| (d.segment_id, d.waiting.max(0) as usize))
            .collect();

        Ok(QueueStats {
            total_waiting: waiting_by_segment.iter().map(|(_, n)| n).sum(),
            waiting_by_segment,
            longest_wait_seconds: oldest.map(|created| (now - created).num_seconds()),
        })
    }
}

#[async_trait]
impl QueueGate for WaitingQueue {
    async fn has_waiting(&self, segment: Option<SegmentId>, excluding: Option<OperatorId>) -> Result<bool> {
        WaitingQueue::has_waiting(self, segment, excluding).await
    }

    async fn enqueue(
        &self,
        operator_id: OperatorId,
        segment: Option<SegmentId>,
        priority: i64,
    ) -> Result<QueueAdmission> {
        self.add_to_queue(operator_id, segment, priority).await
    }
}
