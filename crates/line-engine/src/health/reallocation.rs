//! Line takedown and operator reallocation
//!
//! When a line is confirmed banned or disconnected, or an administrator bans
//! it by hand, the coordinator takes the line down in one transaction and
//! then tries to move each stranded operator onto another line.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::LineEngineConfig;
use crate::database::{bindings, conversations, lines, operators, LineDatabase};
use crate::error::{LineEngineError, Result};
use crate::integration::audit::event_types;
use crate::integration::{
    AuditEvent, AuditSeverity, Collaborators, FailureSignal, LineAssigner, Notification, NotificationEvent,
};
use crate::line::LineStatus;
use crate::types::{LineId, OperatorId};

const MODULE: &str = "health";

/// What happened to one operator stranded by a takedown
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "result")]
pub enum OperatorOutcome {
    /// Moved to `line_id`; open conversations followed
    Reallocated {
        operator_id: OperatorId,
        line_id: LineId,
        conversations_moved: u64,
    },
    /// No line was available; open conversations were closed
    Lost {
        operator_id: OperatorId,
        conversations_closed: u64,
    },
}

impl OperatorOutcome {
    pub fn operator_id(&self) -> OperatorId {
        match self {
            OperatorOutcome::Reallocated { operator_id, .. } | OperatorOutcome::Lost { operator_id, .. } => {
                *operator_id
            }
        }
    }
}

/// Result of [`ReallocationCoordinator::handle_failure`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReallocationReport {
    pub line_id: LineId,
    pub status: LineStatus,
    /// The line was already in (or past) the target state; nothing was done
    pub unchanged: bool,
    pub outcomes: Vec<OperatorOutcome>,
}

impl ReallocationReport {
    pub fn reallocated(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, OperatorOutcome::Reallocated { .. }))
            .count()
    }

    pub fn lost(&self) -> usize {
        self.outcomes.len() - self.reallocated()
    }
}

pub struct ReallocationCoordinator {
    db: LineDatabase,
    assigner: Arc<dyn LineAssigner>,
    collaborators: Collaborators,
    abandoned_tabulation: String,
    max_assign_attempts: u32,
}

impl ReallocationCoordinator {
    pub fn new(
        db: LineDatabase,
        config: &LineEngineConfig,
        collaborators: Collaborators,
        assigner: Arc<dyn LineAssigner>,
    ) -> Self {
        Self {
            db,
            assigner,
            collaborators,
            abandoned_tabulation: config.health.abandoned_tabulation.clone(),
            max_assign_attempts: config.allocation.max_assign_attempts,
        }
    }

    /// Manual ban: immediate, no confirmation probe
    pub async fn ban_line(&self, line_id: LineId, actor: &str) -> Result<ReallocationReport> {
        info!("🔨 Manual ban of line {} by {}", line_id, actor);
        self.handle_failure(line_id, FailureSignal::Banned, Some(actor)).await
    }

    /// Take the line down and reallocate everyone who was on it.
    ///
    /// `ban` is terminal and always wins; a line already banned, or already
    /// disconnected when the signal is a disconnect, is left alone.
    pub async fn handle_failure(
        &self,
        line_id: LineId,
        signal: FailureSignal,
        actor: Option<&str>,
    ) -> Result<ReallocationReport> {
        let target = match signal {
            FailureSignal::Banned => LineStatus::Ban,
            FailureSignal::Disconnected => LineStatus::Disconnected,
        };

        let Some(released) = self
            .db
            .with_timeout("take_line_down", self.take_down_in_transaction(line_id, target))
            .await?
        else {
            debug!("⏭️ Line {} already {:?}, nothing to do", line_id, target);
            return Ok(ReallocationReport {
                line_id,
                status: target,
                unchanged: true,
                outcomes: Vec::new(),
            });
        };

        let (event_type, severity) = match target {
            LineStatus::Ban => (event_types::LINE_BANNED, AuditSeverity::Critical),
            _ => (event_types::LINE_DISCONNECTED, AuditSeverity::Warning),
        };
        warn!("🚨 Line {} is now {:?}; {} operators released", line_id, target, released.len());
        self.collaborators.audit.emit(
            AuditEvent::new(
                event_type,
                MODULE,
                json!({ "line_id": line_id, "released_operators": released }),
            )
            .with_actor(actor)
            .with_severity(severity),
        );

        let mut outcomes = Vec::with_capacity(released.len());
        for operator_id in released {
            match self.reallocate_operator(operator_id, line_id).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    warn!("⚠️ Reallocation of operator {} off line {} failed: {}", operator_id, line_id, e);
                    outcomes.push(self.strand_operator(operator_id, line_id).await?);
                }
            }
        }

        Ok(ReallocationReport {
            line_id,
            status: target,
            unchanged: false,
            outcomes,
        })
    }

    /// Status change plus release of every binding; `None` when already down
    async fn take_down_in_transaction(&self, line_id: LineId, target: LineStatus) -> Result<Option<Vec<OperatorId>>> {
        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        if !lines::lock_line(&mut tx, line_id, now).await? {
            return Err(LineEngineError::not_found(format!("line {}", line_id)));
        }
        let line = lines::fetch_line(&mut tx, line_id).await?;
        if line.status == target || line.status == LineStatus::Ban {
            tx.rollback().await?;
            return Ok(None);
        }

        lines::set_status(&mut tx, line_id, target, now).await?;
        let released = bindings::delete_bindings_for_line(&mut tx, line_id).await?;
        lines::set_primary_operator(&mut tx, line_id, None, now).await?;
        for operator_id in &released {
            operators::repair_current_line(&mut tx, *operator_id, now).await?;
        }

        tx.commit().await?;
        Ok(Some(released))
    }

    async fn reallocate_operator(&self, operator_id: OperatorId, lost_line: LineId) -> Result<OperatorOutcome> {
        let operator = {
            let mut conn = self.db.acquire().await?;
            operators::fetch_operator(&mut conn, operator_id).await?
        };
        if operator.is_admin() {
            return self.strand_operator(operator_id, lost_line).await;
        }

        let mut exclude = HashSet::from([lost_line]);
        for _ in 0..self.max_assign_attempts {
            let Some(candidate) = self
                .assigner
                .find_available_line(operator_id, operator.segment_id, &exclude)
                .await?
            else {
                break;
            };

            match self.assigner.assign(candidate.id, operator_id).await {
                Ok(outcome) => {
                    let new_line = outcome.line().id;
                    let moved = {
                        let mut conn = self.db.acquire().await?;
                        conversations::repoint_open(&mut conn, operator_id, lost_line, new_line, Utc::now()).await?
                    };
                    info!(
                        "🔄 Operator {} reallocated from line {} to line {} ({} conversations moved)",
                        operator_id, lost_line, new_line, moved
                    );
                    self.collaborators.notifier.notify(Notification::to_operator(
                        operator_id,
                        NotificationEvent::LineReallocated,
                        json!({
                            "previous_line_id": lost_line,
                            "line_id": new_line,
                            "phone": outcome.line().phone,
                            "conversations_moved": moved,
                        }),
                    ));
                    return Ok(OperatorOutcome::Reallocated {
                        operator_id,
                        line_id: new_line,
                        conversations_moved: moved,
                    });
                }
                Err(
                    e @ (LineEngineError::CapacityExceeded { .. }
                    | LineEngineError::SegmentMismatch { .. }
                    | LineEngineError::LineNotActive(_)
                    | LineEngineError::ProviderDisabled { .. }),
                ) => {
                    debug!("🔍 Candidate line {} lost for operator {}: {}", candidate.id, operator_id, e);
                    exclude.insert(candidate.id);
                }
                Err(e) => return Err(e),
            }
        }

        self.strand_operator(operator_id, lost_line).await
    }

    /// Close the operator's open conversations on the lost line and tell them
    async fn strand_operator(&self, operator_id: OperatorId, lost_line: LineId) -> Result<OperatorOutcome> {
        let closed = {
            let mut conn = self.db.acquire().await?;
            conversations::close_open(&mut conn, operator_id, lost_line, &self.abandoned_tabulation, Utc::now())
                .await?
        };
        warn!(
            "📵 Operator {} lost line {} with no replacement ({} conversations closed)",
            operator_id, lost_line, closed
        );
        self.collaborators.notifier.notify(Notification::to_operator(
            operator_id,
            NotificationEvent::LineLost,
            json!({ "line_id": lost_line, "conversations_closed": closed }),
        ));
        Ok(OperatorOutcome::Lost {
            operator_id,
            conversations_closed: closed,
        })
    }
}
