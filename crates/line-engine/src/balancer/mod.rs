//! # Load balancing
//!
//! Moves operators off hot lines. An operator is only moved when their line
//! scores at or above `switch_threshold` and another line visible to their
//! segment scores at least `min_score_gap` lower. The periodic sweep looks
//! at every line above `overload_threshold` and moves up to half of its
//! operators, rounded up, under the same `switch_threshold` rule.

pub mod score;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

pub use score::{load_score, LoadSnapshot};

use crate::allocation::engine::current_active_line;
use crate::allocation::rules::{self, SegmentCheck};
use crate::config::{BalancerConfig, LineEngineConfig};
use crate::database::{bindings, conversations, lines, operators, LineDatabase};
use crate::error::Result;
use crate::integration::audit::event_types;
use crate::integration::{AuditEvent, Collaborators, LineAssigner, Notification, NotificationEvent};
use crate::line::LineScope;
use crate::scheduler::SingleFlight;
use crate::types::{LineId, OperatorId, SegmentId};

const MODULE: &str = "balancer";

/// Result of [`LoadBalancer::switch_line_if_needed`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "result")]
pub enum SwitchOutcome {
    Switched {
        from: LineId,
        to: LineId,
        from_score: f64,
        to_score: f64,
    },
    /// The current line is below the switch threshold
    Balanced { score: f64 },
    /// No line is light enough to be worth the move
    NoCandidate { score: f64 },
    /// The operator holds no active line, or is never moved
    NotApplicable,
}

/// What one balancing sweep did
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BalanceReport {
    pub skipped: bool,
    pub examined: usize,
    pub overloaded: usize,
    /// `(operator, from, to)`
    pub switched: Vec<(OperatorId, LineId, LineId)>,
}

pub struct LoadBalancer {
    db: LineDatabase,
    config: BalancerConfig,
    default_segment: Option<SegmentId>,
    collaborators: Collaborators,
    assigner: Arc<dyn LineAssigner>,
    flight: SingleFlight,
}

impl LoadBalancer {
    pub fn new(
        db: LineDatabase,
        config: &LineEngineConfig,
        collaborators: Collaborators,
        assigner: Arc<dyn LineAssigner>,
    ) -> Self {
        Self {
            db,
            config: config.balancer.clone(),
            default_segment: config.default_segment(),
            collaborators,
            assigner,
            flight: SingleFlight::new(),
        }
    }

    /// Current load of one line
    pub async fn compute_load(&self, line_id: LineId) -> Result<LoadSnapshot> {
        let mut conn = self.db.acquire().await?;
        lines::fetch_line(&mut conn, line_id).await?;

        let bound = bindings::count_bindings(&mut conn, line_id).await?;
        let open = conversations::count_open_for_line(&mut conn, line_id).await?;
        let last_hour = conversations::count_messages_since(&mut conn, line_id, Utc::now() - chrono::Duration::hours(1))
            .await?;

        Ok(LoadSnapshot::new(line_id, bound, open, last_hour as f64 / 60.0))
    }

    /// Least-loaded active line an operator of `segment` could join
    pub async fn find_lightest_line(
        &self,
        segment: Option<SegmentId>,
        exclude: &HashSet<LineId>,
    ) -> Result<Option<LoadSnapshot>> {
        let panel = &self.collaborators.control_panel;
        let shared = panel.shared_line_mode();

        let (occupancy, bound) = {
            let mut conn = self.db.acquire().await?;
            (
                lines::list_active_occupancy(&mut conn).await?,
                bindings::list_bound_segments(&mut conn).await?,
            )
        };
        let mut segments_by_line: HashMap<LineId, Vec<Option<SegmentId>>> = HashMap::new();
        for (line_id, operator_segment) in bound {
            segments_by_line.entry(line_id).or_default().push(operator_segment);
        }

        let mut lightest: Option<LoadSnapshot> = None;
        for occ in occupancy {
            if exclude.contains(&occ.line.id) {
                continue;
            }
            let scope = occ.line.scope(self.default_segment);
            let policy_segment = match scope {
                LineScope::Scoped(s) => Some(s),
                _ => segment,
            };
            let settings = panel.segment_settings(policy_segment);
            let capacity = rules::line_capacity(occ.line.is_reserve, settings.max_operators_per_line, shared);
            if !settings.provider_enabled(&occ.line.provider_ref) || !rules::has_spare_capacity(occ.bound(), capacity) {
                continue;
            }
            let existing = segments_by_line.get(&occ.line.id).map(Vec::as_slice).unwrap_or(&[]);
            if rules::check_segment(scope, segment, existing, self.default_segment) == SegmentCheck::Mismatch {
                continue;
            }

            let snapshot = self.compute_load(occ.line.id).await?;
            let lighter = lightest.as_ref().map_or(true, |best| {
                snapshot.load_score < best.load_score
                    || (snapshot.load_score == best.load_score && snapshot.line_id < best.line_id)
            });
            if lighter {
                lightest = Some(snapshot);
            }
        }

        Ok(lightest)
    }

    /// Move the operator to a lighter line when theirs is overloaded
    pub async fn switch_line_if_needed(&self, operator_id: OperatorId) -> Result<SwitchOutcome> {
        let (operator, current) = {
            let mut conn = self.db.acquire().await?;
            let operator = operators::fetch_operator(&mut conn, operator_id).await?;
            let current = current_active_line(&mut conn, &operator).await?;
            (operator, current)
        };
        let Some(current) = current.filter(|_| !operator.is_admin()) else {
            return Ok(SwitchOutcome::NotApplicable);
        };

        let load = self.compute_load(current.id).await?;
        if load.load_score < self.config.switch_threshold {
            return Ok(SwitchOutcome::Balanced { score: load.load_score });
        }

        self.move_operator(operator_id, operator.segment_id, &load).await
    }

    /// Move `operator_id` off the line in `from` if a light enough line exists
    async fn move_operator(
        &self,
        operator_id: OperatorId,
        segment: Option<SegmentId>,
        from: &LoadSnapshot,
    ) -> Result<SwitchOutcome> {
        let exclude = HashSet::from([from.line_id]);
        let Some(target) = self.find_lightest_line(segment, &exclude).await? else {
            return Ok(SwitchOutcome::NoCandidate { score: from.load_score });
        };
        if from.load_score - target.load_score < self.config.min_score_gap {
            debug!(
                "⚖️ Line {} ({:.1}) not enough lighter than line {} ({:.1})",
                target.line_id, target.load_score, from.line_id, from.load_score
            );
            return Ok(SwitchOutcome::NoCandidate { score: from.load_score });
        }

        if let Err(e) = self.assigner.assign(target.line_id, operator_id).await {
            warn!("⚠️ Could not move operator {} to line {}: {}", operator_id, target.line_id, e);
            return Ok(SwitchOutcome::NoCandidate { score: from.load_score });
        }
        self.assigner.unbind(from.line_id, operator_id).await?;

        let moved = {
            let mut conn = self.db.acquire().await?;
            let now = Utc::now();
            operators::set_current_line(&mut conn, operator_id, Some(target.line_id), now).await?;
            conversations::repoint_open(&mut conn, operator_id, from.line_id, target.line_id, now).await?
        };

        info!(
            "⚖️ Operator {} switched from line {} ({:.1}) to line {} ({:.1}), {} conversations moved",
            operator_id, from.line_id, from.load_score, target.line_id, target.load_score, moved
        );
        self.collaborators.audit.emit(AuditEvent::new(
            event_types::LINE_SWITCHED,
            MODULE,
            json!({
                "operator_id": operator_id,
                "from_line_id": from.line_id,
                "to_line_id": target.line_id,
                "from_score": from.load_score,
                "to_score": target.load_score,
            }),
        ));
        self.collaborators.notifier.notify(Notification::to_operator(
            operator_id,
            NotificationEvent::LineSwitched,
            json!({
                "previous_line_id": from.line_id,
                "line_id": target.line_id,
                "conversations_moved": moved,
            }),
        ));

        Ok(SwitchOutcome::Switched {
            from: from.line_id,
            to: target.line_id,
            from_score: from.load_score,
            to_score: target.load_score,
        })
    }

    /// Whether the sweep may still move operators off a line at `score`
    fn should_shed(&self, score: f64) -> bool {
        score > self.config.overload_threshold && score >= self.config.switch_threshold
    }

    /// Sweep every active line and drain the overloaded ones
    pub async fn balance_all_lines(&self) -> Result<BalanceReport> {
        let Some(_guard) = self.flight.try_enter() else {
            debug!("⏭️ Balance sweep already running, skipping");
            return Ok(BalanceReport {
                skipped: true,
                ..BalanceReport::default()
            });
        };

        let mut report = BalanceReport::default();
        let occupancy = {
            let mut conn = self.db.acquire().await?;
            lines::list_active_occupancy(&mut conn).await?
        };

        for occ in occupancy {
            report.examined += 1;
            let line_id = occ.line.id;
            let load = self.compute_load(line_id).await?;
            if load.load_score <= self.config.overload_threshold {
                continue;
            }
            report.overloaded += 1;

            let bound = {
                let mut conn = self.db.acquire().await?;
                bindings::bound_operators(&mut conn, line_id).await?
            };
            let to_move = bound.len().div_ceil(2);
            debug!("⚖️ Line {} at {:.1}, moving up to {} operators", line_id, load.load_score, to_move);

            for operator in bound.into_iter().filter(|o| !o.is_admin()).take(to_move) {
                let load = self.compute_load(line_id).await?;
                if !self.should_shed(load.load_score) {
                    break;
                }
                match self.move_operator(operator.id, operator.segment_id, &load).await {
                    Ok(SwitchOutcome::Switched { from, to, .. }) => report.switched.push((operator.id, from, to)),
                    Ok(_) => break,
                    Err(e) => warn!("⚠️ Balancing operator {} off line {} failed: {}", operator.id, line_id, e),
                }
            }
        }

        if !report.switched.is_empty() {
            info!("⚖️ Balance sweep moved {} operators", report.switched.len());
        }
        Ok(report)
    }
}
