//! Line registry
//!
//! Read access to line state plus the provisioning hooks used by the
//! external onboarding flow. Status changes do not go through here; they
//! belong to the health monitor and the reallocation coordinator.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::info;

use super::{Line, LineStatus, NewLine};
use crate::database::lines::LineOccupancy;
use crate::database::{bindings, lines, operators, LineDatabase};
use crate::error::{LineEngineError, Result};
use crate::integration::audit::event_types;
use crate::integration::{AuditEvent, AuditSink};
use crate::operator::Operator;
use crate::types::{LineId, OperatorId};

const MODULE: &str = "line-registry";

#[derive(Clone)]
pub struct LineRegistry {
    db: LineDatabase,
    audit: Arc<dyn AuditSink>,
}

impl LineRegistry {
    pub fn new(db: LineDatabase, audit: Arc<dyn AuditSink>) -> Self {
        Self { db, audit }
    }

    /// Register a new line; it starts `active` with no bindings
    pub async fn provision_line(&self, new_line: NewLine) -> Result<Line> {
        let line = {
            let mut conn = self.db.acquire().await?;
            lines::insert_line(&mut conn, &new_line, Utc::now()).await?
        };

        info!(
            "📱 Provisioned line {} ({}) on {} / {}",
            line.id, line.phone, line.provider_ref, line.instance_name
        );
        self.audit.emit(AuditEvent::new(
            event_types::LINE_PROVISIONED,
            MODULE,
            json!({
                "line_id": line.id,
                "phone": line.phone,
                "segment_id": line.segment_id,
                "is_reserve": line.is_reserve,
            }),
        ));
        Ok(line)
    }

    /// Remove a line and every binding on it.
    ///
    /// Returns the operators that were bound, so the caller can find them a
    /// new line.
    pub async fn deprovision_line(&self, line_id: LineId, actor: Option<&str>) -> Result<Vec<OperatorId>> {
        let released = self
            .db
            .with_timeout("deprovision_line", self.deprovision_in_transaction(line_id))
            .await?;

        info!("🗑️ Deprovisioned line {} ({} operators released)", line_id, released.len());
        self.audit.emit(
            AuditEvent::new(
                event_types::LINE_DEPROVISIONED,
                MODULE,
                json!({ "line_id": line_id, "released_operators": released }),
            )
            .with_actor(actor),
        );
        Ok(released)
    }

    async fn deprovision_in_transaction(&self, line_id: LineId) -> Result<Vec<OperatorId>> {
        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        if !lines::lock_line(&mut tx, line_id, now).await? {
            return Err(LineEngineError::not_found(format!("line {}", line_id)));
        }

        let released = bindings::delete_bindings_for_line(&mut tx, line_id).await?;
        lines::delete_line(&mut tx, line_id).await?;
        for operator_id in &released {
            operators::repair_current_line(&mut tx, *operator_id, now).await?;
        }

        tx.commit().await?;
        Ok(released)
    }

    pub async fn get_line(&self, line_id: LineId) -> Result<Option<Line>> {
        let mut conn = self.db.acquire().await?;
        lines::get_line(&mut conn, line_id).await
    }

    /// Like [`Self::get_line`] but a missing line is an error
    pub async fn fetch_line(&self, line_id: LineId) -> Result<Line> {
        let mut conn = self.db.acquire().await?;
        lines::fetch_line(&mut conn, line_id).await
    }

    pub async fn list_lines(&self) -> Result<Vec<Line>> {
        let mut conn = self.db.acquire().await?;
        lines::list_lines(&mut conn).await
    }

    pub async fn list_by_status(&self, status: LineStatus) -> Result<Vec<Line>> {
        let mut conn = self.db.acquire().await?;
        lines::list_lines_by_status(&mut conn, status).await
    }

    /// Operators bound to the line, in binding order
    pub async fn bound_operators(&self, line_id: LineId) -> Result<Vec<Operator>> {
        let mut conn = self.db.acquire().await?;
        bindings::bound_operators(&mut conn, line_id).await
    }

    /// Active lines with their bound counts, least-bound first
    pub async fn occupancy(&self) -> Result<Vec<LineOccupancy>> {
        let mut conn = self.db.acquire().await?;
        lines::list_active_occupancy(&mut conn).await
    }
}
