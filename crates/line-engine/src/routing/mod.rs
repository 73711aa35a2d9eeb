//! # Inbound contact routing
//!
//! Decides which operator on a line handles an inbound message from a
//! contact. A contact that recently talked to an operator keeps reaching the
//! same operator for a sliding window (24h by default) as long as that
//! operator is online and still bound to the line:
//!
//! ```text
//! inbound(line, contact)
//!   ├─ sticky binding live, operator online and bound → same operator, window refreshed
//!   ├─ online operators bound to the line             → fewest open conversations (ties: lowest id)
//!   └─ nobody online                                  → unrouted
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::LineEngineConfig;
use crate::database::{bindings, contacts, conversations, lines, operators, LineDatabase};
use crate::error::{LineEngineError, Result};
use crate::types::{LineId, OperatorId};

/// Sticky pinning of a contact's traffic on one line to one operator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ContactBinding {
    pub contact_phone: String,
    pub line_id: LineId,
    pub operator_id: OperatorId,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ContactBinding {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Where an inbound message was routed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundRoute {
    pub line_id: LineId,
    pub operator_id: OperatorId,
    /// The existing sticky binding was honoured
    pub sticky: bool,
}

/// Sticky contact → operator routing table
#[derive(Clone)]
pub struct ContactBindingTable {
    db: LineDatabase,
    sticky_window: chrono::Duration,
}

impl ContactBindingTable {
    pub fn new(db: LineDatabase, config: &LineEngineConfig) -> Self {
        Self {
            db,
            sticky_window: config.contacts.sticky_window(),
        }
    }

    /// Pick the operator on `line_id` who should handle a message from
    /// `contact_phone`, creating or refreshing the sticky binding.
    ///
    /// Returns `None` when no bound operator is online.
    pub async fn assign_inbound_message_to_operator(
        &self,
        line_id: LineId,
        contact_phone: &str,
    ) -> Result<Option<InboundRoute>> {
        let route = self
            .db
            .with_timeout("route_inbound", self.route_in_transaction(line_id, contact_phone))
            .await?;

        match &route {
            Some(route) if route.sticky => {
                debug!("📨 {} on line {} stays with operator {}", contact_phone, line_id, route.operator_id);
            }
            Some(route) => {
                info!("📨 {} on line {} routed to operator {}", contact_phone, line_id, route.operator_id);
            }
            None => {
                debug!("📨 No online operator on line {} for {}", line_id, contact_phone);
            }
        }
        Ok(route)
    }

    async fn route_in_transaction(&self, line_id: LineId, contact_phone: &str) -> Result<Option<InboundRoute>> {
        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        if !lines::lock_line(&mut tx, line_id, now).await? {
            return Err(LineEngineError::not_found(format!("line {}", line_id)));
        }

        if let Some(existing) = contacts::get_binding(&mut tx, contact_phone, line_id).await? {
            if existing.is_live(now) {
                let operator = operators::get_operator(&mut tx, existing.operator_id).await?;
                let still_bound = bindings::is_bound(&mut tx, line_id, existing.operator_id).await?;
                if still_bound && operator.is_some_and(|o| o.is_online()) {
                    contacts::upsert_binding(
                        &mut tx,
                        contact_phone,
                        line_id,
                        existing.operator_id,
                        now + self.sticky_window,
                        now,
                    )
                    .await?;
                    tx.commit().await?;
                    return Ok(Some(InboundRoute {
                        line_id,
                        operator_id: existing.operator_id,
                        sticky: true,
                    }));
                }
            }
        }

        let mut best: Option<(usize, OperatorId)> = None;
        for operator in bindings::bound_operators(&mut tx, line_id).await? {
            if !operator.is_online() {
                continue;
            }
            let open = conversations::count_open_for_operator(&mut tx, operator.id).await?;
            if best.map_or(true, |current| (open, operator.id) < current) {
                best = Some((open, operator.id));
            }
        }

        let Some((_, operator_id)) = best else {
            tx.rollback().await?;
            return Ok(None);
        };

        contacts::upsert_binding(&mut tx, contact_phone, line_id, operator_id, now + self.sticky_window, now).await?;
        tx.commit().await?;

        Ok(Some(InboundRoute {
            line_id,
            operator_id,
            sticky: false,
        }))
    }

    pub async fn get(&self, contact_phone: &str, line_id: LineId) -> Result<Option<ContactBinding>> {
        let mut conn = self.db.acquire().await?;
        contacts::get_binding(&mut conn, contact_phone, line_id).await
    }

    /// Drop sticky bindings whose window has closed
    pub async fn purge_expired(&self) -> Result<u64> {
        let mut conn = self.db.acquire().await?;
        let purged = contacts::purge_expired(&mut conn, Utc::now()).await?;
        if purged > 0 {
            info!("🧹 Purged {} expired contact bindings", purged);
        }
        Ok(purged)
    }
}
