//! # Operators
//!
//! Operators are the human agents that work conversations through bound
//! lines. They are created externally; the engine only flips their online
//! status and maintains the denormalized `current_line_id` pointer.

pub mod directory;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{LineId, OperatorId, SegmentId};

pub use directory::OperatorDirectory;

/// Operator role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OperatorRole {
    /// Administrators are never queued or auto-assigned
    Admin,
    Supervisor,
    Operator,
}

/// Online status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OnlineStatus {
    Online,
    Offline,
}

/// Persisted operator record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Operator {
    pub id: OperatorId,
    pub name: String,
    pub role: OperatorRole,
    pub segment_id: Option<SegmentId>,
    pub online_status: OnlineStatus,
    pub current_line_id: Option<LineId>,
    /// When `online_status` last flipped
    pub last_status_change: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Operator {
    pub fn is_admin(&self) -> bool {
        self.role == OperatorRole::Admin
    }

    pub fn is_online(&self) -> bool {
        self.online_status == OnlineStatus::Online
    }
}

/// Request to create an operator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOperator {
    pub name: String,
    pub role: OperatorRole,
    pub segment_id: Option<SegmentId>,
}

impl NewOperator {
    pub fn new(name: impl Into<String>, segment_id: Option<SegmentId>) -> Self {
        Self {
            name: name.into(),
            role: OperatorRole::Operator,
            segment_id,
        }
    }

    pub fn admin(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: OperatorRole::Admin,
            segment_id: None,
        }
    }

    pub fn with_role(mut self, role: OperatorRole) -> Self {
        self.role = role;
        self
    }
}
