//! Operator waiting queue module
//!
//! Operators who cannot get a line wait here. The queue is persisted; each
//! drain claims entries one row at a time, so it is safe to run several
//! engine instances against the same store.

pub mod manager;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{LineId, OperatorId, SegmentId};

pub use manager::{QueueDrainReport, QueueStats, WaitingQueue};

/// Queue entry status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Waiting,
    Assigned,
    Expired,
    /// The operator went offline before being served
    Withdrawn,
}

/// Persisted queue entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct QueueEntry {
    pub id: i64,
    pub operator_id: OperatorId,
    pub segment_id: Option<SegmentId>,
    /// Higher is served first
    pub priority: i64,
    pub status: QueueStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub assigned_line_id: Option<LineId>,
    pub claim_token: Option<String>,
    pub claimed_until: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Result of asking to join the queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "result")]
pub enum QueueAdmission {
    /// A new waiting entry was created
    Enqueued { entry_id: i64, position: usize },
    /// The operator was already waiting; the existing entry is kept
    AlreadyWaiting { entry_id: i64, position: usize },
    /// Administrators never wait
    Rejected { reason: String },
}

impl QueueAdmission {
    /// Entries ahead of this operator, when waiting
    pub fn position(&self) -> Option<usize> {
        match self {
            QueueAdmission::Enqueued { position, .. } | QueueAdmission::AlreadyWaiting { position, .. } => {
                Some(*position)
            }
            QueueAdmission::Rejected { .. } => None,
        }
    }
}
