//! # Lines
//!
//! A line is one provisioned messaging-channel resource (a phone number
//! behind a provider instance). Lines are bound to operators by the
//! allocation engine and probed by the health monitor.
//!
//! ## Segment scope
//!
//! A line starts either unscoped (`segment_id = NULL`) or in the Default
//! pool segment. The first operator bound to it promotes it to that
//! operator's segment, after which the line is locked there for good:
//!
//! ```text
//!  Unscoped ──┐
//!             ├── first bind by segment S ──▶ Scoped(S)   (terminal)
//!  Default ───┘
//! ```
//!
//! ## Status
//!
//! `active` lines are allocatable. `disconnected` is recoverable (the full
//! health sweep restores it once the provider reports the instance connected
//! again). `ban` is terminal.

pub mod registry;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{LineId, OperatorId, SegmentId};

pub use registry::LineRegistry;

/// Line status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LineStatus {
    Active,
    Ban,
    Disconnected,
}

impl LineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineStatus::Active => "active",
            LineStatus::Ban => "ban",
            LineStatus::Disconnected => "disconnected",
        }
    }
}

/// Persisted line record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Line {
    pub id: LineId,
    pub phone: String,
    pub status: LineStatus,
    pub segment_id: Option<SegmentId>,
    pub is_reserve: bool,
    /// Provider integration the line runs on (checked against the segment allow-list)
    pub provider_ref: String,
    /// Provider instance identifier used by health probes
    pub instance_name: String,
    pub primary_operator_id: Option<OperatorId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Where a line sits with respect to segment isolation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineScope {
    /// `segment_id` is NULL
    Unscoped,
    /// Line is in the Default pool segment
    Default,
    /// Line is permanently locked to a segment
    Scoped(SegmentId),
}

impl LineScope {
    /// Unscoped and Default lines can still be promoted
    pub fn is_pool(&self) -> bool {
        !matches!(self, LineScope::Scoped(_))
    }
}

impl Line {
    pub fn scope(&self, default_segment: Option<SegmentId>) -> LineScope {
        match self.segment_id {
            None => LineScope::Unscoped,
            Some(segment) if Some(segment) == default_segment => LineScope::Default,
            Some(segment) => LineScope::Scoped(segment),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == LineStatus::Active
    }
}

/// Request to provision a line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLine {
    pub phone: String,
    pub segment_id: Option<SegmentId>,
    pub is_reserve: bool,
    pub provider_ref: String,
    pub instance_name: String,
}

impl NewLine {
    /// Unscoped, non-reserve line whose instance is named after the phone
    pub fn new(phone: impl Into<String>, provider_ref: impl Into<String>) -> Self {
        let phone = phone.into();
        Self {
            instance_name: phone.clone(),
            phone,
            segment_id: None,
            is_reserve: false,
            provider_ref: provider_ref.into(),
        }
    }

    pub fn with_segment(mut self, segment: SegmentId) -> Self {
        self.segment_id = Some(segment);
        self
    }

    pub fn reserve(mut self) -> Self {
        self.is_reserve = true;
        self
    }

    pub fn with_instance(mut self, instance_name: impl Into<String>) -> Self {
        self.instance_name = instance_name.into();
        self
    }
}
