//! Narrow capabilities components hand each other.
//!
//! The allocation engine, waiting queue, reallocation coordinator and load
//! balancer all need a slice of each other. Instead of holding one another
//! they depend on these traits: the queue drains through a [`LineAssigner`],
//! and the allocation engine consults the queue through a [`QueueGate`].

use std::collections::HashSet;

use async_trait::async_trait;

use crate::allocation::AssignOutcome;
use crate::error::Result;
use crate::line::Line;
use crate::queue::QueueAdmission;
use crate::types::{LineId, OperatorId, SegmentId};

/// Find, bind and release lines
#[async_trait]
pub trait LineAssigner: Send + Sync {
    /// Best reachable line for the operator, skipping `exclude`
    async fn find_available_line(
        &self,
        operator_id: OperatorId,
        segment: Option<SegmentId>,
        exclude: &HashSet<LineId>,
    ) -> Result<Option<Line>>;

    /// Bind the operator to the line under capacity and segment rules
    async fn assign(&self, line_id: LineId, operator_id: OperatorId) -> Result<AssignOutcome>;

    /// Remove one binding; false when it did not exist
    async fn unbind(&self, line_id: LineId, operator_id: OperatorId) -> Result<bool>;
}

/// Look at and join the waiting queue
#[async_trait]
pub trait QueueGate: Send + Sync {
    /// Whether someone other than `excluding` waits in `segment` or the global queue
    async fn has_waiting(&self, segment: Option<SegmentId>, excluding: Option<OperatorId>) -> Result<bool>;

    async fn enqueue(&self, operator_id: OperatorId, segment: Option<SegmentId>, priority: i64)
        -> Result<QueueAdmission>;
}
