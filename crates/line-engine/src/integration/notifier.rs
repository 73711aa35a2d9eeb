//! Real-time notifications to operators
//!
//! Delivery is fire-and-forget: a notifier never reports failure back to the
//! operation that raised the event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::types::{LineId, OperatorId};

/// Notification event names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationEvent {
    LineAssigned,
    LineSwitched,
    LineLost,
    QueueJoined,
    LineReallocated,
}

impl NotificationEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationEvent::LineAssigned => "line-assigned",
            NotificationEvent::LineSwitched => "line-switched",
            NotificationEvent::LineLost => "line-lost",
            NotificationEvent::QueueJoined => "queue-joined",
            NotificationEvent::LineReallocated => "line-reallocated",
        }
    }
}

/// Who a notification is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "id")]
pub enum NotificationTarget {
    Operator(OperatorId),
    /// Every operator bound to the line
    Line(LineId),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub target: NotificationTarget,
    pub event: NotificationEvent,
    pub payload: Value,
    pub at: DateTime<Utc>,
}

impl Notification {
    pub fn to_operator(operator_id: OperatorId, event: NotificationEvent, payload: Value) -> Self {
        Self {
            target: NotificationTarget::Operator(operator_id),
            event,
            payload,
            at: Utc::now(),
        }
    }

    pub fn to_line(line_id: LineId, event: NotificationEvent, payload: Value) -> Self {
        Self {
            target: NotificationTarget::Line(line_id),
            event,
            payload,
            at: Utc::now(),
        }
    }
}

/// Notification collaborator
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Fans notifications out over a tokio broadcast channel
#[derive(Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<Notification>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl Notifier for BroadcastNotifier {
    fn notify(&self, notification: Notification) {
        debug!("📣 {} → {:?}", notification.event.as_str(), notification.target);
        // no subscribers is not an error
        let _ = self.sender.send(notification);
    }
}

/// Drops every notification
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, notification: Notification) {
        trace!("dropping {} notification", notification.event.as_str());
    }
}
