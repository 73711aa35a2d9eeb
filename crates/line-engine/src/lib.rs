//! # linepool line engine
//!
//! Allocation of shared messaging lines to human operators.
//!
//! A pool of provider-backed lines is shared by operators grouped in
//! segments. The engine decides who gets which line, queues operators when
//! nothing fits, takes broken lines out of service and moves their operators
//! elsewhere, and keeps load spread across lines. Two rules hold at all
//! times, even under concurrent requests:
//!
//! - a line never holds more operators than its capacity (1 for reserve
//!   lines, the segment's configured maximum otherwise, unlimited in
//!   shared-line mode);
//! - a line scoped to a segment only ever holds operators of that segment.
//!
//! ## Modules
//!
//! - [`allocation`]: candidate search and transactional assignment
//! - [`queue`]: persisted waiting queue with row-level claims
//! - [`health`]: debounced failure detection, takedown and reallocation
//! - [`balancer`]: load scoring and operator transfers
//! - [`routing`]: sticky inbound contact routing
//! - [`line`], [`operator`]: line registry and operator directory
//! - [`integration`]: provider probe, notifier, audit and control panel seams
//! - [`database`]: SQLite persistence through sqlx
//! - [`orchestrator`]: the [`LineEngine`] facade
//! - [`server`]: periodic task lifecycle
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use linepool_line_engine::prelude::*;
//!
//! # async fn example() -> std::result::Result<(), Box<dyn std::error::Error>> {
//! let config = LineEngineConfig::default();
//! let mut server = LineEngineServer::new(config.clone(), Collaborators::offline(&config)).await?;
//! server.start().await?;
//!
//! let engine = server.engine();
//! let operator = engine.operators().create_operator(NewOperator::new("bruno", Some(SegmentId(7)))).await?;
//! let outcome = engine.operator_connected(operator.id).await?;
//! println!("{:?}", outcome);
//!
//! server.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod allocation;
pub mod balancer;
pub mod config;
pub mod database;
pub mod error;
pub mod health;
pub mod integration;
pub mod line;
pub mod logging;
pub mod operator;
pub mod orchestrator;
pub mod queue;
pub mod routing;
pub mod scheduler;
pub mod server;
pub mod types;

pub use crate::config::LineEngineConfig;
pub use error::{LineEngineError, Result};
pub use orchestrator::LineEngine;
pub use server::{LineEngineServer, LineEngineServerBuilder};

/// Common imports for embedding the engine
pub mod prelude {
    pub use crate::allocation::{AllocationEngine, AssignOutcome, RequestOutcome};
    pub use crate::balancer::{LoadBalancer, LoadSnapshot, SwitchOutcome};
    pub use crate::config::LineEngineConfig;
    pub use crate::database::LineDatabase;
    pub use crate::error::{LineEngineError, Result};
    pub use crate::health::{Confirmation, HealthMonitor, ReallocationReport};
    pub use crate::integration::{
        AuditEvent, AuditSink, Collaborators, ConnectionState, ControlPanel, FailureSignal, Notification,
        NotificationEvent, Notifier, ProbeReport, ProviderProbe,
    };
    pub use crate::line::{Line, LineStatus, NewLine};
    pub use crate::operator::{NewOperator, Operator, OperatorRole};
    pub use crate::orchestrator::{InboundDelivery, LineEngine};
    pub use crate::queue::{QueueAdmission, QueueDrainReport};
    pub use crate::server::{LineEngineServer, LineEngineServerBuilder};
    pub use crate::types::{LineId, OperatorId, SegmentId};
}
