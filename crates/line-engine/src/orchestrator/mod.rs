//! # Line Engine Orchestration
//!
//! The orchestrator wires every component into one [`LineEngine`] and
//! exposes the operations the outside world triggers: operators connecting
//! and disconnecting, inbound messages, admin bans and unbinds, send
//! failures, and the periodic sweeps.
//!
//! ## Wiring
//!
//! Components reach each other only through narrow capabilities, so the
//! graph has no cycles:
//!
//! ```text
//!                ┌──────────────────┐
//!                │    LineEngine    │
//!                └────────┬─────────┘
//!        ┌────────────────┼──────────────────┬─────────────────┐
//!        ▼                ▼                  ▼                 ▼
//! ┌─────────────┐  ┌─────────────┐   ┌──────────────┐  ┌──────────────┐
//! │ Allocation  │◀─│WaitingQueue │   │HealthMonitor │  │ LoadBalancer │
//! │   Engine    │─▶│ (QueueGate) │   └──────┬───────┘  └──────┬───────┘
//! └─────────────┘  └─────────────┘          ▼                 │
//!        ▲                          ┌──────────────┐          │
//!        └──── LineAssigner ────────│ Reallocation │◀─────────┘
//!                                   │ Coordinator  │   (LineAssigner)
//!                                   └──────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use linepool_line_engine::prelude::*;
//!
//! # async fn example() -> std::result::Result<(), Box<dyn std::error::Error>> {
//! let config = LineEngineConfig::default();
//! let engine = LineEngine::new(config.clone(), Collaborators::offline(&config)).await?;
//!
//! let line = engine.lines().provision_line(NewLine::new("+5511999990000", "evolution")).await?;
//! let operator = engine.operators().create_operator(NewOperator::new("ana", None)).await?;
//!
//! match engine.operator_connected(operator.id).await? {
//!     RequestOutcome::Assigned(assigned) => assert_eq!(assigned.id, line.id),
//!     other => println!("not assigned: {:?}", other),
//! }
//! # Ok(())
//! # }
//! ```

pub mod core;

pub use self::core::{InboundDelivery, LineEngine};
