//! # Line health
//!
//! Detects banned and disconnected lines and recovers from them.
//!
//! ## Detection
//!
//! Two sweeps probe the provider: a slow full sweep over every line that is
//! not banned, and a fast targeted sweep over lines held by online
//! operators. A probe that looks like a ban or a lost session is only a
//! suspicion:
//!
//! ```text
//! probe ─ signal? ──▶ wait confirm_delay ──▶ probe again
//!                                              ├─ healthy  → false positive, nothing happens
//!                                              └─ signal   → take the line down (ban or disconnect)
//! ```
//!
//! Send failures reported by the messaging layer go through the same double
//! check. A manual ban skips it.
//!
//! ## Recovery
//!
//! Taking a line down releases every binding on it in one transaction.
//! Each released operator is then offered another line; their open
//! conversations follow them, or are closed when no line is available.
//! A disconnected line that probes connected again on a full sweep returns
//! to service; a banned line never does.

pub mod monitor;
pub mod reallocation;

pub use monitor::{Confirmation, HealthMonitor, IdleReport, SweepReport};
pub use reallocation::{OperatorOutcome, ReallocationCoordinator, ReallocationReport};
