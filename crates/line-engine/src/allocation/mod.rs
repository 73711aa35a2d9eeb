//! # Line Allocation
//!
//! Decides which operator gets which line.
//!
//! ## Request flow
//!
//! ```text
//! request_line(op)
//!   ├─ admin?                         → NotEligible
//!   ├─ already on an active line?     → AlreadyAssigned
//!   ├─ allocation disabled?           → AllocationDisabled
//!   ├─ others waiting in segment?     → Queued          (no jumping the queue)
//!   ├─ find_available_line → assign   → Assigned        (lost races retry the next candidate)
//!   └─ nothing left                   → Queued
//! ```
//!
//! ## Candidate search
//!
//! Candidates are searched in three tiers with no fallback beyond them:
//! lines already scoped to the operator's segment, then empty unscoped
//! ("virgin") lines, then lines of the Default pool segment. For an
//! unsegmented operator, unscoped lines already holding unsegmented
//! operators count as their own segment. Within a tier the
//! least-bound line wins, ties broken by lowest id. Only lines whose provider
//! is enabled for the segment and whose live probe reads connected qualify.
//!
//! ## Assignment
//!
//! [`AllocationEngine::assign`] runs in one transaction that first takes the
//! line's write lock, then validates status, provider, segment and capacity
//! in that order. The first bind of a pool line by a segmented operator
//! scopes the line to that segment for good.

pub mod engine;
pub mod rules;

pub use engine::{AllocationEngine, AssignOutcome, RequestOutcome};
pub use rules::{line_capacity, CandidateTier, SegmentCheck};
