//! Pure allocation rules: capacity, segment compatibility and candidate tiers.
//!
//! Nothing here touches the database; the engine loads rows and asks these
//! functions what is allowed.

use crate::line::LineScope;
use crate::types::SegmentId;

/// Operators a line may hold. `None` means unlimited (shared-line mode).
pub fn line_capacity(is_reserve: bool, policy_max: usize, shared_line_mode: bool) -> Option<usize> {
    if shared_line_mode {
        None
    } else if is_reserve {
        Some(1)
    } else {
        Some(policy_max.max(1))
    }
}

pub fn has_spare_capacity(bound: usize, capacity: Option<usize>) -> bool {
    capacity.map_or(true, |cap| bound < cap)
}

/// A segment that does not isolate anything: null or the Default pool segment
pub fn normalize_segment(segment: Option<SegmentId>, default_segment: Option<SegmentId>) -> Option<SegmentId> {
    match segment {
        Some(s) if Some(s) != default_segment => Some(s),
        _ => None,
    }
}

/// Outcome of a segment compatibility check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentCheck {
    /// Binding allowed; `promote_to` is set on the first bind that scopes a pool line
    Compatible { promote_to: Option<SegmentId> },
    Mismatch,
}

/// Can an operator of `operator_segment` join a line of `scope` whose current
/// operators belong to `bound_segments`?
///
/// - Scoped line: the operator and every bound operator must be in that segment.
/// - Pool line: every bound operator must share the operator's normalized
///   segment; a real segment promotes the line.
pub fn check_segment(
    scope: LineScope,
    operator_segment: Option<SegmentId>,
    bound_segments: &[Option<SegmentId>],
    default_segment: Option<SegmentId>,
) -> SegmentCheck {
    match scope {
        LineScope::Scoped(line_segment) => {
            let all_match = operator_segment == Some(line_segment)
                && bound_segments.iter().all(|s| *s == Some(line_segment));
            if all_match {
                SegmentCheck::Compatible { promote_to: None }
            } else {
                SegmentCheck::Mismatch
            }
        }
        LineScope::Unscoped | LineScope::Default => {
            let operator_norm = normalize_segment(operator_segment, default_segment);
            let compatible = bound_segments
                .iter()
                .all(|s| normalize_segment(*s, default_segment) == operator_norm);
            if compatible {
                SegmentCheck::Compatible { promote_to: operator_norm }
            } else {
                SegmentCheck::Mismatch
            }
        }
    }
}

/// Candidate tiers searched by `find_available_line`, best first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CandidateTier {
    /// Already scoped to the operator's segment, or an occupied unscoped
    /// line for an unsegmented operator
    SameSegment,
    /// Unscoped and empty
    Virgin,
    /// In the Default pool segment
    DefaultPool,
}

/// Which tier, if any, a line falls into for an operator.
///
/// Capacity and compatibility of bound operators are checked separately.
pub fn candidate_tier(
    scope: LineScope,
    operator_segment: Option<SegmentId>,
    default_segment: Option<SegmentId>,
    bound: usize,
) -> Option<CandidateTier> {
    let operator_norm = normalize_segment(operator_segment, default_segment);
    match scope {
        LineScope::Scoped(s) if operator_norm == Some(s) => Some(CandidateTier::SameSegment),
        LineScope::Scoped(_) => None,
        LineScope::Unscoped if bound == 0 => Some(CandidateTier::Virgin),
        // an unscoped line only ever holds unsegmented operators
        LineScope::Unscoped if operator_norm.is_none() => Some(CandidateTier::SameSegment),
        LineScope::Unscoped => None,
        LineScope::Default => Some(CandidateTier::DefaultPool),
    }
}

/// Hard invariants of one line, returned as a description of the first violation
pub fn check_line_invariants(
    scope: LineScope,
    bound_segments: &[Option<SegmentId>],
    capacity: Option<usize>,
) -> Result<(), String> {
    if let Some(cap) = capacity {
        if bound_segments.len() > cap {
            return Err(format!("{} operators bound, capacity {}", bound_segments.len(), cap));
        }
    }
    if let LineScope::Scoped(line_segment) = scope {
        if let Some(other) = bound_segments.iter().find(|s| **s != Some(line_segment)) {
            return Err(format!(
                "operator of segment {:?} bound to line scoped to {}",
                other, line_segment
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFAULT: Option<SegmentId> = Some(SegmentId(1));
    const SEVEN: SegmentId = SegmentId(7);
    const NINE: SegmentId = SegmentId(9);

    #[test]
    fn test_capacity_rule() {
        assert_eq!(line_capacity(false, 2, false), Some(2));
        assert_eq!(line_capacity(true, 2, false), Some(1));
        assert_eq!(line_capacity(true, 2, true), None);
        assert_eq!(line_capacity(false, 0, false), Some(1));
        assert!(has_spare_capacity(1, Some(2)));
        assert!(!has_spare_capacity(2, Some(2)));
        assert!(has_spare_capacity(50, None));
    }

    #[test]
    fn test_normalize_segment() {
        assert_eq!(normalize_segment(None, DEFAULT), None);
        assert_eq!(normalize_segment(DEFAULT, DEFAULT), None);
        assert_eq!(normalize_segment(Some(SEVEN), DEFAULT), Some(SEVEN));
    }

    #[test]
    fn test_golden_rule_promotes_default_line() {
        let check = check_segment(LineScope::Default, Some(SEVEN), &[], DEFAULT);
        assert_eq!(check, SegmentCheck::Compatible { promote_to: Some(SEVEN) });

        // once scoped, another segment is rejected
        let check = check_segment(LineScope::Scoped(SEVEN), Some(NINE), &[Some(SEVEN)], DEFAULT);
        assert_eq!(check, SegmentCheck::Mismatch);
    }

    #[test]
    fn test_pool_line_never_mixes() {
        // an unsegmented operator already on a pool line blocks a segmented one
        let check = check_segment(LineScope::Unscoped, Some(SEVEN), &[None], DEFAULT);
        assert_eq!(check, SegmentCheck::Mismatch);

        // Default-segment operators count as unsegmented
        let check = check_segment(LineScope::Default, DEFAULT, &[None], DEFAULT);
        assert_eq!(check, SegmentCheck::Compatible { promote_to: None });
    }

    #[test]
    fn test_scoped_line_rejects_unsegmented_operator() {
        assert_eq!(
            check_segment(LineScope::Scoped(SEVEN), None, &[], DEFAULT),
            SegmentCheck::Mismatch
        );
    }

    #[test]
    fn test_candidate_tiers() {
        assert_eq!(
            candidate_tier(LineScope::Scoped(SEVEN), Some(SEVEN), DEFAULT, 1),
            Some(CandidateTier::SameSegment)
        );
        assert_eq!(candidate_tier(LineScope::Scoped(NINE), Some(SEVEN), DEFAULT, 0), None);
        assert_eq!(
            candidate_tier(LineScope::Unscoped, Some(SEVEN), DEFAULT, 0),
            Some(CandidateTier::Virgin)
        );
        assert_eq!(candidate_tier(LineScope::Unscoped, Some(SEVEN), DEFAULT, 1), None);
        assert_eq!(
            candidate_tier(LineScope::Unscoped, None, None, 1),
            Some(CandidateTier::SameSegment)
        );
        assert_eq!(
            candidate_tier(LineScope::Unscoped, DEFAULT, DEFAULT, 1),
            Some(CandidateTier::SameSegment)
        );
        assert_eq!(
            candidate_tier(LineScope::Default, None, DEFAULT, 1),
            Some(CandidateTier::DefaultPool)
        );
        assert!(CandidateTier::SameSegment < CandidateTier::Virgin);
        assert!(CandidateTier::Virgin < CandidateTier::DefaultPool);
    }

    #[test]
    fn test_invariant_check() {
        assert!(check_line_invariants(LineScope::Scoped(SEVEN), &[Some(SEVEN), Some(SEVEN)], Some(2)).is_ok());
        assert!(check_line_invariants(LineScope::Scoped(SEVEN), &[Some(SEVEN), Some(NINE)], Some(2)).is_err());
        assert!(check_line_invariants(LineScope::Unscoped, &[None, None, None], Some(2)).is_err());
        assert!(check_line_invariants(LineScope::Unscoped, &[None, None, None], None).is_ok());
    }
}
