//! Load scoring
//!
//! A line's load score blends three saturating components:
//!
//! | component               | weight | saturates at |
//! |-------------------------|--------|--------------|
//! | bound operators         | 50     | 2            |
//! | open conversations      | 30     | 10           |
//! | messages / minute (1h)  | 20     | 5            |

use serde::{Deserialize, Serialize};

use crate::types::LineId;

const OPERATOR_WEIGHT: f64 = 50.0;
const OPERATOR_SATURATION: f64 = 2.0;
const CONVERSATION_WEIGHT: f64 = 30.0;
const CONVERSATION_SATURATION: f64 = 10.0;
const MESSAGE_RATE_WEIGHT: f64 = 20.0;
const MESSAGE_RATE_SATURATION: f64 = 5.0;

/// Derived load of one line; never persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadSnapshot {
    pub line_id: LineId,
    pub bound_operators: usize,
    pub active_conversations: usize,
    pub messages_per_minute: f64,
    /// 0 to 100
    pub load_score: f64,
}

impl LoadSnapshot {
    pub fn new(line_id: LineId, bound_operators: usize, active_conversations: usize, messages_per_minute: f64) -> Self {
        Self {
            line_id,
            bound_operators,
            active_conversations,
            messages_per_minute,
            load_score: load_score(bound_operators, active_conversations, messages_per_minute),
        }
    }
}

fn saturate(value: f64, at: f64) -> f64 {
    (value / at).clamp(0.0, 1.0)
}

/// Score in `[0, 100]`
pub fn load_score(bound_operators: usize, active_conversations: usize, messages_per_minute: f64) -> f64 {
    OPERATOR_WEIGHT * saturate(bound_operators as f64, OPERATOR_SATURATION)
        + CONVERSATION_WEIGHT * saturate(active_conversations as f64, CONVERSATION_SATURATION)
        + MESSAGE_RATE_WEIGHT * saturate(messages_per_minute, MESSAGE_RATE_SATURATION)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_line_scores_zero() {
        assert_eq!(load_score(0, 0, 0.0), 0.0);
    }

    #[test]
    fn test_components_saturate() {
        assert_eq!(load_score(2, 10, 5.0), 100.0);
        assert_eq!(load_score(7, 400, 90.0), 100.0);
    }

    #[test]
    fn test_partial_load() {
        // one operator, five conversations, 2.5 msg/min
        let score = load_score(1, 5, 2.5);
        assert!((score - 50.0).abs() < f64::EPSILON);

        let snapshot = LoadSnapshot::new(LineId(3), 2, 5, 0.0);
        assert!((snapshot.load_score - 65.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_negative_rate_clamps() {
        assert_eq!(load_score(0, 0, -3.0), 0.0);
    }
}
