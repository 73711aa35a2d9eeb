//! Integration tests for load balancing
//!
//! Line scores are driven through real traffic: inbound messages open
//! conversations, outbound messages add to the message rate.

mod common;

use common::*;
use serial_test::serial;

use linepool_line_engine::integration::event_types;
use linepool_line_engine::prelude::*;

/// Open `conversations` conversations on the line, then pad the last hour's
/// message count up to `messages`
async fn drive_traffic(h: &Harness, line: &Line, conversations: usize, messages: usize) {
    for i in 0..conversations {
        let contact = format!("+55119{:03}{:05}", line.id.0, i);
        let delivery = h.engine.route_inbound_message(line.id, &contact).await.expect("route");
        assert!(delivery.conversation_id.is_some(), "line {} has nobody online", line.id);
    }
    for _ in conversations..messages {
        h.engine.record_outbound_message(line.id, None).await.expect("outbound");
    }
}

/// Line X at score 90 with operators A and B
async fn busy_line(h: &Harness) -> (Line, Operator, Operator) {
    let x = h.line("+5511900000001").await;
    let a = h.online_operator("a", None).await;
    let b = h.online_operator("b", None).await;
    h.assign(&x, &a).await.expect("a");
    h.assign(&x, &b).await.expect("b");
    drive_traffic(h, &x, 10, 150).await;
    (x, a, b)
}

#[tokio::test]
#[serial]
async fn test_load_score_from_traffic() {
    let h = Harness::new().await;
    let (x, _a, _b) = busy_line(&h).await;

    let load = h.engine.line_load(x.id).await.expect("load");

    assert_eq!(load.bound_operators, 2);
    assert_eq!(load.active_conversations, 10);
    assert!((load.messages_per_minute - 2.5).abs() < 1e-9);
    assert!((load.load_score - 90.0).abs() < 1e-9);
}

#[tokio::test]
#[serial]
async fn test_switch_to_lighter_line() {
    let h = Harness::new().await;
    let (x, a, _b) = busy_line(&h).await;
    let y = h.line("+5511900000002").await;
    let c = h.online_operator("c", None).await;
    h.assign(&y, &c).await.expect("c");
    drive_traffic(&h, &y, 5, 5).await;
    h.notifications();

    let outcome = h.engine.switch_line_if_needed(a.id).await.expect("switch");

    let SwitchOutcome::Switched { from, to, from_score, to_score } = outcome else {
        panic!("expected a switch, got {:?}", outcome);
    };
    assert_eq!((from, to), (x.id, y.id));
    assert!((from_score - 90.0).abs() < 1e-9);
    assert!(to_score < 41.0);

    assert!(!h.bound(&x).await.contains(&a.id));
    assert!(h.bound(&y).await.contains(&a.id));
    assert_eq!(h.reload_operator(&a).await.current_line_id, Some(y.id));
    assert_eq!(h.audit.count(event_types::LINE_SWITCHED), 1);
    assert!(has_notification(&h.notifications(), a.id, NotificationEvent::LineSwitched));
    h.assert_invariants().await;
}

#[tokio::test]
#[serial]
async fn test_no_switch_without_enough_gap() {
    let h = Harness::new().await;
    let (x, a, _b) = busy_line(&h).await;
    let y = h.line("+5511900000002").await;
    let c = h.online_operator("c", None).await;
    h.assign(&y, &c).await.expect("c");
    drive_traffic(&h, &y, 10, 300).await;

    assert!((h.engine.line_load(y.id).await.expect("load").load_score - 75.0).abs() < 1e-9);

    let outcome = h.engine.switch_line_if_needed(a.id).await.expect("switch");

    assert!(matches!(outcome, SwitchOutcome::NoCandidate { .. }));
    assert!(h.bound(&x).await.contains(&a.id));
    assert_eq!(h.audit.count(event_types::LINE_SWITCHED), 0);
}

#[tokio::test]
#[serial]
async fn test_light_line_stays_put() {
    let h = Harness::new().await;
    let x = h.line("+5511900000001").await;
    h.line("+5511900000002").await;
    let a = h.online_operator("a", None).await;
    h.assign(&x, &a).await.expect("a");

    let outcome = h.engine.switch_line_if_needed(a.id).await.expect("switch");

    assert!(matches!(outcome, SwitchOutcome::Balanced { .. }));
}

#[tokio::test]
#[serial]
async fn test_switch_not_applicable_without_line() {
    let h = Harness::new().await;
    let a = h.online_operator("a", None).await;

    let outcome = h.engine.switch_line_if_needed(a.id).await.expect("switch");

    assert_eq!(outcome, SwitchOutcome::NotApplicable);
}

#[tokio::test]
#[serial]
async fn test_switch_respects_segments() {
    let h = Harness::new().await;
    let x = h.line("+5511900000001").await;
    let a = h.online_operator("a", Some(7)).await;
    let b = h.online_operator("b", Some(7)).await;
    h.assign(&x, &a).await.expect("a");
    h.assign(&x, &b).await.expect("b");
    drive_traffic(&h, &x, 10, 150).await;
    h.scoped_line("+5511900000002", 9).await;

    let outcome = h.engine.switch_line_if_needed(a.id).await.expect("switch");

    assert!(matches!(outcome, SwitchOutcome::NoCandidate { .. }));
}

#[tokio::test]
#[serial]
async fn test_balance_sweep_relieves_overloaded_line() {
    let h = Harness::new().await;
    let (x, a, b) = busy_line(&h).await;
    let y = h.line("+5511900000002").await;
    let c = h.online_operator("c", None).await;
    h.assign(&y, &c).await.expect("c");
    drive_traffic(&h, &y, 5, 5).await;
    let z = h.line("+5511900000003").await;

    let report = h.engine.run_balance_sweep().await.expect("sweep");

    assert!(!report.skipped);
    assert_eq!(report.examined, 3);
    assert_eq!(report.overloaded, 1);
    assert_eq!(report.switched, vec![(a.id, x.id, z.id)]);
    assert_eq!(h.bound(&x).await, vec![b.id]);
    assert!(h.engine.line_load(x.id).await.expect("load").load_score <= 70.0);
    h.assert_invariants().await;
}

#[tokio::test]
#[serial]
async fn test_balance_sweep_leaves_line_below_switch_threshold() {
    let h = Harness::new().await;
    let x = h.line("+5511900000001").await;
    let a = h.online_operator("a", None).await;
    let b = h.online_operator("b", None).await;
    h.assign(&x, &a).await.expect("a");
    h.assign(&x, &b).await.expect("b");
    drive_traffic(&h, &x, 8, 8).await;
    h.line("+5511900000002").await;

    let score = h.engine.line_load(x.id).await.expect("load").load_score;
    assert!(score > 70.0 && score < 80.0, "score {}", score);

    let report = h.engine.run_balance_sweep().await.expect("sweep");

    assert_eq!(report.examined, 2);
    assert_eq!(report.overloaded, 1);
    assert!(report.switched.is_empty());
    assert_eq!(h.bound(&x).await, vec![a.id, b.id]);
    assert!(matches!(
        h.engine.switch_line_if_needed(a.id).await.expect("switch"),
        SwitchOutcome::Balanced { .. }
    ));
    assert_eq!(h.audit.count(event_types::LINE_SWITCHED), 0);
}
