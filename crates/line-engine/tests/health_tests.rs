//! Integration tests for line health handling
//!
//! Bans, confirmed disconnects, debounced false alarms, reallocation of the
//! affected operators and idle reclamation.

mod common;

use std::time::Duration;

use common::*;
use serial_test::serial;

use linepool_line_engine::health::OperatorOutcome;
use linepool_line_engine::integration::event_types;
use linepool_line_engine::prelude::*;

/// Line X holding operators A and B, plus an empty line Y
async fn two_lines(h: &Harness) -> (Line, Line, Operator, Operator) {
    let x = h.line("+5511900000001").await;
    let y = h.line("+5511900000002").await;
    let a = h.online_operator("a", Some(7)).await;
    let b = h.online_operator("b", Some(7)).await;
    h.assign(&x, &a).await.expect("a on x");
    h.assign(&x, &b).await.expect("b on x");
    (x, y, a, b)
}

#[tokio::test]
#[serial]
async fn test_ban_reallocates_everyone() {
    let h = Harness::new().await;
    let (x, y, a, b) = two_lines(&h).await;
    h.notifications();

    let report = h.engine.ban_line(x.id, "supervisor").await.expect("ban");

    assert!(!report.unchanged);
    assert_eq!(report.status, LineStatus::Ban);
    assert_eq!(report.reallocated(), 2);
    assert_eq!(h.audit.count(event_types::LINE_BANNED), 1);

    assert_eq!(h.reload(&x).await.status, LineStatus::Ban);
    let banned = h.engine.lines().list_by_status(LineStatus::Ban).await.expect("list");
    assert_eq!(banned.iter().map(|l| l.id).collect::<Vec<_>>(), vec![x.id]);
    assert!(h.bound(&x).await.is_empty());
    assert_eq!(h.bound(&y).await, vec![a.id, b.id]);
    assert_eq!(h.reload_operator(&a).await.current_line_id, Some(y.id));

    let notifications = h.notifications();
    assert!(has_notification(&notifications, a.id, NotificationEvent::LineReallocated));
    assert!(has_notification(&notifications, b.id, NotificationEvent::LineReallocated));
    h.assert_invariants().await;
}

#[tokio::test]
#[serial]
async fn test_ban_without_capacity_loses_operators() {
    let h = Harness::new().await;
    let x = h.line("+5511900000001").await;
    let a = h.online_operator("a", None).await;
    let b = h.online_operator("b", None).await;
    h.assign(&x, &a).await.expect("a");
    h.assign(&x, &b).await.expect("b");
    let delivery = h.engine.route_inbound_message(x.id, "+5511988887777").await.expect("route");
    assert!(delivery.conversation_id.is_some());
    h.notifications();

    let report = h.engine.ban_line(x.id, "supervisor").await.expect("ban");

    assert_eq!(report.lost(), 2);
    let closed: u64 = report
        .outcomes
        .iter()
        .map(|outcome| match outcome {
            OperatorOutcome::Lost { conversations_closed, .. } => *conversations_closed,
            OperatorOutcome::Reallocated { .. } => 0,
        })
        .sum();
    assert_eq!(closed, 1);

    let notifications = h.notifications();
    assert!(has_notification(&notifications, a.id, NotificationEvent::LineLost));
    assert!(has_notification(&notifications, b.id, NotificationEvent::LineLost));
    assert!(h.reload_operator(&a).await.current_line_id.is_none());
}

#[tokio::test]
#[serial]
async fn test_reallocation_moves_open_conversations() {
    let h = Harness::new().await;
    let x = h.line("+5511900000001").await;
    let y = h.line("+5511900000002").await;
    let a = h.online_operator("a", None).await;
    h.assign(&x, &a).await.expect("a");
    h.engine.route_inbound_message(x.id, "+5511988887777").await.expect("route");

    let report = h.engine.ban_line(x.id, "supervisor").await.expect("ban");

    assert_eq!(
        report.outcomes,
        vec![OperatorOutcome::Reallocated {
            operator_id: a.id,
            line_id: y.id,
            conversations_moved: 1,
        }]
    );
    assert_eq!(h.engine.line_load(y.id).await.expect("load").active_conversations, 1);
}

#[tokio::test]
#[serial]
async fn test_ban_is_terminal_and_idempotent() {
    let h = Harness::new().await;
    let (x, _y, _a, _b) = two_lines(&h).await;

    h.engine.ban_line(x.id, "supervisor").await.expect("ban");
    let again = h.engine.ban_line(x.id, "supervisor").await.expect("ban again");
    let reprobe = h
        .engine
        .health()
        .confirm_and_act(&h.reload(&x).await)
        .await
        .expect("reprobe");

    assert!(again.unchanged);
    assert_eq!(h.audit.count(event_types::LINE_BANNED), 1);
    assert!(matches!(reprobe, Confirmation::FalsePositive));
    assert_eq!(h.reload(&x).await.status, LineStatus::Ban);
}

#[tokio::test]
#[serial]
async fn test_ban_upgrades_disconnected_line() {
    let h = Harness::new().await;
    let x = h.line("+5511900000001").await;
    h.probe.set(&x.instance_name, ProbeReport::disconnected());

    let first = h
        .engine
        .report_send_failure(x.id, FailureSignal::Disconnected)
        .await
        .expect("send failure");
    assert!(matches!(first, Confirmation::Confirmed { signal: FailureSignal::Disconnected, .. }));
    assert_eq!(h.reload(&x).await.status, LineStatus::Disconnected);

    let report = h.engine.ban_line(x.id, "supervisor").await.expect("ban");
    assert!(!report.unchanged);
    assert_eq!(h.reload(&x).await.status, LineStatus::Ban);
}

#[tokio::test]
#[serial]
async fn test_transient_failure_is_ignored() {
    let h = Harness::new().await;
    let (x, _y, a, b) = two_lines(&h).await;
    h.probe
        .push_script(&x.instance_name, [ProbeReport::disconnected(), ProbeReport::connected()]);

    let report = h.engine.run_full_sweep().await.expect("sweep");

    assert_eq!(report.suspected, 1);
    assert_eq!(report.false_positives, 1);
    assert!(report.confirmed.is_empty());
    assert_eq!(h.reload(&x).await.status, LineStatus::Active);
    assert_eq!(h.bound(&x).await, vec![a.id, b.id]);
    assert_eq!(h.audit.count(event_types::LINE_DISCONNECTED), 0);
    assert_eq!(h.probe.calls(&x.instance_name), 2);
}

#[tokio::test]
#[serial]
async fn test_confirmed_disconnect_then_restore() {
    let h = Harness::new().await;
    let x = h.line("+5511900000001").await;
    let y = h.line("+5511900000002").await;
    let a = h.online_operator("a", None).await;
    h.assign(&x, &a).await.expect("a");
    h.probe.set(&x.instance_name, ProbeReport::disconnected());

    let report = h.engine.run_full_sweep().await.expect("sweep");

    assert_eq!(report.confirmed, vec![(x.id, FailureSignal::Disconnected)]);
    assert_eq!(h.reload(&x).await.status, LineStatus::Disconnected);
    assert_eq!(h.bound(&y).await, vec![a.id]);
    assert_eq!(h.audit.count(event_types::LINE_DISCONNECTED), 1);
    assert_eq!(h.audit.count(event_types::LINE_BANNED), 0);

    h.probe.set(&x.instance_name, ProbeReport::connected());
    let report = h.engine.run_full_sweep().await.expect("sweep");

    assert_eq!(report.restored, vec![x.id]);
    assert_eq!(h.reload(&x).await.status, LineStatus::Active);
    assert_eq!(h.audit.count(event_types::LINE_RESTORED), 1);
}

#[tokio::test]
#[serial]
async fn test_confirming_probe_decides_the_outcome() {
    let h = Harness::new().await;
    let x = h.line("+5511900000001").await;
    h.probe.set(&x.instance_name, ProbeReport::banned());

    let confirmation = h
        .engine
        .report_send_failure(x.id, FailureSignal::Disconnected)
        .await
        .expect("send failure");

    assert!(matches!(confirmation, Confirmation::Confirmed { signal: FailureSignal::Banned, .. }));
    assert_eq!(h.reload(&x).await.status, LineStatus::Ban);
}

#[tokio::test]
#[serial]
async fn test_send_failure_needs_confirmation() {
    let h = Harness::new().await;
    let (x, _y, a, _b) = two_lines(&h).await;

    let confirmation = h
        .engine
        .report_send_failure(x.id, FailureSignal::Banned)
        .await
        .expect("send failure");

    assert_eq!(confirmation, Confirmation::FalsePositive);
    assert_eq!(h.reload(&x).await.status, LineStatus::Active);
    assert!(h.bound(&x).await.contains(&a.id));
}

#[tokio::test]
#[serial]
async fn test_send_failure_on_inactive_line() {
    let h = Harness::new().await;
    let x = h.line("+5511900000001").await;
    h.engine.ban_line(x.id, "supervisor").await.expect("ban");

    let confirmation = h
        .engine
        .report_send_failure(x.id, FailureSignal::Banned)
        .await
        .expect("send failure");

    assert_eq!(confirmation, Confirmation::NotActive);
}

#[tokio::test]
#[serial]
async fn test_concurrent_failure_reports_confirm_once() {
    let h = Harness::new().await;
    let (x, _y, _a, _b) = two_lines(&h).await;
    h.probe.set(&x.instance_name, ProbeReport::banned());

    let (first, second) = tokio::join!(
        h.engine.report_send_failure(x.id, FailureSignal::Banned),
        h.engine.report_send_failure(x.id, FailureSignal::Banned),
    );
    let outcomes = [first.expect("first"), second.expect("second")];

    let pending = outcomes.iter().filter(|c| **c == Confirmation::AlreadyPending).count();
    let confirmed = outcomes
        .iter()
        .filter(|c| matches!(c, Confirmation::Confirmed { .. }))
        .count();
    assert_eq!((pending, confirmed), (1, 1));
    assert_eq!(h.audit.count(event_types::LINE_BANNED), 1);
    assert!(h.engine.health().pending_confirmations().is_empty());
}

#[tokio::test]
#[serial]
async fn test_spawned_failure_check_runs_in_background() {
    let h = Harness::new().await;
    let x = h.line("+5511900000001").await;
    h.probe.set(&x.instance_name, ProbeReport::banned());

    h.engine
        .spawn_send_failure_check(x.id, FailureSignal::Banned)
        .await
        .expect("task");

    assert_eq!(h.reload(&x).await.status, LineStatus::Ban);
}

#[tokio::test]
#[serial]
async fn test_admin_on_banned_line_is_not_reallocated() {
    let h = Harness::new().await;
    let x = h.line("+5511900000001").await;
    let y = h.line("+5511900000002").await;
    let admin = h
        .engine
        .operators()
        .create_operator(NewOperator::admin("root"))
        .await
        .expect("admin");
    h.engine.allocation().assign(x.id, admin.id).await.expect("admin on x");

    let report = h.engine.ban_line(x.id, "supervisor").await.expect("ban");

    assert_eq!(report.lost(), 1);
    assert!(h.bound(&y).await.is_empty());
    assert!(has_notification(&h.notifications(), admin.id, NotificationEvent::LineLost));
}

#[tokio::test]
#[serial]
async fn test_ban_drains_waiting_operators() {
    let h = Harness::new().await;
    let x = h.provision(NewLine::new("+5511900000001", "evolution").reserve()).await;
    let a = h.online_operator("a", Some(7)).await;
    h.assign(&x, &a).await.expect("a");

    let waiting = h.operator("waiting", Some(7)).await;
    let outcome = h.engine.operator_connected(waiting.id).await.expect("connect");
    assert!(matches!(outcome, RequestOutcome::Queued(_)));

    let y = h.line("+5511900000002").await;
    h.engine.ban_line(x.id, "supervisor").await.expect("ban");

    assert_eq!(h.bound(&y).await, vec![a.id, waiting.id]);
    assert_eq!(h.engine.queue_position(waiting.id).await.expect("position"), None);
    h.assert_invariants().await;
}

#[tokio::test]
#[serial]
async fn test_targeted_sweep_only_probes_held_lines() {
    let h = Harness::new().await;
    let held = h.line("+5511900000001").await;
    let spare = h.line("+5511900000002").await;
    let a = h.online_operator("a", None).await;
    h.assign(&held, &a).await.expect("a");

    let report = h.engine.run_targeted_sweep().await.expect("sweep");

    assert_eq!(report.checked, 1);
    assert_eq!(h.probe.calls(&held.instance_name), 1);
    assert_eq!(h.probe.calls(&spare.instance_name), 0);
}

#[tokio::test]
#[serial]
async fn test_disconnect_keeps_bindings() {
    let h = Harness::new().await;
    let x = h.line("+5511900000001").await;
    let a = h.operator("a", None).await;
    h.engine.operator_connected(a.id).await.expect("connect");

    h.engine.operator_disconnected(a.id).await.expect("disconnect");
    let report = h.engine.run_idle_reclamation().await.expect("reclaim");

    assert!(report.released.is_empty());
    assert_eq!(h.bound(&x).await, vec![a.id]);
}

#[tokio::test]
#[serial]
async fn test_idle_operators_are_released() {
    let mut config = test_config();
    config.health.idle_threshold_hours = 0;
    let h = Harness::with_config(config).await;
    let x = h.line("+5511900000001").await;
    let idle = h.operator("idle", Some(7)).await;
    let active = h.operator("active", Some(7)).await;
    h.engine.operator_connected(idle.id).await.expect("idle");
    h.engine.operator_connected(active.id).await.expect("active");
    h.engine.operator_disconnected(idle.id).await.expect("disconnect");
    tokio::time::sleep(Duration::from_millis(10)).await;

    let report = h.engine.run_idle_reclamation().await.expect("reclaim");

    assert_eq!(report.released, vec![(idle.id, x.id)]);
    assert_eq!(h.bound(&x).await, vec![active.id]);
    assert_eq!(h.audit.count(event_types::OPERATOR_IDLE_RELEASED), 1);
    assert!(h.reload_operator(&idle).await.current_line_id.is_none());
}
