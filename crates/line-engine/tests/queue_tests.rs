//! Integration tests for the waiting queue
//!
//! Admission, ordering, draining into freed lines and expiry.

mod common;

use common::*;
use serial_test::serial;

use linepool_line_engine::config::SegmentPolicyConfig;
use linepool_line_engine::integration::event_types;
use linepool_line_engine::prelude::*;

#[tokio::test]
#[serial]
async fn test_queue_positions_follow_arrival() {
    let h = Harness::new().await;
    let a = h.operator("a", None).await;
    let b = h.operator("b", None).await;
    let c = h.operator("c", None).await;

    for (operator, expected) in [(&a, 0), (&b, 1), (&c, 2)] {
        let outcome = h.engine.operator_connected(operator.id).await.expect("connect");
        match outcome {
            RequestOutcome::Queued(admission) => assert_eq!(admission.position(), Some(expected)),
            other => panic!("expected to be queued, got {:?}", other),
        }
    }

    assert_eq!(h.engine.queue_position(c.id).await.expect("position"), Some(2));
    let notifications = h.notifications();
    assert!(has_notification(&notifications, a.id, NotificationEvent::QueueJoined));
    assert!(has_notification(&notifications, c.id, NotificationEvent::QueueJoined));
}

#[tokio::test]
#[serial]
async fn test_operator_waits_at_most_once() {
    let h = Harness::new().await;
    let a = h.operator("a", None).await;
    let queue = h.engine.queue();

    let first = queue.add_to_queue(a.id, None, 0).await.expect("enqueue");
    let second = queue.add_to_queue(a.id, None, 0).await.expect("enqueue again");

    let QueueAdmission::Enqueued { entry_id, .. } = first else {
        panic!("expected a new entry, got {:?}", first);
    };
    assert_eq!(second, QueueAdmission::AlreadyWaiting { entry_id, position: 0 });
    assert_eq!(h.engine.queue_stats().await.expect("stats").total_waiting, 1);
}

#[tokio::test]
#[serial]
async fn test_admin_is_rejected_by_queue() {
    let h = Harness::new().await;
    let admin = h
        .engine
        .operators()
        .create_operator(NewOperator::admin("root"))
        .await
        .expect("admin");

    let admission = h.engine.queue().add_to_queue(admin.id, None, 0).await.expect("add");

    assert!(matches!(admission, QueueAdmission::Rejected { .. }));
    assert_eq!(admission.position(), None);
    assert_eq!(h.engine.queue_position(admin.id).await.expect("position"), None);
}

#[tokio::test]
#[serial]
async fn test_priority_goes_first() {
    let h = Harness::new().await;
    let a = h.operator("a", None).await;
    let b = h.operator("b", None).await;
    let urgent = h.operator("urgent", None).await;
    let queue = h.engine.queue();

    queue.add_to_queue(a.id, None, 0).await.expect("a");
    queue.add_to_queue(b.id, None, 0).await.expect("b");
    let admission = queue.add_to_queue(urgent.id, None, 5).await.expect("urgent");

    assert_eq!(admission.position(), Some(0));
    assert_eq!(queue.get_position(a.id).await.expect("a position"), Some(1));
    assert_eq!(queue.get_position(b.id).await.expect("b position"), Some(2));
}

#[tokio::test]
#[serial]
async fn test_drain_serves_in_order() {
    let h = Harness::new().await;
    let a = h.operator("a", None).await;
    let b = h.operator("b", None).await;
    let c = h.operator("c", None).await;
    for operator in [&a, &b, &c] {
        h.engine.operator_connected(operator.id).await.expect("connect");
    }

    let reserve = h.provision(NewLine::new("+5511900000001", "evolution").reserve()).await;
    let report = h.engine.drain_queue().await.expect("drain");

    assert_eq!(report.assigned, vec![(a.id, reserve.id)]);
    assert_eq!(h.engine.queue_position(b.id).await.expect("b"), Some(0));
    assert_eq!(h.engine.queue_position(c.id).await.expect("c"), Some(1));
    assert_eq!(h.engine.queue_position(a.id).await.expect("a"), None);

    let shared = h.line("+5511900000002").await;
    let report = h.engine.drain_queue().await.expect("drain");
    assert_eq!(report.assigned, vec![(b.id, shared.id), (c.id, shared.id)]);
    assert_eq!(h.engine.queue_stats().await.expect("stats").total_waiting, 0);
    h.assert_invariants().await;
}

#[tokio::test]
#[serial]
async fn test_newcomer_does_not_jump_the_queue() {
    let h = Harness::new().await;
    let waiting = h.operator("waiting", None).await;
    h.engine.operator_connected(waiting.id).await.expect("connect");

    let line = h.line("+5511900000001").await;
    let newcomer = h.operator("newcomer", None).await;
    let outcome = h.engine.operator_connected(newcomer.id).await.expect("connect");

    assert!(matches!(outcome, RequestOutcome::Queued(QueueAdmission::Enqueued { position: 1, .. })));
    assert!(h.bound(&line).await.is_empty());

    let report = h.engine.drain_queue().await.expect("drain");
    assert_eq!(report.assigned, vec![(waiting.id, line.id), (newcomer.id, line.id)]);
}

#[tokio::test]
#[serial]
async fn test_other_segments_do_not_block() {
    let h = Harness::new().await;
    let seven = h.operator("seven", Some(7)).await;
    h.engine.operator_connected(seven.id).await.expect("connect");

    let line = h.scoped_line("+5511900000001", 9).await;
    let nine = h.operator("nine", Some(9)).await;
    let outcome = h.engine.operator_connected(nine.id).await.expect("connect");

    assert_eq!(outcome.line().map(|l| l.id), Some(line.id));
    assert_eq!(h.engine.queue_position(seven.id).await.expect("position"), Some(0));
}

#[tokio::test]
#[serial]
async fn test_drain_respects_segments() {
    let h = Harness::new().await;
    let seven = h.operator("seven", Some(7)).await;
    let nine = h.operator("nine", Some(9)).await;
    h.engine.operator_connected(seven.id).await.expect("seven");
    h.engine.operator_connected(nine.id).await.expect("nine");

    let line = h.scoped_line("+5511900000001", 9).await;
    let report = h.engine.drain_queue().await.expect("drain");

    assert_eq!(report.assigned, vec![(nine.id, line.id)]);
    assert_eq!(h.engine.queue_position(seven.id).await.expect("position"), Some(0));
    h.assert_invariants().await;
}

#[tokio::test]
#[serial]
async fn test_drain_skips_disabled_segments() {
    let h = Harness::new().await;
    let seven = h.operator("seven", Some(7)).await;
    h.engine.queue().add_to_queue(seven.id, Some(SegmentId(7)), 0).await.expect("enqueue");
    h.set_segment_policy(
        7,
        SegmentPolicyConfig {
            allocation_enabled: false,
            max_operators_per_line: 2,
            active_providers: None,
        },
    );
    let line = h.line("+5511900000001").await;

    let report = h.engine.drain_queue().await.expect("drain");

    assert!(report.assigned.is_empty());
    assert_eq!(report.disabled, 1);
    assert!(h.bound(&line).await.is_empty());
    assert_eq!(h.engine.queue_position(seven.id).await.expect("position"), Some(0));
}

#[tokio::test]
#[serial]
async fn test_expired_entries_are_dropped() {
    let mut config = test_config();
    config.queue.entry_ttl_secs = 0;
    let h = Harness::with_config(config).await;
    let a = h.operator("a", None).await;

    h.engine.queue().add_to_queue(a.id, None, 0).await.expect("enqueue");
    h.line("+5511900000001").await;
    let report = h.engine.drain_queue().await.expect("drain");

    assert_eq!(report.expired, 1);
    assert!(report.assigned.is_empty());
    assert_eq!(h.audit.count(event_types::QUEUE_EXPIRED), 1);
    assert_eq!(h.engine.queue_position(a.id).await.expect("position"), None);
}

#[tokio::test]
#[serial]
async fn test_disconnect_withdraws_entry() {
    let h = Harness::new().await;
    let a = h.operator("a", None).await;
    let b = h.operator("b", None).await;
    h.engine.operator_connected(a.id).await.expect("a");
    h.engine.operator_connected(b.id).await.expect("b");

    h.engine.operator_disconnected(a.id).await.expect("disconnect");

    assert_eq!(h.engine.queue_position(a.id).await.expect("a"), None);
    assert_eq!(h.engine.queue_position(b.id).await.expect("b"), Some(0));
    assert!(!h.engine.queue().remove(a.id).await.expect("remove again"));
    assert!(!h.reload_operator(&a).await.is_online());
}

#[tokio::test]
#[serial]
async fn test_queue_stats_by_segment() {
    let h = Harness::new().await;
    let queue = h.engine.queue();
    for (name, segment) in [("a", Some(7)), ("b", Some(7)), ("c", None)] {
        let operator = h.operator(name, segment).await;
        queue
            .add_to_queue(operator.id, segment.map(SegmentId), 0)
            .await
            .expect("enqueue");
    }

    let stats = h.engine.queue_stats().await.expect("stats");

    assert_eq!(stats.total_waiting, 3);
    assert_eq!(stats.waiting_by_segment, vec![(None, 1), (Some(SegmentId(7)), 2)]);
    assert!(stats.longest_wait_seconds.is_some());
}

#[tokio::test]
#[serial]
async fn test_unsegmented_waiters_gate_everyone() {
    let h = Harness::new().await;
    let a = h.operator("a", None).await;
    h.engine.queue().add_to_queue(a.id, None, 0).await.expect("enqueue");
    let queue = h.engine.queue();

    assert!(queue.has_waiting(Some(SegmentId(7)), None).await.expect("segment 7"));
    assert!(queue.has_waiting(None, None).await.expect("global"));
    assert!(!queue.has_waiting(None, Some(a.id)).await.expect("excluding a"));
}
