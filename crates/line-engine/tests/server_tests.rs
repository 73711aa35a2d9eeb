//! Integration tests for the server lifecycle and its periodic loops

mod common;

use std::time::Duration;

use common::*;
use serial_test::serial;

use linepool_line_engine::prelude::*;

#[tokio::test]
#[serial]
async fn test_server_start_stop() {
    let mut server = LineEngineServerBuilder::new()
        .with_config(test_config())
        .with_in_memory_database()
        .offline()
        .build()
        .await
        .expect("build server");

    assert!(!server.is_running());
    server.start().await.expect("start");
    assert!(server.is_running());

    let err = server.start().await.expect_err("second start");
    assert!(matches!(err, LineEngineError::Internal(_)));

    server.stop().await.expect("stop");
    assert!(!server.is_running());
}

#[tokio::test]
#[serial]
async fn test_builder_requires_config() {
    let result = LineEngineServerBuilder::default().offline().build().await;

    assert!(matches!(result, Err(LineEngineError::Config(_))));
}

#[tokio::test]
#[serial]
async fn test_periodic_drain_serves_waiting_operators() {
    let mut config = test_config();
    config.queue.process_interval_ms = 20;
    let h = Harness::with_config(config).await;

    let a = h.operator("a", None).await;
    let outcome = h.engine.operator_connected(a.id).await.expect("connect");
    assert!(matches!(outcome, RequestOutcome::Queued(_)));
    let line = h.line("+5511900000001").await;

    let mut server = LineEngineServer::from_engine(h.engine.clone());
    server.start().await.expect("start");
    tokio::time::sleep(Duration::from_millis(200)).await;
    server.stop().await.expect("stop");

    assert_eq!(h.bound(&line).await, vec![a.id]);
    assert_eq!(h.engine.queue_position(a.id).await.expect("position"), None);
}

#[tokio::test]
#[serial]
async fn test_balancer_loop_can_be_disabled() {
    let mut config = test_config();
    config.balancer.enabled = false;
    let h = Harness::with_config(config).await;

    let mut server = LineEngineServer::from_engine(h.engine.clone());
    server.start().await.expect("start");

    assert!(server.is_running());
    assert!(!server.config().balancer.enabled);
    server.stop().await.expect("stop");
}
