//! Integration tests for the framed v8 pipe transport.
//!
//! Each test runs a fake controller on its own pair of Unix sockets.

use farmware_tools::rpc::RESPONSE_ERROR_LOG_LABEL;
use farmware_tools::{
    Device, Error, FakeController, Reply, ReplyPolicy, RpcConfig, Transport, commands,
};
use serde_json::json;
use std::time::{Duration, Instant};
use tokio::time::timeout;

fn fast_rpc() -> RpcConfig {
    RpcConfig {
        reply_timeout: Duration::from_millis(500),
        connect_timeout: Duration::from_secs(2),
    }
}

async fn connect(controller: &FakeController) -> Device {
    Device::connect_with(&controller.env(), fast_rpc())
        .await
        .expect("connect to fake controller")
}

#[tokio::test]
async fn test_dispatch_receives_rpc_ok() {
    let controller = FakeController::start().await;
    let device = connect(&controller).await;
    assert_eq!(device.transport().name(), "piped");

    let dispatched = timeout(
        Duration::from_secs(5),
        device.dispatch_labeled(commands::take_photo(), "photo-1"),
    )
    .await
    .expect("timeout")
    .expect("dispatch");

    assert_eq!(
        dispatched.reply,
        Reply::Received(json!({"kind": "rpc_ok", "args": {"label": "photo-1"}}))
    );

    let requests = controller.requests().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0],
        json!({
            "kind": "rpc_request",
            "args": {"label": "photo-1"},
            "body": [{"kind": "take_photo", "args": {}}]
        })
    );
}

#[tokio::test]
async fn test_generated_labels_round_trip() {
    let controller = FakeController::start().await;
    let device = connect(&controller).await;

    let first = device.dispatch(commands::sync()).await.expect("dispatch");
    let second = device.dispatch(commands::read_status()).await.expect("dispatch");
    assert_ne!(first.label(), second.label());

    let Reply::Received(reply) = &second.reply else {
        panic!("expected a reply, got {:?}", second.reply);
    };
    assert_eq!(reply["args"]["label"], second.label());
}

#[tokio::test]
async fn test_silent_controller_times_out_without_failing() {
    let controller = FakeController::start().await;
    controller.set_policy(ReplyPolicy::Silent).await;
    let device = connect(&controller).await;

    let start = Instant::now();
    let dispatched = device
        .dispatch(commands::wait(100))
        .await
        .expect("timeout is not an error");
    assert_eq!(dispatched.reply, Reply::NoResponse);
    assert!(start.elapsed() >= fast_rpc().reply_timeout);
    assert_eq!(controller.requests().await.len(), 1);

    let Transport::Piped(pipe) = device.transport() else {
        panic!("expected the pipe transport");
    };
    assert_eq!(pipe.pending().waiting(), 0);
}

#[tokio::test]
async fn test_late_reply_is_parked_not_misrouted() {
    let controller = FakeController::start().await;
    controller.set_policy(ReplyPolicy::Silent).await;
    let device = connect(&controller).await;

    let dispatched = device.dispatch(commands::sync()).await.expect("dispatch");
    assert_eq!(dispatched.reply, Reply::NoResponse);

    controller
        .push_reply(&json!({"kind": "rpc_ok", "args": {"label": dispatched.label()}}))
        .await;

    let Transport::Piped(pipe) = device.transport() else {
        panic!("expected the pipe transport");
    };
    for _ in 0..50 {
        if pipe.pending().unclaimed() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(pipe.pending().unclaimed(), 1);
}

#[tokio::test]
async fn test_rpc_error_is_remote_error_and_logged_once() {
    let controller = FakeController::start().await;
    controller
        .set_policy(ReplyPolicy::Error("pin is locked".into()))
        .await;
    let device = connect(&controller).await;

    let err = device
        .dispatch_labeled(commands::toggle_pin(13).expect("valid"), "toggle")
        .await
        .expect_err("rpc_error is fatal");
    match err {
        Error::Remote { endpoint, status } => {
            assert_eq!(endpoint, "toggle_pin");
            assert_eq!(status, "pin is locked");
        }
        other => panic!("unexpected error {other:?}"),
    }

    let requests = controller.requests().await;
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0]["args"]["label"], "toggle");
    assert_eq!(requests[1]["args"]["label"], RESPONSE_ERROR_LOG_LABEL);
    assert_eq!(requests[1]["body"][0]["kind"], "send_message");
    assert_eq!(requests[1]["body"][0]["args"]["message_type"], "error");
}

#[tokio::test]
async fn test_concurrent_dispatches_match_by_label() {
    let controller = FakeController::start().await;
    let device = connect(&controller).await;

    let (a, b, c) = tokio::join!(
        device.dispatch_labeled(commands::sync(), "a"),
        device.dispatch_labeled(commands::take_photo(), "b"),
        device.dispatch_labeled(commands::read_status(), "c"),
    );
    for (dispatched, label) in [(a, "a"), (b, "b"), (c, "c")] {
        let dispatched = dispatched.expect("dispatch");
        let Reply::Received(reply) = dispatched.reply else {
            panic!("no reply for {label}");
        };
        assert_eq!(reply["args"]["label"], label);
    }
    assert_eq!(controller.requests().await.len(), 3);
}

#[tokio::test]
async fn test_invalid_command_never_reaches_controller() {
    let controller = FakeController::start().await;
    let device = connect(&controller).await;

    assert!(commands::home("w").is_err());
    let err = device
        .send_celery_script(&json!({"kind": "home", "body": []}))
        .await
        .expect_err("missing args");
    assert!(matches!(err, Error::Validation { .. }));
    assert!(controller.requests().await.is_empty());
}

#[tokio::test]
async fn test_missing_pipe_is_connect_error() {
    let env = farmware_tools::Env::from_vars([
        ("FARMBOT_OS_VERSION", "8.0.0"),
        ("FARMWARE_API_V2_REQUEST_PIPE", "/tmp/farmware-test-missing-request.sock"),
        ("FARMWARE_API_V2_RESPONSE_PIPE", "/tmp/farmware-test-missing-response.sock"),
    ]);
    let result = Device::connect_with(&env, fast_rpc()).await;
    assert!(matches!(result, Err(Error::Connect { .. })));
}

#[tokio::test]
async fn test_listener_stops_when_controller_closes_pipe() {
    let controller = FakeController::start().await;
    let device = connect(&controller).await;
    // Make sure the response pipe is connected before closing it.
    device.dispatch(commands::sync()).await.expect("dispatch");

    controller.close_response().await;

    let Transport::Piped(pipe) = device.transport() else {
        panic!("expected the pipe transport");
    };
    for _ in 0..100 {
        if !pipe.is_listening() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!pipe.is_listening());
    assert!(pipe.pending().is_closed());

    let start = Instant::now();
    let err = device
        .dispatch(commands::sync())
        .await
        .expect_err("closed response pipe is fatal");
    assert!(matches!(err, Error::ResponseClosed));
    assert!(start.elapsed() < fast_rpc().reply_timeout);
    assert_eq!(controller.requests().await.len(), 1);
}

#[tokio::test]
async fn test_invalid_json_frame_does_not_stop_listener() {
    let controller = FakeController::start().await;
    let device = connect(&controller).await;
    device.dispatch(commands::sync()).await.expect("dispatch");

    let mut bad = vec![0xFB, 0xFB, 0, 0, 0, 0];
    bad.extend_from_slice(&8u32.to_be_bytes());
    bad.extend_from_slice(b"not json");
    controller.push_raw(&bad).await;

    let dispatched = device
        .dispatch_labeled(commands::read_status(), "after-bad-frame")
        .await
        .expect("dispatch");
    assert_eq!(
        dispatched.reply,
        Reply::Received(json!({"kind": "rpc_ok", "args": {"label": "after-bad-frame"}}))
    );
    let Transport::Piped(pipe) = device.transport() else {
        panic!("expected the pipe transport");
    };
    assert!(pipe.is_listening());
}

#[tokio::test]
async fn test_concurrent_dispatches_sharing_a_label_all_get_replies() {
    let controller = FakeController::start().await;
    let device = connect(&controller).await;

    let (a, b) = tokio::join!(
        device.dispatch_labeled(commands::sync(), "shared"),
        device.dispatch_labeled(commands::read_status(), "shared"),
    );
    for dispatched in [a, b] {
        let dispatched = dispatched.expect("dispatch");
        assert!(
            matches!(dispatched.reply, Reply::Received(_)),
            "got {:?}",
            dispatched.reply
        );
    }
    let Transport::Piped(pipe) = device.transport() else {
        panic!("expected the pipe transport");
    };
    assert_eq!(pipe.pending().waiting(), 0);
    assert_eq!(pipe.pending().unclaimed(), 0);
}
