//! Resource publishing through the controller: device opens, screen share
//! exclusivity, failures, and release during teardown.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use classroom_client::devices::CaptureKind;
use classroom_client::errors::SessionError;
use classroom_client::lifecycle::{LeaveOutcome, SessionState, TeardownStep};
use classroom_client::overlays::Severity;
use classroom_test_utils::*;
use std::time::Duration;

async fn let_tasks_run() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

#[tokio::test(start_paused = true)]
async fn test_microphone_and_camera_are_published_when_connected() {
    let harness = TestHarness::new();
    let handle = harness.spawn_connected().await;

    handle.set_desired(CaptureKind::Microphone, true).await.unwrap();
    handle.set_desired(CaptureKind::Camera, true).await.unwrap();
    wait_for_snapshot(&handle, |s| s.published.len() == 2).await;

    assert_eq!(
        handle.published_resources().await.unwrap(),
        vec![CaptureKind::Microphone, CaptureKind::Camera]
    );
    assert_eq!(
        harness.transport.published(),
        vec![CaptureKind::Microphone, CaptureKind::Camera]
    );
}

#[tokio::test(start_paused = true)]
async fn test_screen_share_replaces_camera() {
    let harness = TestHarness::new();
    let handle = harness.spawn_connected().await;

    handle.set_desired(CaptureKind::Camera, true).await.unwrap();
    wait_for_snapshot(&handle, |s| s.published == vec![CaptureKind::Camera]).await;

    handle.set_desired(CaptureKind::Screen, true).await.unwrap();
    wait_for_snapshot(&handle, |s| s.published == vec![CaptureKind::Screen]).await;

    assert_eq!(harness.transport.published(), vec![CaptureKind::Screen]);
    // The camera stays wanted and open, just not published.
    assert_eq!(
        handle.snapshot().desired,
        vec![CaptureKind::Camera, CaptureKind::Screen]
    );
    assert_eq!(harness.devices.live_handles(CaptureKind::Camera), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stopping_screen_share_republishes_camera() {
    let harness = TestHarness::new();
    let handle = harness.spawn_connected().await;

    handle.set_desired(CaptureKind::Camera, true).await.unwrap();
    handle.set_desired(CaptureKind::Screen, true).await.unwrap();
    wait_for_snapshot(&handle, |s| s.published == vec![CaptureKind::Screen]).await;

    handle.set_desired(CaptureKind::Screen, false).await.unwrap();
    wait_for_snapshot(&handle, |s| s.published == vec![CaptureKind::Camera]).await;

    assert_eq!(harness.transport.published(), vec![CaptureKind::Camera]);
    assert_eq!(harness.devices.live_handles(CaptureKind::Screen), 0);
}

#[tokio::test(start_paused = true)]
async fn test_denied_device_notifies_and_stays_off() {
    let harness = TestHarness::new();
    harness
        .devices
        .set_behavior(CaptureKind::Camera, DeviceBehavior::Deny);
    let handle = harness.spawn_connected().await;

    handle.set_desired(CaptureKind::Camera, true).await.unwrap();
    let_tasks_run().await;

    let snapshot = handle.snapshot();
    assert_eq!(snapshot.state, SessionState::Connected);
    assert!(snapshot.published.is_empty());
    assert!(snapshot.desired.is_empty());
    assert!(handle
        .notifications()
        .entries()
        .iter()
        .any(|n| n.severity == Severity::Error));
}

#[tokio::test(start_paused = true)]
async fn test_publish_failure_notifies_without_failing_session() {
    let harness = TestHarness::new();
    harness.transport.fail_publish_of(CaptureKind::Microphone);
    let handle = harness.spawn_connected().await;

    handle.set_desired(CaptureKind::Microphone, true).await.unwrap();
    let_tasks_run().await;

    let snapshot = handle.snapshot();
    assert_eq!(snapshot.state, SessionState::Connected);
    assert!(snapshot.published.is_empty());
    assert_eq!(handle.notifications().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_set_desired_while_idle_is_rejected() {
    let harness = TestHarness::new();
    let handle = harness.spawn();

    let err = handle
        .set_desired(CaptureKind::Microphone, true)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SessionError::InvalidState {
            operation: "set_desired",
            state: SessionState::Idle
        }
    ));
    assert_eq!(harness.devices.open_count(CaptureKind::Microphone), 0);
}

#[tokio::test(start_paused = true)]
async fn test_preview_before_join_is_not_published_and_released_on_leave() {
    let harness = TestHarness::new();
    harness.credentials.set_hang(true);
    let handle = harness.spawn();

    handle
        .request_join(test_identity(), test_channel())
        .await
        .unwrap();
    handle.set_desired(CaptureKind::Microphone, true).await.unwrap();
    let_tasks_run().await;

    let snapshot = handle.snapshot();
    assert_eq!(snapshot.state, SessionState::FetchingCredentials);
    assert_eq!(snapshot.desired, vec![CaptureKind::Microphone]);
    assert!(snapshot.published.is_empty());
    assert_eq!(harness.devices.live_handles(CaptureKind::Microphone), 1);

    handle.request_leave().await.unwrap();

    assert_eq!(harness.devices.live_handles(CaptureKind::Microphone), 0);
    assert!(harness.transport.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_credential_failure_releases_preview() {
    let harness = TestHarness::new();
    harness.credentials.fail_times(&transient_error(), 4);
    let handle = harness.spawn();

    handle
        .request_join(test_identity(), test_channel())
        .await
        .unwrap();
    handle.set_desired(CaptureKind::Microphone, true).await.unwrap();
    let_tasks_run().await;
    assert_eq!(harness.devices.live_handles(CaptureKind::Microphone), 1);

    wait_for_state(&handle, SessionState::Failed).await;

    assert_eq!(harness.devices.live_handles(CaptureKind::Microphone), 0);
    assert!(handle.snapshot().desired.is_empty());
    assert!(harness.transport.calls().is_empty());

    // Turning off is still accepted, turning on is not.
    handle
        .set_desired(CaptureKind::Microphone, false)
        .await
        .unwrap();
    let err = handle
        .set_desired(CaptureKind::Microphone, true)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::InvalidState {
            operation: "set_desired",
            state: SessionState::Failed
        }
    ));
    assert_eq!(harness.devices.open_count(CaptureKind::Microphone), 1);
}

#[tokio::test(start_paused = true)]
async fn test_device_granted_after_leave_is_closed_and_never_published() {
    let harness = TestHarness::new();
    let gate = harness.devices.gate(CaptureKind::Microphone);
    let handle = harness.spawn_connected().await;

    handle.set_desired(CaptureKind::Microphone, true).await.unwrap();
    let outcome = handle.request_leave().await.unwrap();
    assert!(matches!(outcome, LeaveOutcome::Completed(_)));

    gate.notify_one();
    let_tasks_run().await;

    assert_eq!(harness.devices.open_count(CaptureKind::Microphone), 1);
    assert_eq!(harness.devices.live_handles(CaptureKind::Microphone), 0);
    assert!(harness.transport.published().is_empty());
    assert!(handle.published_resources().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_device_granted_after_dispose_is_closed() {
    let harness = TestHarness::new();
    let gate = harness.devices.gate(CaptureKind::Camera);
    let handle = harness.spawn_connected().await;

    handle.set_desired(CaptureKind::Camera, true).await.unwrap();
    handle.dispose().await;

    gate.notify_one();
    let_tasks_run().await;

    assert_eq!(harness.devices.open_count(CaptureKind::Camera), 1);
    assert_eq!(harness.devices.live_handles(CaptureKind::Camera), 0);
}

#[tokio::test(start_paused = true)]
async fn test_teardown_continues_past_failing_device() {
    let harness = TestHarness::new();
    harness.devices.fail_close_of(CaptureKind::Camera);
    let handle = harness.spawn_connected().await;

    handle.set_desired(CaptureKind::Microphone, true).await.unwrap();
    handle.set_desired(CaptureKind::Camera, true).await.unwrap();
    wait_for_snapshot(&handle, |s| s.published.len() == 2).await;

    let outcome = handle.request_leave().await.unwrap();
    let LeaveOutcome::Completed(report) = outcome else {
        panic!("expected a teardown, got {outcome:?}");
    };

    assert_eq!(report.failed_steps(), vec![TeardownStep::ReleaseCamera]);
    assert!(report.completed.contains(&TeardownStep::LeaveTransport));
    assert!(report.completed.contains(&TeardownStep::ClearCredentials));

    assert_eq!(harness.transport.leave_count(), 1);
    assert!(harness.transport.published().is_empty());
    assert_eq!(harness.devices.live_handles(CaptureKind::Microphone), 0);

    let snapshot = handle.snapshot();
    assert_eq!(snapshot.state, SessionState::Idle);
    assert!(snapshot.channel_name.is_none());
    assert!(snapshot.published.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_visible_notifications_are_bounded() {
    let harness = TestHarness::new();
    for kind in CaptureKind::ALL {
        harness.devices.set_behavior(kind, DeviceBehavior::Unavailable);
    }
    let handle = harness.spawn_connected().await;

    for _ in 0..2 {
        for kind in CaptureKind::ALL {
            handle.set_desired(kind, true).await.unwrap();
            let_tasks_run().await;
        }
    }

    assert_eq!(handle.notifications().len(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_notifications_expire() {
    let harness = TestHarness::new();
    harness
        .devices
        .set_behavior(CaptureKind::Screen, DeviceBehavior::Deny);
    let handle = harness.spawn_connected().await;

    handle.set_desired(CaptureKind::Screen, true).await.unwrap();
    let_tasks_run().await;
    assert_eq!(handle.notifications().len(), 1);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(handle.notifications().is_empty());
}
