//! Lifecycle controller scenarios: credential retry, transport monitoring,
//! leave and dispose.
//!
//! All tests run on paused time; backoff delays are checked through the
//! `RetryScheduled` events and the virtual clock.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use classroom_client::devices::CaptureKind;
use classroom_client::errors::SessionError;
use classroom_client::lifecycle::{LeaveOutcome, SessionEvent, SessionState};
use classroom_client::overlays::{PopupKind, Severity};
use classroom_client::transport::{TransportConnectionState, TransportEvent};
use classroom_test_utils::*;
use common::types::ParticipantId;
use std::time::Duration;
use tokio::time::Instant;

fn retry_delays(events: &[SessionEvent]) -> Vec<Duration> {
    events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::RetryScheduled { delay, .. } => Some(*delay),
            _ => None,
        })
        .collect()
}

async fn idle_for(duration: Duration) {
    tokio::time::sleep(duration).await;
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_then_success_connects_after_backoff() {
    let harness = TestHarness::new();
    harness.credentials.fail_times(&transient_error(), 2);
    let handle = harness.spawn();
    let mut events = handle.subscribe();

    let started = Instant::now();
    handle
        .request_join(test_identity(), test_channel())
        .await
        .unwrap();
    wait_for_state(&handle, SessionState::Connected).await;

    assert!(started.elapsed() >= Duration::from_secs(3));
    assert_eq!(harness.credentials.call_count(), 3);

    let snapshot = handle.snapshot();
    assert_eq!(snapshot.retry_count, 0);
    assert!(snapshot.last_error.is_none());
    assert_eq!(snapshot.channel_name.as_deref(), Some("chemistry-101"));

    let events = drain_events(&mut events);
    assert_eq!(
        retry_delays(&events),
        vec![Duration::from_secs(1), Duration::from_secs(2)]
    );
    assert!(events.contains(&SessionEvent::Connected));
    assert_eq!(harness.transport.join_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unauthorized_fails_immediately_without_retry() {
    let harness = TestHarness::new();
    harness.credentials.push_failure(unauthorized_error());
    let handle = harness.spawn();
    let mut events = handle.subscribe();

    handle
        .request_join(test_identity(), test_channel())
        .await
        .unwrap();
    wait_for_state(&handle, SessionState::Failed).await;

    idle_for(Duration::from_secs(30)).await;

    assert_eq!(harness.credentials.call_count(), 1);
    assert_eq!(handle.snapshot().state, SessionState::Failed);
    assert!(handle
        .snapshot()
        .last_error
        .unwrap()
        .contains("sign in again"));
    assert!(retry_delays(&drain_events(&mut events)).is_empty());
    assert_eq!(harness.transport.join_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_retries_exhausted_fails_with_bounded_retry_count() {
    let harness = TestHarness::new();
    harness.credentials.fail_times(&transient_error(), 4);
    let handle = harness.spawn();
    let mut events = handle.subscribe();

    handle
        .request_join(test_identity(), test_channel())
        .await
        .unwrap();
    wait_for_state(&handle, SessionState::Failed).await;

    assert_eq!(harness.credentials.call_count(), 4);
    let snapshot = handle.snapshot();
    assert_eq!(snapshot.retry_count, 3);
    assert!(snapshot.channel_name.is_none());

    let events = drain_events(&mut events);
    assert_eq!(
        retry_delays(&events),
        vec![
            Duration::from_secs(1),
            Duration::from_secs(2),
            Duration::from_secs(4)
        ]
    );
    assert!(events
        .iter()
        .any(|e| matches!(e, SessionEvent::Failed { .. })));

    let notifications = handle.notifications().entries();
    assert!(notifications.iter().any(|n| n.severity == Severity::Error));
}

#[tokio::test(start_paused = true)]
async fn test_retry_now_recovers_from_failed() {
    let harness = TestHarness::new();
    harness.credentials.fail_times(&transient_error(), 4);
    let handle = harness.spawn();

    handle
        .request_join(test_identity(), test_channel())
        .await
        .unwrap();
    wait_for_state(&handle, SessionState::Failed).await;

    handle.retry_now().await.unwrap();
    wait_for_state(&handle, SessionState::Connected).await;

    let snapshot = handle.snapshot();
    assert_eq!(snapshot.retry_count, 0);
    assert!(snapshot.last_error.is_none());
    assert_eq!(harness.credentials.call_count(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_retry_now_outside_failed_is_rejected() {
    let harness = TestHarness::new();
    let handle = harness.spawn();

    let err = handle.retry_now().await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::InvalidState {
            operation: "retry_now",
            state: SessionState::Idle
        }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_join_while_not_idle_is_rejected() {
    let harness = TestHarness::new();
    let handle = harness.spawn_connected().await;

    let err = handle
        .request_join(test_identity(), test_channel())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SessionError::InvalidState {
            state: SessionState::Connected,
            ..
        }
    ));
    assert_eq!(handle.snapshot().state, SessionState::Connected);
    assert_eq!(harness.credentials.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_fetch_timeout_is_retried() {
    let harness = TestHarness::with_config(
        config_with(&[
            ("CLASSROOM_CREDENTIAL_TIMEOUT_SECONDS", "2"),
            ("CLASSROOM_MAX_CREDENTIAL_RETRIES", "1"),
        ])
        .unwrap(),
    );
    harness.credentials.set_hang(true);
    let handle = harness.spawn();
    let mut events = handle.subscribe();

    handle
        .request_join(test_identity(), test_channel())
        .await
        .unwrap();
    wait_for_state(&handle, SessionState::Failed).await;

    assert_eq!(harness.credentials.call_count(), 2);
    assert_eq!(
        retry_delays(&drain_events(&mut events)),
        vec![Duration::from_secs(1)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_leave_during_backoff_cancels_retry() {
    let harness = TestHarness::new();
    harness.credentials.fail_times(&transient_error(), 1);
    let handle = harness.spawn();

    handle
        .request_join(test_identity(), test_channel())
        .await
        .unwrap();
    wait_for_snapshot(&handle, |s| s.retry_count == 1).await;

    let outcome = handle.request_leave().await.unwrap();
    assert!(matches!(outcome, LeaveOutcome::Completed(_)));

    idle_for(Duration::from_secs(30)).await;

    assert_eq!(harness.credentials.call_count(), 1);
    assert_eq!(handle.snapshot().state, SessionState::Idle);
    assert_eq!(handle.snapshot().retry_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_dispose_makes_pending_retry_inert() {
    let harness = TestHarness::new();
    harness.credentials.fail_times(&transient_error(), 1);
    let handle = harness.spawn();

    handle
        .request_join(test_identity(), test_channel())
        .await
        .unwrap();
    wait_for_snapshot(&handle, |s| s.retry_count == 1).await;

    handle.dispose().await;
    idle_for(Duration::from_secs(30)).await;

    assert!(handle.is_disposed());
    assert_eq!(harness.credentials.call_count(), 1);
    assert!(matches!(
        handle
            .request_join(test_identity(), test_channel())
            .await
            .unwrap_err(),
        SessionError::Disposed
    ));
    assert!(handle
        .notifications()
        .push("after dispose", Severity::Info)
        .is_none());
}

#[tokio::test(start_paused = true)]
async fn test_dispose_while_connected_tears_down() {
    let harness = TestHarness::new();
    let handle = harness.spawn_connected().await;
    handle.set_desired(CaptureKind::Microphone, true).await.unwrap();
    wait_for_snapshot(&handle, |s| s.published == vec![CaptureKind::Microphone]).await;

    handle.dispose().await;

    assert_eq!(harness.transport.leave_count(), 1);
    assert_eq!(harness.devices.live_handles(CaptureKind::Microphone), 0);
    assert_eq!(handle.snapshot().state, SessionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_leaves_tear_down_once() {
    let harness = TestHarness::new();
    let handle = harness.spawn_connected().await;
    let mut events = handle.subscribe();
    let other = handle.clone();

    let (first, second) = tokio::join!(handle.request_leave(), other.request_leave());
    let outcomes = [first.unwrap(), second.unwrap()];

    let completed = outcomes
        .iter()
        .filter(|o| matches!(o, LeaveOutcome::Completed(_)))
        .count();
    assert_eq!(completed, 1);
    assert!(outcomes.iter().any(|o| matches!(
        o,
        LeaveOutcome::Ignored {
            state: SessionState::Idle
        }
    )));

    let events = drain_events(&mut events);
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, SessionEvent::NavigateAway))
            .count(),
        1
    );
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(
                e,
                SessionEvent::StateChanged {
                    to: SessionState::Idle,
                    ..
                }
            ))
            .count(),
        1
    );
    assert_eq!(harness.transport.leave_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_leave_while_idle_is_ignored() {
    let harness = TestHarness::new();
    let handle = harness.spawn();

    let outcome = handle.request_leave().await.unwrap();

    assert_eq!(
        outcome,
        LeaveOutcome::Ignored {
            state: SessionState::Idle
        }
    );
    assert_eq!(harness.transport.leave_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_transport_error_fails_session_and_releases_resources() {
    let harness = TestHarness::new();
    let handle = harness.spawn_connected().await;
    handle.set_desired(CaptureKind::Microphone, true).await.unwrap();
    handle.set_desired(CaptureKind::Camera, true).await.unwrap();
    wait_for_snapshot(&handle, |s| s.published.len() == 2).await;

    harness
        .transport
        .emit(TransportEvent::Error("ICE connection failed".to_string()));
    wait_for_state(&handle, SessionState::Failed).await;

    let snapshot = handle.snapshot();
    assert!(snapshot.published.is_empty());
    assert!(snapshot.desired.is_empty());
    assert!(snapshot.channel_name.is_none());
    assert!(snapshot.last_error.is_some());
    assert_eq!(harness.transport.leave_count(), 1);
    assert!(harness.transport.published().is_empty());
    assert_eq!(harness.devices.live_handles(CaptureKind::Microphone), 0);
    assert_eq!(harness.devices.live_handles(CaptureKind::Camera), 0);

    // Leaving from Failed still navigates away without a second teardown.
    let outcome = handle.request_leave().await.unwrap();
    assert!(matches!(outcome, LeaveOutcome::Completed(_)));
    assert_eq!(harness.transport.leave_count(), 1);
    assert_eq!(handle.snapshot().state, SessionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_join_failure_fails_session() {
    let harness = TestHarness::new();
    harness.transport.fail_join_with("channel full");
    let handle = harness.spawn();

    handle
        .request_join(test_identity(), test_channel())
        .await
        .unwrap();
    wait_for_state(&handle, SessionState::Failed).await;

    assert_eq!(harness.transport.join_count(), 1);
    assert_eq!(harness.transport.leave_count(), 0);
    assert!(handle.snapshot().channel_name.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_reconnecting_keeps_credentials_and_recovers() {
    let harness = TestHarness::new();
    let handle = harness.spawn_connected().await;

    harness
        .transport
        .emit_state(TransportConnectionState::Reconnecting);
    wait_for_state(&handle, SessionState::Reconnecting).await;
    assert_eq!(
        handle.snapshot().channel_name.as_deref(),
        Some("chemistry-101")
    );

    harness
        .transport
        .emit_state(TransportConnectionState::Connected);
    wait_for_state(&handle, SessionState::Connected).await;
    assert_eq!(handle.snapshot().retry_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_remote_disconnect_fails_session() {
    let harness = TestHarness::new();
    let handle = harness.spawn_connected().await;

    harness
        .transport
        .emit_state(TransportConnectionState::Disconnected {
            reason: "kicked by host".to_string(),
        });
    wait_for_state(&handle, SessionState::Failed).await;

    assert!(handle.snapshot().channel_name.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_participant_left_closes_popup() {
    let harness = TestHarness::new();
    let handle = harness.spawn_connected().await;
    let mut events = handle.subscribe();
    let bob = ParticipantId::new("student-bob");

    harness
        .transport
        .emit(TransportEvent::ParticipantJoined(bob.clone()));
    handle.open_popup(bob.clone(), PopupKind::Remote).await.unwrap();
    wait_for_snapshot(&handle, |s| s.popups.len() == 1).await;

    harness
        .transport
        .emit(TransportEvent::ParticipantLeft(bob.clone()));
    wait_for_snapshot(&handle, |s| s.popups.is_empty()).await;

    let events = drain_events(&mut events);
    assert!(events.contains(&SessionEvent::ParticipantJoined(bob.clone())));
    assert!(events.contains(&SessionEvent::ParticipantLeft(bob)));
}

#[tokio::test(start_paused = true)]
async fn test_popups_are_cleared_on_leave() {
    let harness = TestHarness::new();
    let handle = harness.spawn_connected().await;

    for n in 1..=5 {
        handle
            .open_popup(ParticipantId::new(format!("p{n}")), PopupKind::Remote)
            .await
            .unwrap();
    }
    assert_eq!(handle.snapshot().popups.len(), 5);

    handle.request_leave().await.unwrap();
    assert!(handle.snapshot().popups.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_token_expiry_renews_credentials() {
    let harness = TestHarness::new();
    let handle = harness.spawn_connected().await;

    harness.transport.emit(TransportEvent::TokenWillExpire);
    idle_for(Duration::from_millis(100)).await;

    assert_eq!(harness.credentials.call_count(), 2);
    assert_eq!(harness.transport.renew_count(), 1);
    assert_eq!(handle.snapshot().state, SessionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_failed_token_renewal_only_notifies() {
    let harness = TestHarness::new();
    let handle = harness.spawn_connected().await;
    harness.transport.fail_renew();

    harness.transport.emit(TransportEvent::TokenWillExpire);
    idle_for(Duration::from_millis(100)).await;

    assert_eq!(handle.snapshot().state, SessionState::Connected);
    assert!(handle
        .notifications()
        .entries()
        .iter()
        .any(|n| n.severity == Severity::Error));
}
