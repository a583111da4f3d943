//! Test fixtures: configuration, identities, credentials, and a harness
//! wiring the mocks into a running controller.

use crate::mock_credentials::MockCredentialService;
use crate::mock_devices::MockCaptureDevices;
use crate::mock_transport::MockTransport;
use anyhow::Context;
use classroom_client::config::Config;
use classroom_client::credentials::{JoinIdentity, ParticipantRole};
use classroom_client::errors::CredentialError;
use classroom_client::lifecycle::{
    ConnectionLifecycleHandle, Credentials, LifecycleDependencies, SessionEvent, SessionState,
};
use common::secret::SecretString;
use common::types::{ChannelId, ParticipantId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Default upper bound for `wait_for_*` helpers, in (possibly paused) time.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(60);

/// Build a config from defaults plus `overrides`.
pub fn config_with(overrides: &[(&str, &str)]) -> anyhow::Result<Config> {
    let mut vars = HashMap::from([
        (
            "CLASSROOM_CREDENTIAL_URL".to_string(),
            "http://127.0.0.1:9".to_string(),
        ),
        (
            "CLASSROOM_SESSION_TOKEN".to_string(),
            "test-session-token".to_string(),
        ),
    ]);
    for (key, value) in overrides {
        vars.insert((*key).to_string(), (*value).to_string());
    }
    Config::from_vars(&vars).context("invalid test configuration")
}

/// Default test configuration (3 retries, 1s backoff base, 10s timeout).
#[must_use]
pub fn test_config() -> Config {
    config_with(&[]).expect("default test config is valid")
}

#[must_use]
pub fn test_identity() -> JoinIdentity {
    JoinIdentity {
        participant_id: ParticipantId::new("student-alice"),
        role: ParticipantRole::Student,
    }
}

#[must_use]
pub fn test_channel() -> ChannelId {
    ChannelId::new("chemistry-101")
}

#[must_use]
pub fn test_credentials() -> Credentials {
    Credentials {
        service_app_id: "test-app".to_string(),
        channel_name: "chemistry-101".to_string(),
        access_token: Some(SecretString::from("test-rtc-token".to_string())),
        local_participant_id: ParticipantId::new("1001"),
    }
}

#[must_use]
pub fn transient_error() -> CredentialError {
    CredentialError::Service { status: 503 }
}

#[must_use]
pub fn unauthorized_error() -> CredentialError {
    CredentialError::Unauthorized("Status 401 Unauthorized".to_string())
}

/// Mocks plus configuration for one controller.
pub struct TestHarness {
    pub config: Config,
    pub credentials: Arc<MockCredentialService>,
    pub transport: Arc<MockTransport>,
    pub devices: Arc<MockCaptureDevices>,
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl TestHarness {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    #[must_use]
    pub fn with_config(config: Config) -> Self {
        Self {
            config,
            credentials: Arc::new(MockCredentialService::new()),
            transport: Arc::new(MockTransport::new()),
            devices: Arc::new(MockCaptureDevices::new()),
        }
    }

    #[must_use]
    pub fn dependencies(&self) -> LifecycleDependencies {
        LifecycleDependencies {
            credentials: Arc::clone(&self.credentials) as _,
            transport: Arc::clone(&self.transport) as _,
            devices: Arc::clone(&self.devices) as _,
        }
    }

    /// Spawn a controller wired to the mocks.
    #[must_use]
    pub fn spawn(&self) -> ConnectionLifecycleHandle {
        ConnectionLifecycleHandle::new(&self.config, self.dependencies())
    }

    /// Spawn a controller and bring it to `Connected`.
    pub async fn spawn_connected(&self) -> ConnectionLifecycleHandle {
        let handle = self.spawn();
        handle
            .request_join(test_identity(), test_channel())
            .await
            .expect("join accepted");
        wait_for_state(&handle, SessionState::Connected).await;
        handle
    }
}

/// Wait until the published snapshot reaches `state`.
///
/// # Panics
///
/// Panics if the state is not reached within [`WAIT_TIMEOUT`].
pub async fn wait_for_state(handle: &ConnectionLifecycleHandle, state: SessionState) {
    let mut rx = handle.watch();
    let reached = tokio::time::timeout(WAIT_TIMEOUT, rx.wait_for(|s| s.state == state)).await;
    match reached {
        Ok(Ok(_)) => {}
        Ok(Err(_)) => panic!("controller stopped before reaching {state}"),
        Err(_) => panic!(
            "timed out waiting for {state}, last snapshot: {:?}",
            handle.snapshot()
        ),
    }
}

/// Wait until `pred` holds for the published snapshot.
///
/// # Panics
///
/// Panics if the condition does not hold within [`WAIT_TIMEOUT`].
pub async fn wait_for_snapshot(
    handle: &ConnectionLifecycleHandle,
    pred: impl FnMut(&classroom_client::lifecycle::SessionSnapshot) -> bool,
) {
    let mut rx = handle.watch();
    let reached = tokio::time::timeout(WAIT_TIMEOUT, rx.wait_for(pred)).await;
    assert!(
        matches!(reached, Ok(Ok(_))),
        "timed out waiting for snapshot condition, last snapshot: {:?}",
        handle.snapshot()
    );
}

/// Collect all events currently buffered in `rx`.
pub fn drain_events(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Let spawned tasks run without advancing time.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}
