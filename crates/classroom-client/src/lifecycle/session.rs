//! Session aggregate.
//!
//! Owned exclusively by the lifecycle controller task. Credentials are held
//! in exactly one place (`Session::credentials`) and lent to collaborators by
//! reference.

use crate::credentials::JoinIdentity;
use crate::devices::CaptureKind;
use crate::overlays::PopupWindow;
use common::secret::SecretString;
use common::types::{ChannelId, ParticipantId};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Lifecycle state of a classroom session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    FetchingCredentials,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
    Leaving,
}

impl SessionState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::FetchingCredentials => "fetching_credentials",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Reconnecting => "reconnecting",
            SessionState::Failed => "failed",
            SessionState::Leaving => "leaving",
        }
    }

    /// States in which the session holds credentials.
    #[must_use]
    pub const fn holds_credentials(&self) -> bool {
        matches!(
            self,
            SessionState::Connecting | SessionState::Connected | SessionState::Reconnecting
        )
    }

    /// States from which `request_leave` performs a teardown.
    #[must_use]
    pub const fn is_leavable(&self) -> bool {
        !matches!(self, SessionState::Idle | SessionState::Leaving)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport credentials for one session.
#[derive(Clone)]
pub struct Credentials {
    pub service_app_id: String,
    pub channel_name: String,
    /// Some deployments run without tokens.
    pub access_token: Option<SecretString>,
    pub local_participant_id: ParticipantId,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("service_app_id", &self.service_app_id)
            .field("channel_name", &self.channel_name)
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("local_participant_id", &self.local_participant_id)
            .finish()
    }
}

/// Where the session is trying to go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinTarget {
    pub identity: JoinIdentity,
    pub channel: ChannelId,
}

/// The aggregate state of one join-to-leave lifecycle.
#[derive(Debug, Default)]
pub struct Session {
    state: SessionState,
    credentials: Option<Arc<Credentials>>,
    retry_count: u32,
    last_error: Option<String>,
    target: Option<JoinTarget>,
    /// A transport join has been issued and not yet answered by a leave.
    transport_engaged: bool,
}

impl Session {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Change state, returning the previous one.
    pub fn set_state(&mut self, state: SessionState) -> SessionState {
        std::mem::replace(&mut self.state, state)
    }

    #[must_use]
    pub fn credentials(&self) -> Option<&Arc<Credentials>> {
        self.credentials.as_ref()
    }

    /// Credentials as observers may see them.
    ///
    /// `Leaving` still holds credentials internally until teardown clears
    /// them, but they are hidden from snapshots from the moment the leave
    /// starts.
    #[must_use]
    pub fn published_credentials(&self) -> Option<&Arc<Credentials>> {
        self.credentials
            .as_ref()
            .filter(|_| self.state.holds_credentials())
    }

    /// Store fetched credentials and move to `Connecting`.
    pub fn begin_connecting(&mut self, credentials: Credentials) -> Arc<Credentials> {
        let credentials = Arc::new(credentials);
        self.credentials = Some(Arc::clone(&credentials));
        self.state = SessionState::Connecting;
        credentials
    }

    /// Replace the access token after a renewal.
    pub fn replace_credentials(&mut self, credentials: Credentials) {
        if self.credentials.is_some() {
            self.credentials = Some(Arc::new(credentials));
        }
    }

    pub fn clear_credentials(&mut self) {
        self.credentials = None;
    }

    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn increment_retry(&mut self) -> u32 {
        self.retry_count = self.retry_count.saturating_add(1);
        self.retry_count
    }

    pub fn reset_retry(&mut self) {
        self.retry_count = 0;
    }

    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.state = SessionState::Failed;
        self.last_error = Some(message.into());
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    #[must_use]
    pub fn target(&self) -> Option<&JoinTarget> {
        self.target.as_ref()
    }

    pub fn set_target(&mut self, target: JoinTarget) {
        self.target = Some(target);
    }

    pub fn clear_target(&mut self) {
        self.target = None;
    }

    #[must_use]
    pub fn transport_engaged(&self) -> bool {
        self.transport_engaged
    }

    pub fn set_transport_engaged(&mut self, engaged: bool) {
        self.transport_engaged = engaged;
    }

    /// Credentials are present exactly in the credential-holding states.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.credentials.is_some() == self.state.holds_credentials()
    }
}

/// Read-only view of the session published to observers.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub channel_name: Option<String>,
    pub local_participant_id: Option<ParticipantId>,
    /// Kinds the user wants on.
    pub desired: Vec<CaptureKind>,
    /// Kinds currently published to the transport.
    pub published: Vec<CaptureKind>,
    pub popups: Vec<PopupWindow>,
}
