//! Message types for the lifecycle controller.
//!
//! `ControllerMessage` is what the public handle sends into the actor
//! mailbox; `Completion` is what the controller's own background tasks
//! report back. `SessionEvent` is broadcast to observers.

use super::session::{Credentials, SessionState};
use super::teardown::TeardownReport;
use crate::credentials::JoinIdentity;
use crate::devices::CaptureKind;
use crate::errors::{CredentialError, SessionError, TransportError};
use crate::overlays::{Point, PopupId, PopupKind, PopupWindow, Viewport};
use common::types::{ChannelId, ParticipantId};
use std::time::Duration;
use tokio::sync::oneshot;

/// Requests handled by the controller actor.
#[derive(Debug)]
pub enum ControllerMessage {
    RequestJoin {
        identity: JoinIdentity,
        channel: ChannelId,
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },

    RequestLeave {
        respond_to: oneshot::Sender<LeaveOutcome>,
    },

    RetryNow {
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },

    SetDesired {
        kind: CaptureKind,
        enabled: bool,
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },

    GetPublished {
        respond_to: oneshot::Sender<Vec<CaptureKind>>,
    },

    OpenPopup {
        participant_id: ParticipantId,
        kind: PopupKind,
        respond_to: oneshot::Sender<PopupWindow>,
    },

    ClosePopup {
        id: PopupId,
        respond_to: oneshot::Sender<bool>,
    },

    RepositionPopup {
        id: PopupId,
        point: Point,
        respond_to: oneshot::Sender<Option<Point>>,
    },

    SetViewport {
        viewport: Viewport,
        respond_to: oneshot::Sender<()>,
    },
}

/// Result of `request_leave`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaveOutcome {
    /// Teardown ran and the session is back to `Idle`.
    Completed(TeardownReport),
    /// Nothing to leave (already `Idle`), or a leave is in progress.
    Ignored { state: SessionState },
}

/// Discrete lifecycle events for observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
    /// A credential retry was scheduled. `attempt` is 1-based.
    RetryScheduled { attempt: u32, delay: Duration },
    Connected,
    Failed { message: String },
    ParticipantJoined(ParticipantId),
    ParticipantLeft(ParticipantId),
    /// The session ended locally; the UI should leave the classroom view.
    NavigateAway,
}

/// Results of controller-spawned background work.
///
/// `generation` identifies the join attempt the work belongs to; results
/// from an older generation are stale.
#[derive(Debug)]
pub(crate) enum Completion {
    CredentialsFetched {
        generation: u64,
        result: Result<Credentials, CredentialError>,
        elapsed: Duration,
    },
    RetryTimerFired {
        generation: u64,
    },
    TransportJoined {
        generation: u64,
        result: Result<(), TransportError>,
    },
    TokenRenewed {
        generation: u64,
        result: Result<Credentials, SessionError>,
    },
}
