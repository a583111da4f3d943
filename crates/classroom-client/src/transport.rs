//! Real-time transport collaborator contract.
//!
//! Media transmission belongs to an external SDK. The controller drives its
//! join/leave/publish primitives and observes its connection events.

use crate::devices::TrackRef;
use crate::errors::TransportError;
use crate::lifecycle::session::Credentials;
use async_trait::async_trait;
use common::secret::SecretString;
use common::types::ParticipantId;
use tokio::sync::broadcast;

/// Connection state as reported by the transport SDK.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportConnectionState {
    Connecting,
    Connected,
    /// The SDK lost the connection and is retrying on its own.
    Reconnecting,
    /// The SDK gave up, or the server closed the connection.
    Disconnected { reason: String },
}

/// Events emitted by the transport SDK.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    ConnectionStateChanged(TransportConnectionState),
    ParticipantJoined(ParticipantId),
    ParticipantLeft(ParticipantId),
    /// Runtime error after the connection was established.
    Error(String),
    /// The access token is about to expire and should be renewed.
    TokenWillExpire,
}

/// Transport SDK primitives consumed by the controller.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Join the channel described by `credentials`.
    async fn join(&self, credentials: &Credentials) -> Result<(), TransportError>;

    /// Leave the current channel.
    async fn leave(&self) -> Result<(), TransportError>;

    /// Start sending the given local tracks.
    async fn publish(&self, tracks: &[TrackRef]) -> Result<(), TransportError>;

    /// Stop sending the given local tracks.
    async fn unpublish(&self, tracks: &[TrackRef]) -> Result<(), TransportError>;

    /// Replace the access token of the live connection.
    async fn renew_token(&self, token: &SecretString) -> Result<(), TransportError>;

    /// Subscribe to connection and participant events.
    fn subscribe(&self) -> broadcast::Receiver<TransportEvent>;
}
