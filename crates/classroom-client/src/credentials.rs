//! Credential service client.
//!
//! Fetches per-session transport credentials (app id, channel name, access
//! token, local participant id) for a participant joining a channel.
//!
//! # Error classification
//!
//! Failures are returned as typed [`CredentialError`]s; the retry policy
//! decides from the variant alone:
//!
//! - 401/403, or no local session token → `Unauthorized` (never retried)
//! - timeouts, connect failures, 5xx, unexpected statuses, bad bodies →
//!   transient (retried with backoff)
//!
//! # Security
//!
//! - The local session token and the returned access token are `SecretString`
//! - Response bodies of rejected requests are logged at trace level only
//! - HTTP timeouts prevent hanging requests

use crate::config::Config;
use crate::errors::CredentialError;
use crate::lifecycle::session::Credentials;
use async_trait::async_trait;
use common::secret::{ExposeSecret, SecretString};
use common::types::{ChannelId, ParticipantId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, instrument, trace, warn};

/// Path of the credential endpoint, relative to the service base URL.
pub const CREDENTIALS_PATH: &str = "/api/v1/classroom/credentials";

/// Connect timeout for the HTTP client.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Role of the joining participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    Teacher,
    Student,
}

impl ParticipantRole {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ParticipantRole::Teacher => "teacher",
            ParticipantRole::Student => "student",
        }
    }
}

impl std::str::FromStr for ParticipantRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "teacher" => Ok(ParticipantRole::Teacher),
            "student" => Ok(ParticipantRole::Student),
            other => Err(format!("unknown participant role '{other}'")),
        }
    }
}

/// Who is joining.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinIdentity {
    pub participant_id: ParticipantId,
    pub role: ParticipantRole,
}

/// Body of a credential request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CredentialRequest {
    pub channel_id: ChannelId,
    pub participant_id: ParticipantId,
    pub role: ParticipantRole,
}

impl CredentialRequest {
    #[must_use]
    pub fn new(identity: &JoinIdentity, channel: &ChannelId) -> Self {
        Self {
            channel_id: channel.clone(),
            participant_id: identity.participant_id.clone(),
            role: identity.role,
        }
    }
}

/// Credential service contract.
#[async_trait]
pub trait CredentialService: Send + Sync {
    /// Request credentials for one session.
    async fn fetch(&self, request: &CredentialRequest) -> Result<Credentials, CredentialError>;
}

/// Local id as sent by the service: some deployments use numeric uids.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawParticipantId {
    Text(String),
    Number(u64),
}

impl From<RawParticipantId> for ParticipantId {
    fn from(raw: RawParticipantId) -> Self {
        match raw {
            RawParticipantId::Text(s) => ParticipantId(s),
            RawParticipantId::Number(n) => ParticipantId(n.to_string()),
        }
    }
}

/// Credential service response body.
#[derive(Deserialize)]
struct CredentialResponse {
    app_id: String,
    channel_name: String,
    #[serde(default)]
    token: Option<SecretString>,
    local_id: RawParticipantId,
}

impl fmt::Debug for CredentialResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialResponse")
            .field("app_id", &self.app_id)
            .field("channel_name", &self.channel_name)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

/// HTTP implementation of [`CredentialService`].
pub struct HttpCredentialClient {
    http_client: reqwest::Client,
    base_url: String,
    session_token: Option<SecretString>,
    timeout: Duration,
}

impl fmt::Debug for HttpCredentialClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpCredentialClient")
            .field("base_url", &self.base_url)
            .field(
                "session_token",
                &self.session_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish_non_exhaustive()
    }
}

impl HttpCredentialClient {
    /// Build a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns `CredentialError::Network` if the HTTP client cannot be built.
    pub fn new(config: &Config) -> Result<Self, CredentialError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.credential_timeout)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT.min(config.credential_timeout))
            .build()
            .map_err(|e| CredentialError::Network(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            base_url: config.credential_service_url.clone(),
            session_token: config.session_token.clone(),
            timeout: config.credential_timeout,
        })
    }
}

#[async_trait]
impl CredentialService for HttpCredentialClient {
    #[instrument(skip_all, fields(channel_id = %request.channel_id, participant_id = %request.participant_id))]
    async fn fetch(&self, request: &CredentialRequest) -> Result<Credentials, CredentialError> {
        let Some(session_token) = self.session_token.as_ref() else {
            warn!(target: "classroom.credentials", "No local session token, sign-in required");
            return Err(CredentialError::MissingSessionToken);
        };

        let url = format!("{}{}", self.base_url, CREDENTIALS_PATH);

        debug!(
            target: "classroom.credentials",
            url = %url,
            role = request.role.as_str(),
            "Requesting session credentials"
        );

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(session_token.expose_secret())
            .json(request)
            .send()
            .await
            .map_err(|e| {
                debug!(target: "classroom.credentials", error = %e, "HTTP request failed");
                if e.is_timeout() {
                    CredentialError::Timeout(self.timeout)
                } else {
                    CredentialError::Network(e.to_string())
                }
            })?;

        let status = response.status();

        if status.is_success() {
            let body: CredentialResponse = response.json().await.map_err(|e| {
                warn!(target: "classroom.credentials", error = %e, "Failed to parse credential response");
                CredentialError::InvalidResponse(e.to_string())
            })?;

            debug!(
                target: "classroom.credentials",
                channel_name = %body.channel_name,
                has_token = body.token.is_some(),
                "Credentials acquired"
            );

            Ok(Credentials {
                service_app_id: body.app_id,
                channel_name: body.channel_name,
                access_token: body.token,
                local_participant_id: body.local_id.into(),
            })
        } else if status.as_u16() == 401 || status.as_u16() == 403 {
            let body = response.text().await.unwrap_or_else(|e| {
                trace!(target: "classroom.credentials", error = %e, "Failed to read error response body");
                "<failed to read body>".to_string()
            });
            warn!(
                target: "classroom.credentials",
                status = %status,
                "Credential request rejected as unauthorized"
            );
            trace!(
                target: "classroom.credentials",
                body = %body,
                "Unauthorized response body"
            );
            Err(CredentialError::Unauthorized(format!("Status {status}")))
        } else {
            warn!(
                target: "classroom.credentials",
                status = %status,
                "Credential service returned an error status"
            );
            Err(CredentialError::Service {
                status: status.as_u16(),
            })
        }
    }
}
