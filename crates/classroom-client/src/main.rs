//! Credential probe
//!
//! Runs the credential-fetch protocol against the configured credential
//! service, with the same retry policy as the lifecycle controller, and
//! reports whether a participant could join a channel. Useful for checking a
//! deployment without opening a browser.
//!
//! # Environment
//!
//! - `CLASSROOM_PROBE_CHANNEL` (required)
//! - `CLASSROOM_PROBE_PARTICIPANT` (required)
//! - `CLASSROOM_PROBE_ROLE` (`teacher` or `student`, default `student`)
//! - plus the client configuration (`CLASSROOM_CREDENTIAL_URL`, ...)
//!
//! Exits non-zero if credentials cannot be obtained.

#![warn(clippy::pedantic)]

use classroom_client::config::Config;
use classroom_client::credentials::{
    CredentialRequest, CredentialService, HttpCredentialClient, JoinIdentity, ParticipantRole,
};
use classroom_client::lifecycle::{RetryDecision, RetryPolicy};
use common::config::ObservabilityConfig;
use common::types::{ChannelId, ParticipantId};
use std::collections::HashMap;
use std::env;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));

    if config.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

fn required(vars: &HashMap<String, String>, key: &str) -> Result<String, String> {
    vars.get(key)
        .filter(|v| !v.is_empty())
        .cloned()
        .ok_or_else(|| format!("Missing required environment variable: {key}"))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let vars: HashMap<String, String> = env::vars().collect();
    init_tracing(&ObservabilityConfig::from_vars(&vars));

    let config = Config::from_vars(&vars).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    let channel = ChannelId::new(required(&vars, "CLASSROOM_PROBE_CHANNEL")?);
    let participant_id = ParticipantId::new(required(&vars, "CLASSROOM_PROBE_PARTICIPANT")?);
    let role: ParticipantRole = vars
        .get("CLASSROOM_PROBE_ROLE")
        .map_or(Ok(ParticipantRole::Student), |r| r.parse())?;

    info!(
        credential_service_url = %config.credential_service_url,
        channel_id = %channel,
        participant_id = %participant_id,
        role = role.as_str(),
        has_session_token = config.session_token.is_some(),
        "Probing credential service"
    );

    let client = HttpCredentialClient::new(&config)?;
    let policy = RetryPolicy::from_config(&config);
    let request = CredentialRequest::new(
        &JoinIdentity {
            participant_id,
            role,
        },
        &channel,
    );

    let mut retry_count = 0;
    loop {
        let result = tokio::select! {
            result = client.fetch(&request) => result,
            _ = signal::ctrl_c() => {
                info!("Interrupted");
                return Ok(());
            }
        };

        match result {
            Ok(credentials) => {
                info!(
                    service_app_id = %credentials.service_app_id,
                    channel_name = %credentials.channel_name,
                    local_participant_id = %credentials.local_participant_id,
                    has_access_token = credentials.access_token.is_some(),
                    retries = retry_count,
                    "Credentials acquired"
                );
                return Ok(());
            }
            Err(e) => match policy.decide(retry_count, &e) {
                RetryDecision::Retry { delay } => {
                    retry_count += 1;
                    warn!(
                        error = %e,
                        attempt = retry_count,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Credential fetch failed, retrying"
                    );
                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        _ = signal::ctrl_c() => {
                            info!("Interrupted");
                            return Ok(());
                        }
                    }
                }
                RetryDecision::Fail => {
                    error!(error = %e, retries = retry_count, "Credential probe failed");
                    return Err(e.into());
                }
            },
        }
    }
}
