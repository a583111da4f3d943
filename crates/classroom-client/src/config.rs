//! Classroom client configuration.
//!
//! Configuration is loaded from environment variables. The local session
//! token is redacted in Debug output.

use crate::overlays::popups::{PopupSize, Viewport};
use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default credential request timeout in seconds.
pub const DEFAULT_CREDENTIAL_TIMEOUT_SECONDS: u64 = 10;

/// Default number of credential retries before the session fails.
pub const DEFAULT_MAX_CREDENTIAL_RETRIES: u32 = 3;

/// Default backoff base; retry `n` waits `base * 2^n`.
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 1000;

/// Default notification time-to-live.
pub const DEFAULT_NOTIFICATION_TTL_MS: u64 = 3000;

/// Default number of notifications kept on screen.
pub const DEFAULT_MAX_VISIBLE_NOTIFICATIONS: usize = 4;

/// Default popup viewport.
pub const DEFAULT_VIEWPORT_WIDTH: f64 = 1280.0;
pub const DEFAULT_VIEWPORT_HEIGHT: f64 = 720.0;

/// Default popup tile size and edge margin.
pub const DEFAULT_POPUP_WIDTH: f64 = 320.0;
pub const DEFAULT_POPUP_HEIGHT: f64 = 180.0;
pub const DEFAULT_POPUP_MARGIN: f64 = 16.0;

/// Classroom client configuration.
#[derive(Clone)]
pub struct Config {
    /// Base URL of the credential service.
    pub credential_service_url: String,

    /// Local session token presented to the credential service.
    /// Absent when the user is not signed in.
    pub session_token: Option<SecretString>,

    /// Credential request timeout (default: 10s).
    pub credential_timeout: Duration,

    /// Retries allowed after a transient credential failure (default: 3).
    pub max_credential_retries: u32,

    /// Backoff base delay (default: 1s).
    pub retry_base_delay: Duration,

    /// Default notification TTL (default: 3s).
    pub notification_ttl: Duration,

    /// Notification queue bound (default: 4).
    pub max_visible_notifications: usize,

    /// Viewport used to place and clamp popups.
    pub viewport: Viewport,

    /// Popup tile size.
    pub popup_size: PopupSize,

    /// Distance between a popup and the viewport edge at its slot anchor.
    pub popup_margin: f64,
}

/// Custom Debug implementation that redacts the session token.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("credential_service_url", &self.credential_service_url)
            .field(
                "session_token",
                &self.session_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("credential_timeout", &self.credential_timeout)
            .field("max_credential_retries", &self.max_credential_retries)
            .field("retry_base_delay", &self.retry_base_delay)
            .field("notification_ttl", &self.notification_ttl)
            .field("max_visible_notifications", &self.max_visible_notifications)
            .field("viewport", &self.viewport)
            .field("popup_size", &self.popup_size)
            .field("popup_margin", &self.popup_margin)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let credential_service_url = vars
            .get("CLASSROOM_CREDENTIAL_URL")
            .ok_or_else(|| ConfigError::MissingEnvVar("CLASSROOM_CREDENTIAL_URL".to_string()))?
            .trim_end_matches('/')
            .to_string();

        if !credential_service_url.starts_with("http://")
            && !credential_service_url.starts_with("https://")
        {
            return Err(ConfigError::InvalidValue(format!(
                "CLASSROOM_CREDENTIAL_URL must be an http(s) URL, got '{credential_service_url}'"
            )));
        }

        let session_token = vars
            .get("CLASSROOM_SESSION_TOKEN")
            .filter(|s| !s.is_empty())
            .map(|s| SecretString::from(s.clone()));

        let credential_timeout = Duration::from_secs(parse_or(
            vars,
            "CLASSROOM_CREDENTIAL_TIMEOUT_SECONDS",
            DEFAULT_CREDENTIAL_TIMEOUT_SECONDS,
        )?);

        let max_credential_retries = parse_or(
            vars,
            "CLASSROOM_MAX_CREDENTIAL_RETRIES",
            DEFAULT_MAX_CREDENTIAL_RETRIES,
        )?;

        let retry_base_delay = Duration::from_millis(parse_or(
            vars,
            "CLASSROOM_RETRY_BASE_DELAY_MS",
            DEFAULT_RETRY_BASE_DELAY_MS,
        )?);

        let notification_ttl = Duration::from_millis(parse_or(
            vars,
            "CLASSROOM_NOTIFICATION_TTL_MS",
            DEFAULT_NOTIFICATION_TTL_MS,
        )?);

        let max_visible_notifications = parse_or(
            vars,
            "CLASSROOM_MAX_VISIBLE_NOTIFICATIONS",
            DEFAULT_MAX_VISIBLE_NOTIFICATIONS,
        )?;
        if max_visible_notifications == 0 {
            return Err(ConfigError::InvalidValue(
                "CLASSROOM_MAX_VISIBLE_NOTIFICATIONS must be at least 1".to_string(),
            ));
        }

        let viewport = Viewport {
            width: parse_dimension(vars, "CLASSROOM_VIEWPORT_WIDTH", DEFAULT_VIEWPORT_WIDTH)?,
            height: parse_dimension(vars, "CLASSROOM_VIEWPORT_HEIGHT", DEFAULT_VIEWPORT_HEIGHT)?,
        };

        let popup_size = PopupSize {
            width: parse_dimension(vars, "CLASSROOM_POPUP_WIDTH", DEFAULT_POPUP_WIDTH)?,
            height: parse_dimension(vars, "CLASSROOM_POPUP_HEIGHT", DEFAULT_POPUP_HEIGHT)?,
        };

        let popup_margin = parse_or(vars, "CLASSROOM_POPUP_MARGIN", DEFAULT_POPUP_MARGIN)?;
        if !popup_margin.is_finite() || popup_margin < 0.0 {
            return Err(ConfigError::InvalidValue(
                "CLASSROOM_POPUP_MARGIN must be a non-negative number".to_string(),
            ));
        }

        Ok(Config {
            credential_service_url,
            session_token,
            credential_timeout,
            max_credential_retries,
            retry_base_delay,
            notification_ttl,
            max_visible_notifications,
            viewport,
            popup_size,
            popup_margin,
        })
    }
}

/// Parse an optional variable, falling back to `default` when unset.
///
/// A present but malformed value is an error rather than a silent default.
fn parse_or<T: std::str::FromStr>(
    vars: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{key}='{raw}' is not valid"))),
        None => Ok(default),
    }
}

fn parse_dimension(
    vars: &HashMap<String, String>,
    key: &str,
    default: f64,
) -> Result<f64, ConfigError> {
    let value: f64 = parse_or(vars, key, default)?;
    if !value.is_finite() || value <= 0.0 {
        return Err(ConfigError::InvalidValue(format!(
            "{key} must be a positive number"
        )));
    }
    Ok(value)
}
