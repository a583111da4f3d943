//! Secret types for protecting sensitive values from accidental logging.
//!
//! Re-exports the [`secrecy`] types used for the two secrets the classroom
//! client handles: the user's local session token (sent to the credential
//! service) and the transport access token returned by it.
//!
//! `SecretString` implements `Debug` with redaction, so a struct that derives
//! `Debug` and holds one is safe to log with `{:?}` or as a tracing field.
//! Secrets are zeroized on drop.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct JoinToken {
//!     channel: String,
//!     token: SecretString,
//! }
//!
//! let join = JoinToken {
//!     channel: "algebra-101".to_string(),
//!     token: SecretString::from("006abc"),
//! };
//!
//! assert!(!format!("{join:?}").contains("006abc"));
//! assert_eq!(join.token.expose_secret(), "006abc");
//! ```

pub use secrecy::{ExposeSecret, SecretString};
