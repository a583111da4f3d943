//! Classroom Client Library
//!
//! Session lifecycle core of the live classroom client: everything between a
//! user asking to join a class and the moment they have left it.
//!
//! - Acquiring transport credentials with typed retry/backoff
//! - Joining and monitoring the real-time transport
//! - Opening and publishing microphone, camera and screen capture
//! - Deterministic, idempotent teardown on leave, failure or dispose
//! - Session-scoped notifications and participant popups
//!
//! # Architecture
//!
//! ```text
//! ConnectionLifecycleHandle (cloneable, used by the UI)
//! └── ConnectionLifecycleManager (actor task, owns the Session)
//!     ├── ResourcePublisher (capture handles, published set)
//!     ├── TeardownCoordinator (one per join attempt)
//!     ├── PopupWindowManager
//!     └── NotificationQueue (shared with the handle)
//! ```
//!
//! Media transport, capture devices and the credential service are external
//! collaborators behind the [`transport::Transport`],
//! [`devices::CaptureDevices`] and [`credentials::CredentialService`] traits.
//!
//! # Modules
//!
//! - [`config`] - Configuration from environment
//! - [`credentials`] - Credential service contract and HTTP client
//! - [`errors`] - Error types
//! - [`lifecycle`] - Controller actor and helpers
//! - [`overlays`] - Notifications and popups
//! - [`observability`] - Metrics

pub mod config;
pub mod credentials;
pub mod devices;
pub mod errors;
pub mod lifecycle;
pub mod observability;
pub mod overlays;
pub mod transport;
