//! # Classroom Test Utilities
//!
//! Mocks and fixtures for testing the classroom lifecycle controller
//! without a real transport SDK, capture hardware, or credential service.
//!
//! ## Modules
//!
//! - `mock_transport` - Recording transport with injectable failures and events
//! - `mock_devices` - Capture devices that grant, deny, or wait on a gate
//! - `mock_credentials` - Scripted credential service
//! - `fixtures` - Config, identities, credentials, and wiring helpers
//!
//! ## Usage
//!
//! ```rust,ignore
//! use classroom_test_utils::*;
//!
//! #[tokio::test(start_paused = true)]
//! async fn test_example() {
//!     let harness = TestHarness::new();
//!     harness.credentials.push_failure(transient_error());
//!
//!     let handle = harness.spawn();
//!     handle.request_join(test_identity(), test_channel()).await.unwrap();
//!     wait_for_state(&handle, SessionState::Connected).await;
//! }
//! ```

pub mod fixtures;
pub mod mock_credentials;
pub mod mock_devices;
pub mod mock_transport;

pub use fixtures::*;
pub use mock_credentials::MockCredentialService;
pub use mock_devices::{DeviceBehavior, MockCaptureDevices};
pub use mock_transport::{MockTransport, TransportCall};
