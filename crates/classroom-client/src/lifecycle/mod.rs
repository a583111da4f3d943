//! Session lifecycle: the controller actor and its helpers.
//!
//! - [`controller`] - `ConnectionLifecycleManager` actor and its handle
//! - [`publisher`] - capture resources and track publication
//! - [`teardown`] - ordered, idempotent release of a session
//! - [`retry`] - credential backoff policy
//! - [`session`] - the `Session` aggregate and its snapshot

pub mod controller;
pub mod messages;
pub mod publisher;
pub mod retry;
pub mod session;
pub mod teardown;

pub use controller::{ConnectionLifecycleHandle, ConnectionLifecycleManager, LifecycleDependencies};
pub use messages::{LeaveOutcome, SessionEvent};
pub use publisher::ResourcePublisher;
pub use retry::{RetryDecision, RetryPolicy};
pub use session::{Credentials, Session, SessionSnapshot, SessionState};
pub use teardown::{TeardownCoordinator, TeardownReport, TeardownStep, TeardownTarget};
