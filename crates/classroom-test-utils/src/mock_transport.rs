//! Mock transport SDK.
//!
//! Records every call, keeps a published set, and lets tests inject
//! failures or push transport events. By default a successful `join` emits
//! `Connected`, like a real SDK finishing its handshake.

use async_trait::async_trait;
use classroom_client::devices::{CaptureKind, TrackRef};
use classroom_client::errors::TransportError;
use classroom_client::lifecycle::Credentials;
use classroom_client::transport::{Transport, TransportConnectionState, TransportEvent};
use common::secret::SecretString;
use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::broadcast;

/// A recorded transport call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Join { channel_name: String },
    Leave,
    Publish(Vec<CaptureKind>),
    Unpublish(Vec<CaptureKind>),
    RenewToken,
}

#[derive(Debug)]
pub struct MockTransport {
    events: broadcast::Sender<TransportEvent>,
    calls: Mutex<Vec<TransportCall>>,
    published: Mutex<BTreeSet<CaptureKind>>,
    auto_connect: AtomicBool,
    fail_join: Mutex<Option<String>>,
    fail_publish: Mutex<HashSet<CaptureKind>>,
    fail_leave: AtomicBool,
    fail_renew: AtomicBool,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            events,
            calls: Mutex::new(Vec::new()),
            published: Mutex::new(BTreeSet::new()),
            auto_connect: AtomicBool::new(true),
            fail_join: Mutex::new(None),
            fail_publish: Mutex::new(HashSet::new()),
            fail_leave: AtomicBool::new(false),
            fail_renew: AtomicBool::new(false),
        }
    }

    /// Whether a successful join emits `Connected` by itself.
    pub fn set_auto_connect(&self, auto_connect: bool) {
        self.auto_connect.store(auto_connect, Ordering::SeqCst);
    }

    pub fn fail_join_with(&self, message: &str) {
        *self.fail_join.lock().unwrap() = Some(message.to_string());
    }

    pub fn fail_publish_of(&self, kind: CaptureKind) {
        self.fail_publish.lock().unwrap().insert(kind);
    }

    pub fn clear_publish_failures(&self) {
        self.fail_publish.lock().unwrap().clear();
    }

    pub fn fail_leave(&self) {
        self.fail_leave.store(true, Ordering::SeqCst);
    }

    pub fn fail_renew(&self) {
        self.fail_renew.store(true, Ordering::SeqCst);
    }

    /// Push an event to subscribers.
    pub fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    pub fn emit_state(&self, state: TransportConnectionState) {
        self.emit(TransportEvent::ConnectionStateChanged(state));
    }

    #[must_use]
    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().unwrap().clone()
    }

    #[must_use]
    pub fn join_count(&self) -> usize {
        self.count(|c| matches!(c, TransportCall::Join { .. }))
    }

    #[must_use]
    pub fn leave_count(&self) -> usize {
        self.count(|c| matches!(c, TransportCall::Leave))
    }

    #[must_use]
    pub fn renew_count(&self) -> usize {
        self.count(|c| matches!(c, TransportCall::RenewToken))
    }

    /// Kinds currently published, in `CaptureKind` order.
    #[must_use]
    pub fn published(&self) -> Vec<CaptureKind> {
        self.published.lock().unwrap().iter().copied().collect()
    }

    fn count(&self, pred: impl Fn(&TransportCall) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: TransportCall) {
        self.calls.lock().unwrap().push(call);
    }
}

fn kinds(tracks: &[TrackRef]) -> Vec<CaptureKind> {
    tracks.iter().map(|t| t.kind).collect()
}

#[async_trait]
impl Transport for MockTransport {
    async fn join(&self, credentials: &Credentials) -> Result<(), TransportError> {
        self.record(TransportCall::Join {
            channel_name: credentials.channel_name.clone(),
        });
        if let Some(message) = self.fail_join.lock().unwrap().clone() {
            return Err(TransportError::Join(message));
        }
        if self.auto_connect.load(Ordering::SeqCst) {
            self.emit_state(TransportConnectionState::Connected);
        }
        Ok(())
    }

    async fn leave(&self) -> Result<(), TransportError> {
        self.record(TransportCall::Leave);
        self.published.lock().unwrap().clear();
        if self.fail_leave.load(Ordering::SeqCst) {
            return Err(TransportError::Leave("leave rejected".to_string()));
        }
        Ok(())
    }

    async fn publish(&self, tracks: &[TrackRef]) -> Result<(), TransportError> {
        let kinds = kinds(tracks);
        self.record(TransportCall::Publish(kinds.clone()));
        {
            let failing = self.fail_publish.lock().unwrap();
            if kinds.iter().any(|k| failing.contains(k)) {
                return Err(TransportError::Publish("publish rejected".to_string()));
            }
        }
        self.published.lock().unwrap().extend(kinds);
        Ok(())
    }

    async fn unpublish(&self, tracks: &[TrackRef]) -> Result<(), TransportError> {
        let kinds = kinds(tracks);
        self.record(TransportCall::Unpublish(kinds.clone()));
        let mut published = self.published.lock().unwrap();
        for kind in kinds {
            published.remove(&kind);
        }
        Ok(())
    }

    async fn renew_token(&self, _token: &SecretString) -> Result<(), TransportError> {
        self.record(TransportCall::RenewToken);
        if self.fail_renew.load(Ordering::SeqCst) {
            return Err(TransportError::Renew("renewal rejected".to_string()));
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }
}
