//! Mock capture devices.
//!
//! Each kind can grant immediately, fail, or wait on a gate that the test
//! opens later (a pending permission prompt). Open and close counts are
//! tracked per kind so tests can check that nothing leaks.

use async_trait::async_trait;
use classroom_client::devices::{CaptureDevices, CaptureHandle, CaptureKind};
use classroom_client::errors::DeviceError;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// How opening a device of one kind behaves.
#[derive(Debug, Clone)]
pub enum DeviceBehavior {
    Grant,
    Deny,
    Unavailable,
    /// Wait until the gate is notified, then grant.
    Gate(Arc<Notify>),
}

#[derive(Debug, Default)]
struct Counters {
    opened: HashMap<CaptureKind, usize>,
    closed: HashMap<CaptureKind, usize>,
}

#[derive(Debug)]
struct MockHandle {
    kind: CaptureKind,
    track_id: String,
    counters: Arc<Mutex<Counters>>,
    fail_close: bool,
}

impl CaptureHandle for MockHandle {
    fn kind(&self) -> CaptureKind {
        self.kind
    }

    fn track_id(&self) -> &str {
        &self.track_id
    }

    fn close(self: Box<Self>) -> Result<(), DeviceError> {
        *self
            .counters
            .lock()
            .unwrap()
            .closed
            .entry(self.kind)
            .or_default() += 1;
        if self.fail_close {
            return Err(DeviceError::Close(format!("{} is stuck", self.kind)));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MockCaptureDevices {
    behaviors: Mutex<HashMap<CaptureKind, DeviceBehavior>>,
    fail_close: Mutex<HashSet<CaptureKind>>,
    counters: Arc<Mutex<Counters>>,
    next_track: AtomicU64,
}

impl MockCaptureDevices {
    /// Devices that grant every open.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_behavior(&self, kind: CaptureKind, behavior: DeviceBehavior) {
        self.behaviors.lock().unwrap().insert(kind, behavior);
    }

    /// Make opens of `kind` wait; notify the returned gate to let one through.
    pub fn gate(&self, kind: CaptureKind) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.set_behavior(kind, DeviceBehavior::Gate(Arc::clone(&gate)));
        gate
    }

    /// Handles of `kind` report an error when closed.
    pub fn fail_close_of(&self, kind: CaptureKind) {
        self.fail_close.lock().unwrap().insert(kind);
    }

    /// Successful opens of `kind`.
    #[must_use]
    pub fn open_count(&self, kind: CaptureKind) -> usize {
        self.counters
            .lock()
            .unwrap()
            .opened
            .get(&kind)
            .copied()
            .unwrap_or(0)
    }

    #[must_use]
    pub fn close_count(&self, kind: CaptureKind) -> usize {
        self.counters
            .lock()
            .unwrap()
            .closed
            .get(&kind)
            .copied()
            .unwrap_or(0)
    }

    /// Handles of `kind` opened and not yet closed.
    #[must_use]
    pub fn live_handles(&self, kind: CaptureKind) -> usize {
        self.open_count(kind).saturating_sub(self.close_count(kind))
    }

    async fn open_kind(&self, kind: CaptureKind) -> Result<Box<dyn CaptureHandle>, DeviceError> {
        let behavior = self
            .behaviors
            .lock()
            .unwrap()
            .get(&kind)
            .cloned()
            .unwrap_or(DeviceBehavior::Grant);

        match behavior {
            DeviceBehavior::Grant => {}
            DeviceBehavior::Deny => {
                return Err(DeviceError::PermissionDenied(format!("{kind} blocked")));
            }
            DeviceBehavior::Unavailable => {
                return Err(DeviceError::Unavailable(format!("{kind} busy")));
            }
            DeviceBehavior::Gate(gate) => gate.notified().await,
        }

        *self
            .counters
            .lock()
            .unwrap()
            .opened
            .entry(kind)
            .or_default() += 1;

        let n = self.next_track.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockHandle {
            kind,
            track_id: format!("{kind}-{n}"),
            counters: Arc::clone(&self.counters),
            fail_close: self.fail_close.lock().unwrap().contains(&kind),
        }))
    }
}

#[async_trait]
impl CaptureDevices for MockCaptureDevices {
    async fn open_microphone(&self) -> Result<Box<dyn CaptureHandle>, DeviceError> {
        self.open_kind(CaptureKind::Microphone).await
    }

    async fn open_camera(&self) -> Result<Box<dyn CaptureHandle>, DeviceError> {
        self.open_kind(CaptureKind::Camera).await
    }

    async fn open_screen(&self) -> Result<Box<dyn CaptureHandle>, DeviceError> {
        self.open_kind(CaptureKind::Screen).await
    }
}
