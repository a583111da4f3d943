//! Local capture resources and their publication.
//!
//! The publisher owns every open capture handle. `set_desired` records what
//! the user wants; `reconcile` is the single place that moves the transport's
//! published set towards it. Camera and screen are mutually exclusive on the
//! wire: while screen sharing is enabled the camera is never published, even
//! if it stays enabled and open.
//!
//! Device opens can wait on a permission prompt indefinitely, so they run in
//! spawned tasks and report back through an internal channel. Each open
//! carries a ticket; a result whose ticket is no longer pending (the resource
//! was disabled or released meanwhile) is closed on arrival.

use crate::devices::{CaptureDevices, CaptureHandle, CaptureKind, TrackRef};
use crate::errors::{DeviceError, SessionError};
use crate::observability::metrics;
use crate::overlays::{NotificationQueue, Severity};
use crate::transport::Transport;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Result of a spawned device open.
#[derive(Debug)]
pub struct DeviceOpened {
    pub kind: CaptureKind,
    pub ticket: u64,
    pub result: Result<Box<dyn CaptureHandle>, DeviceError>,
}

#[derive(Debug, Default)]
struct ResourceSlot {
    enabled: bool,
    published: bool,
    handle: Option<Box<dyn CaptureHandle>>,
    pending: Option<u64>,
}

pub struct ResourcePublisher {
    transport: Arc<dyn Transport>,
    devices: Arc<dyn CaptureDevices>,
    notifications: NotificationQueue,
    liveness: CancellationToken,
    microphone: ResourceSlot,
    camera: ResourceSlot,
    screen: ResourceSlot,
    /// Whether the transport has joined; nothing is published before that.
    joined: bool,
    next_ticket: u64,
    opened_tx: mpsc::UnboundedSender<DeviceOpened>,
    opened_rx: mpsc::UnboundedReceiver<DeviceOpened>,
}

impl std::fmt::Debug for ResourcePublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourcePublisher")
            .field("microphone", &self.microphone)
            .field("camera", &self.camera)
            .field("screen", &self.screen)
            .field("joined", &self.joined)
            .finish_non_exhaustive()
    }
}

impl ResourcePublisher {
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        devices: Arc<dyn CaptureDevices>,
        notifications: NotificationQueue,
        liveness: CancellationToken,
    ) -> Self {
        let (opened_tx, opened_rx) = mpsc::unbounded_channel();
        Self {
            transport,
            devices,
            notifications,
            liveness,
            microphone: ResourceSlot::default(),
            camera: ResourceSlot::default(),
            screen: ResourceSlot::default(),
            joined: false,
            next_ticket: 0,
            opened_tx,
            opened_rx,
        }
    }

    fn slot(&self, kind: CaptureKind) -> &ResourceSlot {
        match kind {
            CaptureKind::Microphone => &self.microphone,
            CaptureKind::Camera => &self.camera,
            CaptureKind::Screen => &self.screen,
        }
    }

    fn slot_mut(&mut self, kind: CaptureKind) -> &mut ResourceSlot {
        match kind {
            CaptureKind::Microphone => &mut self.microphone,
            CaptureKind::Camera => &mut self.camera,
            CaptureKind::Screen => &mut self.screen,
        }
    }

    /// Record the desired state of `kind` and converge towards it.
    ///
    /// Enabling a resource without a handle starts a device open in the
    /// background; publication follows once the handle arrives.
    pub async fn set_desired(&mut self, kind: CaptureKind, enabled: bool) {
        debug!(
            target: "classroom.lifecycle.publisher",
            kind = %kind,
            enabled,
            "Desired state changed"
        );

        let slot = self.slot_mut(kind);
        slot.enabled = enabled;
        if enabled {
            if slot.handle.is_none() && slot.pending.is_none() {
                self.begin_open(kind);
            }
        } else {
            slot.pending = None;
        }

        self.reconcile().await;
    }

    /// Mark the transport joined (or not) and converge.
    pub async fn set_joined(&mut self, joined: bool) {
        self.joined = joined;
        self.reconcile().await;
    }

    fn begin_open(&mut self, kind: CaptureKind) {
        self.next_ticket = self.next_ticket.wrapping_add(1);
        let ticket = self.next_ticket;
        self.slot_mut(kind).pending = Some(ticket);

        let devices = Arc::clone(&self.devices);
        let liveness = self.liveness.clone();
        let opened_tx = self.opened_tx.clone();

        tokio::spawn(async move {
            let result = devices.open(kind).await;

            if liveness.is_cancelled() {
                if let Ok(handle) = result {
                    debug!(
                        target: "classroom.lifecycle.publisher",
                        kind = %kind,
                        "Device opened after dispose, closing"
                    );
                    close_quietly(handle);
                }
                return;
            }

            if let Err(mpsc::error::SendError(event)) = opened_tx.send(DeviceOpened {
                kind,
                ticket,
                result,
            }) {
                if let Ok(handle) = event.result {
                    close_quietly(handle);
                }
            }
        });
    }

    /// Wait for the next device open result.
    pub async fn next_device_event(&mut self) -> Option<DeviceOpened> {
        self.opened_rx.recv().await
    }

    /// Apply a device open result.
    pub async fn handle_device_event(&mut self, event: DeviceOpened) {
        let DeviceOpened {
            kind,
            ticket,
            result,
        } = event;

        let slot = self.slot_mut(kind);
        if slot.pending != Some(ticket) {
            if let Ok(handle) = result {
                debug!(
                    target: "classroom.lifecycle.publisher",
                    kind = %kind,
                    ticket,
                    "Stale device open, closing"
                );
                close_quietly(handle);
            }
            return;
        }
        slot.pending = None;

        match result {
            Ok(handle) => {
                debug!(
                    target: "classroom.lifecycle.publisher",
                    kind = %kind,
                    track_id = handle.track_id(),
                    "Device opened"
                );
                slot.handle = Some(handle);
            }
            Err(e) => {
                slot.enabled = false;
                warn!(
                    target: "classroom.lifecycle.publisher",
                    kind = %kind,
                    error = %e,
                    "Failed to open capture device"
                );
                metrics::record_device_error(kind.as_str(), e.label());
                self.notifications.push(e.user_message(), Severity::Error);
            }
        }

        self.reconcile().await;
    }

    /// Drive every pending device open to completion.
    pub async fn settle(&mut self) {
        while CaptureKind::ALL
            .iter()
            .any(|kind| self.slot(*kind).pending.is_some())
        {
            match self.opened_rx.recv().await {
                Some(event) => self.handle_device_event(event).await,
                None => break,
            }
        }
    }

    fn should_publish(&self, kind: CaptureKind) -> bool {
        let slot = self.slot(kind);
        self.joined
            && slot.enabled
            && slot.handle.is_some()
            && !(kind == CaptureKind::Camera && self.screen.enabled)
    }

    /// Converge published state to desired state.
    ///
    /// Unpublishes first so the camera is off the wire before the screen
    /// goes on. Handles of disabled resources are closed last.
    async fn reconcile(&mut self) {
        let (to_unpublish, to_publish): (Vec<CaptureKind>, Vec<CaptureKind>) = {
            let mut to_unpublish = Vec::new();
            let mut to_publish = Vec::new();
            for kind in CaptureKind::ALL {
                let want = self.should_publish(kind);
                let published = self.slot(kind).published;
                if published && !want {
                    to_unpublish.push(kind);
                } else if !published && want {
                    to_publish.push(kind);
                }
            }
            (to_unpublish, to_publish)
        };

        if !to_unpublish.is_empty() {
            let tracks = self.track_refs(&to_unpublish);
            if let Err(e) = self.transport.unpublish(&tracks).await {
                warn!(
                    target: "classroom.lifecycle.publisher",
                    error = %e,
                    "Unpublish failed, treating tracks as unpublished"
                );
            }
            for kind in &to_unpublish {
                self.slot_mut(*kind).published = false;
            }
        }

        for kind in to_publish {
            let tracks = self.track_refs(&[kind]);
            match self.transport.publish(&tracks).await {
                Ok(()) => {
                    info!(
                        target: "classroom.lifecycle.publisher",
                        kind = %kind,
                        "Track published"
                    );
                    self.slot_mut(kind).published = true;
                }
                Err(e) => {
                    warn!(
                        target: "classroom.lifecycle.publisher",
                        kind = %kind,
                        error = %e,
                        "Publish failed"
                    );
                    metrics::record_publish_failure(kind.as_str());
                    self.notifications.push(
                        format!("Could not share your {kind}"),
                        Severity::Error,
                    );
                }
            }
        }

        for kind in CaptureKind::ALL {
            let slot = self.slot_mut(kind);
            if !slot.enabled && !slot.published {
                if let Some(handle) = slot.handle.take() {
                    if let Err(e) = handle.close() {
                        warn!(
                            target: "classroom.lifecycle.publisher",
                            kind = %kind,
                            error = %e,
                            "Failed to close disabled device"
                        );
                        metrics::record_device_error(kind.as_str(), e.label());
                    }
                }
            }
        }

        metrics::set_published_tracks(self.current_published_set().len());
    }

    fn track_refs(&self, kinds: &[CaptureKind]) -> Vec<TrackRef> {
        kinds
            .iter()
            .filter_map(|kind| self.slot(*kind).handle.as_ref().map(|h| h.track_ref()))
            .collect()
    }

    /// Stop and release one resource.
    ///
    /// Its own track is unpublished first. The handle is dropped even when
    /// unpublishing or closing fails; the first error is returned.
    pub async fn release(&mut self, kind: CaptureKind) -> Result<(), SessionError> {
        let mut result = Ok(());

        let published_track = {
            let slot = self.slot_mut(kind);
            slot.enabled = false;
            slot.pending = None;
            if slot.published {
                slot.handle.as_ref().map(|h| h.track_ref())
            } else {
                None
            }
        };

        if let Some(track) = published_track {
            if let Err(e) = self.transport.unpublish(&[track]).await {
                result = Err(e.into());
            }
        }

        let slot = self.slot_mut(kind);
        slot.published = false;
        if let Some(handle) = slot.handle.take() {
            if let Err(e) = handle.close() {
                metrics::record_device_error(kind.as_str(), e.label());
                if result.is_ok() {
                    result = Err(e.into());
                }
            }
        }

        debug!(
            target: "classroom.lifecycle.publisher",
            kind = %kind,
            ok = result.is_ok(),
            "Resource released"
        );
        result
    }

    /// Unpublish every published track and mark the transport as not joined.
    ///
    /// Published flags are cleared even if the transport call fails.
    pub async fn unpublish_all(&mut self) -> Result<(), SessionError> {
        self.joined = false;

        let published: Vec<CaptureKind> = self.current_published_set();
        if published.is_empty() {
            return Ok(());
        }

        let tracks = self.track_refs(&published);
        let result = self.transport.unpublish(&tracks).await;

        for kind in published {
            self.slot_mut(kind).published = false;
        }
        metrics::set_published_tracks(0);

        result.map_err(SessionError::from)
    }

    /// Close every handle and drop in-flight open results. Used on dispose.
    pub fn close_all(&mut self) {
        for kind in CaptureKind::ALL {
            let slot = self.slot_mut(kind);
            slot.enabled = false;
            slot.published = false;
            slot.pending = None;
            if let Some(handle) = slot.handle.take() {
                close_quietly(handle);
            }
        }
        while let Ok(event) = self.opened_rx.try_recv() {
            if let Ok(handle) = event.result {
                close_quietly(handle);
            }
        }
    }

    /// Resources currently published to the transport.
    #[must_use]
    pub fn current_published_set(&self) -> Vec<CaptureKind> {
        CaptureKind::ALL
            .into_iter()
            .filter(|kind| self.slot(*kind).published)
            .collect()
    }

    /// Resources the user currently wants on.
    #[must_use]
    pub fn desired_set(&self) -> Vec<CaptureKind> {
        CaptureKind::ALL
            .into_iter()
            .filter(|kind| self.slot(*kind).enabled)
            .collect()
    }

    #[must_use]
    pub fn is_enabled(&self, kind: CaptureKind) -> bool {
        self.slot(kind).enabled
    }

    #[must_use]
    pub fn has_handle(&self, kind: CaptureKind) -> bool {
        self.slot(kind).handle.is_some()
    }
}

fn close_quietly(handle: Box<dyn CaptureHandle>) {
    let kind = handle.kind();
    if let Err(e) = handle.close() {
        warn!(
            target: "classroom.lifecycle.publisher",
            kind = %kind,
            error = %e,
            "Failed to close device"
        );
    }
}
