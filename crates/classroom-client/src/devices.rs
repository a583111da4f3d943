//! Capture device collaborator contract.
//!
//! The browser (or native) capture API is external. The controller only needs
//! to open a device of a given kind and later close it again. Opening may
//! wait on a user permission prompt for an unbounded time.

use crate::errors::DeviceError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of local capture resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureKind {
    Microphone,
    Camera,
    Screen,
}

impl CaptureKind {
    /// All kinds, in publication order.
    pub const ALL: [CaptureKind; 3] = [
        CaptureKind::Microphone,
        CaptureKind::Camera,
        CaptureKind::Screen,
    ];

    /// Returns the kind as a string for logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            CaptureKind::Microphone => "microphone",
            CaptureKind::Camera => "camera",
            CaptureKind::Screen => "screen",
        }
    }
}

impl fmt::Display for CaptureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to a local track, as handed to the transport for (un)publishing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackRef {
    pub kind: CaptureKind,
    pub track_id: String,
}

/// An open capture device. Owned exclusively by the resource publisher.
pub trait CaptureHandle: Send + Sync + fmt::Debug {
    /// The kind this handle was opened for.
    fn kind(&self) -> CaptureKind;

    /// Opaque track id passed to the transport.
    fn track_id(&self) -> &str;

    /// Stop capturing and release the device.
    ///
    /// Consumes the handle; a handle is never reused after close, even when
    /// closing reports an error.
    fn close(self: Box<Self>) -> Result<(), DeviceError>;

    /// Track reference for transport calls.
    fn track_ref(&self) -> TrackRef {
        TrackRef {
            kind: self.kind(),
            track_id: self.track_id().to_string(),
        }
    }
}

/// Capture device API.
#[async_trait]
pub trait CaptureDevices: Send + Sync {
    /// Open the default microphone.
    async fn open_microphone(&self) -> Result<Box<dyn CaptureHandle>, DeviceError>;

    /// Open the default camera.
    async fn open_camera(&self) -> Result<Box<dyn CaptureHandle>, DeviceError>;

    /// Start a screen capture (usually shows a picker).
    async fn open_screen(&self) -> Result<Box<dyn CaptureHandle>, DeviceError>;

    /// Open a device of the given kind.
    async fn open(&self, kind: CaptureKind) -> Result<Box<dyn CaptureHandle>, DeviceError> {
        match kind {
            CaptureKind::Microphone => self.open_microphone().await,
            CaptureKind::Camera => self.open_camera().await,
            CaptureKind::Screen => self.open_screen().await,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct StaticHandle(CaptureKind);

    impl CaptureHandle for StaticHandle {
        fn kind(&self) -> CaptureKind {
            self.0
        }

        fn track_id(&self) -> &str {
            "track-1"
        }

        fn close(self: Box<Self>) -> Result<(), DeviceError> {
            Ok(())
        }
    }

    struct StaticDevices;

    #[async_trait]
    impl CaptureDevices for StaticDevices {
        async fn open_microphone(&self) -> Result<Box<dyn CaptureHandle>, DeviceError> {
            Ok(Box::new(StaticHandle(CaptureKind::Microphone)))
        }

        async fn open_camera(&self) -> Result<Box<dyn CaptureHandle>, DeviceError> {
            Ok(Box::new(StaticHandle(CaptureKind::Camera)))
        }

        async fn open_screen(&self) -> Result<Box<dyn CaptureHandle>, DeviceError> {
            Err(DeviceError::PermissionDenied("picker dismissed".to_string()))
        }
    }

    #[tokio::test]
    async fn test_open_dispatches_by_kind() {
        let devices = StaticDevices;

        let mic = devices.open(CaptureKind::Microphone).await.unwrap();
        assert_eq!(mic.kind(), CaptureKind::Microphone);

        let cam = devices.open(CaptureKind::Camera).await.unwrap();
        assert_eq!(
            cam.track_ref(),
            TrackRef {
                kind: CaptureKind::Camera,
                track_id: "track-1".to_string()
            }
        );

        let screen = devices.open(CaptureKind::Screen).await;
        assert!(matches!(screen, Err(DeviceError::PermissionDenied(_))));
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(CaptureKind::Microphone.as_str(), "microphone");
        assert_eq!(CaptureKind::Screen.to_string(), "screen");
        assert_eq!(CaptureKind::ALL.len(), 3);
    }
}
