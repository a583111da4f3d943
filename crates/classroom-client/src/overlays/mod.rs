//! Session-scoped UI side state: notifications and participant popups.

pub mod notifications;
pub mod popups;

pub use notifications::{NotificationEntry, NotificationId, NotificationQueue, Severity};
pub use popups::{
    Point, PopupId, PopupKind, PopupSize, PopupSlot, PopupWindow, PopupWindowManager, Viewport,
};
