//! Floating participant popups.
//!
//! At most one popup exists per participant. Slots are handed out from a fixed
//! corner order; when every corner is taken the new popup is placed in the
//! first corner anyway and overlaps whatever is there.

use chrono::{DateTime, Utc};
use common::types::ParticipantId;
use serde::Serialize;
use std::fmt;
use tracing::debug;
use uuid::Uuid;

/// Visible area popups are positioned in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

/// Size of a popup tile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PopupSize {
    pub width: f64,
    pub height: f64,
}

/// Top-left corner of a popup, in viewport coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// Placement corners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PopupSlot {
    BottomRight,
    TopRight,
    BottomLeft,
    TopLeft,
}

impl PopupSlot {
    /// Allocation order. The first entry doubles as the overflow slot.
    pub const ORDER: [PopupSlot; 4] = [
        PopupSlot::BottomRight,
        PopupSlot::TopRight,
        PopupSlot::BottomLeft,
        PopupSlot::TopLeft,
    ];
}

/// Whose video the popup shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PopupKind {
    Local,
    Remote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct PopupId(Uuid);

impl PopupId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for PopupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PopupWindow {
    pub id: PopupId,
    pub participant_id: ParticipantId,
    pub kind: PopupKind,
    pub slot: PopupSlot,
    pub position: Point,
    pub created_at: DateTime<Utc>,
}

/// Tracks open popups and their placement.
#[derive(Debug)]
pub struct PopupWindowManager {
    windows: Vec<PopupWindow>,
    viewport: Viewport,
    size: PopupSize,
    margin: f64,
}

impl PopupWindowManager {
    #[must_use]
    pub fn new(viewport: Viewport, size: PopupSize, margin: f64) -> Self {
        Self {
            windows: Vec::new(),
            viewport,
            size,
            margin,
        }
    }

    /// Open a popup for `participant_id`, replacing any popup it already has.
    pub fn open(&mut self, participant_id: ParticipantId, kind: PopupKind) -> PopupWindow {
        if let Some(replaced) = self.remove_participant(&participant_id) {
            debug!(
                target: "classroom.overlays",
                participant_id = %participant_id,
                popup_id = %replaced.id,
                "Replacing existing popup"
            );
        }

        let slot = self.next_free_slot();
        let window = PopupWindow {
            id: PopupId::new(),
            participant_id,
            kind,
            slot,
            position: self.anchor(slot),
            created_at: Utc::now(),
        };

        debug!(
            target: "classroom.overlays",
            participant_id = %window.participant_id,
            popup_id = %window.id,
            slot = ?slot,
            "Popup opened"
        );

        self.windows.push(window.clone());
        window
    }

    /// Close a popup by id. Returns false if no such popup is open.
    pub fn close(&mut self, id: PopupId) -> bool {
        let before = self.windows.len();
        self.windows.retain(|w| w.id != id);
        before != self.windows.len()
    }

    /// Close the popup of a participant, if any.
    pub fn close_participant(&mut self, participant_id: &ParticipantId) -> bool {
        self.remove_participant(participant_id).is_some()
    }

    /// Move a popup, clamped so it stays inside the viewport.
    ///
    /// Returns the applied position, or `None` for an unknown id.
    pub fn reposition(&mut self, id: PopupId, point: Point) -> Option<Point> {
        let clamped = self.clamp(point);
        let window = self.windows.iter_mut().find(|w| w.id == id)?;
        window.position = clamped;
        Some(clamped)
    }

    /// Change the viewport and pull every popup back inside it.
    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
        for index in 0..self.windows.len() {
            if let Some(position) = self.windows.get(index).map(|w| w.position) {
                let clamped = self.clamp(position);
                if let Some(window) = self.windows.get_mut(index) {
                    window.position = clamped;
                }
            }
        }
    }

    /// Open popups, oldest first.
    #[must_use]
    pub fn windows(&self) -> &[PopupWindow] {
        &self.windows
    }

    pub fn clear(&mut self) {
        self.windows.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    fn remove_participant(&mut self, participant_id: &ParticipantId) -> Option<PopupWindow> {
        let index = self
            .windows
            .iter()
            .position(|w| &w.participant_id == participant_id)?;
        Some(self.windows.remove(index))
    }

    fn next_free_slot(&self) -> PopupSlot {
        PopupSlot::ORDER
            .into_iter()
            .find(|slot| !self.windows.iter().any(|w| w.slot == *slot))
            .unwrap_or(PopupSlot::BottomRight)
    }

    fn anchor(&self, slot: PopupSlot) -> Point {
        let right = self.viewport.width - self.size.width - self.margin;
        let bottom = self.viewport.height - self.size.height - self.margin;
        let point = match slot {
            PopupSlot::BottomRight => Point { x: right, y: bottom },
            PopupSlot::TopRight => Point {
                x: right,
                y: self.margin,
            },
            PopupSlot::BottomLeft => Point {
                x: self.margin,
                y: bottom,
            },
            PopupSlot::TopLeft => Point {
                x: self.margin,
                y: self.margin,
            },
        };
        self.clamp(point)
    }

    fn clamp(&self, point: Point) -> Point {
        let max_x = (self.viewport.width - self.size.width).max(0.0);
        let max_y = (self.viewport.height - self.size.height).max(0.0);
        Point {
            x: clamp_axis(point.x, max_x),
            y: clamp_axis(point.y, max_y),
        }
    }
}

fn clamp_axis(value: f64, max: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, max)
    }
}
