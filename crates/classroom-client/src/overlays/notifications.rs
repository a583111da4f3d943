//! Bounded, self-expiring notification queue.
//!
//! Holds at most `max_visible` entries; a push past the bound evicts the
//! oldest. Each entry removes itself when its TTL elapses. The queue shares
//! the controller's liveness token: after disposal pushes are ignored and
//! pending expiry timers do nothing.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Success,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct NotificationId(Uuid);

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationEntry {
    pub id: NotificationId,
    pub message: String,
    pub severity: Severity,
    pub created_at: DateTime<Utc>,
    pub ttl_ms: u64,
}

struct Inner {
    entries: Mutex<VecDeque<NotificationEntry>>,
    changes: watch::Sender<Vec<NotificationEntry>>,
    liveness: CancellationToken,
    max_visible: usize,
    default_ttl: Duration,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, VecDeque<NotificationEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, entries: &VecDeque<NotificationEntry>) {
        self.changes.send_replace(entries.iter().cloned().collect());
    }

    fn remove(&self, id: NotificationId) -> bool {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|e| e.id != id);
        let removed = before != entries.len();
        if removed {
            self.publish(&entries);
        }
        removed
    }
}

/// Cloneable handle to a notification queue.
#[derive(Clone)]
pub struct NotificationQueue {
    inner: Arc<Inner>,
}

impl fmt::Debug for NotificationQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationQueue")
            .field("len", &self.len())
            .field("max_visible", &self.inner.max_visible)
            .field("disposed", &self.inner.liveness.is_cancelled())
            .finish()
    }
}

impl NotificationQueue {
    /// Create a queue bound to `liveness`. `max_visible` is raised to 1 if 0.
    #[must_use]
    pub fn new(max_visible: usize, default_ttl: Duration, liveness: CancellationToken) -> Self {
        let (changes, _) = watch::channel(Vec::new());
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(VecDeque::new()),
                changes,
                liveness,
                max_visible: max_visible.max(1),
                default_ttl,
            }),
        }
    }

    /// Push with the default TTL.
    pub fn push(&self, message: impl Into<String>, severity: Severity) -> Option<NotificationId> {
        self.push_with_ttl(message, severity, self.inner.default_ttl)
    }

    /// Push a message that removes itself after `ttl`.
    ///
    /// Returns `None` (and does nothing) once the owner has been disposed.
    pub fn push_with_ttl(
        &self,
        message: impl Into<String>,
        severity: Severity,
        ttl: Duration,
    ) -> Option<NotificationId> {
        if self.inner.liveness.is_cancelled() {
            trace!(target: "classroom.overlays", "Notification dropped after dispose");
            return None;
        }

        let entry = NotificationEntry {
            id: NotificationId(Uuid::new_v4()),
            message: message.into(),
            severity,
            created_at: Utc::now(),
            ttl_ms: u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
        };
        let id = entry.id;

        {
            let mut entries = self.inner.lock();
            entries.push_back(entry);
            while entries.len() > self.inner.max_visible {
                if let Some(evicted) = entries.pop_front() {
                    debug!(
                        target: "classroom.overlays",
                        notification_id = %evicted.id,
                        "Evicted oldest notification"
                    );
                }
            }
            self.inner.publish(&entries);
        }

        self.schedule_expiry(id, ttl);
        Some(id)
    }

    /// Remove an entry before its TTL. Returns false if it is already gone.
    pub fn dismiss(&self, id: NotificationId) -> bool {
        self.inner.remove(id)
    }

    /// Current entries, oldest first.
    #[must_use]
    pub fn entries(&self) -> Vec<NotificationEntry> {
        self.inner.lock().iter().cloned().collect()
    }

    /// Watch the entry list.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Vec<NotificationEntry>> {
        self.inner.changes.subscribe()
    }

    pub fn clear(&self) {
        let mut entries = self.inner.lock();
        entries.clear();
        self.inner.publish(&entries);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn schedule_expiry(&self, id: NotificationId, ttl: Duration) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!(
                target: "classroom.overlays",
                notification_id = %id,
                "No runtime for expiry timer, entry stays until dismissed or evicted"
            );
            return;
        };

        let inner: Weak<Inner> = Arc::downgrade(&self.inner);
        let liveness = self.inner.liveness.clone();
        runtime.spawn(async move {
            tokio::select! {
                biased;
                () = liveness.cancelled() => {}
                () = tokio::time::sleep(ttl) => {
                    if let Some(inner) = inner.upgrade() {
                        if inner.remove(id) {
                            trace!(target: "classroom.overlays", notification_id = %id, "Notification expired");
                        }
                    }
                }
            }
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn queue() -> (NotificationQueue, CancellationToken) {
        let liveness = CancellationToken::new();
        (
            NotificationQueue::new(4, Duration::from_millis(3000), liveness.clone()),
            liveness,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_fifth_push_evicts_oldest() {
        let (notifications, _liveness) = queue();

        let ids: Vec<NotificationId> = (1..=5)
            .map(|n| {
                notifications
                    .push(format!("message {n}"), Severity::Info)
                    .unwrap()
            })
            .collect();

        let entries = notifications.entries();
        assert_eq!(entries.len(), 4);
        assert!(entries.iter().all(|e| e.id != ids[0]));
        assert_eq!(entries[0].message, "message 2");
        assert_eq!(entries[3].message, "message 5");
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_ttl() {
        let (notifications, _liveness) = queue();

        notifications.push("default ttl", Severity::Success);
        notifications.push_with_ttl("short ttl", Severity::Info, Duration::from_millis(500));
        assert_eq!(notifications.len(), 2);

        tokio::time::sleep(Duration::from_millis(600)).await;
        let entries = notifications.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "default ttl");
        assert_eq!(entries[0].ttl_ms, 3000);

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(notifications.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dismiss() {
        let (notifications, _liveness) = queue();

        let id = notifications.push("camera blocked", Severity::Error).unwrap();
        assert!(notifications.dismiss(id));
        assert!(!notifications.dismiss(id));
        assert!(notifications.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_after_dispose_is_noop() {
        let (notifications, liveness) = queue();
        notifications.push("before", Severity::Info);

        liveness.cancel();

        assert!(notifications.push("after", Severity::Error).is_none());
        assert_eq!(notifications.len(), 1);

        // Expiry timers are inert once disposed.
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(notifications.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_sees_changes() {
        let (notifications, _liveness) = queue();
        let mut rx = notifications.subscribe();

        notifications.push("hello", Severity::Info);
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().len(), 1);

        notifications.clear();
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().is_empty());
    }

    #[test]
    fn test_push_without_runtime_keeps_entry() {
        let (notifications, _liveness) = queue();
        assert!(notifications.push("no timer", Severity::Info).is_some());
        assert_eq!(notifications.len(), 1);
    }
}
