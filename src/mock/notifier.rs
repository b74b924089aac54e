//! Notifiers: one that records for assertions, one that only logs

use async_trait::async_trait;
use std::sync::Mutex;
use tracing::info;

use crate::models::{NotificationKind, WagerAction, WagerNotification};
use crate::ports::Notifier;

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<WagerNotification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<WagerNotification> {
        self.sent.lock().unwrap().clone()
    }

    pub fn of_kind(&self, kind: NotificationKind) -> Vec<WagerNotification> {
        self.all().into_iter().filter(|n| n.kind == kind).collect()
    }

    pub fn count(&self, kind: NotificationKind, action: WagerAction) -> usize {
        self.all().iter().filter(|n| n.kind == kind && n.action == action).count()
    }

    pub fn for_wager(&self, wager_id: u64) -> Vec<WagerNotification> {
        self.all().into_iter().filter(|n| n.wager.id == Some(wager_id)).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: WagerNotification) {
        self.sent.lock().unwrap().push(notification);
    }
}

/// Standalone-mode notifier
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, n: WagerNotification) {
        let payload = serde_json::to_string(&n.wager).unwrap_or_default();
        info!(
            kind = ?n.kind,
            action = n.action.as_str(),
            reason = n.reason.as_deref().unwrap_or(""),
            payload = %payload,
            "📣 notification"
        );
    }
}
