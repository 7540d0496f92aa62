//! In-process broadcast of work-item status changes.
//!
//! Broadcast, not queue: every currently-subscribed reader receives every
//! notification written after it subscribed. Each subscription owns an
//! independent unbounded buffer, so a slow subscriber never blocks a fast one
//! or the writer, and a write with zero subscribers returns immediately.
//! Delivery is best-effort; a reconnecting client re-fetches current state
//! through the work-item queries instead of replaying missed notifications.

use std::pin::Pin;
use std::sync::Mutex;
use std::task::{Context, Poll};

use futures_util::Stream;
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Category of a notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    WorkItemStatusChanged,
    PatientRegistered,
    ProcessingFailed,
}

/// Ephemeral status message pushed to connected clients.
#[derive(Clone, Debug, Serialize)]
pub struct Notification {
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub transaction_id: Uuid,
    pub encounter_id: String,
    pub patient_id: String,
    pub message: String,
}

/// Fan-out broadcaster backed by one unbounded channel per subscriber.
#[derive(Default)]
pub struct NotificationHub {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<Notification>>>,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Broadcast a notification to all current subscribers.
    ///
    /// Never blocks: sends onto unbounded buffers and drops subscribers whose
    /// receiving end has gone away.
    pub fn write(&self, notification: Notification) {
        let mut subscribers = self.subscribers.lock().expect("subscriber list poisoned");
        subscribers.retain(|tx| tx.send(notification.clone()).is_ok());
    }

    /// Open a new subscription observing everything written from now on.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .expect("subscriber list poisoned")
            .push(tx);
        Subscription { rx }
    }

    /// Number of currently attached subscribers (stale senders included until
    /// the next write prunes them).
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().expect("subscriber list poisoned").len()
    }
}

/// One subscriber's view of the notification stream.
///
/// Dropping the subscription closes its buffer; the next write prunes the
/// dangling sender.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<Notification>,
}

impl Subscription {
    /// Receive the next notification, or `None` once the hub is gone.
    pub async fn recv(&mut self) -> Option<Notification> {
        self.rx.recv().await
    }
}

impl Stream for Subscription {
    type Item = Notification;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notification(message: &str) -> Notification {
        Notification {
            kind: NotificationKind::WorkItemStatusChanged,
            transaction_id: Uuid::new_v4(),
            encounter_id: "enc-1".into(),
            patient_id: "P1".into(),
            message: message.into(),
        }
    }

    #[test]
    fn write_with_zero_subscribers_returns_immediately() {
        let hub = NotificationHub::new();
        hub.write(notification("nobody listening"));
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn every_subscriber_sees_every_write_in_order() {
        let hub = NotificationHub::new();
        let mut subs = vec![hub.subscribe(), hub.subscribe(), hub.subscribe()];

        hub.write(notification("first"));
        hub.write(notification("second"));
        hub.write(notification("third"));

        for sub in &mut subs {
            for expected in ["first", "second", "third"] {
                let n = sub.recv().await.expect("notification");
                assert_eq!(n.message, expected);
            }
        }
    }

    #[tokio::test]
    async fn subscribers_only_see_writes_after_subscribing() {
        let hub = NotificationHub::new();
        hub.write(notification("before"));

        let mut sub = hub.subscribe();
        hub.write(notification("after"));

        let n = sub.recv().await.expect("notification");
        assert_eq!(n.message, "after");
    }

    #[tokio::test]
    async fn dropped_subscribers_are_pruned_on_write() {
        let hub = NotificationHub::new();
        let sub = hub.subscribe();
        let _kept = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 2);

        drop(sub);
        hub.write(notification("prune"));
        assert_eq!(hub.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn subscription_works_as_a_stream() {
        use futures_util::StreamExt;

        let hub = NotificationHub::new();
        let mut sub = hub.subscribe();
        hub.write(notification("streamed"));

        let n = sub.next().await.expect("stream item");
        assert_eq!(n.message, "streamed");
    }

    #[tokio::test]
    async fn slow_subscriber_does_not_block_the_writer() {
        let hub = NotificationHub::new();
        let mut slow = hub.subscribe();

        // Thousands of writes with no reads in between must not block.
        for i in 0..5_000 {
            hub.write(notification(&format!("n{i}")));
        }

        let first = slow.recv().await.expect("buffered");
        assert_eq!(first.message, "n0");
    }
}
