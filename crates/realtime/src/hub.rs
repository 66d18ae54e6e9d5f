//! In-process fan-out hub: one broadcast channel per session.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use sprintpoker_core::{ChangeEvent, ChangeKind, SessionId};
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::{Notifier, Subscription};

/// Events buffered per session before a slow subscriber starts lagging.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

#[derive(Default)]
struct Channel {
    /// `None` while nobody is subscribed
    sender: Option<broadcast::Sender<ChangeEvent>>,
    last_sequence: u64,
}

/// Broadcast hub keyed by session.
///
/// The sequence counter of a session survives its subscribers coming and
/// going; it is forgotten only when the session is closed.
pub struct FanoutHub {
    capacity: usize,
    channels: Mutex<HashMap<SessionId, Channel>>,
}

impl Default for FanoutHub {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl FanoutHub {
    /// Create a hub buffering up to `capacity` events per session.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Number of live subscriptions for a session.
    pub fn subscriber_count(&self, session_id: SessionId) -> usize {
        self.lock()
            .get(&session_id)
            .and_then(|c| c.sender.as_ref())
            .map(|s| s.receiver_count())
            .unwrap_or(0)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionId, Channel>> {
        // Nothing under this lock can leave the map half-updated.
        self.channels.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Notifier for FanoutHub {
    fn subscribe(&self, session_id: SessionId) -> Subscription {
        let mut channels = self.lock();
        let channel = channels.entry(session_id).or_default();
        let receiver = match &channel.sender {
            Some(sender) => sender.subscribe(),
            None => {
                let (sender, receiver) = broadcast::channel(self.capacity);
                channel.sender = Some(sender);
                receiver
            }
        };
        debug!(%session_id, "subscribed");
        Subscription::new(session_id, receiver)
    }

    fn publish(&self, session_id: SessionId, kind: ChangeKind) -> ChangeEvent {
        let mut channels = self.lock();
        let channel = channels.entry(session_id).or_default();
        channel.last_sequence += 1;

        let event = ChangeEvent {
            session_id,
            sequence: channel.last_sequence,
            timestamp: chrono::Utc::now(),
            kind,
        };

        if let Some(sender) = &channel.sender {
            match sender.send(event.clone()) {
                Ok(receivers) => {
                    trace!(%session_id, sequence = event.sequence, receivers, kind = event.kind.name(), "published")
                }
                Err(_) => channel.sender = None,
            }
        }

        if event.kind.is_terminal() {
            channels.remove(&session_id);
            debug!(%session_id, "channel closed after {}", event.kind.name());
        }
        event
    }

    fn unsubscribe(&self, subscription: Subscription) {
        let session_id = subscription.session_id();
        drop(subscription);

        let mut channels = self.lock();
        if let Some(channel) = channels.get_mut(&session_id) {
            if channel.sender.as_ref().is_some_and(|s| s.receiver_count() == 0) {
                channel.sender = None;
            }
        }
        debug!(%session_id, "unsubscribed");
    }

    fn close(&self, session_id: SessionId) {
        if self.lock().remove(&session_id).is_some() {
            debug!(%session_id, "channel closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Notification;

    fn sequence(n: Option<Notification>) -> u64 {
        match n {
            Some(Notification::Event(e)) => e.sequence,
            other => panic!("expected event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_events_arrive_in_publish_order() {
        let hub = FanoutHub::default();
        let session = SessionId::new();
        let mut sub = hub.subscribe(session);

        for _ in 0..5 {
            hub.publish(session, ChangeKind::Reset);
        }

        for expected in 1..=5 {
            assert_eq!(sequence(sub.recv().await), expected);
        }
    }

    #[tokio::test]
    async fn test_subscription_is_scoped_to_session() {
        let hub = FanoutHub::default();
        let watched = SessionId::new();
        let other = SessionId::new();
        let mut sub = hub.subscribe(watched);

        hub.publish(other, ChangeKind::Revealed);
        assert!(sub.try_recv().is_none());

        hub.publish(watched, ChangeKind::Revealed);
        assert!(matches!(sub.try_recv(), Some(Notification::Event(e)) if e.session_id == watched));
    }

    #[tokio::test]
    async fn test_every_subscriber_gets_each_event() {
        let hub = FanoutHub::default();
        let session = SessionId::new();
        let mut a = hub.subscribe(session);
        let mut b = hub.subscribe(session);

        hub.publish(session, ChangeKind::Revealed);

        assert_eq!(sequence(a.recv().await), 1);
        assert_eq!(sequence(b.recv().await), 1);
    }

    #[tokio::test]
    async fn test_slow_subscriber_gets_resync() {
        let hub = FanoutHub::new(2);
        let session = SessionId::new();
        let mut sub = hub.subscribe(session);

        for _ in 0..5 {
            hub.publish(session, ChangeKind::Reset);
        }

        assert_eq!(sub.recv().await, Some(Notification::Resync { missed: 3 }));
        assert_eq!(sequence(sub.recv().await), 4);
        assert_eq!(sequence(sub.recv().await), 5);
    }

    #[tokio::test]
    async fn test_terminal_event_ends_stream() {
        let hub = FanoutHub::default();
        let session = SessionId::new();
        let mut sub = hub.subscribe(session);

        hub.publish(session, ChangeKind::Revealed);
        hub.publish(session, ChangeKind::Finalized { estimate: 8 });

        assert_eq!(sequence(sub.recv().await), 1);
        assert_eq!(sequence(sub.recv().await), 2);
        assert_eq!(sub.recv().await, None);
        assert_eq!(hub.subscriber_count(session), 0);
    }

    #[tokio::test]
    async fn test_sequence_survives_resubscribe() {
        let hub = FanoutHub::default();
        let session = SessionId::new();

        let sub = hub.subscribe(session);
        hub.publish(session, ChangeKind::Revealed);
        hub.unsubscribe(sub);
        assert_eq!(hub.subscriber_count(session), 0);

        // Published with nobody listening.
        hub.publish(session, ChangeKind::Reset);

        let mut sub = hub.subscribe(session);
        hub.publish(session, ChangeKind::Revealed);
        assert_eq!(sequence(sub.recv().await), 3);
    }

    #[tokio::test]
    async fn test_publish_does_not_wait_for_receivers() {
        let hub = FanoutHub::new(1);
        let session = SessionId::new();
        let _idle = hub.subscribe(session);

        let published = tokio::time::timeout(std::time::Duration::from_millis(100), async {
            for _ in 0..1_000 {
                hub.publish(session, ChangeKind::Reset);
            }
        })
        .await;
        assert!(published.is_ok());
    }

    #[tokio::test]
    async fn test_close_ends_stream() {
        let hub = FanoutHub::default();
        let session = SessionId::new();
        let mut sub = hub.subscribe(session);

        hub.close(session);
        assert_eq!(sub.recv().await, None);
    }
}
