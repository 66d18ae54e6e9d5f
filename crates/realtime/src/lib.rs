//! Realtime fan-out of estimation session changes.
//!
//! Subscriptions are scoped to one session. Delivery is best effort: a
//! subscriber that falls behind is told how many events it missed and must
//! refetch the session instead of replaying them.

#![warn(missing_docs)]

pub mod hub;
pub mod subscription;

pub use hub::{FanoutHub, DEFAULT_CHANNEL_CAPACITY};
pub use subscription::{Notification, Subscription};

use sprintpoker_core::{ChangeEvent, ChangeKind, SessionId};

/// Notification interface used by the session coordinator.
///
/// Publishing never waits on subscribers.
pub trait Notifier: Send + Sync {
    /// Start receiving the changes of `session_id`.
    fn subscribe(&self, session_id: SessionId) -> Subscription;

    /// Stamp `kind` with the next sequence number and deliver it to every
    /// current subscriber of `session_id`.
    fn publish(&self, session_id: SessionId, kind: ChangeKind) -> ChangeEvent;

    /// Stop a subscription.
    fn unsubscribe(&self, subscription: Subscription);

    /// Drop the session's channel. Subscribers drain what is buffered, then
    /// see the end of the stream.
    fn close(&self, session_id: SessionId);
}
