//! Subscriber side of a session channel.

use sprintpoker_core::{ChangeEvent, SessionId};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::warn;

/// What a subscriber receives.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// The next change, in commit order
    Event(ChangeEvent),
    /// Events were dropped because this subscriber fell behind; refetch the
    /// whole session before applying further events
    Resync {
        /// How many events were skipped
        missed: u64,
    },
}

/// A live subscription to one session.
#[derive(Debug)]
pub struct Subscription {
    session_id: SessionId,
    receiver: broadcast::Receiver<ChangeEvent>,
}

impl Subscription {
    pub(crate) fn new(session_id: SessionId, receiver: broadcast::Receiver<ChangeEvent>) -> Self {
        Self { session_id, receiver }
    }

    /// The session this subscription watches.
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Wait for the next notification. `None` once the session is closed and
    /// everything buffered has been delivered.
    pub async fn recv(&mut self) -> Option<Notification> {
        match self.receiver.recv().await {
            Ok(event) => Some(Notification::Event(event)),
            Err(RecvError::Lagged(missed)) => Some(self.lagged(missed)),
            Err(RecvError::Closed) => None,
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv); `None` when nothing is
    /// buffered or the session is closed.
    pub fn try_recv(&mut self) -> Option<Notification> {
        match self.receiver.try_recv() {
            Ok(event) => Some(Notification::Event(event)),
            Err(TryRecvError::Lagged(missed)) => Some(self.lagged(missed)),
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => None,
        }
    }

    fn lagged(&self, missed: u64) -> Notification {
        warn!(session_id = %self.session_id, missed, "subscriber lagged, resync required");
        Notification::Resync { missed }
    }
}
