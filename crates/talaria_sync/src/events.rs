//! # Session Event Bus
//!
//! Typed, session-scoped pub/sub. Presentation layers (HUD latency
//! indicator, correction debug overlay, join/leave toasts) subscribe to a
//! receiver clone and drain it on their own schedule; the engine never
//! calls back into them. Events are values, the channel is the only
//! coupling.

use crossbeam_channel::{Receiver, SendError, Sender};

use talaria_core::Vec2;

use crate::gate::ConnectionState;
use crate::protocol::EntityId;
use crate::reconcile::ReconcileResult;

/// Everything the session announces while it runs.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    /// The connection gate changed state.
    ConnectionChanged {
        /// The state just entered.
        state: ConnectionState,
    },
    /// A server correction was applied to the local avatar.
    CorrectionApplied {
        /// How hard the correction hit.
        result: ReconcileResult,
    },
    /// A remote entity produced its first snapshot.
    RemoteJoined {
        /// The new entity.
        entity: EntityId,
    },
    /// A remote entity left and its buffers were torn down.
    RemoteLeft {
        /// The departed entity.
        entity: EntityId,
    },
    /// The local avatar was teleported.
    LocalTeleported {
        /// Destination position.
        position: Vec2,
    },
}

/// Typed event channel for decoupled communication between the session
/// and its observers. Cloned receivers share one FIFO queue.
pub struct EventBus<T> {
    sender: Sender<T>,
    receiver: Receiver<T>,
}

impl<T> EventBus<T> {
    /// Create an unbounded bus.
    #[must_use]
    pub fn unbounded() -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Self { sender, receiver }
    }

    /// Create a bounded bus; `send` on a full bus fails rather than
    /// blocking the tick path.
    #[must_use]
    pub fn bounded(capacity: usize) -> Self {
        let (sender, receiver) = crossbeam_channel::bounded(capacity);
        Self { sender, receiver }
    }

    /// Publish one event.
    pub fn send(&self, event: T) -> Result<(), SendError<T>> {
        self.sender.send(event)
    }

    /// Drain one event without blocking.
    #[must_use]
    pub fn try_recv(&self) -> Option<T> {
        self.receiver.try_recv().ok()
    }

    /// A sender handle for producers that outlive borrow scopes.
    #[must_use]
    pub fn sender(&self) -> Sender<T> {
        self.sender.clone()
    }

    /// A receiver handle for an observer.
    #[must_use]
    pub fn subscribe(&self) -> Receiver<T> {
        self.receiver.clone()
    }

    /// Queued events not yet drained.
    #[must_use]
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    /// True when no events are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}
