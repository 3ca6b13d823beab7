//! # Connection Gate
//!
//! Transport-connected and ready-to-play are different facts, and the gap
//! between them eats messages in naive clients. The gate owns that gap:
//! every outbound command passes through [`ConnectionGate::send`], and
//! only a session that is both physically connected and logically ready
//! transmits directly. Everything else lands in a FIFO queue that
//! survives reconnects and flushes, in order, the moment the server says
//! ready.
//!
//! ```text
//!  Disconnected --connect()--> Connecting --transport up-->
//!      ConnectedAwaitingReady --SessionReady--> Ready
//!           ^                                     |
//!           +---------- transport down -----------+   (queue retained)
//! ```
//!
//! The join handshake itself is control-plane: [`ConnectionGate::connect`]
//! hands back a [`ReadyTicket`] that resolves when the server accepts or
//! rejects the join. The tick path never waits on it.

use std::collections::VecDeque;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};

use talaria_core::PhysicsState;

use crate::error::{SyncError, SyncResult};
use crate::protocol::{ClientCommand, EntityId, RejectReason};

/// Readiness of the path to the server.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport at all.
    Disconnected,
    /// Transport dialing.
    Connecting,
    /// Transport up; server has not accepted the join yet.
    ConnectedAwaitingReady,
    /// Join accepted; commands flow directly.
    Ready,
}

/// What the server granted when it accepted the join.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReadyInfo {
    /// Entity id assigned to the local avatar.
    pub entity: EntityId,
    /// Authoritative spawn state.
    pub spawn: PhysicsState,
}

/// Outbound seam toward the transport. The engine never touches sockets;
/// it talks to whatever implements this.
pub trait CommandSink {
    /// Begin establishing the physical connection. Idempotent; progress
    /// is reported back through the gate's `on_transport_*` methods.
    fn connect(&mut self);

    /// Transmit one command now. An `Err` means the command did not leave
    /// and the caller keeps ownership of the retry.
    fn transmit(&mut self, command: &ClientCommand) -> SyncResult<()>;
}

/// One join handshake's result, delivered exactly once.
///
/// Control-plane only: blocking on it suspends the caller, never the
/// engine. Single-threaded callers should poll [`ReadyTicket::try_ready`]
/// from their run loop instead of blocking.
pub struct ReadyTicket {
    receiver: Receiver<Result<ReadyInfo, SyncError>>,
}

impl ReadyTicket {
    /// Block until the handshake resolves.
    pub fn wait(self) -> SyncResult<ReadyInfo> {
        self.receiver
            .recv()
            .unwrap_or(Err(SyncError::SessionClosed))
    }

    /// Block until the handshake resolves or `timeout` passes.
    pub fn wait_timeout(self, timeout: Duration) -> SyncResult<ReadyInfo> {
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => result,
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => Err(SyncError::HandshakeTimeout {
                waited_ms: timeout.as_millis() as u64,
            }),
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => Err(SyncError::SessionClosed),
        }
    }

    /// Poll without blocking. `None` while the handshake is in flight.
    #[must_use]
    pub fn try_ready(&self) -> Option<SyncResult<ReadyInfo>> {
        self.receiver.try_recv().ok()
    }
}

/// Readiness-gated command path. See the module docs for the lifecycle.
pub struct ConnectionGate<S: CommandSink> {
    sink: S,
    state: ConnectionState,
    queue: VecDeque<ClientCommand>,
    waiters: Vec<Sender<Result<ReadyInfo, SyncError>>>,
    ready_info: Option<ReadyInfo>,
}

impl<S: CommandSink> ConnectionGate<S> {
    /// Wrap a transport sink. Starts disconnected with an empty queue.
    #[must_use]
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            state: ConnectionState::Disconnected,
            queue: VecDeque::new(),
            waiters: Vec::new(),
            ready_info: None,
        }
    }

    /// Current gate state.
    #[inline]
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// True when commands transmit without buffering.
    #[inline]
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Ready
    }

    /// Commands waiting for the ready flush.
    #[inline]
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Borrow the sink (tests and adapters).
    #[must_use]
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Mutably borrow the sink.
    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Request a session: dial the transport if needed, (re)issue the
    /// join once the transport is up, and hand back a ticket for the
    /// outcome. Calling again while a handshake is pending just adds
    /// another observer.
    pub fn connect(&mut self) -> ReadyTicket {
        let (tx, rx) = crossbeam_channel::bounded(1);
        match self.state {
            ConnectionState::Ready => {
                // Already in; resolve on the spot.
                if let Some(info) = self.ready_info {
                    let _ = tx.send(Ok(info));
                } else {
                    let _ = tx.send(Err(SyncError::SessionClosed));
                }
            }
            ConnectionState::Disconnected => {
                self.waiters.push(tx);
                tracing::info!("dialing transport");
                self.sink.connect();
                self.state = ConnectionState::Connecting;
            }
            ConnectionState::Connecting => {
                self.waiters.push(tx);
            }
            ConnectionState::ConnectedAwaitingReady => {
                self.waiters.push(tx);
                self.send_join();
            }
        }
        ReadyTicket { receiver: rx }
    }

    /// Gate one outbound command. Ready: transmit now. Anything else:
    /// buffer FIFO, and if there is no transport yet, start dialing as a
    /// side effect so the intent is not stranded.
    pub fn send(&mut self, command: ClientCommand) {
        if self.state == ConnectionState::Ready {
            if let Err(e) = self.sink.transmit(&command) {
                tracing::info!("transmit failed, queueing command: {}", e);
                self.queue.push_back(command);
            }
            return;
        }
        self.queue.push_back(command);
        if self.state == ConnectionState::Disconnected {
            tracing::info!("buffered command while disconnected, dialing transport");
            self.sink.connect();
            self.state = ConnectionState::Connecting;
        }
    }

    /// The transport reports a physical connection. Issues the join; the
    /// queue stays buffered until the server answers ready.
    pub fn on_transport_up(&mut self) {
        if self.state == ConnectionState::Ready {
            return;
        }
        self.state = ConnectionState::ConnectedAwaitingReady;
        tracing::info!("transport up, awaiting session ready");
        self.send_join();
    }

    /// The transport dropped. Readiness is lost, pending handshakes fail,
    /// the queue is retained so buffered intents survive the reconnect.
    pub fn on_transport_down(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.ready_info = None;
        tracing::info!(
            "transport down, {} command(s) retained in queue",
            self.queue.len()
        );
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Err(SyncError::TransportClosed));
        }
    }

    /// The server accepted the join: flush the queue strictly FIFO, then
    /// resolve every pending ticket with the grant.
    pub fn on_session_ready(&mut self, info: ReadyInfo) {
        self.state = ConnectionState::Ready;
        self.ready_info = Some(info);
        tracing::info!(
            "session ready as entity {}, flushing {} queued command(s)",
            info.entity,
            self.queue.len()
        );
        self.flush_queue();
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Ok(info));
        }
    }

    /// The server refused the join. Transport stays up; a later
    /// [`ConnectionGate::connect`] may retry.
    pub fn on_join_rejected(&mut self, reason: RejectReason) {
        tracing::info!("join rejected: {}", reason);
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Err(SyncError::HandshakeRejected {
                reason: reason.to_string(),
            }));
        }
    }

    /// Explicit teardown of buffered commands. This is the ONLY path that
    /// drops queue entries; nothing in the engine discards them silently.
    pub fn clear_queue(&mut self) {
        if !self.queue.is_empty() {
            tracing::info!("dropping {} queued command(s) on teardown", self.queue.len());
        }
        self.queue.clear();
    }

    fn send_join(&mut self) {
        if let Err(e) = self.sink.transmit(&ClientCommand::Join) {
            tracing::info!("join transmit failed: {}", e);
        }
    }

    /// Pop-on-success flush: a command leaves the queue only once the
    /// sink took it, so a mid-flush failure keeps the remainder in order.
    fn flush_queue(&mut self) {
        while let Some(front) = self.queue.front() {
            match self.sink.transmit(front) {
                Ok(()) => {
                    self.queue.pop_front();
                }
                Err(e) => {
                    tracing::info!(
                        "flush interrupted, {} command(s) still queued: {}",
                        self.queue.len(),
                        e
                    );
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use talaria_core::Vec2;

    /// Records everything that reaches the transport.
    struct MockSink {
        sent: Vec<ClientCommand>,
        connect_calls: u32,
        fail_after: Option<usize>,
    }

    impl MockSink {
        fn new() -> Self {
            Self {
                sent: Vec::new(),
                connect_calls: 0,
                fail_after: None,
            }
        }
    }

    impl CommandSink for MockSink {
        fn connect(&mut self) {
            self.connect_calls += 1;
        }

        fn transmit(&mut self, command: &ClientCommand) -> SyncResult<()> {
            if let Some(limit) = self.fail_after {
                if self.sent.len() >= limit {
                    return Err(SyncError::TransmitFailed("mock transport".to_string()));
                }
            }
            self.sent.push(*command);
            Ok(())
        }
    }

    fn teleport_to(x: f32) -> ClientCommand {
        ClientCommand::Teleport {
            position: Vec2::new(x, 0.0),
        }
    }

    fn ready_info() -> ReadyInfo {
        ReadyInfo {
            entity: EntityId(42),
            spawn: PhysicsState::default(),
        }
    }

    #[test]
    fn test_send_while_disconnected_buffers_and_dials() {
        let mut gate = ConnectionGate::new(MockSink::new());
        gate.send(teleport_to(1.0));
        assert_eq!(gate.state(), ConnectionState::Connecting);
        assert_eq!(gate.queue_len(), 1);
        assert_eq!(gate.sink().connect_calls, 1);
        assert!(gate.sink().sent.is_empty());
    }

    #[test]
    fn test_transport_up_alone_does_not_flush() {
        let mut gate = ConnectionGate::new(MockSink::new());
        gate.send(teleport_to(1.0));
        gate.on_transport_up();
        assert_eq!(gate.state(), ConnectionState::ConnectedAwaitingReady);
        // Only the join went out; the data command is still gated.
        assert_eq!(gate.sink().sent, vec![ClientCommand::Join]);
        assert_eq!(gate.queue_len(), 1);
    }

    #[test]
    fn test_queue_flushes_fifo_exactly_once_on_ready() {
        let mut gate = ConnectionGate::new(MockSink::new());
        gate.send(teleport_to(1.0));
        gate.send(teleport_to(2.0));
        gate.send(teleport_to(3.0));
        gate.on_transport_up();
        gate.on_session_ready(ready_info());

        assert_eq!(
            gate.sink().sent,
            vec![
                ClientCommand::Join,
                teleport_to(1.0),
                teleport_to(2.0),
                teleport_to(3.0),
            ]
        );
        assert_eq!(gate.queue_len(), 0);
        assert!(gate.is_ready());
    }

    #[test]
    fn test_ready_sends_bypass_queue() {
        let mut gate = ConnectionGate::new(MockSink::new());
        gate.connect();
        gate.on_transport_up();
        gate.on_session_ready(ready_info());

        gate.send(teleport_to(9.0));
        assert_eq!(gate.queue_len(), 0);
        assert_eq!(*gate.sink().sent.last().unwrap(), teleport_to(9.0));
    }

    #[test]
    fn test_flush_failure_keeps_remainder_queued_in_order() {
        let mut gate = ConnectionGate::new(MockSink::new());
        gate.send(teleport_to(1.0));
        gate.send(teleport_to(2.0));
        gate.send(teleport_to(3.0));
        gate.on_transport_up();
        // Join + first command go through, then the transport chokes.
        gate.sink_mut().fail_after = Some(2);
        gate.on_session_ready(ready_info());

        assert_eq!(
            gate.sink().sent,
            vec![ClientCommand::Join, teleport_to(1.0)]
        );
        assert_eq!(gate.queue_len(), 2);
    }

    #[test]
    fn test_queue_survives_transport_loss() {
        let mut gate = ConnectionGate::new(MockSink::new());
        gate.send(teleport_to(1.0));
        gate.send(teleport_to(2.0));
        gate.on_transport_up();
        gate.on_transport_down();

        assert_eq!(gate.state(), ConnectionState::Disconnected);
        assert_eq!(gate.queue_len(), 2);

        // Reconnect: the buffered intents finally flow.
        gate.connect();
        gate.on_transport_up();
        gate.on_session_ready(ready_info());
        assert_eq!(gate.queue_len(), 0);
        assert_eq!(
            gate.sink().sent,
            vec![
                ClientCommand::Join,
                ClientCommand::Join,
                teleport_to(1.0),
                teleport_to(2.0),
            ]
        );
    }

    #[test]
    fn test_ticket_resolves_with_grant() {
        let mut gate = ConnectionGate::new(MockSink::new());
        let ticket = gate.connect();
        assert!(ticket.try_ready().is_none());
        gate.on_transport_up();
        gate.on_session_ready(ready_info());
        assert_eq!(ticket.wait().unwrap(), ready_info());
    }

    #[test]
    fn test_ticket_sees_rejection() {
        let mut gate = ConnectionGate::new(MockSink::new());
        let ticket = gate.connect();
        gate.on_transport_up();
        gate.on_join_rejected(RejectReason::ServerFull);
        match ticket.wait() {
            Err(SyncError::HandshakeRejected { reason }) => {
                assert_eq!(reason, "server full");
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_ticket_fails_when_transport_drops() {
        let mut gate = ConnectionGate::new(MockSink::new());
        let ticket = gate.connect();
        gate.on_transport_down();
        assert_eq!(ticket.wait(), Err(SyncError::TransportClosed));
    }

    #[test]
    fn test_connect_when_already_ready_resolves_immediately() {
        let mut gate = ConnectionGate::new(MockSink::new());
        gate.connect();
        gate.on_transport_up();
        gate.on_session_ready(ready_info());

        let ticket = gate.connect();
        assert_eq!(ticket.try_ready(), Some(Ok(ready_info())));
    }

    #[test]
    fn test_wait_timeout_expires() {
        let mut gate = ConnectionGate::new(MockSink::new());
        let ticket = gate.connect();
        let result = ticket.wait_timeout(Duration::from_millis(10));
        assert_eq!(
            result,
            Err(SyncError::HandshakeTimeout { waited_ms: 10 })
        );
    }
}
