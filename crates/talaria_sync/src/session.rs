//! # Session
//!
//! The composition root. One [`Session`] owns one of everything — the
//! predictor, the visual offset, the reconciler, the remote
//! interpolators, the gate, the event bus — built explicitly at
//! construction, passed nothing global, shared with nobody.
//!
//! ```text
//!                 +--------------------------------------+
//!   raw input --> |           Session::frame             |
//!                 |  predictor -> gate -> CommandSink    |
//!                 +--------------------------------------+
//!                 |      Session::handle_server_event    |
//!   transport --> |  gate | reconciler | interpolators   |
//!                 +--------------------------------------+
//!                        |                |
//!                 render_state(..)   EventBus<SessionEvent>
//! ```
//!
//! Single-threaded by contract: `frame` and `handle_server_event` are
//! called from one run loop, interleaved, never concurrently. Nothing in
//! here suspends; the only awaitable is the [`ReadyTicket`] handed out by
//! [`Session::connect`], which blocks its caller and nobody else.

use std::collections::HashMap;

use talaria_core::{MoveInput, PhysicsState, Vec2};

use crate::config::SyncConfig;
use crate::error::SyncResult;
use crate::events::{EventBus, SessionEvent};
use crate::gate::{CommandSink, ConnectionGate, ConnectionState, ReadyInfo, ReadyTicket};
use crate::interpolation::{RemoteInterpolator, RemoteSnapshot};
use crate::prediction::{FrameOutput, LocalPredictor};
use crate::protocol::{ClientCommand, EntityId, ServerEvent, ServerMessage};
use crate::reconcile::{ReconcileResult, Reconciler};
use crate::visual::VisualOffset;

/// Running totals for diagnostics overlays and the simulation binary.
#[derive(Clone, Copy, Debug, Default)]
pub struct SessionStats {
    /// Fixed ticks executed.
    pub ticks: u64,
    /// Movement updates handed to the gate.
    pub moves_sent: u64,
    /// Corrections processed (any tier).
    pub corrections: u64,
    /// Corrections that soft-snapped position.
    pub soft_snaps: u64,
    /// Corrections that hard-snapped position.
    pub hard_snaps: u64,
}

/// One client's movement-synchronization state. See the module docs.
pub struct Session<S: CommandSink> {
    config: SyncConfig,
    gate: ConnectionGate<S>,
    predictor: LocalPredictor,
    visual: VisualOffset,
    reconciler: Reconciler,
    remotes: HashMap<EntityId, RemoteInterpolator>,
    events: EventBus<SessionEvent>,
    local_entity: Option<EntityId>,
    now: f64,
    stats: SessionStats,
}

impl<S: CommandSink> Session<S> {
    /// Build a session over a transport sink. Nothing connects yet.
    #[must_use]
    pub fn new(config: SyncConfig, sink: S) -> Self {
        let predictor = LocalPredictor::new(&config, PhysicsState::default());
        let reconciler = Reconciler::new(config.correction);
        Self {
            config,
            gate: ConnectionGate::new(sink),
            predictor,
            visual: VisualOffset::new(),
            reconciler,
            remotes: HashMap::new(),
            events: EventBus::unbounded(),
            local_entity: None,
            now: 0.0,
            stats: SessionStats::default(),
        }
    }

    /// Request the session handshake. Safe to call repeatedly; each call
    /// returns a ticket observing the same outcome.
    pub fn connect(&mut self) -> ReadyTicket {
        let before = self.gate.state();
        let ticket = self.gate.connect();
        self.announce_state_change(before);
        ticket
    }

    /// Advance one render frame at wall-clock `now`, `dt` seconds after
    /// the previous frame. Drives prediction, offset decay, and the
    /// outbound cadence. Never blocks.
    pub fn frame(&mut self, now: f64, dt: f32, input: MoveInput, suppressed: bool) -> FrameOutput {
        self.now = now;
        let output = self.predictor.frame(dt, input, suppressed);

        for _ in 0..output.ticks_run {
            self.visual.decay_tick();
        }
        self.stats.ticks += u64::from(output.ticks_run);

        if let Some(send) = output.outbound {
            self.stats.moves_sent += 1;
            self.gate.send(ClientCommand::Move {
                state: send.state,
                facing: send.facing,
                sequence: send.sequence,
            });
        }
        output
    }

    /// Validate and dispatch raw bytes from the transport. The single
    /// entry point for inbound wire data.
    pub fn handle_server_bytes(&mut self, bytes: &[u8]) -> SyncResult<()> {
        let message = ServerMessage::decode(bytes)?;
        self.handle_server_event(ServerEvent::Message(message));
        Ok(())
    }

    /// Dispatch one inbound event. Duplicate or reordered authoritative
    /// snapshots are harmless here: acks are monotonic and replay is
    /// idempotent.
    pub fn handle_server_event(&mut self, event: ServerEvent) {
        let before = self.gate.state();
        match event {
            ServerEvent::TransportUp => self.gate.on_transport_up(),
            ServerEvent::TransportDown => self.gate.on_transport_down(),
            ServerEvent::Message(message) => self.handle_message(message),
        }
        self.announce_state_change(before);
    }

    fn handle_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::SessionReady { entity, state } => {
                self.local_entity = Some(entity);
                self.predictor.reset_to(state);
                self.visual.clear();
                self.gate.on_session_ready(ReadyInfo {
                    entity,
                    spawn: state,
                });
            }
            ServerMessage::JoinRejected { reason } => {
                self.gate.on_join_rejected(reason);
            }
            ServerMessage::LocalCorrection { state, last_acked } => {
                let result =
                    self.reconciler
                        .apply(&mut self.predictor, &mut self.visual, state, last_acked);
                self.stats.corrections += 1;
                match result {
                    ReconcileResult::SoftSnap { .. } => self.stats.soft_snaps += 1,
                    ReconcileResult::HardSnap { .. } => self.stats.hard_snaps += 1,
                    _ => {}
                }
                let _ = self.events.send(SessionEvent::CorrectionApplied { result });
            }
            ServerMessage::RemoteMoved {
                entity,
                state,
                timestamp,
            } => {
                if Some(entity) == self.local_entity {
                    // Our own echo; the correction path owns the local avatar.
                    return;
                }
                let interpolator = self.remotes.entry(entity).or_insert_with(|| {
                    tracing::debug!("first snapshot from remote entity {}", entity);
                    RemoteInterpolator::new(&self.config.interpolation)
                });
                interpolator.push(RemoteSnapshot { state, timestamp });
                if interpolator.len() == 1 {
                    let _ = self.events.send(SessionEvent::RemoteJoined { entity });
                }
            }
            ServerMessage::RemoteLeft { entity } => {
                self.remove_remote(entity);
            }
        }
    }

    /// What to draw for `entity` this frame: `(position, velocity)`.
    /// The local avatar renders physics plus the decaying visual offset;
    /// remotes render their delayed interpolated state.
    pub fn render_state(&mut self, entity: EntityId) -> Option<(Vec2, Vec2)> {
        if Some(entity) == self.local_entity {
            return Some(self.render_local());
        }
        let now = self.now;
        self.remotes
            .get_mut(&entity)
            .map(|interp| {
                let state = interp.sample(now);
                (state.position, state.velocity)
            })
    }

    /// Render state for the local avatar, available before the handshake
    /// completes (offline prediction still runs).
    #[must_use]
    pub fn render_local(&self) -> (Vec2, Vec2) {
        let state = self.predictor.state();
        (self.visual.apply(state.position), state.velocity)
    }

    /// Move the local avatar without traversal. Velocity, visual offset,
    /// pending tick backlog, and input history all clear in this one call
    /// so no stale state can drag the avatar off the destination.
    pub fn teleport_local(&mut self, position: Vec2) {
        self.predictor.teleport(position);
        self.visual.clear();
        self.gate.send(ClientCommand::Teleport { position });
        let _ = self.events.send(SessionEvent::LocalTeleported { position });
    }

    /// Tear down one remote entity: snapshot buffer dropped synchronously,
    /// observers notified. After this returns nothing can touch it.
    pub fn remove_remote(&mut self, entity: EntityId) {
        if let Some(mut interpolator) = self.remotes.remove(&entity) {
            interpolator.clear();
            let _ = self.events.send(SessionEvent::RemoteLeft { entity });
        }
    }

    /// Return to the pre-join state: remotes gone, queued commands
    /// dropped (the one sanctioned queue clear), identity forgotten.
    /// Prediction state survives so a rejoin starts where the avatar
    /// stands.
    pub fn reset(&mut self) {
        let entities: Vec<EntityId> = self.remotes.keys().copied().collect();
        for entity in entities {
            self.remove_remote(entity);
        }
        self.gate.clear_queue();
        self.visual.clear();
        self.local_entity = None;
        self.stats = SessionStats::default();
        tracing::info!("session reset");
    }

    /// The entity id the server assigned to us, once ready.
    #[inline]
    #[must_use]
    pub const fn local_entity(&self) -> Option<EntityId> {
        self.local_entity
    }

    /// True when the gate transmits directly.
    #[inline]
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.gate.is_ready()
    }

    /// Current gate state.
    #[inline]
    #[must_use]
    pub const fn connection_state(&self) -> ConnectionState {
        self.gate.state()
    }

    /// The session event bus; subscribe for connection, correction, and
    /// entity lifecycle events.
    #[must_use]
    pub const fn events(&self) -> &EventBus<SessionEvent> {
        &self.events
    }

    /// Running totals.
    #[inline]
    #[must_use]
    pub const fn stats(&self) -> SessionStats {
        self.stats
    }

    /// The engine configuration in effect.
    #[must_use]
    pub const fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Borrow the local predictor (read-only diagnostics).
    #[must_use]
    pub const fn predictor(&self) -> &LocalPredictor {
        &self.predictor
    }

    /// Borrow the transport sink.
    #[must_use]
    pub fn sink(&self) -> &S {
        self.gate.sink()
    }

    /// Mutably borrow the transport sink (adapters polling their link).
    pub fn sink_mut(&mut self) -> &mut S {
        self.gate.sink_mut()
    }

    /// Remote entities currently tracked.
    #[must_use]
    pub fn remote_count(&self) -> usize {
        self.remotes.len()
    }

    fn announce_state_change(&mut self, before: ConnectionState) {
        let after = self.gate.state();
        if before != after {
            tracing::debug!("connection state {:?} -> {:?}", before, after);
            let _ = self
                .events
                .send(SessionEvent::ConnectionChanged { state: after });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::protocol::RejectReason;

    /// Sink that records commands and never fails.
    struct VecSink {
        sent: Vec<ClientCommand>,
        connects: u32,
    }

    impl VecSink {
        fn new() -> Self {
            Self {
                sent: Vec::new(),
                connects: 0,
            }
        }
    }

    impl CommandSink for VecSink {
        fn connect(&mut self) {
            self.connects += 1;
        }

        fn transmit(&mut self, command: &ClientCommand) -> SyncResult<()> {
            self.sent.push(*command);
            Ok(())
        }
    }

    const RIGHT: MoveInput = MoveInput {
        flags: MoveInput::FLAG_RIGHT,
    };

    fn session() -> Session<VecSink> {
        Session::new(SyncConfig::default(), VecSink::new())
    }

    fn make_ready(session: &mut Session<VecSink>) -> EntityId {
        session.connect();
        session.handle_server_event(ServerEvent::TransportUp);
        session.handle_server_event(ServerEvent::Message(ServerMessage::SessionReady {
            entity: EntityId(1),
            state: PhysicsState::default(),
        }));
        EntityId(1)
    }

    fn run_seconds(session: &mut Session<VecSink>, seconds: f32, input: MoveInput) {
        let step = session.config().fixed_step;
        let frames = (seconds / step).round() as usize;
        for _ in 0..frames {
            let now = session.now + f64::from(step);
            session.frame(now, step, input, false);
        }
    }

    #[test]
    fn test_handshake_reaches_ready() {
        let mut s = session();
        let ticket = s.connect();
        assert_eq!(s.connection_state(), ConnectionState::Connecting);
        s.handle_server_event(ServerEvent::TransportUp);
        s.handle_server_event(ServerEvent::Message(ServerMessage::SessionReady {
            entity: EntityId(7),
            state: PhysicsState::at(Vec2::new(10.0, 20.0)),
        }));

        assert!(s.is_ready());
        assert_eq!(s.local_entity(), Some(EntityId(7)));
        let info = ticket.wait().unwrap();
        assert_eq!(info.entity, EntityId(7));
        assert_eq!(s.render_local().0, Vec2::new(10.0, 20.0));
    }

    #[test]
    fn test_rejection_surfaces_on_ticket() {
        let mut s = session();
        let ticket = s.connect();
        s.handle_server_event(ServerEvent::TransportUp);
        s.handle_server_event(ServerEvent::Message(ServerMessage::JoinRejected {
            reason: RejectReason::ServerFull,
        }));
        assert!(matches!(
            ticket.wait(),
            Err(SyncError::HandshakeRejected { .. })
        ));
        assert!(!s.is_ready());
    }

    #[test]
    fn test_connection_changes_are_published() {
        let mut s = session();
        make_ready(&mut s);
        let mut states = Vec::new();
        while let Some(event) = s.events().try_recv() {
            if let SessionEvent::ConnectionChanged { state } = event {
                states.push(state);
            }
        }
        assert_eq!(
            states,
            vec![
                ConnectionState::Connecting,
                ConnectionState::ConnectedAwaitingReady,
                ConnectionState::Ready,
            ]
        );
    }

    #[test]
    fn test_frames_drive_sends_through_gate() {
        let mut s = session();
        make_ready(&mut s);
        run_seconds(&mut s, 1.0, RIGHT);

        let moves = s
            .sink()
            .sent
            .iter()
            .filter(|c| matches!(c, ClientCommand::Move { .. }))
            .count();
        assert!((19..=20).contains(&moves), "saw {moves} moves");
        assert_eq!(s.stats().ticks, 60);
        assert_eq!(s.stats().moves_sent as usize, moves);
    }

    #[test]
    fn test_moves_buffer_until_ready() {
        let mut s = session();
        run_seconds(&mut s, 0.5, RIGHT);
        // Not ready: nothing on the wire except nothing at all.
        assert!(s.sink().sent.is_empty());

        make_ready(&mut s);
        // The buffered moves flushed after the join, in order.
        assert_eq!(s.sink().sent[0], ClientCommand::Join);
        assert!(s.sink().sent.len() > 1);
    }

    #[test]
    fn test_correction_publishes_result() {
        let mut s = session();
        make_ready(&mut s);
        run_seconds(&mut s, 0.5, RIGHT);

        // Server agrees with prediction up to tick 10.
        let mut server = PhysicsState::default();
        for _ in 0..10 {
            talaria_core::integrate(
                &mut server,
                RIGHT,
                s.config().fixed_step,
                1.0,
                1.0,
                &s.config().tuning,
            );
        }
        s.handle_server_event(ServerEvent::Message(ServerMessage::LocalCorrection {
            state: server,
            last_acked: 10,
        }));

        assert_eq!(s.stats().corrections, 1);
        let correction = std::iter::from_fn(|| s.events().try_recv())
            .find(|e| matches!(e, SessionEvent::CorrectionApplied { .. }));
        match correction {
            Some(SessionEvent::CorrectionApplied {
                result: ReconcileResult::VelocityOnly { error },
            }) => assert!(error < 1e-3),
            other => panic!("expected velocity-only correction, got {other:?}"),
        }
    }

    #[test]
    fn test_remote_lifecycle() {
        let mut s = session();
        make_ready(&mut s);

        let remote = EntityId(9);
        s.handle_server_event(ServerEvent::Message(ServerMessage::RemoteMoved {
            entity: remote,
            state: PhysicsState::at(Vec2::new(5.0, 5.0)),
            timestamp: 0.1,
        }));
        assert_eq!(s.remote_count(), 1);
        assert!(s.render_state(remote).is_some());

        s.handle_server_event(ServerEvent::Message(ServerMessage::RemoteLeft {
            entity: remote,
        }));
        assert_eq!(s.remote_count(), 0);
        assert!(s.render_state(remote).is_none());

        let mut joined = false;
        let mut left = false;
        while let Some(event) = s.events().try_recv() {
            match event {
                SessionEvent::RemoteJoined { entity } if entity == remote => joined = true,
                SessionEvent::RemoteLeft { entity } if entity == remote => left = true,
                _ => {}
            }
        }
        assert!(joined && left);
    }

    #[test]
    fn test_own_echo_is_not_a_remote() {
        let mut s = session();
        let local = make_ready(&mut s);
        s.handle_server_event(ServerEvent::Message(ServerMessage::RemoteMoved {
            entity: local,
            state: PhysicsState::default(),
            timestamp: 0.1,
        }));
        assert_eq!(s.remote_count(), 0);
    }

    #[test]
    fn test_teleport_is_atomic() {
        let mut s = session();
        make_ready(&mut s);
        run_seconds(&mut s, 0.5, RIGHT);
        let target = Vec2::new(-300.0, 40.0);
        s.teleport_local(target);

        let (position, velocity) = s.render_local();
        assert_eq!(position, target);
        assert_eq!(velocity, Vec2::ZERO);
        assert_eq!(s.predictor().history_len(), 0);
        assert!(s
            .sink()
            .sent
            .contains(&ClientCommand::Teleport { position: target }));
    }

    #[test]
    fn test_reset_clears_remotes_and_queue() {
        let mut s = session();
        // Buffer some commands while disconnected.
        s.teleport_local(Vec2::new(1.0, 1.0));
        s.handle_server_event(ServerEvent::Message(ServerMessage::RemoteMoved {
            entity: EntityId(3),
            state: PhysicsState::default(),
            timestamp: 0.1,
        }));
        assert_eq!(s.remote_count(), 1);

        s.reset();
        assert_eq!(s.remote_count(), 0);
        assert_eq!(s.local_entity(), None);
        // Reconnecting transmits only the join: the queue is empty.
        s.connect();
        s.handle_server_event(ServerEvent::TransportUp);
        s.handle_server_event(ServerEvent::Message(ServerMessage::SessionReady {
            entity: EntityId(1),
            state: PhysicsState::default(),
        }));
        assert_eq!(s.sink().sent, vec![ClientCommand::Join]);
    }

    #[test]
    fn test_garbage_bytes_rejected_at_boundary() {
        let mut s = session();
        assert!(s.handle_server_bytes(&[0xEE, 1, 2, 3]).is_err());
        assert!(s.handle_server_bytes(&[]).is_err());
    }

    #[test]
    fn test_transport_loss_keeps_remotes_but_clears_readiness() {
        let mut s = session();
        make_ready(&mut s);
        s.handle_server_event(ServerEvent::Message(ServerMessage::RemoteMoved {
            entity: EntityId(4),
            state: PhysicsState::default(),
            timestamp: 0.1,
        }));
        s.handle_server_event(ServerEvent::TransportDown);

        assert_eq!(s.connection_state(), ConnectionState::Disconnected);
        // Interpolation buffers survive a blip; teardown is explicit.
        assert_eq!(s.remote_count(), 1);
    }
}
