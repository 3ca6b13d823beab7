//! # Network Simulation
//!
//! In-process loopback for testing the whole engine against hostile
//! networks: a [`SimServer`] that runs the same integrator the client
//! predicts with, and a [`SimHarness`] that wires a real [`Session`] to
//! it through delay queues with configurable loss, jitter, duplication,
//! and reordering.
//!
//! Every byte crosses the real codec in both directions, so the harness
//! exercises exactly the path a production transport would.
//!
//! Determinism: all randomness comes from one seeded [`StdRng`]; the same
//! seed replays the same run.

use crossbeam_channel::{Receiver, Sender};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use talaria_core::{integrate, FixedTimestep, MoveInput, PhysicsState, Vec2};

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::gate::CommandSink;
use crate::protocol::{ClientCommand, EntityId, RejectReason, ServerEvent, ServerMessage};
use crate::session::Session;

/// Network conditions for simulation.
#[derive(Clone, Copy, Debug)]
pub struct NetworkConditions {
    /// Base one-way latency in milliseconds.
    pub base_latency_ms: u32,
    /// Jitter (variance) in milliseconds.
    pub jitter_ms: u32,
    /// Packet loss percentage (0-100).
    pub packet_loss_percent: u8,
    /// Duplicate packet percentage (0-100).
    pub duplicate_percent: u8,
    /// Out-of-order percentage (0-100).
    pub out_of_order_percent: u8,
}

impl NetworkConditions {
    /// Perfect network conditions (LAN).
    pub const PERFECT: Self = Self {
        base_latency_ms: 1,
        jitter_ms: 0,
        packet_loss_percent: 0,
        duplicate_percent: 0,
        out_of_order_percent: 0,
    };

    /// Good network conditions (fiber).
    pub const GOOD: Self = Self {
        base_latency_ms: 20,
        jitter_ms: 5,
        packet_loss_percent: 0,
        duplicate_percent: 0,
        out_of_order_percent: 0,
    };

    /// Average network conditions (cable).
    pub const AVERAGE: Self = Self {
        base_latency_ms: 50,
        jitter_ms: 20,
        packet_loss_percent: 1,
        duplicate_percent: 1,
        out_of_order_percent: 2,
    };

    /// Poor network conditions (mobile/wifi).
    pub const POOR: Self = Self {
        base_latency_ms: 100,
        jitter_ms: 50,
        packet_loss_percent: 5,
        duplicate_percent: 2,
        out_of_order_percent: 5,
    };

    /// One-way delay for the next packet, seconds.
    #[must_use]
    pub fn sample_delay(&self, rng: &mut StdRng) -> f64 {
        let jitter = if self.jitter_ms > 0 {
            rng.gen_range(0..self.jitter_ms * 2) as i64 - i64::from(self.jitter_ms)
        } else {
            0
        };
        let latency_ms = (i64::from(self.base_latency_ms) + jitter).max(0);
        latency_ms as f64 / 1000.0
    }

    /// Roll for packet loss.
    #[must_use]
    pub fn roll_drop(&self, rng: &mut StdRng) -> bool {
        rng.gen_range(0..100u32) < u32::from(self.packet_loss_percent)
    }

    /// Roll for packet duplication.
    #[must_use]
    pub fn roll_duplicate(&self, rng: &mut StdRng) -> bool {
        rng.gen_range(0..100u32) < u32::from(self.duplicate_percent)
    }

    /// Roll for reordering (the packet takes a detour).
    #[must_use]
    pub fn roll_reorder(&self, rng: &mut StdRng) -> bool {
        rng.gen_range(0..100u32) < u32::from(self.out_of_order_percent)
    }
}

impl Default for NetworkConditions {
    fn default() -> Self {
        Self::AVERAGE
    }
}

/// A packet in flight.
#[derive(Clone, Debug)]
struct InFlight {
    bytes: Vec<u8>,
    deliver_at: f64,
}

/// One direction of a simulated link.
#[derive(Debug, Default)]
pub struct DelayQueue {
    in_flight: Vec<InFlight>,
}

impl DelayQueue {
    /// Offer a packet to the link at time `now`. It may be dropped,
    /// delayed, duplicated, or sent the long way around.
    pub fn offer(
        &mut self,
        bytes: Vec<u8>,
        now: f64,
        conditions: &NetworkConditions,
        rng: &mut StdRng,
    ) {
        if conditions.roll_drop(rng) {
            return;
        }
        let mut deliver_at = now + conditions.sample_delay(rng);
        if conditions.roll_reorder(rng) {
            // Detour: long enough to arrive behind its successors.
            deliver_at += 0.040;
        }
        if conditions.roll_duplicate(rng) {
            self.in_flight.push(InFlight {
                bytes: bytes.clone(),
                deliver_at: now + conditions.sample_delay(rng),
            });
        }
        self.in_flight.push(InFlight { bytes, deliver_at });
    }

    /// Everything due by `now`, in arrival order.
    pub fn poll(&mut self, now: f64) -> Vec<Vec<u8>> {
        let mut due = Vec::new();
        let mut i = 0;
        while i < self.in_flight.len() {
            if self.in_flight[i].deliver_at <= now {
                due.push(self.in_flight.swap_remove(i));
            } else {
                i += 1;
            }
        }
        due.sort_by(|a, b| {
            a.deliver_at
                .partial_cmp(&b.deliver_at)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        due.into_iter().map(|p| p.bytes).collect()
    }

    /// Packets still in flight.
    #[must_use]
    pub fn len(&self) -> usize {
        self.in_flight.len()
    }

    /// True when nothing is in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }
}

/// Transport sink used by the harness: commands become bytes on a
/// channel, connectivity is a flag the harness flips.
pub struct ChannelSink {
    outbound: Sender<Vec<u8>>,
    connected: bool,
    dial_pending: bool,
}

impl ChannelSink {
    /// Build a sink and the receiving end the harness polls.
    #[must_use]
    pub fn pair() -> (Self, Receiver<Vec<u8>>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (
            Self {
                outbound: tx,
                connected: false,
                dial_pending: false,
            },
            rx,
        )
    }

    /// Flip the simulated physical link.
    pub fn set_connected(&mut self, up: bool) {
        self.connected = up;
    }

    /// Take the pending dial request, if any.
    pub fn take_dial(&mut self) -> bool {
        std::mem::take(&mut self.dial_pending)
    }
}

impl CommandSink for ChannelSink {
    fn connect(&mut self) {
        self.dial_pending = true;
    }

    fn transmit(&mut self, command: &ClientCommand) -> SyncResult<()> {
        if !self.connected {
            return Err(SyncError::TransmitFailed("link down".to_string()));
        }
        self.outbound
            .send(command.encode())
            .map_err(|_| SyncError::TransmitFailed("link closed".to_string()))
    }
}

/// A scripted wanderer the server simulates for the client to observe.
struct SimBot {
    entity: EntityId,
    state: PhysicsState,
    input: MoveInput,
    ticks_until_turn: u32,
}

impl SimBot {
    fn pick_input(rng: &mut StdRng) -> MoveInput {
        // Random held keys. Opposites cancel like a real keyboard would.
        MoveInput::new(
            rng.gen_bool(0.4),
            rng.gen_bool(0.4),
            rng.gen_bool(0.4),
            rng.gen_bool(0.4),
        )
    }
}

/// Record of the one predicted client this server talks to.
struct ClientRecord {
    entity: EntityId,
    state: PhysicsState,
    last_acked: u32,
}

/// Authoritative loopback server. Applies client movement reports after a
/// plausibility check, wanders its bots with the shared integrator, and
/// emits corrections and snapshots on fixed cadences.
pub struct SimServer {
    config: SyncConfig,
    clock: FixedTimestep,
    now: f64,
    capacity: usize,
    local: Option<ClientRecord>,
    bots: Vec<SimBot>,
    rng: StdRng,
    correction_timer: f64,
    snapshot_timer: f64,
    /// Moves refused by the plausibility check.
    pub refused_moves: u64,
}

/// Corrections per second the server sends to its client.
const CORRECTION_RATE_HZ: f64 = 10.0;

/// Tolerance multiplier on legal per-tick displacement. Covers diagonal
/// rounding and the speed-stat headroom the sim grants.
const SPEED_SLACK: f32 = 1.25;

impl SimServer {
    /// Create a server with `bot_count` wanderers. `capacity` counts the
    /// predicted client; 0 rejects every join.
    #[must_use]
    pub fn new(config: SyncConfig, bot_count: usize, capacity: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let bots = (0..bot_count)
            .map(|i| {
                let spawn = Vec2::new(
                    rng.gen_range(-100.0..100.0),
                    rng.gen_range(-100.0..100.0),
                );
                SimBot {
                    entity: EntityId(100 + i as u32),
                    state: PhysicsState::at(spawn),
                    input: SimBot::pick_input(&mut rng),
                    ticks_until_turn: rng.gen_range(30..90),
                }
            })
            .collect();
        Self {
            clock: FixedTimestep::new(config.fixed_step, u32::MAX),
            config,
            now: 0.0,
            capacity,
            local: None,
            bots,
            rng,
            correction_timer: 0.0,
            snapshot_timer: 0.0,
            refused_moves: 0,
        }
    }

    /// Decode and apply one client packet. Malformed bytes are rejected
    /// at the protocol boundary, exactly as a production server would.
    pub fn handle_client_bytes(&mut self, bytes: &[u8]) -> SyncResult<Vec<ServerMessage>> {
        let command = ClientCommand::decode(bytes)?;
        Ok(self.handle_command(command))
    }

    fn handle_command(&mut self, command: ClientCommand) -> Vec<ServerMessage> {
        match command {
            ClientCommand::Join => {
                if self.capacity == 0 {
                    return vec![ServerMessage::JoinRejected {
                        reason: RejectReason::ServerFull,
                    }];
                }
                if let Some(local) = self.local.as_ref() {
                    // Rejoin after an outage: resume where the server left
                    // the avatar, acks intact.
                    return vec![ServerMessage::SessionReady {
                        entity: local.entity,
                        state: local.state,
                    }];
                }
                let entity = EntityId(1);
                let spawn = PhysicsState::default();
                self.local = Some(ClientRecord {
                    entity,
                    state: spawn,
                    last_acked: 0,
                });
                vec![ServerMessage::SessionReady {
                    entity,
                    state: spawn,
                }]
            }
            ClientCommand::Move {
                state,
                facing: _,
                sequence,
            } => {
                if let Some(local) = self.local.as_mut() {
                    if sequence > local.last_acked {
                        let elapsed_ticks = sequence - local.last_acked;
                        let budget = self.config.tuning.base_speed
                            * SPEED_SLACK
                            * self.config.fixed_step
                            * elapsed_ticks as f32;
                        let travelled = local.state.position.distance(&state.position);
                        if travelled <= budget {
                            local.state = state;
                        } else {
                            // Too fast to be honest input; keep the old
                            // position and let the correction pull them back.
                            self.refused_moves += 1;
                            local.state.velocity = Vec2::ZERO;
                        }
                        local.last_acked = sequence;
                    }
                }
                Vec::new()
            }
            ClientCommand::Teleport { position } => {
                if let Some(local) = self.local.as_mut() {
                    local.state = PhysicsState::at(position);
                }
                Vec::new()
            }
            ClientCommand::Leave => {
                self.local = None;
                Vec::new()
            }
        }
    }

    /// Advance the server to time `now`, producing due outbound messages.
    pub fn advance(&mut self, now: f64) -> Vec<ServerMessage> {
        let dt = (now - self.now).max(0.0);
        self.now = now;

        self.clock.accumulate(dt as f32);
        while self.clock.consume_step() {
            self.tick_bots();
        }

        let mut outbound = Vec::new();

        self.correction_timer += dt;
        if self.correction_timer >= 1.0 / CORRECTION_RATE_HZ {
            self.correction_timer = 0.0;
            if let Some(local) = self.local.as_ref() {
                outbound.push(ServerMessage::LocalCorrection {
                    state: local.state,
                    last_acked: local.last_acked,
                });
            }
        }

        self.snapshot_timer += dt;
        if self.snapshot_timer >= f64::from(self.config.send_interval()) {
            self.snapshot_timer = 0.0;
            for bot in &self.bots {
                outbound.push(ServerMessage::RemoteMoved {
                    entity: bot.entity,
                    state: bot.state,
                    timestamp: self.now,
                });
            }
        }

        outbound
    }

    fn tick_bots(&mut self) {
        for bot in &mut self.bots {
            if bot.ticks_until_turn == 0 {
                bot.input = SimBot::pick_input(&mut self.rng);
                bot.ticks_until_turn = self.rng.gen_range(30..90);
            }
            bot.ticks_until_turn -= 1;
            integrate(
                &mut bot.state,
                bot.input,
                self.config.fixed_step,
                1.0,
                1.0,
                &self.config.tuning,
            );
        }
    }

    /// The server's authoritative view of the predicted client.
    #[must_use]
    pub fn client_state(&self) -> Option<PhysicsState> {
        self.local.as_ref().map(|l| l.state)
    }

    /// Newest sequence the server has applied for its client.
    #[must_use]
    pub fn last_acked(&self) -> u32 {
        self.local.as_ref().map_or(0, |l| l.last_acked)
    }
}

/// Full loopback: one [`Session`] against one [`SimServer`] across two
/// lossy [`DelayQueue`] directions, all on one thread, one seeded rng.
pub struct SimHarness {
    /// The client under test. Public so scenarios can poke at it.
    pub session: Session<ChannelSink>,
    /// The authoritative peer.
    pub server: SimServer,
    conditions: NetworkConditions,
    rng: StdRng,
    upstream: DelayQueue,
    downstream: DelayQueue,
    from_sink: Receiver<Vec<u8>>,
    now: f64,
    transport_up_at: Option<f64>,
    link_down_until: f64,
}

impl SimHarness {
    /// Build a harness. `seed` drives both link noise and bot wandering.
    #[must_use]
    pub fn new(
        config: SyncConfig,
        conditions: NetworkConditions,
        bot_count: usize,
        seed: u64,
    ) -> Self {
        let (sink, from_sink) = ChannelSink::pair();
        Self {
            session: Session::new(config.clone(), sink),
            server: SimServer::new(config, bot_count, 1, seed ^ 0x5eed),
            conditions,
            rng: StdRng::seed_from_u64(seed),
            upstream: DelayQueue::default(),
            downstream: DelayQueue::default(),
            from_sink,
            now: 0.0,
            transport_up_at: None,
            link_down_until: 0.0,
        }
    }

    /// Current simulated time, seconds.
    #[must_use]
    pub const fn now(&self) -> f64 {
        self.now
    }

    /// Advance one render frame of `dt` seconds with the given input.
    pub fn step_frame(&mut self, dt: f32, input: MoveInput) {
        self.now += f64::from(dt);
        self.session.frame(self.now, dt, input, false);
        self.pump();
    }

    /// Move queued bytes along both directions of the link.
    fn pump(&mut self) {
        // Dial handling: the transport "comes up" one latency later, or
        // once the forced outage ends, whichever is later.
        if self.session.sink_mut().take_dial() {
            let delay = self.conditions.sample_delay(&mut self.rng);
            let earliest = self.link_down_until.max(self.now);
            self.transport_up_at = Some(earliest + delay);
        }
        if let Some(at) = self.transport_up_at {
            if at <= self.now {
                self.transport_up_at = None;
                self.session.sink_mut().set_connected(true);
                self.session.handle_server_event(ServerEvent::TransportUp);
            }
        }

        // Client -> link.
        while let Ok(bytes) = self.from_sink.try_recv() {
            self.upstream
                .offer(bytes, self.now, &self.conditions, &mut self.rng);
        }

        // Link -> server, server cadences -> link.
        for bytes in self.upstream.poll(self.now) {
            match self.server.handle_client_bytes(&bytes) {
                Ok(replies) => {
                    for message in replies {
                        self.downstream.offer(
                            message.encode(),
                            self.now,
                            &self.conditions,
                            &mut self.rng,
                        );
                    }
                }
                Err(e) => tracing::debug!("server rejected inbound packet: {}", e),
            }
        }
        for message in self.server.advance(self.now) {
            self.downstream
                .offer(message.encode(), self.now, &self.conditions, &mut self.rng);
        }

        // Link -> client, through the validating boundary.
        for bytes in self.downstream.poll(self.now) {
            if let Err(e) = self.session.handle_server_bytes(&bytes) {
                tracing::debug!("client rejected inbound packet: {}", e);
            }
        }
    }

    /// Sever the physical link for `outage` seconds: nothing in flight
    /// survives, the session sees a transport loss, and redials stall
    /// until the outage ends.
    pub fn drop_transport(&mut self, outage: f64) {
        self.upstream = DelayQueue::default();
        self.downstream = DelayQueue::default();
        self.link_down_until = self.now + outage;
        self.session.sink_mut().set_connected(false);
        self.session.handle_server_event(ServerEvent::TransportDown);
    }
}
