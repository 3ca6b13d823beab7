//! # Local Prediction
//!
//! The local avatar moves the instant the player does: every render frame
//! feeds the sampled input through the fixed-step integrator without
//! waiting for the server. Each executed tick gets a sequence number and
//! a history entry so that, when the authoritative state arrives later,
//! the unacknowledged tail can be replayed on top of it.
//!
//! ```text
//!  render frame (variable dt)
//!        |
//!        v
//!  +-----------------+    tick     +------------------+
//!  | FixedTimestep   |-----------> | integrate()      |
//!  | (clamped)       |  seq += 1   | history.push     |
//!  +-----------------+             +------------------+
//!        |
//!        |  20 Hz, decoupled from the tick rate
//!        v
//!  latest { state, facing, sequence }  ->  ConnectionGate
//! ```

use std::collections::VecDeque;

use talaria_core::{
    integrate, Facing, FixedTimestep, MoveInput, MoveTuning, PhysicsState, RecordedInput,
};

use crate::config::SyncConfig;

/// A predicted movement update ready to leave for the server.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PredictedMove {
    /// Predicted state after the newest tick.
    pub state: PhysicsState,
    /// Facing derived from the newest non-zero velocity.
    pub facing: Facing,
    /// Sequence of the newest tick folded into `state`.
    pub sequence: u32,
}

/// What one render frame produced.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameOutput {
    /// Fixed ticks executed this frame (0 on sub-tick frames).
    pub ticks_run: u32,
    /// Movement update to forward, if the send cadence fired.
    pub outbound: Option<PredictedMove>,
}

/// Client-side predictor for the local avatar.
pub struct LocalPredictor {
    state: PhysicsState,
    clock: FixedTimestep,
    history: VecDeque<RecordedInput>,
    history_cap: usize,
    sequence: u32,
    /// Sequence at which the current movement burst began.
    burst_start: u32,
    was_neutral: bool,
    facing: Facing,
    tuning: MoveTuning,
    drag_multiplier: f32,
    speed_multiplier: f32,
    send_interval: f32,
    send_timer: f32,
    last_sent_sequence: u32,
}

impl LocalPredictor {
    /// Create a predictor for an avatar spawned at `spawn`.
    #[must_use]
    pub fn new(config: &SyncConfig, spawn: PhysicsState) -> Self {
        Self {
            state: spawn,
            clock: FixedTimestep::new(config.fixed_step, config.max_buffered_steps),
            history: VecDeque::with_capacity(config.history_cap),
            history_cap: config.history_cap,
            sequence: 0,
            burst_start: 0,
            was_neutral: true,
            facing: Facing::default(),
            tuning: config.tuning,
            drag_multiplier: 1.0,
            speed_multiplier: 1.0,
            send_interval: config.send_interval(),
            send_timer: 0.0,
            last_sent_sequence: 0,
        }
    }

    /// Advance one render frame.
    ///
    /// `input` is the raw directional sample for this frame; when
    /// `suppressed` is set (text entry, cutscene, menu focus) the sample
    /// is replaced by neutral but ticks still run, so sequences stay
    /// gapless and the avatar glides to a stop instead of freezing.
    pub fn frame(&mut self, dt: f32, input: MoveInput, suppressed: bool) -> FrameOutput {
        let effective = if suppressed { MoveInput::NEUTRAL } else { input };

        self.clock.accumulate(dt);
        let mut ticks_run = 0;
        while self.clock.consume_step() {
            self.tick(effective);
            ticks_run += 1;
        }

        self.send_timer += dt;
        let outbound = if self.send_timer >= self.send_interval
            && self.sequence > self.last_sent_sequence
        {
            self.send_timer %= self.send_interval;
            self.last_sent_sequence = self.sequence;
            Some(PredictedMove {
                state: self.state,
                facing: self.facing,
                sequence: self.sequence,
            })
        } else {
            None
        };

        FrameOutput { ticks_run, outbound }
    }

    fn tick(&mut self, input: MoveInput) {
        self.sequence = self.sequence.wrapping_add(1);

        let neutral = input.is_neutral();
        if self.was_neutral && !neutral {
            self.burst_start = self.sequence;
        }
        self.was_neutral = neutral;

        self.history.push_back(RecordedInput {
            input,
            sequence: self.sequence,
        });
        while self.history.len() > self.history_cap {
            self.history.pop_front();
        }

        integrate(
            &mut self.state,
            input,
            self.clock.step(),
            self.drag_multiplier,
            self.speed_multiplier,
            &self.tuning,
        );
        if let Some(facing) = Facing::from_velocity(self.state.velocity) {
            self.facing = facing;
        }
    }

    /// Replay the whole retained history on top of `base`, using exactly
    /// the tick the live prediction uses. Pure with respect to `self`.
    #[must_use]
    pub fn replay_from(&self, base: PhysicsState) -> PhysicsState {
        let mut state = base;
        for recorded in &self.history {
            integrate(
                &mut state,
                recorded.input,
                self.clock.step(),
                self.drag_multiplier,
                self.speed_multiplier,
                &self.tuning,
            );
        }
        state
    }

    /// Drop history entries the server has already applied.
    pub fn drop_acknowledged(&mut self, last_acked: u32) {
        while self
            .history
            .front()
            .is_some_and(|r| r.sequence <= last_acked)
        {
            self.history.pop_front();
        }
    }

    /// Move the avatar without traversal: velocity, backlog, and history
    /// all drop so no stale tick can march it away from the destination.
    pub fn teleport(&mut self, position: talaria_core::Vec2) {
        self.state = PhysicsState::at(position);
        self.history.clear();
        self.clock.clear();
        self.was_neutral = true;
        self.burst_start = self.sequence;
        tracing::debug!("teleported local avatar to ({}, {})", position.x, position.y);
    }

    /// Adopt an authoritative spawn state (session start or respawn).
    pub fn reset_to(&mut self, state: PhysicsState) {
        self.state = state;
        self.history.clear();
        self.clock.clear();
        self.was_neutral = true;
        self.burst_start = self.sequence;
    }

    /// Stat modifiers for damped motion (drag and speed buffs). Both
    /// sides of the wire must apply the same values.
    pub fn set_stat_multipliers(&mut self, drag: f32, speed: f32) {
        self.drag_multiplier = drag;
        self.speed_multiplier = speed;
    }

    /// Current predicted state.
    #[inline]
    #[must_use]
    pub const fn state(&self) -> PhysicsState {
        self.state
    }

    /// Newest executed tick sequence.
    #[inline]
    #[must_use]
    pub const fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Current presentation facing.
    #[inline]
    #[must_use]
    pub const fn facing(&self) -> Facing {
        self.facing
    }

    /// Retained (not yet acknowledged) history length.
    #[inline]
    #[must_use]
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Iterate the retained history, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &RecordedInput> {
        self.history.iter()
    }

    pub(crate) const fn burst_start(&self) -> u32 {
        self.burst_start
    }

    pub(crate) fn set_state(&mut self, state: PhysicsState) {
        self.state = state;
    }

    pub(crate) fn set_velocity(&mut self, velocity: talaria_core::Vec2) {
        self.state.velocity = velocity;
    }
}
