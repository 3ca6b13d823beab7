//! # Remote Interpolation
//!
//! Remote entities are drawn in the past, on purpose. Snapshots arrive at
//! network cadence with network jitter; rendering at `now - delay` means
//! there is almost always a pair of snapshots bracketing the render time,
//! and the entity glides through them instead of stuttering at packet
//! rate.
//!
//! ```text
//!   snapshots:   s0----s1----s2----s3        (timestamps)
//!                            ^
//!                render time | = now - delay
//!                output: lerp(s2, s3)
//! ```
//!
//! When the buffer runs dry at the newest end, the last snapshot's
//! velocity carries the entity forward a bounded distance; the entity
//! never moves backward to fill a gap at the old end.

use std::collections::VecDeque;

use talaria_core::PhysicsState;

use crate::config::InterpolationConfig;

/// One authoritative observation of a remote entity.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RemoteSnapshot {
    /// Authoritative position and velocity.
    pub state: PhysicsState,
    /// Server timestamp, seconds on the session clock.
    pub timestamp: f64,
}

/// Timestamp-ordered snapshot buffer + sampler for one remote entity.
pub struct RemoteInterpolator {
    buffer: VecDeque<RemoteSnapshot>,
    cap: usize,
    delay: f64,
    max_extrapolation: f64,
    last_output: PhysicsState,
}

impl RemoteInterpolator {
    /// Create an interpolator with the given tuning.
    #[must_use]
    pub fn new(config: &InterpolationConfig) -> Self {
        Self {
            buffer: VecDeque::with_capacity(config.buffer_cap),
            cap: config.buffer_cap,
            delay: f64::from(config.delay),
            max_extrapolation: f64::from(config.max_extrapolation),
            last_output: PhysicsState::default(),
        }
    }

    /// Insert a snapshot at its timestamp-sorted position. Late arrivals
    /// slot into the middle; the oldest snapshot is evicted past the cap.
    pub fn push(&mut self, snapshot: RemoteSnapshot) {
        let at = self
            .buffer
            .iter()
            .rposition(|s| s.timestamp <= snapshot.timestamp)
            .map_or(0, |i| i + 1);
        self.buffer.insert(at, snapshot);
        while self.buffer.len() > self.cap {
            self.buffer.pop_front();
        }
    }

    /// Sample the entity's state for a frame rendered at `now`.
    pub fn sample(&mut self, now: f64) -> PhysicsState {
        let render_time = now - self.delay;

        // Snapshots entirely behind the render window will never be
        // bracketed again; drop them, always keeping a usable pair.
        while self.buffer.len() > 2 && self.buffer[1].timestamp < render_time {
            self.buffer.pop_front();
        }

        let output = match self.buffer.len() {
            0 => self.last_output,
            1 => self.buffer[0].state,
            _ => self.sample_window(render_time),
        };
        self.last_output = output;
        output
    }

    fn sample_window(&self, render_time: f64) -> PhysicsState {
        let oldest = &self.buffer[0];
        let newest = &self.buffer[self.buffer.len() - 1];

        // Before the window: clamp. Never extrapolate backward.
        if render_time <= oldest.timestamp {
            return oldest.state;
        }

        // Past the window: ride the last velocity, a bounded distance.
        if render_time >= newest.timestamp {
            let ahead = (render_time - newest.timestamp).min(self.max_extrapolation);
            return PhysicsState {
                position: newest.state.position + newest.state.velocity * ahead as f32,
                velocity: newest.state.velocity,
            };
        }

        // Inside the window: blend across the bracketing pair.
        for i in 0..self.buffer.len() - 1 {
            let a = &self.buffer[i];
            let b = &self.buffer[i + 1];
            if a.timestamp <= render_time && render_time < b.timestamp {
                let span = b.timestamp - a.timestamp;
                let t = ((render_time - a.timestamp) / span) as f32;
                return PhysicsState {
                    position: a.state.position.lerp(&b.state.position, t),
                    velocity: a.state.velocity.lerp(&b.state.velocity, t),
                };
            }
        }

        // Unreachable given the clamps above; newest is the safe answer.
        newest.state
    }

    /// Buffered snapshot count.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// True when no snapshots are buffered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Oldest buffered timestamp, if any.
    #[must_use]
    pub fn oldest_timestamp(&self) -> Option<f64> {
        self.buffer.front().map(|s| s.timestamp)
    }

    /// Drop all buffered snapshots (entity teardown).
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
