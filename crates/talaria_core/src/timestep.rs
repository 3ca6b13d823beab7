//! # Fixed Timestep Accumulator
//!
//! Render frames arrive at whatever cadence the display manages; physics
//! ticks must not. This accumulator converts irregular frame deltas into
//! zero or more fixed steps, and clamps how much backlog one frame may
//! carry so a long stall (tab hidden, debugger pause) cannot trigger a
//! runaway burst of catch-up ticks.

/// Converts variable frame time into fixed simulation steps.
#[derive(Clone, Copy, Debug)]
pub struct FixedTimestep {
    /// Length of one simulation step, seconds
    step: f32,
    /// Accumulation ceiling, seconds (`step * max_steps`)
    cap: f32,
    /// Unconsumed simulated time, seconds
    accumulated: f32,
}

impl FixedTimestep {
    /// Create an accumulator that runs at most `max_steps` catch-up steps
    /// worth of backlog, no matter how large one frame delta is.
    #[must_use]
    pub fn new(step: f32, max_steps: u32) -> Self {
        Self {
            step,
            cap: step * max_steps as f32,
            accumulated: 0.0,
        }
    }

    /// Add a frame's elapsed time, clamped at the backlog ceiling.
    pub fn accumulate(&mut self, dt: f32) {
        self.accumulated = (self.accumulated + dt).min(self.cap);
    }

    /// Take one fixed step out of the backlog if one is available.
    pub fn consume_step(&mut self) -> bool {
        if self.accumulated >= self.step {
            self.accumulated -= self.step;
            true
        } else {
            false
        }
    }

    /// Length of one simulation step, seconds
    #[inline]
    #[must_use]
    pub const fn step(&self) -> f32 {
        self.step
    }

    /// Unconsumed backlog, seconds
    #[inline]
    #[must_use]
    pub const fn pending(&self) -> f32 {
        self.accumulated
    }

    /// Drop any backlog (used on teleport so stale frame time cannot
    /// advance the entity from its new position).
    pub fn clear(&mut self) {
        self.accumulated = 0.0;
    }
}
