//! # Movement Integrator
//!
//! One fixed-step state advance, shared verbatim by client prediction and
//! post-correction replay. If prediction and replay ever disagree on the
//! same `(state, input, dt)`, every correction turns into a rubber-band,
//! so this module stays a pure function: no clocks, no randomness, no
//! allocation.
//!
//! ## Motion models
//!
//! - [`MotionModel::Direct`]: velocity is set straight from the input axes.
//!   Used for entities with no stat modifiers; cheapest and exactly
//!   replayable.
//! - [`MotionModel::Damped`]: velocity relaxes exponentially toward the
//!   direct-mode target. Drag and speed stat multipliers plug in here.
//!
//! Diagonal input never outruns cardinal input: when both axes are active,
//! both components scale by `1/sqrt(2)`.

use serde::{Deserialize, Serialize};

use crate::math::Vec2;
use crate::motion::{MoveInput, PhysicsState};

/// How velocity responds to input.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MotionModel {
    /// Velocity equals the input target immediately
    #[default]
    Direct,
    /// Velocity relaxes toward the target at `drag_rate` per second
    Damped,
}

/// Tuning constants for the integrator. Loaded once from config at startup;
/// both sides of the wire must agree on the values in use.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MoveTuning {
    /// Velocity response model
    pub model: MotionModel,
    /// Walk speed at speed multiplier 1.0, world units per second
    pub base_speed: f32,
    /// Exponential approach rate toward the target velocity, per second.
    /// Only read by [`MotionModel::Damped`].
    pub drag_rate: f32,
}

impl Default for MoveTuning {
    fn default() -> Self {
        Self {
            model: MotionModel::Direct,
            base_speed: 160.0,
            drag_rate: 12.0,
        }
    }
}

/// The velocity the input is asking for, before any damping.
#[inline]
#[must_use]
fn target_velocity(input: MoveInput, speed_multiplier: f32, tuning: &MoveTuning) -> Vec2 {
    let x = input.axis_x();
    let y = input.axis_y();
    // Both axes active: scale so diagonal speed matches cardinal speed.
    let diagonal = if x != 0.0 && y != 0.0 {
        std::f32::consts::FRAC_1_SQRT_2
    } else {
        1.0
    };
    let speed = tuning.base_speed * speed_multiplier * diagonal;
    Vec2::new(x * speed, y * speed)
}

/// Advance `state` by one step of `dt` seconds under `input`.
///
/// Pure: the only effect is the in-place mutation of `state`. Identical
/// whether called from the live prediction tick or from reconciliation
/// replay, which is the whole point.
pub fn integrate(
    state: &mut PhysicsState,
    input: MoveInput,
    dt: f32,
    drag_multiplier: f32,
    speed_multiplier: f32,
    tuning: &MoveTuning,
) {
    let target = target_velocity(input, speed_multiplier, tuning);
    match tuning.model {
        MotionModel::Direct => {
            state.velocity = target;
        }
        MotionModel::Damped => {
            // Clamp the blend at 1 so a long dt cannot overshoot the target.
            let blend = (tuning.drag_rate * drag_multiplier * dt).min(1.0);
            state.velocity += (target - state.velocity) * blend;
        }
    }
    state.position += state.velocity * dt;
}
