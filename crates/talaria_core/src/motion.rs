//! # Movement State and Input Types
//!
//! The value types every other layer agrees on: the physics state a tick
//! advances, the directional input that drives it, and the per-tick record
//! the predictor keeps for replay after a server correction.
//!
//! All wire-crossing types here are `#[repr(C)]` POD. No methods mutate
//! anything besides their receiver.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

use crate::math::Vec2;

/// Directional input sampled for one fixed tick, packed as a bitfield.
///
/// Opposite directions cancel: UP+DOWN yields a zero Y axis, matching what
/// a keyboard actually produces when both keys are held.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Pod, Zeroable)]
pub struct MoveInput {
    /// Pressed-direction bits (see `FLAG_*` constants)
    pub flags: u8,
}

impl MoveInput {
    /// Up direction flag (+Y)
    pub const FLAG_UP: u8 = 1 << 0;
    /// Down direction flag (-Y)
    pub const FLAG_DOWN: u8 = 1 << 1;
    /// Left direction flag (-X)
    pub const FLAG_LEFT: u8 = 1 << 2;
    /// Right direction flag (+X)
    pub const FLAG_RIGHT: u8 = 1 << 3;

    /// No direction pressed
    pub const NEUTRAL: Self = Self { flags: 0 };

    /// Build an input from four direction booleans
    #[must_use]
    pub const fn new(up: bool, down: bool, left: bool, right: bool) -> Self {
        let mut flags = 0u8;
        if up {
            flags |= Self::FLAG_UP;
        }
        if down {
            flags |= Self::FLAG_DOWN;
        }
        if left {
            flags |= Self::FLAG_LEFT;
        }
        if right {
            flags |= Self::FLAG_RIGHT;
        }
        Self { flags }
    }

    /// Check if a direction flag is pressed
    #[inline]
    #[must_use]
    pub const fn is_pressed(&self, flag: u8) -> bool {
        (self.flags & flag) != 0
    }

    /// Horizontal axis in {-1, 0, +1}; opposite keys cancel
    #[inline]
    #[must_use]
    pub fn axis_x(&self) -> f32 {
        let mut x = 0.0;
        if self.is_pressed(Self::FLAG_RIGHT) {
            x += 1.0;
        }
        if self.is_pressed(Self::FLAG_LEFT) {
            x -= 1.0;
        }
        x
    }

    /// Vertical axis in {-1, 0, +1}; opposite keys cancel
    #[inline]
    #[must_use]
    pub fn axis_y(&self) -> f32 {
        let mut y = 0.0;
        if self.is_pressed(Self::FLAG_UP) {
            y += 1.0;
        }
        if self.is_pressed(Self::FLAG_DOWN) {
            y -= 1.0;
        }
        y
    }

    /// True when no direction is pressed (or all presses cancel)
    #[inline]
    #[must_use]
    pub fn is_neutral(&self) -> bool {
        self.axis_x() == 0.0 && self.axis_y() == 0.0
    }
}

/// Cardinal facing, derived from velocity for presentation and the wire.
///
/// Kept as a closed enum: unknown discriminants are rejected when decoding,
/// and every match over facing is exhaustive.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Facing {
    /// Facing +Y
    Up = 0,
    /// Facing -Y (spawn-time default)
    #[default]
    Down = 1,
    /// Facing -X
    Left = 2,
    /// Facing +X
    Right = 3,
}

impl Facing {
    /// Derive a facing from a velocity, dominant axis winning.
    /// Returns `None` for a ~zero velocity so callers keep the last facing.
    #[must_use]
    pub fn from_velocity(velocity: Vec2) -> Option<Self> {
        if velocity.length_squared() <= f32::EPSILON {
            return None;
        }
        if velocity.x.abs() >= velocity.y.abs() {
            Some(if velocity.x >= 0.0 {
                Self::Right
            } else {
                Self::Left
            })
        } else {
            Some(if velocity.y >= 0.0 { Self::Up } else { Self::Down })
        }
    }
}

impl TryFrom<u8> for Facing {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Up),
            1 => Ok(Self::Down),
            2 => Ok(Self::Left),
            3 => Ok(Self::Right),
            other => Err(other),
        }
    }
}

/// The kinematic state one entity needs synchronized: where it is and how
/// fast it is moving. Exactly one owner may mutate an instance at any time.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize, Pod, Zeroable)]
pub struct PhysicsState {
    /// Position on the movement plane, world units
    pub position: Vec2,
    /// Velocity, world units per second
    pub velocity: Vec2,
}

impl PhysicsState {
    /// State at rest at a position
    #[inline]
    #[must_use]
    pub const fn at(position: Vec2) -> Self {
        Self {
            position,
            velocity: Vec2::ZERO,
        }
    }
}

/// One fixed tick's input, frozen for replay. Immutable once recorded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordedInput {
    /// The directional input applied on that tick
    pub input: MoveInput,
    /// The tick's sequence number, +1 per tick, never reused
    pub sequence: u32,
}
