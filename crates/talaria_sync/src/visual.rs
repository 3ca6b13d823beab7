//! # Visual Correction Offset
//!
//! When a reconciliation snaps the physics state, the rendered avatar must
//! not pop. The difference between where the avatar was drawn and where
//! physics now says it stands becomes an additive offset that decays to
//! zero over the following ticks. Rendering reads `physics + offset`;
//! physics and anything derived from it (collision, the wire) never see
//! the offset at all.
//!
//! Decay is banded by magnitude: big offsets bleed off gently so a large
//! correction glides, small ones drain fast so the avatar settles crisply
//! instead of creeping through its last half unit.

use talaria_core::Vec2;

/// Additive presentation-only offset left behind by position corrections.
#[derive(Clone, Copy, Debug, Default)]
pub struct VisualOffset {
    offset: Vec2,
}

impl VisualOffset {
    /// Band edge above which the gentlest decay applies, world units.
    pub const BAND_FAR: f32 = 24.0;
    /// Middle band edge, world units.
    pub const BAND_MID: f32 = 12.0;
    /// Near band edge, world units.
    pub const BAND_NEAR: f32 = 3.0;

    /// Retention per tick above [`Self::BAND_FAR`].
    pub const RETAIN_FAR: f32 = 0.92;
    /// Retention per tick above [`Self::BAND_MID`].
    pub const RETAIN_MID: f32 = 0.88;
    /// Retention per tick above [`Self::BAND_NEAR`].
    pub const RETAIN_NEAR: f32 = 0.82;
    /// Retention per tick below [`Self::BAND_NEAR`].
    pub const RETAIN_CLOSE: f32 = 0.70;

    /// Below this magnitude the offset snaps to exactly zero.
    pub const EPSILON: f32 = 0.1;

    /// Start with no offset.
    #[must_use]
    pub const fn new() -> Self {
        Self { offset: Vec2::ZERO }
    }

    /// Replace the offset (a fresh correction landed).
    pub fn set(&mut self, offset: Vec2) {
        self.offset = offset;
    }

    /// Drop the offset immediately (hard snap or teleport).
    pub fn clear(&mut self) {
        self.offset = Vec2::ZERO;
    }

    /// Current offset.
    #[inline]
    #[must_use]
    pub const fn offset(&self) -> Vec2 {
        self.offset
    }

    /// True once the offset has fully drained.
    #[inline]
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.offset == Vec2::ZERO
    }

    /// Where to draw an entity whose physics stands at `physics_position`.
    #[inline]
    #[must_use]
    pub fn apply(&self, physics_position: Vec2) -> Vec2 {
        physics_position + self.offset
    }

    /// Run one tick of decay. Retention depends on magnitude; below
    /// [`Self::EPSILON`] the offset becomes exactly zero so it cannot
    /// linger as denormal dust.
    pub fn decay_tick(&mut self) {
        let magnitude = self.offset.length();
        if magnitude < Self::EPSILON {
            self.offset = Vec2::ZERO;
            return;
        }
        let retain = if magnitude > Self::BAND_FAR {
            Self::RETAIN_FAR
        } else if magnitude > Self::BAND_MID {
            Self::RETAIN_MID
        } else if magnitude > Self::BAND_NEAR {
            Self::RETAIN_NEAR
        } else {
            Self::RETAIN_CLOSE
        };
        self.offset = self.offset * retain;
    }
}
