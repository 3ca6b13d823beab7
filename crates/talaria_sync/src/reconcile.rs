//! # Server Reconciliation
//!
//! The server's word is law, but it arrives a round-trip late. A
//! correction names the authoritative state and the newest input sequence
//! folded into it; everything the client predicted past that point is
//! replayed on top, and only the residual error decides how hard the
//! client gets corrected:
//!
//! ```text
//!  error d after replay
//!  ------------------------------------------------------------
//!  burst just started      ->  grace: sync velocity, hands off
//!  d <  correct_threshold  ->  sync velocity only
//!  d <  snap_threshold     ->  snap physics, hide seam in offset
//!  d >= snap_threshold     ->  hard snap, no smoothing
//! ```
//!
//! Acks are monotonic: a correction older than one already applied is
//! ignored outright, which is what makes duplicate and reordered
//! corrections harmless.

use talaria_core::PhysicsState;

use crate::config::CorrectionConfig;
use crate::prediction::LocalPredictor;
use crate::visual::VisualOffset;

/// What one authoritative correction did to the local avatar.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ReconcileResult {
    /// Ack older than one already applied; correction ignored.
    Stale,
    /// Movement burst too fresh to judge; velocity synced, position kept.
    Grace,
    /// Replay landed close enough; velocity synced, position kept.
    VelocityOnly {
        /// Replay error, world units.
        error: f32,
    },
    /// Physics snapped to the replayed state; the rendered position is
    /// carried over into the visual offset and decays from there.
    SoftSnap {
        /// Replay error, world units.
        error: f32,
    },
    /// Desync beyond smoothing; physics and presentation both snapped.
    HardSnap {
        /// Replay error, world units.
        error: f32,
    },
}

/// Applies authoritative corrections to the local predictor.
pub struct Reconciler {
    config: CorrectionConfig,
    newest_acked: u32,
}

impl Reconciler {
    /// Create a reconciler with the given tier thresholds.
    #[must_use]
    pub const fn new(config: CorrectionConfig) -> Self {
        Self {
            config,
            newest_acked: 0,
        }
    }

    /// Newest input sequence the server has acknowledged.
    #[inline]
    #[must_use]
    pub const fn newest_acked(&self) -> u32 {
        self.newest_acked
    }

    /// Apply one correction: trim acknowledged history, replay the rest
    /// through the shared integrator, then correct by tier.
    pub fn apply(
        &mut self,
        predictor: &mut LocalPredictor,
        visual: &mut VisualOffset,
        server_state: PhysicsState,
        last_acked: u32,
    ) -> ReconcileResult {
        if last_acked < self.newest_acked {
            return ReconcileResult::Stale;
        }
        self.newest_acked = last_acked;

        predictor.drop_acknowledged(last_acked);
        let resimulated = predictor.replay_from(server_state);
        let live = predictor.state();
        let error = live.position.distance(&resimulated.position);

        // A burst this fresh has inputs the server cannot have seen yet;
        // yanking position now would punish the player for having a ping.
        let grace_end = predictor
            .burst_start()
            .saturating_add(self.config.grace_ticks);
        if predictor.sequence() < grace_end && last_acked < grace_end {
            predictor.set_velocity(resimulated.velocity);
            return ReconcileResult::Grace;
        }

        if error < self.config.correct_threshold {
            predictor.set_velocity(resimulated.velocity);
            ReconcileResult::VelocityOnly { error }
        } else if error < self.config.snap_threshold {
            // Physics snaps now; the eye keeps the old rendered position
            // and glides, because the offset absorbs the whole difference.
            let rendered = visual.apply(live.position);
            predictor.set_state(resimulated);
            visual.set(rendered - resimulated.position);
            tracing::debug!("soft snap: {:.2} units of replay error", error);
            ReconcileResult::SoftSnap { error }
        } else {
            predictor.set_state(resimulated);
            visual.clear();
            tracing::info!("hard snap: {:.2} units of replay error", error);
            ReconcileResult::HardSnap { error }
        }
    }
}
