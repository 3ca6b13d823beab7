//! # TALARIA Core
//!
//! Deterministic movement primitives shared by the predicting client, the
//! reconciliation replay, and the authoritative server.
//!
//! ## CRITICAL RULE
//!
//! This crate must NEVER depend on:
//! - channels or any transport
//! - clocks or timers
//! - randomness
//!
//! Prediction and replay call the exact same [`integrate`] on the exact
//! same types; anything nondeterministic here turns every server
//! correction into visible rubber-banding. If you need I/O, put it in
//! `talaria_sync`.

#![deny(missing_docs)]
#![deny(unsafe_code)]

pub mod integrator;
pub mod math;
pub mod motion;
pub mod timestep;

pub use integrator::{integrate, MotionModel, MoveTuning};
pub use math::Vec2;
pub use motion::{Facing, MoveInput, PhysicsState, RecordedInput};
pub use timestep::FixedTimestep;
