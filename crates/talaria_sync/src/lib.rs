//! # TALARIA Sync - Movement That Never Waits
//!
//! Client-side movement prediction with authoritative reconciliation.
//!
//! ## Architecture
//!
//! This crate implements the complete synchronization stack for TALARIA:
//!
//! - **Prediction**: Fixed-step local simulation with bounded input history
//! - **Reconciliation**: Replay from the last acknowledged input, corrections
//!   tiered by how far the replay landed from the prediction
//! - **Smoothing**: Corrections bend the rendered position only; physics
//!   snaps immediately and never lies
//! - **Interpolation**: Remote entities render ~100ms in the past between
//!   buffered snapshots, with capped forward extrapolation
//! - **Gating**: Commands queue FIFO until the server says ready, and the
//!   queue survives reconnects
//!
//! ## Threading Model
//!
//! Single-threaded by contract. Every call into [`Session`] runs on the
//! game loop thread; nothing here blocks it. The one awaitable — the
//! [`ReadyTicket`] from [`Session::connect`] — suspends only whoever
//! chooses to wait on it.
//!
//! ## Authority Model
//!
//! ```text
//! CLIENT                               SERVER
//!   |                                     |
//!   |-- Move { state, seq } ------------->|
//!   |          (predicted, 20Hz)          | <- validates, applies
//!   |                                     |
//!   |<- LocalCorrection { state, ack } ---|
//!   |   drop acked inputs, replay rest    |
//!   |   error < 8:    sync velocity only  |
//!   |   error < 64:   snap + visual bend  |
//!   |   error >= 64:  hard snap           |
//! ```
//!
//! The client predicts so movement never waits on the wire. The server
//! corrects so the client never drifts from the truth.
//!
//! ## Example
//!
//! ```rust,ignore
//! use talaria_sync::{Session, SyncConfig};
//!
//! let mut session = Session::new(SyncConfig::default(), transport);
//! let ticket = session.connect();
//!
//! // Game loop, every frame:
//! session.frame(now, dt, sampled_input, chat_open);
//! for bytes in transport_inbound {
//!     session.handle_server_bytes(&bytes)?;
//! }
//! let (position, velocity) = session.render_local();
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod error;
pub mod protocol;
pub mod gate;
pub mod prediction;
pub mod visual;
pub mod reconcile;
pub mod interpolation;
pub mod events;
pub mod session;
pub mod simulation;

// Re-exports for convenience
pub use config::{CorrectionConfig, InterpolationConfig, SyncConfig};
pub use error::{ProtocolError, SyncError, SyncResult};
pub use events::{EventBus, SessionEvent};
pub use gate::{CommandSink, ConnectionGate, ConnectionState, ReadyInfo, ReadyTicket};
pub use interpolation::{RemoteInterpolator, RemoteSnapshot};
pub use prediction::{FrameOutput, LocalPredictor, PredictedMove};
pub use protocol::{ClientCommand, EntityId, RejectReason, ServerEvent, ServerMessage};
pub use reconcile::{ReconcileResult, Reconciler};
pub use session::{Session, SessionStats};
pub use simulation::{NetworkConditions, SimHarness, SimServer};
pub use visual::VisualOffset;
