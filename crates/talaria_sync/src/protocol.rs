//! # Wire Protocol
//!
//! Every message is a tag byte followed by a fixed-size `#[repr(C)]`
//! payload. All validation happens here, at the boundary: unknown tags,
//! unknown facing discriminants, and wrong payload lengths are rejected
//! before anything reaches the engine. Past this module, a command or
//! event is well-formed by construction.
//!
//! ## Layout
//!
//! ```text
//! +-----+----------------------+
//! | tag |  payload (POD, LE)   |
//! +-----+----------------------+
//!   1 B    fixed per tag
//! ```
//!
//! Timestamps travel as `u32` milliseconds on the session clock and widen
//! to `f64` seconds inside the engine.

use bytemuck::{Pod, Zeroable};

use talaria_core::{Facing, PhysicsState, Vec2};

use crate::error::ProtocolError;

/// Stable identifier the server assigns to each entity in the session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub u32);

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Message tags. One byte on the wire; unknown values never construct.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WireTag {
    // Client -> Server
    /// Request to join the session
    Join = 0,
    /// Predicted movement update
    Move = 1,
    /// Client-initiated teleport request
    Teleport = 2,
    /// Orderly departure
    Leave = 3,

    // Server -> Client
    /// Join accepted, session is logically ready
    SessionReady = 4,
    /// Join refused
    JoinRejected = 5,
    /// Authoritative state + ack for the local entity
    LocalCorrection = 6,
    /// Authoritative snapshot for a remote entity
    RemoteMoved = 7,
    /// A remote entity left the session
    RemoteLeft = 8,
}

impl TryFrom<u8> for WireTag {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Join),
            1 => Ok(Self::Move),
            2 => Ok(Self::Teleport),
            3 => Ok(Self::Leave),
            4 => Ok(Self::SessionReady),
            5 => Ok(Self::JoinRejected),
            6 => Ok(Self::LocalCorrection),
            7 => Ok(Self::RemoteMoved),
            8 => Ok(Self::RemoteLeft),
            other => Err(ProtocolError::UnknownTag(other)),
        }
    }
}

/// Why the server refused a join.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectReason {
    /// Session is at capacity
    ServerFull = 0,
    /// Client protocol version does not match
    VersionMismatch = 1,
    /// Client is not allowed in this session
    NotAuthorized = 2,
}

impl TryFrom<u8> for RejectReason {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::ServerFull),
            1 => Ok(Self::VersionMismatch),
            2 => Ok(Self::NotAuthorized),
            other => Err(ProtocolError::UnknownReason(other)),
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::ServerFull => "server full",
            Self::VersionMismatch => "protocol version mismatch",
            Self::NotAuthorized => "not authorized",
        };
        f.write_str(text)
    }
}

// Wire payload layouts. Private: the typed enums below are the API.

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct MovePayload {
    x: f32,
    y: f32,
    vx: f32,
    vy: f32,
    sequence: u32,
    facing: u8,
    _pad: [u8; 3],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct TeleportPayload {
    x: f32,
    y: f32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct SessionReadyPayload {
    entity: u32,
    x: f32,
    y: f32,
    vx: f32,
    vy: f32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct JoinRejectedPayload {
    reason: u8,
    _pad: [u8; 3],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct CorrectionPayload {
    x: f32,
    y: f32,
    vx: f32,
    vy: f32,
    last_acked: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct RemoteMovedPayload {
    entity: u32,
    x: f32,
    y: f32,
    vx: f32,
    vy: f32,
    timestamp_ms: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct RemoteLeftPayload {
    entity: u32,
}

/// Everything a client can say to the server.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ClientCommand {
    /// Ask to join the session.
    Join,
    /// Report predicted movement up to `sequence`.
    Move {
        /// Predicted position and velocity after this tick.
        state: PhysicsState,
        /// Presentation facing derived from velocity.
        facing: Facing,
        /// The tick sequence this state corresponds to.
        sequence: u32,
    },
    /// Ask to be moved somewhere without traversal.
    Teleport {
        /// Destination position.
        position: Vec2,
    },
    /// Leave the session cleanly.
    Leave,
}

impl ClientCommand {
    /// Encode as tag + payload bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Join => vec![WireTag::Join as u8],
            Self::Move {
                state,
                facing,
                sequence,
            } => {
                let payload = MovePayload {
                    x: state.position.x,
                    y: state.position.y,
                    vx: state.velocity.x,
                    vy: state.velocity.y,
                    sequence: *sequence,
                    facing: *facing as u8,
                    _pad: [0; 3],
                };
                encode_with_tag(WireTag::Move, &payload)
            }
            Self::Teleport { position } => {
                let payload = TeleportPayload {
                    x: position.x,
                    y: position.y,
                };
                encode_with_tag(WireTag::Teleport, &payload)
            }
            Self::Leave => vec![WireTag::Leave as u8],
        }
    }

    /// Decode and validate one command. Unknown tags, server-only tags,
    /// and malformed payloads are all rejected here.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (tag, body) = split_tag(bytes)?;
        match tag {
            WireTag::Join => {
                expect_len(body, 0)?;
                Ok(Self::Join)
            }
            WireTag::Move => {
                let payload: MovePayload = read_payload(body)?;
                Ok(Self::Move {
                    state: PhysicsState {
                        position: Vec2::new(payload.x, payload.y),
                        velocity: Vec2::new(payload.vx, payload.vy),
                    },
                    facing: Facing::try_from(payload.facing)
                        .map_err(ProtocolError::UnknownFacing)?,
                    sequence: payload.sequence,
                })
            }
            WireTag::Teleport => {
                let payload: TeleportPayload = read_payload(body)?;
                Ok(Self::Teleport {
                    position: Vec2::new(payload.x, payload.y),
                })
            }
            WireTag::Leave => {
                expect_len(body, 0)?;
                Ok(Self::Leave)
            }
            // A server->client tag arriving on the upstream path is a
            // protocol violation, same as a tag we have never heard of.
            other => Err(ProtocolError::UnknownTag(other as u8)),
        }
    }
}

/// Everything the server can say to a client over the wire.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ServerMessage {
    /// The join was accepted; the session is logically ready.
    SessionReady {
        /// Entity id assigned to the local avatar.
        entity: EntityId,
        /// Authoritative spawn state.
        state: PhysicsState,
    },
    /// The join was refused.
    JoinRejected {
        /// Why the server said no.
        reason: RejectReason,
    },
    /// Authoritative state for the local avatar plus the newest processed
    /// input sequence.
    LocalCorrection {
        /// Authoritative position and velocity.
        state: PhysicsState,
        /// Highest input sequence the server has applied.
        last_acked: u32,
    },
    /// Authoritative snapshot of a remote entity.
    RemoteMoved {
        /// Which entity moved.
        entity: EntityId,
        /// Its authoritative state.
        state: PhysicsState,
        /// Server timestamp of the snapshot, seconds.
        timestamp: f64,
    },
    /// A remote entity left the session.
    RemoteLeft {
        /// Which entity left.
        entity: EntityId,
    },
}

impl ServerMessage {
    /// Encode as tag + payload bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::SessionReady { entity, state } => {
                let payload = SessionReadyPayload {
                    entity: entity.0,
                    x: state.position.x,
                    y: state.position.y,
                    vx: state.velocity.x,
                    vy: state.velocity.y,
                };
                encode_with_tag(WireTag::SessionReady, &payload)
            }
            Self::JoinRejected { reason } => {
                let payload = JoinRejectedPayload {
                    reason: *reason as u8,
                    _pad: [0; 3],
                };
                encode_with_tag(WireTag::JoinRejected, &payload)
            }
            Self::LocalCorrection { state, last_acked } => {
                let payload = CorrectionPayload {
                    x: state.position.x,
                    y: state.position.y,
                    vx: state.velocity.x,
                    vy: state.velocity.y,
                    last_acked: *last_acked,
                };
                encode_with_tag(WireTag::LocalCorrection, &payload)
            }
            Self::RemoteMoved {
                entity,
                state,
                timestamp,
            } => {
                let payload = RemoteMovedPayload {
                    entity: entity.0,
                    x: state.position.x,
                    y: state.position.y,
                    vx: state.velocity.x,
                    vy: state.velocity.y,
                    timestamp_ms: (timestamp * 1000.0) as u32,
                };
                encode_with_tag(WireTag::RemoteMoved, &payload)
            }
            Self::RemoteLeft { entity } => {
                let payload = RemoteLeftPayload { entity: entity.0 };
                encode_with_tag(WireTag::RemoteLeft, &payload)
            }
        }
    }

    /// Decode and validate one server message.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (tag, body) = split_tag(bytes)?;
        match tag {
            WireTag::SessionReady => {
                let payload: SessionReadyPayload = read_payload(body)?;
                Ok(Self::SessionReady {
                    entity: EntityId(payload.entity),
                    state: PhysicsState {
                        position: Vec2::new(payload.x, payload.y),
                        velocity: Vec2::new(payload.vx, payload.vy),
                    },
                })
            }
            WireTag::JoinRejected => {
                let payload: JoinRejectedPayload = read_payload(body)?;
                Ok(Self::JoinRejected {
                    reason: RejectReason::try_from(payload.reason)?,
                })
            }
            WireTag::LocalCorrection => {
                let payload: CorrectionPayload = read_payload(body)?;
                Ok(Self::LocalCorrection {
                    state: PhysicsState {
                        position: Vec2::new(payload.x, payload.y),
                        velocity: Vec2::new(payload.vx, payload.vy),
                    },
                    last_acked: payload.last_acked,
                })
            }
            WireTag::RemoteMoved => {
                let payload: RemoteMovedPayload = read_payload(body)?;
                Ok(Self::RemoteMoved {
                    entity: EntityId(payload.entity),
                    state: PhysicsState {
                        position: Vec2::new(payload.x, payload.y),
                        velocity: Vec2::new(payload.vx, payload.vy),
                    },
                    timestamp: f64::from(payload.timestamp_ms) / 1000.0,
                })
            }
            WireTag::RemoteLeft => {
                let payload: RemoteLeftPayload = read_payload(body)?;
                Ok(Self::RemoteLeft {
                    entity: EntityId(payload.entity),
                })
            }
            other => Err(ProtocolError::UnknownTag(other as u8)),
        }
    }
}

/// Everything the session reacts to: transport signals from the link layer
/// plus validated wire messages. Transport signals have no wire form.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ServerEvent {
    /// Physical connection established (not yet logically ready).
    TransportUp,
    /// Physical connection lost.
    TransportDown,
    /// A validated message from the server.
    Message(ServerMessage),
}

fn encode_with_tag<P: Pod>(tag: WireTag, payload: &P) -> Vec<u8> {
    let body = bytemuck::bytes_of(payload);
    let mut bytes = Vec::with_capacity(1 + body.len());
    bytes.push(tag as u8);
    bytes.extend_from_slice(body);
    bytes
}

fn split_tag(bytes: &[u8]) -> Result<(WireTag, &[u8]), ProtocolError> {
    let (first, rest) = bytes.split_first().ok_or(ProtocolError::BadLength {
        expected: 1,
        got: 0,
    })?;
    Ok((WireTag::try_from(*first)?, rest))
}

fn expect_len(body: &[u8], expected: usize) -> Result<(), ProtocolError> {
    if body.len() == expected {
        Ok(())
    } else {
        Err(ProtocolError::BadLength {
            expected,
            got: body.len(),
        })
    }
}

fn read_payload<P: Pod>(body: &[u8]) -> Result<P, ProtocolError> {
    expect_len(body, std::mem::size_of::<P>())?;
    // Length is verified; the read is unaligned because of the tag byte.
    Ok(bytemuck::pod_read_unaligned(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_state() -> PhysicsState {
        PhysicsState {
            position: Vec2::new(12.5, -8.0),
            velocity: Vec2::new(160.0, 0.0),
        }
    }

    #[test]
    fn test_command_round_trip() {
        let commands = [
            ClientCommand::Join,
            ClientCommand::Move {
                state: sample_state(),
                facing: Facing::Right,
                sequence: 4711,
            },
            ClientCommand::Teleport {
                position: Vec2::new(-3.0, 99.0),
            },
            ClientCommand::Leave,
        ];
        for command in commands {
            let bytes = command.encode();
            assert_eq!(ClientCommand::decode(&bytes).unwrap(), command);
        }
    }

    #[test]
    fn test_server_message_round_trip() {
        let messages = [
            ServerMessage::SessionReady {
                entity: EntityId(7),
                state: sample_state(),
            },
            ServerMessage::JoinRejected {
                reason: RejectReason::ServerFull,
            },
            ServerMessage::LocalCorrection {
                state: sample_state(),
                last_acked: 890,
            },
            ServerMessage::RemoteMoved {
                entity: EntityId(3),
                state: sample_state(),
                timestamp: 12.345,
            },
            ServerMessage::RemoteLeft { entity: EntityId(3) },
        ];
        for message in messages {
            let bytes = message.encode();
            assert_eq!(ServerMessage::decode(&bytes).unwrap(), message);
        }
    }

    #[test]
    fn test_unknown_tag_rejected() {
        assert_eq!(
            ClientCommand::decode(&[0xAB]),
            Err(ProtocolError::UnknownTag(0xAB))
        );
        assert_eq!(
            ServerMessage::decode(&[0xAB]),
            Err(ProtocolError::UnknownTag(0xAB))
        );
    }

    #[test]
    fn test_direction_confusion_rejected() {
        // A client command arriving where server messages are expected.
        let bytes = ClientCommand::Join.encode();
        assert_eq!(
            ServerMessage::decode(&bytes),
            Err(ProtocolError::UnknownTag(WireTag::Join as u8))
        );
    }

    #[test]
    fn test_truncated_payload_rejected() {
        let mut bytes = ClientCommand::Move {
            state: sample_state(),
            facing: Facing::Up,
            sequence: 1,
        }
        .encode();
        bytes.truncate(bytes.len() - 5);
        assert!(matches!(
            ClientCommand::decode(&bytes),
            Err(ProtocolError::BadLength { .. })
        ));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = ClientCommand::Leave.encode();
        bytes.push(0);
        assert!(matches!(
            ClientCommand::decode(&bytes),
            Err(ProtocolError::BadLength {
                expected: 0,
                got: 1
            })
        ));
    }

    #[test]
    fn test_unknown_facing_rejected() {
        let mut bytes = ClientCommand::Move {
            state: sample_state(),
            facing: Facing::Down,
            sequence: 9,
        }
        .encode();
        // Facing byte sits right after the four f32 pairs + sequence.
        let facing_offset = 1 + 4 * 4 + 4;
        bytes[facing_offset] = 17;
        assert_eq!(
            ClientCommand::decode(&bytes),
            Err(ProtocolError::UnknownFacing(17))
        );
    }

    #[test]
    fn test_empty_input_rejected() {
        assert!(ClientCommand::decode(&[]).is_err());
        assert!(ServerMessage::decode(&[]).is_err());
    }

    #[test]
    fn test_timestamp_millisecond_precision() {
        let message = ServerMessage::RemoteMoved {
            entity: EntityId(1),
            state: sample_state(),
            timestamp: 7.6543,
        };
        let decoded = ServerMessage::decode(&message.encode()).unwrap();
        if let ServerMessage::RemoteMoved { timestamp, .. } = decoded {
            assert!((timestamp - 7.654).abs() < 1e-9);
        } else {
            panic!("wrong variant");
        }
    }
}
