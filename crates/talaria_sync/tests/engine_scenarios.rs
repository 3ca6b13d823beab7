//! # Engine Scenario Tests
//!
//! End-to-end runs of the full synchronization stack: a real `Session`
//! driven frame by frame, against a recording sink or the loopback
//! harness with hostile network conditions.

use talaria_core::{MoveInput, PhysicsState, Vec2};
use talaria_sync::simulation::{NetworkConditions, SimHarness};
use talaria_sync::{
    ClientCommand, CommandSink, EntityId, ServerEvent, ServerMessage, Session, SessionEvent,
    SyncConfig, SyncResult,
};

/// Sink that records every transmitted command.
struct RecordingSink {
    sent: Vec<ClientCommand>,
}

impl CommandSink for RecordingSink {
    fn connect(&mut self) {}

    fn transmit(&mut self, command: &ClientCommand) -> SyncResult<()> {
        self.sent.push(*command);
        Ok(())
    }
}

fn ready_session() -> Session<RecordingSink> {
    let mut session = Session::new(SyncConfig::default(), RecordingSink { sent: Vec::new() });
    session.connect();
    session.handle_server_event(ServerEvent::TransportUp);
    session.handle_server_event(ServerEvent::Message(ServerMessage::SessionReady {
        entity: EntityId(1),
        state: PhysicsState::default(),
    }));
    session
}

/// Step neutral frames until the harness session is ready, re-asking for
/// the handshake periodically in case the join was lost in transit.
fn run_until_ready(harness: &mut SimHarness, max_frames: u32) -> bool {
    let step = harness.session.config().fixed_step;
    harness.session.connect();
    for frame in 0..max_frames {
        if harness.session.is_ready() {
            return true;
        }
        harness.step_frame(step, MoveInput::NEUTRAL);
        if frame % 120 == 119 {
            harness.session.connect();
        }
    }
    harness.session.is_ready()
}

/// Test: two seconds idle then one second moving; sequences stay gapless
/// through the idle period and the send cadence never exceeds 20 Hz.
#[test]
fn test_idle_then_move_keeps_sequences_gapless() {
    let mut session = ready_session();
    let config = session.config().clone();
    let step = config.fixed_step;
    let mut now = 0.0f64;

    for _ in 0..120 {
        now += f64::from(step);
        session.frame(now, step, MoveInput::NEUTRAL, false);
    }
    for _ in 0..60 {
        now += f64::from(step);
        session.frame(now, step, MoveInput::new(false, false, false, true), false);
    }

    assert_eq!(session.stats().ticks, 180);
    assert_eq!(session.predictor().sequence(), 180, "a tick was skipped");
    assert!(session.predictor().history_len() <= config.history_cap);

    let sequences: Vec<u32> = session
        .sink()
        .sent
        .iter()
        .filter_map(|c| match c {
            ClientCommand::Move { sequence, .. } => Some(*sequence),
            _ => None,
        })
        .collect();

    // 60 ticks per second, 20 sends per second: one send every 3 ticks,
    // through idle and movement alike.
    assert_eq!(sequences.first(), Some(&3), "idle sends must start at once");
    assert_eq!(sequences.last(), Some(&180));
    for pair in sequences.windows(2) {
        assert_eq!(pair[1] - pair[0], 3, "send cadence slipped: {pair:?}");
    }
}

/// Test: an honest client walking a zig-zag over a poor network needs no
/// position snaps at all, and lands exactly where the server thinks it is.
#[test]
fn test_poor_network_walk_converges_without_snaps() {
    let mut harness = SimHarness::new(SyncConfig::default(), NetworkConditions::POOR, 0, 7);
    let step = harness.session.config().fixed_step;
    assert!(run_until_ready(&mut harness, 600), "handshake failed");

    // Ten seconds of zig-zag: direction changes every 45 frames.
    let legs = [
        MoveInput::new(false, false, false, true),
        MoveInput::new(true, false, false, true),
        MoveInput::new(true, false, false, false),
        MoveInput::new(false, true, true, false),
    ];
    for i in 0..600 {
        harness.step_frame(step, legs[(i / 45) % legs.len()]);
    }
    // Two seconds of cooldown so everything in flight settles.
    for _ in 0..120 {
        harness.step_frame(step, MoveInput::NEUTRAL);
    }

    let stats = harness.session.stats();
    println!("corrections: {}", stats.corrections);
    assert!(stats.corrections > 0, "server never corrected us");
    assert_eq!(stats.soft_snaps, 0, "honest prediction soft-snapped");
    assert_eq!(stats.hard_snaps, 0, "honest prediction hard-snapped");
    assert_eq!(harness.server.refused_moves, 0);

    let server = harness.server.client_state().expect("client never joined");
    let divergence = harness
        .session
        .render_local()
        .0
        .distance(&server.position);
    println!("final divergence: {divergence}");
    assert!(divergence < 0.5, "client drifted from authority: {divergence}");
}

/// Test: remote entities render smoothly on a poor network; hiccups beyond
/// a couple of tick-lengths of travel stay rare.
#[test]
fn test_remote_entities_render_smoothly_on_poor_network() {
    let mut harness = SimHarness::new(SyncConfig::default(), NetworkConditions::POOR, 2, 9);
    let step = harness.session.config().fixed_step;
    assert!(run_until_ready(&mut harness, 600), "handshake failed");

    let mut remote_ids: Vec<EntityId> = Vec::new();
    let mut last_positions: Vec<(EntityId, Vec2)> = Vec::new();
    let mut total_travel = 0.0f32;
    let mut frames_sampled = 0u32;
    let mut rough_frames = 0u32;

    // Twelve seconds of watching the bots wander.
    for _ in 0..720 {
        harness.step_frame(step, MoveInput::NEUTRAL);
        while let Some(event) = harness.session.events().try_recv() {
            if let SessionEvent::RemoteJoined { entity } = event {
                if !remote_ids.contains(&entity) {
                    remote_ids.push(entity);
                }
            }
        }
        for id in &remote_ids {
            let Some((position, _)) = harness.session.render_state(*id) else {
                continue;
            };
            match last_positions.iter_mut().find(|(e, _)| e == id) {
                Some((_, last)) => {
                    let frame_step = position.distance(last);
                    total_travel += frame_step;
                    frames_sampled += 1;
                    if frame_step > 6.0 {
                        rough_frames += 1;
                    }
                    *last = position;
                }
                None => last_positions.push((*id, position)),
            }
        }
    }

    assert_eq!(remote_ids.len(), 2, "both bots should have appeared");
    assert!(total_travel > 200.0, "bots barely moved: {total_travel}");
    let rough_ratio = f64::from(rough_frames) / f64::from(frames_sampled.max(1));
    println!("travel {total_travel:.0}, rough frames {rough_frames}/{frames_sampled}");
    assert!(
        rough_ratio < 0.05,
        "remote motion too jumpy: {rough_frames}/{frames_sampled}"
    );
}

/// Test: a transport outage mid-walk buffers movement, the session resumes
/// on its own dial, the queue flushes, and the avatar reconverges.
#[test]
fn test_outage_buffers_commands_and_session_reconverges() {
    let mut harness = SimHarness::new(SyncConfig::default(), NetworkConditions::AVERAGE, 0, 11);
    let step = harness.session.config().fixed_step;
    assert!(run_until_ready(&mut harness, 600), "handshake failed");

    let right = MoveInput::new(false, false, false, true);
    for _ in 0..120 {
        harness.step_frame(step, right);
    }
    let corrections_before = harness.session.stats().corrections;
    let acked_before = harness.server.last_acked();

    // One second of darkness; the walk continues offline.
    harness.drop_transport(1.0);
    for _ in 0..120 {
        harness.step_frame(step, right);
    }
    assert!(run_until_ready(&mut harness, 1200), "session never resumed");

    for _ in 0..60 {
        harness.step_frame(step, right);
    }
    for _ in 0..120 {
        harness.step_frame(step, MoveInput::NEUTRAL);
    }

    let stats = harness.session.stats();
    println!(
        "resume: corrections {}, soft {}, hard {}, refused {}",
        stats.corrections, stats.soft_snaps, stats.hard_snaps, harness.server.refused_moves
    );
    assert!(
        harness.server.last_acked() > acked_before,
        "buffered moves never reached the server"
    );
    assert!(
        stats.corrections > corrections_before,
        "corrections never resumed after the outage"
    );

    let server = harness.server.client_state().expect("client lost");
    let divergence = harness
        .session
        .render_local()
        .0
        .distance(&server.position);
    assert!(divergence < 0.5, "never reconverged: {divergence}");
}

/// Test: the same seed replays the same run, bit for bit.
#[test]
fn test_same_seed_replays_identically() {
    let run = || {
        let mut harness =
            SimHarness::new(SyncConfig::default(), NetworkConditions::POOR, 1, 1234);
        let step = harness.session.config().fixed_step;
        assert!(run_until_ready(&mut harness, 600));
        let legs = [
            MoveInput::new(false, false, false, true),
            MoveInput::new(true, false, false, false),
        ];
        for i in 0..300 {
            harness.step_frame(step, legs[(i / 60) % legs.len()]);
        }
        let stats = harness.session.stats();
        (
            harness.session.render_local(),
            stats.moves_sent,
            stats.corrections,
            harness.server.last_acked(),
        )
    };

    let first = run();
    let second = run();
    assert_eq!(first.0, second.0, "positions diverged between replays");
    assert_eq!(first.1, second.1);
    assert_eq!(first.2, second.2);
    assert_eq!(first.3, second.3);
}
