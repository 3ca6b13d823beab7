//! # Walk Simulation
//!
//! Runs a scripted zig-zag walk through the full loopback harness on three
//! network presets and prints what the engine did about it: correction
//! tiers, refused moves, remote render smoothness, final divergence.
//!
//! The script is hostile on purpose: a mid-run teleport at t=10s and a
//! two-second transport outage at t=15s, with movement continuing offline
//! so the gate's queue has something to prove.

use std::collections::HashMap;

use talaria_core::{MoveInput, Vec2};
use talaria_sync::simulation::{NetworkConditions, SimHarness};
use talaria_sync::{ConnectionState, EntityId, ReconcileResult, SessionEvent, SyncConfig};

const SEED: u64 = 0xA11CE;
const BOT_COUNT: usize = 3;
const RUN_SECONDS: f64 = 30.0;
const COOLDOWN_SECONDS: f64 = 3.0;
const TELEPORT_AT: f64 = 10.0;
const OUTAGE_AT: f64 = 15.0;
const OUTAGE_SECONDS: f64 = 2.0;
const TELEPORT_TARGET: Vec2 = Vec2::new(-400.0, 250.0);

fn main() {
    println!("=== TALARIA WALK SIMULATION ===");
    println!("Scripted zig-zag walk: teleport at t={TELEPORT_AT}s, {OUTAGE_SECONDS}s outage at t={OUTAGE_AT}s.");

    for (name, conditions) in [
        ("perfect", NetworkConditions::PERFECT),
        ("average", NetworkConditions::AVERAGE),
        ("poor", NetworkConditions::POOR),
    ] {
        println!();
        run_scenario(name, conditions);
    }
}

/// Eight-beat movement loop: legs in several directions with idle beats so
/// movement bursts (and their correction grace windows) keep re-arming.
fn scripted_input(t: f64) -> MoveInput {
    match (t / 0.75) as u64 % 8 {
        0 => MoveInput::new(false, false, false, true),
        1 => MoveInput::NEUTRAL,
        2 => MoveInput::new(true, false, false, true),
        3 => MoveInput::new(true, false, false, false),
        4 => MoveInput::NEUTRAL,
        5 => MoveInput::new(false, true, true, false),
        6 => MoveInput::new(false, false, true, false),
        _ => MoveInput::new(false, true, false, false),
    }
}

fn run_scenario(name: &str, conditions: NetworkConditions) {
    let config = SyncConfig::default();
    let step = config.fixed_step;
    let mut harness = SimHarness::new(config, conditions, BOT_COUNT, SEED);

    harness.session.connect();
    let mut frames_waited = 0u32;
    while !harness.session.is_ready() && frames_waited < 600 {
        harness.step_frame(step, MoveInput::NEUTRAL);
        frames_waited += 1;
        if frames_waited % 120 == 0 {
            // Handshake lost somewhere along the way; ask again.
            harness.session.connect();
        }
    }
    if !harness.session.is_ready() {
        println!("=== {name}: handshake never completed ===");
        return;
    }

    let mut errors: Vec<f32> = Vec::new();
    let mut remote_ids: Vec<EntityId> = Vec::new();
    let mut remote_tracks: HashMap<EntityId, (Vec2, f32)> = HashMap::new();
    let mut teleported = false;
    let mut outage_done = false;
    let mut rejoin_asked_at: Option<f64> = None;

    let start = harness.now();
    let frames = (RUN_SECONDS / f64::from(step)) as u64;
    for _ in 0..frames {
        let t = harness.now() - start;
        let input = if t >= RUN_SECONDS - COOLDOWN_SECONDS {
            MoveInput::NEUTRAL
        } else {
            scripted_input(t)
        };
        harness.step_frame(step, input);

        if !teleported && t >= TELEPORT_AT {
            teleported = true;
            harness.session.teleport_local(TELEPORT_TARGET);
        }
        if !outage_done && t >= OUTAGE_AT {
            outage_done = true;
            harness.drop_transport(OUTAGE_SECONDS);
        }

        // Handshake retries are caller policy; play a patient client that
        // re-asks if the rejoin stalls for over a second.
        let now = harness.now();
        match harness.session.connection_state() {
            ConnectionState::ConnectedAwaitingReady => match rejoin_asked_at {
                None => rejoin_asked_at = Some(now),
                Some(asked) if now - asked > 1.0 => {
                    harness.session.connect();
                    rejoin_asked_at = Some(now);
                }
                Some(_) => {}
            },
            _ => rejoin_asked_at = None,
        }

        while let Some(event) = harness.session.events().try_recv() {
            match event {
                SessionEvent::CorrectionApplied { result } => match result {
                    ReconcileResult::VelocityOnly { error }
                    | ReconcileResult::SoftSnap { error }
                    | ReconcileResult::HardSnap { error } => errors.push(error),
                    _ => {}
                },
                SessionEvent::RemoteJoined { entity } => {
                    if !remote_ids.contains(&entity) {
                        remote_ids.push(entity);
                    }
                }
                _ => {}
            }
        }

        for id in &remote_ids {
            if let Some((position, _)) = harness.session.render_state(*id) {
                match remote_tracks.get_mut(id) {
                    Some((last, max_step)) => {
                        let frame_step = position.distance(last);
                        if frame_step > *max_step {
                            *max_step = frame_step;
                        }
                        *last = position;
                    }
                    None => {
                        remote_tracks.insert(*id, (position, 0.0));
                    }
                }
            }
        }
    }

    let stats = harness.session.stats();
    let (avg_error, max_error) = summarize(&errors);
    let final_divergence = harness.server.client_state().map_or(f32::NAN, |server| {
        harness.session.render_local().0.distance(&server.position)
    });
    let max_remote_step = remote_tracks
        .values()
        .map(|(_, max_step)| *max_step)
        .fold(0.0f32, f32::max);

    println!(
        "=== {name} ({} ms +/- {} ms, {}% loss) ===",
        conditions.base_latency_ms, conditions.jitter_ms, conditions.packet_loss_percent
    );
    println!("  Ticks: {}", stats.ticks);
    println!("  Moves sent: {}", stats.moves_sent);
    println!("  Corrections: {}", stats.corrections);
    println!("  Soft snaps: {}", stats.soft_snaps);
    println!("  Hard snaps: {}", stats.hard_snaps);
    println!("  Refused moves: {}", harness.server.refused_moves);
    println!("  Avg correction error: {avg_error:.4}");
    println!("  Max correction error: {max_error:.4}");
    println!("  Final divergence: {final_divergence:.4}");
    println!("  Remotes seen: {}", remote_ids.len());
    println!("  Max remote frame step: {max_remote_step:.2}");
}

fn summarize(errors: &[f32]) -> (f32, f32) {
    if errors.is_empty() {
        return (0.0, 0.0);
    }
    let sum: f32 = errors.iter().sum();
    let max = errors.iter().copied().fold(0.0f32, f32::max);
    (sum / errors.len() as f32, max)
}
