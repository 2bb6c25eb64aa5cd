//! Performance benchmarks for critical server systems

use server::config::{ArenaConfig, ServerConfig};
use server::game::GameState;
use server::physics::{resolve_collisions, Body, Vector2};
use shared::{encode, Frame, Packet, WireFormat};
use std::time::Instant;

fn frame_size(frame: Frame) -> usize {
    match frame {
        Frame::Text(text) => text.len(),
        Frame::Binary(bytes) => bytes.len(),
    }
}

fn crowded_game(players: u64) -> GameState {
    let mut game = GameState::new(ServerConfig::default());
    for i in 0..players {
        game.handle_packet(
            i + 1,
            Packet::Join {
                durable_id: format!("player-{}", i),
                name: Some(format!("P{}", i)),
                photo: None,
            },
        );
        let angle = i as f64 * 0.37;
        game.handle_packet(
            i + 1,
            Packet::Input {
                dx: Some(angle.cos()),
                dy: Some(angle.sin()),
                action: None,
            },
        );
    }
    game
}

/// Benchmarks a full simulation tick with a packed lobby
#[test]
fn benchmark_tick_with_full_lobby() {
    let mut game = crowded_game(64);

    let iterations = 1_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let _ = game.step();
    }

    let duration = start.elapsed();
    println!(
        "Simulation tick (64 players): {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    // A tick must fit comfortably inside the 16ms budget
    assert!(duration.as_millis() < 2_000);
}

/// Benchmarks the pairwise collision pass on a tight cluster
#[test]
fn benchmark_collision_resolution() {
    let arena = ArenaConfig::default();
    let iterations = 1_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let mut bodies: Vec<Body> = (0..32)
            .map(|i| Body {
                position: Vector2::new(600.0 + (i % 8) as f32 * 20.0, 300.0 + (i / 8) as f32 * 20.0),
                intent: Vector2::new(1.0, 0.0),
            })
            .collect();
        resolve_collisions(&mut bodies, &arena, 0.12);
    }

    let duration = start.elapsed();
    println!(
        "Collision resolution (32 bodies): {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 2_000);
}

/// Benchmarks snapshot encoding in both wire formats
#[test]
fn benchmark_snapshot_encoding() {
    let mut game = crowded_game(64);
    game.step();
    let snapshot = game.snapshot();

    let iterations = 10_000;

    let start = Instant::now();
    let mut json_bytes = 0;
    for _ in 0..iterations {
        json_bytes = frame_size(encode(&snapshot, WireFormat::Json).unwrap());
    }
    let json_duration = start.elapsed();

    let start = Instant::now();
    let mut binary_bytes = 0;
    for _ in 0..iterations {
        binary_bytes = frame_size(encode(&snapshot, WireFormat::Binary).unwrap());
    }
    let binary_duration = start.elapsed();

    println!(
        "Snapshot encoding: JSON {} bytes in {:?}, binary {} bytes in {:?} ({} iterations)",
        json_bytes, json_duration, binary_bytes, binary_duration, iterations
    );

    assert!(binary_bytes < json_bytes);
    assert!(json_duration.as_millis() < 5_000);
    assert!(binary_duration.as_millis() < 5_000);
}

/// Stress test for join churn: many identities joining, dropping and resuming
#[test]
fn stress_test_session_churn() {
    let mut game = GameState::new(ServerConfig::default());
    let start = Instant::now();
    let mut next_connection = 1u64;

    for round in 0..50 {
        for i in 0..20 {
            let durable_id = format!("churn-{}", i);
            let packet = if round == 0 {
                Packet::Join {
                    durable_id,
                    name: None,
                    photo: None,
                }
            } else {
                Packet::Resume { durable_id }
            };
            game.handle_packet(next_connection, packet);
            next_connection += 1;
        }
        game.step();
        for connection_id in next_connection - 20..next_connection {
            game.disconnect(connection_id);
        }
    }

    let duration = start.elapsed();
    println!("Session churn: 1000 rebinds in {:?}", duration);

    // Sequence numbers are stable across every resume
    let sequences: Vec<u32> = game
        .registry()
        .players()
        .map(|player| player.sequence_number)
        .collect();
    assert_eq!(sequences, (1..=20).collect::<Vec<u32>>());
    assert!(duration.as_millis() < 2_000);
}
