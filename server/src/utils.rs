use crate::config::ArenaConfig;
use crate::physics::{clamp_to_arena, Vector2};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const SPAWN_COLUMNS: u64 = 10;
const SPAWN_ROWS: u64 = 7;
const SPAWN_COLUMN_WIDTH: f32 = 110.0;
const SPAWN_ROW_HEIGHT: f32 = 80.0;
const SPAWN_OFFSET: Vector2 = Vector2::new(130.0, 150.0);

// Get current timestamp in milliseconds
pub fn get_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}

// FNV-1a, stable across runs and platforms
pub fn stable_hash(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

/// Spawn point for a durable id: a cell on a 10x7 grid picked by hashing the id,
/// so the same player always reappears in the same place.
pub fn spawn_position(durable_id: &str, arena: &ArenaConfig) -> Vector2 {
    let hash = stable_hash(durable_id.as_bytes());
    let column = (hash % SPAWN_COLUMNS) as f32;
    let row = ((hash / SPAWN_COLUMNS) % SPAWN_ROWS) as f32;

    let position = Vector2::new(
        arena.margin + SPAWN_OFFSET.x + column * SPAWN_COLUMN_WIDTH,
        arena.margin + SPAWN_OFFSET.y + row * SPAWN_ROW_HEIGHT,
    );
    clamp_to_arena(position, arena)
}

// Truncate on character boundaries, not bytes
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
