use crate::config::ArenaConfig;
use shared::Team;

/// Team for a given horizontal position: left of the midline is A, everything else B.
///
/// There is no hysteresis band, so a player straddling the midline changes team on
/// every tick it crosses.
pub fn team_for(x: f32, arena: &ArenaConfig) -> Team {
    if x < arena.midline() {
        Team::A
    } else {
        Team::B
    }
}
