//! Payload builders for the two state publications.
//!
//! The roster is pushed only when membership changes and carries identity and
//! profile data. Snapshots go out on their own timer and carry only what moves:
//! rounded positions and the derived team.

use crate::session::{Player, SessionRegistry};
use shared::{Packet, RosterEntry, SnapshotEntry};

pub fn roster_entry(player: &Player) -> RosterEntry {
    RosterEntry {
        connection_id: player.connection_id,
        sequence_number: player.sequence_number,
        name: player.display_name.clone(),
        photo: player.avatar.clone(),
    }
}

pub fn snapshot_entry(player: &Player) -> SnapshotEntry {
    SnapshotEntry {
        connection_id: player.connection_id,
        sequence_number: player.sequence_number,
        name: player.display_name.clone(),
        x: round_coordinate(player.position.x),
        y: round_coordinate(player.position.y),
        team: player.team,
        photo: None,
    }
}

pub fn roster_packet(registry: &SessionRegistry) -> Packet {
    Packet::Roster {
        players: registry.players().map(roster_entry).collect(),
    }
}

pub fn snapshot_packet(registry: &SessionRegistry, tick: u64) -> Packet {
    Packet::Snapshot {
        tick,
        players: registry.players().map(snapshot_entry).collect(),
    }
}

pub fn round_coordinate(value: f32) -> i32 {
    value.round() as i32
}
