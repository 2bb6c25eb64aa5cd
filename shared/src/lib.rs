//! Wire protocol shared between the arena server, controller clients and host displays.
//!
//! Every message that crosses a connection is a [`Packet`]. Packets travel either as
//! JSON text frames (browser clients) or as bincode binary frames (native clients);
//! see [`codec`].

use serde::{Deserialize, Serialize};

pub mod codec;

pub use codec::{decode_binary, decode_text, encode, CodecError, Frame, WireFormat};

pub const PROTOCOL_VERSION: u32 = 1;

pub const ARENA_WIDTH: f32 = 1280.0;
pub const ARENA_HEIGHT: f32 = 720.0;
pub const ARENA_MARGIN: f32 = 10.0;
pub const PLAYER_RADIUS: f32 = 48.0;
/// Pixels per second at full tilt.
pub const PLAYER_SPEED: f32 = 220.0;
pub const MAX_NAME_CHARS: usize = 16;
pub const DEFAULT_NAME: &str = "anon";

/// Transport-assigned identifier, valid for one connection's lifetime.
pub type ConnectionId = u64;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Team {
    A,
    B,
}

/// Membership record sent on roster changes. Carries no positional state.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    /// `None` while the player is disconnected and inside the grace window.
    pub connection_id: Option<ConnectionId>,
    pub sequence_number: u32,
    pub name: String,
    pub photo: Option<String>,
}

/// Per-player world state sent on every snapshot.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotEntry {
    pub connection_id: Option<ConnectionId>,
    pub sequence_number: u32,
    pub name: String,
    pub x: i32,
    pub y: i32,
    /// Unset only for players created after the most recent tick.
    pub team: Option<Team>,
    /// Always sent as null by the server. Avatars travel with the roster and
    /// `avatar` events, not at snapshot rate.
    pub photo: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum Packet {
    // Client -> server
    Connect {
        client_version: u32,
    },
    Join {
        durable_id: String,
        name: Option<String>,
        photo: Option<String>,
    },
    Resume {
        durable_id: String,
    },
    Input {
        dx: Option<f64>,
        dy: Option<f64>,
        action: Option<u8>,
    },
    SetAvatar {
        photo: String,
    },
    RttProbe {
        client_time: u64,
    },

    // Server -> client
    Connected {
        connection_id: ConnectionId,
    },
    Joined {
        connection_id: ConnectionId,
        sequence_number: u32,
    },
    ResumeRejected {
        durable_id: String,
    },
    Roster {
        players: Vec<RosterEntry>,
    },
    Snapshot {
        tick: u64,
        players: Vec<SnapshotEntry>,
    },
    Action {
        actor_connection_id: ConnectionId,
        action: u8,
    },
    TeamChange {
        connection_id: Option<ConnectionId>,
        sequence_number: u32,
        team: Team,
    },
    Avatar {
        connection_id: Option<ConnectionId>,
        sequence_number: u32,
        photo: Option<String>,
    },
    RttEcho {
        client_time: u64,
        server_time: u64,
    },
    Disconnected {
        reason: String,
    },
}

impl Packet {
    /// Short name used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Packet::Connect { .. } => "connect",
            Packet::Join { .. } => "join",
            Packet::Resume { .. } => "resume",
            Packet::Input { .. } => "input",
            Packet::SetAvatar { .. } => "set-avatar",
            Packet::RttProbe { .. } => "rtt-probe",
            Packet::Connected { .. } => "connected",
            Packet::Joined { .. } => "joined",
            Packet::ResumeRejected { .. } => "resume-rejected",
            Packet::Roster { .. } => "roster",
            Packet::Snapshot { .. } => "snapshot",
            Packet::Action { .. } => "action",
            Packet::TeamChange { .. } => "team-change",
            Packet::Avatar { .. } => "avatar",
            Packet::RttEcho { .. } => "rtt-echo",
            Packet::Disconnected { .. } => "disconnected",
        }
    }
}
