use crate::broadcast::{roster_packet, snapshot_packet};
use crate::config::ServerConfig;
use crate::intent::ActionKind;
use crate::physics::{clamp_to_arena, resolve_collisions, Body};
use crate::session::{BindOutcome, Eviction, Profile, SessionRegistry};
use crate::team::team_for;
use crate::utils::{get_timestamp, spawn_position};
use log::{debug, warn};
use shared::{ConnectionId, Packet, PROTOCOL_VERSION};

/// A message produced by the game, in the order it must be sent.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    SendPacket {
        connection_id: ConnectionId,
        packet: Packet,
    },
    BroadcastPacket {
        packet: Packet,
    },
}

/// Everything one serialized step asks the outside world to do.
#[derive(Debug, Default, PartialEq)]
pub struct Effects {
    pub outbound: Vec<Outbound>,
    /// Grace timers to start.
    pub schedule: Vec<Eviction>,
    /// Grace timers that no longer matter and may be aborted.
    pub cancel: Vec<Eviction>,
}

impl Effects {
    fn send(&mut self, connection_id: ConnectionId, packet: Packet) {
        self.outbound.push(Outbound::SendPacket {
            connection_id,
            packet,
        });
    }

    fn broadcast(&mut self, packet: Packet) {
        self.outbound.push(Outbound::BroadcastPacket { packet });
    }

    pub fn is_empty(&self) -> bool {
        self.outbound.is_empty() && self.schedule.is_empty() && self.cancel.is_empty()
    }
}

/// Authoritative arena state. Every mutation goes through `&mut self`, so whoever
/// owns the `GameState` is the single writer.
pub struct GameState {
    pub tick: u64,
    registry: SessionRegistry,
    config: ServerConfig,
}

impl GameState {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            tick: 0,
            registry: SessionRegistry::new(config.clone()),
            config,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut SessionRegistry {
        &mut self.registry
    }

    /// Dispatches one inbound packet from `connection_id`.
    pub fn handle_packet(&mut self, connection_id: ConnectionId, packet: Packet) -> Effects {
        match packet {
            Packet::Connect { client_version } => {
                if client_version != PROTOCOL_VERSION {
                    warn!(
                        "Connection {} speaks protocol {} (server {})",
                        connection_id, client_version, PROTOCOL_VERSION
                    );
                }
                let mut effects = Effects::default();
                effects.send(connection_id, Packet::Connected { connection_id });
                effects
            }
            Packet::Join {
                durable_id,
                name,
                photo,
            } => self.join(connection_id, &durable_id, Profile { name, photo }),
            Packet::Resume { durable_id } => self.resume(connection_id, &durable_id),
            Packet::Input { dx, dy, action } => self.apply_input(connection_id, dx, dy, action),
            Packet::SetAvatar { photo } => self.set_avatar(connection_id, photo),
            Packet::RttProbe { client_time } => {
                let mut effects = Effects::default();
                effects.send(
                    connection_id,
                    Packet::RttEcho {
                        client_time,
                        server_time: get_timestamp(),
                    },
                );
                effects
            }
            other => {
                warn!(
                    "Unexpected {} packet from connection {}",
                    other.kind(),
                    connection_id
                );
                Effects::default()
            }
        }
    }

    pub fn join(
        &mut self,
        connection_id: ConnectionId,
        durable_id: &str,
        profile: Profile,
    ) -> Effects {
        match self.registry.join(connection_id, durable_id, profile) {
            Ok(outcome) => self.bound(outcome),
            Err(e) => {
                debug!("Ignoring join from connection {}: {}", connection_id, e);
                Effects::default()
            }
        }
    }

    pub fn resume(&mut self, connection_id: ConnectionId, durable_id: &str) -> Effects {
        match self.registry.resume(connection_id, durable_id) {
            Ok(outcome) => self.bound(outcome),
            Err(e) => {
                debug!("Resume from connection {} failed: {}", connection_id, e);
                let mut effects = Effects::default();
                effects.send(
                    connection_id,
                    Packet::ResumeRejected {
                        durable_id: durable_id.to_string(),
                    },
                );
                effects
            }
        }
    }

    /// Applies stick input and forwards any action button straight to viewers.
    pub fn apply_input(
        &mut self,
        connection_id: ConnectionId,
        dx: Option<f64>,
        dy: Option<f64>,
        action: Option<u8>,
    ) -> Effects {
        let mut effects = Effects::default();

        if let Err(e) = self.registry.apply_input(connection_id, dx, dy) {
            debug!("Dropping input: {}", e);
            return effects;
        }

        if let Some(code) = action {
            match ActionKind::try_from(code) {
                Ok(kind) => effects.broadcast(Packet::Action {
                    actor_connection_id: connection_id,
                    action: kind.code(),
                }),
                Err(code) => debug!(
                    "Ignoring unknown action {} from connection {}",
                    code, connection_id
                ),
            }
        }

        effects
    }

    pub fn set_avatar(&mut self, connection_id: ConnectionId, photo: String) -> Effects {
        let mut effects = Effects::default();

        match self.registry.set_avatar(connection_id, photo) {
            Ok(player) => effects.broadcast(Packet::Avatar {
                connection_id: player.connection_id,
                sequence_number: player.sequence_number,
                photo: player.avatar.clone(),
            }),
            Err(e) => debug!("Dropping avatar update: {}", e),
        }

        effects
    }

    /// Handles a closed transport connection.
    pub fn disconnect(&mut self, connection_id: ConnectionId) -> Effects {
        let mut effects = Effects::default();

        match self.registry.disconnect(connection_id) {
            Ok(eviction) => self.start_grace(eviction, &mut effects),
            Err(e) => debug!("Ignoring disconnect: {}", e),
        }

        effects
    }

    /// Handles a grace timer running out.
    pub fn expire(&mut self, eviction: &Eviction) -> Effects {
        let mut effects = Effects::default();

        if self.registry.expire(eviction).is_some() {
            effects.broadcast(roster_packet(&self.registry));
        } else {
            debug!(
                "Grace timer for {:?} fired after a rebind",
                eviction.durable_id
            );
        }

        effects
    }

    /// Advances the simulation by one fixed tick.
    ///
    /// Integrates intents, clamps to the arena, resolves collisions in ascending
    /// sequence order, then recomputes teams and reports every team change.
    pub fn step(&mut self) -> Effects {
        let mut effects = Effects::default();
        let arena = self.config.arena;
        let speed = self.config.speed_per_tick();

        for player in self.registry.players_mut() {
            let previous = player.position;
            let moved = previous.add(&player.intent.as_vector().scale(speed));
            let clamped = clamp_to_arena(moved, &arena);

            if clamped.is_finite() {
                player.position = clamped;
            } else {
                warn!(
                    "Player #{} produced a non-finite position, restoring",
                    player.sequence_number
                );
                player.position = if previous.is_finite() {
                    clamp_to_arena(previous, &arena)
                } else {
                    spawn_position(&player.durable_id, &arena)
                };
            }
        }

        let mut bodies: Vec<Body> = self
            .registry
            .players()
            .map(|player| Body {
                position: player.position,
                intent: player.intent.as_vector(),
            })
            .collect();
        resolve_collisions(&mut bodies, &arena, self.config.bounce);

        for (player, body) in self.registry.players_mut().zip(bodies) {
            if body.position.is_finite() {
                player.position = body.position;
            }

            let team = team_for(player.position.x, &arena);
            if player.team != Some(team) {
                player.team = Some(team);
                effects.broadcast(Packet::TeamChange {
                    connection_id: player.connection_id,
                    sequence_number: player.sequence_number,
                    team,
                });
            }
        }

        self.tick += 1;
        effects
    }

    pub fn snapshot(&self) -> Packet {
        snapshot_packet(&self.registry, self.tick)
    }

    pub fn roster(&self) -> Packet {
        roster_packet(&self.registry)
    }

    fn bound(&mut self, outcome: BindOutcome) -> Effects {
        let mut effects = Effects::default();

        if let Some(previous) = outcome.superseded {
            debug!(
                "Connection {} superseded by {} for player #{}",
                previous, outcome.connection_id, outcome.sequence_number
            );
        }
        if let Some(cancelled) = outcome.cancelled {
            effects.cancel.push(cancelled);
        }

        effects.send(
            outcome.connection_id,
            Packet::Joined {
                connection_id: outcome.connection_id,
                sequence_number: outcome.sequence_number,
            },
        );

        match outcome.released {
            // Immediate eviction already broadcasts the roster
            Some(released) if self.config.grace_period.is_zero() => {
                self.start_grace(released, &mut effects)
            }
            Some(released) => {
                effects.schedule.push(released);
                effects.broadcast(roster_packet(&self.registry));
            }
            None => effects.broadcast(roster_packet(&self.registry)),
        }

        effects
    }

    fn start_grace(&mut self, eviction: Eviction, effects: &mut Effects) {
        if self.config.grace_period.is_zero() {
            if self.registry.expire(&eviction).is_some() {
                effects.broadcast(roster_packet(&self.registry));
            }
        } else {
            effects.schedule.push(eviction);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ArenaConfig;
    use crate::intent::Intent;
    use crate::physics::{in_bounds, Vector2};
    use assert_approx_eq::assert_approx_eq;
    use shared::Team;
    use std::time::Duration;

    fn game() -> GameState {
        GameState::new(ServerConfig::default())
    }

    fn join(game: &mut GameState, connection_id: ConnectionId, durable_id: &str) -> Effects {
        game.handle_packet(
            connection_id,
            Packet::Join {
                durable_id: durable_id.to_string(),
                name: Some(durable_id.to_uppercase()),
                photo: None,
            },
        )
    }

    fn place(game: &mut GameState, durable_id: &str, x: f32, y: f32) {
        let player = game
            .registry_mut()
            .players_mut()
            .find(|p| p.durable_id == durable_id)
            .unwrap();
        player.position = Vector2::new(x, y);
    }

    fn position(game: &GameState, durable_id: &str) -> Vector2 {
        game.registry().get(durable_id).unwrap().position
    }

    fn broadcasts(effects: &Effects) -> Vec<&Packet> {
        effects
            .outbound
            .iter()
            .filter_map(|o| match o {
                Outbound::BroadcastPacket { packet } => Some(packet),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_join_acks_then_broadcasts_roster() {
        let mut game = game();

        let effects = join(&mut game, 5, "p1");

        assert_eq!(
            effects.outbound[0],
            Outbound::SendPacket {
                connection_id: 5,
                packet: Packet::Joined {
                    connection_id: 5,
                    sequence_number: 1
                }
            }
        );
        assert!(matches!(
            effects.outbound[1],
            Outbound::BroadcastPacket {
                packet: Packet::Roster { .. }
            }
        ));
        assert!(effects.schedule.is_empty());
    }

    #[test]
    fn test_join_with_empty_id_is_silent() {
        let mut game = game();
        let effects = join(&mut game, 5, "");
        assert!(effects.is_empty());
        assert_eq!(game.registry().len(), 0);
    }

    #[test]
    fn test_connect_replies_with_connection_id() {
        let mut game = game();
        let effects = game.handle_packet(9, Packet::Connect { client_version: 1 });
        assert_eq!(
            effects.outbound,
            vec![Outbound::SendPacket {
                connection_id: 9,
                packet: Packet::Connected { connection_id: 9 }
            }]
        );
    }

    #[test]
    fn test_unknown_resume_rejected_to_caller_only() {
        let mut game = game();

        let effects = game.handle_packet(
            3,
            Packet::Resume {
                durable_id: "ghost".to_string(),
            },
        );

        assert_eq!(
            effects.outbound,
            vec![Outbound::SendPacket {
                connection_id: 3,
                packet: Packet::ResumeRejected {
                    durable_id: "ghost".to_string()
                }
            }]
        );
    }

    #[test]
    fn test_disconnect_schedules_grace_then_resume_cancels() {
        let mut game = game();
        join(&mut game, 1, "p1");

        let effects = game.disconnect(1);
        assert_eq!(effects.schedule.len(), 1);
        assert!(effects.outbound.is_empty());
        let eviction = effects.schedule[0].clone();

        let effects = game.resume(2, "p1");
        assert_eq!(effects.cancel, vec![eviction.clone()]);

        // Late expiry is ignored
        assert!(game.expire(&eviction).outbound.is_empty());
        assert!(game.registry().get("p1").is_some());
    }

    #[test]
    fn test_expiry_broadcasts_roster() {
        let mut game = game();
        join(&mut game, 1, "p1");
        let eviction = game.disconnect(1).schedule.remove(0);

        let effects = game.expire(&eviction);

        match broadcasts(&effects).as_slice() {
            [Packet::Roster { players }] => assert!(players.is_empty()),
            other => panic!("unexpected broadcasts {:?}", other),
        }
    }

    #[test]
    fn test_zero_grace_evicts_on_disconnect() {
        let mut game = GameState::new(ServerConfig {
            grace_period: Duration::ZERO,
            ..ServerConfig::default()
        });
        join(&mut game, 1, "p1");

        let effects = game.disconnect(1);

        assert!(effects.schedule.is_empty());
        assert_eq!(broadcasts(&effects).len(), 1);
        assert!(game.registry().get("p1").is_none());
    }

    #[test]
    fn test_action_forwarded_immediately() {
        let mut game = game();
        join(&mut game, 4, "p1");

        let effects = game.handle_packet(
            4,
            Packet::Input {
                dx: None,
                dy: None,
                action: Some(2),
            },
        );

        assert_eq!(
            broadcasts(&effects),
            vec![&Packet::Action {
                actor_connection_id: 4,
                action: 2
            }]
        );
    }

    #[test]
    fn test_unknown_action_and_stale_connection_ignored() {
        let mut game = game();
        join(&mut game, 4, "p1");

        let effects = game.apply_input(4, Some(0.5), None, Some(7));
        assert!(effects.outbound.is_empty());
        assert_eq!(game.registry().get("p1").unwrap().intent.dx, 0.5);

        let effects = game.apply_input(99, Some(1.0), None, Some(1));
        assert!(effects.outbound.is_empty());
    }

    #[test]
    fn test_set_avatar_broadcasts_replacement() {
        let mut game = game();
        join(&mut game, 4, "p1");

        let effects = game.handle_packet(
            4,
            Packet::SetAvatar {
                photo: "data:image/png;base64,AAAA".to_string(),
            },
        );

        assert_eq!(
            broadcasts(&effects),
            vec![&Packet::Avatar {
                connection_id: Some(4),
                sequence_number: 1,
                photo: Some("data:image/png;base64,AAAA".to_string())
            }]
        );
    }

    #[test]
    fn test_rtt_probe_echoes_client_time() {
        let mut game = game();
        let effects = game.handle_packet(2, Packet::RttProbe { client_time: 1234 });

        match &effects.outbound[..] {
            [Outbound::SendPacket {
                connection_id: 2,
                packet:
                    Packet::RttEcho {
                        client_time,
                        server_time,
                    },
            }] => {
                assert_eq!(*client_time, 1234);
                assert!(*server_time > 0);
            }
            other => panic!("unexpected outbound {:?}", other),
        }
    }

    #[test]
    fn test_server_packets_from_clients_ignored() {
        let mut game = game();
        let effects = game.handle_packet(1, Packet::Snapshot {
            tick: 0,
            players: vec![],
        });
        assert!(effects.is_empty());
    }

    #[test]
    fn test_step_moves_by_speed_per_tick() {
        let mut game = game();
        join(&mut game, 1, "p1");
        place(&mut game, "p1", 300.0, 300.0);
        game.apply_input(1, Some(1.0), Some(-0.5), None);

        game.step();

        let p = position(&game, "p1");
        assert_approx_eq!(p.x, 303.52, 1e-3);
        assert_approx_eq!(p.y, 298.24, 1e-3);
        assert_eq!(game.tick, 1);
    }

    #[test]
    fn test_first_step_assigns_team_and_reports_it() {
        let mut game = game();
        join(&mut game, 1, "p1");
        place(&mut game, "p1", 300.0, 300.0);

        let effects = game.step();
        assert_eq!(
            broadcasts(&effects),
            vec![&Packet::TeamChange {
                connection_id: Some(1),
                sequence_number: 1,
                team: Team::A
            }]
        );

        // No change, no notification
        assert!(game.step().outbound.is_empty());
    }

    #[test]
    fn test_crossing_midline_flips_team() {
        let mut game = game();
        join(&mut game, 1, "p1");
        place(&mut game, "p1", 638.0, 300.0);
        game.step();
        assert_eq!(game.registry().get("p1").unwrap().team, Some(Team::A));

        game.apply_input(1, Some(1.0), Some(0.0), None);
        let effects = game.step();

        assert_eq!(game.registry().get("p1").unwrap().team, Some(Team::B));
        assert_eq!(broadcasts(&effects).len(), 1);
    }

    #[test]
    fn test_wall_settles_exactly_at_bound() {
        let mut game = game();
        join(&mut game, 1, "p1");
        game.apply_input(1, Some(-1.0), Some(1.0), None);

        for _ in 0..1000 {
            game.step();
        }

        let arena = ArenaConfig::default();
        let p = position(&game, "p1");
        assert_eq!(p.x, arena.min_x());
        assert_eq!(p.y, arena.max_y());
    }

    #[test]
    fn test_step_separates_spawned_pair() {
        let mut game = game();
        join(&mut game, 1, "a");
        join(&mut game, 2, "b");
        place(&mut game, "a", 300.0, 180.0);
        place(&mut game, "b", 390.0, 180.0);

        game.step();

        let a = position(&game, "a");
        let b = position(&game, "b");
        assert_approx_eq!(a.x, 297.0, 1e-3);
        assert_approx_eq!(b.x, 393.0, 1e-3);
        assert!(a.distance(&b) >= 96.0 - 1e-3);
    }

    #[test]
    fn test_grace_pending_players_keep_state_through_ticks() {
        let mut game = game();
        join(&mut game, 1, "p1");
        place(&mut game, "p1", 900.0, 400.0);
        game.apply_input(1, Some(1.0), Some(0.0), None);
        game.step();
        let before = position(&game, "p1");

        game.disconnect(1);
        for _ in 0..10 {
            game.step();
        }

        let player = game.registry().get("p1").unwrap();
        assert_eq!(player.position, before);
        assert_eq!(player.team, Some(Team::B));
    }

    #[test]
    fn test_non_finite_position_restored() {
        let mut game = game();
        join(&mut game, 1, "p1");
        place(&mut game, "p1", f32::NAN, 300.0);

        game.step();

        let p = position(&game, "p1");
        assert!(p.is_finite());
        assert!(in_bounds(&p, &game.config().arena));
    }

    #[test]
    fn test_out_of_range_json_input_clamps_to_unit() {
        let mut game = game();
        join(&mut game, 1, "p1");

        let packet = shared::decode_text(r#"{"input":{"dx":1e39,"dy":-5e38}}"#).unwrap();
        game.handle_packet(1, packet);

        let intent = game.registry().get("p1").unwrap().intent;
        assert_eq!(intent, Intent { dx: 1.0, dy: -1.0 });
    }

    #[test]
    fn test_invariants_hold_after_crowded_ticks() {
        let mut game = game();
        for i in 0..12u64 {
            join(&mut game, i + 1, &format!("player-{}", i));
            let dx = if i % 2 == 0 { 1.0 } else { -1.0 };
            game.apply_input(i + 1, Some(dx), Some(0.3), None);
        }

        for _ in 0..200 {
            game.step();
            let arena = game.config().arena;
            for player in game.registry().players() {
                assert!(in_bounds(&player.position, &arena));
                assert_eq!(player.team, Some(team_for(player.position.x, &arena)));
            }
        }
    }
}
