//! Player identity lifecycle.
//!
//! Players are keyed by a client-supplied durable id that survives reconnects. The
//! transport hands out a fresh connection id on every reconnect, so the registry keeps
//! a two-level lookup (connection id -> durable id -> player) and rewrites both sides
//! together whenever a connection is (re)bound.
//!
//! Per durable id the lifecycle is:
//!
//! ```text
//! Unknown --join--> Active --disconnect--> GracePending --join/resume--> Active
//!                                               |
//!                                               +--expire--> Evicted
//! ```
//!
//! Grace timers themselves live outside the registry. [`SessionRegistry::disconnect`]
//! mints an [`Eviction`] ticket; whoever owns the clock hands it back to
//! [`SessionRegistry::expire`] when the grace period runs out. A join or resume in
//! between clears the ticket on the player, which turns the late expiry into a no-op.

use crate::config::ServerConfig;
use crate::intent::Intent;
use crate::physics::Vector2;
use crate::utils::{spawn_position, truncate_chars};
use log::{info, warn};
use shared::{ConnectionId, Team, DEFAULT_NAME};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("durable id is empty")]
    EmptyIdentity,
    #[error("no player with durable id {0:?}")]
    UnknownIdentity(String),
    #[error("connection {0} is not bound to a player")]
    UnboundConnection(ConnectionId),
}

/// Profile fields as received from a join request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Profile {
    pub name: Option<String>,
    pub photo: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Player {
    pub durable_id: String,
    /// `None` while disconnected.
    pub connection_id: Option<ConnectionId>,
    /// Assigned at first join, never changes afterwards.
    pub sequence_number: u32,
    pub display_name: String,
    pub avatar: Option<String>,
    pub position: Vector2,
    pub intent: Intent,
    /// Derived from `position` by the simulation tick. `None` until the first tick.
    pub team: Option<Team>,
    /// Token of the grace timer currently allowed to evict this player.
    pub pending_eviction: Option<u64>,
}

impl Player {
    pub fn is_connected(&self) -> bool {
        self.connection_id.is_some()
    }

    pub fn is_grace_pending(&self) -> bool {
        self.pending_eviction.is_some()
    }
}

/// A scheduled removal handed out on disconnect.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Eviction {
    pub durable_id: String,
    pub token: u64,
}

/// Result of binding a connection to a durable id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindOutcome {
    pub connection_id: ConnectionId,
    pub sequence_number: u32,
    /// A new player record was created.
    pub created: bool,
    /// The player was grace-pending; its eviction has been cancelled.
    pub cancelled: Option<Eviction>,
    /// Connection that was bound to this identity before and has been silently dropped.
    pub superseded: Option<ConnectionId>,
    /// The calling connection was bound to a different identity, which is now
    /// disconnected and waiting out its own grace period.
    pub released: Option<Eviction>,
}

pub struct SessionRegistry {
    players: BTreeMap<u32, Player>,
    by_durable: HashMap<String, u32>,
    by_connection: HashMap<ConnectionId, String>,
    next_sequence: u32,
    next_token: u64,
    config: ServerConfig,
}

impl SessionRegistry {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            players: BTreeMap::new(),
            by_durable: HashMap::new(),
            by_connection: HashMap::new(),
            next_sequence: 1,
            next_token: 1,
            config,
        }
    }

    /// Creates or refreshes the player for `durable_id` and binds it to `connection_id`.
    ///
    /// Known players keep their position, team and sequence number; only the name and
    /// avatar are refreshed, and only when the request carries them.
    pub fn join(
        &mut self,
        connection_id: ConnectionId,
        durable_id: &str,
        profile: Profile,
    ) -> Result<BindOutcome, SessionError> {
        if durable_id.trim().is_empty() {
            return Err(SessionError::EmptyIdentity);
        }

        let released = self.release_other_identity(connection_id, durable_id);
        let photo = self.accept_photo(profile.photo);

        let created = match self.by_durable.get(durable_id) {
            Some(sequence_number) => {
                let name = profile.name.map(|name| self.display_name(&name));
                if let Some(player) = self.players.get_mut(sequence_number) {
                    if let Some(name) = name {
                        player.display_name = name;
                    }
                    if photo.is_some() {
                        player.avatar = photo;
                    }
                }
                false
            }
            None => {
                let sequence_number = self.next_sequence;
                self.next_sequence += 1;

                let player = Player {
                    durable_id: durable_id.to_string(),
                    connection_id: None,
                    sequence_number,
                    display_name: self.display_name(profile.name.as_deref().unwrap_or("")),
                    avatar: photo,
                    position: spawn_position(durable_id, &self.config.arena),
                    intent: Intent::default(),
                    team: None,
                    pending_eviction: None,
                };

                info!(
                    "Created player #{} ({:?}) at ({}, {})",
                    sequence_number, durable_id, player.position.x, player.position.y
                );
                self.by_durable
                    .insert(durable_id.to_string(), sequence_number);
                self.players.insert(sequence_number, player);
                true
            }
        };

        let mut outcome = self.bind(connection_id, durable_id)?;
        outcome.created = created;
        outcome.released = released;
        Ok(outcome)
    }

    /// Rebinds an existing player to a new connection after a reconnect.
    pub fn resume(
        &mut self,
        connection_id: ConnectionId,
        durable_id: &str,
    ) -> Result<BindOutcome, SessionError> {
        if !self.by_durable.contains_key(durable_id) {
            return Err(SessionError::UnknownIdentity(durable_id.to_string()));
        }

        let released = self.release_other_identity(connection_id, durable_id);
        let mut outcome = self.bind(connection_id, durable_id)?;
        outcome.released = released;

        info!(
            "Player #{} ({:?}) resumed on connection {}",
            outcome.sequence_number, durable_id, connection_id
        );
        Ok(outcome)
    }

    /// Unbinds a closed connection and starts the grace period for its player.
    ///
    /// Connections that were never bound, or were superseded by a newer binding, are
    /// rejected so a stale close cannot evict a player that has already moved on.
    pub fn disconnect(&mut self, connection_id: ConnectionId) -> Result<Eviction, SessionError> {
        let durable_id = self
            .by_connection
            .remove(&connection_id)
            .ok_or(SessionError::UnboundConnection(connection_id))?;

        let token = self.next_token;
        self.next_token += 1;

        let player = self
            .player_by_durable_mut(&durable_id)
            .ok_or_else(|| SessionError::UnknownIdentity(durable_id.clone()))?;
        player.connection_id = None;
        player.intent = Intent::default();
        player.pending_eviction = Some(token);

        info!(
            "Player #{} ({:?}) disconnected, grace period started",
            player.sequence_number, durable_id
        );
        Ok(Eviction { durable_id, token })
    }

    /// Removes the player if `eviction` is still the pending one.
    pub fn expire(&mut self, eviction: &Eviction) -> Option<Player> {
        let sequence_number = *self.by_durable.get(&eviction.durable_id)?;
        let pending = self.players.get(&sequence_number)?.pending_eviction;
        if pending != Some(eviction.token) {
            return None;
        }

        self.by_durable.remove(&eviction.durable_id);
        let player = self.players.remove(&sequence_number)?;
        info!(
            "Evicted player #{} ({:?}) after grace period",
            player.sequence_number, player.durable_id
        );
        Some(player)
    }

    /// Merges raw stick input into the intent of the player bound to `connection_id`.
    pub fn apply_input(
        &mut self,
        connection_id: ConnectionId,
        dx: Option<f64>,
        dy: Option<f64>,
    ) -> Result<&Player, SessionError> {
        let player = self
            .player_by_connection_mut(connection_id)
            .ok_or(SessionError::UnboundConnection(connection_id))?;
        player.intent.apply(dx, dy);
        Ok(player)
    }

    /// Replaces the avatar wholesale. Oversized blobs are dropped and leave it unchanged.
    pub fn set_avatar(
        &mut self,
        connection_id: ConnectionId,
        photo: String,
    ) -> Result<&Player, SessionError> {
        let photo = self.accept_photo(Some(photo));
        let player = self
            .player_by_connection_mut(connection_id)
            .ok_or(SessionError::UnboundConnection(connection_id))?;
        if photo.is_some() {
            player.avatar = photo;
        }
        Ok(player)
    }

    pub fn get(&self, durable_id: &str) -> Option<&Player> {
        self.by_durable
            .get(durable_id)
            .and_then(|sequence_number| self.players.get(sequence_number))
    }

    pub fn get_by_connection(&self, connection_id: ConnectionId) -> Option<&Player> {
        self.by_connection
            .get(&connection_id)
            .and_then(|durable_id| self.get(durable_id))
    }

    /// All live and grace-pending players in ascending sequence order.
    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    pub fn players_mut(&mut self) -> impl Iterator<Item = &mut Player> {
        self.players.values_mut()
    }

    pub fn connection_count(&self) -> usize {
        self.by_connection.len()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    fn bind(
        &mut self,
        connection_id: ConnectionId,
        durable_id: &str,
    ) -> Result<BindOutcome, SessionError> {
        let player = self
            .player_by_durable_mut(durable_id)
            .ok_or_else(|| SessionError::UnknownIdentity(durable_id.to_string()))?;

        let superseded = player
            .connection_id
            .replace(connection_id)
            .filter(|previous| *previous != connection_id);
        let cancelled = player.pending_eviction.take().map(|token| Eviction {
            durable_id: durable_id.to_string(),
            token,
        });
        let sequence_number = player.sequence_number;

        if let Some(previous) = superseded {
            self.by_connection.remove(&previous);
        }
        self.by_connection
            .insert(connection_id, durable_id.to_string());

        Ok(BindOutcome {
            connection_id,
            sequence_number,
            created: false,
            cancelled,
            superseded,
            released: None,
        })
    }

    // A connection switching identities leaves its previous player behind.
    fn release_other_identity(
        &mut self,
        connection_id: ConnectionId,
        durable_id: &str,
    ) -> Option<Eviction> {
        let bound_elsewhere = self
            .by_connection
            .get(&connection_id)
            .is_some_and(|bound| bound.as_str() != durable_id);

        if bound_elsewhere {
            self.disconnect(connection_id).ok()
        } else {
            None
        }
    }

    fn player_by_durable_mut(&mut self, durable_id: &str) -> Option<&mut Player> {
        let sequence_number = self.by_durable.get(durable_id)?;
        self.players.get_mut(sequence_number)
    }

    fn player_by_connection_mut(&mut self, connection_id: ConnectionId) -> Option<&mut Player> {
        let durable_id = self.by_connection.get(&connection_id)?;
        let sequence_number = self.by_durable.get(durable_id)?;
        self.players.get_mut(sequence_number)
    }

    fn display_name(&self, raw: &str) -> String {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            DEFAULT_NAME.to_string()
        } else {
            truncate_chars(trimmed, self.config.max_name_chars)
        }
    }

    fn accept_photo(&self, photo: Option<String>) -> Option<String> {
        match photo {
            Some(photo) if photo.len() > self.config.max_avatar_bytes => {
                warn!(
                    "Discarding avatar of {} bytes (limit {})",
                    photo.len(),
                    self.config.max_avatar_bytes
                );
                None
            }
            Some(photo) if photo.is_empty() => None,
            other => other,
        }
    }
}
