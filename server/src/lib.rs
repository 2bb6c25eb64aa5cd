//! # Party Arena Server Library
//!
//! This library provides the authoritative server for a couch-party arena game.
//! Players steer avatars from their phones, a shared host screen renders the
//! field, and the server owns every position, team and identity.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Simulation
//! The server integrates each player's movement intent on a fixed tick, keeps
//! avatars inside the arena, pushes overlapping avatars apart and derives each
//! player's team from which half of the field they stand in.
//!
//! ### Session Management
//! Players are identified by a durable id chosen by their device, not by the
//! transport connection. This covers:
//! - Joining, with a display name and optional avatar image
//! - Resuming after a dropped connection, keeping sequence number and position
//! - A grace period before a vanished player is evicted
//! - Rebinding when the same identity shows up on a new connection
//!
//! ### State Broadcasting
//! Two publications keep hosts and controllers in sync:
//! - A roster, sent only when membership changes, carrying names and photos
//! - Snapshots on their own timer, carrying rounded positions and teams
//!
//! Discrete events (actions, team changes, avatar updates) are broadcast as
//! they happen.
//!
//! ## Architecture Design
//!
//! ### Single-Writer Event Loop
//! One task owns the game state and applies every event in arrival order:
//! inbound packets, closed connections, grace expiries and timer ticks. Game
//! operations return the packets to send and timers to start instead of doing
//! I/O themselves, which keeps the game logic synchronous and testable.
//!
//! ### WebSocket Transport
//! Browsers and phones speak WebSocket. Each connection gets a reader task and a
//! writer task fed by a bounded queue, so one slow peer never stalls the loop.
//! Peers may use JSON text frames or compact bincode binary frames.
//!
//! ## Module Organization
//!
//! - `config`: tunables, arena geometry and validation
//! - `physics`: vectors, arena clamping and collision resolution
//! - `intent` and `team`: input sanitizing and team derivation
//! - `session`: the durable identity registry and grace bookkeeping
//! - `game`: the tick, packet dispatch and the effects they produce
//! - `broadcast`: roster and snapshot payloads
//! - `client_manager`: open connections and per-format fan-out
//! - `network`: the accept loop, connection tasks and the main event loop
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig {
//!         bind_addr: "0.0.0.0:3000".to_string(),
//!         grace_period: Duration::from_secs(30),
//!         ..ServerConfig::default()
//!     };
//!
//!     let mut server = Server::new(config).await?;
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod broadcast;
pub mod client_manager;
pub mod config;
pub mod game;
pub mod intent;
pub mod network;
pub mod physics;
pub mod session;
pub mod team;
pub mod utils;
