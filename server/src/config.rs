//! Runtime configuration for the arena server.
//!
//! Defaults reproduce the reference deployment: a 1280x720 arena framed by a 10 px
//! margin, 48 px avatars moving at 220 px/s, a 16 ms simulation tick and a 33 ms
//! snapshot cadence.

use shared::{
    ARENA_HEIGHT, ARENA_MARGIN, ARENA_WIDTH, MAX_NAME_CHARS, PLAYER_RADIUS, PLAYER_SPEED,
};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    ZeroPeriod(&'static str),
    #[error("arena {width}x{height} cannot fit an avatar of radius {radius} inside margin {margin}")]
    ArenaTooSmall {
        width: f32,
        height: f32,
        margin: f32,
        radius: f32,
    },
    #[error("{0} must be finite and positive")]
    InvalidConstant(&'static str),
}

/// Arena geometry. The origin is the top-left corner of the full extent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArenaConfig {
    pub width: f32,
    pub height: f32,
    pub margin: f32,
    pub player_radius: f32,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            width: ARENA_WIDTH,
            height: ARENA_HEIGHT,
            margin: ARENA_MARGIN,
            player_radius: PLAYER_RADIUS,
        }
    }
}

impl ArenaConfig {
    pub fn min_x(&self) -> f32 {
        self.margin + self.player_radius
    }

    pub fn max_x(&self) -> f32 {
        self.width - self.margin - self.player_radius
    }

    pub fn min_y(&self) -> f32 {
        self.margin + self.player_radius
    }

    pub fn max_y(&self) -> f32 {
        self.height - self.margin - self.player_radius
    }

    /// Vertical line splitting team A (left) from team B (right).
    pub fn midline(&self) -> f32 {
        self.width / 2.0
    }

    /// Minimum centre distance between two non-overlapping avatars.
    pub fn contact_distance(&self) -> f32 {
        self.player_radius * 2.0
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub arena: ArenaConfig,
    pub tick_period: Duration,
    pub snapshot_period: Duration,
    /// Pixels per second at full intent.
    pub player_speed: f32,
    /// Anti-stick displacement per unit of intent and overlap.
    pub bounce: f32,
    /// How long a disconnected player is kept for resume. Zero evicts immediately.
    pub grace_period: Duration,
    pub max_name_chars: usize,
    pub max_avatar_bytes: usize,
    pub max_connections: usize,
    pub outbound_queue: usize,
    pub keepalive_interval: Duration,
    pub idle_timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3000".to_string(),
            arena: ArenaConfig::default(),
            tick_period: Duration::from_millis(16),
            snapshot_period: Duration::from_millis(33),
            player_speed: PLAYER_SPEED,
            bounce: 0.12,
            grace_period: Duration::from_secs(60),
            max_name_chars: MAX_NAME_CHARS,
            max_avatar_bytes: 256 * 1024,
            max_connections: 64,
            outbound_queue: 64,
            keepalive_interval: Duration::from_secs(5),
            idle_timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl ServerConfig {
    /// Distance covered in one tick at full intent.
    pub fn speed_per_tick(&self) -> f32 {
        self.player_speed * self.tick_period.as_secs_f32()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_period.is_zero() {
            return Err(ConfigError::ZeroPeriod("tick period"));
        }
        if self.snapshot_period.is_zero() {
            return Err(ConfigError::ZeroPeriod("snapshot period"));
        }
        if self.keepalive_interval.is_zero() {
            return Err(ConfigError::ZeroPeriod("keepalive interval"));
        }
        if self.outbound_queue == 0 {
            return Err(ConfigError::ZeroPeriod("outbound queue"));
        }

        let arena = &self.arena;
        if !(arena.player_radius.is_finite() && arena.player_radius > 0.0) {
            return Err(ConfigError::InvalidConstant("player radius"));
        }
        if !(arena.margin.is_finite() && arena.margin >= 0.0) {
            return Err(ConfigError::InvalidConstant("arena margin"));
        }
        if !(self.player_speed.is_finite() && self.player_speed > 0.0) {
            return Err(ConfigError::InvalidConstant("player speed"));
        }
        if !(self.bounce.is_finite() && self.bounce >= 0.0) {
            return Err(ConfigError::InvalidConstant("bounce"));
        }

        let inset = 2.0 * (arena.margin + arena.player_radius);
        if !(arena.width > inset && arena.height > inset) {
            return Err(ConfigError::ArenaTooSmall {
                width: arena.width,
                height: arena.height,
                margin: arena.margin,
                radius: arena.player_radius,
            });
        }

        Ok(())
    }
}
