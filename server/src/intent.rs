//! Input validation for controller intents.
//!
//! Controllers stream analog stick readings as `dx`/`dy` in [-1, 1]. Values are
//! clamped per component and anything non-finite collapses to 0, so a hostile or
//! buggy client can never push an avatar faster than full tilt.

use crate::physics::Vector2;

/// A player's latest normalized movement direction.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Intent {
    pub dx: f32,
    pub dy: f32,
}

impl Intent {
    /// Merges a raw input message into the current intent.
    ///
    /// Absent components keep their previous value so that an action-only message
    /// does not stop the avatar.
    pub fn apply(&mut self, dx: Option<f64>, dy: Option<f64>) {
        if let Some(dx) = dx {
            self.dx = sanitize_axis(dx);
        }
        if let Some(dy) = dy {
            self.dy = sanitize_axis(dy);
        }
    }

    pub fn as_vector(&self) -> Vector2 {
        Vector2::new(self.dx, self.dy)
    }

    pub fn is_idle(&self) -> bool {
        self.dx == 0.0 && self.dy == 0.0
    }
}

/// Clamps one wire component to [-1, 1], zeroing non-finite values. Runs in
/// f64 so values past the f32 range still clamp instead of reading as infinite.
pub fn sanitize_axis(value: f64) -> f32 {
    if value.is_finite() {
        value.clamp(-1.0, 1.0) as f32
    } else {
        0.0
    }
}

/// Discrete controller buttons. Forwarded to viewers, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Primary,
    Secondary,
}

impl ActionKind {
    pub fn code(self) -> u8 {
        match self {
            ActionKind::Primary => 1,
            ActionKind::Secondary => 2,
        }
    }
}

impl TryFrom<u8> for ActionKind {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(ActionKind::Primary),
            2 => Ok(ActionKind::Secondary),
            other => Err(other),
        }
    }
}
