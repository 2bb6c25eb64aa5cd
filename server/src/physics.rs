use crate::config::ArenaConfig;

/// Centres closer than this are treated as coincident.
const COINCIDENT_EPSILON: f32 = 1e-6;

///Represents a vector in 2D space.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector2 {
    ///Value along the x-axis.
    /// Positive direction is to the right.
    pub x: f32,
    ///Value along the y-axis.
    /// Positive direction is down, matching screen coordinates.
    pub y: f32,
}

impl Vector2 {
    pub const fn new(x: f32, y: f32) -> Self {
        Vector2 { x, y }
    }

    ///Returns the magnitude of the vector.
    pub fn magnitude(&self) -> f32 {
        self.x.hypot(self.y)
    }

    ///Returns the scaled vector.
    pub fn scale(&self, scalar: f32) -> Vector2 {
        Vector2 {
            x: self.x * scalar,
            y: self.y * scalar,
        }
    }

    ///Returns the sum of two vectors.
    pub fn add(&self, other: &Vector2) -> Vector2 {
        Vector2 {
            x: self.x + other.x,
            y: self.y + other.y,
        }
    }

    ///Returns the difference of two vectors.
    pub fn sub(&self, other: &Vector2) -> Vector2 {
        Vector2 {
            x: self.x - other.x,
            y: self.y - other.y,
        }
    }

    pub fn distance(&self, other: &Vector2) -> f32 {
        other.sub(self).magnitude()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Clamps a centre position so the whole avatar stays inside the arena margin.
pub fn clamp_to_arena(position: Vector2, arena: &ArenaConfig) -> Vector2 {
    Vector2 {
        x: position.x.clamp(arena.min_x(), arena.max_x()),
        y: position.y.clamp(arena.min_y(), arena.max_y()),
    }
}

pub fn in_bounds(position: &Vector2, arena: &ArenaConfig) -> bool {
    (arena.min_x()..=arena.max_x()).contains(&position.x)
        && (arena.min_y()..=arena.max_y()).contains(&position.y)
}

///Represents a circular avatar taking part in collision resolution.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Body {
    pub position: Vector2,
    ///Current movement intent, each component in [-1, 1].
    pub intent: Vector2,
}

///Separates two overlapping avatars. Returns true if they were in contact.
///
///Each avatar is pushed back by half the overlap along the line between centres,
///then nudged against its own intent by `bounce * overlap` so that two players
///pushing into each other do not stick. Both end up re-clamped to the arena.
pub fn resolve_pair(a: &mut Body, b: &mut Body, arena: &ArenaConfig, bounce: f32) -> bool {
    let delta = b.position.sub(&a.position);
    let mut distance = delta.magnitude();
    let contact = arena.contact_distance();

    if !(distance < contact) {
        return false;
    }

    let normal = if distance < COINCIDENT_EPSILON {
        distance = 0.0;
        Vector2::new(1.0, 0.0)
    } else {
        delta.scale(1.0 / distance)
    };

    let overlap = contact - distance;
    let push = normal.scale(overlap / 2.0);

    a.position = a.position.sub(&push);
    b.position = b.position.add(&push);

    a.position = a.position.sub(&a.intent.scale(bounce * overlap));
    b.position = b.position.sub(&b.intent.scale(bounce * overlap));

    a.position = clamp_to_arena(a.position, arena);
    b.position = clamp_to_arena(b.position, arena);

    true
}

///Single pass over every pair, in slice order. Returns the number of contacts resolved.
///
///Three-way pile-ups may still overlap afterwards; they drift apart over later ticks.
pub fn resolve_collisions(bodies: &mut [Body], arena: &ArenaConfig, bounce: f32) -> usize {
    let mut contacts = 0;

    for i in 0..bodies.len() {
        let (head, tail) = bodies.split_at_mut(i + 1);
        let a = &mut head[i];
        for b in tail.iter_mut() {
            if resolve_pair(a, b, arena, bounce) {
                contacts += 1;
            }
        }
    }

    contacts
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn body(x: f32, y: f32) -> Body {
        Body {
            position: Vector2::new(x, y),
            intent: Vector2::default(),
        }
    }

    #[test]
    fn test_vector_math() {
        let v = Vector2::new(3.0, 4.0);
        assert_eq!(v.magnitude(), 5.0);
        assert_eq!(v.scale(2.0), Vector2::new(6.0, 8.0));
        assert_eq!(v.add(&Vector2::new(1.0, 1.0)), Vector2::new(4.0, 5.0));
        assert_eq!(v.sub(&Vector2::new(1.0, 1.0)), Vector2::new(2.0, 3.0));
        assert_eq!(Vector2::default().distance(&v), 5.0);
        assert!(!Vector2::new(f32::NAN, 0.0).is_finite());
    }

    #[test]
    fn test_clamp_to_arena() {
        let arena = ArenaConfig::default();

        let clamped = clamp_to_arena(Vector2::new(-500.0, 5000.0), &arena);
        assert_eq!(clamped, Vector2::new(58.0, 662.0));
        assert!(in_bounds(&clamped, &arena));

        let inside = Vector2::new(300.0, 180.0);
        assert_eq!(clamp_to_arena(inside, &arena), inside);
    }

    #[test]
    fn test_symmetric_split() {
        let arena = ArenaConfig::default();
        let mut a = body(300.0, 180.0);
        let mut b = body(390.0, 180.0);

        assert!(resolve_pair(&mut a, &mut b, &arena, 0.12));

        assert_approx_eq!(a.position.x, 297.0, 1e-4);
        assert_approx_eq!(b.position.x, 393.0, 1e-4);
        assert_approx_eq!(a.position.y, 180.0, 1e-4);
        assert!(a.position.distance(&b.position) >= 96.0 - 1e-3);
    }

    #[test]
    fn test_no_contact_when_apart() {
        let arena = ArenaConfig::default();
        let mut a = body(300.0, 180.0);
        let mut b = body(396.0, 180.0);

        assert!(!resolve_pair(&mut a, &mut b, &arena, 0.12));
        assert_eq!(a.position, Vector2::new(300.0, 180.0));
        assert_eq!(b.position, Vector2::new(396.0, 180.0));
    }

    #[test]
    fn test_coincident_centres_split_along_x() {
        let arena = ArenaConfig::default();
        let mut a = body(400.0, 300.0);
        let mut b = body(400.0, 300.0);

        assert!(resolve_pair(&mut a, &mut b, &arena, 0.12));

        assert_approx_eq!(a.position.x, 352.0, 1e-4);
        assert_approx_eq!(b.position.x, 448.0, 1e-4);
        assert_approx_eq!(a.position.y, 300.0, 1e-4);
        assert_approx_eq!(b.position.y, 300.0, 1e-4);
        assert!(a.position.is_finite() && b.position.is_finite());
    }

    #[test]
    fn test_head_on_intents_bounce_back() {
        let arena = ArenaConfig::default();
        let mut a = Body {
            position: Vector2::new(300.0, 180.0),
            intent: Vector2::new(1.0, 0.0),
        };
        let mut b = Body {
            position: Vector2::new(390.0, 180.0),
            intent: Vector2::new(-1.0, 0.0),
        };

        resolve_pair(&mut a, &mut b, &arena, 0.1);

        // 3 px split plus 0.1 * 6 px anti-stick each
        assert_approx_eq!(a.position.x, 296.4, 1e-3);
        assert_approx_eq!(b.position.x, 393.6, 1e-3);
        assert!(a.position.distance(&b.position) > 96.0);
    }

    #[test]
    fn test_resolution_reclamps_at_wall() {
        let arena = ArenaConfig::default();
        let mut a = body(arena.min_x(), 300.0);
        let mut b = body(arena.min_x() + 10.0, 300.0);

        assert!(resolve_pair(&mut a, &mut b, &arena, 0.12));

        assert_eq!(a.position.x, arena.min_x());
        assert!(in_bounds(&a.position, &arena));
        assert!(in_bounds(&b.position, &arena));
    }

    #[test]
    fn test_resolve_collisions_counts_contacts() {
        let arena = ArenaConfig::default();
        let mut bodies = vec![body(300.0, 180.0), body(390.0, 180.0), body(900.0, 500.0)];

        let contacts = resolve_collisions(&mut bodies, &arena, 0.12);

        assert_eq!(contacts, 1);
        assert_eq!(bodies[2].position, Vector2::new(900.0, 500.0));
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let arena = ArenaConfig::default();
        let start = vec![
            body(400.0, 300.0),
            body(430.0, 310.0),
            body(460.0, 290.0),
            body(415.0, 340.0),
        ];

        let mut first = start.clone();
        let mut second = start;
        resolve_collisions(&mut first, &arena, 0.12);
        resolve_collisions(&mut second, &arena, 0.12);

        assert_eq!(first, second);
    }

    #[test]
    fn test_pile_up_converges_over_passes() {
        let arena = ArenaConfig::default();
        let mut bodies = vec![body(400.0, 300.0), body(420.0, 300.0), body(440.0, 300.0)];

        for _ in 0..50 {
            resolve_collisions(&mut bodies, &arena, 0.12);
        }

        for i in 0..bodies.len() {
            for j in (i + 1)..bodies.len() {
                let distance = bodies[i].position.distance(&bodies[j].position);
                assert!(distance >= 96.0 - 0.01, "pair {} {} at {}", i, j, distance);
            }
        }
    }
}
