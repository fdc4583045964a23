//! Fixtures
//!
//! A fixture binds a [`Shape`] and a material (friction, restitution,
//! density, collision filter) to a body. Each shape child owns one
//! broad-phase proxy; multi-child shapes (chains, tile grids) can carry a
//! distinct filter per child.

use serde::{Deserialize, Serialize};

use crate::shapes::Shape;

/// Category/mask collision filter.
///
/// Two fixtures may collide iff
/// `(a.category & b.mask) != 0 && (b.category & a.mask) != 0`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    /// Which category bits this fixture belongs to
    pub category: u16,
    /// Which categories this fixture collides with
    pub mask: u16,
}

impl Filter {
    /// Default filter: category 1, collides with everything.
    pub const DEFAULT: Self = Self {
        category: 0x0001,
        mask: 0xFFFF,
    };

    #[inline]
    #[must_use]
    pub const fn new(category: u16, mask: u16) -> Self {
        Self { category, mask }
    }

    /// Bidirectional category/mask test.
    #[inline]
    #[must_use]
    pub fn should_collide(a: &Self, b: &Self) -> bool {
        (a.category & b.mask) != 0 && (b.category & a.mask) != 0
    }
}

impl Default for Filter {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Recipe for creating a fixture on a body.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FixtureDef {
    pub shape: Shape,
    /// Coulomb friction coefficient
    pub friction: f32,
    /// Restitution (bounciness)
    pub restitution: f32,
    /// Mass per area; used by the body's mass computation
    pub density: f32,
    /// Sensors detect overlap but produce no impulses
    pub sensor: bool,
    pub filter: Filter,
}

impl FixtureDef {
    /// Defaults matching a plain solid fixture.
    #[must_use]
    pub fn new(shape: Shape) -> Self {
        Self {
            shape,
            friction: 0.2,
            restitution: 0.0,
            density: 1.0,
            sensor: false,
            filter: Filter::DEFAULT,
        }
    }
}

/// A shape attached to a body.
///
/// Invariants: `filters.len() == shape.child_count()`, and
/// `proxies.len() == shape.child_count()` exactly while the owning body is
/// active (empty otherwise).
#[derive(Clone, Debug)]
pub struct Fixture {
    pub shape: Shape,
    pub friction: f32,
    pub restitution: f32,
    pub density: f32,
    pub sensor: bool,
    filters: Vec<Filter>,
    /// Broad-phase proxy per shape child; empty while the body is inactive
    pub(crate) proxies: Vec<u32>,
    /// Uniform game-object scale the shape was baked at
    pub(crate) last_scale: f32,
}

impl Fixture {
    pub(crate) fn new(def: FixtureDef, creation_scale: f32) -> Self {
        let children = def.shape.child_count();
        Self {
            shape: def.shape,
            friction: def.friction,
            restitution: def.restitution,
            density: def.density,
            sensor: def.sensor,
            filters: vec![def.filter; children],
            proxies: Vec::new(),
            last_scale: creation_scale,
        }
    }

    /// Filter for a shape child.
    #[inline]
    #[must_use]
    pub fn filter(&self, child: usize) -> Filter {
        self.filters.get(child).copied().unwrap_or_default()
    }

    /// Reassign the filter of one shape child. The caller must re-touch the
    /// child's broad-phase proxy so pairs are re-evaluated.
    pub fn set_filter(&mut self, child: usize, filter: Filter) {
        if let Some(slot) = self.filters.get_mut(child) {
            *slot = filter;
        }
    }

    /// Number of shape children.
    #[inline]
    #[must_use]
    pub fn child_count(&self) -> usize {
        self.shape.child_count()
    }

    /// Re-sync the shape to a new uniform game-object scale. Returns true
    /// if geometry changed (caller should wake the body and re-touch
    /// proxies).
    pub(crate) fn rescale(&mut self, object_scale: f32) -> bool {
        if (self.last_scale - object_scale).abs() < 1e-6 || object_scale <= 0.0 {
            return false;
        }
        let factor = object_scale / self.last_scale;
        self.shape.scale_in_place(factor);
        self.last_scale = object_scale;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Vec2;

    #[test]
    fn test_filter_bidirectional() {
        let a = Filter::new(0x0001, 0x0002);
        let b = Filter::new(0x0002, 0x0001);
        let c = Filter::new(0x0004, 0xFFFF);
        assert!(Filter::should_collide(&a, &b));
        // a's mask does not include c's category
        assert!(!Filter::should_collide(&a, &c));
    }

    #[test]
    fn test_per_child_filters() {
        let chain = Shape::Chain(
            crate::shapes::ChainData::new(vec![
                Vec2::ZERO,
                Vec2::new(1.0, 0.0),
                Vec2::new(2.0, 0.0),
            ])
            .unwrap(),
        );
        let mut fixture = Fixture::new(FixtureDef::new(chain), 1.0);
        assert_eq!(fixture.child_count(), 2);

        fixture.set_filter(1, Filter::new(0x0008, 0x0008));
        assert_eq!(fixture.filter(0), Filter::DEFAULT);
        assert_eq!(fixture.filter(1).category, 0x0008);
    }

    #[test]
    fn test_rescale_tracks_last_scale() {
        let mut fixture = Fixture::new(FixtureDef::new(Shape::circle(1.0).unwrap()), 1.0);
        assert!(fixture.rescale(2.0));
        match &fixture.shape {
            Shape::Circle(c) => assert!((c.radius - 2.0).abs() < 1e-5),
            _ => unreachable!(),
        }
        // Scaling back must undo exactly, not compound
        assert!(fixture.rescale(1.0));
        match &fixture.shape {
            Shape::Circle(c) => assert!((c.radius - 1.0).abs() < 1e-5),
            _ => unreachable!(),
        }
        assert!(!fixture.rescale(1.0), "same scale is a no-op");
    }
}
