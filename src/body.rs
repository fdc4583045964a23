//! Rigid Bodies
//!
//! Body state (transform, velocities, mass data, damping, sleep) and the
//! fixture list. Bodies are created through the world factory and
//! referenced by generation-checked handles; the body itself never owns
//! broad-phase proxies directly — fixtures do, and the world drives their
//! lifecycle when a body is activated or deactivated.
//!
//! # Mass invariants
//!
//! - Static and kinematic bodies always have zero mass and zero inverse
//!   mass.
//! - Dynamic bodies always have positive mass: if the attached fixtures
//!   compute to zero (or negative) mass, the mass is forced to 1.0.

use serde::{Deserialize, Serialize};

use crate::broadphase::{BroadPhase, ProxyTarget};
use crate::fixture::Fixture;
use crate::math::{cross_sv, Transform2, Vec2};

/// Generation-checked reference to a body owned by a world.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BodyHandle(pub(crate) crate::arena::Handle);

impl BodyHandle {
    /// Raw arena slot index (stable for the body's lifetime).
    #[inline]
    #[must_use]
    pub fn index(&self) -> u32 {
        self.0.index()
    }
}

/// How a body participates in simulation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BodyType {
    /// Never moves, infinite mass
    Static,
    /// Moved by the game object, pushes dynamic bodies, infinite mass
    Kinematic,
    /// Fully simulated
    Dynamic,
}

/// Recipe for creating a body.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct BodyDef {
    pub body_type: BodyType,
    pub position: Vec2,
    pub angle: f32,
    pub linear_velocity: Vec2,
    pub angular_velocity: f32,
    pub linear_damping: f32,
    pub angular_damping: f32,
    pub gravity_scale: f32,
    pub allow_sleep: bool,
    pub awake: bool,
    pub fixed_rotation: bool,
    pub bullet: bool,
    pub active: bool,
    /// Opaque back-reference to the owning game object
    pub user_data: u64,
}

impl Default for BodyDef {
    fn default() -> Self {
        Self {
            body_type: BodyType::Static,
            position: Vec2::ZERO,
            angle: 0.0,
            linear_velocity: Vec2::ZERO,
            angular_velocity: 0.0,
            linear_damping: 0.0,
            angular_damping: 0.0,
            gravity_scale: 1.0,
            allow_sleep: true,
            awake: true,
            fixed_rotation: false,
            bullet: false,
            active: true,
            user_data: 0,
        }
    }
}

/// A rigid body.
pub struct Body {
    /// Arena slot index, fixed for the body's lifetime
    pub(crate) slot: u32,
    pub(crate) body_type: BodyType,
    pub(crate) xf: Transform2,
    /// Body angle in radians, stored separately so it round-trips through
    /// the solver without trigonometric drift
    pub(crate) angle: f32,
    /// Center of mass in local coordinates
    pub(crate) local_center: Vec2,
    /// Center of mass in world coordinates
    pub(crate) world_center: Vec2,
    pub(crate) linear_velocity: Vec2,
    pub(crate) angular_velocity: f32,
    pub(crate) force: Vec2,
    pub(crate) torque: f32,
    pub(crate) mass: f32,
    pub(crate) inv_mass: f32,
    /// Rotational inertia about the center of mass
    pub(crate) inertia: f32,
    pub(crate) inv_inertia: f32,
    pub(crate) linear_damping: f32,
    pub(crate) angular_damping: f32,
    pub(crate) gravity_scale: f32,
    pub(crate) sleep_time: f32,
    pub(crate) awake: bool,
    pub(crate) allow_sleep: bool,
    pub(crate) fixed_rotation: bool,
    pub(crate) bullet: bool,
    pub(crate) active: bool,
    pub(crate) user_data: u64,
    pub(crate) fixtures: Vec<Fixture>,
    /// Scratch index used by the island builder during a step
    pub(crate) island_index: i32,
}

impl Body {
    pub(crate) fn new(def: &BodyDef, slot: u32) -> Self {
        let xf = Transform2::new(def.position, def.angle);
        Self {
            slot,
            body_type: def.body_type,
            xf,
            angle: def.angle,
            local_center: Vec2::ZERO,
            world_center: def.position,
            linear_velocity: def.linear_velocity,
            angular_velocity: def.angular_velocity,
            force: Vec2::ZERO,
            torque: 0.0,
            mass: 0.0,
            inv_mass: 0.0,
            inertia: 0.0,
            inv_inertia: 0.0,
            linear_damping: def.linear_damping,
            angular_damping: def.angular_damping,
            gravity_scale: def.gravity_scale,
            sleep_time: 0.0,
            awake: def.awake,
            allow_sleep: def.allow_sleep,
            fixed_rotation: def.fixed_rotation,
            bullet: def.bullet,
            active: def.active,
            user_data: def.user_data,
            fixtures: Vec::new(),
            island_index: -1,
        }
    }

    // ------------------------------------------------------------------
    // State accessors
    // ------------------------------------------------------------------

    #[inline]
    #[must_use]
    pub fn body_type(&self) -> BodyType {
        self.body_type
    }

    #[inline]
    #[must_use]
    pub fn transform(&self) -> Transform2 {
        self.xf
    }

    #[inline]
    #[must_use]
    pub fn position(&self) -> Vec2 {
        self.xf.p
    }

    #[inline]
    #[must_use]
    pub fn angle(&self) -> f32 {
        self.angle
    }

    #[inline]
    #[must_use]
    pub fn world_center(&self) -> Vec2 {
        self.world_center
    }

    #[inline]
    #[must_use]
    pub fn linear_velocity(&self) -> Vec2 {
        self.linear_velocity
    }

    #[inline]
    #[must_use]
    pub fn angular_velocity(&self) -> f32 {
        self.angular_velocity
    }

    #[inline]
    #[must_use]
    pub fn mass(&self) -> f32 {
        self.mass
    }

    #[inline]
    #[must_use]
    pub fn is_awake(&self) -> bool {
        self.awake
    }

    #[inline]
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    #[inline]
    #[must_use]
    pub fn is_sleeping_allowed(&self) -> bool {
        self.allow_sleep
    }

    #[inline]
    #[must_use]
    pub fn is_bullet(&self) -> bool {
        self.bullet
    }

    #[inline]
    #[must_use]
    pub fn user_data(&self) -> u64 {
        self.user_data
    }

    #[inline]
    pub fn set_user_data(&mut self, user_data: u64) {
        self.user_data = user_data;
    }

    #[inline]
    #[must_use]
    pub fn linear_damping(&self) -> f32 {
        self.linear_damping
    }

    #[inline]
    pub fn set_linear_damping(&mut self, damping: f32) {
        self.linear_damping = damping;
    }

    #[inline]
    #[must_use]
    pub fn angular_damping(&self) -> f32 {
        self.angular_damping
    }

    #[inline]
    pub fn set_angular_damping(&mut self, damping: f32) {
        self.angular_damping = damping;
    }

    #[inline]
    pub fn set_gravity_scale(&mut self, scale: f32) {
        self.gravity_scale = scale;
    }

    #[inline]
    pub fn set_bullet(&mut self, flag: bool) {
        self.bullet = flag;
    }

    /// Accumulated force for the current step.
    #[inline]
    #[must_use]
    pub fn total_force(&self) -> Vec2 {
        self.force
    }

    /// Borrow the fixture list.
    #[inline]
    #[must_use]
    pub fn fixtures(&self) -> &[Fixture] {
        &self.fixtures
    }

    /// Mutably borrow the fixture list (shape/filter edits; proxies are
    /// refreshed by the world).
    #[inline]
    pub fn fixtures_mut(&mut self) -> &mut [Fixture] {
        &mut self.fixtures
    }

    // ------------------------------------------------------------------
    // Dynamics
    // ------------------------------------------------------------------

    /// Set the linear velocity, waking the body if the velocity is nonzero.
    pub fn set_linear_velocity(&mut self, v: Vec2) {
        if self.body_type == BodyType::Static {
            return;
        }
        if v.length_squared() > 0.0 {
            self.set_awake(true);
        }
        self.linear_velocity = v;
    }

    /// Set the angular velocity, waking the body if nonzero.
    pub fn set_angular_velocity(&mut self, w: f32) {
        if self.body_type == BodyType::Static {
            return;
        }
        if w * w > 0.0 {
            self.set_awake(true);
        }
        self.angular_velocity = w;
    }

    /// Apply a force at a world point. Wakes the body.
    pub fn apply_force(&mut self, force: Vec2, point: Vec2) {
        if self.body_type != BodyType::Dynamic {
            return;
        }
        self.set_awake(true);
        self.force += force;
        self.torque += crate::math::cross(point - self.world_center, force);
    }

    /// Apply a torque. Wakes the body.
    pub fn apply_torque(&mut self, torque: f32) {
        if self.body_type != BodyType::Dynamic {
            return;
        }
        self.set_awake(true);
        self.torque += torque;
    }

    /// Apply a linear impulse at a world point. Wakes the body.
    pub fn apply_linear_impulse(&mut self, impulse: Vec2, point: Vec2) {
        if self.body_type != BodyType::Dynamic {
            return;
        }
        self.set_awake(true);
        self.linear_velocity += self.inv_mass * impulse;
        self.angular_velocity +=
            self.inv_inertia * crate::math::cross(point - self.world_center, impulse);
    }

    /// Wake or put the body to sleep. Sleeping zeroes velocities and
    /// accumulated forces.
    pub fn set_awake(&mut self, awake: bool) {
        if awake {
            if !self.awake {
                self.awake = true;
                self.sleep_time = 0.0;
            }
        } else {
            self.awake = false;
            self.sleep_time = 0.0;
            self.linear_velocity = Vec2::ZERO;
            self.angular_velocity = 0.0;
            self.force = Vec2::ZERO;
            self.torque = 0.0;
        }
    }

    /// Allow or forbid sleeping. Forbidding wakes the body.
    pub fn set_sleeping_allowed(&mut self, flag: bool) {
        self.allow_sleep = flag;
        if !flag {
            self.set_awake(true);
        }
    }

    /// Lock rotation. Locking zeroes angular velocity and rotational mass.
    pub fn set_fixed_rotation(&mut self, flag: bool) {
        if self.fixed_rotation == flag {
            return;
        }
        self.fixed_rotation = flag;
        self.angular_velocity = 0.0;
        self.reset_mass_data();
    }

    /// Move the body to a new pose, keeping velocities.
    pub(crate) fn set_transform_internal(&mut self, position: Vec2, angle: f32) {
        self.xf = Transform2::new(position, angle);
        self.angle = angle;
        self.world_center = self.xf.apply(self.local_center);
    }

    /// Advance the pose from the world-center representation used by the
    /// solver.
    pub(crate) fn set_center_and_angle(&mut self, center: Vec2, angle: f32) {
        self.angle = angle;
        self.xf.q = crate::math::Rot::new(angle);
        self.xf.p = center - self.xf.q.apply(self.local_center);
        self.world_center = center;
    }

    /// Recompute mass, center of mass and inertia from the fixtures.
    pub(crate) fn reset_mass_data(&mut self) {
        self.mass = 0.0;
        self.inv_mass = 0.0;
        self.inertia = 0.0;
        self.inv_inertia = 0.0;
        self.local_center = Vec2::ZERO;

        // Static and kinematic bodies carry no mass
        if self.body_type != BodyType::Dynamic {
            self.world_center = self.xf.p;
            return;
        }

        let mut center = Vec2::ZERO;
        for fixture in &self.fixtures {
            if fixture.density == 0.0 {
                continue;
            }
            let md = fixture.shape.compute_mass(fixture.density);
            self.mass += md.mass;
            center += md.mass * md.center;
            self.inertia += md.inertia;
        }

        if self.mass > 0.0 {
            self.inv_mass = 1.0 / self.mass;
            center *= self.inv_mass;
        } else {
            // Dynamic bodies always have positive mass
            self.mass = 1.0;
            self.inv_mass = 1.0;
        }

        if self.inertia > 0.0 && !self.fixed_rotation {
            // Shift inertia to the center of mass
            self.inertia -= self.mass * center.length_squared();
            self.inv_inertia = 1.0 / self.inertia;
        } else {
            self.inertia = 0.0;
            self.inv_inertia = 0.0;
        }

        // The center of mass moved; preserve the velocity of the new center
        let old_center = self.world_center;
        self.local_center = center;
        self.world_center = self.xf.apply(center);
        self.linear_velocity += cross_sv(self.angular_velocity, self.world_center - old_center);
    }

    // ------------------------------------------------------------------
    // Proxy lifecycle
    // ------------------------------------------------------------------

    /// Create broad-phase proxies for every fixture child at the current
    /// transform. Requires that none exist.
    pub(crate) fn create_proxies(&mut self, broadphase: &mut BroadPhase) {
        let xf = self.xf;
        let slot = self.slot;
        for (f_idx, fixture) in self.fixtures.iter_mut().enumerate() {
            debug_assert!(fixture.proxies.is_empty());
            let children = fixture.shape.child_count();
            fixture.proxies.reserve(children);
            for child in 0..children {
                let aabb = fixture.shape.compute_aabb(&xf, child);
                let proxy = broadphase.create_proxy(
                    aabb,
                    ProxyTarget {
                        body: slot,
                        fixture: f_idx as u16,
                        child: child as u32,
                    },
                );
                fixture.proxies.push(proxy);
            }
        }
    }

    /// Destroy all broad-phase proxies.
    pub(crate) fn destroy_proxies(&mut self, broadphase: &mut BroadPhase) {
        for fixture in &mut self.fixtures {
            for proxy in fixture.proxies.drain(..) {
                broadphase.destroy_proxy(proxy);
            }
        }
    }

    /// Update proxies after movement with a swept AABB covering both the
    /// old and new transform, so fast bodies do not tunnel past thin
    /// static geometry between steps.
    pub(crate) fn synchronize_fixtures(&mut self, broadphase: &mut BroadPhase, xf_old: Transform2) {
        let xf_new = self.xf;
        let displacement = xf_new.p - xf_old.p;
        for fixture in &mut self.fixtures {
            for (child, &proxy) in fixture.proxies.iter().enumerate() {
                let aabb1 = fixture.shape.compute_aabb(&xf_old, child);
                let aabb2 = fixture.shape.compute_aabb(&xf_new, child);
                broadphase.move_proxy(proxy, aabb1.union(&aabb2), displacement);
            }
        }
    }

    /// Touch every proxy so the next pair update re-evaluates them.
    pub(crate) fn touch_proxies(&mut self, broadphase: &mut BroadPhase) {
        for fixture in &self.fixtures {
            for &proxy in &fixture.proxies {
                broadphase.touch_proxy(proxy);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::FixtureDef;
    use crate::shapes::Shape;

    fn dynamic_body() -> Body {
        let def = BodyDef {
            body_type: BodyType::Dynamic,
            ..BodyDef::default()
        };
        Body::new(&def, 0)
    }

    #[test]
    fn test_dynamic_mass_forced_to_one() {
        let mut body = dynamic_body();
        // No fixtures at all
        body.reset_mass_data();
        assert_eq!(body.mass(), 1.0);
        assert_eq!(body.inv_mass, 1.0);

        // A zero-density fixture contributes nothing either
        body.fixtures.push(Fixture::new(
            FixtureDef {
                density: 0.0,
                ..FixtureDef::new(Shape::circle(1.0).unwrap())
            },
            1.0,
        ));
        body.reset_mass_data();
        assert_eq!(body.mass(), 1.0);
    }

    #[test]
    fn test_static_mass_is_zero() {
        let def = BodyDef::default();
        let mut body = Body::new(&def, 0);
        body.fixtures
            .push(Fixture::new(FixtureDef::new(Shape::circle(1.0).unwrap()), 1.0));
        body.reset_mass_data();
        assert_eq!(body.mass(), 0.0);
        assert_eq!(body.inv_mass, 0.0);
        assert_eq!(body.inv_inertia, 0.0);
    }

    #[test]
    fn test_fixed_rotation_zeroes_inertia() {
        let mut body = dynamic_body();
        body.fixtures
            .push(Fixture::new(FixtureDef::new(Shape::circle(1.0).unwrap()), 1.0));
        body.reset_mass_data();
        assert!(body.inv_inertia > 0.0);

        body.set_fixed_rotation(true);
        assert_eq!(body.inv_inertia, 0.0);
        assert_eq!(body.angular_velocity(), 0.0);
    }

    #[test]
    fn test_sleep_zeroes_velocity() {
        let mut body = dynamic_body();
        body.set_linear_velocity(Vec2::new(3.0, 0.0));
        body.set_awake(false);
        assert_eq!(body.linear_velocity(), Vec2::ZERO);
        assert!(!body.is_awake());
        body.set_awake(true);
        assert_eq!(body.sleep_time, 0.0);
    }

    #[test]
    fn test_static_ignores_forces() {
        let def = BodyDef::default();
        let mut body = Body::new(&def, 0);
        body.apply_force(Vec2::new(10.0, 0.0), Vec2::ZERO);
        assert_eq!(body.total_force(), Vec2::ZERO);
        body.set_linear_velocity(Vec2::new(1.0, 0.0));
        assert_eq!(body.linear_velocity(), Vec2::ZERO);
    }

    #[test]
    fn test_impulse_changes_velocity_by_inv_mass() {
        let mut body = dynamic_body();
        body.fixtures
            .push(Fixture::new(FixtureDef::new(Shape::circle(1.0).unwrap()), 1.0));
        body.reset_mass_data();
        let m = body.mass();
        body.apply_linear_impulse(Vec2::new(m, 0.0), body.world_center());
        assert!((body.linear_velocity().x - 1.0).abs() < 1e-5);
    }
}
