//! Physics World
//!
//! Owns all bodies, joints, contacts and the broad-phase index, and runs
//! the step pipeline: pair reconciliation → narrow phase → island solve →
//! proxy synchronization → callbacks.
//!
//! # Locked-world contract
//!
//! `step` locks the world for its entire duration, including callback
//! dispatch. Structural mutation (create/destroy of bodies, fixtures or
//! joints) attempted while locked returns `PhysicsError::WorldLocked` and
//! leaves every list untouched. The flag is queryable via
//! [`PhysicsWorld::is_locked`] so host code can assert against violations.

use std::collections::{BTreeMap, HashSet};

use tracing::warn;

use crate::arena::Arena;
use crate::body::{Body, BodyDef, BodyHandle, BodyType};
use crate::broadphase::BroadPhase;
use crate::contact::{
    contact_key, mix_friction, mix_restitution, Contact, ContactKey, WorldManifold,
};
use crate::error::PhysicsError;
use crate::events::{CollisionData, ContactPointData, StepListener};
use crate::fixture::{Filter, Fixture, FixtureDef};
use crate::joints::{Joint, JointBodies, JointDef, JointHandle};
use crate::math::{Transform2, Vec2};
use crate::shapes::RayCastInput;
use crate::solver::{solve_island, Island, TimeStep};

/// A touching contact involving at least one sensor fixture.
#[derive(Clone, Copy, Debug)]
pub struct SensorTouch {
    pub body_a: BodyHandle,
    pub user_data_a: u64,
    pub group_a: u16,
    pub child_a: u32,
    pub body_b: BodyHandle,
    pub user_data_b: u64,
    pub group_b: u16,
    pub child_b: u32,
    /// Deepest manifold-point penetration this step
    pub max_penetration: f32,
}

/// A ray-cast hit reported through the world's callback protocol.
#[derive(Clone, Copy, Debug)]
pub struct RayCastHit {
    pub body: BodyHandle,
    pub fixture: usize,
    pub child: usize,
    /// Hit point in physics units
    pub point: Vec2,
    pub normal: Vec2,
    pub fraction: f32,
    /// Category bits of the hit child
    pub category: u16,
    pub user_data: u64,
}

/// The simulation container.
pub struct PhysicsWorld {
    bodies: Arena<Body>,
    joints: Arena<Joint>,
    contacts: BTreeMap<ContactKey, Contact>,
    broadphase: BroadPhase,
    gravity: Vec2,
    locked: bool,
    allow_sleeping: bool,
    /// Inverse dt of the previous sub-step, for warm-start scaling
    inv_dt0: f32,
    /// Minimum resolved impulse for a contact to be reported
    pub contact_report_threshold: f32,
}

impl PhysicsWorld {
    /// Create an empty world with the given gravity (physics units).
    #[must_use]
    pub fn new(gravity: Vec2) -> Self {
        Self {
            bodies: Arena::new(),
            joints: Arena::new(),
            contacts: BTreeMap::new(),
            broadphase: BroadPhase::new(),
            gravity,
            locked: false,
            allow_sleeping: true,
            inv_dt0: 0.0,
            contact_report_threshold: 0.0,
        }
    }

    #[inline]
    #[must_use]
    pub fn gravity(&self) -> Vec2 {
        self.gravity
    }

    #[inline]
    pub fn set_gravity(&mut self, gravity: Vec2) {
        self.gravity = gravity;
    }

    /// Whether a step is currently in progress.
    #[inline]
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Extend or release the lock around out-of-step callback dispatch.
    pub(crate) fn set_locked(&mut self, locked: bool) {
        self.locked = locked;
    }

    #[inline]
    #[must_use]
    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    #[inline]
    #[must_use]
    pub fn joint_count(&self) -> usize {
        self.joints.len()
    }

    #[inline]
    #[must_use]
    pub fn contact_count(&self) -> usize {
        self.contacts.len()
    }

    // ------------------------------------------------------------------
    // Body lifecycle
    // ------------------------------------------------------------------

    /// Create a body. Rejected while the world is locked.
    pub fn create_body(&mut self, def: &BodyDef) -> Result<BodyHandle, PhysicsError> {
        if self.locked {
            warn!("create_body rejected: world is locked");
            return Err(PhysicsError::WorldLocked);
        }
        let handle = self.bodies.insert(Body::new(def, 0));
        let slot = handle.index();
        self.bodies[handle].slot = slot;
        Ok(BodyHandle(handle))
    }

    /// Destroy a body along with its joints, contacts and fixtures.
    pub fn destroy_body(&mut self, handle: BodyHandle) -> Result<(), PhysicsError> {
        if self.locked {
            warn!("destroy_body rejected: world is locked");
            return Err(PhysicsError::WorldLocked);
        }
        if !self.bodies.contains(handle.0) {
            return Err(stale(handle.0));
        }

        // Joints never outlive either endpoint body
        let attached: Vec<JointHandle> = self
            .joints
            .iter()
            .filter(|(_, j)| j.body_a == handle || j.body_b == handle)
            .map(|(h, _)| JointHandle(h))
            .collect();
        for joint in attached {
            self.destroy_joint(joint)?;
        }

        self.drop_contacts_of_body(handle.index());
        let mut body = self.bodies.remove(handle.0).expect("checked above");
        body.destroy_proxies(&mut self.broadphase);
        Ok(())
    }

    #[inline]
    pub fn body(&self, handle: BodyHandle) -> Option<&Body> {
        self.bodies.get(handle.0)
    }

    #[inline]
    pub fn body_mut(&mut self, handle: BodyHandle) -> Option<&mut Body> {
        self.bodies.get_mut(handle.0)
    }

    /// Live handles of all bodies, in slot order.
    #[must_use]
    pub fn body_handles(&self) -> Vec<BodyHandle> {
        self.bodies.iter().map(|(h, _)| BodyHandle(h)).collect()
    }

    /// Move a body to a new pose and update its proxies immediately.
    pub fn set_body_transform(
        &mut self,
        handle: BodyHandle,
        position: Vec2,
        angle: f32,
    ) -> Result<(), PhysicsError> {
        if self.locked {
            warn!("set_body_transform rejected: world is locked");
            return Err(PhysicsError::WorldLocked);
        }
        let body = self.bodies.get_mut(handle.0).ok_or_else(|| stale(handle.0))?;
        let xf_old = body.transform();
        body.set_transform_internal(position, angle);
        body.synchronize_fixtures(&mut self.broadphase, xf_old);
        Ok(())
    }

    /// Activate or deactivate a body. Deactivation destroys the body's
    /// proxies and contacts; activation recreates proxies at the current
    /// transform.
    pub fn set_body_active(
        &mut self,
        handle: BodyHandle,
        active: bool,
    ) -> Result<(), PhysicsError> {
        if self.locked {
            warn!("set_body_active rejected: world is locked");
            return Err(PhysicsError::WorldLocked);
        }
        let Some(body) = self.bodies.get_mut(handle.0) else {
            return Err(stale(handle.0));
        };
        if body.active == active {
            return Ok(());
        }
        body.active = active;
        if active {
            body.create_proxies(&mut self.broadphase);
        } else {
            body.destroy_proxies(&mut self.broadphase);
            self.drop_contacts_of_body(handle.index());
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Fixture lifecycle
    // ------------------------------------------------------------------

    /// Attach a fixture to a body. Returns the fixture index.
    pub fn create_fixture(
        &mut self,
        handle: BodyHandle,
        def: FixtureDef,
    ) -> Result<usize, PhysicsError> {
        self.create_fixture_scaled(handle, def, 1.0)
    }

    /// Attach a fixture whose shape was baked at the given creation scale.
    pub fn create_fixture_scaled(
        &mut self,
        handle: BodyHandle,
        def: FixtureDef,
        creation_scale: f32,
    ) -> Result<usize, PhysicsError> {
        if self.locked {
            warn!("create_fixture rejected: world is locked");
            return Err(PhysicsError::WorldLocked);
        }
        if def.shape.child_count() == 0 {
            warn!("create_fixture rejected: shape has no children");
            return Err(PhysicsError::InvalidRequest {
                reason: "shape has no children",
            });
        }
        let body = self.bodies.get_mut(handle.0).ok_or_else(|| stale(handle.0))?;

        let mut fixture = Fixture::new(def, creation_scale);
        let index = body.fixtures.len();
        if body.active {
            let xf = body.transform();
            for child in 0..fixture.shape.child_count() {
                let aabb = fixture.shape.compute_aabb(&xf, child);
                let proxy = self.broadphase.create_proxy(
                    aabb,
                    crate::broadphase::ProxyTarget {
                        body: body.slot,
                        fixture: index as u16,
                        child: child as u32,
                    },
                );
                fixture.proxies.push(proxy);
            }
        }
        body.fixtures.push(fixture);
        body.reset_mass_data();
        Ok(index)
    }

    /// Remove a fixture. Remaining fixtures are re-indexed, so the body's
    /// proxies and contacts are rebuilt.
    pub fn destroy_fixture(
        &mut self,
        handle: BodyHandle,
        index: usize,
    ) -> Result<(), PhysicsError> {
        if self.locked {
            warn!("destroy_fixture rejected: world is locked");
            return Err(PhysicsError::WorldLocked);
        }
        let Some(body) = self.bodies.get_mut(handle.0) else {
            return Err(stale(handle.0));
        };
        if index >= body.fixtures.len() {
            return Err(PhysicsError::InvalidRequest {
                reason: "fixture index out of range",
            });
        }
        body.destroy_proxies(&mut self.broadphase);
        body.fixtures.remove(index);
        if body.active {
            body.create_proxies(&mut self.broadphase);
        }
        body.reset_mass_data();
        self.drop_contacts_of_body(handle.index());
        Ok(())
    }

    /// Reassign the collision filter of one fixture child and re-evaluate
    /// its pairs.
    pub fn set_filter(
        &mut self,
        handle: BodyHandle,
        fixture: usize,
        child: usize,
        filter: Filter,
    ) -> Result<(), PhysicsError> {
        let slot = handle.index();
        let Some(body) = self.bodies.get_mut(handle.0) else {
            return Err(stale(handle.0));
        };
        let Some(fix) = body.fixtures.get_mut(fixture) else {
            return Err(PhysicsError::InvalidRequest {
                reason: "fixture index out of range",
            });
        };
        fix.set_filter(child, filter);
        if let Some(&proxy) = fix.proxies.get(child) {
            self.broadphase.touch_proxy(proxy);
        }
        // Existing contacts re-check their filters next step
        for contact in self.contacts.values_mut() {
            let hits_a = contact.target_a.body == slot
                && contact.target_a.fixture as usize == fixture
                && contact.target_a.child as usize == child;
            let hits_b = contact.target_b.body == slot
                && contact.target_b.fixture as usize == fixture
                && contact.target_b.child as usize == child;
            if hits_a || hits_b {
                contact.refilter = true;
            }
        }
        Ok(())
    }

    /// Destroy the tracked contacts of one fixture (all children), e.g.
    /// when a tile grid is disabled.
    pub fn purge_fixture_contacts(&mut self, handle: BodyHandle, fixture: usize) {
        let slot = handle.index();
        self.contacts.retain(|_, c| {
            !((c.target_a.body == slot && c.target_a.fixture as usize == fixture)
                || (c.target_b.body == slot && c.target_b.fixture as usize == fixture))
        });
    }

    /// Touch all proxies of a body so pairs are re-evaluated next step.
    pub fn touch_body_proxies(&mut self, handle: BodyHandle) {
        if let Some(body) = self.bodies.get_mut(handle.0) {
            body.touch_proxies(&mut self.broadphase);
        }
    }

    /// Touch the proxy of one fixture child (e.g. a mutated grid cell).
    pub fn touch_fixture_child(&mut self, handle: BodyHandle, fixture: usize, child: usize) {
        if let Some(body) = self.bodies.get(handle.0) {
            if let Some(&proxy) = body
                .fixtures
                .get(fixture)
                .and_then(|f| f.proxies.get(child))
            {
                self.broadphase.touch_proxy(proxy);
            }
        }
    }

    // ------------------------------------------------------------------
    // Joint lifecycle
    // ------------------------------------------------------------------

    /// Create a joint. Both bodies are woken.
    pub fn create_joint(&mut self, def: &JointDef) -> Result<JointHandle, PhysicsError> {
        if self.locked {
            warn!("create_joint rejected: world is locked");
            return Err(PhysicsError::WorldLocked);
        }
        if !self.bodies.contains(def.body_a.0) || !self.bodies.contains(def.body_b.0) {
            return Err(PhysicsError::InvalidRequest {
                reason: "joint endpoint body does not exist",
            });
        }
        if def.body_a == def.body_b {
            warn!("create_joint rejected: both endpoints are the same body");
            return Err(PhysicsError::InvalidRequest {
                reason: "joint endpoints must differ",
            });
        }
        let handle = JointHandle(self.joints.insert(Joint::new(def)));

        for endpoint in [def.body_a, def.body_b] {
            if let Some(body) = self.bodies.get_mut(endpoint.0) {
                body.set_awake(true);
            }
        }

        // A collide-connected=false joint vetoes existing contacts between
        // the endpoints; mark them for refiltering
        if !def.collide_connected {
            let (sa, sb) = (def.body_a.index(), def.body_b.index());
            for contact in self.contacts.values_mut() {
                let (ca, cb) = (contact.target_a.body, contact.target_b.body);
                if (ca == sa && cb == sb) || (ca == sb && cb == sa) {
                    contact.refilter = true;
                }
            }
        }
        Ok(handle)
    }

    /// Destroy a joint, waking both endpoint bodies.
    pub fn destroy_joint(&mut self, handle: JointHandle) -> Result<(), PhysicsError> {
        if self.locked {
            warn!("destroy_joint rejected: world is locked");
            return Err(PhysicsError::WorldLocked);
        }
        let joint = self.joints.remove(handle.0).ok_or_else(|| stale(handle.0))?;

        let collide_connected = joint.collide_connected;
        for endpoint in [joint.body_a, joint.body_b] {
            if let Some(body) = self.bodies.get_mut(endpoint.0) {
                body.set_awake(true);
                // Pairs the joint vetoed can now form contacts
                if !collide_connected {
                    body.touch_proxies(&mut self.broadphase);
                }
            }
        }
        Ok(())
    }

    #[inline]
    pub fn joint(&self, handle: JointHandle) -> Option<&Joint> {
        self.joints.get(handle.0)
    }

    #[inline]
    pub fn joint_mut(&mut self, handle: JointHandle) -> Option<&mut Joint> {
        self.joints.get_mut(handle.0)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Cast a segment through the world. The callback controls the search:
    /// return -1 to ignore the hit and continue, 0 to terminate, the hit
    /// fraction to clip to the closest hit so far, or 1 to continue
    /// unclipped (collect every hit). Sensors never report.
    pub fn ray_cast<F: FnMut(&RayCastHit) -> f32>(&self, p1: Vec2, p2: Vec2, mut callback: F) {
        let bodies = &self.bodies;
        self.broadphase.ray_cast(p1, p2, 1.0, |proxy, max_fraction| {
            let target = self.broadphase.target(proxy);
            let Some(body) = bodies.get_by_index(target.body) else {
                return -1.0;
            };
            let Some(fixture) = body.fixtures.get(target.fixture as usize) else {
                return -1.0;
            };
            // Ray casts never hit triggers
            if fixture.sensor {
                return -1.0;
            }
            let input = RayCastInput {
                p1,
                p2,
                max_fraction,
            };
            let Some(hit) = fixture
                .shape
                .ray_cast(&input, &body.transform(), target.child as usize)
            else {
                return -1.0;
            };
            let Some(handle) = bodies.handle_of(target.body) else {
                return -1.0;
            };
            let data = RayCastHit {
                body: BodyHandle(handle),
                fixture: target.fixture as usize,
                child: target.child as usize,
                point: p1 + hit.fraction * (p2 - p1),
                normal: hit.normal,
                fraction: hit.fraction,
                category: fixture.filter(target.child as usize).category,
                user_data: body.user_data,
            };
            callback(&data)
        });
    }

    /// Visit every fixture child whose fat AABB overlaps the query box.
    /// Return false from the callback to stop.
    pub fn query_aabb<F: FnMut(BodyHandle, usize, usize) -> bool>(
        &self,
        aabb: &crate::math::Aabb,
        mut callback: F,
    ) {
        let bodies = &self.bodies;
        self.broadphase.query(aabb, |proxy| {
            let target = self.broadphase.target(proxy);
            let Some(handle) = bodies.handle_of(target.body) else {
                return true;
            };
            callback(
                BodyHandle(handle),
                target.fixture as usize,
                target.child as usize,
            )
        });
    }

    /// Iterate the tracked contacts (for trigger reconciliation).
    pub fn contacts(&self) -> impl Iterator<Item = &Contact> {
        self.contacts.values()
    }

    /// Snapshot of every touching contact that involves a sensor fixture,
    /// with the data the trigger layer needs for its overlap cache.
    #[must_use]
    pub fn sensor_touches(&self) -> Vec<SensorTouch> {
        let mut touches = Vec::new();
        for contact in self.contacts.values() {
            if !contact.touching || !contact.sensor {
                continue;
            }
            let (Some(ha), Some(hb)) = (
                self.bodies.handle_of(contact.target_a.body),
                self.bodies.handle_of(contact.target_b.body),
            ) else {
                continue;
            };
            let Some(body_a) = self.bodies.get_by_index(contact.target_a.body) else {
                continue;
            };
            let Some(body_b) = self.bodies.get_by_index(contact.target_b.body) else {
                continue;
            };
            let Some(fixture_a) = body_a.fixtures.get(contact.target_a.fixture as usize) else {
                continue;
            };
            let Some(fixture_b) = body_b.fixtures.get(contact.target_b.fixture as usize) else {
                continue;
            };
            touches.push(SensorTouch {
                body_a: BodyHandle(ha),
                user_data_a: body_a.user_data,
                group_a: fixture_a.filter(contact.target_a.child as usize).category,
                child_a: contact.target_a.child,
                body_b: BodyHandle(hb),
                user_data_b: body_b.user_data,
                group_b: fixture_b.filter(contact.target_b.child as usize).category,
                child_b: contact.target_b.child,
                max_penetration: contact.manifold.max_penetration(),
            });
        }
        touches
    }

    /// Recompute a body's proxies in place (e.g. after its shapes were
    /// flipped or rescaled without a transform change).
    pub fn refresh_body_proxies(&mut self, handle: BodyHandle) {
        let Self {
            bodies, broadphase, ..
        } = self;
        if let Some(body) = bodies.get_mut(handle.0) {
            let xf = body.transform();
            body.synchronize_fixtures(broadphase, xf);
        }
    }

    // ------------------------------------------------------------------
    // Stepping
    // ------------------------------------------------------------------

    /// Advance the simulation by `dt` seconds. Callbacks on `listener`
    /// fire synchronously while the world is still locked.
    pub fn step(
        &mut self,
        dt: f32,
        velocity_iterations: u32,
        position_iterations: u32,
        listener: &mut dyn StepListener,
    ) {
        if self.locked {
            warn!("step rejected: world is already locked");
            return;
        }
        self.locked = true;

        // Reconcile broad-phase pairs into contacts, then run the narrow
        // phase over everything still tracked
        self.update_pairs();
        self.collide();

        let inv_dt = if dt > 0.0 { 1.0 / dt } else { 0.0 };
        let step = TimeStep {
            dt,
            inv_dt,
            dt_ratio: self.inv_dt0 * dt,
            velocity_iterations,
            position_iterations,
            warm_starting: true,
        };

        if dt > 0.0 {
            self.solve(&step);
            self.inv_dt0 = inv_dt;
        }

        // Fire touch callbacks while still locked
        self.report_contacts(listener);
        self.locked = false;
    }

    /// Turn fresh broad-phase pairs into contacts, applying the
    /// should-collide policy: at least one dynamic body, category/mask
    /// filters pass, and no collide-connected=false joint between the
    /// bodies.
    fn update_pairs(&mut self) {
        let Self {
            broadphase,
            bodies,
            joints,
            contacts,
            ..
        } = self;
        broadphase.update_pairs(|proxy_a, target_a, proxy_b, target_b| {
            if target_a.body == target_b.body {
                return;
            }
            let key = contact_key(proxy_a, proxy_b);
            if contacts.contains_key(&key) {
                return;
            }
            if !pair_allowed(bodies, joints, target_a.body, target_b.body) {
                return;
            }
            let Some(body_a) = bodies.get_by_index(target_a.body) else {
                return;
            };
            let Some(body_b) = bodies.get_by_index(target_b.body) else {
                return;
            };
            let Some(fixture_a) = body_a.fixtures.get(target_a.fixture as usize) else {
                return;
            };
            let Some(fixture_b) = body_b.fixtures.get(target_b.fixture as usize) else {
                return;
            };
            let filter_a = fixture_a.filter(target_a.child as usize);
            let filter_b = fixture_b.filter(target_b.child as usize);
            if !Filter::should_collide(&filter_a, &filter_b) {
                return;
            }
            contacts.insert(
                key,
                Contact::new(
                    target_a,
                    target_b,
                    proxy_a,
                    proxy_b,
                    mix_friction(fixture_a.friction, fixture_b.friction),
                    mix_restitution(fixture_a.restitution, fixture_b.restitution),
                    fixture_a.sensor || fixture_b.sensor,
                    fixture_a.shape.surface_radius(),
                    fixture_b.shape.surface_radius(),
                ),
            );
        });
    }

    /// Narrow phase: update manifolds of every tracked contact, destroying
    /// the ones whose pair disappeared, failed a refilter, or lost a body.
    fn collide(&mut self) {
        let Self {
            broadphase,
            bodies,
            joints,
            contacts,
            ..
        } = self;
        contacts.retain(|_, contact| {
            let Some(body_a) = bodies.get_by_index(contact.target_a.body) else {
                return false;
            };
            let Some(body_b) = bodies.get_by_index(contact.target_b.body) else {
                return false;
            };
            if !body_a.active || !body_b.active {
                return false;
            }
            let Some(fixture_a) = body_a.fixtures.get(contact.target_a.fixture as usize) else {
                return false;
            };
            let Some(fixture_b) = body_b.fixtures.get(contact.target_b.fixture as usize) else {
                return false;
            };

            if contact.refilter {
                contact.refilter = false;
                if !pair_allowed(bodies, joints, contact.target_a.body, contact.target_b.body) {
                    return false;
                }
                let filter_a = fixture_a.filter(contact.target_a.child as usize);
                let filter_b = fixture_b.filter(contact.target_b.child as usize);
                if !Filter::should_collide(&filter_a, &filter_b) {
                    return false;
                }
            }

            // Sleeping pairs keep their state without re-evaluation
            let awake_a = body_a.awake && body_a.body_type != BodyType::Static;
            let awake_b = body_b.awake && body_b.body_type != BodyType::Static;
            if !awake_a && !awake_b {
                return true;
            }

            // The broad-phase pair vanished: drop the contact
            if !broadphase.test_overlap(contact.proxy_a, contact.proxy_b) {
                return false;
            }

            contact.update(
                &fixture_a.shape,
                &body_a.transform(),
                &fixture_b.shape,
                &body_b.transform(),
            );
            true
        });
    }

    /// Build and solve islands, then synchronize proxies of moved bodies.
    fn solve(&mut self, step: &TimeStep) {
        // Old transforms for swept-AABB proxy updates
        let old_transforms: Vec<(u32, Transform2)> = self
            .bodies
            .iter()
            .filter(|(_, b)| b.active && b.awake && b.body_type != BodyType::Static)
            .map(|(h, b)| (h.index(), b.transform()))
            .collect();

        let bound = self.bodies.slot_bound();

        // Adjacency scratch: contacts and joints per body slot
        let mut body_contacts: Vec<Vec<ContactKey>> = vec![Vec::new(); bound];
        for (&key, contact) in &self.contacts {
            if contact.touching && !contact.sensor {
                body_contacts[contact.target_a.body as usize].push(key);
                body_contacts[contact.target_b.body as usize].push(key);
            }
        }
        let mut body_joints: Vec<Vec<u32>> = vec![Vec::new(); bound];
        for (handle, joint) in self.joints.iter() {
            body_joints[joint.body_a.index() as usize].push(handle.index());
            body_joints[joint.body_b.index() as usize].push(handle.index());
        }

        for (_, body) in self.bodies.iter_mut() {
            body.island_index = -1;
        }
        for (_, joint) in self.joints.iter_mut() {
            joint.island_flag = false;
        }
        let mut contact_in_island: HashSet<ContactKey> = HashSet::new();

        let seeds: Vec<u32> = self
            .bodies
            .iter()
            .filter(|(_, b)| b.active && b.awake && b.body_type != BodyType::Static)
            .map(|(h, _)| h.index())
            .collect();

        let mut stack: Vec<u32> = Vec::new();
        for seed in seeds {
            if self
                .bodies
                .get_by_index(seed)
                .map_or(true, |b| b.island_index != -1 || !b.awake)
            {
                continue;
            }

            let mut island = Island::default();
            stack.clear();
            stack.push(seed);

            while let Some(slot) = stack.pop() {
                {
                    let body = self.bodies.get_by_index_mut(slot).expect("island body");
                    if body.island_index != -1 {
                        continue;
                    }
                    body.island_index = island.bodies.len() as i32;
                    body.set_awake(true);
                }
                island.bodies.push(slot);

                // Static bodies anchor the island but do not grow it
                if self.bodies.get_by_index(slot).expect("island body").body_type
                    == BodyType::Static
                {
                    continue;
                }

                for &key in &body_contacts[slot as usize] {
                    if contact_in_island.contains(&key) {
                        continue;
                    }
                    let Some(contact) = self.contacts.get(&key) else {
                        continue;
                    };
                    contact_in_island.insert(key);
                    island.contacts.push(key);
                    let other = if contact.target_a.body == slot {
                        contact.target_b.body
                    } else {
                        contact.target_a.body
                    };
                    if self
                        .bodies
                        .get_by_index(other)
                        .is_some_and(|b| b.island_index == -1)
                    {
                        stack.push(other);
                    }
                }

                for &joint_slot in &body_joints[slot as usize] {
                    let Some(joint) = self.joints.get_by_index(joint_slot) else {
                        continue;
                    };
                    if joint.island_flag {
                        continue;
                    }
                    let other_handle = if joint.body_a.index() == slot {
                        joint.body_b
                    } else {
                        joint.body_a
                    };
                    let Some(other) = self.bodies.get(other_handle.0) else {
                        continue;
                    };
                    if !other.active {
                        continue;
                    }
                    self.joints
                        .get_by_index_mut(joint_slot)
                        .expect("island joint")
                        .island_flag = true;
                    island.joints.push(joint_slot);
                    if other.island_index == -1 {
                        stack.push(other_handle.index());
                    }
                }
            }

            // Capture per-joint body data now that island indices are final
            for &joint_slot in &island.joints {
                let captured = {
                    let joint = self.joints.get_by_index(joint_slot).expect("island joint");
                    let body_a = self.bodies.get(joint.body_a.0).expect("joint body");
                    let body_b = self.bodies.get(joint.body_b.0).expect("joint body");
                    JointBodies::capture(body_a, body_b)
                };
                self.joints
                    .get_by_index_mut(joint_slot)
                    .expect("island joint")
                    .bodies = captured;
            }

            solve_island(
                &island,
                step,
                self.gravity,
                self.allow_sleeping,
                &mut self.bodies,
                &mut self.contacts,
                &mut self.joints,
            );

            // Statics may anchor several islands; release them
            for &slot in &island.bodies {
                let body = self.bodies.get_by_index_mut(slot).expect("island body");
                if body.body_type == BodyType::Static {
                    body.island_index = -1;
                }
            }
        }

        // Move proxies with swept AABBs covering both poses
        let Self {
            bodies, broadphase, ..
        } = self;
        for (slot, xf_old) in old_transforms {
            let Some(body) = bodies.get_by_index_mut(slot) else {
                continue;
            };
            if body.island_index == -1 {
                continue;
            }
            body.synchronize_fixtures(broadphase, xf_old);
        }
    }

    /// Fire collision and contact-point callbacks for touching solid
    /// contacts whose resolved impulse clears the reporting threshold.
    fn report_contacts(&mut self, listener: &mut dyn StepListener) {
        let mut collisions: Vec<CollisionData> = Vec::new();
        let mut points: Vec<ContactPointData> = Vec::new();

        for contact in self.contacts.values() {
            if !contact.touching || contact.sensor {
                continue;
            }
            let max_impulse = contact.manifold.points[..contact.manifold.count]
                .iter()
                .fold(0.0_f32, |acc, p| acc.max(p.normal_impulse));
            if max_impulse < self.contact_report_threshold {
                continue;
            }
            let Some(body_a) = self.bodies.get_by_index(contact.target_a.body) else {
                continue;
            };
            let Some(body_b) = self.bodies.get_by_index(contact.target_b.body) else {
                continue;
            };
            let Some(fixture_a) = body_a.fixtures.get(contact.target_a.fixture as usize) else {
                continue;
            };
            let Some(fixture_b) = body_b.fixtures.get(contact.target_b.fixture as usize) else {
                continue;
            };
            let group_a = fixture_a.filter(contact.target_a.child as usize).category;
            let group_b = fixture_b.filter(contact.target_b.child as usize).category;

            collisions.push(CollisionData {
                user_data_a: body_a.user_data,
                category_a: group_a,
                user_data_b: body_b.user_data,
                category_b: group_b,
            });

            let wm = WorldManifold::new(
                &contact.manifold,
                &body_a.transform(),
                contact.radius_a,
                &body_b.transform(),
                contact.radius_b,
            );
            for i in 0..contact.manifold.count {
                points.push(ContactPointData {
                    position_a: wm.points[i],
                    position_b: wm.points[i],
                    user_data_a: body_a.user_data,
                    user_data_b: body_b.user_data,
                    normal: wm.normal,
                    relative_velocity: body_b.linear_velocity - body_a.linear_velocity,
                    distance: contact.manifold.points[i].penetration,
                    applied_impulse: contact.manifold.points[i].normal_impulse,
                    mass_a: body_a.mass,
                    mass_b: body_b.mass,
                    group_a,
                    group_b,
                });
            }
        }

        for data in &collisions {
            listener.collision(self, data);
        }
        for data in &points {
            listener.contact_point(self, data);
        }
    }

    fn drop_contacts_of_body(&mut self, slot: u32) {
        self.contacts
            .retain(|_, c| c.target_a.body != slot && c.target_b.body != slot);
    }
}

fn stale(handle: crate::arena::Handle) -> PhysicsError {
    PhysicsError::StaleHandle {
        index: handle.index(),
        generation: handle.generation(),
    }
}

/// Body-level collision policy: at least one body must be dynamic, and a
/// connecting joint with collide-connected=false vetoes the pair.
fn pair_allowed(bodies: &Arena<Body>, joints: &Arena<Joint>, slot_a: u32, slot_b: u32) -> bool {
    let (Some(handle_a), Some(handle_b)) = (bodies.handle_of(slot_a), bodies.handle_of(slot_b))
    else {
        return false;
    };
    let (Some(body_a), Some(body_b)) = (bodies.get_by_index(slot_a), bodies.get_by_index(slot_b))
    else {
        return false;
    };
    if body_a.body_type() != BodyType::Dynamic && body_b.body_type() != BodyType::Dynamic {
        return false;
    }
    let (ha, hb) = (BodyHandle(handle_a), BodyHandle(handle_b));
    for (_, joint) in joints.iter() {
        if joint.connects(ha, hb) && !joint.collide_connected() {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoopListener;
    use crate::shapes::Shape;

    fn dynamic_def(x: f32, y: f32) -> BodyDef {
        BodyDef {
            body_type: BodyType::Dynamic,
            position: Vec2::new(x, y),
            ..BodyDef::default()
        }
    }

    fn circle_fixture() -> FixtureDef {
        FixtureDef::new(Shape::circle(0.5).unwrap())
    }

    #[test]
    fn test_create_destroy_body() {
        let mut world = PhysicsWorld::new(Vec2::new(0.0, -10.0));
        let body = world.create_body(&dynamic_def(0.0, 0.0)).unwrap();
        world.create_fixture(body, circle_fixture()).unwrap();
        assert_eq!(world.body_count(), 1);

        world.destroy_body(body).unwrap();
        assert_eq!(world.body_count(), 0);
        // Stale handle detected
        assert!(world.destroy_body(body).is_err());
    }

    #[test]
    fn test_free_fall() {
        let mut world = PhysicsWorld::new(Vec2::new(0.0, -10.0));
        let body = world.create_body(&dynamic_def(0.0, 100.0)).unwrap();
        world.create_fixture(body, circle_fixture()).unwrap();

        for _ in 0..60 {
            world.step(1.0 / 60.0, 8, 3, &mut NoopListener);
        }
        let b = world.body(body).unwrap();
        assert!(b.position().y < 100.0, "body did not fall: {}", b.position().y);
        assert!(b.linear_velocity().y < 0.0);
    }

    #[test]
    fn test_idle_world_is_bitwise_stable() {
        let mut world = PhysicsWorld::new(Vec2::ZERO);
        let body = world
            .create_body(&BodyDef {
                body_type: BodyType::Dynamic,
                position: Vec2::new(3.25, -7.5),
                angle: 0.625,
                ..BodyDef::default()
            })
            .unwrap();
        world.create_fixture(body, circle_fixture()).unwrap();

        let before = (world.body(body).unwrap().position(), world.body(body).unwrap().angle());
        for _ in 0..10 {
            world.step(1.0 / 60.0, 8, 3, &mut NoopListener);
        }
        let after = (world.body(body).unwrap().position(), world.body(body).unwrap().angle());
        assert_eq!(before.0, after.0, "position drifted in an idle world");
        assert_eq!(before.1, after.1, "angle drifted in an idle world");
    }

    #[test]
    fn test_ball_rests_on_ground() {
        let mut world = PhysicsWorld::new(Vec2::new(0.0, -10.0));
        let ground = world
            .create_body(&BodyDef {
                body_type: BodyType::Static,
                position: Vec2::new(0.0, -1.0),
                ..BodyDef::default()
            })
            .unwrap();
        world
            .create_fixture(ground, FixtureDef::new(Shape::box_shape(20.0, 1.0).unwrap()))
            .unwrap();

        let ball = world.create_body(&dynamic_def(0.0, 2.0)).unwrap();
        world.create_fixture(ball, circle_fixture()).unwrap();

        for _ in 0..180 {
            world.step(1.0 / 60.0, 8, 3, &mut NoopListener);
        }
        let b = world.body(ball).unwrap();
        // Ball radius 0.5 resting on ground top (y=0): center near 0.5
        assert!(
            (b.position().y - 0.5).abs() < 0.03,
            "ball should rest on the ground, y = {}",
            b.position().y
        );
        assert!(b.linear_velocity().length() < 0.1, "ball should be at rest");
    }

    #[test]
    fn test_body_falls_asleep() {
        let mut world = PhysicsWorld::new(Vec2::new(0.0, -10.0));
        let ground = world
            .create_body(&BodyDef {
                body_type: BodyType::Static,
                position: Vec2::new(0.0, -1.0),
                ..BodyDef::default()
            })
            .unwrap();
        world
            .create_fixture(ground, FixtureDef::new(Shape::box_shape(20.0, 1.0).unwrap()))
            .unwrap();
        let ball = world.create_body(&dynamic_def(0.0, 0.5)).unwrap();
        world.create_fixture(ball, circle_fixture()).unwrap();

        for _ in 0..240 {
            world.step(1.0 / 60.0, 8, 3, &mut NoopListener);
        }
        let b = world.body(ball).unwrap();
        assert!(!b.is_awake(), "settled body should be asleep");
        assert_eq!(b.linear_velocity(), Vec2::ZERO, "sleep zeroes velocity");
    }

    #[test]
    fn test_static_pair_creates_no_contact() {
        let mut world = PhysicsWorld::new(Vec2::ZERO);
        for x in [0.0, 0.25] {
            let body = world
                .create_body(&BodyDef {
                    position: Vec2::new(x, 0.0),
                    ..BodyDef::default()
                })
                .unwrap();
            world.create_fixture(body, circle_fixture()).unwrap();
        }
        world.step(1.0 / 60.0, 8, 3, &mut NoopListener);
        assert_eq!(world.contact_count(), 0, "static-static pairs are filtered");
    }

    #[test]
    fn test_locked_world_rejects_mutation() {
        struct Meddler {
            rejected: bool,
        }
        impl StepListener for Meddler {
            fn collision(&mut self, world: &mut PhysicsWorld, _data: &CollisionData) {
                let result = world.create_body(&BodyDef::default());
                self.rejected = matches!(result, Err(PhysicsError::WorldLocked));
            }
        }

        let mut world = PhysicsWorld::new(Vec2::new(0.0, -10.0));
        let ground = world
            .create_body(&BodyDef {
                body_type: BodyType::Static,
                position: Vec2::new(0.0, -1.0),
                ..BodyDef::default()
            })
            .unwrap();
        world
            .create_fixture(ground, FixtureDef::new(Shape::box_shape(20.0, 1.0).unwrap()))
            .unwrap();
        let ball = world.create_body(&dynamic_def(0.0, 0.4)).unwrap();
        world.create_fixture(ball, circle_fixture()).unwrap();

        let mut listener = Meddler { rejected: false };
        let bodies_before = world.body_count();
        for _ in 0..10 {
            world.step(1.0 / 60.0, 8, 3, &mut listener);
        }
        assert!(listener.rejected, "collision callback never fired or was not rejected");
        assert_eq!(world.body_count(), bodies_before, "list corrupted by rejected create");
        assert!(!world.is_locked(), "lock released after step");
    }

    #[test]
    fn test_joint_collide_connected_veto() {
        let mut world = PhysicsWorld::new(Vec2::ZERO);
        let a = world.create_body(&dynamic_def(0.0, 0.0)).unwrap();
        world.create_fixture(a, circle_fixture()).unwrap();
        let b = world.create_body(&dynamic_def(0.25, 0.0)).unwrap();
        world.create_fixture(b, circle_fixture()).unwrap();

        world
            .create_joint(&JointDef {
                body_a: a,
                body_b: b,
                local_anchor_a: Vec2::ZERO,
                local_anchor_b: Vec2::ZERO,
                collide_connected: false,
                params: crate::joints::JointParams::Distance(
                    crate::joints::DistanceJointDef {
                        length: 0.25,
                        frequency_hz: 0.0,
                        damping_ratio: 0.0,
                    },
                ),
            })
            .unwrap();

        world.step(1.0 / 60.0, 8, 3, &mut NoopListener);
        assert_eq!(
            world.contact_count(),
            0,
            "collide-connected=false must veto the contact"
        );
    }

    #[test]
    fn test_ray_cast_closest() {
        let mut world = PhysicsWorld::new(Vec2::ZERO);
        for x in [2.0, 5.0, 8.0] {
            let body = world
                .create_body(&BodyDef {
                    body_type: BodyType::Dynamic,
                    position: Vec2::new(x, 0.0),
                    ..BodyDef::default()
                })
                .unwrap();
            world.create_fixture(body, circle_fixture()).unwrap();
        }

        let mut closest: Option<RayCastHit> = None;
        world.ray_cast(Vec2::new(-1.0, 0.0), Vec2::new(10.0, 0.0), |hit| {
            closest = Some(*hit);
            hit.fraction
        });
        let hit = closest.expect("ray should hit");
        // First circle at x=2 with radius 0.5: entry at x=1.5
        assert!((hit.point.x - 1.5).abs() < 1e-3, "hit.x = {}", hit.point.x);
    }

    #[test]
    fn test_ray_cast_ignores_sensors() {
        let mut world = PhysicsWorld::new(Vec2::ZERO);
        let sensor = world.create_body(&dynamic_def(2.0, 0.0)).unwrap();
        world
            .create_fixture(
                sensor,
                FixtureDef {
                    sensor: true,
                    ..circle_fixture()
                },
            )
            .unwrap();

        let mut hits = 0;
        world.ray_cast(Vec2::new(-1.0, 0.0), Vec2::new(10.0, 0.0), |_| {
            hits += 1;
            1.0
        });
        assert_eq!(hits, 0, "sensors must never report ray hits");
    }

    #[test]
    fn test_deactivate_drops_contacts_and_proxies() {
        let mut world = PhysicsWorld::new(Vec2::new(0.0, -10.0));
        let ground = world
            .create_body(&BodyDef {
                body_type: BodyType::Static,
                position: Vec2::new(0.0, -1.0),
                ..BodyDef::default()
            })
            .unwrap();
        world
            .create_fixture(ground, FixtureDef::new(Shape::box_shape(20.0, 1.0).unwrap()))
            .unwrap();
        let ball = world.create_body(&dynamic_def(0.0, 0.4)).unwrap();
        world.create_fixture(ball, circle_fixture()).unwrap();

        for _ in 0..5 {
            world.step(1.0 / 60.0, 8, 3, &mut NoopListener);
        }
        assert!(world.contact_count() > 0);

        world.set_body_active(ball, false).unwrap();
        assert_eq!(world.contact_count(), 0, "deactivation destroys contacts");
        world.step(1.0 / 60.0, 8, 3, &mut NoopListener);
        let b = world.body(ball).unwrap();
        assert!(b.fixtures()[0].proxies.is_empty(), "inactive body holds no proxies");
    }
}
