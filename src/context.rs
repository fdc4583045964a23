//! Engine Integration Layer
//!
//! [`PhysicsContext`] owns a bounded pool of [`SimWorld`]s and the unit
//! conversion between the host engine's world units and the physics
//! engine's internal space (iterative solvers are numerically happier near
//! unit scale). Every position, length and velocity crossing the boundary
//! is multiplied or divided by the scale factor consistently; normals and
//! fractions are never scaled.
//!
//! [`SimWorld::step_world`] drives a full frame:
//!
//! 1. Pull authoritative transforms from the game-object layer for
//!    kinematic bodies (and, when enabled, dynamic bodies, including a
//!    uniform-scale re-sync of their shapes)
//! 2. Run a fixed number of fixed-length sub-steps, decoupling solver
//!    stability from the render frame rate
//! 3. Push solved transforms back for awake dynamic bodies
//! 4. Execute queued ray casts and report them
//! 5. Report sensor contacts and reconcile the trigger overlap cache
//!
//! The physics world stays locked for the whole frame call, so callback
//! code cannot corrupt solver state by creating or destroying objects.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::arena::Arena;
use crate::body::{BodyDef, BodyHandle, BodyType};
use crate::error::PhysicsError;
use crate::events::{RayCastRequest, RayCastResponse, StepListener, TriggerData};
use crate::fixture::{Filter, FixtureDef};
use crate::joints::{JointDef, JointHandle, JointParams};
use crate::math::{Transform2, Vec2};
use crate::overlap::{OverlapAdd, OverlapCache, OverlapKey, OverlapSide};
use crate::shapes::{GridCell, Shape, EMPTY_CELL};
use crate::world::PhysicsWorld;

/// Smallest allowed unit scale factor.
pub const MIN_SCALE: f32 = 0.01;
/// Largest allowed unit scale factor.
pub const MAX_SCALE: f32 = 1.0;

/// Fixed simulation timestep the sub-stepping divides.
const FIXED_TIMESTEP: f32 = 1.0 / 60.0;

/// Positional pull deltas below this (scaled) are treated as noise.
const POSITION_EPSILON: f32 = 0.00005;
/// Angular pull deltas below this are treated as noise (~1/250 degree).
const ROTATION_EPSILON: f32 = 0.00007;

/// Identifier of a world inside a context.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WorldId(crate::arena::Handle);

/// Context-wide configuration, consumed at creation time.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Gravity in engine units
    pub gravity: Vec2,
    /// Engine-to-physics unit scale factor
    pub scale: f32,
    /// Fixed sub-steps per frame
    pub steps_per_frame: u32,
    pub velocity_iterations: u32,
    pub position_iterations: u32,
    /// Minimum contact impulse (engine units) to report collisions
    pub contact_impulse_limit: f32,
    /// Minimum trigger penetration (engine units) to count as overlap
    pub trigger_enter_limit: f32,
    /// Queued ray-cast capacity per world
    pub ray_cast_limit: usize,
    /// Concurrent trigger-overlap episode capacity per world
    pub trigger_overlap_capacity: usize,
    /// Re-sync dynamic body transforms/scale from the game objects each
    /// frame (kinematic bodies always re-sync)
    pub allow_dynamic_transforms: bool,
    /// Maximum number of worlds in the pool
    pub max_worlds: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            gravity: Vec2::new(0.0, -10.0),
            scale: 1.0,
            steps_per_frame: 1,
            velocity_iterations: 16,
            position_iterations: 8,
            contact_impulse_limit: 0.0,
            trigger_enter_limit: 0.0,
            ray_cast_limit: 64,
            trigger_overlap_capacity: 64,
            allow_dynamic_transforms: false,
            max_worlds: 4,
        }
    }
}

/// Transform of a game object as the engine sees it.
#[derive(Clone, Copy, Debug)]
pub struct GameTransform {
    pub position: Vec2,
    pub angle: f32,
    /// Uniform scale (the smaller axis if non-uniform)
    pub scale: f32,
}

/// The world-transform provider/sink implemented by the game-object layer.
pub trait TransformSync {
    /// Authoritative transform of the game object, engine units.
    fn world_transform(&mut self, user_data: u64) -> Option<GameTransform>;

    /// Push a solved transform back to the game object, engine units.
    fn set_world_transform(&mut self, user_data: u64, position: Vec2, angle: f32);
}

/// Sync implementation for hosts without a game-object layer.
pub struct NoSync;

impl TransformSync for NoSync {
    fn world_transform(&mut self, _user_data: u64) -> Option<GameTransform> {
        None
    }

    fn set_world_transform(&mut self, _user_data: u64, _position: Vec2, _angle: f32) {}
}

/// Collision object categories exposed to the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectType {
    Dynamic,
    Static,
    Kinematic,
    /// Sensor on a kinematic body
    Trigger,
    /// Sensor on a dynamic body with zero gravity scale
    DynamicTrigger,
}

/// Recipe for a collision object (body plus fixtures), engine units.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ObjectDesc {
    pub object_type: ObjectType,
    /// Target mass for dynamic objects; must be zero otherwise
    pub mass: f32,
    pub friction: f32,
    pub restitution: f32,
    /// Collision category bits
    pub group: u16,
    /// Collision mask bits
    pub mask: u16,
    pub linear_damping: f32,
    pub angular_damping: f32,
    pub locked_rotation: bool,
    pub bullet: bool,
    pub enabled: bool,
    pub user_data: u64,
}

impl Default for ObjectDesc {
    fn default() -> Self {
        Self {
            object_type: ObjectType::Static,
            mass: 0.0,
            friction: 0.2,
            restitution: 0.0,
            group: 1,
            mask: 0xFFFF,
            linear_damping: 0.0,
            angular_damping: 0.0,
            locked_rotation: false,
            bullet: false,
            enabled: true,
            user_data: 0,
        }
    }
}

/// A shape instance with a per-instance local offset, engine units.
#[derive(Clone, Debug)]
pub struct ShapeDesc {
    pub shape: Shape,
    pub translation: Vec2,
    pub rotation: f32,
}

impl ShapeDesc {
    #[must_use]
    pub fn new(shape: Shape) -> Self {
        Self {
            shape,
            translation: Vec2::ZERO,
            rotation: 0.0,
        }
    }
}

// ============================================================================
// Context
// ============================================================================

/// Owns the world pool and the unit-scale policy. All cross-world state
/// lives here rather than in process-wide globals; the context's lifetime
/// bounds everything it created.
pub struct PhysicsContext {
    config: ContextConfig,
    inv_scale: f32,
    worlds: Arena<SimWorld>,
}

impl PhysicsContext {
    /// Validate the configuration and create a context. A scale factor
    /// outside `[MIN_SCALE, MAX_SCALE]` is rejected.
    pub fn new(config: ContextConfig) -> Result<Self, PhysicsError> {
        if !(MIN_SCALE..=MAX_SCALE).contains(&config.scale) {
            warn!(
                scale = config.scale,
                "physics scale outside the valid range {MIN_SCALE} - {MAX_SCALE}"
            );
            return Err(PhysicsError::InvalidConfiguration {
                reason: "scale factor outside valid range",
            });
        }
        if config.steps_per_frame == 0 {
            return Err(PhysicsError::InvalidConfiguration {
                reason: "steps_per_frame must be at least 1",
            });
        }
        Ok(Self {
            inv_scale: 1.0 / config.scale,
            config,
            worlds: Arena::new(),
        })
    }

    #[inline]
    #[must_use]
    pub fn scale(&self) -> f32 {
        self.config.scale
    }

    #[inline]
    #[must_use]
    pub fn inv_scale(&self) -> f32 {
        self.inv_scale
    }

    #[inline]
    #[must_use]
    pub fn world_count(&self) -> usize {
        self.worlds.len()
    }

    /// Create a world. The pool is bounded; exhaustion rejects the request
    /// instead of growing.
    pub fn new_world(&mut self) -> Result<WorldId, PhysicsError> {
        if self.worlds.len() >= self.config.max_worlds {
            warn!(
                limit = self.config.max_worlds,
                "physics world pool full, world could not be created"
            );
            return Err(PhysicsError::CapacityExceeded {
                resource: "world pool",
                limit: self.config.max_worlds,
            });
        }
        let world = SimWorld::new(&self.config, self.inv_scale);
        Ok(WorldId(self.worlds.insert(world)))
    }

    /// Delete a world and everything in it.
    pub fn delete_world(&mut self, id: WorldId) -> Result<(), PhysicsError> {
        self.worlds
            .remove(id.0)
            .map(|_| ())
            .ok_or(PhysicsError::StaleHandle {
                index: id.0.index(),
                generation: id.0.generation(),
            })
    }

    #[inline]
    pub fn world(&self, id: WorldId) -> Option<&SimWorld> {
        self.worlds.get(id.0)
    }

    #[inline]
    pub fn world_mut(&mut self, id: WorldId) -> Option<&mut SimWorld> {
        self.worlds.get_mut(id.0)
    }
}

impl Drop for PhysicsContext {
    fn drop(&mut self) {
        if !self.worlds.is_empty() {
            warn!(
                count = self.worlds.len(),
                "deleting worlds because their context is deleted"
            );
        }
    }
}

// ============================================================================
// SimWorld
// ============================================================================

/// One simulation world plus its engine-facing state: the trigger overlap
/// cache, the ray-cast request queue and the unit conversions.
pub struct SimWorld {
    physics: PhysicsWorld,
    overlap: OverlapCache,
    ray_requests: Vec<RayCastRequest>,
    ray_capacity: usize,
    steps_per_frame: u32,
    velocity_iterations: u32,
    position_iterations: u32,
    scale: f32,
    inv_scale: f32,
    /// Minimum penetration (physics units) for a trigger overlap to count
    trigger_enter_limit: f32,
    allow_dynamic_transforms: bool,
}

impl SimWorld {
    fn new(config: &ContextConfig, inv_scale: f32) -> Self {
        let mut physics = PhysicsWorld::new(config.gravity * config.scale);
        physics.contact_report_threshold = config.contact_impulse_limit * config.scale;
        Self {
            physics,
            overlap: OverlapCache::new(config.trigger_overlap_capacity),
            ray_requests: Vec::new(),
            ray_capacity: config.ray_cast_limit,
            steps_per_frame: config.steps_per_frame,
            velocity_iterations: config.velocity_iterations,
            position_iterations: config.position_iterations,
            scale: config.scale,
            inv_scale,
            trigger_enter_limit: config.trigger_enter_limit * config.scale,
            allow_dynamic_transforms: config.allow_dynamic_transforms,
        }
    }

    /// Direct access to the underlying physics world.
    #[inline]
    #[must_use]
    pub fn physics(&self) -> &PhysicsWorld {
        &self.physics
    }

    #[inline]
    pub fn physics_mut(&mut self) -> &mut PhysicsWorld {
        &mut self.physics
    }

    /// World gravity in engine units.
    #[must_use]
    pub fn gravity(&self) -> Vec2 {
        self.physics.gravity() * self.inv_scale
    }

    pub fn set_gravity(&mut self, gravity: Vec2) {
        self.physics.set_gravity(gravity * self.scale);
    }

    // ------------------------------------------------------------------
    // Collision objects
    // ------------------------------------------------------------------

    /// Create a collision object: one body carrying one fixture per shape,
    /// each shape baked with its per-instance offset and the object's
    /// uniform scale.
    ///
    /// Invalid requests (no shapes, dynamic with zero mass, non-dynamic
    /// with positive mass) are rejected with an error and a log line; the
    /// caller must check the result.
    pub fn new_object(
        &mut self,
        desc: &ObjectDesc,
        shapes: &[ShapeDesc],
        sync: &mut dyn TransformSync,
    ) -> Result<BodyHandle, PhysicsError> {
        if shapes.is_empty() {
            warn!("collision objects must have a shape");
            return Err(PhysicsError::InvalidRequest {
                reason: "collision object needs at least one shape",
            });
        }
        match desc.object_type {
            ObjectType::Dynamic | ObjectType::DynamicTrigger => {
                if desc.mass <= 0.0 {
                    warn!("collision objects can not be dynamic and have zero mass");
                    return Err(PhysicsError::InvalidRequest {
                        reason: "dynamic collision object needs positive mass",
                    });
                }
            }
            _ => {
                if desc.mass > 0.0 {
                    warn!("only dynamic collision objects can have a positive mass");
                    return Err(PhysicsError::InvalidRequest {
                        reason: "non-dynamic collision object must have zero mass",
                    });
                }
            }
        }

        // Initial pose from the owning game object
        let mut position = Vec2::ZERO;
        let mut angle = 0.0_f32;
        let mut object_scale = 1.0_f32;
        if desc.user_data != 0 {
            if let Some(t) = sync.world_transform(desc.user_data) {
                position = t.position * self.scale;
                angle = t.angle;
                object_scale = t.scale;
            }
        } else {
            debug!("collision object created at origin");
        }

        let (body_type, gravity_scale, sensor) = match desc.object_type {
            ObjectType::Dynamic => (BodyType::Dynamic, 1.0, false),
            ObjectType::Static => (BodyType::Static, 1.0, false),
            ObjectType::Kinematic => (BodyType::Kinematic, 1.0, false),
            ObjectType::Trigger => (BodyType::Kinematic, 1.0, true),
            ObjectType::DynamicTrigger => (BodyType::Dynamic, 0.0, true),
        };

        let body = self.physics.create_body(&BodyDef {
            body_type,
            position,
            angle,
            linear_damping: desc.linear_damping,
            angular_damping: desc.angular_damping,
            gravity_scale,
            fixed_rotation: desc.locked_rotation,
            bullet: desc.bullet,
            active: desc.enabled,
            user_data: desc.user_data,
            ..BodyDef::default()
        })?;

        for shape_desc in shapes {
            let total_scale = self.scale * object_scale;
            let offset = Transform2::new(shape_desc.translation * total_scale, shape_desc.rotation);
            let result = shape_desc
                .shape
                .transformed(&offset, total_scale)
                .and_then(|baked| {
                    // Fixture density is chosen so the body's total mass
                    // matches the requested mass regardless of shape area
                    let unit_mass = baked.compute_mass(1.0).mass;
                    let density = if unit_mass > 0.0 {
                        desc.mass / (shapes.len() as f32 * unit_mass)
                    } else {
                        1.0
                    };
                    self.physics.create_fixture_scaled(
                        body,
                        FixtureDef {
                            shape: baked,
                            friction: desc.friction,
                            restitution: desc.restitution,
                            density,
                            sensor,
                            filter: Filter::new(desc.group, desc.mask),
                        },
                        object_scale,
                    )
                });
            if let Err(err) = result {
                let _ = self.physics.destroy_body(body);
                return Err(err);
            }
        }
        Ok(body)
    }

    /// Destroy a collision object, forgetting its trigger episodes.
    pub fn delete_object(&mut self, handle: BodyHandle) -> Result<(), PhysicsError> {
        self.overlap.remove_object(handle);
        self.physics.destroy_body(handle)
    }

    /// Mirror an object's shapes horizontally.
    pub fn flip_horizontal(&mut self, handle: BodyHandle) {
        self.flip(handle, -1.0, 1.0);
    }

    /// Mirror an object's shapes vertically.
    pub fn flip_vertical(&mut self, handle: BodyHandle) {
        self.flip(handle, 1.0, -1.0);
    }

    fn flip(&mut self, handle: BodyHandle, horizontal: f32, vertical: f32) {
        if let Some(body) = self.physics.body_mut(handle) {
            for fixture in body.fixtures_mut() {
                fixture.shape.flip(horizontal, vertical);
            }
            body.set_awake(true);
        }
        self.physics.refresh_body_proxies(handle);
    }

    /// Enable or disable an object, re-pulling its transform on enable.
    pub fn set_object_enabled(
        &mut self,
        handle: BodyHandle,
        enabled: bool,
        sync: &mut dyn TransformSync,
    ) -> Result<(), PhysicsError> {
        let Some(body) = self.physics.body(handle) else {
            return Ok(());
        };
        if body.is_active() == enabled {
            return Ok(());
        }
        let user_data = body.user_data();
        self.physics.set_body_active(handle, enabled)?;
        if enabled {
            if let Some(t) = sync.world_transform(user_data) {
                self.physics
                    .set_body_transform(handle, t.position * self.scale, t.angle)?;
            }
            if let Some(body) = self.physics.body_mut(handle) {
                body.set_awake(true);
            }
        } else if let Some(body) = self.physics.body_mut(handle) {
            body.set_awake(false);
        }
        Ok(())
    }

    /// Reassign the collision filter of one fixture child.
    pub fn set_object_filter(
        &mut self,
        handle: BodyHandle,
        fixture: usize,
        child: usize,
        group: u16,
        mask: u16,
    ) -> Result<(), PhysicsError> {
        self.physics
            .set_filter(handle, fixture, child, Filter::new(group, mask))
    }

    // ------------------------------------------------------------------
    // Tile grids
    // ------------------------------------------------------------------

    /// Assign a hull (with mirror flags) to a grid cell.
    pub fn set_grid_cell(
        &mut self,
        handle: BodyHandle,
        fixture: usize,
        row: usize,
        column: usize,
        hull: u32,
        flip_horizontal: bool,
        flip_vertical: bool,
    ) -> Result<(), PhysicsError> {
        let proxy_child;
        {
            let Some(body) = self.physics.body_mut(handle) else {
                return Err(PhysicsError::InvalidRequest {
                    reason: "unknown collision object",
                });
            };
            let Some(fix) = body.fixtures_mut().get_mut(fixture) else {
                return Err(PhysicsError::InvalidRequest {
                    reason: "fixture index out of range",
                });
            };
            let Shape::TileGrid(grid) = &mut fix.shape else {
                return Err(PhysicsError::InvalidRequest {
                    reason: "fixture is not a tile grid",
                });
            };
            if row >= grid.row_count || column >= grid.column_count {
                return Err(PhysicsError::InvalidRequest {
                    reason: "grid cell out of range",
                });
            }
            let child = grid.child_of(row, column);
            grid.cells[child] = GridCell {
                hull,
                flip_horizontal,
                flip_vertical,
            };
            proxy_child = child;
            body.set_awake(true);
        }
        self.physics.touch_fixture_child(handle, fixture, proxy_child);
        Ok(())
    }

    /// Enable or disable a whole grid shape. Disabling purges its tracked
    /// contacts immediately.
    pub fn set_grid_enabled(
        &mut self,
        handle: BodyHandle,
        fixture: usize,
        enabled: bool,
    ) -> Result<(), PhysicsError> {
        {
            let Some(body) = self.physics.body_mut(handle) else {
                return Err(PhysicsError::InvalidRequest {
                    reason: "unknown collision object",
                });
            };
            let Some(fix) = body.fixtures_mut().get_mut(fixture) else {
                return Err(PhysicsError::InvalidRequest {
                    reason: "fixture index out of range",
                });
            };
            let Shape::TileGrid(grid) = &mut fix.shape else {
                return Err(PhysicsError::InvalidRequest {
                    reason: "fixture is not a tile grid",
                });
            };
            grid.enabled = enabled;
        }
        if enabled {
            self.physics.touch_body_proxies(handle);
        } else {
            self.physics.purge_fixture_contacts(handle, fixture);
        }
        Ok(())
    }

    /// Clear every cell of every grid shape on the object.
    pub fn clear_grid_cells(&mut self, handle: BodyHandle) {
        if let Some(body) = self.physics.body_mut(handle) {
            for fix in body.fixtures_mut() {
                if let Shape::TileGrid(grid) = &mut fix.shape {
                    for cell in &mut grid.cells {
                        *cell = GridCell {
                            hull: EMPTY_CELL,
                            flip_horizontal: false,
                            flip_vertical: false,
                        };
                    }
                }
            }
        }
        self.physics.touch_body_proxies(handle);
    }

    // ------------------------------------------------------------------
    // Joints
    // ------------------------------------------------------------------

    /// Create a joint between two objects; anchors and type-specific
    /// lengths arrive in engine units and are scaled into physics space.
    pub fn create_joint(
        &mut self,
        object_a: BodyHandle,
        anchor_a: Vec2,
        object_b: BodyHandle,
        anchor_b: Vec2,
        collide_connected: bool,
        params: JointParams,
    ) -> Result<JointHandle, PhysicsError> {
        self.physics.create_joint(&JointDef {
            body_a: object_a,
            body_b: object_b,
            local_anchor_a: anchor_a * self.scale,
            local_anchor_b: anchor_b * self.scale,
            collide_connected,
            params: self.scale_params(params, self.scale),
        })
    }

    /// Update a joint's type-specific parameters (engine units). Returns
    /// false when the parameter kind does not match the joint.
    pub fn set_joint_params(&mut self, handle: JointHandle, params: JointParams) -> bool {
        let scaled = self.scale_params(params, self.scale);
        self.physics
            .joint_mut(handle)
            .is_some_and(|j| j.set_params(scaled))
    }

    /// Read a joint's parameters back in engine units.
    #[must_use]
    pub fn joint_params(&self, handle: JointHandle) -> Option<JointParams> {
        self.physics
            .joint(handle)
            .map(|j| self.scale_params(j.params(), self.inv_scale))
    }

    /// Reaction force on body B in engine units.
    #[must_use]
    pub fn joint_reaction_force(&self, handle: JointHandle, inv_dt: f32) -> Option<Vec2> {
        self.physics
            .joint(handle)
            .map(|j| j.reaction_force(inv_dt) * self.inv_scale)
    }

    /// Reaction torque on body B in engine units.
    #[must_use]
    pub fn joint_reaction_torque(&self, handle: JointHandle, inv_dt: f32) -> Option<f32> {
        self.physics
            .joint(handle)
            .map(|j| j.reaction_torque(inv_dt) * self.inv_scale)
    }

    /// Destroy a joint.
    pub fn delete_joint(&mut self, handle: JointHandle) -> Result<(), PhysicsError> {
        self.physics.destroy_joint(handle)
    }

    /// Current hinge angle of a revolute joint, radians.
    #[must_use]
    pub fn revolute_angle(&self, handle: JointHandle) -> Option<f32> {
        let joint = self.physics.joint(handle)?;
        let (ha, hb) = joint.bodies();
        let angle_a = self.physics.body(ha)?.angle();
        let angle_b = self.physics.body(hb)?.angle();
        joint.revolute_angle(angle_a, angle_b)
    }

    /// Current translation of a prismatic joint, engine units.
    #[must_use]
    pub fn prismatic_translation(&self, handle: JointHandle) -> Option<f32> {
        let joint = self.physics.joint(handle)?;
        let JointParams::Prismatic(def) = joint.params() else {
            return None;
        };
        let (ha, hb) = joint.bodies();
        let body_a = self.physics.body(ha)?;
        let body_b = self.physics.body(hb)?;
        let (anchor_a, anchor_b) = joint.anchors();
        let pa = body_a.transform().apply(anchor_a);
        let pb = body_b.transform().apply(anchor_b);
        let axis = body_a
            .transform()
            .q
            .apply(def.local_axis_a.normalize_or(Vec2::X));
        Some(axis.dot(pb - pa) * self.inv_scale)
    }

    fn scale_params(&self, params: JointParams, factor: f32) -> JointParams {
        match params {
            JointParams::Distance(mut d) => {
                d.length *= factor;
                JointParams::Distance(d)
            }
            JointParams::Rope(mut d) => {
                d.max_length *= factor;
                JointParams::Rope(d)
            }
            JointParams::Revolute(mut d) => {
                d.max_motor_torque *= factor;
                JointParams::Revolute(d)
            }
            JointParams::Prismatic(mut d) => {
                d.lower_translation *= factor;
                d.upper_translation *= factor;
                d.max_motor_force *= factor;
                JointParams::Prismatic(d)
            }
        }
    }

    // ------------------------------------------------------------------
    // Body property surface (engine units)
    // ------------------------------------------------------------------

    /// Linear velocity in engine units.
    #[must_use]
    pub fn linear_velocity(&self, handle: BodyHandle) -> Option<Vec2> {
        self.physics
            .body(handle)
            .map(|b| b.linear_velocity() * self.inv_scale)
    }

    pub fn set_linear_velocity(&mut self, handle: BodyHandle, velocity: Vec2) {
        let scaled = velocity * self.scale;
        if let Some(body) = self.physics.body_mut(handle) {
            body.set_linear_velocity(scaled);
        }
    }

    #[must_use]
    pub fn angular_velocity(&self, handle: BodyHandle) -> Option<f32> {
        self.physics.body(handle).map(|b| b.angular_velocity())
    }

    pub fn set_angular_velocity(&mut self, handle: BodyHandle, velocity: f32) {
        if let Some(body) = self.physics.body_mut(handle) {
            body.set_angular_velocity(velocity);
        }
    }

    /// World position in engine units.
    #[must_use]
    pub fn world_position(&self, handle: BodyHandle) -> Option<Vec2> {
        self.physics
            .body(handle)
            .map(|b| b.position() * self.inv_scale)
    }

    #[must_use]
    pub fn world_angle(&self, handle: BodyHandle) -> Option<f32> {
        self.physics.body(handle).map(|b| b.angle())
    }

    /// Move an object to a new world position (engine units), keeping its
    /// angle.
    pub fn set_world_position(
        &mut self,
        handle: BodyHandle,
        position: Vec2,
    ) -> Result<(), PhysicsError> {
        let angle = self.physics.body(handle).map_or(0.0, |b| b.angle());
        self.physics
            .set_body_transform(handle, position * self.scale, angle)
    }

    /// Rotate an object to a new world angle, keeping its position.
    pub fn set_world_angle(&mut self, handle: BodyHandle, angle: f32) -> Result<(), PhysicsError> {
        let position = self.physics.body(handle).map_or(Vec2::ZERO, |b| b.position());
        self.physics.set_body_transform(handle, position, angle)
    }

    /// Apply a force (engine units) at a world point (engine units).
    pub fn apply_force(&mut self, handle: BodyHandle, force: Vec2, point: Vec2) {
        let f = force * self.scale;
        let p = point * self.scale;
        if let Some(body) = self.physics.body_mut(handle) {
            body.apply_force(f, p);
        }
    }

    /// Apply a linear impulse (engine units) at a world point.
    pub fn apply_impulse(&mut self, handle: BodyHandle, impulse: Vec2, point: Vec2) {
        let i = impulse * self.scale;
        let p = point * self.scale;
        if let Some(body) = self.physics.body_mut(handle) {
            body.apply_linear_impulse(i, p);
        }
    }

    /// Accumulated force this step, engine units.
    #[must_use]
    pub fn total_force(&self, handle: BodyHandle) -> Option<Vec2> {
        self.physics
            .body(handle)
            .map(|b| b.total_force() * self.inv_scale)
    }

    // ------------------------------------------------------------------
    // Ray casts
    // ------------------------------------------------------------------

    /// Queue a ray cast for execution during the next `step_world`.
    /// Zero-length rays and queue exhaustion reject the request.
    pub fn request_ray_cast(&mut self, request: RayCastRequest) -> Result<(), PhysicsError> {
        if self.ray_requests.len() >= self.ray_capacity {
            warn!(
                capacity = self.ray_capacity,
                "ray cast query buffer is full, ignoring request"
            );
            return Err(PhysicsError::CapacityExceeded {
                resource: "ray-cast queue",
                limit: self.ray_capacity,
            });
        }
        if (request.to - request.from).length_squared() <= 0.0 {
            warn!("ray had 0 length when ray casting, ignoring request");
            return Err(PhysicsError::ZeroLengthVector {
                context: "ray-cast request",
            });
        }
        self.ray_requests.push(request);
        Ok(())
    }

    /// Immediate ray cast. With `return_all_results` the buffer receives
    /// every hit sorted by fraction ascending; otherwise at most the
    /// closest hit.
    pub fn ray_cast(&self, request: &RayCastRequest, results: &mut Vec<RayCastResponse>) {
        if (request.to - request.from).length_squared() <= 0.0 {
            warn!("ray had 0 length when ray casting, ignoring request");
            return;
        }
        if request.return_all_results {
            self.ray_cast_all(request, results);
            results.sort_by(|a, b| a.fraction.total_cmp(&b.fraction));
        } else {
            let response = self.ray_cast_closest(request);
            if response.hit {
                results.push(response);
            }
        }
    }

    fn ray_cast_closest(&self, request: &RayCastRequest) -> RayCastResponse {
        let p1 = request.from * self.scale;
        let p2 = request.to * self.scale;
        let mut response = RayCastResponse::default();
        self.physics.ray_cast(p1, p2, |hit| {
            if hit.user_data == request.ignored_user_data && request.ignored_user_data != 0 {
                return -1.0;
            }
            if hit.category & request.mask == 0 {
                return -1.0;
            }
            response = RayCastResponse {
                hit: true,
                fraction: hit.fraction,
                position: hit.point * self.inv_scale,
                normal: hit.normal,
                group: hit.category,
                user_data: hit.user_data,
            };
            // Clipping to the returned fraction converges on the closest hit
            hit.fraction
        });
        response
    }

    fn ray_cast_all(&self, request: &RayCastRequest, results: &mut Vec<RayCastResponse>) {
        let p1 = request.from * self.scale;
        let p2 = request.to * self.scale;
        self.physics.ray_cast(p1, p2, |hit| {
            if hit.user_data == request.ignored_user_data && request.ignored_user_data != 0 {
                return -1.0;
            }
            if hit.category & request.mask == 0 {
                return -1.0;
            }
            results.push(RayCastResponse {
                hit: true,
                fraction: hit.fraction,
                position: hit.point * self.inv_scale,
                normal: hit.normal,
                group: hit.category,
                user_data: hit.user_data,
            });
            // Never clip: report every hit along the segment
            1.0
        });
    }

    // ------------------------------------------------------------------
    // Frame step
    // ------------------------------------------------------------------

    /// Advance the world by one frame: transform pull, fixed sub-steps,
    /// transform push, queued ray casts, sensor events and trigger
    /// reconciliation. `time_scale` stretches the fixed timestep (1 keeps
    /// real time); `dt == 0` pauses integration but still reconciles.
    pub fn step_world(
        &mut self,
        dt: f32,
        time_scale: f32,
        sync: &mut dyn TransformSync,
        listener: &mut dyn StepListener,
    ) {
        self.pull_transforms(sync);

        let sub_dt = if dt == 0.0 {
            0.0
        } else {
            FIXED_TIMESTEP * time_scale / self.steps_per_frame as f32
        };
        for _ in 0..self.steps_per_frame {
            self.physics.step(
                sub_dt,
                self.velocity_iterations,
                self.position_iterations,
                listener,
            );
        }

        // Callbacks below still count as "during the step"
        self.physics.set_locked(true);

        self.push_transforms(sync);

        // Queued ray casts, closest-hit convention
        let requests = core::mem::take(&mut self.ray_requests);
        for request in &requests {
            let response = self.ray_cast_closest(request);
            listener.ray_cast_response(&mut self.physics, &response, request);
        }

        self.update_triggers(listener);

        self.physics.set_locked(false);
    }

    /// Pull authoritative transforms from the game objects for kinematic
    /// (and optionally dynamic) bodies. Deltas below the noise epsilons
    /// leave the body sleep-eligible; real movement wakes it.
    fn pull_transforms(&mut self, sync: &mut dyn TransformSync) {
        let pos_epsilon_sq = (POSITION_EPSILON * self.scale) * (POSITION_EPSILON * self.scale);

        for handle in self.physics.body_handles() {
            let Some(body) = self.physics.body(handle) else {
                continue;
            };
            if !body.is_active() {
                continue;
            }
            let body_type = body.body_type();
            let pull_dynamic = self.allow_dynamic_transforms && body_type != BodyType::Static;
            if !pull_dynamic && body_type != BodyType::Kinematic {
                continue;
            }
            let user_data = body.user_data();
            let old_position = body.position();
            let old_angle = body.angle();

            let Some(t) = sync.world_transform(user_data) else {
                continue;
            };
            let new_position = t.position * self.scale;
            let dp = (new_position - old_position).length_squared();
            let da = (old_angle - t.angle).abs();

            if dp > pos_epsilon_sq || da > ROTATION_EPSILON {
                let _ = self.physics.set_body_transform(handle, new_position, t.angle);
                if let Some(body) = self.physics.body_mut(handle) {
                    body.set_sleeping_allowed(false);
                }
            } else if let Some(body) = self.physics.body_mut(handle) {
                body.set_sleeping_allowed(true);
            }

            // Uniform-scale re-sync for dynamic transforms
            if pull_dynamic {
                let mut changed = false;
                if let Some(body) = self.physics.body_mut(handle) {
                    for fixture in body.fixtures_mut() {
                        changed |= fixture.rescale(t.scale);
                    }
                    if changed {
                        body.set_awake(true);
                    }
                }
                if changed {
                    self.physics.refresh_body_proxies(handle);
                }
            }
        }
    }

    /// Push solved transforms back to the game objects for awake dynamic
    /// bodies.
    fn push_transforms(&mut self, sync: &mut dyn TransformSync) {
        for handle in self.physics.body_handles() {
            let Some(body) = self.physics.body(handle) else {
                continue;
            };
            if !body.is_active() || !body.is_awake() || body.body_type() != BodyType::Dynamic {
                continue;
            }
            sync.set_world_transform(
                body.user_data(),
                body.position() * self.inv_scale,
                body.angle(),
            );
        }
    }

    /// Report sensor contacts and reconcile the trigger overlap cache:
    /// rebuild the qualifying set from touching sensor contacts, firing
    /// enter for new episodes, then prune stale episodes firing exit.
    fn update_triggers(&mut self, listener: &mut dyn StepListener) {
        let touches = self.physics.sensor_touches();

        // Continuous sensor collision reporting
        for touch in &touches {
            listener.collision(
                &mut self.physics,
                &crate::events::CollisionData {
                    user_data_a: touch.user_data_a,
                    category_a: touch.group_a,
                    user_data_b: touch.user_data_b,
                    category_b: touch.group_b,
                },
            );
        }

        self.overlap.reset();
        for touch in &touches {
            // Grazing overlaps below the enter threshold do not qualify
            if touch.max_penetration < self.trigger_enter_limit {
                continue;
            }
            let key = OverlapKey::new(
                OverlapSide {
                    object: touch.body_a,
                    child: touch.child_a,
                },
                OverlapSide {
                    object: touch.body_b,
                    child: touch.child_b,
                },
            );
            let data = TriggerData {
                object_a: touch.body_a,
                user_data_a: touch.user_data_a,
                object_b: touch.body_b,
                user_data_b: touch.user_data_b,
                group_a: touch.group_a,
                group_b: touch.group_b,
            };
            if self.overlap.add(key, data) == OverlapAdd::Entered {
                listener.trigger_entered(&mut self.physics, &data);
            }
        }
        let physics = &mut self.physics;
        self.overlap
            .prune(|data| listener.trigger_exited(physics, data));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoopListener;

    #[test]
    fn test_scale_validation() {
        let bad = ContextConfig {
            scale: 0.001,
            ..ContextConfig::default()
        };
        assert!(matches!(
            PhysicsContext::new(bad),
            Err(PhysicsError::InvalidConfiguration { .. })
        ));
        assert!(PhysicsContext::new(ContextConfig::default()).is_ok());
    }

    #[test]
    fn test_world_pool_bounded() {
        let config = ContextConfig {
            max_worlds: 2,
            ..ContextConfig::default()
        };
        let mut context = PhysicsContext::new(config).unwrap();
        let a = context.new_world().unwrap();
        let _b = context.new_world().unwrap();
        assert!(matches!(
            context.new_world(),
            Err(PhysicsError::CapacityExceeded { .. })
        ));
        context.delete_world(a).unwrap();
        assert!(context.new_world().is_ok(), "freed slot can be reused");
    }

    #[test]
    fn test_object_validation() {
        let mut context = PhysicsContext::new(ContextConfig::default()).unwrap();
        let id = context.new_world().unwrap();
        let world = context.world_mut(id).unwrap();

        let shape = ShapeDesc::new(Shape::circle(0.5).unwrap());

        // No shapes
        let err = world.new_object(&ObjectDesc::default(), &[], &mut NoSync);
        assert!(err.is_err());

        // Dynamic with zero mass
        let err = world.new_object(
            &ObjectDesc {
                object_type: ObjectType::Dynamic,
                mass: 0.0,
                ..ObjectDesc::default()
            },
            std::slice::from_ref(&shape),
            &mut NoSync,
        );
        assert!(err.is_err());

        // Static with positive mass
        let err = world.new_object(
            &ObjectDesc {
                mass: 5.0,
                ..ObjectDesc::default()
            },
            std::slice::from_ref(&shape),
            &mut NoSync,
        );
        assert!(err.is_err());

        // Valid dynamic object resolves to the requested mass
        let handle = world
            .new_object(
                &ObjectDesc {
                    object_type: ObjectType::Dynamic,
                    mass: 5.0,
                    ..ObjectDesc::default()
                },
                &[shape],
                &mut NoSync,
            )
            .unwrap();
        let mass = world.physics().body(handle).unwrap().mass();
        assert!((mass - 5.0).abs() < 1e-3, "mass = {}", mass);
    }

    #[test]
    fn test_ray_queue_capacity_and_zero_length() {
        let config = ContextConfig {
            ray_cast_limit: 2,
            ..ContextConfig::default()
        };
        let mut context = PhysicsContext::new(config).unwrap();
        let id = context.new_world().unwrap();
        let world = context.world_mut(id).unwrap();

        let request = RayCastRequest {
            from: Vec2::ZERO,
            to: Vec2::new(1.0, 0.0),
            ..RayCastRequest::default()
        };
        world.request_ray_cast(request).unwrap();
        world.request_ray_cast(request).unwrap();
        assert!(matches!(
            world.request_ray_cast(request),
            Err(PhysicsError::CapacityExceeded { .. })
        ));

        let zero = RayCastRequest {
            from: Vec2::ONE,
            to: Vec2::ONE,
            ..RayCastRequest::default()
        };
        assert!(matches!(
            world.request_ray_cast(zero),
            Err(PhysicsError::ZeroLengthVector { .. })
        ));
    }

    #[test]
    fn test_gravity_round_trip_through_scale() {
        let config = ContextConfig {
            scale: 0.5,
            gravity: Vec2::new(0.0, -10.0),
            ..ContextConfig::default()
        };
        let mut context = PhysicsContext::new(config).unwrap();
        let id = context.new_world().unwrap();
        let world = context.world_mut(id).unwrap();

        // Internal gravity is scaled, external reads back unscaled
        assert!((world.physics().gravity().y + 5.0).abs() < 1e-6);
        assert!((world.gravity().y + 10.0).abs() < 1e-6);

        world.set_gravity(Vec2::new(0.0, -20.0));
        assert!((world.gravity().y + 20.0).abs() < 1e-6);
    }
}
