//! Joint Constraints
//!
//! Typed constraints binding two bodies: distance (soft spring), rope
//! (max-length), revolute (hinge with motor and angle limit) and prismatic
//! (slider with motor and translation limit).
//!
//! Every joint exposes the same solver surface:
//!
//! - `init_velocity_constraints` — effective masses from current body
//!   state, warm-start impulses scaled by the timestep ratio
//! - `solve_velocity_constraints` — iterative impulse application with
//!   motor/limit clamping
//! - `solve_position_constraints` — returns whether positional error is
//!   within tolerance
//!
//! Limit-state transitions reset the accumulated limit impulse so stale
//! energy is never injected after crossing a bound. Motor impulses are
//! clamped to `max_torque * dt` (or `max_force * dt`) symmetrically.

use serde::{Deserialize, Serialize};

use crate::body::{Body, BodyHandle};
use crate::math::{cross, cross_sv, Mat22, Mat33, Rot, Vec2, Vec3};
use crate::solver::{
    SolverData, ANGULAR_SLOP, LINEAR_SLOP, MAX_ANGULAR_CORRECTION, MAX_LINEAR_CORRECTION,
};

/// Generation-checked reference to a joint owned by a world.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JointHandle(pub(crate) crate::arena::Handle);

/// Joint kind discriminant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum JointType {
    Distance,
    Rope,
    Revolute,
    Prismatic,
}

/// Limit engagement state shared by revolute and prismatic joints.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LimitState {
    Inactive,
    AtLower,
    AtUpper,
    Equal,
}

// ============================================================================
// Definitions
// ============================================================================

/// Soft distance constraint (spring): target length plus
/// frequency/damping softness. Zero frequency makes it rigid.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct DistanceJointDef {
    pub length: f32,
    pub frequency_hz: f32,
    pub damping_ratio: f32,
}

/// Rope: constrains the anchor distance to at most `max_length`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct RopeJointDef {
    pub max_length: f32,
}

/// Hinge: point-to-point with optional angle limit and motor.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct RevoluteJointDef {
    pub reference_angle: f32,
    pub enable_limit: bool,
    pub lower_angle: f32,
    pub upper_angle: f32,
    pub enable_motor: bool,
    pub motor_speed: f32,
    pub max_motor_torque: f32,
}

/// Slider: single-axis translation with optional limit and motor.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct PrismaticJointDef {
    pub local_axis_a: Vec2,
    pub reference_angle: f32,
    pub enable_limit: bool,
    pub lower_translation: f32,
    pub upper_translation: f32,
    pub enable_motor: bool,
    pub motor_speed: f32,
    pub max_motor_force: f32,
}

/// Type-specific joint parameters.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub enum JointParams {
    Distance(DistanceJointDef),
    Rope(RopeJointDef),
    Revolute(RevoluteJointDef),
    Prismatic(PrismaticJointDef),
}

/// Recipe for creating a joint between two bodies.
#[derive(Clone, Copy, Debug)]
pub struct JointDef {
    pub body_a: BodyHandle,
    pub body_b: BodyHandle,
    /// Anchor in body A's local frame
    pub local_anchor_a: Vec2,
    /// Anchor in body B's local frame
    pub local_anchor_b: Vec2,
    /// Whether the two bodies may still collide with each other
    pub collide_connected: bool,
    pub params: JointParams,
}

// ============================================================================
// Runtime joint
// ============================================================================

/// Per-body data every joint solver needs, captured at island build time.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct JointBodies {
    pub index_a: usize,
    pub index_b: usize,
    pub local_center_a: Vec2,
    pub local_center_b: Vec2,
    pub inv_mass_a: f32,
    pub inv_mass_b: f32,
    pub inv_i_a: f32,
    pub inv_i_b: f32,
}

impl JointBodies {
    pub(crate) fn capture(body_a: &Body, body_b: &Body) -> Self {
        Self {
            index_a: body_a.island_index as usize,
            index_b: body_b.island_index as usize,
            local_center_a: body_a.local_center,
            local_center_b: body_b.local_center,
            inv_mass_a: body_a.inv_mass,
            inv_mass_b: body_b.inv_mass,
            inv_i_a: body_a.inv_inertia,
            inv_i_b: body_b.inv_inertia,
        }
    }
}

/// A joint constraint and its solver state.
pub struct Joint {
    pub(crate) body_a: BodyHandle,
    pub(crate) body_b: BodyHandle,
    pub(crate) local_anchor_a: Vec2,
    pub(crate) local_anchor_b: Vec2,
    pub(crate) collide_connected: bool,
    pub(crate) kind: JointKind,
    pub(crate) bodies: JointBodies,
    /// Scratch flag used by the island builder
    pub(crate) island_flag: bool,
}

pub(crate) enum JointKind {
    Distance(DistanceJoint),
    Rope(RopeJoint),
    Revolute(RevoluteJoint),
    Prismatic(PrismaticJoint),
}

impl Joint {
    pub(crate) fn new(def: &JointDef) -> Self {
        let kind = match def.params {
            JointParams::Distance(d) => JointKind::Distance(DistanceJoint::new(d)),
            JointParams::Rope(d) => JointKind::Rope(RopeJoint::new(d)),
            JointParams::Revolute(d) => JointKind::Revolute(RevoluteJoint::new(d)),
            JointParams::Prismatic(d) => JointKind::Prismatic(PrismaticJoint::new(d)),
        };
        Self {
            body_a: def.body_a,
            body_b: def.body_b,
            local_anchor_a: def.local_anchor_a,
            local_anchor_b: def.local_anchor_b,
            collide_connected: def.collide_connected,
            kind,
            bodies: JointBodies::default(),
            island_flag: false,
        }
    }

    #[inline]
    #[must_use]
    pub fn joint_type(&self) -> JointType {
        match self.kind {
            JointKind::Distance(_) => JointType::Distance,
            JointKind::Rope(_) => JointType::Rope,
            JointKind::Revolute(_) => JointType::Revolute,
            JointKind::Prismatic(_) => JointType::Prismatic,
        }
    }

    #[inline]
    #[must_use]
    pub fn bodies(&self) -> (BodyHandle, BodyHandle) {
        (self.body_a, self.body_b)
    }

    #[inline]
    #[must_use]
    pub fn collide_connected(&self) -> bool {
        self.collide_connected
    }

    /// Local anchors on body A and body B.
    #[inline]
    #[must_use]
    pub fn anchors(&self) -> (Vec2, Vec2) {
        (self.local_anchor_a, self.local_anchor_b)
    }

    /// Connects the given pair (in either order)?
    #[must_use]
    pub fn connects(&self, a: BodyHandle, b: BodyHandle) -> bool {
        (self.body_a == a && self.body_b == b) || (self.body_a == b && self.body_b == a)
    }

    /// Current type-specific parameters.
    #[must_use]
    pub fn params(&self) -> JointParams {
        match &self.kind {
            JointKind::Distance(j) => JointParams::Distance(j.def),
            JointKind::Rope(j) => JointParams::Rope(j.def),
            JointKind::Revolute(j) => JointParams::Revolute(j.def),
            JointKind::Prismatic(j) => JointParams::Prismatic(j.def),
        }
    }

    /// Replace the type-specific parameters. Mismatched kinds are ignored
    /// and reported with `false`.
    pub fn set_params(&mut self, params: JointParams) -> bool {
        match (&mut self.kind, params) {
            (JointKind::Distance(j), JointParams::Distance(d)) => {
                j.def = d;
                true
            }
            (JointKind::Rope(j), JointParams::Rope(d)) => {
                j.def = d;
                true
            }
            (JointKind::Revolute(j), JointParams::Revolute(d)) => {
                if !d.enable_limit
                    || d.lower_angle != j.def.lower_angle
                    || d.upper_angle != j.def.upper_angle
                {
                    j.impulse.z = 0.0;
                }
                j.def = d;
                true
            }
            (JointKind::Prismatic(j), JointParams::Prismatic(d)) => {
                if !d.enable_limit
                    || d.lower_translation != j.def.lower_translation
                    || d.upper_translation != j.def.upper_translation
                {
                    j.impulse.z = 0.0;
                }
                j.def = d;
                true
            }
            _ => false,
        }
    }

    /// Revolute joint angle for the given body angles (radians).
    #[must_use]
    pub fn revolute_angle(&self, angle_a: f32, angle_b: f32) -> Option<f32> {
        match &self.kind {
            JointKind::Revolute(j) => Some(angle_b - angle_a - j.def.reference_angle),
            _ => None,
        }
    }

    /// Current limit state, if the joint kind has limits.
    #[must_use]
    pub fn limit_state(&self) -> Option<LimitState> {
        match &self.kind {
            JointKind::Revolute(j) => Some(j.limit_state),
            JointKind::Prismatic(j) => Some(j.limit_state),
            JointKind::Rope(j) => Some(j.state),
            JointKind::Distance(_) => None,
        }
    }

    /// Accumulated limit impulse (diagnostics and tests).
    #[must_use]
    pub fn limit_impulse(&self) -> f32 {
        match &self.kind {
            JointKind::Revolute(j) => j.impulse.z,
            JointKind::Prismatic(j) => j.impulse.z,
            JointKind::Rope(j) => j.impulse,
            JointKind::Distance(j) => j.impulse,
        }
    }

    /// Reaction force on body B at the anchor, in newtons.
    #[must_use]
    pub fn reaction_force(&self, inv_dt: f32) -> Vec2 {
        match &self.kind {
            JointKind::Distance(j) => inv_dt * j.impulse * j.u,
            JointKind::Rope(j) => inv_dt * j.impulse * j.u,
            JointKind::Revolute(j) => inv_dt * Vec2::new(j.impulse.x, j.impulse.y),
            JointKind::Prismatic(j) => {
                inv_dt * (j.impulse.x * j.perp + (j.motor_impulse + j.impulse.z) * j.axis)
            }
        }
    }

    /// Reaction torque on body B.
    #[must_use]
    pub fn reaction_torque(&self, inv_dt: f32) -> f32 {
        match &self.kind {
            JointKind::Distance(_) | JointKind::Rope(_) => 0.0,
            JointKind::Revolute(j) => inv_dt * j.impulse.z,
            JointKind::Prismatic(j) => inv_dt * j.impulse.y,
        }
    }

    pub(crate) fn init_velocity_constraints(&mut self, data: &mut SolverData) {
        let ctx = JointCtx {
            bodies: self.bodies,
            local_anchor_a: self.local_anchor_a,
            local_anchor_b: self.local_anchor_b,
        };
        match &mut self.kind {
            JointKind::Distance(j) => j.init_velocity_constraints(&ctx, data),
            JointKind::Rope(j) => j.init_velocity_constraints(&ctx, data),
            JointKind::Revolute(j) => j.init_velocity_constraints(&ctx, data),
            JointKind::Prismatic(j) => j.init_velocity_constraints(&ctx, data),
        }
    }

    pub(crate) fn solve_velocity_constraints(&mut self, data: &mut SolverData) {
        let ctx = JointCtx {
            bodies: self.bodies,
            local_anchor_a: self.local_anchor_a,
            local_anchor_b: self.local_anchor_b,
        };
        match &mut self.kind {
            JointKind::Distance(j) => j.solve_velocity_constraints(&ctx, data),
            JointKind::Rope(j) => j.solve_velocity_constraints(&ctx, data),
            JointKind::Revolute(j) => j.solve_velocity_constraints(&ctx, data),
            JointKind::Prismatic(j) => j.solve_velocity_constraints(&ctx, data),
        }
    }

    pub(crate) fn solve_position_constraints(&mut self, data: &mut SolverData) -> bool {
        let ctx = JointCtx {
            bodies: self.bodies,
            local_anchor_a: self.local_anchor_a,
            local_anchor_b: self.local_anchor_b,
        };
        match &mut self.kind {
            JointKind::Distance(j) => j.solve_position_constraints(&ctx, data),
            JointKind::Rope(j) => j.solve_position_constraints(&ctx, data),
            JointKind::Revolute(j) => j.solve_position_constraints(&ctx, data),
            JointKind::Prismatic(j) => j.solve_position_constraints(&ctx, data),
        }
    }
}

/// Anchors plus captured body data, passed into each solver call.
struct JointCtx {
    bodies: JointBodies,
    local_anchor_a: Vec2,
    local_anchor_b: Vec2,
}

// ============================================================================
// Distance joint
// ============================================================================

pub(crate) struct DistanceJoint {
    def: DistanceJointDef,
    impulse: f32,
    // solver temp
    u: Vec2,
    r_a: Vec2,
    r_b: Vec2,
    mass: f32,
    gamma: f32,
    bias: f32,
}

impl DistanceJoint {
    fn new(def: DistanceJointDef) -> Self {
        Self {
            def,
            impulse: 0.0,
            u: Vec2::ZERO,
            r_a: Vec2::ZERO,
            r_b: Vec2::ZERO,
            mass: 0.0,
            gamma: 0.0,
            bias: 0.0,
        }
    }

    fn init_velocity_constraints(&mut self, ctx: &JointCtx, data: &mut SolverData) {
        let b = ctx.bodies;
        let (c_a, a_a) = data.positions[b.index_a].tuple();
        let (c_b, a_b) = data.positions[b.index_b].tuple();
        let q_a = Rot::new(a_a);
        let q_b = Rot::new(a_b);

        self.r_a = q_a.apply(ctx.local_anchor_a - b.local_center_a);
        self.r_b = q_b.apply(ctx.local_anchor_b - b.local_center_b);
        self.u = c_b + self.r_b - c_a - self.r_a;

        let length = self.u.length();
        if length > LINEAR_SLOP {
            self.u /= length;
        } else {
            self.u = Vec2::ZERO;
        }

        let cr_a = cross(self.r_a, self.u);
        let cr_b = cross(self.r_b, self.u);
        let mut inv_mass =
            b.inv_mass_a + b.inv_i_a * cr_a * cr_a + b.inv_mass_b + b.inv_i_b * cr_b * cr_b;
        self.mass = if inv_mass != 0.0 { 1.0 / inv_mass } else { 0.0 };

        if self.def.frequency_hz > 0.0 {
            let c = length - self.def.length;
            let omega = 2.0 * core::f32::consts::PI * self.def.frequency_hz;
            let d = 2.0 * self.mass * self.def.damping_ratio * omega;
            let k = self.mass * omega * omega;
            let h = data.step.dt;
            self.gamma = h * (d + h * k);
            self.gamma = if self.gamma != 0.0 { 1.0 / self.gamma } else { 0.0 };
            self.bias = c * h * k * self.gamma;

            inv_mass += self.gamma;
            self.mass = if inv_mass != 0.0 { 1.0 / inv_mass } else { 0.0 };
        } else {
            self.gamma = 0.0;
            self.bias = 0.0;
        }

        if data.step.warm_starting {
            // Scale the impulse to support a variable timestep
            self.impulse *= data.step.dt_ratio;
            let p = self.impulse * self.u;
            data.velocities[b.index_a].apply(-p, -b.inv_i_a * cross(self.r_a, p), b.inv_mass_a);
            data.velocities[b.index_b].apply(p, b.inv_i_b * cross(self.r_b, p), b.inv_mass_b);
        } else {
            self.impulse = 0.0;
        }
    }

    fn solve_velocity_constraints(&mut self, ctx: &JointCtx, data: &mut SolverData) {
        let b = ctx.bodies;
        let vp_a = data.velocities[b.index_a].at_point(self.r_a);
        let vp_b = data.velocities[b.index_b].at_point(self.r_b);
        let c_dot = self.u.dot(vp_b - vp_a);

        let impulse = -self.mass * (c_dot + self.bias + self.gamma * self.impulse);
        self.impulse += impulse;

        let p = impulse * self.u;
        data.velocities[b.index_a].apply(-p, -b.inv_i_a * cross(self.r_a, p), b.inv_mass_a);
        data.velocities[b.index_b].apply(p, b.inv_i_b * cross(self.r_b, p), b.inv_mass_b);
    }

    fn solve_position_constraints(&mut self, ctx: &JointCtx, data: &mut SolverData) -> bool {
        if self.def.frequency_hz > 0.0 {
            // Soft springs do not need positional correction
            return true;
        }
        let b = ctx.bodies;
        let (mut c_a, mut a_a) = data.positions[b.index_a].tuple();
        let (mut c_b, mut a_b) = data.positions[b.index_b].tuple();
        let q_a = Rot::new(a_a);
        let q_b = Rot::new(a_b);

        let r_a = q_a.apply(ctx.local_anchor_a - b.local_center_a);
        let r_b = q_b.apply(ctx.local_anchor_b - b.local_center_b);
        let mut u = c_b + r_b - c_a - r_a;
        let length = u.length();
        if length > f32::EPSILON {
            u /= length;
        }
        let c = (length - self.def.length).clamp(-MAX_LINEAR_CORRECTION, MAX_LINEAR_CORRECTION);

        let impulse = -self.mass * c;
        let p = impulse * u;

        c_a -= b.inv_mass_a * p;
        a_a -= b.inv_i_a * cross(r_a, p);
        c_b += b.inv_mass_b * p;
        a_b += b.inv_i_b * cross(r_b, p);

        data.positions[b.index_a].set(c_a, a_a);
        data.positions[b.index_b].set(c_b, a_b);
        c.abs() < LINEAR_SLOP
    }
}

// ============================================================================
// Rope joint
// ============================================================================

pub(crate) struct RopeJoint {
    def: RopeJointDef,
    impulse: f32,
    state: LimitState,
    // solver temp
    u: Vec2,
    r_a: Vec2,
    r_b: Vec2,
    length: f32,
    mass: f32,
}

impl RopeJoint {
    fn new(def: RopeJointDef) -> Self {
        Self {
            def,
            impulse: 0.0,
            state: LimitState::Inactive,
            u: Vec2::ZERO,
            r_a: Vec2::ZERO,
            r_b: Vec2::ZERO,
            length: 0.0,
            mass: 0.0,
        }
    }

    fn init_velocity_constraints(&mut self, ctx: &JointCtx, data: &mut SolverData) {
        let b = ctx.bodies;
        let (c_a, a_a) = data.positions[b.index_a].tuple();
        let (c_b, a_b) = data.positions[b.index_b].tuple();
        let q_a = Rot::new(a_a);
        let q_b = Rot::new(a_b);

        self.r_a = q_a.apply(ctx.local_anchor_a - b.local_center_a);
        self.r_b = q_b.apply(ctx.local_anchor_b - b.local_center_b);
        self.u = c_b + self.r_b - c_a - self.r_a;
        self.length = self.u.length();

        let c = self.length - self.def.max_length;
        self.state = if c > 0.0 {
            LimitState::AtUpper
        } else {
            LimitState::Inactive
        };

        if self.length > LINEAR_SLOP {
            self.u /= self.length;
        } else {
            self.u = Vec2::ZERO;
            self.mass = 0.0;
            self.impulse = 0.0;
            return;
        }

        let cr_a = cross(self.r_a, self.u);
        let cr_b = cross(self.r_b, self.u);
        let inv_mass =
            b.inv_mass_a + b.inv_i_a * cr_a * cr_a + b.inv_mass_b + b.inv_i_b * cr_b * cr_b;
        self.mass = if inv_mass != 0.0 { 1.0 / inv_mass } else { 0.0 };

        if data.step.warm_starting {
            self.impulse *= data.step.dt_ratio;
            let p = self.impulse * self.u;
            data.velocities[b.index_a].apply(-p, -b.inv_i_a * cross(self.r_a, p), b.inv_mass_a);
            data.velocities[b.index_b].apply(p, b.inv_i_b * cross(self.r_b, p), b.inv_mass_b);
        } else {
            self.impulse = 0.0;
        }
    }

    fn solve_velocity_constraints(&mut self, ctx: &JointCtx, data: &mut SolverData) {
        let b = ctx.bodies;
        let vp_a = data.velocities[b.index_a].at_point(self.r_a);
        let vp_b = data.velocities[b.index_b].at_point(self.r_b);

        let mut c_dot = self.u.dot(vp_b - vp_a);
        // Predictive constraint
        let c = self.length - self.def.max_length;
        if c < 0.0 {
            c_dot += data.step.inv_dt * c;
        }

        let mut impulse = -self.mass * c_dot;
        let old_impulse = self.impulse;
        // The rope only pulls
        self.impulse = (old_impulse + impulse).min(0.0);
        impulse = self.impulse - old_impulse;

        let p = impulse * self.u;
        data.velocities[b.index_a].apply(-p, -b.inv_i_a * cross(self.r_a, p), b.inv_mass_a);
        data.velocities[b.index_b].apply(p, b.inv_i_b * cross(self.r_b, p), b.inv_mass_b);
    }

    fn solve_position_constraints(&mut self, ctx: &JointCtx, data: &mut SolverData) -> bool {
        let b = ctx.bodies;
        let (mut c_a, mut a_a) = data.positions[b.index_a].tuple();
        let (mut c_b, mut a_b) = data.positions[b.index_b].tuple();
        let q_a = Rot::new(a_a);
        let q_b = Rot::new(a_b);

        let r_a = q_a.apply(ctx.local_anchor_a - b.local_center_a);
        let r_b = q_b.apply(ctx.local_anchor_b - b.local_center_b);
        let mut u = c_b + r_b - c_a - r_a;
        let length = u.length();
        if length > f32::EPSILON {
            u /= length;
        }
        let c = (length - self.def.max_length).clamp(0.0, MAX_LINEAR_CORRECTION);

        let impulse = -self.mass * c;
        let p = impulse * u;

        c_a -= b.inv_mass_a * p;
        a_a -= b.inv_i_a * cross(r_a, p);
        c_b += b.inv_mass_b * p;
        a_b += b.inv_i_b * cross(r_b, p);

        data.positions[b.index_a].set(c_a, a_a);
        data.positions[b.index_b].set(c_b, a_b);
        length - self.def.max_length < LINEAR_SLOP
    }
}

// ============================================================================
// Revolute joint
// ============================================================================

pub(crate) struct RevoluteJoint {
    def: RevoluteJointDef,
    /// (x, y) point-to-point impulse, z limit impulse
    impulse: Vec3,
    motor_impulse: f32,
    limit_state: LimitState,
    // solver temp
    r_a: Vec2,
    r_b: Vec2,
    mass: Mat33,
    motor_mass: f32,
}

impl RevoluteJoint {
    fn new(def: RevoluteJointDef) -> Self {
        Self {
            def,
            impulse: Vec3::ZERO,
            motor_impulse: 0.0,
            limit_state: LimitState::Inactive,
            r_a: Vec2::ZERO,
            r_b: Vec2::ZERO,
            mass: Mat33::default(),
            motor_mass: 0.0,
        }
    }

    fn init_velocity_constraints(&mut self, ctx: &JointCtx, data: &mut SolverData) {
        let b = ctx.bodies;
        let a_a = data.positions[b.index_a].a;
        let a_b = data.positions[b.index_b].a;
        let q_a = Rot::new(a_a);
        let q_b = Rot::new(a_b);

        self.r_a = q_a.apply(ctx.local_anchor_a - b.local_center_a);
        self.r_b = q_b.apply(ctx.local_anchor_b - b.local_center_b);

        let (m_a, m_b) = (b.inv_mass_a, b.inv_mass_b);
        let (i_a, i_b) = (b.inv_i_a, b.inv_i_b);
        let fixed_rotation = i_a + i_b == 0.0;

        self.mass.ex.x =
            m_a + m_b + self.r_a.y * self.r_a.y * i_a + self.r_b.y * self.r_b.y * i_b;
        self.mass.ey.x = -self.r_a.y * self.r_a.x * i_a - self.r_b.y * self.r_b.x * i_b;
        self.mass.ez.x = -self.r_a.y * i_a - self.r_b.y * i_b;
        self.mass.ex.y = self.mass.ey.x;
        self.mass.ey.y =
            m_a + m_b + self.r_a.x * self.r_a.x * i_a + self.r_b.x * self.r_b.x * i_b;
        self.mass.ez.y = self.r_a.x * i_a + self.r_b.x * i_b;
        self.mass.ex.z = self.mass.ez.x;
        self.mass.ey.z = self.mass.ez.y;
        self.mass.ez.z = i_a + i_b;

        self.motor_mass = if i_a + i_b > 0.0 { 1.0 / (i_a + i_b) } else { 0.0 };

        if !self.def.enable_motor || fixed_rotation {
            self.motor_impulse = 0.0;
        }

        if self.def.enable_limit && !fixed_rotation {
            let joint_angle = a_b - a_a - self.def.reference_angle;
            if (self.def.upper_angle - self.def.lower_angle).abs() < 2.0 * ANGULAR_SLOP {
                self.limit_state = LimitState::Equal;
            } else if joint_angle <= self.def.lower_angle {
                // Entering a limit resets the accumulated limit impulse
                if self.limit_state != LimitState::AtLower {
                    self.impulse.z = 0.0;
                }
                self.limit_state = LimitState::AtLower;
            } else if joint_angle >= self.def.upper_angle {
                if self.limit_state != LimitState::AtUpper {
                    self.impulse.z = 0.0;
                }
                self.limit_state = LimitState::AtUpper;
            } else {
                self.limit_state = LimitState::Inactive;
                self.impulse.z = 0.0;
            }
        } else {
            self.limit_state = LimitState::Inactive;
        }

        if data.step.warm_starting {
            self.impulse *= data.step.dt_ratio;
            self.motor_impulse *= data.step.dt_ratio;

            let p = Vec2::new(self.impulse.x, self.impulse.y);
            data.velocities[b.index_a].apply(
                -p,
                -i_a * (cross(self.r_a, p) + self.motor_impulse + self.impulse.z),
                m_a,
            );
            data.velocities[b.index_b].apply(
                p,
                i_b * (cross(self.r_b, p) + self.motor_impulse + self.impulse.z),
                m_b,
            );
        } else {
            self.impulse = Vec3::ZERO;
            self.motor_impulse = 0.0;
        }
    }

    fn solve_velocity_constraints(&mut self, ctx: &JointCtx, data: &mut SolverData) {
        let b = ctx.bodies;
        let (m_a, m_b) = (b.inv_mass_a, b.inv_mass_b);
        let (i_a, i_b) = (b.inv_i_a, b.inv_i_b);
        let fixed_rotation = i_a + i_b == 0.0;

        // Motor: clamped torque impulse toward the target angular speed
        if self.def.enable_motor && self.limit_state != LimitState::Equal && !fixed_rotation {
            let w_a = data.velocities[b.index_a].w;
            let w_b = data.velocities[b.index_b].w;
            let c_dot = w_b - w_a - self.def.motor_speed;
            let impulse = -self.motor_mass * c_dot;
            let old_impulse = self.motor_impulse;
            let max_impulse = self.def.max_motor_torque * data.step.dt;
            self.motor_impulse = (old_impulse + impulse).clamp(-max_impulse, max_impulse);
            let impulse = self.motor_impulse - old_impulse;

            data.velocities[b.index_a].w -= i_a * impulse;
            data.velocities[b.index_b].w += i_b * impulse;
        }

        // Limit + point-to-point as one block
        if self.def.enable_limit && self.limit_state != LimitState::Inactive && !fixed_rotation {
            let va = data.velocities[b.index_a];
            let vb = data.velocities[b.index_b];
            let c_dot1 = vb.v + cross_sv(vb.w, self.r_b) - va.v - cross_sv(va.w, self.r_a);
            let c_dot2 = vb.w - va.w;
            let c_dot = Vec3::new(c_dot1.x, c_dot1.y, c_dot2);

            let mut impulse = -self.mass.solve33(c_dot);

            match self.limit_state {
                LimitState::Equal => {
                    self.impulse += impulse;
                }
                LimitState::AtLower => {
                    let new_impulse = self.impulse.z + impulse.z;
                    if new_impulse < 0.0 {
                        let rhs = -c_dot1 + self.impulse.z * Vec2::new(self.mass.ez.x, self.mass.ez.y);
                        let reduced = self.mass.solve22(rhs);
                        impulse.x = reduced.x;
                        impulse.y = reduced.y;
                        impulse.z = -self.impulse.z;
                        self.impulse.x += reduced.x;
                        self.impulse.y += reduced.y;
                        self.impulse.z = 0.0;
                    } else {
                        self.impulse += impulse;
                    }
                }
                LimitState::AtUpper => {
                    let new_impulse = self.impulse.z + impulse.z;
                    if new_impulse > 0.0 {
                        let rhs = -c_dot1 + self.impulse.z * Vec2::new(self.mass.ez.x, self.mass.ez.y);
                        let reduced = self.mass.solve22(rhs);
                        impulse.x = reduced.x;
                        impulse.y = reduced.y;
                        impulse.z = -self.impulse.z;
                        self.impulse.x += reduced.x;
                        self.impulse.y += reduced.y;
                        self.impulse.z = 0.0;
                    } else {
                        self.impulse += impulse;
                    }
                }
                LimitState::Inactive => unreachable!(),
            }

            let p = Vec2::new(impulse.x, impulse.y);
            data.velocities[b.index_a].apply(-p, -i_a * (cross(self.r_a, p) + impulse.z), m_a);
            data.velocities[b.index_b].apply(p, i_b * (cross(self.r_b, p) + impulse.z), m_b);
        } else {
            // Plain point-to-point
            let va = data.velocities[b.index_a];
            let vb = data.velocities[b.index_b];
            let c_dot = vb.v + cross_sv(vb.w, self.r_b) - va.v - cross_sv(va.w, self.r_a);
            let impulse = self.mass.solve22(-c_dot);

            self.impulse.x += impulse.x;
            self.impulse.y += impulse.y;

            data.velocities[b.index_a].apply(-impulse, -i_a * cross(self.r_a, impulse), m_a);
            data.velocities[b.index_b].apply(impulse, i_b * cross(self.r_b, impulse), m_b);
        }
    }

    fn solve_position_constraints(&mut self, ctx: &JointCtx, data: &mut SolverData) -> bool {
        let b = ctx.bodies;
        let (mut c_a, mut a_a) = data.positions[b.index_a].tuple();
        let (mut c_b, mut a_b) = data.positions[b.index_b].tuple();
        let (m_a, m_b) = (b.inv_mass_a, b.inv_mass_b);
        let (i_a, i_b) = (b.inv_i_a, b.inv_i_b);
        let fixed_rotation = i_a + i_b == 0.0;

        let mut angular_error = 0.0_f32;

        if self.def.enable_limit && self.limit_state != LimitState::Inactive && !fixed_rotation {
            let angle = a_b - a_a - self.def.reference_angle;
            let mut limit_impulse = 0.0;
            match self.limit_state {
                LimitState::Equal => {
                    let c = (angle - self.def.lower_angle)
                        .clamp(-MAX_ANGULAR_CORRECTION, MAX_ANGULAR_CORRECTION);
                    limit_impulse = -self.motor_mass * c;
                    angular_error = c.abs();
                }
                LimitState::AtLower => {
                    let mut c = angle - self.def.lower_angle;
                    angular_error = -c;
                    c = (c + ANGULAR_SLOP).clamp(-MAX_ANGULAR_CORRECTION, 0.0);
                    limit_impulse = -self.motor_mass * c;
                }
                LimitState::AtUpper => {
                    let mut c = angle - self.def.upper_angle;
                    angular_error = c;
                    c = (c - ANGULAR_SLOP).clamp(0.0, MAX_ANGULAR_CORRECTION);
                    limit_impulse = -self.motor_mass * c;
                }
                LimitState::Inactive => {}
            }
            a_a -= i_a * limit_impulse;
            a_b += i_b * limit_impulse;
        }

        // Point-to-point correction
        let q_a = Rot::new(a_a);
        let q_b = Rot::new(a_b);
        let r_a = q_a.apply(ctx.local_anchor_a - b.local_center_a);
        let r_b = q_b.apply(ctx.local_anchor_b - b.local_center_b);

        let c = c_b + r_b - c_a - r_a;
        let position_error = c.length();

        let k = Mat22::new(
            Vec2::new(
                m_a + m_b + i_a * r_a.y * r_a.y + i_b * r_b.y * r_b.y,
                -i_a * r_a.x * r_a.y - i_b * r_b.x * r_b.y,
            ),
            Vec2::new(
                -i_a * r_a.x * r_a.y - i_b * r_b.x * r_b.y,
                m_a + m_b + i_a * r_a.x * r_a.x + i_b * r_b.x * r_b.x,
            ),
        );
        let impulse = -k.solve(c);

        c_a -= m_a * impulse;
        a_a -= i_a * cross(r_a, impulse);
        c_b += m_b * impulse;
        a_b += i_b * cross(r_b, impulse);

        data.positions[b.index_a].set(c_a, a_a);
        data.positions[b.index_b].set(c_b, a_b);
        position_error <= LINEAR_SLOP && angular_error <= ANGULAR_SLOP
    }
}

// ============================================================================
// Prismatic joint
// ============================================================================

pub(crate) struct PrismaticJoint {
    def: PrismaticJointDef,
    /// (x) perpendicular impulse, (y) angular impulse, (z) limit impulse
    impulse: Vec3,
    motor_impulse: f32,
    limit_state: LimitState,
    // solver temp
    axis: Vec2,
    perp: Vec2,
    s1: f32,
    s2: f32,
    a1: f32,
    a2: f32,
    k: Mat33,
    motor_mass: f32,
}

impl PrismaticJoint {
    fn new(def: PrismaticJointDef) -> Self {
        Self {
            def,
            impulse: Vec3::ZERO,
            motor_impulse: 0.0,
            limit_state: LimitState::Inactive,
            axis: Vec2::ZERO,
            perp: Vec2::ZERO,
            s1: 0.0,
            s2: 0.0,
            a1: 0.0,
            a2: 0.0,
            k: Mat33::default(),
            motor_mass: 0.0,
        }
    }

    fn init_velocity_constraints(&mut self, ctx: &JointCtx, data: &mut SolverData) {
        let b = ctx.bodies;
        let (c_a, a_a) = data.positions[b.index_a].tuple();
        let (c_b, a_b) = data.positions[b.index_b].tuple();
        let q_a = Rot::new(a_a);
        let q_b = Rot::new(a_b);
        let (m_a, m_b) = (b.inv_mass_a, b.inv_mass_b);
        let (i_a, i_b) = (b.inv_i_a, b.inv_i_b);

        let r_a = q_a.apply(ctx.local_anchor_a - b.local_center_a);
        let r_b = q_b.apply(ctx.local_anchor_b - b.local_center_b);
        let d = (c_b - c_a) + r_b - r_a;

        let local_axis = self.def.local_axis_a.normalize_or(Vec2::X);
        self.axis = q_a.apply(local_axis);
        self.a1 = cross(d + r_a, self.axis);
        self.a2 = cross(r_b, self.axis);

        let motor_mass = m_a + m_b + i_a * self.a1 * self.a1 + i_b * self.a2 * self.a2;
        self.motor_mass = if motor_mass > 0.0 { 1.0 / motor_mass } else { 0.0 };

        self.perp = q_a.apply(cross_sv(1.0, local_axis));
        self.s1 = cross(d + r_a, self.perp);
        self.s2 = cross(r_b, self.perp);

        self.k.ex.x = m_a + m_b + i_a * self.s1 * self.s1 + i_b * self.s2 * self.s2;
        self.k.ex.y = i_a * self.s1 + i_b * self.s2;
        self.k.ex.z = i_a * self.s1 * self.a1 + i_b * self.s2 * self.a2;
        self.k.ey.x = self.k.ex.y;
        self.k.ey.y = if i_a + i_b > 0.0 { i_a + i_b } else { 1.0 };
        self.k.ey.z = i_a * self.a1 + i_b * self.a2;
        self.k.ez.x = self.k.ex.z;
        self.k.ez.y = self.k.ey.z;
        self.k.ez.z = m_a + m_b + i_a * self.a1 * self.a1 + i_b * self.a2 * self.a2;

        if self.def.enable_limit {
            let translation = self.axis.dot(d);
            if (self.def.upper_translation - self.def.lower_translation).abs() < 2.0 * LINEAR_SLOP
            {
                self.limit_state = LimitState::Equal;
            } else if translation <= self.def.lower_translation {
                if self.limit_state != LimitState::AtLower {
                    self.limit_state = LimitState::AtLower;
                    self.impulse.z = 0.0;
                }
            } else if translation >= self.def.upper_translation {
                if self.limit_state != LimitState::AtUpper {
                    self.limit_state = LimitState::AtUpper;
                    self.impulse.z = 0.0;
                }
            } else {
                self.limit_state = LimitState::Inactive;
                self.impulse.z = 0.0;
            }
        } else {
            self.limit_state = LimitState::Inactive;
            self.impulse.z = 0.0;
        }

        if !self.def.enable_motor {
            self.motor_impulse = 0.0;
        }

        if data.step.warm_starting {
            self.impulse *= data.step.dt_ratio;
            self.motor_impulse *= data.step.dt_ratio;

            let p = self.impulse.x * self.perp + (self.motor_impulse + self.impulse.z) * self.axis;
            let l_a =
                self.impulse.x * self.s1 + self.impulse.y + (self.motor_impulse + self.impulse.z) * self.a1;
            let l_b =
                self.impulse.x * self.s2 + self.impulse.y + (self.motor_impulse + self.impulse.z) * self.a2;

            data.velocities[b.index_a].apply(-p, -i_a * l_a, m_a);
            data.velocities[b.index_b].apply(p, i_b * l_b, m_b);
        } else {
            self.impulse = Vec3::ZERO;
            self.motor_impulse = 0.0;
        }
    }

    fn solve_velocity_constraints(&mut self, ctx: &JointCtx, data: &mut SolverData) {
        let b = ctx.bodies;
        let (m_a, m_b) = (b.inv_mass_a, b.inv_mass_b);
        let (i_a, i_b) = (b.inv_i_a, b.inv_i_b);

        // Motor
        if self.def.enable_motor && self.limit_state != LimitState::Equal {
            let va = data.velocities[b.index_a];
            let vb = data.velocities[b.index_b];
            let c_dot = self.axis.dot(vb.v - va.v) + self.a2 * vb.w - self.a1 * va.w;
            let impulse = self.motor_mass * (self.def.motor_speed - c_dot);
            let old_impulse = self.motor_impulse;
            let max_impulse = self.def.max_motor_force * data.step.dt;
            self.motor_impulse = (old_impulse + impulse).clamp(-max_impulse, max_impulse);
            let impulse = self.motor_impulse - old_impulse;

            let p = impulse * self.axis;
            data.velocities[b.index_a].apply(-p, -i_a * impulse * self.a1, m_a);
            data.velocities[b.index_b].apply(p, i_b * impulse * self.a2, m_b);
        }

        let va = data.velocities[b.index_a];
        let vb = data.velocities[b.index_b];
        let c_dot1 = Vec2::new(
            self.perp.dot(vb.v - va.v) + self.s2 * vb.w - self.s1 * va.w,
            vb.w - va.w,
        );

        if self.def.enable_limit && self.limit_state != LimitState::Inactive {
            let c_dot2 = self.axis.dot(vb.v - va.v) + self.a2 * vb.w - self.a1 * va.w;
            let c_dot = Vec3::new(c_dot1.x, c_dot1.y, c_dot2);

            let f1 = self.impulse;
            self.impulse += self.k.solve33(-c_dot);

            match self.limit_state {
                LimitState::AtLower => self.impulse.z = self.impulse.z.max(0.0),
                LimitState::AtUpper => self.impulse.z = self.impulse.z.min(0.0),
                _ => {}
            }

            // Re-solve the perpendicular/angular block against the clamped
            // limit impulse
            let rhs =
                -c_dot1 - (self.impulse.z - f1.z) * Vec2::new(self.k.ez.x, self.k.ez.y);
            let f2r = self.k.solve22(rhs) + Vec2::new(f1.x, f1.y);
            self.impulse.x = f2r.x;
            self.impulse.y = f2r.y;

            let df = self.impulse - f1;
            let p = df.x * self.perp + df.z * self.axis;
            let l_a = df.x * self.s1 + df.y + df.z * self.a1;
            let l_b = df.x * self.s2 + df.y + df.z * self.a2;

            data.velocities[b.index_a].apply(-p, -i_a * l_a, m_a);
            data.velocities[b.index_b].apply(p, i_b * l_b, m_b);
        } else {
            let df = self.k.solve22(-c_dot1);
            self.impulse.x += df.x;
            self.impulse.y += df.y;

            let p = df.x * self.perp;
            let l_a = df.x * self.s1 + df.y;
            let l_b = df.x * self.s2 + df.y;

            data.velocities[b.index_a].apply(-p, -i_a * l_a, m_a);
            data.velocities[b.index_b].apply(p, i_b * l_b, m_b);
        }
    }

    fn solve_position_constraints(&mut self, ctx: &JointCtx, data: &mut SolverData) -> bool {
        let b = ctx.bodies;
        let (mut c_a, mut a_a) = data.positions[b.index_a].tuple();
        let (mut c_b, mut a_b) = data.positions[b.index_b].tuple();
        let q_a = Rot::new(a_a);
        let q_b = Rot::new(a_b);
        let (m_a, m_b) = (b.inv_mass_a, b.inv_mass_b);
        let (i_a, i_b) = (b.inv_i_a, b.inv_i_b);

        let r_a = q_a.apply(ctx.local_anchor_a - b.local_center_a);
        let r_b = q_b.apply(ctx.local_anchor_b - b.local_center_b);
        let d = c_b + r_b - c_a - r_a;

        let local_axis = self.def.local_axis_a.normalize_or(Vec2::X);
        let axis = q_a.apply(local_axis);
        let a1 = cross(d + r_a, axis);
        let a2 = cross(r_b, axis);
        let perp = q_a.apply(cross_sv(1.0, local_axis));
        let s1 = cross(d + r_a, perp);
        let s2 = cross(r_b, perp);

        let c1 = Vec2::new(perp.dot(d), a_b - a_a - self.def.reference_angle);
        let linear_error;
        let angular_error = c1.y.abs();

        let mut active = false;
        let mut c2 = 0.0_f32;
        if self.def.enable_limit {
            let translation = axis.dot(d);
            if (self.def.upper_translation - self.def.lower_translation).abs() < 2.0 * LINEAR_SLOP
            {
                c2 = translation.clamp(-MAX_LINEAR_CORRECTION, MAX_LINEAR_CORRECTION);
                linear_error = c1.x.abs().max(translation.abs());
                active = true;
            } else if translation <= self.def.lower_translation {
                c2 = (translation - self.def.lower_translation + LINEAR_SLOP)
                    .clamp(-MAX_LINEAR_CORRECTION, 0.0);
                linear_error = c1.x.abs().max(self.def.lower_translation - translation);
                active = true;
            } else if translation >= self.def.upper_translation {
                c2 = (translation - self.def.upper_translation - LINEAR_SLOP)
                    .clamp(0.0, MAX_LINEAR_CORRECTION);
                linear_error = c1.x.abs().max(translation - self.def.upper_translation);
                active = true;
            } else {
                linear_error = c1.x.abs();
            }
        } else {
            linear_error = c1.x.abs();
        }

        let impulse;
        if active {
            let mut k = Mat33::default();
            k.ex.x = m_a + m_b + i_a * s1 * s1 + i_b * s2 * s2;
            k.ex.y = i_a * s1 + i_b * s2;
            k.ex.z = i_a * s1 * a1 + i_b * s2 * a2;
            k.ey.x = k.ex.y;
            k.ey.y = if i_a + i_b > 0.0 { i_a + i_b } else { 1.0 };
            k.ey.z = i_a * a1 + i_b * a2;
            k.ez.x = k.ex.z;
            k.ez.y = k.ey.z;
            k.ez.z = m_a + m_b + i_a * a1 * a1 + i_b * a2 * a2;

            let c = Vec3::new(c1.x, c1.y, c2);
            impulse = k.solve33(-c);
        } else {
            let mut k = Mat33::default();
            k.ex.x = m_a + m_b + i_a * s1 * s1 + i_b * s2 * s2;
            k.ex.y = i_a * s1 + i_b * s2;
            k.ey.x = k.ex.y;
            k.ey.y = if i_a + i_b > 0.0 { i_a + i_b } else { 1.0 };

            let impulse1 = k.solve22(-c1);
            impulse = Vec3::new(impulse1.x, impulse1.y, 0.0);
        }

        let p = impulse.x * perp + impulse.z * axis;
        let l_a = impulse.x * s1 + impulse.y + impulse.z * a1;
        let l_b = impulse.x * s2 + impulse.y + impulse.z * a2;

        c_a -= m_a * p;
        a_a -= i_a * l_a;
        c_b += m_b * p;
        a_b += i_b * l_b;

        data.positions[b.index_a].set(c_a, a_a);
        data.positions[b.index_b].set(c_b, a_b);
        linear_error <= LINEAR_SLOP && angular_error <= ANGULAR_SLOP
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::{PositionState, TimeStep, VelocityState};

    fn ctx(inv_mass_b: f32, inv_i_b: f32) -> JointCtx {
        JointCtx {
            bodies: JointBodies {
                index_a: 0,
                index_b: 1,
                local_center_a: Vec2::ZERO,
                local_center_b: Vec2::ZERO,
                inv_mass_a: 0.0,
                inv_mass_b,
                inv_i_a: 0.0,
                inv_i_b,
            },
            local_anchor_a: Vec2::ZERO,
            local_anchor_b: Vec2::ZERO,
        }
    }

    fn step(dt: f32) -> TimeStep {
        TimeStep {
            dt,
            inv_dt: 1.0 / dt,
            dt_ratio: 1.0,
            velocity_iterations: 8,
            position_iterations: 3,
            warm_starting: true,
        }
    }

    #[test]
    fn test_rope_only_pulls() {
        // Static body at origin, dynamic body inside the rope radius moving
        // further in: rope must not push it back out
        let mut positions = vec![
            PositionState { c: Vec2::ZERO, a: 0.0 },
            PositionState {
                c: Vec2::new(1.0, 0.0),
                a: 0.0,
            },
        ];
        let mut velocities = vec![
            VelocityState { v: Vec2::ZERO, w: 0.0 },
            VelocityState {
                v: Vec2::new(-1.0, 0.0),
                w: 0.0,
            },
        ];
        let mut data = SolverData {
            step: step(1.0 / 60.0),
            positions: &mut positions,
            velocities: &mut velocities,
        };

        let mut rope = RopeJoint::new(RopeJointDef { max_length: 2.0 });
        let c = ctx(1.0, 1.0);
        rope.init_velocity_constraints(&c, &mut data);
        assert_eq!(rope.state, LimitState::Inactive);
        rope.solve_velocity_constraints(&c, &mut data);
        // Inward velocity must be untouched (impulse clamped to <= 0)
        assert!((data.velocities[1].v.x + 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_rope_restrains_overstretch() {
        let mut positions = vec![
            PositionState { c: Vec2::ZERO, a: 0.0 },
            PositionState {
                c: Vec2::new(3.0, 0.0),
                a: 0.0,
            },
        ];
        let mut velocities = vec![
            VelocityState { v: Vec2::ZERO, w: 0.0 },
            VelocityState {
                v: Vec2::new(1.0, 0.0),
                w: 0.0,
            },
        ];
        let mut data = SolverData {
            step: step(1.0 / 60.0),
            positions: &mut positions,
            velocities: &mut velocities,
        };

        let mut rope = RopeJoint::new(RopeJointDef { max_length: 2.0 });
        let c = ctx(1.0, 0.0);
        rope.init_velocity_constraints(&c, &mut data);
        assert_eq!(rope.state, LimitState::AtUpper);
        rope.solve_velocity_constraints(&c, &mut data);
        assert!(
            data.velocities[1].v.x <= 1e-4,
            "outward velocity must be removed, got {}",
            data.velocities[1].v.x
        );
    }

    #[test]
    fn test_revolute_limit_transition_resets_impulse() {
        let mut positions = vec![
            PositionState { c: Vec2::ZERO, a: 0.0 },
            PositionState {
                c: Vec2::ZERO,
                // Below the lower limit
                a: -1.0,
            },
        ];
        let mut velocities = vec![
            VelocityState { v: Vec2::ZERO, w: 0.0 },
            VelocityState { v: Vec2::ZERO, w: 0.0 },
        ];
        let mut data = SolverData {
            step: step(1.0 / 60.0),
            positions: &mut positions,
            velocities: &mut velocities,
        };

        let mut joint = RevoluteJoint::new(RevoluteJointDef {
            reference_angle: 0.0,
            enable_limit: true,
            lower_angle: -0.5,
            upper_angle: 0.5,
            enable_motor: false,
            motor_speed: 0.0,
            max_motor_torque: 0.0,
        });
        let c = ctx(1.0, 1.0);

        joint.init_velocity_constraints(&c, &mut data);
        assert_eq!(joint.limit_state, LimitState::AtLower);
        // Fake an accumulated limit impulse
        joint.impulse.z = 3.0;

        // Move inside the limits: state becomes inactive, impulse resets
        data.positions[1].a = 0.0;
        joint.init_velocity_constraints(&c, &mut data);
        assert_eq!(joint.limit_state, LimitState::Inactive);
        assert_eq!(joint.impulse.z, 0.0, "limit impulse must reset on transition");
    }

    #[test]
    fn test_revolute_motor_clamped() {
        let mut positions = vec![
            PositionState { c: Vec2::ZERO, a: 0.0 },
            PositionState { c: Vec2::ZERO, a: 0.0 },
        ];
        let mut velocities = vec![
            VelocityState { v: Vec2::ZERO, w: 0.0 },
            VelocityState { v: Vec2::ZERO, w: 0.0 },
        ];
        let dt = 1.0 / 60.0;
        let mut data = SolverData {
            step: step(dt),
            positions: &mut positions,
            velocities: &mut velocities,
        };

        let max_torque = 2.0;
        let mut joint = RevoluteJoint::new(RevoluteJointDef {
            reference_angle: 0.0,
            enable_limit: false,
            lower_angle: 0.0,
            upper_angle: 0.0,
            enable_motor: true,
            // Unreachably fast target: impulse must hit the clamp
            motor_speed: 1000.0,
            max_motor_torque: max_torque,
        });
        let c = ctx(1.0, 1.0);
        joint.init_velocity_constraints(&c, &mut data);
        for _ in 0..10 {
            joint.solve_velocity_constraints(&c, &mut data);
        }
        let max_impulse = max_torque * dt;
        assert!(
            joint.motor_impulse.abs() <= max_impulse + 1e-6,
            "motor impulse {} exceeded clamp {}",
            joint.motor_impulse,
            max_impulse
        );
    }

    #[test]
    fn test_distance_spring_position_solver_is_trivially_satisfied() {
        let mut joint = DistanceJoint::new(DistanceJointDef {
            length: 1.0,
            frequency_hz: 4.0,
            damping_ratio: 0.5,
        });
        let mut positions = vec![
            PositionState { c: Vec2::ZERO, a: 0.0 },
            PositionState {
                c: Vec2::new(5.0, 0.0),
                a: 0.0,
            },
        ];
        let mut velocities = vec![
            VelocityState { v: Vec2::ZERO, w: 0.0 },
            VelocityState { v: Vec2::ZERO, w: 0.0 },
        ];
        let mut data = SolverData {
            step: step(1.0 / 60.0),
            positions: &mut positions,
            velocities: &mut velocities,
        };
        let c = ctx(1.0, 1.0);
        assert!(joint.solve_position_constraints(&c, &mut data));
        // Rigid distance joint does correct
        joint.def.frequency_hz = 0.0;
        joint.mass = 1.0;
        assert!(!joint.solve_position_constraints(&c, &mut data));
    }

    #[test]
    fn test_prismatic_constrains_perpendicular_velocity() {
        let mut positions = vec![
            PositionState { c: Vec2::ZERO, a: 0.0 },
            PositionState {
                c: Vec2::new(1.0, 0.0),
                a: 0.0,
            },
        ];
        let mut velocities = vec![
            VelocityState { v: Vec2::ZERO, w: 0.0 },
            VelocityState {
                v: Vec2::new(1.0, 1.0),
                w: 0.0,
            },
        ];
        let mut data = SolverData {
            step: step(1.0 / 60.0),
            positions: &mut positions,
            velocities: &mut velocities,
        };

        let mut joint = PrismaticJoint::new(PrismaticJointDef {
            local_axis_a: Vec2::X,
            reference_angle: 0.0,
            enable_limit: false,
            lower_translation: 0.0,
            upper_translation: 0.0,
            enable_motor: false,
            motor_speed: 0.0,
            max_motor_force: 0.0,
        });
        let c = ctx(1.0, 1.0);
        joint.init_velocity_constraints(&c, &mut data);
        for _ in 0..8 {
            joint.solve_velocity_constraints(&c, &mut data);
        }
        // Motion along the axis survives, perpendicular motion is removed
        assert!((data.velocities[1].v.x - 1.0).abs() < 1e-3);
        assert!(data.velocities[1].v.y.abs() < 1e-3);
    }
}
