//! Island Solver
//!
//! Solves one island (a connected group of awake bodies coupled by
//! contacts and joints) per call:
//!
//! 1. Integrate forces into velocities (semi-implicit Euler, exponential
//!    damping decay)
//! 2. Velocity constraint iterations over contacts and joints jointly,
//!    warm-started from the previous step's impulses scaled by the
//!    timestep ratio
//! 3. Integrate positions from the solved velocities
//! 4. Position constraint iterations (Baumgarte correction); the island
//!    counts as solved when every constraint reports within tolerance or
//!    the iteration limit runs out — the limit is never exceeded
//! 5. Sleep bookkeeping: bodies below the velocity thresholds for longer
//!    than the sleep time, with sleeping allowed, go to sleep as a group
//!
//! The contact solver uses sequential impulses with accumulated clamping;
//! friction is clamped to the friction cone of the accumulated normal
//! impulse.

use std::collections::BTreeMap;

use crate::arena::Arena;
use crate::body::{Body, BodyType};
use crate::contact::{Contact, ContactKey, ManifoldKind, WorldManifold, MAX_MANIFOLD_POINTS};
use crate::joints::Joint;
use crate::math::{cross, cross_sv, cross_vs, Rot, Transform2, Vec2};

// ============================================================================
// Tuning constants
// ============================================================================

/// Collision/constraint tolerance in meters.
pub const LINEAR_SLOP: f32 = 0.005;
/// Angular tolerance (about 2 degrees).
pub const ANGULAR_SLOP: f32 = 2.0 / 180.0 * core::f32::consts::PI;
/// Maximum positional correction applied in one position iteration.
pub const MAX_LINEAR_CORRECTION: f32 = 0.2;
/// Maximum angular correction applied in one position iteration.
pub const MAX_ANGULAR_CORRECTION: f32 = 8.0 / 180.0 * core::f32::consts::PI;
/// Baumgarte factor for positional drift correction.
pub const BAUMGARTE: f32 = 0.2;
/// Relative normal velocity below which restitution is ignored.
pub const VELOCITY_THRESHOLD: f32 = 1.0;
/// Maximum translation per step (keeps explosive impulses bounded).
pub const MAX_TRANSLATION: f32 = 2.0;
/// Maximum rotation per step.
pub const MAX_ROTATION: f32 = 0.5 * core::f32::consts::PI;
/// Seconds under the sleep thresholds before a body may sleep.
pub const TIME_TO_SLEEP: f32 = 0.5;
/// Linear speed below which a body counts as idle.
pub const LINEAR_SLEEP_TOLERANCE: f32 = 0.01;
/// Angular speed below which a body counts as idle.
pub const ANGULAR_SLEEP_TOLERANCE: f32 = 2.0 / 180.0 * core::f32::consts::PI;

// ============================================================================
// Step state
// ============================================================================

/// Per-step timing and iteration limits.
#[derive(Clone, Copy, Debug)]
pub struct TimeStep {
    pub dt: f32,
    pub inv_dt: f32,
    /// `dt / previous dt`; scales warm-start impulses across variable steps
    pub dt_ratio: f32,
    pub velocity_iterations: u32,
    pub position_iterations: u32,
    pub warm_starting: bool,
}

/// Solver-local body position state (world center of mass + angle).
#[derive(Clone, Copy, Debug, Default)]
pub struct PositionState {
    pub c: Vec2,
    pub a: f32,
}

impl PositionState {
    #[inline]
    pub(crate) fn tuple(&self) -> (Vec2, f32) {
        (self.c, self.a)
    }

    #[inline]
    pub(crate) fn set(&mut self, c: Vec2, a: f32) {
        self.c = c;
        self.a = a;
    }

    /// Body transform implied by this state.
    #[inline]
    fn transform(&self, local_center: Vec2) -> Transform2 {
        let q = Rot::new(self.a);
        Transform2 {
            p: self.c - q.apply(local_center),
            q,
        }
    }
}

/// Solver-local body velocity state.
#[derive(Clone, Copy, Debug, Default)]
pub struct VelocityState {
    pub v: Vec2,
    pub w: f32,
}

impl VelocityState {
    /// Velocity of a point offset `r` from the center of mass.
    #[inline]
    pub(crate) fn at_point(&self, r: Vec2) -> Vec2 {
        self.v + cross_sv(self.w, r)
    }

    /// Apply an impulse (`v += inv_mass * p`) plus an angular delta.
    #[inline]
    pub(crate) fn apply(&mut self, p: Vec2, dw: f32, inv_mass: f32) {
        self.v += inv_mass * p;
        self.w += dw;
    }
}

/// Shared state passed through every constraint solver call.
pub struct SolverData<'a> {
    pub step: TimeStep,
    pub positions: &'a mut [PositionState],
    pub velocities: &'a mut [VelocityState],
}

// ============================================================================
// Island
// ============================================================================

/// A connected set of awake bodies plus the constraints coupling them.
#[derive(Default)]
pub(crate) struct Island {
    /// Body arena slot indices; `body.island_index` is the position here
    pub bodies: Vec<u32>,
    pub contacts: Vec<ContactKey>,
    pub joints: Vec<u32>,
}

/// Solve one island for one sub-step. Accumulated contact impulses are
/// stored back into the manifolds for warm starting and event reporting.
pub(crate) fn solve_island(
    island: &Island,
    step: &TimeStep,
    gravity: Vec2,
    allow_sleep: bool,
    bodies: &mut Arena<Body>,
    contacts: &mut BTreeMap<ContactKey, Contact>,
    joints: &mut Arena<Joint>,
) {
    let n = island.bodies.len();
    let mut positions = vec![PositionState::default(); n];
    let mut velocities = vec![VelocityState::default(); n];

    // 1. Integrate velocities (awake dynamic bodies only; the island holds
    // no sleeping bodies by construction)
    for (i, &slot) in island.bodies.iter().enumerate() {
        let body = bodies.get_by_index_mut(slot).expect("island body missing");
        debug_assert_eq!(body.island_index, i as i32);

        let mut v = body.linear_velocity;
        let mut w = body.angular_velocity;

        if body.body_type == BodyType::Dynamic {
            v += step.dt * (body.gravity_scale * gravity + body.inv_mass * body.force);
            w += step.dt * body.inv_inertia * body.torque;

            // Exponential damping decay: v' = v / (1 + dt * d)
            v *= 1.0 / (1.0 + step.dt * body.linear_damping);
            w *= 1.0 / (1.0 + step.dt * body.angular_damping);
        }

        positions[i] = PositionState {
            c: body.world_center,
            a: body.angle,
        };
        velocities[i] = VelocityState { v, w };
    }

    let mut data = SolverData {
        step: *step,
        positions: &mut positions,
        velocities: &mut velocities,
    };

    // 2. Initialize constraints and warm start
    let mut contact_solver = ContactSolver::new(island, step, bodies, contacts, &mut data);
    contact_solver.warm_start(&mut data);
    for &joint_slot in &island.joints {
        let joint = joints.get_by_index_mut(joint_slot).expect("island joint missing");
        joint.init_velocity_constraints(&mut data);
    }

    // Velocity iterations
    for _ in 0..step.velocity_iterations {
        for &joint_slot in &island.joints {
            let joint = joints.get_by_index_mut(joint_slot).expect("island joint missing");
            joint.solve_velocity_constraints(&mut data);
        }
        contact_solver.solve_velocity(&mut data);
    }
    contact_solver.store_impulses(contacts);

    // 3. Integrate positions
    for i in 0..n {
        let mut c = data.positions[i].c;
        let mut a = data.positions[i].a;
        let mut v = data.velocities[i].v;
        let mut w = data.velocities[i].w;

        // Clamp large motion
        let translation = step.dt * v;
        if translation.length_squared() > MAX_TRANSLATION * MAX_TRANSLATION {
            v *= MAX_TRANSLATION / translation.length();
        }
        let rotation = step.dt * w;
        if rotation * rotation > MAX_ROTATION * MAX_ROTATION {
            w *= MAX_ROTATION / rotation.abs();
        }

        c += step.dt * v;
        a += step.dt * w;

        data.positions[i].set(c, a);
        data.velocities[i] = VelocityState { v, w };
    }

    // 4. Position correction, bounded by the iteration limit
    let mut position_solved = false;
    for _ in 0..step.position_iterations {
        let contacts_ok = contact_solver.solve_position(&mut data);
        let mut joints_ok = true;
        for &joint_slot in &island.joints {
            let joint = joints.get_by_index_mut(joint_slot).expect("island joint missing");
            let ok = joint.solve_position_constraints(&mut data);
            joints_ok = joints_ok && ok;
        }
        if contacts_ok && joints_ok {
            position_solved = true;
            break;
        }
    }

    // Write state back to the bodies
    for (i, &slot) in island.bodies.iter().enumerate() {
        let body = bodies.get_by_index_mut(slot).expect("island body missing");
        if body.body_type == BodyType::Static {
            continue;
        }
        body.set_center_and_angle(data.positions[i].c, data.positions[i].a);
        body.linear_velocity = data.velocities[i].v;
        body.angular_velocity = data.velocities[i].w;
        body.force = Vec2::ZERO;
        body.torque = 0.0;
    }

    // 5. Sleep management: the island sleeps as a whole or not at all
    if allow_sleep {
        let mut min_sleep_time = f32::MAX;
        let lin_tol_sq = LINEAR_SLEEP_TOLERANCE * LINEAR_SLEEP_TOLERANCE;
        let ang_tol_sq = ANGULAR_SLEEP_TOLERANCE * ANGULAR_SLEEP_TOLERANCE;

        for &slot in &island.bodies {
            let body = bodies.get_by_index_mut(slot).expect("island body missing");
            if body.body_type == BodyType::Static {
                continue;
            }
            if !body.allow_sleep
                || body.angular_velocity * body.angular_velocity > ang_tol_sq
                || body.linear_velocity.length_squared() > lin_tol_sq
            {
                body.sleep_time = 0.0;
                min_sleep_time = 0.0;
            } else {
                body.sleep_time += step.dt;
                min_sleep_time = min_sleep_time.min(body.sleep_time);
            }
        }

        if min_sleep_time >= TIME_TO_SLEEP && position_solved {
            for &slot in &island.bodies {
                let body = bodies.get_by_index_mut(slot).expect("island body missing");
                if body.body_type != BodyType::Static {
                    body.set_awake(false);
                }
            }
        }
    }
}

// ============================================================================
// Contact solver
// ============================================================================

#[derive(Clone, Copy, Default)]
struct VelocityConstraintPoint {
    r_a: Vec2,
    r_b: Vec2,
    normal_impulse: f32,
    tangent_impulse: f32,
    normal_mass: f32,
    tangent_mass: f32,
    velocity_bias: f32,
}

struct VelocityConstraint {
    points: [VelocityConstraintPoint; MAX_MANIFOLD_POINTS],
    count: usize,
    normal: Vec2,
    friction: f32,
    index_a: usize,
    index_b: usize,
    inv_mass_a: f32,
    inv_mass_b: f32,
    inv_i_a: f32,
    inv_i_b: f32,
    key: ContactKey,
}

struct PositionConstraint {
    local_points: [Vec2; MAX_MANIFOLD_POINTS],
    count: usize,
    local_normal: Vec2,
    local_point: Vec2,
    kind: ManifoldKind,
    index_a: usize,
    index_b: usize,
    inv_mass_a: f32,
    inv_mass_b: f32,
    inv_i_a: f32,
    inv_i_b: f32,
    local_center_a: Vec2,
    local_center_b: Vec2,
    radius_a: f32,
    radius_b: f32,
}

/// Sequential-impulse solver over the island's touching solid contacts.
struct ContactSolver {
    velocity_constraints: Vec<VelocityConstraint>,
    position_constraints: Vec<PositionConstraint>,
}

impl ContactSolver {
    fn new(
        island: &Island,
        step: &TimeStep,
        bodies: &Arena<Body>,
        contacts: &BTreeMap<ContactKey, Contact>,
        data: &mut SolverData,
    ) -> Self {
        let mut solver = Self {
            velocity_constraints: Vec::with_capacity(island.contacts.len()),
            position_constraints: Vec::with_capacity(island.contacts.len()),
        };

        for &key in &island.contacts {
            let Some(contact) = contacts.get(&key) else {
                continue;
            };
            debug_assert!(contact.touching && !contact.sensor);
            let manifold = &contact.manifold;
            if manifold.count == 0 {
                continue;
            }

            let body_a = bodies.get_by_index(contact.target_a.body).expect("contact body");
            let body_b = bodies.get_by_index(contact.target_b.body).expect("contact body");
            let index_a = body_a.island_index as usize;
            let index_b = body_b.island_index as usize;

            let mut vc = VelocityConstraint {
                points: [VelocityConstraintPoint::default(); MAX_MANIFOLD_POINTS],
                count: manifold.count,
                normal: Vec2::ZERO,
                friction: contact.friction,
                index_a,
                index_b,
                inv_mass_a: body_a.inv_mass,
                inv_mass_b: body_b.inv_mass,
                inv_i_a: body_a.inv_inertia,
                inv_i_b: body_b.inv_inertia,
                key,
            };
            let pc = PositionConstraint {
                local_points: core::array::from_fn(|i| manifold.points[i].local_point),
                count: manifold.count,
                local_normal: manifold.local_normal,
                local_point: manifold.local_point,
                kind: manifold.kind,
                index_a,
                index_b,
                inv_mass_a: body_a.inv_mass,
                inv_mass_b: body_b.inv_mass,
                inv_i_a: body_a.inv_inertia,
                inv_i_b: body_b.inv_inertia,
                local_center_a: body_a.local_center,
                local_center_b: body_b.local_center,
                radius_a: contact.radius_a,
                radius_b: contact.radius_b,
            };

            // World-space setup from the pre-solve poses
            let xf_a = data.positions[index_a].transform(body_a.local_center);
            let xf_b = data.positions[index_b].transform(body_b.local_center);
            let wm = WorldManifold::new(manifold, &xf_a, contact.radius_a, &xf_b, contact.radius_b);
            vc.normal = wm.normal;
            let tangent = cross_vs(vc.normal, 1.0);

            let c_a = data.positions[index_a].c;
            let c_b = data.positions[index_b].c;

            for i in 0..manifold.count {
                let mp = &manifold.points[i];
                let point = &mut vc.points[i];

                point.r_a = wm.points[i] - c_a;
                point.r_b = wm.points[i] - c_b;

                // Warm-start impulses carry over scaled by the dt ratio
                point.normal_impulse = step.dt_ratio * mp.normal_impulse;
                point.tangent_impulse = step.dt_ratio * mp.tangent_impulse;

                let rn_a = cross(point.r_a, vc.normal);
                let rn_b = cross(point.r_b, vc.normal);
                let k_normal = vc.inv_mass_a
                    + vc.inv_mass_b
                    + vc.inv_i_a * rn_a * rn_a
                    + vc.inv_i_b * rn_b * rn_b;
                point.normal_mass = if k_normal > 0.0 { 1.0 / k_normal } else { 0.0 };

                let rt_a = cross(point.r_a, tangent);
                let rt_b = cross(point.r_b, tangent);
                let k_tangent = vc.inv_mass_a
                    + vc.inv_mass_b
                    + vc.inv_i_a * rt_a * rt_a
                    + vc.inv_i_b * rt_b * rt_b;
                point.tangent_mass = if k_tangent > 0.0 { 1.0 / k_tangent } else { 0.0 };

                // Restitution bias from the approach speed
                point.velocity_bias = 0.0;
                let v_rel = vc.normal.dot(
                    data.velocities[index_b].at_point(point.r_b)
                        - data.velocities[index_a].at_point(point.r_a),
                );
                if v_rel < -VELOCITY_THRESHOLD {
                    point.velocity_bias = -contact.restitution * v_rel;
                }
            }

            solver.velocity_constraints.push(vc);
            solver.position_constraints.push(pc);
        }
        solver
    }

    fn warm_start(&mut self, data: &mut SolverData) {
        if !data.step.warm_starting {
            for vc in &mut self.velocity_constraints {
                for point in &mut vc.points[..vc.count] {
                    point.normal_impulse = 0.0;
                    point.tangent_impulse = 0.0;
                }
            }
            return;
        }
        for vc in &self.velocity_constraints {
            let tangent = cross_vs(vc.normal, 1.0);
            for point in &vc.points[..vc.count] {
                let p = point.normal_impulse * vc.normal + point.tangent_impulse * tangent;
                data.velocities[vc.index_a].apply(
                    -p,
                    -vc.inv_i_a * cross(point.r_a, p),
                    vc.inv_mass_a,
                );
                data.velocities[vc.index_b].apply(
                    p,
                    vc.inv_i_b * cross(point.r_b, p),
                    vc.inv_mass_b,
                );
            }
        }
    }

    fn solve_velocity(&mut self, data: &mut SolverData) {
        for vc in &mut self.velocity_constraints {
            let normal = vc.normal;
            let tangent = cross_vs(normal, 1.0);

            for point in &mut vc.points[..vc.count] {
                // Friction first, clamped to the cone of the accumulated
                // normal impulse
                let dv = data.velocities[vc.index_b].at_point(point.r_b)
                    - data.velocities[vc.index_a].at_point(point.r_a);
                let vt = dv.dot(tangent);
                let lambda = point.tangent_mass * (-vt);

                let max_friction = vc.friction * point.normal_impulse;
                let new_impulse =
                    (point.tangent_impulse + lambda).clamp(-max_friction, max_friction);
                let lambda = new_impulse - point.tangent_impulse;
                point.tangent_impulse = new_impulse;

                let p = lambda * tangent;
                data.velocities[vc.index_a].apply(
                    -p,
                    -vc.inv_i_a * cross(point.r_a, p),
                    vc.inv_mass_a,
                );
                data.velocities[vc.index_b].apply(
                    p,
                    vc.inv_i_b * cross(point.r_b, p),
                    vc.inv_mass_b,
                );

                // Normal impulse, accumulated and clamped non-negative
                let dv = data.velocities[vc.index_b].at_point(point.r_b)
                    - data.velocities[vc.index_a].at_point(point.r_a);
                let vn = dv.dot(normal);
                let lambda = -point.normal_mass * (vn - point.velocity_bias);

                let new_impulse = (point.normal_impulse + lambda).max(0.0);
                let lambda = new_impulse - point.normal_impulse;
                point.normal_impulse = new_impulse;

                let p = lambda * normal;
                data.velocities[vc.index_a].apply(
                    -p,
                    -vc.inv_i_a * cross(point.r_a, p),
                    vc.inv_mass_a,
                );
                data.velocities[vc.index_b].apply(
                    p,
                    vc.inv_i_b * cross(point.r_b, p),
                    vc.inv_mass_b,
                );
            }
        }
    }

    /// Copy accumulated impulses back into the contact manifolds so the
    /// next step warm-starts from them and callbacks can report them.
    fn store_impulses(&self, contacts: &mut BTreeMap<ContactKey, Contact>) {
        for vc in &self.velocity_constraints {
            if let Some(contact) = contacts.get_mut(&vc.key) {
                for i in 0..vc.count {
                    contact.manifold.points[i].normal_impulse = vc.points[i].normal_impulse;
                    contact.manifold.points[i].tangent_impulse = vc.points[i].tangent_impulse;
                }
            }
        }
    }

    /// One Baumgarte position iteration. Returns true when every contact's
    /// penetration is within tolerance.
    fn solve_position(&mut self, data: &mut SolverData) -> bool {
        let mut min_separation = 0.0_f32;

        for pc in &self.position_constraints {
            let (mut c_a, mut a_a) = data.positions[pc.index_a].tuple();
            let (mut c_b, mut a_b) = data.positions[pc.index_b].tuple();

            for i in 0..pc.count {
                let xf_a = PositionState { c: c_a, a: a_a }.transform(pc.local_center_a);
                let xf_b = PositionState { c: c_b, a: a_b }.transform(pc.local_center_b);

                let (normal, point, separation) = position_manifold(pc, &xf_a, &xf_b, i);
                min_separation = min_separation.min(separation);

                let r_a = point - c_a;
                let r_b = point - c_b;

                let c = (BAUMGARTE * (separation + LINEAR_SLOP))
                    .clamp(-MAX_LINEAR_CORRECTION, 0.0);

                let rn_a = cross(r_a, normal);
                let rn_b = cross(r_b, normal);
                let k = pc.inv_mass_a
                    + pc.inv_mass_b
                    + pc.inv_i_a * rn_a * rn_a
                    + pc.inv_i_b * rn_b * rn_b;

                let impulse = if k > 0.0 { -c / k } else { 0.0 };
                let p = impulse * normal;

                c_a -= pc.inv_mass_a * p;
                a_a -= pc.inv_i_a * cross(r_a, p);
                c_b += pc.inv_mass_b * p;
                a_b += pc.inv_i_b * cross(r_b, p);
            }

            data.positions[pc.index_a].set(c_a, a_a);
            data.positions[pc.index_b].set(c_b, a_b);
        }

        // Cannot expect exact slop resolution with Baumgarte correction
        min_separation >= -3.0 * LINEAR_SLOP
    }
}

/// Evaluate one position-solver point: (normal, point, separation).
fn position_manifold(
    pc: &PositionConstraint,
    xf_a: &Transform2,
    xf_b: &Transform2,
    index: usize,
) -> (Vec2, Vec2, f32) {
    let total_radius = pc.radius_a + pc.radius_b;
    match pc.kind {
        ManifoldKind::Circles => {
            let point_a = xf_a.apply(pc.local_point);
            let point_b = xf_b.apply(pc.local_points[0]);
            let d = point_b - point_a;
            let normal = if d.length_squared() > f32::EPSILON {
                d.normalize()
            } else {
                Vec2::X
            };
            let point = 0.5 * (point_a + point_b);
            let separation = d.dot(normal) - total_radius;
            (normal, point, separation)
        }
        ManifoldKind::FaceA => {
            let normal = xf_a.q.apply(pc.local_normal);
            let plane_point = xf_a.apply(pc.local_point);
            let clip_point = xf_b.apply(pc.local_points[index]);
            let separation = (clip_point - plane_point).dot(normal) - total_radius;
            (normal, clip_point, separation)
        }
        ManifoldKind::FaceB => {
            let normal = xf_b.q.apply(pc.local_normal);
            let plane_point = xf_b.apply(pc.local_point);
            let clip_point = xf_a.apply(pc.local_points[index]);
            let separation = (clip_point - plane_point).dot(normal) - total_radius;
            // Flip so the correction pushes A out of B
            (-normal, clip_point, separation)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_state_transform() {
        let local_center = Vec2::new(1.0, 0.0);
        let state = PositionState {
            c: Vec2::new(5.0, 2.0),
            a: 0.0,
        };
        let xf = state.transform(local_center);
        // Transforming the local center must land on the world center
        assert!((xf.apply(local_center) - state.c).length() < 1e-6);
    }

    #[test]
    fn test_velocity_state_point_velocity() {
        let v = VelocityState {
            v: Vec2::new(1.0, 0.0),
            w: 2.0,
        };
        // Point one unit above the center: w × r adds (-2, 0)
        let vp = v.at_point(Vec2::new(0.0, 1.0));
        assert!((vp - Vec2::new(-1.0, 0.0)).length() < 1e-6);
    }

    #[test]
    fn test_timestep_fields() {
        let step = TimeStep {
            dt: 1.0 / 30.0,
            inv_dt: 30.0,
            dt_ratio: 0.5,
            velocity_iterations: 8,
            position_iterations: 3,
            warm_starting: true,
        };
        assert!((step.dt * step.inv_dt - 1.0).abs() < 1e-6);
    }
}
