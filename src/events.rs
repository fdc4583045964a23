//! Step Event Payloads and Callbacks
//!
//! Collision, contact-point, trigger and ray-cast callbacks fired while a
//! step is in progress. The world stays locked during dispatch: a listener
//! that tries to create or destroy bodies, fixtures or joints from inside a
//! callback gets `PhysicsError::WorldLocked` instead of corrupting the
//! structures the solver just iterated.

use crate::body::BodyHandle;
use crate::math::Vec2;
use crate::world::PhysicsWorld;

/// Solid contact whose resolved impulse exceeded the reporting threshold.
#[derive(Clone, Copy, Debug)]
pub struct CollisionData {
    pub user_data_a: u64,
    pub category_a: u16,
    pub user_data_b: u64,
    pub category_b: u16,
}

/// Per-manifold-point detail for diagnostic/gameplay use.
#[derive(Clone, Copy, Debug)]
pub struct ContactPointData {
    /// Contact position on object A
    pub position_a: Vec2,
    /// Contact position on object B
    pub position_b: Vec2,
    pub user_data_a: u64,
    pub user_data_b: u64,
    /// Normal pointing from A to B
    pub normal: Vec2,
    /// Relative velocity of B with respect to A
    pub relative_velocity: Vec2,
    /// Penetration depth (positive = overlapping)
    pub distance: f32,
    /// Resolved normal impulse at this point
    pub applied_impulse: f32,
    pub mass_a: f32,
    pub mass_b: f32,
    pub group_a: u16,
    pub group_b: u16,
}

/// One side of a trigger overlap episode.
#[derive(Clone, Copy, Debug)]
pub struct TriggerData {
    pub object_a: BodyHandle,
    pub user_data_a: u64,
    pub object_b: BodyHandle,
    pub user_data_b: u64,
    pub group_a: u16,
    pub group_b: u16,
}

/// A queued or immediate ray-cast request.
#[derive(Clone, Copy, Debug)]
pub struct RayCastRequest {
    /// Segment start in world (engine) units
    pub from: Vec2,
    /// Segment end in world (engine) units
    pub to: Vec2,
    /// Collision mask applied against fixture categories
    pub mask: u16,
    /// Object to exclude (its user data), 0 for none
    pub ignored_user_data: u64,
    /// Request identifier echoed in the response
    pub id: u32,
    /// Collect every hit instead of the closest one
    pub return_all_results: bool,
}

impl Default for RayCastRequest {
    fn default() -> Self {
        Self {
            from: Vec2::ZERO,
            to: Vec2::ZERO,
            mask: 0xFFFF,
            ignored_user_data: 0,
            id: 0,
            return_all_results: false,
        }
    }
}

/// Result of a ray-cast request.
#[derive(Clone, Copy, Debug, Default)]
pub struct RayCastResponse {
    pub hit: bool,
    /// Fraction along the segment (0 at `from`, 1 at `to`)
    pub fraction: f32,
    /// Hit position in world (engine) units
    pub position: Vec2,
    /// Surface normal at the hit (unscaled)
    pub normal: Vec2,
    /// Category bits of the hit fixture child
    pub group: u16,
    pub user_data: u64,
}

/// Callbacks invoked synchronously during a step.
///
/// Every method receives the stepping world; structural mutation through
/// it is rejected while the step runs (`world.is_locked()` is true).
/// Default implementations ignore everything.
pub trait StepListener {
    fn collision(&mut self, world: &mut PhysicsWorld, data: &CollisionData) {
        let _ = (world, data);
    }

    fn contact_point(&mut self, world: &mut PhysicsWorld, data: &ContactPointData) {
        let _ = (world, data);
    }

    fn trigger_entered(&mut self, world: &mut PhysicsWorld, data: &TriggerData) {
        let _ = (world, data);
    }

    fn trigger_exited(&mut self, world: &mut PhysicsWorld, data: &TriggerData) {
        let _ = (world, data);
    }

    fn ray_cast_response(
        &mut self,
        world: &mut PhysicsWorld,
        response: &RayCastResponse,
        request: &RayCastRequest,
    ) {
        let _ = (world, response, request);
    }
}

/// Listener that drops every event.
pub struct NoopListener;

impl StepListener for NoopListener {}
