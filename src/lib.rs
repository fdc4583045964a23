//! # kinetic2d
//!
//! **2D Rigid-Body Physics with a Game-Engine Integration Layer**
//!
//! An impulse-based 2D physics engine: rigid-body dynamics, persistent
//! contacts with warm-started sequential-impulse solving, joint
//! constraints, a dynamic AABB tree broad-phase, and an integration layer
//! that drives the simulation from game-object transforms and reports
//! collision/trigger/ray-cast events back through callbacks.
//!
//! ## Layers
//!
//! | Layer | Module | Description |
//! |-------|--------|-------------|
//! | Math | [`math`] | Rotations, transforms, AABBs, small solvers |
//! | Shapes | [`shapes`] | Circle, polygon, edge/chain, tile grid |
//! | Broad-phase | [`broadphase`] | Dynamic AABB tree, candidate pairs |
//! | Dynamics | [`body`], [`fixture`], [`contact`], [`joints`] | Rigid bodies and constraints |
//! | Solver | [`solver`] | Island velocity/position iteration |
//! | World | [`world`] | Step pipeline, queries, locked-step contract |
//! | Integration | [`context`], [`overlap`], [`events`] | Unit scaling, transform sync, trigger episodes |
//!
//! ## Quick start
//!
//! ```
//! use kinetic2d::prelude::*;
//!
//! let mut world = PhysicsWorld::new(Vec2::new(0.0, -10.0));
//!
//! let ground = world
//!     .create_body(&BodyDef {
//!         position: Vec2::new(0.0, -1.0),
//!         ..BodyDef::default()
//!     })
//!     .unwrap();
//! world
//!     .create_fixture(ground, FixtureDef::new(Shape::box_shape(20.0, 1.0).unwrap()))
//!     .unwrap();
//!
//! let ball = world
//!     .create_body(&BodyDef {
//!         body_type: BodyType::Dynamic,
//!         position: Vec2::new(0.0, 4.0),
//!         ..BodyDef::default()
//!     })
//!     .unwrap();
//! world
//!     .create_fixture(ball, FixtureDef::new(Shape::circle(0.5).unwrap()))
//!     .unwrap();
//!
//! for _ in 0..60 {
//!     world.step(1.0 / 60.0, 8, 3, &mut NoopListener);
//! }
//! assert!(world.body(ball).unwrap().position().y < 4.0);
//! ```
//!
//! ## Determinism
//!
//! A step is a synchronous, single-threaded function of the world state
//! and `dt`: identical state plus a fixed timestep reproduces identical
//! results. Contact iteration order is keyed, not pointer-dependent, and
//! the world rejects structural mutation while a step is in progress.

pub mod arena;
pub mod body;
pub mod broadphase;
pub mod contact;
pub mod context;
pub mod error;
pub mod events;
pub mod fixture;
pub mod joints;
pub mod math;
pub mod overlap;
pub mod shapes;
pub mod solver;
pub mod world;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::body::{BodyDef, BodyHandle, BodyType};
    pub use crate::context::{
        ContextConfig, GameTransform, NoSync, ObjectDesc, ObjectType, PhysicsContext, ShapeDesc,
        SimWorld, TransformSync, WorldId,
    };
    pub use crate::error::PhysicsError;
    pub use crate::events::{
        CollisionData, ContactPointData, NoopListener, RayCastRequest, RayCastResponse,
        StepListener, TriggerData,
    };
    pub use crate::fixture::{Filter, FixtureDef};
    pub use crate::joints::{
        DistanceJointDef, JointDef, JointHandle, JointParams, JointType, LimitState,
        PrismaticJointDef, RevoluteJointDef, RopeJointDef,
    };
    pub use crate::math::{Aabb, Rot, Transform2, Vec2};
    pub use crate::shapes::{Hull, HullSet, Shape};
    pub use crate::world::{PhysicsWorld, RayCastHit};
}

pub use prelude::*;
