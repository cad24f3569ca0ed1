//! Real-time rigid body physics simulation.
//!
//! The crate is built around a per-step pipeline: pose integration and
//! bounding box prediction, broadphase overlap enumeration, narrowphase
//! manifold generation through a pluggable tester registry, persistent
//! pair caching with warm-started impulses, a type-batched sequential
//! impulse solver, and island-based sleeping.
//!
//! Entities are addressed by stable integer handles; all hot storage lives
//! in buffers rented from a power-of-two bucketed
//! [`BufferPool`](utilities::memory::buffer_pool::BufferPool).

pub mod physics;
pub mod utilities;

pub use physics::bodies::Bodies;
pub use physics::body_description::{
    BodyActivityDescription, BodyDescription, CollidableDescription, StaticDescription,
};
pub use physics::body_properties::{BodyInertia, BodyVelocity, RigidPose};
pub use physics::collidable::{CollidablePair, CollidableReference, ContinuityMode};
pub use physics::handles::{BodyHandle, ConstraintHandle, StaticHandle};
pub use physics::contact_manifold::{
    ContactManifold, ConvexContact as ManifoldConvexContact, ConvexContactManifold,
    NonconvexContact as ManifoldNonconvexContact, NonconvexContactManifold,
};
pub use physics::narrow_phase::{
    ContactTaskRegistry, NarrowPhaseCallbacks, PairMaterialProperties, PairTester,
};
pub use physics::pose_integration::PoseIntegratorCallbacks;
pub use physics::shapes::{BoxShape, Shape, Sphere, TypedIndex};
pub use physics::simulation::{Simulation, SimulationAllocationSizes, SolveDescription};
pub use utilities::memory::buffer_pool::BufferPool;
pub use utilities::thread_dispatcher::{SimpleThreadDispatcher, ThreadDispatcher};
