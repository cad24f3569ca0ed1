//! Predicted bounding box computation for active collidables.

use crate::physics::body_properties::{BodyVelocity, RigidPose};
use crate::physics::broad_phase::BroadPhase;
use crate::physics::collidable::{Collidable, ContinuityMode};
use crate::physics::shapes::Shapes;
use glam::Vec3;

/// Writes predicted bounds for bodies straight into broadphase leaf slots.
/// One updater per worker; the leaves touched by different workers are
/// disjoint because bodies are range partitioned.
pub struct BoundingBoxUpdater<'a> {
    shapes: &'a Shapes,
    broad_phase: &'a BroadPhase,
    dt: f32,
}

impl<'a> BoundingBoxUpdater<'a> {
    pub fn new(shapes: &'a Shapes, broad_phase: &'a BroadPhase, dt: f32) -> Self {
        Self {
            shapes,
            broad_phase,
            dt,
        }
    }

    /// Computes the predicted bounds for a body and stores them in its
    /// active broadphase leaf.
    pub fn add(&mut self, pose: &RigidPose, velocity: &BodyVelocity, collidable: &Collidable) {
        if !collidable.shape.exists() {
            return;
        }
        debug_assert!(collidable.broad_phase_index >= 0);
        let mut bounds = self.shapes.compute_bounds(collidable.shape, pose.orientation);
        bounds.min += pose.position;
        bounds.max += pose.position;

        // Sweep expansion from linear velocity, plus a rotation allowance.
        let sweep = velocity.linear * self.dt;
        let angular_expansion = (velocity.angular.length() * self.dt
            * self.shapes.maximum_radius(collidable.shape))
        .min(self.shapes.maximum_radius(collidable.shape));
        let mut min_expansion = sweep.min(Vec3::ZERO) - Vec3::splat(angular_expansion);
        let mut max_expansion = sweep.max(Vec3::ZERO) + Vec3::splat(angular_expansion);
        if collidable.continuity == ContinuityMode::Discrete {
            // Discrete bodies only get foresight out to the speculative
            // margin; continuous bodies get the full sweep.
            let margin = Vec3::splat(collidable.speculative_margin);
            min_expansion = min_expansion.max(-margin);
            max_expansion = max_expansion.min(margin);
        }
        bounds.min += min_expansion;
        bounds.max += max_expansion;

        unsafe {
            let (min, max) = self
                .broad_phase
                .get_active_bounds_pointers(collidable.broad_phase_index);
            *min = bounds.min;
            *max = bounds.max;
        }
    }
}
