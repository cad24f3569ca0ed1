//! Contact manifolds produced by the narrow phase.

use glam::Vec3;

/// A contact within a convex manifold. Offsets are from the center of the
/// first collidable; the normal is shared by the whole manifold.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct ConvexContact {
    pub offset: Vec3,
    /// Penetration depth. Negative depths are speculative contacts: not yet
    /// touching, kept to give the solver foresight.
    pub depth: f32,
    /// Stable identifier for the shape-local feature that generated this
    /// contact; matched across frames to inherit accumulated impulses.
    pub feature_id: i32,
}

/// A contact within a nonconvex manifold; carries its own normal.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct NonconvexContact {
    pub offset: Vec3,
    pub normal: Vec3,
    pub depth: f32,
    pub feature_id: i32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct ConvexContactManifold {
    /// Normal calibrated to point from B toward A.
    pub normal: Vec3,
    /// Offset from the center of collidable A to the center of B.
    pub offset_b: Vec3,
    pub count: i32,
    pub contacts: [ConvexContact; 4],
}

impl ConvexContactManifold {
    pub const MAXIMUM_CONTACT_COUNT: i32 = 4;

    pub fn push(&mut self, contact: ConvexContact) {
        debug_assert!(self.count < Self::MAXIMUM_CONTACT_COUNT);
        self.contacts[self.count as usize] = contact;
        self.count += 1;
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct NonconvexContactManifold {
    pub offset_b: Vec3,
    pub count: i32,
    pub contacts: [NonconvexContact; 8],
}

impl NonconvexContactManifold {
    pub const MAXIMUM_CONTACT_COUNT: i32 = 8;

    pub fn push(&mut self, contact: NonconvexContact) {
        debug_assert!(self.count < Self::MAXIMUM_CONTACT_COUNT);
        self.contacts[self.count as usize] = contact;
        self.count += 1;
    }
}

/// Output of a pair tester.
#[derive(Clone, Copy, Debug)]
pub enum ContactManifold {
    Convex(ConvexContactManifold),
    Nonconvex(NonconvexContactManifold),
}

impl ContactManifold {
    #[inline(always)]
    pub fn count(&self) -> i32 {
        match self {
            ContactManifold::Convex(manifold) => manifold.count,
            ContactManifold::Nonconvex(manifold) => manifold.count,
        }
    }

    #[inline(always)]
    pub fn feature_id(&self, contact_index: i32) -> i32 {
        match self {
            ContactManifold::Convex(manifold) => {
                manifold.contacts[contact_index as usize].feature_id
            }
            ContactManifold::Nonconvex(manifold) => {
                manifold.contacts[contact_index as usize].feature_id
            }
        }
    }
}
