//! Collidable records and packed collidable references.

use crate::physics::handles::{BodyHandle, StaticHandle};
use crate::physics::shapes::TypedIndex;

/// How a collidable's predicted bounds account for motion.
#[repr(u32)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ContinuityMode {
    /// Bounds are expanded by at most the speculative margin.
    #[default]
    Discrete = 0,
    /// Bounds are expanded by the full velocity sweep so fast movers cannot
    /// tunnel past the broadphase.
    Continuous = 1,
}

/// Geometric embodiment of a body or static.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct Collidable {
    pub shape: TypedIndex,
    pub continuity: ContinuityMode,
    /// Distance beyond the surface within which speculative contacts are
    /// generated.
    pub speculative_margin: f32,
    /// Index of the collidable's leaf in its broadphase tree; -1 when the
    /// collidable has no shape.
    pub broad_phase_index: i32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CollidableMobility {
    Dynamic = 0,
    Kinematic = 1,
    Static = 2,
}

/// Packed reference to a body or static: two mobility bits plus the handle.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct CollidableReference {
    pub packed: u32,
}

impl CollidableReference {
    #[inline(always)]
    pub fn for_body(mobility: CollidableMobility, handle: BodyHandle) -> Self {
        debug_assert!(mobility != CollidableMobility::Static);
        Self {
            packed: ((mobility as u32) << 30) | handle.0 as u32,
        }
    }

    #[inline(always)]
    pub fn for_static(handle: StaticHandle) -> Self {
        Self {
            packed: ((CollidableMobility::Static as u32) << 30) | handle.0 as u32,
        }
    }

    #[inline(always)]
    pub fn mobility(self) -> CollidableMobility {
        match self.packed >> 30 {
            0 => CollidableMobility::Dynamic,
            1 => CollidableMobility::Kinematic,
            _ => CollidableMobility::Static,
        }
    }

    #[inline(always)]
    pub fn is_static(self) -> bool {
        self.mobility() == CollidableMobility::Static
    }

    #[inline(always)]
    pub fn body_handle(self) -> BodyHandle {
        debug_assert!(!self.is_static());
        BodyHandle((self.packed & 0x3FFF_FFFF) as i32)
    }

    #[inline(always)]
    pub fn static_handle(self) -> StaticHandle {
        debug_assert!(self.is_static());
        StaticHandle((self.packed & 0x3FFF_FFFF) as i32)
    }
}

/// Ordered pair of collidable references identifying a narrowphase pair.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct CollidablePair {
    pub a: CollidableReference,
    pub b: CollidableReference,
}

impl CollidablePair {
    /// Creates the canonical ordering for two collidables so a pair hashes
    /// identically regardless of discovery order.
    #[inline(always)]
    pub fn new(a: CollidableReference, b: CollidableReference) -> Self {
        if a.packed <= b.packed {
            Self { a, b }
        } else {
            Self { a: b, b: a }
        }
    }

    #[inline(always)]
    pub fn packed_key(self) -> u64 {
        ((self.a.packed as u64) << 32) | self.b.packed as u64
    }
}
