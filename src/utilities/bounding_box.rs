//! Axis-aligned bounding boxes.

use glam::Vec3;

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct BoundingBox {
    pub min: Vec3,
    pub max: Vec3,
}

impl BoundingBox {
    /// A box that contains nothing and unions into anything.
    pub const INVERTED: BoundingBox = BoundingBox {
        min: Vec3::splat(f32::MAX),
        max: Vec3::splat(f32::MIN),
    };

    #[inline(always)]
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    #[inline(always)]
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    #[inline(always)]
    pub fn merged(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Surface-area-proportional cost metric used by tree insertion.
    #[inline(always)]
    pub fn half_area(&self) -> f32 {
        let span = (self.max - self.min).max(Vec3::ZERO);
        span.x * span.y + span.y * span.z + span.z * span.x
    }
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self::INVERTED
    }
}
