//! Wide quaternions.

use super::vector3_wide::Vector3Wide;
use super::wide::{WideFloat, LANE_WIDTH};
use glam::Quat;

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct QuaternionWide {
    pub x: WideFloat,
    pub y: WideFloat,
    pub z: WideFloat,
    pub w: WideFloat,
}

impl Default for QuaternionWide {
    fn default() -> Self {
        Self {
            x: WideFloat::ZERO,
            y: WideFloat::ZERO,
            z: WideFloat::ZERO,
            w: WideFloat::ONE,
        }
    }
}

impl QuaternionWide {
    #[inline(always)]
    pub fn broadcast(value: Quat) -> Self {
        Self {
            x: WideFloat::splat(value.x),
            y: WideFloat::splat(value.y),
            z: WideFloat::splat(value.z),
            w: WideFloat::splat(value.w),
        }
    }

    #[inline(always)]
    pub fn read_slot(&self, lane: usize) -> Quat {
        Quat::from_xyzw(
            self.x.read_slot(lane),
            self.y.read_slot(lane),
            self.z.read_slot(lane),
            self.w.read_slot(lane),
        )
    }

    #[inline(always)]
    pub fn write_slot(&mut self, value: Quat, lane: usize) {
        debug_assert!(lane < LANE_WIDTH);
        self.x.write_slot(value.x, lane);
        self.y.write_slot(value.y, lane);
        self.z.write_slot(value.z, lane);
        self.w.write_slot(value.w, lane);
    }

    #[inline(always)]
    pub fn conjugate(&self) -> Self {
        Self {
            x: -self.x,
            y: -self.y,
            z: -self.z,
            w: self.w,
        }
    }

    /// Rotates a wide vector by the quaternion.
    #[inline(always)]
    pub fn transform(&self, v: &Vector3Wide) -> Vector3Wide {
        // v' = v + 2w(q.xyz x v) + 2(q.xyz x (q.xyz x v))
        let xyz = Vector3Wide {
            x: self.x,
            y: self.y,
            z: self.z,
        };
        let two = WideFloat::splat(2.0);
        let cross1 = xyz.cross(v);
        let cross2 = xyz.cross(&cross1);
        *v + (cross1.scale(self.w) + cross2).scale(two)
    }

    /// Rotates a wide vector by the quaternion's inverse.
    #[inline(always)]
    pub fn transform_by_inverse(&self, v: &Vector3Wide) -> Vector3Wide {
        self.conjugate().transform(v)
    }

    /// Concatenates two rotations: the result applies `self` then `other`.
    #[inline(always)]
    pub fn concatenate(&self, other: &Self) -> Self {
        // other * self in quaternion multiplication order.
        Self {
            x: other.w * self.x + other.x * self.w + other.y * self.z - other.z * self.y,
            y: other.w * self.y - other.x * self.z + other.y * self.w + other.z * self.x,
            z: other.w * self.z + other.x * self.y - other.y * self.x + other.z * self.w,
            w: other.w * self.w - other.x * self.x - other.y * self.y - other.z * self.z,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn transform_matches_scalar_rotation() {
        let rotation = Quat::from_axis_angle(Vec3::new(0.3, 0.8, -0.5).normalize(), 1.1);
        let v = Vec3::new(1.0, -2.0, 0.5);
        let wide_rotation = QuaternionWide::broadcast(rotation);
        let wide_v = Vector3Wide::broadcast(v);
        let rotated = wide_rotation.transform(&wide_v).read_slot(2);
        let expected = rotation * v;
        assert!((rotated - expected).length() < 1e-5);
        let back = wide_rotation
            .transform_by_inverse(&Vector3Wide::broadcast(expected))
            .read_slot(0);
        assert!((back - v).length() < 1e-5);
    }
}
