//! Wide three-component vectors.

use super::wide::{WideFloat, LANE_WIDTH};
use glam::Vec3;
use std::ops::{Add, Mul, Neg, Sub};

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct Vector3Wide {
    pub x: WideFloat,
    pub y: WideFloat,
    pub z: WideFloat,
}

impl Vector3Wide {
    pub const ZERO: Vector3Wide = Vector3Wide {
        x: WideFloat::ZERO,
        y: WideFloat::ZERO,
        z: WideFloat::ZERO,
    };

    #[inline(always)]
    pub fn broadcast(value: Vec3) -> Self {
        Self {
            x: WideFloat::splat(value.x),
            y: WideFloat::splat(value.y),
            z: WideFloat::splat(value.z),
        }
    }

    #[inline(always)]
    pub fn read_slot(&self, lane: usize) -> Vec3 {
        Vec3::new(
            self.x.read_slot(lane),
            self.y.read_slot(lane),
            self.z.read_slot(lane),
        )
    }

    #[inline(always)]
    pub fn write_slot(&mut self, value: Vec3, lane: usize) {
        debug_assert!(lane < LANE_WIDTH);
        self.x.write_slot(value.x, lane);
        self.y.write_slot(value.y, lane);
        self.z.write_slot(value.z, lane);
    }

    #[inline(always)]
    pub fn scale(&self, scalar: WideFloat) -> Self {
        Self {
            x: self.x * scalar,
            y: self.y * scalar,
            z: self.z * scalar,
        }
    }

    #[inline(always)]
    pub fn dot(&self, other: &Self) -> WideFloat {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    #[inline(always)]
    pub fn cross(&self, other: &Self) -> Self {
        Self {
            x: self.y * other.z - self.z * other.y,
            y: self.z * other.x - self.x * other.z,
            z: self.x * other.y - self.y * other.x,
        }
    }

    #[inline(always)]
    pub fn length_squared(&self) -> WideFloat {
        self.dot(self)
    }

    #[inline(always)]
    pub fn length(&self) -> WideFloat {
        self.length_squared().sqrt()
    }

    /// Normalizes lanewise; lanes with length below the epsilon produce a
    /// zero vector rather than NaN.
    #[inline(always)]
    pub fn normalize_guarded(&self, epsilon: f32) -> Self {
        let length = self.length();
        let use_fallback = length.less_than(WideFloat::splat(epsilon));
        let inverse = WideFloat::ONE / length;
        let safe_inverse = use_fallback.select(WideFloat::ZERO, inverse);
        self.scale(safe_inverse)
    }

    /// Scales the vector down lanewise so its length does not exceed
    /// `maximum_length`.
    #[inline(always)]
    pub fn clamp_length(&self, maximum_length: WideFloat) -> Self {
        let length = self.length().max(WideFloat::splat(1e-15));
        let scale = WideFloat::ONE.min(maximum_length / length);
        self.scale(scale)
    }

    /// Builds two tangents orthonormal to a unit-length wide normal, the
    /// lanewise counterpart of the scalar basis construction.
    #[inline(always)]
    pub fn build_orthonormal_basis(normal: &Self) -> (Self, Self) {
        let negative = normal.z.less_than(WideFloat::ZERO);
        let sign = negative.select(WideFloat::splat(-1.0), WideFloat::ONE);
        let a = WideFloat::splat(-1.0) / (sign + normal.z);
        let b = normal.x * normal.y * a;
        let tangent_x = Self {
            x: WideFloat::ONE + sign * normal.x * normal.x * a,
            y: sign * b,
            z: -sign * normal.x,
        };
        let tangent_y = Self {
            x: b,
            y: sign + normal.y * normal.y * a,
            z: -normal.y,
        };
        (tangent_x, tangent_y)
    }

}

impl Add for Vector3Wide {
    type Output = Self;
    #[inline(always)]
    fn add(self, other: Self) -> Self {
        Self {
            x: self.x + other.x,
            y: self.y + other.y,
            z: self.z + other.z,
        }
    }
}

impl Sub for Vector3Wide {
    type Output = Self;
    #[inline(always)]
    fn sub(self, other: Self) -> Self {
        Self {
            x: self.x - other.x,
            y: self.y - other.y,
            z: self.z - other.z,
        }
    }
}

impl Mul<WideFloat> for Vector3Wide {
    type Output = Self;
    #[inline(always)]
    fn mul(self, scalar: WideFloat) -> Self {
        self.scale(scalar)
    }
}

impl Neg for Vector3Wide {
    type Output = Self;
    #[inline(always)]
    fn neg(self) -> Self {
        Self {
            x: -self.x,
            y: -self.y,
            z: -self.z,
        }
    }
}
