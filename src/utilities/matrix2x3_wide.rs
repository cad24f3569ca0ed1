//! Wide 2x3 matrices; the shape of two-DOF jacobians.

use super::vector2_wide::Vector2Wide;
use super::vector3_wide::Vector3Wide;

/// Two wide row vectors.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct Matrix2x3Wide {
    pub x: Vector3Wide,
    pub y: Vector3Wide,
}

impl Matrix2x3Wide {
    /// v * M for a row vector v: combines the rows.
    #[inline(always)]
    pub fn transform(&self, v: &Vector2Wide) -> Vector3Wide {
        self.x.scale(v.x) + self.y.scale(v.y)
    }

    /// M * v^T: dots the rows against a 3-vector.
    #[inline(always)]
    pub fn transform_by_transpose(&self, v: &Vector3Wide) -> Vector2Wide {
        Vector2Wide {
            x: self.x.dot(v),
            y: self.y.dot(v),
        }
    }
}
