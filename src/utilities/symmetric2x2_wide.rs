//! Wide symmetric 2x2 matrices; effective masses for two-DOF constraints.

use super::matrix2x3_wide::Matrix2x3Wide;
use super::vector2_wide::Vector2Wide;
use super::wide::WideFloat;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct Symmetric2x2Wide {
    pub xx: WideFloat,
    pub yx: WideFloat,
    pub yy: WideFloat,
}

impl Symmetric2x2Wide {
    #[inline(always)]
    pub fn add(&self, other: &Self) -> Self {
        Self {
            xx: self.xx + other.xx,
            yx: self.yx + other.yx,
            yy: self.yy + other.yy,
        }
    }

    /// J * J^T scaled by a wide scalar; the linear contribution of a shared
    /// 2x3 jacobian to an effective mass.
    #[inline(always)]
    pub fn sandwich_scale(j: &Matrix2x3Wide, scale: WideFloat) -> Self {
        Self {
            xx: j.x.dot(&j.x) * scale,
            yx: j.y.dot(&j.x) * scale,
            yy: j.y.dot(&j.y) * scale,
        }
    }

    #[inline(always)]
    pub fn transform(&self, v: &Vector2Wide) -> Vector2Wide {
        Vector2Wide {
            x: self.xx * v.x + self.yx * v.y,
            y: self.yx * v.x + self.yy * v.y,
        }
    }

    #[inline(always)]
    pub fn invert(&self) -> Self {
        let determinant = self.xx * self.yy - self.yx * self.yx;
        let inverse_determinant = WideFloat::ONE / determinant;
        Self {
            xx: self.yy * inverse_determinant,
            yx: -self.yx * inverse_determinant,
            yy: self.xx * inverse_determinant,
        }
    }
}
