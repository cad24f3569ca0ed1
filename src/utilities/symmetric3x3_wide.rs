//! Wide symmetric 3x3 matrices and the sandwich products the solver is
//! built from.

use super::matrix2x3_wide::Matrix2x3Wide;
use super::symmetric2x2_wide::Symmetric2x2Wide;
use super::symmetric3x3::Symmetric3x3;
use super::vector3_wide::Vector3Wide;
use super::wide::{WideFloat, LANE_WIDTH};

/// Lower triangle of a wide symmetric 3x3 matrix.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct Symmetric3x3Wide {
    pub xx: WideFloat,
    pub yx: WideFloat,
    pub yy: WideFloat,
    pub zx: WideFloat,
    pub zy: WideFloat,
    pub zz: WideFloat,
}

impl Symmetric3x3Wide {
    #[inline(always)]
    pub fn broadcast(value: &Symmetric3x3) -> Self {
        Self {
            xx: WideFloat::splat(value.xx),
            yx: WideFloat::splat(value.yx),
            yy: WideFloat::splat(value.yy),
            zx: WideFloat::splat(value.zx),
            zy: WideFloat::splat(value.zy),
            zz: WideFloat::splat(value.zz),
        }
    }

    #[inline(always)]
    pub fn read_slot(&self, lane: usize) -> Symmetric3x3 {
        Symmetric3x3 {
            xx: self.xx.read_slot(lane),
            yx: self.yx.read_slot(lane),
            yy: self.yy.read_slot(lane),
            zx: self.zx.read_slot(lane),
            zy: self.zy.read_slot(lane),
            zz: self.zz.read_slot(lane),
        }
    }

    #[inline(always)]
    pub fn write_slot(&mut self, value: &Symmetric3x3, lane: usize) {
        debug_assert!(lane < LANE_WIDTH);
        self.xx.write_slot(value.xx, lane);
        self.yx.write_slot(value.yx, lane);
        self.yy.write_slot(value.yy, lane);
        self.zx.write_slot(value.zx, lane);
        self.zy.write_slot(value.zy, lane);
        self.zz.write_slot(value.zz, lane);
    }

    #[inline(always)]
    pub fn add(&self, other: &Self) -> Self {
        Self {
            xx: self.xx + other.xx,
            yx: self.yx + other.yx,
            yy: self.yy + other.yy,
            zx: self.zx + other.zx,
            zy: self.zy + other.zy,
            zz: self.zz + other.zz,
        }
    }

    #[inline(always)]
    pub fn add_to_diagonal(&self, value: WideFloat) -> Self {
        Self {
            xx: self.xx + value,
            yy: self.yy + value,
            zz: self.zz + value,
            ..*self
        }
    }

    #[inline(always)]
    pub fn scale(&self, scalar: WideFloat) -> Self {
        Self {
            xx: self.xx * scalar,
            yx: self.yx * scalar,
            yy: self.yy * scalar,
            zx: self.zx * scalar,
            zy: self.zy * scalar,
            zz: self.zz * scalar,
        }
    }

    /// M * v.
    #[inline(always)]
    pub fn transform(&self, v: &Vector3Wide) -> Vector3Wide {
        Vector3Wide {
            x: self.xx * v.x + self.yx * v.y + self.zx * v.z,
            y: self.yx * v.x + self.yy * v.y + self.zy * v.z,
            z: self.zx * v.x + self.zy * v.y + self.zz * v.z,
        }
    }

    /// v^T * M * v.
    #[inline(always)]
    pub fn vector_sandwich(v: &Vector3Wide, m: &Self) -> WideFloat {
        v.dot(&m.transform(v))
    }

    /// left^T * M * right.
    #[inline(always)]
    pub fn vector_sandwich_dual(left: &Vector3Wide, m: &Self, right: &Vector3Wide) -> WideFloat {
        left.dot(&m.transform(right))
    }

    /// skew(v) * M * skew(v)^T; the angular contribution of an offset linear
    /// jacobian to an effective mass.
    #[inline(always)]
    pub fn skew_sandwich(v: &Vector3Wide, m: &Self) -> Self {
        let x = v.x;
        let y = v.y;
        let z = v.z;
        // A = skew(v) * M.
        let a00 = y * m.zx - z * m.yx;
        let a01 = y * m.zy - z * m.yy;
        let a02 = y * m.zz - z * m.zy;
        let a10 = z * m.xx - x * m.zx;
        let a11 = z * m.yx - x * m.zy;
        let a12 = z * m.zx - x * m.zz;
        let a20 = x * m.yx - y * m.xx;
        let a21 = x * m.yy - y * m.yx;
        let a22 = x * m.zy - y * m.zx;
        // Result = A * skew(v)^T; only the lower triangle is materialized.
        Self {
            xx: y * a02 - z * a01,
            yx: y * a12 - z * a11,
            yy: z * a10 - x * a12,
            zx: y * a22 - z * a21,
            zy: z * a20 - x * a22,
            zz: x * a21 - y * a20,
        }
    }

    /// J * M * J^T for a 2x3 jacobian, producing a symmetric 2x2.
    #[inline(always)]
    pub fn matrix_sandwich(j: &Matrix2x3Wide, m: &Self) -> Symmetric2x2Wide {
        let row_x = m.transform(&j.x);
        let row_y = m.transform(&j.y);
        Symmetric2x2Wide {
            xx: j.x.dot(&row_x),
            yx: j.y.dot(&row_x),
            yy: j.y.dot(&row_y),
        }
    }

    /// Inverts the symmetric matrix lanewise via the adjugate.
    #[inline(always)]
    pub fn invert(&self) -> Self {
        let xx = self.yy * self.zz - self.zy * self.zy;
        let yx = self.zy * self.zx - self.yx * self.zz;
        let zx = self.yx * self.zy - self.yy * self.zx;
        let determinant = self.xx * xx + self.yx * yx + self.zx * zx;
        let inverse_determinant = WideFloat::ONE / determinant;
        Self {
            xx: xx * inverse_determinant,
            yx: yx * inverse_determinant,
            yy: (self.xx * self.zz - self.zx * self.zx) * inverse_determinant,
            zx: zx * inverse_determinant,
            zy: (self.zx * self.yx - self.xx * self.zy) * inverse_determinant,
            zz: (self.xx * self.yy - self.yx * self.yx) * inverse_determinant,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn invert_round_trips() {
        let m = Symmetric3x3 {
            xx: 2.0,
            yx: 0.3,
            yy: 1.5,
            zx: -0.2,
            zy: 0.1,
            zz: 3.0,
        };
        let wide = Symmetric3x3Wide::broadcast(&m);
        let inverse = wide.invert();
        let v = Vector3Wide::broadcast(Vec3::new(1.0, -2.0, 0.5));
        let round_tripped = wide.transform(&inverse.transform(&v)).read_slot(0);
        assert!((round_tripped - Vec3::new(1.0, -2.0, 0.5)).length() < 1e-4);
    }

    #[test]
    fn skew_sandwich_matches_explicit_product() {
        // skew(v) * I * skew(v)^T with identity M is just skew(v) skew(v)^T.
        let v = Vec3::new(1.0, 2.0, 3.0);
        let identity = Symmetric3x3::from_diagonal(1.0, 1.0, 1.0);
        let result = Symmetric3x3Wide::skew_sandwich(
            &Vector3Wide::broadcast(v),
            &Symmetric3x3Wide::broadcast(&identity),
        )
        .read_slot(0);
        // skew(v) skew(v)^T = (v.v)I - v v^T.
        let dot = v.dot(v);
        assert!((result.xx - (dot - v.x * v.x)).abs() < 1e-5);
        assert!((result.yy - (dot - v.y * v.y)).abs() < 1e-5);
        assert!((result.zz - (dot - v.z * v.z)).abs() < 1e-5);
        assert!((result.yx - (-v.x * v.y)).abs() < 1e-5);
        assert!((result.zx - (-v.x * v.z)).abs() < 1e-5);
        assert!((result.zy - (-v.y * v.z)).abs() < 1e-5);
    }
}
