//! Scalar symmetric 3x3 matrices; the storage form of inverse inertia
//! tensors.

use glam::{Mat3, Vec3};

/// Lower triangle of a symmetric 3x3 matrix.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Symmetric3x3 {
    pub xx: f32,
    pub yx: f32,
    pub yy: f32,
    pub zx: f32,
    pub zy: f32,
    pub zz: f32,
}

impl Symmetric3x3 {
    pub const ZERO: Symmetric3x3 = Symmetric3x3 {
        xx: 0.0,
        yx: 0.0,
        yy: 0.0,
        zx: 0.0,
        zy: 0.0,
        zz: 0.0,
    };

    /// Builds a diagonal matrix, e.g. the inverse inertia of an axis-aligned
    /// primitive in its local frame.
    #[inline(always)]
    pub fn from_diagonal(x: f32, y: f32, z: f32) -> Self {
        Self {
            xx: x,
            yy: y,
            zz: z,
            ..Self::ZERO
        }
    }

    #[inline(always)]
    pub fn transform(&self, v: Vec3) -> Vec3 {
        Vec3::new(
            self.xx * v.x + self.yx * v.y + self.zx * v.z,
            self.yx * v.x + self.yy * v.y + self.zy * v.z,
            self.zx * v.x + self.zy * v.y + self.zz * v.z,
        )
    }

    /// Computes R * M * R^T for a rotation matrix R; used to push local
    /// inverse inertia into world space.
    pub fn rotation_sandwich(rotation: Mat3, m: &Symmetric3x3) -> Symmetric3x3 {
        // Columns of glam's Mat3 are basis vectors; r[row][col] = col_vec[row].
        let intermediate_x = m.transform(Vec3::new(
            rotation.x_axis.x,
            rotation.y_axis.x,
            rotation.z_axis.x,
        ));
        let intermediate_y = m.transform(Vec3::new(
            rotation.x_axis.y,
            rotation.y_axis.y,
            rotation.z_axis.y,
        ));
        let intermediate_z = m.transform(Vec3::new(
            rotation.x_axis.z,
            rotation.y_axis.z,
            rotation.z_axis.z,
        ));
        let row_x = Vec3::new(rotation.x_axis.x, rotation.y_axis.x, rotation.z_axis.x);
        let row_y = Vec3::new(rotation.x_axis.y, rotation.y_axis.y, rotation.z_axis.y);
        let row_z = Vec3::new(rotation.x_axis.z, rotation.y_axis.z, rotation.z_axis.z);
        Symmetric3x3 {
            xx: row_x.dot(intermediate_x),
            yx: row_y.dot(intermediate_x),
            yy: row_y.dot(intermediate_y),
            zx: row_z.dot(intermediate_x),
            zy: row_z.dot(intermediate_y),
            zz: row_z.dot(intermediate_z),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Quat;

    #[test]
    fn rotation_sandwich_preserves_diagonal_trace() {
        let m = Symmetric3x3::from_diagonal(1.0, 2.0, 3.0);
        let rotation = Mat3::from_quat(Quat::from_axis_angle(
            Vec3::new(1.0, 1.0, 0.0).normalize(),
            0.7,
        ));
        let rotated = Symmetric3x3::rotation_sandwich(rotation, &m);
        let trace = rotated.xx + rotated.yy + rotated.zz;
        assert!((trace - 6.0).abs() < 1e-5);
    }

    #[test]
    fn identity_rotation_is_a_no_op() {
        let m = Symmetric3x3 {
            xx: 1.0,
            yx: 0.25,
            yy: 2.0,
            zx: -0.5,
            zy: 0.125,
            zz: 3.0,
        };
        let rotated = Symmetric3x3::rotation_sandwich(Mat3::IDENTITY, &m);
        assert!((rotated.xx - m.xx).abs() < 1e-6);
        assert!((rotated.yx - m.yx).abs() < 1e-6);
        assert!((rotated.zz - m.zz).abs() < 1e-6);
    }
}
