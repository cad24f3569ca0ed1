//! Small scalar math helpers shared across subsystems.

use glam::Vec3;

/// Builds an orthonormal basis around a unit-length normal. The returned
/// tangents are perpendicular to the normal and to each other.
///
/// Uses the branch on the dominant sign to avoid the degenerate cross
/// product near the poles.
#[inline(always)]
pub fn build_orthonormal_basis(normal: Vec3) -> (Vec3, Vec3) {
    debug_assert!((normal.length_squared() - 1.0).abs() < 1e-3);
    let sign = if normal.z >= 0.0 { 1.0 } else { -1.0 };
    let a = -1.0 / (sign + normal.z);
    let b = normal.x * normal.y * a;
    let tangent_x = Vec3::new(
        1.0 + sign * normal.x * normal.x * a,
        sign * b,
        -sign * normal.x,
    );
    let tangent_y = Vec3::new(b, sign + normal.y * normal.y * a, -normal.y);
    (tangent_x, tangent_y)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basis_is_orthonormal() {
        for normal in [
            Vec3::Y,
            -Vec3::Y,
            Vec3::new(0.3, -0.5, 0.8).normalize(),
            Vec3::Z,
            -Vec3::Z,
        ] {
            let (x, y) = build_orthonormal_basis(normal);
            assert!((x.length() - 1.0).abs() < 1e-5);
            assert!((y.length() - 1.0).abs() < 1e-5);
            assert!(x.dot(y).abs() < 1e-5);
            assert!(x.dot(normal).abs() < 1e-5);
            assert!(y.dot(normal).abs() < 1e-5);
        }
    }
}
