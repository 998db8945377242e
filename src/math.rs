//! Rigid Transforms and Vector Helpers
//!
//! Single-precision math on top of `glam`.
//!
//! # Types
//!
//! - `Transform`: orthonormal 3x3 rotation plus translation (12 scalars)
//!
//! # Invariant
//!
//! The rotation columns stay orthonormal: every integration step ends with a
//! Gram-Schmidt pass ([`Transform::orthonormalize`]).

use glam::{Mat3, Vec3};

/// Squared length below which a vector is treated as zero.
pub const EPSILON_SQ: f32 = 1e-12;

/// Generic small-number guard for divisions.
pub const EPSILON: f32 = 1e-6;

/// Rigid transform: rotation basis (columns are the local axes) and origin.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Transform {
    /// Orthonormal rotation
    pub basis: Mat3,
    /// Translation
    pub origin: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform {
    /// Identity transform
    pub const IDENTITY: Self = Self {
        basis: Mat3::IDENTITY,
        origin: Vec3::ZERO,
    };

    /// Create from rotation and translation
    #[inline]
    #[must_use]
    pub const fn new(basis: Mat3, origin: Vec3) -> Self {
        Self { basis, origin }
    }

    /// Pure translation
    #[inline]
    #[must_use]
    pub const fn from_translation(origin: Vec3) -> Self {
        Self {
            basis: Mat3::IDENTITY,
            origin,
        }
    }

    /// Rotation about `axis` (need not be normalized) followed by a translation
    #[must_use]
    pub fn from_axis_angle(axis: Vec3, angle: f32, origin: Vec3) -> Self {
        let basis = match axis.try_normalize() {
            Some(axis) => Mat3::from_axis_angle(axis, angle),
            None => Mat3::IDENTITY,
        };
        Self { basis, origin }
    }

    /// Local point to world
    #[inline]
    #[must_use]
    pub fn transform_point(&self, p: Vec3) -> Vec3 {
        self.basis * p + self.origin
    }

    /// Local direction to world
    #[inline]
    #[must_use]
    pub fn transform_vector(&self, v: Vec3) -> Vec3 {
        self.basis * v
    }

    /// World point to local
    #[inline]
    #[must_use]
    pub fn inverse_transform_point(&self, p: Vec3) -> Vec3 {
        self.basis.transpose() * (p - self.origin)
    }

    /// World direction to local
    #[inline]
    #[must_use]
    pub fn inverse_transform_vector(&self, v: Vec3) -> Vec3 {
        self.basis.transpose() * v
    }

    /// `self * other`: apply `other` first, then `self`
    #[inline]
    #[must_use]
    pub fn mul_transform(&self, other: &Transform) -> Transform {
        Transform {
            basis: self.basis * other.basis,
            origin: self.transform_point(other.origin),
        }
    }

    /// Rigid inverse
    #[inline]
    #[must_use]
    pub fn inverse(&self) -> Transform {
        let basis = self.basis.transpose();
        Transform {
            basis,
            origin: -(basis * self.origin),
        }
    }

    /// Re-orthonormalize the rotation columns (Gram-Schmidt, X then Y then Z)
    pub fn orthonormalize(&mut self) {
        let x = self.basis.x_axis.try_normalize().unwrap_or(Vec3::X);
        let y = self.basis.y_axis - x * x.dot(self.basis.y_axis);
        let y = y.try_normalize().unwrap_or_else(|| x.any_orthonormal_vector());
        let z = x.cross(y);
        self.basis = Mat3::from_cols(x, y, z);
    }

    /// Advance by linear and angular velocity over `dt`
    ///
    /// The rotation is applied as an exact axis-angle step and the basis is
    /// re-orthonormalized afterwards.
    pub fn integrate(&mut self, linear: Vec3, angular: Vec3, dt: f32) {
        self.origin += linear * dt;
        let w = angular * dt;
        let angle_sq = w.length_squared();
        if angle_sq > EPSILON_SQ {
            let angle = angle_sq.sqrt();
            let rotation = Mat3::from_axis_angle(w / angle, angle);
            self.basis = rotation * self.basis;
            self.orthonormalize();
        }
    }

    /// Transform obtained by integrating `self` with constant velocities for `t * dt`
    #[must_use]
    pub fn integrated(&self, linear: Vec3, angular: Vec3, dt: f32) -> Transform {
        let mut out = *self;
        out.integrate(linear, angular, dt);
        out
    }
}

/// Orthonormal tangent/bitangent pair for a unit normal
///
/// Chooses the reference axis along the normal's smallest component so the
/// basis is continuous over most of the sphere.
#[must_use]
pub fn tangent_basis(normal: Vec3) -> (Vec3, Vec3) {
    let tangent = if normal.x.abs() > 0.57735 {
        Vec3::new(normal.y, -normal.x, 0.0)
    } else {
        Vec3::new(0.0, normal.z, -normal.y)
    };
    let tangent = tangent.normalize_or_zero();
    let bitangent = normal.cross(tangent);
    (tangent, bitangent)
}

/// Skew-symmetric cross-product matrix `[v]x` with `[v]x * u == v.cross(u)`
#[inline]
#[must_use]
pub fn skew(v: Vec3) -> Mat3 {
    Mat3::from_cols(
        Vec3::new(0.0, v.z, -v.y),
        Vec3::new(-v.z, 0.0, v.x),
        Vec3::new(v.y, -v.x, 0.0),
    )
}

/// Largest absolute component
#[inline]
#[must_use]
pub fn max_abs_component(v: Vec3) -> f32 {
    v.abs().max_element()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_transform_roundtrip_point() {
        let t = Transform::from_axis_angle(Vec3::new(1.0, 2.0, 0.5), 0.8, Vec3::new(3.0, -1.0, 2.0));
        let p = Vec3::new(0.3, -0.7, 1.1);
        let back = t.inverse_transform_point(t.transform_point(p));
        assert_abs_diff_eq!(back.x, p.x, epsilon = 1e-5);
        assert_abs_diff_eq!(back.y, p.y, epsilon = 1e-5);
        assert_abs_diff_eq!(back.z, p.z, epsilon = 1e-5);
    }

    #[test]
    fn test_inverse_composes_to_identity() {
        let t = Transform::from_axis_angle(Vec3::Y, 1.2, Vec3::new(1.0, 2.0, 3.0));
        let id = t.mul_transform(&t.inverse());
        assert!(id.origin.length() < 1e-5);
        assert!((id.basis - Mat3::IDENTITY).abs_diff_eq(Mat3::ZERO, 1e-5));
    }

    #[test]
    fn test_orthonormalize_repairs_drift() {
        let mut t = Transform::IDENTITY;
        t.basis.x_axis = Vec3::new(1.01, 0.02, 0.0);
        t.basis.y_axis = Vec3::new(0.03, 0.98, 0.01);
        t.orthonormalize();
        let b = t.basis;
        assert_abs_diff_eq!(b.x_axis.length(), 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(b.y_axis.length(), 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(b.z_axis.length(), 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(b.x_axis.dot(b.y_axis), 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(b.x_axis.dot(b.z_axis), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_integrate_zero_velocity_is_identity() {
        let start = Transform::from_axis_angle(Vec3::Z, 0.3, Vec3::new(1.0, 1.0, 1.0));
        let mut t = start;
        for _ in 0..1000 {
            t.integrate(Vec3::ZERO, Vec3::ZERO, 1.0 / 60.0);
        }
        assert_eq!(t, start);
    }

    #[test]
    fn test_integrate_rotation_quarter_turn() {
        let mut t = Transform::IDENTITY;
        t.integrate(Vec3::ZERO, Vec3::new(0.0, std::f32::consts::FRAC_PI_2, 0.0), 1.0);
        let x = t.transform_vector(Vec3::X);
        assert_abs_diff_eq!(x.z, -1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_tangent_basis_is_orthonormal() {
        for n in [Vec3::X, Vec3::Y, Vec3::Z, Vec3::new(1.0, 1.0, 1.0).normalize(), -Vec3::X] {
            let (t, b) = tangent_basis(n);
            assert_abs_diff_eq!(t.length(), 1.0, epsilon = 1e-5);
            assert_abs_diff_eq!(b.length(), 1.0, epsilon = 1e-5);
            assert_abs_diff_eq!(t.dot(n), 0.0, epsilon = 1e-5);
            assert_abs_diff_eq!(b.dot(n), 0.0, epsilon = 1e-5);
            assert_abs_diff_eq!(t.dot(b), 0.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_skew_matches_cross() {
        let a = Vec3::new(1.0, -2.0, 0.5);
        let b = Vec3::new(0.3, 0.4, -1.5);
        let lhs = skew(a) * b;
        let rhs = a.cross(b);
        assert!(lhs.abs_diff_eq(rhs, 1e-6));
    }
}
