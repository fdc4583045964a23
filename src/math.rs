//! 2D Math Foundation
//!
//! Rotations, rigid transforms, axis-aligned boxes and the small linear
//! systems the constraint solvers need. Vectors come from [`glam`]
//! (`Vec2`/`Vec3`); the types here add what a rigid-body engine layers on
//! top of a plain vector library.
//!
//! # Conventions
//!
//! - Angles are radians, counter-clockwise positive.
//! - The scalar 2D cross product `a × b = a.x * b.y - a.y * b.x` is the
//!   z-component of the embedded 3D cross product.

pub use glam::{Vec2, Vec3};

use serde::{Deserialize, Serialize};

/// Scalar 2D cross product.
#[inline]
#[must_use]
pub fn cross(a: Vec2, b: Vec2) -> f32 {
    a.x * b.y - a.y * b.x
}

/// Cross product of a scalar (angular velocity) and a vector: `s × v`.
#[inline]
#[must_use]
pub fn cross_sv(s: f32, v: Vec2) -> Vec2 {
    Vec2::new(-s * v.y, s * v.x)
}

/// Cross product of a vector and a scalar: `v × s`.
#[inline]
#[must_use]
pub fn cross_vs(v: Vec2, s: f32) -> Vec2 {
    Vec2::new(s * v.y, -s * v.x)
}

// ============================================================================
// Rot — 2D rotation as a unit complex number
// ============================================================================

/// 2D rotation stored as sine/cosine pair.
///
/// Storing the evaluated pair instead of the raw angle keeps the hot
/// transform paths free of trigonometry.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Rot {
    /// Sine of the angle
    pub s: f32,
    /// Cosine of the angle
    pub c: f32,
}

impl Rot {
    /// Identity rotation (angle 0)
    pub const IDENTITY: Self = Self { s: 0.0, c: 1.0 };

    /// Create from an angle in radians.
    #[inline]
    #[must_use]
    pub fn new(angle: f32) -> Self {
        let (s, c) = angle.sin_cos();
        Self { s, c }
    }

    /// Recover the angle in radians.
    #[inline]
    #[must_use]
    pub fn angle(&self) -> f32 {
        self.s.atan2(self.c)
    }

    /// The rotated x-axis.
    #[inline]
    #[must_use]
    pub fn x_axis(&self) -> Vec2 {
        Vec2::new(self.c, self.s)
    }

    /// The rotated y-axis.
    #[inline]
    #[must_use]
    pub fn y_axis(&self) -> Vec2 {
        Vec2::new(-self.s, self.c)
    }

    /// Rotate a vector.
    #[inline]
    #[must_use]
    pub fn apply(&self, v: Vec2) -> Vec2 {
        Vec2::new(self.c * v.x - self.s * v.y, self.s * v.x + self.c * v.y)
    }

    /// Inverse-rotate a vector.
    #[inline]
    #[must_use]
    pub fn apply_t(&self, v: Vec2) -> Vec2 {
        Vec2::new(self.c * v.x + self.s * v.y, -self.s * v.x + self.c * v.y)
    }

    /// Compose two rotations: `self * rhs`.
    #[inline]
    #[must_use]
    pub fn mul(&self, rhs: Rot) -> Rot {
        Rot {
            s: self.s * rhs.c + self.c * rhs.s,
            c: self.c * rhs.c - self.s * rhs.s,
        }
    }

    /// Compose with the inverse of `self`: `self^T * rhs`.
    #[inline]
    #[must_use]
    pub fn mul_t(&self, rhs: Rot) -> Rot {
        Rot {
            s: self.c * rhs.s - self.s * rhs.c,
            c: self.c * rhs.c + self.s * rhs.s,
        }
    }
}

impl Default for Rot {
    fn default() -> Self {
        Self::IDENTITY
    }
}

// ============================================================================
// Transform2 — rigid transform (translation + rotation)
// ============================================================================

/// Rigid 2D transform: rotation followed by translation.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transform2 {
    /// Translation
    pub p: Vec2,
    /// Rotation
    pub q: Rot,
}

impl Transform2 {
    /// Identity transform
    pub const IDENTITY: Self = Self {
        p: Vec2::ZERO,
        q: Rot::IDENTITY,
    };

    /// Create from translation and angle.
    #[inline]
    #[must_use]
    pub fn new(position: Vec2, angle: f32) -> Self {
        Self {
            p: position,
            q: Rot::new(angle),
        }
    }

    /// Transform a local point into world space.
    #[inline]
    #[must_use]
    pub fn apply(&self, v: Vec2) -> Vec2 {
        self.q.apply(v) + self.p
    }

    /// Transform a world point into local space.
    #[inline]
    #[must_use]
    pub fn apply_t(&self, v: Vec2) -> Vec2 {
        self.q.apply_t(v - self.p)
    }

    /// Compose transforms: `self * rhs` (apply `rhs` first).
    #[inline]
    #[must_use]
    pub fn mul(&self, rhs: Transform2) -> Transform2 {
        Transform2 {
            p: self.q.apply(rhs.p) + self.p,
            q: self.q.mul(rhs.q),
        }
    }

    /// Relative transform: `self^-1 * rhs`.
    #[inline]
    #[must_use]
    pub fn mul_t(&self, rhs: Transform2) -> Transform2 {
        Transform2 {
            p: self.q.apply_t(rhs.p - self.p),
            q: self.q.mul_t(rhs.q),
        }
    }
}

impl Default for Transform2 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

// ============================================================================
// Aabb — axis-aligned bounding box
// ============================================================================

/// Axis-aligned bounding box.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    /// Lower bound
    pub min: Vec2,
    /// Upper bound
    pub max: Vec2,
}

impl Aabb {
    /// Create from bounds.
    #[inline]
    #[must_use]
    pub const fn new(min: Vec2, max: Vec2) -> Self {
        Self { min, max }
    }

    /// The smallest box containing both boxes.
    #[inline]
    #[must_use]
    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Whether the boxes overlap (closed intervals).
    #[inline]
    #[must_use]
    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.x <= other.max.x
            && self.min.y <= other.max.y
            && other.min.x <= self.max.x
            && other.min.y <= self.max.y
    }

    /// Whether `other` lies entirely inside this box.
    #[inline]
    #[must_use]
    pub fn contains(&self, other: &Aabb) -> bool {
        self.min.x <= other.min.x
            && self.min.y <= other.min.y
            && other.max.x <= self.max.x
            && other.max.y <= self.max.y
    }

    /// Grow the box by `margin` in every direction.
    #[inline]
    #[must_use]
    pub fn extended(&self, margin: f32) -> Aabb {
        let m = Vec2::splat(margin);
        Aabb {
            min: self.min - m,
            max: self.max + m,
        }
    }

    /// Center point.
    #[inline]
    #[must_use]
    pub fn center(&self) -> Vec2 {
        0.5 * (self.min + self.max)
    }

    /// Perimeter, the 2D analogue of surface area for tree-build cost.
    #[inline]
    #[must_use]
    pub fn perimeter(&self) -> f32 {
        let d = self.max - self.min;
        2.0 * (d.x + d.y)
    }

    /// Conservative test of a segment `p1 -> p1 + fraction * (p2 - p1)`
    /// against the box. Used by the broad-phase ray walk; false positives
    /// are acceptable, false negatives are not.
    #[must_use]
    pub fn intersects_segment(&self, p1: Vec2, p2: Vec2, max_fraction: f32) -> bool {
        let mut t_min = 0.0_f32;
        let mut t_max = max_fraction;
        let d = p2 - p1;
        for axis in 0..2 {
            let (origin, dir, lo, hi) = if axis == 0 {
                (p1.x, d.x, self.min.x, self.max.x)
            } else {
                (p1.y, d.y, self.min.y, self.max.y)
            };
            if dir.abs() < f32::EPSILON {
                if origin < lo || origin > hi {
                    return false;
                }
            } else {
                let inv = 1.0 / dir;
                let mut t0 = (lo - origin) * inv;
                let mut t1 = (hi - origin) * inv;
                if t0 > t1 {
                    core::mem::swap(&mut t0, &mut t1);
                }
                t_min = t_min.max(t0);
                t_max = t_max.min(t1);
                if t_min > t_max {
                    return false;
                }
            }
        }
        true
    }
}

// ============================================================================
// Mat22 / Mat33 — effective-mass systems
// ============================================================================

/// Column-major 2x2 matrix for solving constraint systems.
#[derive(Clone, Copy, Debug, Default)]
pub struct Mat22 {
    pub ex: Vec2,
    pub ey: Vec2,
}

impl Mat22 {
    #[inline]
    #[must_use]
    pub const fn new(ex: Vec2, ey: Vec2) -> Self {
        Self { ex, ey }
    }

    /// Solve `A * x = b`. Degenerate systems return zero.
    #[inline]
    #[must_use]
    pub fn solve(&self, b: Vec2) -> Vec2 {
        let a11 = self.ex.x;
        let a12 = self.ey.x;
        let a21 = self.ex.y;
        let a22 = self.ey.y;
        let mut det = a11 * a22 - a12 * a21;
        if det != 0.0 {
            det = 1.0 / det;
        }
        Vec2::new(det * (a22 * b.x - a12 * b.y), det * (a11 * b.y - a21 * b.x))
    }

    /// Matrix inverse; degenerate matrices invert to zero.
    #[must_use]
    pub fn inverse(&self) -> Mat22 {
        let a = self.ex.x;
        let b = self.ey.x;
        let c = self.ex.y;
        let d = self.ey.y;
        let mut det = a * d - b * c;
        if det != 0.0 {
            det = 1.0 / det;
        }
        Mat22 {
            ex: Vec2::new(det * d, -det * c),
            ey: Vec2::new(-det * b, det * a),
        }
    }

    /// Multiply by a vector.
    #[inline]
    #[must_use]
    pub fn mul_vec(&self, v: Vec2) -> Vec2 {
        Vec2::new(
            self.ex.x * v.x + self.ey.x * v.y,
            self.ex.y * v.x + self.ey.y * v.y,
        )
    }
}

/// Column-major 3x3 matrix for the revolute/prismatic block systems.
#[derive(Clone, Copy, Debug, Default)]
pub struct Mat33 {
    pub ex: Vec3,
    pub ey: Vec3,
    pub ez: Vec3,
}

impl Mat33 {
    /// Solve the full 3x3 system `A * x = b`.
    #[must_use]
    pub fn solve33(&self, b: Vec3) -> Vec3 {
        let mut det = self.ex.dot(self.ey.cross(self.ez));
        if det != 0.0 {
            det = 1.0 / det;
        }
        Vec3::new(
            det * b.dot(self.ey.cross(self.ez)),
            det * self.ex.dot(b.cross(self.ez)),
            det * self.ex.dot(self.ey.cross(b)),
        )
    }

    /// Solve the upper-left 2x2 block of the system.
    #[must_use]
    pub fn solve22(&self, b: Vec2) -> Vec2 {
        let a11 = self.ex.x;
        let a12 = self.ey.x;
        let a21 = self.ex.y;
        let a22 = self.ey.y;
        let mut det = a11 * a22 - a12 * a21;
        if det != 0.0 {
            det = 1.0 / det;
        }
        Vec2::new(det * (a22 * b.x - a12 * b.y), det * (a11 * b.y - a21 * b.x))
    }

    /// Inverse of the upper-left 2x2 block, embedded back in a 3x3.
    #[must_use]
    pub fn get_inverse22(&self) -> Mat33 {
        let a = self.ex.x;
        let b = self.ey.x;
        let c = self.ex.y;
        let d = self.ey.y;
        let mut det = a * d - b * c;
        if det != 0.0 {
            det = 1.0 / det;
        }
        Mat33 {
            ex: Vec3::new(det * d, -det * c, 0.0),
            ey: Vec3::new(-det * b, det * a, 0.0),
            ez: Vec3::ZERO,
        }
    }

    /// Inverse of a symmetric 3x3, used by position correction.
    #[must_use]
    pub fn get_sym_inverse33(&self) -> Mat33 {
        let mut det = self.ex.dot(self.ey.cross(self.ez));
        if det != 0.0 {
            det = 1.0 / det;
        }
        let a11 = self.ex.x;
        let a12 = self.ey.x;
        let a13 = self.ez.x;
        let a22 = self.ey.y;
        let a23 = self.ez.y;
        let a33 = self.ez.z;

        let ex = Vec3::new(
            det * (a22 * a33 - a23 * a23),
            det * (a13 * a23 - a12 * a33),
            det * (a12 * a23 - a13 * a22),
        );
        let ey = Vec3::new(
            ex.y,
            det * (a11 * a33 - a13 * a13),
            det * (a13 * a12 - a11 * a23),
        );
        let ez = Vec3::new(ex.z, ey.z, det * (a11 * a22 - a12 * a12));
        Mat33 { ex, ey, ez }
    }

    /// Multiply by a vector.
    #[inline]
    #[must_use]
    pub fn mul_vec(&self, v: Vec3) -> Vec3 {
        self.ex * v.x + self.ey * v.y + self.ez * v.z
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rot_roundtrip() {
        let q = Rot::new(0.7);
        assert!((q.angle() - 0.7).abs() < 1e-6);
        let v = Vec2::new(3.0, -2.0);
        let back = q.apply_t(q.apply(v));
        assert!((back - v).length() < 1e-5, "rotate/unrotate should be identity");
    }

    #[test]
    fn test_transform_inverse() {
        let xf = Transform2::new(Vec2::new(5.0, -1.0), 1.2);
        let p = Vec2::new(0.5, 2.0);
        let back = xf.apply_t(xf.apply(p));
        assert!((back - p).length() < 1e-5);
    }

    #[test]
    fn test_transform_compose() {
        let a = Transform2::new(Vec2::new(1.0, 0.0), 0.3);
        let b = Transform2::new(Vec2::new(0.0, 2.0), -0.9);
        let p = Vec2::new(0.25, 0.75);
        let composed = a.mul(b).apply(p);
        let sequential = a.apply(b.apply(p));
        assert!((composed - sequential).length() < 1e-5);
    }

    #[test]
    fn test_aabb_union_contains() {
        let a = Aabb::new(Vec2::ZERO, Vec2::ONE);
        let b = Aabb::new(Vec2::new(2.0, 2.0), Vec2::new(3.0, 3.0));
        let u = a.union(&b);
        assert!(u.contains(&a));
        assert!(u.contains(&b));
        assert!(!a.intersects(&b));
        assert!(u.intersects(&a));
    }

    #[test]
    fn test_aabb_segment() {
        let b = Aabb::new(Vec2::new(1.0, -1.0), Vec2::new(2.0, 1.0));
        assert!(b.intersects_segment(Vec2::new(0.0, 0.0), Vec2::new(3.0, 0.0), 1.0));
        assert!(!b.intersects_segment(Vec2::new(0.0, 2.0), Vec2::new(3.0, 2.0), 1.0));
        // Clipped by max_fraction before reaching the box
        assert!(!b.intersects_segment(Vec2::new(0.0, 0.0), Vec2::new(3.0, 0.0), 0.1));
    }

    #[test]
    fn test_mat22_solve() {
        let m = Mat22::new(Vec2::new(2.0, 0.0), Vec2::new(0.0, 4.0));
        let x = m.solve(Vec2::new(2.0, 8.0));
        assert!((x - Vec2::new(1.0, 2.0)).length() < 1e-6);
    }

    #[test]
    fn test_mat33_solve() {
        let m = Mat33 {
            ex: Vec3::new(2.0, 0.0, 0.0),
            ey: Vec3::new(0.0, 3.0, 0.0),
            ez: Vec3::new(0.0, 0.0, 4.0),
        };
        let x = m.solve33(Vec3::new(2.0, 6.0, 8.0));
        assert!((x - Vec3::new(1.0, 2.0, 2.0)).length() < 1e-6);
    }

    #[test]
    fn test_cross_identities() {
        let v = Vec2::new(3.0, 4.0);
        // s × v is v rotated 90° CCW scaled by s
        assert!((cross_sv(1.0, v) - Vec2::new(-4.0, 3.0)).length() < 1e-6);
        assert!((cross_vs(v, 1.0) - Vec2::new(4.0, -3.0)).length() < 1e-6);
        assert_eq!(cross(Vec2::X, Vec2::Y), 1.0);
    }
}
