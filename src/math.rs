//! Minimal 3-D math used by the navigation estimator.
//!
//! Only the operations the drone code actually needs are implemented here;
//! this is not a general linear-algebra library.

use std::ops::{Add, AddAssign, Div, DivAssign, Index, IndexMut, Mul, MulAssign, Neg, Sub, SubAssign};

/// Ordered triple of `f32`.
///
/// The drone reference frame is `x` = right, `y` = up, `z` = forward.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3::new(0.0, 0.0, 0.0);
    pub const RIGHT: Vec3 = Vec3::new(1.0, 0.0, 0.0);
    pub const LEFT: Vec3 = Vec3::new(-1.0, 0.0, 0.0);
    pub const UP: Vec3 = Vec3::new(0.0, 1.0, 0.0);
    pub const DOWN: Vec3 = Vec3::new(0.0, -1.0, 0.0);
    pub const FORWARD: Vec3 = Vec3::new(0.0, 0.0, 1.0);
    pub const BACK: Vec3 = Vec3::new(0.0, 0.0, -1.0);

    pub const fn new(x: f32, y: f32, z: f32) -> Vec3 {
        Vec3 { x, y, z }
    }

    pub fn magnitude(self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Returns the unit vector pointing in the same direction, or the zero
    /// vector when the magnitude is zero.
    pub fn normalized(self) -> Vec3 {
        let m = self.magnitude();
        if m == 0.0 {
            Vec3::ZERO
        } else {
            self / m
        }
    }

    pub fn dot(self, v: Vec3) -> f32 {
        self.x * v.x + self.y * v.y + self.z * v.z
    }

    pub fn cross(self, v: Vec3) -> Vec3 {
        Vec3::new(
            self.y * v.z - self.z * v.y,
            self.z * v.x - self.x * v.z,
            self.x * v.y - self.y * v.x,
        )
    }
}

impl Add for Vec3 {
    type Output = Vec3;
    fn add(self, v: Vec3) -> Vec3 {
        Vec3::new(self.x + v.x, self.y + v.y, self.z + v.z)
    }
}

impl AddAssign for Vec3 {
    fn add_assign(&mut self, v: Vec3) {
        *self = *self + v;
    }
}

impl Sub for Vec3 {
    type Output = Vec3;
    fn sub(self, v: Vec3) -> Vec3 {
        Vec3::new(self.x - v.x, self.y - v.y, self.z - v.z)
    }
}

impl SubAssign for Vec3 {
    fn sub_assign(&mut self, v: Vec3) {
        *self = *self - v;
    }
}

impl Mul<f32> for Vec3 {
    type Output = Vec3;
    fn mul(self, f: f32) -> Vec3 {
        Vec3::new(self.x * f, self.y * f, self.z * f)
    }
}

impl MulAssign<f32> for Vec3 {
    fn mul_assign(&mut self, f: f32) {
        *self = *self * f;
    }
}

impl Div<f32> for Vec3 {
    type Output = Vec3;
    fn div(self, f: f32) -> Vec3 {
        Vec3::new(self.x / f, self.y / f, self.z / f)
    }
}

impl DivAssign<f32> for Vec3 {
    fn div_assign(&mut self, f: f32) {
        *self = *self / f;
    }
}

impl Neg for Vec3 {
    type Output = Vec3;
    fn neg(self) -> Vec3 {
        Vec3::new(-self.x, -self.y, -self.z)
    }
}

/// Rotation quaternion `(x, y, z, w)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quaternion {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Quaternion {
    pub const IDENTITY: Quaternion = Quaternion {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };

    pub const fn new(x: f32, y: f32, z: f32, w: f32) -> Quaternion {
        Quaternion { x, y, z, w }
    }

    /// Builds the rotation from Euler angles in radians, half-angle
    /// sin/cos products, applied in `x`, `y`, `z` argument order.
    pub fn from_euler(x: f32, y: f32, z: f32) -> Quaternion {
        let (sx, cx) = (f64::from(x) * 0.5).sin_cos();
        let (sy, cy) = (f64::from(y) * 0.5).sin_cos();
        let (sz, cz) = (f64::from(z) * 0.5).sin_cos();

        let cycz = cy * cz;
        let sycz = sy * cz;
        let cysz = cy * sz;
        let sysz = sy * sz;

        Quaternion {
            x: (sx * cycz - cx * sysz) as f32,
            y: (cx * sycz + sx * cysz) as f32,
            z: (cx * cysz - sx * sycz) as f32,
            w: (cx * cycz + sx * sysz) as f32,
        }
        .normalized()
    }

    pub fn normalized(self) -> Quaternion {
        let n = self.x * self.x + self.y * self.y + self.z * self.z + self.w * self.w;
        self * (1.0 / n.sqrt())
    }

    pub fn dot(self, q: Quaternion) -> f32 {
        self.x * q.x + self.y * q.y + self.z * q.z + self.w * q.w
    }

    /// The 4x4 rotation matrix of this quaternion (rotates world into body
    /// coordinates for the drone's orientation convention).
    pub fn matrix(self) -> Mat4 {
        let Quaternion { x, y, z, w } = self;
        let mut m = Mat4::IDENTITY;
        m[(0, 0)] = 1.0 - 2.0 * y * y - 2.0 * z * z;
        m[(1, 0)] = 2.0 * x * y + 2.0 * z * w;
        m[(2, 0)] = 2.0 * x * z - 2.0 * y * w;

        m[(0, 1)] = 2.0 * x * y - 2.0 * z * w;
        m[(1, 1)] = 1.0 - 2.0 * x * x - 2.0 * z * z;
        m[(2, 1)] = 2.0 * z * y + 2.0 * x * w;

        m[(0, 2)] = 2.0 * x * z + 2.0 * y * w;
        m[(1, 2)] = 2.0 * z * y - 2.0 * x * w;
        m[(2, 2)] = 1.0 - 2.0 * x * x - 2.0 * y * y;
        m
    }
}

/// Quaternion product. `a * b` composes rotations with `a` applied first,
/// then `b` (the operand order is the Hamilton product `b·a`).
impl Mul for Quaternion {
    type Output = Quaternion;
    fn mul(self, q: Quaternion) -> Quaternion {
        Quaternion {
            w: q.w * self.w - q.x * self.x - q.y * self.y - q.z * self.z,
            x: q.w * self.x + q.x * self.w + q.y * self.z - q.z * self.y,
            y: q.w * self.y + q.y * self.w + q.z * self.x - q.x * self.z,
            z: q.w * self.z + q.z * self.w + q.x * self.y - q.y * self.x,
        }
    }
}

impl Mul<f32> for Quaternion {
    type Output = Quaternion;
    fn mul(self, s: f32) -> Quaternion {
        Quaternion::new(self.x * s, self.y * s, self.z * s, self.w * s)
    }
}

/// Row-major 4x4 matrix, indexed `m[(row, col)]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mat4 {
    m: [[f32; 4]; 4],
}

impl Mat4 {
    pub const ZERO: Mat4 = Mat4 { m: [[0.0; 4]; 4] };

    pub const IDENTITY: Mat4 = Mat4 {
        m: [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ],
    };

    pub fn transpose(self) -> Mat4 {
        let mut t = Mat4::ZERO;
        for row in 0..4 {
            for col in 0..4 {
                t.m[col][row] = self.m[row][col];
            }
        }
        t
    }
}

impl Index<(usize, usize)> for Mat4 {
    type Output = f32;
    fn index(&self, (row, col): (usize, usize)) -> &f32 {
        assert!(row < 4 && col < 4, "Mat4 index ({}, {}) out of range", row, col);
        &self.m[row][col]
    }
}

impl IndexMut<(usize, usize)> for Mat4 {
    fn index_mut(&mut self, (row, col): (usize, usize)) -> &mut f32 {
        assert!(row < 4 && col < 4, "Mat4 index ({}, {}) out of range", row, col);
        &mut self.m[row][col]
    }
}

impl Mul for Mat4 {
    type Output = Mat4;
    fn mul(self, rhs: Mat4) -> Mat4 {
        let mut out = Mat4::ZERO;
        for row in 0..4 {
            for col in 0..4 {
                let mut acc = 0.0;
                for k in 0..4 {
                    acc += self.m[row][k] * rhs.m[k][col];
                }
                out.m[row][col] = acc;
            }
        }
        out
    }
}

/// Transforms a direction: the vector is treated as `(x, y, z, 0)`, so the
/// translation column never contributes.
impl Mul<Vec3> for Mat4 {
    type Output = Vec3;
    fn mul(self, v: Vec3) -> Vec3 {
        Vec3::new(
            self.m[0][0] * v.x + self.m[0][1] * v.y + self.m[0][2] * v.z,
            self.m[1][0] * v.x + self.m[1][1] * v.y + self.m[1][2] * v.z,
            self.m[2][0] * v.x + self.m[2][1] * v.y + self.m[2][2] * v.z,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f32::consts::{FRAC_PI_2, PI};

    #[test]
    fn vec_arithmetic() {
        let a = Vec3::new(1.0, 2.0, 3.0);
        let b = Vec3::new(-1.0, 0.5, 2.0);
        assert_eq!(a + b, Vec3::new(0.0, 2.5, 5.0));
        assert_eq!(a - b, Vec3::new(2.0, 1.5, 1.0));
        assert_eq!(a * 2.0, Vec3::new(2.0, 4.0, 6.0));
        assert_eq!(a / 2.0, Vec3::new(0.5, 1.0, 1.5));
        assert_eq!(-a, Vec3::new(-1.0, -2.0, -3.0));
    }

    #[test]
    fn vec_dot_cross() {
        assert_eq!(Vec3::RIGHT.dot(Vec3::UP), 0.0);
        assert_eq!(Vec3::RIGHT.cross(Vec3::UP), Vec3::FORWARD);
        assert_eq!(Vec3::UP.cross(Vec3::FORWARD), Vec3::RIGHT);
    }

    #[test]
    fn vec_normalize() {
        let v = Vec3::new(3.0, 0.0, 4.0);
        assert_eq!(v.magnitude(), 5.0);
        assert_relative_eq!(v.normalized().magnitude(), 1.0);
        assert_eq!(Vec3::ZERO.normalized(), Vec3::ZERO);
    }

    #[test]
    fn quaternion_identity_for_zero_angles() {
        let q = Quaternion::from_euler(0.0, 0.0, 0.0);
        assert_eq!(q, Quaternion::IDENTITY);
        assert_eq!(q.matrix(), Mat4::IDENTITY);
    }

    #[test]
    fn quaternion_quarter_turn_about_y() {
        // 90 degrees about y maps forward onto right in this convention.
        let q = Quaternion::from_euler(0.0, FRAC_PI_2, 0.0);
        let v = q.matrix() * Vec3::FORWARD;
        assert_relative_eq!(v.x, 1.0, epsilon = 1e-6);
        assert_relative_eq!(v.y, 0.0, epsilon = 1e-6);
        assert_relative_eq!(v.z, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn quaternion_stays_normalized() {
        let q = Quaternion::from_euler(0.3, -1.2, PI / 3.0);
        assert_relative_eq!(q.dot(q), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn quaternion_product_identity() {
        let q = Quaternion::from_euler(0.4, 0.1, -0.9);
        assert_eq!(q * Quaternion::IDENTITY, q);
        assert_eq!(Quaternion::IDENTITY * q, q);
    }

    #[test]
    fn quaternion_product_composes_left_to_right() {
        let quarter_x = Quaternion::from_euler(FRAC_PI_2, 0.0, 0.0);
        let quarter_y = Quaternion::from_euler(0.0, FRAC_PI_2, 0.0);

        // x-turn first sends up to forward, the y-turn then sends forward
        // to right.
        let v = (quarter_x * quarter_y).matrix() * Vec3::UP;
        assert_relative_eq!(v.x, 1.0, epsilon = 1e-6);
        assert_relative_eq!(v.y, 0.0, epsilon = 1e-6);
        assert_relative_eq!(v.z, 0.0, epsilon = 1e-6);

        // The reversed product leaves up on the y-axis turn first, so only
        // the x-turn acts: up lands on forward.
        let v = (quarter_y * quarter_x).matrix() * Vec3::UP;
        assert_relative_eq!(v.x, 0.0, epsilon = 1e-6);
        assert_relative_eq!(v.y, 0.0, epsilon = 1e-6);
        assert_relative_eq!(v.z, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn matrix_transpose_inverts_rotation() {
        let q = Quaternion::from_euler(0.2, 0.7, -0.4);
        let m = q.matrix();
        let v = Vec3::new(0.5, -1.0, 2.0);
        let back = m.transpose() * (m * v);
        assert_relative_eq!(back.x, v.x, epsilon = 1e-5);
        assert_relative_eq!(back.y, v.y, epsilon = 1e-5);
        assert_relative_eq!(back.z, v.z, epsilon = 1e-5);
    }

    #[test]
    fn matrix_product_against_identity() {
        let q = Quaternion::from_euler(1.0, 0.5, 0.25);
        let m = q.matrix();
        assert_eq!(m * Mat4::IDENTITY, m);
        assert_eq!(Mat4::IDENTITY * m, m);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn matrix_index_out_of_range() {
        let m = Mat4::IDENTITY;
        let _ = m[(4, 0)];
    }
}
