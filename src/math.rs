//! Column-major 4x4 matrices for layer placement.
//!
//! Only the handful of operations the compositor needs: translation, scale,
//! rotation about Z, an orthographic projection and multiplication. Layout
//! matches what the GPU expects for `mat4x4<f32>` uniforms.

use std::ops::Mul;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mat4 {
    /// Four columns, each `[x, y, z, w]`.
    pub cols: [[f32; 4]; 4],
}

impl Mat4 {
    pub const IDENTITY: Self = Self {
        cols: [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ],
    };

    pub const fn from_translation(x: f32, y: f32, z: f32) -> Self {
        Self {
            cols: [
                [1.0, 0.0, 0.0, 0.0],
                [0.0, 1.0, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
                [x, y, z, 1.0],
            ],
        }
    }

    pub const fn from_scale(sx: f32, sy: f32, sz: f32) -> Self {
        Self {
            cols: [
                [sx, 0.0, 0.0, 0.0],
                [0.0, sy, 0.0, 0.0],
                [0.0, 0.0, sz, 0.0],
                [0.0, 0.0, 0.0, 1.0],
            ],
        }
    }

    /// Counter-clockwise rotation about +Z in a y-up space.
    pub fn from_rotation_z(radians: f32) -> Self {
        let (s, c) = radians.sin_cos();
        Self {
            cols: [
                [c, s, 0.0, 0.0],
                [-s, c, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
                [0.0, 0.0, 0.0, 1.0],
            ],
        }
    }

    /// Orthographic projection mapping the box to clip space, x and y into
    /// `[-1, 1]`, z = 0 staying at 0.
    pub fn orthographic(left: f32, right: f32, bottom: f32, top: f32, near: f32, far: f32) -> Self {
        let width = right - left;
        let height = top - bottom;
        let depth = far - near;
        Self {
            cols: [
                [2.0 / width, 0.0, 0.0, 0.0],
                [0.0, 2.0 / height, 0.0, 0.0],
                [0.0, 0.0, -2.0 / depth, 0.0],
                [
                    -(right + left) / width,
                    -(top + bottom) / height,
                    -(far + near) / depth,
                    1.0,
                ],
            ],
        }
    }

    /// Applies the matrix to a point (w = 1) and returns the resulting xyz.
    pub fn transform_point(&self, x: f32, y: f32, z: f32) -> [f32; 3] {
        let c = &self.cols;
        let mut out = [0.0_f32; 3];
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = c[0][i] * x + c[1][i] * y + c[2][i] * z + c[3][i];
        }
        out
    }

    pub fn to_cols_array(&self) -> [f32; 16] {
        let mut out = [0.0_f32; 16];
        for (col_index, col) in self.cols.iter().enumerate() {
            out[col_index * 4..col_index * 4 + 4].copy_from_slice(col);
        }
        out
    }
}

impl Default for Mat4 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Mul for Mat4 {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        let a = &self.cols;
        let b = &rhs.cols;
        let mut out = [[0.0_f32; 4]; 4];
        for (j, out_col) in out.iter_mut().enumerate() {
            for (i, cell) in out_col.iter_mut().enumerate() {
                *cell =
                    a[0][i] * b[j][0] + a[1][i] * b[j][1] + a[2][i] * b[j][2] + a[3][i] * b[j][3];
            }
        }
        Self { cols: out }
    }
}
