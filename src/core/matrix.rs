use crate::core::math;
use crate::core::vector;

use std::fmt;
use std::fmt::Display;
use std::ops::{Mul, Index, IndexMut};

/** A 4x4 matrix in row-major order. Points are row vectors, so translation lives in row 3. */
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Mat {
    pub storage: [[f32; 4]; 4],
}

impl Mat {
    pub fn new(data: [[f32; 4]; 4]) -> Mat {
        Mat {storage: data}
    }

    pub fn zero() -> Mat {
        Mat::new([[0.0; 4]; 4])
    }

    pub fn identity() -> Mat {
        Mat::new([
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0]])
    }

    pub fn translation(translate: &vector::Vec) -> Mat {
        let mut output = Mat::identity();
        output[3][0] = translate.x;
        output[3][1] = translate.y;
        output[3][2] = translate.z;
        output
    }

    pub fn scale(scale: &vector::Vec) -> Mat {
        let mut output = Mat::identity();
        output[0][0] = scale.x;
        output[1][1] = scale.y;
        output[2][2] = scale.z;
        output
    }

    pub fn transposed(&self) -> Mat {
        let mut output = Mat::zero();
        for row in 0..4 {
            for col in 0..4 {
                output[row][col] = self[col][row];
            }
        }
        output
    }

    fn get_determinant3(&self, r1: usize, r2: usize, r3: usize, c1: usize, c2: usize, c3: usize)
        -> f32
    {
          self[r1][c1] * self[r2][c2] * self[r3][c3]
        + self[r1][c2] * self[r2][c3] * self[r3][c1]
        + self[r1][c3] * self[r2][c1] * self[r3][c2]
        - self[r1][c1] * self[r2][c3] * self[r3][c2]
        - self[r1][c2] * self[r2][c1] * self[r3][c3]
        - self[r1][c3] * self[r2][c2] * self[r3][c1]
    }

    /// Determinant of the upper-left 3x3 block; negative for mirroring transforms.
    pub fn get_determinant3x3(&self) -> f32 {
        self.get_determinant3(0, 1, 2, 0, 1, 2)
    }

    pub fn transform(&self, v: &vector::Vec) -> vector::Vec {
        let x = v.x * self[0][0] + v.y * self[1][0] + v.z * self[2][0] + self[3][0];
        let y = v.x * self[0][1] + v.y * self[1][1] + v.z * self[2][1] + self[3][1];
        let z = v.x * self[0][2] + v.y * self[1][2] + v.z * self[2][2] + self[3][2];
        let w = v.x * self[0][3] + v.y * self[1][3] + v.z * self[2][3] + self[3][3];
        vector::Vec::new(x / w, y / w, z / w)
    }

    pub fn transform_dir(&self, v: &vector::Vec) -> vector::Vec {
        vector::Vec::new(
            v.x * self[0][0] + v.y * self[1][0] + v.z * self[2][0],
            v.x * self[0][1] + v.y * self[1][1] + v.z * self[2][1],
            v.x * self[0][2] + v.y * self[1][2] + v.z * self[2][2])
    }

    /// Returns the inverse, or None when the matrix is singular.
    pub fn inverted(&self) -> Option<Mat> {
        // Pickle 1st two columns of matrix into registers.
        let x00 = self[0][0];
        let x01 = self[0][1];
        let x10 = self[1][0];
        let x11 = self[1][1];
        let x20 = self[2][0];
        let x21 = self[2][1];
        let x30 = self[3][0];
        let x31 = self[3][1];

        // Compute all six 2x2 determinants of 1st two columns.
        let y01 = (x00 * x11) - (x10 * x01);
        let y02 = (x00 * x21) - (x20 * x01);
        let y03 = (x00 * x31) - (x30 * x01);
        let y12 = (x10 * x21) - (x20 * x11);
        let y13 = (x10 * x31) - (x30 * x11);
        let y23 = (x20 * x31) - (x30 * x21);

        // Pickle 2nd two columns of matrix into registers.
        let x02 = self[0][2];
        let x03 = self[0][3];
        let x12 = self[1][2];
        let x13 = self[1][3];
        let x22 = self[2][2];
        let x23 = self[2][3];
        let x32 = self[3][2];
        let x33 = self[3][3];

        // Compute all 3x3 cofactors for 2nd two columns.
        let z33 = (x02 * y12) - (x12 * y02) + (x22 * y01);
        let z23 = (x12 * y03) - (x32 * y01) - (x02 * y13);
        let z13 = (x02 * y23) - (x22 * y03) + (x32 * y02);
        let z03 = (x22 * y13) - (x32 * y12) - (x12 * y23);
        let z32 = (x13 * y02) - (x23 * y01) - (x03 * y12);
        let z22 = (x03 * y13) - (x13 * y03) + (x33 * y01);
        let z12 = (x23 * y03) - (x33 * y02) - (x03 * y23);
        let z02 = (x13 * y23) - (x23 * y13) + (x33 * y12);

        // Compute all six 2x2 determinants of 2nd two columns.
        let y01 = (x02 * x13) - (x12 * x03);
        let y02 = (x02 * x23) - (x22 * x03);
        let y03 = (x02 * x33) - (x32 * x03);
        let y12 = (x12 * x23) - (x22 * x13);
        let y13 = (x12 * x33) - (x32 * x13);
        let y23 = (x22 * x33) - (x32 * x23);

        // Compute all 3x3 cofactors for 1st two columns.
        let z30 = (x11 * y02) - (x21 * y01) - (x01 * y12);
        let z20 = (x01 * y13) - (x11 * y03) + (x31 * y01);
        let z10 = (x21 * y03) - (x31 * y02) - (x01 * y23);
        let z00 = (x11 * y23) - (x21 * y13) + (x31 * y12);
        let z31 = (x00 * y12) - (x10 * y02) + (x20 * y01);
        let z21 = (x10 * y03) - (x30 * y01) - (x00 * y13);
        let z11 = (x00 * y23) - (x20 * y03) + (x30 * y02);
        let z01 = (x20 * y13) - (x30 * y12) - (x10 * y23);

        // Compute 4x4 determinant & its reciprocal.
        let det = (x30 * z30) + (x20 * z20) + (x10 * z10) + (x00 * z00);
        if math::is_nearly_zero(det) || !det.is_finite() {
            return None;
        }

        // Multiply all 3x3 cofactors by reciprocal & transpose.
        let rcp = 1.0 / det;
        let mut output = Mat::zero();
        output[0][0] = z00 * rcp;
        output[0][1] = z10 * rcp;
        output[1][0] = z01 * rcp;
        output[0][2] = z20 * rcp;
        output[2][0] = z02 * rcp;
        output[0][3] = z30 * rcp;
        output[3][0] = z03 * rcp;
        output[1][1] = z11 * rcp;
        output[1][2] = z21 * rcp;
        output[2][1] = z12 * rcp;
        output[1][3] = z31 * rcp;
        output[3][1] = z13 * rcp;
        output[2][2] = z22 * rcp;
        output[2][3] = z32 * rcp;
        output[3][2] = z23 * rcp;
        output[3][3] = z33 * rcp;
        Some(output)
    }

    /// Device layout: the three affine columns as float4 rows.
    pub fn to_float4x3(&self) -> [[f32; 4]; 3] {
        let mut out = [[0.0; 4]; 3];
        for col in 0..3 {
            for row in 0..4 {
                out[col][row] = self[row][col];
            }
        }
        out
    }
}

impl Display for Mat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for row in 0..4 {
            write!(f, "[{} {} {} {}]", self[row][0], self[row][1], self[row][2], self[row][3])?;
        }
        Ok(())
    }
}

impl Mul for Mat {
    type Output = Mat;
    fn mul(self, rhs: Mat) -> Mat {
        let mut output = Mat::zero();
        for row in 0..4 {
            for col in 0..4 {
                let mut sum = 0.0;
                for k in 0..4 {
                    sum += self[row][k] * rhs[k][col];
                }
                output[row][col] = sum;
            }
        }
        output
    }
}

impl Index<usize> for Mat {
    type Output = [f32; 4];
    fn index(&self, index: usize) -> &[f32; 4] {
        &self.storage[index]
    }
}

impl IndexMut<usize> for Mat {
    fn index_mut(&mut self, index: usize) -> &mut [f32; 4] {
        &mut self.storage[index]
    }
}
