use crate::core::bbox;
use crate::core::matrix;
use crate::core::vector;

/// An affine transform with its inverse cached.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Xform {
    mat: matrix::Mat,
    inv_mat: matrix::Mat,
}

static IDENTITY: Xform = Xform {
    mat: matrix::Mat {
        storage: [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0]]
    },
    inv_mat: matrix::Mat {
        storage: [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0]]
    },
};

impl Xform {
    /// Singular matrices get a zero inverse; they collapse geometry anyway.
    pub fn new(mat: matrix::Mat) -> Xform {
        let inv_mat = mat.inverted().unwrap_or_else(matrix::Mat::zero);
        Xform {
            mat: mat,
            inv_mat: inv_mat,
        }
    }

    pub fn identity() -> Xform {
        IDENTITY
    }

    pub fn mat(&self) -> &matrix::Mat {
        &self.mat
    }

    pub fn inverse(&self) -> Xform {
        Xform {
            mat: self.inv_mat,
            inv_mat: self.mat,
        }
    }

    pub fn is_negative_scaled(&self) -> bool {
        self.mat.get_determinant3x3() < 0.0
    }

    /// The inverse-transpose used to carry normals through this transform.
    pub fn normal_xform(&self) -> Xform {
        Xform {
            mat: self.inv_mat.transposed(),
            inv_mat: self.mat.transposed(),
        }
    }

    fn _transform_normal(inv_mat: &matrix::Mat, v: &vector::Vec) -> vector::Vec {
        vector::Vec::new(
                v.x * inv_mat[0][0] + v.y * inv_mat[0][1] + v.z * inv_mat[0][2],
                v.x * inv_mat[1][0] + v.y * inv_mat[1][1] + v.z * inv_mat[1][2],
                v.x * inv_mat[2][0] + v.y * inv_mat[2][1] + v.z * inv_mat[2][2])
    }

    fn _transform_bbox(mat: &matrix::Mat, b: &bbox::BBox) -> bbox::BBox {
        let mut out = bbox::BBox::empty();
        for corner in b.corners().iter() {
            out.grow(&mat.transform(corner));
        }
        out
    }

    pub fn transform(&self, v: &vector::Vec) -> vector::Vec {
        self.mat.transform(v)
    }

    pub fn transform_dir(&self, v: &vector::Vec) -> vector::Vec {
        self.mat.transform_dir(v)
    }

    pub fn transform_normal(&self, v: &vector::Vec) -> vector::Vec {
        // This is right. _transform_normal takes the inverse mat because normals are transformed
        // by the transposed inverted matrix.
        Self::_transform_normal(&self.inv_mat, v)
    }

    pub fn transform_bbox(&self, b: &bbox::BBox) -> bbox::BBox {
        if !b.is_valid() {
            return *b;
        }
        Self::_transform_bbox(&self.mat, b)
    }
}

impl Default for Xform {
    fn default() -> Xform {
        IDENTITY
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn normals_stay_perpendicular_under_nonuniform_scale() {
        let xf = Xform::new(matrix::Mat::scale(&vector::Vec::new(2.0, 1.0, 1.0)));
        let tangent = xf.transform_dir(&vector::Vec::new(1.0, 1.0, 0.0));
        let normal = xf.transform_normal(&vector::Vec::new(1.0, -1.0, 0.0));
        assert_relative_eq!(tangent.dot(&normal), 0.0);
    }

    #[test]
    fn mirrored_transform_is_detected() {
        let xf = Xform::new(matrix::Mat::scale(&vector::Vec::new(1.0, -1.0, 1.0)));
        assert!(xf.is_negative_scaled());
        assert!(!Xform::identity().is_negative_scaled());
    }

    #[test]
    fn bbox_transform_covers_translated_corners() {
        let xf = Xform::new(matrix::Mat::translation(&vector::Vec::new(5.0, 0.0, 0.0)));
        let b = xf.transform_bbox(&bbox::BBox::from_points(&vector::Vec::zero(), &vector::Vec::one()));
        assert_eq!(b.min, vector::Vec::new(5.0, 0.0, 0.0));
        assert_eq!(b.max, vector::Vec::new(6.0, 1.0, 1.0));
    }
}
