use crate::core::vector;

use std::ops::{Index, IndexMut};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BBox {
    pub min: vector::Vec,
    pub max: vector::Vec
}

impl BBox {
    pub fn empty() -> BBox {
        BBox {
            min: vector::Vec::splat(std::f32::MAX),
            max: vector::Vec::splat(std::f32::MIN)
        }
    }

    pub fn from_points(a: &vector::Vec, b: &vector::Vec) -> BBox {
        BBox::empty().union_with(a).union_with(b)
    }

    /// True once at least one finite point has been added.
    pub fn is_valid(&self) -> bool {
        self.min.x <= self.max.x && self.min.y <= self.max.y && self.min.z <= self.max.z
            && self.min.is_finite() && self.max.is_finite()
    }

    pub fn union_with(&self, k: &vector::Vec) -> BBox {
        BBox {
            min: self.min.comp_min(k),
            max: self.max.comp_max(k)
        }
    }

    pub fn combine_with(&self, b: &BBox) -> BBox {
        BBox {
            min: self.min.comp_min(&b.min),
            max: self.max.comp_max(&b.max)
        }
    }

    pub fn grow(&mut self, k: &vector::Vec) {
        *self = self.union_with(k);
    }

    /// Grows the box by a sphere of the given radius around k.
    pub fn grow_radius(&mut self, k: &vector::Vec, radius: f32) {
        let r = vector::Vec::splat(radius);
        self.min = self.min.comp_min(&(*k - r));
        self.max = self.max.comp_max(&(*k + r));
    }

    /// Grows the box by k, skipping it when any component is not finite.
    pub fn grow_safe(&mut self, k: &vector::Vec) {
        if k.is_finite() {
            self.grow(k);
        }
    }

    pub fn grow_radius_safe(&mut self, k: &vector::Vec, radius: f32) {
        if k.is_finite() && radius.is_finite() {
            self.grow_radius(k, radius);
        }
    }

    pub fn diagonal(&self) -> vector::Vec {
        self.max - self.min
    }

    pub fn centroid(&self) -> vector::Vec {
        0.5 * self.min + 0.5 * self.max
    }

    pub fn maximum_extent(&self) -> usize {
        let diagonal = self.diagonal();
        if diagonal.x >= diagonal.y && diagonal.x >= diagonal.z {
            0
        }
        else if diagonal.y >= diagonal.z {
            1
        }
        else {
            2
        }
    }

    // Returns the position of v relative to the corners of the bounding box, where (0, 0, 0)
    // represents the min corner and (1, 1, 1) represents the max corner.
    pub fn relative_offset(&self, v: &vector::Vec) -> vector::Vec {
        let a = *v - self.min;
        let b = self.diagonal();
        a.comp_div(&b)
    }

    pub fn surface_area(&self) -> f32 {
        if !self.is_valid() {
            return 0.0;
        }
        let d = self.diagonal();
        2.0 * (d.x * d.y + d.y * d.z + d.z * d.x)
    }

    pub fn corners(&self) -> [vector::Vec; 8] {
        let (a, b) = (self.min, self.max);
        [
            vector::Vec::new(a.x, a.y, a.z),
            vector::Vec::new(b.x, a.y, a.z),
            vector::Vec::new(a.x, b.y, a.z),
            vector::Vec::new(a.x, a.y, b.z),
            vector::Vec::new(a.x, b.y, b.z),
            vector::Vec::new(b.x, a.y, b.z),
            vector::Vec::new(b.x, b.y, a.z),
            vector::Vec::new(b.x, b.y, b.z),
        ]
    }

}

impl Index<bool> for BBox {
    type Output = vector::Vec;

    fn index(&self, index: bool) -> &vector::Vec {
        if index {
            &self.max
        }
        else {
            &self.min
        }
    }
}

impl IndexMut<bool> for BBox {
    fn index_mut(&mut self, index: bool) -> &mut vector::Vec {
        if index {
            &mut self.max
        }
        else {
            &mut self.min
        }
    }
}
