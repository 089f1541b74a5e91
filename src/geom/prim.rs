use crate::core;

/// Sentinel for the missing fourth corner of a triangular patch.
pub const NO_VERTEX: i32 = -1;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Triangle {
    pub v: [usize; 3],
}

impl Triangle {
    pub fn new(v0: usize, v1: usize, v2: usize) -> Triangle {
        Triangle {v: [v0, v1, v2]}
    }

    pub fn bounds_grow(&self, verts: &[core::Vec], bounds: &mut core::BBox) {
        for &v in self.v.iter() {
            bounds.grow(&verts[v]);
        }
    }

    /// Unnormalized geometric normal; its length is twice the triangle's area.
    pub fn area_normal(&self, verts: &[core::Vec]) -> core::Vec {
        let v0 = verts[self.v[0]];
        let v1 = verts[self.v[1]];
        let v2 = verts[self.v[2]];
        (v1 - v0).cross(&(v2 - v0))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CurveKey {
    pub co: core::Vec,
    pub radius: f32,
}

impl CurveKey {
    pub fn new(co: core::Vec, radius: f32) -> CurveKey {
        CurveKey {co: co, radius: radius}
    }

    pub fn to_float4(&self) -> [f32; 4] {
        self.co.to_float4(self.radius)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Curve {
    pub first_key: usize,
    pub num_keys: usize,
    pub shader: u32,
}

impl Curve {
    pub fn num_segments(&self) -> usize {
        self.num_keys.saturating_sub(1)
    }

    /// Grows the bounds by segment `k`, padded by the radius at both of its keys.
    pub fn bounds_grow(&self, k: usize, curve_keys: &[CurveKey], bounds: &mut core::BBox) {
        let k0 = &curve_keys[self.first_key + k];
        let k1 = &curve_keys[self.first_key + k + 1];
        bounds.grow_radius(&k0.co, k0.radius);
        bounds.grow_radius(&k1.co, k1.radius);
    }
}

/// A coarse subdivision patch with three or four corners.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Patch {
    pub v: [i32; 4],
    pub shader: u32,
    pub smooth: bool,
}

impl Patch {
    pub fn is_quad(&self) -> bool {
        self.v[3] != NO_VERTEX
    }

    pub fn num_corners(&self) -> usize {
        if self.is_quad() { 4 } else { 3 }
    }

    /// Corner vertex indices, three for a triangular patch.
    pub fn corners(&self) -> &[i32] {
        &self.v[..self.num_corners()]
    }

    pub fn bounds_grow(&self, verts: &[core::Vec], bounds: &mut core::BBox) {
        for &v in self.corners() {
            bounds.grow(&verts[v as usize]);
        }
    }
}

impl Default for Patch {
    fn default() -> Patch {
        Patch {v: [0, 0, 0, NO_VERTEX], shader: 0, smooth: false}
    }
}

/// A fragment of a patch produced by splitting, with per-edge tessellation rates.
///
/// Edge `i` runs from corner `i` to corner `i + 1`. Corner UVs are in the parent patch's
/// parameter space: bilinear for quads, barycentric `(u, v)` for triangles. A triangular
/// sub-patch stores `NO_VERTEX` as its fourth edge factor.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SubPatch {
    pub patch: usize,
    pub edge_factors: [i32; 4],
    pub uv: [core::Vec2; 4],
    pub bounds: core::BBox,
}

impl SubPatch {
    pub fn quad(patch: usize, edge_factors: [i32; 4], uv: [core::Vec2; 4]) -> SubPatch {
        SubPatch {patch: patch, edge_factors: edge_factors, uv: uv, bounds: core::BBox::empty()}
    }

    pub fn triangle(patch: usize, edge_factors: [i32; 3], uv: [core::Vec2; 3]) -> SubPatch {
        SubPatch {
            patch: patch,
            edge_factors: [edge_factors[0], edge_factors[1], edge_factors[2], NO_VERTEX],
            uv: [uv[0], uv[1], uv[2], core::Vec2::zero()],
            bounds: core::BBox::empty()
        }
    }

    pub fn is_quad(&self) -> bool {
        self.edge_factors[3] != NO_VERTEX
    }

    pub fn num_edges(&self) -> usize {
        if self.is_quad() { 4 } else { 3 }
    }

    /// Edge factor `i`, never less than one segment.
    pub fn edge_factor(&self, i: usize) -> u32 {
        self.edge_factors[i].max(1) as u32
    }

    pub fn bounds_grow(&self, bounds: &mut core::BBox) {
        *bounds = bounds.combine_with(&self.bounds);
    }
}

/// Device code for each primitive kind in packed index arrays.
pub const PRIMITIVE_TRIANGLE: u32 = 1;
pub const PRIMITIVE_CURVE: u32 = 2;
pub const PRIMITIVE_PATCH: u32 = 4;

/// Reference to one primitive of a mesh, as stored in BVH leaves.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Primitive {
    Triangle(usize),
    Curve {
        curve: usize,
        segment: usize
    },
    Patch(usize),
}

/// Per-mesh global buffer offsets assigned once per device synchronization.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MeshOffsets {
    pub vert: usize,
    pub tri: usize,
    pub curve: usize,
    pub curve_key: usize,
    pub patch: usize,
}

impl Primitive {
    pub fn prim_type(&self) -> u32 {
        match *self {
            Primitive::Triangle(_) => PRIMITIVE_TRIANGLE,
            Primitive::Curve {..} => PRIMITIVE_CURVE,
            Primitive::Patch(_) => PRIMITIVE_PATCH,
        }
    }

    /// Index of the primitive in its packed global array. Curves pack the segment in the
    /// type's upper bits, see `pack_type`.
    pub fn pack_index(&self, offsets: &MeshOffsets) -> u32 {
        match *self {
            Primitive::Triangle(i) => (offsets.tri + i) as u32,
            Primitive::Curve {curve, ..} => (offsets.curve + curve) as u32,
            Primitive::Patch(i) => (offsets.patch + i) as u32,
        }
    }

    pub fn pack_type(&self) -> u32 {
        match *self {
            Primitive::Curve {segment, ..} => self.prim_type() | ((segment as u32) << 8),
            _ => self.prim_type()
        }
    }

    pub fn bounds_grow(&self, verts: &[core::Vec], triangles: &[Triangle], curve_keys: &[CurveKey],
        curves: &[Curve], patches: &[Patch], bounds: &mut core::BBox)
    {
        match *self {
            Primitive::Triangle(i) => triangles[i].bounds_grow(verts, bounds),
            Primitive::Curve {curve, segment} => curves[curve].bounds_grow(segment, curve_keys, bounds),
            Primitive::Patch(i) => patches[i].bounds_grow(verts, bounds),
        }
    }
}
