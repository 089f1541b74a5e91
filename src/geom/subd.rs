//! Patch splitting strategies.

use crate::core;
use crate::geom::mesh::Mesh;
use crate::geom::osd::PatchEvaluator;
use crate::geom::prim::{Patch, SubPatch};

/// Splits one coarse patch into sub-patches with per-edge tessellation factors.
///
/// Implementations must assign the same factor to an edge shared by two neighboring patches
/// or sub-patches, and every sub-patch must have the quad-ness of its parent patch.
pub trait SubdSplit: Sync {
    fn split(&self, mesh: &Mesh, eval: &dyn PatchEvaluator, patch: usize, out: &mut Vec<SubPatch>);
}

fn unit_quad_uv() -> [core::Vec2; 4] {
    [core::Vec2::new(0.0, 0.0), core::Vec2::new(1.0, 0.0),
            core::Vec2::new(1.0, 1.0), core::Vec2::new(0.0, 1.0)]
}

fn unit_triangle_uv() -> [core::Vec2; 3] {
    [core::Vec2::new(0.0, 0.0), core::Vec2::new(1.0, 0.0), core::Vec2::new(0.0, 1.0)]
}

/// Order-independent midpoint, so neighbors splitting a shared edge get identical bits.
fn midpoint(a: core::Vec2, b: core::Vec2) -> core::Vec2 {
    (a + b) * 0.5
}

/// Bounds of the evaluated corners; exact for bilinear and linear patch evaluation.
fn corner_bounds(eval: &dyn PatchEvaluator, patch: usize, uv: &[core::Vec2]) -> core::BBox {
    let mut bounds = core::BBox::empty();
    for corner in uv {
        let (p, _) = eval.eval(patch, *corner);
        bounds.grow(&p);
    }
    bounds
}

/// Splits every patch `depth` times into four children and dices each child edge into
/// `edge_factor` segments.
#[derive(Clone, Copy, Debug)]
pub struct UniformSplit {
    pub depth: u32,
    pub edge_factor: i32,
}

impl UniformSplit {
    fn split_quad(&self, eval: &dyn PatchEvaluator, patch: usize, uv: [core::Vec2; 4], depth: u32,
        out: &mut Vec<SubPatch>)
    {
        if depth == 0 {
            let mut sub = SubPatch::quad(patch, [self.edge_factor; 4], uv);
            sub.bounds = corner_bounds(eval, patch, &uv);
            out.push(sub);
            return;
        }

        let m01 = midpoint(uv[0], uv[1]);
        let m12 = midpoint(uv[1], uv[2]);
        let m23 = midpoint(uv[2], uv[3]);
        let m30 = midpoint(uv[3], uv[0]);
        let center = midpoint(m01, m23);
        self.split_quad(eval, patch, [uv[0], m01, center, m30], depth - 1, out);
        self.split_quad(eval, patch, [m01, uv[1], m12, center], depth - 1, out);
        self.split_quad(eval, patch, [center, m12, uv[2], m23], depth - 1, out);
        self.split_quad(eval, patch, [m30, center, m23, uv[3]], depth - 1, out);
    }

    fn split_triangle(&self, eval: &dyn PatchEvaluator, patch: usize, uv: [core::Vec2; 3],
        depth: u32, out: &mut Vec<SubPatch>)
    {
        if depth == 0 {
            let mut sub = SubPatch::triangle(patch, [self.edge_factor; 3], uv);
            sub.bounds = corner_bounds(eval, patch, &uv);
            out.push(sub);
            return;
        }

        let mab = midpoint(uv[0], uv[1]);
        let mbc = midpoint(uv[1], uv[2]);
        let mca = midpoint(uv[2], uv[0]);
        self.split_triangle(eval, patch, [uv[0], mab, mca], depth - 1, out);
        self.split_triangle(eval, patch, [mab, uv[1], mbc], depth - 1, out);
        self.split_triangle(eval, patch, [mca, mbc, uv[2]], depth - 1, out);
        self.split_triangle(eval, patch, [mbc, mca, mab], depth - 1, out);
    }
}

impl SubdSplit for UniformSplit {
    fn split(&self, mesh: &Mesh, eval: &dyn PatchEvaluator, patch: usize, out: &mut Vec<SubPatch>) {
        if mesh.patches[patch].is_quad() {
            self.split_quad(eval, patch, unit_quad_uv(), self.depth, out);
        }
        else {
            self.split_triangle(eval, patch, unit_triangle_uv(), self.depth, out);
        }
    }
}

/// Keeps each patch whole and picks each edge's factor from its world-space length.
#[derive(Clone, Copy, Debug)]
pub struct EdgeRateSplit {
    /// Target edge length of one diced segment.
    pub dicing_rate: f32,
    pub max_factor: i32,
}

impl EdgeRateSplit {
    fn edge_factor(&self, verts: &[core::Vec], patch: &Patch, e: usize) -> i32 {
        let corners = patch.corners();
        let a = corners[e];
        let b = corners[(e + 1) % corners.len()];
        // Measure from the lower vertex index so both neighbors compute the same length.
        let (lo, hi) = (a.min(b) as usize, a.max(b) as usize);
        let length = (verts[hi] - verts[lo]).magnitude();
        let factor = core::ceil_to_count(length / self.dicing_rate);
        (factor as i32).min(self.max_factor.max(1))
    }
}

impl SubdSplit for EdgeRateSplit {
    fn split(&self, mesh: &Mesh, eval: &dyn PatchEvaluator, patch: usize, out: &mut Vec<SubPatch>) {
        let p = &mesh.patches[patch];
        let mut sub = if p.is_quad() {
            let mut factors = [0; 4];
            for e in 0..4 {
                factors[e] = self.edge_factor(&mesh.verts, p, e);
            }
            SubPatch::quad(patch, factors, unit_quad_uv())
        }
        else {
            let mut factors = [0; 3];
            for e in 0..3 {
                factors[e] = self.edge_factor(&mesh.verts, p, e);
            }
            SubPatch::triangle(patch, factors, unit_triangle_uv())
        };
        sub.bounds = corner_bounds(eval, patch, &sub.uv[..sub.num_edges()]);
        out.push(sub);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::osd::OsdData;
    use crate::geom::prim::NO_VERTEX;

    fn two_quads() -> Mesh {
        // Two unit quads sharing the edge between vertices 1 and 4.
        let mut mesh = Mesh::new("quads");
        mesh.reserve(6, 0, 0, 0, 2);
        let positions = [(0.0, 0.0), (1.0, 0.0), (2.0, 0.0), (0.0, 1.0), (1.0, 1.0), (2.0, 1.0)];
        for (i, &(x, y)) in positions.iter().enumerate() {
            mesh.verts[i] = core::Vec::new(x, y, 0.0);
        }
        mesh.set_patch(0, 0, 1, 4, 3, 0, true).unwrap();
        mesh.set_patch(1, 1, 2, 5, 4, 0, true).unwrap();
        mesh
    }

    #[test]
    fn uniform_split_produces_four_children_per_level() {
        let mesh = two_quads();
        let osd = OsdData::build(&mesh);
        let mut out = vec![];
        UniformSplit {depth: 2, edge_factor: 2}.split(&mesh, &osd, 0, &mut out);
        assert_eq!(out.len(), 16);
        assert!(out.iter().all(|s| s.is_quad() && s.patch == 0));
        assert!(out.iter().all(|s| s.bounds.is_valid()));
    }

    #[test]
    fn uniform_split_of_triangle_stays_triangular() {
        let mut mesh = Mesh::new("tri");
        mesh.reserve(3, 0, 0, 0, 1);
        mesh.verts[1] = core::Vec::new(1.0, 0.0, 0.0);
        mesh.verts[2] = core::Vec::new(0.0, 1.0, 0.0);
        mesh.set_patch(0, 0, 1, 2, NO_VERTEX, 0, false).unwrap();
        let osd = OsdData::build(&mesh);
        let mut out = vec![];
        UniformSplit {depth: 1, edge_factor: 1}.split(&mesh, &osd, 0, &mut out);
        assert_eq!(out.len(), 4);
        assert!(out.iter().all(|s| !s.is_quad()));
    }

    #[test]
    fn edge_rate_factors_agree_on_shared_edge() {
        let mut mesh = two_quads();
        mesh.verts[4].x = 1.3;
        let osd = OsdData::build(&mesh);
        let split = EdgeRateSplit {dicing_rate: 0.1, max_factor: 64};
        let mut out = vec![];
        split.split(&mesh, &osd, 0, &mut out);
        split.split(&mesh, &osd, 1, &mut out);
        // Patch 0 edge 1 (1 -> 4) and patch 1 edge 3 (4 -> 1).
        assert_eq!(out[0].edge_factors[1], out[1].edge_factors[3]);
        assert_eq!(out[0].edge_factors[0], 10);
    }

    #[test]
    fn edge_rate_factors_are_clamped() {
        let mesh = two_quads();
        let osd = OsdData::build(&mesh);
        let mut out = vec![];
        EdgeRateSplit {dicing_rate: 0.001, max_factor: 8}.split(&mesh, &osd, 0, &mut out);
        assert!(out[0].edge_factors.iter().all(|&f| f == 8));
    }
}
