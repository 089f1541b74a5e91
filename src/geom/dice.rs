//! Dicing of sub-patches into triangles.
//!
//! Edge `i` of a sub-patch is cut into `edge_factors[i]` segments. Points on an edge depend only
//! on the edge's two end UVs and its factor, and are always generated from the
//! lexicographically smaller end, so two sub-patches of one patch sharing an edge with the same
//! factor produce bit-identical boundary vertices regardless of winding. Coarse patches have
//! their own parameter spaces; `Mesh::tessellate` welds their seams by control vertex index.
//!
//! Quads: with `Mu = max(T0, T2)` and `Mv = max(T1, T3)`, an interior grid of
//! `(Mu - 1) x (Mv - 1)` points is stitched to each edge. When either is below two, a single
//! center vertex is fanned to the boundary instead.
//!
//! Triangles: with `M = max(T0, T1, T2)`, the interior is a uniform triangle grid of factor
//! `M - 3` inset by one step, stitched to each edge; below three, a center fan.

use crate::core;
use crate::error::{Error, Result};
use crate::geom::osd::PatchEvaluator;
use crate::geom::prim::SubPatch;
use crate::geom::util::VectorAdaptor;

use std::cmp::Ordering;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DicedVertex {
    pub p: core::Vec,
    pub n: core::Vec,
    /// Parameter-space coordinate in the parent patch.
    pub uv: core::Vec2,
}

/// Caller-owned storage for one diced sub-patch, sized up front from `diced_size`.
#[derive(Clone, Debug, Default)]
pub struct TessellatedSubPatch {
    pub patch: usize,
    verts: Vec<DicedVertex>,
    triangles: Vec<[u32; 3]>,
    num_verts: usize,
    num_triangles: usize,
}

impl TessellatedSubPatch {
    pub fn alloc(num_verts: usize, num_triangles: usize) -> TessellatedSubPatch {
        TessellatedSubPatch {
            patch: 0,
            verts: vec![DicedVertex::default(); num_verts],
            triangles: vec![[0; 3]; num_triangles],
            num_verts: 0,
            num_triangles: 0
        }
    }

    pub fn verts(&self) -> &[DicedVertex] {
        &self.verts[..self.num_verts]
    }

    pub fn triangles(&self) -> &[[u32; 3]] {
        &self.triangles[..self.num_triangles]
    }
}

/// Number of vertices and triangles `dice` will produce for the sub-patch.
pub fn diced_size(sub: &SubPatch) -> (usize, usize) {
    let factors: Vec<usize> = (0..sub.num_edges()).map(|i| sub.edge_factor(i) as usize).collect();
    let boundary: usize = factors.iter().sum();
    if sub.is_quad() {
        let mu = factors[0].max(factors[2]);
        let mv = factors[1].max(factors[3]);
        if mu < 2 || mv < 2 {
            return (boundary + 1, boundary);
        }
        let verts = boundary + (mu - 1) * (mv - 1);
        let tris = 2 * (mu - 2) * (mv - 2) + boundary + 2 * (mu - 2) + 2 * (mv - 2);
        (verts, tris)
    }
    else {
        let m = factors[0].max(factors[1]).max(factors[2]);
        if m < 3 {
            return (boundary + 1, boundary);
        }
        let n = m - 3;
        let verts = boundary + (m - 1) * (m - 2) / 2;
        let tris = n * n + boundary + 3 * n;
        (verts, tris)
    }
}

struct Dicer<'a, 'b> {
    sub: &'a SubPatch,
    eval: &'a dyn PatchEvaluator,
    verts: VectorAdaptor<'b, DicedVertex>,
    tris: VectorAdaptor<'b, [u32; 3]>,
}

impl<'a, 'b> Dicer<'a, 'b> {
    /// Maps a local sub-patch coordinate to the parent patch's parameter space.
    fn map_uv(&self, s: f32, t: f32) -> core::Vec2 {
        let uv = &self.sub.uv;
        if self.sub.is_quad() {
            uv[0].lerp(&uv[1], s).lerp(&uv[3].lerp(&uv[2], s), t)
        }
        else {
            uv[0] + (uv[1] - uv[0]) * s + (uv[2] - uv[0]) * t
        }
    }

    fn add_vert(&mut self, uv: core::Vec2) -> Result<u32> {
        let (p, n) = self.eval.eval(self.sub.patch, uv);
        let index = self.verts.push(DicedVertex {p: p, n: n, uv: uv})?;
        Ok(index as u32)
    }

    fn add_tri(&mut self, a: u32, b: u32, c: u32) -> Result<()> {
        self.tris.push([a, b, c])?;
        Ok(())
    }

    /// Emits corner `e` and the interior points of edge `e`; returns the edge's indices
    /// without its end corner.
    fn add_edge(&mut self, e: usize) -> Result<Vec<u32>> {
        let num_edges = self.sub.num_edges();
        let a = self.sub.uv[e];
        let b = self.sub.uv[(e + 1) % num_edges];
        let segments = self.sub.edge_factor(e);
        let forward = compare_uv(&a, &b) != Ordering::Greater;

        let mut indices = Vec::with_capacity(segments as usize);
        indices.push(self.add_vert(a)?);
        for k in 1..segments {
            let uv = if forward {
                a.lerp(&b, k as f32 / segments as f32)
            }
            else {
                b.lerp(&a, (segments - k) as f32 / segments as f32)
            };
            indices.push(self.add_vert(uv)?);
        }
        Ok(indices)
    }

    /// Closed boundary loops per edge, each including both end corners.
    fn add_boundary(&mut self) -> Result<Vec<Vec<u32>>> {
        let num_edges = self.sub.num_edges();
        let mut edges = vec![];
        for e in 0..num_edges {
            edges.push(self.add_edge(e)?);
        }
        for e in 0..num_edges {
            let next_corner = edges[(e + 1) % num_edges][0];
            edges[e].push(next_corner);
        }
        Ok(edges)
    }

    fn fan(&mut self, edges: &[Vec<u32>], center: u32) -> Result<()> {
        for edge in edges {
            for k in 0..(edge.len() - 1) {
                self.add_tri(edge[k], edge[k + 1], center)?;
            }
        }
        Ok(())
    }

    /// Zips an outer polyline to an inner one running in the same direction, producing
    /// `outer.len() + inner.len() - 2` triangles.
    fn stitch(&mut self, outer: &[u32], inner: &[u32]) -> Result<()> {
        let a = outer.len() - 1;
        let b = inner.len() - 1;
        let (mut i, mut j) = (0, 0);
        while i < a || j < b {
            let advance_outer = if j == b {
                true
            }
            else if i == a {
                false
            }
            else {
                (i + 1) * b <= (j + 1) * a
            };

            if advance_outer {
                self.add_tri(outer[i], outer[i + 1], inner[j])?;
                i += 1;
            }
            else {
                self.add_tri(outer[i], inner[j + 1], inner[j])?;
                j += 1;
            }
        }
        Ok(())
    }

    fn dice_quad(&mut self) -> Result<()> {
        let edges = self.add_boundary()?;
        let mu = self.sub.edge_factor(0).max(self.sub.edge_factor(2)) as usize;
        let mv = self.sub.edge_factor(1).max(self.sub.edge_factor(3)) as usize;

        if mu < 2 || mv < 2 {
            let center = self.map_uv(0.5, 0.5);
            let center = self.add_vert(center)?;
            return self.fan(&edges, center);
        }

        // Interior grid, grid[i - 1][j - 1] at local (i / mu, j / mv).
        let mut grid = vec![vec![0u32; mv - 1]; mu - 1];
        for i in 1..mu {
            for j in 1..mv {
                let uv = self.map_uv(i as f32 / mu as f32, j as f32 / mv as f32);
                grid[i - 1][j - 1] = self.add_vert(uv)?;
            }
        }
        for i in 0..(mu - 2) {
            for j in 0..(mv - 2) {
                let (a, b) = (grid[i][j], grid[i + 1][j]);
                let (c, d) = (grid[i + 1][j + 1], grid[i][j + 1]);
                self.add_tri(a, b, c)?;
                self.add_tri(a, c, d)?;
            }
        }

        let bottom: Vec<u32> = (0..(mu - 1)).map(|i| grid[i][0]).collect();
        let right: Vec<u32> = (0..(mv - 1)).map(|j| grid[mu - 2][j]).collect();
        let top: Vec<u32> = (0..(mu - 1)).rev().map(|i| grid[i][mv - 2]).collect();
        let left: Vec<u32> = (0..(mv - 1)).rev().map(|j| grid[0][j]).collect();
        let sides = [bottom, right, top, left];
        for e in 0..4 {
            self.stitch(&edges[e], &sides[e])?;
        }
        Ok(())
    }

    fn dice_triangle(&mut self) -> Result<()> {
        let edges = self.add_boundary()?;
        let m = (0..3).map(|e| self.sub.edge_factor(e)).max().unwrap_or(1) as usize;

        if m < 3 {
            let center = self.map_uv(1.0 / 3.0, 1.0 / 3.0);
            let center = self.add_vert(center)?;
            return self.fan(&edges, center);
        }

        // Inner grid point (a, b) has barycentric weights ((m - 2 - a - b), 1 + a, 1 + b) / m.
        let n = m - 3;
        let mut inner = vec![vec![0u32; n + 1]; n + 1];
        for a in 0..(n + 1) {
            for b in 0..(n + 1 - a) {
                let uv = self.map_uv((1 + a) as f32 / m as f32, (1 + b) as f32 / m as f32);
                inner[a][b] = self.add_vert(uv)?;
            }
        }
        for a in 0..n {
            for b in 0..(n - a) {
                self.add_tri(inner[a][b], inner[a + 1][b], inner[a][b + 1])?;
                if a + b + 1 < n {
                    self.add_tri(inner[a + 1][b], inner[a + 1][b + 1], inner[a][b + 1])?;
                }
            }
        }

        let side0: Vec<u32> = (0..(n + 1)).map(|a| inner[a][0]).collect();
        let side1: Vec<u32> = (0..(n + 1)).rev().map(|a| inner[a][n - a]).collect();
        let side2: Vec<u32> = (0..(n + 1)).rev().map(|b| inner[0][b]).collect();
        let sides = [side0, side1, side2];
        for e in 0..3 {
            self.stitch(&edges[e], &sides[e])?;
        }
        Ok(())
    }
}

fn compare_uv(a: &core::Vec2, b: &core::Vec2) -> Ordering {
    match a.x.partial_cmp(&b.x) {
        Some(Ordering::Equal) | None => a.y.partial_cmp(&b.y).unwrap_or(Ordering::Equal),
        Some(ordering) => ordering
    }
}

/// Dices the sub-patch into `out`, which must have been allocated with at least
/// `diced_size(sub)` room.
pub fn dice(sub: &SubPatch, eval: &dyn PatchEvaluator, out: &mut TessellatedSubPatch)
    -> Result<()>
{
    let (num_verts, num_triangles) = {
        let mut dicer = Dicer {
            sub: sub,
            eval: eval,
            verts: VectorAdaptor::new("diced vertices", &mut out.verts),
            tris: VectorAdaptor::new("diced triangles", &mut out.triangles),
        };
        if sub.is_quad() {
            dicer.dice_quad()?;
        }
        else {
            dicer.dice_triangle()?;
        }
        (dicer.verts.len(), dicer.tris.len())
    };

    let (expected_verts, expected_tris) = diced_size(sub);
    if num_verts != expected_verts || num_triangles != expected_tris {
        return Err(Error::MalformedPatch(sub.patch, format!(
            "diced {} verts / {} tris, expected {} / {}",
            num_verts, num_triangles, expected_verts, expected_tris)));
    }
    out.patch = sub.patch;
    out.num_verts = num_verts;
    out.num_triangles = num_triangles;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    /// Maps the unit square / triangle straight to the XY plane.
    struct PlaneEval;

    impl PatchEvaluator for PlaneEval {
        fn eval(&self, _: usize, uv: core::Vec2) -> (core::Vec, core::Vec) {
            (core::Vec::new(uv.x, uv.y, 0.0), core::Vec::new(0.0, 0.0, 1.0))
        }
    }

    fn unit_quad(factors: [i32; 4]) -> SubPatch {
        SubPatch::quad(0, factors, [
            core::Vec2::new(0.0, 0.0), core::Vec2::new(1.0, 0.0),
            core::Vec2::new(1.0, 1.0), core::Vec2::new(0.0, 1.0)])
    }

    fn dice_checked(sub: &SubPatch) -> TessellatedSubPatch {
        let (nv, nt) = diced_size(sub);
        let mut out = TessellatedSubPatch::alloc(nv, nt);
        dice(sub, &PlaneEval, &mut out).unwrap();
        assert_eq!(out.verts().len(), nv);
        assert_eq!(out.triangles().len(), nt);
        out
    }

    fn signed_area(out: &TessellatedSubPatch, tri: &[u32; 3]) -> f32 {
        let p = |i: u32| out.verts()[i as usize].p;
        (p(tri[1]) - p(tri[0])).cross(&(p(tri[2]) - p(tri[0]))).z * 0.5
    }

    #[test]
    fn predicted_size_matches_output_for_quads() {
        for factors in [[1, 1, 1, 1], [2, 1, 2, 1], [4, 4, 4, 4], [3, 5, 2, 7], [1, 6, 1, 1]].iter() {
            dice_checked(&unit_quad(*factors));
        }
    }

    #[test]
    fn predicted_size_matches_output_for_triangles() {
        let uv = [core::Vec2::new(0.0, 0.0), core::Vec2::new(1.0, 0.0), core::Vec2::new(0.0, 1.0)];
        for factors in [[1, 1, 1], [2, 2, 2], [3, 3, 3], [5, 2, 4], [8, 8, 8]].iter() {
            dice_checked(&SubPatch::triangle(0, *factors, uv));
        }
    }

    #[test]
    fn diced_triangles_cover_the_patch_with_consistent_winding() {
        for factors in [[1, 1, 1, 1], [2, 1, 2, 1], [4, 4, 4, 4], [3, 5, 2, 7]].iter() {
            let out = dice_checked(&unit_quad(*factors));
            let mut area = 0.0;
            for tri in out.triangles() {
                let a = signed_area(&out, tri);
                assert!(a > 0.0, "triangle {:?} is inverted for factors {:?}", tri, factors);
                area += a;
            }
            approx::assert_relative_eq!(area, 1.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn diced_triangle_patches_keep_winding_and_area() {
        let uv = [core::Vec2::new(0.0, 0.0), core::Vec2::new(1.0, 0.0), core::Vec2::new(0.0, 1.0)];
        for factors in [[1, 1, 1], [2, 2, 2], [5, 2, 4], [1, 7, 1], [6, 6, 6]].iter() {
            let out = dice_checked(&SubPatch::triangle(0, *factors, uv));
            let mut area = 0.0;
            for tri in out.triangles() {
                let a = signed_area(&out, tri);
                assert!(a > 0.0, "triangle {:?} is inverted for factors {:?}", tri, factors);
                area += a;
            }
            approx::assert_relative_eq!(area, 0.5, epsilon = 1e-5);
        }
    }

    #[test]
    fn uniform_quad_dices_to_grid() {
        let out = dice_checked(&unit_quad([4, 4, 4, 4]));
        assert_eq!(out.verts().len(), 25);
        assert_eq!(out.triangles().len(), 32);
    }

    #[test]
    fn shared_edge_vertices_match_between_neighbors() {
        // Left and right halves of the unit square share the edge x = 0.5.
        let left = SubPatch::quad(0, [2, 3, 2, 1], [
            core::Vec2::new(0.0, 0.0), core::Vec2::new(0.5, 0.0),
            core::Vec2::new(0.5, 1.0), core::Vec2::new(0.0, 1.0)]);
        let right = SubPatch::quad(0, [2, 1, 2, 3], [
            core::Vec2::new(0.5, 0.0), core::Vec2::new(1.0, 0.0),
            core::Vec2::new(1.0, 1.0), core::Vec2::new(0.5, 1.0)]);

        let on_edge = |out: &TessellatedSubPatch| -> HashSet<(u32, u32)> {
            out.verts().iter().filter(|v| v.uv.x == 0.5).map(|v| v.uv.bits()).collect()
        };
        let a = on_edge(&dice_checked(&left));
        let b = on_edge(&dice_checked(&right));
        assert_eq!(a.len(), 4);
        assert_eq!(a, b);
    }

    #[test]
    fn undersized_buffer_is_rejected() {
        let sub = unit_quad([4, 4, 4, 4]);
        let mut out = TessellatedSubPatch::alloc(10, 10);
        assert!(dice(&sub, &PlaneEval, &mut out).is_err());
    }
}
