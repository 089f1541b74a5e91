//! Evaluation data for dicing patches, derived from a mesh's patch topology.

use crate::core;
use crate::geom::mesh::{Mesh, SubdivisionType};
use crate::geom::prim::Patch;

use std::collections::HashMap;

/// Evaluates a patch surface at a point of its parameter space.
pub trait PatchEvaluator {
    /// Returns the position and unit normal at `uv` on patch `patch`.
    fn eval(&self, patch: usize, uv: core::Vec2) -> (core::Vec, core::Vec);
}

/// Cached dicing acceleration data for one mesh.
///
/// For linear subdivision the control points are used as-is. For Catmull-Clark each control
/// point is replaced by an approximation of its limit position: interior vertices use the
/// quad limit mask `(n^2 V + 4 sum(E) + sum(F)) / (n (n + 5))`, boundary vertices use the
/// cubic B-spline boundary rule and corner vertices stay fixed. Patches are then evaluated
/// bilinearly (quads) or barycentrically (triangles) over those points.
#[derive(Clone, Debug)]
pub struct OsdData {
    pub topology_version: u64,
    points: Vec<core::Vec>,
    patches: Vec<Patch>,
}

impl OsdData {
    pub fn build(mesh: &Mesh) -> OsdData {
        let points = match mesh.subdivision_type {
            SubdivisionType::CatmullClark => limit_points(&mesh.verts, &mesh.patches),
            _ => mesh.verts.clone()
        };
        OsdData {
            topology_version: mesh.topology_version(),
            points: points,
            patches: mesh.patches.clone()
        }
    }

    pub fn points(&self) -> &[core::Vec] {
        &self.points
    }

    fn corner(&self, patch: &Patch, i: usize) -> core::Vec {
        self.points[patch.v[i] as usize]
    }
}

impl PatchEvaluator for OsdData {
    fn eval(&self, patch: usize, uv: core::Vec2) -> (core::Vec, core::Vec) {
        let p = &self.patches[patch];
        let (u, v) = (uv.x, uv.y);
        let p0 = self.corner(p, 0);
        let p1 = self.corner(p, 1);
        let p2 = self.corner(p, 2);
        if p.is_quad() {
            let p3 = self.corner(p, 3);
            let position = p0.lerp(&p1, u).lerp(&p3.lerp(&p2, u), v);
            let du = (p1 - p0).lerp(&(p2 - p3), v);
            let dv = (p3 - p0).lerp(&(p2 - p1), u);
            let mut normal = du.cross(&dv).normalized();
            if normal.is_exactly_zero() {
                // Degenerate corner; fall back to the diagonal normal.
                normal = (p2 - p0).cross(&(p3 - p1)).normalized();
            }
            (position, normal)
        }
        else {
            let position = p0 * (1.0 - u - v) + p1 * u + p2 * v;
            let normal = (p1 - p0).cross(&(p2 - p0)).normalized();
            (position, normal)
        }
    }
}

fn limit_points(verts: &[core::Vec], patches: &[Patch]) -> Vec<core::Vec> {
    let n = verts.len();
    let mut neighbors: Vec<Vec<usize>> = vec![vec![]; n];
    let mut diagonals: Vec<Vec<core::Vec>> = vec![vec![]; n];
    let mut faces = vec![0usize; n];
    let mut edge_use: HashMap<(usize, usize), usize> = HashMap::new();

    for patch in patches {
        let corners: Vec<usize> = patch.corners().iter().map(|&c| c as usize).collect();
        let k = corners.len();
        for i in 0..k {
            let a = corners[i];
            let b = corners[(i + 1) % k];
            let key = (a.min(b), a.max(b));
            *edge_use.entry(key).or_insert(0) += 1;
            if !neighbors[a].contains(&b) {
                neighbors[a].push(b);
            }
            if !neighbors[b].contains(&a) {
                neighbors[b].push(a);
            }
            faces[a] += 1;

            // Face contribution: the opposite corner of a quad, the face centroid otherwise.
            let opposite = if k == 4 {
                verts[corners[(i + 2) % 4]]
            }
            else {
                corners.iter().fold(core::Vec::zero(), |acc, &c| acc + verts[c]) / k as f32
            };
            diagonals[a].push(opposite);
        }
    }

    let mut boundary_neighbors: Vec<Vec<usize>> = vec![vec![]; n];
    for (&(a, b), &count) in &edge_use {
        if count == 1 {
            boundary_neighbors[a].push(b);
            boundary_neighbors[b].push(a);
        }
    }

    (0..n).map(|i| {
        let v = verts[i];
        if faces[i] == 0 {
            return v;
        }
        let boundary = &boundary_neighbors[i];
        if !boundary.is_empty() {
            if faces[i] > 1 && boundary.len() == 2 {
                return (verts[boundary[0]] + v * 4.0 + verts[boundary[1]]) / 6.0;
            }
            return v;
        }
        let valence = neighbors[i].len() as f32;
        let edge_sum = neighbors[i].iter().fold(core::Vec::zero(), |acc, &e| acc + verts[e]);
        let face_sum = diagonals[i].iter().fold(core::Vec::zero(), |acc, f| acc + *f);
        (v * (valence * valence) + edge_sum * 4.0 + face_sum) / (valence * (valence + 5.0))
    }).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::prim::NO_VERTEX;
    use approx::assert_relative_eq;

    fn grid_mesh(subdivision: SubdivisionType) -> Mesh {
        // 3x3 quads over a 4x4 vertex grid in the XY plane; vertex 5 is interior.
        let mut mesh = Mesh::new("grid");
        mesh.subdivision_type = subdivision;
        mesh.reserve(16, 0, 0, 0, 9);
        for j in 0..4 {
            for i in 0..4 {
                mesh.verts[j * 4 + i] = core::Vec::new(i as f32, j as f32, 0.0);
            }
        }
        mesh.verts[5].z = 1.0;
        for j in 0..3 {
            for i in 0..3 {
                let v0 = (j * 4 + i) as i32;
                mesh.set_patch(j * 3 + i, v0, v0 + 1, v0 + 5, v0 + 4, 0, true).unwrap();
            }
        }
        mesh
    }

    #[test]
    fn linear_points_are_control_points() {
        let mesh = grid_mesh(SubdivisionType::Linear);
        let osd = OsdData::build(&mesh);
        assert_eq!(osd.points(), &mesh.verts[..]);
    }

    #[test]
    fn catmull_clark_pulls_interior_spike_down_and_keeps_corners() {
        let mesh = grid_mesh(SubdivisionType::CatmullClark);
        let osd = OsdData::build(&mesh);
        assert!(osd.points()[5].z < 1.0);
        assert!(osd.points()[5].z > 0.0);
        assert_eq!(osd.points()[0], mesh.verts[0]);
    }

    #[test]
    fn quad_eval_hits_corners() {
        let mesh = grid_mesh(SubdivisionType::Linear);
        let osd = OsdData::build(&mesh);
        let (p, _) = osd.eval(0, core::Vec2::new(1.0, 1.0));
        assert_eq!(p, mesh.verts[5]);
    }

    #[test]
    fn triangle_eval_is_barycentric() {
        let mut mesh = Mesh::new("tri");
        mesh.reserve(3, 0, 0, 0, 1);
        mesh.verts[1] = core::Vec::new(1.0, 0.0, 0.0);
        mesh.verts[2] = core::Vec::new(0.0, 1.0, 0.0);
        mesh.set_patch(0, 0, 1, 2, NO_VERTEX, 0, false).unwrap();
        let osd = OsdData::build(&mesh);
        let (p, n) = osd.eval(0, core::Vec2::new(0.25, 0.5));
        assert_relative_eq!(p.x, 0.25);
        assert_relative_eq!(p.y, 0.5);
        assert_relative_eq!(n.z, 1.0);
    }
}
