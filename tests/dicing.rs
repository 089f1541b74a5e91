use raygeom::core;
use raygeom::geom::{self, PatchEvaluator};
use raygeom::render;

use std::collections::{HashMap, HashSet};

/// The unit square in the xy plane.
struct Plane;

impl PatchEvaluator for Plane {
    fn eval(&self, _patch: usize, uv: core::Vec2) -> (core::Vec, core::Vec) {
        (core::Vec::new(uv.x, uv.y, 0.0), core::Vec::new(0.0, 0.0, 1.0))
    }
}

fn uv(x: f32, y: f32) -> core::Vec2 {
    core::Vec2::new(x, y)
}

fn dice(sub: &geom::SubPatch) -> geom::TessellatedSubPatch {
    let (num_verts, num_triangles) = geom::dice::diced_size(sub);
    let mut out = geom::TessellatedSubPatch::alloc(num_verts, num_triangles);
    geom::dice::dice(sub, &Plane, &mut out).unwrap();
    assert_eq!(out.verts().len(), num_verts);
    assert_eq!(out.triangles().len(), num_triangles);
    out
}

fn seam_bits(out: &geom::TessellatedSubPatch) -> HashSet<(u32, u32)> {
    out.verts().iter().filter(|v| v.uv.x == 0.5).map(|v| v.uv.bits()).collect()
}

#[test]
fn adjacent_sub_patches_share_seam_vertices() {
    for factors in [[1, 1, 1, 1], [2, 1, 2, 1], [4, 4, 4, 4]].iter() {
        let left = geom::SubPatch::quad(0, *factors, [uv(0.0, 0.0), uv(0.5, 0.0), uv(0.5, 1.0), uv(0.0, 1.0)]);
        let right = geom::SubPatch::quad(0, *factors, [uv(0.5, 0.0), uv(1.0, 0.0), uv(1.0, 1.0), uv(0.5, 1.0)]);
        let a = seam_bits(&dice(&left));
        let b = seam_bits(&dice(&right));
        assert_eq!(a, b, "seam differs for factors {:?}", factors);
        assert_eq!(a.len(), factors[1] as usize + 1);
    }
}

#[test]
fn split_quad_patch_tessellates_watertight() {
    let mut scene = render::Scene::new(render::SceneParams::default());
    scene.add_shader(render::Shader::new("diffuse"));
    let mut mesh = geom::Mesh::new("quad");
    mesh.subdivision_type = geom::SubdivisionType::Linear;
    mesh.add_vertex(core::Vec::new(0.0, 0.0, 0.0));
    mesh.add_vertex(core::Vec::new(1.0, 0.0, 0.0));
    mesh.add_vertex(core::Vec::new(1.0, 1.0, 0.0));
    mesh.add_vertex(core::Vec::new(0.0, 1.0, 0.0));
    mesh.add_patch(0, 1, 2, 3, 0, true).unwrap();
    mesh.used_shaders = vec![0];
    let id = scene.add_mesh(mesh);
    scene.add_object(render::Object::new("quad", id, core::Xform::identity())).unwrap();

    let mut manager = render::GeometryManager::new()
            .with_splitter(Box::new(geom::UniformSplit {depth: 1, edge_factor: 2}));
    manager.device_update(&mut render::MemoryDevice::new(), &mut scene, &render::SimpleProgress::new())
            .unwrap();
    let mesh = &scene.meshes[id];
    assert_eq!(mesh.subpatches.len(), 4);

    // Control vertices come first; the diced grid is 5 x 5 with no duplicates.
    let diced = &mesh.verts[4..];
    assert_eq!(diced.len(), 25);
    let distinct: HashSet<(u32, u32)> = diced.iter().map(|p| (p.x.to_bits(), p.y.to_bits())).collect();
    assert_eq!(distinct.len(), 25);

    let mut edges: HashMap<(usize, usize), usize> = HashMap::new();
    for tri in &mesh.triangles {
        for k in 0..3 {
            let (a, b) = (tri.v[k], tri.v[(k + 1) % 3]);
            *edges.entry((a.min(b), a.max(b))).or_insert(0) += 1;
        }
    }
    for (&(a, b), &count) in &edges {
        assert!(count <= 2);
        if count == 1 {
            let (pa, pb) = (mesh.verts[a], mesh.verts[b]);
            let on_border = |x: f32| x == 0.0 || x == 1.0;
            assert!((pa.x == pb.x && on_border(pa.x)) || (pa.y == pb.y && on_border(pa.y)),
                    "open edge inside the patch: {} {}", pa, pb);
        }
    }
    let border_edges = edges.values().filter(|&&c| c == 1).count();
    assert_eq!(border_edges, 16);
}
