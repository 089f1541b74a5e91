use raygeom::core;
use raygeom::error::{Error, SyncStatus};
use raygeom::geom;
use raygeom::render::{self, Device};

use approx::assert_relative_eq;
use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;

fn single_triangle() -> geom::Mesh {
    let mut mesh = geom::Mesh::new("triangle");
    mesh.add_vertex(core::Vec::new(0.0, 0.0, 0.0));
    mesh.add_vertex(core::Vec::new(1.0, 0.0, 0.0));
    mesh.add_vertex(core::Vec::new(0.0, 1.0, 0.0));
    mesh.add_triangle(0, 1, 2, 0, false).unwrap();
    mesh.used_shaders = vec![0];
    mesh
}

fn triangle_scene(params: render::SceneParams) -> render::Scene {
    let mut scene = render::Scene::new(params);
    scene.add_shader(render::Shader::new("diffuse"));
    let mesh = scene.add_mesh(single_triangle());
    scene.add_object(render::Object::new("triangle", mesh, core::Xform::identity())).unwrap();
    scene
}

fn snapshot(device: &render::MemoryDevice) -> Vec<(String, Vec<u8>)> {
    device.buffer_names().into_iter()
            .map(|name| (name.to_string(), device.mem_read(name).unwrap_or(&[]).to_vec()))
            .collect()
}

#[test]
fn clean_scene_sync_is_a_no_op() {
    let mut scene = triangle_scene(render::SceneParams::default());
    let mut manager = render::GeometryManager::new();
    let mut device = render::MemoryDevice::new();
    let progress = render::SimpleProgress::new();

    assert_eq!(manager.device_update(&mut device, &mut scene, &progress), Ok(SyncStatus::Complete));
    let before = snapshot(&device);
    let state = manager.state.clone();
    assert!(!before.is_empty());

    assert_eq!(manager.device_update(&mut device, &mut scene, &progress), Ok(SyncStatus::Complete));
    assert_eq!(snapshot(&device), before);
    assert_eq!(manager.state, state);
}

#[test]
fn tagging_a_rebuild_builds_exactly_once() {
    let mut scene = triangle_scene(render::SceneParams::default());
    let mut manager = render::GeometryManager::new();
    let mut device = render::MemoryDevice::new();
    let progress = render::SimpleProgress::new();
    manager.device_update(&mut device, &mut scene, &progress).unwrap();

    let builds = manager.state.bvh_builds;
    scene.meshes[0].tag_update(true);
    assert_eq!(scene.meshes[0].update_state(), geom::UpdateState::DirtyRebuild);
    manager.device_update(&mut device, &mut scene, &progress).unwrap();
    assert_eq!(manager.state.bvh_builds, builds + 1);
    assert_eq!(scene.meshes[0].update_state(), geom::UpdateState::Clean);
}

#[test]
fn moved_vertices_refit_dynamic_bvh() {
    let params = render::SceneParams::default().with_bvh_type(render::BvhType::Dynamic);
    let mut scene = triangle_scene(params);
    let mut manager = render::GeometryManager::new();
    let mut device = render::MemoryDevice::new();
    let progress = render::SimpleProgress::new();
    manager.device_update(&mut device, &mut scene, &progress).unwrap();

    let builds = manager.state.bvh_builds;
    scene.meshes[0].verts[2] = core::Vec::new(0.0, 3.0, 0.0);
    scene.meshes[0].tag_update(false);
    manager.device_update(&mut device, &mut scene, &progress).unwrap();

    assert_eq!(manager.state.bvh_builds, builds);
    assert_eq!(manager.state.bvh_refits, 1);
    let bounds = manager.bvh().map(|bvh| bvh.bounds()).unwrap();
    assert_relative_eq!(bounds.max.y, 3.0);
}

#[test]
fn allocation_failure_keeps_last_good_device_state() {
    let mut scene = triangle_scene(render::SceneParams::default());
    let mut manager = render::GeometryManager::new();
    let mut device = render::MemoryDevice::new();
    let progress = render::SimpleProgress::new();
    manager.device_update(&mut device, &mut scene, &progress).unwrap();
    let before = snapshot(&device);
    let packed = manager.device_scene().clone();

    let mut rng = StdRng::seed_from_u64(3);
    let mut big = geom::Mesh::new("big");
    for _ in 0..3000 {
        let base = big.verts.len();
        for _ in 0..3 {
            big.add_vertex(core::Vec::new(rng.gen(), rng.gen(), rng.gen()));
        }
        big.add_triangle(base, base + 1, base + 2, 0, false).unwrap();
    }
    big.used_shaders = vec![0];
    let id = scene.add_mesh(big);
    scene.add_object(render::Object::new("big", id, core::Xform::identity())).unwrap();

    device.set_limit(Some(device.mem_used() + 1024));
    match manager.device_update(&mut device, &mut scene, &progress) {
        Err(Error::OutOfDeviceMemory {..}) => {},
        other => panic!("expected allocation failure, got {:?}", other)
    }
    assert_eq!(snapshot(&device), before);
    assert_eq!(manager.device_scene(), &packed);
    assert!(scene.meshes[id].need_update);

    device.set_limit(None);
    assert_eq!(manager.device_update(&mut device, &mut scene, &progress), Ok(SyncStatus::Complete));
    assert_eq!(manager.device_scene().tri_vindex.len(), 3001);
}

#[test]
fn shared_meshes_build_their_own_bvh() {
    let mut scene = triangle_scene(render::SceneParams::default());
    assert!(!scene.meshes[0].need_build_bvh());
    scene.add_object(render::Object::new("copy", 0, core::Xform::identity())).unwrap();
    assert!(scene.meshes[0].need_build_bvh());
    assert!(scene.meshes[0].is_instanced());

    let mut lone = geom::Mesh::new("lone");
    lone.has_surface_bssrdf = true;
    assert!(lone.need_build_bvh());
}

#[test]
fn packing_twice_is_bit_identical() {
    let mut rng = StdRng::seed_from_u64(11);
    let mut mesh = geom::Mesh::new("random");
    for _ in 0..30 {
        mesh.add_vertex(core::Vec::new(rng.gen(), rng.gen(), rng.gen()));
    }
    for _ in 0..20 {
        let (a, b, c) = (rng.gen_range(0..30), rng.gen_range(0..30), rng.gen_range(0..30));
        mesh.add_triangle(a, b, c, 0, rng.gen()).unwrap();
    }
    for _ in 0..5 {
        let first = mesh.curve_keys.len();
        for _ in 0..3 {
            mesh.add_curve_key(core::Vec::new(rng.gen(), rng.gen(), rng.gen()), rng.gen_range(0.01..0.1));
        }
        mesh.add_curve(first, 3, 0).unwrap();
    }
    mesh.add_vertex_normals();

    let pack = |mesh: &geom::Mesh| {
        let mut verts = vec![[0.0f32; 4]; mesh.verts.len()];
        let mut vindex = vec![[0u32; 4]; mesh.triangles.len()];
        let mut shaders = vec![0u32; mesh.triangles.len()];
        let mut normals = vec![[0.0f32; 4]; mesh.verts.len()];
        let mut keys = vec![[0.0f32; 4]; mesh.curve_keys.len()];
        let mut curves = vec![[0u32; 4]; mesh.curves.len()];
        mesh.pack_verts(&mut verts, &mut vindex, 100, 0).unwrap();
        mesh.pack_normals(&mut shaders, &mut normals).unwrap();
        mesh.pack_curves(&mut keys, &mut curves, 7).unwrap();
        let floats: Vec<u32> = verts.iter().chain(normals.iter()).chain(keys.iter())
                .flat_map(|v| v.iter().map(|x| x.to_bits()))
                .collect();
        (floats, vindex, shaders, curves)
    };
    assert_eq!(pack(&mesh), pack(&mesh));
}

#[test]
fn bounds_agree_with_primitive_bounds() {
    let mut rng = StdRng::seed_from_u64(5);
    let mut mesh = geom::Mesh::new("mixed");
    for _ in 0..10 {
        let base = mesh.verts.len();
        for _ in 0..3 {
            let p = core::Vec::new(rng.gen_range(-5.0..5.0), rng.gen_range(-5.0..5.0), rng.gen_range(-5.0..5.0));
            mesh.add_vertex(p);
        }
        mesh.add_triangle(base, base + 1, base + 2, 0, false).unwrap();
    }
    for _ in 0..4 {
        let first = mesh.curve_keys.len();
        for _ in 0..4 {
            let p = core::Vec::new(rng.gen_range(-8.0..8.0), rng.gen_range(-8.0..8.0), rng.gen_range(-8.0..8.0));
            mesh.add_curve_key(p, rng.gen_range(0.05..0.5));
        }
        mesh.add_curve(first, 4, 0).unwrap();
    }
    mesh.compute_bounds();

    let mut union = core::BBox::empty();
    for prim in mesh.primitives() {
        union = union.combine_with(&mesh.prim_bounds(&prim));
    }
    for axis in 0..3 {
        assert_relative_eq!(union.min[axis], mesh.bounds.min[axis]);
        assert_relative_eq!(union.max[axis], mesh.bounds.max[axis]);
    }
}

#[test]
fn split_vertex_appends_a_copy() {
    let mut mesh = single_triangle();
    let j = mesh.split_vertex(1).unwrap();
    assert_eq!(j, mesh.verts.len() - 1);
    assert_eq!(mesh.verts[j], mesh.verts[1]);
    assert_eq!(mesh.triangles[0], geom::Triangle::new(0, 1, 2));
    assert!(mesh.split_vertex(10).is_err());
}

#[test]
fn instanced_subdivision_mesh_packs_instance_leaves() {
    let mut scene = render::Scene::new(render::SceneParams::default());
    scene.add_shader(render::Shader::new("diffuse"));
    let mut mesh = geom::Mesh::new("patch");
    mesh.subdivision_type = geom::SubdivisionType::Linear;
    mesh.add_vertex(core::Vec::new(0.0, 0.0, 0.0));
    mesh.add_vertex(core::Vec::new(1.0, 0.0, 0.0));
    mesh.add_vertex(core::Vec::new(1.0, 1.0, 0.0));
    mesh.add_vertex(core::Vec::new(0.0, 1.0, 0.0));
    mesh.add_patch(0, 1, 2, 3, 0, true).unwrap();
    mesh.used_shaders = vec![0];
    let id = scene.add_mesh(mesh);
    for i in 0..2 {
        let tfm = core::Xform::new(core::Mat::translation(&core::Vec::new(i as f32 * 3.0, 0.0, 0.0)));
        scene.add_object(render::Object::new(&format!("copy{}", i), id, tfm)).unwrap();
    }

    let mut manager = render::GeometryManager::new()
            .with_splitter(Box::new(geom::UniformSplit {depth: 1, edge_factor: 2}));
    let mut device = render::MemoryDevice::new();
    manager.device_update(&mut device, &mut scene, &render::SimpleProgress::new()).unwrap();

    let dscene = manager.device_scene();
    assert_eq!(dscene.tri_vindex.len(), 32);
    assert_eq!(dscene.patches.len(), 1);
    let instances = dscene.prim_type.iter().filter(|&&t| t == render::packer::PRIMITIVE_INSTANCE).count();
    assert_eq!(instances, 2);
    let root = dscene.objects[0].bvh_root;
    assert_eq!(root, dscene.objects[1].bvh_root);
    assert!((root as usize) < dscene.bvh_nodes.len());
    // Dicing caches are dropped after the pass without persistent data.
    assert!(!manager.cache().has_osd_data(id));
}

#[test]
fn persistent_data_keeps_dicing_caches() {
    let params = render::SceneParams::default()
            .with_persistent_data(true)
            .with_parallel_build_threshold(1);
    let mut scene = render::Scene::new(params);
    scene.add_shader(render::Shader::new("diffuse"));
    let mut mesh = geom::Mesh::new("patch");
    mesh.subdivision_type = geom::SubdivisionType::Linear;
    mesh.add_vertex(core::Vec::new(0.0, 0.0, 0.0));
    mesh.add_vertex(core::Vec::new(1.0, 0.0, 0.0));
    mesh.add_vertex(core::Vec::new(1.0, 1.0, 0.0));
    mesh.add_vertex(core::Vec::new(0.0, 1.0, 0.0));
    mesh.add_patch(0, 1, 2, 3, 0, true).unwrap();
    mesh.used_shaders = vec![0];
    let id = scene.add_mesh(mesh);
    scene.add_object(render::Object::new("patch", id, core::Xform::identity())).unwrap();

    let mut manager = render::GeometryManager::new()
            .with_splitter(Box::new(geom::UniformSplit {depth: 1, edge_factor: 2}));
    let mut device = render::MemoryDevice::new();
    manager.device_update(&mut device, &mut scene, &render::SimpleProgress::new()).unwrap();
    assert!(manager.cache().has_osd_data(id));

    scene.mesh_mut(id).unwrap().tag_update(true);
    manager.device_update(&mut device, &mut scene, &render::SimpleProgress::new()).unwrap();
    assert!(manager.cache().has_osd_data(id));
    assert_eq!(manager.device_scene().tri_vindex.len(), 32);
}
