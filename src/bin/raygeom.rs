use raygeom::core;
use raygeom::error::{Result, SyncStatus};
use raygeom::geom;
use raygeom::render;
use raygeom::render::Device;

use log::{error, info};
use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;

fn ground(size: f32) -> Result<geom::Mesh> {
    let mut mesh = geom::Mesh::new("ground");
    mesh.add_vertex(core::Vec::new(-size, -size, 0.0));
    mesh.add_vertex(core::Vec::new(size, -size, 0.0));
    mesh.add_vertex(core::Vec::new(size, size, 0.0));
    mesh.add_vertex(core::Vec::new(-size, size, 0.0));
    mesh.add_triangle(0, 1, 2, 0, false)?;
    mesh.add_triangle(0, 2, 3, 0, false)?;
    mesh.used_shaders = vec![0];
    Ok(mesh)
}

fn hair(rng: &mut StdRng, count: usize) -> Result<geom::Mesh> {
    let mut mesh = geom::Mesh::new("hair");
    for _ in 0..count {
        let root = core::Vec::new(rng.gen_range(-4.0..4.0), rng.gen_range(-4.0..4.0), 0.0);
        let first = mesh.curve_keys.len();
        for k in 0..4 {
            let lean = core::Vec::new(rng.gen_range(-0.1..0.1), rng.gen_range(-0.1..0.1), 0.25);
            mesh.add_curve_key(root + lean * k as f32, 0.02 * (1.0 - k as f32 / 4.0));
        }
        mesh.add_curve(first, 4, 0)?;
    }
    mesh.used_shaders = vec![1];
    Ok(mesh)
}

fn cube_cage() -> Result<geom::Mesh> {
    let mut mesh = geom::Mesh::new("cage");
    mesh.subdivision_type = geom::SubdivisionType::CatmullClark;
    mesh.displacement_method = geom::DisplacementMethod::Both;
    for &(x, y, z) in &[(-1.0, -1.0, -1.0), (1.0, -1.0, -1.0), (1.0, 1.0, -1.0), (-1.0, 1.0, -1.0),
        (-1.0, -1.0, 1.0), (1.0, -1.0, 1.0), (1.0, 1.0, 1.0), (-1.0, 1.0, 1.0)]
    {
        mesh.add_vertex(core::Vec::new(x, y, z));
    }
    let faces = [[0, 3, 2, 1], [4, 5, 6, 7], [0, 1, 5, 4], [2, 3, 7, 6], [0, 4, 7, 3], [1, 2, 6, 5]];
    for f in faces.iter() {
        mesh.add_patch(f[0], f[1], f[2], f[3], 0, true)?;
    }
    mesh.used_shaders = vec![2];
    Ok(mesh)
}

fn build_scene() -> Result<render::Scene> {
    let params = render::SceneParams::default().with_bvh_type(render::BvhType::Dynamic);
    let mut scene = render::Scene::new(params);
    scene.image_manager = Some(Box::new(render::ConstantImageManager::new(1.0)));

    scene.add_shader(render::Shader::new("diffuse")
            .with_standard_attribute(geom::AttributeStandard::Generated));
    scene.add_shader(render::Shader::new("hair")
            .with_standard_attribute(geom::AttributeStandard::CurveIntercept));
    scene.add_shader(render::Shader::new("ripple")
            .with_standard_attribute(geom::AttributeStandard::PositionUndisplaced)
            .with_displacement_image(0)
            .with_displacement(Box::new(|p: &render::DisplacePoint| -> Result<core::Vec> {
                Ok(p.n * (0.05 * (p.p.x * 8.0).sin()))
            })));

    let mut rng = StdRng::seed_from_u64(7);
    let ground = scene.add_mesh(ground(10.0)?);
    let hair = scene.add_mesh(hair(&mut rng, 2000)?);
    let cage = scene.add_mesh(cube_cage()?);

    scene.add_object(render::Object::new("ground", ground, core::Xform::identity()))?;
    scene.add_object(render::Object::new("hair", hair, core::Xform::identity()))?;
    for i in 0..3 {
        let offset = core::Vec::new(-4.0 + 4.0 * i as f32, 0.0, 1.5);
        let tfm = core::Xform::new(core::Mat::translation(&offset));
        scene.add_object(render::Object::new(&format!("cube{}", i), cage, tfm))?;
    }
    Ok(scene)
}

fn sync(manager: &mut render::GeometryManager, device: &mut render::MemoryDevice,
    scene: &mut render::Scene, progress: &render::SimpleProgress) -> Result<()>
{
    let start = std::time::Instant::now();
    let status = manager.device_update(device, scene, progress)?;
    let secs = start.elapsed().as_secs_f64();
    info!("sync {:?} [duration: {:.3} sec] builds: {}, refits: {}, device memory: {} bytes",
            status, secs, manager.state.bvh_builds, manager.state.bvh_refits, device.mem_used());
    if status == SyncStatus::Cancelled {
        info!("cancelled at: {}", progress.state().status);
    }
    Ok(())
}

fn run() -> Result<()> {
    let mut scene = build_scene()?;
    let mut manager = render::GeometryManager::new()
            .with_splitter(Box::new(geom::UniformSplit {depth: 1, edge_factor: 8}));
    let mut device = render::MemoryDevice::new();
    let progress = render::SimpleProgress::new();

    sync(&mut manager, &mut device, &mut scene, &progress)?;
    let dscene = manager.device_scene();
    info!("{} vertices, {} triangles, {} curve keys, {} BVH nodes",
            dscene.tri_verts.len(), dscene.tri_vindex.len(), dscene.curve_keys.len(),
            dscene.bvh_nodes.len());

    // Nothing changed: this pass does no work.
    sync(&mut manager, &mut device, &mut scene, &progress)?;

    // Lift the ground: positions only, so BVHs are refit.
    for v in scene.meshes[0].verts.iter_mut() {
        *v = *v + core::Vec::new(0.0, 0.0, -0.5);
    }
    scene.meshes[0].tag_update(false);
    sync(&mut manager, &mut device, &mut scene, &progress)?;

    manager.device_free(&mut device);
    info!("freed device, {} bytes in use", device.mem_used());
    Ok(())
}

pub fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(err) = run() {
        error!("{}", err);
        std::process::exit(1);
    }
}
