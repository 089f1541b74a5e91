use crate::core;
use crate::error::{Result, SyncStatus};
use crate::geom::{AttributeRequestSet, AttributeStandard, Bvh, BvhItem, BvhReference, BvhUpdate,
        EdgeRateSplit, GeometryCache, Mesh, MeshId, SubdSplit};
use crate::render::packer::{self, DeviceScene, PackedObject, UploadTransaction, ATTRIBUTE_MAP_END};
use crate::render::{DisplacePoint, DisplacementShader, Device, Object, Progress, Scene, Shader,
        ShadingSystem};

use log::{debug, info, warn};
use rayon::prelude::*;
use std::collections::BTreeSet;

/// Dirty flags and counters of the geometry synchronization.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncState {
    pub need_update: bool,
    pub need_flags_update: bool,
    /// Dicing data was built this pass and is dropped at the end unless data persists.
    pub need_clear_geometry_cache: bool,
    /// BVHs built from scratch, scene and per-mesh.
    pub bvh_builds: usize,
    pub bvh_refits: usize,
    /// Completed synchronization passes.
    pub passes: usize,
}

impl Default for SyncState {
    fn default() -> SyncState {
        SyncState {
            need_update: true,
            need_flags_update: true,
            need_clear_geometry_cache: false,
            bvh_builds: 0,
            bvh_refits: 0,
            passes: 0,
        }
    }
}

/// Brings the device's copy of the scene geometry up to date with the host meshes.
///
/// A pass runs attribute resolution, displacement, mesh packing and BVH construction in
/// that order. Buffers replaced during a pass are restored if the pass fails or is
/// cancelled, so the device always holds the last complete pass.
pub struct GeometryManager {
    pub state: SyncState,
    splitter: Box<dyn SubdSplit>,
    cache: GeometryCache,
    bvh: Option<Bvh>,
    /// Scene BVH items in build order, to tell whether a refit is enough.
    scene_items: Vec<BvhItem>,
    dscene: DeviceScene,
}

impl Default for GeometryManager {
    fn default() -> GeometryManager {
        GeometryManager::new()
    }
}

impl GeometryManager {
    pub fn new() -> GeometryManager {
        GeometryManager {
            state: SyncState::default(),
            splitter: Box::new(EdgeRateSplit {dicing_rate: 0.1, max_factor: 32}),
            cache: GeometryCache::new(),
            bvh: None,
            scene_items: vec![],
            dscene: DeviceScene::default(),
        }
    }

    /// Uses `splitter` to split patches before dicing.
    pub fn with_splitter(mut self, splitter: Box<dyn SubdSplit>) -> GeometryManager {
        self.splitter = splitter;
        self
    }

    /// Host copy of what the last complete pass uploaded.
    pub fn device_scene(&self) -> &DeviceScene {
        &self.dscene
    }

    pub fn bvh(&self) -> Option<&Bvh> {
        self.bvh.as_ref()
    }

    pub fn cache(&self) -> &GeometryCache {
        &self.cache
    }

    /// Requests a synchronization pass even if no mesh is dirty.
    pub fn tag_update(&mut self) {
        self.state.need_update = true;
    }

    /// Requests shader-derived mesh flags be recomputed.
    pub fn tag_flags_update(&mut self) {
        self.state.need_update = true;
        self.state.need_flags_update = true;
    }

    pub fn device_update(&mut self, device: &mut dyn Device, scene: &mut Scene,
        progress: &dyn Progress) -> Result<SyncStatus>
    {
        let dirty = scene.meshes.iter().filter(|m| m.need_update).count();
        if !self.state.need_update && dirty == 0 {
            return Ok(SyncStatus::Complete);
        }
        info!("synchronizing geometry: {} of {} meshes changed", dirty, scene.meshes.len());

        self.device_update_flags(scene);
        self.device_update_object(scene);
        let requests = request_attributes(scene);
        self.device_update_displacement_images(device, scene, progress)?;
        if progress.get_cancel() {
            return Ok(SyncStatus::Cancelled);
        }
        if self.prepare_meshes(scene, &requests, progress)?.is_cancelled() {
            return Ok(SyncStatus::Cancelled);
        }

        let mut dscene = DeviceScene::default();
        let mut txn = UploadTransaction::new();
        match self.device_sync(device, scene, &requests, &mut dscene, &mut txn, progress) {
            Ok(SyncStatus::Complete) => {},
            Ok(SyncStatus::Cancelled) => {
                info!("geometry synchronization cancelled");
                txn.rollback(device);
                return Ok(SyncStatus::Cancelled);
            },
            Err(err) => {
                warn!("geometry synchronization failed: {}", err);
                txn.rollback(device);
                return Err(err);
            }
        }
        self.dscene = dscene;

        for mesh in scene.meshes.iter_mut() {
            mesh.need_update = false;
            mesh.need_update_rebuild = false;
        }
        self.state.need_update = false;
        self.state.need_flags_update = false;
        if self.state.need_clear_geometry_cache && !scene.params.persistent_data {
            self.cache.clear_osd();
        }
        self.state.need_clear_geometry_cache = false;
        self.state.passes += 1;
        debug!("geometry synchronized: {} bytes on device", device.mem_used());
        Ok(SyncStatus::Complete)
    }

    fn device_sync(&mut self, device: &mut dyn Device, scene: &mut Scene,
        requests: &[AttributeRequestSet], dscene: &mut DeviceScene, txn: &mut UploadTransaction,
        progress: &dyn Progress) -> Result<SyncStatus>
    {
        if self.device_update_mesh(device, scene, dscene, txn, progress)?.is_cancelled() {
            return Ok(SyncStatus::Cancelled);
        }
        self.device_update_attributes(device, scene, requests, dscene, txn, progress)?;
        if progress.get_cancel() {
            return Ok(SyncStatus::Cancelled);
        }
        self.device_update_bvh(device, scene, dscene, txn, progress)
    }

    /// Recomputes volume and subsurface flags from the shaders each mesh uses. A mesh whose
    /// subsurface flag flips needs its BVH layout rebuilt.
    pub fn device_update_flags(&mut self, scene: &mut Scene) {
        if !self.state.need_flags_update && !scene.meshes.iter().any(|m| m.need_update) {
            return;
        }
        let Scene {ref mut meshes, ref shaders, ..} = *scene;
        for mesh in meshes.iter_mut() {
            let used: Vec<&Shader> = mesh.used_shaders.iter().filter_map(|&s| shaders.get(s)).collect();
            mesh.has_volume = used.iter().any(|s| s.has_volume);
            let has_surface_bssrdf = used.iter().any(|s| s.has_surface_bssrdf);
            if has_surface_bssrdf != mesh.has_surface_bssrdf {
                mesh.has_surface_bssrdf = has_surface_bssrdf;
                mesh.need_update = true;
                mesh.need_update_rebuild = true;
            }
        }
    }

    /// Counts mesh users and bakes the transforms of single-user meshes into their vertices.
    /// A baked transform that no longer matches its only object is taken back out.
    pub fn device_update_object(&mut self, scene: &mut Scene) {
        let Scene {ref mut meshes, ref objects, ref params, ..} = *scene;
        for mesh in meshes.iter_mut() {
            mesh.num_users = 0;
        }
        for object in objects {
            if let Some(mesh) = meshes.get_mut(object.mesh) {
                mesh.num_users += 1;
            }
        }

        for object in objects {
            let mesh = match meshes.get_mut(object.mesh) {
                Some(mesh) => mesh,
                None => continue
            };
            let stale = match mesh.baked_transform() {
                Some(baked) => mesh.num_users != 1 || !params.apply_static_transforms
                        || *baked != object.tfm || (object.use_motion && mesh.has_motion_blur()),
                None => false
            };
            if stale {
                mesh.undo_transform();
                debug!("took baked transform out of mesh {} for object {}", mesh.name, object.name);
            }
        }

        if !params.apply_static_transforms {
            return;
        }
        for object in objects {
            let mesh = match meshes.get_mut(object.mesh) {
                Some(mesh) => mesh,
                None => continue
            };
            if mesh.num_users != 1 || mesh.transform_applied || !mesh.need_update {
                continue;
            }
            if object.use_motion && mesh.has_motion_blur() {
                continue;
            }
            mesh.apply_transform(&object.tfm);
            debug!("baked transform of object {} into mesh {}", object.name, mesh.name);
        }
    }

    /// Loads the images sampled by displacement shaders of meshes about to be displaced.
    pub fn device_update_displacement_images(&mut self, device: &mut dyn Device, scene: &mut Scene,
        progress: &dyn Progress) -> Result<()>
    {
        let slots: BTreeSet<usize> = scene.meshes.iter()
                .filter(|m| m.need_update && m.displacement_method.moves_vertices())
                .flat_map(|m| m.used_shaders.iter())
                .filter_map(|&s| scene.shaders.get(s))
                .filter(|s| s.has_displacement())
                .flat_map(|s| s.displacement_images.iter().cloned())
                .collect();
        if slots.is_empty() {
            return Ok(());
        }

        let images = match scene.image_manager.as_mut() {
            Some(images) => images,
            None => {
                warn!("displacement samples {} images but the scene has no image manager", slots.len());
                return Ok(());
            }
        };
        for slot in slots {
            if progress.get_cancel() {
                break;
            }
            images.device_update_slot(device, slot, progress)?;
        }
        Ok(())
    }

    /// Tessellates, displaces and recomputes normals and bounds of every dirty mesh.
    fn prepare_meshes(&mut self, scene: &mut Scene, requests: &[AttributeRequestSet],
        progress: &dyn Progress) -> Result<SyncStatus>
    {
        let Scene {ref mut meshes, ref objects, ref shaders, ..} = *scene;
        let total = meshes.iter().filter(|m| m.need_update).count();
        let mut n = 0;

        for id in 0..meshes.len() {
            if !meshes[id].need_update {
                continue;
            }
            if progress.get_cancel() {
                return Ok(SyncStatus::Cancelled);
            }
            n += 1;
            progress.set_status("Updating Mesh", &format!("{} {}/{}", meshes[id].name, n, total));
            progress.set_progress(n, total);

            let mesh = &mut meshes[id];
            mesh.validate()?;
            // Displacement always starts from the authored positions.
            mesh.undisplace();
            if mesh.is_subdivided() && (mesh.need_update_rebuild || mesh.subpatches.is_empty()) {
                // Control vertices may have moved, so dicing data is always rebuilt.
                mesh.free_osd_data(id, &mut self.cache);
                let osd = mesh.update_osd(id, &mut self.cache);
                mesh.split_patches(&*self.splitter, osd)?;
                mesh.tessellate(osd)?;
                self.state.need_clear_geometry_cache = true;
            }

            let requested = &requests[id];
            if requested.find(&AttributeStandard::Generated.into()) {
                add_generated_coordinates(mesh);
            }
            if requested.find(&AttributeStandard::PositionUndisplaced.into())
                || mesh.displacement_method.moves_vertices()
            {
                mesh.save_undisplaced();
            }

            mesh.clear_generated_normals();
            mesh.add_face_normals();
            mesh.add_vertex_normals();

            let object = objects.iter().position(|o| o.mesh == id).unwrap_or(0);
            match self.displace(mesh, object, shaders, progress) {
                Ok(true) => {
                    mesh.displaced = true;
                    mesh.clear_generated_normals();
                    mesh.add_face_normals();
                    mesh.add_vertex_normals();
                },
                Ok(false) => {},
                Err(err) => warn!("displacement of mesh {} failed, leaving it undisplaced: {}",
                        mesh.name, err)
            }
            mesh.compute_bounds();
        }
        Ok(SyncStatus::Complete)
    }

    /// Moves the mesh's vertices along their normals by its displacement shaders. Each vertex
    /// is displaced once, by the shader of the first triangle using it. Returns whether any
    /// vertex moved; on error the vertices are left as they were.
    pub fn displace(&self, mesh: &mut Mesh, object: usize, shaders: &[Shader], progress: &dyn Progress)
        -> Result<bool>
    {
        if !mesh.displacement_method.moves_vertices() || progress.get_cancel() {
            return Ok(false);
        }

        let points: Vec<(&dyn DisplacementShader, DisplacePoint)> = {
            let normals = mesh.attributes.find_standard(AttributeStandard::VertexNormal)
                    .and_then(|attr| attr.data.as_float3());
            let mut done = vec![false; mesh.verts.len()];
            let mut points = vec![];
            for (t, tri) in mesh.triangles.iter().enumerate() {
                let displacement = match mesh.used_shaders.get(mesh.shader[t] as usize)
                        .and_then(|&s| shaders.get(s))
                        .and_then(|s| s.displacement.as_ref())
                {
                    Some(displacement) => displacement,
                    None => continue
                };
                for &v in tri.v.iter() {
                    if done[v] {
                        continue;
                    }
                    done[v] = true;
                    let n = normals.and_then(|n| n.get(v)).cloned().unwrap_or_else(core::Vec::zero);
                    points.push((&**displacement, DisplacePoint {object: object, vertex: v, p: mesh.verts[v], n: n}));
                }
            }
            points
        };
        if points.is_empty() {
            return Ok(false);
        }

        progress.set_status("Updating Mesh", &format!("Computing displacement {}", mesh.name));
        let offsets = points.par_iter()
                .map(|&(shader, ref point)| shader.eval(point))
                .collect::<Result<Vec<core::Vec>>>()?;

        let scale = mesh.displacement_scale;
        for (&(_, ref point), offset) in points.iter().zip(offsets.iter()) {
            mesh.verts[point.vertex] = mesh.verts[point.vertex] + *offset * scale;
        }
        debug!("displaced {} vertices of mesh {}", points.len(), mesh.name);
        Ok(true)
    }

    /// Assigns global offsets and packs and uploads every mesh's geometry.
    pub fn device_update_mesh(&mut self, device: &mut dyn Device, scene: &mut Scene,
        dscene: &mut DeviceScene, txn: &mut UploadTransaction, progress: &dyn Progress)
        -> Result<SyncStatus>
    {
        let sizes = packer::assign_offsets(&mut scene.meshes);
        if packer::pack_meshes(&scene.meshes, &sizes, dscene, progress)?.is_cancelled() {
            return Ok(SyncStatus::Cancelled);
        }
        dscene.objects = scene.objects.iter()
                .map(|o| scene.mesh(o.mesh).map(|mesh| PackedObject::new(o, mesh)))
                .collect::<Result<Vec<PackedObject>>>()?;

        txn.upload_all(device, &dscene.geometry_buffers())?;
        debug!("packed {} vertices, {} triangles, {} curves, {} patches",
                sizes.verts, sizes.triangles, sizes.curves, sizes.patches);
        Ok(SyncStatus::Complete)
    }

    /// Packs every requested attribute and builds the lookup tables of the active shading
    /// system.
    pub fn device_update_attributes(&mut self, device: &mut dyn Device, scene: &Scene,
        requests: &[AttributeRequestSet], dscene: &mut DeviceScene, txn: &mut UploadTransaction,
        progress: &dyn Progress) -> Result<()>
    {
        progress.set_status("Updating Mesh", "Computing attributes");

        let mut resolved = requests.to_vec();
        for (mesh, set) in scene.meshes.iter().zip(resolved.iter_mut()) {
            for req in set.requests.iter_mut() {
                if let Some(attr) = mesh.attributes.find(&req.key) {
                    req.triangle_desc = packer::pack_attribute(&attr.data, attr.element, dscene);
                }
                if let Some(attr) = mesh.curve_attributes.find(&req.key) {
                    req.curve_desc = packer::pack_attribute(&attr.data, attr.element, dscene);
                }
            }
        }

        match scene.params.shading_system {
            ShadingSystem::Svm => self.update_svm_attributes(scene, &resolved, dscene),
            ShadingSystem::Osl => self.update_osl_attributes(scene, &resolved, dscene),
        }
        txn.upload_all(device, &dscene.attribute_buffers())
    }

    /// Writes each object's rows of the SVM attribute map: a triangle and a curve row per
    /// request, then an end marker. Attribute ids are positions in the scene-wide request set.
    pub fn update_svm_attributes(&self, scene: &Scene, resolved: &[AttributeRequestSet],
        dscene: &mut DeviceScene)
    {
        let mut scene_requests = AttributeRequestSet::new();
        for set in resolved {
            scene_requests.add_set(set);
        }

        dscene.attributes_map.clear();
        for (i, object) in scene.objects.iter().enumerate() {
            let offset = dscene.attributes_map.len() as u32;
            if let Some(set) = resolved.get(object.mesh) {
                for req in &set.requests {
                    let id = scene_requests.position(&req.key).unwrap_or(0) as u32;
                    dscene.attributes_map.push(packer::attribute_map_row(id, &req.triangle_desc));
                    dscene.attributes_map.push(packer::attribute_map_row(id, &req.curve_desc));
                }
            }
            dscene.attributes_map.push([ATTRIBUTE_MAP_END, 0, 0, 0]);
            if let Some(packed) = dscene.objects.get_mut(i) {
                packed.attribute_map_offset = offset;
            }
        }
    }

    /// Gives each object the resolved requests of its mesh for host-side OSL lookups.
    pub fn update_osl_attributes(&self, scene: &Scene, resolved: &[AttributeRequestSet],
        dscene: &mut DeviceScene)
    {
        dscene.osl_attributes = scene.objects.iter()
                .map(|o| resolved.get(o.mesh).cloned().unwrap_or_default())
                .collect();
    }

    /// Builds or refits the per-mesh BVHs of instanced meshes and the scene BVH over
    /// everything, then packs and uploads them.
    pub fn device_update_bvh(&mut self, device: &mut dyn Device, scene: &mut Scene,
        dscene: &mut DeviceScene, txn: &mut UploadTransaction, progress: &dyn Progress)
        -> Result<SyncStatus>
    {
        let Scene {ref meshes, ref mut objects, ref params, ..} = *scene;
        for object in objects.iter_mut() {
            if let Some(mesh) = meshes.get(object.mesh) {
                object.bounds = if mesh.transform_applied {
                    mesh.bounds
                }
                else {
                    object.tfm.transform_bbox(&mesh.bounds)
                };
            }
        }
        let objects = &*objects;

        let own_bvh: Vec<bool> = meshes.iter().map(|m| m.num_users > 0 && m.need_build_bvh()).collect();
        for id in 0..meshes.len() {
            if !own_bvh[id] {
                self.cache.take_bvh(id);
            }
        }
        let stale: Vec<MeshId> = (0..meshes.len())
                .filter(|&id| own_bvh[id] && (meshes[id].need_update || self.cache.bvh(id).is_none()))
                .collect();
        let mut jobs: Vec<(MeshId, Option<Bvh>)> = stale.into_iter()
                .map(|id| (id, self.cache.take_bvh(id)))
                .collect();

        let total = jobs.len();
        let results: Vec<BvhUpdate> = jobs.par_iter_mut().enumerate().map(|(n, job)| {
            let (id, slot) = job;
            meshes[*id].compute_bvh(slot, params, progress, n, total)
        }).collect();

        let mut cancelled = false;
        for ((id, slot), result) in jobs.into_iter().zip(results) {
            match result {
                BvhUpdate::Built => self.state.bvh_builds += 1,
                BvhUpdate::Refitted => self.state.bvh_refits += 1,
                BvhUpdate::Cancelled => cancelled = true,
            }
            if let Some(bvh) = slot {
                self.cache.insert_bvh(id, bvh);
            }
        }
        if cancelled {
            return Ok(SyncStatus::Cancelled);
        }

        progress.set_status("Updating Scene BVH", "Building");
        let refs = scene_references(meshes, objects);
        let items: Vec<BvhItem> = refs.iter().map(|r| r.item).collect();
        let rebuild = meshes.iter().any(|m| m.need_update_rebuild);
        let refit = params.allows_refit() && !rebuild && self.bvh.is_some() && items == self.scene_items;
        if refit {
            if let Some(bvh) = self.bvh.as_mut() {
                bvh.refit(|item| scene_item_bounds(meshes, objects, item));
            }
            self.state.bvh_refits += 1;
            debug!("refit scene BVH over {} items", items.len());
        }
        else {
            match Bvh::build(refs, &params.bvh_params(), progress) {
                Some(bvh) => {
                    self.bvh = Some(bvh);
                    self.state.bvh_builds += 1;
                    self.scene_items = items;
                },
                None => return Ok(SyncStatus::Cancelled)
            }
        }

        let mesh_bvhs: Vec<(MeshId, &Bvh)> = (0..meshes.len())
                .filter(|&id| own_bvh[id])
                .filter_map(|id| self.cache.bvh(id).map(|bvh| (id, bvh)))
                .collect();
        let empty = Bvh::default();
        packer::pack_bvh(self.bvh.as_ref().unwrap_or(&empty), &mesh_bvhs, meshes, objects, dscene);
        txn.upload_all(device, &dscene.bvh_buffers())?;
        Ok(SyncStatus::Complete)
    }

    /// Frees every device buffer and drops all derived state; the next pass starts over.
    pub fn device_free(&mut self, device: &mut dyn Device) {
        for name in DeviceScene::buffer_names() {
            device.mem_free(name);
        }
        self.dscene = DeviceScene::default();
        self.bvh = None;
        self.scene_items.clear();
        self.cache.clear();
        self.state.need_update = true;
        self.state.need_flags_update = true;
        self.state.need_clear_geometry_cache = false;
    }
}

/// Per-mesh union of the attributes its shaders read, plus what motion blur needs.
fn request_attributes(scene: &Scene) -> Vec<AttributeRequestSet> {
    scene.meshes.iter().map(|mesh| {
        let mut set = AttributeRequestSet::new();
        for shader in mesh.used_shaders.iter().filter_map(|&s| scene.shaders.get(s)) {
            set.add_set(&shader.attributes);
        }
        if mesh.has_motion_blur() {
            set.add_standard(AttributeStandard::MotionVertexPosition);
        }
        set
    }).collect()
}

/// Texture-space coordinates: vertex positions mapped into the unit cube of the mesh bounds.
fn add_generated_coordinates(mesh: &mut Mesh) {
    if mesh.attributes.find_standard(AttributeStandard::Generated).is_some() {
        return;
    }
    mesh.compute_bounds();
    let bounds = mesh.bounds;
    let size = bounds.diagonal();
    let coords: Vec<core::Vec> = mesh.verts.iter().map(|v| {
        let d = *v - bounds.min;
        let axis = |a: f32, s: f32| if s > 0.0 { a / s } else { 0.0 };
        core::Vec::new(axis(d.x, size.x), axis(d.y, size.y), axis(d.z, size.z))
    }).collect();
    let counts = mesh.counts();
    let attr = mesh.attributes.add_standard(AttributeStandard::Generated, &counts);
    if let Some(data) = attr.data.as_float3_mut() {
        *data = coords;
    }
}

fn scene_item_bounds(meshes: &[Mesh], objects: &[Object], item: &BvhItem) -> core::BBox {
    match *item {
        BvhItem::Instance(o) => objects[o].bounds,
        BvhItem::Prim {object: Some(o), prim} => {
            let object = &objects[o];
            let mesh = &meshes[object.mesh];
            let bounds = mesh.prim_bounds(&prim);
            if mesh.transform_applied { bounds } else { object.tfm.transform_bbox(&bounds) }
        },
        BvhItem::Prim {object: None, ..} => core::BBox::empty()
    }
}

/// Objects whose mesh has its own BVH enter the scene BVH as one instance; the primitives of
/// all others are inserted directly in world space.
fn scene_references(meshes: &[Mesh], objects: &[Object]) -> Vec<BvhReference> {
    let mut refs = vec![];
    for (o, object) in objects.iter().enumerate() {
        let mesh = &meshes[object.mesh];
        if mesh.need_build_bvh() {
            refs.push(BvhReference::new(BvhItem::Instance(o), object.bounds));
            continue;
        }
        for prim in mesh.primitives() {
            let item = BvhItem::Prim {object: Some(o), prim: prim};
            refs.push(BvhReference::new(item, scene_item_bounds(meshes, objects, &item)));
        }
    }
    refs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::geom::{AttributeKey, DisplacementMethod, Triangle};
    use crate::render::{MemoryDevice, SceneParams, SimpleProgress};
    use approx::assert_relative_eq;

    fn quad_mesh(name: &str) -> Mesh {
        let mut mesh = Mesh::new(name);
        mesh.add_vertex(core::Vec::new(0.0, 0.0, 0.0));
        mesh.add_vertex(core::Vec::new(1.0, 0.0, 0.0));
        mesh.add_vertex(core::Vec::new(1.0, 1.0, 0.0));
        mesh.add_vertex(core::Vec::new(0.0, 1.0, 0.0));
        mesh.add_triangle(0, 1, 2, 0, true).unwrap();
        mesh.add_triangle(0, 2, 3, 0, true).unwrap();
        mesh.used_shaders = vec![0];
        mesh
    }

    fn scene_with(shader: Shader, users: usize) -> Scene {
        let mut scene = Scene::new(SceneParams::default());
        scene.add_shader(shader);
        let mesh = scene.add_mesh(quad_mesh("quad"));
        for i in 0..users {
            let tfm = core::Xform::new(core::Mat::translation(&core::Vec::new(i as f32 * 2.0, 0.0, 0.0)));
            scene.add_object(Object::new(&format!("o{}", i), mesh, tfm)).unwrap();
        }
        scene
    }

    #[test]
    fn true_displacement_moves_vertices_along_normals() {
        let shader = Shader::new("bumpy").with_displacement(Box::new(|p: &DisplacePoint| -> Result<core::Vec> {
            Ok(p.n * 0.5)
        }));
        let mut scene = scene_with(shader, 1);
        scene.meshes[0].displacement_method = DisplacementMethod::True;
        let mut manager = GeometryManager::new();
        let mut device = MemoryDevice::new();
        manager.device_update(&mut device, &mut scene, &SimpleProgress::new()).unwrap();

        for v in &scene.meshes[0].verts {
            assert_relative_eq!(v.z, 0.5);
        }
        assert!(scene.meshes[0].displaced);

        // A retried pass must not displace twice.
        manager.tag_update();
        scene.meshes[0].need_update = true;
        manager.device_update(&mut device, &mut scene, &SimpleProgress::new()).unwrap();
        assert_relative_eq!(scene.meshes[0].verts[0].z, 0.5);
    }

    #[test]
    fn displacement_restarts_from_authored_positions() {
        let shader = Shader::new("bumpy").with_displacement(Box::new(|p: &DisplacePoint| -> Result<core::Vec> {
            Ok(p.n * 0.5)
        }));
        let mut scene = scene_with(shader, 1);
        scene.meshes[0].displacement_method = DisplacementMethod::True;
        let mut manager = GeometryManager::new();
        let mut device = MemoryDevice::new();
        manager.device_update(&mut device, &mut scene, &SimpleProgress::new()).unwrap();
        assert_relative_eq!(scene.meshes[0].verts[2].z, 0.5);

        for &rebuild in &[false, true, false] {
            scene.meshes[0].tag_update(rebuild);
            manager.device_update(&mut device, &mut scene, &SimpleProgress::new()).unwrap();
            for v in &scene.meshes[0].verts {
                assert_relative_eq!(v.z, 0.5);
            }
            assert_relative_eq!(scene.meshes[0].bounds.max.z, 0.5);
        }
        let undisplaced = scene.meshes[0].attributes.find_standard(AttributeStandard::PositionUndisplaced)
                .and_then(|attr| attr.data.as_float3())
                .unwrap();
        assert!(undisplaced.iter().all(|p| p.z == 0.0));
    }

    #[test]
    fn bump_displacement_leaves_vertices() {
        let shader = Shader::new("bump").with_displacement(Box::new(|p: &DisplacePoint| -> Result<core::Vec> { Ok(p.n) }));
        let mut scene = scene_with(shader, 1);
        let mut manager = GeometryManager::new();
        manager.device_update(&mut MemoryDevice::new(), &mut scene, &SimpleProgress::new()).unwrap();
        assert_eq!(scene.meshes[0].verts[2], core::Vec::new(1.0, 1.0, 0.0));
    }

    #[test]
    fn failing_displacement_is_not_fatal() {
        let shader = Shader::new("broken").with_displacement(Box::new(|_: &DisplacePoint| -> Result<core::Vec> {
            Err(Error::ShaderEvaluation("no texture".to_string()))
        }));
        let mut scene = scene_with(shader, 1);
        scene.meshes[0].displacement_method = DisplacementMethod::Both;
        let mut manager = GeometryManager::new();
        let status = manager.device_update(&mut MemoryDevice::new(), &mut scene, &SimpleProgress::new());
        assert_eq!(status, Ok(SyncStatus::Complete));
        assert_eq!(scene.meshes[0].verts[1], core::Vec::new(1.0, 0.0, 0.0));
        assert!(!scene.meshes[0].displaced);
    }

    #[test]
    fn instanced_mesh_gets_its_own_bvh() {
        let mut scene = scene_with(Shader::new("plain"), 2);
        let mut manager = GeometryManager::new();
        manager.device_update(&mut MemoryDevice::new(), &mut scene, &SimpleProgress::new()).unwrap();
        assert!(manager.cache().bvh(0).is_some());
        // Scene BVH plus one mesh BVH.
        assert_eq!(manager.state.bvh_builds, 2);
        let dscene = manager.device_scene();
        assert!(dscene.objects.iter().all(|o| o.bvh_root != packer::NONE));
        assert!(!scene.meshes[0].transform_applied);
    }

    #[test]
    fn single_user_transform_is_baked() {
        let mut scene = scene_with(Shader::new("plain"), 1);
        scene.objects[0].tfm = core::Xform::new(core::Mat::translation(&core::Vec::new(0.0, 0.0, 3.0)));
        let mut manager = GeometryManager::new();
        manager.device_update(&mut MemoryDevice::new(), &mut scene, &SimpleProgress::new()).unwrap();
        assert!(scene.meshes[0].transform_applied);
        assert_relative_eq!(scene.meshes[0].verts[0].z, 3.0);
        assert!(manager.cache().bvh(0).is_none());
        assert_eq!(manager.device_scene().objects[0].bvh_root, packer::NONE);
    }

    #[test]
    fn baked_transform_is_undone_for_a_second_user() {
        let mut scene = scene_with(Shader::new("plain"), 1);
        scene.objects[0].tfm = core::Xform::new(core::Mat::translation(&core::Vec::new(0.0, 0.0, 3.0)));
        let mut manager = GeometryManager::new();
        let mut device = MemoryDevice::new();
        manager.device_update(&mut device, &mut scene, &SimpleProgress::new()).unwrap();
        assert!(scene.meshes[0].transform_applied);

        let tfm = core::Xform::new(core::Mat::translation(&core::Vec::new(10.0, 0.0, 0.0)));
        scene.add_object(Object::new("o1", 0, tfm)).unwrap();
        manager.tag_update();
        manager.device_update(&mut device, &mut scene, &SimpleProgress::new()).unwrap();

        let mesh = &scene.meshes[0];
        assert!(!mesh.transform_applied);
        assert!(mesh.baked_transform().is_none());
        assert!(mesh.verts.iter().all(|v| v.z.abs() < 1e-6));
        assert_relative_eq!(scene.objects[0].bounds.min.z, 3.0);
        assert_relative_eq!(scene.objects[1].bounds.min.x, 10.0);
        assert_relative_eq!(scene.objects[1].bounds.min.z, 0.0);
        let objects = &manager.device_scene().objects;
        assert_relative_eq!(objects[0].tfm[2][3], 3.0);
        assert_relative_eq!(objects[1].tfm[0][3], 10.0);
        assert!(manager.cache().bvh(0).is_some());
    }

    #[test]
    fn moved_object_rebakes_its_mesh() {
        let mut scene = scene_with(Shader::new("plain"), 1);
        scene.objects[0].tfm = core::Xform::new(core::Mat::translation(&core::Vec::new(0.0, 0.0, 3.0)));
        let mut manager = GeometryManager::new();
        let mut device = MemoryDevice::new();
        manager.device_update(&mut device, &mut scene, &SimpleProgress::new()).unwrap();

        scene.objects[0].tfm = core::Xform::new(core::Mat::translation(&core::Vec::new(0.0, 0.0, -1.0)));
        manager.tag_update();
        manager.device_update(&mut device, &mut scene, &SimpleProgress::new()).unwrap();
        assert!(scene.meshes[0].transform_applied);
        assert_relative_eq!(scene.meshes[0].verts[0].z, -1.0);
        assert_relative_eq!(scene.objects[0].bounds.max.z, -1.0);
    }

    #[test]
    fn static_transforms_can_be_disabled() {
        let mut scene = scene_with(Shader::new("plain"), 1);
        scene.params = SceneParams::default().with_apply_static_transforms(false);
        scene.objects[0].tfm = core::Xform::new(core::Mat::translation(&core::Vec::new(0.0, 0.0, 3.0)));
        let mut manager = GeometryManager::new();
        manager.device_update(&mut MemoryDevice::new(), &mut scene, &SimpleProgress::new()).unwrap();
        assert!(!scene.meshes[0].transform_applied);
        assert_relative_eq!(scene.meshes[0].verts[0].z, 0.0);
    }

    #[test]
    fn shader_flag_changes_reach_meshes() {
        let mut scene = scene_with(Shader::new("skin").with_surface_bssrdf().with_volume(), 1);
        let mut manager = GeometryManager::new();
        let mut device = MemoryDevice::new();
        manager.device_update(&mut device, &mut scene, &SimpleProgress::new()).unwrap();
        assert!(scene.meshes[0].has_surface_bssrdf);
        assert!(scene.meshes[0].has_volume);
        let builds = manager.state.bvh_builds;

        scene.shaders[0].has_surface_bssrdf = false;
        manager.tag_flags_update();
        manager.device_update(&mut device, &mut scene, &SimpleProgress::new()).unwrap();
        assert!(!scene.meshes[0].has_surface_bssrdf);
        assert!(scene.meshes[0].has_volume);
        assert!(manager.state.bvh_builds > builds);
        assert!(!manager.state.need_flags_update);
    }

    #[test]
    fn malformed_mesh_fails_before_upload() {
        let mut scene = scene_with(Shader::new("plain"), 1);
        scene.meshes[0].triangles.push(Triangle::new(0, 1, 2));
        let mut device = MemoryDevice::new();
        let result = GeometryManager::new().device_update(&mut device, &mut scene, &SimpleProgress::new());
        match result {
            Err(Error::BufferSize {..}) => {},
            other => panic!("unexpected result {:?}", other),
        }
        assert!(device.is_empty());
    }

    #[test]
    fn svm_map_lists_requests_per_object() {
        let shader = Shader::new("textured")
                .with_standard_attribute(AttributeStandard::Generated)
                .with_attribute(AttributeKey::named("missing"));
        let mut scene = scene_with(shader, 2);
        let mut manager = GeometryManager::new();
        manager.device_update(&mut MemoryDevice::new(), &mut scene, &SimpleProgress::new()).unwrap();

        let dscene = manager.device_scene();
        // Two requests, two rows each, one end marker, per object.
        assert_eq!(dscene.attributes_map.len(), 10);
        assert_eq!(dscene.objects[1].attribute_map_offset, 5);
        assert_eq!(dscene.attributes_map[4][0], ATTRIBUTE_MAP_END);
        assert_eq!(dscene.attributes_map[2], [1, 0, 0, 0]);
        assert_eq!(dscene.attributes_float3.len(), 4);
        assert_relative_eq!(dscene.attributes_float3[2][0], 1.0);
    }

    #[test]
    fn svm_offsets_point_into_shared_arrays() {
        let shader = Shader::new("textured").with_standard_attribute(AttributeStandard::Generated);
        let mut scene = scene_with(shader, 1);
        let mesh = scene.add_mesh(quad_mesh("second"));
        scene.add_object(Object::new("o1", mesh, core::Xform::identity())).unwrap();
        let mut manager = GeometryManager::new();
        manager.device_update(&mut MemoryDevice::new(), &mut scene, &SimpleProgress::new()).unwrap();

        let dscene = manager.device_scene();
        assert_eq!(dscene.attributes_float3.len(), 8);
        let first = dscene.attributes_map[0];
        assert_eq!(first[2], 0);
        let offset = dscene.objects[1].attribute_map_offset as usize;
        assert_eq!(offset, 3);
        let row = dscene.attributes_map[offset];
        // Starts after the first mesh's four vertices.
        assert_eq!(row[2], 4);
        assert_eq!(row[1], first[1]);
        assert_eq!(row[3], first[3]);
    }

    #[test]
    fn osl_tables_are_per_object() {
        let shader = Shader::new("textured").with_standard_attribute(AttributeStandard::UV);
        let mut scene = scene_with(shader, 1);
        scene.params = scene.params.with_shading_system(ShadingSystem::Osl);
        let mut manager = GeometryManager::new();
        manager.device_update(&mut MemoryDevice::new(), &mut scene, &SimpleProgress::new()).unwrap();
        let tables = &manager.device_scene().osl_attributes;
        assert_eq!(tables.len(), 1);
        assert!(tables[0].requests[0].triangle_desc.is_missing());
        assert!(manager.device_scene().attributes_map.is_empty());
    }

    #[test]
    fn cancelled_pass_keeps_meshes_dirty() {
        let mut scene = scene_with(Shader::new("plain"), 1);
        let mut manager = GeometryManager::new();
        let progress = SimpleProgress::new();
        progress.cancel();
        let mut device = MemoryDevice::new();
        assert_eq!(manager.device_update(&mut device, &mut scene, &progress), Ok(SyncStatus::Cancelled));
        assert!(scene.meshes[0].need_update);
        assert!(device.is_empty());
    }

    #[test]
    fn device_free_forces_full_rebuild() {
        let mut scene = scene_with(Shader::new("plain"), 2);
        let mut manager = GeometryManager::new();
        let mut device = MemoryDevice::new();
        manager.device_update(&mut device, &mut scene, &SimpleProgress::new()).unwrap();
        manager.device_free(&mut device);
        assert!(device.is_empty());
        assert!(manager.bvh().is_none());

        manager.device_update(&mut device, &mut scene, &SimpleProgress::new()).unwrap();
        assert_eq!(manager.state.bvh_builds, 4);
        assert!(!device.is_empty());
    }
}
