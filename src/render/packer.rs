use crate::core;
use crate::error::{Result, SyncStatus};
use crate::geom::{AttributeData, AttributeDescriptor, AttributeElement, AttributeRequestSet,
        AttributeType, Bvh, BvhItem, Mesh, MeshId, MeshOffsets};
use crate::render::{Device, Object, Progress};

use byteorder::{ByteOrder, LittleEndian};
use bitflags::bitflags;
use log::{debug, warn};
use rayon::prelude::*;
use std::collections::HashMap;

/// Primitive type word of an instance leaf; its index is the instanced mesh's root node.
pub const PRIMITIVE_INSTANCE: u32 = 1 << 7;
/// Terminates one object's rows in the attribute map.
pub const ATTRIBUTE_MAP_END: u32 = std::u32::MAX;
/// Marks an index that refers to nothing.
pub const NONE: u32 = std::u32::MAX;

/// A value with a fixed little-endian device layout of `WORDS` 32-bit words.
pub trait DeviceElement: Sync {
    const WORDS: usize;
    fn write_le(&self, out: &mut [u8]);
}

impl DeviceElement for u32 {
    const WORDS: usize = 1;
    fn write_le(&self, out: &mut [u8]) {
        LittleEndian::write_u32(out, *self);
    }
}

impl DeviceElement for f32 {
    const WORDS: usize = 1;
    fn write_le(&self, out: &mut [u8]) {
        LittleEndian::write_f32(out, *self);
    }
}

impl DeviceElement for [f32; 2] {
    const WORDS: usize = 2;
    fn write_le(&self, out: &mut [u8]) {
        LittleEndian::write_f32_into(&self[..], out);
    }
}

impl DeviceElement for [f32; 4] {
    const WORDS: usize = 4;
    fn write_le(&self, out: &mut [u8]) {
        LittleEndian::write_f32_into(&self[..], out);
    }
}

impl DeviceElement for [u32; 4] {
    const WORDS: usize = 4;
    fn write_le(&self, out: &mut [u8]) {
        LittleEndian::write_u32_into(&self[..], out);
    }
}

/// Serializes packed elements into the byte layout devices consume.
pub fn to_device_bytes<T: DeviceElement>(data: &[T]) -> Vec<u8> {
    let stride = T::WORDS * 4;
    let mut bytes = vec![0u8; data.len() * stride];
    bytes.par_chunks_mut(stride).zip(data.par_iter()).for_each(|(out, item)| {
        item.write_le(out);
    });
    bytes
}

/// Flattened BVH node: bounds, then the second child or first item, item count and split axis.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PackedBvhNode {
    pub min: [f32; 4],
    pub max: [f32; 4],
    pub offset: u32,
    pub num_items: u32,
    pub axis: u32,
}

impl DeviceElement for PackedBvhNode {
    const WORDS: usize = 12;
    fn write_le(&self, out: &mut [u8]) {
        LittleEndian::write_f32_into(&self.min[..], &mut out[0..16]);
        LittleEndian::write_f32_into(&self.max[..], &mut out[16..32]);
        LittleEndian::write_u32_into(&[self.offset, self.num_items, self.axis, 0], &mut out[32..48]);
    }
}

bitflags! {
    pub struct ObjectFlags: u32 {
        const TRANSFORM_APPLIED = 0b001;
        const NEGATIVE_SCALE    = 0b010;
        const HAS_MOTION        = 0b100;
    }
}

/// Per-object device record.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PackedObject {
    pub tfm: [[f32; 4]; 3],
    pub itfm: [[f32; 4]; 3],
    pub mesh: u32,
    /// Root node of the object's mesh BVH, or `NONE` when its primitives are in the scene BVH.
    pub bvh_root: u32,
    pub attribute_map_offset: u32,
    pub flags: u32,
}

impl DeviceElement for PackedObject {
    const WORDS: usize = 28;
    fn write_le(&self, out: &mut [u8]) {
        for (i, row) in self.tfm.iter().chain(self.itfm.iter()).enumerate() {
            LittleEndian::write_f32_into(&row[..], &mut out[(i * 16)..(i * 16 + 16)]);
        }
        LittleEndian::write_u32_into(
                &[self.mesh, self.bvh_root, self.attribute_map_offset, self.flags],
                &mut out[96..112]);
    }
}

impl PackedObject {
    pub fn new(object: &Object, mesh: &Mesh) -> PackedObject {
        // Baked transforms already live in the vertices.
        let tfm = if mesh.transform_applied { core::Xform::identity() } else { object.tfm };
        let inverse = tfm.mat().inverted().unwrap_or_else(core::Mat::zero);

        let mut flags = ObjectFlags::empty();
        if mesh.transform_applied {
            flags |= ObjectFlags::TRANSFORM_APPLIED;
        }
        if mesh.transform_negative_scaled || tfm.is_negative_scaled() {
            flags |= ObjectFlags::NEGATIVE_SCALE;
        }
        if object.use_motion && mesh.has_motion_blur() {
            flags |= ObjectFlags::HAS_MOTION;
        }

        PackedObject {
            tfm: tfm.mat().to_float4x3(),
            itfm: inverse.to_float4x3(),
            mesh: object.mesh as u32,
            bvh_root: NONE,
            attribute_map_offset: 0,
            flags: flags.bits(),
        }
    }
}

/// Host copy of every buffer the device receives.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DeviceScene {
    pub tri_shader: Vec<u32>,
    pub tri_vnormal: Vec<[f32; 4]>,
    pub tri_vindex: Vec<[u32; 4]>,
    pub tri_verts: Vec<[f32; 4]>,
    pub curve_keys: Vec<[f32; 4]>,
    pub curves: Vec<[u32; 4]>,
    pub patches: Vec<[u32; 4]>,
    pub patch_shader: Vec<u32>,

    pub attributes_map: Vec<[u32; 4]>,
    pub attributes_float: Vec<f32>,
    pub attributes_float2: Vec<[f32; 2]>,
    pub attributes_float3: Vec<[f32; 4]>,

    pub bvh_nodes: Vec<PackedBvhNode>,
    pub prim_index: Vec<u32>,
    pub prim_type: Vec<u32>,
    pub prim_object: Vec<u32>,

    pub objects: Vec<PackedObject>,

    /// Per-object attribute tables for OSL, which looks attributes up on the host.
    pub osl_attributes: Vec<AttributeRequestSet>,
}

impl DeviceScene {
    /// Mesh geometry buffers, uploaded once offsets are assigned.
    pub fn geometry_buffers(&self) -> Vec<(&'static str, Vec<u8>)> {
        vec![
            ("tri_shader", to_device_bytes(&self.tri_shader)),
            ("tri_vnormal", to_device_bytes(&self.tri_vnormal)),
            ("tri_vindex", to_device_bytes(&self.tri_vindex)),
            ("tri_verts", to_device_bytes(&self.tri_verts)),
            ("curve_keys", to_device_bytes(&self.curve_keys)),
            ("curves", to_device_bytes(&self.curves)),
            ("patches", to_device_bytes(&self.patches)),
            ("patch_shader", to_device_bytes(&self.patch_shader)),
        ]
    }

    pub fn attribute_buffers(&self) -> Vec<(&'static str, Vec<u8>)> {
        vec![
            ("attributes_map", to_device_bytes(&self.attributes_map)),
            ("attributes_float", to_device_bytes(&self.attributes_float)),
            ("attributes_float2", to_device_bytes(&self.attributes_float2)),
            ("attributes_float3", to_device_bytes(&self.attributes_float3)),
        ]
    }

    /// BVH buffers and the object records that point into them.
    pub fn bvh_buffers(&self) -> Vec<(&'static str, Vec<u8>)> {
        vec![
            ("bvh_nodes", to_device_bytes(&self.bvh_nodes)),
            ("prim_index", to_device_bytes(&self.prim_index)),
            ("prim_type", to_device_bytes(&self.prim_type)),
            ("prim_object", to_device_bytes(&self.prim_object)),
            ("objects", to_device_bytes(&self.objects)),
        ]
    }

    /// Device buffer names paired with their serialized contents.
    pub fn buffers(&self) -> Vec<(&'static str, Vec<u8>)> {
        let mut buffers = self.geometry_buffers();
        buffers.extend(self.attribute_buffers());
        buffers.extend(self.bvh_buffers());
        buffers
    }

    pub fn buffer_names() -> Vec<&'static str> {
        DeviceScene::default().buffers().into_iter().map(|(name, _)| name).collect()
    }
}

/// Records what each upload replaced so a failed pass can restore the previous buffers.
#[derive(Debug, Default)]
pub struct UploadTransaction {
    saved: Vec<(String, Option<Vec<u8>>)>,
}

impl UploadTransaction {
    pub fn new() -> UploadTransaction {
        UploadTransaction::default()
    }

    pub fn upload(&mut self, device: &mut dyn Device, name: &str, data: &[u8]) -> Result<()> {
        let previous = device.mem_read(name).map(|b| b.to_vec());
        device.mem_alloc(name, data)?;
        self.saved.push((name.to_string(), previous));
        Ok(())
    }

    pub fn upload_all(&mut self, device: &mut dyn Device, buffers: &[(&'static str, Vec<u8>)])
        -> Result<()>
    {
        for &(name, ref data) in buffers {
            self.upload(device, name, data)?;
        }
        Ok(())
    }

    /// Restores every buffer replaced through this transaction, newest first.
    pub fn rollback(self, device: &mut dyn Device) {
        for (name, previous) in self.saved.into_iter().rev() {
            match previous {
                Some(data) => {
                    if let Err(err) = device.mem_alloc(&name, &data) {
                        warn!("could not restore device buffer {}: {}", name, err);
                    }
                },
                None => device.mem_free(&name)
            }
        }
    }
}

/// Scene-wide element totals.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GeometrySizes {
    pub verts: usize,
    pub triangles: usize,
    pub curves: usize,
    pub curve_keys: usize,
    pub patches: usize,
}

/// Assigns every mesh its range in the global buffers. Must run single-threaded before any
/// packing so ranges are monotonic and disjoint.
pub fn assign_offsets(meshes: &mut [Mesh]) -> GeometrySizes {
    let mut sizes = GeometrySizes::default();
    for mesh in meshes.iter_mut() {
        mesh.offsets = MeshOffsets {
            vert: sizes.verts,
            tri: sizes.triangles,
            curve: sizes.curves,
            curve_key: sizes.curve_keys,
            patch: sizes.patches,
        };
        sizes.verts += mesh.verts.len();
        sizes.triangles += mesh.triangles.len();
        sizes.curves += mesh.curves.len();
        sizes.curve_keys += mesh.curve_keys.len();
        sizes.patches += mesh.patches.len();
    }
    sizes
}

struct MeshPackJob<'a> {
    mesh: &'a Mesh,
    tri_shader: &'a mut [u32],
    tri_vnormal: &'a mut [[f32; 4]],
    tri_vindex: &'a mut [[u32; 4]],
    tri_verts: &'a mut [[f32; 4]],
    curve_keys: &'a mut [[f32; 4]],
    curves: &'a mut [[u32; 4]],
    patches: &'a mut [[u32; 4]],
    patch_shader: &'a mut [u32],
}

impl<'a> MeshPackJob<'a> {
    fn run(&mut self) -> Result<()> {
        let offsets = &self.mesh.offsets;
        self.mesh.pack_normals(self.tri_shader, self.tri_vnormal)?;
        self.mesh.pack_verts(self.tri_verts, self.tri_vindex, offsets.vert, offsets.patch)?;
        self.mesh.pack_curves(self.curve_keys, self.curves, offsets.curve_key)?;
        self.mesh.pack_patches(self.patches, self.patch_shader, offsets.vert)
    }
}

fn take_front<'a, T>(slice: &mut &'a mut [T], n: usize) -> &'a mut [T] {
    let (head, tail) = std::mem::take(slice).split_at_mut(n);
    *slice = tail;
    head
}

/// Packs all meshes into freshly sized global arrays. Each mesh writes only its own range,
/// so meshes are packed in parallel.
pub fn pack_meshes(meshes: &[Mesh], sizes: &GeometrySizes, dscene: &mut DeviceScene,
    progress: &dyn Progress) -> Result<SyncStatus>
{
    dscene.tri_shader = vec![0; sizes.triangles];
    dscene.tri_vnormal = vec![[0.0; 4]; sizes.verts];
    dscene.tri_vindex = vec![[0; 4]; sizes.triangles];
    dscene.tri_verts = vec![[0.0; 4]; sizes.verts];
    dscene.curve_keys = vec![[0.0; 4]; sizes.curve_keys];
    dscene.curves = vec![[0; 4]; sizes.curves];
    dscene.patches = vec![[0; 4]; sizes.patches];
    dscene.patch_shader = vec![0; sizes.patches];

    let mut jobs = Vec::with_capacity(meshes.len());
    {
        let mut tri_shader = &mut dscene.tri_shader[..];
        let mut tri_vnormal = &mut dscene.tri_vnormal[..];
        let mut tri_vindex = &mut dscene.tri_vindex[..];
        let mut tri_verts = &mut dscene.tri_verts[..];
        let mut curve_keys = &mut dscene.curve_keys[..];
        let mut curves = &mut dscene.curves[..];
        let mut patches = &mut dscene.patches[..];
        let mut patch_shader = &mut dscene.patch_shader[..];
        for mesh in meshes {
            jobs.push(MeshPackJob {
                mesh: mesh,
                tri_shader: take_front(&mut tri_shader, mesh.triangles.len()),
                tri_vnormal: take_front(&mut tri_vnormal, mesh.verts.len()),
                tri_vindex: take_front(&mut tri_vindex, mesh.triangles.len()),
                tri_verts: take_front(&mut tri_verts, mesh.verts.len()),
                curve_keys: take_front(&mut curve_keys, mesh.curve_keys.len()),
                curves: take_front(&mut curves, mesh.curves.len()),
                patches: take_front(&mut patches, mesh.patches.len()),
                patch_shader: take_front(&mut patch_shader, mesh.patches.len()),
            });
        }
    }

    progress.set_status("Updating Mesh", "Copying Mesh to device");
    jobs.par_iter_mut().map(|job| {
        if progress.get_cancel() {
            return Ok(SyncStatus::Cancelled);
        }
        job.run().map(|_| SyncStatus::Complete)
    }).reduce(|| Ok(SyncStatus::Complete), |a, b| match (a, b) {
        (Err(err), _) | (_, Err(err)) => Err(err),
        (Ok(SyncStatus::Cancelled), _) | (_, Ok(SyncStatus::Cancelled)) => Ok(SyncStatus::Cancelled),
        _ => Ok(SyncStatus::Complete)
    })
}

/// Appends attribute values to the typed attribute arrays.
pub fn pack_attribute(data: &AttributeData, element: AttributeElement, dscene: &mut DeviceScene)
    -> AttributeDescriptor
{
    match *data {
        AttributeData::Float(ref values) => {
            let offset = dscene.attributes_float.len();
            dscene.attributes_float.extend_from_slice(values);
            AttributeDescriptor {element: Some(element), data_type: AttributeType::Float, offset: offset}
        },
        AttributeData::Float2(ref values) => {
            let offset = dscene.attributes_float2.len();
            dscene.attributes_float2.extend(values.iter().map(|v| [v.x, v.y]));
            AttributeDescriptor {element: Some(element), data_type: AttributeType::Float2, offset: offset}
        },
        AttributeData::Float3(ref values) => {
            let offset = dscene.attributes_float3.len();
            dscene.attributes_float3.extend(values.iter().map(|v| v.to_float4(0.0)));
            AttributeDescriptor {element: Some(element), data_type: AttributeType::Float3, offset: offset}
        },
    }
}

/// Row of the SVM attribute map.
pub fn attribute_map_row(id: u32, desc: &AttributeDescriptor) -> [u32; 4] {
    match desc.element {
        Some(element) => [id, element.device_code(), desc.offset as u32, desc.data_type.device_code()],
        None => [id, 0, 0, 0]
    }
}

/// Appends the scene BVH followed by every mesh BVH. Node and item offsets are rebased into
/// the combined arrays and instance leaves point at their mesh's root node.
pub fn pack_bvh(scene_bvh: &Bvh, mesh_bvhs: &[(MeshId, &Bvh)], meshes: &[Mesh], objects: &[Object],
    dscene: &mut DeviceScene)
{
    dscene.bvh_nodes.clear();
    dscene.prim_index.clear();
    dscene.prim_type.clear();
    dscene.prim_object.clear();

    // Roots are known up front since each BVH is appended whole.
    let mut roots: HashMap<MeshId, usize> = HashMap::new();
    let mut next_root = scene_bvh.nodes.len();
    for &(id, bvh) in mesh_bvhs {
        roots.insert(id, next_root);
        next_root += bvh.nodes.len();
    }

    let mut append = |bvh: &Bvh, mesh: Option<MeshId>, dscene: &mut DeviceScene| {
        let node_offset = dscene.bvh_nodes.len();
        let item_offset = dscene.prim_index.len();
        for node in &bvh.nodes {
            let offset = if node.is_leaf() { item_offset } else { node_offset } + node.offset;
            dscene.bvh_nodes.push(PackedBvhNode {
                min: node.bbox.min.to_float4(0.0),
                max: node.bbox.max.to_float4(0.0),
                offset: offset as u32,
                num_items: node.num_items as u32,
                axis: node.axis as u32,
            });
        }
        for item in &bvh.items {
            let (index, prim_type, object) = match *item {
                BvhItem::Instance(o) => {
                    let root = roots.get(&objects[o].mesh).map_or(NONE, |&r| r as u32);
                    (root, PRIMITIVE_INSTANCE, o as u32)
                },
                BvhItem::Prim {object, prim} => {
                    let owner = match (object, mesh) {
                        (Some(o), _) => objects[o].mesh,
                        (None, Some(m)) => m,
                        (None, None) => continue
                    };
                    let offsets = &meshes[owner].offsets;
                    (prim.pack_index(offsets), prim.pack_type(), object.map_or(NONE, |o| o as u32))
                }
            };
            dscene.prim_index.push(index);
            dscene.prim_type.push(prim_type);
            dscene.prim_object.push(object);
        }
    };

    append(scene_bvh, None, dscene);
    for &(id, bvh) in mesh_bvhs {
        append(bvh, Some(id), dscene);
    }

    for packed in dscene.objects.iter_mut() {
        packed.bvh_root = roots.get(&(packed.mesh as usize)).map_or(NONE, |&r| r as u32);
    }
    debug!("packed {} BVH nodes over {} primitives", dscene.bvh_nodes.len(), dscene.prim_index.len());
}
