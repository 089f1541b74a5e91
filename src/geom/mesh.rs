use crate::core;
use crate::error::{Error, Result};
use crate::geom::attribute::{AttributeKey, AttributeSet, AttributeStandard, ElementCounts};
use crate::geom::bvh::{Bvh, BvhItem, BvhReference};
use crate::geom::cache::GeometryCache;
use crate::geom::dice::{self, DicedVertex, TessellatedSubPatch};
use crate::geom::osd::{OsdData, PatchEvaluator};
use crate::geom::prim::{Curve, CurveKey, MeshOffsets, NO_VERTEX, Patch, Primitive, SubPatch, Triangle};
use crate::geom::subd::SubdSplit;
use crate::render::{Progress, Scene, SceneParams};

use bitflags::bitflags;
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Index of a mesh in its scene.
pub type MeshId = usize;

bitflags! {
    /// Which kinds of geometry an entity has been given, even if currently empty.
    pub struct GeometryFlags: u32 {
        const TRIANGLES = 0b01;
        const CURVES    = 0b10;
    }
}

bitflags! {
    /// Flags packed into the upper bits of device shader ids.
    pub struct ShaderFlags: u32 {
        const SMOOTH_NORMAL = 1 << 31;
        /// Triangle winding is reversed by a baked negative-scale transform.
        const MIRRORED      = 1 << 30;
    }
}

/// Bits of a packed shader word holding the shader id.
pub const SHADER_MASK: u32 = (1 << 30) - 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubdivisionType {
    None,
    Linear,
    CatmullClark,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisplacementMethod {
    /// Perturb shading normals only.
    Bump,
    /// Move vertices.
    True,
    Both,
}

impl DisplacementMethod {
    pub fn moves_vertices(&self) -> bool {
        *self != DisplacementMethod::Bump
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateState {
    Clean,
    DirtyIncremental,
    DirtyRebuild,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BvhUpdate {
    Built,
    Refitted,
    Cancelled,
}

static NEXT_TOPOLOGY_VERSION: AtomicU64 = AtomicU64::new(1);

fn next_topology_version() -> u64 {
    NEXT_TOPOLOGY_VERSION.fetch_add(1, Ordering::Relaxed)
}

fn check_size(what: &'static str, got: usize, expected: usize) -> Result<()> {
    if got == expected {
        Ok(())
    }
    else {
        Err(Error::BufferSize {what: what, expected: expected, got: got})
    }
}

/// Largest parameter difference at which two points on a shared patch edge are the same.
const SEAM_EPSILON: f32 = 1e-5;

/// Where a diced vertex lies on its coarse patch.
enum PatchLocation {
    /// On a control vertex.
    Corner(usize),
    /// On the edge between two control vertices (lower index first), at parameter `t`
    /// measured from the lower one.
    Edge(usize, usize, f32),
    Interior,
}

fn locate(patch: &Patch, uv: core::Vec2) -> PatchLocation {
    let (u, v) = (uv.x, uv.y);
    let near = |a: f32, b: f32| (a - b).abs() <= SEAM_EPSILON;
    let sides: Vec<(usize, f32)> = if patch.is_quad() {
        [(near(v, 0.0), 0, u), (near(u, 1.0), 1, v), (near(v, 1.0), 2, 1.0 - u), (near(u, 0.0), 3, 1.0 - v)]
                .iter().filter(|s| s.0).map(|s| (s.1, s.2)).collect()
    }
    else {
        [(near(v, 0.0), 0, u), (near(u + v, 1.0), 1, v), (near(u, 0.0), 2, 1.0 - v)]
                .iter().filter(|s| s.0).map(|s| (s.1, s.2)).collect()
    };

    let corners = patch.num_corners();
    match sides.first() {
        None => PatchLocation::Interior,
        Some(&(e, t)) => {
            let a = patch.v[e] as usize;
            let b = patch.v[(e + 1) % corners] as usize;
            if t <= SEAM_EPSILON {
                PatchLocation::Corner(a)
            }
            else if t >= 1.0 - SEAM_EPSILON {
                PatchLocation::Corner(b)
            }
            else if a < b {
                PatchLocation::Edge(a, b, t)
            }
            else {
                PatchLocation::Edge(b, a, 1.0 - t)
            }
        }
    }
}

/// Maps diced vertices to output indices, merging duplicates within a patch and along
/// edges shared between patches.
#[derive(Default)]
struct Welder {
    interior: HashMap<(usize, (u32, u32)), usize>,
    corners: HashMap<usize, usize>,
    edges: HashMap<(usize, usize), Vec<(f32, usize)>>,
}

impl Welder {
    fn weld(&mut self, patch_index: usize, patch: &Patch, v: &DicedVertex, verts: &mut Vec<core::Vec>)
        -> usize
    {
        let mut push = |p: core::Vec| {
            verts.push(p);
            verts.len() - 1
        };
        match locate(patch, v.uv) {
            PatchLocation::Corner(c) => *self.corners.entry(c).or_insert_with(|| push(v.p)),
            PatchLocation::Edge(a, b, t) => {
                let seam = self.edges.entry((a, b)).or_insert_with(Vec::new);
                match seam.iter().find(|&&(s, _)| (s - t).abs() <= SEAM_EPSILON) {
                    Some(&(_, index)) => index,
                    None => {
                        let index = push(v.p);
                        seam.push((t, index));
                        index
                    }
                }
            },
            PatchLocation::Interior => {
                *self.interior.entry((patch_index, v.uv.bits())).or_insert_with(|| push(v.p))
            }
        }
    }
}

fn transform_positions(set: &mut AttributeSet, std: AttributeStandard, tfm: &core::Xform) {
    if let Some(data) = set.find_standard_mut(std).and_then(|a| a.data.as_float3_mut()) {
        for p in data.iter_mut() {
            *p = tfm.transform(p);
        }
    }
}

/// One renderable object's raw geometry: triangles, hair curves and subdivision patches,
/// plus their shading attributes.
#[derive(Clone, Debug)]
pub struct Mesh {
    pub name: String,
    pub subdivision_type: SubdivisionType,
    pub geometry_flags: GeometryFlags,

    pub verts: Vec<core::Vec>,
    pub triangles: Vec<Triangle>,
    /// Per-triangle index into `used_shaders`.
    pub shader: Vec<u32>,
    pub smooth: Vec<bool>,
    /// Patch a diced triangle came from, or `NO_VERTEX`.
    pub triangle_patch: Vec<i32>,

    pub curve_keys: Vec<CurveKey>,
    pub curves: Vec<Curve>,

    pub patches: Vec<Patch>,
    pub subpatches: Vec<SubPatch>,

    /// Scene shader ids referenced by this mesh's primitives.
    pub used_shaders: Vec<usize>,
    pub has_volume: bool,
    pub has_surface_bssrdf: bool,

    pub attributes: AttributeSet,
    pub curve_attributes: AttributeSet,

    pub bounds: core::BBox,
    pub transform_applied: bool,
    pub transform_negative_scaled: bool,
    pub transform_normal: core::Xform,

    pub displacement_method: DisplacementMethod,
    pub displacement_scale: f32,

    pub motion_steps: usize,
    pub use_motion_blur: bool,

    pub need_update: bool,
    pub need_update_rebuild: bool,
    pub offsets: MeshOffsets,
    /// Number of scene objects referencing this mesh.
    pub num_users: usize,
    /// Vertices carry displacement; the positions before it are kept in the
    /// `PositionUndisplaced` attribute. Call `undisplace` before editing `verts` by hand.
    pub displaced: bool,

    num_control_verts: usize,
    /// Object transform baked into the geometry while `transform_applied` is set.
    baked_transform: core::Xform,
    topology_version: u64,
    generated_face_normals: bool,
    generated_vertex_normals: bool,
}

impl Mesh {
    pub fn new(name: &str) -> Mesh {
        Mesh {
            name: name.to_string(),
            subdivision_type: SubdivisionType::None,
            geometry_flags: GeometryFlags::empty(),
            verts: vec![],
            triangles: vec![],
            shader: vec![],
            smooth: vec![],
            triangle_patch: vec![],
            curve_keys: vec![],
            curves: vec![],
            patches: vec![],
            subpatches: vec![],
            used_shaders: vec![],
            has_volume: false,
            has_surface_bssrdf: false,
            attributes: AttributeSet::for_triangles(),
            curve_attributes: AttributeSet::for_curves(),
            bounds: core::BBox::empty(),
            transform_applied: false,
            transform_negative_scaled: false,
            transform_normal: core::Xform::identity(),
            displacement_method: DisplacementMethod::Bump,
            displacement_scale: 1.0,
            motion_steps: 3,
            use_motion_blur: false,
            need_update: true,
            need_update_rebuild: true,
            offsets: MeshOffsets::default(),
            num_users: 0,
            displaced: false,
            num_control_verts: 0,
            baked_transform: core::Xform::identity(),
            topology_version: next_topology_version(),
            generated_face_normals: false,
            generated_vertex_normals: false,
        }
    }

    /// Sizes vertex, triangle and patch storage for `set_*` calls and reserves room for
    /// curves and curve keys appended with `add_*`.
    pub fn reserve(&mut self, num_verts: usize, num_triangles: usize, num_curves: usize,
        num_curve_keys: usize, num_patches: usize)
    {
        self.undisplace();
        self.verts.resize(num_verts, core::Vec::zero());
        self.triangles.resize(num_triangles, Triangle::default());
        self.shader.resize(num_triangles, 0);
        self.smooth.resize(num_triangles, false);
        self.triangle_patch.resize(num_triangles, NO_VERTEX);
        self.curves.reserve(num_curves);
        self.curve_keys.reserve(num_curve_keys);
        if num_patches != self.patches.len() {
            self.patches.resize(num_patches, Patch::default());
            self.topology_version = next_topology_version();
        }

        if num_verts > 0 || num_triangles > 0 || num_patches > 0 {
            self.geometry_flags |= GeometryFlags::TRIANGLES;
        }
        if num_curves > 0 || num_curve_keys > 0 {
            self.geometry_flags |= GeometryFlags::CURVES;
        }

        let counts = self.counts();
        self.attributes.resize(&counts);
        self.curve_attributes.reserve(&ElementCounts {
            curves: num_curves,
            curve_keys: num_curve_keys,
            ..counts
        });
    }

    /// Removes all geometry and attributes, keeping name and settings.
    pub fn clear(&mut self) {
        self.geometry_flags = GeometryFlags::empty();
        self.verts.clear();
        self.triangles.clear();
        self.shader.clear();
        self.smooth.clear();
        self.triangle_patch.clear();
        self.curve_keys.clear();
        self.curves.clear();
        self.patches.clear();
        self.subpatches.clear();
        self.used_shaders.clear();
        self.attributes.clear();
        self.curve_attributes.clear();
        self.bounds = core::BBox::empty();
        self.transform_applied = false;
        self.transform_negative_scaled = false;
        self.transform_normal = core::Xform::identity();
        self.baked_transform = core::Xform::identity();
        self.num_control_verts = 0;
        self.topology_version = next_topology_version();
        self.generated_face_normals = false;
        self.generated_vertex_normals = false;
        self.displaced = false;
    }

    pub fn counts(&self) -> ElementCounts {
        ElementCounts {
            verts: self.verts.len(),
            triangles: self.triangles.len(),
            curves: self.curves.len(),
            curve_keys: self.curve_keys.len(),
            motion_steps: if self.use_motion_blur { self.motion_steps } else { 0 },
        }
    }

    /// Changes whenever patch topology changes; dicing caches compare against it.
    pub fn topology_version(&self) -> u64 {
        self.topology_version
    }

    pub fn add_vertex(&mut self, p: core::Vec) -> usize {
        self.undisplace();
        let counts = self.counts();
        self.geometry_flags |= GeometryFlags::TRIANGLES;
        self.verts.push(p);
        self.attributes.add_vertex(&counts);
        self.verts.len() - 1
    }

    /// Puts back the positions saved before displacement, so the vertices hold authored
    /// geometry again.
    pub fn undisplace(&mut self) {
        if !self.displaced {
            return;
        }
        self.displaced = false;
        let saved = self.attributes.find_standard(AttributeStandard::PositionUndisplaced)
                .and_then(|attr| attr.data.as_float3());
        match saved {
            Some(saved) if saved.len() == self.verts.len() => self.verts.copy_from_slice(saved),
            _ => warn!("mesh {} has no undisplaced positions to restore", self.name)
        }
    }

    /// Saves the current positions as the undisplaced ones.
    pub fn save_undisplaced(&mut self) {
        let counts = self.counts();
        let verts = self.verts.clone();
        let attr = self.attributes.add_standard(AttributeStandard::PositionUndisplaced, &counts);
        if let Some(data) = attr.data.as_float3_mut() {
            *data = verts;
        }
    }

    fn check_triangle(&self, v0: usize, v1: usize, v2: usize) -> Result<()> {
        for &v in [v0, v1, v2].iter() {
            Error::check_index("triangle vertex", v, self.verts.len())?;
        }
        Ok(())
    }

    pub fn set_triangle(&mut self, i: usize, v0: usize, v1: usize, v2: usize, shader: u32,
        smooth: bool) -> Result<()>
    {
        Error::check_index("triangle", i, self.triangles.len())?;
        self.check_triangle(v0, v1, v2)?;
        self.triangles[i] = Triangle::new(v0, v1, v2);
        self.shader[i] = shader;
        self.smooth[i] = smooth;
        self.triangle_patch[i] = NO_VERTEX;
        Ok(())
    }

    pub fn add_triangle(&mut self, v0: usize, v1: usize, v2: usize, shader: u32, smooth: bool)
        -> Result<usize>
    {
        self.check_triangle(v0, v1, v2)?;
        self.geometry_flags |= GeometryFlags::TRIANGLES;
        self.triangles.push(Triangle::new(v0, v1, v2));
        self.shader.push(shader);
        self.smooth.push(smooth);
        self.triangle_patch.push(NO_VERTEX);
        Ok(self.triangles.len() - 1)
    }

    pub fn add_curve_key(&mut self, co: core::Vec, radius: f32) -> usize {
        self.geometry_flags |= GeometryFlags::CURVES;
        self.curve_keys.push(CurveKey::new(co, radius));
        self.curve_keys.len() - 1
    }

    /// Appends a curve over `num_keys` consecutive keys. Fewer than two keys give a curve
    /// with no segments.
    pub fn add_curve(&mut self, first_key: usize, num_keys: usize, shader: u32) -> Result<usize> {
        let end = first_key + num_keys;
        if end > self.curve_keys.len() {
            return Err(Error::out_of_range("curve key", end.saturating_sub(1), self.curve_keys.len()));
        }
        self.geometry_flags |= GeometryFlags::CURVES;
        self.curves.push(Curve {first_key: first_key, num_keys: num_keys, shader: shader});
        Ok(self.curves.len() - 1)
    }

    fn make_patch(&self, index: usize, v: [i32; 4], shader: u32, smooth: bool) -> Result<Patch> {
        for (k, &corner) in v.iter().enumerate() {
            if k == 3 && corner == NO_VERTEX {
                continue;
            }
            if corner < 0 {
                return Err(Error::MalformedPatch(index, format!("corner {} is {}", k, corner)));
            }
            Error::check_index("patch vertex", corner as usize, self.verts.len())?;
        }
        Ok(Patch {v: v, shader: shader, smooth: smooth})
    }

    /// Sets patch `i`. `v3 == NO_VERTEX` makes it a triangular patch.
    pub fn set_patch(&mut self, i: usize, v0: i32, v1: i32, v2: i32, v3: i32, shader: u32,
        smooth: bool) -> Result<()>
    {
        Error::check_index("patch", i, self.patches.len())?;
        self.patches[i] = self.make_patch(i, [v0, v1, v2, v3], shader, smooth)?;
        self.topology_version = next_topology_version();
        Ok(())
    }

    pub fn add_patch(&mut self, v0: i32, v1: i32, v2: i32, v3: i32, shader: u32, smooth: bool)
        -> Result<usize>
    {
        let patch = self.make_patch(self.patches.len(), [v0, v1, v2, v3], shader, smooth)?;
        self.geometry_flags |= GeometryFlags::TRIANGLES;
        self.patches.push(patch);
        self.topology_version = next_topology_version();
        Ok(self.patches.len() - 1)
    }

    /// Duplicates vertex `vertex` and its vertex attribute values; returns the copy's index.
    /// No primitive is re-pointed at the copy.
    pub fn split_vertex(&mut self, vertex: usize) -> Result<usize> {
        Error::check_index("vertex", vertex, self.verts.len())?;
        let counts = self.counts();
        let num_verts = self.verts.len();
        self.verts.push(self.verts[vertex]);
        self.attributes.split_vertex(vertex, &counts);
        Ok(num_verts)
    }

    /// Checks every index the mesh stores against the storage it refers to.
    pub fn validate(&self) -> Result<()> {
        check_size("triangle shaders", self.shader.len(), self.triangles.len())?;
        check_size("triangle smooth flags", self.smooth.len(), self.triangles.len())?;
        check_size("triangle patches", self.triangle_patch.len(), self.triangles.len())?;
        for tri in &self.triangles {
            self.check_triangle(tri.v[0], tri.v[1], tri.v[2])?;
        }
        for curve in &self.curves {
            let end = curve.first_key + curve.num_keys;
            if end > self.curve_keys.len() {
                return Err(Error::out_of_range("curve key", end - 1, self.curve_keys.len()));
            }
        }
        for (i, patch) in self.patches.iter().enumerate() {
            self.make_patch(i, patch.v, patch.shader, patch.smooth)?;
        }
        for sub in &self.subpatches {
            self.check_subpatch(sub)?;
        }
        Ok(())
    }

    fn motion_positions(&self) -> Option<&[core::Vec]> {
        if !self.has_motion_blur() {
            return None;
        }
        self.attributes.find_standard(AttributeStandard::MotionVertexPosition)
                .and_then(|attr| attr.data.as_float3())
    }

    fn motion_keys(&self) -> Option<&[core::Vec]> {
        if !self.has_motion_blur() {
            return None;
        }
        self.curve_attributes.find_standard(AttributeStandard::MotionVertexPosition)
                .and_then(|attr| attr.data.as_float3())
    }

    /// First vertex a primitive can reference. Tessellated meshes keep their control cage in
    /// front of the diced vertices; the cage is not part of the surface.
    fn first_surface_vert(&self) -> usize {
        if self.is_subdivided() && !self.subpatches.is_empty() && !self.triangles.is_empty() {
            self.num_control_verts.min(self.verts.len())
        }
        else {
            0
        }
    }

    /// Recomputes `bounds` from vertices, curve keys with their radii, and motion steps.
    pub fn compute_bounds(&mut self) {
        let first = self.first_surface_vert();
        let grow_all = |safe: bool| -> core::BBox {
            let mut bounds = core::BBox::empty();
            let grow = |bounds: &mut core::BBox, p: &core::Vec, radius: f32| {
                if safe {
                    bounds.grow_radius_safe(p, radius);
                }
                else {
                    bounds.grow_radius(p, radius);
                }
            };
            for v in &self.verts[first..] {
                grow(&mut bounds, v, 0.0);
            }
            for curve in &self.curves {
                for k in curve.first_key..(curve.first_key + curve.num_keys) {
                    let key = &self.curve_keys[k];
                    grow(&mut bounds, &key.co, key.radius);
                    if let Some(motion) = self.motion_keys() {
                        let num_keys = self.curve_keys.len();
                        for step in motion.chunks(num_keys.max(1)) {
                            grow(&mut bounds, &step[k], key.radius);
                        }
                    }
                }
            }
            if let Some(motion) = self.motion_positions() {
                for step in motion.chunks(self.verts.len().max(1)) {
                    for v in step.iter().skip(first) {
                        grow(&mut bounds, v, 0.0);
                    }
                }
            }
            bounds
        };

        let mut bounds = grow_all(false);
        if !bounds.is_valid() && !self.verts.is_empty() {
            // Some coordinate is not finite; skip those points.
            bounds = grow_all(true);
        }
        self.bounds = bounds;
    }

    /// Triangles and curve segments, the primitives a BVH is built over.
    pub fn primitives(&self) -> Vec<Primitive> {
        let mut prims: Vec<Primitive> = (0..self.triangles.len()).map(Primitive::Triangle).collect();
        for (i, curve) in self.curves.iter().enumerate() {
            for segment in 0..curve.num_segments() {
                prims.push(Primitive::Curve {curve: i, segment: segment});
            }
        }
        prims
    }

    /// Bounds of one primitive over all motion steps.
    pub fn prim_bounds(&self, prim: &Primitive) -> core::BBox {
        let mut bounds = core::BBox::empty();
        prim.bounds_grow(&self.verts, &self.triangles, &self.curve_keys, &self.curves,
                &self.patches, &mut bounds);
        match *prim {
            Primitive::Triangle(t) => {
                if let Some(motion) = self.motion_positions() {
                    for step in motion.chunks(self.verts.len().max(1)) {
                        self.triangles[t].bounds_grow(step, &mut bounds);
                    }
                }
            },
            Primitive::Curve {curve, segment} => {
                if let Some(motion) = self.motion_keys() {
                    let c = &self.curves[curve];
                    for step in motion.chunks(self.curve_keys.len().max(1)) {
                        for k in (c.first_key + segment)..(c.first_key + segment + 2) {
                            bounds.grow_radius(&step[k], self.curve_keys[k].radius);
                        }
                    }
                }
            },
            Primitive::Patch(_) => {}
        }
        bounds
    }

    fn flip_if_mirrored(&self, n: core::Vec) -> core::Vec {
        if self.transform_negative_scaled { -n } else { n }
    }

    /// Adds per-triangle unit normals unless the mesh already has them.
    pub fn add_face_normals(&mut self) {
        if self.attributes.find_standard(AttributeStandard::FaceNormal).is_some() {
            return;
        }
        let normals: Vec<core::Vec> = self.triangles.iter()
                .map(|tri| self.flip_if_mirrored(tri.area_normal(&self.verts).normalized()))
                .collect();
        let counts = self.counts();
        let attr = self.attributes.add_standard(AttributeStandard::FaceNormal, &counts);
        if let Some(data) = attr.data.as_float3_mut() {
            *data = normals;
        }
        self.generated_face_normals = true;
    }

    /// Area-weighted vertex normals: the unnormalized face normals (whose length is twice the
    /// face area) around each vertex are summed, then normalized.
    fn vertex_normals(&self, positions: &[core::Vec]) -> Vec<core::Vec> {
        let mut normals = vec![core::Vec::zero(); positions.len()];
        for tri in &self.triangles {
            let n = tri.area_normal(positions);
            for &v in tri.v.iter() {
                normals[v] = normals[v] + n;
            }
        }
        normals.iter().map(|n| self.flip_if_mirrored(n.normalized())).collect()
    }

    /// Adds vertex normals, and motion-step normals for motion-blurred meshes, unless the
    /// mesh already has them.
    pub fn add_vertex_normals(&mut self) {
        let counts = self.counts();
        if self.attributes.find_standard(AttributeStandard::VertexNormal).is_none() {
            let normals = self.vertex_normals(&self.verts);
            let attr = self.attributes.add_standard(AttributeStandard::VertexNormal, &counts);
            if let Some(data) = attr.data.as_float3_mut() {
                *data = normals;
            }
            self.generated_vertex_normals = true;
        }

        if self.attributes.find_standard(AttributeStandard::MotionVertexNormal).is_none() {
            let normals = match self.motion_positions() {
                Some(motion) => motion.chunks(self.verts.len().max(1))
                        .flat_map(|step| self.vertex_normals(step))
                        .collect::<Vec<core::Vec>>(),
                None => return
            };
            let attr = self.attributes.add_standard(AttributeStandard::MotionVertexNormal, &counts);
            if let Some(data) = attr.data.as_float3_mut() {
                *data = normals;
            }
        }
    }

    /// Drops normals computed by `add_face_normals` and `add_vertex_normals`, keeping any
    /// supplied with the geometry.
    pub fn clear_generated_normals(&mut self) {
        if self.generated_face_normals {
            self.attributes.remove_standard(AttributeStandard::FaceNormal);
            self.generated_face_normals = false;
        }
        if self.generated_vertex_normals {
            self.attributes.remove_standard(AttributeStandard::VertexNormal);
            self.attributes.remove_standard(AttributeStandard::MotionVertexNormal);
            self.generated_vertex_normals = false;
        }
    }

    fn packed_shader(&self, local: u32, smooth: bool) -> u32 {
        let global = self.used_shaders.get(local as usize).cloned().unwrap_or(0) as u32;
        let mut flags = ShaderFlags::empty();
        if smooth {
            flags |= ShaderFlags::SMOOTH_NORMAL;
        }
        if self.transform_negative_scaled {
            flags |= ShaderFlags::MIRRORED;
        }
        (global & SHADER_MASK) | flags.bits()
    }

    /// Writes per-triangle packed shader words and per-vertex normals.
    pub fn pack_normals(&self, tri_shader: &mut [u32], vnormal: &mut [[f32; 4]]) -> Result<()> {
        check_size("triangle shaders", tri_shader.len(), self.triangles.len())?;
        check_size("vertex normals", vnormal.len(), self.verts.len())?;

        for (i, out) in tri_shader.iter_mut().enumerate() {
            *out = self.packed_shader(self.shader[i], self.smooth[i]);
        }

        let normals = self.attributes.find_standard(AttributeStandard::VertexNormal)
                .and_then(|attr| attr.data.as_float3());
        for (i, out) in vnormal.iter_mut().enumerate() {
            let n = normals.and_then(|n| n.get(i)).cloned().unwrap_or_else(core::Vec::zero);
            *out = n.to_float4(0.0);
        }
        Ok(())
    }

    /// Writes vertex positions and triangle vertex indices rebased to the global vertex
    /// offset. The fourth index is the global patch of a diced triangle, or `u32::MAX`.
    pub fn pack_verts(&self, tri_verts: &mut [[f32; 4]], tri_vindex: &mut [[u32; 4]],
        vert_offset: usize, patch_offset: usize) -> Result<()>
    {
        check_size("vertices", tri_verts.len(), self.verts.len())?;
        check_size("triangle indices", tri_vindex.len(), self.triangles.len())?;

        for (out, v) in tri_verts.iter_mut().zip(self.verts.iter()) {
            *out = v.to_float4(0.0);
        }
        for (i, out) in tri_vindex.iter_mut().enumerate() {
            let tri = &self.triangles[i];
            let patch = match self.triangle_patch[i] {
                p if p >= 0 => (patch_offset + p as usize) as u32,
                _ => std::u32::MAX
            };
            *out = [
                (vert_offset + tri.v[0]) as u32,
                (vert_offset + tri.v[1]) as u32,
                (vert_offset + tri.v[2]) as u32,
                patch];
        }
        Ok(())
    }

    /// Writes curve keys as (position, radius) and curves as (first key, key count, shader).
    pub fn pack_curves(&self, keys_out: &mut [[f32; 4]], curves_out: &mut [[u32; 4]],
        key_offset: usize) -> Result<()>
    {
        check_size("curve keys", keys_out.len(), self.curve_keys.len())?;
        check_size("curves", curves_out.len(), self.curves.len())?;

        for (out, key) in keys_out.iter_mut().zip(self.curve_keys.iter()) {
            *out = key.to_float4();
        }
        for (out, curve) in curves_out.iter_mut().zip(self.curves.iter()) {
            *out = [
                (key_offset + curve.first_key) as u32,
                curve.num_keys as u32,
                self.packed_shader(curve.shader, true),
                0];
        }
        Ok(())
    }

    /// Writes coarse patch corners rebased to the global vertex offset, and patch shaders.
    pub fn pack_patches(&self, patch_verts: &mut [[u32; 4]], patch_shader: &mut [u32],
        vert_offset: usize) -> Result<()>
    {
        check_size("patch corners", patch_verts.len(), self.patches.len())?;
        check_size("patch shaders", patch_shader.len(), self.patches.len())?;

        for (i, patch) in self.patches.iter().enumerate() {
            let mut corners = [std::u32::MAX; 4];
            for (k, &v) in patch.corners().iter().enumerate() {
                corners[k] = (vert_offset + v as usize) as u32;
            }
            patch_verts[i] = corners;
            patch_shader[i] = self.packed_shader(patch.shader, patch.smooth);
        }
        Ok(())
    }

    fn bvh_references(&self) -> Vec<BvhReference> {
        self.primitives().into_iter().map(|prim| {
            BvhReference::new(BvhItem::Prim {object: None, prim: prim}, self.prim_bounds(&prim))
        }).collect()
    }

    fn item_bounds(&self, item: &BvhItem) -> core::BBox {
        match *item {
            BvhItem::Prim {prim, ..} => self.prim_bounds(&prim),
            BvhItem::Instance(_) => core::BBox::empty()
        }
    }

    /// Builds this mesh's own BVH into `slot`, or refits the existing one when the scene
    /// allows it and no rebuild was requested. This is mesh `n` of `total` being processed.
    pub fn compute_bvh(&self, slot: &mut Option<Bvh>, params: &SceneParams, progress: &dyn Progress,
        n: usize, total: usize) -> BvhUpdate
    {
        if progress.get_cancel() {
            return BvhUpdate::Cancelled;
        }
        progress.set_status("Updating Mesh BVH", &format!("{} {}/{}", self.name, n + 1, total));

        let num_prims = self.triangles.len()
                + self.curves.iter().map(|c| c.num_segments()).sum::<usize>();
        if params.allows_refit() && !self.need_update_rebuild {
            if let Some(bvh) = slot.as_mut() {
                if bvh.items.len() == num_prims {
                    bvh.refit(|item| self.item_bounds(item));
                    debug!("refit BVH of mesh {}", self.name);
                    return BvhUpdate::Refitted;
                }
            }
        }

        match Bvh::build(self.bvh_references(), &params.bvh_params(), progress) {
            Some(bvh) => {
                *slot = Some(bvh);
                BvhUpdate::Built
            },
            None => {
                *slot = None;
                BvhUpdate::Cancelled
            }
        }
    }

    /// True if some shader this mesh uses consumes the attribute.
    pub fn need_attribute(&self, scene: &Scene, key: &AttributeKey) -> bool {
        self.used_shaders.iter().any(|&s| {
            scene.shaders.get(s).map_or(false, |shader| shader.attributes.find(key))
        })
    }

    pub fn need_standard_attribute(&self, scene: &Scene, std: AttributeStandard) -> bool {
        self.need_attribute(scene, &AttributeKey::Standard(std))
    }

    /// Marks the mesh for resynchronization; `rebuild` also forces its BVH to be rebuilt.
    pub fn tag_update(&mut self, rebuild: bool) {
        self.need_update = true;
        if rebuild {
            self.need_update_rebuild = true;
        }
    }

    pub fn update_state(&self) -> UpdateState {
        match (self.need_update, self.need_update_rebuild) {
            (false, _) => UpdateState::Clean,
            (true, false) => UpdateState::DirtyIncremental,
            (true, true) => UpdateState::DirtyRebuild,
        }
    }

    pub fn has_motion_blur(&self) -> bool {
        self.use_motion_blur && self.motion_steps > 1
    }

    pub fn is_instanced(&self) -> bool {
        self.num_users > 1
    }

    /// True if the mesh needs a BVH of its own: it is shared between objects, or its
    /// subsurface rays must stay on this surface.
    pub fn need_build_bvh(&self) -> bool {
        self.is_instanced() || self.has_surface_bssrdf
    }

    pub fn is_subdivided(&self) -> bool {
        self.subdivision_type != SubdivisionType::None && !self.patches.is_empty()
    }

    pub fn update_osd<'a>(&self, id: MeshId, cache: &'a mut GeometryCache) -> &'a OsdData {
        cache.osd_data(id, self)
    }

    pub fn free_osd_data(&self, id: MeshId, cache: &mut GeometryCache) {
        cache.free_osd_data(id);
    }

    fn check_subpatch(&self, sub: &SubPatch) -> Result<()> {
        Error::check_index("sub-patch parent", sub.patch, self.patches.len())?;
        if sub.is_quad() != self.patches[sub.patch].is_quad() {
            return Err(Error::MalformedPatch(sub.patch,
                    "sub-patch and patch disagree on quad-ness".to_string()));
        }
        Ok(())
    }

    /// Replaces `subpatches` with the splitter's output for every patch.
    pub fn split_patches(&mut self, splitter: &dyn SubdSplit, eval: &dyn PatchEvaluator)
        -> Result<()>
    {
        let mut subpatches = Vec::with_capacity(self.patches.len());
        for p in 0..self.patches.len() {
            let first = subpatches.len();
            splitter.split(self, eval, p, &mut subpatches);
            for sub in &subpatches[first..] {
                if sub.patch != p {
                    return Err(Error::MalformedPatch(p,
                            format!("split produced a sub-patch of patch {}", sub.patch)));
                }
                self.check_subpatch(sub)?;
            }
        }
        debug!("split {} patches of mesh {} into {} sub-patches",
                self.patches.len(), self.name, subpatches.len());
        self.subpatches = subpatches;
        Ok(())
    }

    /// Vertex and triangle counts of dicing sub-patch `id`.
    pub fn diced_subpatch_size(&self, id: usize) -> Result<(usize, usize)> {
        Error::check_index("sub-patch", id, self.subpatches.len())?;
        Ok(dice::diced_size(&self.subpatches[id]))
    }

    pub fn dice_subpatch(&self, out: &mut TessellatedSubPatch, id: usize,
        eval: &dyn PatchEvaluator) -> Result<()>
    {
        Error::check_index("sub-patch", id, self.subpatches.len())?;
        let sub = &self.subpatches[id];
        self.check_subpatch(sub)?;
        dice::dice(sub, eval, out)
    }

    /// Dices every sub-patch and makes the result this mesh's triangles. Control vertices
    /// are kept in front of the diced ones. Diced vertices at the same patch parameter are
    /// welded, and so are vertices on an edge shared by two patches, so the result is closed
    /// by index across patch boundaries.
    pub fn tessellate(&mut self, eval: &dyn PatchEvaluator) -> Result<()> {
        if self.num_control_verts == 0 {
            self.num_control_verts = self.verts.len();
        }
        let mut verts: Vec<core::Vec> = self.verts[..self.num_control_verts.min(self.verts.len())]
                .to_vec();
        let mut triangles = vec![];
        let mut shader = vec![];
        let mut smooth = vec![];
        let mut triangle_patch = vec![];
        let mut welder = Welder::default();

        for id in 0..self.subpatches.len() {
            let (num_verts, num_triangles) = self.diced_subpatch_size(id)?;
            let mut out = TessellatedSubPatch::alloc(num_verts, num_triangles);
            self.dice_subpatch(&mut out, id, eval)?;

            let patch = &self.patches[out.patch];
            let indices: Vec<usize> = out.verts().iter()
                    .map(|v| welder.weld(out.patch, patch, v, &mut verts))
                    .collect();
            for tri in out.triangles() {
                triangles.push(Triangle::new(
                        indices[tri[0] as usize], indices[tri[1] as usize], indices[tri[2] as usize]));
                shader.push(patch.shader);
                smooth.push(patch.smooth);
                triangle_patch.push(out.patch as i32);
            }
        }

        debug!("tessellated mesh {}: {} sub-patches into {} triangles",
                self.name, self.subpatches.len(), triangles.len());
        self.verts = verts;
        self.triangles = triangles;
        self.shader = shader;
        self.smooth = smooth;
        self.triangle_patch = triangle_patch;
        self.geometry_flags |= GeometryFlags::TRIANGLES;

        self.attributes.remove_standard(AttributeStandard::VertexNormal);
        self.attributes.remove_standard(AttributeStandard::FaceNormal);
        self.attributes.remove_standard(AttributeStandard::MotionVertexNormal);
        self.generated_face_normals = false;
        self.generated_vertex_normals = false;
        self.displaced = false;
        let counts = self.counts();
        self.attributes.resize(&counts);
        Ok(())
    }

    /// Bakes an object transform into the geometry. Curve radii scale by the transform's
    /// uniform scale.
    pub fn apply_transform(&mut self, tfm: &core::Xform) {
        self.transform_geometry(tfm);
        self.transform_applied = true;
        self.transform_negative_scaled = tfm.is_negative_scaled();
        self.transform_normal = tfm.normal_xform();
        self.baked_transform = *tfm;
        self.compute_bounds();
    }

    /// The object transform baked into the geometry, if any.
    pub fn baked_transform(&self) -> Option<&core::Xform> {
        if self.transform_applied { Some(&self.baked_transform) } else { None }
    }

    /// Takes a baked transform back out of the geometry so the mesh can be instanced or its
    /// object moved. The mesh is tagged for a rebuild.
    pub fn undo_transform(&mut self) {
        if !self.transform_applied {
            return;
        }
        let inverse = self.baked_transform.inverse();
        self.transform_geometry(&inverse);
        self.transform_applied = false;
        self.transform_negative_scaled = false;
        self.transform_normal = core::Xform::identity();
        self.baked_transform = core::Xform::identity();
        self.compute_bounds();
        self.tag_update(true);
    }

    fn transform_geometry(&mut self, tfm: &core::Xform) {
        for v in self.verts.iter_mut() {
            *v = tfm.transform(v);
        }
        let radius_scale = tfm.mat().get_determinant3x3().abs().cbrt();
        for key in self.curve_keys.iter_mut() {
            key.co = tfm.transform(&key.co);
            key.radius *= radius_scale;
        }

        let normal_xform = tfm.normal_xform();
        transform_positions(&mut self.attributes, AttributeStandard::MotionVertexPosition, tfm);
        transform_positions(&mut self.attributes, AttributeStandard::PositionUndisplaced, tfm);
        transform_positions(&mut self.curve_attributes, AttributeStandard::MotionVertexPosition, tfm);
        for attr in [AttributeStandard::VertexNormal, AttributeStandard::FaceNormal,
            AttributeStandard::MotionVertexNormal].iter()
        {
            if let Some(data) = self.attributes.find_standard_mut(*attr)
                    .and_then(|a| a.data.as_float3_mut())
            {
                for n in data.iter_mut() {
                    *n = normal_xform.transform_dir(n).normalized();
                }
            }
        }
    }
}
