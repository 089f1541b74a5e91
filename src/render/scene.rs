use crate::core;
use crate::error::{Error, Result};
use crate::geom::{Mesh, MeshId};
use crate::render::{ImageManager, SceneParams, Shader};

/// An instance of a mesh placed in the scene.
#[derive(Clone, Debug)]
pub struct Object {
    pub name: String,
    pub mesh: MeshId,
    pub tfm: core::Xform,
    pub use_motion: bool,
    /// World-space bounds, set during synchronization.
    pub bounds: core::BBox,
}

impl Object {
    pub fn new(name: &str, mesh: MeshId, tfm: core::Xform) -> Object {
        Object {
            name: name.to_string(),
            mesh: mesh,
            tfm: tfm,
            use_motion: false,
            bounds: core::BBox::empty(),
        }
    }
}

/// Owns meshes, objects and shaders. Meshes refer to shaders and objects refer to meshes by
/// index.
pub struct Scene {
    pub params: SceneParams,
    pub meshes: Vec<Mesh>,
    pub objects: Vec<Object>,
    pub shaders: Vec<Shader>,
    pub image_manager: Option<Box<dyn ImageManager>>,
}

impl Scene {
    pub fn new(params: SceneParams) -> Scene {
        Scene {
            params: params,
            meshes: vec![],
            objects: vec![],
            shaders: vec![],
            image_manager: None,
        }
    }

    pub fn add_mesh(&mut self, mesh: Mesh) -> MeshId {
        self.meshes.push(mesh);
        self.meshes.len() - 1
    }

    pub fn add_shader(&mut self, shader: Shader) -> usize {
        self.shaders.push(shader);
        self.shaders.len() - 1
    }

    pub fn add_object(&mut self, object: Object) -> Result<usize> {
        Error::check_index("mesh", object.mesh, self.meshes.len())?;
        self.meshes[object.mesh].num_users += 1;
        self.objects.push(object);
        Ok(self.objects.len() - 1)
    }

    pub fn mesh(&self, id: MeshId) -> Result<&Mesh> {
        self.meshes.get(id).ok_or_else(|| Error::out_of_range("mesh", id, self.meshes.len()))
    }

    pub fn mesh_mut(&mut self, id: MeshId) -> Result<&mut Mesh> {
        let len = self.meshes.len();
        self.meshes.get_mut(id).ok_or_else(|| Error::out_of_range("mesh", id, len))
    }
}
