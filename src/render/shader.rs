use crate::core;
use crate::error::Result;
use crate::geom::{AttributeKey, AttributeRequestSet, AttributeStandard};

/// A surface point handed to a displacement shader.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DisplacePoint {
    pub object: usize,
    pub vertex: usize,
    pub p: core::Vec,
    pub n: core::Vec,
}

/// Evaluates displacement at surface points. Implementations return the world-space offset
/// to add to the point, or an error if the shader cannot be evaluated.
pub trait DisplacementShader: Send + Sync {
    fn eval(&self, point: &DisplacePoint) -> Result<core::Vec>;
}

impl<F> DisplacementShader for F where F: Fn(&DisplacePoint) -> Result<core::Vec> + Send + Sync {
    fn eval(&self, point: &DisplacePoint) -> Result<core::Vec> {
        self(point)
    }
}

/// What the geometry side needs to know about a shader.
pub struct Shader {
    pub name: String,
    /// Attributes the shader reads.
    pub attributes: AttributeRequestSet,
    pub displacement: Option<Box<dyn DisplacementShader>>,
    pub has_surface_bssrdf: bool,
    pub has_volume: bool,
    /// Image slots sampled by the displacement shader.
    pub displacement_images: Vec<usize>,
}

impl Shader {
    pub fn new(name: &str) -> Shader {
        Shader {
            name: name.to_string(),
            attributes: AttributeRequestSet::new(),
            displacement: None,
            has_surface_bssrdf: false,
            has_volume: false,
            displacement_images: vec![],
        }
    }

    pub fn with_attribute(mut self, key: AttributeKey) -> Shader {
        self.attributes.add(key);
        self
    }

    pub fn with_standard_attribute(mut self, std: AttributeStandard) -> Shader {
        self.attributes.add_standard(std);
        self
    }

    pub fn with_displacement(mut self, displacement: Box<dyn DisplacementShader>) -> Shader {
        self.displacement = Some(displacement);
        self
    }

    pub fn with_surface_bssrdf(mut self) -> Shader {
        self.has_surface_bssrdf = true;
        self
    }

    pub fn with_volume(mut self) -> Shader {
        self.has_volume = true;
        self
    }

    pub fn with_displacement_image(mut self, slot: usize) -> Shader {
        self.displacement_images.push(slot);
        self
    }

    pub fn has_displacement(&self) -> bool {
        self.displacement.is_some()
    }
}
