use crate::geom::BvhParams;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BvhType {
    /// Rebuild on every geometry change.
    Static,
    /// Refit when only vertex positions changed.
    Dynamic,
}

/// Shader backend whose attribute lookup tables get packed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShadingSystem {
    Svm,
    Osl,
}

/// Scene-wide settings for geometry synchronization.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SceneParams {
    pub bvh_type: BvhType,
    pub max_leaf_size: usize,
    pub sah_buckets: usize,
    pub parallel_build_threshold: usize,
    /// Keep dicing caches between synchronization passes.
    pub persistent_data: bool,
    /// Bake transforms of meshes used by a single object into their vertices.
    pub apply_static_transforms: bool,
    pub shading_system: ShadingSystem,
}

impl Default for SceneParams {
    fn default() -> SceneParams {
        let bvh = BvhParams::default();
        SceneParams {
            bvh_type: BvhType::Static,
            max_leaf_size: bvh.max_leaf_size,
            sah_buckets: bvh.num_buckets,
            parallel_build_threshold: bvh.parallel_build_threshold,
            persistent_data: false,
            apply_static_transforms: true,
            shading_system: ShadingSystem::Svm,
        }
    }
}

impl SceneParams {
    pub fn with_bvh_type(mut self, bvh_type: BvhType) -> SceneParams {
        self.bvh_type = bvh_type;
        self
    }

    pub fn with_max_leaf_size(mut self, max_leaf_size: usize) -> SceneParams {
        self.max_leaf_size = max_leaf_size.max(1);
        self
    }

    pub fn with_sah_buckets(mut self, sah_buckets: usize) -> SceneParams {
        self.sah_buckets = sah_buckets.max(2);
        self
    }

    pub fn with_parallel_build_threshold(mut self, threshold: usize) -> SceneParams {
        self.parallel_build_threshold = threshold;
        self
    }

    pub fn with_persistent_data(mut self, persistent_data: bool) -> SceneParams {
        self.persistent_data = persistent_data;
        self
    }

    pub fn with_apply_static_transforms(mut self, apply: bool) -> SceneParams {
        self.apply_static_transforms = apply;
        self
    }

    pub fn with_shading_system(mut self, shading_system: ShadingSystem) -> SceneParams {
        self.shading_system = shading_system;
        self
    }

    pub fn allows_refit(&self) -> bool {
        self.bvh_type == BvhType::Dynamic
    }

    pub fn bvh_params(&self) -> BvhParams {
        BvhParams {
            max_leaf_size: self.max_leaf_size,
            num_buckets: self.sah_buckets,
            parallel_build_threshold: self.parallel_build_threshold
        }
    }
}
