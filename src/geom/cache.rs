use crate::geom::bvh::Bvh;
use crate::geom::mesh::{Mesh, MeshId};
use crate::geom::osd::OsdData;

use std::collections::HashMap;

/// Derived per-mesh artifacts, keyed by mesh id and owned outside the meshes themselves.
///
/// Dicing data is tagged with the topology version it was built from and rebuilt on demand
/// when the mesh's patches change.
#[derive(Debug, Default)]
pub struct GeometryCache {
    osd: HashMap<MeshId, OsdData>,
    bvh: HashMap<MeshId, Bvh>,
}

impl GeometryCache {
    pub fn new() -> GeometryCache {
        GeometryCache::default()
    }

    /// Returns dicing data for the mesh, building it if missing or stale.
    pub fn osd_data(&mut self, id: MeshId, mesh: &Mesh) -> &OsdData {
        let version = mesh.topology_version();
        let stale = match self.osd.get(&id) {
            Some(osd) => osd.topology_version != version,
            None => true
        };
        if stale {
            self.osd.insert(id, OsdData::build(mesh));
        }
        &self.osd[&id]
    }

    pub fn has_osd_data(&self, id: MeshId) -> bool {
        self.osd.contains_key(&id)
    }

    pub fn free_osd_data(&mut self, id: MeshId) {
        self.osd.remove(&id);
    }

    pub fn bvh(&self, id: MeshId) -> Option<&Bvh> {
        self.bvh.get(&id)
    }

    /// Removes the mesh's BVH so it can be rebuilt outside the cache.
    pub fn take_bvh(&mut self, id: MeshId) -> Option<Bvh> {
        self.bvh.remove(&id)
    }

    pub fn insert_bvh(&mut self, id: MeshId, bvh: Bvh) {
        self.bvh.insert(id, bvh);
    }

    /// Drops everything derived from the mesh.
    pub fn invalidate(&mut self, id: MeshId) {
        self.osd.remove(&id);
        self.bvh.remove(&id);
    }

    /// Drops dicing data only; BVHs survive across passes.
    pub fn clear_osd(&mut self) {
        self.osd.clear();
    }

    pub fn clear(&mut self) {
        self.osd.clear();
        self.bvh.clear();
    }
}
