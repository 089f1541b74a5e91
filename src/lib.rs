//! Geometry preparation for an offline ray tracer: meshes, hair curves and subdivision
//! patches are diced, indexed with bounding volume hierarchies and packed into flat device
//! buffers.

pub mod core;
pub mod error;
pub mod geom;
pub mod render;
