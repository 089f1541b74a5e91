pub mod attribute;
pub use self::attribute::{Attribute, AttributeData, AttributeDescriptor, AttributeElement,
        AttributeKey, AttributeRequest, AttributeRequestSet, AttributeSet, AttributeStandard,
        AttributeType, ElementCounts};

mod bvh;
pub use self::bvh::{Bvh, BvhItem, BvhNode, BvhParams, BvhReference};

mod cache;
pub use self::cache::GeometryCache;

pub mod dice;
pub use self::dice::{DicedVertex, TessellatedSubPatch};

mod mesh;
pub use self::mesh::{BvhUpdate, DisplacementMethod, GeometryFlags, Mesh, MeshId, ShaderFlags,
        SHADER_MASK, SubdivisionType, UpdateState};

mod osd;
pub use self::osd::{OsdData, PatchEvaluator};

mod prim;
pub use self::prim::{Curve, CurveKey, MeshOffsets, NO_VERTEX, Patch, Primitive, SubPatch,
        Triangle, PRIMITIVE_CURVE, PRIMITIVE_PATCH, PRIMITIVE_TRIANGLE};

mod subd;
pub use self::subd::{EdgeRateSplit, SubdSplit, UniformSplit};

pub mod util;
