mod device;
pub use self::device::{ConstantImageManager, Device, ImageManager, MemoryDevice};

mod manager;
pub use self::manager::{GeometryManager, SyncState};

pub mod packer;
pub use self::packer::{DeviceScene, PackedBvhNode, PackedObject, UploadTransaction};

mod params;
pub use self::params::{BvhType, SceneParams, ShadingSystem};

mod progress;
pub use self::progress::{Progress, ProgressState, SimpleProgress};

mod scene;
pub use self::scene::{Object, Scene};

mod shader;
pub use self::shader::{DisplacePoint, DisplacementShader, Shader};
