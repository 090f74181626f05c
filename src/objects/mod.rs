//! Object system - world objects, templates, ids and the resident registry

mod ids;
mod object;
mod path;
mod planet;
mod registry;
mod store;
mod template;

pub use ids::IdAllocator;
pub use object::{
    Attachment, ObjectId, ObjectSummary, Point3D, Quaternion, Variant, WorldObject,
};
pub use path::{script_location, validate_template_path, ScriptLocation, TemplatePathError};
pub use planet::{Planet, Planets};
pub use registry::{LinkReport, ObjectRegistry};
pub use store::{EntityStore, StoredObject};
pub use template::{classify, template_crc, ObjectKind, TemplateInfo, TemplateTable};
