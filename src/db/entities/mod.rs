//! Database entities

pub mod asset_file;
pub mod design;
pub mod model_type;

pub use asset_file::{AssetKind, Entity as AssetFile};
pub use design::Entity as Design;
pub use model_type::Entity as ModelType;
