pub mod bitmask;
pub mod edit;
pub mod error;
pub mod field_value;
pub mod fieldmap;
pub mod ids;

pub use bitmask::BitMask;
pub use edit::{ChangeSet, EditAction, EditRecord, EntityKind, RelationItem, RelationKind};
pub use error::CoreError;
pub use field_value::FieldValue;
pub use ids::*;
