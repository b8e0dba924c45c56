pub mod field;
pub mod record;
pub mod resource;

pub use field::{catch_all_field, identity_field, Field, FieldSet, FieldStyle, CATCH_ALL};
pub use record::{Attributes, Record, RecordValues};
pub use resource::ModelSpec;
