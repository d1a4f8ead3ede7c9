pub mod input_models;
pub mod input_operations;

pub use input_models::{
    EventContext, EventFields, Input, InputSource, JsonField, Placeholder, PlaceholderMap,
    PlaceholderValue,
};
pub use input_operations::{build_placeholder_map, validate_json_path};
