pub mod envelope;
pub mod output_models;
pub mod row_conversion;

pub use output_models::{Describes, ExpectedRows, JsonOutput, Output, PropertyNames};
pub use row_conversion::row_to_object;
