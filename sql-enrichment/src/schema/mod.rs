pub mod schema_models;

pub use schema_models::{SchemaCriterion, SchemaKey, SchemaParseError, SchemaVer, SelfDescribingJson};
