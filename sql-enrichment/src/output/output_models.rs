use serde::Deserialize;
use std::fmt;

use crate::schema::SchemaKey;

/// `parameters.output`: how many rows the query may return and how they are
/// shaped into contexts.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Output {
    pub expected_rows: ExpectedRows,
    pub json: JsonOutput,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonOutput {
    pub schema: SchemaKey,
    pub describes: Describes,
    pub property_names: PropertyNames,
    /// Result columns to keep; all columns when absent.
    #[serde(default)]
    pub columns: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExpectedRows {
    ExactlyOne,
    AtMostOne,
    AtLeastOne,
    AtLeastZero,
}

impl ExpectedRows {
    /// Largest row count that can be enveloped, if bounded.
    pub fn max_rows(&self) -> Option<usize> {
        match self {
            ExpectedRows::ExactlyOne | ExpectedRows::AtMostOne => Some(1),
            ExpectedRows::AtLeastOne | ExpectedRows::AtLeastZero => None,
        }
    }
}

impl fmt::Display for ExpectedRows {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpectedRows::ExactlyOne => write!(f, "exactly one"),
            ExpectedRows::AtMostOne => write!(f, "at most one"),
            ExpectedRows::AtLeastOne => write!(f, "at least one"),
            ExpectedRows::AtLeastZero => write!(f, "any number"),
        }
    }
}

/// Envelope shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Describes {
    /// One context whose data is the array of all rows
    AllRows,
    /// One context per row
    EveryRow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PropertyNames {
    AsIs,
    CamelCase,
}
