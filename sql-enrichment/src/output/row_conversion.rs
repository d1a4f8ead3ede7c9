use serde_json::{Map, Value};

use crate::database::ResultRow;
use crate::output::output_models::PropertyNames;

/// Turns a result row into a JSON object, keeping only `columns` (when
/// given) and renaming keys per `names`. Later duplicates of a column name
/// overwrite earlier ones.
pub fn row_to_object(
    row: ResultRow,
    columns: Option<&[String]>,
    names: PropertyNames,
) -> Map<String, Value> {
    row.into_iter()
        .filter(|(column, _)| columns.is_none_or(|allowed| allowed.iter().any(|c| c == column)))
        .map(|(column, value)| (property_name(&column, names), value))
        .collect()
}

pub fn property_name(column: &str, names: PropertyNames) -> String {
    match names {
        PropertyNames::AsIs => column.to_string(),
        PropertyNames::CamelCase => camel_case(column),
    }
}

/// `user_id` → `userId`, `Account_Type` → `accountType`.
fn camel_case(column: &str) -> String {
    let mut out = String::with_capacity(column.len());
    for (i, segment) in column.split('_').filter(|s| !s.is_empty()).enumerate() {
        let mut chars = segment.chars();
        if let Some(first) = chars.next() {
            if i == 0 {
                out.extend(first.to_lowercase());
            } else {
                out.extend(first.to_uppercase());
            }
            out.push_str(chars.as_str());
        }
    }
    if out.is_empty() {
        column.to_string()
    } else {
        out
    }
}
