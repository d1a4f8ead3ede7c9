use serde_json::{Map, Value};

use crate::api::errors::EnvelopeError;
use crate::database::ResultRow;
use crate::output::output_models::{Describes, Output};
use crate::output::row_conversion::row_to_object;
use crate::schema::SelfDescribingJson;

impl Output {
    /// Converts raw result rows into JSON objects, preserving row order.
    pub fn convert(&self, rows: Vec<ResultRow>) -> Vec<Map<String, Value>> {
        let columns = self.json.columns.as_deref();
        rows.into_iter()
            .map(|row| row_to_object(row, columns, self.json.property_names))
            .collect()
    }

    /// Wraps converted rows into contexts of the configured shape.
    ///
    /// Zero rows always yields an empty list. More rows than `expectedRows`
    /// allows is an error.
    pub fn envelope(
        &self,
        rows: Vec<Map<String, Value>>,
    ) -> Result<Vec<SelfDescribingJson>, EnvelopeError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        if let Some(max) = self.expected_rows.max_rows() {
            if rows.len() > max {
                return Err(EnvelopeError::TooManyRows {
                    expected: self.expected_rows,
                    actual: rows.len(),
                });
            }
        }

        let schema = &self.json.schema;
        let contexts = match self.json.describes {
            Describes::AllRows => vec![SelfDescribingJson::new(
                schema.clone(),
                Value::Array(rows.into_iter().map(Value::Object).collect()),
            )],
            Describes::EveryRow => rows
                .into_iter()
                .map(|row| SelfDescribingJson::new(schema.clone(), Value::Object(row)))
                .collect(),
        };
        Ok(contexts)
    }
}
