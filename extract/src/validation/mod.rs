//! JSON Schema validation for directives documents.
//!
//! The schema is embedded at compile time from `schemas/directives.json` and
//! checked with JSON Schema Draft 7. Regex pairs only need to be string arrays
//! here; their length is checked when the conversion directives are compiled.
//!
//! # Example
//!
//! ```rust,ignore
//! use serde_json::json;
//! use tagsheet::validation::validate_directives;
//!
//! let doc = json!({
//!     "conversion": { "sample": { "id": { "exact": { "S1": { "assign": { "id": "S01" } } } } } }
//! });
//! assert!(validate_directives(&doc).is_ok());
//! ```

use once_cell::sync::Lazy;
use serde_json::Value;

static DIRECTIVES_SCHEMA: Lazy<Value> = Lazy::new(|| {
    serde_json::from_str(include_str!("../../schemas/directives.json")).expect("Invalid embedded schema")
});

/// Validate `data` against `schema`, collecting every error message.
pub fn validate(schema: &Value, data: &Value) -> Result<(), Vec<String>> {
    let validator = jsonschema::draft7::new(schema).map_err(|e| vec![format!("Invalid schema: {}", e)])?;

    let errors: Vec<String> = validator
        .iter_errors(data)
        .map(|e| e.to_string())
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Quick yes/no check.
pub fn is_valid(schema: &Value, data: &Value) -> bool {
    jsonschema::draft7::is_valid(schema, data)
}

/// Validate a directives document.
pub fn validate_directives(data: &Value) -> Result<(), Vec<String>> {
    validate(&DIRECTIVES_SCHEMA, data)
}

pub fn is_valid_directives(data: &Value) -> bool {
    is_valid(&DIRECTIVES_SCHEMA, data)
}
