//! Directives: declarative rules applied before (tagging) and after
//! (conversion) materialization.
//!
//! Directives come from JSON documents checked against the embedded schema,
//! or, for conversion directives, from tagged worksheets.

pub mod model;
pub mod regex_cache;
pub mod sheet;

use std::path::Path;

use serde_json::Value;

use crate::error::{DirectiveError, DirectiveResult, PipelineResult};
use crate::parser::{load_worksheet, SourceSpec};
use crate::validation::validate_directives;

pub use model::{
    Comparison, ConversionDirectives, DirectivesDocument, HeaderTagDescription, KeyedOperations, MatchKind,
    OperationSet, TaggingGroup,
};
pub use regex_cache::{normalize_replacement, RegexCache};
pub use sheet::compile_conversion_sheet;

/// Parse and validate a JSON directives document.
pub fn parse_directives_json(text: &str) -> DirectiveResult<DirectivesDocument> {
    let value: Value = serde_json::from_str(text)?;
    directives_from_value(value)
}

/// Validate an already parsed JSON value.
pub fn directives_from_value(value: Value) -> DirectiveResult<DirectivesDocument> {
    validate_directives(&value).map_err(|errors| DirectiveError::Schema { errors })?;
    Ok(serde_json::from_value(value)?)
}

/// Load directives from a `.json` document or a tagged worksheet.
pub fn load_directives(spec: &str) -> PipelineResult<DirectivesDocument> {
    let path = &SourceSpec::parse(spec).path;
    let is_json = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));

    let document = if is_json {
        let text = std::fs::read_to_string(path)?;
        parse_directives_json(&text)?
    } else {
        let sheet = load_worksheet(spec)?;
        DirectivesDocument {
            conversion: compile_conversion_sheet(&sheet)?,
            tagging: Vec::new(),
        }
    };

    tracing::info!(
        "Loaded {} conversion directive(s) and {} tagging group(s) from '{}'",
        document.conversion_count(),
        document.tagging.len(),
        spec
    );
    Ok(document)
}
