//! High-level pipeline API: tagged sources to an extraction store.
//!
//! Combines every step for a batch of sources:
//! loading, tagging directives, materialization, conversion directives and
//! table filtering.
//!
//! # Example
//!
//! ```rust,ignore
//! use tagsheet::pipeline::{extract_sources, ExtractOptions};
//! use tagsheet::Diagnostics;
//!
//! let mut diagnostics = Diagnostics::new(false);
//! let result = extract_sources(
//!     &["samples.csv".to_string()],
//!     None,
//!     &ExtractOptions::default(),
//!     &mut diagnostics,
//! )?;
//! println!("{}", result.store.to_json()?);
//! ```

use serde::{Deserialize, Serialize};

use crate::diagnostics::Diagnostics;
use crate::directives::DirectivesDocument;
use crate::error::{PipelineError, PipelineResult};
use crate::parser::load_worksheet;
use crate::store::{filter_tables, ExtractionStore, TableHierarchy};
use crate::tags::{MaterializeSummary, Materializer};

use super::conversion::{apply_conversion, ConversionReport};
use super::tagging::{apply_tagging, TaggingSummary};

/// Options for the extraction pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractOptions {
    /// Table ranks used for project/study id propagation
    pub hierarchy: TableHierarchy,

    /// Attach the last seen project/study id to lower-ranked records
    pub propagate_ids: bool,

    /// Collect warnings without logging them
    pub silent: bool,

    /// Keep only these tables (empty keeps all)
    pub keep_tables: Vec<String>,

    /// Drop these tables
    pub delete_tables: Vec<String>,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            hierarchy: TableHierarchy::default(),
            propagate_ids: true,
            silent: false,
            keep_tables: Vec::new(),
            delete_tables: Vec::new(),
        }
    }
}

/// Per-source statistics.
#[derive(Debug, Clone, Serialize)]
pub struct SourceInfo {
    pub source: String,
    pub sheet: String,
    pub rows: usize,
    pub headers: usize,
    pub records: usize,
    pub headers_tagged: usize,
}

/// Result of a complete extraction
#[derive(Debug, Clone)]
pub struct ExtractionResult {
    pub store: ExtractionStore,

    /// One entry per source, in input order
    pub sources: Vec<SourceInfo>,

    /// Present when conversion directives were given
    pub conversion: Option<ConversionReport>,
}

impl ExtractionResult {
    pub fn summary(&self) -> String {
        format!(
            "Extracted: {} sources, {} tables, {} records",
            self.sources.len(),
            self.store.tables().len(),
            self.store.record_count()
        )
    }
}

/// Extract every source into one store.
///
/// Each source is loaded, tagged (when tagging directives are given) and
/// materialized in order; conversion directives then run once over the
/// whole store, and table filters apply last.
pub fn extract_sources(
    sources: &[String],
    directives: Option<&DirectivesDocument>,
    options: &ExtractOptions,
    diagnostics: &mut Diagnostics,
) -> PipelineResult<ExtractionResult> {
    if sources.is_empty() {
        return Err(PipelineError::EmptyInput);
    }

    let mut store = ExtractionStore::new();
    let mut infos = Vec::with_capacity(sources.len());
    {
        let mut materializer = Materializer::new(&mut store, &options.hierarchy).propagate_ids(options.propagate_ids);

        for source in sources {
            tracing::info!("Reading '{}'", source);
            let mut sheet = load_worksheet(source)?;

            let tagging = match directives {
                Some(document) if !document.tagging.is_empty() => {
                    apply_tagging(&mut sheet, &document.tagging, diagnostics)?
                }
                _ => TaggingSummary::default(),
            };

            let MaterializeSummary { headers, rows, records } = materializer.materialize(&sheet)?;
            if headers == 0 {
                diagnostics.warn(format!("No '#tags' header found in {}:{}", sheet.source, sheet.name));
            }

            infos.push(SourceInfo {
                source: sheet.source.clone(),
                sheet: sheet.name.clone(),
                rows,
                headers,
                records,
                headers_tagged: tagging.headers_tagged,
            });
        }
    }

    let conversion = match directives {
        Some(document) if !document.conversion.is_empty() => {
            Some(apply_conversion(&mut store, &document.conversion, diagnostics)?)
        }
        _ => None,
    };

    filter_tables(&mut store, &options.keep_tables, &options.delete_tables);

    let result = ExtractionResult {
        store,
        sources: infos,
        conversion,
    };
    tracing::info!("{}", result.summary());
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directives::parse_directives_json;
    use crate::store::FieldValue;
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn csv(content: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        write!(file, "{}", content).unwrap();
        file
    }

    fn path(file: &NamedTempFile) -> String {
        file.path().to_string_lossy().into_owned()
    }

    #[test]
    fn test_empty_input() {
        let mut diagnostics = Diagnostics::new(true);
        assert!(matches!(
            extract_sources(&[], None, &ExtractOptions::default(), &mut diagnostics),
            Err(PipelineError::EmptyInput)
        ));
    }

    #[test]
    fn test_two_copies_of_a_source_are_idempotent() {
        let file = csv("#tags,#study.id,#entity.id,#entity.organ\n,ST1,S1,liver\n,ST1,S2,kidney\n");
        let sources = [path(&file), path(&file)];
        let mut diagnostics = Diagnostics::new(true);
        let result = extract_sources(&sources, None, &ExtractOptions::default(), &mut diagnostics).unwrap();

        let s1 = result.store.record("entity", "S1").unwrap();
        assert_eq!(s1["organ"], FieldValue::scalar("liver"));
        assert_eq!(s1["study.id"], FieldValue::scalar("ST1"));
        assert_eq!(result.sources.len(), 2);
        assert!(result.conversion.is_none());
    }

    #[test]
    fn test_tagging_materialize_convert_filter() {
        let file = csv("Sample Name,Organ\nS1,liver\nS2,kidney\n");
        let document = parse_directives_json(
            &json!({
                "tagging": [ { "header_tag_descriptions": [
                    { "header": "Sample Name", "tag": "#sample.id", "required": true },
                    { "header": "Organ", "tag": "#organ.id" }
                ] } ],
                "conversion": { "sample": { "id": { "exact-unique": {
                    "S1": { "assign": { "id": "SAMPLE-1" } }
                } } } }
            })
            .to_string(),
        )
        .unwrap();
        let options = ExtractOptions {
            delete_tables: vec!["organ".to_string()],
            ..ExtractOptions::default()
        };
        let mut diagnostics = Diagnostics::new(true);
        let result = extract_sources(&[path(&file)], Some(&document), &options, &mut diagnostics).unwrap();

        assert_eq!(result.sources[0].headers_tagged, 1);
        assert!(result.store.record("sample", "SAMPLE-1").is_some());
        assert!(result.store.table("organ").is_none());
        assert_eq!(result.conversion.unwrap().renames.len(), 1);
    }

    #[test]
    fn test_propagation_can_be_disabled() {
        let file = csv("#tags,#study.id,#entity.id\n,ST1,S1\n");
        let options = ExtractOptions {
            propagate_ids: false,
            ..ExtractOptions::default()
        };
        let mut diagnostics = Diagnostics::new(true);
        let result = extract_sources(&[path(&file)], None, &options, &mut diagnostics).unwrap();
        assert!(result.store.record("entity", "S1").unwrap().get("study.id").is_none());
    }

    #[test]
    fn test_untagged_source_warns() {
        let file = csv("a,b\n1,2\n");
        let mut diagnostics = Diagnostics::new(true);
        let result = extract_sources(&[path(&file)], None, &ExtractOptions::default(), &mut diagnostics).unwrap();
        assert!(result.store.is_empty());
        assert!(diagnostics.warnings().any(|w| w.message.contains("No '#tags' header")));
    }
}
