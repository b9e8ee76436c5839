//! # Tagsheet - tagged spreadsheet metadata extraction
//!
//! Tagsheet reads loosely tagged tabular sources (CSV sheets whose header rows
//! carry a small `#tag` language) into a nested, insertion-ordered record
//! store, then rewrites that store with declarative conversion directives.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌────────────┐   ┌──────────────┐   ┌──────────────┐   ┌────────────┐
//! │  CSV sheet │──▶│  Tagging   │──▶│ Materializer │──▶│  Conversion  │──▶│ Store JSON │
//! │ (auto-enc) │   │ directives │   │  (#tags)     │   │  directives  │   │            │
//! └────────────┘   └────────────┘   └──────────────┘   └──────────────┘   └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tagsheet::{extract_sources, Diagnostics, ExtractOptions};
//!
//! let mut diagnostics = Diagnostics::new(false);
//! let result = extract_sources(&["samples.csv".into()], None, &ExtractOptions::default(), &mut diagnostics)?;
//! println!("{}", result.summary());
//! ```
//!
//! ## Modules
//!
//! - [`error`] - Hierarchical error types
//! - [`store`] - Record store, lineage, compare and merge
//! - [`sheet`] - In-memory worksheets
//! - [`parser`] - CSV loading with auto-detection
//! - [`tags`] - Tag language compiler and materializer
//! - [`expression`] - `#field#` expressions
//! - [`directives`] - Directive documents and sheets
//! - [`transform`] - Tagging, conversion and pipeline
//! - [`validation`] - Directive schema validation
//! - [`diagnostics`] - Warning/error side channel

// Core modules
pub mod diagnostics;
pub mod error;
pub mod sheet;
pub mod store;

// Parsing
pub mod expression;
pub mod parser;
pub mod tags;

// Directives
pub mod directives;
pub mod validation;

// Transformation
pub mod transform;

pub use transform::{conversion, pipeline, tagging};

// =============================================================================
// Re-exports - Error types
// =============================================================================

pub use error::{
    DirectiveError, ExpressionError, Location, PipelineError, SourceError, TagError, TaggingError,
};

// =============================================================================
// Re-exports - Store
// =============================================================================

pub use store::{
    ancestors, compare, filter_tables, generate_lineages, merge, siblings, ExtractionStore, FieldValue, Lineage,
    Record, StoreComparison, Table, TableHierarchy,
};

// =============================================================================
// Re-exports - Parsing
// =============================================================================

pub use parser::{decode_content, detect_delimiter, detect_encoding, load_worksheet, SourceSpec};
pub use sheet::Worksheet;
pub use tags::{compile_header, materialize_sheet, Materializer, RecordConstructor};
pub use expression::Expression;

// =============================================================================
// Re-exports - Directives
// =============================================================================

pub use directives::{load_directives, parse_directives_json, Comparison, DirectivesDocument, TaggingGroup};
pub use validation::{is_valid_directives, validate_directives};

// =============================================================================
// Re-exports - Pipeline
// =============================================================================

pub use diagnostics::{Diagnostic, Diagnostics};
pub use transform::{
    apply_conversion, apply_tagging, extract_sources, ConversionReport, ExtractOptions, ExtractionResult,
    TaggingSummary, UnusedDirective,
};
