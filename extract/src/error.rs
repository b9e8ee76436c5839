//! Error types for the tagsheet extraction pipeline.
//!
//! This module defines one error type per pipeline stage:
//!
//! - [`SourceError`] - worksheet loading errors
//! - [`TagError`] - tag grammar and record structure errors
//! - [`ExpressionError`] - expression compilation and evaluation errors
//! - [`DirectiveError`] - directive loading and application errors
//! - [`TaggingError`] - tagging directive injection errors
//! - [`PipelineError`] - top-level orchestration errors
//!
//! Error conversion is automatic via `From` implementations,
//! allowing `?` to work across error boundaries.

use std::fmt;

use thiserror::Error;

// =============================================================================
// Locations
// =============================================================================

/// Position of a cell inside a tagged source.
///
/// `row` and `column` are zero-based internally and displayed one-based.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Location {
    pub file: String,
    pub sheet: String,
    pub row: usize,
    pub column: usize,
}

impl Location {
    pub fn new(file: impl Into<String>, sheet: impl Into<String>, row: usize, column: usize) -> Self {
        Self {
            file: file.into(),
            sheet: sheet.into(),
            row,
            column,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} row {}, column {}",
            self.file,
            self.sheet,
            self.row + 1,
            self.column + 1
        )
    }
}

// =============================================================================
// Source Loading Errors
// =============================================================================

/// Errors while loading a worksheet or directive source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Failed to read file.
    #[error("Failed to read '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Invalid CSV content.
    #[error("Invalid CSV in '{path}' at line {line}: {message}")]
    Csv {
        path: String,
        line: usize,
        message: String,
    },

    /// Empty file.
    #[error("Source '{0}' is empty")]
    EmptyFile(String),

    /// Unsupported file extension.
    #[error("Unsupported source type: {0}")]
    Unsupported(String),
}

// =============================================================================
// Tag Errors
// =============================================================================

/// Errors raised while compiling a `#tags` header row.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TagError {
    /// Malformed tag syntax.
    #[error("Tag grammar error at {location}: {message}")]
    Grammar { location: Location, message: String },

    /// Undefined table/field, duplicate field, invalid child declaration.
    #[error("Tag structure error at {location}: {message}")]
    Structure { location: Location, message: String },
}

impl TagError {
    pub fn grammar(location: Location, message: impl Into<String>) -> Self {
        Self::Grammar {
            location,
            message: message.into(),
        }
    }

    pub fn structure(location: Location, message: impl Into<String>) -> Self {
        Self::Structure {
            location,
            message: message.into(),
        }
    }

    pub fn location(&self) -> &Location {
        match self {
            Self::Grammar { location, .. } | Self::Structure { location, .. } => location,
        }
    }
}

// =============================================================================
// Expression Errors
// =============================================================================

/// Errors from compiling or evaluating an expression.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExpressionError {
    /// Expression text could not be compiled.
    #[error("Malformed expression '{expression}': {message}")]
    Malformed { expression: String, message: String },

    /// A `#field#` placeholder names a field the record lacks.
    #[error("Field '{0}' is not present in the record")]
    MissingField(String),

    /// A regex placeholder matched no field name.
    #[error("Pattern '{0}' matches no field in the record")]
    NoFieldMatch(String),

    /// A regex placeholder matched several field names.
    #[error("Pattern '{pattern}' matches more than one field: {fields:?}")]
    AmbiguousFieldMatch { pattern: String, fields: Vec<String> },
}

// =============================================================================
// Directive Errors
// =============================================================================

/// Errors from loading or applying conversion directives.
#[derive(Debug, Error)]
pub enum DirectiveError {
    /// The directives document could not be parsed.
    #[error("Invalid directives document: {0}")]
    Invalid(String),

    /// The document does not satisfy the directives schema.
    #[error("Directives failed schema validation: {errors:?}")]
    Schema { errors: Vec<String> },

    /// A pattern failed to compile.
    #[error("Invalid regular expression '{pattern}': {message}")]
    BadPattern { pattern: String, message: String },

    /// A `regex` operation is not a `[pattern, replacement]` pair.
    #[error("Malformed regex pair for field '{field}': {message}")]
    MalformedRegexPair { field: String, message: String },

    /// Deleting the `id` field is forbidden.
    #[error("Directive for {table}.{field} = '{key}' tries to delete the id field")]
    DeleteId {
        table: String,
        field: String,
        key: String,
    },

    /// A record's id became list-valued or empty.
    #[error("Record '{id}' in table '{table}' has an invalid id after conversion")]
    InvalidId { table: String, id: String },

    /// Renaming an id onto one that already exists.
    #[error("Cannot rename '{old}' to '{new}' in table '{table}': id already exists")]
    IdCollision {
        table: String,
        old: String,
        new: String,
    },

    /// A directive names a table or field the store lacks.
    #[error("Conversion directive target not found: {0}")]
    MissingTarget(String),

    /// A required directive failed.
    #[error("Directive {table}.{field} = '{key}' failed: {message}")]
    Failed {
        table: String,
        field: String,
        key: String,
        message: String,
    },

    /// A directive worksheet header is malformed.
    #[error(transparent)]
    Tag(#[from] TagError),

    /// JSON error.
    #[error("Directives JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// =============================================================================
// Tagging Errors
// =============================================================================

/// Errors raised by the tagging directive injector.
#[derive(Debug, Error)]
pub enum TaggingError {
    /// A header description could not be compiled.
    #[error("Invalid header description '{description}': {message}")]
    InvalidDescription { description: String, message: String },

    /// A required description failed to produce a value.
    #[error("Required tag '{tag}' failed at sheet '{sheet}' row {row}: {message}")]
    RequiredFailed {
        tag: String,
        sheet: String,
        row: usize,
        message: String,
    },
}

// =============================================================================
// Pipeline Errors (top-level)
// =============================================================================

/// Top-level pipeline orchestration errors.
///
/// This is the main error type returned by [`crate::pipeline::extract_sources`].
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Source loading error.
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    /// Tag compilation error.
    #[error("{0}")]
    Tag(#[from] TagError),

    /// Directive error.
    #[error("Directive error: {0}")]
    Directive(#[from] DirectiveError),

    /// Tagging error.
    #[error("Tagging error: {0}")]
    Tagging(#[from] TaggingError),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// No sources given.
    #[error("No tagged sources to extract")]
    EmptyInput,
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for source loading.
pub type SourceResult<T> = Result<T, SourceError>;

/// Result type for tag compilation.
pub type TagResult<T> = Result<T, TagError>;

/// Result type for directive operations.
pub type DirectiveResult<T> = Result<T, DirectiveError>;

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;
