//! Transformation module.
//!
//! This module rewrites worksheets and stores around materialization:
//! - Tagging: injects `#tags` rows into untagged sheets
//! - Conversion: directive matching and record rewriting
//! - Pipeline: end-to-end extraction

pub mod conversion;
pub mod pipeline;
pub mod tagging;

pub use conversion::{apply_conversion, convert, CompiledConversion, ConversionReport, UnusedDirective};
pub use pipeline::*;
pub use tagging::{apply_tagging, TaggingSummary};
