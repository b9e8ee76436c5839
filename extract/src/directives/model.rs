//! Serde model of the directives document.
//!
//! ```json
//! {
//!   "conversion": {
//!     "protocol": {
//!       "name": {
//!         "exact-unique": { "extraction": { "assign": { "id": "P-EXT" } } },
//!         "levenshtein": { "wash": { "rename": { "buffer": "wash.buffer" } } }
//!       }
//!     }
//!   },
//!   "tagging": [
//!     { "header_tag_descriptions": [ { "header": "Sample Name", "tag": "#sample.id", "required": true } ] }
//!   ]
//! }
//! ```

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::store::FieldValue;

// =============================================================================
// Conversion directives
// =============================================================================

/// How a directive key is compared against field values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Comparison {
    #[serde(rename = "exact")]
    Exact,
    #[serde(rename = "regex")]
    Regex,
    #[serde(rename = "levenshtein")]
    Levenshtein,
    #[serde(rename = "exact-unique")]
    ExactUnique,
    #[serde(rename = "regex-unique")]
    RegexUnique,
    #[serde(rename = "levenshtein-unique")]
    LevenshteinUnique,
}

/// Comparison family, ignoring uniqueness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Exact,
    Regex,
    Levenshtein,
}

impl Comparison {
    /// Order in which passes run for each (table, field).
    pub const PASS_ORDER: [Comparison; 6] = [
        Comparison::ExactUnique,
        Comparison::RegexUnique,
        Comparison::LevenshteinUnique,
        Comparison::Exact,
        Comparison::Regex,
        Comparison::Levenshtein,
    ];

    pub fn new(kind: MatchKind, unique: bool) -> Self {
        match (kind, unique) {
            (MatchKind::Exact, false) => Self::Exact,
            (MatchKind::Regex, false) => Self::Regex,
            (MatchKind::Levenshtein, false) => Self::Levenshtein,
            (MatchKind::Exact, true) => Self::ExactUnique,
            (MatchKind::Regex, true) => Self::RegexUnique,
            (MatchKind::Levenshtein, true) => Self::LevenshteinUnique,
        }
    }

    pub fn kind(self) -> MatchKind {
        match self {
            Self::Exact | Self::ExactUnique => MatchKind::Exact,
            Self::Regex | Self::RegexUnique => MatchKind::Regex,
            Self::Levenshtein | Self::LevenshteinUnique => MatchKind::Levenshtein,
        }
    }

    pub fn is_unique(self) -> bool {
        matches!(self, Self::ExactUnique | Self::RegexUnique | Self::LevenshteinUnique)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Regex => "regex",
            Self::Levenshtein => "levenshtein",
            Self::ExactUnique => "exact-unique",
            Self::RegexUnique => "regex-unique",
            Self::LevenshteinUnique => "levenshtein-unique",
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl MatchKind {
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "" | "exact" => Some(Self::Exact),
            "regex" => Some(Self::Regex),
            "levenshtein" => Some(Self::Levenshtein),
            _ => None,
        }
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Edits applied to a matched record.
///
/// An `assign` string is an expression (`#field#` placeholders allowed); an
/// `assign` array sets a list verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationSet {
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub assign: IndexMap<String, FieldValue>,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub append: IndexMap<String, FieldValue>,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub prepend: IndexMap<String, FieldValue>,

    /// `field: [pattern, replacement]`
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub regex: IndexMap<String, Vec<String>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub delete: Vec<String>,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub rename: IndexMap<String, String>,

    /// Failures of a required directive abort the run instead of warning.
    #[serde(default, skip_serializing_if = "is_false")]
    pub required: bool,
}

impl OperationSet {
    pub fn is_empty(&self) -> bool {
        self.assign.is_empty()
            && self.append.is_empty()
            && self.prepend.is_empty()
            && self.regex.is_empty()
            && self.delete.is_empty()
            && self.rename.is_empty()
    }
}

/// `key → operations`
pub type KeyedOperations = IndexMap<String, OperationSet>;

/// `table → field → comparison → key → operations`
pub type ConversionDirectives = IndexMap<String, IndexMap<String, IndexMap<Comparison, KeyedOperations>>>;

// =============================================================================
// Tagging directives
// =============================================================================

/// One header test and the tag injected for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderTagDescription {
    /// Literal header text, `r"…"` pattern, or `#…#` expression.
    pub header: String,
    pub tag: String,
    #[serde(default)]
    pub required: bool,
}

/// A group of tagging directives.
///
/// A group with `header_tag_descriptions` tags matching header blocks; a
/// group with only `insert` splices those rows verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaggingGroup {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub header_tag_descriptions: Vec<HeaderTagDescription>,

    /// Rows containing a cell that passes this test are never headers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclusion_test: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub insert: Vec<Vec<String>>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub insert_multiple: bool,
}

// =============================================================================
// Document
// =============================================================================

/// A complete directives document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DirectivesDocument {
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub conversion: ConversionDirectives,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tagging: Vec<TaggingGroup>,
}

impl DirectivesDocument {
    pub fn is_empty(&self) -> bool {
        self.conversion.is_empty() && self.tagging.is_empty()
    }

    /// Fold `other` into this document; later keys replace earlier ones.
    pub fn extend(&mut self, other: DirectivesDocument) {
        for (table, fields) in other.conversion {
            let table_entry = self.conversion.entry(table).or_default();
            for (field, comparisons) in fields {
                let field_entry = table_entry.entry(field).or_default();
                for (comparison, keyed) in comparisons {
                    field_entry.entry(comparison).or_default().extend(keyed);
                }
            }
        }
        self.tagging.extend(other.tagging);
    }

    /// Number of (table, field, comparison, key) directives.
    pub fn conversion_count(&self) -> usize {
        self.conversion
            .values()
            .flat_map(|fields| fields.values())
            .flat_map(|comparisons| comparisons.values())
            .map(|keyed| keyed.len())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_document_parses_and_keeps_order() {
        let doc: DirectivesDocument = serde_json::from_value(json!({
            "conversion": {
                "protocol": {
                    "name": {
                        "levenshtein-unique": { "wash": { "assign": { "id": "P-W" }, "required": true } },
                        "exact": { "extraction": { "delete": ["notes"], "regex": { "name": ["^ext", "EXT"] } } }
                    }
                }
            },
            "tagging": [
                { "header_tag_descriptions": [ { "header": "Sample", "tag": "#sample.id" } ], "insert_multiple": true }
            ]
        }))
        .unwrap();

        let comparisons = &doc.conversion["protocol"]["name"];
        let order: Vec<Comparison> = comparisons.keys().copied().collect();
        assert_eq!(order, [Comparison::LevenshteinUnique, Comparison::Exact]);
        assert!(comparisons[&Comparison::LevenshteinUnique]["wash"].required);
        assert_eq!(doc.conversion_count(), 2);
        assert!(!doc.tagging[0].header_tag_descriptions[0].required);
        assert!(doc.tagging[0].insert_multiple);
    }

    #[test]
    fn test_comparison_parts() {
        assert_eq!(Comparison::new(MatchKind::Regex, true), Comparison::RegexUnique);
        assert_eq!(Comparison::LevenshteinUnique.kind(), MatchKind::Levenshtein);
        assert!(!Comparison::Exact.is_unique());
        assert_eq!(MatchKind::parse(" Levenshtein "), Some(MatchKind::Levenshtein));
        assert_eq!(MatchKind::parse("fuzzy"), None);
    }

    #[test]
    fn test_extend_merges_nested_maps() {
        let mut doc: DirectivesDocument =
            serde_json::from_value(json!({ "conversion": { "sample": { "id": { "exact": { "S1": {} } } } } })).unwrap();
        let other: DirectivesDocument =
            serde_json::from_value(json!({ "conversion": { "sample": { "id": { "exact": { "S2": {} } } } } })).unwrap();
        doc.extend(other);
        assert_eq!(doc.conversion_count(), 2);
    }
}
