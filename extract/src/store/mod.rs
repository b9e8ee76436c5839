//! Nested record store produced by extraction.
//!
//! ```text
//! ExtractionStore
//! └── table name ──▶ Table
//!                    └── record id ──▶ Record
//!                                      └── field name ──▶ FieldValue (scalar | list)
//! ```
//!
//! All maps preserve insertion order so output field and record order is
//! deterministic and matches the order in which rows were read.

pub mod compare;
pub mod lineage;
pub mod merge;

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub use compare::{compare, FieldDifference, StoreComparison, TableComparison};
pub use lineage::{ancestors, generate_lineages, siblings, Lineage};
pub use merge::{filter_tables, merge};

/// Reserved field holding a record's identifier.
pub const ID_FIELD: &str = "id";

/// Reserved field linking a child record to its parent in the same table.
pub const PARENT_ID_FIELD: &str = "parentID";

/// A single field value: either one string or an ordered list of strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Scalar(String),
    List(Vec<String>),
}

/// Fields of one record, in declaration order.
pub type Record = IndexMap<String, FieldValue>;

/// Records of one table keyed by id.
pub type Table = IndexMap<String, Record>;

impl FieldValue {
    pub fn scalar(value: impl Into<String>) -> Self {
        Self::Scalar(value.into())
    }

    pub fn list<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::List(values.into_iter().map(Into::into).collect())
    }

    pub fn is_list(&self) -> bool {
        matches!(self, Self::List(_))
    }

    pub fn as_scalar(&self) -> Option<&str> {
        match self {
            Self::Scalar(s) => Some(s),
            Self::List(_) => None,
        }
    }

    /// All contained strings; a scalar is a one-element slice.
    pub fn values(&self) -> &[String] {
        match self {
            Self::Scalar(s) => std::slice::from_ref(s),
            Self::List(values) => values,
        }
    }

    pub fn into_values(self) -> Vec<String> {
        match self {
            Self::Scalar(s) => vec![s],
            Self::List(values) => values,
        }
    }

    /// True if the value (or any list element) equals `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.values().iter().any(|v| v == needle)
    }

    /// True for an empty scalar or an empty list.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Scalar(s) => s.is_empty(),
            Self::List(values) => values.is_empty(),
        }
    }

    /// Row-level merge of a duplicate field value.
    ///
    /// Equal values leave the field untouched. A list gains the incoming
    /// values it does not already hold; a scalar is promoted to a list of the
    /// old value followed by the new one(s).
    pub fn merge(&mut self, incoming: FieldValue) {
        if *self == incoming {
            return;
        }
        match self {
            Self::List(existing) => {
                for value in incoming.into_values() {
                    if !existing.contains(&value) {
                        existing.push(value);
                    }
                }
            }
            Self::Scalar(existing) => {
                let mut merged = vec![std::mem::take(existing)];
                for value in incoming.into_values() {
                    if !merged.contains(&value) {
                        merged.push(value);
                    }
                }
                *self = if merged.len() == 1 {
                    Self::Scalar(merged.remove(0))
                } else {
                    Self::List(merged)
                };
            }
        }
    }

    /// Accumulate values into a list field (used by list columns).
    pub fn extend(&mut self, incoming: FieldValue) {
        match self {
            Self::List(existing) => existing.extend(incoming.into_values()),
            Self::Scalar(existing) => {
                let mut values = vec![std::mem::take(existing)];
                values.extend(incoming.into_values());
                *self = Self::List(values);
            }
        }
    }

    /// Concatenate `suffix` onto this value.
    ///
    /// Scalars concatenate, a scalar suffix is broadcast over a list, and two
    /// lists of equal length concatenate element-wise.
    pub fn append(&mut self, suffix: &FieldValue) -> Result<(), String> {
        self.combine(suffix, |current, other| format!("{}{}", current, other))
    }

    /// Concatenate `prefix` in front of this value, with the same shape rules as [`append`](Self::append).
    pub fn prepend(&mut self, prefix: &FieldValue) -> Result<(), String> {
        self.combine(prefix, |current, other| format!("{}{}", other, current))
    }

    fn combine(&mut self, other: &FieldValue, join: impl Fn(&str, &str) -> String) -> Result<(), String> {
        match (self, other) {
            (Self::Scalar(current), Self::Scalar(other)) => {
                *current = join(current.as_str(), other);
                Ok(())
            }
            (Self::List(current), Self::Scalar(other)) => {
                for value in current.iter_mut() {
                    *value = join(value.as_str(), other);
                }
                Ok(())
            }
            (Self::List(current), Self::List(others)) => {
                if current.len() != others.len() {
                    return Err(format!(
                        "list lengths differ ({} vs {})",
                        current.len(),
                        others.len()
                    ));
                }
                for (value, other) in current.iter_mut().zip(others) {
                    *value = join(value.as_str(), other);
                }
                Ok(())
            }
            (Self::Scalar(_), Self::List(_)) => Err("cannot combine a list into a scalar field".to_string()),
        }
    }

    /// Apply `f` to the scalar or to every list element.
    pub fn map_values(&mut self, mut f: impl FnMut(&str) -> String) {
        match self {
            Self::Scalar(s) => *s = f(s.as_str()),
            Self::List(values) => {
                for value in values.iter_mut() {
                    *value = f(value.as_str());
                }
            }
        }
    }

    /// Replace every occurrence of `old` with `new`. Returns true if anything changed.
    pub fn replace_value(&mut self, old: &str, new: &str) -> bool {
        let mut changed = false;
        self.map_values(|value| {
            if value == old {
                changed = true;
                new.to_string()
            } else {
                value.to_string()
            }
        });
        changed
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(s) => f.write_str(s),
            Self::List(values) => write!(f, "[{}]", values.join(", ")),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Scalar(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Scalar(value)
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(values: Vec<String>) -> Self {
        Self::List(values)
    }
}

/// The id of a record, if it has a scalar `id` field.
pub fn record_id(record: &Record) -> Option<&str> {
    record.get(ID_FIELD).and_then(FieldValue::as_scalar)
}

// =============================================================================
// ExtractionStore
// =============================================================================

/// Mapping table name → record id → record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExtractionStore {
    tables: IndexMap<String, Table>,
}

impl ExtractionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tables(&self) -> &IndexMap<String, Table> {
        &self.tables
    }

    pub fn tables_mut(&mut self) -> &mut IndexMap<String, Table> {
        &mut self.tables
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    pub fn table_mut(&mut self, name: &str) -> Option<&mut Table> {
        self.tables.get_mut(name)
    }

    /// Get or create a table.
    pub fn table_entry(&mut self, name: &str) -> &mut Table {
        self.tables.entry(name.to_string()).or_default()
    }

    pub fn record(&self, table: &str, id: &str) -> Option<&Record> {
        self.tables.get(table).and_then(|t| t.get(id))
    }

    pub fn record_mut(&mut self, table: &str, id: &str) -> Option<&mut Record> {
        self.tables.get_mut(table).and_then(|t| t.get_mut(id))
    }

    /// Insert (or replace) a record under its own `id`.
    ///
    /// Returns false and leaves the store untouched if the record has no scalar id.
    pub fn insert_record(&mut self, table: &str, record: Record) -> bool {
        let Some(id) = record_id(&record).map(str::to_string) else {
            return false;
        };
        self.table_entry(table).insert(id, record);
        true
    }

    pub fn remove_table(&mut self, name: &str) -> Option<Table> {
        self.tables.shift_remove(name)
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Number of records across all tables.
    pub fn record_count(&self) -> usize {
        self.tables.values().map(IndexMap::len).sum()
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}

// =============================================================================
// TableHierarchy
// =============================================================================

/// Rank of each table; lower ranks sit higher in the project → study → … chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TableHierarchy(IndexMap<String, i32>);

impl TableHierarchy {
    pub fn new(ranks: impl IntoIterator<Item = (String, i32)>) -> Self {
        Self(ranks.into_iter().collect())
    }

    pub fn rank(&self, table: &str) -> Option<i32> {
        self.0.get(table).copied()
    }

    /// True if `table` is ranked strictly below `ancestor`.
    pub fn is_below(&self, table: &str, ancestor: &str) -> bool {
        match (self.rank(table), self.rank(ancestor)) {
            (Some(rank), Some(ancestor_rank)) => rank > ancestor_rank,
            _ => false,
        }
    }
}

impl Default for TableHierarchy {
    fn default() -> Self {
        Self::new(
            [
                ("project", 0),
                ("study", 1),
                ("protocol", 2),
                ("entity", 3),
                ("measurement", 4),
            ]
            .into_iter()
            .map(|(name, rank)| (name.to_string(), rank)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(fields: &[(&str, FieldValue)]) -> Record {
        fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_merge_promotes_scalar_to_list_in_order() {
        let mut value = FieldValue::scalar("a");
        value.merge(FieldValue::scalar("b"));
        assert_eq!(value, FieldValue::list(["a", "b"]));
    }

    #[test]
    fn test_merge_equal_values_is_noop() {
        let mut value = FieldValue::scalar("a");
        value.merge(FieldValue::scalar("a"));
        assert_eq!(value, FieldValue::scalar("a"));

        let mut list = FieldValue::list(["p", "q"]);
        list.merge(FieldValue::list(["p", "q"]));
        list.merge(FieldValue::scalar("p"));
        assert_eq!(list, FieldValue::list(["p", "q"]));
    }

    #[test]
    fn test_append_broadcast_and_elementwise() {
        let mut list = FieldValue::list(["a", "b"]);
        list.append(&FieldValue::scalar("-x")).unwrap();
        assert_eq!(list, FieldValue::list(["a-x", "b-x"]));

        list.prepend(&FieldValue::list(["1:", "2:"])).unwrap();
        assert_eq!(list, FieldValue::list(["1:a-x", "2:b-x"]));

        assert!(list.append(&FieldValue::list(["only one"])).is_err());

        let mut scalar = FieldValue::scalar("a");
        assert!(scalar.append(&FieldValue::list(["b"])).is_err());
    }

    #[test]
    fn test_replace_value_in_list() {
        let mut value = FieldValue::list(["P1", "P3", "P1"]);
        assert!(value.replace_value("P1", "P2"));
        assert_eq!(value, FieldValue::list(["P2", "P3", "P2"]));
        assert!(!value.replace_value("P9", "P2"));
    }

    #[test]
    fn test_json_round_trip_preserves_order_and_shape() {
        let source = json!({
            "sample": {
                "S2": {"id": "S2", "weight": "5", "protocol.id": ["P1", "P2"]},
                "S1": {"id": "S1", "single": ["only"], "empty": []}
            },
            "protocol": {
                "P1": {"id": "P1"}
            }
        });
        let store = ExtractionStore::from_value(source.clone()).unwrap();
        let exported = store.to_json().unwrap();
        let reparsed = ExtractionStore::from_json(&exported).unwrap();

        assert_eq!(reparsed, store);
        let ids: Vec<&String> = reparsed.table("sample").unwrap().keys().collect();
        assert_eq!(ids, ["S2", "S1"]);
        let fields: Vec<&String> = reparsed.record("sample", "S2").unwrap().keys().collect();
        assert_eq!(fields, ["id", "weight", "protocol.id"]);
        assert_eq!(
            reparsed.record("sample", "S1").unwrap()["single"],
            FieldValue::list(["only"])
        );
        assert_eq!(serde_json::to_value(&reparsed).unwrap(), source);
    }

    #[test]
    fn test_insert_record_requires_scalar_id() {
        let mut store = ExtractionStore::new();
        assert!(!store.insert_record("sample", record(&[("name", "x".into())])));
        assert!(store.insert_record("sample", record(&[("id", "S1".into())])));
        assert_eq!(store.record_count(), 1);
    }

    #[test]
    fn test_hierarchy_ranks() {
        let hierarchy = TableHierarchy::default();
        assert!(!hierarchy.is_below("sample", "project"));
        assert!(hierarchy.is_below("protocol", "project"));
        assert!(hierarchy.is_below("measurement", "study"));
        assert!(!hierarchy.is_below("project", "study"));
    }
}
