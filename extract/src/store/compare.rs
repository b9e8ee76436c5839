//! Compare two extraction stores.
//!
//! Values are compared numerically when both sides parse as numbers, with a
//! relative tolerance of 1e-8, so `"1.0"` and `"1"` are considered equal.

use indexmap::IndexMap;
use serde::Serialize;

use super::{ExtractionStore, FieldValue, Record};

const RELATIVE_TOLERANCE: f64 = 1e-8;

/// A field whose value differs between the two stores.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldDifference {
    pub field: String,
    pub left: Option<FieldValue>,
    pub right: Option<FieldValue>,
}

/// Differences within one table.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TableComparison {
    /// Ids present only in the first store.
    pub only_in_left: Vec<String>,
    /// Ids present only in the second store.
    pub only_in_right: Vec<String>,
    /// Shared ids with at least one differing field.
    pub differing: IndexMap<String, Vec<FieldDifference>>,
}

impl TableComparison {
    pub fn is_empty(&self) -> bool {
        self.only_in_left.is_empty() && self.only_in_right.is_empty() && self.differing.is_empty()
    }
}

/// Full comparison report.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreComparison {
    pub tables_only_in_left: Vec<String>,
    pub tables_only_in_right: Vec<String>,
    pub tables: IndexMap<String, TableComparison>,
}

impl StoreComparison {
    pub fn is_identical(&self) -> bool {
        self.tables_only_in_left.is_empty()
            && self.tables_only_in_right.is_empty()
            && self.tables.is_empty()
    }

    /// Human-readable lines describing every difference.
    pub fn report_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for table in &self.tables_only_in_left {
            lines.push(format!("Table '{}' only in the first store", table));
        }
        for table in &self.tables_only_in_right {
            lines.push(format!("Table '{}' only in the second store", table));
        }
        for (table, comparison) in &self.tables {
            for id in &comparison.only_in_left {
                lines.push(format!("{}['{}'] only in the first store", table, id));
            }
            for id in &comparison.only_in_right {
                lines.push(format!("{}['{}'] only in the second store", table, id));
            }
            for (id, differences) in &comparison.differing {
                for diff in differences {
                    lines.push(format!(
                        "{}['{}'].{}: {} != {}",
                        table,
                        id,
                        diff.field,
                        display_side(&diff.left),
                        display_side(&diff.right)
                    ));
                }
            }
        }
        lines
    }
}

fn display_side(value: &Option<FieldValue>) -> String {
    value
        .as_ref()
        .map(|v| format!("'{}'", v))
        .unwrap_or_else(|| "<missing>".to_string())
}

/// Compare `left` against `right`.
pub fn compare(left: &ExtractionStore, right: &ExtractionStore) -> StoreComparison {
    let mut report = StoreComparison::default();

    for (name, left_table) in left.tables() {
        let Some(right_table) = right.table(name) else {
            report.tables_only_in_left.push(name.clone());
            continue;
        };

        let mut table = TableComparison::default();
        for (id, left_record) in left_table {
            match right_table.get(id) {
                None => table.only_in_left.push(id.clone()),
                Some(right_record) => {
                    let differences = compare_records(left_record, right_record);
                    if !differences.is_empty() {
                        table.differing.insert(id.clone(), differences);
                    }
                }
            }
        }
        table.only_in_right = right_table
            .keys()
            .filter(|id| !left_table.contains_key(id.as_str()))
            .cloned()
            .collect();

        if !table.is_empty() {
            report.tables.insert(name.clone(), table);
        }
    }

    report.tables_only_in_right = right
        .tables()
        .keys()
        .filter(|name| left.table(name).is_none())
        .cloned()
        .collect();

    report
}

fn compare_records(left: &Record, right: &Record) -> Vec<FieldDifference> {
    let mut differences = Vec::new();

    for (field, left_value) in left {
        match right.get(field) {
            Some(right_value) if values_equal(left_value, right_value) => {}
            right_value => differences.push(FieldDifference {
                field: field.clone(),
                left: Some(left_value.clone()),
                right: right_value.cloned(),
            }),
        }
    }
    for (field, right_value) in right {
        if !left.contains_key(field) {
            differences.push(FieldDifference {
                field: field.clone(),
                left: None,
                right: Some(right_value.clone()),
            });
        }
    }

    differences
}

/// Shape-sensitive, numeric-aware equality.
pub fn values_equal(left: &FieldValue, right: &FieldValue) -> bool {
    if left.is_list() != right.is_list() {
        return false;
    }
    let (left, right) = (left.values(), right.values());
    left.len() == right.len() && left.iter().zip(right).all(|(a, b)| strings_equal(a, b))
}

fn strings_equal(left: &str, right: &str) -> bool {
    if left == right {
        return true;
    }
    match (left.trim().parse::<f64>(), right.trim().parse::<f64>()) {
        (Ok(a), Ok(b)) => is_close(a, b),
        _ => false,
    }
}

fn is_close(a: f64, b: f64) -> bool {
    a == b || (a - b).abs() <= RELATIVE_TOLERANCE * a.abs().max(b.abs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_numeric_values_within_tolerance_are_equal() {
        assert!(strings_equal("1.0", "1"));
        assert!(strings_equal("100000000", "100000000.5"));
        assert!(!strings_equal("1.0", "1.001"));
        assert!(!strings_equal("abc", "abd"));
        assert!(!values_equal(&FieldValue::scalar("a"), &FieldValue::list(["a"])));
    }

    #[test]
    fn test_compare_reports_ids_and_fields() {
        let left = ExtractionStore::from_value(json!({
            "sample": {
                "S1": {"id": "S1", "weight": "1.50", "color": "red"},
                "S2": {"id": "S2"}
            },
            "only_left": {"X": {"id": "X"}}
        }))
        .unwrap();
        let right = ExtractionStore::from_value(json!({
            "sample": {
                "S1": {"id": "S1", "weight": "1.5", "color": "blue", "extra": "e"},
                "S3": {"id": "S3"}
            }
        }))
        .unwrap();

        let report = compare(&left, &right);
        assert_eq!(report.tables_only_in_left, ["only_left"]);
        assert!(report.tables_only_in_right.is_empty());

        let sample = &report.tables["sample"];
        assert_eq!(sample.only_in_left, ["S2"]);
        assert_eq!(sample.only_in_right, ["S3"]);

        let fields: Vec<&str> = sample.differing["S1"].iter().map(|d| d.field.as_str()).collect();
        assert_eq!(fields, ["color", "extra"]);
        assert!(!report.report_lines().is_empty());
    }

    #[test]
    fn test_identical_stores() {
        let store = ExtractionStore::from_value(json!({"a": {"1": {"id": "1"}}})).unwrap();
        assert!(compare(&store, &store).is_identical());
    }
}
