//! Multi-source reconciliation of extraction stores.

use super::ExtractionStore;

/// Merge `source` into `dest`.
///
/// Tables and records missing from `dest` are inserted whole. For records
/// present in both, each field of the source record overwrites the
/// destination field (last writer wins, no list merging).
pub fn merge(dest: &mut ExtractionStore, source: ExtractionStore) {
    for (table_name, table) in source.tables {
        let dest_table = dest.table_entry(&table_name);
        for (id, record) in table {
            match dest_table.get_mut(&id) {
                Some(existing) => {
                    for (field, value) in record {
                        existing.insert(field, value);
                    }
                }
                None => {
                    dest_table.insert(id, record);
                }
            }
        }
    }
}

/// Keep only `keep` tables (when non-empty), then drop every table in `delete`.
pub fn filter_tables(store: &mut ExtractionStore, keep: &[String], delete: &[String]) {
    if !keep.is_empty() {
        store.tables_mut().retain(|name, _| keep.contains(name));
    }
    for name in delete {
        store.remove_table(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FieldValue;
    use serde_json::json;

    #[test]
    fn test_merge_overwrites_fields_last_writer_wins() {
        let mut dest = ExtractionStore::from_value(json!({
            "sample": {"S1": {"id": "S1", "weight": "1", "tags": ["a"]}}
        }))
        .unwrap();
        let source = ExtractionStore::from_value(json!({
            "sample": {
                "S1": {"id": "S1", "tags": ["b"], "color": "red"},
                "S2": {"id": "S2"}
            },
            "protocol": {"P1": {"id": "P1"}}
        }))
        .unwrap();

        merge(&mut dest, source);

        let s1 = dest.record("sample", "S1").unwrap();
        assert_eq!(s1["weight"], FieldValue::scalar("1"));
        assert_eq!(s1["tags"], FieldValue::list(["b"]));
        assert_eq!(s1["color"], FieldValue::scalar("red"));
        assert!(dest.record("sample", "S2").is_some());
        assert!(dest.record("protocol", "P1").is_some());
    }

    #[test]
    fn test_filter_tables() {
        let mut store = ExtractionStore::from_value(json!({
            "a": {}, "b": {}, "c": {}
        }))
        .unwrap();
        filter_tables(&mut store, &["a".to_string(), "b".to_string()], &["b".to_string()]);
        let names: Vec<&String> = store.tables().keys().collect();
        assert_eq!(names, ["a"]);
    }
}
