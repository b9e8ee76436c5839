//! Identifier rename propagation.
//!
//! After conversion a record whose `id` no longer equals its table key has
//! been renamed. The table is re-keyed and every `<table>.id` reference in
//! the store (plus `parentID` inside the renamed table) follows.

use std::collections::{HashMap, HashSet};

use crate::error::{DirectiveError, DirectiveResult};
use crate::store::{ExtractionStore, FieldValue, Table, ID_FIELD, PARENT_ID_FIELD};

/// One record id change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rename {
    pub table: String,
    pub old: String,
    pub new: String,
}

/// Re-key renamed records and rewrite references to them.
pub fn propagate_renames(store: &mut ExtractionStore) -> DirectiveResult<Vec<Rename>> {
    let mut renames = Vec::new();
    for (name, table) in store.tables_mut() {
        renames.extend(rekey_table(name, table)?);
    }
    if renames.is_empty() {
        return Ok(renames);
    }

    let rewritten = rewrite_references(store, &renames);
    tracing::info!(
        "Propagated {} id rename(s) to {} reference(s)",
        renames.len(),
        rewritten
    );
    Ok(renames)
}

/// Rewrite `<table>.id` fields, and `parentID` inside renamed tables.
fn rewrite_references(store: &mut ExtractionStore, renames: &[Rename]) -> usize {
    let mut by_table: HashMap<&str, HashMap<&str, &str>> = HashMap::new();
    for rename in renames {
        by_table
            .entry(rename.table.as_str())
            .or_default()
            .insert(rename.old.as_str(), rename.new.as_str());
    }

    let mut rewritten = 0;
    for (table_name, table) in store.tables_mut() {
        for record in table.values_mut() {
            for (field, value) in record.iter_mut() {
                let target = if field == PARENT_ID_FIELD {
                    Some(table_name.as_str())
                } else {
                    field.strip_suffix(".id")
                };
                if let Some(mapping) = target.and_then(|t| by_table.get(t)) {
                    rewritten += rewrite(value, mapping);
                }
            }
        }
    }
    rewritten
}

fn rewrite(value: &mut FieldValue, mapping: &HashMap<&str, &str>) -> usize {
    let mut count = 0;
    value.map_values(|v| match mapping.get(v) {
        Some(new) => {
            count += 1;
            new.to_string()
        }
        None => v.to_string(),
    });
    count
}

fn rekey_table(name: &str, table: &mut Table) -> DirectiveResult<Vec<Rename>> {
    let mut renames = Vec::new();
    for (key, record) in table.iter() {
        match record.get(ID_FIELD) {
            Some(FieldValue::Scalar(id)) if !id.is_empty() => {
                if id != key {
                    renames.push(Rename {
                        table: name.to_string(),
                        old: key.clone(),
                        new: id.clone(),
                    });
                }
            }
            _ => {
                return Err(DirectiveError::InvalidId {
                    table: name.to_string(),
                    id: key.clone(),
                })
            }
        }
    }
    if renames.is_empty() {
        return Ok(renames);
    }

    let mut seen = HashSet::with_capacity(table.len());
    for (key, record) in table.iter() {
        let id = record.get(ID_FIELD).and_then(FieldValue::as_scalar).unwrap_or(key);
        if !seen.insert(id) {
            return Err(DirectiveError::IdCollision {
                table: name.to_string(),
                old: key.clone(),
                new: id.to_string(),
            });
        }
    }

    let old = std::mem::take(table);
    for (key, record) in old {
        let id = record
            .get(ID_FIELD)
            .and_then(FieldValue::as_scalar)
            .map(str::to_string)
            .unwrap_or(key);
        table.insert(id, record);
    }
    Ok(renames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Record;
    use serde_json::json;

    fn store(value: serde_json::Value) -> ExtractionStore {
        ExtractionStore::from_value(value).unwrap()
    }

    #[test]
    fn test_rename_propagates_across_tables() {
        let mut s = store(json!({
            "protocol": {
                "P1": { "id": "P2", "name": "wash" },
                "P3": { "id": "P3", "parentID": "P1" }
            },
            "sample": {
                "S1": { "id": "S1", "protocol.id": "P1" },
                "S2": { "id": "S2", "protocol.id": ["P3", "P1"] }
            }
        }));

        let renames = propagate_renames(&mut s).unwrap();
        assert_eq!(
            renames,
            [Rename {
                table: "protocol".into(),
                old: "P1".into(),
                new: "P2".into()
            }]
        );

        let keys: Vec<&String> = s.table("protocol").unwrap().keys().collect();
        assert_eq!(keys, ["P2", "P3"]);
        assert_eq!(s.record("protocol", "P3").unwrap()["parentID"], FieldValue::scalar("P2"));
        assert_eq!(s.record("sample", "S1").unwrap()["protocol.id"], FieldValue::scalar("P2"));
        assert_eq!(
            s.record("sample", "S2").unwrap()["protocol.id"],
            FieldValue::list(["P3", "P2"])
        );
    }

    #[test]
    fn test_swapped_ids_do_not_chain() {
        let mut s = store(json!({
            "protocol": { "A": { "id": "B" }, "B": { "id": "A" } },
            "sample": { "S": { "id": "S", "protocol.id": ["A", "B"] } }
        }));
        propagate_renames(&mut s).unwrap();
        assert_eq!(
            s.record("sample", "S").unwrap()["protocol.id"],
            FieldValue::list(["B", "A"])
        );
    }

    #[test]
    fn test_collision_and_invalid_ids() {
        let mut s = store(json!({ "protocol": { "P1": { "id": "P2" }, "P2": { "id": "P2" } } }));
        assert!(matches!(propagate_renames(&mut s), Err(DirectiveError::IdCollision { .. })));

        let mut s = ExtractionStore::new();
        let mut record = Record::new();
        record.insert("id".into(), FieldValue::list(["a", "b"]));
        s.table_entry("protocol").insert("P1".into(), record);
        assert!(matches!(propagate_renames(&mut s), Err(DirectiveError::InvalidId { .. })));

        let mut s = store(json!({ "protocol": { "P1": { "id": "" } } }));
        assert!(matches!(propagate_renames(&mut s), Err(DirectiveError::InvalidId { .. })));
    }
}
