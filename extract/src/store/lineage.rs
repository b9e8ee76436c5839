//! Parent/child lineages derived from `parentID` links.
//!
//! Lineages are built per table: every record carrying a `parentID` is nested
//! under its parent, and each tree is rooted at the shallowest ancestor that
//! has no `parentID` of its own (or is not present in the table).

use std::collections::HashSet;

use indexmap::IndexMap;
use serde::Serialize;

use super::{ExtractionStore, FieldValue, Table, PARENT_ID_FIELD};

/// One node of a lineage tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Lineage {
    pub id: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Lineage>,
}

impl Lineage {
    /// Number of nodes in this tree, root included.
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(Lineage::size).sum::<usize>()
    }
}

/// Build lineage trees for every table that has at least one `parentID` link.
pub fn generate_lineages(store: &ExtractionStore) -> IndexMap<String, Vec<Lineage>> {
    let mut lineages = IndexMap::new();

    for (table_name, table) in store.tables() {
        let children = child_map(table);
        if children.is_empty() {
            continue;
        }

        let roots: Vec<&String> = children
            .keys()
            .filter(|parent| {
                table
                    .get(parent.as_str())
                    .map_or(true, |record| !record.contains_key(PARENT_ID_FIELD))
            })
            .collect();

        let mut visited = HashSet::new();
        let trees = roots
            .into_iter()
            .map(|root| build_tree(root, &children, &mut visited))
            .collect();
        lineages.insert(table_name.clone(), trees);
    }

    lineages
}

/// Parent chain of a record, nearest parent first.
pub fn ancestors(store: &ExtractionStore, table: &str, id: &str) -> Vec<String> {
    let Some(records) = store.table(table) else {
        return Vec::new();
    };

    let mut chain = Vec::new();
    let mut seen: HashSet<&str> = HashSet::from([id]);
    let mut current = id;
    while let Some(parent) = records.get(current).and_then(parent_of) {
        if !seen.insert(parent) {
            break;
        }
        chain.push(parent.to_string());
        current = parent;
    }
    chain
}

/// Other records of the same table sharing this record's parent.
pub fn siblings(store: &ExtractionStore, table: &str, id: &str) -> Vec<String> {
    let Some(records) = store.table(table) else {
        return Vec::new();
    };
    let Some(parent) = records.get(id).and_then(parent_of) else {
        return Vec::new();
    };

    records
        .iter()
        .filter(|(other, record)| other.as_str() != id && parent_of(record) == Some(parent))
        .map(|(other, _)| other.clone())
        .collect()
}

fn parent_of(record: &super::Record) -> Option<&str> {
    record
        .get(PARENT_ID_FIELD)
        .and_then(|value| value.values().first())
        .map(String::as_str)
}

fn child_map(table: &Table) -> IndexMap<String, Vec<String>> {
    let mut children: IndexMap<String, Vec<String>> = IndexMap::new();
    for (id, record) in table {
        if let Some(parents) = record.get(PARENT_ID_FIELD).map(FieldValue::values) {
            for parent in parents {
                children.entry(parent.clone()).or_default().push(id.clone());
            }
        }
    }
    children
}

fn build_tree(
    id: &str,
    children: &IndexMap<String, Vec<String>>,
    visited: &mut HashSet<String>,
) -> Lineage {
    visited.insert(id.to_string());

    let pending: Vec<String> = children
        .get(id)
        .map(|kids| kids.iter().filter(|k| !visited.contains(*k)).cloned().collect())
        .unwrap_or_default();

    let mut nested = Vec::with_capacity(pending.len());
    for child in pending {
        if visited.contains(&child) {
            continue;
        }
        nested.push(build_tree(&child, children, visited));
    }

    Lineage {
        id: id.to_string(),
        children: nested,
    }
}
