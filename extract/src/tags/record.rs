//! Record constructors: one per table per header row.

use crate::store::{FieldValue, Record, ID_FIELD, PARENT_ID_FIELD};

use super::fields::FieldConstructor;

/// Groups the field constructors that build one table's record from a row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordConstructor {
    pub table: String,
    pub fields: Vec<FieldConstructor>,
    /// Index of the parent constructor for `%child` records.
    pub parent: Option<usize>,
}

impl RecordConstructor {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            fields: Vec::new(),
            parent: None,
        }
    }

    /// Derive a child constructor of `parent` (at index `parent_index`).
    ///
    /// The child inherits the parent's literal fields and gets a `parentID`
    /// field computed exactly like the parent's id. Returns `None` if the
    /// parent has no id yet.
    pub fn child_of(parent: &RecordConstructor, parent_index: usize) -> Option<Self> {
        let parent_id = parent.field(ID_FIELD)?;
        let own_prefix = format!("{}.", parent.table);

        let mut child = Self::new(parent.table.clone());
        child.parent = Some(parent_index);
        for literal in parent.fields.iter().filter(|f| f.is_literal() && f.name != ID_FIELD) {
            let mut inherited = literal.clone();
            if let Some(stripped) = inherited.name.strip_prefix(&own_prefix) {
                inherited.name = stripped.to_string();
            }
            child.fields.push(inherited);
        }

        let mut link = parent_id.clone();
        link.name = PARENT_ID_FIELD.to_string();
        child.fields.push(link);
        Some(child)
    }

    pub fn is_child(&self) -> bool {
        self.parent.is_some()
    }

    pub fn field(&self, name: &str) -> Option<&FieldConstructor> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn has_id(&self) -> bool {
        self.field(ID_FIELD).is_some()
    }

    /// Add a field, rejecting duplicates unless both declarations are lists.
    pub fn add_field(&mut self, field: FieldConstructor) -> Result<(), String> {
        if let Some(existing) = self.field(&field.name) {
            if !(existing.list && field.list) {
                return Err(format!(
                    "field '{}' of table '{}' is declared twice (first in column {})",
                    field.name,
                    self.table,
                    existing.column + 1
                ));
            }
        }
        self.fields.push(field);
        Ok(())
    }

    /// Add a field only if no declaration with that name exists.
    pub fn add_default(&mut self, field: FieldConstructor) {
        if self.field(&field.name).is_none() {
            self.fields.push(field);
        }
    }

    /// Build a record from one row; `None` when the id is empty.
    pub fn build(&self, row: &[String]) -> Option<Record> {
        let id = self.field(ID_FIELD)?.evaluate(row)?;
        if !matches!(id, FieldValue::Scalar(_)) {
            return None;
        }

        let mut record = Record::new();
        record.insert(ID_FIELD.to_string(), id);
        for field in self.fields.iter().filter(|f| f.name != ID_FIELD) {
            let Some(value) = field.evaluate(row) else {
                continue;
            };
            match record.get_mut(&field.name) {
                Some(existing) => existing.extend(value),
                None => {
                    record.insert(field.name.clone(), value);
                }
            }
        }
        Some(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_build_puts_id_first_and_accumulates_lists() {
        let mut constructor = RecordConstructor::new("sample");
        constructor.add_field(FieldConstructor::column("tags", 2, true)).unwrap();
        constructor.add_field(FieldConstructor::column("id", 1, false)).unwrap();
        constructor.add_field(FieldConstructor::column("tags", 3, true)).unwrap();

        let record = constructor.build(&row(&["", "S1", "a,b", "c"])).unwrap();
        let keys: Vec<&String> = record.keys().collect();
        assert_eq!(keys, ["id", "tags"]);
        assert_eq!(record["tags"], FieldValue::list(["a", "b", "c"]));
    }

    #[test]
    fn test_duplicate_scalar_field_rejected() {
        let mut constructor = RecordConstructor::new("sample");
        constructor.add_field(FieldConstructor::column("name", 1, false)).unwrap();
        assert!(constructor.add_field(FieldConstructor::column("name", 2, false)).is_err());
    }

    #[test]
    fn test_empty_id_builds_nothing() {
        let mut constructor = RecordConstructor::new("sample");
        constructor.add_field(FieldConstructor::column("id", 1, false)).unwrap();
        assert!(constructor.build(&row(&["", "  "])).is_none());
    }

    #[test]
    fn test_child_inherits_literals_and_links_parent() {
        let mut parent = RecordConstructor::new("sample");
        parent.add_field(FieldConstructor::column("id", 1, false)).unwrap();
        parent.add_field(FieldConstructor::literal("sample.type", "tissue", 0)).unwrap();
        parent.add_field(FieldConstructor::column("weight", 2, false)).unwrap();

        let mut child = RecordConstructor::child_of(&parent, 0).unwrap();
        child.add_field(FieldConstructor::column("id", 3, false)).unwrap();

        let record = child.build(&row(&["", "S1", "5", "S1-a"])).unwrap();
        assert_eq!(record["id"], FieldValue::scalar("S1-a"));
        assert_eq!(record["parentID"], FieldValue::scalar("S1"));
        assert_eq!(record["type"], FieldValue::scalar("tissue"));
        assert!(!record.contains_key("weight"));
        assert!(child.is_child());
    }
}
