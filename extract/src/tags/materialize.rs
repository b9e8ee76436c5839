//! Table materializer: scans a worksheet and merges its rows into the store.

use crate::error::TagResult;
use crate::sheet::{is_blank_row, is_ignore_row, is_tags_row, Worksheet};
use crate::store::{record_id, ExtractionStore, FieldValue, Record, TableHierarchy};

use super::header::compile_header;
use super::record::RecordConstructor;

const PROJECT_TABLE: &str = "project";
const STUDY_TABLE: &str = "study";

/// Counters for one materialized worksheet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaterializeSummary {
    pub headers: usize,
    pub rows: usize,
    pub records: usize,
}

/// Builds records from tagged worksheets into one store.
///
/// The most recent project and study ids survive across worksheets, so a
/// project declared in one source is attached to entities of the next.
pub struct Materializer<'a> {
    store: &'a mut ExtractionStore,
    hierarchy: &'a TableHierarchy,
    propagate_ids: bool,
    last_project: Option<String>,
    last_study: Option<String>,
}

impl<'a> Materializer<'a> {
    pub fn new(store: &'a mut ExtractionStore, hierarchy: &'a TableHierarchy) -> Self {
        Self {
            store,
            hierarchy,
            propagate_ids: true,
            last_project: None,
            last_study: None,
        }
    }

    pub fn propagate_ids(mut self, enabled: bool) -> Self {
        self.propagate_ids = enabled;
        self
    }

    /// Materialize every tagged block of `sheet`.
    pub fn materialize(&mut self, sheet: &Worksheet) -> TagResult<MaterializeSummary> {
        let mut summary = MaterializeSummary::default();
        let mut scope: Option<Vec<RecordConstructor>> = None;

        for (index, row) in sheet.rows.iter().enumerate() {
            if is_tags_row(row) {
                let constructors = compile_header(sheet, index)?;
                tracing::debug!(
                    "{}:{} row {}: header with {} record constructor(s)",
                    sheet.source,
                    sheet.name,
                    index + 1,
                    constructors.len()
                );
                scope = Some(constructors);
                summary.headers += 1;
            } else if is_ignore_row(row) {
                continue;
            } else if is_blank_row(row) {
                scope = None;
            } else if let Some(constructors) = &scope {
                let built: Vec<(String, Record)> = constructors
                    .iter()
                    .filter_map(|c| c.build(row).map(|record| (c.table.clone(), record)))
                    .collect();
                summary.rows += 1;
                summary.records += built.len();
                self.absorb_row(built);
            }
        }

        tracing::info!(
            "{}:{}: {} header(s), {} row(s), {} record(s)",
            sheet.source,
            sheet.name,
            summary.headers,
            summary.rows,
            summary.records
        );
        Ok(summary)
    }

    fn absorb_row(&mut self, mut built: Vec<(String, Record)>) {
        for (table, record) in &built {
            let id = record_id(record).map(str::to_string);
            match table.as_str() {
                PROJECT_TABLE => self.last_project = id,
                STUDY_TABLE => self.last_study = id,
                _ => {}
            }
        }

        if self.propagate_ids {
            for (table, record) in &mut built {
                self.attach_ancestor(table.as_str(), record, PROJECT_TABLE);
                self.attach_ancestor(table.as_str(), record, STUDY_TABLE);
            }
        }

        for (table, record) in built {
            merge_record(self.store, &table, record);
        }
    }

    fn attach_ancestor(&self, table: &str, record: &mut Record, ancestor: &str) {
        if !self.hierarchy.is_below(table, ancestor) {
            return;
        }
        let last = match ancestor {
            PROJECT_TABLE => &self.last_project,
            _ => &self.last_study,
        };
        let field = format!("{}.id", ancestor);
        if let Some(id) = last {
            if !record.contains_key(&field) {
                record.insert(field, FieldValue::scalar(id.clone()));
            }
        }
    }
}

/// Merge a freshly built record into its table.
///
/// A new id is inserted as is. For an existing id, unseen fields are added
/// and known ones go through [`FieldValue::merge`].
pub fn merge_record(store: &mut ExtractionStore, table: &str, record: Record) {
    let Some(id) = record_id(&record).map(str::to_string) else {
        return;
    };
    let table = store.table_entry(table);
    match table.get_mut(&id) {
        None => {
            table.insert(id, record);
        }
        Some(existing) => {
            for (field, value) in record {
                match existing.get_mut(&field) {
                    Some(current) => current.merge(value),
                    None => {
                        existing.insert(field, value);
                    }
                }
            }
        }
    }
}

/// Materialize one worksheet into `store` with default id propagation.
pub fn materialize_sheet(
    sheet: &Worksheet,
    store: &mut ExtractionStore,
    hierarchy: &TableHierarchy,
) -> TagResult<MaterializeSummary> {
    Materializer::new(store, hierarchy).materialize(sheet)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TagError;

    fn sheet(rows: &[&[&str]]) -> Worksheet {
        Worksheet::from_rows("test.csv", "Sheet1", rows.iter().map(|r| r.to_vec()))
    }

    fn run(rows: &[&[&str]]) -> ExtractionStore {
        let mut store = ExtractionStore::new();
        materialize_sheet(&sheet(rows), &mut store, &TableHierarchy::default()).unwrap();
        store
    }

    #[test]
    fn test_duplicate_values_are_promoted_in_row_order() {
        let store = run(&[
            &["#tags", "#sample.id", "#sample.x"],
            &["", "S1", "a"],
            &["", "S1", "b"],
            &["", "S1", "a"],
        ]);
        let record = store.record("sample", "S1").unwrap();
        assert_eq!(record["x"], FieldValue::list(["a", "b"]));
        assert_eq!(record["id"], FieldValue::scalar("S1"));
    }

    #[test]
    fn test_materializing_twice_is_idempotent() {
        let rows: &[&[&str]] = &[
            &["#tags", "#sample.id", "#sample.name", "*#sample.tags"],
            &["", "S1", "first", "p,q"],
            &["", "S2", "second", "r"],
        ];
        let once = run(rows);

        let mut twice = ExtractionStore::new();
        let hierarchy = TableHierarchy::default();
        let mut materializer = Materializer::new(&mut twice, &hierarchy);
        materializer.materialize(&sheet(rows)).unwrap();
        materializer.materialize(&sheet(rows)).unwrap();

        assert_eq!(once, twice);
        assert_eq!(once.record("sample", "S1").unwrap()["tags"], FieldValue::list(["p", "q"]));
    }

    #[test]
    fn test_list_split_prefers_semicolon() {
        let store = run(&[&["#tags", "#sample.id", "*#sample.protocol.id"], &["", "S1", "p,q;r"]]);
        assert_eq!(
            store.record("sample", "S1").unwrap()["protocol.id"],
            FieldValue::list(["p,q", "r"])
        );
    }

    #[test]
    fn test_scopes_ignore_rows_and_blank_rows() {
        let store = run(&[
            &["notes before any header", "x"],
            &["#tags", "#sample.id"],
            &["#ignore", "Sample ID"],
            &["", "S1"],
            &["", ""],
            &["", "outside"],
            &["#tags", "#subject.id"],
            &["", "SUB1"],
        ]);
        assert_eq!(store.table("sample").unwrap().len(), 1);
        assert!(store.record("subject", "SUB1").is_some());
        assert!(store.record("sample", "outside").is_none());
    }

    #[test]
    fn test_project_and_study_ids_propagate() {
        let rows: &[&[&str]] = &[
            &["#tags", "#project.id", "#study.id", "#entity.id", "#entity.study.id"],
            &["", "PR1", "ST1", "E1", ""],
            &["", "", "", "E2", "ST9"],
        ];
        let store = run(rows);
        let e1 = store.record("entity", "E1").unwrap();
        assert_eq!(e1["project.id"], FieldValue::scalar("PR1"));
        assert_eq!(e1["study.id"], FieldValue::scalar("ST1"));
        assert!(store.record("study", "ST1").unwrap().contains_key("project.id"));
        assert!(!store.record("project", "PR1").unwrap().contains_key("project.id"));

        let e2 = store.record("entity", "E2").unwrap();
        assert_eq!(e2["study.id"], FieldValue::scalar("ST9"));
        assert_eq!(e2["project.id"], FieldValue::scalar("PR1"));

        let mut store = ExtractionStore::new();
        let hierarchy = TableHierarchy::default();
        Materializer::new(&mut store, &hierarchy)
            .propagate_ids(false)
            .materialize(&sheet(rows))
            .unwrap();
        assert!(!store.record("entity", "E1").unwrap().contains_key("project.id"));
    }

    #[test]
    fn test_child_records_materialize() {
        let store = run(&[
            &["#tags", "#sample.id", "#sample%child.id", "#sample%child.weight"],
            &["", "S1", "S1-a", "3"],
            &["", "S1", "S1-b", "4"],
        ]);
        let table = store.table("sample").unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table["S1-b"]["parentID"], FieldValue::scalar("S1"));
    }

    #[test]
    fn test_header_error_propagates() {
        let mut store = ExtractionStore::new();
        let err = materialize_sheet(
            &sheet(&[&["#tags", "#sample.id=+"]]),
            &mut store,
            &TableHierarchy::default(),
        )
        .unwrap_err();
        assert!(matches!(err, TagError::Grammar { .. }));
    }
}
